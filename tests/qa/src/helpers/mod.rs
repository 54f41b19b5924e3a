pub mod device;
pub mod gateway;
pub mod sinks;
