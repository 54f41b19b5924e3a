pub mod helpers;

pub use helpers::device::TestDevice;
pub use helpers::gateway::{fast_delivery, wait_until, ScriptedMembership, TestGateway};
pub use helpers::sinks::DeliverySink;
