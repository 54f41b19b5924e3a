// ABOUTME: HTTP surface of the gateway: the device WebSocket service and the
// ABOUTME: operator control server, both built over shared service state

pub mod control;
pub mod server;
pub mod state;

pub use control::{control_router, serve_control};
pub use server::{device_router, serve_devices, DEVICE_ID_HEADER};
pub use state::ServiceState;
