// libs/signaling-cell/src/services/mod.rs

pub mod access;
pub mod call_log;
pub mod registry;
pub mod session;

pub use access::AppointmentAccessService;
pub use call_log::CallEventLogService;
pub use registry::SignalingRegistry;
