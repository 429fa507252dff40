pub mod handlers;
pub mod service;

pub use grpc_tool;
pub use handlers::{grpc_listener_handler, grpc_server_handler, reconnecting_client_handler};
pub use service::{ServiceHandler, handler, run_services, run_services_until, shutdown_signal};
