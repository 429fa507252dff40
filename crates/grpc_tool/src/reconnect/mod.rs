//! Self-healing connection management.
//!
//! An [`AutoReconnectingConnection`] keeps one working connection to a target. It
//! dials, validates each candidate with a caller-supplied work routine, and redials
//! with backoff until the routine accepts a connection.
//!
//! # Example
//!
//! ```ignore
//! use grpc_tool::reconnect::{AutoReconnectingConnection, ReconnectConfig};
//! use grpc_tool::WorkError;
//!
//! let config = ReconnectConfig::default();
//! let manager = AutoReconnectingConnection::new("grpc://inventory:50051", config)?;
//!
//! let supervisor = manager.clone();
//! tokio::spawn(async move {
//!     supervisor
//!         .start(|connection| async move {
//!             let channel = connection.channel().ok_or(WorkError::connection("closed"))?;
//!             InventoryClient::new(channel).ping(()).await?;
//!             Ok(())
//!         })
//!         .await
//! });
//!
//! // Later, from anywhere holding a handle
//! manager.request_reconnect();
//! manager.stop();
//! ```

mod backoff;
mod config;
mod manager;
mod state;

pub use backoff::{Backoff, BackoffConfig};
pub use config::ReconnectConfig;
pub use manager::{AutoReconnectingConnection, ManagedConnection};
pub use state::ManagerState;
