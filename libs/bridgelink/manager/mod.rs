//! Connection lifecycle orchestration
//!
//! The [`ConnectionManager`] owns the active transport, the connection state
//! machine and the reconnection timers.

pub mod manager;
pub(crate) mod policy;

pub use manager::{ConnectionManager, LaunchToken, Metrics, StatusHandle};
