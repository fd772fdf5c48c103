//! # Bridgelink Traits
//!
//! Extension seams and shared types for the bridgelink connection core:
//!
//! - **SessionListener**: Receive inbound frames and state changes
//! - **HostScheduler**: Mirror keepalive/passive-reconnect timers onto host alarms
//! - **CredentialProvider**: Fetch relay identity and push tokens
//! - **ReconnectionStrategy**: Control drop-retry delays
//! - **CloseReason**: Close taxonomy surfaced to the host

pub mod credentials;
pub mod error;
pub mod reason;
pub mod reconnect;
pub mod scheduler;
pub mod session;

// Re-export commonly used types
pub use credentials::{CredentialProvider, NoCredentials, StaticCredentials};
pub use error::{BridgeError, CredentialError, Result};
pub use reason::{close_code, CloseReason};
pub use reconnect::{DelayTable, NeverReconnect, ReconnectionStrategy};
pub use scheduler::{HostScheduler, NoOpScheduler};
pub use session::{NoOpSession, SessionListener};
