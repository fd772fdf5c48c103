use thiserror::Error;

use crate::core::codec::FrameError;
use crate::core::config::ConfigError;

/// Main error type for bridgelink setup operations
///
/// Connection faults never surface through this type: they are converted
/// into a single [`CloseReason`](crate::CloseReason) at the reader or writer
/// boundary instead.
#[derive(Error, Debug)]
pub enum BridgeError {
    /// Invalid or incomplete configuration
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Operation not allowed in the current connection state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Wire framing error
    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),

    /// Configuration file error
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// WebSocket error
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// Socket error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for bridgelink operations
pub type Result<T> = std::result::Result<T, BridgeError>;

/// Failure reported by a [`CredentialProvider`](crate::CredentialProvider)
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CredentialError {
    /// No account is signed in on this device
    #[error("No account is signed in")]
    NotSignedIn,

    /// The token could not be fetched
    #[error("Credential fetch failed: {0}")]
    Fetch(String),
}
