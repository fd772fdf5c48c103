//! Host-side trait implementations for binaries

use async_trait::async_trait;
use bridgelink::{CloseReason, ConnectionState, CredentialError, CredentialProvider, SessionListener};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{info, warn};

/// Session listener that logs every event
#[derive(Debug, Default)]
pub struct LoggingSession {
    frames: AtomicU64,
}

impl LoggingSession {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionListener for LoggingSession {
    fn on_message(&self, message_type: i32, payload: Vec<u8>) {
        let count = self.frames.fetch_add(1, Ordering::Relaxed) + 1;
        info!("Frame #{}: type {} ({} bytes)", count, message_type, payload.len());
    }

    fn on_state_change(&self, state: ConnectionState, reason: Option<CloseReason>) {
        match reason {
            Some(reason) if reason.is_user_actionable() => {
                warn!("State {:?}: {} (action required)", state, reason);
            }
            Some(reason) if !reason.is_silent() => warn!("State {:?}: {}", state, reason),
            Some(reason) => info!("State {:?}: {}", state, reason),
            None => info!("State {:?}", state),
        }
    }
}

/// Relay credentials taken from the environment
///
/// `BRIDGE_ID_TOKEN` is required; a missing value is reported as no signed-in
/// account. `BRIDGE_PUSH_TOKEN` is optional.
#[derive(Debug, Clone, Default)]
pub struct EnvCredentials {
    identity_token: Option<String>,
    push_token: String,
}

impl EnvCredentials {
    pub fn from_env() -> Self {
        Self {
            identity_token: std::env::var("BRIDGE_ID_TOKEN").ok().filter(|token| !token.is_empty()),
            push_token: std::env::var("BRIDGE_PUSH_TOKEN").unwrap_or_default(),
        }
    }
}

#[async_trait]
impl CredentialProvider for EnvCredentials {
    async fn fetch_identity_token(&self) -> Result<String, CredentialError> {
        self.identity_token.clone().ok_or(CredentialError::NotSignedIn)
    }

    async fn fetch_push_token(&self) -> Result<String, CredentialError> {
        Ok(self.push_token.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_identity_is_not_signed_in() {
        let credentials = EnvCredentials::default();
        assert_eq!(
            credentials.fetch_identity_token().await,
            Err(CredentialError::NotSignedIn)
        );
        assert_eq!(credentials.fetch_push_token().await, Ok(String::new()));
    }
}
