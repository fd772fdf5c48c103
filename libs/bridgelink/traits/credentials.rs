use crate::error::CredentialError;
use async_trait::async_trait;

/// Trait for providing the relay connection credentials
///
/// Both tokens are fetched fresh on every relay connection attempt and
/// joined before the WebSocket is opened, so implementations may refresh
/// expired tokens here.
///
/// # Example
/// ```ignore
/// struct AccountCredentials {
///     account: Arc<Account>,
/// }
///
/// #[async_trait::async_trait]
/// impl CredentialProvider for AccountCredentials {
///     async fn fetch_identity_token(&self) -> Result<String, CredentialError> {
///         let user = self.account.current_user().ok_or(CredentialError::NotSignedIn)?;
///         user.id_token().await.map_err(|e| CredentialError::Fetch(e.to_string()))
///     }
///
///     async fn fetch_push_token(&self) -> Result<String, CredentialError> {
///         self.account.push_token().await.map_err(|e| CredentialError::Fetch(e.to_string()))
///     }
/// }
/// ```
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Fetch the account identity token sent in the relay handshake
    ///
    /// Return [`CredentialError::NotSignedIn`] when no account is available;
    /// the attempt then closes as unauthorized rather than as an internal error.
    async fn fetch_identity_token(&self) -> Result<String, CredentialError>;

    /// Fetch the push-notification registration token
    async fn fetch_push_token(&self) -> Result<String, CredentialError>;
}

/// Credential provider returning fixed tokens
///
/// Useful for tests and for hosts that manage token refresh elsewhere.
#[derive(Debug, Clone)]
pub struct StaticCredentials {
    identity_token: String,
    push_token: String,
}

impl StaticCredentials {
    pub fn new(identity_token: impl Into<String>, push_token: impl Into<String>) -> Self {
        Self {
            identity_token: identity_token.into(),
            push_token: push_token.into(),
        }
    }
}

#[async_trait]
impl CredentialProvider for StaticCredentials {
    async fn fetch_identity_token(&self) -> Result<String, CredentialError> {
        Ok(self.identity_token.clone())
    }

    async fn fetch_push_token(&self) -> Result<String, CredentialError> {
        Ok(self.push_token.clone())
    }
}

/// Credential provider for hosts without an account
///
/// Every relay attempt closes as unauthorized.
pub struct NoCredentials;

#[async_trait]
impl CredentialProvider for NoCredentials {
    async fn fetch_identity_token(&self) -> Result<String, CredentialError> {
        Err(CredentialError::NotSignedIn)
    }

    async fn fetch_push_token(&self) -> Result<String, CredentialError> {
        Err(CredentialError::NotSignedIn)
    }
}
