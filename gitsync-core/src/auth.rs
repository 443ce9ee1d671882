//! Access token seam
//!
//! The pipeline never stores tokens. Every network operation asks its
//! [`TokenProvider`] for a new one right before connecting.

use async_trait::async_trait;

/// Username used for HTTPS basic auth with app installation tokens.
///
/// GitHub requires this exact value for app tokens; personal tokens accept any username.
pub const APP_TOKEN_USERNAME: &str = "x-access-token";

/// Boxed error returned by token providers
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// A short-lived bearer token
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken(String);

impl AccessToken {
    /// Wrap a raw token
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Get the raw token value
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AccessToken(***)")
    }
}

/// A token together with the API client it was issued for
#[derive(Debug)]
pub struct IssuedToken<C> {
    /// API client scoped to the token
    pub client: C,
    /// The bearer token
    pub token: AccessToken,
}

/// Basic auth credentials for one git transport operation
#[derive(Debug, Clone)]
pub struct Credentials {
    /// HTTPS username
    pub username: String,
    /// Bearer token sent as the password
    pub token: AccessToken,
}

impl Credentials {
    /// Credentials for an app installation token
    pub fn app_token(token: AccessToken) -> Self {
        Self {
            username: APP_TOKEN_USERNAME.to_string(),
            token,
        }
    }
}

/// Issues access tokens from durable credentials
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Caller-owned credential bundle (app identity, installation scope)
    type Config: Send + Sync;

    /// API client handle returned with each token
    type Client: Send;

    /// Issue a new token. Each call may return a different token.
    async fn issue(&self, config: &Self::Config) -> Result<IssuedToken<Self::Client>, BoxError>;
}
