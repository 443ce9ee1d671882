//! GitHub token providers using octocrab

use async_trait::async_trait;
use gitsync_core::{AccessToken, BoxError, Config, IssuedToken, Secrets, TokenProvider};
use jsonwebtoken::EncodingKey;
use octocrab::models::{AppId, InstallationId};
use octocrab::Octocrab;
use secrecy::ExposeSecret;
use tracing::{debug, info};

use crate::{Error, Result};

/// Durable credentials of a GitHub App installation
#[derive(Clone)]
pub struct AppAuthConfig {
    pub app_id: u64,
    pub installation_id: u64,
    /// PEM encoded RSA private key of the app
    pub private_key: String,
    /// REST API base URL
    pub api_url: String,
}

impl std::fmt::Debug for AppAuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppAuthConfig")
            .field("app_id", &self.app_id)
            .field("installation_id", &self.installation_id)
            .field("private_key", &"***")
            .field("api_url", &self.api_url)
            .finish()
    }
}

impl AppAuthConfig {
    /// Build app credentials from configuration and secrets
    ///
    /// The private key is read from `github.private_key_path` when set, from
    /// the secrets file otherwise.
    pub fn from_config(config: &Config, secrets: &Secrets) -> Result<Self> {
        let app_id = config.github.app_id.ok_or_else(|| {
            Error::MissingSetting(
                "github.app_id (or GITSYNC_APP_ID) is required for app authentication".to_string(),
            )
        })?;
        let installation_id = config.github.installation_id.ok_or_else(|| {
            Error::MissingSetting(
                "github.installation_id (or GITSYNC_INSTALLATION_ID) is required for app authentication"
                    .to_string(),
            )
        })?;
        let private_key = secrets
            .app_private_key(config.github.private_key_path.as_deref())?
            .ok_or_else(|| {
                Error::MissingSetting(
                    "GitHub App private key not found. Set github.private_key_path \
                     or add private_key to ~/.config/gitsync/secrets.toml"
                        .to_string(),
                )
            })?;

        Ok(Self {
            app_id,
            installation_id,
            private_key,
            api_url: config.github.api_url.clone(),
        })
    }
}

/// Issues a new installation access token on every call
#[derive(Debug, Clone, Copy, Default)]
pub struct AppTokenProvider;

impl AppTokenProvider {
    pub fn new() -> Self {
        Self
    }

    /// Exchange the app JWT for an installation token
    pub async fn installation_token(&self, config: &AppAuthConfig) -> Result<IssuedToken<Octocrab>> {
        let key = EncodingKey::from_rsa_pem(config.private_key.as_bytes())?;

        let app = Octocrab::builder()
            .base_uri(config.api_url.as_str())?
            .app(AppId(config.app_id), key)
            .build()?;

        debug!(
            app_id = config.app_id,
            installation_id = config.installation_id,
            "Requesting installation token"
        );

        let (client, token) = app
            .installation_and_token(InstallationId(config.installation_id))
            .await
            .map_err(|e| match e {
                octocrab::Error::GitHub { source, .. } if source.message.contains("credentials") => {
                    Error::Auth(format!(
                        "GitHub rejected app {}: {}",
                        config.app_id, source.message
                    ))
                }
                other => Error::Api(other),
            })?;

        info!(installation_id = config.installation_id, "Issued installation token");

        Ok(IssuedToken {
            client,
            token: AccessToken::new(token.expose_secret()),
        })
    }
}

#[async_trait]
impl TokenProvider for AppTokenProvider {
    type Config = AppAuthConfig;
    type Client = Octocrab;

    async fn issue(&self, config: &AppAuthConfig) -> std::result::Result<IssuedToken<Octocrab>, BoxError> {
        Ok(self.installation_token(config).await?)
    }
}

/// A personal access token
#[derive(Clone)]
pub struct TokenAuthConfig {
    pub token: AccessToken,
    /// REST API base URL
    pub api_url: String,
}

impl std::fmt::Debug for TokenAuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenAuthConfig")
            .field("token", &self.token)
            .field("api_url", &self.api_url)
            .finish()
    }
}

impl TokenAuthConfig {
    /// Token is loaded from (in priority order):
    /// 1. GITHUB_TOKEN environment variable
    /// 2. ~/.config/gitsync/secrets.toml
    pub fn from_config(config: &Config, secrets: &Secrets) -> Result<Self> {
        let token = secrets.github_token().ok_or_else(|| {
            Error::Auth(
                "GitHub token not found. Set GITHUB_TOKEN environment variable \
                 or add token to ~/.config/gitsync/secrets.toml"
                    .to_string(),
            )
        })?;

        Ok(Self {
            token: AccessToken::new(token),
            api_url: config.github.api_url.clone(),
        })
    }
}

/// Hands out the same personal access token for every operation
#[derive(Debug, Clone, Copy, Default)]
pub struct StaticTokenProvider;

impl StaticTokenProvider {
    pub fn new() -> Self {
        Self
    }

    /// Build a client authenticated with the personal token
    pub fn client(&self, config: &TokenAuthConfig) -> Result<Octocrab> {
        let client = Octocrab::builder()
            .base_uri(config.api_url.as_str())?
            .personal_token(config.token.expose().to_string())
            .build()
            .map_err(|e| Error::Auth(format!("Failed to create GitHub client: {}", e)))?;
        Ok(client)
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    type Config = TokenAuthConfig;
    type Client = Octocrab;

    async fn issue(&self, config: &TokenAuthConfig) -> std::result::Result<IssuedToken<Octocrab>, BoxError> {
        let client = self.client(config)?;
        Ok(IssuedToken {
            client,
            token: config.token.clone(),
        })
    }
}
