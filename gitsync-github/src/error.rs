//! Error types for GitHub token issuing

use thiserror::Error;

/// Result type for GitHub operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while issuing GitHub tokens
#[derive(Error, Debug)]
pub enum Error {
    /// GitHub API error
    #[error("GitHub API error: {0}")]
    Api(#[from] octocrab::Error),

    /// The app private key could not be used for signing
    #[error("Invalid GitHub App private key: {0}")]
    PrivateKey(#[from] jsonwebtoken::errors::Error),

    /// Authentication error
    #[error("GitHub authentication error: {0}")]
    Auth(String),

    /// Required app settings are missing
    #[error("Missing GitHub setting: {0}")]
    MissingSetting(String),

    /// Configuration or secrets could not be loaded
    #[error(transparent)]
    Core(#[from] gitsync_core::Error),
}
