//! Error types for gitsync

use std::path::PathBuf;

use thiserror::Error;

use crate::auth::BoxError;
use crate::git::BackendError;

/// Result type alias for gitsync operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for gitsync operations
///
/// Every pipeline failure names the operation and the identifiers it was
/// working on; the backend failure is kept as the error source.
#[derive(Error, Debug)]
pub enum Error {
    /// The token provider could not issue an access token
    #[error("failed to issue access token for {operation}: {source}")]
    Auth {
        operation: &'static str,
        #[source]
        source: BoxError,
    },

    /// Cloning failed (transport, authentication or filesystem)
    #[error("failed to clone git repository from {url} to {} at {reference}: {source}", path.display())]
    Clone {
        url: String,
        path: PathBuf,
        reference: String,
        #[source]
        source: BackendError,
    },

    /// An existing remote branch was expected but could not be resolved
    #[error("failed to resolve {reference} for branch {branch}: {source}")]
    BranchResolution {
        branch: String,
        reference: String,
        #[source]
        source: BackendError,
    },

    /// The working tree could not be switched to the branch
    #[error("failed to checkout the branch {branch} in {repository}: {source}")]
    Checkout {
        branch: String,
        repository: String,
        #[source]
        source: BackendError,
    },

    /// The working tree status could not be read
    #[error("failed to get the worktree status of {repository}: {source}")]
    Status {
        repository: String,
        #[source]
        source: BackendError,
    },

    /// Staging files for a glob pattern failed
    #[error("failed to stage files using pattern {pattern} in {repository}: {source}")]
    Stage {
        pattern: String,
        repository: String,
        #[source]
        source: BackendError,
    },

    /// Creating the commit failed
    #[error("failed to commit in {repository}: {source}")]
    Commit {
        repository: String,
        #[source]
        source: BackendError,
    },

    /// Pushing the branch failed or was rejected by the remote
    #[error("failed to push branch {branch} to {repository}: {source}")]
    Push {
        branch: String,
        repository: String,
        #[source]
        source: BackendError,
    },

    /// The run was cancelled or timed out
    #[error("{operation} cancelled")]
    Cancelled { operation: &'static str },

    /// The working tree handle was released by an earlier cancelled operation
    #[error("working tree handle for {repository} has been released")]
    HandleReleased { repository: String },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Generic error with message
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether this error was caused by cancellation rather than a domain failure
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled { .. })
    }
}
