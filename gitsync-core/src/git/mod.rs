//! Git capability interface
//!
//! The pipeline only talks to git through [`GitBackend`]. [`Git2Backend`] is the
//! libgit2 implementation; tests substitute in-memory fakes.

mod libgit2;
mod status;

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::auth::Credentials;

pub use libgit2::{Git2Backend, Git2Repository};
pub use status::{FileState, StatusEntry, WorktreeStatus};

/// Errors reported by a git backend
#[derive(Error, Debug)]
pub enum BackendError {
    /// libgit2 error
    #[error("{0}")]
    Git(#[from] git2::Error),

    /// A reference does not exist
    #[error("reference {0} not found")]
    ReferenceNotFound(String),

    /// A staging pattern is not a valid glob
    #[error("invalid pattern {pattern}: {reason}")]
    InvalidPattern { pattern: String, reason: String },

    /// Status was dirty but the index matches HEAD
    #[error("nothing staged to commit")]
    NothingStaged,

    /// The remote refused a reference update
    #[error("remote rejected {reference}: {message}")]
    Rejected { reference: String, message: String },

    /// The operation observed the cancellation token
    #[error("operation cancelled")]
    Cancelled,

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Hex object id of a commit
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct CommitId(String);

impl CommitId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CommitId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<git2::Oid> for CommitId {
    fn from(oid: git2::Oid) -> Self {
        Self(oid.to_string())
    }
}

/// Name, email and time of a commit author or committer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    pub name: String,
    pub email: String,
    pub when: DateTime<Utc>,
}

/// What to clone and where
#[derive(Debug, Clone)]
pub struct CloneRequest {
    /// Remote URL
    pub url: String,
    /// Local directory to create
    pub path: PathBuf,
    /// `HEAD` or `refs/heads/<branch>`
    pub reference: String,
}

/// What to commit
#[derive(Debug, Clone)]
pub struct CommitRequest {
    pub message: String,
    pub author: Signature,
    pub committer: Signature,
    /// Include every modification to tracked files
    pub all: bool,
}

/// Version control operations used by the pipeline
///
/// Methods block; the pipeline runs them on the blocking thread pool. Network
/// operations must poll `cancel` and return [`BackendError::Cancelled`] once it fires.
pub trait GitBackend: Send + Sync + 'static {
    /// Exclusive state of one cloned repository
    type Repository: Send + 'static;

    /// Clone `request.url` into `request.path` at `request.reference`
    fn clone_repository(
        &self,
        request: &CloneRequest,
        credentials: &Credentials,
        cancel: &CancellationToken,
    ) -> Result<Self::Repository, BackendError>;

    /// Resolve a full reference name to the commit it points at
    fn resolve_reference(
        &self,
        repo: &Self::Repository,
        reference: &str,
    ) -> Result<CommitId, BackendError>;

    /// Create or overwrite a reference pinned to `target`
    fn set_reference(
        &self,
        repo: &mut Self::Repository,
        reference: &str,
        target: &CommitId,
    ) -> Result<(), BackendError>;

    /// Check out a local branch reference, creating it at HEAD when `create` is set
    fn checkout(
        &self,
        repo: &mut Self::Repository,
        reference: &str,
        create: bool,
    ) -> Result<(), BackendError>;

    /// Working tree status against HEAD
    fn status(&self, repo: &Self::Repository) -> Result<WorktreeStatus, BackendError>;

    /// Stage every changed path matching a glob pattern
    fn stage(&self, repo: &mut Self::Repository, pattern: &str) -> Result<(), BackendError>;

    /// Commit the index on top of HEAD
    fn commit(
        &self,
        repo: &mut Self::Repository,
        request: &CommitRequest,
    ) -> Result<CommitId, BackendError>;

    /// Push a refspec to the origin remote
    fn push(
        &self,
        repo: &mut Self::Repository,
        refspec: &str,
        credentials: &Credentials,
        cancel: &CancellationToken,
    ) -> Result<(), BackendError>;
}
