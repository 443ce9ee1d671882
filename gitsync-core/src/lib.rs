//! gitsync Core - clone, branch, commit and push pipeline
//!
//! This crate takes a remote repository identity and a set of declarative
//! update options, clones the repository, positions a working branch,
//! commits local changes and pushes them back, fetching a fresh access
//! token for every network operation.

pub mod auth;
pub mod clock;
pub mod config;
pub mod error;
pub mod git;
pub mod observer;
pub mod options;
pub mod pipeline;
pub mod refs;
pub mod repository;
pub mod secrets;

pub use auth::{AccessToken, BoxError, Credentials, IssuedToken, TokenProvider, APP_TOKEN_USERNAME};
pub use clock::{Clock, FixedClock, SystemClock};
pub use config::{Config, GitIdentityConfig, GitHubConfig, SyncConfig};
pub use error::{Error, Result};
pub use git::{
    BackendError, CloneRequest, CommitId, CommitRequest, FileState, Git2Backend, Git2Repository,
    GitBackend, Signature, StatusEntry, WorktreeStatus,
};
pub use observer::{NoopObserver, SyncEvent, SyncObserver, TracingObserver};
pub use options::{BranchOptions, CommitOutcome, GitOptions, PushOptions, UpdateOptions};
pub use pipeline::{Pipeline, SyncReport, WorkingTreeHandle};
pub use repository::RepositoryIdentity;
pub use secrets::{GitHubSecrets, Secrets};
