//! Pipeline checkpoint hooks

use std::path::PathBuf;

use tracing::debug;

use crate::git::CommitId;

/// A checkpoint reached by a pipeline run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    /// The repository was cloned
    Cloned {
        url: String,
        reference: String,
        path: PathBuf,
    },
    /// The working tree is on the target branch
    BranchSwitched {
        repository: String,
        branch: String,
        created: bool,
    },
    /// Local changes were committed
    Committed { repository: String, commit: CommitId },
    /// The branch was published to the remote
    Pushed {
        repository: String,
        branch: String,
        force: bool,
    },
}

/// Receives pipeline checkpoints
pub trait SyncObserver: Send + Sync {
    fn on_event(&self, event: &SyncEvent);
}

/// Discards every event
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl SyncObserver for NoopObserver {
    fn on_event(&self, _event: &SyncEvent) {}
}

/// Emits every event as a `tracing` debug event
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl SyncObserver for TracingObserver {
    fn on_event(&self, event: &SyncEvent) {
        match event {
            SyncEvent::Cloned {
                url,
                reference,
                path,
            } => {
                debug!(git_url = %url, git_reference = %reference, local_path = %path.display(), "Git repository cloned");
            }
            SyncEvent::BranchSwitched {
                repository,
                branch,
                created,
            } => {
                debug!(repository_name = %repository, branch = %branch, created, "Switched Git branch");
            }
            SyncEvent::Committed { repository, commit } => {
                debug!(repository_name = %repository, commit = %commit, "Git commit");
            }
            SyncEvent::Pushed {
                repository,
                branch,
                force,
            } => {
                debug!(repository_name = %repository, branch = %branch, force, "Git changes pushed");
            }
        }
    }
}
