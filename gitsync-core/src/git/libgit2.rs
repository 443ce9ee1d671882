//! libgit2 implementation of [`GitBackend`]

use std::path::{Path, PathBuf};

use git2::build::{CheckoutBuilder, RepoBuilder};
use git2::{Cred, ErrorCode, FetchOptions, Oid, PushOptions, RemoteCallbacks, Repository, Status, StatusOptions};
use glob::{MatchOptions, Pattern};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use super::{
    BackendError, CloneRequest, CommitId, CommitRequest, FileState, GitBackend, Signature,
    StatusEntry, WorktreeStatus,
};
use crate::auth::Credentials;
use crate::refs;

/// Glob matching rules for staging patterns: `*` does not cross `/`
const PATTERN_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// A cloned repository with a working tree
pub struct Git2Repository {
    /// The underlying git2 repository
    repo: Repository,
    /// Path to the working tree root
    root: PathBuf,
}

impl std::fmt::Debug for Git2Repository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Git2Repository")
            .field("root", &self.root)
            .finish_non_exhaustive()
    }
}

impl Git2Repository {
    /// Open an existing non-bare repository
    pub fn open(path: impl AsRef<Path>) -> Result<Self, BackendError> {
        let repo = Repository::open(path.as_ref())?;
        Self::from_repository(repo)
    }

    fn from_repository(repo: Repository) -> Result<Self, BackendError> {
        let root = repo
            .workdir()
            .ok_or_else(|| BackendError::Other("Bare repositories are not supported".to_string()))?
            .to_path_buf();
        Ok(Self { repo, root })
    }

    /// Get the working tree root
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Get access to the underlying git2 repository
    pub fn inner(&self) -> &Repository {
        &self.repo
    }
}

/// [`GitBackend`] backed by libgit2 over HTTPS basic auth
#[derive(Debug, Clone, Copy, Default)]
pub struct Git2Backend;

impl Git2Backend {
    pub fn new() -> Self {
        Self
    }
}

/// Callbacks shared by clone and push: basic auth plus cancellation polling
fn remote_callbacks<'a>(
    credentials: &'a Credentials,
    cancel: &'a CancellationToken,
) -> RemoteCallbacks<'a> {
    let mut callbacks = RemoteCallbacks::new();

    // libgit2 keeps asking for credentials while the server rejects them
    let mut attempts = 0;
    callbacks.credentials(move |_url, _username_from_url, _allowed| {
        attempts += 1;
        if attempts > 1 {
            return Err(git2::Error::from_str("authentication failed: token was rejected"));
        }
        Cred::userpass_plaintext(&credentials.username, credentials.token.expose())
    });
    callbacks.transfer_progress(move |_| !cancel.is_cancelled());
    callbacks.sideband_progress(move |_| !cancel.is_cancelled());

    callbacks
}

fn cancelled_or(cancel: &CancellationToken, err: git2::Error) -> BackendError {
    if cancel.is_cancelled() {
        BackendError::Cancelled
    } else {
        BackendError::Git(err)
    }
}

fn to_git_signature(signature: &Signature) -> Result<git2::Signature<'static>, BackendError> {
    let when = git2::Time::new(signature.when.timestamp(), 0);
    Ok(git2::Signature::new(&signature.name, &signature.email, &when)?)
}

fn file_state(status: Status) -> Option<FileState> {
    if status.contains(Status::WT_NEW) {
        Some(FileState::Untracked)
    } else if status.contains(Status::INDEX_NEW) {
        Some(FileState::Added)
    } else if status.intersects(Status::WT_DELETED | Status::INDEX_DELETED) {
        Some(FileState::Deleted)
    } else if status.intersects(Status::WT_RENAMED | Status::INDEX_RENAMED) {
        Some(FileState::Renamed)
    } else if status.intersects(Status::WT_TYPECHANGE | Status::INDEX_TYPECHANGE) {
        Some(FileState::TypeChanged)
    } else if status.intersects(Status::WT_MODIFIED | Status::INDEX_MODIFIED | Status::CONFLICTED) {
        Some(FileState::Modified)
    } else {
        None
    }
}

/// Whether a pattern matches a path or one of its parent directories
fn path_matches(pattern: &Pattern, path: &str) -> bool {
    let mut candidate = path;
    loop {
        if pattern.matches_with(candidate, PATTERN_OPTIONS) {
            return true;
        }
        match candidate.rfind('/') {
            Some(i) => candidate = &candidate[..i],
            None => return false,
        }
    }
}

impl GitBackend for Git2Backend {
    type Repository = Git2Repository;

    fn clone_repository(
        &self,
        request: &CloneRequest,
        credentials: &Credentials,
        cancel: &CancellationToken,
    ) -> Result<Git2Repository, BackendError> {
        if cancel.is_cancelled() {
            return Err(BackendError::Cancelled);
        }

        std::fs::create_dir_all(&request.path)
            .map_err(|e| BackendError::Other(format!("Failed to create {}: {}", request.path.display(), e)))?;

        let mut fetch_options = FetchOptions::new();
        fetch_options.remote_callbacks(remote_callbacks(credentials, cancel));

        let mut builder = RepoBuilder::new();
        builder.fetch_options(fetch_options);
        if let Some(branch) = refs::branch_shorthand(&request.reference) {
            builder.branch(branch);
        }

        let repo = builder
            .clone(&request.url, &request.path)
            .map_err(|e| cancelled_or(cancel, e))?;

        Git2Repository::from_repository(repo)
    }

    fn resolve_reference(
        &self,
        repo: &Git2Repository,
        reference: &str,
    ) -> Result<CommitId, BackendError> {
        let found = repo.repo.find_reference(reference).map_err(|e| {
            if e.code() == ErrorCode::NotFound {
                BackendError::ReferenceNotFound(reference.to_string())
            } else {
                BackendError::Git(e)
            }
        })?;
        let commit = found.peel_to_commit()?;
        Ok(commit.id().into())
    }

    fn set_reference(
        &self,
        repo: &mut Git2Repository,
        reference: &str,
        target: &CommitId,
    ) -> Result<(), BackendError> {
        let oid = Oid::from_str(target.as_str())?;
        repo.repo
            .reference(reference, oid, true, "gitsync: pin branch to remote tip")?;
        trace!(reference, target = %target, "Stored reference");
        Ok(())
    }

    fn checkout(
        &self,
        repo: &mut Git2Repository,
        reference: &str,
        create: bool,
    ) -> Result<(), BackendError> {
        let git = &repo.repo;

        if create {
            let branch = refs::branch_shorthand(reference).ok_or_else(|| {
                BackendError::Other(format!("{} is not a local branch reference", reference))
            })?;
            let head = git.head()?.peel_to_commit()?;
            git.branch(branch, &head, false)?;
        }

        let target = git.find_reference(reference)?.peel_to_commit()?;
        let mut checkout = CheckoutBuilder::new();
        checkout.safe();
        git.checkout_tree(target.as_object(), Some(&mut checkout))?;
        git.set_head(reference)?;

        Ok(())
    }

    fn status(&self, repo: &Git2Repository) -> Result<WorktreeStatus, BackendError> {
        let mut options = StatusOptions::new();
        options
            .include_untracked(true)
            .recurse_untracked_dirs(true)
            .include_ignored(false)
            .exclude_submodules(true);

        let statuses = repo.repo.statuses(Some(&mut options))?;
        let entries = statuses
            .iter()
            .filter_map(|entry| {
                let state = file_state(entry.status())?;
                let path = String::from_utf8_lossy(entry.path_bytes()).into_owned();
                Some(StatusEntry { path, state })
            })
            .collect();

        Ok(WorktreeStatus { entries })
    }

    fn stage(&self, repo: &mut Git2Repository, pattern: &str) -> Result<(), BackendError> {
        let matcher = Pattern::new(pattern).map_err(|e| BackendError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: e.msg.to_string(),
        })?;

        let status = self.status(repo)?;
        let mut index = repo.repo.index()?;
        let mut staged = 0usize;

        for entry in status.entries.iter().filter(|e| path_matches(&matcher, &e.path)) {
            let path = Path::new(&entry.path);
            if entry.state == FileState::Deleted || !repo.root.join(path).exists() {
                index.remove_path(path)?;
            } else {
                index.add_path(path)?;
            }
            staged += 1;
        }
        index.write()?;

        debug!(pattern, staged, "Staged files");
        Ok(())
    }

    fn commit(
        &self,
        repo: &mut Git2Repository,
        request: &CommitRequest,
    ) -> Result<CommitId, BackendError> {
        let git = &repo.repo;
        let mut index = git.index()?;

        if request.all {
            index.update_all(["*"], None)?;
            index.write()?;
        }

        let tree_id = index.write_tree()?;
        let tree = git.find_tree(tree_id)?;

        let parent = match git.head() {
            Ok(head) => Some(head.peel_to_commit()?),
            Err(e) if e.code() == ErrorCode::UnbornBranch => None,
            Err(e) => return Err(e.into()),
        };
        if parent.as_ref().is_some_and(|p| p.tree_id() == tree_id) {
            return Err(BackendError::NothingStaged);
        }

        let author = to_git_signature(&request.author)?;
        let committer = to_git_signature(&request.committer)?;
        let parents: Vec<&git2::Commit<'_>> = parent.iter().collect();

        let oid = git.commit(Some("HEAD"), &author, &committer, &request.message, &tree, &parents)?;
        Ok(oid.into())
    }

    fn push(
        &self,
        repo: &mut Git2Repository,
        refspec: &str,
        credentials: &Credentials,
        cancel: &CancellationToken,
    ) -> Result<(), BackendError> {
        if cancel.is_cancelled() {
            return Err(BackendError::Cancelled);
        }

        let mut remote = repo.repo.find_remote(refs::ORIGIN)?;
        let mut rejected: Vec<(String, String)> = Vec::new();

        let result = {
            let mut callbacks = remote_callbacks(credentials, cancel);
            callbacks.push_negotiation(|_updates| {
                if cancel.is_cancelled() {
                    Err(git2::Error::from_str("push cancelled"))
                } else {
                    Ok(())
                }
            });
            callbacks.push_update_reference(|reference, status| {
                if let Some(message) = status {
                    rejected.push((reference.to_string(), message.to_string()));
                }
                Ok(())
            });

            let mut options = PushOptions::new();
            options.remote_callbacks(callbacks);
            remote.push(&[refspec], Some(&mut options))
        };
        result.map_err(|e| cancelled_or(cancel, e))?;

        if let Some((reference, message)) = rejected.into_iter().next() {
            return Err(BackendError::Rejected { reference, message });
        }

        Ok(())
    }
}
