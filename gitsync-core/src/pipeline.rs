//! Clone, switch, commit and push pipeline
//!
//! One [`Pipeline`] drives one repository at a time through
//! `Clone → Switch → (caller mutates files) → Commit → Push`. Every git call runs
//! on the blocking thread pool while the caller's future races the pipeline's
//! [`CancellationToken`]. Clone and push each ask the [`TokenProvider`] for a
//! fresh token immediately before connecting; nothing is cached between steps.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use crate::auth::{Credentials, TokenProvider};
use crate::clock::{Clock, SystemClock};
use crate::git::{BackendError, CloneRequest, CommitRequest, GitBackend, Signature};
use crate::observer::{SyncEvent, SyncObserver, TracingObserver};
use crate::options::{BranchOptions, CommitOutcome, PushOptions, UpdateOptions};
use crate::refs;
use crate::repository::{RepositoryIdentity, DEFAULT_GIT_URL};
use crate::{Error, Result};

/// Exclusive handle to a cloned working tree
///
/// Created by [`Pipeline::clone_repository`]. Every operation borrows it mutably,
/// so two operations can never touch the same working tree at once. If an
/// operation is cancelled mid-flight the handle is released and all further
/// operations fail with [`Error::HandleReleased`].
pub struct WorkingTreeHandle<R> {
    repo: Option<R>,
    path: PathBuf,
    repository_name: String,
    identity: RepositoryIdentity,
}

impl<R> WorkingTreeHandle<R> {
    /// Root of the working tree
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Name used in logs and errors (the working tree directory name)
    pub fn repository_name(&self) -> &str {
        &self.repository_name
    }

    /// Identity the working tree was cloned from
    pub fn identity(&self) -> &RepositoryIdentity {
        &self.identity
    }

    /// Backend repository state, unless the handle has been released
    pub fn repository(&self) -> Option<&R> {
        self.repo.as_ref()
    }

    /// Whether a cancelled operation released the handle
    pub fn is_released(&self) -> bool {
        self.repo.is_none()
    }
}

impl<R> std::fmt::Debug for WorkingTreeHandle<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkingTreeHandle")
            .field("path", &self.path)
            .field("repository_name", &self.repository_name)
            .field("released", &self.is_released())
            .finish_non_exhaustive()
    }
}

/// Summary of a completed [`Pipeline::run`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    /// `owner/name`
    pub repository: String,
    pub branch: String,
    pub outcome: CommitOutcome,
    /// Whether the branch was pushed (only when something was committed)
    pub pushed: bool,
}

/// The synchronization pipeline
pub struct Pipeline<B: GitBackend, T: TokenProvider> {
    backend: Arc<B>,
    tokens: T,
    git_url: String,
    clock: Arc<dyn Clock>,
    observer: Arc<dyn SyncObserver>,
    cancel: CancellationToken,
}

impl<B: GitBackend, T: TokenProvider> std::fmt::Debug for Pipeline<B, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("git_url", &self.git_url)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

fn domain_error(
    operation: &'static str,
    source: BackendError,
    wrap: impl FnOnce(BackendError) -> Error,
) -> Error {
    match source {
        BackendError::Cancelled => Error::Cancelled { operation },
        source => wrap(source),
    }
}

impl<B: GitBackend, T: TokenProvider> Pipeline<B, T> {
    /// Create a pipeline cloning from `https://github.com`, using the wall clock
    /// and logging checkpoints through `tracing`
    pub fn new(backend: B, tokens: T) -> Self {
        Self {
            backend: Arc::new(backend),
            tokens,
            git_url: DEFAULT_GIT_URL.to_string(),
            clock: Arc::new(SystemClock),
            observer: Arc::new(TracingObserver),
            cancel: CancellationToken::new(),
        }
    }

    /// Base URL remotes are built from, e.g. `https://ghe.example.com`
    pub fn with_git_url(mut self, git_url: impl Into<String>) -> Self {
        self.git_url = git_url.into();
        self
    }

    /// Time source for commit signatures
    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Receiver for checkpoint events
    pub fn with_observer(mut self, observer: Arc<dyn SyncObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Token aborting every operation of this pipeline once cancelled
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn tokens(&self) -> &T {
        &self.tokens
    }

    /// Issue a fresh token for one network operation
    async fn credentials(&self, auth: &T::Config, operation: &'static str) -> Result<Credentials> {
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled { operation });
        }
        let issued = tokio::select! {
            issued = self.tokens.issue(auth) => issued.map_err(|source| Error::Auth { operation, source })?,
            _ = self.cancel.cancelled() => return Err(Error::Cancelled { operation }),
        };
        Ok(Credentials::app_token(issued.token))
    }

    async fn join<R>(&self, operation: &'static str, task: JoinHandle<R>) -> Result<R> {
        tokio::select! {
            joined = task => joined.map_err(|e| Error::Other(format!("{} task failed: {}", operation, e))),
            _ = self.cancel.cancelled() => Err(Error::Cancelled { operation }),
        }
    }

    /// Run a backend call against the handle's repository on the blocking pool
    async fn with_repo<R, F>(
        &self,
        handle: &mut WorkingTreeHandle<B::Repository>,
        operation: &'static str,
        f: F,
    ) -> Result<std::result::Result<R, BackendError>>
    where
        R: Send + 'static,
        F: FnOnce(&B, &mut B::Repository, &CancellationToken) -> std::result::Result<R, BackendError>
            + Send
            + 'static,
    {
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled { operation });
        }
        let mut repo = handle.repo.take().ok_or_else(|| Error::HandleReleased {
            repository: handle.repository_name.clone(),
        })?;

        let backend = Arc::clone(&self.backend);
        let cancel = self.cancel.clone();
        let task = tokio::task::spawn_blocking(move || {
            let result = f(&*backend, &mut repo, &cancel);
            (repo, result)
        });

        let (repo, result) = self.join(operation, task).await?;
        handle.repo = Some(repo);
        Ok(result)
    }

    /// Clone the repository into `local_path`
    ///
    /// Clones `refs/heads/<branch>` when the identity carries a non-blank
    /// `branch` parameter, the remote's default branch otherwise.
    pub async fn clone_repository(
        &self,
        identity: &RepositoryIdentity,
        local_path: &Path,
        auth: &T::Config,
    ) -> Result<WorkingTreeHandle<B::Repository>> {
        let url = identity.remote_url(&self.git_url);
        let reference = identity.clone_reference();
        trace!(
            git_url = %url,
            git_reference = %reference,
            local_path = %local_path.display(),
            "Cloning git repository"
        );

        let credentials = self.credentials(auth, "clone").await?;

        let request = CloneRequest {
            url: url.clone(),
            path: local_path.to_path_buf(),
            reference: reference.clone(),
        };
        let backend = Arc::clone(&self.backend);
        let cancel = self.cancel.clone();
        let task = tokio::task::spawn_blocking(move || {
            backend.clone_repository(&request, &credentials, &cancel)
        });

        let repo = self.join("clone", task).await?.map_err(|source| {
            domain_error("clone", source, |source| Error::Clone {
                url: url.clone(),
                path: local_path.to_path_buf(),
                reference: reference.clone(),
                source,
            })
        })?;

        self.observer.on_event(&SyncEvent::Cloned {
            url,
            reference,
            path: local_path.to_path_buf(),
        });

        let repository_name = local_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(&identity.name)
            .to_string();

        Ok(WorkingTreeHandle {
            repo: Some(repo),
            path: local_path.to_path_buf(),
            repository_name,
            identity: identity.clone(),
        })
    }

    /// Position the working tree on `options.branch_name`
    ///
    /// Without `create_branch` the branch must exist on the remote: its
    /// tracking reference is resolved, the local branch is pinned to that
    /// commit and then checked out. With `create_branch` a new local branch is
    /// created at HEAD and checked out.
    pub async fn switch_branch(
        &self,
        handle: &mut WorkingTreeHandle<B::Repository>,
        options: &BranchOptions,
    ) -> Result<()> {
        const OPERATION: &str = "switch branch";

        let branch = options.branch_name.clone();
        let repository = handle.repository_name.clone();
        let local_ref = refs::branch_ref(&branch);
        let checkout_error = |source: BackendError| Error::Checkout {
            branch: branch.clone(),
            repository: repository.clone(),
            source,
        };

        if !options.create_branch {
            let remote_ref = refs::remote_branch_ref(refs::ORIGIN, &branch);
            let lookup = remote_ref.clone();
            let target = self
                .with_repo(handle, OPERATION, move |backend, repo, _| {
                    backend.resolve_reference(repo, &lookup)
                })
                .await?
                .map_err(|source| {
                    domain_error(OPERATION, source, |source| Error::BranchResolution {
                        branch: branch.clone(),
                        reference: remote_ref.clone(),
                        source,
                    })
                })?;

            let pinned = local_ref.clone();
            self.with_repo(handle, OPERATION, move |backend, repo, _| {
                backend.set_reference(repo, &pinned, &target)
            })
            .await?
            .map_err(|source| domain_error(OPERATION, source, checkout_error))?;
        }

        let create = options.create_branch;
        let target_ref = local_ref.clone();
        self.with_repo(handle, OPERATION, move |backend, repo, _| {
            backend.checkout(repo, &target_ref, create)
        })
        .await?
        .map_err(|source| domain_error(OPERATION, source, checkout_error))?;

        self.observer.on_event(&SyncEvent::BranchSwitched {
            repository,
            branch,
            created: create,
        });
        Ok(())
    }

    /// Commit working tree changes
    ///
    /// Returns [`CommitOutcome::Unchanged`] without touching the repository when
    /// the working tree is clean.
    pub async fn commit_changes(
        &self,
        handle: &mut WorkingTreeHandle<B::Repository>,
        options: &UpdateOptions,
    ) -> Result<CommitOutcome> {
        const OPERATION: &str = "commit";

        let repository = handle.repository_name.clone();

        let status = self
            .with_repo(handle, OPERATION, |backend, repo, _| backend.status(repo))
            .await?
            .map_err(|source| {
                domain_error(OPERATION, source, |source| Error::Status {
                    repository: repository.clone(),
                    source,
                })
            })?;

        if status.is_clean() {
            debug!(repository_name = %repository, "Working tree clean, nothing to commit");
            return Ok(CommitOutcome::Unchanged);
        }
        debug!(repository_name = %repository, status = %status, "Git status");

        for pattern in &options.git.stage_patterns {
            let staged = pattern.clone();
            self.with_repo(handle, OPERATION, move |backend, repo, _| {
                backend.stage(repo, &staged)
            })
            .await?
            .map_err(|source| {
                domain_error(OPERATION, source, |source| Error::Stage {
                    pattern: pattern.clone(),
                    repository: repository.clone(),
                    source,
                })
            })?;
        }

        let now = self.clock.now();
        let git = &options.git;
        let request = CommitRequest {
            message: git.commit_message(),
            author: Signature {
                name: git.author_name.clone(),
                email: git.author_email.clone(),
                when: now,
            },
            committer: Signature {
                name: git.committer_name.clone(),
                email: git.committer_email.clone(),
                when: now,
            },
            all: git.stage_all_changed,
        };

        let commit = self
            .with_repo(handle, OPERATION, move |backend, repo, _| {
                backend.commit(repo, &request)
            })
            .await?
            .map_err(|source| {
                domain_error(OPERATION, source, |source| Error::Commit {
                    repository: repository.clone(),
                    source,
                })
            })?;

        self.observer.on_event(&SyncEvent::Committed {
            repository,
            commit: commit.clone(),
        });
        Ok(CommitOutcome::Committed(commit))
    }

    /// Push the local branch to the identically named remote branch
    pub async fn push_changes(
        &self,
        handle: &mut WorkingTreeHandle<B::Repository>,
        options: &PushOptions<'_, T::Config>,
    ) -> Result<()> {
        const OPERATION: &str = "push";

        let repository = handle.repository_name.clone();
        let branch = options.branch_name.clone();
        let force = options.force_push;
        let refspec = refs::push_refspec(&branch, force);

        let credentials = self.credentials(options.auth, OPERATION).await?;

        trace!(repository_name = %repository, branch = %branch, force, "Pushing git changes");
        self.with_repo(handle, OPERATION, move |backend, repo, cancel| {
            backend.push(repo, &refspec, &credentials, cancel)
        })
        .await?
        .map_err(|source| {
            domain_error(OPERATION, source, |source| Error::Push {
                branch: branch.clone(),
                repository: repository.clone(),
                source,
            })
        })?;

        self.observer.on_event(&SyncEvent::Pushed {
            repository,
            branch,
            force,
        });
        Ok(())
    }

    /// Run the whole pipeline for one repository
    ///
    /// `mutate` receives the working tree root after the branch switch and
    /// before the commit. The push is skipped when nothing was committed. When
    /// `options.branch_name` is empty the identity's `branch` parameter is used.
    pub async fn run<F, Fut>(
        &self,
        identity: &RepositoryIdentity,
        local_path: &Path,
        auth: &T::Config,
        options: &UpdateOptions,
        mutate: F,
    ) -> Result<SyncReport>
    where
        F: FnOnce(PathBuf) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let mut options = options.clone();
        if options.branch_name.trim().is_empty() {
            options.branch_name = identity
                .branch_param()
                .ok_or_else(|| {
                    Error::Config(format!("No branch name configured for {}", identity))
                })?
                .to_string();
        }

        let mut handle = self.clone_repository(identity, local_path, auth).await?;
        self.switch_branch(&mut handle, &options.branch_options()).await?;

        tokio::select! {
            mutated = mutate(handle.path().to_path_buf()) => mutated?,
            _ = self.cancel.cancelled() => return Err(Error::Cancelled { operation: "mutate" }),
        }

        let outcome = self.commit_changes(&mut handle, &options).await?;
        let pushed = outcome.changed();
        if pushed {
            self.push_changes(&mut handle, &options.push_options(auth)).await?;
        }

        info!(
            repository = %identity,
            branch = %options.branch_name,
            changed = outcome.changed(),
            pushed,
            "Repository synchronized"
        );

        Ok(SyncReport {
            repository: identity.full_name(),
            branch: options.branch_name,
            outcome,
            pushed,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::TimeZone;

    use super::*;
    use crate::auth::{AccessToken, BoxError, IssuedToken};
    use crate::clock::FixedClock;
    use crate::git::{CommitId, FileState, StatusEntry, WorktreeStatus};
    use crate::options::GitOptions;

    /// Repository state kept by the fake backend
    #[derive(Debug, Default)]
    struct FakeRepo {
        refs: HashMap<String, CommitId>,
        head: String,
        status: WorktreeStatus,
        clone_token: String,
        checkouts: Vec<(String, bool)>,
        staged: Vec<String>,
        commits: Vec<CommitRequest>,
        pushes: Vec<(String, String)>,
    }

    #[derive(Debug, Default)]
    struct FakeBackend {
        remote_branches: Vec<(&'static str, &'static str)>,
        status: Vec<StatusEntry>,
        reject_push: bool,
        /// Blocks every status call this long
        status_delay: Option<std::time::Duration>,
    }

    impl GitBackend for FakeBackend {
        type Repository = FakeRepo;

        fn clone_repository(
            &self,
            _request: &CloneRequest,
            credentials: &Credentials,
            cancel: &CancellationToken,
        ) -> std::result::Result<FakeRepo, BackendError> {
            if cancel.is_cancelled() {
                return Err(BackendError::Cancelled);
            }
            let mut refs = HashMap::new();
            refs.insert("refs/heads/main".to_string(), CommitId::new("base"));
            for (branch, id) in &self.remote_branches {
                refs.insert(refs::remote_branch_ref("origin", branch), CommitId::new(*id));
            }
            Ok(FakeRepo {
                refs,
                head: "refs/heads/main".to_string(),
                status: WorktreeStatus {
                    entries: self.status.clone(),
                },
                clone_token: credentials.token.expose().to_string(),
                ..Default::default()
            })
        }

        fn resolve_reference(
            &self,
            repo: &FakeRepo,
            reference: &str,
        ) -> std::result::Result<CommitId, BackendError> {
            repo.refs
                .get(reference)
                .cloned()
                .ok_or_else(|| BackendError::ReferenceNotFound(reference.to_string()))
        }

        fn set_reference(
            &self,
            repo: &mut FakeRepo,
            reference: &str,
            target: &CommitId,
        ) -> std::result::Result<(), BackendError> {
            repo.refs.insert(reference.to_string(), target.clone());
            Ok(())
        }

        fn checkout(
            &self,
            repo: &mut FakeRepo,
            reference: &str,
            create: bool,
        ) -> std::result::Result<(), BackendError> {
            if create {
                let head = repo.refs[&repo.head].clone();
                repo.refs.insert(reference.to_string(), head);
            }
            repo.checkouts.push((reference.to_string(), create));
            repo.head = reference.to_string();
            Ok(())
        }

        fn status(&self, repo: &FakeRepo) -> std::result::Result<WorktreeStatus, BackendError> {
            if let Some(delay) = self.status_delay {
                std::thread::sleep(delay);
            }
            Ok(repo.status.clone())
        }

        fn stage(&self, repo: &mut FakeRepo, pattern: &str) -> std::result::Result<(), BackendError> {
            glob::Pattern::new(pattern).map_err(|e| BackendError::InvalidPattern {
                pattern: pattern.to_string(),
                reason: e.msg.to_string(),
            })?;
            repo.staged.push(pattern.to_string());
            Ok(())
        }

        fn commit(
            &self,
            repo: &mut FakeRepo,
            request: &CommitRequest,
        ) -> std::result::Result<CommitId, BackendError> {
            repo.commits.push(request.clone());
            let id = CommitId::new(format!("commit-{}", repo.commits.len()));
            repo.refs.insert(repo.head.clone(), id.clone());
            repo.status = WorktreeStatus::default();
            Ok(id)
        }

        fn push(
            &self,
            repo: &mut FakeRepo,
            refspec: &str,
            credentials: &Credentials,
            _cancel: &CancellationToken,
        ) -> std::result::Result<(), BackendError> {
            if self.reject_push {
                return Err(BackendError::Rejected {
                    reference: refspec.to_string(),
                    message: "non-fast-forward".to_string(),
                });
            }
            repo.pushes
                .push((refspec.to_string(), credentials.token.expose().to_string()));
            Ok(())
        }
    }

    /// Issues `token-1`, `token-2`, ... and fails on the configured call
    #[derive(Debug, Default)]
    struct ScriptedTokens {
        calls: AtomicUsize,
        fail_on: Option<usize>,
    }

    #[async_trait]
    impl TokenProvider for ScriptedTokens {
        type Config = ();
        type Client = ();

        async fn issue(&self, _config: &()) -> std::result::Result<IssuedToken<()>, BoxError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if self.fail_on == Some(call) {
                return Err("installation token request failed".into());
            }
            Ok(IssuedToken {
                client: (),
                token: AccessToken::new(format!("token-{}", call)),
            })
        }
    }

    #[derive(Debug, Default)]
    struct RecordingObserver(Mutex<Vec<SyncEvent>>);

    impl SyncObserver for RecordingObserver {
        fn on_event(&self, event: &SyncEvent) {
            self.0.lock().unwrap().push(event.clone());
        }
    }

    fn dirty() -> Vec<StatusEntry> {
        vec![StatusEntry {
            path: "README.md".to_string(),
            state: FileState::Modified,
        }]
    }

    fn update_options(branch: &str) -> UpdateOptions {
        UpdateOptions {
            git: GitOptions {
                commit_title: "Update".to_string(),
                author_name: "Author".to_string(),
                author_email: "author@example.com".to_string(),
                committer_name: "Committer".to_string(),
                committer_email: "committer@example.com".to_string(),
                ..Default::default()
            },
            branch_name: branch.to_string(),
            ..Default::default()
        }
    }

    fn pipeline(backend: FakeBackend, tokens: ScriptedTokens) -> Pipeline<FakeBackend, ScriptedTokens> {
        Pipeline::new(backend, tokens)
    }

    async fn cloned(
        pipeline: &Pipeline<FakeBackend, ScriptedTokens>,
    ) -> WorkingTreeHandle<FakeRepo> {
        let identity = RepositoryIdentity::new("acme", "widgets");
        pipeline
            .clone_repository(&identity, Path::new("/work/widgets"), &())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_clean_tree_commits_nothing() {
        let pipeline = pipeline(FakeBackend::default(), ScriptedTokens::default());
        let mut handle = cloned(&pipeline).await;

        let outcome = pipeline
            .commit_changes(&mut handle, &update_options("main"))
            .await
            .unwrap();

        assert_eq!(outcome, CommitOutcome::Unchanged);
        let repo = handle.repository().unwrap();
        assert!(repo.commits.is_empty());
        assert!(repo.staged.is_empty());
    }

    #[tokio::test]
    async fn test_missing_remote_branch_fails_without_checkout() {
        let pipeline = pipeline(FakeBackend::default(), ScriptedTokens::default());
        let mut handle = cloned(&pipeline).await;

        let err = pipeline
            .switch_branch(
                &mut handle,
                &BranchOptions {
                    branch_name: "missing".to_string(),
                    create_branch: false,
                },
            )
            .await
            .unwrap_err();

        match err {
            Error::BranchResolution { branch, reference, .. } => {
                assert_eq!(branch, "missing");
                assert_eq!(reference, "refs/remotes/origin/missing");
            }
            other => panic!("unexpected error: {other}"),
        }
        let repo = handle.repository().unwrap();
        assert!(repo.checkouts.is_empty());
        assert!(!repo.refs.contains_key("refs/heads/missing"));
    }

    #[tokio::test]
    async fn test_existing_branch_is_pinned_to_remote_tip() {
        let backend = FakeBackend {
            remote_branches: vec![("feature", "remote-tip")],
            ..Default::default()
        };
        let pipeline = pipeline(backend, ScriptedTokens::default());
        let mut handle = cloned(&pipeline).await;

        pipeline
            .switch_branch(
                &mut handle,
                &BranchOptions {
                    branch_name: "feature".to_string(),
                    create_branch: false,
                },
            )
            .await
            .unwrap();

        let repo = handle.repository().unwrap();
        assert_eq!(repo.refs["refs/heads/feature"], CommitId::new("remote-tip"));
        assert_eq!(repo.checkouts, vec![("refs/heads/feature".to_string(), false)]);
        assert_eq!(repo.head, "refs/heads/feature");
    }

    #[tokio::test]
    async fn test_created_branch_starts_at_head() {
        let pipeline = pipeline(FakeBackend::default(), ScriptedTokens::default());
        let mut handle = cloned(&pipeline).await;

        pipeline
            .switch_branch(
                &mut handle,
                &BranchOptions {
                    branch_name: "update".to_string(),
                    create_branch: true,
                },
            )
            .await
            .unwrap();

        let repo = handle.repository().unwrap();
        assert_eq!(repo.refs["refs/heads/update"], CommitId::new("base"));
        assert_eq!(repo.checkouts, vec![("refs/heads/update".to_string(), true)]);
    }

    #[tokio::test]
    async fn test_commit_uses_clock_and_both_identities() {
        let when = chrono::Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let backend = FakeBackend {
            status: dirty(),
            ..Default::default()
        };
        let pipeline = pipeline(backend, ScriptedTokens::default()).with_clock(FixedClock(when));
        let mut handle = cloned(&pipeline).await;

        let mut options = update_options("main");
        options.git.stage_patterns = vec!["*.md".to_string(), "docs/*".to_string()];
        options.git.commit_body = "Body".to_string();
        options.git.commit_footer = "Footer".to_string();
        options.git.stage_all_changed = true;

        let outcome = pipeline.commit_changes(&mut handle, &options).await.unwrap();
        assert_eq!(outcome, CommitOutcome::Committed(CommitId::new("commit-1")));

        let repo = handle.repository().unwrap();
        assert_eq!(repo.staged, vec!["*.md", "docs/*"]);
        let commit = &repo.commits[0];
        assert_eq!(commit.message, "Update\n\nBody\n\n-- \nFooter");
        assert_eq!(commit.author.name, "Author");
        assert_eq!(commit.committer.name, "Committer");
        assert_eq!(commit.author.when, when);
        assert_eq!(commit.committer.when, when);
        assert!(commit.all);
    }

    #[tokio::test]
    async fn test_malformed_pattern_names_the_pattern() {
        let backend = FakeBackend {
            status: dirty(),
            ..Default::default()
        };
        let pipeline = pipeline(backend, ScriptedTokens::default());
        let mut handle = cloned(&pipeline).await;

        let mut options = update_options("main");
        options.git.stage_patterns = vec!["*.md".to_string(), "[oops".to_string()];

        let err = pipeline.commit_changes(&mut handle, &options).await.unwrap_err();
        match &err {
            Error::Stage { pattern, .. } => assert_eq!(pattern, "[oops"),
            other => panic!("unexpected error: {other}"),
        }
        assert!(err.to_string().contains("[oops"));
        assert!(handle.repository().unwrap().commits.is_empty());
    }

    #[tokio::test]
    async fn test_force_push_refspec() {
        let backend = FakeBackend {
            status: dirty(),
            ..Default::default()
        };
        let pipeline = pipeline(backend, ScriptedTokens::default());
        let mut handle = cloned(&pipeline).await;

        let mut options = update_options("update");
        pipeline
            .push_changes(&mut handle, &options.push_options(&()))
            .await
            .unwrap();
        options.force_push = true;
        pipeline
            .push_changes(&mut handle, &options.push_options(&()))
            .await
            .unwrap();

        let pushes = &handle.repository().unwrap().pushes;
        assert_eq!(pushes[0].0, "refs/heads/update:refs/heads/update");
        assert_eq!(pushes[1].0, "+refs/heads/update:refs/heads/update");
    }

    #[tokio::test]
    async fn test_each_network_operation_fetches_a_token() {
        let backend = FakeBackend {
            status: dirty(),
            ..Default::default()
        };
        let pipeline = pipeline(backend, ScriptedTokens::default());
        let mut handle = cloned(&pipeline).await;
        let options = update_options("main");

        pipeline.commit_changes(&mut handle, &options).await.unwrap();
        pipeline
            .push_changes(&mut handle, &options.push_options(&()))
            .await
            .unwrap();

        let repo = handle.repository().unwrap();
        assert_eq!(repo.clone_token, "token-1");
        assert_eq!(repo.pushes[0].1, "token-2");
        assert_eq!(pipeline.tokens().calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_second_token_failure_fails_push_only() {
        let backend = FakeBackend {
            status: dirty(),
            ..Default::default()
        };
        let tokens = ScriptedTokens {
            fail_on: Some(2),
            ..Default::default()
        };
        let pipeline = pipeline(backend, tokens);
        let mut handle = cloned(&pipeline).await;
        let options = update_options("main");

        let outcome = pipeline.commit_changes(&mut handle, &options).await.unwrap();
        let err = pipeline
            .push_changes(&mut handle, &options.push_options(&()))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Auth { operation: "push", .. }));
        let repo = handle.repository().unwrap();
        assert_eq!(repo.commits.len(), 1);
        assert_eq!(repo.refs["refs/heads/main"], *outcome.commit_id().unwrap());
        assert!(repo.pushes.is_empty());
    }

    #[tokio::test]
    async fn test_push_rejection_is_wrapped() {
        let backend = FakeBackend {
            reject_push: true,
            ..Default::default()
        };
        let pipeline = pipeline(backend, ScriptedTokens::default());
        let mut handle = cloned(&pipeline).await;

        let err = pipeline
            .push_changes(&mut handle, &update_options("main").push_options(&()))
            .await
            .unwrap_err();

        match err {
            Error::Push { branch, repository, source } => {
                assert_eq!(branch, "main");
                assert_eq!(repository, "widgets");
                assert!(matches!(source, BackendError::Rejected { .. }));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_cancelled_pipeline_does_not_clone() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let pipeline = pipeline(FakeBackend::default(), ScriptedTokens::default())
            .with_cancellation(cancel);

        let err = pipeline
            .clone_repository(&RepositoryIdentity::new("acme", "widgets"), Path::new("/w"), &())
            .await
            .unwrap_err();

        assert!(err.is_cancelled());
        assert_eq!(pipeline.tokens().calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cancel_during_status_releases_handle() {
        let backend = FakeBackend {
            status: dirty(),
            status_delay: Some(std::time::Duration::from_millis(800)),
            ..Default::default()
        };
        let pipeline = pipeline(backend, ScriptedTokens::default());
        let mut handle = cloned(&pipeline).await;
        let options = update_options("main");

        let cancel = pipeline.cancellation().clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            cancel.cancel();
        });

        let started = std::time::Instant::now();
        let err = pipeline.commit_changes(&mut handle, &options).await.unwrap_err();

        assert!(matches!(err, Error::Cancelled { operation: "commit" }), "unexpected error: {err}");
        assert!(started.elapsed() < std::time::Duration::from_millis(500));
        assert!(handle.is_released());
        assert!(handle.repository().is_none());

        let err = pipeline
            .push_changes(&mut handle, &options.push_options(&()))
            .await
            .unwrap_err();
        assert!(err.is_cancelled());

        let fresh = Pipeline::new(FakeBackend::default(), ScriptedTokens::default());
        let err = fresh.commit_changes(&mut handle, &options).await.unwrap_err();
        match err {
            Error::HandleReleased { repository } => assert_eq!(repository, "widgets"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_run_reports_checkpoints_in_order() {
        let backend = FakeBackend {
            status: dirty(),
            ..Default::default()
        };
        let observer = Arc::new(RecordingObserver::default());
        let pipeline = pipeline(backend, ScriptedTokens::default()).with_observer(observer.clone());
        let identity = RepositoryIdentity::new("acme", "widgets").with_param("branch", "main");

        let mut options = update_options("update");
        options.create_branch = true;

        let report = pipeline
            .run(&identity, Path::new("/work/widgets"), &(), &options, |_| async { Ok(()) })
            .await
            .unwrap();

        assert_eq!(report.repository, "acme/widgets");
        assert_eq!(report.branch, "update");
        assert!(report.pushed);

        let events = observer.0.lock().unwrap();
        assert!(matches!(events[0], SyncEvent::Cloned { .. }));
        assert!(matches!(events[1], SyncEvent::BranchSwitched { created: true, .. }));
        assert!(matches!(events[2], SyncEvent::Committed { .. }));
        assert!(matches!(events[3], SyncEvent::Pushed { force: false, .. }));
        assert_eq!(events.len(), 4);
    }

    #[tokio::test]
    async fn test_run_skips_push_when_unchanged() {
        let observer = Arc::new(RecordingObserver::default());
        let pipeline = pipeline(FakeBackend::default(), ScriptedTokens::default())
            .with_observer(observer.clone());
        let identity = RepositoryIdentity::new("acme", "widgets");
        let mut options = update_options("update");
        options.create_branch = true;

        let report = pipeline
            .run(&identity, Path::new("/work/widgets"), &(), &options, |_| async { Ok(()) })
            .await
            .unwrap();

        assert_eq!(report.outcome, CommitOutcome::Unchanged);
        assert!(!report.pushed);
        assert_eq!(pipeline.tokens().calls.load(Ordering::SeqCst), 1);
        assert_eq!(observer.0.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_run_defaults_branch_to_identity_param() {
        let backend = FakeBackend {
            remote_branches: vec![("release", "release-tip")],
            ..Default::default()
        };
        let pipeline = pipeline(backend, ScriptedTokens::default());
        let identity = RepositoryIdentity::new("acme", "widgets").with_param("branch", "release");

        let report = pipeline
            .run(&identity, Path::new("/work/widgets"), &(), &update_options(""), |_| async {
                Ok(())
            })
            .await
            .unwrap();

        assert_eq!(report.branch, "release");
    }

    #[tokio::test]
    async fn test_run_without_any_branch_is_a_config_error() {
        let pipeline = pipeline(FakeBackend::default(), ScriptedTokens::default());
        let identity = RepositoryIdentity::new("acme", "widgets");

        let err = pipeline
            .run(&identity, Path::new("/work/widgets"), &(), &update_options(""), |_| async {
                Ok(())
            })
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Config(_)));
        assert_eq!(pipeline.tokens().calls.load(Ordering::SeqCst), 0);
    }
}
