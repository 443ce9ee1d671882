//! Sync command - clone, mutate, commit and push one repository

use std::path::{Component, Path, PathBuf};

use anyhow::Context;
use clap::Args;
use gitsync_core::{
    Config, Git2Backend, GitOptions, Pipeline, RepositoryIdentity, Secrets, SyncReport,
    TokenProvider, UpdateOptions,
};
use gitsync_github::{AppAuthConfig, AppTokenProvider, StaticTokenProvider, TokenAuthConfig};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const DEFAULT_TITLE: &str = "Update from gitsync";

/// Arguments for the sync command
#[derive(Args, Debug)]
pub struct SyncArgs {
    /// Repository to synchronize (owner/repo, https or ssh URL)
    pub repository: String,

    /// Repository parameter, e.g. `branch=release` (repeatable)
    #[arg(long = "param", value_name = "KEY=VALUE", value_parser = parse_param)]
    pub params: Vec<(String, String)>,

    /// Branch to commit on (defaults to the `branch` parameter)
    #[arg(short, long)]
    pub branch: Option<String>,

    /// Create the branch at the cloned HEAD instead of using the remote branch
    #[arg(long)]
    pub create_branch: bool,

    /// Overwrite the remote branch
    #[arg(long)]
    pub force_push: bool,

    /// Glob pattern of paths to stage (repeatable)
    #[arg(long = "stage", value_name = "PATTERN")]
    pub stage_patterns: Vec<String>,

    /// Also commit every modification to tracked files
    #[arg(long)]
    pub stage_all: bool,

    /// Commit title
    #[arg(long, default_value = DEFAULT_TITLE)]
    pub title: String,

    /// Commit body
    #[arg(long)]
    pub body: Option<String>,

    /// Commit footer
    #[arg(long)]
    pub footer: Option<String>,

    #[arg(long)]
    pub author_name: Option<String>,

    #[arg(long)]
    pub author_email: Option<String>,

    #[arg(long)]
    pub committer_name: Option<String>,

    #[arg(long)]
    pub committer_email: Option<String>,

    /// Directory clones are created under (overrides config and env)
    #[arg(long)]
    pub workdir: Option<PathBuf>,

    /// Shell command run inside the working tree before committing
    #[arg(long, value_name = "CMD")]
    pub exec: Option<String>,

    /// Authenticate with a personal token instead of the GitHub App
    #[arg(long)]
    pub token_auth: bool,

    /// Print the report as JSON
    #[arg(long)]
    pub json: bool,
}

fn parse_param(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("invalid parameter `{}`: expected KEY=VALUE", s))?;
    if key.trim().is_empty() {
        return Err(format!("invalid parameter `{}`: empty key", s));
    }
    Ok((key.trim().to_string(), value.to_string()))
}

impl SyncArgs {
    /// Execute the sync command
    pub async fn execute(
        &self,
        verbose: bool,
        config_path: Option<&Path>,
        git_url: Option<String>,
    ) -> anyhow::Result<()> {
        let config = Config::load_with_overrides(config_path, git_url, self.workdir.clone())?;
        let identity = self.identity()?;
        let options = self.update_options(&config);

        let local_path = prepare_clone_dir(&config.workdir()?, &identity)?;

        if verbose {
            info!(
                repository = %identity,
                git_url = %config.github.git_url,
                local_path = %local_path.display(),
                branch = %options.branch_name,
                "Starting sync"
            );
        }

        let cancel = CancellationToken::new();
        let watchers = spawn_cancellation(&cancel, config.sync.timeout);

        let secrets = Secrets::load()?;
        let result = if self.token_auth {
            let auth = TokenAuthConfig::from_config(&config, &secrets)?;
            self.sync_with(StaticTokenProvider::new(), &auth, &config, cancel, &identity, &local_path, &options)
                .await
        } else {
            let auth = AppAuthConfig::from_config(&config, &secrets)?;
            self.sync_with(AppTokenProvider::new(), &auth, &config, cancel, &identity, &local_path, &options)
                .await
        };

        for watcher in watchers {
            watcher.abort();
        }

        let report = result?;
        self.print_report(&report, &local_path)
    }

    #[allow(clippy::too_many_arguments)]
    async fn sync_with<T: TokenProvider>(
        &self,
        tokens: T,
        auth: &T::Config,
        config: &Config,
        cancel: CancellationToken,
        identity: &RepositoryIdentity,
        local_path: &Path,
        options: &UpdateOptions,
    ) -> anyhow::Result<SyncReport> {
        let pipeline = Pipeline::new(Git2Backend::new(), tokens)
            .with_git_url(config.github.git_url.clone())
            .with_cancellation(cancel);

        let exec = self.exec.clone();
        let report = pipeline
            .run(identity, local_path, auth, options, |root| run_exec(exec, root))
            .await
            .with_context(|| format!("Failed to synchronize {}", identity))?;

        Ok(report)
    }

    fn identity(&self) -> anyhow::Result<RepositoryIdentity> {
        let identity = RepositoryIdentity::parse(&self.repository)?;
        Ok(self
            .params
            .iter()
            .fold(identity, |identity, (key, value)| identity.with_param(key, value)))
    }

    fn update_options(&self, config: &Config) -> UpdateOptions {
        let mut git = GitOptions {
            stage_patterns: self.stage_patterns.clone(),
            stage_all_changed: self.stage_all,
            commit_title: self.title.clone(),
            commit_body: self.body.clone().unwrap_or_default(),
            commit_footer: self.footer.clone().unwrap_or_default(),
            author_name: self.author_name.clone().unwrap_or_default(),
            author_email: self.author_email.clone().unwrap_or_default(),
            committer_name: self.committer_name.clone().unwrap_or_default(),
            committer_email: self.committer_email.clone().unwrap_or_default(),
        };
        config.git.apply_to(&mut git);

        UpdateOptions {
            git,
            branch_name: self.branch.clone().unwrap_or_default(),
            create_branch: self.create_branch,
            force_push: self.force_push,
        }
    }

    fn print_report(&self, report: &SyncReport, local_path: &Path) -> anyhow::Result<()> {
        if self.json {
            println!("{}", serde_json::to_string_pretty(report)?);
            return Ok(());
        }

        println!("Repository: {}", report.repository);
        println!("Branch:     {}", report.branch);
        println!("Work tree:  {}", local_path.display());
        match report.outcome.commit_id() {
            Some(commit) if report.pushed => println!("Committed and pushed {}", commit),
            Some(commit) => println!("Committed {}", commit),
            None => println!("No changes"),
        }
        Ok(())
    }
}

/// Clone directory `<workdir>/<owner>/<name>`, emptied of a previous run's clone
///
/// Refuses any owner or name that would place the directory outside `workdir`.
fn prepare_clone_dir(workdir: &Path, identity: &RepositoryIdentity) -> anyhow::Result<PathBuf> {
    for segment in [&identity.owner, &identity.name] {
        let mut components = Path::new(segment).components();
        let single_dir = matches!(
            (components.next(), components.next()),
            (Some(Component::Normal(_)), None)
        );
        if !single_dir {
            anyhow::bail!(
                "Refusing to use `{}` from {} as a directory under {}",
                segment,
                identity,
                workdir.display()
            );
        }
    }

    let path = workdir.join(&identity.owner).join(&identity.name);
    if !path.starts_with(workdir) || path == workdir {
        anyhow::bail!(
            "Clone directory {} is outside {}",
            path.display(),
            workdir.display()
        );
    }

    if path.exists() {
        warn!(path = %path.display(), "Removing previous clone");
        std::fs::remove_dir_all(&path)
            .with_context(|| format!("Failed to remove {}", path.display()))?;
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    Ok(path)
}

/// Cancel on Ctrl-C and, when configured, after `timeout`
fn spawn_cancellation(
    cancel: &CancellationToken,
    timeout: Option<std::time::Duration>,
) -> Vec<tokio::task::JoinHandle<()>> {
    let mut watchers = Vec::new();

    let on_signal = cancel.clone();
    watchers.push(tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling sync");
            on_signal.cancel();
        }
    }));

    if let Some(timeout) = timeout {
        let on_timeout = cancel.clone();
        watchers.push(tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            warn!(timeout = ?timeout, "Sync timed out, cancelling");
            on_timeout.cancel();
        }));
    }

    watchers
}

/// Run the `--exec` command in the working tree
async fn run_exec(command: Option<String>, root: PathBuf) -> gitsync_core::Result<()> {
    let Some(command) = command else {
        return Ok(());
    };

    info!(command = %command, dir = %root.display(), "Running command in working tree");
    let status = tokio::process::Command::new("sh")
        .arg("-c")
        .arg(&command)
        .current_dir(&root)
        .kill_on_drop(true)
        .status()
        .await?;

    if !status.success() {
        return Err(gitsync_core::Error::Other(format!(
            "Command `{}` failed with {}",
            command, status
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser, Debug)]
    struct TestCli {
        #[command(flatten)]
        sync: SyncArgs,
    }

    fn parse(args: &[&str]) -> SyncArgs {
        let mut argv = vec!["gitsync"];
        argv.extend_from_slice(args);
        TestCli::try_parse_from(argv).unwrap().sync
    }

    #[test]
    fn test_parse_param() {
        assert_eq!(
            parse_param("branch=release").unwrap(),
            ("branch".to_string(), "release".to_string())
        );
        assert_eq!(parse_param("note=a=b").unwrap().1, "a=b");
        assert!(parse_param("branch").is_err());
        assert!(parse_param("=value").is_err());
    }

    #[test]
    fn test_identity_carries_params() {
        let args = parse(&["acme/widgets", "--param", "branch=release"]);
        let identity = args.identity().unwrap();
        assert_eq!(identity.full_name(), "acme/widgets");
        assert_eq!(identity.branch_param(), Some("release"));
    }

    #[test]
    fn test_update_options_from_flags_and_config() {
        let args = parse(&[
            "acme/widgets",
            "--branch",
            "update",
            "--create-branch",
            "--stage",
            "*.md",
            "--stage",
            "docs",
            "--stage-all",
            "--author-name",
            "Bot",
            "--body",
            "Body",
        ]);
        let mut config = Config::default();
        config.git.author_email = Some("bot@example.com".to_string());

        let options = args.update_options(&config);

        assert_eq!(options.branch_name, "update");
        assert!(options.create_branch);
        assert!(!options.force_push);
        assert_eq!(options.git.stage_patterns, vec!["*.md", "docs"]);
        assert!(options.git.stage_all_changed);
        assert_eq!(options.git.commit_message(), "Update from gitsync\n\nBody");
        assert_eq!(options.git.author_name, "Bot");
        assert_eq!(options.git.author_email, "bot@example.com");
        assert_eq!(options.git.committer_name, "Bot");
        assert_eq!(options.git.committer_email, "bot@example.com");
    }

    #[test]
    fn test_prepare_clone_dir_removes_previous_clone() {
        let dir = tempfile::tempdir().unwrap();
        let workdir = dir.path().join("work");
        let clone = workdir.join("acme").join("widgets");
        std::fs::create_dir_all(&clone).unwrap();
        std::fs::write(clone.join("stale.txt"), "old").unwrap();

        let path = prepare_clone_dir(&workdir, &RepositoryIdentity::new("acme", "widgets")).unwrap();

        assert_eq!(path, clone);
        assert!(!clone.exists());
        assert!(clone.parent().unwrap().exists());
    }

    #[test]
    fn test_prepare_clone_dir_stays_inside_workdir() {
        let dir = tempfile::tempdir().unwrap();
        let workdir = dir.path().join("work");
        std::fs::create_dir_all(&workdir).unwrap();
        let precious = dir.path().join("precious");
        std::fs::create_dir_all(&precious).unwrap();
        std::fs::write(precious.join("data.txt"), "keep").unwrap();

        for (owner, name) in [
            ("..", "precious"),
            ("acme", ".."),
            (".", "."),
            ("acme", "../../precious"),
            ("/tmp", "precious"),
            ("", "widgets"),
        ] {
            let identity = RepositoryIdentity::new(owner, name);
            assert!(
                prepare_clone_dir(&workdir, &identity).is_err(),
                "accepted {owner}/{name}"
            );
        }

        assert!(precious.join("data.txt").exists());
        assert!(workdir.exists());
    }

    #[test]
    fn test_parent_directory_repository_is_rejected_before_cleanup() {
        let args = parse(&["../precious"]);
        assert!(args.identity().is_err());
    }

    #[tokio::test]
    async fn test_run_exec_in_working_tree() {
        let dir = tempfile::tempdir().unwrap();

        run_exec(Some("echo generated > out.txt".to_string()), dir.path().to_path_buf())
            .await
            .unwrap();
        assert_eq!(
            std::fs::read_to_string(dir.path().join("out.txt")).unwrap(),
            "generated\n"
        );

        run_exec(None, dir.path().to_path_buf()).await.unwrap();

        let err = run_exec(Some("exit 3".to_string()), dir.path().to_path_buf())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("exit 3"));
    }
}
