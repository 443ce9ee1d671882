//! Configuration management for gitsync
//!
//! Configuration is loaded with the following priority (highest to lowest):
//! 1. CLI flags
//! 2. Environment variables (GITSYNC_*)
//! 3. Config file (~/.config/gitsync/config.toml)
//! 4. Default values

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::options::GitOptions;
use crate::repository::DEFAULT_GIT_URL;
use crate::{Error, Result};

/// Default GitHub REST API base
pub const DEFAULT_API_URL: &str = "https://api.github.com";

/// GitHub host and app settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GitHubConfig {
    /// Base URL remotes are cloned from and pushed to
    pub git_url: String,

    /// REST API base URL
    pub api_url: String,

    /// GitHub App id
    pub app_id: Option<u64>,

    /// Installation the app tokens are scoped to
    pub installation_id: Option<u64>,

    /// PEM private key of the app (overrides the key in the secrets file)
    pub private_key_path: Option<PathBuf>,
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            git_url: DEFAULT_GIT_URL.to_string(),
            api_url: DEFAULT_API_URL.to_string(),
            app_id: None,
            installation_id: None,
            private_key_path: None,
        }
    }
}

/// Default commit identities
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct GitIdentityConfig {
    pub author_name: Option<String>,
    pub author_email: Option<String>,
    pub committer_name: Option<String>,
    pub committer_email: Option<String>,
}

impl GitIdentityConfig {
    /// Fill identity fields left empty in `git`
    ///
    /// A missing committer falls back to the author.
    pub fn apply_to(&self, git: &mut GitOptions) {
        fn fill(field: &mut String, default: Option<&String>) {
            if field.is_empty() {
                if let Some(value) = default {
                    field.clone_from(value);
                }
            }
        }

        fill(&mut git.author_name, self.author_name.as_ref());
        fill(&mut git.author_email, self.author_email.as_ref());
        fill(&mut git.committer_name, self.committer_name.as_ref());
        fill(&mut git.committer_email, self.committer_email.as_ref());

        if git.committer_name.is_empty() {
            git.committer_name.clone_from(&git.author_name);
        }
        if git.committer_email.is_empty() {
            git.committer_email.clone_from(&git.author_email);
        }
    }
}

/// Run settings
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Directory clones are created under
    pub workdir: Option<PathBuf>,

    /// Cancel a run that takes longer than this
    #[serde(with = "humantime_serde")]
    pub timeout: Option<Duration>,
}

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// GitHub configuration
    pub github: GitHubConfig,

    /// Commit identity defaults
    pub git: GitIdentityConfig,

    /// Run configuration
    pub sync: SyncConfig,
}

impl Config {
    /// Load configuration from the default config file location
    ///
    /// Returns default config if file doesn't exist
    pub fn load() -> Result<Self> {
        let config_path = Self::default_config_path();

        if let Some(path) = config_path {
            if path.exists() {
                return Self::load_from_file(&path);
            }
        }

        Ok(Self::default())
    }

    /// Load configuration from a specific file
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(Error::Io)?;
        toml::from_str(&contents)
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))
    }

    /// Get the default config file path
    ///
    /// Returns `~/.config/gitsync/config.toml` on Unix
    pub fn default_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("gitsync").join("config.toml"))
    }

    /// Default parent directory for clones
    ///
    /// Returns `~/.cache/gitsync/repos`
    pub fn default_workdir() -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| Error::Config("Could not determine cache directory".to_string()))?;

        Ok(cache_dir.join("gitsync").join("repos"))
    }

    /// Directory clones are created under
    pub fn workdir(&self) -> Result<PathBuf> {
        match &self.sync.workdir {
            Some(dir) => Ok(dir.clone()),
            None => Self::default_workdir(),
        }
    }

    /// Apply environment variable overrides
    ///
    /// Supported variables:
    /// - GITSYNC_GIT_URL, GITSYNC_API_URL
    /// - GITSYNC_APP_ID, GITSYNC_INSTALLATION_ID, GITSYNC_PRIVATE_KEY_PATH
    /// - GITSYNC_WORKDIR
    pub fn with_env_overrides(self) -> Result<Self> {
        self.with_overrides_from(|name| std::env::var(name).ok())
    }

    fn with_overrides_from(mut self, var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        fn parse_id(name: &str, value: String) -> Result<u64> {
            value
                .trim()
                .parse()
                .map_err(|e| Error::Config(format!("Invalid {}: {}", name, e)))
        }

        if let Some(url) = var("GITSYNC_GIT_URL") {
            self.github.git_url = url;
        }
        if let Some(url) = var("GITSYNC_API_URL") {
            self.github.api_url = url;
        }
        if let Some(id) = var("GITSYNC_APP_ID") {
            self.github.app_id = Some(parse_id("GITSYNC_APP_ID", id)?);
        }
        if let Some(id) = var("GITSYNC_INSTALLATION_ID") {
            self.github.installation_id = Some(parse_id("GITSYNC_INSTALLATION_ID", id)?);
        }
        if let Some(path) = var("GITSYNC_PRIVATE_KEY_PATH") {
            self.github.private_key_path = Some(PathBuf::from(path));
        }
        if let Some(dir) = var("GITSYNC_WORKDIR") {
            self.sync.workdir = Some(PathBuf::from(dir));
        }

        Ok(self)
    }

    /// Apply CLI flag overrides
    pub fn with_cli_overrides(mut self, git_url: Option<String>, workdir: Option<PathBuf>) -> Self {
        if let Some(url) = git_url {
            self.github.git_url = url;
        }

        if let Some(dir) = workdir {
            self.sync.workdir = Some(dir);
        }

        self
    }

    /// Load configuration with all overrides applied
    ///
    /// Priority: CLI > env > config file > defaults
    pub fn load_with_overrides(
        config_path: Option<&Path>,
        git_url: Option<String>,
        workdir: Option<PathBuf>,
    ) -> Result<Self> {
        let config = match config_path {
            Some(path) => Self::load_from_file(path)?,
            None => Self::load()?,
        };
        Ok(config
            .with_env_overrides()?
            .with_cli_overrides(git_url, workdir))
    }
}
