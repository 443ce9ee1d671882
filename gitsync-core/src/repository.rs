//! Remote repository identity

use std::collections::BTreeMap;

use crate::refs;
use crate::{Error, Result};

/// Parameter key selecting the branch to clone
pub const BRANCH_PARAM: &str = "branch";

/// Default base URL for clone and push
pub const DEFAULT_GIT_URL: &str = "https://github.com";

/// Owner/name of a remote repository plus free-form parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryIdentity {
    /// Repository owner/organization
    pub owner: String,
    /// Repository name
    pub name: String,
    /// Free-form parameters (recognized key: `branch`)
    pub params: BTreeMap<String, String>,
}

impl RepositoryIdentity {
    /// Create an identity with no parameters
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
            params: BTreeMap::new(),
        }
    }

    /// Add a parameter
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// Parse a repository URL or shorthand
    ///
    /// Supports:
    /// - `owner/repo`
    /// - `https://host/owner/repo` and `https://host/owner/repo.git`
    /// - `git@host:owner/repo.git`
    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();

        if !input.contains("://") && !input.contains('@') {
            let parts: Vec<&str> = input.split('/').collect();
            if let [owner, repo] = parts.as_slice() {
                return Self::from_parts(owner, repo, input);
            }
        }

        if let Some(rest) = input.strip_prefix("git@") {
            if let Some((_host, path)) = rest.split_once(':') {
                let parts: Vec<&str> = path.trim_end_matches(".git").split('/').collect();
                if parts.len() == 2 {
                    return Self::from_parts(parts[0], parts[1], input);
                }
            }
        }

        if input.starts_with("https://") || input.starts_with("http://") {
            if let Ok(url) = url::Url::parse(input) {
                let path = url.path().trim_start_matches('/').trim_end_matches('/');
                let parts: Vec<&str> = path.trim_end_matches(".git").split('/').collect();
                if parts.len() == 2 {
                    return Self::from_parts(parts[0], parts[1], input);
                }
            }
        }

        Err(Error::Config(format!(
            "Invalid repository: {}. Expected format: owner/repo, https://github.com/owner/repo, or git@github.com:owner/repo.git",
            input
        )))
    }

    fn from_parts(owner: &str, repo: &str, input: &str) -> Result<Self> {
        let repo = repo.trim_end_matches(".git");
        if !is_valid_segment(owner) || !is_valid_segment(repo) {
            return Err(Error::Config(format!("Invalid repository: {}", input)));
        }
        Ok(Self::new(owner, repo))
    }

    /// `owner/name`
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }

    /// The requested branch, if the `branch` parameter is set and not blank
    pub fn branch_param(&self) -> Option<&str> {
        self.params
            .get(BRANCH_PARAM)
            .map(|b| b.trim())
            .filter(|b| !b.is_empty())
    }

    /// Reference to clone: the requested branch or the remote's default
    pub fn clone_reference(&self) -> String {
        match self.branch_param() {
            Some(branch) => refs::branch_ref(branch),
            None => refs::HEAD.to_string(),
        }
    }

    /// Remote URL under the given base, e.g. `https://github.com/owner/name.git`
    pub fn remote_url(&self, git_url: &str) -> String {
        format!("{}/{}.git", git_url.trim_end_matches('/'), self.full_name())
    }
}

/// Owner and repository names: `[A-Za-z0-9._-]+`, never `.` or `..`
///
/// Both end up as directory names under the workdir and in remote URLs.
fn is_valid_segment(segment: &str) -> bool {
    !segment.is_empty()
        && segment != "."
        && segment != ".."
        && segment
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
}

impl std::fmt::Display for RepositoryIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}
