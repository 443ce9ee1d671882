//! Declarative commit, branch and push options

use serde::{Deserialize, Serialize};

use crate::git::CommitId;

/// Separator line placed between the commit body and footer
const FOOTER_SEPARATOR: &str = "-- ";

/// Git staging and commit settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct GitOptions {
    /// Glob patterns staged in order before committing
    pub stage_patterns: Vec<String>,
    /// Also commit every modification to tracked files
    pub stage_all_changed: bool,
    /// First line of the commit message
    pub commit_title: String,
    /// Optional commit body
    pub commit_body: String,
    /// Optional commit footer, placed after a `-- ` separator line
    pub commit_footer: String,
    pub author_name: String,
    pub author_email: String,
    pub committer_name: String,
    pub committer_email: String,
}

impl GitOptions {
    /// Assemble the commit message
    ///
    /// `<title>`, then `\n\n<body>` when a body is set, then `\n\n-- \n<footer>`
    /// when a footer is set. Nothing is trimmed.
    pub fn commit_message(&self) -> String {
        let mut message = self.commit_title.clone();
        if !self.commit_body.is_empty() {
            message.push_str("\n\n");
            message.push_str(&self.commit_body);
        }
        if !self.commit_footer.is_empty() {
            message.push_str("\n\n");
            message.push_str(FOOTER_SEPARATOR);
            message.push('\n');
            message.push_str(&self.commit_footer);
        }
        message
    }
}

/// Everything one pipeline run needs besides the repository and credentials
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct UpdateOptions {
    /// Staging and commit settings
    pub git: GitOptions,
    /// Branch to switch to and push
    pub branch_name: String,
    /// Create the branch instead of tracking an existing remote branch
    pub create_branch: bool,
    /// Overwrite the remote branch even when the push is not a fast-forward
    pub force_push: bool,
}

impl UpdateOptions {
    /// Branch switching part of the options
    pub fn branch_options(&self) -> BranchOptions {
        BranchOptions {
            branch_name: self.branch_name.clone(),
            create_branch: self.create_branch,
        }
    }

    /// Push part of the options
    pub fn push_options<'a, A>(&self, auth: &'a A) -> PushOptions<'a, A> {
        PushOptions {
            auth,
            branch_name: self.branch_name.clone(),
            force_push: self.force_push,
        }
    }
}

/// Options for positioning the working tree on a branch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchOptions {
    pub branch_name: String,
    pub create_branch: bool,
}

/// Options for publishing the local branch
#[derive(Debug, Clone)]
pub struct PushOptions<'a, A> {
    /// Credentials used to issue the push token
    pub auth: &'a A,
    pub branch_name: String,
    pub force_push: bool,
}

/// Result of a commit attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "commit", rename_all = "lowercase")]
pub enum CommitOutcome {
    /// The working tree was clean; nothing was committed
    Unchanged,
    /// A commit was created
    Committed(CommitId),
}

impl CommitOutcome {
    /// Whether a commit was created
    pub fn changed(&self) -> bool {
        matches!(self, CommitOutcome::Committed(_))
    }

    /// The new commit, if one was created
    pub fn commit_id(&self) -> Option<&CommitId> {
        match self {
            CommitOutcome::Committed(id) => Some(id),
            CommitOutcome::Unchanged => None,
        }
    }
}
