//! Reference names and refspecs

/// Name of the only remote a cloned repository has
pub const ORIGIN: &str = "origin";

/// Reference cloned when no branch is requested
pub const HEAD: &str = "HEAD";

/// Marker telling the remote to accept a non-fast-forward update
pub const FORCE_MARKER: char = '+';

const HEADS_PREFIX: &str = "refs/heads/";

/// `refs/heads/<branch>`
pub fn branch_ref(branch: &str) -> String {
    format!("{}{}", HEADS_PREFIX, branch)
}

/// `refs/remotes/<remote>/<branch>`
pub fn remote_branch_ref(remote: &str, branch: &str) -> String {
    format!("refs/remotes/{}/{}", remote, branch)
}

/// Short branch name of a `refs/heads/` reference
pub fn branch_shorthand(reference: &str) -> Option<&str> {
    reference.strip_prefix(HEADS_PREFIX)
}

/// Refspec publishing a local branch to the identically named remote branch
///
/// With `force` the refspec is prefixed with [`FORCE_MARKER`], so the local tip
/// replaces the remote tip even when the update is not a fast-forward.
pub fn push_refspec(branch: &str, force: bool) -> String {
    let refspec = format!("{0}{1}:{0}{1}", HEADS_PREFIX, branch);
    if force {
        format!("{}{}", FORCE_MARKER, refspec)
    } else {
        refspec
    }
}
