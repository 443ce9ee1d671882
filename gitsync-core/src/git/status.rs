//! Working tree status

use std::fmt;

/// Change detected for one path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileState {
    /// Not tracked by the index
    Untracked,
    /// Added to the index
    Added,
    Modified,
    Deleted,
    Renamed,
    /// File type changed (e.g. file to symlink)
    TypeChanged,
}

impl FileState {
    fn code(self) -> &'static str {
        match self {
            FileState::Untracked => "??",
            FileState::Added => "A",
            FileState::Modified => "M",
            FileState::Deleted => "D",
            FileState::Renamed => "R",
            FileState::TypeChanged => "T",
        }
    }
}

/// One changed path, relative to the repository root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEntry {
    pub path: String,
    pub state: FileState,
}

/// Changed paths in a working tree
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorktreeStatus {
    pub entries: Vec<StatusEntry>,
}

impl WorktreeStatus {
    /// No path differs from HEAD and nothing is untracked
    pub fn is_clean(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Display for WorktreeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, entry) in self.entries.iter().enumerate() {
            if i > 0 {
                f.write_str("\n")?;
            }
            write!(f, "{:>2} {}", entry.state.code(), entry.path)?;
        }
        Ok(())
    }
}
