//! Trigger phases

use serde::{Deserialize, Serialize};

/// Named point in the save/commit lifecycle where handlers run
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Phase {
    /// Before changes are written
    BeforeSave,
    /// After the write succeeded
    AfterSave,
    /// After the write failed
    AfterSaveFailed,
    /// Before the surrounding transaction commits
    BeforeCommit,
    /// After the surrounding transaction committed
    AfterCommit,
}

impl Phase {
    /// All phases in lifecycle order
    pub const ALL: [Phase; 5] = [
        Phase::BeforeSave,
        Phase::AfterSave,
        Phase::AfterSaveFailed,
        Phase::BeforeCommit,
        Phase::AfterCommit,
    ];

    /// Stable snake_case name, used in logs
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BeforeSave => "before_save",
            Self::AfterSave => "after_save",
            Self::AfterSaveFailed => "after_save_failed",
            Self::BeforeCommit => "before_commit",
            Self::AfterCommit => "after_commit",
        }
    }

    /// Name of the capability trait handlers implement for this phase
    pub fn capability(&self) -> &'static str {
        match self {
            Self::BeforeSave => "BeforeSaveTrigger",
            Self::AfterSave => "AfterSaveTrigger",
            Self::AfterSaveFailed => "AfterSaveFailedTrigger",
            Self::BeforeCommit => "BeforeCommitTrigger",
            Self::AfterCommit => "AfterCommitTrigger",
        }
    }

    /// Runs before anything durable happened; may still abort the operation
    pub fn is_pre_write(&self) -> bool {
        matches!(self, Self::BeforeSave | Self::BeforeCommit)
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
