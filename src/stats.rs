//! Trigger engine statistics

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::Phase;

/// Engine-wide counters, shared by every session of one service
pub struct TriggerStats {
    pub sessions_created: AtomicU64,
    pub sessions_reused: AtomicU64,
    pub before_save_invocations: AtomicU64,
    pub after_save_invocations: AtomicU64,
    pub after_save_failed_invocations: AtomicU64,
    pub before_commit_invocations: AtomicU64,
    pub after_commit_invocations: AtomicU64,
    pub handler_failures: AtomicU64,
    pub cascade_cycles: AtomicU64,
    pub after_commit_failures: AtomicU64,
}

impl TriggerStats {
    pub fn new() -> Self {
        Self {
            sessions_created: AtomicU64::new(0),
            sessions_reused: AtomicU64::new(0),
            before_save_invocations: AtomicU64::new(0),
            after_save_invocations: AtomicU64::new(0),
            after_save_failed_invocations: AtomicU64::new(0),
            before_commit_invocations: AtomicU64::new(0),
            after_commit_invocations: AtomicU64::new(0),
            handler_failures: AtomicU64::new(0),
            cascade_cycles: AtomicU64::new(0),
            after_commit_failures: AtomicU64::new(0),
        }
    }

    pub(crate) fn record_invocation(&self, phase: Phase) {
        let counter = match phase {
            Phase::BeforeSave => &self.before_save_invocations,
            Phase::AfterSave => &self.after_save_invocations,
            Phase::AfterSaveFailed => &self.after_save_failed_invocations,
            Phase::BeforeCommit => &self.before_commit_invocations,
            Phase::AfterCommit => &self.after_commit_invocations,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> TriggerStatsSnapshot {
        TriggerStatsSnapshot {
            sessions_created: self.sessions_created.load(Ordering::Relaxed),
            sessions_reused: self.sessions_reused.load(Ordering::Relaxed),
            before_save_invocations: self.before_save_invocations.load(Ordering::Relaxed),
            after_save_invocations: self.after_save_invocations.load(Ordering::Relaxed),
            after_save_failed_invocations: self
                .after_save_failed_invocations
                .load(Ordering::Relaxed),
            before_commit_invocations: self.before_commit_invocations.load(Ordering::Relaxed),
            after_commit_invocations: self.after_commit_invocations.load(Ordering::Relaxed),
            handler_failures: self.handler_failures.load(Ordering::Relaxed),
            cascade_cycles: self.cascade_cycles.load(Ordering::Relaxed),
            after_commit_failures: self.after_commit_failures.load(Ordering::Relaxed),
        }
    }
}

impl Default for TriggerStats {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerStatsSnapshot {
    pub sessions_created: u64,
    pub sessions_reused: u64,
    pub before_save_invocations: u64,
    pub after_save_invocations: u64,
    pub after_save_failed_invocations: u64,
    pub before_commit_invocations: u64,
    pub after_commit_invocations: u64,
    pub handler_failures: u64,
    pub cascade_cycles: u64,
    pub after_commit_failures: u64,
}
