//! Dispatch log: which entries already went through which phase

use std::collections::HashMap;

use crate::{CascadeBehavior, ChangeKind, EntryId, Phase};

/// Remembers (entry, phase) pairs already dispatched, so nested saves and
/// cascade passes never run a handler twice for the same change.
///
/// In pre-write phases with [`CascadeBehavior::EntityAndType`], an entry whose
/// change kind moved (say `Added` to `Deleted`) is dispatched again; a move to
/// `Unchanged` never is.
#[derive(Debug)]
pub struct DispatchLog {
    seen: HashMap<(EntryId, Phase), ChangeKind>,
    cascade: CascadeBehavior,
}

impl DispatchLog {
    pub fn new(cascade: CascadeBehavior) -> Self {
        Self {
            seen: HashMap::new(),
            cascade,
        }
    }

    /// Whether the change still needs dispatching, without marking it
    pub fn is_pending(&self, entry: EntryId, phase: Phase, kind: ChangeKind) -> bool {
        match self.seen.get(&(entry, phase)) {
            None => true,
            Some(previous) => {
                phase.is_pre_write()
                    && self.cascade == CascadeBehavior::EntityAndType
                    && *previous != kind
                    && kind != ChangeKind::Unchanged
            }
        }
    }

    /// Mark the change dispatched; returns false if it already was
    pub fn check_and_mark(&mut self, entry: EntryId, phase: Phase, kind: ChangeKind) -> bool {
        if !self.is_pending(entry, phase, kind) {
            return false;
        }
        self.seen.insert((entry, phase), kind);
        true
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    pub fn clear(&mut self) {
        self.seen.clear();
    }
}
