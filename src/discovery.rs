//! Change discovery over a persistence context's tracked entries

use serde::{Deserialize, Serialize};

use crate::{EntityRef, EntityType, EntryId, PersistenceContext, TrackedEntry};

/// Pending modification state of a tracked entity
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeKind {
    /// New; no persisted identity yet
    Added,
    /// Persisted and has at least one modified member
    Modified,
    /// Marked for removal
    Deleted,
    /// Tracked but nothing pending
    Unchanged,
}

impl ChangeKind {
    /// Classify a tracked entry
    pub fn classify(entry: &TrackedEntry) -> Self {
        if entry.marked_for_removal {
            ChangeKind::Deleted
        } else if !entry.has_persisted_identity {
            ChangeKind::Added
        } else if entry.modified_members > 0 {
            ChangeKind::Modified
        } else {
            ChangeKind::Unchanged
        }
    }

    /// Whether this kind will be written by the next save
    pub fn is_pending(&self) -> bool {
        !matches!(self, ChangeKind::Unchanged)
    }
}

/// One tracked entity and its change, as seen by one discovery pass
#[derive(Clone)]
pub struct ChangeRecord {
    /// Tracking identity within the context
    pub entry_id: EntryId,
    /// The entity itself
    pub entity: EntityRef,
    /// Runtime type of the entity
    pub entity_type: EntityType,
    /// Classified change
    pub kind: ChangeKind,
    /// Position in the context's tracking order during this pass
    pub ordinal: u64,
}

impl std::fmt::Debug for ChangeRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeRecord")
            .field("entry_id", &self.entry_id)
            .field("entity_type", &self.entity_type)
            .field("kind", &self.kind)
            .field("ordinal", &self.ordinal)
            .finish()
    }
}

/// Scan the context's current tracked state.
///
/// Read-only and idempotent: calling it twice without intervening changes
/// yields the same records. Order follows the context's tracking order.
pub fn discover_changes(context: &dyn PersistenceContext) -> Vec<ChangeRecord> {
    context
        .tracked_entries()
        .into_iter()
        .enumerate()
        .map(|(ordinal, entry)| ChangeRecord {
            kind: ChangeKind::classify(&entry),
            entry_id: entry.entry_id,
            entity: entry.entity,
            entity_type: entry.entity_type,
            ordinal: ordinal as u64,
        })
        .collect()
}
