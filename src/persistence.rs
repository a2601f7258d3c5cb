//! Persistence context boundary consumed by the trigger engine

use async_trait::async_trait;

use crate::{ContextId, EntityRef, EntityType, EntryId};

/// One entity tracked by a persistence context, with the raw facts change
/// discovery classifies
#[derive(Clone)]
pub struct TrackedEntry {
    /// Tracking identity
    pub entry_id: EntryId,
    /// The entity
    pub entity: EntityRef,
    /// Runtime type of the entity
    pub entity_type: EntityType,
    /// The entity was loaded from, or already written to, the store
    pub has_persisted_identity: bool,
    /// Number of scalar or navigation members changed since the last write
    pub modified_members: usize,
    /// The entity is scheduled for removal
    pub marked_for_removal: bool,
}

/// The unit-of-work a trigger session wraps.
///
/// Not expected to be safe for concurrent saves; one logical flow of control
/// per instance.
#[async_trait]
pub trait PersistenceContext: Send + Sync + 'static {
    /// Identity of this context instance, stable for its lifetime
    fn context_id(&self) -> ContextId;

    /// Currently tracked entities in tracking order
    fn tracked_entries(&self) -> Vec<TrackedEntry>;

    /// Whether the context scans for changes automatically
    fn auto_detect_changes(&self) -> bool;

    /// Toggle automatic change scanning
    fn set_auto_detect_changes(&self, enabled: bool);

    /// Durably write all pending changes; returns affected entity count
    async fn persist_changes(&self) -> anyhow::Result<usize>;
}

/// Disables automatic change detection until dropped, then restores the
/// value found at acquisition
pub struct AutoDetectChangesGuard<'a> {
    context: &'a dyn PersistenceContext,
    previous: bool,
}

impl<'a> AutoDetectChangesGuard<'a> {
    /// Turn automatic change detection off
    pub fn disable(context: &'a dyn PersistenceContext) -> Self {
        let previous = context.auto_detect_changes();
        context.set_auto_detect_changes(false);
        Self { context, previous }
    }

    /// Value that will be restored
    pub fn previous(&self) -> bool {
        self.previous
    }
}

impl Drop for AutoDetectChangesGuard<'_> {
    fn drop(&mut self) {
        self.context.set_auto_detect_changes(self.previous);
    }
}
