//! Trigger context and identity types

use std::sync::Arc;

use crate::{ChangeKind, EntityType, PersistError};

fn next_id() -> u64 {
    use std::sync::atomic::{AtomicU64, Ordering};
    static COUNTER: AtomicU64 = AtomicU64::new(1);
    COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// Identity of a persistence context instance
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextId(pub u64);

impl ContextId {
    /// Allocate a process-unique context ID
    pub fn next() -> Self {
        Self(next_id())
    }

    /// Get the raw ID value
    pub fn get(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Debug for ContextId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ContextId({})", self.0)
    }
}

impl std::fmt::Display for ContextId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of a tracked entry within one persistence context.
///
/// Stable for as long as the context keeps tracking the entity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntryId(pub u64);

/// Identity of a trigger session
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(pub u64);

impl SessionId {
    /// Allocate a process-unique session ID
    pub fn next() -> Self {
        Self(next_id())
    }
}

impl std::fmt::Debug for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SessionId({})", self.0)
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Per-entity, per-phase value handed to a trigger handler
pub struct TriggerContext<E> {
    entity: Arc<E>,
    entity_type: EntityType,
    change_kind: ChangeKind,
    failure: Option<PersistError>,
}

impl<E> TriggerContext<E> {
    pub(crate) fn new(
        entity: Arc<E>,
        entity_type: EntityType,
        change_kind: ChangeKind,
        failure: Option<PersistError>,
    ) -> Self {
        Self {
            entity,
            entity_type,
            change_kind,
            failure,
        }
    }

    /// The entity this trigger fires for
    pub fn entity(&self) -> &Arc<E> {
        &self.entity
    }

    /// Type of the entity as registered
    pub fn entity_type(&self) -> EntityType {
        self.entity_type
    }

    /// Pending change of the entity when the phase started
    pub fn change_kind(&self) -> ChangeKind {
        self.change_kind
    }

    /// Write error that caused the after-save-failed phase
    pub fn failure(&self) -> Option<&PersistError> {
        self.failure.as_ref()
    }
}

impl<E> std::fmt::Debug for TriggerContext<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TriggerContext")
            .field("entity_type", &self.entity_type)
            .field("change_kind", &self.change_kind)
            .field("failed", &self.failure.is_some())
            .finish()
    }
}
