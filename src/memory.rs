//! In-memory persistence context
//!
//! A small change-tracking unit of work: entities are tracked in insertion
//! order, classified from their tracking flags, and written to a row store
//! on `persist_changes`. Used by the crate's tests and as a reference for
//! implementing [`PersistenceContext`] over a real store.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::dispatch::lock;
use crate::{
    ContextId, Entity, EntityRef, EntityType, EntryId, PersistenceContext, TrackedEntry,
    TransactionBoundary,
};

/// Injected failure of the in-memory store
#[derive(Debug, Clone, thiserror::Error)]
#[error("in-memory store rejected the {operation}")]
pub struct StoreFailure {
    /// Operation that failed (`write` or `commit`)
    pub operation: &'static str,
}

/// How the last in-memory transaction ended
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransactionOutcome {
    /// Committed
    Committed,
    /// Rolled back, explicitly or by dropping it
    RolledBack,
}

struct Entry {
    entry_id: EntryId,
    entity: EntityRef,
    entity_type: EntityType,
    persisted: bool,
    modified_members: usize,
    removed: bool,
}

impl Entry {
    fn tracked(&self) -> TrackedEntry {
        TrackedEntry {
            entry_id: self.entry_id,
            entity: self.entity.clone(),
            entity_type: self.entity_type,
            has_persisted_identity: self.persisted,
            modified_members: self.modified_members,
            marked_for_removal: self.removed,
        }
    }

    fn is<E: Entity>(&self, entity: &Arc<E>) -> bool {
        self.entity
            .clone()
            .downcast::<E>()
            .is_ok_and(|tracked| Arc::ptr_eq(&tracked, entity))
    }
}

#[derive(Clone)]
struct Row {
    entry_id: EntryId,
    entity: EntityRef,
}

#[derive(Default)]
struct Store {
    entries: Vec<Entry>,
    rows: Vec<Row>,
    fail_next_write: bool,
    fail_next_commit: bool,
    last_outcome: Option<TransactionOutcome>,
}

/// Change-tracking context over an in-memory row store
pub struct InMemoryContext {
    id: ContextId,
    store: Mutex<Store>,
    next_entry: AtomicU64,
    next_key: AtomicU64,
    auto_detect: AtomicBool,
    change_scans: AtomicUsize,
    writes: AtomicUsize,
}

impl InMemoryContext {
    pub fn new() -> Self {
        Self {
            id: ContextId::next(),
            store: Mutex::new(Store::default()),
            next_entry: AtomicU64::new(1),
            next_key: AtomicU64::new(1),
            auto_detect: AtomicBool::new(true),
            change_scans: AtomicUsize::new(0),
            writes: AtomicUsize::new(0),
        }
    }

    /// Allocate a store key for a new entity
    pub fn next_key(&self) -> u64 {
        self.next_key.fetch_add(1, Ordering::Relaxed)
    }

    /// Track a new entity; it is written by the next save
    pub fn add<E: Entity>(&self, entity: E) -> Arc<E> {
        self.track(entity, false).1
    }

    /// Track an entity that already exists in the store, unchanged
    pub fn attach<E: Entity>(&self, entity: E) -> Arc<E> {
        let (entry_id, entity) = self.track(entity, true);
        lock(&self.store).rows.push(Row {
            entry_id,
            entity: entity.clone(),
        });
        entity
    }

    /// Flag a member of a tracked entity as changed
    pub fn mark_modified<E: Entity>(&self, entity: &Arc<E>) -> bool {
        let mut store = lock(&self.store);
        match store.entries.iter_mut().find(|e| e.is(entity)) {
            Some(entry) => {
                entry.modified_members += 1;
                true
            }
            None => false,
        }
    }

    /// Replace a tracked entity's value; the entry counts as modified
    pub fn update<E: Entity>(&self, entity: &Arc<E>, value: E) -> Option<Arc<E>> {
        let mut store = lock(&self.store);
        let entry = store.entries.iter_mut().find(|e| e.is(entity))?;
        let value = Arc::new(value);
        entry.entity = value.clone();
        entry.modified_members += 1;
        Some(value)
    }

    /// Schedule removal. Entities never written are simply detached.
    pub fn remove<E: Entity>(&self, entity: &Arc<E>) -> bool {
        let mut store = lock(&self.store);
        let Some(index) = store.entries.iter().position(|e| e.is(entity)) else {
            return false;
        };
        if store.entries[index].persisted {
            store.entries[index].removed = true;
        } else {
            store.entries.remove(index);
        }
        true
    }

    /// Tracking identity of an entity
    pub fn entry_id<E: Entity>(&self, entity: &Arc<E>) -> Option<EntryId> {
        lock(&self.store)
            .entries
            .iter()
            .find(|e| e.is(entity))
            .map(|e| e.entry_id)
    }

    /// Tracked entities of type `E` not scheduled for removal
    pub fn query<E: Entity>(&self) -> Vec<Arc<E>> {
        lock(&self.store)
            .entries
            .iter()
            .filter(|e| !e.removed)
            .filter_map(|e| e.entity.clone().downcast::<E>().ok())
            .collect()
    }

    /// Rows of type `E` in the store
    pub fn persisted<E: Entity>(&self) -> Vec<Arc<E>> {
        lock(&self.store)
            .rows
            .iter()
            .filter_map(|row| row.entity.clone().downcast::<E>().ok())
            .collect()
    }

    /// Number of rows of type `E` in the store
    pub fn count<E: Entity>(&self) -> usize {
        self.persisted::<E>().len()
    }

    /// Make the next `persist_changes` fail with [`StoreFailure`]
    pub fn fail_next_write(&self) {
        lock(&self.store).fail_next_write = true;
    }

    /// Make the next transaction commit fail with [`StoreFailure`]
    pub fn fail_next_commit(&self) {
        lock(&self.store).fail_next_commit = true;
    }

    /// Change scans performed while automatic detection was enabled
    pub fn change_scans(&self) -> usize {
        self.change_scans.load(Ordering::Relaxed)
    }

    /// Successful writes so far
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::Relaxed)
    }

    /// Open a store transaction; writes made while it is open are undone on
    /// rollback
    pub fn begin_transaction(self: &Arc<Self>) -> InMemoryTransaction {
        let snapshot = lock(&self.store).rows.clone();
        tracing::debug!(context_id = %self.id, rows = snapshot.len(), "In-memory transaction opened");
        InMemoryTransaction {
            context: self.clone(),
            snapshot: Some(snapshot),
        }
    }

    /// Outcome of the most recently finished transaction
    pub fn last_transaction_outcome(&self) -> Option<TransactionOutcome> {
        lock(&self.store).last_outcome
    }

    fn track<E: Entity>(&self, entity: E, persisted: bool) -> (EntryId, Arc<E>) {
        let entity = Arc::new(entity);
        let entry_id = EntryId(self.next_entry.fetch_add(1, Ordering::Relaxed));
        let entry = Entry {
            entry_id,
            entity: entity.clone(),
            entity_type: EntityType::of::<E>(),
            persisted,
            modified_members: 0,
            removed: false,
        };
        lock(&self.store).entries.push(entry);
        (entry_id, entity)
    }

    fn record_scan(&self) {
        if self.auto_detect.load(Ordering::Relaxed) {
            self.change_scans.fetch_add(1, Ordering::Relaxed);
        }
    }
}

impl Default for InMemoryContext {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PersistenceContext for InMemoryContext {
    fn context_id(&self) -> ContextId {
        self.id
    }

    fn tracked_entries(&self) -> Vec<TrackedEntry> {
        self.record_scan();
        lock(&self.store).entries.iter().map(Entry::tracked).collect()
    }

    fn auto_detect_changes(&self) -> bool {
        self.auto_detect.load(Ordering::Relaxed)
    }

    fn set_auto_detect_changes(&self, enabled: bool) {
        self.auto_detect.store(enabled, Ordering::Relaxed);
    }

    async fn persist_changes(&self) -> anyhow::Result<usize> {
        self.record_scan();
        let mut store = lock(&self.store);
        if std::mem::take(&mut store.fail_next_write) {
            return Err(StoreFailure { operation: "write" }.into());
        }

        let Store { entries, rows, .. } = &mut *store;
        let mut affected = 0;
        entries.retain_mut(|entry| {
            if entry.removed {
                rows.retain(|row| row.entry_id != entry.entry_id);
                affected += 1;
                return false;
            }
            if !entry.persisted {
                rows.push(Row {
                    entry_id: entry.entry_id,
                    entity: entry.entity.clone(),
                });
                entry.persisted = true;
                entry.modified_members = 0;
                affected += 1;
            } else if entry.modified_members > 0 {
                if let Some(row) = rows.iter_mut().find(|row| row.entry_id == entry.entry_id) {
                    row.entity = entry.entity.clone();
                }
                entry.modified_members = 0;
                affected += 1;
            }
            true
        });
        drop(store);

        self.writes.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(context_id = %self.id, affected, "In-memory write");
        Ok(affected)
    }
}

/// Store transaction over an [`InMemoryContext`]
pub struct InMemoryTransaction {
    context: Arc<InMemoryContext>,
    snapshot: Option<Vec<Row>>,
}

impl InMemoryTransaction {
    fn finish(&mut self, outcome: TransactionOutcome) {
        let mut store = lock(&self.context.store);
        if let Some(snapshot) = self.snapshot.take() {
            if outcome == TransactionOutcome::RolledBack {
                store.rows = snapshot;
            }
            store.last_outcome = Some(outcome);
        }
    }
}

#[async_trait]
impl TransactionBoundary for InMemoryTransaction {
    async fn commit(&mut self) -> anyhow::Result<()> {
        if std::mem::take(&mut lock(&self.context.store).fail_next_commit) {
            return Err(StoreFailure {
                operation: "commit",
            }
            .into());
        }
        self.finish(TransactionOutcome::Committed);
        Ok(())
    }

    async fn rollback(&mut self) -> anyhow::Result<()> {
        self.finish(TransactionOutcome::RolledBack);
        Ok(())
    }
}

impl Drop for InMemoryTransaction {
    fn drop(&mut self) {
        self.finish(TransactionOutcome::RolledBack);
    }
}
