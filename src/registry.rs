//! Active sessions and open transactions, keyed by persistence context

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::dispatch::lock;
use crate::{ChangeKind, ChangeRecord, ConfigurationError, ContextId, TriggerSession};

/// Create-or-reuse registry of trigger sessions.
///
/// At most one session is active per context; a save that finds one running
/// (a save issued from inside a trigger) joins it instead of starting another.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<ContextId, Arc<TriggerSession>>>,
    transactions: Mutex<HashMap<ContextId, TransactionLedger>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Join the context's active session, or create one with `create`.
    ///
    /// Only the lease that created the session ends it, when dropped.
    pub fn acquire<F>(
        &self,
        context: ContextId,
        create: F,
    ) -> Result<SessionLease<'_>, ConfigurationError>
    where
        F: FnOnce() -> Result<Arc<TriggerSession>, ConfigurationError>,
    {
        if let Some(session) = self.active(context) {
            return Ok(SessionLease {
                registry: self,
                session,
                created: false,
            });
        }

        let session = create()?;
        lock(&self.sessions).insert(context, session.clone());
        Ok(SessionLease {
            registry: self,
            session,
            created: true,
        })
    }

    /// Session currently running on the context
    pub fn active(&self, context: ContextId) -> Option<Arc<TriggerSession>> {
        lock(&self.sessions).get(&context).cloned()
    }

    /// Number of contexts with an active session
    pub fn active_count(&self) -> usize {
        lock(&self.sessions).len()
    }

    pub(crate) fn open_transaction(&self, context: ContextId) -> bool {
        let mut transactions = lock(&self.transactions);
        if transactions.contains_key(&context) {
            return false;
        }
        transactions.insert(context, TransactionLedger::default());
        true
    }

    #[cfg(test)]
    pub(crate) fn in_transaction(&self, context: ContextId) -> bool {
        lock(&self.transactions).contains_key(&context)
    }

    /// Fold a save's final snapshot into the open transaction, if any
    pub(crate) fn record_saved(&self, context: ContextId, records: &[ChangeRecord]) {
        if let Some(ledger) = lock(&self.transactions).get_mut(&context) {
            ledger.merge(records);
        }
    }

    pub(crate) fn transaction_changes(&self, context: ContextId) -> Vec<ChangeRecord> {
        lock(&self.transactions)
            .get(&context)
            .map(|ledger| ledger.records.clone())
            .unwrap_or_default()
    }

    pub(crate) fn close_transaction(&self, context: ContextId) -> Vec<ChangeRecord> {
        lock(&self.transactions)
            .remove(&context)
            .map(|ledger| ledger.records)
            .unwrap_or_default()
    }
}

/// Handle on a session for the duration of one save call
pub struct SessionLease<'a> {
    registry: &'a SessionRegistry,
    session: Arc<TriggerSession>,
    created: bool,
}

impl SessionLease<'_> {
    pub fn session(&self) -> &Arc<TriggerSession> {
        &self.session
    }

    /// Whether this lease started the session (outermost save)
    pub fn created(&self) -> bool {
        self.created
    }
}

impl Drop for SessionLease<'_> {
    fn drop(&mut self) {
        if self.created {
            lock(&self.registry.sessions).remove(&self.session.context_id());
            self.session.complete();
        }
    }
}

/// Changes saved inside one transaction scope, one record per entry
#[derive(Default)]
struct TransactionLedger {
    records: Vec<ChangeRecord>,
}

impl TransactionLedger {
    fn merge(&mut self, incoming: &[ChangeRecord]) {
        for record in incoming {
            match self
                .records
                .iter()
                .position(|existing| existing.entry_id == record.entry_id)
            {
                None => {
                    let mut record = record.clone();
                    record.ordinal = self.records.len() as u64;
                    self.records.push(record);
                }
                Some(index) => match merge_kind(self.records[index].kind, record.kind) {
                    Some(kind) => self.records[index].kind = kind,
                    None => {
                        self.records.remove(index);
                        for (ordinal, record) in self.records.iter_mut().enumerate() {
                            record.ordinal = ordinal as u64;
                        }
                    }
                },
            }
        }
    }
}

/// Net effect of two saves of the same entry within one transaction
fn merge_kind(earlier: ChangeKind, later: ChangeKind) -> Option<ChangeKind> {
    match (earlier, later) {
        (ChangeKind::Added, ChangeKind::Deleted) => None,
        (ChangeKind::Added, _) => Some(ChangeKind::Added),
        (earlier, ChangeKind::Unchanged) => Some(earlier),
        (_, later) => Some(later),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{EntityType, EntryId};

    fn record(entry: u64, kind: ChangeKind) -> ChangeRecord {
        ChangeRecord {
            entry_id: EntryId(entry),
            entity: Arc::new(entry),
            entity_type: EntityType::of::<u64>(),
            kind,
            ordinal: 0,
        }
    }

    #[test]
    fn test_merge_kind() {
        assert_eq!(merge_kind(ChangeKind::Added, ChangeKind::Modified), Some(ChangeKind::Added));
        assert_eq!(merge_kind(ChangeKind::Added, ChangeKind::Deleted), None);
        assert_eq!(
            merge_kind(ChangeKind::Modified, ChangeKind::Unchanged),
            Some(ChangeKind::Modified)
        );
        assert_eq!(
            merge_kind(ChangeKind::Modified, ChangeKind::Deleted),
            Some(ChangeKind::Deleted)
        );
    }

    #[test]
    fn test_ledger_merges_by_entry() {
        let mut ledger = TransactionLedger::default();
        ledger.merge(&[record(1, ChangeKind::Added), record(2, ChangeKind::Added)]);
        ledger.merge(&[record(3, ChangeKind::Modified), record(1, ChangeKind::Modified)]);
        ledger.merge(&[record(2, ChangeKind::Deleted)]);

        let merged: Vec<_> = ledger
            .records
            .iter()
            .map(|r| (r.entry_id.0, r.kind, r.ordinal))
            .collect();
        assert_eq!(
            merged,
            vec![(1, ChangeKind::Added, 0), (3, ChangeKind::Modified, 1)]
        );
    }

    #[test]
    fn test_transaction_bookkeeping() {
        let registry = SessionRegistry::new();
        let context = ContextId::next();

        registry.record_saved(context, &[record(1, ChangeKind::Added)]);
        assert!(registry.transaction_changes(context).is_empty());

        assert!(registry.open_transaction(context));
        assert!(!registry.open_transaction(context));
        registry.record_saved(context, &[record(1, ChangeKind::Added)]);
        assert!(registry.in_transaction(context));
        assert_eq!(registry.close_transaction(context).len(), 1);
        assert!(!registry.in_transaction(context));
    }
}
