//! Transaction-scoped triggers: before-commit and after-commit
//!
//! While a [`TriggeredTransaction`] is open, every save on its context folds
//! its final change snapshot into a per-transaction ledger. Commit runs
//! before-commit triggers over that ledger, commits, then runs after-commit
//! triggers best-effort.

use std::sync::Mutex;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::dispatch::Dispatcher;
use crate::{
    ChangeRecord, ContextId, DispatchLog, PersistError, PersistenceContext, Phase,
    TransactionError, TriggerError, TriggeredContext,
};

/// Commit boundary of the underlying store's transaction
#[async_trait]
pub trait TransactionBoundary: Send {
    /// Durably commit
    async fn commit(&mut self) -> anyhow::Result<()>;

    /// Abandon every write made inside the transaction
    async fn rollback(&mut self) -> anyhow::Result<()>;
}

/// Outcome of a committed transaction
#[derive(Debug)]
pub struct CommitReport {
    /// Changes the transaction committed, merged per entry
    pub committed_changes: Vec<ChangeRecord>,
    /// After-commit handler failures; the commit stands regardless
    pub after_commit_failures: Vec<TriggerError>,
}

impl CommitReport {
    /// Whether every after-commit handler succeeded
    pub fn is_clean(&self) -> bool {
        self.after_commit_failures.is_empty()
    }
}

/// A store transaction with commit triggers attached.
///
/// Dropping it without `commit` or `rollback` discards the ledger; the inner
/// transaction's own drop behavior decides what happens to its writes.
pub struct TriggeredTransaction<C: PersistenceContext, T: TransactionBoundary> {
    triggered: TriggeredContext<C>,
    transaction: T,
    context_id: ContextId,
    finished: bool,
}

impl<C: PersistenceContext, T: TransactionBoundary> TriggeredTransaction<C, T> {
    pub(crate) fn new(triggered: TriggeredContext<C>, transaction: T) -> Self {
        let context_id = triggered.context().context_id();
        Self {
            triggered,
            transaction,
            context_id,
            finished: false,
        }
    }

    /// The triggered context the transaction belongs to
    pub fn context(&self) -> &TriggeredContext<C> {
        &self.triggered
    }

    /// Changes saved so far inside the transaction
    pub fn changes(&self) -> Vec<ChangeRecord> {
        self.triggered.registry().transaction_changes(self.context_id)
    }

    /// Run before-commit triggers, commit, then run after-commit triggers.
    ///
    /// A before-commit failure rolls the transaction back and is returned.
    /// After-commit failures never undo the commit; they are collected in
    /// the report.
    pub async fn commit(
        mut self,
        cancellation: &CancellationToken,
    ) -> Result<CommitReport, TransactionError> {
        let service = self.triggered.service().clone();
        let registry = self.triggered.registry().clone();
        let context_id = self.context_id;
        let configuration = service.configuration();
        let dispatcher = Dispatcher {
            configuration,
            provider: self.triggered.provider().map(|provider| &**provider),
            stats: service.stats(),
            session_id: None,
        };
        let log = Mutex::new(DispatchLog::new(configuration.options().cascade));

        let before_commit = dispatcher
            .run_cascading(
                Phase::BeforeCommit,
                || registry.transaction_changes(context_id),
                &log,
                cancellation,
            )
            .await;
        if let Err(error) = before_commit {
            self.finished = true;
            registry.close_transaction(context_id);
            tracing::warn!(context_id = %context_id, error = %error, "Before-commit trigger failed; rolling back");
            if let Err(rollback) = self.transaction.rollback().await {
                tracing::error!(context_id = %context_id, error = %rollback, "Rollback after before-commit failure failed");
            }
            return Err(TransactionError::Trigger(error));
        }

        if let Err(error) = self.transaction.commit().await {
            self.finished = true;
            registry.close_transaction(context_id);
            return Err(TransactionError::Commit(PersistError::new(error)));
        }
        self.finished = true;
        let committed_changes = registry.close_transaction(context_id);
        tracing::info!(context_id = %context_id, changes = committed_changes.len(), "Transaction committed");

        let after_commit_failures = dispatcher
            .run_best_effort(Phase::AfterCommit, &committed_changes, &log, cancellation)
            .await;
        if !after_commit_failures.is_empty() {
            tracing::warn!(
                context_id = %context_id,
                failures = after_commit_failures.len(),
                "After-commit triggers failed; commit stands"
            );
        }

        Ok(CommitReport {
            committed_changes,
            after_commit_failures,
        })
    }

    /// Roll back without running commit triggers
    pub async fn rollback(mut self) -> Result<(), TransactionError> {
        self.finished = true;
        self.triggered.registry().close_transaction(self.context_id);
        self.transaction
            .rollback()
            .await
            .map_err(|error| TransactionError::Rollback(PersistError::new(error)))
    }
}

impl<C: PersistenceContext, T: TransactionBoundary> Drop for TriggeredTransaction<C, T> {
    fn drop(&mut self) {
        if !self.finished {
            tracing::debug!(context_id = %self.context_id, "Triggered transaction dropped unfinished");
            self.triggered.registry().close_transaction(self.context_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Weak};

    use super::*;
    use crate::fixtures::{Course, Journal, RecordingTrigger, Student};
    use crate::{
        BeforeCommitTrigger, ChangeKind, Entity, InMemoryContext, TransactionOutcome,
        TriggerConfiguration, TriggerContext, TriggerService, UnchangedEntityPolicy,
    };

    /// Saves one more course, through a wrapper of its own, whenever it runs
    struct AddCourseOnCommit {
        db: Arc<InMemoryContext>,
        service: Weak<TriggerService>,
    }

    #[async_trait]
    impl<E: Entity> BeforeCommitTrigger<E> for AddCourseOnCommit {
        async fn before_commit(
            &self,
            _context: &TriggerContext<E>,
            cancellation: &CancellationToken,
        ) -> anyhow::Result<()> {
            let service = self
                .service
                .upgrade()
                .ok_or_else(|| anyhow::anyhow!("trigger service dropped"))?;
            let db = TriggeredContext::new(self.db.clone(), service);
            db.add(Course::elective(db.next_key(), "Orientation"));
            db.save_changes(cancellation).await?;
            Ok(())
        }
    }

    fn triggered(journal: &Journal) -> TriggeredContext<InMemoryContext> {
        let configuration = TriggerConfiguration::builder(UnchangedEntityPolicy::Skip)
            .before_commit::<Course, RecordingTrigger>()
            .after_commit::<Course, RecordingTrigger>()
            .before_commit::<Student, RecordingTrigger<1>>()
            .after_commit::<Student, RecordingTrigger<1>>()
            .activator::<RecordingTrigger, _>(journal.activator("course"))
            .activator::<RecordingTrigger<1>, _>(journal.activator("student"))
            .build();
        TriggeredContext::new(
            Arc::new(InMemoryContext::new()),
            Arc::new(TriggerService::new(Arc::new(configuration))),
        )
    }

    #[tokio::test]
    async fn test_commit_runs_commit_triggers_over_all_saves() {
        let journal = Journal::default();
        let db = triggered(&journal);
        let cancellation = CancellationToken::new();
        let transaction = db.begin_transaction(db.context().begin_transaction()).unwrap();

        let course = db.add(Course::mandatory(db.next_key(), "Algebra"));
        db.save_changes(&cancellation).await.unwrap();
        db.update(&course, Course::mandatory(course.id, "Linear Algebra"));
        db.add(Student::new(db.next_key(), "Ada"));
        db.save_changes(&cancellation).await.unwrap();
        assert!(journal.calls().is_empty());

        let kinds: Vec<_> = transaction.changes().iter().map(|c| c.kind).collect();
        assert_eq!(kinds, vec![ChangeKind::Added, ChangeKind::Added]);

        let report = transaction.commit(&cancellation).await.unwrap();
        assert!(report.is_clean());
        assert_eq!(report.committed_changes.len(), 2);
        assert_eq!(
            journal.calls(),
            vec![
                "course:before_commit:Added",
                "student:before_commit:Added",
                "course:after_commit:Added",
                "student:after_commit:Added",
            ]
        );
        assert_eq!(
            db.context().last_transaction_outcome(),
            Some(TransactionOutcome::Committed)
        );
    }

    #[tokio::test]
    async fn test_before_commit_failure_rolls_back() {
        let journal = Journal::default();
        let configuration = TriggerConfiguration::builder(UnchangedEntityPolicy::Skip)
            .before_commit::<Course, RecordingTrigger>()
            .after_commit::<Course, RecordingTrigger>()
            .activator::<RecordingTrigger, _>({
                let journal = journal.clone();
                move || RecordingTrigger::new("course", journal.clone()).failing_in(Phase::BeforeCommit)
            })
            .build();
        let db = TriggeredContext::new(
            Arc::new(InMemoryContext::new()),
            Arc::new(TriggerService::new(Arc::new(configuration))),
        );
        let cancellation = CancellationToken::new();
        let transaction = db.begin_transaction(db.context().begin_transaction()).unwrap();
        db.add(Course::mandatory(db.next_key(), "Algebra"));
        db.save_changes(&cancellation).await.unwrap();
        assert_eq!(db.count::<Course>(), 1);

        let error = transaction.commit(&cancellation).await.unwrap_err();

        assert!(matches!(error, TransactionError::Trigger(TriggerError::Handler { .. })));
        assert_eq!(db.count::<Course>(), 0);
        assert_eq!(
            db.context().last_transaction_outcome(),
            Some(TransactionOutcome::RolledBack)
        );
        assert_eq!(journal.calls(), vec!["course:before_commit:Added"]);
    }

    #[tokio::test]
    async fn test_after_commit_failure_keeps_commit() {
        let journal = Journal::default();
        let configuration = TriggerConfiguration::builder(UnchangedEntityPolicy::Skip)
            .after_commit::<Course, RecordingTrigger>()
            .after_commit::<Course, RecordingTrigger<1>>()
            .activator::<RecordingTrigger, _>({
                let journal = journal.clone();
                move || RecordingTrigger::new("first", journal.clone()).failing_in(Phase::AfterCommit)
            })
            .activator::<RecordingTrigger<1>, _>(journal.activator("second"))
            .build();
        let service = Arc::new(TriggerService::new(Arc::new(configuration)));
        let db = TriggeredContext::new(Arc::new(InMemoryContext::new()), service.clone());
        let cancellation = CancellationToken::new();
        let transaction = db.begin_transaction(db.context().begin_transaction()).unwrap();
        db.add(Course::mandatory(db.next_key(), "Algebra"));
        db.save_changes(&cancellation).await.unwrap();

        let report = transaction.commit(&cancellation).await.unwrap();

        assert_eq!(report.after_commit_failures.len(), 1);
        assert!(!report.is_clean());
        assert_eq!(db.count::<Course>(), 1);
        assert_eq!(
            db.context().last_transaction_outcome(),
            Some(TransactionOutcome::Committed)
        );
        // best-effort: the second handler still ran
        assert_eq!(
            journal.calls(),
            vec!["first:after_commit:Added", "second:after_commit:Added"]
        );
        assert_eq!(service.stats().snapshot().after_commit_failures, 1);
    }

    #[tokio::test]
    async fn test_commit_failure_skips_after_commit() {
        let journal = Journal::default();
        let db = triggered(&journal);
        let cancellation = CancellationToken::new();
        let transaction = db.begin_transaction(db.context().begin_transaction()).unwrap();
        db.add(Course::mandatory(db.next_key(), "Algebra"));
        db.save_changes(&cancellation).await.unwrap();
        db.context().fail_next_commit();

        let error = transaction.commit(&cancellation).await.unwrap_err();

        assert!(matches!(error, TransactionError::Commit(_)));
        assert_eq!(journal.calls(), vec!["course:before_commit:Added"]);
        assert_eq!(db.count::<Course>(), 0);
    }

    #[tokio::test]
    async fn test_one_transaction_per_context() {
        let db = triggered(&Journal::default());
        let transaction = db.begin_transaction(db.context().begin_transaction()).unwrap();
        assert!(matches!(
            db.begin_transaction(db.context().begin_transaction()),
            Err(TransactionError::AlreadyActive)
        ));

        transaction.rollback().await.unwrap();
        assert!(db.begin_transaction(db.context().begin_transaction()).is_ok());
    }

    #[tokio::test]
    async fn test_added_then_deleted_is_not_committed() {
        let journal = Journal::default();
        let db = triggered(&journal);
        let cancellation = CancellationToken::new();
        let transaction = db.begin_transaction(db.context().begin_transaction()).unwrap();

        let course = db.add(Course::mandatory(db.next_key(), "Algebra"));
        db.save_changes(&cancellation).await.unwrap();
        db.remove(&course);
        db.save_changes(&cancellation).await.unwrap();

        let report = transaction.commit(&cancellation).await.unwrap();
        assert!(report.committed_changes.is_empty());
        assert!(journal.calls().is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_before_commit_rolls_back() {
        let journal = Journal::default();
        let db = triggered(&journal);
        let transaction = db.begin_transaction(db.context().begin_transaction()).unwrap();
        db.add(Course::mandatory(db.next_key(), "Algebra"));
        db.save_changes(&CancellationToken::new()).await.unwrap();

        let cancellation = CancellationToken::new();
        cancellation.cancel();
        let error = transaction.commit(&cancellation).await.unwrap_err();

        assert!(matches!(
            error,
            TransactionError::Trigger(TriggerError::Cancelled {
                phase: Phase::BeforeCommit
            })
        ));
        assert_eq!(db.count::<Course>(), 0);
    }

    #[tokio::test]
    async fn test_before_commit_cascades_over_changes_it_saves() {
        let journal = Journal::default();
        let db = Arc::new(InMemoryContext::new());
        let service = Arc::new_cyclic(|service: &Weak<TriggerService>| {
            let configuration = TriggerConfiguration::builder(UnchangedEntityPolicy::Skip)
                .before_commit::<Student, AddCourseOnCommit>()
                .before_commit::<Course, RecordingTrigger>()
                .after_commit::<Course, RecordingTrigger>()
                .activator::<RecordingTrigger, _>(journal.activator("course"))
                .activator::<AddCourseOnCommit, _>({
                    let db = db.clone();
                    let service = service.clone();
                    move || AddCourseOnCommit {
                        db: db.clone(),
                        service: service.clone(),
                    }
                })
                .build();
            TriggerService::new(Arc::new(configuration))
        });
        let triggered = TriggeredContext::new(db.clone(), service.clone());
        let cancellation = CancellationToken::new();
        let transaction = triggered.begin_transaction(db.begin_transaction()).unwrap();
        triggered.add(Student::new(triggered.next_key(), "Ada"));
        triggered.save_changes(&cancellation).await.unwrap();

        let report = transaction.commit(&cancellation).await.unwrap();

        assert!(report.is_clean());
        assert_eq!(report.committed_changes.len(), 2);
        assert_eq!(
            journal.calls(),
            vec!["course:before_commit:Added", "course:after_commit:Added"]
        );
        assert_eq!(db.count::<Course>(), 1);
        assert_eq!(
            db.last_transaction_outcome(),
            Some(TransactionOutcome::Committed)
        );
    }

    #[tokio::test]
    async fn test_runaway_before_commit_cascade_rolls_back() {
        let db = Arc::new(InMemoryContext::new());
        let service = Arc::new_cyclic(|service: &Weak<TriggerService>| {
            let configuration = TriggerConfiguration::builder(UnchangedEntityPolicy::Skip)
                .before_commit::<Course, AddCourseOnCommit>()
                .max_cascade_cycles(3)
                .activator::<AddCourseOnCommit, _>({
                    let db = db.clone();
                    let service = service.clone();
                    move || AddCourseOnCommit {
                        db: db.clone(),
                        service: service.clone(),
                    }
                })
                .build();
            TriggerService::new(Arc::new(configuration))
        });
        let triggered = TriggeredContext::new(db.clone(), service);
        let cancellation = CancellationToken::new();
        let transaction = triggered.begin_transaction(db.begin_transaction()).unwrap();
        triggered.add(Course::elective(triggered.next_key(), "Seed"));
        triggered.save_changes(&cancellation).await.unwrap();

        let error = transaction.commit(&cancellation).await.unwrap_err();

        assert!(matches!(
            error,
            TransactionError::Trigger(TriggerError::CascadeLimitExceeded { max_cycles: 3 })
        ));
        assert_eq!(db.count::<Course>(), 0);
        assert_eq!(
            db.last_transaction_outcome(),
            Some(TransactionOutcome::RolledBack)
        );
    }
}
