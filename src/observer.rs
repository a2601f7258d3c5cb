//! Trigger observer trait

use crate::{ContextId, EntryId, Phase, SessionId, TriggerType};

/// One handler call, as reported to observers
#[derive(Clone, Copy, Debug)]
pub struct TriggerInvocation {
    /// Session dispatching the call; `None` for transaction-scoped phases
    pub session_id: Option<SessionId>,
    /// Capability being invoked
    pub trigger_type: TriggerType,
    /// Handler type name
    pub handler: &'static str,
    /// Tracked entry the call is for
    pub entry_id: EntryId,
}

impl TriggerInvocation {
    /// Phase of the call
    pub fn phase(&self) -> Phase {
        self.trigger_type.phase
    }
}

/// Observer trait for external observability
pub trait TriggerObserver: Send + Sync + 'static {
    fn on_session_started(&self, session: SessionId, context: ContextId);
    fn on_session_reused(&self, session: SessionId, context: ContextId);
    fn on_session_completed(&self, session: SessionId, context: ContextId);
    fn on_trigger_started(&self, invocation: &TriggerInvocation);
    fn on_trigger_completed(&self, invocation: &TriggerInvocation, duration_millis: u64);
    fn on_trigger_failed(&self, invocation: &TriggerInvocation, error: &str);
    fn on_cascade_cycle(&self, phase: Phase, cycle: usize, pending: usize);
    fn on_after_commit_failed(&self, invocation: &TriggerInvocation, error: &str);
}

/// No-op observer
pub struct NoOpObserver;

impl TriggerObserver for NoOpObserver {
    fn on_session_started(&self, _session: SessionId, _context: ContextId) {}
    fn on_session_reused(&self, _session: SessionId, _context: ContextId) {}
    fn on_session_completed(&self, _session: SessionId, _context: ContextId) {}
    fn on_trigger_started(&self, _invocation: &TriggerInvocation) {}
    fn on_trigger_completed(&self, _invocation: &TriggerInvocation, _duration_millis: u64) {}
    fn on_trigger_failed(&self, _invocation: &TriggerInvocation, _error: &str) {}
    fn on_cascade_cycle(&self, _phase: Phase, _cycle: usize, _pending: usize) {}
    fn on_after_commit_failed(&self, _invocation: &TriggerInvocation, _error: &str) {}
}

/// Tracing-based observer
pub struct TracingObserver;

impl TriggerObserver for TracingObserver {
    fn on_session_started(&self, session: SessionId, context: ContextId) {
        tracing::info!(session_id = %session, context_id = %context, "Trigger session started");
    }

    fn on_session_reused(&self, session: SessionId, context: ContextId) {
        tracing::debug!(session_id = %session, context_id = %context, "Trigger session reused by nested save");
    }

    fn on_session_completed(&self, session: SessionId, context: ContextId) {
        tracing::info!(session_id = %session, context_id = %context, "Trigger session completed");
    }

    fn on_trigger_started(&self, invocation: &TriggerInvocation) {
        tracing::debug!(
            phase = %invocation.phase(),
            trigger = %invocation.trigger_type,
            handler = invocation.handler,
            entry = invocation.entry_id.0,
            "Trigger started"
        );
    }

    fn on_trigger_completed(&self, invocation: &TriggerInvocation, duration_millis: u64) {
        tracing::debug!(
            phase = %invocation.phase(),
            handler = invocation.handler,
            duration_ms = duration_millis,
            "Trigger completed"
        );
    }

    fn on_trigger_failed(&self, invocation: &TriggerInvocation, error: &str) {
        tracing::warn!(
            phase = %invocation.phase(),
            trigger = %invocation.trigger_type,
            handler = invocation.handler,
            error = %error,
            "Trigger failed"
        );
    }

    fn on_cascade_cycle(&self, phase: Phase, cycle: usize, pending: usize) {
        tracing::debug!(phase = %phase, cycle, pending, "Trigger cascade cycle");
    }

    fn on_after_commit_failed(&self, invocation: &TriggerInvocation, error: &str) {
        tracing::error!(
            trigger = %invocation.trigger_type,
            handler = invocation.handler,
            error = %error,
            "After-commit trigger failed; commit stands"
        );
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::fixtures::{Course, Journal, RecordingTrigger};
    use crate::{
        InMemoryContext, TriggerConfiguration, TriggerService, TriggeredContext,
        UnchangedEntityPolicy,
    };

    #[derive(Default)]
    struct CountingObserver {
        started: AtomicUsize,
        completed: AtomicUsize,
        failed: AtomicUsize,
        sessions: AtomicUsize,
    }

    impl TriggerObserver for CountingObserver {
        fn on_session_started(&self, _session: SessionId, _context: ContextId) {
            self.sessions.fetch_add(1, Ordering::SeqCst);
        }
        fn on_session_reused(&self, _session: SessionId, _context: ContextId) {}
        fn on_session_completed(&self, _session: SessionId, _context: ContextId) {}
        fn on_trigger_started(&self, _invocation: &TriggerInvocation) {
            self.started.fetch_add(1, Ordering::SeqCst);
        }
        fn on_trigger_completed(&self, _invocation: &TriggerInvocation, _duration_millis: u64) {
            self.completed.fetch_add(1, Ordering::SeqCst);
        }
        fn on_trigger_failed(&self, _invocation: &TriggerInvocation, _error: &str) {
            self.failed.fetch_add(1, Ordering::SeqCst);
        }
        fn on_cascade_cycle(&self, _phase: Phase, _cycle: usize, _pending: usize) {}
        fn on_after_commit_failed(&self, _invocation: &TriggerInvocation, _error: &str) {}
    }

    fn triggered(
        observer: Arc<dyn TriggerObserver>,
        journal: &Journal,
    ) -> TriggeredContext<InMemoryContext> {
        let configuration = TriggerConfiguration::builder(UnchangedEntityPolicy::Skip)
            .before_save::<Course, RecordingTrigger>()
            .after_save::<Course, RecordingTrigger<1>>()
            .activator::<RecordingTrigger, _>(journal.activator("before"))
            .activator::<RecordingTrigger<1>, _>({
                let journal = journal.clone();
                move || {
                    RecordingTrigger::<1>::slot("after", journal.clone())
                        .failing_in(Phase::AfterSave)
                }
            })
            .observer(observer)
            .build();
        TriggeredContext::new(
            Arc::new(InMemoryContext::new()),
            Arc::new(TriggerService::new(Arc::new(configuration))),
        )
    }

    #[tokio::test]
    async fn test_observer_sees_every_invocation() {
        let observer = Arc::new(CountingObserver::default());
        let db = triggered(observer.clone(), &Journal::default());
        db.add(Course::mandatory(db.next_key(), "Algebra"));

        assert!(db.save_changes(&CancellationToken::new()).await.is_err());

        assert_eq!(observer.sessions.load(Ordering::SeqCst), 1);
        assert_eq!(observer.started.load(Ordering::SeqCst), 2);
        assert_eq!(observer.completed.load(Ordering::SeqCst), 1);
        assert_eq!(observer.failed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_tracing_observer() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
        let journal = Journal::default();
        let db = triggered(Arc::new(TracingObserver), &journal);
        db.add(Course::mandatory(db.next_key(), "Algebra"));

        assert!(db.save_changes(&CancellationToken::new()).await.is_err());
        assert_eq!(
            journal.calls(),
            vec!["before:before_save:Added", "after:after_save:Added"]
        );
    }
}
