//! Trigger session: one save operation, end to end

use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;

use crate::dispatch::{lock, Dispatcher};
use crate::{
    discover_changes, ChangeRecord, ContextId, DispatchLog, PersistError, PersistenceContext,
    Phase, ServiceProvider, SessionId, SessionState, TriggerConfiguration, TriggerError,
    TriggerStats,
};

/// Orchestrates the trigger phases of one save operation on one persistence
/// context.
///
/// Nested saves issued by triggers on the same context reuse the session (see
/// [`SessionRegistry`](crate::SessionRegistry)); its dispatch log keeps them
/// from running a handler twice for the same change.
pub struct TriggerSession {
    id: SessionId,
    context_id: ContextId,
    context: Arc<dyn PersistenceContext>,
    configuration: Arc<TriggerConfiguration>,
    provider: Option<Arc<dyn ServiceProvider>>,
    stats: Arc<TriggerStats>,
    state: Mutex<SessionState>,
    discovered: Mutex<Option<Vec<ChangeRecord>>>,
    log: Mutex<DispatchLog>,
}

impl TriggerSession {
    pub(crate) fn new(
        context: Arc<dyn PersistenceContext>,
        configuration: Arc<TriggerConfiguration>,
        provider: Option<Arc<dyn ServiceProvider>>,
        stats: Arc<TriggerStats>,
    ) -> Self {
        let log = DispatchLog::new(configuration.options().cascade);
        Self {
            id: SessionId::next(),
            context_id: context.context_id(),
            context,
            configuration,
            provider,
            stats,
            state: Mutex::new(SessionState::Idle),
            discovered: Mutex::new(None),
            log: Mutex::new(log),
        }
    }

    /// Session identity
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Context the session works on
    pub fn context_id(&self) -> ContextId {
        self.context_id
    }

    /// Current state
    pub fn state(&self) -> SessionState {
        *lock(&self.state)
    }

    /// Configuration the session dispatches from
    pub fn configuration(&self) -> &Arc<TriggerConfiguration> {
        &self.configuration
    }

    /// The captured final snapshot; empty before capture
    pub fn discovered_changes(&self) -> Vec<ChangeRecord> {
        lock(&self.discovered).clone().unwrap_or_default()
    }

    /// Run before-save triggers for every pending change, re-discovering
    /// after each pass so changes made by the triggers get their own
    /// before-save triggers. The first failure aborts the phase.
    pub async fn raise_before_save_triggers(
        &self,
        cancellation: &CancellationToken,
    ) -> Result<(), TriggerError> {
        self.transition(SessionState::BeforeTriggersRunning);
        let context = self.context.as_ref();
        self.dispatcher()
            .run_cascading(
                Phase::BeforeSave,
                || discover_changes(context),
                &self.log,
                cancellation,
            )
            .await
    }

    /// Freeze the current changes as the snapshot after-phase triggers see.
    ///
    /// Must run after before-save triggers and before the write, which
    /// resets change state.
    pub fn capture_discovered_changes(&self) {
        let records = discover_changes(self.context.as_ref());
        tracing::debug!(session_id = %self.id, changes = records.len(), "Captured discovered changes");
        *lock(&self.discovered) = Some(records);
        self.transition(SessionState::Captured);
    }

    pub(crate) fn begin_persist(&self) {
        self.transition(SessionState::PersistInFlight);
    }

    /// Run after-save triggers over the captured snapshot
    pub async fn raise_after_save_triggers(
        &self,
        cancellation: &CancellationToken,
    ) -> Result<(), TriggerError> {
        self.transition(SessionState::AfterTriggersRunning);
        let records = self.discovered_changes();
        self.dispatcher()
            .run_phase(Phase::AfterSave, &records, &self.log, None, cancellation)
            .await
    }

    /// Run after-save-failed triggers over the captured snapshot, handing each
    /// the write error. The caller still owns returning `error`.
    pub async fn raise_after_save_failed_triggers(
        &self,
        error: &PersistError,
        cancellation: &CancellationToken,
    ) -> Result<(), TriggerError> {
        self.transition(SessionState::AfterFailedTriggersRunning);
        let records = self.discovered_changes();
        self.dispatcher()
            .run_phase(
                Phase::AfterSaveFailed,
                &records,
                &self.log,
                Some(error),
                cancellation,
            )
            .await
    }

    /// Move to `Done` and release captured records
    pub(crate) fn complete(&self) {
        self.transition(SessionState::Done);
        lock(&self.discovered).take();
        lock(&self.log).clear();
        self.configuration
            .observer()
            .on_session_completed(self.id, self.context_id);
    }

    fn transition(&self, next: SessionState) {
        let mut state = lock(&self.state);
        if !state.can_transition(next) {
            tracing::warn!(
                session_id = %self.id,
                from = ?*state,
                to = ?next,
                "Unexpected trigger session transition"
            );
        }
        tracing::trace!(session_id = %self.id, from = ?*state, to = ?next, "Session transition");
        *state = next;
    }

    fn dispatcher(&self) -> Dispatcher<'_> {
        Dispatcher {
            configuration: &self.configuration,
            provider: self.provider.as_deref(),
            stats: &self.stats,
            session_id: Some(self.id),
        }
    }
}

impl std::fmt::Debug for TriggerSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TriggerSession")
            .field("id", &self.id)
            .field("context_id", &self.context_id)
            .field("state", &self.state())
            .finish()
    }
}
