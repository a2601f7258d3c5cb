//! Triggered persistence context: the save call with triggers around it

use std::ops::Deref;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::{
    AutoDetectChangesGuard, PersistError, PersistenceContext, SaveError, ServiceProvider,
    SessionRegistry, TransactionBoundary, TransactionError, TriggerError, TriggerService,
    TriggerSession, TriggeredTransaction,
};

/// Wraps a persistence context so every save runs its triggers.
///
/// Cheap to clone. Wrappers of the same context built from the same
/// [`TriggerService`] share its session registry, so a handler can save again
/// from inside a trigger, through a clone or a wrapper of its own, and join
/// the running session.
pub struct TriggeredContext<C: PersistenceContext> {
    context: Arc<C>,
    service: Arc<TriggerService>,
    provider: Option<Arc<dyn ServiceProvider>>,
    registry: Arc<SessionRegistry>,
}

impl<C: PersistenceContext> TriggeredContext<C> {
    pub fn new(context: Arc<C>, service: Arc<TriggerService>) -> Self {
        let registry = service.registry().clone();
        Self {
            context,
            service,
            provider: None,
            registry,
        }
    }

    /// Resolve handlers through `provider` before falling back to activators
    pub fn with_service_provider(mut self, provider: Arc<dyn ServiceProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Track sessions in `registry` instead of the service's own
    pub fn with_registry(mut self, registry: Arc<SessionRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn context(&self) -> &Arc<C> {
        &self.context
    }

    pub fn service(&self) -> &Arc<TriggerService> {
        &self.service
    }

    pub fn provider(&self) -> Option<&Arc<dyn ServiceProvider>> {
        self.provider.as_ref()
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Session of the save currently running on this context, if any
    pub fn active_session(&self) -> Option<Arc<TriggerSession>> {
        self.registry.active(self.context.context_id())
    }

    /// Save pending changes with triggers.
    ///
    /// Before-save triggers run first, cascading over the changes they make.
    /// The resulting change set is captured, then written. On success
    /// after-save triggers run over the captured set; on failure
    /// after-save-failed triggers run and the write error is returned as is.
    /// Automatic change detection is off from the first trigger until the
    /// write returns.
    ///
    /// Called from inside a trigger, joins the running session instead of
    /// starting a new one.
    pub async fn save_changes(&self, cancellation: &CancellationToken) -> Result<usize, SaveError> {
        let context_id = self.context.context_id();
        let lease = self
            .registry
            .acquire(context_id, || {
                self.service
                    .create_session(self.context.clone(), self.provider.clone())
            })
            .map_err(TriggerError::from)?;
        let session = lease.session().clone();

        if lease.created() {
            tracing::debug!(session_id = %session.id(), context_id = %context_id, "Save started");
        } else {
            self.service
                .stats()
                .sessions_reused
                .fetch_add(1, Ordering::Relaxed);
            session
                .configuration()
                .observer()
                .on_session_reused(session.id(), context_id);
        }

        let written = {
            let _guard = AutoDetectChangesGuard::disable(&*self.context);
            session.raise_before_save_triggers(cancellation).await?;
            session.capture_discovered_changes();
            session.begin_persist();

            match self.context.persist_changes().await {
                Ok(written) => written,
                Err(error) => {
                    let error = PersistError::new(error);
                    tracing::debug!(session_id = %session.id(), error = %error, "Write failed");
                    if let Err(trigger_error) = session
                        .raise_after_save_failed_triggers(&error, cancellation)
                        .await
                    {
                        tracing::warn!(
                            session_id = %session.id(),
                            error = %trigger_error,
                            "After-save-failed trigger failed; returning the write error"
                        );
                    }
                    return Err(SaveError::Persist(error));
                }
            }
        };

        self.registry
            .record_saved(context_id, &session.discovered_changes());
        session.raise_after_save_triggers(cancellation).await?;
        Ok(written)
    }

    /// Attach commit triggers to a store transaction on this context
    pub fn begin_transaction<T: TransactionBoundary>(
        &self,
        transaction: T,
    ) -> Result<TriggeredTransaction<C, T>, TransactionError> {
        if !self.registry.open_transaction(self.context.context_id()) {
            return Err(TransactionError::AlreadyActive);
        }
        Ok(TriggeredTransaction::new(self.clone(), transaction))
    }
}

impl<C: PersistenceContext> Clone for TriggeredContext<C> {
    fn clone(&self) -> Self {
        Self {
            context: self.context.clone(),
            service: self.service.clone(),
            provider: self.provider.clone(),
            registry: self.registry.clone(),
        }
    }
}

impl<C: PersistenceContext> Deref for TriggeredContext<C> {
    type Target = C;

    fn deref(&self) -> &C {
        &self.context
    }
}
