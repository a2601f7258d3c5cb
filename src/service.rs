//! Trigger service: configuration holder and session factory

use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::dispatch::check_resolvable;
use crate::{
    ConfigurationError, PersistenceContext, ServiceProvider, SessionRegistry,
    TriggerConfiguration, TriggerSession, TriggerStats,
};

/// Holds the trigger configuration and builds one session per save.
///
/// Every [`TriggeredContext`](crate::TriggeredContext) built from the service
/// shares its [`SessionRegistry`], so two wrappers of the same persistence
/// context never run two sessions on it at once.
pub struct TriggerService {
    configuration: Arc<TriggerConfiguration>,
    stats: Arc<TriggerStats>,
    registry: Arc<SessionRegistry>,
}

impl TriggerService {
    pub fn new(configuration: Arc<TriggerConfiguration>) -> Self {
        Self {
            configuration,
            stats: Arc::new(TriggerStats::new()),
            registry: Arc::new(SessionRegistry::new()),
        }
    }

    pub fn configuration(&self) -> &Arc<TriggerConfiguration> {
        &self.configuration
    }

    pub fn stats(&self) -> &Arc<TriggerStats> {
        &self.stats
    }

    /// Active sessions and open transactions of every context saved through
    /// this service
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Session over the service's configuration.
    ///
    /// Handlers come from `provider` when it knows them, from the
    /// configuration's activators otherwise; a handler neither can build is a
    /// configuration error here, before any trigger runs.
    pub fn create_session(
        &self,
        context: Arc<dyn PersistenceContext>,
        provider: Option<Arc<dyn ServiceProvider>>,
    ) -> Result<Arc<TriggerSession>, ConfigurationError> {
        self.create_session_with_configuration(context, self.configuration.clone(), provider)
    }

    /// Session over an explicit configuration
    pub fn create_session_with_configuration(
        &self,
        context: Arc<dyn PersistenceContext>,
        configuration: Arc<TriggerConfiguration>,
        provider: Option<Arc<dyn ServiceProvider>>,
    ) -> Result<Arc<TriggerSession>, ConfigurationError> {
        check_resolvable(&configuration, provider.as_deref())?;

        let session = Arc::new(TriggerSession::new(
            context,
            configuration,
            provider,
            self.stats.clone(),
        ));
        self.stats.sessions_created.fetch_add(1, Ordering::Relaxed);
        session
            .configuration()
            .observer()
            .on_session_started(session.id(), session.context_id());
        Ok(session)
    }
}

impl std::fmt::Debug for TriggerService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TriggerService")
            .field("configuration", &self.configuration)
            .finish()
    }
}
