//! Sequential trigger dispatch shared by sessions and transactions

use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use tokio_util::sync::CancellationToken;

use crate::adapter::HandlerRef;
use crate::{
    CascadeBehavior, ChangeRecord, ConfigurationError, DispatchLog, PersistError, Phase,
    ServiceProvider, SessionId, TriggerConfiguration, TriggerDescriptor, TriggerError,
    TriggerInvocation, TriggerStats,
};

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Resolve a handler: explicit provider first, then the configured activator
pub(crate) fn resolve_handler(
    configuration: &TriggerConfiguration,
    provider: Option<&dyn ServiceProvider>,
    descriptor: &TriggerDescriptor,
) -> Result<HandlerRef, ConfigurationError> {
    let handler = descriptor.handler_type();
    provider
        .and_then(|p| p.get_service(handler.id))
        .or_else(|| configuration.activator(handler.id).map(|activate| activate()))
        .ok_or(ConfigurationError::Unresolvable {
            handler: handler.name,
        })
}

/// Whether every registered handler can be resolved
pub(crate) fn check_resolvable(
    configuration: &TriggerConfiguration,
    provider: Option<&dyn ServiceProvider>,
) -> Result<(), ConfigurationError> {
    for descriptor in configuration.all_descriptors() {
        let handler = descriptor.handler_type();
        let known = provider.is_some_and(|p| p.contains(handler.id))
            || configuration.activator(handler.id).is_some();
        if !known {
            return Err(ConfigurationError::Unresolvable {
                handler: handler.name,
            });
        }
    }
    Ok(())
}

/// Runs the descriptors of one phase over change records, one handler at a
/// time, in registration order
pub(crate) struct Dispatcher<'a> {
    pub configuration: &'a TriggerConfiguration,
    pub provider: Option<&'a dyn ServiceProvider>,
    pub stats: &'a TriggerStats,
    pub session_id: Option<SessionId>,
}

impl<'a> Dispatcher<'a> {
    /// Dispatch every not-yet-dispatched record; the first failure of a
    /// handler awaited inline aborts the rest of the phase
    pub async fn run_phase(
        &self,
        phase: Phase,
        records: &[ChangeRecord],
        log: &Mutex<DispatchLog>,
        failure: Option<&PersistError>,
        cancellation: &CancellationToken,
    ) -> Result<(), TriggerError> {
        self.dispatch(phase, records, log, failure, cancellation)
            .await
            .map(|_reported| ())
    }

    /// Re-discover and dispatch until no pending change is left
    pub async fn run_cascading<F>(
        &self,
        phase: Phase,
        discover: F,
        log: &Mutex<DispatchLog>,
        cancellation: &CancellationToken,
    ) -> Result<(), TriggerError>
    where
        F: Fn() -> Vec<ChangeRecord> + Send + Sync,
    {
        let options = self.configuration.options();
        let mut cycle = 0;
        loop {
            let discovered = discover();
            let pending: Vec<ChangeRecord> = {
                let log = lock(log);
                discovered
                    .into_iter()
                    .filter(|r| {
                        options.is_dispatchable(r.kind) && log.is_pending(r.entry_id, phase, r.kind)
                    })
                    .collect()
            };
            if pending.is_empty() {
                return Ok(());
            }

            cycle += 1;
            if cycle > options.max_cascade_cycles {
                return Err(TriggerError::CascadeLimitExceeded {
                    max_cycles: options.max_cascade_cycles,
                });
            }
            self.stats.cascade_cycles.fetch_add(1, Ordering::Relaxed);
            self.configuration
                .observer()
                .on_cascade_cycle(phase, cycle, pending.len());

            self.run_phase(phase, &pending, log, None, cancellation)
                .await?;

            if options.cascade == CascadeBehavior::None {
                return Ok(());
            }
        }
    }

    /// Dispatch every record and descriptor, collecting failures instead of
    /// stopping at the first one
    pub async fn run_best_effort(
        &self,
        phase: Phase,
        records: &[ChangeRecord],
        log: &Mutex<DispatchLog>,
        cancellation: &CancellationToken,
    ) -> Vec<TriggerError> {
        match self.dispatch(phase, records, log, None, cancellation).await {
            Ok(reported) => reported,
            Err(error) => vec![error],
        }
    }

    /// Handlers whose adapter is awaited inline propagate their failure;
    /// the others are reported and the phase carries on.
    async fn dispatch(
        &self,
        phase: Phase,
        records: &[ChangeRecord],
        log: &Mutex<DispatchLog>,
        failure: Option<&PersistError>,
        cancellation: &CancellationToken,
    ) -> Result<Vec<TriggerError>, TriggerError> {
        let options = self.configuration.options();
        let mut reported = Vec::new();
        for record in records {
            if !options.is_dispatchable(record.kind) {
                continue;
            }
            let fresh = lock(log).check_and_mark(record.entry_id, phase, record.kind);
            if !fresh {
                continue;
            }
            for descriptor in self.configuration.descriptors(record.entity_type, phase) {
                let Err(error) = self.invoke(descriptor, record, failure, cancellation).await
                else {
                    continue;
                };
                if descriptor.adapter().awaited_inline() {
                    return Err(error);
                }
                self.stats
                    .after_commit_failures
                    .fetch_add(1, Ordering::Relaxed);
                self.configuration.observer().on_after_commit_failed(
                    &self.invocation(descriptor, record),
                    &error.to_string(),
                );
                reported.push(error);
            }
        }
        Ok(reported)
    }

    async fn invoke(
        &self,
        descriptor: &Arc<TriggerDescriptor>,
        record: &ChangeRecord,
        failure: Option<&PersistError>,
        cancellation: &CancellationToken,
    ) -> Result<(), TriggerError> {
        let phase = descriptor.phase();
        if phase.is_pre_write() && cancellation.is_cancelled() {
            return Err(TriggerError::Cancelled { phase });
        }

        let handler = resolve_handler(self.configuration, self.provider, descriptor)?;
        let call = descriptor.invoke(
            handler,
            record.entity.clone(),
            Some(record.kind),
            failure.cloned(),
            cancellation,
        )?;

        let observer = self.configuration.observer();
        let invocation = self.invocation(descriptor, record);
        observer.on_trigger_started(&invocation);
        self.stats.record_invocation(phase);
        let started = Instant::now();

        match call.await {
            Ok(()) => {
                observer.on_trigger_completed(&invocation, started.elapsed().as_millis() as u64);
                Ok(())
            }
            Err(source) => {
                self.stats.handler_failures.fetch_add(1, Ordering::Relaxed);
                observer.on_trigger_failed(&invocation, &format!("{source:#}"));
                Err(TriggerError::Handler {
                    phase,
                    entity_type: record.entity_type,
                    handler: descriptor.handler_type().name,
                    source,
                })
            }
        }
    }

    fn invocation(&self, descriptor: &TriggerDescriptor, record: &ChangeRecord) -> TriggerInvocation {
        TriggerInvocation {
            session_id: self.session_id,
            trigger_type: descriptor.trigger_type(),
            handler: descriptor.handler_type().name,
            entry_id: record.entry_id,
        }
    }
}
