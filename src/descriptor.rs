//! Trigger descriptors: one handler type bound to one entity type and phase

use std::any::TypeId;

use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;

use crate::adapter::{ErasedContext, HandlerRef, TriggerAdapter};
use crate::{ChangeKind, ConfigurationError, EntityRef, EntityType, PersistError, Phase};

/// The capability a handler must implement for one (phase, entity type) pair,
/// e.g. `BeforeSaveTrigger<Student>`
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct TriggerType {
    /// Phase of the capability
    pub phase: Phase,
    /// Entity type the capability is bound to
    pub entity_type: EntityType,
}

impl TriggerType {
    /// Bind a phase's capability shape to an entity type
    pub fn new(phase: Phase, entity_type: EntityType) -> Self {
        Self { phase, entity_type }
    }
}

impl std::fmt::Debug for TriggerType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "TriggerType({self})")
    }
}

impl std::fmt::Display for TriggerType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}<{}>", self.phase.capability(), self.entity_type)
    }
}

/// Runtime identity of a handler type
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct HandlerType {
    /// Type id of the handler
    pub id: TypeId,
    /// Type name of the handler
    pub name: &'static str,
}

impl HandlerType {
    /// Identity of `H`
    pub fn of<H: 'static>() -> Self {
        Self {
            id: TypeId::of::<H>(),
            name: std::any::type_name::<H>(),
        }
    }
}

/// Binds one handler type to one entity type and one phase.
///
/// Immutable and shared by every session built from the same configuration.
#[derive(Clone, Debug)]
pub struct TriggerDescriptor {
    entity_type: EntityType,
    handler_type: HandlerType,
    adapter: TriggerAdapter,
}

impl TriggerDescriptor {
    /// Create a descriptor from a phase adapter
    pub fn new(entity_type: EntityType, handler_type: HandlerType, adapter: TriggerAdapter) -> Self {
        Self {
            entity_type,
            handler_type,
            adapter,
        }
    }

    /// Phase this descriptor runs in
    pub fn phase(&self) -> Phase {
        self.adapter.phase()
    }

    /// Entity type this descriptor is bound to
    pub fn entity_type(&self) -> EntityType {
        self.entity_type
    }

    /// Handler type that gets resolved and invoked
    pub fn handler_type(&self) -> HandlerType {
        self.handler_type
    }

    /// Capability the handler must implement
    pub fn trigger_type(&self) -> TriggerType {
        TriggerType::new(self.phase(), self.entity_type)
    }

    /// Phase adapter
    pub fn adapter(&self) -> &TriggerAdapter {
        &self.adapter
    }

    /// Call the handler for one entity.
    ///
    /// Fails with a configuration error when `handler` is not the registered
    /// handler type; handler errors come back through the returned future.
    pub fn invoke(
        &self,
        handler: HandlerRef,
        entity: EntityRef,
        change_kind: Option<ChangeKind>,
        failure: Option<PersistError>,
        cancellation: &CancellationToken,
    ) -> Result<BoxFuture<'static, anyhow::Result<()>>, ConfigurationError> {
        let context = ErasedContext {
            entity,
            entity_type: self.entity_type,
            change_kind: change_kind.unwrap_or(ChangeKind::Unchanged),
            failure: failure.filter(|_| self.adapter.threads_error()),
        };
        self.adapter.execute(handler, context, cancellation.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BeforeCommitTrigger, TriggerContext};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Default)]
    struct AuditTrigger {
        before_commit: AtomicUsize,
        saw_failure: AtomicUsize,
    }

    #[async_trait]
    impl BeforeCommitTrigger<String> for AuditTrigger {
        async fn before_commit(
            &self,
            context: &TriggerContext<String>,
            _cancellation: &CancellationToken,
        ) -> anyhow::Result<()> {
            self.before_commit.fetch_add(1, Ordering::SeqCst);
            if context.failure().is_some() {
                self.saw_failure.fetch_add(1, Ordering::SeqCst);
            }
            Ok(())
        }
    }

    fn descriptor() -> TriggerDescriptor {
        TriggerDescriptor::new(
            EntityType::of::<String>(),
            HandlerType::of::<AuditTrigger>(),
            TriggerAdapter::before_commit::<String, AuditTrigger>(),
        )
    }

    #[test]
    fn test_trigger_type_is_constructed_from_phase_and_entity() {
        let subject = descriptor();
        assert_eq!(
            subject.trigger_type(),
            TriggerType::new(Phase::BeforeCommit, EntityType::of::<String>())
        );
        assert_eq!(subject.trigger_type().to_string(), "BeforeCommitTrigger<String>");
    }

    #[tokio::test]
    async fn test_invoke_forwards_call() {
        let trigger = Arc::new(AuditTrigger::default());
        let subject = descriptor();

        subject
            .invoke(
                trigger.clone(),
                Arc::new(String::from("row")),
                None,
                None,
                &CancellationToken::new(),
            )
            .unwrap()
            .await
            .unwrap();

        assert_eq!(trigger.before_commit.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_write_error_only_threaded_to_failure_phase() {
        let trigger = Arc::new(AuditTrigger::default());
        let failure = PersistError::new(anyhow::anyhow!("disk full"));

        descriptor()
            .invoke(
                trigger.clone(),
                Arc::new(String::from("row")),
                Some(ChangeKind::Added),
                Some(failure),
                &CancellationToken::new(),
            )
            .unwrap()
            .await
            .unwrap();

        assert_eq!(trigger.before_commit.load(Ordering::SeqCst), 1);
        assert_eq!(trigger.saw_failure.load(Ordering::SeqCst), 0);
    }
}
