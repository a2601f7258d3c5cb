//! Phase-specific invocation strategies
//!
//! An adapter turns an opaque handler and an opaque context into a call of the
//! phase's single trait method. The typed call is captured once, at
//! registration, in a closure; dispatch only matches on the phase tag.

use std::any::Any;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use tokio_util::sync::CancellationToken;

use crate::{
    AfterCommitTrigger, AfterSaveFailedTrigger, AfterSaveTrigger, BeforeCommitTrigger,
    BeforeSaveTrigger, ChangeKind, ConfigurationError, Entity, EntityRef, EntityType,
    PersistError, Phase, TriggerContext, TriggerType,
};

/// Type-erased handler instance
pub type HandlerRef = Arc<dyn Any + Send + Sync>;

/// Type-erased trigger context
#[derive(Clone)]
pub struct ErasedContext {
    /// The entity
    pub entity: EntityRef,
    /// Runtime type of the entity
    pub entity_type: EntityType,
    /// Change being dispatched
    pub change_kind: ChangeKind,
    /// Write error, for the after-save-failed phase
    pub failure: Option<PersistError>,
}

type Invoke = Arc<
    dyn Fn(
            HandlerRef,
            ErasedContext,
            CancellationToken,
        ) -> Result<BoxFuture<'static, anyhow::Result<()>>, ConfigurationError>
        + Send
        + Sync,
>;

/// Invocation strategy for one phase
#[derive(Clone)]
pub enum TriggerAdapter {
    /// Calls `BeforeSaveTrigger::before_save`
    BeforeSave(Invoke),
    /// Calls `AfterSaveTrigger::after_save`
    AfterSave(Invoke),
    /// Calls `AfterSaveFailedTrigger::after_save_failed`
    AfterSaveFailed(Invoke),
    /// Calls `BeforeCommitTrigger::before_commit`
    BeforeCommit(Invoke),
    /// Calls `AfterCommitTrigger::after_commit`
    AfterCommit(Invoke),
}

impl TriggerAdapter {
    /// Adapter for `H: BeforeSaveTrigger<E>`
    pub fn before_save<E: Entity, H: BeforeSaveTrigger<E>>() -> Self {
        Self::BeforeSave(bind::<E, H, _>(Phase::BeforeSave, |handler, context, cancellation| {
            async move { handler.before_save(&context, &cancellation).await }.boxed()
        }))
    }

    /// Adapter for `H: AfterSaveTrigger<E>`
    pub fn after_save<E: Entity, H: AfterSaveTrigger<E>>() -> Self {
        Self::AfterSave(bind::<E, H, _>(Phase::AfterSave, |handler, context, cancellation| {
            async move { handler.after_save(&context, &cancellation).await }.boxed()
        }))
    }

    /// Adapter for `H: AfterSaveFailedTrigger<E>`
    pub fn after_save_failed<E: Entity, H: AfterSaveFailedTrigger<E>>() -> Self {
        Self::AfterSaveFailed(bind::<E, H, _>(
            Phase::AfterSaveFailed,
            |handler, context, cancellation| {
                async move {
                    let error = context.failure().cloned().ok_or_else(|| {
                        anyhow::anyhow!("after_save_failed dispatched without a write error")
                    })?;
                    handler
                        .after_save_failed(&context, &error, &cancellation)
                        .await
                }
                .boxed()
            },
        ))
    }

    /// Adapter for `H: BeforeCommitTrigger<E>`
    pub fn before_commit<E: Entity, H: BeforeCommitTrigger<E>>() -> Self {
        Self::BeforeCommit(bind::<E, H, _>(Phase::BeforeCommit, |handler, context, cancellation| {
            async move { handler.before_commit(&context, &cancellation).await }.boxed()
        }))
    }

    /// Adapter for `H: AfterCommitTrigger<E>`
    pub fn after_commit<E: Entity, H: AfterCommitTrigger<E>>() -> Self {
        Self::AfterCommit(bind::<E, H, _>(Phase::AfterCommit, |handler, context, cancellation| {
            async move { handler.after_commit(&context, &cancellation).await }.boxed()
        }))
    }

    /// Phase this adapter serves
    pub fn phase(&self) -> Phase {
        match self {
            Self::BeforeSave(_) => Phase::BeforeSave,
            Self::AfterSave(_) => Phase::AfterSave,
            Self::AfterSaveFailed(_) => Phase::AfterSaveFailed,
            Self::BeforeCommit(_) => Phase::BeforeCommit,
            Self::AfterCommit(_) => Phase::AfterCommit,
        }
    }

    /// Trait method the adapter calls
    pub fn method_name(&self) -> &'static str {
        match self {
            Self::BeforeSave(_) => "before_save",
            Self::AfterSave(_) => "after_save",
            Self::AfterSaveFailed(_) => "after_save_failed",
            Self::BeforeCommit(_) => "before_commit",
            Self::AfterCommit(_) => "after_commit",
        }
    }

    /// Whether the write error is passed to the handler
    pub fn threads_error(&self) -> bool {
        matches!(self, Self::AfterSaveFailed(_))
    }

    /// Whether the handler's outcome decides the surrounding operation.
    ///
    /// After-commit handlers are still awaited before the transaction scope
    /// closes, but their outcome cannot change the commit.
    pub fn awaited_inline(&self) -> bool {
        !matches!(self, Self::AfterCommit(_))
    }

    /// Start the handler call. Handler errors are not caught here.
    pub fn execute(
        &self,
        handler: HandlerRef,
        context: ErasedContext,
        cancellation: CancellationToken,
    ) -> Result<BoxFuture<'static, anyhow::Result<()>>, ConfigurationError> {
        let invoke = match self {
            Self::BeforeSave(invoke)
            | Self::AfterSave(invoke)
            | Self::AfterSaveFailed(invoke)
            | Self::BeforeCommit(invoke)
            | Self::AfterCommit(invoke) => invoke,
        };
        invoke(handler, context, cancellation)
    }
}

impl std::fmt::Debug for TriggerAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "TriggerAdapter({})", self.method_name())
    }
}

fn bind<E, H, F>(phase: Phase, call: F) -> Invoke
where
    E: Entity,
    H: Send + Sync + 'static,
    F: Fn(Arc<H>, TriggerContext<E>, CancellationToken) -> BoxFuture<'static, anyhow::Result<()>>
        + Send
        + Sync
        + 'static,
{
    Arc::new(
        move |handler: HandlerRef,
              context: ErasedContext,
              cancellation: CancellationToken|
              -> Result<BoxFuture<'static, anyhow::Result<()>>, ConfigurationError> {
            let expected = EntityType::of::<E>();
            let handler =
                handler
                    .downcast::<H>()
                    .map_err(|_| ConfigurationError::CapabilityMismatch {
                        expected: TriggerType::new(phase, expected),
                        handler: std::any::type_name::<H>(),
                    })?;
            let entity = context
                .entity
                .downcast::<E>()
                .map_err(|_| ConfigurationError::EntityMismatch { expected })?;
            let typed =
                TriggerContext::new(entity, expected, context.change_kind, context.failure);
            Ok(call(handler, typed, cancellation))
        },
    )
}
