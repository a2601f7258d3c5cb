//! Error types for trigger dispatch, saves and commits

use std::sync::Arc;

use crate::{EntityType, Phase, TriggerType};

/// Setup bug: a descriptor cannot obtain a handler that fits it
#[derive(Debug, thiserror::Error)]
pub enum ConfigurationError {
    /// Neither the service provider nor an activator knows the handler
    #[error("No service provider entry or activator for trigger handler {handler}")]
    Unresolvable {
        /// Handler type name
        handler: &'static str,
    },
    /// The resolved instance is not the handler type the descriptor expects
    #[error("Resolved handler does not implement {expected} (registered as {handler})")]
    CapabilityMismatch {
        /// Capability the descriptor invokes
        expected: TriggerType,
        /// Handler type name
        handler: &'static str,
    },
    /// A change record of another entity type reached the descriptor
    #[error("Change record is not a {expected}")]
    EntityMismatch {
        /// Entity type the descriptor is bound to
        expected: EntityType,
    },
}

/// Failure raised while running triggers
#[derive(Debug, thiserror::Error)]
pub enum TriggerError {
    /// Handler could not be resolved or does not fit
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    /// A handler returned an error; displays as the handler's own error
    #[error("{source}")]
    Handler {
        /// Phase being dispatched
        phase: Phase,
        /// Entity type of the change record
        entity_type: EntityType,
        /// Handler type name
        handler: &'static str,
        /// Error returned by the handler
        #[source]
        source: anyhow::Error,
    },
    /// Before-phase triggers kept producing new changes
    #[error("Trigger cascade did not settle within {max_cycles} cycles")]
    CascadeLimitExceeded {
        /// Configured cycle limit
        max_cycles: usize,
    },
    /// Cancellation was requested before a pre-write trigger started
    #[error("Cancelled before {phase} trigger")]
    Cancelled {
        /// Phase that was interrupted
        phase: Phase,
    },
}

impl TriggerError {
    /// Error returned by the handler, if this is a handler failure
    pub fn handler_error(&self) -> Option<&anyhow::Error> {
        match self {
            Self::Handler { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Error reported by the underlying persistence layer.
///
/// Cheap to clone; every clone refers to the same underlying error, so the
/// value observed by after-save-failed triggers is the value returned to the
/// caller.
#[derive(Clone)]
pub struct PersistError(Arc<anyhow::Error>);

impl PersistError {
    /// Wrap a persistence layer error
    pub fn new(error: impl Into<anyhow::Error>) -> Self {
        Self(Arc::new(error.into()))
    }

    /// Whether both values carry the same underlying error
    pub fn ptr_eq(&self, other: &PersistError) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Access the original error by type
    pub fn downcast_ref<E>(&self) -> Option<&E>
    where
        E: std::fmt::Display + std::fmt::Debug + Send + Sync + 'static,
    {
        self.0.downcast_ref::<E>()
    }

    /// The wrapped error
    pub fn inner(&self) -> &anyhow::Error {
        &self.0
    }
}

impl std::fmt::Debug for PersistError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(&*self.0, f)
    }
}

impl std::fmt::Display for PersistError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(&*self.0, f)
    }
}

impl std::error::Error for PersistError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.0.source()
    }
}

/// Error from a triggered save
#[derive(Debug, thiserror::Error)]
pub enum SaveError {
    /// A trigger failed; see the phase inside for whether the write happened
    #[error(transparent)]
    Trigger(#[from] TriggerError),
    /// The write itself failed, returned unchanged
    #[error(transparent)]
    Persist(PersistError),
}

impl SaveError {
    /// The persistence error, if the write failed
    pub fn as_persist(&self) -> Option<&PersistError> {
        match self {
            Self::Persist(e) => Some(e),
            Self::Trigger(_) => None,
        }
    }

    /// The trigger error, if a trigger failed
    pub fn as_trigger(&self) -> Option<&TriggerError> {
        match self {
            Self::Trigger(e) => Some(e),
            Self::Persist(_) => None,
        }
    }
}

/// Error from a triggered transaction
#[derive(Debug, thiserror::Error)]
pub enum TransactionError {
    /// A triggered transaction is already open on this context
    #[error("A triggered transaction is already active on this context")]
    AlreadyActive,
    /// A before-commit trigger failed; the transaction was rolled back
    #[error(transparent)]
    Trigger(#[from] TriggerError),
    /// Commit failed
    #[error("Commit failed: {0}")]
    Commit(PersistError),
    /// Rollback failed
    #[error("Rollback failed: {0}")]
    Rollback(PersistError),
}
