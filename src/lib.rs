//! Phased Triggers for Change-Tracking Persistence Contexts
//!
//! Runs user handlers at five points around a save: before the write, after
//! it succeeded, after it failed, and (inside a transaction) before and after
//! the commit. Handlers implement one single-method trait per phase and are
//! registered against an entity type.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! // 1. Register handlers once, at startup
//! let configuration = TriggerConfiguration::builder(UnchangedEntityPolicy::Skip)
//!     .before_save::<Student, SignStudentUpForMandatoryCourses>()
//!     .activator::<SignStudentUpForMandatoryCourses, _>(move || /* ... */)
//!     .build();
//! let service = Arc::new(TriggerService::new(Arc::new(configuration)));
//!
//! // 2. Wrap the persistence context
//! let db = TriggeredContext::new(Arc::new(InMemoryContext::new()), service);
//!
//! // 3. Save; triggers run around the write
//! db.add(Student::new(db.next_key(), "Ada"));
//! db.save_changes(&CancellationToken::new()).await?;
//!
//! // 4. Commit triggers run around a store transaction
//! let transaction = db.begin_transaction(db.context().begin_transaction())?;
//! db.save_changes(&cancellation).await?;
//! let report = transaction.commit(&cancellation).await?;
//! ```

#![warn(missing_docs)]

// === Core Types ===
mod context;
mod entity;
mod errors;
mod phase;
mod state;

// === Traits ===
mod persistence;
mod traits;

// === Dispatch ===
mod adapter;
mod configuration;
mod dedupe;
mod descriptor;
mod discovery;
mod dispatch;
mod provider;

// === Sessions ===
mod registry;
mod service;
mod session;
mod transaction;
mod triggered;

// === Storage ===
mod memory;

// === Observability ===
mod observer;
mod stats;

#[cfg(test)]
mod fixtures;

// === Re-exports ===

// Types
pub use context::{ContextId, EntryId, SessionId, TriggerContext};
pub use entity::{Entity, EntityRef, EntityType};
pub use phase::Phase;
pub use state::SessionState;

// Errors
pub use errors::{ConfigurationError, PersistError, SaveError, TransactionError, TriggerError};

// Traits
pub use persistence::{AutoDetectChangesGuard, PersistenceContext, TrackedEntry};
pub use traits::{
    AfterCommitTrigger, AfterSaveFailedTrigger, AfterSaveTrigger, BeforeCommitTrigger,
    BeforeSaveTrigger,
};

// Dispatch
pub use adapter::{ErasedContext, HandlerRef, TriggerAdapter};
pub use configuration::{
    Activator, CascadeBehavior, TriggerConfiguration, TriggerConfigurationBuilder,
    TriggerOptions, UnchangedEntityPolicy,
};
pub use dedupe::DispatchLog;
pub use descriptor::{HandlerType, TriggerDescriptor, TriggerType};
pub use discovery::{discover_changes, ChangeKind, ChangeRecord};
pub use provider::{ServiceCollection, ServiceProvider};

// Sessions
pub use registry::{SessionLease, SessionRegistry};
pub use service::TriggerService;
pub use session::TriggerSession;
pub use transaction::{CommitReport, TransactionBoundary, TriggeredTransaction};
pub use triggered::TriggeredContext;

// Storage
pub use memory::{InMemoryContext, InMemoryTransaction, StoreFailure, TransactionOutcome};

// Observability
pub use observer::{NoOpObserver, TracingObserver, TriggerInvocation, TriggerObserver};
pub use stats::{TriggerStats, TriggerStatsSnapshot};
