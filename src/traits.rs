//! Capability traits implemented by trigger handlers
//!
//! One single-method trait per phase, parameterized by entity type. Handlers
//! that have nothing to await simply return; there is no separate synchronous
//! contract.
//!
//! # Example
//!
//! ```rust,ignore
//! struct SignStudentUpForMandatoryCourses {
//!     db: Arc<InMemoryContext>,
//! }
//!
//! #[async_trait]
//! impl BeforeSaveTrigger<Student> for SignStudentUpForMandatoryCourses {
//!     async fn before_save(
//!         &self,
//!         context: &TriggerContext<Student>,
//!         _cancellation: &CancellationToken,
//!     ) -> anyhow::Result<()> {
//!         for course in self.db.query::<Course>().iter().filter(|c| c.is_mandatory) {
//!             self.db.add(StudentCourse {
//!                 student_id: context.entity().id,
//!                 course_id: course.id,
//!             });
//!         }
//!         Ok(())
//!     }
//! }
//! ```

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::{Entity, PersistError, TriggerContext};

/// Runs before changes are written; errors abort the save
#[async_trait]
pub trait BeforeSaveTrigger<E: Entity>: Send + Sync + 'static {
    /// Inspect or amend the pending change
    async fn before_save(
        &self,
        context: &TriggerContext<E>,
        cancellation: &CancellationToken,
    ) -> anyhow::Result<()>;
}

/// Runs after the write succeeded
#[async_trait]
pub trait AfterSaveTrigger<E: Entity>: Send + Sync + 'static {
    /// React to a persisted change
    async fn after_save(
        &self,
        context: &TriggerContext<E>,
        cancellation: &CancellationToken,
    ) -> anyhow::Result<()>;
}

/// Runs after the write failed, before the failure reaches the caller
#[async_trait]
pub trait AfterSaveFailedTrigger<E: Entity>: Send + Sync + 'static {
    /// Observe the failure; cannot suppress it
    async fn after_save_failed(
        &self,
        context: &TriggerContext<E>,
        error: &PersistError,
        cancellation: &CancellationToken,
    ) -> anyhow::Result<()>;
}

/// Runs right before the surrounding transaction commits; errors roll it back
#[async_trait]
pub trait BeforeCommitTrigger<E: Entity>: Send + Sync + 'static {
    /// Inspect a change about to be committed
    async fn before_commit(
        &self,
        context: &TriggerContext<E>,
        cancellation: &CancellationToken,
    ) -> anyhow::Result<()>;
}

/// Runs after the surrounding transaction committed.
///
/// Failures are reported and never undo the commit.
#[async_trait]
pub trait AfterCommitTrigger<E: Entity>: Send + Sync + 'static {
    /// React to a committed change
    async fn after_commit(
        &self,
        context: &TriggerContext<E>,
        cancellation: &CancellationToken,
    ) -> anyhow::Result<()>;
}
