//! Shared entities and handlers for tests

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::{
    AfterCommitTrigger, AfterSaveFailedTrigger, AfterSaveTrigger, BeforeCommitTrigger,
    BeforeSaveTrigger, Entity, PersistError, Phase, TriggerContext,
};

#[derive(Debug, Clone, PartialEq)]
pub struct Student {
    pub id: u64,
    pub name: &'static str,
}

impl Student {
    pub fn new(id: u64, name: &'static str) -> Self {
        Self { id, name }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Course {
    pub id: u64,
    pub title: &'static str,
    pub is_mandatory: bool,
}

impl Course {
    pub fn mandatory(id: u64, title: &'static str) -> Self {
        Self {
            id,
            title,
            is_mandatory: true,
        }
    }

    pub fn elective(id: u64, title: &'static str) -> Self {
        Self {
            id,
            title,
            is_mandatory: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StudentCourse {
    pub student_id: u64,
    pub course_id: u64,
}

/// Ordered record of handler calls, shared by every handler built from it
#[derive(Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
    pub fn push(&self, line: String) {
        self.0.lock().unwrap().push(line);
    }

    pub fn calls(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    /// Activator building a recorder that writes to this journal
    pub fn activator<const SLOT: usize>(
        &self,
        label: &'static str,
    ) -> impl Fn() -> RecordingTrigger<SLOT> + Send + Sync + 'static {
        let journal = self.clone();
        move || RecordingTrigger::slot(label, journal.clone())
    }
}

/// Handler implementing every phase for every entity type; records
/// `label:phase:Kind` and optionally fails in one phase.
///
/// `SLOT` only distinguishes handler types, so several recorders can be
/// registered for the same entity and phase.
#[derive(Clone)]
pub struct RecordingTrigger<const SLOT: usize = 0> {
    label: &'static str,
    journal: Journal,
    fail_in: Option<Phase>,
}

impl RecordingTrigger {
    pub fn new(label: &'static str, journal: Journal) -> Self {
        Self::slot(label, journal)
    }
}

impl<const SLOT: usize> RecordingTrigger<SLOT> {
    pub fn slot(label: &'static str, journal: Journal) -> Self {
        Self {
            label,
            journal,
            fail_in: None,
        }
    }

    pub fn failing_in(mut self, phase: Phase) -> Self {
        self.fail_in = Some(phase);
        self
    }

    fn record<E>(&self, phase: Phase, context: &TriggerContext<E>) -> anyhow::Result<()> {
        self.journal
            .push(format!("{}:{}:{:?}", self.label, phase, context.change_kind()));
        if self.fail_in == Some(phase) {
            anyhow::bail!("{} refused {}", self.label, phase);
        }
        Ok(())
    }
}

#[async_trait]
impl<E: Entity, const SLOT: usize> BeforeSaveTrigger<E> for RecordingTrigger<SLOT> {
    async fn before_save(
        &self,
        context: &TriggerContext<E>,
        _cancellation: &CancellationToken,
    ) -> anyhow::Result<()> {
        self.record(Phase::BeforeSave, context)
    }
}

#[async_trait]
impl<E: Entity, const SLOT: usize> AfterSaveTrigger<E> for RecordingTrigger<SLOT> {
    async fn after_save(
        &self,
        context: &TriggerContext<E>,
        _cancellation: &CancellationToken,
    ) -> anyhow::Result<()> {
        self.record(Phase::AfterSave, context)
    }
}

#[async_trait]
impl<E: Entity, const SLOT: usize> AfterSaveFailedTrigger<E> for RecordingTrigger<SLOT> {
    async fn after_save_failed(
        &self,
        context: &TriggerContext<E>,
        error: &PersistError,
        _cancellation: &CancellationToken,
    ) -> anyhow::Result<()> {
        self.journal.push(format!("{}:error:{}", self.label, error));
        self.record(Phase::AfterSaveFailed, context)
    }
}

#[async_trait]
impl<E: Entity, const SLOT: usize> BeforeCommitTrigger<E> for RecordingTrigger<SLOT> {
    async fn before_commit(
        &self,
        context: &TriggerContext<E>,
        _cancellation: &CancellationToken,
    ) -> anyhow::Result<()> {
        self.record(Phase::BeforeCommit, context)
    }
}

#[async_trait]
impl<E: Entity, const SLOT: usize> AfterCommitTrigger<E> for RecordingTrigger<SLOT> {
    async fn after_commit(
        &self,
        context: &TriggerContext<E>,
        _cancellation: &CancellationToken,
    ) -> anyhow::Result<()> {
        self.record(Phase::AfterCommit, context)
    }
}
