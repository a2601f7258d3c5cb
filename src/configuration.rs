//! Trigger configuration: registrations and engine options
//!
//! Built once with [`TriggerConfigurationBuilder`] and shared by `Arc`
//! afterwards; nothing in it changes once built.
//!
//! ```rust,ignore
//! let configuration = TriggerConfiguration::builder(UnchangedEntityPolicy::Skip)
//!     .before_save::<Student, SignStudentUpForMandatoryCourses>()
//!     .after_commit::<Student, SendWelcomeMail>()
//!     .default_activator::<SendWelcomeMail>()
//!     .max_cascade_cycles(10)
//!     .build();
//! ```

use std::any::TypeId;
use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::adapter::{HandlerRef, TriggerAdapter};
use crate::descriptor::{HandlerType, TriggerDescriptor};
use crate::{
    AfterCommitTrigger, AfterSaveFailedTrigger, AfterSaveTrigger, BeforeCommitTrigger,
    BeforeSaveTrigger, ChangeKind, Entity, EntityType, NoOpObserver, Phase, TriggerObserver,
};

/// Whether tracked-but-unchanged entities are dispatched to triggers
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnchangedEntityPolicy {
    /// Only added, modified and deleted entities are dispatched
    Skip,
    /// Unchanged entities are dispatched too, with `ChangeKind::Unchanged`
    Dispatch,
}

/// How before-phase triggers react to changes made by other before-phase
/// triggers
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CascadeBehavior {
    /// One pass over the changes found when the phase started
    None,
    /// Re-discover after each pass; new entries, and entries whose change
    /// kind changed, are dispatched again
    EntityAndType,
}

/// Engine options
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TriggerOptions {
    /// Unchanged entity dispatch
    pub unchanged_entities: UnchangedEntityPolicy,
    /// Cascading before-phase behavior
    pub cascade: CascadeBehavior,
    /// Upper bound on before-phase passes per operation
    pub max_cascade_cycles: usize,
}

impl TriggerOptions {
    /// Options with the given unchanged-entity policy and default cascading
    pub fn new(unchanged_entities: UnchangedEntityPolicy) -> Self {
        Self {
            unchanged_entities,
            cascade: CascadeBehavior::EntityAndType,
            max_cascade_cycles: 100,
        }
    }

    /// Whether a change of this kind reaches triggers at all
    pub fn is_dispatchable(&self, kind: ChangeKind) -> bool {
        kind.is_pending() || self.unchanged_entities == UnchangedEntityPolicy::Dispatch
    }
}

/// Default construction strategy for one handler type
pub type Activator = Arc<dyn Fn() -> HandlerRef + Send + Sync>;

/// Immutable registry of trigger descriptors and options
pub struct TriggerConfiguration {
    descriptors: HashMap<(EntityType, Phase), Vec<Arc<TriggerDescriptor>>>,
    activators: HashMap<TypeId, Activator>,
    options: TriggerOptions,
    observer: Arc<dyn TriggerObserver>,
}

impl TriggerConfiguration {
    /// Start building; the unchanged-entity policy must be chosen explicitly
    pub fn builder(unchanged_entities: UnchangedEntityPolicy) -> TriggerConfigurationBuilder {
        TriggerConfigurationBuilder::new(unchanged_entities)
    }

    /// Descriptors for an entity type and phase, in registration order
    pub fn descriptors(&self, entity_type: EntityType, phase: Phase) -> &[Arc<TriggerDescriptor>] {
        self.descriptors
            .get(&(entity_type, phase))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Every registered descriptor
    pub fn all_descriptors(&self) -> impl Iterator<Item = &Arc<TriggerDescriptor>> {
        self.descriptors.values().flatten()
    }

    /// Whether any descriptor is registered for the phase
    pub fn has_phase(&self, phase: Phase) -> bool {
        self.descriptors
            .iter()
            .any(|((_, p), descriptors)| *p == phase && !descriptors.is_empty())
    }

    /// Default activator for a handler type
    pub fn activator(&self, handler: TypeId) -> Option<&Activator> {
        self.activators.get(&handler)
    }

    /// Engine options
    pub fn options(&self) -> &TriggerOptions {
        &self.options
    }

    /// Lifecycle observer
    pub fn observer(&self) -> &Arc<dyn TriggerObserver> {
        &self.observer
    }
}

impl std::fmt::Debug for TriggerConfiguration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TriggerConfiguration")
            .field("descriptors", &self.all_descriptors().count())
            .field("activators", &self.activators.len())
            .field("options", &self.options)
            .finish()
    }
}

/// Builder for [`TriggerConfiguration`]
pub struct TriggerConfigurationBuilder {
    descriptors: HashMap<(EntityType, Phase), Vec<Arc<TriggerDescriptor>>>,
    activators: HashMap<TypeId, Activator>,
    options: TriggerOptions,
    observer: Arc<dyn TriggerObserver>,
}

impl TriggerConfigurationBuilder {
    /// Empty builder
    pub fn new(unchanged_entities: UnchangedEntityPolicy) -> Self {
        Self {
            descriptors: HashMap::new(),
            activators: HashMap::new(),
            options: TriggerOptions::new(unchanged_entities),
            observer: Arc::new(NoOpObserver),
        }
    }

    /// Register `H` as a before-save trigger for `E`
    pub fn before_save<E: Entity, H: BeforeSaveTrigger<E>>(self) -> Self {
        self.register::<E, H>(TriggerAdapter::before_save::<E, H>())
    }

    /// Register `H` as an after-save trigger for `E`
    pub fn after_save<E: Entity, H: AfterSaveTrigger<E>>(self) -> Self {
        self.register::<E, H>(TriggerAdapter::after_save::<E, H>())
    }

    /// Register `H` as an after-save-failed trigger for `E`
    pub fn after_save_failed<E: Entity, H: AfterSaveFailedTrigger<E>>(self) -> Self {
        self.register::<E, H>(TriggerAdapter::after_save_failed::<E, H>())
    }

    /// Register `H` as a before-commit trigger for `E`
    pub fn before_commit<E: Entity, H: BeforeCommitTrigger<E>>(self) -> Self {
        self.register::<E, H>(TriggerAdapter::before_commit::<E, H>())
    }

    /// Register `H` as an after-commit trigger for `E`
    pub fn after_commit<E: Entity, H: AfterCommitTrigger<E>>(self) -> Self {
        self.register::<E, H>(TriggerAdapter::after_commit::<E, H>())
    }

    /// Construct `H` with `factory` when no service provider supplies it
    pub fn activator<H, F>(mut self, factory: F) -> Self
    where
        H: Send + Sync + 'static,
        F: Fn() -> H + Send + Sync + 'static,
    {
        let activator: Activator = Arc::new(move || Arc::new(factory()) as HandlerRef);
        self.activators.insert(TypeId::of::<H>(), activator);
        self
    }

    /// Construct `H` with `H::default()` when no service provider supplies it
    pub fn default_activator<H>(self) -> Self
    where
        H: Default + Send + Sync + 'static,
    {
        self.activator::<H, _>(H::default)
    }

    /// Cascading before-phase behavior
    pub fn cascade_behavior(mut self, cascade: CascadeBehavior) -> Self {
        self.options.cascade = cascade;
        self
    }

    /// Upper bound on before-phase passes per operation; at least one
    pub fn max_cascade_cycles(mut self, max_cycles: usize) -> Self {
        self.options.max_cascade_cycles = max_cycles.max(1);
        self
    }

    /// Lifecycle observer
    pub fn observer(mut self, observer: Arc<dyn TriggerObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Freeze the configuration
    pub fn build(self) -> TriggerConfiguration {
        tracing::debug!(
            descriptors = self.descriptors.values().map(Vec::len).sum::<usize>(),
            activators = self.activators.len(),
            "Trigger configuration built"
        );
        TriggerConfiguration {
            descriptors: self.descriptors,
            activators: self.activators,
            options: self.options,
            observer: self.observer,
        }
    }

    fn register<E: Entity, H: 'static>(mut self, adapter: TriggerAdapter) -> Self {
        let entity_type = EntityType::of::<E>();
        let handler_type = HandlerType::of::<H>();
        let registered = self
            .descriptors
            .entry((entity_type, adapter.phase()))
            .or_default();

        if !registered
            .iter()
            .any(|descriptor| descriptor.handler_type() == handler_type)
        {
            registered.push(Arc::new(TriggerDescriptor::new(
                entity_type,
                handler_type,
                adapter,
            )));
        }
        self
    }
}
