//! Service resolution for trigger handler instances

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

use crate::adapter::HandlerRef;

/// Resolves handler instances by type
pub trait ServiceProvider: Send + Sync + 'static {
    /// Instance registered for `service`, if any
    fn get_service(&self, service: TypeId) -> Option<HandlerRef>;

    /// Whether `service` can be resolved, without building it
    fn contains(&self, service: TypeId) -> bool;
}

type Factory = Arc<dyn Fn() -> HandlerRef + Send + Sync>;

enum Registration {
    Singleton(HandlerRef),
    Transient(Factory),
}

/// Type map of singleton and transient services
#[derive(Default)]
pub struct ServiceCollection {
    services: HashMap<TypeId, Registration>,
}

impl ServiceCollection {
    /// Empty collection
    pub fn new() -> Self {
        Self::default()
    }

    /// Share one instance across every resolution
    pub fn add_singleton<T: Any + Send + Sync>(mut self, instance: Arc<T>) -> Self {
        self.services
            .insert(TypeId::of::<T>(), Registration::Singleton(instance));
        self
    }

    /// Build a fresh instance on every resolution
    pub fn add_transient<T, F>(mut self, factory: F) -> Self
    where
        T: Any + Send + Sync,
        F: Fn() -> T + Send + Sync + 'static,
    {
        let factory: Factory = Arc::new(move || Arc::new(factory()) as HandlerRef);
        self.services
            .insert(TypeId::of::<T>(), Registration::Transient(factory));
        self
    }

    /// Number of registrations
    pub fn len(&self) -> usize {
        self.services.len()
    }

    /// Whether nothing is registered
    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

impl ServiceProvider for ServiceCollection {
    fn get_service(&self, service: TypeId) -> Option<HandlerRef> {
        match self.services.get(&service)? {
            Registration::Singleton(instance) => Some(instance.clone()),
            Registration::Transient(factory) => Some(factory()),
        }
    }

    fn contains(&self, service: TypeId) -> bool {
        self.services.contains_key(&service)
    }
}
