use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

use super::EngineError;

/// Type-map of shared services available to cyclic jobs.
///
/// Job parameters are resolved from here exactly once, at registration;
/// an unknown dependency fails the registration, not the running engine.
#[derive(Default)]
pub struct ServiceRegistry {
    services: HashMap<TypeId, Arc<dyn Any + Send + Sync>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<T: Send + Sync + 'static>(&mut self, service: Arc<T>) {
        self.services.insert(TypeId::of::<T>(), service);
    }

    pub fn get<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        self.services
            .get(&TypeId::of::<T>())
            .and_then(|any| Arc::clone(any).downcast::<T>().ok())
    }

    pub fn resolve<T: Send + Sync + 'static>(&self) -> Result<Arc<T>, EngineError> {
        self.get::<T>().ok_or_else(|| EngineError::UnresolvedDependency {
            type_name: type_name::<T>(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Clock;
    #[derive(Debug)]
    struct Missing;

    #[test]
    fn resolves_registered_service() {
        let mut registry = ServiceRegistry::new();
        registry.register(Arc::new(Clock));

        assert!(registry.resolve::<Clock>().is_ok());
    }

    #[test]
    fn unknown_dependency_fails_resolution() {
        let registry = ServiceRegistry::new();
        let err = registry.resolve::<Missing>().unwrap_err();
        assert!(matches!(err, EngineError::UnresolvedDependency { .. }));
    }
}
