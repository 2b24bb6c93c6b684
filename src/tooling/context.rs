use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::tooling::module::InstrumenterModule;

type Value = Arc<dyn Any + Send + Sync>;

/// Side table attaching values of one class to instances of another, keyed by instance
/// identity.
pub struct ContextStore {
    id: usize,
    owner: String,
    value: String,
    entries: Mutex<HashMap<u64, Value>>,
}

impl ContextStore {
    pub fn id(&self) -> usize {
        self.id
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn value_class(&self) -> &str {
        &self.value
    }

    pub fn put<T: Any + Send + Sync>(&self, instance: u64, value: T) {
        self.entries.lock().insert(instance, Arc::new(value));
    }

    pub fn get<T: Any + Send + Sync>(&self, instance: u64) -> Option<Arc<T>> {
        let value = self.entries.lock().get(&instance).cloned()?;
        value.downcast::<T>().ok()
    }

    pub fn remove(&self, instance: u64) -> bool {
        self.entries.lock().remove(&instance).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One [`ContextStore`] per (owner, value) pair, shared by every module requesting it.
#[derive(Default)]
pub struct ContextStoreRegistry {
    stores: Mutex<Vec<Arc<ContextStore>>>,
}

impl ContextStoreRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store(&self, owner: &str, value: &str) -> Arc<ContextStore> {
        let mut stores = self.stores.lock();
        if let Some(store) = stores
            .iter()
            .find(|store| store.owner == owner && store.value == value)
        {
            return store.clone();
        }
        let store = Arc::new(ContextStore {
            id: stores.len(),
            owner: owner.to_string(),
            value: value.to_string(),
            entries: Mutex::new(HashMap::new()),
        });
        stores.push(store.clone());
        store
    }

    pub fn register_module(&self, module: &dyn InstrumenterModule) -> Vec<Arc<ContextStore>> {
        module
            .context_store()
            .iter()
            .map(|(owner, value)| self.store(owner, value))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.stores.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tooling::declared::DeclaredModule;
    use crate::tooling::module::TargetSystem;

    fn module(name: &str, pairs: &[(&str, &str)]) -> DeclaredModule {
        let mut module = DeclaredModule::new(name, TargetSystem::Tracing);
        for (owner, value) in pairs {
            module
                .context_store
                .insert(owner.to_string(), value.to_string());
        }
        module
    }

    #[test]
    fn modules_requesting_the_same_pair_share_a_store() {
        let registry = ContextStoreRegistry::new();
        let first = registry.register_module(&module(
            "servlet",
            &[("javax.servlet.ServletRequest", "com.example.Span")],
        ));
        let second = registry.register_module(&module(
            "servlet-async",
            &[
                ("javax.servlet.ServletRequest", "com.example.Span"),
                ("java.lang.Runnable", "com.example.State"),
            ],
        ));

        // Pairs come back sorted by owner.
        assert_eq!(second[0].owner(), "java.lang.Runnable");
        assert!(Arc::ptr_eq(&first[0], &second[1]));
        assert_eq!(second[1].id(), 0);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn values_are_typed_per_instance() {
        let store = ContextStoreRegistry::new().store("java.lang.Thread", "java.lang.String");
        store.put(7, "request-7".to_string());

        assert_eq!(store.get::<String>(7).as_deref().map(String::as_str), Some("request-7"));
        assert!(store.get::<u32>(7).is_none());
        assert!(store.get::<String>(8).is_none());
        assert!(store.remove(7));
        assert!(store.is_empty());
    }
}
