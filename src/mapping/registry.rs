//! Process-wide cache of resolved type maps
//!
//! Maps are built on first use and shared for the rest of the process. Building
//! is serialized per type, so two threads asking for the same unresolved type
//! build it once, while unrelated types resolve in parallel.

use super::schema::Entity;
use super::type_map::TypeMap;
use crate::core::error::Result;
use parking_lot::{Mutex, RwLock};
use std::any::TypeId;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

/// Cache of resolved [`TypeMap`]s keyed by native type
#[derive(Default)]
pub struct TypeRegistry {
    maps: RwLock<HashMap<TypeId, Arc<TypeMap>>>,
    building: Mutex<HashMap<TypeId, Arc<Mutex<()>>>>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The registry shared by the whole process
    pub fn global() -> &'static TypeRegistry {
        static REGISTRY: OnceLock<TypeRegistry> = OnceLock::new();
        REGISTRY.get_or_init(TypeRegistry::new)
    }

    /// Type map of `T`, building and caching it on first use
    pub fn resolve<T: Entity>(&self) -> Result<Arc<TypeMap>> {
        let id = TypeId::of::<T>();
        if let Some(map) = self.maps.read().get(&id) {
            return Ok(map.clone());
        }

        let gate = self.building.lock().entry(id).or_default().clone();
        let _guard = gate.lock();
        if let Some(map) = self.maps.read().get(&id) {
            return Ok(map.clone());
        }

        let map = match T::schema().build() {
            Ok(map) => Arc::new(map),
            Err(e) => {
                tracing::warn!(r#type = std::any::type_name::<T>(), error = %e, "type map rejected");
                return Err(e);
            }
        };
        tracing::debug!(
            r#type = map.type_name(),
            table = map.table(),
            columns = map.columns().len(),
            relations = map.relations().len(),
            "type map resolved"
        );
        self.maps.write().insert(id, map.clone());
        Ok(map)
    }

    /// Resolve `T` ahead of its first use
    pub fn initialize<T: Entity>(&self) -> Result<()> {
        self.resolve::<T>().map(|_| ())
    }

    /// Every map resolved so far
    pub fn cached(&self) -> Vec<Arc<TypeMap>> {
        self.maps.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.maps.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.maps.read().is_empty()
    }

    /// Forget every resolved map
    pub fn reset(&self) {
        self.maps.write().clear();
        self.building.lock().clear();
    }
}

/// Type map of `T` from the global registry
pub fn resolve<T: Entity>() -> Result<Arc<TypeMap>> {
    TypeRegistry::global().resolve::<T>()
}

/// Resolve `T` in the global registry ahead of its first use
pub fn initialize<T: Entity>() -> Result<()> {
    TypeRegistry::global().initialize::<T>()
}
