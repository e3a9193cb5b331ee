//! Named entity-configuration templates layered on top of [`Registry`].
//!
//! A prefab is a closure `Fn(&Registry, Entity)` registered under a name; it
//! configures whatever components a fresh entity should start with.
//! `PrefabManager` is a supplemental facility -- it borrows a `Registry` and
//! is not required for core ECS operation, but its `PrefabNotFound` error
//! kind is part of the crate's stable error taxonomy.
//!
//! `instantiate`/`instantiate_multiple` clone the configure callable out
//! from behind the `prefabs` lock before invoking it, the same
//! snapshot-then-release discipline [`crate::signal::SignalDispatcher`]
//! uses: a configure closure is free to call back into the same
//! `PrefabManager` (composing one prefab from another), and that must not
//! deadlock against a lock `instantiate` is still holding.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::entity::Entity;
use crate::registry::Registry;
use crate::{EcsError, EcsResult};

type PrefabFn = Arc<dyn Fn(&Registry, Entity) + Send + Sync>;

/// Maps prefab names to entity-configuration callables, applied against a
/// borrowed [`Registry`].
#[derive(Default)]
pub struct PrefabManager {
    prefabs: RwLock<HashMap<String, PrefabFn>>,
}

impl PrefabManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `name` as a prefab. Replaces any prior registration under
    /// the same name.
    pub fn register(&self, name: impl Into<String>, configure: impl Fn(&Registry, Entity) + Send + Sync + 'static) {
        self.prefabs
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(name.into(), Arc::new(configure));
    }

    pub fn unregister_prefab(&self, name: &str) -> bool {
        self.prefabs
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(name)
            .is_some()
    }

    pub fn has_prefab(&self, name: &str) -> bool {
        self.prefabs.read().unwrap_or_else(|e| e.into_inner()).contains_key(name)
    }

    pub fn get_prefab_names(&self) -> Vec<String> {
        self.prefabs.read().unwrap_or_else(|e| e.into_inner()).keys().cloned().collect()
    }

    pub fn clear(&self) {
        self.prefabs.write().unwrap_or_else(|e| e.into_inner()).clear();
    }

    /// Spawns one entity on `registry` and applies the named prefab's
    /// configuration to it.
    ///
    /// Fails with [`EcsError::PrefabNotFound`] if `name` is not registered;
    /// no entity is spawned in that case.
    pub fn instantiate(&self, registry: &Registry, name: &str) -> EcsResult<Entity> {
        let configure = self.configure_fn(name)?;
        let entity = registry.spawn();
        configure(registry, entity);
        Ok(entity)
    }

    /// Spawns `count` entities from the named prefab. All-or-nothing: fails
    /// without spawning anything if `name` is not registered.
    pub fn instantiate_multiple(&self, registry: &Registry, name: &str, count: usize) -> EcsResult<Vec<Entity>> {
        let configure = self.configure_fn(name)?;
        let entities = (0..count)
            .map(|_| {
                let entity = registry.spawn();
                configure(registry, entity);
                entity
            })
            .collect();
        Ok(entities)
    }

    /// Clones the named prefab's configure callable out from behind the
    /// lock and returns it, so callers invoke it with no lock held. A
    /// configure closure may legally call back into this `PrefabManager`
    /// (e.g. to register or instantiate another prefab), and `instantiate`
    /// must never be mid-lock when that happens.
    fn configure_fn(&self, name: &str) -> EcsResult<PrefabFn> {
        self.prefabs
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .cloned()
            .ok_or_else(|| EcsError::PrefabNotFound { name: name.to_string() })
    }

    /// Registers a prefab named `name` that reproduces `source`'s current
    /// component set on every entity it configures.
    ///
    /// This mirrors the upstream `ECS::PrefabManager::create_from_entity`,
    /// which its own source acknowledges is "a simplified version... needs
    /// manual configuration": that original does not actually introspect an
    /// entity's live component set (the core has no generic per-entity
    /// component enumeration without a caller-supplied type list -- see
    /// `entity_components` in [`crate::registry::Registry`], which is
    /// private and keyed by [`std::any::TypeId`], not by copyable payload).
    /// This port keeps the same limitation rather than inventing a
    /// reflection/clone path the source never had: the registered prefab is
    /// a no-op beyond spawning, and callers must still configure the
    /// returned entity's components manually via `register`/`instantiate`
    /// with an explicit closure.
    ///
    /// Like the original, this rejects `source` up front: a dead entity or
    /// one with no components can't sensibly be captured as a template, so
    /// no prefab is registered and `name` is left untouched in that case.
    pub fn create_from_entity(&self, registry: &Registry, name: impl Into<String>, source: Entity) -> EcsResult<()> {
        if !registry.is_alive(source) {
            return Err(EcsError::DeadEntity { entity: source });
        }
        if registry.component_count(source) == 0 {
            return Err(EcsError::MissingComponent { entity: source, component: "<any>" });
        }
        self.register(name, |_registry, _entity| {
            // Intentionally empty -- see the doc comment above.
        });
        Ok(())
    }
}
