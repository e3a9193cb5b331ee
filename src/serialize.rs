//! Component serialization hook surface.
//!
//! Per §6 of the contract this crate implements, the ECS core exposes only
//! a *registration* surface -- component type identity mapped to a pair of
//! serialize/deserialize callables -- plus a driver that enumerates live
//! entities and invokes them. The payload format itself is a collaborator
//! concern; [`SerializerRegistry::register`] offers `serde_json` as a
//! convenience default for component types that already derive
//! `Serialize`/`Deserialize`, but the opaque-`String` contract in
//! [`SerializerRegistry::register_with`] is the one the core actually
//! guarantees.

use std::any::TypeId;
use std::collections::HashMap;
use std::sync::RwLock;

use crate::entity::Entity;
use crate::registry::Registry;

type SerializeFn = Box<dyn Fn(Entity, &Registry) -> Option<String> + Send + Sync>;
type DeserializeFn = Box<dyn Fn(Entity, &str, &Registry) + Send + Sync>;

struct Entry {
    name: &'static str,
    serialize: SerializeFn,
    deserialize: DeserializeFn,
}

/// One component type's registered payload key plus the opaque string it
/// produced or will consume. The tuple is the unit the save/load driver
/// moves around; what's inside the string is the collaborator's business.
pub type ComponentPayload = (&'static str, String);

/// Registration surface for per-component-type serializers, and a
/// save/load driver built on top of it.
#[derive(Default)]
pub struct SerializerRegistry {
    entries: RwLock<HashMap<TypeId, Entry>>,
}

impl SerializerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `T` using `serde_json` as the opaque string payload
    /// format -- the convenience path for component types that already
    /// derive `Serialize`/`Deserialize`. A failed encode/decode is treated
    /// as "no payload" / "no-op" respectively rather than panicking; the
    /// core has no interest in the payload's internal validity, only in
    /// whether a collaborator produced one.
    pub fn register<T>(&self)
    where
        T: Clone + Send + Sync + 'static + serde::Serialize + for<'de> serde::Deserialize<'de>,
    {
        self.register_with::<T>(
            std::any::type_name::<T>(),
            |entity, registry| {
                registry
                    .get::<T>(entity)
                    .ok()
                    .and_then(|value| serde_json::to_string(&value).ok())
            },
            |entity, payload, registry| {
                if let Ok(value) = serde_json::from_str::<T>(payload) {
                    let _ = registry.emplace(entity, value);
                }
            },
        );
    }

    /// Registers `T` with caller-supplied serialize/deserialize callables,
    /// for component types that don't use `serde_json` (a custom binary
    /// format, a length-prefixed wire encoding, etc. -- per §6, "any
    /// wire/disk format is acceptable").
    pub fn register_with<T: 'static>(
        &self,
        name: &'static str,
        serialize: impl Fn(Entity, &Registry) -> Option<String> + Send + Sync + 'static,
        deserialize: impl Fn(Entity, &str, &Registry) + Send + Sync + 'static,
    ) {
        self.entries.write().unwrap_or_else(|e| e.into_inner()).insert(
            TypeId::of::<T>(),
            Entry {
                name,
                serialize: Box::new(serialize),
                deserialize: Box::new(deserialize),
            },
        );
    }

    pub fn unregister<T: 'static>(&self) -> bool {
        self.entries
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&TypeId::of::<T>())
            .is_some()
    }

    /// Runs every registered serializer against `entity`, collecting a
    /// payload for each component type that produced one (types `entity`
    /// doesn't own are silently skipped, not an error).
    pub fn serialize_entity(&self, entity: Entity, registry: &Registry) -> Vec<ComponentPayload> {
        self.entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .filter_map(|entry| (entry.serialize)(entity, registry).map(|payload| (entry.name, payload)))
            .collect()
    }

    /// Applies each `(name, payload)` pair to `entity` via the serializer
    /// registered under that name. Pairs whose name has no matching
    /// registration are silently skipped.
    pub fn deserialize_entity(&self, entity: Entity, payloads: &[ComponentPayload], registry: &Registry) {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        for (name, payload) in payloads {
            if let Some(entry) = entries.values().find(|entry| entry.name == *name) {
                (entry.deserialize)(entity, payload, registry);
            }
        }
    }

    /// Enumerates every live entity in `registry` and serializes it.
    /// The save/load driver promised by §6; what happens to the returned
    /// snapshot (write it to disk, send it over the network, keep it for
    /// in-process undo) is entirely a collaborator concern.
    pub fn save_world(&self, registry: &Registry) -> Vec<(Entity, Vec<ComponentPayload>)> {
        registry
            .entities()
            .map(|entity| (entity, self.serialize_entity(entity, registry)))
            .collect()
    }

    /// Re-applies a snapshot produced by [`Self::save_world`]. Entities are
    /// process-local (§1's non-goals) -- this only makes sense against a
    /// registry where those entity handles are still meaningful (e.g. an
    /// undo buffer within the same run), not across a process restart.
    /// Entries for entities no longer alive in `registry` are skipped.
    pub fn load_world(&self, registry: &Registry, snapshot: &[(Entity, Vec<ComponentPayload>)]) {
        for (entity, payloads) in snapshot {
            if registry.is_alive(*entity) {
                self.deserialize_entity(*entity, payloads, registry);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
    struct Position {
        x: f32,
        y: f32,
    }

    #[test]
    fn round_trips_a_registered_component_through_json() {
        let registry = Registry::new();
        let serializers = SerializerRegistry::new();
        serializers.register::<Position>();

        let e = registry.spawn();
        registry.emplace(e, Position { x: 1.5, y: -2.5 }).unwrap();

        let payloads = serializers.serialize_entity(e, &registry);
        assert_eq!(payloads.len(), 1);

        registry.remove::<Position>(e);
        assert!(!registry.has::<Position>(e));

        serializers.deserialize_entity(e, &payloads, &registry);
        assert_eq!(registry.get::<Position>(e).unwrap(), Position { x: 1.5, y: -2.5 });
    }

    #[test]
    fn save_and_load_world_round_trips_every_live_entity() {
        let registry = Registry::new();
        let serializers = SerializerRegistry::new();
        serializers.register::<Position>();

        let a = registry.spawn();
        let b = registry.spawn();
        registry.emplace(a, Position { x: 1.0, y: 1.0 }).unwrap();
        registry.emplace(b, Position { x: 2.0, y: 2.0 }).unwrap();

        let snapshot = serializers.save_world(&registry);
        registry.remove::<Position>(a);
        registry.remove::<Position>(b);

        serializers.load_world(&registry, &snapshot);
        assert_eq!(registry.get::<Position>(a).unwrap(), Position { x: 1.0, y: 1.0 });
        assert_eq!(registry.get::<Position>(b).unwrap(), Position { x: 2.0, y: 2.0 });
    }

    #[test]
    fn entity_without_the_component_produces_no_payload() {
        let registry = Registry::new();
        let serializers = SerializerRegistry::new();
        serializers.register::<Position>();
        let e = registry.spawn();
        assert!(serializers.serialize_entity(e, &registry).is_empty());
    }
}
