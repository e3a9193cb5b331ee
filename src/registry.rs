//! [`Registry`] -- the coordinator that ties the entity allocator, component
//! pools, signal dispatcher and relationship table together into the
//! crate's single public entry point.
//!
//! Every other module in this crate (`entity`, `storage`, `view`, `signal`,
//! `relationship`) is deliberately ignorant of the others; `Registry` is
//! where they meet. Its locking discipline follows §5 of the contract this
//! crate implements: entity state behind its own lock, the pool map behind
//! its own lock, and each pool behind its own mutex, acquired and released
//! in short, non-overlapping critical sections so that signal callbacks and
//! view iteration never run with a registry lock held.

use std::any::TypeId;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, RwLock};

use tracing::{debug, trace};

use crate::entity::{Entity, EntityAllocator};
use crate::relationship::RelationshipManager;
use crate::signal::{Callback, SignalDispatcher};
use crate::storage::{ErasedPool, Pool};
use crate::view::{
    ExcludeView1, ExcludeView2, ExcludeView3, Group1, Group2, Group3, ParallelView1, ParallelView2,
    ParallelView3, View1, View2, View3,
};
use crate::{EcsError, EcsResult};

/// A boxed, type-erased singleton value.
type SingletonSlot = Box<dyn std::any::Any + Send + Sync>;

/// The ECS coordinator. Cheap to share behind an `Arc` (every field is
/// already internally synchronized) and safe to call into from signal
/// callbacks, command buffer replay, and scheduler systems alike.
pub struct Registry {
    entities: RwLock<EntityAllocator>,
    /// Reverse index: entity index -> the set of component types it
    /// currently owns. Consulted on `kill` (to know what to destroy) and
    /// kept in lockstep with every pool mutation that goes through this
    /// registry (invariant 4 of §8).
    entity_components: RwLock<HashMap<u32, HashSet<TypeId>>>,
    pools: RwLock<HashMap<TypeId, Arc<dyn ErasedPool>>>,
    singletons: RwLock<HashMap<TypeId, SingletonSlot>>,
    signals: SignalDispatcher,
    relationships: RelationshipManager,
}

impl Registry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            entities: RwLock::new(EntityAllocator::new()),
            entity_components: RwLock::new(HashMap::new()),
            pools: RwLock::new(HashMap::new()),
            singletons: RwLock::new(HashMap::new()),
            signals: SignalDispatcher::new(),
            relationships: RelationshipManager::new(),
        }
    }

    /// Creates a registry with its entity backing storage pre-sized for
    /// `capacity` entities, to avoid reallocation during hot spawning.
    pub fn with_capacity(capacity: usize) -> Self {
        let registry = Self::new();
        registry.reserve(capacity);
        registry
    }

    // -----------------------------------------------------------------
    // Entities
    // -----------------------------------------------------------------

    /// Allocates a new entity, preferring a recycled index.
    pub fn spawn(&self) -> Entity {
        let entity = self
            .entities
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .allocate();
        trace!(%entity, "spawn");
        entity
    }

    /// Destroys `entity`: every component it owns is removed (dispatching
    /// "destroy" signals for each), its relationship edges are dropped, and
    /// its slot's generation is bumped so stale handles are rejected. A
    /// no-op, silently, if `entity` is already dead.
    pub fn kill(&self, entity: Entity) {
        let owned_types: Vec<TypeId> = {
            let mut entities = self.entities.write().unwrap_or_else(|e| e.into_inner());
            if !entities.is_alive(entity) {
                return;
            }
            entities.destroy(entity);
            self.entity_components
                .write()
                .unwrap_or_else(|e| e.into_inner())
                .remove(&entity.index())
                .map(|set| set.into_iter().collect())
                .unwrap_or_default()
        };

        if !owned_types.is_empty() {
            let pools = self.pools.read().unwrap_or_else(|e| e.into_inner());
            for type_id in &owned_types {
                if let Some(pool) = pools.get(type_id) {
                    pool.remove_erased(entity);
                }
            }
            drop(pools);
            for type_id in owned_types {
                self.signals.dispatch_destroy(type_id, entity);
            }
        }

        self.relationships.remove_entity(entity);
        trace!(%entity, "kill");
    }

    /// Whether `entity`'s generation still matches the slot's live
    /// generation.
    pub fn is_alive(&self, entity: Entity) -> bool {
        self.entities
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .is_alive(entity)
    }

    /// Resets every tombstoned slot's generation to zero and returns it to
    /// the free list. Returns the number of slots reclaimed.
    pub fn cleanup_tombstones(&self) -> usize {
        let reclaimed = self
            .entities
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .cleanup_tombstones();
        if reclaimed > 0 {
            debug!(reclaimed, "cleanup_tombstones");
        }
        reclaimed
    }

    /// Pre-sizes entity backing storage for `capacity` entities.
    pub fn reserve(&self, capacity: usize) {
        self.entities
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .reserve(capacity);
        self.entity_components
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .reserve(capacity);
    }

    /// Destroys every live entity matching `predicate`. Returns the number
    /// destroyed.
    pub fn remove_where(&self, predicate: impl Fn(Entity) -> bool) -> usize {
        let matched: Vec<Entity> = self.entities().filter(|&e| predicate(e)).collect();
        let count = matched.len();
        for entity in matched {
            self.kill(entity);
        }
        count
    }

    /// Every currently live entity, in allocator order. Snapshotted: the
    /// returned iterator does not track later spawns or kills.
    pub fn entities(&self) -> std::vec::IntoIter<Entity> {
        self.entities
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter_alive()
            .collect::<Vec<_>>()
            .into_iter()
    }

    /// Total number of currently live entities.
    pub fn entity_count(&self) -> usize {
        self.entities().count()
    }

    // -----------------------------------------------------------------
    // Pool access
    // -----------------------------------------------------------------

    /// Returns the pool for `T`, creating it (as a dense or tag pool
    /// uniformly -- see [`crate::storage`]) on first use.
    fn pool_of<T: Send + Sync + 'static>(&self) -> Arc<Pool<T>> {
        let type_id = TypeId::of::<T>();
        {
            let pools = self.pools.read().unwrap_or_else(|e| e.into_inner());
            if let Some(pool) = pools.get(&type_id) {
                return downcast_pool(pool.clone());
            }
        }
        let mut pools = self.pools.write().unwrap_or_else(|e| e.into_inner());
        let entry = pools
            .entry(type_id)
            .or_insert_with(|| Arc::new(Pool::<T>::new()) as Arc<dyn ErasedPool>);
        downcast_pool(entry.clone())
    }

    /// Returns the pool for `T` only if it has already been created by a
    /// prior `emplace`/`view`/etc. Avoids materializing an empty pool for a
    /// type that was never used, which `remove`/`has`/`get`/`count` would
    /// otherwise do via [`Self::pool_of`].
    fn try_pool_of<T: Send + Sync + 'static>(&self) -> Option<Arc<Pool<T>>> {
        let pools = self.pools.read().unwrap_or_else(|e| e.into_inner());
        pools.get(&TypeId::of::<T>()).map(|p| downcast_pool(p.clone()))
    }

    fn mark_owned(&self, entity: Entity, type_id: TypeId) {
        self.entity_components
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .entry(entity.index())
            .or_default()
            .insert(type_id);
    }

    fn unmark_owned(&self, entity: Entity, type_id: TypeId) {
        let mut entity_components = self.entity_components.write().unwrap_or_else(|e| e.into_inner());
        if let Some(set) = entity_components.get_mut(&entity.index()) {
            set.remove(&type_id);
        }
    }

    /// An [`ErasedPool`] handle over `E`'s storage, for use as an
    /// [`crate::view::ExcludeView`] filter term. Creates the pool for `E`
    /// if it does not already exist (an empty pool excludes nothing, which
    /// is the correct behavior for a component type never used yet).
    pub fn exclude_pool<E: Send + Sync + 'static>(&self) -> Arc<dyn ErasedPool> {
        self.pool_of::<E>() as Arc<dyn ErasedPool>
    }

    // -----------------------------------------------------------------
    // Components
    // -----------------------------------------------------------------

    /// Adds (or overwrites) `entity`'s `T` component. Dispatches the
    /// "construct" signal only the first time `entity` receives a `T`; an
    /// overwrite fires nothing, matching S5 of the contract this crate
    /// implements.
    pub fn emplace<T: Send + Sync + 'static>(&self, entity: Entity, value: T) -> EcsResult<()> {
        if !self.is_alive(entity) {
            return Err(EcsError::DeadEntity { entity });
        }
        let type_id = TypeId::of::<T>();
        let pool = self.pool_of::<T>();
        let is_new = pool.emplace(entity, value);
        if is_new {
            self.mark_owned(entity, type_id);
            self.signals.dispatch_construct(type_id, entity);
        }
        Ok(())
    }

    /// Returns `entity`'s existing `T`, or emplaces `value` and returns that
    /// if it has none yet.
    pub fn get_or_emplace<T: Clone + Send + Sync + 'static>(&self, entity: Entity, value: T) -> EcsResult<T> {
        if !self.is_alive(entity) {
            return Err(EcsError::DeadEntity { entity });
        }
        let type_id = TypeId::of::<T>();
        let pool = self.pool_of::<T>();
        if let Some(existing) = pool.get(entity) {
            return Ok(existing);
        }
        let result = value.clone();
        let is_new = pool.emplace(entity, value);
        if is_new {
            self.mark_owned(entity, type_id);
            self.signals.dispatch_construct(type_id, entity);
        }
        Ok(result)
    }

    /// Removes `entity`'s `T` component, if present. Returns whether a
    /// component was actually removed (the "destroy" signal fires exactly
    /// once, only when it was). A no-op for an entity with no `T`, a dead
    /// entity, or a `T` pool that was never created.
    pub fn remove<T: Send + Sync + 'static>(&self, entity: Entity) -> bool {
        let Some(pool) = self.try_pool_of::<T>() else {
            return false;
        };
        let removed = pool.remove(entity);
        if removed {
            let type_id = TypeId::of::<T>();
            self.unmark_owned(entity, type_id);
            self.signals.dispatch_destroy(type_id, entity);
        }
        removed
    }

    /// Whether `entity` currently owns a `T` component. `false`, silently,
    /// for a dead entity.
    pub fn has<T: Send + Sync + 'static>(&self, entity: Entity) -> bool {
        self.try_pool_of::<T>().is_some_and(|pool| pool.contains(entity))
    }

    /// Number of distinct component types `entity` currently owns. `0` for a
    /// dead entity or one with no components.
    pub fn component_count(&self, entity: Entity) -> usize {
        self.entity_components
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&entity.index())
            .map_or(0, |set| set.len())
    }

    /// A clone of `entity`'s `T` component.
    ///
    /// Fails with [`EcsError::DeadEntity`] if `entity` is dead, or
    /// [`EcsError::MissingComponent`] if it is alive but owns no `T`.
    pub fn get<T: Clone + Send + Sync + 'static>(&self, entity: Entity) -> EcsResult<T> {
        if !self.is_alive(entity) {
            return Err(EcsError::DeadEntity { entity });
        }
        self.try_pool_of::<T>()
            .and_then(|pool| pool.get(entity))
            .ok_or(EcsError::MissingComponent {
                entity,
                component: std::any::type_name::<T>(),
            })
    }

    /// Invokes `f` with a mutable reference to `entity`'s `T` component in
    /// place. Same failure modes as [`Self::get`]. Intended as the hook
    /// point for observers that want to react to a specific mutation rather
    /// than the broad "construct"/"destroy" signals.
    pub fn patch<T: Send + Sync + 'static, R>(&self, entity: Entity, f: impl FnOnce(&mut T) -> R) -> EcsResult<R> {
        if !self.is_alive(entity) {
            return Err(EcsError::DeadEntity { entity });
        }
        let pool = self.try_pool_of::<T>().ok_or(EcsError::MissingComponent {
            entity,
            component: std::any::type_name::<T>(),
        })?;
        pool.with_mut(entity, f).ok_or(EcsError::MissingComponent {
            entity,
            component: std::any::type_name::<T>(),
        })
    }

    /// Number of entities currently owning a `T` component.
    pub fn count<T: Send + Sync + 'static>(&self) -> usize {
        self.try_pool_of::<T>().map_or(0, |pool| pool.len())
    }

    /// Removes every `T` component from every entity that owns one,
    /// dispatching "destroy" for each.
    pub fn clear<T: Send + Sync + 'static>(&self) {
        let Some(pool) = self.try_pool_of::<T>() else {
            return;
        };
        let owners = pool.packed_entities();
        pool.clear();
        let type_id = TypeId::of::<T>();
        for &entity in &owners {
            self.unmark_owned(entity, type_id);
        }
        for entity in owners {
            self.signals.dispatch_destroy(type_id, entity);
        }
    }

    /// Pre-sizes `T`'s pool for `additional` more components.
    pub fn reserve_component<T: Send + Sync + 'static>(&self, additional: usize) {
        self.pool_of::<T>().reserve(additional);
    }

    /// Releases `T`'s pool's excess backing capacity.
    pub fn compact_component<T: Send + Sync + 'static>(&self) {
        if let Some(pool) = self.try_pool_of::<T>() {
            pool.shrink_to_fit();
        }
    }

    /// Releases excess backing capacity across every component pool that
    /// currently exists. Per §1's non-goals this is the only compaction
    /// this crate performs; there is no automatic archetype/pool
    /// compaction beyond this explicit call and tombstone recycling.
    pub fn compact(&self) {
        let pools = self.pools.read().unwrap_or_else(|e| e.into_inner());
        for pool in pools.values() {
            pool.shrink_to_fit_erased();
        }
    }

    // -----------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------

    pub fn view<A: Send + Sync + Clone + 'static>(&self) -> View1<A> {
        View1::new(self.pool_of::<A>())
    }

    pub fn view2<A: Send + Sync + Clone + 'static, B: Send + Sync + Clone + 'static>(&self) -> View2<A, B> {
        View2::new(self.pool_of::<A>(), self.pool_of::<B>())
    }

    pub fn view3<A: Send + Sync + Clone + 'static, B: Send + Sync + Clone + 'static, C: Send + Sync + Clone + 'static>(
        &self,
    ) -> View3<A, B, C> {
        View3::new(self.pool_of::<A>(), self.pool_of::<B>(), self.pool_of::<C>())
    }

    pub fn exclude_view<A: Send + Sync + Clone + 'static, E: Send + Sync + 'static>(&self) -> ExcludeView1<A> {
        self.view::<A>().exclude(vec![self.exclude_pool::<E>()])
    }

    pub fn exclude_view2<A: Send + Sync + Clone + 'static, B: Send + Sync + Clone + 'static, E: Send + Sync + 'static>(
        &self,
    ) -> ExcludeView2<A, B> {
        self.view2::<A, B>().exclude(vec![self.exclude_pool::<E>()])
    }

    pub fn exclude_view3<
        A: Send + Sync + Clone + 'static,
        B: Send + Sync + Clone + 'static,
        C: Send + Sync + Clone + 'static,
        E: Send + Sync + 'static,
    >(
        &self,
    ) -> ExcludeView3<A, B, C> {
        self.view3::<A, B, C>().exclude(vec![self.exclude_pool::<E>()])
    }

    pub fn parallel_view<A: Send + Sync + Clone + 'static>(&self) -> ParallelView1<A> {
        ParallelView1::new(self.pool_of::<A>())
    }

    pub fn parallel_view2<A: Send + Sync + Clone + 'static, B: Send + Sync + Clone + 'static>(&self) -> ParallelView2<A, B> {
        ParallelView2::new(self.pool_of::<A>(), self.pool_of::<B>())
    }

    pub fn parallel_view3<
        A: Send + Sync + Clone + 'static,
        B: Send + Sync + Clone + 'static,
        C: Send + Sync + Clone + 'static,
    >(
        &self,
    ) -> ParallelView3<A, B, C> {
        ParallelView3::new(self.pool_of::<A>(), self.pool_of::<B>(), self.pool_of::<C>())
    }

    pub fn group<A: Send + Sync + Clone + 'static>(&self) -> Group1<A> {
        Group1::new(self.pool_of::<A>())
    }

    pub fn group2<A: Send + Sync + Clone + 'static, B: Send + Sync + Clone + 'static>(&self) -> Group2<A, B> {
        Group2::new(self.pool_of::<A>(), self.pool_of::<B>())
    }

    pub fn group3<A: Send + Sync + Clone + 'static, B: Send + Sync + Clone + 'static, C: Send + Sync + Clone + 'static>(
        &self,
    ) -> Group3<A, B, C> {
        Group3::new(self.pool_of::<A>(), self.pool_of::<B>(), self.pool_of::<C>())
    }

    // -----------------------------------------------------------------
    // Signals
    // -----------------------------------------------------------------

    /// Registers a callback invoked whenever a `T` is newly added to an
    /// entity (not on overwrite).
    pub fn on_construct<T: 'static>(&self, callback: impl Fn(Entity) + Send + Sync + 'static) {
        self.signals.register_construct(TypeId::of::<T>(), Arc::new(callback) as Callback);
    }

    /// Registers a callback invoked whenever a `T` is removed from an
    /// entity, or its owning entity is destroyed.
    pub fn on_destroy<T: 'static>(&self, callback: impl Fn(Entity) + Send + Sync + 'static) {
        self.signals.register_destroy(TypeId::of::<T>(), Arc::new(callback) as Callback);
    }

    // -----------------------------------------------------------------
    // Singletons
    // -----------------------------------------------------------------

    /// Sets the process-wide (registry-scoped) `T` singleton, replacing any
    /// existing value.
    pub fn set_singleton<T: Clone + Send + Sync + 'static>(&self, value: T) -> T {
        self.singletons
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(TypeId::of::<T>(), Box::new(value.clone()));
        value
    }

    /// A clone of the `T` singleton. Fails with
    /// [`EcsError::MissingSingleton`] if none has been set.
    pub fn get_singleton<T: Clone + Send + Sync + 'static>(&self) -> EcsResult<T> {
        self.singletons
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&TypeId::of::<T>())
            .and_then(|value| value.downcast_ref::<T>())
            .cloned()
            .ok_or(EcsError::MissingSingleton {
                type_name: std::any::type_name::<T>(),
            })
    }

    pub fn has_singleton<T: 'static>(&self) -> bool {
        self.singletons
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(&TypeId::of::<T>())
    }

    pub fn remove_singleton<T: 'static>(&self) -> bool {
        self.singletons
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&TypeId::of::<T>())
            .is_some()
    }

    // -----------------------------------------------------------------
    // Relationships
    // -----------------------------------------------------------------

    /// Sets `parent` as the parent of `child`. Returns `false` (no change)
    /// if either handle is dead, `child == parent`, or the edge would
    /// create a cycle.
    ///
    /// Relationship edges are keyed by raw entity index, not by the full
    /// generational handle, so a stale handle whose index has been recycled
    /// onto a new live entity must be rejected here rather than silently
    /// operating on that new entity's edges.
    pub fn set_parent(&self, child: Entity, parent: Entity) -> bool {
        if !self.is_alive(child) || !self.is_alive(parent) {
            return false;
        }
        self.relationships.set_parent(child, parent)
    }

    pub fn remove_parent(&self, child: Entity) {
        if !self.is_alive(child) {
            return;
        }
        self.relationships.remove_parent(child);
    }

    pub fn get_parent(&self, child: Entity) -> Option<Entity> {
        if !self.is_alive(child) {
            return None;
        }
        self.relationships.get_parent(child)
    }

    pub fn has_parent(&self, child: Entity) -> bool {
        self.get_parent(child).is_some()
    }

    pub fn get_children(&self, parent: Entity) -> Vec<Entity> {
        if !self.is_alive(parent) {
            return Vec::new();
        }
        self.relationships.get_children(parent)
    }

    pub fn get_descendants(&self, parent: Entity) -> Vec<Entity> {
        if !self.is_alive(parent) {
            return Vec::new();
        }
        self.relationships.get_descendants(parent)
    }

    pub fn get_ancestors(&self, child: Entity) -> Vec<Entity> {
        if !self.is_alive(child) {
            return Vec::new();
        }
        self.relationships.get_ancestors(child)
    }

    pub fn get_root(&self, entity: Entity) -> Entity {
        if !self.is_alive(entity) {
            return entity;
        }
        self.relationships.get_root(entity)
    }

    pub fn is_ancestor(&self, potential_ancestor: Entity, entity: Entity) -> bool {
        if !self.is_alive(potential_ancestor) || !self.is_alive(entity) {
            return false;
        }
        self.relationships.is_ancestor(potential_ancestor, entity)
    }

    pub fn child_count(&self, parent: Entity) -> usize {
        if !self.is_alive(parent) {
            return 0;
        }
        self.relationships.child_count(parent)
    }

    pub fn depth(&self, entity: Entity) -> usize {
        if !self.is_alive(entity) {
            return 0;
        }
        self.relationships.depth(entity)
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("entity_count", &self.entity_count())
            .field("pool_count", &self.pools.read().unwrap_or_else(|e| e.into_inner()).len())
            .finish()
    }
}

fn downcast_pool<T: Send + Sync + 'static>(pool: Arc<dyn ErasedPool>) -> Arc<Pool<T>> {
    pool.as_any_arc()
        .downcast::<Pool<T>>()
        .expect("pool map TypeId key did not match the stored pool's concrete type")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Debug, PartialEq)]
    struct Position {
        x: f32,
        y: f32,
    }

    #[derive(Clone, Debug, PartialEq)]
    struct Velocity {
        dx: f32,
        dy: f32,
    }

    struct Frozen;

    // S1: basic spawn / emplace / get / kill / dead-entity access.
    #[test]
    fn s1_spawn_emplace_get_kill() {
        let registry = Registry::new();
        let e1 = registry.spawn();
        assert_eq!(e1.index(), 0);
        assert_eq!(e1.generation(), 0);

        registry.emplace(e1, Position { x: 10.0, y: 20.0 }).unwrap();
        assert_eq!(registry.get::<Position>(e1).unwrap(), Position { x: 10.0, y: 20.0 });

        registry.kill(e1);
        assert!(!registry.is_alive(e1));
        assert!(matches!(registry.get::<Position>(e1), Err(EcsError::DeadEntity { .. })));
    }

    // S2: handle reuse bumps the generation and invalidates the old handle.
    #[test]
    fn s2_handle_reuse() {
        let registry = Registry::new();
        let e1 = registry.spawn();
        registry.kill(e1);
        let e2 = registry.spawn();
        assert_eq!(e2.index(), e1.index());
        assert_eq!(e2.generation(), e1.generation() + 1);
        assert!(!registry.is_alive(e1));
        assert!(registry.is_alive(e2));
    }

    // S3: view2 visits entities owning both components, driven by the
    // smaller pool (Velocity here), and nothing else.
    #[test]
    fn s3_view_visits_intersection_only() {
        let registry = Registry::new();
        let a = registry.spawn();
        let b = registry.spawn();
        let c = registry.spawn();
        for e in [a, b, c] {
            registry.emplace(e, Position { x: 0.0, y: 0.0 }).unwrap();
        }
        registry.emplace(a, Velocity { dx: 1.0, dy: 0.0 }).unwrap();
        registry.emplace(c, Velocity { dx: 2.0, dy: 0.0 }).unwrap();

        let mut visited = Vec::new();
        registry.view2::<Position, Velocity>().each(|e, _, _| visited.push(e));
        visited.sort();
        let mut expected = vec![a, c];
        expected.sort();
        assert_eq!(visited, expected);
        assert_eq!(visited.len(), 2);
    }

    // S4: exclude filters out entities owning the excluded tag.
    #[test]
    fn s4_exclude_view_filters_tagged_entities() {
        let registry = Registry::new();
        let a = registry.spawn();
        let c = registry.spawn();
        for e in [a, c] {
            registry.emplace(e, Position { x: 0.0, y: 0.0 }).unwrap();
            registry.emplace(e, Velocity { dx: 1.0, dy: 0.0 }).unwrap();
        }
        registry.emplace(c, Frozen).unwrap();

        let mut visited = Vec::new();
        registry
            .exclude_view2::<Position, Velocity, Frozen>()
            .each(|e, _, _| visited.push(e));
        assert_eq!(visited, vec![a]);
    }

    // S5: construct fires once on first emplace, not on overwrite; destroy
    // fires exactly once on remove.
    #[test]
    fn s5_signal_dispatch_construct_once_destroy_once() {
        use std::sync::atomic::{AtomicU32, Ordering};

        let registry = Registry::new();
        let construct_count = Arc::new(AtomicU32::new(0));
        let destroy_count = Arc::new(AtomicU32::new(0));
        let cc = construct_count.clone();
        registry.on_construct::<Velocity>(move |_| {
            cc.fetch_add(1, Ordering::SeqCst);
        });
        let dc = destroy_count.clone();
        registry.on_destroy::<Velocity>(move |_| {
            dc.fetch_add(1, Ordering::SeqCst);
        });

        let e = registry.spawn();
        registry.emplace(e, Velocity { dx: 0.0, dy: 0.0 }).unwrap();
        assert_eq!(construct_count.load(Ordering::SeqCst), 1);

        registry.emplace(e, Velocity { dx: 1.0, dy: 1.0 }).unwrap();
        assert_eq!(construct_count.load(Ordering::SeqCst), 1, "overwrite must not re-fire construct");

        registry.remove::<Velocity>(e);
        assert_eq!(destroy_count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn get_or_emplace_returns_existing_without_refiring_construct() {
        use std::sync::atomic::{AtomicU32, Ordering};
        let registry = Registry::new();
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();
        registry.on_construct::<Position>(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        let e = registry.spawn();
        let first = registry.get_or_emplace(e, Position { x: 1.0, y: 1.0 }).unwrap();
        assert_eq!(first, Position { x: 1.0, y: 1.0 });
        let second = registry.get_or_emplace(e, Position { x: 9.0, y: 9.0 }).unwrap();
        assert_eq!(second, Position { x: 1.0, y: 1.0 }, "existing value wins");
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn patch_mutates_in_place() {
        let registry = Registry::new();
        let e = registry.spawn();
        registry.emplace(e, Position { x: 1.0, y: 1.0 }).unwrap();
        registry.patch::<Position, _>(e, |p| p.x += 41.0).unwrap();
        assert_eq!(registry.get::<Position>(e).unwrap().x, 42.0);
    }

    #[test]
    fn missing_component_is_distinguished_from_dead_entity() {
        let registry = Registry::new();
        let e = registry.spawn();
        assert!(matches!(
            registry.get::<Position>(e),
            Err(EcsError::MissingComponent { .. })
        ));
        registry.kill(e);
        assert!(matches!(registry.get::<Position>(e), Err(EcsError::DeadEntity { .. })));
    }

    #[test]
    fn has_and_count_reflect_pool_contents() {
        let registry = Registry::new();
        let a = registry.spawn();
        let b = registry.spawn();
        registry.emplace(a, Position { x: 0.0, y: 0.0 }).unwrap();
        assert!(registry.has::<Position>(a));
        assert!(!registry.has::<Position>(b));
        assert_eq!(registry.count::<Position>(), 1);
    }

    #[test]
    fn clear_removes_every_owner_and_fires_destroy() {
        use std::sync::atomic::{AtomicU32, Ordering};
        let registry = Registry::new();
        let destroyed = Arc::new(AtomicU32::new(0));
        let d = destroyed.clone();
        registry.on_destroy::<Position>(move |_| {
            d.fetch_add(1, Ordering::SeqCst);
        });
        let a = registry.spawn();
        let b = registry.spawn();
        registry.emplace(a, Position { x: 0.0, y: 0.0 }).unwrap();
        registry.emplace(b, Position { x: 1.0, y: 1.0 }).unwrap();

        registry.clear::<Position>();
        assert_eq!(registry.count::<Position>(), 0);
        assert!(!registry.has::<Position>(a));
        assert_eq!(destroyed.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn singleton_lifecycle() {
        #[derive(Clone, Debug, PartialEq)]
        struct GameClock(u64);

        let registry = Registry::new();
        assert!(matches!(registry.get_singleton::<GameClock>(), Err(EcsError::MissingSingleton { .. })));
        registry.set_singleton(GameClock(0));
        assert!(registry.has_singleton::<GameClock>());
        registry.set_singleton(GameClock(42));
        assert_eq!(registry.get_singleton::<GameClock>().unwrap(), GameClock(42));
        assert!(registry.remove_singleton::<GameClock>());
        assert!(!registry.has_singleton::<GameClock>());
    }

    #[test]
    fn kill_removes_relationship_edges() {
        let registry = Registry::new();
        let parent = registry.spawn();
        let child = registry.spawn();
        registry.set_parent(child, parent);
        registry.kill(parent);
        assert!(registry.get_parent(child).is_none());
    }

    #[test]
    fn stale_handle_with_recycled_index_is_rejected_by_relationship_ops() {
        let registry = Registry::new();
        let parent = registry.spawn();
        let stale_child = registry.spawn();
        registry.set_parent(stale_child, parent);
        registry.kill(stale_child);

        // Recycles stale_child's index onto a new, unrelated live entity.
        let new_child = registry.spawn();
        assert_eq!(new_child.index(), stale_child.index());

        registry.set_parent(new_child, parent);
        assert!(!registry.set_parent(stale_child, parent));
        assert!(registry.get_parent(stale_child).is_none());
        assert!(registry.get_children(parent).contains(&new_child));
        assert!(!registry.get_children(parent).contains(&stale_child));
    }

    #[test]
    fn remove_where_destroys_matching_entities_only() {
        let registry = Registry::new();
        let entities: Vec<Entity> = (0..5).map(|_| registry.spawn()).collect();
        let removed = registry.remove_where(|e| e.index() % 2 == 0);
        assert_eq!(removed, 3);
        for (i, e) in entities.iter().enumerate() {
            assert_eq!(registry.is_alive(*e), i % 2 != 0);
        }
    }

    #[test]
    fn group_rebuild_matches_view_each_entity_set() {
        let registry = Registry::new();
        let a = registry.spawn();
        let b = registry.spawn();
        registry.emplace(a, Position { x: 0.0, y: 0.0 }).unwrap();
        registry.emplace(a, Velocity { dx: 0.0, dy: 0.0 }).unwrap();

        let mut group = registry.group2::<Position, Velocity>();
        assert_eq!(group.entities().to_vec(), vec![a]);

        registry.emplace(b, Position { x: 0.0, y: 0.0 }).unwrap();
        registry.emplace(b, Velocity { dx: 0.0, dy: 0.0 }).unwrap();
        group.rebuild();

        let mut from_group: Vec<Entity> = group.entities().to_vec();
        let mut from_view = Vec::new();
        registry.view2::<Position, Velocity>().each(|e, _, _| from_view.push(e));
        from_group.sort();
        from_view.sort();
        assert_eq!(from_group, from_view);
    }

    #[test]
    fn compact_does_not_change_observable_contents() {
        let registry = Registry::new();
        let e = registry.spawn();
        registry.emplace(e, Position { x: 1.0, y: 2.0 }).unwrap();
        registry.compact();
        registry.compact_component::<Position>();
        assert_eq!(registry.get::<Position>(e).unwrap(), Position { x: 1.0, y: 2.0 });
    }

    #[test]
    fn spawning_sequential_entities_from_empty_yields_indices_0_to_n_minus_1() {
        let registry = Registry::new();
        for i in 0..100u32 {
            let e = registry.spawn();
            assert_eq!(e.index(), i);
            assert_eq!(e.generation(), 0);
        }
    }
}
