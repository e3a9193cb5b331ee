//! A thread-safe buffer of deferred structural changes.
//!
//! Systems running under a [`crate::view::ParallelView`] cannot safely
//! mutate the registry's entity/component tables while a view is mid
//! iteration. A [`CommandBuffer`] lets them record the *intent* instead
//! ("spawn an entity", "remove this component") and apply every recorded
//! command later, from a single thread, via [`CommandBuffer::flush`].
//!
//! Recording is safe to call from any thread (one [`std::sync::Mutex`]
//! guards the whole buffer). Flushing is not: it walks and clears shared
//! state and must be called from a single thread with no concurrent
//! recorders in flight, exactly like the registry mutation it is deferring.

use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;

use crate::entity::Entity;
use crate::registry::Registry;

/// An opaque id standing in for an entity that does not exist yet.
///
/// Deliberately a disjoint id space from [`Entity`] rather than a raw
/// `Entity` built from an otherwise-unused index: reusing `Entity`'s index
/// range for placeholders (as some command-buffer designs do) risks a
/// placeholder id colliding with a real, already-live entity index. Keeping
/// placeholders in their own namespace makes that collision structurally
/// impossible.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct Placeholder(u32);

/// The target of a deferred command: either a real, already-allocated
/// entity, or a placeholder that [`CommandBuffer::flush`] will resolve once
/// its matching deferred spawn has run.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityRef {
    Real(Entity),
    Placeholder(Placeholder),
}

impl fmt::Debug for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityRef::Real(e) => write!(f, "EntityRef::Real({e:?})"),
            EntityRef::Placeholder(p) => write!(f, "EntityRef::Placeholder({})", p.0),
        }
    }
}

impl From<Entity> for EntityRef {
    fn from(entity: Entity) -> Self {
        EntityRef::Real(entity)
    }
}

type Command = Box<dyn FnOnce(&Registry, &mut HashMap<Placeholder, Entity>) + Send>;

struct State {
    commands: Vec<Command>,
    next_placeholder: u32,
}

/// Deferred mutation buffer bound to one [`Registry`].
pub struct CommandBuffer<'a> {
    registry: &'a Registry,
    state: Mutex<State>,
}

fn resolve(target: EntityRef, placeholders: &HashMap<Placeholder, Entity>) -> Entity {
    match target {
        EntityRef::Real(entity) => entity,
        EntityRef::Placeholder(p) => placeholders.get(&p).copied().unwrap_or(Entity::NULL),
    }
}

impl<'a> CommandBuffer<'a> {
    pub fn new(registry: &'a Registry) -> Self {
        Self {
            registry,
            state: Mutex::new(State {
                commands: Vec::new(),
                next_placeholder: 0,
            }),
        }
    }

    /// Records entity creation. Returns a placeholder that resolves to the
    /// real, freshly spawned entity once [`flush`](Self::flush) runs.
    pub fn spawn_deferred(&self) -> EntityRef {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let placeholder = Placeholder(state.next_placeholder);
        state.next_placeholder += 1;
        state.commands.push(Box::new(move |registry, placeholders| {
            let real = registry.spawn();
            placeholders.insert(placeholder, real);
        }));
        EntityRef::Placeholder(placeholder)
    }

    /// Records entity destruction.
    pub fn destroy_deferred(&self, target: impl Into<EntityRef>) {
        let target = target.into();
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.commands.push(Box::new(move |registry, placeholders| {
            registry.kill(resolve(target, placeholders));
        }));
    }

    /// Records adding (or overwriting) a component.
    pub fn emplace_deferred<T: Send + Sync + 'static>(&self, target: impl Into<EntityRef>, value: T) {
        let target = target.into();
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.commands.push(Box::new(move |registry, placeholders| {
            // Emplacing against a placeholder that failed to resolve (or a
            // target killed earlier in this same flush) targets a dead
            // entity; emplace reports that as `Err(DeadEntity)` rather than
            // panicking, and a deferred command silently drops it, matching
            // `kill_deferred`'s own silent-no-op-on-dead-entity contract.
            let _ = registry.emplace(resolve(target, placeholders), value);
        }));
    }

    /// Records removing a component.
    pub fn remove_deferred<T: Send + Sync + 'static>(&self, target: impl Into<EntityRef>) {
        let target = target.into();
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.commands.push(Box::new(move |registry, placeholders| {
            registry.remove::<T>(resolve(target, placeholders));
        }));
    }

    /// Number of commands recorded but not yet flushed.
    pub fn pending_count(&self) -> usize {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).commands.len()
    }

    /// Discards every recorded command without running it.
    pub fn clear(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.commands.clear();
        state.next_placeholder = 0;
    }

    /// Applies every recorded command, in recording order, then clears the
    /// buffer. Must be called from a single thread with no concurrent
    /// recorders: it holds the buffer's lock for the entire run, so a
    /// command that (incorrectly) tries to record into this same buffer
    /// would deadlock, exactly as it would against the source this buffer is
    /// modeled on.
    pub fn flush(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let mut placeholders = HashMap::new();
        let commands = std::mem::take(&mut state.commands);
        state.next_placeholder = 0;
        for command in commands {
            command(self.registry, &mut placeholders);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Debug, PartialEq)]
    struct Marker(u32);

    #[test]
    fn deferred_spawn_placeholder_resolves_to_a_real_entity_on_flush() {
        let registry = Registry::new();
        let buffer = CommandBuffer::new(&registry);
        let placeholder = buffer.spawn_deferred();
        buffer.emplace_deferred(placeholder, Marker(7));
        assert_eq!(buffer.pending_count(), 2);

        buffer.flush();
        assert_eq!(buffer.pending_count(), 0);

        let alive: Vec<Entity> = registry.entities().collect();
        assert_eq!(alive.len(), 1);
        assert_eq!(registry.get::<Marker>(alive[0]).unwrap(), Marker(7));
    }

    #[test]
    fn clear_discards_without_running() {
        let registry = Registry::new();
        let buffer = CommandBuffer::new(&registry);
        buffer.spawn_deferred();
        buffer.clear();
        buffer.flush();
        assert_eq!(registry.entities().count(), 0);
    }

    #[test]
    fn deferred_destroy_on_a_real_entity() {
        let registry = Registry::new();
        let e = registry.spawn();
        registry.emplace(e, Marker(1)).unwrap();
        let buffer = CommandBuffer::new(&registry);
        buffer.destroy_deferred(e);
        buffer.flush();
        assert!(!registry.is_alive(e));
    }
}
