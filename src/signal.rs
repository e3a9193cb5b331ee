//! Component lifecycle signals ("construct" / "destroy").
//!
//! Callbacks are stored behind a reader-writer lock but are always invoked
//! *after* the lock is released: the callback list is cloned under the lock,
//! the lock is dropped, and only then is each callback run. This is the
//! deadlock-avoidance rule -- a callback may legally call back into the
//! registry (including registering further callbacks), and the dispatcher
//! must never be mid-lock when that happens.

use std::any::TypeId;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::entity::Entity;

/// A lifecycle callback: receives the entity whose component just
/// transitioned.
pub type Callback = Arc<dyn Fn(Entity) + Send + Sync>;

#[derive(Default)]
struct Callbacks {
    construct: HashMap<TypeId, Vec<Callback>>,
    destroy: HashMap<TypeId, Vec<Callback>>,
}

/// Dispatches "construct" and "destroy" events keyed by component type.
#[derive(Default)]
pub struct SignalDispatcher {
    callbacks: RwLock<Callbacks>,
}

impl SignalDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_construct(&self, type_id: TypeId, callback: Callback) {
        self.callbacks
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .construct
            .entry(type_id)
            .or_default()
            .push(callback);
    }

    pub fn register_destroy(&self, type_id: TypeId, callback: Callback) {
        self.callbacks
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .destroy
            .entry(type_id)
            .or_default()
            .push(callback);
    }

    pub fn dispatch_construct(&self, type_id: TypeId, entity: Entity) {
        let snapshot = {
            let guard = self.callbacks.read().unwrap_or_else(|e| e.into_inner());
            guard.construct.get(&type_id).cloned().unwrap_or_default()
        };
        for cb in snapshot {
            cb(entity);
        }
    }

    pub fn dispatch_destroy(&self, type_id: TypeId, entity: Entity) {
        let snapshot = {
            let guard = self.callbacks.read().unwrap_or_else(|e| e.into_inner());
            guard.destroy.get(&type_id).cloned().unwrap_or_default()
        };
        for cb in snapshot {
            cb(entity);
        }
    }

    /// Clears every registered callback for one component type, both phases.
    pub fn clear_callbacks(&self, type_id: TypeId) {
        let mut guard = self.callbacks.write().unwrap_or_else(|e| e.into_inner());
        guard.construct.remove(&type_id);
        guard.destroy.remove(&type_id);
    }

    pub fn clear_all_callbacks(&self) {
        let mut guard = self.callbacks.write().unwrap_or_else(|e| e.into_inner());
        guard.construct.clear();
        guard.destroy.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn construct_callback_runs_once_per_registration() {
        let dispatcher = SignalDispatcher::new();
        let counter = Arc::new(AtomicU32::new(0));
        let c = counter.clone();
        dispatcher.register_construct(
            TypeId::of::<u32>(),
            Arc::new(move |_| {
                c.fetch_add(1, Ordering::SeqCst);
            }),
        );
        dispatcher.dispatch_construct(TypeId::of::<u32>(), Entity::new(0, 0));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn reentrant_registration_during_dispatch_does_not_deadlock() {
        let dispatcher = Arc::new(SignalDispatcher::new());
        let inner = dispatcher.clone();
        dispatcher.register_construct(
            TypeId::of::<u32>(),
            Arc::new(move |e| {
                inner.register_destroy(TypeId::of::<u32>(), Arc::new(move |_| {}));
                inner.dispatch_destroy(TypeId::of::<u32>(), e);
            }),
        );
        dispatcher.dispatch_construct(TypeId::of::<u32>(), Entity::new(0, 0));
    }

    #[test]
    fn clear_callbacks_removes_both_phases() {
        let dispatcher = SignalDispatcher::new();
        dispatcher.register_construct(TypeId::of::<u32>(), Arc::new(|_| {}));
        dispatcher.register_destroy(TypeId::of::<u32>(), Arc::new(|_| {}));
        dispatcher.clear_callbacks(TypeId::of::<u32>());
        let counter = Arc::new(AtomicU32::new(0));
        let c = counter.clone();
        dispatcher.register_construct(
            TypeId::of::<u32>(),
            Arc::new(move |_| {
                c.fetch_add(1, Ordering::SeqCst);
            }),
        );
        dispatcher.dispatch_construct(TypeId::of::<u32>(), Entity::new(0, 0));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
