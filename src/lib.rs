//! A sparse-set entity-component-system core for real-time, multiplayer
//! games.
//!
//! Five tightly coupled pieces make up the core:
//!
//! - [`entity`]: generational entity handles and their allocator.
//! - [`storage`]: per-component-type sparse-set pools (dense and tag).
//! - [`view`]: `View` / `Group` / `ExcludeView` / `ParallelView` query
//!   machinery built on top of those pools.
//! - [`command`]: a thread-safe deferred mutation buffer.
//! - [`scheduler`]: a named-system runner with topological dependency
//!   ordering.
//!
//! [`registry::Registry`] is the coordinator that ties all of the above
//! together and is the crate's main entry point.
//!
//! ```
//! use sparsecs::Registry;
//!
//! #[derive(Clone, Debug, PartialEq)]
//! struct Position {
//!     x: f32,
//!     y: f32,
//! }
//!
//! let registry = Registry::new();
//! let e = registry.spawn();
//! registry.emplace(e, Position { x: 10.0, y: 20.0 }).unwrap();
//! assert_eq!(registry.get::<Position>(e).unwrap(), Position { x: 10.0, y: 20.0 });
//! ```

pub mod command;
pub mod entity;
pub mod prefab;
pub mod registry;
pub mod relationship;
pub mod scheduler;
pub mod serialize;
pub mod signal;
pub mod storage;
pub mod view;

pub use command::{CommandBuffer, EntityRef, Placeholder};
pub use entity::Entity;
pub use prefab::PrefabManager;
pub use registry::Registry;
pub use scheduler::SystemScheduler;

use thiserror::Error;

/// The stable error taxonomy for every fallible ECS operation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EcsError {
    /// Operation targeted an entity whose handle no longer matches the live
    /// generation for its index (it was destroyed, possibly recycled since).
    #[error("entity {entity} is dead")]
    DeadEntity { entity: Entity },

    /// The entity is alive but does not own the requested component type.
    #[error("entity {entity} has no component `{component}`")]
    MissingComponent { entity: Entity, component: &'static str },

    /// `get_singleton::<T>()` was called with no value of that type set.
    #[error("singleton `{type_name}` is not set")]
    MissingSingleton { type_name: &'static str },

    /// Prefab instantiation by an unregistered name.
    #[error("prefab `{name}` is not registered")]
    PrefabNotFound { name: String },

    /// The scheduler's dependency graph contains a cycle.
    #[error("system dependency graph contains a cycle")]
    CycleDetected,

    /// A system declared a dependency on a name that was never registered.
    #[error("system `{system}` depends on unregistered system `{dependency}`")]
    UnknownDependency { system: String, dependency: String },

    /// `add` was called with a name that is already registered.
    #[error("system `{0}` is already registered")]
    DuplicateSystem(String),

    /// A named system lookup (`run(name)`, `set_enabled`) found nothing.
    #[error("system `{0}` is not registered")]
    UnknownSystem(String),

    /// `set_parent` would have created a cycle (or self-parented an
    /// entity). The relationship API itself reports this as `bool` per
    /// §7's "non-fatal" propagation policy; this variant exists only to
    /// give that `false` a shared, loggable `Display` message.
    #[error("setting {child} as a child of {parent} would create a relationship cycle")]
    RelationshipCycle { child: Entity, parent: Entity },
}

/// Convenience alias used throughout the crate's fallible operations.
pub type EcsResult<T> = Result<T, EcsError>;

/// Common imports for consumers of this crate.
pub mod prelude {
    pub use crate::command::{CommandBuffer, EntityRef, Placeholder};
    pub use crate::entity::Entity;
    pub use crate::prefab::PrefabManager;
    pub use crate::registry::Registry;
    pub use crate::scheduler::SystemScheduler;
    pub use crate::EcsError;
    pub use crate::EcsResult;
}
