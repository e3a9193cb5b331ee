//! Query machinery: `View`, `ExcludeView`, `Group` and `ParallelView`.
//!
//! Arities 1 through 3 are provided as concrete structs rather than one
//! generic over a tuple of component types. The original sparse-set source
//! this module is ported from expresses the same idea with a variadic
//! template; Rust has no stable equivalent, and a trait-object-per-component
//! design would cost a dynamic dispatch on every entity visited in a hot
//! loop, so arity is monomorphized by hand instead.
//!
//! Every `each` here follows the same discipline: snapshot the matching
//! entities and a clone of their payloads out of the participating pools,
//! drop every pool lock, then run the caller's callback against the owned
//! snapshot. Mutations are written back into the pools, one short lock per
//! entity, only after the callback returns. No pool lock is ever held while
//! `f` runs, so a callback that re-enters the registry -- reading another
//! entity's component, counting a pool, even opening a nested view over the
//! same component types -- never deadlocks against the view driving it.

use std::sync::Arc;

use rayon::prelude::*;

use crate::entity::Entity;
use crate::storage::{ErasedPool, Pool};

fn is_excluded(entity: Entity, excludes: &[Arc<dyn ErasedPool>]) -> bool {
    excludes.iter().any(|pool| pool.contains_erased(entity))
}

// ---------------------------------------------------------------------------
// Arity 1
// ---------------------------------------------------------------------------

/// Iterates every entity owning component `A`.
pub struct View1<A: 'static + Send + Sync + Clone> {
    pool_a: Arc<Pool<A>>,
}

impl<A: 'static + Send + Sync + Clone> View1<A> {
    pub fn new(pool_a: Arc<Pool<A>>) -> Self {
        Self { pool_a }
    }

    pub fn each(&self, mut f: impl FnMut(Entity, &mut A)) {
        let snapshot = self.pool_a.snapshot();
        for (entity, mut a) in snapshot {
            f(entity, &mut a);
            self.pool_a.with_mut(entity, |slot| *slot = a);
        }
    }

    pub fn len(&self) -> usize {
        self.pool_a.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pool_a.is_empty()
    }

    pub fn exclude(self, excludes: Vec<Arc<dyn ErasedPool>>) -> ExcludeView1<A> {
        ExcludeView1 { view: self, excludes }
    }
}

/// [`View1`] filtered to exclude entities owning any of a separate set of
/// component types.
pub struct ExcludeView1<A: 'static + Send + Sync + Clone> {
    view: View1<A>,
    excludes: Vec<Arc<dyn ErasedPool>>,
}

impl<A: 'static + Send + Sync + Clone> ExcludeView1<A> {
    pub fn each(&self, mut f: impl FnMut(Entity, &mut A)) {
        let excludes = &self.excludes;
        self.view.each(|entity, a| {
            if !is_excluded(entity, excludes) {
                f(entity, a);
            }
        });
    }
}

/// A cached entity list matching component `A`, recomputed on [`Group1::rebuild`].
pub struct Group1<A: 'static + Send + Sync + Clone> {
    pool_a: Arc<Pool<A>>,
    entities: Vec<Entity>,
}

impl<A: 'static + Send + Sync + Clone> Group1<A> {
    pub fn new(pool_a: Arc<Pool<A>>) -> Self {
        let entities = pool_a.packed_entities();
        Self { pool_a, entities }
    }

    /// Recomputes the cached entity list from the pool's current contents.
    pub fn rebuild(&mut self) {
        self.entities = self.pool_a.packed_entities();
    }

    /// Iterates the cached snapshot. If the pool changed since the last
    /// [`rebuild`](Self::rebuild), this silently operates on stale entities:
    /// callers that need up-to-date membership must rebuild first.
    pub fn each(&self, mut f: impl FnMut(Entity, &mut A)) {
        for &entity in &self.entities {
            let Some(mut a) = self.pool_a.get(entity) else {
                continue;
            };
            f(entity, &mut a);
            self.pool_a.with_mut(entity, |slot| *slot = a);
        }
    }

    pub fn entities(&self) -> &[Entity] {
        &self.entities
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

/// Rayon-backed parallel iteration over entities owning component `A`.
pub struct ParallelView1<A: 'static + Send + Sync + Clone> {
    pool_a: Arc<Pool<A>>,
}

impl<A: 'static + Send + Sync + Clone> ParallelView1<A> {
    pub fn new(pool_a: Arc<Pool<A>>) -> Self {
        Self { pool_a }
    }

    /// Runs `f` for every matching entity, chunked and scheduled by rayon.
    /// The whole pool is snapshotted up front (no lock held during `f`), `f`
    /// runs against each chunk's owned slice in parallel, and every mutated
    /// value is written back once every chunk has finished.
    pub fn each(&self, chunk_size: usize, f: impl Fn(Entity, &mut A) + Sync + Send) {
        let mut snapshot = self.pool_a.snapshot();
        let chunk_size = chunk_size.max(1);
        snapshot.par_chunks_mut(chunk_size).for_each(|chunk| {
            for (entity, a) in chunk.iter_mut() {
                f(*entity, a);
            }
        });
        for (entity, a) in snapshot {
            self.pool_a.with_mut(entity, |slot| *slot = a);
        }
    }
}

// ---------------------------------------------------------------------------
// Arity 2
// ---------------------------------------------------------------------------

/// Iterates every entity owning both `A` and `B`.
pub struct View2<A: 'static + Send + Sync + Clone, B: 'static + Send + Sync + Clone> {
    pool_a: Arc<Pool<A>>,
    pool_b: Arc<Pool<B>>,
}

impl<A: 'static + Send + Sync + Clone, B: 'static + Send + Sync + Clone> View2<A, B> {
    pub fn new(pool_a: Arc<Pool<A>>, pool_b: Arc<Pool<B>>) -> Self {
        Self { pool_a, pool_b }
    }

    /// Snapshots both pools (locking one at a time, never together) and
    /// returns the owned triples for entities present in both.
    fn matched_snapshot(&self) -> Vec<(Entity, A, B)> {
        if self.pool_a.len() <= self.pool_b.len() {
            self.pool_a
                .snapshot()
                .into_iter()
                .filter_map(|(entity, a)| self.pool_b.get(entity).map(|b| (entity, a, b)))
                .collect()
        } else {
            self.pool_b
                .snapshot()
                .into_iter()
                .filter_map(|(entity, b)| self.pool_a.get(entity).map(|a| (entity, a, b)))
                .collect()
        }
    }

    pub fn each(&self, mut f: impl FnMut(Entity, &mut A, &mut B)) {
        for (entity, mut a, mut b) in self.matched_snapshot() {
            f(entity, &mut a, &mut b);
            self.pool_a.with_mut(entity, |slot| *slot = a);
            self.pool_b.with_mut(entity, |slot| *slot = b);
        }
    }

    pub fn exclude(self, excludes: Vec<Arc<dyn ErasedPool>>) -> ExcludeView2<A, B> {
        ExcludeView2 { view: self, excludes }
    }
}

pub struct ExcludeView2<A: 'static + Send + Sync + Clone, B: 'static + Send + Sync + Clone> {
    view: View2<A, B>,
    excludes: Vec<Arc<dyn ErasedPool>>,
}

impl<A: 'static + Send + Sync + Clone, B: 'static + Send + Sync + Clone> ExcludeView2<A, B> {
    pub fn each(&self, mut f: impl FnMut(Entity, &mut A, &mut B)) {
        let excludes = &self.excludes;
        self.view.each(|entity, a, b| {
            if !is_excluded(entity, excludes) {
                f(entity, a, b);
            }
        });
    }
}

pub struct Group2<A: 'static + Send + Sync + Clone, B: 'static + Send + Sync + Clone> {
    view: View2<A, B>,
    entities: Vec<Entity>,
}

impl<A: 'static + Send + Sync + Clone, B: 'static + Send + Sync + Clone> Group2<A, B> {
    pub fn new(pool_a: Arc<Pool<A>>, pool_b: Arc<Pool<B>>) -> Self {
        let view = View2::new(pool_a, pool_b);
        let mut group = Self { view, entities: Vec::new() };
        group.rebuild();
        group
    }

    pub fn rebuild(&mut self) {
        self.entities = self.view.matched_snapshot().into_iter().map(|(e, _, _)| e).collect();
    }

    pub fn each(&self, mut f: impl FnMut(Entity, &mut A, &mut B)) {
        for &entity in &self.entities {
            let (Some(mut a), Some(mut b)) = (self.view.pool_a.get(entity), self.view.pool_b.get(entity)) else {
                continue;
            };
            f(entity, &mut a, &mut b);
            self.view.pool_a.with_mut(entity, |slot| *slot = a);
            self.view.pool_b.with_mut(entity, |slot| *slot = b);
        }
    }

    pub fn entities(&self) -> &[Entity] {
        &self.entities
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

pub struct ParallelView2<A: 'static + Send + Sync + Clone, B: 'static + Send + Sync + Clone> {
    pool_a: Arc<Pool<A>>,
    pool_b: Arc<Pool<B>>,
}

impl<A: 'static + Send + Sync + Clone, B: 'static + Send + Sync + Clone> ParallelView2<A, B> {
    pub fn new(pool_a: Arc<Pool<A>>, pool_b: Arc<Pool<B>>) -> Self {
        Self { pool_a, pool_b }
    }

    pub fn each(&self, chunk_size: usize, f: impl Fn(Entity, &mut A, &mut B) + Sync + Send) {
        let view = View2::new(self.pool_a.clone(), self.pool_b.clone());
        let mut matched = view.matched_snapshot();

        let chunk_size = chunk_size.max(1);
        matched.par_chunks_mut(chunk_size).for_each(|chunk| {
            for (entity, a, b) in chunk.iter_mut() {
                f(*entity, a, b);
            }
        });

        for (entity, a, b) in matched {
            self.pool_a.with_mut(entity, |slot| *slot = a);
            self.pool_b.with_mut(entity, |slot| *slot = b);
        }
    }
}

// ---------------------------------------------------------------------------
// Arity 3
// ---------------------------------------------------------------------------

/// Iterates every entity owning `A`, `B` and `C`.
pub struct View3<A: 'static + Send + Sync + Clone, B: 'static + Send + Sync + Clone, C: 'static + Send + Sync + Clone> {
    pool_a: Arc<Pool<A>>,
    pool_b: Arc<Pool<B>>,
    pool_c: Arc<Pool<C>>,
}

impl<A, B, C> View3<A, B, C>
where
    A: 'static + Send + Sync + Clone,
    B: 'static + Send + Sync + Clone,
    C: 'static + Send + Sync + Clone,
{
    pub fn new(pool_a: Arc<Pool<A>>, pool_b: Arc<Pool<B>>, pool_c: Arc<Pool<C>>) -> Self {
        Self { pool_a, pool_b, pool_c }
    }

    /// Snapshots the smallest pool first (locking one pool at a time), then
    /// filters against the other two via their own short-lived `get` locks.
    fn matched_snapshot(&self) -> Vec<(Entity, A, B, C)> {
        let lens = [self.pool_a.len(), self.pool_b.len(), self.pool_c.len()];
        let driver = lens.iter().enumerate().min_by_key(|(_, &len)| len).map(|(i, _)| i).unwrap_or(0);

        match driver {
            0 => self
                .pool_a
                .snapshot()
                .into_iter()
                .filter_map(|(entity, a)| {
                    let b = self.pool_b.get(entity)?;
                    let c = self.pool_c.get(entity)?;
                    Some((entity, a, b, c))
                })
                .collect(),
            1 => self
                .pool_b
                .snapshot()
                .into_iter()
                .filter_map(|(entity, b)| {
                    let a = self.pool_a.get(entity)?;
                    let c = self.pool_c.get(entity)?;
                    Some((entity, a, b, c))
                })
                .collect(),
            _ => self
                .pool_c
                .snapshot()
                .into_iter()
                .filter_map(|(entity, c)| {
                    let a = self.pool_a.get(entity)?;
                    let b = self.pool_b.get(entity)?;
                    Some((entity, a, b, c))
                })
                .collect(),
        }
    }

    pub fn each(&self, mut f: impl FnMut(Entity, &mut A, &mut B, &mut C)) {
        for (entity, mut a, mut b, mut c) in self.matched_snapshot() {
            f(entity, &mut a, &mut b, &mut c);
            self.pool_a.with_mut(entity, |slot| *slot = a);
            self.pool_b.with_mut(entity, |slot| *slot = b);
            self.pool_c.with_mut(entity, |slot| *slot = c);
        }
    }

    pub fn exclude(self, excludes: Vec<Arc<dyn ErasedPool>>) -> ExcludeView3<A, B, C> {
        ExcludeView3 { view: self, excludes }
    }
}

pub struct ExcludeView3<A: 'static + Send + Sync + Clone, B: 'static + Send + Sync + Clone, C: 'static + Send + Sync + Clone> {
    view: View3<A, B, C>,
    excludes: Vec<Arc<dyn ErasedPool>>,
}

impl<A, B, C> ExcludeView3<A, B, C>
where
    A: 'static + Send + Sync + Clone,
    B: 'static + Send + Sync + Clone,
    C: 'static + Send + Sync + Clone,
{
    pub fn each(&self, mut f: impl FnMut(Entity, &mut A, &mut B, &mut C)) {
        let excludes = &self.excludes;
        self.view.each(|entity, a, b, c| {
            if !is_excluded(entity, excludes) {
                f(entity, a, b, c);
            }
        });
    }
}

pub struct Group3<A: 'static + Send + Sync + Clone, B: 'static + Send + Sync + Clone, C: 'static + Send + Sync + Clone> {
    view: View3<A, B, C>,
    entities: Vec<Entity>,
}

impl<A, B, C> Group3<A, B, C>
where
    A: 'static + Send + Sync + Clone,
    B: 'static + Send + Sync + Clone,
    C: 'static + Send + Sync + Clone,
{
    pub fn new(pool_a: Arc<Pool<A>>, pool_b: Arc<Pool<B>>, pool_c: Arc<Pool<C>>) -> Self {
        let view = View3::new(pool_a, pool_b, pool_c);
        let mut group = Self { view, entities: Vec::new() };
        group.rebuild();
        group
    }

    pub fn rebuild(&mut self) {
        self.entities = self.view.matched_snapshot().into_iter().map(|(e, _, _, _)| e).collect();
    }

    pub fn each(&self, mut f: impl FnMut(Entity, &mut A, &mut B, &mut C)) {
        for &entity in &self.entities {
            let (Some(mut a), Some(mut b), Some(mut c)) =
                (self.view.pool_a.get(entity), self.view.pool_b.get(entity), self.view.pool_c.get(entity))
            else {
                continue;
            };
            f(entity, &mut a, &mut b, &mut c);
            self.view.pool_a.with_mut(entity, |slot| *slot = a);
            self.view.pool_b.with_mut(entity, |slot| *slot = b);
            self.view.pool_c.with_mut(entity, |slot| *slot = c);
        }
    }

    pub fn entities(&self) -> &[Entity] {
        &self.entities
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

pub struct ParallelView3<A: 'static + Send + Sync + Clone, B: 'static + Send + Sync + Clone, C: 'static + Send + Sync + Clone> {
    pool_a: Arc<Pool<A>>,
    pool_b: Arc<Pool<B>>,
    pool_c: Arc<Pool<C>>,
}

impl<A, B, C> ParallelView3<A, B, C>
where
    A: 'static + Send + Sync + Clone,
    B: 'static + Send + Sync + Clone,
    C: 'static + Send + Sync + Clone,
{
    pub fn new(pool_a: Arc<Pool<A>>, pool_b: Arc<Pool<B>>, pool_c: Arc<Pool<C>>) -> Self {
        Self { pool_a, pool_b, pool_c }
    }

    pub fn each(&self, chunk_size: usize, f: impl Fn(Entity, &mut A, &mut B, &mut C) + Sync + Send) {
        let view = View3::new(self.pool_a.clone(), self.pool_b.clone(), self.pool_c.clone());
        let mut matched = view.matched_snapshot();

        let chunk_size = chunk_size.max(1);
        matched.par_chunks_mut(chunk_size).for_each(|chunk| {
            for (entity, a, b, c) in chunk.iter_mut() {
                f(*entity, a, b, c);
            }
        });

        for (entity, a, b, c) in matched {
            self.pool_a.with_mut(entity, |slot| *slot = a);
            self.pool_b.with_mut(entity, |slot| *slot = b);
            self.pool_c.with_mut(entity, |slot| *slot = c);
        }
    }
}
