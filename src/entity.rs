//! Entity identifiers and the generational allocator that hands them out.
//!
//! An [`Entity`] is a 32-bit handle packing a 20-bit index and a 12-bit
//! generation. The generation is bumped whenever an index is recycled, so a
//! handle captured before a destroy can be detected as stale in O(1) without
//! touching any component storage.

use std::fmt;

// ---------------------------------------------------------------------------
// Entity
// ---------------------------------------------------------------------------

const INDEX_BITS: u32 = 20;
const INDEX_MASK: u32 = (1 << INDEX_BITS) - 1;
const GENERATION_BITS: u32 = 12;
const GENERATION_MASK: u32 = (1 << GENERATION_BITS) - 1;

/// Number of distinct indices the 20-bit index field can represent. No
/// [`Entity`] can ever carry an index at or beyond this value.
const INDEX_SPACE: u32 = 1 << INDEX_BITS;

/// Generation value reserved to mark a slot as permanently tombstoned.
pub const MAX_GENERATION: u32 = GENERATION_MASK;

/// Raw id reserved for [`Entity::NULL`].
const NULL_ID: u32 = u32::MAX;

/// A generational entity handle.
///
/// Layout (low to high bit): `[index: 20 bits][generation: 12 bits]`. Value
/// type -- copying an `Entity` does not affect ownership of anything; it is
/// only meaningful relative to the [`crate::registry::Registry`] that
/// produced it.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct Entity(u32);

impl Entity {
    /// The null sentinel: no valid index can ever equal this raw value.
    pub const NULL: Entity = Entity(NULL_ID);

    /// Builds an entity from a raw packed id.
    #[inline]
    pub const fn from_raw(raw: u32) -> Self {
        Entity(raw)
    }

    /// Packs an `(index, generation)` pair into an entity handle.
    #[inline]
    pub const fn new(index: u32, generation: u32) -> Self {
        Entity((index & INDEX_MASK) | ((generation & GENERATION_MASK) << INDEX_BITS))
    }

    /// The index portion (low 20 bits).
    #[inline]
    pub const fn index(self) -> u32 {
        self.0 & INDEX_MASK
    }

    /// The generation portion (high 12 bits).
    #[inline]
    pub const fn generation(self) -> u32 {
        (self.0 >> INDEX_BITS) & GENERATION_MASK
    }

    /// The raw packed `u32` representation.
    #[inline]
    pub const fn to_raw(self) -> u32 {
        self.0
    }

    /// Whether this is the null sentinel.
    #[inline]
    pub const fn is_null(self) -> bool {
        self.0 == NULL_ID
    }

    /// Whether this handle's generation is the reserved tombstone generation.
    #[inline]
    pub const fn is_tombstone(self) -> bool {
        self.generation() == MAX_GENERATION
    }
}

impl Default for Entity {
    fn default() -> Self {
        Entity::NULL
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            write!(f, "Entity(null)")
        } else {
            write!(f, "Entity({}v{})", self.index(), self.generation())
        }
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.index(), self.generation())
    }
}

// ---------------------------------------------------------------------------
// EntityAllocator
// ---------------------------------------------------------------------------

/// Bounded number of recycle attempts before a corrupted or exhausted slot is
/// tombstoned and allocation falls through to a fresh index.
const MAX_RECYCLE_ATTEMPTS: u32 = 5;

/// Allocates and recycles [`Entity`] handles with generational tracking.
///
/// `free_indices` is a LIFO stack: the most recently freed index is the next
/// one reused, keeping the hot set of indices small. This is not synchronized
/// internally -- callers (the [`crate::registry::Registry`]) hold their own
/// lock around the allocator.
#[derive(Debug, Default)]
pub struct EntityAllocator {
    generations: Vec<u32>,
    free_indices: Vec<u32>,
    tombstones: Vec<u32>,
}

impl EntityAllocator {
    /// Creates an empty allocator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-sizes the backing storage for `capacity` entities.
    pub fn reserve(&mut self, capacity: usize) {
        self.generations.reserve(capacity);
        self.free_indices.reserve(capacity / 4);
    }

    /// Allocates a fresh entity, preferring a recycled index.
    ///
    /// # Panics
    ///
    /// Panics if every index in the 20-bit index space (`2^20` slots) is
    /// live and none can be recycled. An [`Entity`] cannot represent an
    /// index outside that range, so there is no silent fallback here --
    /// the alternative would be wrapping back onto index 0 while it is
    /// still alive, aliasing two live entities onto one handle.
    pub fn allocate(&mut self) -> Entity {
        let mut attempts = 0;
        while let Some(idx) = self.free_indices.pop() {
            if (idx as usize) < self.generations.len() && self.generations[idx as usize] < MAX_GENERATION {
                return Entity::new(idx, self.generations[idx as usize]);
            }
            self.tombstones.push(idx);
            attempts += 1;
            if attempts >= MAX_RECYCLE_ATTEMPTS {
                break;
            }
        }

        assert!(
            (self.generations.len() as u32) < INDEX_SPACE,
            "entity index space exhausted: all {INDEX_SPACE} indices are live"
        );
        let idx = self.generations.len() as u32;
        self.generations.push(0);
        Entity::new(idx, 0)
    }

    /// Destroys `entity`, bumping its slot's generation (or tombstoning it if
    /// the generation counter is exhausted). Returns `true` if the entity was
    /// alive; destroying a stale or already-dead handle is a no-op.
    pub fn destroy(&mut self, entity: Entity) -> bool {
        let idx = entity.index() as usize;
        if idx >= self.generations.len() || self.generations[idx] != entity.generation() {
            return false;
        }

        if self.generations[idx] >= MAX_GENERATION - 1 {
            self.generations[idx] = MAX_GENERATION;
            self.tombstones.push(entity.index());
        } else {
            self.generations[idx] += 1;
            self.free_indices.push(entity.index());
        }
        true
    }

    /// Whether `entity`'s generation matches the slot's live generation.
    #[inline]
    pub fn is_alive(&self, entity: Entity) -> bool {
        let idx = entity.index() as usize;
        idx < self.generations.len() && self.generations[idx] == entity.generation()
    }

    /// Resets every tombstoned slot's generation to zero and returns it to
    /// the free list. Returns the number of slots reclaimed.
    pub fn cleanup_tombstones(&mut self) -> usize {
        if self.tombstones.is_empty() {
            return 0;
        }
        let mut cleaned = 0;
        for idx in self.tombstones.drain(..) {
            if (idx as usize) < self.generations.len() {
                self.generations[idx as usize] = 0;
                self.free_indices.push(idx);
                cleaned += 1;
            }
        }
        cleaned
    }

    /// Total number of index slots ever allocated (live, free, or tombstoned).
    pub fn slot_count(&self) -> usize {
        self.generations.len()
    }

    /// Iterates every index whose current generation is live, yielding the
    /// fully-formed [`Entity`] handle for each.
    pub fn iter_alive(&self) -> impl Iterator<Item = Entity> + '_ {
        self.generations
            .iter()
            .enumerate()
            .filter(|(idx, _)| !self.tombstoned_or_free(*idx as u32))
            .map(|(idx, &gen)| Entity::new(idx as u32, gen))
    }

    fn tombstoned_or_free(&self, idx: u32) -> bool {
        self.tombstones.contains(&idx) || self.free_indices.contains(&idx)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_roundtrip() {
        let e = Entity::new(42, 7);
        assert_eq!(e.index(), 42);
        assert_eq!(e.generation(), 7);
        assert_eq!(Entity::from_raw(e.to_raw()), e);
    }

    #[test]
    fn null_entity_is_not_alive_and_has_no_index_collision() {
        assert!(Entity::NULL.is_null());
        assert_ne!(Entity::NULL, Entity::new(0, 0));
    }

    #[test]
    fn tombstone_generation_is_detected() {
        let e = Entity::new(3, MAX_GENERATION);
        assert!(e.is_tombstone());
        assert!(!Entity::new(3, 0).is_tombstone());
    }

    #[test]
    fn allocate_yields_sequential_indices_from_empty() {
        let mut alloc = EntityAllocator::new();
        let ids: Vec<Entity> = (0..100).map(|_| alloc.allocate()).collect();
        for (i, e) in ids.iter().enumerate() {
            assert_eq!(e.index(), i as u32);
            assert_eq!(e.generation(), 0);
        }
    }

    #[test]
    fn destroy_bumps_generation_and_recycles_lifo() {
        let mut alloc = EntityAllocator::new();
        let a = alloc.allocate();
        let b = alloc.allocate();
        assert!(alloc.destroy(a));
        assert!(alloc.destroy(b));
        // LIFO: b's index should be handed out before a's.
        let recycled = alloc.allocate();
        assert_eq!(recycled.index(), b.index());
        assert_eq!(recycled.generation(), b.generation() + 1);
    }

    #[test]
    fn stale_handle_is_not_alive_after_recycle() {
        let mut alloc = EntityAllocator::new();
        let e0 = alloc.allocate();
        assert!(alloc.destroy(e0));
        assert!(!alloc.is_alive(e0));
        let _e1 = alloc.allocate();
        assert!(!alloc.is_alive(e0));
    }

    #[test]
    fn double_destroy_is_a_no_op() {
        let mut alloc = EntityAllocator::new();
        let e = alloc.allocate();
        assert!(alloc.destroy(e));
        assert!(!alloc.destroy(e));
    }

    #[test]
    fn generation_exhaustion_tombstones_the_slot() {
        let mut alloc = EntityAllocator::new();
        let mut e = alloc.allocate();
        for _ in 0..MAX_GENERATION {
            alloc.destroy(e);
            e = alloc.allocate();
        }
        assert!(e.generation() <= MAX_GENERATION);
        // One more destroy should tombstone rather than recycle further.
        alloc.destroy(e);
        assert_eq!(alloc.cleanup_tombstones(), 1);
    }

    #[test]
    #[should_panic(expected = "entity index space exhausted")]
    fn allocating_past_the_20_bit_index_space_panics_instead_of_wrapping() {
        let mut alloc = EntityAllocator::new();
        for _ in 0..INDEX_SPACE {
            alloc.allocate();
        }
        // Every one of the 2^20 representable indices is now live; this
        // next call has nothing left to hand out and must not wrap onto
        // index 0, which is still alive.
        alloc.allocate();
    }

    #[test]
    fn cleanup_tombstones_makes_slots_recyclable_again() {
        let mut alloc = EntityAllocator::new();
        let mut e = alloc.allocate();
        for _ in 0..=MAX_GENERATION {
            alloc.destroy(e);
            e = alloc.allocate();
        }
        let before = alloc.slot_count();
        alloc.cleanup_tombstones();
        alloc.destroy(e);
        let _reused = alloc.allocate();
        assert_eq!(alloc.slot_count(), before);
    }
}
