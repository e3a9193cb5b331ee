//! Parent/child relationship side-table.
//!
//! Tracked independently from component storage: an entity's parent is not a
//! component, so relationships survive independent of which components an
//! entity happens to carry. [`RelationshipManager::remove_entity`] is called
//! by the registry whenever an entity is destroyed, so dangling edges never
//! outlive their endpoints.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::entity::Entity;
use crate::EcsError;

#[derive(Default)]
struct Edges {
    parent: HashMap<u32, Entity>,
    children: HashMap<u32, Vec<Entity>>,
}

/// Parent/child hierarchy over entities, independent of component storage.
#[derive(Default)]
pub struct RelationshipManager {
    edges: RwLock<Edges>,
}

impl RelationshipManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets `parent` as the parent of `child`, replacing any existing parent
    /// edge. Returns `false` (and makes no change) if `child == parent` or if
    /// the new edge would create a cycle.
    pub fn set_parent(&self, child: Entity, parent: Entity) -> bool {
        if child == parent {
            tracing::warn!(%child, "{}", EcsError::RelationshipCycle { child, parent });
            return false;
        }
        let mut edges = self.edges.write().unwrap_or_else(|e| e.into_inner());
        if would_create_cycle(&edges, child, parent) {
            tracing::warn!(%child, %parent, "{}", EcsError::RelationshipCycle { child, parent });
            return false;
        }

        if let Some(old_parent) = edges.parent.get(&child.index()).copied() {
            detach_child(&mut edges, old_parent, child);
        }
        edges.parent.insert(child.index(), parent);
        edges.children.entry(parent.index()).or_default().push(child);
        true
    }

    pub fn remove_parent(&self, child: Entity) {
        let mut edges = self.edges.write().unwrap_or_else(|e| e.into_inner());
        if let Some(parent) = edges.parent.remove(&child.index()) {
            detach_child(&mut edges, parent, child);
        }
    }

    pub fn get_parent(&self, child: Entity) -> Option<Entity> {
        self.edges
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .parent
            .get(&child.index())
            .copied()
    }

    pub fn has_parent(&self, child: Entity) -> bool {
        self.get_parent(child).is_some()
    }

    pub fn get_children(&self, parent: Entity) -> Vec<Entity> {
        self.edges
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .children
            .get(&parent.index())
            .cloned()
            .unwrap_or_default()
    }

    pub fn get_descendants(&self, parent: Entity) -> Vec<Entity> {
        let edges = self.edges.read().unwrap_or_else(|e| e.into_inner());
        let mut result = Vec::new();
        collect_descendants(&edges, parent, &mut result);
        result
    }

    pub fn get_ancestors(&self, child: Entity) -> Vec<Entity> {
        let edges = self.edges.read().unwrap_or_else(|e| e.into_inner());
        let mut result = Vec::new();
        let mut current = child;
        while let Some(&parent) = edges.parent.get(&current.index()) {
            result.push(parent);
            current = parent;
        }
        result
    }

    pub fn get_root(&self, entity: Entity) -> Entity {
        let edges = self.edges.read().unwrap_or_else(|e| e.into_inner());
        let mut current = entity;
        while let Some(&parent) = edges.parent.get(&current.index()) {
            current = parent;
        }
        current
    }

    pub fn is_ancestor(&self, potential_ancestor: Entity, entity: Entity) -> bool {
        let edges = self.edges.read().unwrap_or_else(|e| e.into_inner());
        let mut current = entity;
        while let Some(&parent) = edges.parent.get(&current.index()) {
            if parent == potential_ancestor {
                return true;
            }
            current = parent;
        }
        false
    }

    pub fn child_count(&self, parent: Entity) -> usize {
        self.edges
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .children
            .get(&parent.index())
            .map_or(0, Vec::len)
    }

    pub fn depth(&self, entity: Entity) -> usize {
        let edges = self.edges.read().unwrap_or_else(|e| e.into_inner());
        let mut depth = 0;
        let mut current = entity;
        while let Some(&parent) = edges.parent.get(&current.index()) {
            depth += 1;
            current = parent;
        }
        depth
    }

    /// Removes every edge incident to `entity` (as parent or as child).
    /// Called by the registry when an entity is destroyed.
    pub fn remove_entity(&self, entity: Entity) {
        let mut edges = self.edges.write().unwrap_or_else(|e| e.into_inner());
        if let Some(parent) = edges.parent.remove(&entity.index()) {
            detach_child(&mut edges, parent, entity);
        }
        if let Some(children) = edges.children.remove(&entity.index()) {
            for child in children {
                edges.parent.remove(&child.index());
            }
        }
    }

    pub fn clear(&self) {
        let mut edges = self.edges.write().unwrap_or_else(|e| e.into_inner());
        edges.parent.clear();
        edges.children.clear();
    }
}

fn detach_child(edges: &mut Edges, parent: Entity, child: Entity) {
    if let Some(children) = edges.children.get_mut(&parent.index()) {
        children.retain(|&c| c != child);
        if children.is_empty() {
            edges.children.remove(&parent.index());
        }
    }
}

fn would_create_cycle(edges: &Edges, child: Entity, parent: Entity) -> bool {
    let mut current = parent;
    loop {
        if current == child {
            return true;
        }
        match edges.parent.get(&current.index()) {
            Some(&next) => current = next,
            None => return false,
        }
    }
}

fn collect_descendants(edges: &Edges, parent: Entity, out: &mut Vec<Entity>) {
    let Some(children) = edges.children.get(&parent.index()) else {
        return;
    };
    for &child in children {
        out.push(child);
        collect_descendants(edges, child, out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_parent_rejects_self_parenting() {
        let rel = RelationshipManager::new();
        let a = Entity::new(0, 0);
        assert!(!rel.set_parent(a, a));
    }

    #[test]
    fn set_parent_rejects_cycles() {
        let rel = RelationshipManager::new();
        let a = Entity::new(0, 0);
        let b = Entity::new(1, 0);
        assert!(rel.set_parent(b, a));
        assert!(!rel.set_parent(a, b));
    }

    #[test]
    fn reparenting_detaches_from_old_parent() {
        let rel = RelationshipManager::new();
        let a = Entity::new(0, 0);
        let b = Entity::new(1, 0);
        let c = Entity::new(2, 0);
        assert!(rel.set_parent(c, a));
        assert_eq!(rel.get_children(a), vec![c]);
        assert!(rel.set_parent(c, b));
        assert!(rel.get_children(a).is_empty());
        assert_eq!(rel.get_children(b), vec![c]);
    }

    #[test]
    fn descendants_and_ancestors_walk_the_whole_chain() {
        let rel = RelationshipManager::new();
        let root = Entity::new(0, 0);
        let mid = Entity::new(1, 0);
        let leaf = Entity::new(2, 0);
        rel.set_parent(mid, root);
        rel.set_parent(leaf, mid);

        assert_eq!(rel.get_descendants(root), vec![mid, leaf]);
        assert_eq!(rel.get_ancestors(leaf), vec![mid, root]);
        assert!(rel.is_ancestor(root, leaf));
        assert_eq!(rel.depth(leaf), 2);
        assert_eq!(rel.get_root(leaf), root);
    }

    #[test]
    fn remove_entity_detaches_both_as_parent_and_as_child() {
        let rel = RelationshipManager::new();
        let root = Entity::new(0, 0);
        let mid = Entity::new(1, 0);
        let leaf = Entity::new(2, 0);
        rel.set_parent(mid, root);
        rel.set_parent(leaf, mid);

        rel.remove_entity(mid);
        assert!(rel.get_parent(leaf).is_none());
        assert!(rel.get_children(root).is_empty());
    }
}
