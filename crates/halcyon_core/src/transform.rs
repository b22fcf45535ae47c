//! # Transform Arena
//!
//! Entity hierarchies stored flat. Parents are indices, never owning
//! references, so there is nothing to break on teardown and iteration is a
//! plain walk over a `Vec`.
//!
//! Ids carry a generation so a stale id cannot reach a recycled node.

use crate::math::Mat4;

/// Local transform: translation, rotation quaternion `[x, y, z, w]`, scale.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Transform {
    /// Translation.
    pub translation: [f32; 3],
    /// Unit quaternion.
    pub rotation: [f32; 4],
    /// Per-axis scale.
    pub scale: [f32; 3],
}

impl Default for Transform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Transform {
    /// No translation, rotation or scale.
    pub const IDENTITY: Self = Self {
        translation: [0.0; 3],
        rotation: [0.0, 0.0, 0.0, 1.0],
        scale: [1.0; 3],
    };

    /// Pure translation.
    #[must_use]
    pub const fn from_translation(translation: [f32; 3]) -> Self {
        Self {
            translation,
            ..Self::IDENTITY
        }
    }

    /// Local matrix.
    #[must_use]
    pub fn matrix(&self) -> Mat4 {
        Mat4::from_trs(self.translation, self.rotation, self.scale)
    }
}

/// Generational index into a [`TransformArena`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TransformId {
    index: u32,
    generation: u32,
}

impl TransformId {
    /// Slot index in the arena.
    #[must_use]
    pub const fn index(&self) -> usize {
        self.index as usize
    }
}

#[derive(Debug, Clone)]
struct Node {
    local: Transform,
    parent: Option<TransformId>,
    generation: u32,
    alive: bool,
}

/// Flat storage of parent-linked transforms.
#[derive(Debug, Clone, Default)]
pub struct TransformArena {
    nodes: Vec<Node>,
    free: Vec<u32>,
    live: usize,
}

impl TransformArena {
    /// Empty arena.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live transforms.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.live
    }

    /// Whether the arena has no live transforms.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Inserts a transform. A dead `parent` is treated as no parent.
    ///
    /// # Panics
    ///
    /// Panics if the arena would exceed `u32::MAX` nodes.
    pub fn insert(&mut self, local: Transform, parent: Option<TransformId>) -> TransformId {
        let parent = parent.filter(|p| self.contains(*p));
        self.live += 1;
        if let Some(index) = self.free.pop() {
            let node = &mut self.nodes[index as usize];
            node.generation = node.generation.wrapping_add(1);
            node.local = local;
            node.parent = parent;
            node.alive = true;
            return TransformId {
                index,
                generation: node.generation,
            };
        }
        let index =
            u32::try_from(self.nodes.len()).expect("transform arena exceeds u32::MAX nodes");
        self.nodes.push(Node {
            local,
            parent,
            generation: 0,
            alive: true,
        });
        TransformId { index, generation: 0 }
    }

    /// Removes a transform. Its children are re-parented to its parent.
    ///
    /// Returns `false` if `id` was already gone.
    pub fn remove(&mut self, id: TransformId) -> bool {
        if !self.contains(id) {
            return false;
        }
        let grandparent = self.nodes[id.index()].parent;
        for node in self.nodes.iter_mut().filter(|n| n.alive) {
            if node.parent == Some(id) {
                node.parent = grandparent;
            }
        }
        let node = &mut self.nodes[id.index()];
        node.alive = false;
        node.parent = None;
        self.free.push(id.index);
        self.live -= 1;
        true
    }

    /// Whether `id` refers to a live transform.
    #[must_use]
    pub fn contains(&self, id: TransformId) -> bool {
        self.nodes
            .get(id.index())
            .is_some_and(|n| n.alive && n.generation == id.generation)
    }

    /// Local transform of `id`.
    #[must_use]
    pub fn local(&self, id: TransformId) -> Option<&Transform> {
        self.contains(id).then(|| &self.nodes[id.index()].local)
    }

    /// Replaces the local transform. Returns `false` for a dead id.
    pub fn set_local(&mut self, id: TransformId, local: Transform) -> bool {
        if !self.contains(id) {
            return false;
        }
        self.nodes[id.index()].local = local;
        true
    }

    /// Parent of `id`.
    #[must_use]
    pub fn parent(&self, id: TransformId) -> Option<TransformId> {
        if self.contains(id) {
            self.nodes[id.index()].parent
        } else {
            None
        }
    }

    /// Re-parents `id`. Refuses dead ids and anything that would form a cycle.
    pub fn set_parent(&mut self, id: TransformId, parent: Option<TransformId>) -> bool {
        if !self.contains(id) {
            return false;
        }
        if let Some(p) = parent {
            if !self.contains(p) || self.ancestors(p).any(|a| a == id) || p == id {
                return false;
            }
        }
        self.nodes[id.index()].parent = parent;
        true
    }

    /// Walks from the parent of `id` up to the root.
    pub fn ancestors(&self, id: TransformId) -> impl Iterator<Item = TransformId> + '_ {
        std::iter::successors(self.parent(id), move |p| self.parent(*p))
    }

    /// World matrix: every ancestor's local matrix applied outermost first.
    #[must_use]
    pub fn world_matrix(&self, id: TransformId) -> Option<Mat4> {
        let local = self.local(id)?.matrix();
        Some(
            self.ancestors(id)
                .fold(local, |acc, ancestor| self.nodes[ancestor.index()].local.matrix().mul(&acc)),
        )
    }

    /// Live ids in slot order.
    #[allow(clippy::cast_possible_truncation)]
    pub fn ids(&self) -> impl Iterator<Item = TransformId> + '_ {
        // `insert` keeps the node count within u32.
        self.nodes.iter().enumerate().filter(|(_, n)| n.alive).map(|(i, n)| TransformId {
            index: i as u32,
            generation: n.generation,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_world_matrix_chains_parents() {
        let mut arena = TransformArena::new();
        let root = arena.insert(Transform::from_translation([1.0, 0.0, 0.0]), None);
        let child = arena.insert(Transform::from_translation([0.0, 2.0, 0.0]), Some(root));
        let leaf = arena.insert(Transform::from_translation([0.0, 0.0, 3.0]), Some(child));

        assert_eq!(arena.world_matrix(leaf).unwrap().translation(), [1.0, 2.0, 3.0]);
        assert_eq!(arena.ancestors(leaf).collect::<Vec<_>>(), vec![child, root]);
    }

    #[test]
    fn test_remove_reparents_children() {
        let mut arena = TransformArena::new();
        let root = arena.insert(Transform::IDENTITY, None);
        let mid = arena.insert(Transform::from_translation([5.0, 0.0, 0.0]), Some(root));
        let leaf = arena.insert(Transform::IDENTITY, Some(mid));

        assert!(arena.remove(mid));
        assert!(!arena.remove(mid));
        assert_eq!(arena.parent(leaf), Some(root));
        assert_eq!(arena.len(), 2);
    }

    #[test]
    fn test_stale_id_rejected_after_reuse() {
        let mut arena = TransformArena::new();
        let old = arena.insert(Transform::IDENTITY, None);
        arena.remove(old);
        let new = arena.insert(Transform::IDENTITY, None);
        assert_eq!(old.index(), new.index());
        assert!(!arena.contains(old));
        assert!(arena.contains(new));
        assert!(arena.local(old).is_none());
    }

    #[test]
    fn test_cycles_refused() {
        let mut arena = TransformArena::new();
        let a = arena.insert(Transform::IDENTITY, None);
        let b = arena.insert(Transform::IDENTITY, Some(a));
        let c = arena.insert(Transform::IDENTITY, Some(b));
        assert!(!arena.set_parent(a, Some(c)));
        assert!(!arena.set_parent(a, Some(a)));
        assert!(arena.set_parent(c, Some(a)));
        assert_eq!(arena.ids().count(), 3);
    }
}
