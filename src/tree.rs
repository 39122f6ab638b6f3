//! The concurrent K-tree.
//!
//! Leaves hold raw signatures; branches hold the means of their children.
//! A query descends greedily: at each branch it follows the child whose
//! `mean` is closest (first slot wins ties) until it reaches a leaf.
//!
//! ## Insertion
//!
//! The target leaf is locked and the signature appended. A full leaf is
//! split by medoid bisection ([`crate::bisect`]) into itself and a new
//! sibling, and the sibling is pushed into the parent. A full parent splits
//! the same way, and so on up to the root, which is replaced by a fresh
//! branch when it splits.
//!
//! ## Locking
//!
//! Each node has its own mutex. A thread holds at most two at once: the node
//! being split and then its parent, always taken child first. When the split
//! moves up a level the child's lock is released, so locks are acquired in
//! strictly increasing tree level and cannot form a cycle.
//!
//! Traversal takes no locks. It reads atomics that concurrent splits may be
//! rewriting, so descent under contention is approximate, but every link it
//! can observe points one level down, so it always terminates at a leaf.
//!
//! After a split is absorbed by a parent, [`KTree::recalculate_up`] refreshes
//! ancestor means for a bounded number of hops and gives up as soon as it
//! sees an ancestor locked by another thread.

use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::MutexGuard;
use rand::Rng;
use smallvec::SmallVec;
use tracing::{debug, trace};

use crate::arena::{FreeList, NodeArena, NodeId, NodeKind};
use crate::bisect::{bisect, medoid, Bisection};
use crate::error::Result;
use crate::signature::Signature;

/// Ancestors refreshed at most per [`KTree::recalculate_up`] call.
pub const MAX_REFRESH_HOPS: usize = 10;

type Entries = SmallVec<[Signature; 16]>;
type Links = SmallVec<[NodeId; 16]>;

/// Shape summary of the reachable tree.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TreeStats {
    pub leaves: usize,
    pub branches: usize,
    /// Signatures held by reachable leaves.
    pub entries: usize,
    /// Levels from root to leaves, counting both (0 for an empty tree).
    pub depth: usize,
}

/// A K-tree over a preallocated [`NodeArena`].
pub struct KTree {
    arena: NodeArena,
    root: AtomicUsize,
}

impl KTree {
    /// Create an empty tree with `capacity` node slots of `order` children.
    pub fn new(order: usize, capacity: usize) -> Self {
        Self::with_arena(NodeArena::new(order, capacity))
    }

    pub fn with_arena(arena: NodeArena) -> Self {
        Self {
            arena,
            root: AtomicUsize::new(NodeId::NONE.index()),
        }
    }

    #[inline]
    pub fn arena(&self) -> &NodeArena {
        &self.arena
    }

    #[inline]
    pub fn order(&self) -> usize {
        self.arena.order()
    }

    /// Current root, or [`NodeId::NONE`] before the first insert.
    #[inline]
    pub fn root(&self) -> NodeId {
        NodeId::new(self.root.load(Ordering::Acquire))
    }

    #[inline]
    fn set_root(&self, root: NodeId) {
        self.root.store(root.index(), Ordering::Release);
    }

    /// Descend to the leaf whose path of means is closest to `sig`.
    ///
    /// Returns [`NodeId::NONE`] on an empty tree.
    pub fn traverse(&self, sig: Signature) -> NodeId {
        let mut node = self.root();
        if node.is_none() {
            return node;
        }
        while self.arena.is_branch(node) {
            let mut best = NodeId::NONE;
            let mut best_dist = u32::MAX;
            for slot in 0..self.arena.child_count(node) {
                let child = self.arena.child(node, slot);
                let dist = self.arena.mean(child).distance(sig);
                if dist < best_dist {
                    best_dist = dist;
                    best = child;
                }
            }
            if best.is_none() {
                debug_assert!(false, "branch {node:?} has no children");
                break;
            }
            node = best;
        }
        node
    }

    /// Insert one signature.
    ///
    /// The very first insert creates the root and must not race with any
    /// other insert; after that, any number of threads may insert
    /// concurrently, each with its own free list and RNG.
    pub fn insert<R: Rng + ?Sized>(
        &self,
        sig: Signature,
        free: &mut FreeList,
        rng: &mut R,
    ) -> Result<()> {
        if self.root().is_none() {
            let root = free.pop()?;
            self.arena.init(root, NodeKind::Leaf, NodeId::NONE)?;
            self.set_root(root);
        }

        let leaf = self.traverse(sig);
        let guard = self.arena.lock(leaf);
        if self.arena.child_count(leaf) < self.order() {
            self.arena.push_entry(leaf, sig, NodeId::NONE);
            return Ok(());
        }
        self.split(leaf, guard, sig, NodeId::NONE, free, rng)
    }

    /// Split the full, locked `node` while adding `incoming`, then push the
    /// new sibling upwards until some ancestor has room.
    ///
    /// `link` is the node `incoming` summarizes when `node` is a branch, and
    /// [`NodeId::NONE`] for a leaf.
    fn split<'a, R: Rng + ?Sized>(
        &'a self,
        mut node: NodeId,
        mut guard: MutexGuard<'a, ()>,
        mut incoming: Signature,
        mut link: NodeId,
        free: &mut FreeList,
        rng: &mut R,
    ) -> Result<()> {
        loop {
            let kind = self.arena.kind(node);
            let count = self.arena.child_count(node);

            let mut entries: Entries = SmallVec::with_capacity(count + 1);
            self.arena.matrix(node).extract_all(count, &mut entries);
            entries.push(incoming);

            let mut links: Links = SmallVec::new();
            if kind == NodeKind::Branch {
                links.extend((0..count).map(|slot| self.arena.child(node, slot)));
                links.push(link);
            }

            let bisection = bisect(&entries, rng)?;
            let [left_mean, right_mean] = bisection.medoids;

            let is_root = self.root() == node;
            let sibling = free.pop()?;
            self.arena.init(sibling, kind, self.arena.parent(node))?;
            let new_root = if is_root {
                let root = free.pop()?;
                self.arena.init(root, NodeKind::Branch, NodeId::NONE)?;
                Some(root)
            } else {
                None
            };

            self.refill(node, kind, &bisection, 0, &entries, &links);
            self.refill(sibling, kind, &bisection, 1, &entries, &links);
            self.arena.set_mean(node, left_mean);
            self.arena.set_mean(sibling, right_mean);
            trace!(
                ?node,
                ?sibling,
                ?kind,
                sizes = ?bisection.sizes(),
                "split node"
            );

            if let Some(root) = new_root {
                self.arena.push_entry(root, left_mean, node);
                self.arena.push_entry(root, right_mean, sibling);
                self.arena.set_mean(root, left_mean);
                self.arena.set_parent(node, root);
                self.arena.set_parent(sibling, root);
                self.set_root(root);
                trace!(?root, "grew new root");
                return Ok(());
            }

            let Some((parent, parent_guard)) = self.lock_parent(node) else {
                debug!(?node, ?sibling, "split node has no parent; abandoning split");
                return Ok(());
            };
            drop(guard);

            let Some(slot) = self.arena.position_of(parent, node) else {
                debug!(
                    ?node,
                    ?parent,
                    "split node no longer linked from its parent; abandoning split"
                );
                return Ok(());
            };
            let parent_matrix = self.arena.matrix(parent);
            parent_matrix.remove_signature(slot);
            parent_matrix.add_signature(slot, left_mean);
            self.arena.set_parent(sibling, parent);

            if self.arena.child_count(parent) < self.order() {
                self.arena.push_entry(parent, right_mean, sibling);
                self.recalculate_up(parent);
                return Ok(());
            }

            node = parent;
            guard = parent_guard;
            incoming = right_mean;
            link = sibling;
        }
    }

    /// Lock the parent of `node`, retrying if the parent changes while we
    /// wait for its lock. `None` if `node` has no parent.
    fn lock_parent(&self, node: NodeId) -> Option<(NodeId, MutexGuard<'_, ()>)> {
        loop {
            let parent = self.arena.parent(node);
            if parent.is_none() {
                return None;
            }
            let guard = self.arena.lock(parent);
            if self.arena.parent(node) == parent {
                return Some((parent, guard));
            }
        }
    }

    /// Rewrite `target` to hold the entries of one bisection group.
    fn refill(
        &self,
        target: NodeId,
        kind: NodeKind,
        bisection: &Bisection,
        group: u8,
        entries: &[Signature],
        links: &[NodeId],
    ) {
        let matrix = self.arena.matrix(target);
        matrix.clear();
        let mut slot = 0;
        for i in bisection.members(group) {
            matrix.add_signature(slot, entries[i]);
            if kind == NodeKind::Branch {
                let child = links[i];
                self.arena.set_child(target, slot, child);
                self.arena.set_parent(child, target);
            }
            slot += 1;
        }
        self.arena.set_child_count(target, slot);
    }

    /// Refresh the means of `node` and up to [`MAX_REFRESH_HOPS`] - 1 of its
    /// ancestors, stopping at the root or at the first ancestor whose lock is
    /// held elsewhere.
    ///
    /// The lock check is advisory; ancestors are updated without holding
    /// their locks, so their means may be overwritten or go stale.
    pub fn recalculate_up(&self, mut node: NodeId) {
        let mut scratch = Entries::new();
        for _ in 0..MAX_REFRESH_HOPS {
            if node == self.root() {
                return;
            }
            self.refresh_mean(node, &mut scratch);
            node = self.arena.parent(node);
            if node.is_none() || !self.arena.probe_unlocked(node) {
                return;
            }
        }
    }

    /// Set a node's mean to the medoid of its current entries. Nodes with
    /// fewer than two entries keep their mean.
    fn refresh_mean(&self, node: NodeId, scratch: &mut Entries) {
        scratch.clear();
        self.arena
            .matrix(node)
            .extract_all(self.arena.child_count(node), scratch);
        if let Some(m) = medoid(scratch) {
            self.arena.set_mean(node, m);
        }
    }

    /// Signatures stored in `leaf`, in slot order.
    pub fn leaf_entries(&self, leaf: NodeId) -> Vec<Signature> {
        let mut out = Vec::new();
        self.arena
            .matrix(leaf)
            .extract_all(self.arena.child_count(leaf), &mut out);
        out
    }

    /// Every node reachable from the root, parents before children.
    pub fn reachable(&self) -> Vec<NodeId> {
        let mut out = Vec::new();
        let root = self.root();
        if root.is_none() {
            return out;
        }
        let mut stack = vec![root];
        while let Some(node) = stack.pop() {
            out.push(node);
            if self.arena.is_branch(node) {
                for slot in (0..self.arena.child_count(node)).rev() {
                    stack.push(self.arena.child(node, slot));
                }
            }
        }
        out
    }

    /// Count reachable nodes and entries. Only meaningful once inserts stop.
    pub fn stats(&self) -> TreeStats {
        let mut stats = TreeStats::default();
        let root = self.root();
        if root.is_none() {
            return stats;
        }
        let mut stack = vec![(root, 1usize)];
        while let Some((node, depth)) = stack.pop() {
            stats.depth = stats.depth.max(depth);
            let count = self.arena.child_count(node);
            if self.arena.is_branch(node) {
                stats.branches += 1;
                stack.extend((0..count).map(|slot| (self.arena.child(node, slot), depth + 1)));
            } else {
                stats.leaves += 1;
                stats.entries += count;
            }
        }
        stats
    }
}
