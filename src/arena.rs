//! Preallocated node storage.
//!
//! Every node attribute lives in its own flat array indexed by [`NodeId`]
//! (parallel arrays rather than a `Vec<Node>`), and every slot is allocated
//! up front. Nodes refer to each other by index only, so relinking a child
//! during a split is a single atomic store and nothing ever has to be freed.
//!
//! Attribute cells are atomics so traversal can read them without locking.
//! Mutation follows the locking discipline described on [`crate::tree`]:
//! a node's own fields are written while holding that node's lock (or while
//! the node is still unreachable), and a child's `parent` cell is written by
//! whoever holds the lock of the node that owns the child.

use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering};

use parking_lot::{Mutex, MutexGuard};

use crate::error::{Error, Result};
use crate::matrix::{self, BitMatrix};
use crate::signature::Signature;

/// Index of a node slot in a [`NodeArena`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct NodeId(usize);

impl NodeId {
    /// No node (root's parent, empty root pointer).
    pub const NONE: NodeId = NodeId(usize::MAX);

    #[inline]
    pub const fn new(index: usize) -> Self {
        Self(index)
    }

    #[inline]
    pub const fn index(self) -> usize {
        self.0
    }

    #[inline]
    pub const fn is_none(self) -> bool {
        self.0 == usize::MAX
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            f.write_str("NodeId(NONE)")
        } else {
            write!(f, "NodeId({})", self.0)
        }
    }
}

/// Whether a node's matrix holds raw signatures or child means.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Leaf,
    Branch,
}

const KIND_LEAF: u8 = 0;
const KIND_BRANCH: u8 = 1;

/// Slot reserved for the first root.
pub const ROOT_SLOT: NodeId = NodeId(0);

fn cells<T>(n: usize, f: impl Fn() -> T) -> Box<[T]> {
    (0..n).map(|_| f()).collect()
}

/// Fixed-capacity node storage shared by all insertion threads.
pub struct NodeArena {
    order: usize,
    capacity: usize,
    /// Words per matrix plane.
    stride: usize,

    kinds: Box<[AtomicU8]>,
    child_counts: Box<[AtomicUsize]>,
    /// `capacity * order` child links.
    links: Box<[AtomicUsize]>,
    parents: Box<[AtomicUsize]>,
    means: Box<[AtomicU64]>,
    /// `capacity * PLANES * stride` matrix words.
    matrices: Box<[AtomicU64]>,
    locks: Box<[Mutex<()>]>,
}

impl NodeArena {
    /// Allocate every slot for `capacity` nodes of the given order.
    ///
    /// # Panics
    /// Panics if `order` or `capacity` is zero; use [`crate::Config::validate`]
    /// to reject those first.
    pub fn new(order: usize, capacity: usize) -> Self {
        assert!(order > 0, "order must be positive");
        assert!(capacity > 0, "capacity must be positive");
        let stride = matrix::words_per_plane(order);
        Self {
            order,
            capacity,
            stride,
            kinds: cells(capacity, || AtomicU8::new(KIND_LEAF)),
            child_counts: cells(capacity, || AtomicUsize::new(0)),
            links: cells(capacity * order, || AtomicUsize::new(NodeId::NONE.0)),
            parents: cells(capacity, || AtomicUsize::new(NodeId::NONE.0)),
            means: cells(capacity, || AtomicU64::new(0)),
            matrices: cells(capacity * matrix::matrix_words(order), || AtomicU64::new(0)),
            locks: cells(capacity, || Mutex::new(())),
        }
    }

    #[inline]
    pub fn order(&self) -> usize {
        self.order
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Approximate bytes held by the attribute arrays.
    pub fn memory_usage(&self) -> usize {
        use std::mem::size_of;
        self.kinds.len() * size_of::<AtomicU8>()
            + (self.child_counts.len() + self.links.len() + self.parents.len())
                * size_of::<AtomicUsize>()
            + (self.means.len() + self.matrices.len()) * size_of::<AtomicU64>()
            + self.locks.len() * size_of::<Mutex<()>>()
    }

    /// Reset slot `id` as an empty node of `kind` under `parent`.
    ///
    /// The slot must not be reachable from the tree yet.
    pub fn init(&self, id: NodeId, kind: NodeKind, parent: NodeId) -> Result<()> {
        if id.0 >= self.capacity {
            return Err(Error::ArenaExhausted {
                capacity: self.capacity,
            });
        }
        let k = match kind {
            NodeKind::Leaf => KIND_LEAF,
            NodeKind::Branch => KIND_BRANCH,
        };
        self.matrix(id).clear();
        self.means[id.0].store(0, Ordering::Relaxed);
        self.parents[id.0].store(parent.0, Ordering::Relaxed);
        self.child_counts[id.0].store(0, Ordering::Relaxed);
        self.kinds[id.0].store(k, Ordering::Release);
        Ok(())
    }

    #[inline]
    pub fn kind(&self, id: NodeId) -> NodeKind {
        match self.kinds[id.0].load(Ordering::Acquire) {
            KIND_BRANCH => NodeKind::Branch,
            _ => NodeKind::Leaf,
        }
    }

    #[inline]
    pub fn is_branch(&self, id: NodeId) -> bool {
        self.kind(id) == NodeKind::Branch
    }

    #[inline]
    pub fn child_count(&self, id: NodeId) -> usize {
        self.child_counts[id.0].load(Ordering::Acquire)
    }

    #[inline]
    pub fn set_child_count(&self, id: NodeId, count: usize) {
        debug_assert!(count <= self.order);
        self.child_counts[id.0].store(count, Ordering::Release);
    }

    /// Link stored in child slot `slot` of `id` (meaningful for branches).
    #[inline]
    pub fn child(&self, id: NodeId, slot: usize) -> NodeId {
        debug_assert!(slot < self.order);
        NodeId(self.links[id.0 * self.order + slot].load(Ordering::Acquire))
    }

    #[inline]
    pub fn set_child(&self, id: NodeId, slot: usize, child: NodeId) {
        debug_assert!(slot < self.order);
        self.links[id.0 * self.order + slot].store(child.0, Ordering::Release);
    }

    #[inline]
    pub fn parent(&self, id: NodeId) -> NodeId {
        NodeId(self.parents[id.0].load(Ordering::Acquire))
    }

    #[inline]
    pub fn set_parent(&self, id: NodeId, parent: NodeId) {
        self.parents[id.0].store(parent.0, Ordering::Release);
    }

    #[inline]
    pub fn mean(&self, id: NodeId) -> Signature {
        Signature::new(self.means[id.0].load(Ordering::Acquire))
    }

    #[inline]
    pub fn set_mean(&self, id: NodeId, mean: Signature) {
        self.means[id.0].store(mean.bits(), Ordering::Release);
    }

    /// The node's transposed signature matrix.
    #[inline]
    pub fn matrix(&self, id: NodeId) -> BitMatrix<'_> {
        let words = matrix::matrix_words(self.order);
        let start = id.0 * words;
        BitMatrix::new(&self.matrices[start..start + words], self.stride)
    }

    /// Block until the node's lock is held.
    #[inline]
    pub fn lock(&self, id: NodeId) -> MutexGuard<'_, ()> {
        self.locks[id.0].lock()
    }

    /// Advisory check: is the node's lock free right now?
    ///
    /// Takes and immediately releases the lock; the answer may be stale by the
    /// time the caller acts on it.
    #[inline]
    pub fn probe_unlocked(&self, id: NodeId) -> bool {
        self.locks[id.0].try_lock().is_some()
    }

    /// Slot of `child` among `parent`'s first `child_count` links.
    pub fn position_of(&self, parent: NodeId, child: NodeId) -> Option<usize> {
        (0..self.child_count(parent)).find(|&slot| self.child(parent, slot) == child)
    }

    /// Append an entry (and its link, for branches) after the last child.
    ///
    /// Caller holds `id`'s lock and has checked there is a free slot.
    pub fn push_entry(&self, id: NodeId, sig: Signature, link: NodeId) {
        let slot = self.child_count(id);
        debug_assert!(slot < self.order, "push into full node {id:?}");
        self.matrix(id).add_signature(slot, sig);
        if !link.is_none() {
            self.set_child(id, slot, link);
        }
        self.set_child_count(id, slot + 1);
    }

    /// Split the unreserved slots (`1..capacity`) into `parts` free lists.
    pub fn free_lists(&self, parts: usize) -> Vec<FreeList> {
        FreeList::partition(ROOT_SLOT.0 + 1, self.capacity, parts)
    }
}

/// A thread-local pool of unused node indices.
#[derive(Debug, Clone, Default)]
pub struct FreeList {
    /// Stored in descending order so `pop` hands out the lowest index first.
    indices: Vec<NodeId>,
    capacity: usize,
}

impl FreeList {
    /// A pool holding exactly the given indices.
    pub fn new(mut indices: Vec<NodeId>, capacity: usize) -> Self {
        indices.sort_unstable_by(|a, b| b.cmp(a));
        Self { indices, capacity }
    }

    /// Partition `start..capacity` into `parts` contiguous, non-overlapping
    /// lists. Trailing lists may be empty when there are more parts than slots.
    pub fn partition(start: usize, capacity: usize, parts: usize) -> Vec<FreeList> {
        let parts = parts.max(1);
        let total = capacity.saturating_sub(start);
        let chunk = total.div_ceil(parts);
        (0..parts)
            .map(|p| {
                let lo = (start + p * chunk).min(capacity);
                let hi = (lo + chunk).min(capacity);
                FreeList {
                    indices: (lo..hi).rev().map(NodeId).collect(),
                    capacity,
                }
            })
            .collect()
    }

    /// Take the next free index.
    pub fn pop(&mut self) -> Result<NodeId> {
        self.indices.pop().ok_or(Error::FreeListExhausted {
            capacity: self.capacity,
        })
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}
