//! # Instance Pool
//!
//! Dense storage of one render source's instance transforms.
//!
//! ## Layout
//!
//! ```text
//! matrices: [M0][M1][M2]...[Mn-1][ zero ][ zero ]   len == capacity
//! nodes:    [N0][N1][N2]...[Nn-1][ null ][ null ]   len == capacity
//!            |<------ count ------>|
//! ```
//!
//! Slots `0..count` are always live. Adds and removes are queued and
//! applied together by [`InstancePool::apply_pending`]; removal fills each
//! hole with the last live slot (swap-remove), so the array never has gaps.
//!
//! ## Buffer Indices
//!
//! The index returned by [`InstancePool::add`] is provisional until the
//! next batch. After a batch, every node whose slot changed is reported to
//! the [`NodeTracker`]; callers that cache indices must re-read them then.

use std::collections::HashMap;

use glam::Mat4;
use thicket_core::{NodeHandle, NodeSource, NodeTracker, DEFUNCT_MATRIX};
use tracing::{error, trace, warn};

use crate::buffer::DirtyRange;

/// What one batch did to a pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    /// Entries appended.
    pub added: usize,
    /// Entries removed.
    pub removed: usize,
    /// Capacity grew.
    pub grew: bool,
    /// Capacity shrank.
    pub shrank: bool,
}

impl BatchOutcome {
    /// Returns true if slots changed.
    #[inline]
    #[must_use]
    pub const fn changed_layout(&self) -> bool {
        self.added > 0 || self.removed > 0
    }
}

/// Per-source instance storage with batched add/remove.
#[derive(Debug)]
pub struct InstancePool {
    /// Owner id reported to the node tracker.
    owner: u64,
    /// Growth/shrink granularity.
    increment: usize,
    /// Hard instance limit.
    max_instances: usize,
    /// World matrices, `len == capacity`.
    matrices: Vec<Mat4>,
    /// Node back-references, `len == capacity`.
    nodes: Vec<NodeHandle>,
    /// Live entries (`0..count`).
    count: usize,
    /// Node -> current (or provisional) index.
    index_of: HashMap<NodeHandle, u32>,
    /// Nodes queued for append; null entries were removed before the batch.
    pending_adds: Vec<NodeHandle>,
    /// Queued removals: `(index, node that held it)`.
    pending_removes: Vec<(u32, NodeHandle)>,
    /// Modified span since the last upload.
    dirty: DirtyRange,
    /// Bumped whenever an existing slot moves or is dropped.
    layout_epoch: u64,
    /// Host array reallocations.
    reallocations: u64,
}

impl InstancePool {
    /// Creates an empty pool.
    ///
    /// # Panics
    ///
    /// Panics if `increment` is zero.
    #[must_use]
    pub fn new(owner: u64, increment: usize, max_instances: usize) -> Self {
        assert!(increment > 0, "Pool increment must be greater than zero");
        Self {
            owner,
            increment,
            max_instances,
            matrices: Vec::new(),
            nodes: Vec::new(),
            count: 0,
            index_of: HashMap::new(),
            pending_adds: Vec::new(),
            pending_removes: Vec::new(),
            dirty: DirtyRange::Clean,
            layout_epoch: 0,
            reallocations: 0,
        }
    }

    /// Owner id reported to node trackers.
    #[inline]
    #[must_use]
    pub const fn owner(&self) -> u64 {
        self.owner
    }

    /// Number of live entries.
    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.count
    }

    /// Returns true if the pool has no live entries.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Allocated entries.
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.matrices.len()
    }

    /// Returns true if a batch is queued.
    #[inline]
    #[must_use]
    pub fn has_pending(&self) -> bool {
        !self.pending_adds.is_empty() || !self.pending_removes.is_empty()
    }

    /// Live matrices.
    #[inline]
    #[must_use]
    pub fn matrices(&self) -> &[Mat4] {
        &self.matrices[..self.count]
    }

    /// Live node back-references.
    #[inline]
    #[must_use]
    pub fn nodes(&self) -> &[NodeHandle] {
        &self.nodes[..self.count]
    }

    /// Current (possibly provisional) index of a node.
    #[inline]
    #[must_use]
    pub fn index_of(&self, node: NodeHandle) -> Option<u32> {
        self.index_of.get(&node).copied()
    }

    /// Modified span since the last upload.
    #[inline]
    #[must_use]
    pub const fn dirty(&self) -> DirtyRange {
        self.dirty
    }

    /// Returns and clears the modified span.
    #[inline]
    pub fn take_dirty(&mut self) -> DirtyRange {
        self.dirty.take()
    }

    /// Forces the next upload to rewrite every live entry.
    #[inline]
    pub fn mark_full_dirty(&mut self) {
        self.dirty.mark_full();
    }

    /// Counter bumped every time an existing slot moves or is dropped.
    ///
    /// Appends leave it unchanged: indices handed out before them still
    /// name the same instances.
    #[inline]
    #[must_use]
    pub const fn layout_epoch(&self) -> u64 {
        self.layout_epoch
    }

    /// Host array reallocations so far.
    #[inline]
    #[must_use]
    pub const fn reallocations(&self) -> u64 {
        self.reallocations
    }

    /// Queues a node for append and returns its provisional index.
    ///
    /// A node already in the pool (or already queued) returns its current
    /// index unchanged. Returns `None` for the null handle or when the
    /// pool is at its hard limit.
    pub fn add(&mut self, node: NodeHandle) -> Option<u32> {
        if node.is_null() {
            warn!(owner = self.owner, "ignoring add of null node");
            return None;
        }
        if let Some(&index) = self.index_of.get(&node) {
            return Some(index);
        }

        // Live plus queued nodes; slots blanked by a queued removal do not count.
        let requested = self.index_of.len() + 1;
        if requested > self.max_instances {
            error!(
                owner = self.owner,
                requested,
                max = self.max_instances,
                "instance pool is full, add rejected"
            );
            return None;
        }

        let index = (self.count + self.pending_adds.len()) as u32;
        self.pending_adds.push(node);
        self.index_of.insert(node, index);
        Some(index)
    }

    /// Queues removal of the entry at `index`.
    ///
    /// The slot is blanked immediately (zero matrix, null node) so it stops
    /// drawing before the batch runs. Out-of-range and already-removed
    /// indices are ignored. Returns true if a removal was queued.
    pub fn remove(&mut self, index: u32) -> bool {
        let slot = index as usize;
        let node = if slot < self.count {
            let node = std::mem::replace(&mut self.nodes[slot], NodeHandle::NULL);
            if !node.is_null() {
                self.matrices[slot] = DEFUNCT_MATRIX;
                self.dirty.mark(slot);
            }
            node
        } else if let Some(pending) = self.pending_adds.get_mut(slot - self.count) {
            std::mem::replace(pending, NodeHandle::NULL)
        } else {
            trace!(owner = self.owner, index, "remove of out-of-range index ignored");
            return false;
        };

        if node.is_null() {
            trace!(owner = self.owner, index, "remove of already-removed index ignored");
            return false;
        }

        self.index_of.remove(&node);
        self.pending_removes.push((index, node));
        true
    }

    /// Queues removal of a node wherever it currently sits.
    pub fn remove_node(&mut self, node: NodeHandle) -> bool {
        match self.index_of(node) {
            Some(index) => self.remove(index),
            None => false,
        }
    }

    /// Applies queued adds, then queued removals, in one pass.
    ///
    /// New entries read their initial matrix from `nodes`. Every node
    /// whose index was assigned or changed is reported back to it;
    /// removed nodes are reported with `None`.
    pub fn apply_pending<N>(&mut self, nodes: &mut N) -> BatchOutcome
    where
        N: NodeSource + NodeTracker + ?Sized,
    {
        let mut outcome = BatchOutcome::default();
        if !self.has_pending() {
            return outcome;
        }

        // Grow. Capacity is a multiple of the increment.
        let target = self.count + self.pending_adds.len();
        if target > self.capacity() {
            let new_capacity = target.div_ceil(self.increment) * self.increment;
            self.resize_arrays(new_capacity.min(self.max_instances.max(target)));
            outcome.grew = true;
        }

        // Adds.
        for node in std::mem::take(&mut self.pending_adds) {
            let slot = self.count;
            self.nodes[slot] = node;
            self.matrices[slot] = if node.is_null() {
                DEFUNCT_MATRIX
            } else {
                nodes.world_matrix(node).unwrap_or(DEFUNCT_MATRIX)
            };
            self.count += 1;
            self.dirty.mark(slot);
            if !node.is_null() {
                nodes.buffer_index_changed(node, self.owner, Some(slot as u32));
            }
            outcome.added += 1;
        }

        // Removes, highest index first: the last live slot is never a hole.
        let mut removes = std::mem::take(&mut self.pending_removes);
        removes.sort_unstable_by(|a, b| b.0.cmp(&a.0));
        removes.dedup_by_key(|(index, _)| *index);
        for (index, node) in removes {
            let slot = index as usize;
            if slot >= self.count {
                continue;
            }
            let last = self.count - 1;
            if slot != last {
                self.matrices[slot] = self.matrices[last];
                let moved = self.nodes[last];
                self.nodes[slot] = moved;
                if !moved.is_null() {
                    self.index_of.insert(moved, index);
                    nodes.buffer_index_changed(moved, self.owner, Some(index));
                }
                self.dirty.mark(slot);
            }
            self.matrices[last] = DEFUNCT_MATRIX;
            self.nodes[last] = NodeHandle::NULL;
            self.count -= 1;
            outcome.removed += 1;

            // Re-added in the same frame: the add already reported its index.
            if !self.index_of.contains_key(&node) {
                nodes.buffer_index_changed(node, self.owner, None);
            }
        }

        // Shrink, never in the same batch as a grow.
        if !outcome.grew && self.capacity() - self.count > 2 * self.increment {
            let new_capacity = self.count.div_ceil(self.increment) * self.increment;
            self.resize_arrays(new_capacity);
            outcome.shrank = true;
        }

        if outcome.removed > 0 {
            self.layout_epoch += 1;
        }
        trace!(
            owner = self.owner,
            added = outcome.added,
            removed = outcome.removed,
            count = self.count,
            capacity = self.capacity(),
            "instance batch applied"
        );
        outcome
    }

    /// Queues `node` and applies the whole queue inline.
    ///
    /// Bypasses per-frame batching: every call pays for a batch.
    pub fn add_immediate<N>(&mut self, node: NodeHandle, nodes: &mut N) -> Option<u32>
    where
        N: NodeSource + NodeTracker + ?Sized,
    {
        self.add(node)?;
        self.apply_pending(nodes);
        self.index_of(node)
    }

    /// Queues removal of `index` and applies the whole queue inline.
    pub fn remove_immediate<N>(&mut self, index: u32, nodes: &mut N) -> bool
    where
        N: NodeSource + NodeTracker + ?Sized,
    {
        let queued = self.remove(index);
        if queued {
            self.apply_pending(nodes);
        }
        queued
    }

    /// Drops every entry and queued operation, reporting removed nodes.
    pub fn clear(&mut self, tracker: &mut dyn NodeTracker) {
        for node in self.nodes[..self.count]
            .iter()
            .chain(&self.pending_adds)
            .filter(|n| !n.is_null())
        {
            tracker.buffer_index_changed(*node, self.owner, None);
        }
        self.matrices = Vec::new();
        self.nodes = Vec::new();
        self.count = 0;
        self.index_of.clear();
        self.pending_adds.clear();
        self.pending_removes.clear();
        self.dirty = DirtyRange::Clean;
        self.layout_epoch += 1;
    }

    /// Live slices for the transform synchronizer.
    pub(crate) fn sync_parts(&mut self) -> (&mut [Mat4], &[NodeHandle], &mut DirtyRange) {
        (
            &mut self.matrices[..self.count],
            &self.nodes[..self.count],
            &mut self.dirty,
        )
    }

    fn resize_arrays(&mut self, new_capacity: usize) {
        self.matrices.resize(new_capacity, DEFUNCT_MATRIX);
        self.nodes.resize(new_capacity, NodeHandle::NULL);
        self.matrices.shrink_to_fit();
        self.nodes.shrink_to_fit();
        self.reallocations += 1;
    }
}
