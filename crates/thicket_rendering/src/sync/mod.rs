//! # Transform Synchronization
//!
//! Once per frame every tracked node's world matrix is copied into its
//! pool slot. The copy is a pure map (one read, one write per entry), so
//! it fans out over the rayon pool in fixed-size batches:
//!
//! ```text
//! run() ──┬── group A ──┬── batch 0..32   ─┐
//!         │             └── batch 32..64  ─┤
//!         └── group B ───── batch 0..32   ─┴── join ──> upload
//! ```
//!
//! [`TransformSynchronizer::run`] returns only after every batch of every
//! target has finished. That return is the frame's join point: nothing may
//! be uploaded before it.

use glam::Mat4;
use rayon::prelude::*;
use thicket_core::{NodeHandle, NodeSource, DEFUNCT_MATRIX};
use tracing::trace;

use crate::instancing::InstancePool;

/// Counters of one sync pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncStats {
    /// Pools visited.
    pub pools_synced: u32,
    /// Entries read.
    pub entries_synced: u64,
    /// Entries whose matrix changed.
    pub entries_changed: u64,
    /// Pools that were marked for a full rewrite.
    pub full_rewrites: u32,
}

impl SyncStats {
    /// Sums two sets of counters.
    #[must_use]
    pub const fn merge(self, other: Self) -> Self {
        Self {
            pools_synced: self.pools_synced + other.pools_synced,
            entries_synced: self.entries_synced + other.entries_synced,
            entries_changed: self.entries_changed + other.entries_changed,
            full_rewrites: self.full_rewrites + other.full_rewrites,
        }
    }
}

/// Something that owns pools and knows when they need syncing.
pub trait TransformTarget: Send {
    /// Returns true if the target takes part in this frame's sync.
    fn wants_sync(&self) -> bool;

    /// Syncs every pool of the target.
    fn sync_transforms(
        &mut self,
        synchronizer: &TransformSynchronizer,
        source: &dyn NodeSource,
        frame: u64,
    ) -> SyncStats;
}

/// Batched parallel matrix copy.
#[derive(Debug, Clone, Copy)]
pub struct TransformSynchronizer {
    batch_size: usize,
}

impl TransformSynchronizer {
    /// Creates a synchronizer with the given batch size (clamped to at least 1).
    #[must_use]
    pub fn new(batch_size: usize) -> Self {
        Self {
            batch_size: batch_size.max(1),
        }
    }

    /// Entries per batch.
    #[inline]
    #[must_use]
    pub const fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Syncs all targets in parallel and blocks until every batch is done.
    pub fn run<T: TransformTarget>(
        &self,
        targets: Vec<&mut T>,
        source: &dyn NodeSource,
        frame: u64,
    ) -> SyncStats {
        let stats = targets
            .into_par_iter()
            .filter(|target| target.wants_sync())
            .map(|target| target.sync_transforms(self, source, frame))
            .reduce(SyncStats::default, SyncStats::merge);
        trace!(
            frame,
            pools = stats.pools_synced,
            entries = stats.entries_synced,
            changed = stats.entries_changed,
            "transform sync joined"
        );
        stats
    }

    /// Copies current world matrices into one pool.
    ///
    /// Only changed slots are written and marked dirty. With `force_full`
    /// the whole pool is marked for a full rewrite instead, because
    /// per-entry change detection cannot be trusted for it.
    pub fn sync_pool(
        &self,
        pool: &mut InstancePool,
        source: &dyn NodeSource,
        force_full: bool,
    ) -> SyncStats {
        let (matrices, nodes, dirty) = pool.sync_parts();
        let entries = matrices.len();
        if entries == 0 {
            return SyncStats::default();
        }

        let batch = self.batch_size;
        let changed = matrices
            .par_chunks_mut(batch)
            .zip(nodes.par_chunks(batch))
            .enumerate()
            .filter_map(|(chunk, (out, nodes))| sync_batch(chunk * batch, out, nodes, source))
            .reduce_with(|a, b| (a.0.min(b.0), a.1.max(b.1), a.2 + b.2));

        if force_full {
            dirty.mark_full();
        } else if let Some((min, max, _)) = changed {
            dirty.mark_range(min, max);
        }

        SyncStats {
            pools_synced: 1,
            entries_synced: entries as u64,
            entries_changed: changed.map_or(0, |(_, _, n)| n),
            full_rewrites: u32::from(force_full),
        }
    }
}

impl Default for TransformSynchronizer {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_SYNC_BATCH_SIZE)
    }
}

/// Syncs one batch; returns `(min, max, changed)` over changed slots.
#[inline]
fn sync_batch(
    base: usize,
    out: &mut [Mat4],
    nodes: &[NodeHandle],
    source: &dyn NodeSource,
) -> Option<(usize, usize, u64)> {
    let mut span: Option<(usize, usize, u64)> = None;
    for (offset, (slot, node)) in out.iter_mut().zip(nodes).enumerate() {
        let world = if node.is_null() {
            DEFUNCT_MATRIX
        } else {
            source.world_matrix(*node).unwrap_or(DEFUNCT_MATRIX)
        };
        if *slot != world {
            *slot = world;
            let index = base + offset;
            span = Some(span.map_or((index, index, 1), |(min, _, n)| (min, index, n + 1)));
        }
    }
    span
}
