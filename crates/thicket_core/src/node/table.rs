//! # Node Table
//!
//! Generation-checked arena of scene nodes.
//!
//! The instancing core never owns scene nodes. Pool slots keep a
//! [`NodeHandle`] and ask a [`NodeSource`] for the node's current world
//! matrix each frame. A destroyed node simply stops resolving.

use glam::Mat4;

use super::handle::NodeHandle;
use crate::error::{NodeError, NodeResult};

/// Read access to scene-node transforms.
///
/// Implementations are queried from worker threads during transform sync,
/// so lookups must be `Sync` and must not block.
pub trait NodeSource: Sync {
    /// Returns the node's current world matrix, or `None` if it no longer exists.
    fn world_matrix(&self, node: NodeHandle) -> Option<Mat4>;
}

/// Receives buffer-index changes for nodes tracked by instance pools.
///
/// After a removal batch swaps the last live slot into a hole, the node
/// that moved is reported here with its new index. `None` means the node
/// left the pool.
pub trait NodeTracker {
    /// Called once per moved, added or removed node.
    fn buffer_index_changed(&mut self, node: NodeHandle, owner: u64, index: Option<u32>);
}

/// A no-op tracker for callers that re-read indices on demand.
impl NodeTracker for () {
    #[inline]
    fn buffer_index_changed(&mut self, _node: NodeHandle, _owner: u64, _index: Option<u32>) {}
}

/// Adapts a read-only [`NodeSource`] for calls that also want a tracker.
///
/// Index changes are dropped; callers re-read buffer indices on demand.
pub struct Untracked<'a, S: NodeSource + ?Sized>(pub &'a S);

impl<S: NodeSource + ?Sized> NodeSource for Untracked<'_, S> {
    #[inline]
    fn world_matrix(&self, node: NodeHandle) -> Option<Mat4> {
        self.0.world_matrix(node)
    }
}

impl<S: NodeSource + ?Sized> NodeTracker for Untracked<'_, S> {
    #[inline]
    fn buffer_index_changed(&mut self, _node: NodeHandle, _owner: u64, _index: Option<u32>) {}
}

/// Data stored for one live node.
#[derive(Debug, Clone)]
struct NodeSlot {
    /// Current world transform.
    world: Mat4,
    /// `(owner, buffer_index)` for every pool this node is registered in.
    instance_slots: Vec<(u64, u32)>,
}

/// Arena of scene nodes with O(1) insert/remove and stale-handle detection.
///
/// # Thread Safety
///
/// Reads (`world_matrix`) are `Sync`; mutation requires `&mut self`.
/// Transform sync borrows the table immutably for the whole parallel pass.
///
/// # Example
///
/// ```rust
/// use glam::Mat4;
/// use thicket_core::{NodeSource, NodeTable};
///
/// let mut nodes = NodeTable::new(1024);
/// let node = nodes.insert(Mat4::IDENTITY).unwrap();
/// assert_eq!(nodes.world_matrix(node), Some(Mat4::IDENTITY));
///
/// nodes.remove(node);
/// assert_eq!(nodes.world_matrix(node), None);
/// ```
pub struct NodeTable {
    /// The storage array.
    slots: Vec<Option<NodeSlot>>,
    /// Generation per slot, bumped on every removal.
    generations: Vec<u32>,
    /// Free list - indices of available slots.
    free_list: Vec<u32>,
    /// Number of live nodes.
    len: usize,
    /// Total capacity.
    capacity: usize,
}

impl NodeTable {
    /// Creates a new table with the specified capacity.
    ///
    /// # Panics
    ///
    /// Panics if capacity is zero or does not fit in a `u32` index.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "Capacity must be greater than zero");
        assert!(u32::try_from(capacity).is_ok(), "Capacity exceeds u32 index space");

        let free_list: Vec<u32> = (0..capacity as u32).rev().collect();

        Self {
            slots: (0..capacity).map(|_| None).collect(),
            generations: vec![0; capacity],
            free_list,
            len: 0,
            capacity,
        }
    }

    /// Returns the total capacity.
    #[inline]
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns the number of live nodes.
    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Returns true if no node is alive.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Creates a node with the given world matrix.
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::TableFull`] when every slot is in use.
    pub fn insert(&mut self, world: Mat4) -> NodeResult<NodeHandle> {
        let index = self.free_list.pop().ok_or(NodeError::TableFull {
            capacity: self.capacity,
        })?;

        self.slots[index as usize] = Some(NodeSlot {
            world,
            instance_slots: Vec::new(),
        });
        self.len += 1;

        Ok(NodeHandle::new(index, self.generations[index as usize]))
    }

    /// Destroys a node. Stale or null handles are ignored.
    ///
    /// Returns true if a node was removed.
    pub fn remove(&mut self, handle: NodeHandle) -> bool {
        if !self.contains(handle) {
            return false;
        }

        let index = handle.index() as usize;
        self.slots[index] = None;
        self.generations[index] = self.generations[index].wrapping_add(1);
        self.free_list.push(handle.index());
        self.len -= 1;
        true
    }

    /// Checks whether the handle refers to a live node.
    #[inline]
    #[must_use]
    pub fn contains(&self, handle: NodeHandle) -> bool {
        let index = handle.index() as usize;
        !handle.is_null()
            && index < self.capacity
            && self.generations[index] == handle.generation()
            && self.slots[index].is_some()
    }

    /// Moves a node.
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::StaleHandle`] if the node no longer exists.
    pub fn set_world(&mut self, handle: NodeHandle, world: Mat4) -> NodeResult<()> {
        let slot = self.slot_mut(handle)?;
        slot.world = world;
        Ok(())
    }

    /// Returns the buffer index this node occupies in the given owner's pool.
    #[must_use]
    pub fn buffer_index(&self, handle: NodeHandle, owner: u64) -> Option<u32> {
        self.slot(handle)?
            .instance_slots
            .iter()
            .find(|(o, _)| *o == owner)
            .map(|&(_, index)| index)
    }

    /// Iterates over all live nodes.
    pub fn iter(&self) -> impl Iterator<Item = (NodeHandle, &Mat4)> {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.as_ref().map(|s| {
                (
                    NodeHandle::new(index as u32, self.generations[index]),
                    &s.world,
                )
            })
        })
    }

    #[inline]
    fn slot(&self, handle: NodeHandle) -> Option<&NodeSlot> {
        if !self.contains(handle) {
            return None;
        }
        self.slots[handle.index() as usize].as_ref()
    }

    fn slot_mut(&mut self, handle: NodeHandle) -> NodeResult<&mut NodeSlot> {
        if !self.contains(handle) {
            return Err(NodeError::StaleHandle(handle));
        }
        self.slots[handle.index() as usize]
            .as_mut()
            .ok_or(NodeError::StaleHandle(handle))
    }
}

impl NodeSource for NodeTable {
    #[inline]
    fn world_matrix(&self, node: NodeHandle) -> Option<Mat4> {
        self.slot(node).map(|s| s.world)
    }
}

impl NodeTracker for NodeTable {
    fn buffer_index_changed(&mut self, node: NodeHandle, owner: u64, index: Option<u32>) {
        // Nodes destroyed before the batch ran have nothing to update.
        let Ok(slot) = self.slot_mut(node) else {
            return;
        };

        let existing = slot.instance_slots.iter().position(|(o, _)| *o == owner);
        match (existing, index) {
            (Some(pos), Some(index)) => slot.instance_slots[pos].1 = index,
            (None, Some(index)) => slot.instance_slots.push((owner, index)),
            (Some(pos), None) => {
                slot.instance_slots.swap_remove(pos);
            }
            (None, None) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    #[test]
    fn test_insert_remove() {
        let mut table = NodeTable::new(10);

        let node = table.insert(Mat4::from_translation(Vec3::X)).unwrap();
        assert_eq!(table.len(), 1);
        assert_eq!(
            table.world_matrix(node),
            Some(Mat4::from_translation(Vec3::X))
        );

        assert!(table.remove(node));
        assert!(table.is_empty());
        assert!(!table.remove(node));
    }

    #[test]
    fn test_table_full() {
        let mut table = NodeTable::new(2);

        let _ = table.insert(Mat4::IDENTITY).unwrap();
        let _ = table.insert(Mat4::IDENTITY).unwrap();
        assert_eq!(
            table.insert(Mat4::IDENTITY),
            Err(NodeError::TableFull { capacity: 2 })
        );
    }

    #[test]
    fn test_stale_handle_after_reuse() {
        let mut table = NodeTable::new(1);

        let old = table.insert(Mat4::IDENTITY).unwrap();
        table.remove(old);

        let new = table.insert(Mat4::ZERO).unwrap();
        assert_eq!(old.index(), new.index()); // Same slot reused
        assert_ne!(old, new);
        assert_eq!(table.world_matrix(old), None);
        assert_eq!(table.world_matrix(new), Some(Mat4::ZERO));
        assert!(matches!(
            table.set_world(old, Mat4::IDENTITY),
            Err(NodeError::StaleHandle(_))
        ));
    }

    #[test]
    fn test_untracked_reads_through() {
        let mut table = NodeTable::new(2);
        let node = table.insert(Mat4::from_translation(Vec3::Z)).unwrap();

        let mut untracked = Untracked(&table);
        untracked.buffer_index_changed(node, 1, Some(4));
        assert_eq!(untracked.world_matrix(node), Some(Mat4::from_translation(Vec3::Z)));
        assert_eq!(table.buffer_index(node, 1), None);
    }

    #[test]
    fn test_buffer_index_tracking() {
        let mut table = NodeTable::new(4);
        let node = table.insert(Mat4::IDENTITY).unwrap();

        table.buffer_index_changed(node, 7, Some(3));
        assert_eq!(table.buffer_index(node, 7), Some(3));

        table.buffer_index_changed(node, 7, Some(1));
        assert_eq!(table.buffer_index(node, 7), Some(1));
        assert_eq!(table.buffer_index(node, 8), None);

        table.buffer_index_changed(node, 7, None);
        assert_eq!(table.buffer_index(node, 7), None);
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn live_count_matches_resolvable_handles(ops in prop::collection::vec(any::<bool>(), 1..200)) {
                let mut table = NodeTable::new(64);
                let mut live: Vec<NodeHandle> = Vec::new();

                for insert in ops {
                    if insert || live.is_empty() {
                        if let Ok(handle) = table.insert(Mat4::IDENTITY) {
                            live.push(handle);
                        }
                    } else {
                        let handle = live.swap_remove(0);
                        prop_assert!(table.remove(handle));
                        prop_assert!(table.world_matrix(handle).is_none());
                    }
                    prop_assert_eq!(table.len(), live.len());
                }

                for handle in &live {
                    prop_assert!(table.contains(*handle));
                }
            }
        }
    }
}
