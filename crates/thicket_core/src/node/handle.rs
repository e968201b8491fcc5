//! # Node Handles
//!
//! Scene nodes are referenced by lightweight handles consisting of:
//! - An index into the node table
//! - A generation counter that invalidates the handle once the slot is reused

/// Weak reference to a scene node.
///
/// The handle never owns the node. Resolving it against a [`NodeTable`]
/// after the node was destroyed yields `None` instead of a dangling read.
///
/// The ID is split into two parts:
/// - Lower 32 bits: Index into the node table
/// - Upper 32 bits: Generation counter for detecting stale references
///
/// [`NodeTable`]: super::NodeTable
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct NodeHandle(u64);

impl NodeHandle {
    /// Null/invalid node handle.
    pub const NULL: Self = Self(u64::MAX);

    /// Creates a handle from index and generation.
    #[inline]
    #[must_use]
    pub const fn new(index: u32, generation: u32) -> Self {
        Self(((generation as u64) << 32) | (index as u64))
    }

    /// Returns the slot index portion of the handle.
    #[inline]
    #[must_use]
    pub const fn index(self) -> u32 {
        self.0 as u32
    }

    /// Returns the generation portion of the handle.
    #[inline]
    #[must_use]
    pub const fn generation(self) -> u32 {
        (self.0 >> 32) as u32
    }

    /// Checks if this handle is the null sentinel.
    #[inline]
    #[must_use]
    pub const fn is_null(self) -> bool {
        self.0 == u64::MAX
    }

    /// Raw packed value.
    #[inline]
    #[must_use]
    pub const fn to_bits(self) -> u64 {
        self.0
    }

    /// Rebuilds a handle from its packed value.
    #[inline]
    #[must_use]
    pub const fn from_bits(bits: u64) -> Self {
        Self(bits)
    }
}

impl Default for NodeHandle {
    fn default() -> Self {
        Self::NULL
    }
}

impl std::fmt::Display for NodeHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_null() {
            write!(f, "node(null)")
        } else {
            write!(f, "node({}v{})", self.index(), self.generation())
        }
    }
}
