//! Stable integer keys used across the instancing core.

use std::fmt;

/// Key of an immutable prototype, derived from the source asset id.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PrototypeKey(pub u64);

impl PrototypeKey {
    /// Derives the key from an asset id.
    ///
    /// The same asset always maps to the same key, across runs.
    #[inline]
    #[must_use]
    pub const fn from_asset_id(asset_id: u64) -> Self {
        Self(asset_id)
    }
}

impl fmt::Display for PrototypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "prototype#{}", self.0)
    }
}

/// A prototype rendered under a caller-chosen group id.
///
/// Render sources registering the same prototype with the same group id
/// share one [`RenderSourceGroup`](crate::group::RenderSourceGroup).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupKey {
    /// Prototype drawn by the group.
    pub prototype: PrototypeKey,
    /// Caller-chosen group id.
    pub group_id: u32,
}

impl GroupKey {
    /// Creates a group key.
    #[inline]
    #[must_use]
    pub const fn new(prototype: PrototypeKey, group_id: u32) -> Self {
        Self { prototype, group_id }
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/group#{}", self.prototype, self.group_id)
    }
}

/// Handle returned by registration; identifies one render source.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RenderKey(pub u64);

impl RenderKey {
    /// Raw value, used as the owner id reported to node trackers.
    #[inline]
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RenderKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "render#{}", self.0)
    }
}

/// Identifies the caller that owns a render source (a scene object, a
/// detail manager, a spawner).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OwnerId(pub u64);

/// Identifies a camera in the camera registry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CameraId(pub u32);

impl fmt::Display for CameraId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "camera#{}", self.0)
    }
}

/// Mesh resource owned by the host renderer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MeshId(pub u32);

/// Material resource owned by the host renderer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MaterialId(pub u32);

/// Concrete shader variant resolved from a capability set.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VariantId(pub u32);
