//! Capability flags and shader-variant resolution.
//!
//! Groups carry a typed flag set instead of string keywords. The flag set
//! is resolved to a concrete variant once per change and cached by the
//! flag set's hash.

use std::collections::HashMap;

use bitflags::bitflags;

use crate::ids::{PrototypeKey, VariantId};

bitflags! {
    /// Optional features a group's shaders must support.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct CapabilityFlags: u32 {
        /// Per-instance transforms from the storage buffer.
        const INSTANCING = 1 << 0;
        /// Previous-frame transforms are read for motion vectors.
        const MOTION_VECTORS = 1 << 1;
        /// The group draws a shadow pass.
        const SHADOWS = 1 << 2;
        /// Dithered cross-fade between LODs.
        const LOD_CROSSFADE = 1 << 3;
        /// Camera-facing impostor on the last LOD.
        const BILLBOARD = 1 << 4;
        /// Vertex wind animation.
        const WIND = 1 << 5;
    }
}

/// Maps a capability set to a shader variant.
///
/// Implemented by the host's material system.
pub trait VariantResolver: Send + Sync {
    /// Resolves the variant for a prototype drawn with `flags`.
    fn resolve(&self, prototype: PrototypeKey, flags: CapabilityFlags) -> VariantId;
}

/// Resolver that encodes the flag bits as the variant id.
#[derive(Debug, Clone, Copy, Default)]
pub struct FlagVariantResolver;

impl VariantResolver for FlagVariantResolver {
    fn resolve(&self, _prototype: PrototypeKey, flags: CapabilityFlags) -> VariantId {
        VariantId(flags.bits())
    }
}

/// Memoizes resolver calls per `(prototype, flags)`.
#[derive(Debug, Default)]
pub struct VariantCache {
    entries: HashMap<(PrototypeKey, CapabilityFlags), VariantId>,
    misses: u64,
}

impl VariantCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached variant, resolving it on first use.
    pub fn get_or_resolve(
        &mut self,
        resolver: &dyn VariantResolver,
        prototype: PrototypeKey,
        flags: CapabilityFlags,
    ) -> VariantId {
        *self.entries.entry((prototype, flags)).or_insert_with(|| {
            self.misses += 1;
            resolver.resolve(prototype, flags)
        })
    }

    /// Drops all entries of a prototype.
    pub fn forget(&mut self, prototype: PrototypeKey) {
        self.entries.retain(|(key, _), _| *key != prototype);
    }

    /// Number of resolver calls made.
    #[must_use]
    pub const fn misses(&self) -> u64 {
        self.misses
    }
}
