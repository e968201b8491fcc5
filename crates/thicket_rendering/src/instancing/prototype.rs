//! # Prototypes
//!
//! A prototype is the immutable template of one instanced object type:
//! its LOD chain (meshes and materials per level), bounding sphere, and
//! shadow/culling rules. Prototypes are validated once at registration and
//! shared by every group that draws them.
//!
//! ## Command Slots
//!
//! Every `(lod, renderer, sub-mesh)` combination owns one fixed slot in the
//! group's indirect-command layout, whether or not it is drawn at runtime:
//!
//! ```text
//! LOD0: R0[m0 m1] R1[m0]   LOD1: R0[m0]   LOD2: R0[m0]
//! slot:    0  1      2           3            4          -> 5 color slots
//! shadow slots follow at 5..10
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use glam::Vec3;
use tracing::debug;

use crate::error::{InstancingError, InstancingResult};
use crate::ids::{MaterialId, MeshId, PrototypeKey};

/// Maximum LOD levels per prototype.
pub const MAX_LOD_COUNT: usize = 8;

/// One draw range of a mesh, rendered with one material.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SubMesh {
    /// Material drawn for this range.
    pub material: MaterialId,
    /// Index count of the range.
    pub index_count: u32,
    /// First index of the range.
    pub first_index: u32,
    /// Vertex offset.
    pub base_vertex: i32,
}

/// A mesh plus its materials, drawn on one render layer.
#[derive(Debug, Clone, PartialEq)]
pub struct RendererDescriptor {
    /// Mesh to draw; `None` keeps the renderer's slots but draws nothing.
    pub mesh: Option<MeshId>,
    /// One entry per material.
    pub submeshes: Vec<SubMesh>,
    /// Render layer (0..32) tested against the camera culling mask.
    pub layer: u8,
    /// Rendering-layer mask passed through to the host renderer.
    pub rendering_layer_mask: u32,
}

/// One level of detail.
#[derive(Debug, Clone, PartialEq)]
pub struct LodDescriptor {
    /// Farthest (bias-scaled) camera distance at which this level is used.
    pub max_distance: f32,
    /// Renderers drawn at this level.
    pub renderers: Vec<RendererDescriptor>,
    /// Whether this level emits shadow draws.
    pub cast_shadows: bool,
}

/// Replacement layer used by shadow draws only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShadowLayerOverride {
    /// Layer for the shadow draw.
    pub layer: u8,
    /// Rendering-layer mask for the shadow draw.
    pub rendering_layer_mask: u32,
}

/// Shadow casting rules of a prototype.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShadowSettings {
    /// Master switch.
    pub cast_shadows: bool,
    /// Instances farther than this cast no shadow.
    pub shadow_distance: f32,
    /// Optional layer swap for shadow draws.
    pub layer_override: Option<ShadowLayerOverride>,
}

impl Default for ShadowSettings {
    fn default() -> Self {
        Self {
            cast_shadows: true,
            shadow_distance: 150.0,
            layer_override: None,
        }
    }
}

/// Caller-supplied description of a prototype.
#[derive(Debug, Clone, PartialEq)]
pub struct PrototypeDescriptor {
    /// Source asset id; the prototype key is derived from it.
    pub asset_id: u64,
    /// Display name, used in logs.
    pub name: String,
    /// LOD chain, finest first.
    pub lods: Vec<LodDescriptor>,
    /// Bounding-sphere center in object space.
    pub bounds_center: Vec3,
    /// Bounding-sphere radius in object space.
    pub bounds_radius: f32,
    /// Shadow rules.
    pub shadows: ShadowSettings,
    /// Draw shadows only (no color pass).
    pub shadow_only: bool,
    /// Instances farther than this are culled.
    pub max_distance: f32,
}

/// Validated, immutable prototype.
#[derive(Debug)]
pub struct Prototype {
    key: PrototypeKey,
    name: String,
    lods: Box<[LodDescriptor]>,
    bounds_center: Vec3,
    bounds_radius: f32,
    shadows: ShadowSettings,
    shadow_only: bool,
    max_distance: f32,
    /// First slot of each `(lod, renderer)`, flattened lod-major.
    renderer_slots: Box<[Box<[u32]>]>,
    /// Color slot count (shadow slots mirror it).
    slot_count: u32,
}

impl Prototype {
    /// Validates a descriptor and computes its command layout.
    ///
    /// # Errors
    ///
    /// Returns [`InstancingError::InvalidDescriptor`] when the LOD chain is
    /// empty or too long, LOD distances are not increasing, or the bounds
    /// are not finite.
    pub fn from_descriptor(descriptor: &PrototypeDescriptor) -> InstancingResult<Self> {
        let invalid = |reason: String| InstancingError::InvalidDescriptor {
            name: descriptor.name.clone(),
            reason,
        };

        if descriptor.lods.is_empty() {
            return Err(invalid("no LOD levels".to_string()));
        }
        if descriptor.lods.len() > MAX_LOD_COUNT {
            return Err(invalid(format!(
                "{} LOD levels, at most {MAX_LOD_COUNT} supported",
                descriptor.lods.len()
            )));
        }
        if !descriptor.bounds_radius.is_finite()
            || descriptor.bounds_radius < 0.0
            || !descriptor.bounds_center.is_finite()
        {
            return Err(invalid("bounds must be finite".to_string()));
        }
        let mut previous = 0.0_f32;
        for (level, lod) in descriptor.lods.iter().enumerate() {
            if lod.max_distance.is_nan() || lod.max_distance <= previous {
                return Err(invalid(format!(
                    "LOD {level} max_distance {} is not greater than {previous}",
                    lod.max_distance
                )));
            }
            previous = lod.max_distance;
            if let Some(r) = lod.renderers.iter().find(|r| r.layer >= 32) {
                return Err(invalid(format!("LOD {level} renderer layer {} >= 32", r.layer)));
            }
        }

        let mut slot = 0u32;
        let renderer_slots = descriptor
            .lods
            .iter()
            .map(|lod| {
                lod.renderers
                    .iter()
                    .map(|renderer| {
                        let first = slot;
                        slot += renderer.submeshes.len() as u32;
                        first
                    })
                    .collect()
            })
            .collect();

        Ok(Self {
            key: PrototypeKey::from_asset_id(descriptor.asset_id),
            name: descriptor.name.clone(),
            lods: descriptor.lods.clone().into_boxed_slice(),
            bounds_center: descriptor.bounds_center,
            bounds_radius: descriptor.bounds_radius,
            shadows: descriptor.shadows,
            shadow_only: descriptor.shadow_only,
            max_distance: descriptor.max_distance,
            renderer_slots,
            slot_count: slot,
        })
    }

    /// Registry key.
    #[inline]
    #[must_use]
    pub const fn key(&self) -> PrototypeKey {
        self.key
    }

    /// Display name.
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// LOD chain, finest first.
    #[inline]
    #[must_use]
    pub fn lods(&self) -> &[LodDescriptor] {
        &self.lods
    }

    /// Number of LOD levels (at least one).
    #[inline]
    #[must_use]
    pub fn lod_count(&self) -> usize {
        self.lods.len()
    }

    /// Object-space bounding sphere.
    #[inline]
    #[must_use]
    pub const fn bounds(&self) -> (Vec3, f32) {
        (self.bounds_center, self.bounds_radius)
    }

    /// Shadow rules.
    #[inline]
    #[must_use]
    pub const fn shadows(&self) -> &ShadowSettings {
        &self.shadows
    }

    /// Returns true if the color pass is skipped.
    #[inline]
    #[must_use]
    pub const fn is_shadow_only(&self) -> bool {
        self.shadow_only
    }

    /// Culling distance.
    #[inline]
    #[must_use]
    pub const fn max_distance(&self) -> f32 {
        self.max_distance
    }

    /// Number of color command slots; shadow slots follow at the same count.
    #[inline]
    #[must_use]
    pub const fn slot_count(&self) -> u32 {
        self.slot_count
    }

    /// First color slot of a renderer.
    #[inline]
    #[must_use]
    pub fn renderer_slot(&self, lod: usize, renderer: usize) -> Option<u32> {
        self.renderer_slots.get(lod)?.get(renderer).copied()
    }

    /// Picks the LOD for a camera distance.
    ///
    /// The distance is scaled by `lod_bias`, mapped to the first level
    /// whose `max_distance` covers it, then clamped so no level finer than
    /// `min_lod` is used. Returns `None` beyond the last level or the
    /// prototype's culling distance.
    #[must_use]
    pub fn select_lod(&self, distance: f32, lod_bias: f32, min_lod: usize) -> Option<usize> {
        if distance > self.max_distance {
            return None;
        }
        let scaled = distance * lod_bias.max(f32::EPSILON);
        let level = self.lods.iter().position(|lod| scaled <= lod.max_distance)?;
        Some(level.max(min_lod).min(self.lods.len() - 1))
    }
}

/// Reference-counted prototype storage.
///
/// A prototype is created on its first registration and dropped when the
/// last render source using it unregisters.
#[derive(Debug, Default)]
pub struct PrototypeRegistry {
    entries: HashMap<PrototypeKey, (Arc<Prototype>, usize)>,
}

impl PrototypeRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the prototype for a descriptor, creating it if needed, and
    /// takes one reference.
    ///
    /// # Errors
    ///
    /// Returns [`InstancingError::InvalidDescriptor`] for a new, invalid descriptor.
    pub fn acquire(&mut self, descriptor: &PrototypeDescriptor) -> InstancingResult<Arc<Prototype>> {
        let key = PrototypeKey::from_asset_id(descriptor.asset_id);
        if let Some((prototype, refs)) = self.entries.get_mut(&key) {
            *refs += 1;
            return Ok(Arc::clone(prototype));
        }

        let prototype = Arc::new(Prototype::from_descriptor(descriptor)?);
        debug!(prototype = %key, name = %prototype.name(), lods = prototype.lod_count(), "prototype created");
        self.entries.insert(key, (Arc::clone(&prototype), 1));
        Ok(prototype)
    }

    /// Drops one reference. Returns true if the prototype was removed.
    pub fn release(&mut self, key: PrototypeKey) -> bool {
        let Some((_, refs)) = self.entries.get_mut(&key) else {
            return false;
        };
        *refs -= 1;
        if *refs == 0 {
            self.entries.remove(&key);
            debug!(prototype = %key, "prototype released");
            return true;
        }
        false
    }

    /// Looks up a prototype.
    #[must_use]
    pub fn get(&self, key: PrototypeKey) -> Option<&Arc<Prototype>> {
        self.entries.get(&key).map(|(p, _)| p)
    }

    /// Number of live references to a prototype.
    #[must_use]
    pub fn ref_count(&self, key: PrototypeKey) -> usize {
        self.entries.get(&key).map_or(0, |(_, refs)| *refs)
    }

    /// Number of registered prototypes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if no prototype is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
