//! # Instancing
//!
//! Prototypes, per-source instance pools and the GPU-visible records
//! the dispatcher writes.

mod instance_data;
mod pool;
mod prototype;

pub use instance_data::DrawIndexedIndirectArgs;
pub use pool::{BatchOutcome, InstancePool};
pub use prototype::{
    LodDescriptor, Prototype, PrototypeDescriptor, PrototypeRegistry, RendererDescriptor,
    ShadowLayerOverride, ShadowSettings, SubMesh, MAX_LOD_COUNT,
};
