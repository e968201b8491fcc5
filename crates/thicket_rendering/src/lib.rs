//! # Thicket Rendering
//!
//! GPU-instance rendering core for scenes with thousands of copies of the
//! same object (vegetation, rocks, props):
//! - Dense per-source instance pools with swap-remove and amortized growth
//! - Per-frame transform sync fanned out over rayon, joined before upload
//! - Dirty-range tracked, optionally double-buffered GPU storage
//! - Asynchronous per-camera culling, LOD selection and indirect draws
//!
//! ## Architecture
//!
//! ```text
//! register ──> PrototypeRegistry ──> RenderSourceGroup
//!                                     ├── RenderSource ──> InstancePool
//!                                     └── BufferSurface<Mat4>
//!
//! begin_frame ──> sync_transforms ──> upload ──> Dispatcher ──> DrawSink
//!                                                   ^
//!                              VisibilityTask (rayon, per camera/group)
//! ```
//!
//! ## Rules
//!
//! - A misconfigured prototype renders nothing and logs
//! - One failing group never stops the others from drawing
//! - Nothing in the draw loop waits on a culling job

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod buffer;
pub mod camera;
pub mod config;
pub mod context;
pub mod culling;
pub mod dispatch;
pub mod error;
pub mod gpu;
pub mod group;
pub mod ids;
pub mod instancing;
pub mod sync;

pub use buffer::{BufferSurface, DirtyRange, SurfaceOptions, SurfaceStats};
pub use camera::{CameraData, CameraRegistry, CameraView, VisibilityPhase};
pub use config::{ActivationConfig, InstancingConfig};
pub use context::InstancingContext;
pub use culling::{FrustumCuller, VisibilityResult, VisibilityTask};
pub use dispatch::{Dispatcher, DrawCall, DrawList, DrawPass, DrawSink, RenderStats};
pub use error::{InstancingError, InstancingResult};
pub use gpu::{BufferId, BufferUsage, GpuDevice, GpuError, HeadlessDevice, WgpuDevice};
pub use group::{CapabilityFlags, RenderSourceGroup, VariantResolver};
pub use ids::{CameraId, GroupKey, MaterialId, MeshId, OwnerId, PrototypeKey, RenderKey, VariantId};
pub use instancing::{
    DrawIndexedIndirectArgs, InstancePool, LodDescriptor, Prototype, PrototypeDescriptor,
    RendererDescriptor, ShadowLayerOverride, ShadowSettings, SubMesh,
};
pub use sync::{SyncStats, TransformSynchronizer};
