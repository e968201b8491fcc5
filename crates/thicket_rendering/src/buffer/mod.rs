//! # GPU Buffer Surfaces
//!
//! Host arrays are mirrored into device buffers through a
//! [`BufferSurface`]. Only the [`DirtyRange`] touched since the last
//! upload crosses the bus, except right after a non-preserving resize.

mod dirty;
mod surface;

pub use dirty::DirtyRange;
pub use surface::{BufferSurface, SurfaceOptions, SurfaceStats};
