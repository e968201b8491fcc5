//! GPU device seam.
//!
//! The instancing core only ever needs four things from a graphics API:
//! create a buffer, write bytes into it, copy between buffers and free it.
//! Everything else (pipelines, passes, bind groups) belongs to the host
//! renderer, which receives [`DrawCall`](crate::dispatch::DrawCall)s.
//!
//! - [`HeadlessDevice`]: host-memory buffers, records every upload
//! - [`WgpuDevice`]: real `wgpu` buffers

mod headless;
mod wgpu_device;

pub use headless::{HeadlessDevice, UploadRecord};
pub use wgpu_device::WgpuDevice;

use thiserror::Error;

/// Opaque id of a device buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(pub u64);

/// What a buffer is bound as.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BufferUsage {
    /// Read-only storage in shaders (matrices, visible-instance indices).
    Storage,
    /// Indirect draw arguments.
    Indirect,
}

/// Errors reported by a [`GpuDevice`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GpuError {
    /// The device could not allocate the buffer.
    #[error("allocation of {size} bytes failed: {reason}")]
    AllocationFailed {
        /// Requested size in bytes.
        size: u64,
        /// Device-specific reason.
        reason: String,
    },

    /// The buffer id is unknown (never created or already destroyed).
    #[error("unknown buffer {0:?}")]
    UnknownBuffer(BufferId),

    /// A write or copy would run past the end of the buffer.
    #[error("out of bounds: offset {offset} + {len} > size {size}")]
    OutOfBounds {
        /// Byte offset.
        offset: u64,
        /// Byte length.
        len: u64,
        /// Buffer size.
        size: u64,
    },
}

/// Result type for device operations.
pub type GpuResult<T> = Result<T, GpuError>;

/// Minimal buffer API the instancing core is written against.
///
/// Methods take `&self`: devices are shared between groups and cameras as
/// `Arc<dyn GpuDevice>` and synchronize internally.
pub trait GpuDevice: Send + Sync {
    /// Allocates a zero-initialized buffer of `size` bytes.
    ///
    /// # Errors
    ///
    /// Returns [`GpuError::AllocationFailed`] when the device cannot provide it.
    fn create_buffer(&self, label: &str, size: u64, usage: BufferUsage) -> GpuResult<BufferId>;

    /// Writes `data` at byte `offset`.
    ///
    /// # Errors
    ///
    /// Fails on unknown buffers or out-of-bounds writes.
    fn write_buffer(&self, buffer: BufferId, offset: u64, data: &[u8]) -> GpuResult<()>;

    /// Copies `size` bytes between two buffers on the device timeline.
    ///
    /// # Errors
    ///
    /// Fails on unknown buffers or out-of-bounds ranges.
    fn copy_buffer(
        &self,
        src: BufferId,
        src_offset: u64,
        dst: BufferId,
        dst_offset: u64,
        size: u64,
    ) -> GpuResult<()>;

    /// Frees a buffer. Unknown ids are ignored.
    fn destroy_buffer(&self, buffer: BufferId);

    /// Largest buffer the device accepts, in bytes.
    fn max_buffer_size(&self) -> u64;
}
