//! Host-memory device.
//!
//! Used for dedicated servers, tooling and tests. Every write is recorded
//! so callers can assert exactly which byte ranges crossed the "bus".

use std::collections::HashMap;

use parking_lot::Mutex;

use super::{BufferId, BufferUsage, GpuDevice, GpuError, GpuResult};

/// One recorded `write_buffer` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadRecord {
    /// Target buffer.
    pub buffer: BufferId,
    /// Byte offset of the write.
    pub offset: u64,
    /// Bytes written.
    pub len: u64,
}

#[derive(Default)]
struct HeadlessState {
    buffers: HashMap<BufferId, (BufferUsage, Vec<u8>)>,
    uploads: Vec<UploadRecord>,
    next_id: u64,
    allocations: u64,
}

/// GPU device backed by plain host memory.
pub struct HeadlessDevice {
    state: Mutex<HeadlessState>,
    max_buffer_size: u64,
}

impl HeadlessDevice {
    /// Default size limit (256 MiB), matching common desktop limits.
    pub const DEFAULT_MAX_BUFFER_SIZE: u64 = 256 << 20;

    /// Creates a device with the default buffer size limit.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_buffer_size(Self::DEFAULT_MAX_BUFFER_SIZE)
    }

    /// Creates a device that refuses buffers above `max_buffer_size` bytes.
    ///
    /// Small limits simulate GPU memory exhaustion.
    #[must_use]
    pub fn with_max_buffer_size(max_buffer_size: u64) -> Self {
        Self {
            state: Mutex::new(HeadlessState::default()),
            max_buffer_size,
        }
    }

    /// Returns every write since the last [`clear_uploads`](Self::clear_uploads).
    #[must_use]
    pub fn uploads(&self) -> Vec<UploadRecord> {
        self.state.lock().uploads.clone()
    }

    /// Returns writes that targeted one buffer.
    #[must_use]
    pub fn uploads_to(&self, buffer: BufferId) -> Vec<UploadRecord> {
        self.state
            .lock()
            .uploads
            .iter()
            .filter(|u| u.buffer == buffer)
            .copied()
            .collect()
    }

    /// Forgets recorded writes.
    pub fn clear_uploads(&self) {
        self.state.lock().uploads.clear();
    }

    /// Copies a buffer's current contents.
    #[must_use]
    pub fn contents(&self, buffer: BufferId) -> Option<Vec<u8>> {
        self.state.lock().buffers.get(&buffer).map(|(_, b)| b.clone())
    }

    /// Number of buffers currently alive.
    #[must_use]
    pub fn live_buffers(&self) -> usize {
        self.state.lock().buffers.len()
    }

    /// Total successful allocations since creation.
    #[must_use]
    pub fn allocation_count(&self) -> u64 {
        self.state.lock().allocations
    }
}

impl Default for HeadlessDevice {
    fn default() -> Self {
        Self::new()
    }
}

fn check_bounds(offset: u64, len: u64, size: u64) -> GpuResult<()> {
    if offset.checked_add(len).map_or(true, |end| end > size) {
        return Err(GpuError::OutOfBounds { offset, len, size });
    }
    Ok(())
}

impl GpuDevice for HeadlessDevice {
    fn create_buffer(&self, _label: &str, size: u64, usage: BufferUsage) -> GpuResult<BufferId> {
        if size > self.max_buffer_size {
            return Err(GpuError::AllocationFailed {
                size,
                reason: format!("exceeds max buffer size {}", self.max_buffer_size),
            });
        }
        let len = usize::try_from(size).map_err(|_| GpuError::AllocationFailed {
            size,
            reason: "exceeds host address space".to_string(),
        })?;

        let mut state = self.state.lock();
        let id = BufferId(state.next_id);
        state.next_id += 1;
        state.allocations += 1;
        state.buffers.insert(id, (usage, vec![0; len]));
        Ok(id)
    }

    fn write_buffer(&self, buffer: BufferId, offset: u64, data: &[u8]) -> GpuResult<()> {
        let mut state = self.state.lock();
        let (_, bytes) = state
            .buffers
            .get_mut(&buffer)
            .ok_or(GpuError::UnknownBuffer(buffer))?;
        check_bounds(offset, data.len() as u64, bytes.len() as u64)?;

        let start = offset as usize;
        bytes[start..start + data.len()].copy_from_slice(data);
        state.uploads.push(UploadRecord {
            buffer,
            offset,
            len: data.len() as u64,
        });
        Ok(())
    }

    fn copy_buffer(
        &self,
        src: BufferId,
        src_offset: u64,
        dst: BufferId,
        dst_offset: u64,
        size: u64,
    ) -> GpuResult<()> {
        let mut state = self.state.lock();
        let source = {
            let (_, bytes) = state.buffers.get(&src).ok_or(GpuError::UnknownBuffer(src))?;
            check_bounds(src_offset, size, bytes.len() as u64)?;
            bytes[src_offset as usize..(src_offset + size) as usize].to_vec()
        };
        let (_, bytes) = state
            .buffers
            .get_mut(&dst)
            .ok_or(GpuError::UnknownBuffer(dst))?;
        check_bounds(dst_offset, size, bytes.len() as u64)?;
        bytes[dst_offset as usize..(dst_offset + size) as usize].copy_from_slice(&source);
        Ok(())
    }

    fn destroy_buffer(&self, buffer: BufferId) {
        self.state.lock().buffers.remove(&buffer);
    }

    fn max_buffer_size(&self) -> u64 {
        self.max_buffer_size
    }
}
