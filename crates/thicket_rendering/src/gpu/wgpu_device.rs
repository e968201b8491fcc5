//! `wgpu`-backed device.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::{BufferId, BufferUsage, GpuDevice, GpuError, GpuResult};

/// GPU device wrapping a `wgpu` device and queue.
///
/// Writes go through `Queue::write_buffer` (staged, uploaded at the next
/// submit); copies are recorded into their own command encoder and
/// submitted immediately so they are ordered before the frame's passes.
pub struct WgpuDevice {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    buffers: Mutex<HashMap<BufferId, wgpu::Buffer>>,
    next_id: AtomicU64,
}

impl WgpuDevice {
    /// Wraps an existing device/queue pair.
    #[must_use]
    pub fn new(device: Arc<wgpu::Device>, queue: Arc<wgpu::Queue>) -> Self {
        Self {
            device,
            queue,
            buffers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
        }
    }

    /// Runs `f` with the `wgpu` buffer behind an id, for binding in the host's passes.
    pub fn with_buffer<R>(&self, id: BufferId, f: impl FnOnce(&wgpu::Buffer) -> R) -> Option<R> {
        self.buffers.lock().get(&id).map(f)
    }

    const fn usages(usage: BufferUsage) -> wgpu::BufferUsages {
        match usage {
            BufferUsage::Storage => wgpu::BufferUsages::STORAGE
                .union(wgpu::BufferUsages::VERTEX)
                .union(wgpu::BufferUsages::COPY_DST)
                .union(wgpu::BufferUsages::COPY_SRC),
            BufferUsage::Indirect => wgpu::BufferUsages::INDIRECT
                .union(wgpu::BufferUsages::STORAGE)
                .union(wgpu::BufferUsages::COPY_DST)
                .union(wgpu::BufferUsages::COPY_SRC),
        }
    }
}

impl GpuDevice for WgpuDevice {
    fn create_buffer(&self, label: &str, size: u64, usage: BufferUsage) -> GpuResult<BufferId> {
        let max = self.max_buffer_size();
        if size > max {
            return Err(GpuError::AllocationFailed {
                size,
                reason: format!("exceeds device max_buffer_size {max}"),
            });
        }

        // Copies and writes must be 4-byte aligned.
        let aligned = size.max(wgpu::COPY_BUFFER_ALIGNMENT).next_multiple_of(wgpu::COPY_BUFFER_ALIGNMENT);
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size: aligned,
            usage: Self::usages(usage),
            mapped_at_creation: false,
        });

        let id = BufferId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.buffers.lock().insert(id, buffer);
        Ok(id)
    }

    fn write_buffer(&self, buffer: BufferId, offset: u64, data: &[u8]) -> GpuResult<()> {
        let buffers = self.buffers.lock();
        let target = buffers.get(&buffer).ok_or(GpuError::UnknownBuffer(buffer))?;
        let len = data.len() as u64;
        if offset + len > target.size() {
            return Err(GpuError::OutOfBounds {
                offset,
                len,
                size: target.size(),
            });
        }
        self.queue.write_buffer(target, offset, data);
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
        let buffers = self.buffers.lock();
        let source = buffers.get(&src).ok_or(GpuError::UnknownBuffer(src))?;
        let target = buffers.get(&dst).ok_or(GpuError::UnknownBuffer(dst))?;
        if src_offset + size > source.size() {
            return Err(GpuError::OutOfBounds {
                offset: src_offset,
                len: size,
                size: source.size(),
            });
        }
        if dst_offset + size > target.size() {
            return Err(GpuError::OutOfBounds {
                offset: dst_offset,
                len: size,
                size: target.size(),
            });
        }

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("thicket buffer copy"),
            });
        encoder.copy_buffer_to_buffer(source, src_offset, target, dst_offset, size);
        self.queue.submit(std::iter::once(encoder.finish()));
        Ok(())
    }

    fn destroy_buffer(&self, buffer: BufferId) {
        if let Some(buffer) = self.buffers.lock().remove(&buffer) {
            buffer.destroy();
        }
    }

    fn max_buffer_size(&self) -> u64 {
        self.device.limits().max_buffer_size
    }
}
