//! GPU-resident mirror of a host array.
//!
//! ## Double Buffering
//!
//! ```text
//! Frame N:    writes -> Region A (active)    Region B = frame N-1 (previous)
//! end_frame:  swap roles, copy frame N's written span A -> B
//! Frame N+1:  writes -> Region B (active)    Region A = frame N   (previous)
//! ```
//!
//! The regions swap roles instead of copying the whole array. Only the
//! span written during the last frame is copied forward, so the new active
//! region never holds data older than one frame.

use std::marker::PhantomData;
use std::sync::Arc;

use bytemuck::Pod;
use tracing::{debug, error, warn};

use super::DirtyRange;
use crate::error::{InstancingError, InstancingResult};
use crate::gpu::{BufferId, BufferUsage, GpuDevice};

/// Sizing and buffering policy of a surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SurfaceOptions {
    /// Keep the previous frame's contents in a second region.
    pub double_buffered: bool,
    /// Do not shrink unless capacity exceeds the request by more than this.
    pub shrink_hysteresis: usize,
    /// Hard maximum element count.
    pub max_elements: usize,
    /// Uploads that do not fit grow storage to a multiple of this.
    pub growth_increment: usize,
}

impl Default for SurfaceOptions {
    fn default() -> Self {
        Self {
            double_buffered: false,
            shrink_hysteresis: 256,
            max_elements: crate::config::DEFAULT_MAX_INSTANCE_COUNT,
            growth_increment: crate::config::DEFAULT_POOL_INCREMENT,
        }
    }
}

/// Upload statistics of one surface.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SurfaceStats {
    /// Number of write calls issued.
    pub uploads: u64,
    /// Number of those that rewrote the whole array.
    pub full_uploads: u64,
    /// Elements sent to the device.
    pub elements_uploaded: u64,
    /// Number of GPU reallocations.
    pub reallocations: u64,
}

/// Resizable GPU array with partial uploads and optional double buffering.
///
/// Storage is created lazily on the first [`set_size`](Self::set_size) or
/// [`upload`](Self::upload) and freed on drop.
pub struct BufferSurface<T: Pod> {
    device: Arc<dyn GpuDevice>,
    label: String,
    usage: BufferUsage,
    options: SurfaceOptions,
    /// Region ids; index 1 is only used when double buffered.
    regions: [Option<BufferId>; 2],
    /// Index of the region written this frame.
    active: usize,
    /// Capacity in elements.
    capacity: usize,
    /// Set when the device copy is empty or untrusted.
    needs_full_write: bool,
    /// Span written into the active region this frame.
    written: DirtyRange,
    stats: SurfaceStats,
    _marker: PhantomData<T>,
}

impl<T: Pod> BufferSurface<T> {
    const STRIDE: u64 = std::mem::size_of::<T>() as u64;

    /// Creates an unallocated surface.
    #[must_use]
    pub fn new(
        device: Arc<dyn GpuDevice>,
        label: impl Into<String>,
        usage: BufferUsage,
        options: SurfaceOptions,
    ) -> Self {
        Self {
            device,
            label: label.into(),
            usage,
            options,
            regions: [None, None],
            active: 0,
            capacity: 0,
            needs_full_write: true,
            written: DirtyRange::Clean,
            stats: SurfaceStats::default(),
            _marker: PhantomData,
        }
    }

    /// Capacity in elements.
    #[inline]
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns true once device storage exists.
    #[inline]
    #[must_use]
    pub const fn is_allocated(&self) -> bool {
        self.regions[0].is_some()
    }

    /// Returns true if a previous-frame region is kept.
    #[inline]
    #[must_use]
    pub const fn is_double_buffered(&self) -> bool {
        self.options.double_buffered
    }

    /// Region holding this frame's data.
    #[inline]
    #[must_use]
    pub fn active_buffer(&self) -> Option<BufferId> {
        self.regions[self.active]
    }

    /// Region holding last frame's data (the active one when single buffered).
    #[inline]
    #[must_use]
    pub fn previous_buffer(&self) -> Option<BufferId> {
        if self.options.double_buffered {
            self.regions[self.active ^ 1]
        } else {
            self.regions[self.active]
        }
    }

    /// Upload statistics.
    #[inline]
    #[must_use]
    pub const fn stats(&self) -> SurfaceStats {
        self.stats
    }

    /// Returns and clears the "device copy cannot be trusted" flag.
    ///
    /// Set after creation and after a non-preserving resize; the caller
    /// must then upload every live element.
    #[inline]
    pub fn take_needs_full_write(&mut self) -> bool {
        std::mem::replace(&mut self.needs_full_write, false)
    }

    /// Resizes device storage to `new_size` elements.
    ///
    /// With `preserve_data == false` the storage is recreated empty (use
    /// when a full rewrite follows immediately). Shrinking is skipped while
    /// the excess stays within the hysteresis margin.
    ///
    /// Returns true if storage was reallocated.
    ///
    /// # Errors
    ///
    /// - [`InstancingError::CapacityExceeded`] above the hard maximum (no-op)
    /// - [`InstancingError::Gpu`] if allocation fails (old storage kept)
    pub fn set_size(&mut self, new_size: usize, preserve_data: bool) -> InstancingResult<bool> {
        if new_size > self.options.max_elements {
            error!(
                surface = %self.label,
                requested = new_size,
                max = self.options.max_elements,
                "buffer size request exceeds max instance count"
            );
            return Err(InstancingError::CapacityExceeded {
                requested: new_size,
                max: self.options.max_elements,
            });
        }

        if self.is_allocated() && new_size <= self.capacity {
            let excess = self.capacity - new_size;
            if excess == 0 || excess <= self.options.shrink_hysteresis {
                return Ok(false);
            }
        }

        let bytes = new_size.max(1) as u64 * Self::STRIDE;
        let region_count = if self.options.double_buffered { 2 } else { 1 };
        let mut fresh: [Option<BufferId>; 2] = [None, None];
        for slot in fresh.iter_mut().take(region_count) {
            match self.device.create_buffer(&self.label, bytes, self.usage) {
                Ok(id) => *slot = Some(id),
                Err(e) => {
                    self.destroy_regions(fresh);
                    error!(surface = %self.label, bytes, error = %e, "buffer allocation failed");
                    return Err(e.into());
                }
            }
        }

        if preserve_data && self.is_allocated() {
            let copy_bytes = self.capacity.min(new_size) as u64 * Self::STRIDE;
            if copy_bytes > 0 {
                // Region roles are kept: index i of the old pair maps to index i of the new.
                for index in 0..region_count {
                    if let (Some(src), Some(dst)) = (self.regions[index], fresh[index]) {
                        if let Err(e) = self.device.copy_buffer(src, 0, dst, 0, copy_bytes) {
                            self.destroy_regions(fresh);
                            error!(surface = %self.label, error = %e, "buffer resize copy failed");
                            return Err(e.into());
                        }
                    }
                }
            }
        } else {
            self.needs_full_write = true;
        }

        let old = std::mem::replace(&mut self.regions, fresh);
        self.destroy_regions(old);
        if !self.options.double_buffered {
            self.active = 0;
        }
        debug!(
            surface = %self.label,
            from = self.capacity,
            to = new_size,
            preserve_data,
            "buffer surface resized"
        );
        self.capacity = new_size;
        self.stats.reallocations += 1;
        Ok(true)
    }

    /// Makes room for at least `needed` elements, sized to `preferred`.
    ///
    /// Storage already between the two is kept. If the device rejects
    /// `preferred`, exactly `needed` is allocated instead.
    ///
    /// # Errors
    ///
    /// See [`set_size`](Self::set_size).
    pub fn reserve(
        &mut self,
        needed: usize,
        preferred: usize,
        preserve_data: bool,
    ) -> InstancingResult<bool> {
        let preferred = preferred.min(self.options.max_elements).max(needed);
        if self.is_allocated() && (needed..preferred).contains(&self.capacity) {
            return Ok(false);
        }
        if preferred > needed {
            match self.set_size(preferred, preserve_data) {
                Err(InstancingError::Gpu(e)) => {
                    warn!(surface = %self.label, needed, preferred, error = %e, "falling back to exact size");
                }
                other => return other,
            }
        }
        self.set_size(needed, preserve_data)
    }

    /// Uploads `data[host_start..host_start + count]` to device elements
    /// starting at `device_start`.
    ///
    /// Storage is grown (preserving contents) to the next multiple of the
    /// growth increment if the write does not fit.
    /// `is_full_write` marks an upload that rewrites every live element.
    ///
    /// # Errors
    ///
    /// Fails if the host range is out of bounds, the size cap is hit or
    /// the device rejects the write.
    pub fn upload(
        &mut self,
        data: &[T],
        host_start: usize,
        device_start: usize,
        count: usize,
        is_full_write: bool,
    ) -> InstancingResult<()> {
        if count == 0 {
            return Ok(());
        }

        let host = data
            .get(host_start..host_start + count)
            .ok_or(InstancingError::CapacityExceeded {
                requested: host_start + count,
                max: data.len(),
            })?;

        let device_end = device_start + count;
        if !self.is_allocated() || device_end > self.capacity {
            let step = self.options.growth_increment.max(1);
            self.reserve(device_end, device_end.div_ceil(step) * step, true)?;
        }

        let region = self.regions[self.active].ok_or(InstancingError::CapacityExceeded {
            requested: device_end,
            max: self.capacity,
        })?;
        self.device.write_buffer(
            region,
            device_start as u64 * Self::STRIDE,
            bytemuck::cast_slice(host),
        )?;

        self.written.mark_range(device_start, device_end - 1);
        self.stats.uploads += 1;
        self.stats.elements_uploaded += count as u64;
        if is_full_write {
            self.stats.full_uploads += 1;
        }
        Ok(())
    }

    /// Uploads the dirty span of `data` to device elements offset by `device_start`.
    ///
    /// Returns the number of elements sent.
    ///
    /// # Errors
    ///
    /// See [`upload`](Self::upload).
    pub fn upload_dirty(
        &mut self,
        data: &[T],
        dirty: DirtyRange,
        device_start: usize,
    ) -> InstancingResult<usize> {
        match dirty.resolve(data.len()) {
            None => Ok(0),
            Some((start, count, full)) => {
                self.upload(data, start, device_start + start, count, full)?;
                Ok(count)
            }
        }
    }

    /// Ends the frame: swaps region roles and carries the written span forward.
    ///
    /// No-op for single-buffered surfaces.
    pub fn swap(&mut self) {
        let written = self.written.take();
        if !self.options.double_buffered || !self.is_allocated() {
            return;
        }

        let previous = self.active;
        self.active ^= 1;

        let Some((start, count, _)) = written.resolve(self.capacity) else {
            return;
        };
        let (Some(src), Some(dst)) = (self.regions[previous], self.regions[self.active]) else {
            return;
        };
        let offset = start as u64 * Self::STRIDE;
        if let Err(e) = self
            .device
            .copy_buffer(src, offset, dst, offset, count as u64 * Self::STRIDE)
        {
            warn!(surface = %self.label, error = %e, "double-buffer carry failed, forcing full write");
            self.needs_full_write = true;
        }
    }

    fn destroy_regions(&self, regions: [Option<BufferId>; 2]) {
        for id in regions.into_iter().flatten() {
            self.device.destroy_buffer(id);
        }
    }
}

impl<T: Pod> Drop for BufferSurface<T> {
    fn drop(&mut self) {
        let regions = std::mem::take(&mut self.regions);
        self.destroy_regions(regions);
    }
}
