//! GPU-visible records written by the dispatcher.

use bytemuck::{Pod, Zeroable};

/// Arguments of one `draw_indexed_indirect` command.
///
/// Matches the layout `wgpu`, Vulkan and D3D12 read from an indirect
/// buffer. `instance_count` and `first_instance` are per-camera: they
/// select the LOD's slice of the visible-instance index list.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct DrawIndexedIndirectArgs {
    /// Number of indices per instance.
    pub index_count: u32,
    /// Number of instances to draw.
    pub instance_count: u32,
    /// First index in the index buffer.
    pub first_index: u32,
    /// Vertex offset added to each index.
    pub base_vertex: i32,
    /// Offset into the visible-instance index list.
    pub first_instance: u32,
}

impl DrawIndexedIndirectArgs {
    /// Size in bytes.
    pub const SIZE: usize = std::mem::size_of::<Self>();

    /// Creates the command for one sub-mesh.
    #[must_use]
    pub const fn new(
        index_count: u32,
        first_index: u32,
        base_vertex: i32,
        instance_count: u32,
        first_instance: u32,
    ) -> Self {
        Self {
            index_count,
            instance_count,
            first_index,
            base_vertex,
            first_instance,
        }
    }

    /// Returns true if the command draws nothing.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.instance_count == 0 || self.index_count == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_indirect_args_size() {
        // Five tightly packed 32-bit words.
        assert_eq!(DrawIndexedIndirectArgs::SIZE, 20);
        assert_eq!(std::mem::align_of::<DrawIndexedIndirectArgs>(), 4);
    }

    #[test]
    fn test_byte_layout() {
        let args = DrawIndexedIndirectArgs::new(36, 6, -2, 10, 4);
        let words: &[u32] = bytemuck::cast_slice(std::slice::from_ref(&args));
        assert_eq!(words, &[36, 10, 6, (-2i32) as u32, 4]);
        assert!(!args.is_empty());
        assert!(DrawIndexedIndirectArgs::default().is_empty());
    }
}
