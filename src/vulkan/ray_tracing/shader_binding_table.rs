use anyhow::{ensure, Result};
use ash::vk;
use gpu_allocator::MemoryLocation;
use log::trace;

use crate::vulkan::ray_tracing::align_up;
use crate::vulkan::{Buffer, Context, RayTracingPipeline};

/// Byte offsets and sizes of the raygen, miss and hit regions. Every region
/// holds exactly one handle, so its stride is its size. The callable region
/// is empty and starts where the buffer ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShaderBindingTableLayout {
    pub handle_size: u64,
    pub handle_size_aligned: u64,
    pub raygen_offset: u64,
    pub miss_offset: u64,
    pub hit_offset: u64,
    pub callable_offset: u64,
    pub buffer_size: u64,
}

impl ShaderBindingTableLayout {
    pub fn new(handle_size: u32, handle_alignment: u32, base_alignment: u32) -> Self {
        let handle_size = handle_size as u64;
        let base_alignment = base_alignment as u64;
        let handle_size_aligned = align_up(handle_size, handle_alignment as u64);

        let raygen_offset = 0;
        let miss_offset = align_up(raygen_offset + handle_size_aligned, base_alignment);
        let hit_offset = align_up(miss_offset + handle_size_aligned, base_alignment);
        let callable_offset = align_up(hit_offset + handle_size_aligned, base_alignment);

        Self {
            handle_size,
            handle_size_aligned,
            raygen_offset,
            miss_offset,
            hit_offset,
            callable_offset,
            buffer_size: callable_offset,
        }
    }

    pub fn group_offsets(&self) -> [u64; 3] {
        [self.raygen_offset, self.miss_offset, self.hit_offset]
    }

    /// Writes the handles in group order (raygen, miss, hit) to their region offsets.
    pub fn pack_handles(&self, handles: &[u8]) -> Result<Vec<u8>> {
        let handle_size = self.handle_size as usize;
        let offsets = self.group_offsets();
        ensure!(
            handles.len() == handle_size * offsets.len(),
            "Expected {} bytes of shader group handles, got {}",
            handle_size * offsets.len(),
            handles.len()
        );

        let mut data = vec![0u8; self.buffer_size as usize];
        for (handle, offset) in handles.chunks_exact(handle_size).zip(offsets) {
            let offset = offset as usize;
            data[offset..offset + handle_size].copy_from_slice(handle);
        }

        Ok(data)
    }

    fn region(&self, base_address: vk::DeviceAddress, offset: u64) -> vk::StridedDeviceAddressRegionKHR {
        vk::StridedDeviceAddressRegionKHR::default()
            .device_address(base_address + offset)
            .stride(self.handle_size_aligned)
            .size(self.handle_size_aligned)
    }
}

pub struct ShaderBindingTable {
    _buffer: Buffer,
    pub layout: ShaderBindingTableLayout,
    pub raygen_region: vk::StridedDeviceAddressRegionKHR,
    pub miss_region: vk::StridedDeviceAddressRegionKHR,
    pub hit_region: vk::StridedDeviceAddressRegionKHR,
    pub callable_region: vk::StridedDeviceAddressRegionKHR,
}

impl ShaderBindingTable {
    pub(crate) fn new(context: &Context, pipeline: &RayTracingPipeline) -> Result<Self> {
        let properties = &context.ray_tracing.pipeline_properties;
        let layout = ShaderBindingTableLayout::new(
            properties.shader_group_handle_size,
            properties.shader_group_handle_alignment,
            properties.shader_group_base_alignment,
        );
        trace!("Creating shader binding table {layout:?}");

        let group_count = pipeline.shader_group_count;
        let handles = unsafe {
            context
                .ray_tracing
                .pipeline_fn
                .get_ray_tracing_shader_group_handles(
                    pipeline.inner,
                    0,
                    group_count,
                    (group_count * properties.shader_group_handle_size) as usize,
                )?
        };
        let data = layout.pack_handles(&handles)?;

        let buffer = context.create_aligned_buffer(
            vk::BufferUsageFlags::SHADER_BINDING_TABLE_KHR
                | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS,
            MemoryLocation::CpuToGpu,
            layout.buffer_size,
            properties.shader_group_base_alignment as _,
        )?;
        buffer.copy_data_to_buffer(&data)?;

        let address = buffer.get_device_address();
        let raygen_region = layout.region(address, layout.raygen_offset);
        let miss_region = layout.region(address, layout.miss_offset);
        let hit_region = layout.region(address, layout.hit_offset);
        let callable_region = vk::StridedDeviceAddressRegionKHR::default()
            .device_address(address + layout.callable_offset);

        Ok(Self {
            _buffer: buffer,
            layout,
            raygen_region,
            miss_region,
            hit_region,
            callable_region,
        })
    }
}

impl Context {
    pub fn create_shader_binding_table(&self, pipeline: &RayTracingPipeline) -> Result<ShaderBindingTable> {
        ShaderBindingTable::new(self, pipeline)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn regions_start_on_base_alignment() {
        let layout = ShaderBindingTableLayout::new(32, 32, 64);

        assert_eq!(layout.handle_size_aligned, 32);
        assert_eq!(layout.raygen_offset, 0);
        assert_eq!(layout.miss_offset, 64);
        assert_eq!(layout.hit_offset, 128);
        assert_eq!(layout.callable_offset, 192);
        assert_eq!(layout.buffer_size, 192);
    }

    #[test]
    fn handle_size_is_rounded_to_handle_alignment() {
        let layout = ShaderBindingTableLayout::new(24, 32, 64);

        assert_eq!(layout.handle_size_aligned, 32);
        assert_eq!(layout.miss_offset, 64);
        assert_eq!(layout.hit_offset, 128);
    }

    #[test]
    fn large_handles_span_several_base_alignments() {
        let layout = ShaderBindingTableLayout::new(32, 32, 16);

        assert_eq!(layout.miss_offset, 32);
        assert_eq!(layout.hit_offset, 64);
        assert_eq!(layout.buffer_size, 96);
    }

    #[test]
    fn regions_are_ordered_and_aligned() {
        for (handle_size, handle_alignment, base_alignment) in [(32, 32, 64), (16, 16, 32), (32, 64, 64)] {
            let layout = ShaderBindingTableLayout::new(handle_size, handle_alignment, base_alignment);
            let [raygen, miss, hit] = layout.group_offsets();

            assert!(raygen < miss && miss < hit);
            for offset in [raygen, miss, hit] {
                assert_eq!(offset % base_alignment as u64, 0);
            }

            let region = layout.region(0x10000, miss);
            assert_eq!(region.stride, region.size);
        }
    }

    #[test]
    fn handles_are_packed_at_region_offsets() {
        let layout = ShaderBindingTableLayout::new(4, 4, 8);
        let handles = [1, 1, 1, 1, 2, 2, 2, 2, 3, 3, 3, 3];

        let data = layout.pack_handles(&handles).unwrap();

        assert_eq!(data.len(), 24);
        assert_eq!(&data[0..4], &[1, 1, 1, 1]);
        assert_eq!(&data[4..8], &[0, 0, 0, 0]);
        assert_eq!(&data[8..12], &[2, 2, 2, 2]);
        assert_eq!(&data[16..20], &[3, 3, 3, 3]);
    }

    #[test]
    fn wrong_handle_count_is_rejected() {
        let layout = ShaderBindingTableLayout::new(4, 4, 8);
        assert!(layout.pack_handles(&[0; 8]).is_err());
    }
}
