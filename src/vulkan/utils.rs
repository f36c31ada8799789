use std::mem::size_of_val;

use anyhow::Result;
use ash::vk;
use glam::UVec2;
use gpu_allocator::MemoryLocation;

use crate::vulkan::{Buffer, CommandBuffer, Context, Image, ImageAndView, ImageBarrier};

/// Stage and access of the copy that reads the storage image out at the end
/// of a frame. The next frame's writes have to wait for it.
pub(crate) const STORAGE_IMAGE_COPY_READ: (vk::PipelineStageFlags2, vk::AccessFlags2) =
    (vk::PipelineStageFlags2::TRANSFER, vk::AccessFlags2::TRANSFER_READ);

/// Stage and access of the ray tracing shaders writing the storage image.
pub(crate) const STORAGE_IMAGE_SHADER_WRITE: (vk::PipelineStageFlags2, vk::AccessFlags2) = (
    vk::PipelineStageFlags2::RAY_TRACING_SHADER_KHR,
    vk::AccessFlags2::SHADER_WRITE,
);

pub fn read_shader_from_bytes(bytes: &[u8]) -> Result<Vec<u32>> {
    let mut cursor = std::io::Cursor::new(bytes);
    Ok(ash::util::read_spv(&mut cursor)?)
}

impl Context {
    pub fn create_gpu_only_buffer_from_data<T: Copy>(
        &self,
        usage: vk::BufferUsageFlags,
        data: &[T],
    ) -> Result<Buffer> {
        let size = size_of_val(data) as _;
        let staging_buffer = self.create_buffer(
            vk::BufferUsageFlags::TRANSFER_SRC,
            MemoryLocation::CpuToGpu,
            size,
        )?;
        staging_buffer.copy_data_to_buffer(data)?;

        let buffer = self.create_buffer(
            usage | vk::BufferUsageFlags::TRANSFER_DST,
            MemoryLocation::GpuOnly,
            size,
        )?;

        self.execute_one_time_commands(|cmd_buffer| {
            cmd_buffer.copy_buffer(&staging_buffer, &buffer);
        })?;

        Ok(buffer)
    }

    /// Like [`Context::create_gpu_only_buffer_from_data`] but the device
    /// address of the result is aligned to `alignment`.
    pub fn create_gpu_only_buffer_from_data_complex<T: Copy>(
        &self,
        usage: vk::BufferUsageFlags,
        data: &[T],
        alignment: vk::DeviceSize,
    ) -> Result<Buffer> {
        let size = size_of_val(data) as _;
        let staging_buffer = self.create_buffer(
            vk::BufferUsageFlags::TRANSFER_SRC,
            MemoryLocation::CpuToGpu,
            size,
        )?;
        staging_buffer.copy_data_to_buffer(data)?;

        let buffer = self.create_aligned_buffer(
            usage | vk::BufferUsageFlags::TRANSFER_DST,
            MemoryLocation::GpuOnly,
            size,
            alignment,
        )?;

        self.execute_one_time_commands(|cmd_buffer| {
            cmd_buffer.copy_buffer(&staging_buffer, &buffer);
        })?;

        Ok(buffer)
    }

    /// A storage image that can be copied from, already in `GENERAL` layout.
    pub fn create_storage_image(&self, format: vk::Format, res: UVec2) -> Result<ImageAndView> {
        let image = self.create_image(
            vk::ImageUsageFlags::TRANSFER_SRC | vk::ImageUsageFlags::STORAGE,
            MemoryLocation::GpuOnly,
            format,
            res.x,
            res.y,
        )?;

        let view = image.create_image_view()?;

        self.execute_one_time_commands(|cmd_buffer| {
            cmd_buffer.pipeline_image_barriers(&[ImageBarrier {
                image: &image,
                old_layout: vk::ImageLayout::UNDEFINED,
                new_layout: vk::ImageLayout::GENERAL,
                src_access_mask: vk::AccessFlags2::NONE,
                dst_access_mask: vk::AccessFlags2::NONE,
                src_stage_mask: vk::PipelineStageFlags2::NONE,
                dst_stage_mask: vk::PipelineStageFlags2::ALL_COMMANDS,
            }]);
        })?;

        Ok(ImageAndView { image, view })
    }
}

impl CommandBuffer {
    /// Moves the storage image into `GENERAL` so the ray tracing shaders can
    /// write it. The previous content is discarded, but the copy of the
    /// previous frame still has to finish reading it.
    pub fn storage_image_write_barrier(&self, storage_image: &Image) {
        let (src_stage_mask, src_access_mask) = STORAGE_IMAGE_COPY_READ;
        let (dst_stage_mask, dst_access_mask) = STORAGE_IMAGE_SHADER_WRITE;

        self.pipeline_image_barriers(&[ImageBarrier {
            image: storage_image,
            old_layout: vk::ImageLayout::UNDEFINED,
            new_layout: vk::ImageLayout::GENERAL,
            src_access_mask,
            dst_access_mask,
            src_stage_mask,
            dst_stage_mask,
        }]);
    }

    /// Transitions both images for a transfer, copies the storage image into
    /// the swapchain image if `copy` is set and leaves the swapchain image
    /// presentable and the storage image in `GENERAL`.
    pub fn swapchain_image_copy_from_ray_tracing_storage_image(
        &self,
        storage_image: &Image,
        swapchain_image: &Image,
        copy: bool,
    ) {
        self.pipeline_image_barriers(&[
            ImageBarrier {
                image: storage_image,
                old_layout: vk::ImageLayout::GENERAL,
                new_layout: vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                src_access_mask: STORAGE_IMAGE_SHADER_WRITE.1,
                dst_access_mask: STORAGE_IMAGE_COPY_READ.1,
                src_stage_mask: STORAGE_IMAGE_SHADER_WRITE.0,
                dst_stage_mask: STORAGE_IMAGE_COPY_READ.0,
            },
            ImageBarrier {
                image: swapchain_image,
                old_layout: vk::ImageLayout::UNDEFINED,
                new_layout: vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                src_access_mask: vk::AccessFlags2::NONE,
                dst_access_mask: vk::AccessFlags2::TRANSFER_WRITE,
                src_stage_mask: vk::PipelineStageFlags2::NONE,
                dst_stage_mask: vk::PipelineStageFlags2::TRANSFER,
            },
        ]);

        if copy {
            self.copy_image(
                storage_image,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                swapchain_image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            );
        }

        self.pipeline_image_barriers(&[
            ImageBarrier {
                image: swapchain_image,
                old_layout: vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                new_layout: vk::ImageLayout::PRESENT_SRC_KHR,
                src_access_mask: vk::AccessFlags2::TRANSFER_WRITE,
                dst_access_mask: vk::AccessFlags2::NONE,
                src_stage_mask: vk::PipelineStageFlags2::TRANSFER,
                dst_stage_mask: vk::PipelineStageFlags2::BOTTOM_OF_PIPE,
            },
            ImageBarrier {
                image: storage_image,
                old_layout: vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                new_layout: vk::ImageLayout::GENERAL,
                src_access_mask: STORAGE_IMAGE_COPY_READ.1,
                dst_access_mask: vk::AccessFlags2::NONE,
                src_stage_mask: STORAGE_IMAGE_COPY_READ.0,
                dst_stage_mask: vk::PipelineStageFlags2::ALL_COMMANDS,
            },
        ]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shader_writes_wait_for_the_previous_copy() {
        let (src_stage, src_access) = STORAGE_IMAGE_COPY_READ;

        assert_ne!(src_stage, vk::PipelineStageFlags2::NONE);
        assert!(src_stage.contains(vk::PipelineStageFlags2::TRANSFER));
        assert!(src_access.contains(vk::AccessFlags2::TRANSFER_READ));
        assert_eq!(
            STORAGE_IMAGE_SHADER_WRITE,
            (
                vk::PipelineStageFlags2::RAY_TRACING_SHADER_KHR,
                vk::AccessFlags2::SHADER_WRITE
            )
        );
    }

    #[test]
    fn shader_reads_spirv_words() {
        let bytes = [0x03, 0x02, 0x23, 0x07, 0x00, 0x00, 0x01, 0x00];
        assert_eq!(read_shader_from_bytes(&bytes).unwrap(), vec![0x0723_0203, 0x0001_0000]);
        assert!(read_shader_from_bytes(&bytes[..6]).is_err());
    }
}
