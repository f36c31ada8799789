use std::mem;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use ash::vk;
use gpu_allocator::{
    vulkan::{Allocation, AllocationCreateDesc, AllocationScheme, Allocator},
    MemoryLocation,
};
use log::{error, trace};

use crate::vulkan::{Context, Device};

/// The single mip level and layer of a color image. Every image the renderer
/// touches has this shape.
pub(crate) const COLOR_SUBRESOURCE: vk::ImageSubresourceRange = vk::ImageSubresourceRange {
    aspect_mask: vk::ImageAspectFlags::COLOR,
    base_mip_level: 0,
    level_count: 1,
    base_array_layer: 0,
    layer_count: 1,
};

/// Swapchain images belong to the swapchain and are never freed here.
#[derive(Debug)]
enum ImageMemory {
    Swapchain,
    Owned {
        allocator: Arc<Mutex<Allocator>>,
        allocation: Allocation,
    },
}

#[derive(Debug)]
pub struct Image {
    device: Arc<Device>,
    pub(crate) inner: vk::Image,
    memory: ImageMemory,
    pub format: vk::Format,
    pub extent: vk::Extent3D,
}

#[derive(Debug)]
pub struct ImageView {
    device: Arc<Device>,
    pub(crate) inner: vk::ImageView,
}

#[derive(Debug)]
pub struct ImageAndView {
    pub view: ImageView,
    pub image: Image,
}

fn flat_extent(width: u32, height: u32) -> vk::Extent3D {
    vk::Extent3D {
        width,
        height,
        depth: 1,
    }
}

/// Optimal tiled, single sampled 2D color image starting in `UNDEFINED`.
fn color_image_info(
    usage: vk::ImageUsageFlags,
    format: vk::Format,
    width: u32,
    height: u32,
) -> vk::ImageCreateInfo<'static> {
    vk::ImageCreateInfo::default()
        .image_type(vk::ImageType::TYPE_2D)
        .format(format)
        .extent(flat_extent(width, height))
        .mip_levels(COLOR_SUBRESOURCE.level_count)
        .array_layers(COLOR_SUBRESOURCE.layer_count)
        .samples(vk::SampleCountFlags::TYPE_1)
        .tiling(vk::ImageTiling::OPTIMAL)
        .usage(usage)
        .initial_layout(vk::ImageLayout::UNDEFINED)
}

impl Image {
    pub(crate) fn from_swapchain_image(
        device: Arc<Device>,
        swapchain_image: vk::Image,
        format: vk::Format,
        extent: vk::Extent2D,
    ) -> Self {
        Self {
            device,
            inner: swapchain_image,
            memory: ImageMemory::Swapchain,
            format,
            extent: flat_extent(extent.width, extent.height),
        }
    }

    pub fn create_image_view(&self) -> Result<ImageView> {
        let view_info = vk::ImageViewCreateInfo::default()
            .image(self.inner)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(self.format)
            .subresource_range(COLOR_SUBRESOURCE);
        let inner = unsafe { self.device.inner.create_image_view(&view_info, None)? };

        Ok(ImageView {
            device: self.device.clone(),
            inner,
        })
    }
}

impl Context {
    /// Creates a 2D color image backed by its own allocation.
    pub fn create_image(
        &self,
        usage: vk::ImageUsageFlags,
        memory_location: MemoryLocation,
        format: vk::Format,
        width: u32,
        height: u32,
    ) -> Result<Image> {
        trace!("Creating {width}x{height} {format:?} image for {usage:?} in {memory_location:?}");

        let image_info = color_image_info(usage, format, width, height);
        let device = &self.device.inner;
        let inner = unsafe { device.create_image(&image_info, None)? };

        let requirements = unsafe { device.get_image_memory_requirements(inner) };
        let allocation = self.allocator.lock().unwrap().allocate(&AllocationCreateDesc {
            name: "image",
            requirements,
            location: memory_location,
            linear: false,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        });
        let allocation = match allocation {
            Ok(allocation) => allocation,
            Err(err) => {
                unsafe { device.destroy_image(inner, None) };
                return Err(err.into());
            }
        };

        // From here on the drop of `image` cleans up both.
        let image = Image {
            device: self.device.clone(),
            inner,
            memory: ImageMemory::Owned {
                allocator: self.allocator.clone(),
                allocation,
            },
            format,
            extent: image_info.extent,
        };
        if let ImageMemory::Owned { allocation, .. } = &image.memory {
            unsafe { device.bind_image_memory(inner, allocation.memory(), allocation.offset())? };
        }

        Ok(image)
    }
}

impl Drop for Image {
    fn drop(&mut self) {
        let ImageMemory::Owned {
            allocator,
            allocation,
        } = mem::replace(&mut self.memory, ImageMemory::Swapchain)
        else {
            return;
        };

        unsafe { self.device.inner.destroy_image(self.inner, None) };
        if let Err(err) = allocator.lock().unwrap().free(allocation) {
            error!("Failed to free image memory: {err}");
        }
    }
}

impl Drop for ImageView {
    fn drop(&mut self) {
        unsafe { self.device.inner.destroy_image_view(self.inner, None) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_image_info_is_a_single_flat_layer() {
        let usage = vk::ImageUsageFlags::TRANSFER_SRC | vk::ImageUsageFlags::STORAGE;
        let info = color_image_info(usage, vk::Format::R8G8B8A8_UNORM, 640, 480);

        assert_eq!(info.image_type, vk::ImageType::TYPE_2D);
        assert_eq!(info.format, vk::Format::R8G8B8A8_UNORM);
        assert_eq!((info.extent.width, info.extent.height, info.extent.depth), (640, 480, 1));
        assert_eq!((info.mip_levels, info.array_layers), (1, 1));
        assert_eq!(info.usage, usage);
        assert_eq!(info.initial_layout, vk::ImageLayout::UNDEFINED);
        assert_eq!(info.tiling, vk::ImageTiling::OPTIMAL);
    }

    #[test]
    fn color_subresource_covers_one_level_and_layer() {
        assert_eq!(COLOR_SUBRESOURCE.aspect_mask, vk::ImageAspectFlags::COLOR);
        assert_eq!(COLOR_SUBRESOURCE.level_count, 1);
        assert_eq!(COLOR_SUBRESOURCE.layer_count, 1);
    }
}
