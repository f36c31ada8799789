use std::fmt;
use std::sync::Arc;

use anyhow::Result;
use ash::vk;
use glam::{uvec2, UVec2};

use crate::vulkan::{Context, Device, Image, ImageAndView, Queue, Semaphore};

pub struct AcquiredImage {
    pub index: u32,
    pub is_suboptimal: bool,
}

pub struct Swapchain {
    device: Arc<Device>,
    inner: ash::khr::swapchain::Device,
    swapchain_khr: vk::SwapchainKHR,
    pub size: UVec2,
    pub format: vk::Format,
    pub color_space: vk::ColorSpaceKHR,
    pub present_mode: vk::PresentModeKHR,
    pub images_and_views: Vec<ImageAndView>,
}

/// Clamps the window size into the surface limits unless the surface dictates its extent.
pub(crate) fn choose_extent(capabilities: &vk::SurfaceCapabilitiesKHR, width: u32, height: u32) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        capabilities.current_extent
    } else {
        let min = capabilities.min_image_extent;
        let max = capabilities.max_image_extent;
        let width = width.min(max.width).max(min.width);
        let height = height.min(max.height).max(min.height);
        vk::Extent2D { width, height }
    }
}

/// One more than the minimum, bounded by the maximum if the surface has one.
pub(crate) fn choose_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let count = capabilities.min_image_count + 1;
    if capabilities.max_image_count > 0 {
        count.min(capabilities.max_image_count)
    } else {
        count
    }
}

impl Swapchain {
    pub fn new(context: &Context, width: u32, height: u32) -> Result<Self> {
        log::trace!("Creating vulkan swapchain");

        let inner = ash::khr::swapchain::Device::new(&context.instance.inner, &context.device.inner);
        let format = context.physical_device.surface_format;

        let mut swapchain = Self {
            device: context.device.clone(),
            inner,
            swapchain_khr: vk::SwapchainKHR::null(),
            size: UVec2::ZERO,
            format: format.format,
            color_space: format.color_space,
            present_mode: context.physical_device.present_mode,
            images_and_views: vec![],
        };
        swapchain.create(context, width, height)?;

        Ok(swapchain)
    }

    pub fn resize(&mut self, context: &Context, width: u32, height: u32) -> Result<()> {
        log::debug!("Resizing vulkan swapchain to {width}x{height}");

        self.destroy();
        self.create(context, width, height)
    }

    fn create(&mut self, context: &Context, width: u32, height: u32) -> Result<()> {
        let capabilities = unsafe {
            context
                .surface
                .inner
                .get_physical_device_surface_capabilities(
                    context.physical_device.inner,
                    context.surface.surface_khr,
                )?
        };

        // Swapchain extent
        let extent = choose_extent(&capabilities, width, height);
        log::info!("Swapchain size: {}x{}", extent.width, extent.height);

        // Swapchain image count
        let image_count = choose_image_count(&capabilities);
        log::info!("Swapchain image count: {image_count:?}");

        // Swapchain
        let families_indices = [
            context.physical_device.graphics_queue_family.index,
            context.physical_device.present_queue_family.index,
        ];

        let create_info = {
            let mut builder = vk::SwapchainCreateInfoKHR::default()
                .surface(context.surface.surface_khr)
                .min_image_count(image_count)
                .image_format(self.format)
                .image_color_space(self.color_space)
                .image_extent(extent)
                .image_array_layers(1)
                .image_usage(
                    vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST,
                );

            builder = if families_indices[0] != families_indices[1] {
                builder
                    .image_sharing_mode(vk::SharingMode::CONCURRENT)
                    .queue_family_indices(&families_indices)
            } else {
                builder.image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            };

            builder
                .pre_transform(capabilities.current_transform)
                .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
                .present_mode(self.present_mode)
                .clipped(true)
        };

        let swapchain_khr = unsafe { self.inner.create_swapchain(&create_info, None)? };

        // Swapchain images and image views
        let images = unsafe { self.inner.get_swapchain_images(swapchain_khr)? };
        let images_and_views = images
            .into_iter()
            .map(|i| {
                let image = Image::from_swapchain_image(
                    self.device.clone(),
                    i,
                    self.format,
                    extent,
                );
                let view = image.create_image_view()?;
                Ok(ImageAndView { view, image })
            })
            .collect::<Result<Vec<_>>>()?;

        self.swapchain_khr = swapchain_khr;
        self.size = uvec2(extent.width, extent.height);
        self.images_and_views = images_and_views;

        Ok(())
    }

    /// Fails with `ERROR_OUT_OF_DATE_KHR` when the surface changed.
    pub fn acquire_next_image(&self, timeout: u64, semaphore: &Semaphore) -> Result<AcquiredImage> {
        let (index, is_suboptimal) = unsafe {
            self.inner.acquire_next_image(
                self.swapchain_khr,
                timeout,
                semaphore.inner,
                vk::Fence::null(),
            )?
        };

        Ok(AcquiredImage {
            index,
            is_suboptimal,
        })
    }

    /// Returns true if the swapchain is suboptimal for the surface.
    pub fn queue_present(
        &self,
        image_index: u32,
        wait_semaphores: &[&Semaphore],
        queue: &Queue,
    ) -> Result<bool> {
        let swapchains = [self.swapchain_khr];
        let images_indices = [image_index];
        let wait_semaphores = wait_semaphores.iter().map(|s| s.inner).collect::<Vec<_>>();

        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&images_indices);

        let result = unsafe { self.inner.queue_present(queue.inner, &present_info)? };

        Ok(result)
    }

    fn destroy(&mut self) {
        self.images_and_views.clear();
        if self.swapchain_khr != vk::SwapchainKHR::null() {
            unsafe { self.inner.destroy_swapchain(self.swapchain_khr, None) };
            self.swapchain_khr = vk::SwapchainKHR::null();
        }
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        self.destroy();
    }
}

impl fmt::Debug for Swapchain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Swapchain")
            .field("device", &self.device)
            .field("swapchain_khr", &self.swapchain_khr)
            .field("size", &self.size)
            .field("format", &self.format)
            .field("color_space", &self.color_space)
            .field("present_mode", &self.present_mode)
            .field("images_and_views", &self.images_and_views)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn capabilities(current: (u32, u32), min_count: u32, max_count: u32) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: min_count,
            max_image_count: max_count,
            current_extent: vk::Extent2D {
                width: current.0,
                height: current.1,
            },
            min_image_extent: vk::Extent2D {
                width: 1,
                height: 1,
            },
            max_image_extent: vk::Extent2D {
                width: 4096,
                height: 4096,
            },
            ..Default::default()
        }
    }

    #[test]
    fn surface_extent_wins_when_defined() {
        let extent = choose_extent(&capabilities((800, 600), 2, 0), 1920, 1080);
        assert_eq!((extent.width, extent.height), (800, 600));
    }

    #[test]
    fn window_size_is_clamped_when_surface_is_undefined() {
        let caps = capabilities((u32::MAX, u32::MAX), 2, 0);
        let extent = choose_extent(&caps, 8000, 0);
        assert_eq!((extent.width, extent.height), (4096, 1));
    }

    #[test]
    fn image_count_respects_maximum() {
        assert_eq!(choose_image_count(&capabilities((1, 1), 2, 0)), 3);
        assert_eq!(choose_image_count(&capabilities((1, 1), 2, 2)), 2);
    }
}
