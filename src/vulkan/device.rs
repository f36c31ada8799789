use std::{ffi::CString, fmt, sync::Arc};

use anyhow::Result;
use ash::{vk, Device as AshDevice};
use crate::vulkan::instance::Instance;
use crate::vulkan::physical_device::PhysicalDevice;
use crate::vulkan::queue::{Queue, QueueFamily};

pub struct Device {
    pub inner: AshDevice,
}

impl Device {
    pub(crate) fn new(
        instance: &Instance,
        physical_device: &PhysicalDevice,
        extensions: &[String],
    ) -> Result<Self> {
        let queue_priorities = [1.0f32];

        let queue_families = [physical_device.graphics_queue_family, physical_device.present_queue_family];
        let queue_create_infos = {
            let mut indices = queue_families.iter().map(|f| f.index).collect::<Vec<_>>();
            indices.dedup();

            indices
                .iter()
                .map(|index| {
                    vk::DeviceQueueCreateInfo::default()
                        .queue_family_index(*index)
                        .queue_priorities(&queue_priorities)
                })
                .collect::<Vec<_>>()
        };

        let device_extensions = extensions
            .iter()
            .map(|e| CString::new(e.to_owned()))
            .collect::<Result<Vec<_>, _>>()?;

        let device_extensions_ptrs = device_extensions
            .iter()
            .map(|e| e.as_ptr())
            .collect::<Vec<_>>();

        // Everything the ray tracing path needs, the selection already checked support.
        let features = vk::PhysicalDeviceFeatures::default()
            .shader_int64(true);
        let mut features12 = vk::PhysicalDeviceVulkan12Features::default()
            .buffer_device_address(true)
            .scalar_block_layout(true);
        let mut features13 = vk::PhysicalDeviceVulkan13Features::default()
            .synchronization2(true);
        let mut ray_tracing_features = vk::PhysicalDeviceRayTracingPipelineFeaturesKHR::default()
            .ray_tracing_pipeline(true);
        let mut acceleration_structure_features = vk::PhysicalDeviceAccelerationStructureFeaturesKHR::default()
            .acceleration_structure(true);

        let mut vulkan_features = vk::PhysicalDeviceFeatures2::default()
            .features(features)
            .push_next(&mut features12)
            .push_next(&mut features13)
            .push_next(&mut ray_tracing_features)
            .push_next(&mut acceleration_structure_features);

        let device_create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&device_extensions_ptrs)
            .push_next(&mut vulkan_features);

        let inner = unsafe {
            instance
                .inner
                .create_device(physical_device.inner, &device_create_info, None)?
        };

        Ok(Self {
            inner
        })
    }

    pub fn get_queue(
        self: &Arc<Self>,
        queue_family: QueueFamily,
        queue_index: u32,
    ) -> Queue {
        let inner = unsafe { self.inner.get_device_queue(queue_family.index, queue_index) };

        Queue::new(inner, self.clone())
    }
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("handle", &self.inner.handle())
            .finish()
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        unsafe {
            self.inner.destroy_device(None);
        }
    }
}
