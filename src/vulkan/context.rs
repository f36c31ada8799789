use std::ops::Deref;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use ash::vk;
use gpu_allocator::{
    vulkan::{Allocator, AllocatorCreateDesc},
    AllocatorDebugSettings,
};
use log::{debug, info};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

use crate::vulkan::entry::Entry;
use crate::vulkan::instance::Instance;
use crate::vulkan::physical_device::{PhysicalDevice, REQUIRED_EXTENSIONS};
use crate::vulkan::surface::Surface;
use crate::vulkan::{CommandBuffer, CommandPool, Device, Queue, RayTracingContext};
use crate::EngineConfig;

pub const DEBUG_GPU_ALLOCATOR: bool = false;

pub struct Context {
    pub allocator: Arc<Mutex<Allocator>>,
    pub command_pool: CommandPool,
    pub ray_tracing: Arc<RayTracingContext>,
    pub graphics_queue: Queue,
    pub present_queue: Queue,
    pub device: Arc<Device>,
    pub physical_device: PhysicalDevice,
    pub surface: Surface,
    pub instance: Instance,
    _entry: Entry,
}

impl Context {
    pub fn new(
        window_handle: &dyn HasWindowHandle,
        display_handle: &dyn HasDisplayHandle,
        engine_config: &EngineConfig,
    ) -> Result<Self> {
        // Vulkan instance
        let entry = Entry::new()?;
        let instance = Instance::new(&entry, display_handle, engine_config)?;

        // Vulkan surface
        let surface = Surface::new(&entry, &instance, window_handle, display_handle)?;

        // Physical Device
        let physical_device = PhysicalDevice::select(&instance, &surface)?;
        info!(
            "Selected physical device: {} ({:?})",
            physical_device.name, physical_device.device_type
        );

        let mut required_extensions = REQUIRED_EXTENSIONS
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>();

        // For Mac Support
        if cfg!(target_os = "macos") {
            required_extensions.push("VK_KHR_portability_subset".to_owned())
        }

        let device = Arc::new(Device::new(
            &instance,
            &physical_device,
            &required_extensions,
        )?);

        let graphics_queue = device.get_queue(physical_device.graphics_queue_family, 0);
        let present_queue = device.get_queue(physical_device.present_queue_family, 0);

        let ray_tracing = Arc::new(RayTracingContext::new(&instance, &physical_device, &device));
        debug!(
            "Ray tracing pipeline properties {:#?}",
            ray_tracing.pipeline_properties
        );
        debug!(
            "Acceleration structure properties {:#?}",
            ray_tracing.acceleration_structure_properties
        );

        let command_pool = CommandPool::new(
            device.clone(),
            ray_tracing.clone(),
            physical_device.graphics_queue_family,
            Some(vk::CommandPoolCreateFlags::TRANSIENT),
        )?;

        // Gpu allocator
        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.inner.clone(),
            device: device.inner.clone(),
            physical_device: physical_device.inner,
            debug_settings: AllocatorDebugSettings {
                log_allocations: DEBUG_GPU_ALLOCATOR,
                log_frees: DEBUG_GPU_ALLOCATOR,
                log_memory_information: DEBUG_GPU_ALLOCATOR,
                log_leaks_on_shutdown: true,
                store_stack_traces: false,
                log_stack_traces: false,
            },
            buffer_device_address: true,
            allocation_sizes: Default::default(),
        })?;

        Ok(Self {
            allocator: Arc::new(Mutex::new(allocator)),
            command_pool,
            ray_tracing,
            present_queue,
            graphics_queue,
            device,
            physical_device,
            surface,
            instance,
            _entry: entry,
        })
    }
}

impl Context {
    pub fn device_wait_idle(&self) -> Result<()> {
        unsafe { self.device.inner.device_wait_idle()? };

        Ok(())
    }

    /// Records `executor` into a fresh command buffer, submits it and blocks
    /// until the device is done with it. The command buffer is freed on every
    /// exit path.
    pub fn execute_one_time_commands<R, F: FnOnce(&CommandBuffer) -> R>(
        &self,
        executor: F,
    ) -> Result<R> {
        let command_buffer = ReleaseOnDrop::new(
            self.command_pool
                .allocate_command_buffer(vk::CommandBufferLevel::PRIMARY)?,
            |buffer: &CommandBuffer| self.command_pool.free_command_buffer(buffer),
        );

        command_buffer.begin(Some(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT))?;
        let executor_result = executor(&command_buffer);
        command_buffer.end()?;

        let fence = self.create_fence(None)?;
        self.graphics_queue.submit(&command_buffer, &[], &[], &fence)?;
        fence.wait(None)?;

        Ok(executor_result)
    }
}

/// Hands `value` to `release` when dropped.
struct ReleaseOnDrop<T, F: FnMut(&T)> {
    value: T,
    release: F,
}

impl<T, F: FnMut(&T)> ReleaseOnDrop<T, F> {
    fn new(value: T, release: F) -> Self {
        Self { value, release }
    }
}

impl<T, F: FnMut(&T)> Deref for ReleaseOnDrop<T, F> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

impl<T, F: FnMut(&T)> Drop for ReleaseOnDrop<T, F> {
    fn drop(&mut self) {
        (self.release)(&self.value);
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use anyhow::bail;

    use super::*;

    fn record(released: &RefCell<Vec<u32>>, fail: bool) -> Result<u32> {
        let buffer = ReleaseOnDrop::new(7, |id: &u32| released.borrow_mut().push(*id));
        if fail {
            bail!("submit failed");
        }
        Ok(*buffer + 1)
    }

    #[test]
    fn released_after_success() {
        let released = RefCell::new(vec![]);

        assert_eq!(record(&released, false).unwrap(), 8);
        assert_eq!(*released.borrow(), vec![7]);
    }

    #[test]
    fn released_when_a_step_fails() {
        let released = RefCell::new(vec![]);

        assert!(record(&released, true).is_err());
        assert_eq!(*released.borrow(), vec![7]);
    }
}
