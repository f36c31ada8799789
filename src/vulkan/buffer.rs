use std::mem::size_of_val;
use std::sync::{Arc, Mutex};

use anyhow::{ensure, Context as _, Result};
use ash::vk;
use gpu_allocator::{
    vulkan::{Allocation, AllocationCreateDesc, AllocationScheme, Allocator},
    MemoryLocation,
};
use log::trace;

use crate::vulkan::{Context, Device};

#[derive(Debug)]
pub struct Buffer {
    device: Arc<Device>,
    allocator: Arc<Mutex<Allocator>>,
    pub(crate) inner: vk::Buffer,
    allocation: Option<Allocation>,
    pub size: vk::DeviceSize,
    pub usage: vk::BufferUsageFlags,
    address: vk::DeviceAddress,
}

impl Buffer {
    /// `alignment` raises the memory alignment of the allocation. Buffers used as
    /// scratch, instance input or shader binding table need a device address aligned
    /// to a driver reported value which can be stricter than the buffer requirements.
    pub(crate) fn new(
        device: Arc<Device>,
        allocator: Arc<Mutex<Allocator>>,
        usage: vk::BufferUsageFlags,
        memory_location: MemoryLocation,
        size: vk::DeviceSize,
        alignment: Option<vk::DeviceSize>,
    ) -> Result<Self> {
        trace!("Creating buffer of size {size} with usage flags {usage:?} at memory location {memory_location:?}");
        ensure!(size > 0, "Can't create a buffer of size 0");

        let create_info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let inner = unsafe { device.inner.create_buffer(&create_info, None)? };

        let mut requirements = unsafe { device.inner.get_buffer_memory_requirements(inner) };
        if let Some(alignment) = alignment {
            requirements.alignment = requirements.alignment.max(alignment);
        }

        let allocation = allocator.lock().unwrap().allocate(&AllocationCreateDesc {
            name: "buffer",
            requirements,
            location: memory_location,
            linear: true,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        })?;

        unsafe {
            device
                .inner
                .bind_buffer_memory(inner, allocation.memory(), allocation.offset())?
        };

        let address = if usage.contains(vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS) {
            let address_info = vk::BufferDeviceAddressInfo::default().buffer(inner);
            unsafe { device.inner.get_buffer_device_address(&address_info) }
        } else {
            0
        };

        if let Some(alignment) = alignment {
            ensure!(
                address % alignment == 0,
                "Buffer device address {address:#x} is not aligned to {alignment}"
            );
        }

        Ok(Self {
            device,
            allocator,
            inner,
            allocation: Some(allocation),
            size,
            usage,
            address,
        })
    }

    pub fn copy_data_to_buffer<T: Copy>(&self, data: &[T]) -> Result<()> {
        self.copy_data_to_buffer_complex(data, 0)
    }

    /// Writes `data` at `offset` bytes into a host visible buffer.
    pub fn copy_data_to_buffer_complex<T: Copy>(&self, data: &[T], offset: usize) -> Result<()> {
        let size = size_of_val(data);
        ensure!(
            (offset + size) as vk::DeviceSize <= self.size,
            "Writing {size} bytes at offset {offset} overflows buffer of size {}",
            self.size
        );

        let data_ptr = self
            .allocation
            .as_ref()
            .and_then(|a| a.mapped_ptr())
            .context("Buffer is not host visible")?
            .as_ptr() as *mut u8;

        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr() as *const u8, data_ptr.add(offset), size);
        }

        Ok(())
    }

    pub fn get_device_address(&self) -> vk::DeviceAddress {
        debug_assert!(
            self.usage.contains(vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS),
            "Buffer was created without SHADER_DEVICE_ADDRESS usage"
        );
        self.address
    }
}

impl Context {
    pub fn create_buffer(
        &self,
        usage: vk::BufferUsageFlags,
        memory_location: MemoryLocation,
        size: vk::DeviceSize,
    ) -> Result<Buffer> {
        Buffer::new(
            self.device.clone(),
            self.allocator.clone(),
            usage,
            memory_location,
            size,
            None,
        )
    }

    pub fn create_aligned_buffer(
        &self,
        usage: vk::BufferUsageFlags,
        memory_location: MemoryLocation,
        size: vk::DeviceSize,
        alignment: vk::DeviceSize,
    ) -> Result<Buffer> {
        Buffer::new(
            self.device.clone(),
            self.allocator.clone(),
            usage,
            memory_location,
            size,
            Some(alignment),
        )
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        unsafe { self.device.inner.destroy_buffer(self.inner, None) };
        if let Some(allocation) = self.allocation.take() {
            if let Err(err) = self.allocator.lock().unwrap().free(allocation) {
                log::error!("Failed to free buffer memory: {err}");
            }
        }
    }
}
