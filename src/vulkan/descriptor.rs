use std::sync::Arc;

use anyhow::Result;
use ash::vk;
use log::trace;

use crate::vulkan::{AccelerationStructure, Buffer, Context, Device, ImageView};

#[derive(Debug)]
pub struct DescriptorPool {
    device: Arc<Device>,
    pub(crate) inner: vk::DescriptorPool,
}

impl DescriptorPool {
    pub(crate) fn new(
        device: Arc<Device>,
        max_sets: u32,
        pool_sizes: &[vk::DescriptorPoolSize],
        flags: vk::DescriptorPoolCreateFlags,
    ) -> Result<Self> {
        trace!("Creating descriptor pool for {max_sets} sets with {pool_sizes:?}");

        let pool_info = vk::DescriptorPoolCreateInfo::default()
            .max_sets(max_sets)
            .pool_sizes(pool_sizes)
            .flags(flags);
        let inner = unsafe { device.inner.create_descriptor_pool(&pool_info, None)? };

        Ok(Self { device, inner })
    }

    pub fn allocate_sets(&self, layout: &DescriptorSetLayout, count: u32) -> Result<Vec<DescriptorSet>> {
        let layouts = (0..count).map(|_| layout.inner).collect::<Vec<_>>();
        let sets_alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(self.inner)
            .set_layouts(&layouts);
        let sets = unsafe { self.device.inner.allocate_descriptor_sets(&sets_alloc_info)? };

        let sets = sets
            .into_iter()
            .map(|inner| DescriptorSet {
                device: self.device.clone(),
                inner,
            })
            .collect::<Vec<_>>();

        Ok(sets)
    }
}

impl Drop for DescriptorPool {
    fn drop(&mut self) {
        unsafe { self.device.inner.destroy_descriptor_pool(self.inner, None) };
    }
}

#[derive(Debug)]
pub struct DescriptorSetLayout {
    device: Arc<Device>,
    pub(crate) inner: vk::DescriptorSetLayout,
}

impl DescriptorSetLayout {
    pub(crate) fn new(
        device: Arc<Device>,
        bindings: &[vk::DescriptorSetLayoutBinding],
        flags: vk::DescriptorSetLayoutCreateFlags,
    ) -> Result<Self> {
        let dsl_info = vk::DescriptorSetLayoutCreateInfo::default()
            .bindings(bindings)
            .flags(flags);
        let inner = unsafe { device.inner.create_descriptor_set_layout(&dsl_info, None)? };

        Ok(Self { device, inner })
    }
}

impl Drop for DescriptorSetLayout {
    fn drop(&mut self) {
        unsafe {
            self.device
                .inner
                .destroy_descriptor_set_layout(self.inner, None);
        }
    }
}

/// Freed together with its pool.
#[derive(Debug)]
pub struct DescriptorSet {
    device: Arc<Device>,
    pub(crate) inner: vk::DescriptorSet,
}

pub struct WriteDescriptorSet<'a> {
    pub binding: u32,
    pub kind: WriteDescriptorSetKind<'a>,
}

pub enum WriteDescriptorSetKind<'a> {
    StorageImage {
        view: &'a ImageView,
        layout: vk::ImageLayout,
    },
    UniformBuffer {
        buffer: &'a Buffer,
    },
    StorageBuffer {
        buffer: &'a Buffer,
    },
    AccelerationStructure {
        acceleration_structure: &'a AccelerationStructure,
    },
}

impl WriteDescriptorSetKind<'_> {
    pub fn descriptor_type(&self) -> vk::DescriptorType {
        match self {
            WriteDescriptorSetKind::StorageImage { .. } => vk::DescriptorType::STORAGE_IMAGE,
            WriteDescriptorSetKind::UniformBuffer { .. } => vk::DescriptorType::UNIFORM_BUFFER,
            WriteDescriptorSetKind::StorageBuffer { .. } => vk::DescriptorType::STORAGE_BUFFER,
            WriteDescriptorSetKind::AccelerationStructure { .. } => {
                vk::DescriptorType::ACCELERATION_STRUCTURE_KHR
            }
        }
    }
}

impl DescriptorSet {
    pub fn update(&self, writes: &[WriteDescriptorSet]) {
        use WriteDescriptorSetKind::*;

        for write in writes {
            let wds = vk::WriteDescriptorSet::default()
                .dst_set(self.inner)
                .dst_binding(write.binding)
                .descriptor_type(write.kind.descriptor_type());

            match write.kind {
                StorageImage { view, layout } => {
                    let img_info = vk::DescriptorImageInfo::default()
                        .image_view(view.inner)
                        .image_layout(layout);
                    let wds = wds.image_info(std::slice::from_ref(&img_info));

                    unsafe { self.device.inner.update_descriptor_sets(&[wds], &[]) };
                }
                UniformBuffer { buffer } | StorageBuffer { buffer } => {
                    let buffer_info = vk::DescriptorBufferInfo::default()
                        .buffer(buffer.inner)
                        .range(vk::WHOLE_SIZE);
                    let wds = wds.buffer_info(std::slice::from_ref(&buffer_info));

                    unsafe { self.device.inner.update_descriptor_sets(&[wds], &[]) };
                }
                AccelerationStructure {
                    acceleration_structure,
                } => {
                    let handles = [acceleration_structure.inner];
                    let mut write_set_as = vk::WriteDescriptorSetAccelerationStructureKHR::default()
                        .acceleration_structures(&handles);

                    let mut wds = wds.push_next(&mut write_set_as);
                    wds.descriptor_count = 1;

                    unsafe { self.device.inner.update_descriptor_sets(&[wds], &[]) };
                }
            }
        }
    }
}

impl Context {
    pub fn create_descriptor_pool(
        &self,
        max_sets: u32,
        pool_sizes: &[vk::DescriptorPoolSize],
    ) -> Result<DescriptorPool> {
        DescriptorPool::new(
            self.device.clone(),
            max_sets,
            pool_sizes,
            vk::DescriptorPoolCreateFlags::empty(),
        )
    }

    pub fn create_descriptor_set_layout(
        &self,
        bindings: &[vk::DescriptorSetLayoutBinding],
    ) -> Result<DescriptorSetLayout> {
        DescriptorSetLayout::new(
            self.device.clone(),
            bindings,
            vk::DescriptorSetLayoutCreateFlags::empty(),
        )
    }
}
