use std::mem::size_of;

use anyhow::Context as _;
use ash::vk;
use bytemuck::Zeroable;
use glam::UVec2;
use gpu_allocator::MemoryLocation;
use log::{debug, info};

use crate::camera::Camera;
use crate::frame::Frame;
use crate::render_output::RenderOutputImage;
use crate::scene::{Scene, Uniform};
use crate::vulkan::{
    Buffer, CommandBuffer, Context, DescriptorPool, DescriptorSet, DescriptorSetLayout, Image,
    PipelineLayout, RayTracingPipeline, RayTracingPipelineCreateInfo, ShaderBindingTable,
    WriteDescriptorSet, WriteDescriptorSetKind,
};
use crate::{EngineConfig, OctaResult};

pub const TLAS_BINDING: u32 = 0;
pub const RENDER_OUTPUT_BINDING: u32 = 1;
pub const UNIFORM_BINDING: u32 = 2;
pub const SCENE_INFO_BINDING: u32 = 3;

const BINDING_TYPES: [(u32, vk::DescriptorType); 4] = [
    (TLAS_BINDING, vk::DescriptorType::ACCELERATION_STRUCTURE_KHR),
    (RENDER_OUTPUT_BINDING, vk::DescriptorType::STORAGE_IMAGE),
    (UNIFORM_BINDING, vk::DescriptorType::UNIFORM_BUFFER),
    (SCENE_INFO_BINDING, vk::DescriptorType::STORAGE_BUFFER),
];

pub(crate) fn descriptor_set_layout_bindings() -> Vec<vk::DescriptorSetLayoutBinding<'static>> {
    BINDING_TYPES
        .iter()
        .map(|&(binding, ty)| {
            vk::DescriptorSetLayoutBinding::default()
                .binding(binding)
                .descriptor_type(ty)
                .descriptor_count(1)
                .stage_flags(vk::ShaderStageFlags::ALL)
        })
        .collect()
}

/// One descriptor of every type per set.
pub(crate) fn descriptor_pool_sizes(set_count: u32) -> Vec<vk::DescriptorPoolSize> {
    BINDING_TYPES
        .iter()
        .map(|&(_, ty)| vk::DescriptorPoolSize {
            ty,
            descriptor_count: set_count,
        })
        .collect()
}

/// Ray tracing pipeline, its binding table and the per frame slot state it reads:
/// one descriptor set and one uniform buffer per slot.
pub struct Renderer {
    uniform_buffers: Vec<Buffer>,
    descriptor_sets: Vec<DescriptorSet>,
    _descriptor_pool: DescriptorPool,
    shader_binding_table: ShaderBindingTable,
    pipeline: RayTracingPipeline,
    pipeline_layout: PipelineLayout,
    _descriptor_layout: DescriptorSetLayout,
    pub render_output: RenderOutputImage,
    pub frame: u32,
    max_depth: u32,
}

impl Renderer {
    pub fn new(
        context: &Context,
        config: &EngineConfig,
        scene: &Scene,
        frames_in_flight: usize,
        size: UVec2,
    ) -> OctaResult<Self> {
        info!("Creating renderer for {frames_in_flight} frames in flight");

        let render_output = RenderOutputImage::new(context, size)?;

        let set_count = frames_in_flight as u32;
        let descriptor_layout = context.create_descriptor_set_layout(&descriptor_set_layout_bindings())?;
        let descriptor_pool = context.create_descriptor_pool(set_count, &descriptor_pool_sizes(set_count))?;
        let descriptor_sets = descriptor_pool.allocate_sets(&descriptor_layout, set_count)?;

        let pipeline_layout = context.create_pipeline_layout(&[&descriptor_layout], &[])?;

        let shader_source = std::fs::read(&config.shader_path)
            .with_context(|| format!("Failed to read shader {:?}", config.shader_path))?;
        let pipeline = context.create_ray_tracing_pipeline(
            &pipeline_layout,
            RayTracingPipelineCreateInfo {
                shader_source: &shader_source,
                raygen_entry_point: &config.raygen_entry_point,
                miss_entry_point: &config.miss_entry_point,
                closest_hit_entry_point: &config.closest_hit_entry_point,
                max_ray_recursion_depth: config.max_depth,
            },
        )?;

        let shader_binding_table = context.create_shader_binding_table(&pipeline)?;

        let uniform_buffers = (0..frames_in_flight)
            .map(|_| {
                let buffer = context.create_buffer(
                    vk::BufferUsageFlags::UNIFORM_BUFFER,
                    MemoryLocation::CpuToGpu,
                    size_of::<Uniform>() as _,
                )?;
                buffer.copy_data_to_buffer(&[Uniform::zeroed()])?;
                Ok(buffer)
            })
            .collect::<OctaResult<Vec<_>>>()?;

        let renderer = Self {
            uniform_buffers,
            descriptor_sets,
            _descriptor_pool: descriptor_pool,
            shader_binding_table,
            pipeline,
            pipeline_layout,
            _descriptor_layout: descriptor_layout,
            render_output,
            frame: 0,
            max_depth: config.max_depth,
        };
        renderer.write_descriptor_sets(scene)?;

        Ok(renderer)
    }

    /// Points every set at the current TLAS, render output and scene info.
    /// Sets must not be in use by a pending frame.
    pub fn write_descriptor_sets(&self, scene: &Scene) -> OctaResult<()> {
        let tlas = scene.tlas()?;
        let scene_info = scene.scene_info_buffer()?;

        for (set, uniform_buffer) in self.descriptor_sets.iter().zip(&self.uniform_buffers) {
            set.update(&[
                WriteDescriptorSet {
                    binding: TLAS_BINDING,
                    kind: WriteDescriptorSetKind::AccelerationStructure {
                        acceleration_structure: tlas,
                    },
                },
                WriteDescriptorSet {
                    binding: RENDER_OUTPUT_BINDING,
                    kind: WriteDescriptorSetKind::StorageImage {
                        view: self.render_output.view(),
                        layout: vk::ImageLayout::GENERAL,
                    },
                },
                WriteDescriptorSet {
                    binding: UNIFORM_BINDING,
                    kind: WriteDescriptorSetKind::UniformBuffer {
                        buffer: uniform_buffer,
                    },
                },
                WriteDescriptorSet {
                    binding: SCENE_INFO_BINDING,
                    kind: WriteDescriptorSetKind::StorageBuffer { buffer: scene_info },
                },
            ]);
        }

        Ok(())
    }

    pub fn rebuild_render_output(&mut self, context: &Context, size: UVec2, scene: &Scene) -> OctaResult<()> {
        self.render_output.rebuild(context, size)?;
        self.write_descriptor_sets(scene)
    }

    /// Writes the camera into the uniform buffer of `frame_index` and advances the frame counter.
    pub fn update_uniform(&mut self, frame_index: usize, camera: &Camera) -> OctaResult<()> {
        let uniform = camera.uniform(self.frame, self.max_depth);
        self.uniform_buffers[frame_index].copy_data_to_buffer(&[uniform])?;
        self.frame = self.frame.wrapping_add(1);

        Ok(())
    }

    pub fn record(&self, buffer: &CommandBuffer, frame: &Frame, swapchain_image: &Image) {
        let size = self.render_output.size;
        if !frame.copy_output {
            debug!("Skipping output copy of frame slot {}", frame.frame_index);
        }

        buffer.bind_rt_pipeline(&self.pipeline);
        buffer.bind_descriptor_sets(
            vk::PipelineBindPoint::RAY_TRACING_KHR,
            &self.pipeline_layout,
            0,
            &[&self.descriptor_sets[frame.frame_index]],
        );

        buffer.storage_image_write_barrier(self.render_output.image());
        buffer.trace_rays(&self.shader_binding_table, size.x, size.y);

        buffer.swapchain_image_copy_from_ray_tracing_storage_image(
            self.render_output.image(),
            swapchain_image,
            frame.copy_output,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_binds_all_four_resources_for_all_stages() {
        let bindings = descriptor_set_layout_bindings();

        let types = bindings.iter().map(|b| (b.binding, b.descriptor_type)).collect::<Vec<_>>();
        assert_eq!(
            types,
            vec![
                (0, vk::DescriptorType::ACCELERATION_STRUCTURE_KHR),
                (1, vk::DescriptorType::STORAGE_IMAGE),
                (2, vk::DescriptorType::UNIFORM_BUFFER),
                (3, vk::DescriptorType::STORAGE_BUFFER),
            ]
        );
        assert!(bindings.iter().all(|b| b.descriptor_count == 1));
        assert!(bindings.iter().all(|b| b.stage_flags == vk::ShaderStageFlags::ALL));
    }

    #[test]
    fn pool_holds_one_descriptor_of_each_type_per_set() {
        let sizes = descriptor_pool_sizes(3);

        assert_eq!(sizes.len(), 4);
        assert!(sizes.iter().all(|s| s.descriptor_count == 3));
    }
}
