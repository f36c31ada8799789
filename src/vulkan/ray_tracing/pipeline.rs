use std::ffi::CString;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use ash::vk;
use log::debug;

use crate::vulkan::{Context, Device, PipelineLayout, ShaderModule};

pub const RAYGEN_GROUP: u32 = 0;
pub const MISS_GROUP: u32 = 1;
pub const HIT_GROUP: u32 = 2;

/// One SPIR-V module holding all three ray tracing entry points.
pub struct RayTracingPipelineCreateInfo<'a> {
    pub shader_source: &'a [u8],
    pub raygen_entry_point: &'a str,
    pub miss_entry_point: &'a str,
    pub closest_hit_entry_point: &'a str,
    pub max_ray_recursion_depth: u32,
}

pub struct RayTracingPipeline {
    device: Arc<Device>,
    pub(crate) inner: vk::Pipeline,
    pub shader_group_count: u32,
}

/// Shader groups in the order the binding table regions are laid out:
/// raygen, miss, then a triangle hit group with only a closest hit shader.
/// Stage `i` of the pipeline is the shader at group index `i`.
pub fn shader_groups() -> [vk::RayTracingShaderGroupCreateInfoKHR<'static>; 3] {
    let general = |shader| {
        vk::RayTracingShaderGroupCreateInfoKHR::default()
            .ty(vk::RayTracingShaderGroupTypeKHR::GENERAL)
            .general_shader(shader)
            .closest_hit_shader(vk::SHADER_UNUSED_KHR)
            .any_hit_shader(vk::SHADER_UNUSED_KHR)
            .intersection_shader(vk::SHADER_UNUSED_KHR)
    };

    [
        general(RAYGEN_GROUP),
        general(MISS_GROUP),
        vk::RayTracingShaderGroupCreateInfoKHR::default()
            .ty(vk::RayTracingShaderGroupTypeKHR::TRIANGLES_HIT_GROUP)
            .general_shader(vk::SHADER_UNUSED_KHR)
            .closest_hit_shader(HIT_GROUP)
            .any_hit_shader(vk::SHADER_UNUSED_KHR)
            .intersection_shader(vk::SHADER_UNUSED_KHR),
    ]
}

impl RayTracingPipeline {
    pub(crate) fn new(
        context: &Context,
        layout: &PipelineLayout,
        create_info: RayTracingPipelineCreateInfo,
    ) -> Result<Self> {
        let module = ShaderModule::from_bytes(context.device.clone(), create_info.shader_source)?;

        let raygen_name = CString::new(create_info.raygen_entry_point)?;
        let miss_name = CString::new(create_info.miss_entry_point)?;
        let closest_hit_name = CString::new(create_info.closest_hit_entry_point)?;

        let stages = [
            module.stage_info(vk::ShaderStageFlags::RAYGEN_KHR, &raygen_name),
            module.stage_info(vk::ShaderStageFlags::MISS_KHR, &miss_name),
            module.stage_info(vk::ShaderStageFlags::CLOSEST_HIT_KHR, &closest_hit_name),
        ];
        let groups = shader_groups();

        let device_max_depth = context
            .ray_tracing
            .pipeline_properties
            .max_ray_recursion_depth;
        let max_ray_recursion_depth = create_info.max_ray_recursion_depth.min(device_max_depth);
        debug!("Ray tracing pipeline recursion depth {max_ray_recursion_depth} (device max {device_max_depth})");

        let pipe_info = vk::RayTracingPipelineCreateInfoKHR::default()
            .layout(layout.inner)
            .stages(&stages)
            .groups(&groups)
            .max_pipeline_ray_recursion_depth(max_ray_recursion_depth);

        let pipelines = unsafe {
            context
                .ray_tracing
                .pipeline_fn
                .create_ray_tracing_pipelines(
                    vk::DeferredOperationKHR::null(),
                    vk::PipelineCache::null(),
                    std::slice::from_ref(&pipe_info),
                    None,
                )
                .map_err(|(_, e)| e)?
        };
        let inner = pipelines
            .into_iter()
            .next()
            .context("No ray tracing pipeline created")?;

        Ok(Self {
            device: context.device.clone(),
            inner,
            shader_group_count: groups.len() as u32,
        })
    }
}

impl Context {
    pub fn create_ray_tracing_pipeline(
        &self,
        layout: &PipelineLayout,
        create_info: RayTracingPipelineCreateInfo,
    ) -> Result<RayTracingPipeline> {
        RayTracingPipeline::new(self, layout, create_info)
    }
}

impl Drop for RayTracingPipeline {
    fn drop(&mut self) {
        unsafe { self.device.inner.destroy_pipeline(self.inner, None) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn groups_follow_binding_table_order() {
        let groups = shader_groups();

        assert_eq!(groups[0].ty, vk::RayTracingShaderGroupTypeKHR::GENERAL);
        assert_eq!(groups[0].general_shader, RAYGEN_GROUP);
        assert_eq!(groups[1].ty, vk::RayTracingShaderGroupTypeKHR::GENERAL);
        assert_eq!(groups[1].general_shader, MISS_GROUP);
        assert_eq!(groups[2].ty, vk::RayTracingShaderGroupTypeKHR::TRIANGLES_HIT_GROUP);
        assert_eq!(groups[2].closest_hit_shader, HIT_GROUP);
    }

    #[test]
    fn hit_group_has_only_closest_hit() {
        let hit = shader_groups()[2];

        assert_eq!(hit.general_shader, vk::SHADER_UNUSED_KHR);
        assert_eq!(hit.any_hit_shader, vk::SHADER_UNUSED_KHR);
        assert_eq!(hit.intersection_shader, vk::SHADER_UNUSED_KHR);
    }
}
