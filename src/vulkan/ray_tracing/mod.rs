mod acceleration_structure;
mod pipeline;
mod shader_binding_table;

pub use acceleration_structure::*;
pub use pipeline::*;
pub use shader_binding_table::*;

use ash::{
    khr::{
        acceleration_structure::Device as AshAccelerationStructure,
        ray_tracing_pipeline::Device as AshRayTracingPipeline,
    },
    vk,
};

use crate::vulkan::{device::Device, instance::Instance, physical_device::PhysicalDevice};

pub struct RayTracingContext {
    pub pipeline_properties: vk::PhysicalDeviceRayTracingPipelinePropertiesKHR<'static>,
    pub pipeline_fn: AshRayTracingPipeline,
    pub acceleration_structure_properties:
        vk::PhysicalDeviceAccelerationStructurePropertiesKHR<'static>,
    pub acceleration_structure_fn: AshAccelerationStructure,
}

impl RayTracingContext {
    pub(crate) fn new(instance: &Instance, physical_device: &PhysicalDevice, device: &Device) -> Self {
        let mut pipeline_properties = vk::PhysicalDeviceRayTracingPipelinePropertiesKHR::default();
        let mut acceleration_structure_properties =
            vk::PhysicalDeviceAccelerationStructurePropertiesKHR::default();
        {
            let mut properties = vk::PhysicalDeviceProperties2::default()
                .push_next(&mut pipeline_properties)
                .push_next(&mut acceleration_structure_properties);
            unsafe {
                instance
                    .inner
                    .get_physical_device_properties2(physical_device.inner, &mut properties)
            };
        }
        pipeline_properties.p_next = std::ptr::null_mut();
        acceleration_structure_properties.p_next = std::ptr::null_mut();

        let pipeline_fn = AshRayTracingPipeline::new(&instance.inner, &device.inner);
        let acceleration_structure_fn = AshAccelerationStructure::new(&instance.inner, &device.inner);

        Self {
            pipeline_properties,
            pipeline_fn,
            acceleration_structure_properties,
            acceleration_structure_fn,
        }
    }
}
