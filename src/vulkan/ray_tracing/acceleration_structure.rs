use std::mem::size_of;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use ash::vk;
use gpu_allocator::MemoryLocation;
use log::trace;

use crate::vulkan::{Buffer, Context, RayTracingContext};

/// Instance input of a top level build must start on a 16 byte boundary.
pub const INSTANCE_BUFFER_ALIGNMENT: vk::DeviceSize = 16;

pub fn align_up(value: u64, alignment: u64) -> u64 {
    debug_assert!(alignment.is_power_of_two());
    (value + (alignment - 1)) & !(alignment - 1)
}

/// What a single acceleration structure build reads from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeometryDescriptor {
    Triangles {
        vertex_address: vk::DeviceAddress,
        vertex_stride: vk::DeviceSize,
        vertex_format: vk::Format,
        max_vertex: u32,
        index_address: vk::DeviceAddress,
        index_type: vk::IndexType,
    },
    Instances {
        address: vk::DeviceAddress,
    },
}

impl GeometryDescriptor {
    pub fn level(&self) -> vk::AccelerationStructureTypeKHR {
        match self {
            GeometryDescriptor::Triangles { .. } => vk::AccelerationStructureTypeKHR::BOTTOM_LEVEL,
            GeometryDescriptor::Instances { .. } => vk::AccelerationStructureTypeKHR::TOP_LEVEL,
        }
    }

    pub fn flags(&self) -> vk::GeometryFlagsKHR {
        match self {
            GeometryDescriptor::Triangles { .. } => {
                vk::GeometryFlagsKHR::OPAQUE | vk::GeometryFlagsKHR::NO_DUPLICATE_ANY_HIT_INVOCATION
            }
            GeometryDescriptor::Instances { .. } => vk::GeometryFlagsKHR::empty(),
        }
    }

    pub fn to_vk(&self) -> vk::AccelerationStructureGeometryKHR<'static> {
        let (geometry_type, geometry) = match *self {
            GeometryDescriptor::Triangles {
                vertex_address,
                vertex_stride,
                vertex_format,
                max_vertex,
                index_address,
                index_type,
            } => {
                let triangles = vk::AccelerationStructureGeometryTrianglesDataKHR::default()
                    .vertex_format(vertex_format)
                    .vertex_data(vk::DeviceOrHostAddressConstKHR {
                        device_address: vertex_address,
                    })
                    .vertex_stride(vertex_stride)
                    .max_vertex(max_vertex)
                    .index_type(index_type)
                    .index_data(vk::DeviceOrHostAddressConstKHR {
                        device_address: index_address,
                    });

                (
                    vk::GeometryTypeKHR::TRIANGLES,
                    vk::AccelerationStructureGeometryDataKHR { triangles },
                )
            }
            GeometryDescriptor::Instances { address } => {
                let instances = vk::AccelerationStructureGeometryInstancesDataKHR::default()
                    .array_of_pointers(false)
                    .data(vk::DeviceOrHostAddressConstKHR {
                        device_address: address,
                    });

                (
                    vk::GeometryTypeKHR::INSTANCES,
                    vk::AccelerationStructureGeometryDataKHR { instances },
                )
            }
        };

        vk::AccelerationStructureGeometryKHR::default()
            .geometry_type(geometry_type)
            .geometry(geometry)
            .flags(self.flags())
    }
}

/// Everything a build command needs once storage and scratch memory exist.
#[derive(Clone, Copy)]
pub struct AccelerationStructureBuild {
    pub level: vk::AccelerationStructureTypeKHR,
    pub geometry: vk::AccelerationStructureGeometryKHR<'static>,
    pub range: vk::AccelerationStructureBuildRangeInfoKHR,
    pub destination: vk::AccelerationStructureKHR,
    pub scratch_address: vk::DeviceAddress,
}

impl AccelerationStructureBuild {
    pub fn build_info<'a>(
        &self,
        geometries: &'a [vk::AccelerationStructureGeometryKHR<'a>],
    ) -> vk::AccelerationStructureBuildGeometryInfoKHR<'a> {
        vk::AccelerationStructureBuildGeometryInfoKHR::default()
            .ty(self.level)
            .flags(vk::BuildAccelerationStructureFlagsKHR::PREFER_FAST_TRACE)
            .mode(vk::BuildAccelerationStructureModeKHR::BUILD)
            .geometries(geometries)
            .dst_acceleration_structure(self.destination)
            .scratch_data(vk::DeviceOrHostAddressKHR {
                device_address: self.scratch_address,
            })
    }
}

/// Handle, backing buffer and address of a built acceleration structure.
/// The handle is destroyed before the buffer it lives in.
pub struct AccelerationStructure {
    ray_tracing: Arc<RayTracingContext>,
    pub inner: vk::AccelerationStructureKHR,
    pub level: vk::AccelerationStructureTypeKHR,
    pub address: vk::DeviceAddress,
    _buffer: Buffer,
}

impl Drop for AccelerationStructure {
    fn drop(&mut self) {
        unsafe {
            self.ray_tracing
                .acceleration_structure_fn
                .destroy_acceleration_structure(self.inner, None)
        };
    }
}

/// Builds the instance records of a top level structure. The custom index of
/// every record is its position in `instances`.
pub fn instance_records(
    instances: &[(u32, vk::TransformMatrixKHR)],
    blas_addresses: &[vk::DeviceAddress],
) -> Result<Vec<vk::AccelerationStructureInstanceKHR>> {
    instances
        .iter()
        .enumerate()
        .map(|(i, (mesh_id, transform))| {
            let device_handle = *blas_addresses
                .get(*mesh_id as usize)
                .with_context(|| format!("Instance {i} references mesh {mesh_id} without a BLAS"))?;

            Ok(vk::AccelerationStructureInstanceKHR {
                transform: *transform,
                instance_custom_index_and_mask: vk::Packed24_8::new(i as u32, 0xFF),
                instance_shader_binding_table_record_offset_and_flags: vk::Packed24_8::new(
                    0,
                    vk::GeometryInstanceFlagsKHR::TRIANGLE_FACING_CULL_DISABLE.as_raw() as u8,
                ),
                acceleration_structure_reference: vk::AccelerationStructureReferenceKHR {
                    device_handle,
                },
            })
        })
        .collect()
}

impl Context {
    /// Sizes, allocates, creates and builds one acceleration structure and
    /// blocks until the build finished. The scratch buffer is released on return.
    pub fn build_acceleration_structure(
        &self,
        geometry: GeometryDescriptor,
        primitive_count: u32,
    ) -> Result<AccelerationStructure> {
        let level = geometry.level();
        trace!("Building {level:?} acceleration structure over {primitive_count} primitives");

        let vk_geometry = geometry.to_vk();
        let geometries = [vk_geometry];

        let sizing_build = AccelerationStructureBuild {
            level,
            geometry: vk_geometry,
            range: vk::AccelerationStructureBuildRangeInfoKHR::default(),
            destination: vk::AccelerationStructureKHR::null(),
            scratch_address: 0,
        };
        let build_info = sizing_build.build_info(&geometries);

        let mut build_sizes = vk::AccelerationStructureBuildSizesInfoKHR::default();
        unsafe {
            self.ray_tracing
                .acceleration_structure_fn
                .get_acceleration_structure_build_sizes(
                    vk::AccelerationStructureBuildTypeKHR::DEVICE,
                    &build_info,
                    &[primitive_count],
                    &mut build_sizes,
                )
        };

        let scratch_alignment = self
            .ray_tracing
            .acceleration_structure_properties
            .min_acceleration_structure_scratch_offset_alignment as vk::DeviceSize;
        let scratch_size = align_up(build_sizes.build_scratch_size.max(1), scratch_alignment);

        let scratch_buffer = self.create_aligned_buffer(
            vk::BufferUsageFlags::STORAGE_BUFFER | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS,
            MemoryLocation::GpuOnly,
            scratch_size,
            scratch_alignment,
        )?;

        let buffer = self.create_buffer(
            vk::BufferUsageFlags::ACCELERATION_STRUCTURE_STORAGE_KHR
                | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS,
            MemoryLocation::GpuOnly,
            build_sizes.acceleration_structure_size,
        )?;

        let create_info = vk::AccelerationStructureCreateInfoKHR::default()
            .buffer(buffer.inner)
            .size(build_sizes.acceleration_structure_size)
            .ty(level);
        let inner = unsafe {
            self.ray_tracing
                .acceleration_structure_fn
                .create_acceleration_structure(&create_info, None)?
        };

        let build = AccelerationStructureBuild {
            level,
            geometry: vk_geometry,
            range: vk::AccelerationStructureBuildRangeInfoKHR::default()
                .primitive_count(primitive_count)
                .primitive_offset(0)
                .first_vertex(0)
                .transform_offset(0),
            destination: inner,
            scratch_address: scratch_buffer.get_device_address(),
        };

        if let Err(err) = self.execute_one_time_commands(|cmd| {
            cmd.build_acceleration_structure(&build);
        }) {
            unsafe {
                self.ray_tracing
                    .acceleration_structure_fn
                    .destroy_acceleration_structure(inner, None)
            };
            return Err(err);
        }
        drop(scratch_buffer);

        let address_info =
            vk::AccelerationStructureDeviceAddressInfoKHR::default().acceleration_structure(inner);
        let address = unsafe {
            self.ray_tracing
                .acceleration_structure_fn
                .get_acceleration_structure_device_address(&address_info)
        };

        Ok(AccelerationStructure {
            ray_tracing: self.ray_tracing.clone(),
            inner,
            level,
            address,
            _buffer: buffer,
        })
    }

    /// Uploads `records` into a device local instance buffer and builds the
    /// top level structure over them. An empty slice still yields a valid,
    /// empty structure.
    pub fn build_top_level_acceleration_structure(
        &self,
        records: &[vk::AccelerationStructureInstanceKHR],
    ) -> Result<(AccelerationStructure, Buffer)> {
        let usage = vk::BufferUsageFlags::ACCELERATION_STRUCTURE_BUILD_INPUT_READ_ONLY_KHR
            | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS;

        let instance_buffer = if records.is_empty() {
            self.create_aligned_buffer(
                usage,
                MemoryLocation::GpuOnly,
                size_of::<vk::AccelerationStructureInstanceKHR>() as _,
                INSTANCE_BUFFER_ALIGNMENT,
            )?
        } else {
            self.create_gpu_only_buffer_from_data_complex(usage, records, INSTANCE_BUFFER_ALIGNMENT)?
        };

        let tlas = self.build_acceleration_structure(
            GeometryDescriptor::Instances {
                address: instance_buffer.get_device_address(),
            },
            records.len() as u32,
        )?;

        Ok((tlas, instance_buffer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> vk::TransformMatrixKHR {
        vk::TransformMatrixKHR {
            matrix: [1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0],
        }
    }

    #[test]
    fn align_up_rounds_to_next_multiple() {
        assert_eq!(align_up(0, 128), 0);
        assert_eq!(align_up(1, 128), 128);
        assert_eq!(align_up(128, 128), 128);
        assert_eq!(align_up(129, 256), 256);
    }

    #[test]
    fn triangle_geometry_is_opaque_bottom_level() {
        let geometry = GeometryDescriptor::Triangles {
            vertex_address: 0x1000,
            vertex_stride: 32,
            vertex_format: vk::Format::R32G32B32_SFLOAT,
            max_vertex: 3,
            index_address: 0x2000,
            index_type: vk::IndexType::UINT32,
        };

        assert_eq!(geometry.level(), vk::AccelerationStructureTypeKHR::BOTTOM_LEVEL);

        let vk_geometry = geometry.to_vk();
        assert_eq!(vk_geometry.geometry_type, vk::GeometryTypeKHR::TRIANGLES);
        assert!(vk_geometry.flags.contains(vk::GeometryFlagsKHR::OPAQUE));
        assert!(vk_geometry
            .flags
            .contains(vk::GeometryFlagsKHR::NO_DUPLICATE_ANY_HIT_INVOCATION));

        let triangles = unsafe { vk_geometry.geometry.triangles };
        assert_eq!(triangles.vertex_stride, 32);
        assert_eq!(triangles.max_vertex, 3);
        assert_eq!(unsafe { triangles.vertex_data.device_address }, 0x1000);
        assert_eq!(unsafe { triangles.index_data.device_address }, 0x2000);
    }

    #[test]
    fn instance_geometry_is_top_level() {
        let geometry = GeometryDescriptor::Instances { address: 0x40 };
        assert_eq!(geometry.level(), vk::AccelerationStructureTypeKHR::TOP_LEVEL);

        let vk_geometry = geometry.to_vk();
        assert_eq!(vk_geometry.geometry_type, vk::GeometryTypeKHR::INSTANCES);
        let instances = unsafe { vk_geometry.geometry.instances };
        assert_eq!(instances.array_of_pointers, vk::FALSE);
        assert_eq!(unsafe { instances.data.device_address }, 0x40);
    }

    #[test]
    fn instance_records_reference_blas_of_their_mesh() {
        let blas_addresses = [0xA000, 0xB000];
        let instances = [(1, identity()), (0, identity()), (1, identity())];

        let records = instance_records(&instances, &blas_addresses).unwrap();
        assert_eq!(records.len(), 3);

        for (i, record) in records.iter().enumerate() {
            let expected = blas_addresses[instances[i].0 as usize];
            assert_eq!(unsafe { record.acceleration_structure_reference.device_handle }, expected);
            assert_eq!(record.instance_custom_index_and_mask.low_24(), i as u32);
            assert_eq!(record.instance_custom_index_and_mask.high_8(), 0xFF);
            assert_eq!(record.instance_shader_binding_table_record_offset_and_flags.low_24(), 0);
            assert_eq!(
                record.instance_shader_binding_table_record_offset_and_flags.high_8(),
                vk::GeometryInstanceFlagsKHR::TRIANGLE_FACING_CULL_DISABLE.as_raw() as u8
            );
            assert_eq!(record.transform.matrix, identity().matrix);
        }
    }

    #[test]
    fn instance_record_without_blas_is_an_error() {
        let result = instance_records(&[(2, identity())], &[0xA000]);
        assert!(result.is_err());
    }

    #[test]
    fn no_instances_yield_no_records() {
        let records = instance_records(&[], &[0xA000]).unwrap();
        assert!(records.is_empty());
    }

    #[test]
    fn instance_record_has_vulkan_size() {
        assert_eq!(size_of::<vk::AccelerationStructureInstanceKHR>(), 64);
    }
}
