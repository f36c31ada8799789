use std::mem::size_of;

use anyhow::{ensure, Result};
use ash::vk;
use log::trace;

use crate::scene::loader::MeshData;
use crate::scene::Vertex;
use crate::vulkan::{AccelerationStructure, Buffer, Context, GeometryDescriptor};

/// Device local vertex and index buffers of one mesh. Written once at load time.
pub struct GeometryBuffer {
    pub vertex_buffer: Buffer,
    pub index_buffer: Buffer,
    pub vertex_count: u32,
    pub index_count: u32,
}

impl GeometryBuffer {
    pub fn new(context: &Context, data: &MeshData) -> Result<Self> {
        ensure!(!data.vertices.is_empty(), "Mesh has no vertices");
        ensure!(!data.indices.is_empty(), "Mesh has no triangles");
        trace!(
            "Uploading geometry of {} vertices and {} indices",
            data.vertices.len(),
            data.indices.len()
        );

        let usage = vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS
            | vk::BufferUsageFlags::ACCELERATION_STRUCTURE_BUILD_INPUT_READ_ONLY_KHR
            | vk::BufferUsageFlags::STORAGE_BUFFER;

        let vertex_buffer = context.create_gpu_only_buffer_from_data(usage, &data.vertices)?;
        let index_buffer = context.create_gpu_only_buffer_from_data(usage, &data.indices)?;

        Ok(Self {
            vertex_buffer,
            index_buffer,
            vertex_count: data.vertices.len() as u32,
            index_count: data.indices.len() as u32,
        })
    }

    pub fn vertex_address(&self) -> vk::DeviceAddress {
        self.vertex_buffer.get_device_address()
    }

    pub fn index_address(&self) -> vk::DeviceAddress {
        self.index_buffer.get_device_address()
    }

    pub fn triangle_count(&self) -> u32 {
        self.index_count / 3
    }

    pub fn geometry_descriptor(&self) -> GeometryDescriptor {
        triangle_geometry(
            self.vertex_address(),
            self.index_address(),
            self.vertex_count,
        )
    }
}

pub(crate) fn triangle_geometry(
    vertex_address: vk::DeviceAddress,
    index_address: vk::DeviceAddress,
    vertex_count: u32,
) -> GeometryDescriptor {
    GeometryDescriptor::Triangles {
        vertex_address,
        vertex_stride: size_of::<Vertex>() as _,
        vertex_format: Vertex::FORMAT,
        max_vertex: vertex_count.saturating_sub(1),
        index_address,
        index_type: vk::IndexType::UINT32,
    }
}

/// A loaded mesh and the bottom level structure built over it.
pub struct Mesh {
    pub data: MeshData,
    pub geometry: GeometryBuffer,
    pub blas: AccelerationStructure,
}

impl Mesh {
    pub fn new(context: &Context, data: MeshData) -> Result<Self> {
        let geometry = GeometryBuffer::new(context, &data)?;
        let blas = context
            .build_acceleration_structure(geometry.geometry_descriptor(), geometry.triangle_count())?;
        ensure!(blas.address != 0, "BLAS has no device address");

        Ok(Self {
            data,
            geometry,
            blas,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn triangle_geometry_uses_vertex_layout() {
        let geometry = triangle_geometry(0x100, 0x200, 4);

        match geometry {
            GeometryDescriptor::Triangles {
                vertex_address,
                vertex_stride,
                vertex_format,
                max_vertex,
                index_address,
                index_type,
            } => {
                assert_eq!(vertex_address, 0x100);
                assert_eq!(index_address, 0x200);
                assert_eq!(vertex_stride, 32);
                assert_eq!(vertex_format, vk::Format::R32G32B32_SFLOAT);
                assert_eq!(max_vertex, 3);
                assert_eq!(index_type, vk::IndexType::UINT32);
            }
            GeometryDescriptor::Instances { .. } => panic!("expected triangles"),
        }
    }
}
