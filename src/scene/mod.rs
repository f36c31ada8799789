mod instance;
pub mod loader;
mod mesh;
mod records;
mod vertex;

pub use instance::*;
pub use mesh::*;
pub use records::*;
pub use vertex::*;

use std::mem::size_of;
use std::path::Path;

use anyhow::{ensure, Context as _, Result};
use ash::vk;
use bytemuck::Zeroable;
use glam::Vec3;
use log::{debug, info};

use crate::vulkan::{instance_records, AccelerationStructure, Buffer, Context};

use self::loader::{load_obj, MeshData};

/// Device side of a built scene. Replaced as a whole on rebuild.
struct SceneBuffers {
    tlas: AccelerationStructure,
    _instance_buffer: Buffer,
    _material_buffer: Buffer,
    _light_buffer: Buffer,
    _instance_info_buffer: Buffer,
    _sky_buffer: Buffer,
    scene_info_buffer: Buffer,
}

/// Meshes, their placements and the shading records. Instance changes only
/// mark the scene dirty; the top level structure is immutable until
/// [`Scene::rebuild_top_level`] runs.
pub struct Scene {
    buffers: Option<SceneBuffers>,
    meshes: Vec<Mesh>,
    instances: Vec<MeshInstance>,
    materials: Vec<Material>,
    lights: Vec<Light>,
    sky: SkyInfo,
    dirty: bool,
}

impl Default for Scene {
    fn default() -> Self {
        Self::new()
    }
}

impl Scene {
    pub fn new() -> Self {
        Self {
            buffers: None,
            meshes: vec![],
            instances: vec![],
            materials: vec![],
            lights: vec![],
            sky: SkyInfo::default(),
            dirty: true,
        }
    }

    /// Imports an OBJ file and builds its BLAS. Returns the mesh id.
    pub fn load_model<P: AsRef<Path>>(&mut self, context: &Context, path: P) -> Result<u32> {
        let data = load_obj(path)?;
        self.add_mesh(context, data)
    }

    pub fn add_mesh(&mut self, context: &Context, data: MeshData) -> Result<u32> {
        let mesh = Mesh::new(context, data)?;
        let id = self.meshes.len() as u32;
        debug!(
            "Mesh {id}: {} vertices, {} triangles",
            mesh.geometry.vertex_count,
            mesh.geometry.triangle_count()
        );

        self.meshes.push(mesh);
        Ok(id)
    }

    pub fn create_instance(
        &mut self,
        mesh_id: u32,
        material_id: u32,
        position: Vec3,
        rotation: Vec3,
        scale: Vec3,
    ) -> u32 {
        self.instances.push(MeshInstance::new(mesh_id, material_id, position, rotation, scale));
        self.dirty = true;

        (self.instances.len() - 1) as u32
    }

    /// Removes by swapping with the last instance, so that one takes over the id.
    pub fn destroy_instance(&mut self, instance_id: u32) -> Result<()> {
        ensure!(
            (instance_id as usize) < self.instances.len(),
            "Instance {instance_id} does not exist"
        );

        self.instances.swap_remove(instance_id as usize);
        self.dirty = true;
        Ok(())
    }

    /// Mesh and material ids are checked by the next build.
    fn instance_mut(&mut self, instance_id: u32) -> Result<&mut MeshInstance> {
        ensure!(
            (instance_id as usize) < self.instances.len(),
            "Instance {instance_id} does not exist"
        );

        self.dirty = true;
        Ok(&mut self.instances[instance_id as usize])
    }

    pub fn set_instance_position(&mut self, instance_id: u32, position: Vec3) -> Result<()> {
        self.instance_mut(instance_id)?.position = position;
        Ok(())
    }

    /// XYZ euler angles in radians.
    pub fn set_instance_rotation(&mut self, instance_id: u32, rotation: Vec3) -> Result<()> {
        self.instance_mut(instance_id)?.rotation = rotation;
        Ok(())
    }

    pub fn set_instance_scale(&mut self, instance_id: u32, scale: Vec3) -> Result<()> {
        self.instance_mut(instance_id)?.scale = scale;
        Ok(())
    }

    pub fn set_instance_mesh(&mut self, instance_id: u32, mesh_id: u32) -> Result<()> {
        self.instance_mut(instance_id)?.mesh_id = mesh_id;
        Ok(())
    }

    pub fn set_instance_material(&mut self, instance_id: u32, material_id: u32) -> Result<()> {
        self.instance_mut(instance_id)?.material_id = material_id;
        Ok(())
    }

    pub fn create_material(&mut self, color: Vec3, metallic: f32, roughness: f32) -> u32 {
        self.materials.push(Material::new(color, metallic, roughness));
        self.dirty = true;

        (self.materials.len() - 1) as u32
    }

    pub fn create_light(&mut self, position: Vec3, color: Vec3, intensity: f32) -> u32 {
        self.lights.push(Light::point(position, color, intensity));
        self.dirty = true;

        (self.lights.len() - 1) as u32
    }

    pub fn set_sky(&mut self, sky: SkyInfo) {
        self.sky = sky;
        self.dirty = true;
    }

    pub fn instances(&self) -> &[MeshInstance] {
        &self.instances
    }

    pub fn meshes(&self) -> &[Mesh] {
        &self.meshes
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn tlas(&self) -> Result<&AccelerationStructure> {
        Ok(&self.built()?.tlas)
    }

    pub fn scene_info_buffer(&self) -> Result<&Buffer> {
        Ok(&self.built()?.scene_info_buffer)
    }

    fn built(&self) -> Result<&SceneBuffers> {
        self.buffers.as_ref().context("Scene has not been built")
    }

    /// Uploads the shading records and builds the TLAS over all live instances.
    pub fn build(&mut self, context: &Context) -> Result<()> {
        insert_defaults(&mut self.materials, &mut self.lights);

        let material_count = self.materials.len() as u32;
        let mesh_count = self.meshes.len() as u32;
        for (i, instance) in self.instances.iter().enumerate() {
            ensure!(
                instance.mesh_id < mesh_count,
                "Instance {i} references unknown mesh {}",
                instance.mesh_id
            );
            ensure!(
                instance.material_id < material_count,
                "Instance {i} references unknown material {}",
                instance.material_id
            );
        }

        info!(
            "Building scene: {} meshes, {} instances, {} materials, {} lights",
            self.meshes.len(),
            self.instances.len(),
            self.materials.len(),
            self.lights.len()
        );

        // Release the previous structure before allocating its replacement.
        self.buffers = None;

        let records_usage =
            vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS | vk::BufferUsageFlags::STORAGE_BUFFER;

        let material_buffer = context.create_gpu_only_buffer_from_data(records_usage, &self.materials)?;
        let light_buffer = context.create_gpu_only_buffer_from_data(records_usage, &self.lights)?;
        let sky_buffer = context.create_gpu_only_buffer_from_data(records_usage, &[self.sky])?;

        let mut instance_infos = self
            .instances
            .iter()
            .map(|instance| {
                let geometry = &self.meshes[instance.mesh_id as usize].geometry;
                InstanceInfo::new(
                    geometry.vertex_address(),
                    geometry.index_address(),
                    instance.material_id,
                )
            })
            .collect::<Vec<_>>();
        if instance_infos.is_empty() {
            instance_infos.push(InstanceInfo::zeroed());
        }
        let instance_info_buffer =
            context.create_gpu_only_buffer_from_data(records_usage, &instance_infos)?;

        let scene_info = scene_buffer_info(
            material_buffer.get_device_address(),
            light_buffer.get_device_address(),
            self.lights.len() as u64,
            instance_info_buffer.get_device_address(),
            sky_buffer.get_device_address(),
        );
        let scene_info_buffer = context
            .create_gpu_only_buffer_from_data(vk::BufferUsageFlags::STORAGE_BUFFER, &[scene_info])?;

        let placements = self
            .instances
            .iter()
            .map(|instance| (instance.mesh_id, instance.transform()))
            .collect::<Vec<_>>();
        let blas_addresses = self.meshes.iter().map(|m| m.blas.address).collect::<Vec<_>>();
        let records = instance_records(&placements, &blas_addresses)?;

        let (tlas, instance_buffer) = context.build_top_level_acceleration_structure(&records)?;
        debug!("TLAS built over {} instances", records.len());

        self.buffers = Some(SceneBuffers {
            tlas,
            _instance_buffer: instance_buffer,
            _material_buffer: material_buffer,
            _light_buffer: light_buffer,
            _instance_info_buffer: instance_info_buffer,
            _sky_buffer: sky_buffer,
            scene_info_buffer,
        });
        self.dirty = false;

        Ok(())
    }

    /// Waits for the device to stop using the current TLAS and rebuilds the
    /// scene records and the TLAS from the live instances. Descriptor sets
    /// binding the old TLAS must be rewritten afterwards.
    pub fn rebuild_top_level(&mut self, context: &Context) -> Result<()> {
        debug!("Rebuilding top level acceleration structure");
        context.device_wait_idle()?;
        self.build(context)
    }
}

/// Inserts a green default material and a white point light when none exist.
pub(crate) fn insert_defaults(materials: &mut Vec<Material>, lights: &mut Vec<Light>) {
    if materials.is_empty() {
        materials.push(Material::default());
    }
    if lights.is_empty() {
        lights.push(Light::default());
    }
}

pub(crate) fn scene_buffer_info(
    material_address: u64,
    light_address: u64,
    light_count: u64,
    instance_info_address: u64,
    sky_address: u64,
) -> SceneBufferInfo {
    SceneBufferInfo {
        material_address,
        material_stride: size_of::<Material>() as _,
        light_address,
        light_stride: size_of::<Light>() as _,
        light_count,
        vertex_stride: size_of::<Vertex>() as _,
        instance_info_address,
        instance_info_stride: size_of::<InstanceInfo>() as _,
        sky_address,
        sky_stride: size_of::<SkyInfo>() as _,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instance_ids_follow_insertion_order() {
        let mut scene = Scene::new();
        assert_eq!(scene.create_instance(0, 0, Vec3::ZERO, Vec3::ZERO, Vec3::ONE), 0);
        assert_eq!(scene.create_instance(1, 0, Vec3::X, Vec3::ZERO, Vec3::ONE), 1);
        assert_eq!(scene.instances().len(), 2);
    }

    #[test]
    fn destroy_instance_swaps_last_into_place() {
        let mut scene = Scene::new();
        scene.create_instance(0, 0, Vec3::ZERO, Vec3::ZERO, Vec3::ONE);
        scene.create_instance(1, 0, Vec3::ZERO, Vec3::ZERO, Vec3::ONE);
        scene.create_instance(2, 0, Vec3::ZERO, Vec3::ZERO, Vec3::ONE);
        scene.dirty = false;

        scene.destroy_instance(0).unwrap();

        let mesh_ids = scene.instances().iter().map(|i| i.mesh_id).collect::<Vec<_>>();
        assert_eq!(mesh_ids, vec![2, 1]);
        assert!(scene.is_dirty());
    }

    #[test]
    fn destroying_unknown_instance_fails() {
        let mut scene = Scene::new();
        assert!(scene.destroy_instance(0).is_err());
    }

    #[test]
    fn editing_an_instance_marks_scene_dirty() {
        let mut scene = Scene::new();
        scene.create_instance(0, 0, Vec3::ZERO, Vec3::ZERO, Vec3::ONE);
        let id = scene.create_instance(0, 0, Vec3::ZERO, Vec3::ZERO, Vec3::ONE);

        scene.dirty = false;
        scene.set_instance_position(id, Vec3::new(1.0, 2.0, 3.0)).unwrap();
        assert!(scene.is_dirty());

        scene.dirty = false;
        scene.set_instance_rotation(id, Vec3::Y).unwrap();
        scene.set_instance_scale(id, Vec3::splat(2.0)).unwrap();
        scene.set_instance_mesh(id, 3).unwrap();
        scene.set_instance_material(id, 4).unwrap();
        assert!(scene.is_dirty());

        let expected = MeshInstance::new(3, 4, Vec3::new(1.0, 2.0, 3.0), Vec3::Y, Vec3::splat(2.0));
        assert_eq!(scene.instances()[1], expected);
        assert_eq!(scene.instances()[0].position, Vec3::ZERO);
    }

    #[test]
    fn editing_unknown_instance_fails_and_stays_clean() {
        let mut scene = Scene::new();
        scene.create_instance(0, 0, Vec3::ZERO, Vec3::ZERO, Vec3::ONE);
        scene.dirty = false;

        assert!(scene.set_instance_position(1, Vec3::X).is_err());
        assert!(scene.set_instance_material(7, 0).is_err());
        assert!(!scene.is_dirty());
    }

    #[test]
    fn authoring_marks_scene_dirty() {
        let mut scene = Scene::new();
        scene.dirty = false;
        scene.create_material(Vec3::ONE, 0.5, 0.5);
        assert!(scene.is_dirty());

        scene.dirty = false;
        scene.create_light(Vec3::Y, Vec3::ONE, 1.0);
        assert!(scene.is_dirty());

        scene.dirty = false;
        scene.set_sky(SkyInfo::default());
        assert!(scene.is_dirty());
    }

    #[test]
    fn unbuilt_scene_has_no_tlas() {
        let scene = Scene::new();
        assert!(scene.tlas().is_err());
        assert!(scene.scene_info_buffer().is_err());
    }

    #[test]
    fn defaults_are_only_inserted_when_empty() {
        let mut materials = vec![];
        let mut lights = vec![];
        insert_defaults(&mut materials, &mut lights);
        assert_eq!(materials, vec![Material::default()]);
        assert_eq!(lights, vec![Light::default()]);

        let mut materials = vec![Material::new(Vec3::X, 1.0, 0.0)];
        let mut lights = vec![Light::point(Vec3::ZERO, Vec3::X, 1.0)];
        insert_defaults(&mut materials, &mut lights);
        assert_eq!(materials.len(), 1);
        assert_eq!(materials[0].color, [1.0, 0.0, 0.0]);
        assert_eq!(lights.len(), 1);
    }

    #[test]
    fn scene_buffer_info_strides_match_records() {
        let info = scene_buffer_info(0x10, 0x20, 3, 0x30, 0x40);

        assert_eq!(info.material_stride, 52);
        assert_eq!(info.light_stride, 32);
        assert_eq!(info.light_count, 3);
        assert_eq!(info.vertex_stride, 32);
        assert_eq!(info.instance_info_stride, 24);
        assert_eq!(info.sky_stride, 88);
        assert_eq!(info.instance_info_address, 0x30);
    }
}
