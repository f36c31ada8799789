//! Flat records shared with the ray tracing shaders. Field order and size are
//! part of the shader interface.

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Material {
    pub color: [f32; 3],
    pub subsurface: f32,
    pub metallic: f32,
    pub roughness: f32,
    pub specular: f32,
    pub specular_tint: f32,
    pub anisotropic: f32,
    pub sheen: f32,
    pub sheen_tint: f32,
    pub clear_coat: f32,
    pub clear_coat_gloss: f32,
}

impl Material {
    pub fn new(color: Vec3, metallic: f32, roughness: f32) -> Self {
        Self {
            color: color.to_array(),
            metallic,
            roughness,
            ..Default::default()
        }
    }
}

impl Default for Material {
    fn default() -> Self {
        Self {
            color: [0.0, 1.0, 0.0],
            subsurface: 0.0,
            metallic: 0.0,
            roughness: 1.0,
            specular: 0.5,
            specular_tint: 0.0,
            anisotropic: 0.0,
            sheen: 0.0,
            sheen_tint: 0.0,
            clear_coat: 0.0,
            clear_coat_gloss: 0.0,
        }
    }
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LightType {
    Point = 0,
    Spot = 1,
    Directional = 2,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Light {
    pub pos: [f32; 3],
    pub color: [f32; 3],
    pub intensity: f32,
    pub light_type: u8,
    _pad: [u8; 3],
}

impl Light {
    pub fn new(light_type: LightType, pos: Vec3, color: Vec3, intensity: f32) -> Self {
        Self {
            pos: pos.to_array(),
            color: color.to_array(),
            intensity,
            light_type: light_type as u8,
            _pad: [0; 3],
        }
    }

    pub fn point(pos: Vec3, color: Vec3, intensity: f32) -> Self {
        Self::new(LightType::Point, pos, color, intensity)
    }
}

impl Default for Light {
    fn default() -> Self {
        Self::point(Vec3::new(4.0, 3.0, 4.0), Vec3::ONE, 5.0)
    }
}

/// Per instance data, indexed by the custom index of the TLAS instance.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct InstanceInfo {
    pub vertex_address: u64,
    pub index_address: u64,
    pub material_id: u32,
    _pad: u32,
}

impl InstanceInfo {
    pub fn new(vertex_address: u64, index_address: u64, material_id: u32) -> Self {
        Self {
            vertex_address,
            index_address,
            material_id,
            _pad: 0,
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct SkyInfo {
    pub sky_color: [f32; 3],
    pub horizon_color: [f32; 3],
    pub ground_color: [f32; 3],
    pub sun_direction: [f32; 3],
    pub up_direction: [f32; 3],

    pub brightness: f32,
    pub horizon_size: f32,
    pub angular_size: f32,
    pub glow_intensity: f32,
    pub glow_sharpness: f32,
    pub glow_size: f32,
    pub light_radiance: f32,
}

impl Default for SkyInfo {
    fn default() -> Self {
        Self {
            sky_color: [0.35, 0.55, 0.9],
            horizon_color: [0.85, 0.88, 0.92],
            ground_color: [0.3, 0.28, 0.25],
            sun_direction: Vec3::new(0.3, -1.0, 0.2).normalize().to_array(),
            // Y points down in world space.
            up_direction: [0.0, -1.0, 0.0],

            brightness: 1.0,
            horizon_size: 0.1,
            angular_size: 0.05,
            glow_intensity: 0.5,
            glow_sharpness: 8.0,
            glow_size: 0.1,
            light_radiance: 5.0,
        }
    }
}

/// Root record bound at binding 3. Every other scene record is reached through
/// an address and stride stored here.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct SceneBufferInfo {
    pub material_address: u64,
    pub material_stride: u64,

    pub light_address: u64,
    pub light_stride: u64,
    pub light_count: u64,

    pub vertex_stride: u64,

    pub instance_info_address: u64,
    pub instance_info_stride: u64,

    pub sky_address: u64,
    pub sky_stride: u64,
}

/// Per frame uniform at binding 2.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Uniform {
    pub view_inverse: Mat4,
    pub proj_inverse: Mat4,
    pub frame: u32,
    pub max_depth: u32,
    _pad: [u32; 2],
}

impl Uniform {
    pub fn new(view_inverse: Mat4, proj_inverse: Mat4, frame: u32, max_depth: u32) -> Self {
        Self {
            view_inverse,
            proj_inverse,
            frame,
            max_depth,
            _pad: [0; 2],
        }
    }
}

#[cfg(test)]
mod tests {
    use std::mem::{offset_of, size_of};

    use super::*;

    #[test]
    fn material_layout() {
        assert_eq!(size_of::<Material>(), 52);
        assert_eq!(offset_of!(Material, color), 0);
        assert_eq!(offset_of!(Material, subsurface), 12);
        assert_eq!(offset_of!(Material, metallic), 16);
        assert_eq!(offset_of!(Material, roughness), 20);
        assert_eq!(offset_of!(Material, specular), 24);
        assert_eq!(offset_of!(Material, specular_tint), 28);
        assert_eq!(offset_of!(Material, anisotropic), 32);
        assert_eq!(offset_of!(Material, sheen), 36);
        assert_eq!(offset_of!(Material, sheen_tint), 40);
        assert_eq!(offset_of!(Material, clear_coat), 44);
        assert_eq!(offset_of!(Material, clear_coat_gloss), 48);
    }

    #[test]
    fn light_layout() {
        assert_eq!(size_of::<Light>(), 32);
        assert_eq!(offset_of!(Light, pos), 0);
        assert_eq!(offset_of!(Light, color), 12);
        assert_eq!(offset_of!(Light, intensity), 24);
        assert_eq!(offset_of!(Light, light_type), 28);
    }

    #[test]
    fn instance_info_layout() {
        assert_eq!(size_of::<InstanceInfo>(), 24);
        assert_eq!(offset_of!(InstanceInfo, vertex_address), 0);
        assert_eq!(offset_of!(InstanceInfo, index_address), 8);
        assert_eq!(offset_of!(InstanceInfo, material_id), 16);
    }

    #[test]
    fn sky_info_layout() {
        assert_eq!(size_of::<SkyInfo>(), 88);
        assert_eq!(offset_of!(SkyInfo, up_direction), 48);
        assert_eq!(offset_of!(SkyInfo, brightness), 60);
        assert_eq!(offset_of!(SkyInfo, light_radiance), 84);
    }

    #[test]
    fn scene_buffer_info_layout() {
        assert_eq!(size_of::<SceneBufferInfo>(), 80);
        assert_eq!(offset_of!(SceneBufferInfo, light_count), 32);
        assert_eq!(offset_of!(SceneBufferInfo, vertex_stride), 40);
        assert_eq!(offset_of!(SceneBufferInfo, instance_info_address), 48);
        assert_eq!(offset_of!(SceneBufferInfo, sky_stride), 72);
    }

    #[test]
    fn uniform_layout() {
        assert_eq!(size_of::<Uniform>(), 144);
        assert_eq!(offset_of!(Uniform, view_inverse), 0);
        assert_eq!(offset_of!(Uniform, proj_inverse), 64);
        assert_eq!(offset_of!(Uniform, frame), 128);
        assert_eq!(offset_of!(Uniform, max_depth), 132);
    }

    #[test]
    fn defaults() {
        let material = Material::default();
        assert_eq!(material.color, [0.0, 1.0, 0.0]);
        assert_eq!(material.metallic, 0.0);
        assert_eq!(material.roughness, 1.0);
        assert_eq!(material.specular, 0.5);

        let light = Light::default();
        assert_eq!(light.pos, [4.0, 3.0, 4.0]);
        assert_eq!(light.color, [1.0, 1.0, 1.0]);
        assert_eq!(light.intensity, 5.0);
        assert_eq!(light.light_type, LightType::Point as u8);
    }

    #[test]
    fn records_serialize_to_their_size() {
        let info = InstanceInfo::new(0x1000, 0x2000, 7);
        let bytes = bytemuck::bytes_of(&info);
        assert_eq!(bytes.len(), 24);
        assert_eq!(&bytes[16..20], &7u32.to_ne_bytes());
    }
}
