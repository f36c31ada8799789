use ash::vk;
use glam::{EulerRot, Mat4, Quat, Vec3};

/// Placement of a mesh. `rotation` holds XYZ euler angles in radians.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MeshInstance {
    pub mesh_id: u32,
    pub material_id: u32,
    pub position: Vec3,
    pub rotation: Vec3,
    pub scale: Vec3,
}

impl MeshInstance {
    pub fn new(mesh_id: u32, material_id: u32, position: Vec3, rotation: Vec3, scale: Vec3) -> Self {
        Self {
            mesh_id,
            material_id,
            position,
            rotation,
            scale,
        }
    }

    pub fn matrix(&self) -> Mat4 {
        let rotation = Quat::from_euler(EulerRot::XYZ, self.rotation.x, self.rotation.y, self.rotation.z);
        Mat4::from_scale_rotation_translation(self.scale, rotation, self.position)
    }

    /// The top three rows of the affine matrix, row major.
    pub fn transform(&self) -> vk::TransformMatrixKHR {
        let rows = self.matrix().transpose().to_cols_array();
        let mut matrix = [0.0; 12];
        matrix.copy_from_slice(&rows[..12]);

        vk::TransformMatrixKHR { matrix }
    }
}

#[cfg(test)]
mod tests {
    use std::f32::consts::FRAC_PI_2;

    use super::*;

    fn assert_close(a: &[f32], b: &[f32]) {
        for (x, y) in a.iter().zip(b) {
            assert!((x - y).abs() < 1e-5, "{a:?} != {b:?}");
        }
    }

    #[test]
    fn translation_lands_in_last_column() {
        let instance = MeshInstance::new(0, 0, Vec3::new(1.0, 2.0, 3.0), Vec3::ZERO, Vec3::ONE);

        assert_close(
            &instance.transform().matrix,
            &[1.0, 0.0, 0.0, 1.0, 0.0, 1.0, 0.0, 2.0, 0.0, 0.0, 1.0, 3.0],
        );
    }

    #[test]
    fn scale_is_on_the_diagonal() {
        let instance = MeshInstance::new(0, 0, Vec3::ZERO, Vec3::ZERO, Vec3::new(2.0, 3.0, 4.0));

        assert_close(
            &instance.transform().matrix,
            &[2.0, 0.0, 0.0, 0.0, 0.0, 3.0, 0.0, 0.0, 0.0, 0.0, 4.0, 0.0],
        );
    }

    #[test]
    fn rotation_about_z_maps_x_to_y() {
        let instance = MeshInstance::new(0, 0, Vec3::ZERO, Vec3::new(0.0, 0.0, FRAC_PI_2), Vec3::ONE);
        let m = instance.transform().matrix;

        // Row major: the image of the x axis is the first column.
        assert_close(&[m[0], m[4], m[8]], &[0.0, 1.0, 0.0]);
    }
}
