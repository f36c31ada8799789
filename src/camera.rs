use std::time::Duration;

use glam::{Mat4, Vec2, Vec3};

use crate::controls::Controls;
use crate::scene::Uniform;

/// World space up. Scenes are imported with a flipped Y axis.
const UP: Vec3 = Vec3::NEG_Y;
// 89 degrees
const MAX_PITCH: f32 = 1.553_343;

#[derive(Debug, Clone, Copy)]
pub struct Camera {
    pub position: Vec3,
    pub yaw: f32,
    pub pitch: f32,
    pub fov: f32,
    pub aspect_ratio: f32,
    pub z_near: f32,
    pub z_far: f32,
    pub speed: f32,
    pub sensitivity: f32,
}

impl Camera {
    pub fn new(position: Vec3, fov_degrees: f32, aspect_ratio: f32, z_near: f32, z_far: f32) -> Self {
        Self {
            position,
            yaw: 0.0,
            pitch: 0.0,
            fov: fov_degrees.to_radians(),
            aspect_ratio,
            z_near,
            z_far,
            speed: 2.0,
            sensitivity: 0.003,
        }
    }

    pub fn direction(&self) -> Vec3 {
        Vec3::new(
            self.yaw.sin() * self.pitch.cos(),
            -self.pitch.sin(),
            self.yaw.cos() * self.pitch.cos(),
        )
    }

    pub fn right(&self) -> Vec3 {
        self.direction().cross(UP).normalize()
    }

    pub fn view_matrix(&self) -> Mat4 {
        Mat4::look_to_rh(self.position, self.direction(), UP)
    }

    pub fn projection_matrix(&self) -> Mat4 {
        Mat4::perspective_rh(self.fov, self.aspect_ratio, self.z_near, self.z_far)
    }

    pub fn set_size(&mut self, width: u32, height: u32) {
        if height > 0 {
            self.aspect_ratio = width as f32 / height as f32;
        }
    }

    pub fn rotate(&mut self, delta: Vec2) {
        self.yaw += delta.x * self.sensitivity;
        self.pitch = (self.pitch - delta.y * self.sensitivity).clamp(-MAX_PITCH, MAX_PITCH);
    }

    /// Free fly movement. Looking around needs the right mouse button.
    pub fn update(&mut self, controls: &Controls, delta_time: Duration) {
        let step = self.speed * delta_time.as_secs_f32();
        let forward = self.direction();
        let right = self.right();

        let mut movement = Vec3::ZERO;
        if controls.w {
            movement += forward;
        }
        if controls.s {
            movement -= forward;
        }
        if controls.d {
            movement += right;
        }
        if controls.a {
            movement -= right;
        }
        if controls.space {
            movement += UP;
        }
        if controls.lshift {
            movement -= UP;
        }
        self.position += movement.normalize_or_zero() * step;

        if controls.right_mouse {
            self.rotate(controls.cursor_delta);
        }
    }

    pub fn uniform(&self, frame: u32, max_depth: u32) -> Uniform {
        Uniform::new(
            self.view_matrix().inverse(),
            self.projection_matrix().inverse(),
            frame,
            max_depth,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn camera() -> Camera {
        Camera::new(Vec3::new(0.0, 0.0, -2.0), 60.0, 16.0 / 9.0, 0.001, 100000.0)
    }

    #[test]
    fn default_orientation_looks_along_z() {
        let direction = camera().direction();
        assert!(direction.abs_diff_eq(Vec3::Z, 1e-6));
    }

    #[test]
    fn inverse_view_maps_origin_to_camera_position() {
        let camera = camera();
        let uniform = camera.uniform(0, 10);

        let eye = uniform.view_inverse.transform_point3(Vec3::ZERO);
        assert!(eye.abs_diff_eq(camera.position, 1e-5));
    }

    #[test]
    fn uniform_carries_frame_and_depth() {
        let uniform = camera().uniform(42, 10);
        assert_eq!(uniform.frame, 42);
        assert_eq!(uniform.max_depth, 10);
    }

    #[test]
    fn pitch_is_clamped() {
        let mut camera = camera();
        camera.rotate(Vec2::new(0.0, -100000.0));
        assert!(camera.pitch <= MAX_PITCH);
        camera.rotate(Vec2::new(0.0, 100000.0));
        assert!(camera.pitch >= -MAX_PITCH);
    }

    #[test]
    fn forward_key_moves_along_direction() {
        let mut camera = camera();
        let controls = Controls {
            w: true,
            ..Default::default()
        };

        camera.update(&controls, Duration::from_secs(1));
        assert!(camera.position.abs_diff_eq(Vec3::new(0.0, 0.0, 0.0), 1e-5));
    }

    #[test]
    fn zero_height_keeps_aspect_ratio() {
        let mut camera = camera();
        let before = camera.aspect_ratio;
        camera.set_size(100, 0);
        assert_eq!(camera.aspect_ratio, before);
    }
}
