pub extern crate anyhow;
pub extern crate glam;
pub extern crate log;

pub mod app;
pub mod camera;
pub mod controls;
pub mod engine;
pub mod frame;
pub mod in_flight_frames;
pub mod logger;
pub mod render_output;
pub mod renderer;
pub mod scene;
pub mod vulkan;

use std::path::PathBuf;

use glam::{UVec2, Vec3};
use log::info;
use winit::event_loop::{ControlFlow, EventLoop};

use crate::app::App;
use crate::logger::log_init;

pub type OctaResult<V> = anyhow::Result<V>;

#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Debug, Default)]
pub enum EngineFeatureValue {
    #[default]
    NotUsed,
    Wanted,
    Needed,
}

#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub name: String,
    pub start_size: UVec2,
    pub num_frames_in_flight: usize,
    pub validation_layers: EngineFeatureValue,

    /// SPIR-V module holding the raygen, miss and closest hit entry points.
    pub shader_path: PathBuf,
    pub raygen_entry_point: String,
    pub miss_entry_point: String,
    pub closest_hit_entry_point: String,

    pub model_paths: Vec<PathBuf>,
    /// Bounce limit passed to the shaders. Also requested as pipeline
    /// recursion depth, capped by the device.
    pub max_depth: u32,

    pub camera_position: Vec3,
    /// Vertical, in degrees.
    pub fov: f32,
    pub z_near: f32,
    pub z_far: f32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            name: "Octa Trace".to_string(),
            start_size: UVec2 { x: 1080, y: 720 },
            num_frames_in_flight: 2,
            validation_layers: if cfg!(debug_assertions) {
                EngineFeatureValue::Wanted
            } else {
                EngineFeatureValue::NotUsed
            },
            shader_path: PathBuf::from("shaders/raytracing.slang.spv"),
            raygen_entry_point: "rgenMain".to_string(),
            miss_entry_point: "rmissMain".to_string(),
            closest_hit_entry_point: "rchitMain".to_string(),
            model_paths: vec![PathBuf::from("models/Cube.obj")],
            max_depth: 10,
            camera_position: Vec3::new(0.0, 0.0, -2.0),
            fov: 60.0,
            z_near: 0.001,
            z_far: 100000.0,
        }
    }
}

pub fn run(engine_config: EngineConfig) -> OctaResult<()> {
    log_init()?;
    info!("Starting {}", engine_config.name);

    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = App::new(engine_config);
    event_loop.run_app(&mut app)?;

    match app.take_error() {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_the_bundled_assets() {
        let config = EngineConfig::default();

        assert_eq!(config.num_frames_in_flight, 2);
        assert_eq!(config.shader_path, PathBuf::from("shaders/raytracing.slang.spv"));
        assert_eq!(config.raygen_entry_point, "rgenMain");
        assert_eq!(config.miss_entry_point, "rmissMain");
        assert_eq!(config.closest_hit_entry_point, "rchitMain");
        assert_eq!(config.model_paths, vec![PathBuf::from("models/Cube.obj")]);
        assert_eq!(config.max_depth, 10);
        assert_eq!(config.camera_position, Vec3::new(0.0, 0.0, -2.0));
    }
}
