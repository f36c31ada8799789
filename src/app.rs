use std::time::{Duration, Instant};

use glam::Vec3;
use log::{debug, error, info};
use winit::application::ApplicationHandler;
use winit::event::{DeviceEvent, DeviceId, ElementState, MouseButton, WindowEvent};
use winit::event_loop::ActiveEventLoop;
use winit::window::WindowId;

use crate::camera::Camera;
use crate::engine::Engine;
use crate::frame::{AcquireOutcome, Frame, FrameBackend, FrameController, PresentOutcome};
use crate::renderer::Renderer;
use crate::scene::Scene;
use crate::{EngineConfig, OctaResult};

/// Space between the default instances of the configured models.
const MODEL_SPACING: f32 = 2.5;

pub struct App {
    config: EngineConfig,
    state: Option<AppState>,
    error: Option<anyhow::Error>,
    last_frame: Instant,
}

/// Everything created once the event loop is running. Field order is drop order.
struct AppState {
    renderer: Renderer,
    scene: Scene,
    frame_controller: FrameController,
    camera: Camera,
    engine: Engine,
}

impl App {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            state: None,
            error: None,
            last_frame: Instant::now(),
        }
    }

    pub fn take_error(&mut self) -> Option<anyhow::Error> {
        self.error.take()
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, err: anyhow::Error) {
        error!("{err:?}");
        self.error = Some(err);
        event_loop.exit();
    }
}

impl AppState {
    fn new(event_loop: &ActiveEventLoop, config: &EngineConfig) -> OctaResult<Self> {
        let engine = Engine::new(event_loop, config)?;

        let mut scene = Scene::new();
        for (i, path) in config.model_paths.iter().enumerate() {
            info!("Loading model {path:?}");
            let mesh_id = scene.load_model(&engine.context, path)?;
            scene.create_instance(
                mesh_id,
                0,
                Vec3::new(i as f32 * MODEL_SPACING, 0.0, 0.0),
                Vec3::ZERO,
                Vec3::ONE,
            );
        }
        scene.build(&engine.context)?;

        let frames_in_flight = engine.in_flight_frames.len();
        let size = engine.swapchain.size;
        let renderer = Renderer::new(&engine.context, config, &scene, frames_in_flight, size)?;

        let camera = Camera::new(
            config.camera_position,
            config.fov,
            size.x as f32 / size.y.max(1) as f32,
            config.z_near,
            config.z_far,
        );

        Ok(Self {
            renderer,
            scene,
            frame_controller: FrameController::new(frames_in_flight),
            camera,
            engine,
        })
    }

    fn update(&mut self, delta_time: Duration) -> OctaResult<()> {
        if self.scene.is_dirty() {
            self.scene.rebuild_top_level(&self.engine.context)?;
            self.renderer.write_descriptor_sets(&self.scene)?;
        }

        let size = self.engine.window.inner_size();
        if size.width == 0 || size.height == 0 {
            return Ok(());
        }

        self.camera.update(&self.engine.controls, delta_time);

        let mut backend = RenderBackend {
            engine: &mut self.engine,
            renderer: &mut self.renderer,
            scene: &self.scene,
            camera: &mut self.camera,
        };
        self.frame_controller.ray_trace_scene(&mut backend)?;

        self.engine.controls.reset();
        Ok(())
    }
}

/// Joins the engine and the renderer for one frame.
struct RenderBackend<'a> {
    engine: &'a mut Engine,
    renderer: &'a mut Renderer,
    scene: &'a Scene,
    camera: &'a mut Camera,
}

impl FrameBackend for RenderBackend<'_> {
    fn frames_in_flight(&self) -> usize {
        self.engine.in_flight_frames.len()
    }

    fn acquire_next_image(&mut self, frame_index: usize) -> OctaResult<AcquireOutcome> {
        self.engine.acquire_next_image(frame_index)
    }

    fn begin_recording(&mut self, frame_index: usize) -> OctaResult<()> {
        self.engine.begin_recording(frame_index)
    }

    fn record_frame(&mut self, frame: &Frame) -> OctaResult<()> {
        self.renderer.update_uniform(frame.frame_index, self.camera)?;
        self.renderer.record(
            self.engine.command_buffer(frame.frame_index),
            frame,
            self.engine.swapchain_image(frame.image_index),
        );

        Ok(())
    }

    fn submit_and_present(&mut self, frame: &Frame) -> OctaResult<PresentOutcome> {
        self.engine.submit_and_present(frame.frame_index, frame.image_index)
    }

    fn take_resize_request(&mut self) -> bool {
        self.engine.take_resize_request()
    }

    fn recreate_swapchain(&mut self) -> OctaResult<bool> {
        self.engine.recreate_swapchain()
    }

    fn rebuild_render_output(&mut self) -> OctaResult<()> {
        let size = self.engine.swapchain.size;
        self.camera.set_size(size.x, size.y);
        self.renderer
            .rebuild_render_output(&self.engine.context, size, self.scene)
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.state.is_some() {
            return;
        }

        match AppState::new(event_loop, &self.config) {
            Ok(state) => {
                self.state = Some(state);
                self.last_frame = Instant::now();
            }
            Err(err) => self.fail(event_loop, err),
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _window_id: WindowId, event: WindowEvent) {
        let Some(state) = self.state.as_mut() else {
            return;
        };
        state.engine.controls.handle_window_event(&event);

        match event {
            WindowEvent::Resized(..) => {
                debug!("Window has been resized");
                state.engine.resize_requested = true;
            }
            WindowEvent::MouseInput {
                state: button_state,
                button: MouseButton::Right,
                ..
            } => {
                state
                    .engine
                    .window
                    .set_cursor_visible(button_state != ElementState::Pressed);
            }
            WindowEvent::CloseRequested => event_loop.exit(),
            _ => (),
        }
    }

    fn device_event(&mut self, _event_loop: &ActiveEventLoop, _device_id: DeviceId, event: DeviceEvent) {
        if let Some(state) = self.state.as_mut() {
            state.engine.controls.handle_device_event(&event);
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        let now = Instant::now();
        let delta_time = now - self.last_frame;
        self.last_frame = now;

        let Some(state) = self.state.as_mut() else {
            return;
        };
        if let Err(err) = state.update(delta_time) {
            self.fail(event_loop, err);
        }
    }

    // Wait for gpu to finish pending work before closing app
    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(state) = self.state.take() {
            if let Err(err) = state.engine.wait_for_gpu() {
                error!("Failed to wait for gpu to finish work: {err:?}");
            }
        }

        info!("Stopping");
    }
}
