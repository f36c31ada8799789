use glam::{vec2, Vec2};
use winit::event::{DeviceEvent, ElementState, KeyEvent, MouseButton, MouseScrollDelta, WindowEvent};
use winit::keyboard::{KeyCode, PhysicalKey};

#[derive(Debug, Clone, Copy, Default)]
pub struct Controls {
    pub w: bool,
    pub s: bool,
    pub d: bool,
    pub a: bool,
    pub space: bool,
    pub lshift: bool,

    pub right_mouse: bool,

    pub cursor_delta: Vec2,
    pub scroll_delta: f32,
}

impl Controls {
    /// Clears the per frame deltas.
    pub fn reset(&mut self) {
        self.cursor_delta = Vec2::ZERO;
        self.scroll_delta = 0.0;
    }

    pub fn set_key(&mut self, key: KeyCode, pressed: bool) {
        match key {
            KeyCode::KeyW => self.w = pressed,
            KeyCode::KeyS => self.s = pressed,
            KeyCode::KeyA => self.a = pressed,
            KeyCode::KeyD => self.d = pressed,
            KeyCode::Space => self.space = pressed,
            KeyCode::ShiftLeft => self.lshift = pressed,
            _ => {}
        }
    }

    pub fn add_cursor_delta(&mut self, x: f64, y: f64) {
        self.cursor_delta = vec2(self.cursor_delta.x + x as f32, self.cursor_delta.y + y as f32);
    }

    pub fn handle_window_event(&mut self, event: &WindowEvent) {
        match event {
            WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        state,
                        physical_key: PhysicalKey::Code(key),
                        ..
                    },
                ..
            } => {
                self.set_key(*key, *state == ElementState::Pressed);
            }
            WindowEvent::MouseInput { state, button, .. } => {
                if *button == MouseButton::Right {
                    self.right_mouse = *state == ElementState::Pressed;
                }
            }
            WindowEvent::MouseWheel { delta, .. } => {
                self.scroll_delta = match delta {
                    MouseScrollDelta::LineDelta(_, y) => *y,
                    MouseScrollDelta::PixelDelta(d) => d.y as f32,
                };
            }
            _ => {}
        }
    }

    pub fn handle_device_event(&mut self, event: &DeviceEvent) {
        if let DeviceEvent::MouseMotion { delta: (x, y) } = event {
            self.add_cursor_delta(*x, *y);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn movement_keys_follow_press_state() {
        let mut controls = Controls::default();

        controls.set_key(KeyCode::KeyW, true);
        controls.set_key(KeyCode::Space, true);
        assert!(controls.w && controls.space);

        controls.set_key(KeyCode::KeyW, false);
        assert!(!controls.w);
        assert!(controls.space);
    }

    #[test]
    fn unrelated_keys_are_ignored() {
        let mut controls = Controls::default();
        controls.set_key(KeyCode::KeyQ, true);

        assert!(!controls.w && !controls.a && !controls.s && !controls.d);
    }

    #[test]
    fn cursor_delta_accumulates_until_reset() {
        let mut controls = Controls::default();
        controls.add_cursor_delta(1.0, 2.0);
        controls.add_cursor_delta(0.5, -1.0);
        assert_eq!(controls.cursor_delta, vec2(1.5, 1.0));

        controls.scroll_delta = 3.0;
        controls.reset();
        assert_eq!(controls.cursor_delta, Vec2::ZERO);
        assert_eq!(controls.scroll_delta, 0.0);
    }
}
