//! Camera controller system
//!
//! Input is gathered once per frame into a [`FrameInput`] snapshot and handed
//! to a [`CameraController`], which edits the camera basis.

use glam::Vec2;

use super::Camera;

/// Input state sampled at the start of a frame
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameInput {
    /// Movement keys (WS walk, AD strafe, QE up/down)
    pub forward: bool,
    pub backward: bool,
    pub left: bool,
    pub right: bool,
    pub up: bool,
    pub down: bool,

    /// Mouse delta since last frame (in pixels)
    pub mouse_delta: Vec2,

    /// Left mouse button held
    pub dragging: bool,

    /// Render mode toggle was pressed this frame (edge, not level)
    pub toggle_voxelize: bool,

    /// Log the indirect light under the screen center
    pub probe: bool,
}

impl FrameInput {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset per-frame deltas and edges (call after update)
    pub fn reset_deltas(&mut self) {
        self.mouse_delta = Vec2::ZERO;
        self.toggle_voxelize = false;
        self.probe = false;
    }

    fn axis(positive: bool, negative: bool) -> f32 {
        match (positive, negative) {
            (true, false) => 1.0,
            (false, true) => -1.0,
            _ => 0.0,
        }
    }
}

/// Abstract camera controller trait
pub trait CameraController {
    /// Update the camera based on input and delta time
    fn update(&mut self, camera: &mut Camera, input: &FrameInput, dt: f32);

    /// Get the controller name for debugging
    fn name(&self) -> &'static str;

    /// Reset the controller to default state
    fn reset(&mut self);
}

/// First-person controller
///
/// - W/S: walk along the view direction
/// - A/D: strafe
/// - Q/E: move down/up along world Y
/// - Left drag: pitch and turn
pub struct FirstPersonController {
    /// Movement speed in units per second
    pub move_speed: f32,
    /// Mouse sensitivity in degrees per pixel
    pub mouse_sensitivity: f32,
}

impl Default for FirstPersonController {
    fn default() -> Self {
        Self {
            move_speed: 5.0,
            mouse_sensitivity: 0.25,
        }
    }
}

impl FirstPersonController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create with custom speed settings
    pub fn with_speed(mut self, speed: f32) -> Self {
        self.move_speed = speed;
        self
    }

    /// Create with custom sensitivity
    pub fn with_sensitivity(mut self, degrees_per_pixel: f32) -> Self {
        self.mouse_sensitivity = degrees_per_pixel;
        self
    }
}

impl CameraController for FirstPersonController {
    fn update(&mut self, camera: &mut Camera, input: &FrameInput, dt: f32) {
        let step = self.move_speed * dt;
        let walk = FrameInput::axis(input.forward, input.backward);
        let strafe = FrameInput::axis(input.right, input.left);
        let vertical = FrameInput::axis(input.up, input.down);
        if walk != 0.0 {
            camera.walk(walk * step);
        }
        if strafe != 0.0 {
            camera.strafe(strafe * step);
        }
        if vertical != 0.0 {
            camera.fly_vertical(vertical * step);
        }

        if input.dragging && input.mouse_delta != Vec2::ZERO {
            let dx = (input.mouse_delta.x * self.mouse_sensitivity).to_radians();
            let dy = (input.mouse_delta.y * self.mouse_sensitivity).to_radians();
            // Screen y grows downward; dragging right turns right
            camera.pitch(-dy);
            camera.rotate_y(-dx);
        }

        camera.update_view_matrix();
    }

    fn name(&self) -> &'static str {
        "FirstPerson"
    }

    fn reset(&mut self) {
        *self = Self::default();
    }
}
