//! Window management using winit

use crate::backend::traits::GraphicsBackend;
use crate::config::DemoConfig;
use crate::engine::{Engine, FrameStatus};
use crate::error::{DemoError, DemoResult};
use crate::scene::{FrameInput, Scene};
use glam::Vec2;
use std::sync::Arc;
use std::time::Instant;
use winit::{
    dpi::PhysicalSize,
    event::{ElementState, Event, MouseButton, WindowEvent},
    event_loop::{ControlFlow, EventLoop, EventLoopWindowTarget},
    keyboard::{KeyCode, PhysicalKey},
    window::{Window as WinitWindow, WindowBuilder},
};

/// Wrapper around winit window with additional state
pub struct Window {
    window: Arc<WinitWindow>,
    width: u32,
    height: u32,
    resized: bool,
    close_requested: bool,
}

impl Window {
    /// Create a new window with the given title and dimensions
    pub fn new(event_loop: &EventLoop<()>, title: &str, width: u32, height: u32) -> DemoResult<Self> {
        let window = WindowBuilder::new()
            .with_title(title)
            .with_inner_size(PhysicalSize::new(width, height))
            .build(event_loop)?;

        Ok(Self {
            window: Arc::new(window),
            width,
            height,
            resized: false,
            close_requested: false,
        })
    }

    /// Get arc reference to window
    pub fn window_arc(&self) -> Arc<WinitWindow> {
        Arc::clone(&self.window)
    }

    /// Get current window dimensions
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Returns and clears the resize flag
    pub fn take_resized(&mut self) -> bool {
        std::mem::take(&mut self.resized)
    }

    pub fn should_close(&self) -> bool {
        self.close_requested
    }

    pub fn handle_event(&mut self, event: &WindowEvent) {
        match event {
            WindowEvent::Resized(size) => {
                self.width = size.width;
                self.height = size.height;
                self.resized = true;
            }
            WindowEvent::CloseRequested => {
                self.close_requested = true;
            }
            _ => {}
        }
    }

    pub fn request_redraw(&self) {
        self.window.request_redraw();
    }
}

/// Builds the per-frame [`FrameInput`] snapshot from window events
#[derive(Debug, Default)]
pub struct InputCollector {
    input: FrameInput,
    cursor: Option<Vec2>,
    exit_requested: bool,
}

impl InputCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handle_event(&mut self, event: &WindowEvent) {
        match event {
            WindowEvent::KeyboardInput { event, .. } => {
                if let PhysicalKey::Code(code) = event.physical_key {
                    self.handle_key(code, event.state, event.repeat);
                }
            }
            WindowEvent::MouseInput {
                state,
                button: MouseButton::Left,
                ..
            } => {
                self.input.dragging = *state == ElementState::Pressed;
            }
            WindowEvent::CursorMoved { position, .. } => {
                self.handle_cursor(Vec2::new(position.x as f32, position.y as f32));
            }
            WindowEvent::Focused(false) => {
                // Keys released while unfocused never arrive
                self.input = FrameInput::new();
            }
            _ => {}
        }
    }

    /// Movement keys are levels, `1` and `P` are edges. Auto-repeat never
    /// produces a second edge.
    pub fn handle_key(&mut self, code: KeyCode, state: ElementState, repeat: bool) {
        let pressed = state == ElementState::Pressed;
        match code {
            KeyCode::KeyW => self.input.forward = pressed,
            KeyCode::KeyS => self.input.backward = pressed,
            KeyCode::KeyA => self.input.left = pressed,
            KeyCode::KeyD => self.input.right = pressed,
            KeyCode::KeyQ => self.input.up = pressed,
            KeyCode::KeyE => self.input.down = pressed,
            KeyCode::Digit1 if pressed && !repeat => self.input.toggle_voxelize = true,
            KeyCode::KeyP if pressed && !repeat => self.input.probe = true,
            KeyCode::Escape if pressed => self.exit_requested = true,
            _ => {}
        }
    }

    /// Cursor motion counts toward the delta only while dragging
    pub fn handle_cursor(&mut self, position: Vec2) {
        if let Some(last) = self.cursor {
            if self.input.dragging {
                self.input.mouse_delta += position - last;
            }
        }
        self.cursor = Some(position);
    }

    /// Take this frame's snapshot and clear its deltas and edges
    pub fn snapshot(&mut self) -> FrameInput {
        let snapshot = self.input.clone();
        self.input.reset_deltas();
        snapshot
    }

    pub fn exit_requested(&self) -> bool {
        self.exit_requested
    }
}

/// Open the window and run the demo until it is closed
pub fn run<B: GraphicsBackend + 'static>(config: DemoConfig, scene: Scene) -> DemoResult<()> {
    config.validate()?;
    let event_loop = EventLoop::new()?;
    let mut window = Window::new(&event_loop, &config.title, config.width, config.height)?;
    let backend = B::new(window.window_arc(), config.vsync)?;
    let mut engine = Engine::new(backend, scene, config)?;
    let mut input = InputCollector::new();
    let mut last_frame = Instant::now();
    let mut failure: Option<DemoError> = None;

    log::info!("Controls: WASD move, QE up/down, drag to look, 1 toggles voxelization, P probes");

    event_loop.run(|event, elwt: &EventLoopWindowTarget<()>| {
        elwt.set_control_flow(ControlFlow::Poll);

        match event {
            Event::WindowEvent { event, .. } => {
                window.handle_event(&event);
                input.handle_event(&event);
                if window.should_close() || input.exit_requested() {
                    elwt.exit();
                    return;
                }
                if window.take_resized() {
                    let (width, height) = window.dimensions();
                    if let Err(e) = engine.resize(width, height) {
                        log::error!("Resize failed: {}", e);
                        failure = Some(e.into());
                        elwt.exit();
                    }
                }
            }
            Event::AboutToWait => {
                let now = Instant::now();
                let dt = now.duration_since(last_frame).as_secs_f32();
                last_frame = now;

                match engine.frame(&input.snapshot(), dt) {
                    Ok(FrameStatus::Presented) | Ok(FrameStatus::Skipped) => {}
                    Ok(FrameStatus::Dropped) => log::warn!("Frame dropped"),
                    Err(e) => log::error!("Frame failed: {}", e),
                }
                window.request_redraw();
            }
            _ => {}
        }
    })?;

    match failure {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_movement_keys_are_levels() {
        let mut collector = InputCollector::new();
        collector.handle_key(KeyCode::KeyW, ElementState::Pressed, false);
        collector.handle_key(KeyCode::KeyQ, ElementState::Pressed, false);
        assert!(collector.snapshot().forward);
        let held = collector.snapshot();
        assert!(held.forward && held.up);

        collector.handle_key(KeyCode::KeyW, ElementState::Released, false);
        assert!(!collector.snapshot().forward);
    }

    #[test]
    fn test_toggle_fires_once_per_press() {
        let mut collector = InputCollector::new();
        collector.handle_key(KeyCode::Digit1, ElementState::Pressed, false);
        collector.handle_key(KeyCode::Digit1, ElementState::Pressed, true);
        assert!(collector.snapshot().toggle_voxelize);
        collector.handle_key(KeyCode::Digit1, ElementState::Pressed, true);
        assert!(!collector.snapshot().toggle_voxelize);
    }

    #[test]
    fn test_drag_accumulates_delta() {
        let mut collector = InputCollector::new();
        collector.handle_cursor(Vec2::new(10.0, 10.0));
        collector.handle_cursor(Vec2::new(20.0, 10.0));
        assert_eq!(collector.snapshot().mouse_delta, Vec2::ZERO);

        collector.input.dragging = true;
        collector.handle_cursor(Vec2::new(25.0, 13.0));
        collector.handle_cursor(Vec2::new(30.0, 16.0));
        let snapshot = collector.snapshot();
        assert_eq!(snapshot.mouse_delta, Vec2::new(10.0, 6.0));
        assert!(snapshot.dragging);
        assert_eq!(collector.snapshot().mouse_delta, Vec2::ZERO);
    }

    #[test]
    fn test_escape_requests_exit() {
        let mut collector = InputCollector::new();
        assert!(!collector.exit_requested());
        collector.handle_key(KeyCode::Escape, ElementState::Pressed, false);
        assert!(collector.exit_requested());
    }
}
