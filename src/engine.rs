//! Main engine orchestrator
//!
//! Owns the backend, the scene and every pass, and sequences one frame:
//! clear, then voxelize and visualize while voxelization is enabled, then the
//! cone traced scene, then present. With voxelization disabled the cone tracer
//! keeps reading the last volume that was built.

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::config::DemoConfig;
use crate::error::DemoResult;
use crate::pipeline::{ConeTracer, DepthTarget, GeometryBuffers, RenderTargets, Visualizer, Voxelizer};
use crate::scene::{Camera, CameraController, FirstPersonController, FrameInput, Scene, TransformSet};
use crate::voxel::{trace_indirect, IndirectLight, VoxelGrid};

/// Vertical field of view of the demo camera, in degrees
pub const FIELD_OF_VIEW_DEGREES: f32 = 45.0;
pub const NEAR_PLANE: f32 = 0.1;
pub const FAR_PLANE: f32 = 1000.0;

/// Whether a frame rebuilds the voxel volume
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RenderMode {
    /// Voxelize (and visualize) every frame
    #[default]
    Voxelize,
    /// Cone trace against the last volume built
    Cached,
}

impl RenderMode {
    pub fn toggle(self) -> Self {
        match self {
            RenderMode::Voxelize => RenderMode::Cached,
            RenderMode::Cached => RenderMode::Voxelize,
        }
    }

    pub fn voxelizes(self) -> bool {
        self == RenderMode::Voxelize
    }
}

/// Outcome of [`Engine::frame`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStatus {
    Presented,
    /// The window is minimized, nothing was recorded
    Skipped,
    /// The surface was lost and reconfigured, the next frame retries
    Dropped,
}

/// The voxel cone tracing engine
pub struct Engine<B: GraphicsBackend> {
    backend: B,
    config: DemoConfig,
    scene: Scene,
    controller: FirstPersonController,
    transforms: TransformSet,
    geometry: GeometryBuffers,
    voxelizer: Voxelizer,
    cone_tracer: ConeTracer,
    visualizer: Visualizer,
    depth: DepthTarget,
    render_mode: RenderMode,
    width: u32,
    height: u32,
    elapsed: f32,
    frame_count: u64,
    minimized: bool,
    released: bool,
}

impl<B: GraphicsBackend> Engine<B> {
    /// Create every GPU resource the demo needs. Any failure is fatal.
    pub fn new(mut backend: B, mut scene: Scene, config: DemoConfig) -> DemoResult<Self> {
        config.validate()?;
        let grid = VoxelGrid::from_bounds(&scene.world_bounds(), config.voxel.resolution)?;
        let (width, height) = backend.surface_size();

        let geometry = GeometryBuffers::upload(&mut backend, scene.mesh())?;
        let voxelizer = Voxelizer::init(
            &mut backend,
            &scene,
            &geometry,
            grid,
            config.voxel.voxelize_on_cpu,
        )?;
        let volume = voxelizer.srv();
        let cone_tracer = ConeTracer::init(&mut backend, &scene, &geometry, &volume, config.voxel.cone_trace)?;
        let visualizer = Visualizer::init(
            &mut backend,
            &volume,
            config.voxel.visualize_level,
            config.voxel.visualize_mode,
        )?;
        let depth = DepthTarget::new(&mut backend, width, height)?;

        scene.camera.set_lens(
            FIELD_OF_VIEW_DEGREES.to_radians(),
            width as f32 / height.max(1) as f32,
            NEAR_PLANE,
            FAR_PLANE,
        );
        let mut transforms = TransformSet::new(scene.transform.matrix());
        transforms.update_from_camera(&scene.camera);
        let controller = FirstPersonController::new()
            .with_speed(config.camera_speed)
            .with_sensitivity(config.mouse_sensitivity);

        log::info!(
            "Engine initialized: {}x{}, {}^3 volume",
            width,
            height,
            grid.resolution()
        );

        Ok(Self {
            backend,
            config,
            scene,
            controller,
            transforms,
            geometry,
            voxelizer,
            cone_tracer,
            visualizer,
            depth,
            render_mode: RenderMode::default(),
            width,
            height,
            elapsed: 0.0,
            frame_count: 0,
            minimized: false,
            released: false,
        })
    }

    /// Run one frame from an input snapshot.
    ///
    /// A lost surface is reconfigured and reported as [`FrameStatus::Dropped`];
    /// other backend errors are returned after the frame is closed.
    pub fn frame(&mut self, input: &FrameInput, dt: f32) -> BackendResult<FrameStatus> {
        if input.toggle_voxelize {
            self.render_mode = self.render_mode.toggle();
            log::debug!("Render mode: {:?}", self.render_mode);
        }
        self.controller.update(&mut self.scene.camera, input, dt);
        self.transforms.update_from_camera(&self.scene.camera);
        self.elapsed += dt.max(0.0);

        if self.minimized {
            return Ok(FrameStatus::Skipped);
        }

        let frame = match self.backend.begin_frame() {
            Ok(frame) => frame,
            Err(BackendError::SurfaceLost) => {
                log::warn!("Surface lost, reconfiguring {}x{}", self.width, self.height);
                self.backend.resize(self.width, self.height);
                return Ok(FrameStatus::Dropped);
            }
            Err(e) => return Err(e),
        };

        let encoded = self.encode(&frame);
        let presented = self.backend.end_frame();
        encoded?;
        presented?;
        self.frame_count += 1;

        if input.probe {
            self.probe();
        }
        Ok(FrameStatus::Presented)
    }

    fn encode(&mut self, frame: &FrameContext) -> BackendResult<()> {
        if frame.width != self.depth.width || frame.height != self.depth.height {
            self.rebuild_depth(frame.width, frame.height)?;
        }
        let targets = RenderTargets::new(frame.swapchain_view, self.depth.view, frame.width, frame.height);

        self.backend.begin_render_pass(&RenderPassDescriptor {
            label: Some("Clear".into()),
            color_attachments: vec![ColorAttachment {
                view: targets.color,
                resolve_target: None,
                load_op: LoadOp::Clear(self.config.clear_color),
                store_op: StoreOp::Store,
            }],
            depth_stencil_attachment: Some(DepthStencilAttachment {
                view: targets.depth,
                depth_load_op: LoadOp::Clear([1.0; 4]),
                depth_store_op: StoreOp::Store,
                depth_clear_value: 1.0,
            }),
        });
        targets.apply_viewport(&mut self.backend);
        self.backend.end_render_pass();

        if self.render_mode.voxelizes() {
            self.voxelizer.set_matrix(&self.transforms);
            self.voxelizer.render(&mut self.backend, self.elapsed)?;
            if self.config.visualize {
                self.visualizer.set_matrix(&self.transforms);
                self.visualizer.render(&mut self.backend, &targets);
            }
        }

        self.cone_tracer.set_matrix(&self.transforms);
        self.cone_tracer.render(&mut self.backend, &targets, self.elapsed);
        Ok(())
    }

    fn rebuild_depth(&mut self, width: u32, height: u32) -> BackendResult<()> {
        let depth = DepthTarget::new(&mut self.backend, width, height)?;
        self.depth.release(&mut self.backend);
        self.depth = depth;
        log::debug!("Depth target rebuilt at {}x{}", width, height);
        Ok(())
    }

    /// Trace the indirect light at the surface the camera looks at.
    ///
    /// Needs the CPU volume, so it only answers with CPU voxelization.
    pub fn probe(&self) -> Option<IndirectLight> {
        let Some(volume) = self.voxelizer.cpu_volume() else {
            log::info!("Indirect light probe needs CPU voxelization");
            return None;
        };
        let camera = &self.scene.camera;
        let max_distance = volume.grid().size() * 2.0;
        let Some((point, normal)) = volume.raycast(camera.position(), camera.forward(), max_distance) else {
            log::info!("Probe ray from {:?} hit no voxel", camera.position());
            return None;
        };
        let light = trace_indirect(volume, point, normal, &self.config.voxel.cone_trace);
        log::info!(
            "Indirect light at {:?}: radiance {:?}, occlusion {:.3}",
            point,
            light.radiance,
            light.occlusion
        );
        Some(light)
    }

    /// Follow the window size. A zero size pauses rendering until the next
    /// non-zero resize.
    pub fn resize(&mut self, width: u32, height: u32) -> BackendResult<()> {
        if width == 0 || height == 0 {
            if !self.minimized {
                log::debug!("Window minimized, rendering paused");
            }
            self.minimized = true;
            return Ok(());
        }
        self.minimized = false;
        self.backend.resize(width, height);
        let (width, height) = self.backend.surface_size();
        self.width = width;
        self.height = height;
        self.rebuild_depth(width, height)?;
        self.scene.camera.set_aspect(width as f32, height as f32);
        self.transforms.update_from_camera(&self.scene.camera);
        Ok(())
    }

    /// Free every GPU resource. Called from `Drop` when not done earlier.
    pub fn release(&mut self) {
        if std::mem::replace(&mut self.released, true) {
            return;
        }
        self.visualizer.release(&mut self.backend);
        self.cone_tracer.release(&mut self.backend);
        self.voxelizer.release(&mut self.backend);
        self.geometry.release(&mut self.backend);
        self.depth.release(&mut self.backend);
        log::info!("Engine released GPU resources after {} frames", self.frame_count);
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn scene(&self) -> &Scene {
        &self.scene
    }

    pub fn camera(&self) -> &Camera {
        &self.scene.camera
    }

    pub fn camera_mut(&mut self) -> &mut Camera {
        &mut self.scene.camera
    }

    pub fn render_mode(&self) -> RenderMode {
        self.render_mode
    }

    pub fn voxelizer(&self) -> &Voxelizer {
        &self.voxelizer
    }

    pub fn depth_target(&self) -> &DepthTarget {
        &self.depth
    }

    /// Current client size
    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn is_minimized(&self) -> bool {
        self.minimized
    }

    /// Number of presented frames
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }
}

impl<B: GraphicsBackend> Drop for Engine<B> {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::dummy::{DummyBackend, RecordedCommand};
    use crate::config::VoxelConfig;

    fn small_config() -> DemoConfig {
        DemoConfig {
            voxel: VoxelConfig {
                resolution: 16,
                visualize_level: 1,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn engine(config: DemoConfig) -> Engine<DummyBackend> {
        let scene = Scene::cornell_box().unwrap();
        Engine::new(DummyBackend::with_size(320, 240), scene, config).unwrap()
    }

    #[test]
    fn test_render_mode_toggle() {
        assert!(RenderMode::default().voxelizes());
        assert_eq!(RenderMode::Voxelize.toggle(), RenderMode::Cached);
        assert_eq!(RenderMode::Cached.toggle(), RenderMode::Voxelize);
    }

    #[test]
    fn test_lens_matches_surface() {
        let engine = engine(small_config());
        let projection = engine.camera().projection_matrix();
        // Square pixels: x scale is y scale over aspect
        let aspect = projection.y_axis.y / projection.x_axis.x;
        assert!((aspect - 320.0 / 240.0).abs() < 1e-4);
    }

    #[test]
    fn test_frame_orders_passes() {
        let mut engine = engine(small_config());
        engine.backend_mut().take_commands();
        let status = engine.frame(&FrameInput::new(), 1.0 / 60.0).unwrap();
        assert_eq!(status, FrameStatus::Presented);

        let labels: Vec<_> = engine
            .backend_mut()
            .take_commands()
            .into_iter()
            .filter_map(|c| match c {
                RecordedCommand::BeginRenderPass { label, .. } => label,
                RecordedCommand::BeginComputePass { label } => label,
                _ => None,
            })
            .collect();
        assert_eq!(
            labels,
            vec!["Clear", "Voxelize", "Voxel Resolve", "Voxel Mips", "Voxel Visualize", "Cone Trace"]
        );
    }

    #[test]
    fn test_toggle_is_edge_triggered() {
        let mut engine = engine(small_config());
        let mut input = FrameInput::new();
        input.toggle_voxelize = true;
        engine.frame(&input, 0.016).unwrap();
        assert_eq!(engine.render_mode(), RenderMode::Cached);

        input.reset_deltas();
        engine.frame(&input, 0.016).unwrap();
        assert_eq!(engine.render_mode(), RenderMode::Cached);
    }

    #[test]
    fn test_minimized_skips_rendering() {
        let mut engine = engine(small_config());
        engine.resize(0, 0).unwrap();
        engine.backend_mut().take_commands();
        let status = engine.frame(&FrameInput::new(), 0.016).unwrap();
        assert_eq!(status, FrameStatus::Skipped);
        assert!(engine.backend().commands().is_empty());

        engine.resize(640, 480).unwrap();
        assert!(!engine.is_minimized());
        assert_eq!(engine.depth_target().width, 640);
        assert_eq!(engine.frame(&FrameInput::new(), 0.016).unwrap(), FrameStatus::Presented);
    }

    #[test]
    fn test_probe_needs_cpu_volume() {
        let engine = engine(small_config());
        assert!(engine.probe().is_none());
    }

    #[test]
    fn test_release_is_idempotent() {
        let mut engine = engine(small_config());
        engine.release();
        engine.release();
        assert_eq!(engine.backend().live_buffer_count(), 0);
        assert_eq!(engine.backend().live_texture_count(), 0);
    }
}
