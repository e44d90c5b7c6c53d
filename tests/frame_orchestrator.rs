//! Frame orchestrator integration tests.
//!
//! The whole engine runs on the recording `DummyBackend`, so every test can
//! inspect the command stream and the uploaded volume contents.
//!
//! # Test Categories
//!
//! - **Frame Structure**: pass order, viewport restore, visualizer skipping
//! - **Stale Volume**: the cone tracer keeps the last volume when voxelization is off
//! - **Resilience**: surface loss, minimize, degenerate geometry
//! - **Lifetime**: deterministic release of GPU resources

mod common;

use common::{cornell_engine, draw_viewports, pass_labels, small_config};
use glam::{Vec3, Vec4};
use rstest::rstest;
use voxel_cone_tracing::backend::dummy::RecordedCommand;
use voxel_cone_tracing::backend::types::Viewport;
use voxel_cone_tracing::pipeline::visualize_pass::VisualizeUniforms;
use voxel_cone_tracing::resources::{GeometryError, Mesh};
use voxel_cone_tracing::scene::{Camera, PointLight};
use voxel_cone_tracing::{FrameInput, FrameStatus, RenderMode, Scene};

const DT: f32 = 1.0 / 60.0;

fn toggle() -> FrameInput {
    FrameInput {
        toggle_voxelize: true,
        ..Default::default()
    }
}

// ============================================================================
// Frame Structure
// ============================================================================

/// Every pass drawing to the window sees the full client viewport, even
/// though voxelization rasterizes into a `resolution x resolution` one.
#[rstest]
#[case::landscape(320, 240)]
#[case::hd(1280, 720)]
#[case::odd(17, 9)]
fn test_viewport_restored_after_voxelization(#[case] width: u32, #[case] height: u32) {
    let mut engine = cornell_engine(small_config(16, false), width, height);
    engine.backend_mut().take_commands();
    engine.frame(&FrameInput::new(), DT).unwrap();
    let commands = engine.backend_mut().take_commands();

    let draws = draw_viewports(&commands);
    let full = Viewport::from_size(width, height);
    for (pass, viewport) in &draws {
        match pass.as_str() {
            "Voxelize" => assert_eq!(*viewport, Some(Viewport::from_size(16, 16))),
            _ => assert_eq!(*viewport, Some(full), "pass {}", pass),
        }
    }
    assert!(draws.iter().any(|(pass, _)| pass == "Cone Trace"));
}

#[test]
fn test_frame_pass_order() {
    let mut engine = cornell_engine(small_config(16, false), 320, 240);
    engine.backend_mut().take_commands();
    engine.frame(&FrameInput::new(), DT).unwrap();
    let commands = engine.backend_mut().take_commands();

    assert_eq!(
        pass_labels(&commands),
        vec!["Clear", "Voxelize", "Voxel Resolve", "Voxel Mips", "Voxel Visualize", "Cone Trace"]
    );
    assert_eq!(commands.first(), Some(&RecordedCommand::BeginFrame { width: 320, height: 240 }));
    assert_eq!(commands.last(), Some(&RecordedCommand::EndFrame));
}

/// Skipping the visualizer removes exactly its own commands.
#[test]
fn test_visualizer_skip_changes_nothing_else() {
    let visualize_len = std::mem::size_of::<VisualizeUniforms>();
    let strip = |commands: Vec<RecordedCommand>| -> Vec<RecordedCommand> {
        let mut kept = Vec::new();
        let mut in_visualize = false;
        for command in commands {
            match &command {
                RecordedCommand::BeginRenderPass { label, .. }
                    if label.as_deref() == Some("Voxel Visualize") =>
                {
                    in_visualize = true;
                }
                RecordedCommand::EndRenderPass if in_visualize => in_visualize = false,
                RecordedCommand::WriteBuffer { len, .. } if *len == visualize_len => {}
                _ if in_visualize => {}
                _ => kept.push(command),
            }
        }
        kept
    };

    let mut with = cornell_engine(small_config(16, false), 320, 240);
    let mut config = small_config(16, false);
    config.visualize = false;
    let mut without = cornell_engine(config, 320, 240);

    with.backend_mut().take_commands();
    without.backend_mut().take_commands();
    with.frame(&FrameInput::new(), DT).unwrap();
    without.frame(&FrameInput::new(), DT).unwrap();

    let with_commands = with.backend_mut().take_commands();
    let without_commands = without.backend_mut().take_commands();
    assert!(!pass_labels(&without_commands).contains(&"Voxel Visualize".to_string()));
    assert_eq!(strip(with_commands), without_commands);
}

#[rstest]
#[case::smallest(8, 4)]
#[case::small(16, 5)]
#[case::medium(32, 6)]
fn test_resolution_drives_mip_chain(#[case] resolution: u32, #[case] mips: u32) {
    let mut engine = cornell_engine(small_config(resolution, false), 64, 64);
    assert_eq!(engine.voxelizer().res(), resolution);
    assert_eq!(engine.voxelizer().srv().mip_count(), mips);

    engine.backend_mut().take_commands();
    engine.frame(&FrameInput::new(), DT).unwrap();
    let dispatches = engine
        .backend_mut()
        .take_commands()
        .iter()
        .filter(|c| matches!(c, RecordedCommand::Dispatch { .. }))
        .count();
    // One resolve plus one per filtered level
    assert_eq!(dispatches as u32, mips);

    let grid = engine.voxelizer().grid();
    let bounds = engine.scene().world_bounds();
    let expected = 2.0 * bounds.max_extent() / resolution as f32;
    assert!((grid.voxel_size() - expected).abs() < 1e-5);
}

// ============================================================================
// Stale Volume
// ============================================================================

/// With voxelization toggled off the GPU volume is never written again.
#[test]
fn test_toggle_off_stops_voxelization() {
    let mut engine = cornell_engine(small_config(16, false), 320, 240);
    engine.frame(&FrameInput::new(), DT).unwrap();
    assert_eq!(engine.voxelizer().build_count(), 1);

    engine.backend_mut().take_commands();
    engine.frame(&toggle(), DT).unwrap();
    for _ in 0..3 {
        engine.frame(&FrameInput::new(), DT).unwrap();
    }
    assert_eq!(engine.render_mode(), RenderMode::Cached);
    assert_eq!(engine.voxelizer().build_count(), 1);

    let labels = pass_labels(&engine.backend_mut().take_commands());
    assert_eq!(labels.iter().filter(|l| *l == "Cone Trace").count(), 4);
    assert!(labels.iter().all(|l| l == "Clear" || l == "Cone Trace"));
}

/// The uploaded CPU volume keeps its contents while the light moves, as long
/// as voxelization stays off.
#[test]
fn test_stale_volume_contents_unchanged() {
    let mut config = small_config(16, true);
    config.visualize = false;
    let scene = {
        let mut scene = Scene::cornell_box().unwrap();
        scene.light.position = Vec3::new(0.5, 0.8, 0.0);
        scene.light = scene.light.with_orbit(1.0);
        scene
    };
    let backend = voxel_cone_tracing::backend::dummy::DummyBackend::with_size(128, 128);
    let mut engine = voxel_cone_tracing::Engine::new(backend, scene, config).unwrap();

    engine.frame(&FrameInput::new(), DT).unwrap();
    let texture = engine.voxelizer().radiance_texture();
    let before = engine.backend().texture_data(texture, 0).unwrap().to_vec();

    engine.frame(&toggle(), 0.5).unwrap();
    for _ in 0..3 {
        engine.frame(&FrameInput::new(), 0.5).unwrap();
    }
    assert_eq!(engine.backend().texture_data(texture, 0).unwrap(), before.as_slice());
    assert_eq!(engine.voxelizer().build_count(), 1);

    // Turning it back on picks up the moved light
    engine.frame(&toggle(), 0.5).unwrap();
    assert_eq!(engine.voxelizer().build_count(), 2);
    assert_ne!(engine.backend().texture_data(texture, 0).unwrap(), before.as_slice());
}

#[test]
fn test_probe_reads_cpu_volume() {
    let mut engine = cornell_engine(small_config(32, true), 128, 128);
    engine.frame(&FrameInput::new(), DT).unwrap();
    engine.camera_mut().set_position(Vec3::new(0.0, 0.0, 0.9));
    engine.camera_mut().update_view_matrix();

    let light = engine.probe().expect("probe ray hits the box");
    assert!(light.radiance.is_finite());
    assert!(light.radiance.cmpge(Vec3::ZERO).all());
    assert!((0.0..=1.0).contains(&light.occlusion));
}

// ============================================================================
// Resilience
// ============================================================================

#[test]
fn test_surface_loss_drops_one_frame() {
    let mut engine = cornell_engine(small_config(8, false), 320, 240);
    engine.backend_mut().lose_surface_once();
    engine.backend_mut().take_commands();

    assert_eq!(engine.frame(&FrameInput::new(), DT).unwrap(), FrameStatus::Dropped);
    assert!(engine.backend().commands().is_empty());
    assert_eq!(engine.frame_count(), 0);

    assert_eq!(engine.frame(&FrameInput::new(), DT).unwrap(), FrameStatus::Presented);
    assert_eq!(engine.frame_count(), 1);
}

#[test]
fn test_resize_rebuilds_depth_and_viewport() {
    let mut engine = cornell_engine(small_config(8, false), 320, 240);
    engine.resize(800, 600).unwrap();
    assert_eq!(engine.size(), (800, 600));
    assert_eq!(engine.depth_target().width, 800);

    engine.backend_mut().take_commands();
    engine.frame(&FrameInput::new(), DT).unwrap();
    let draws = draw_viewports(&engine.backend_mut().take_commands());
    let cone = draws.iter().find(|(pass, _)| pass == "Cone Trace").unwrap();
    assert_eq!(cone.1, Some(Viewport::from_size(800, 600)));
}

#[rstest]
#[case::empty(Mesh::new("empty"))]
#[case::incomplete({
    let mut mesh = Mesh::cube(1.0, Vec4::ONE);
    mesh.indices.pop();
    mesh
})]
#[case::out_of_range({
    let mut mesh = Mesh::cube(1.0, Vec4::ONE);
    mesh.indices[0] = 1000;
    mesh
})]
#[case::flat(Mesh::quad(
    "flat",
    [Vec3::ZERO, Vec3::ZERO, Vec3::ZERO, Vec3::ZERO],
    Vec4::ONE,
))]
fn test_degenerate_geometry_rejected(#[case] mesh: Mesh) {
    let result = Scene::new(mesh, PointLight::default(), Camera::default());
    assert!(matches!(
        result,
        Err(GeometryError::Empty(_)
            | GeometryError::IncompleteTriangle { .. }
            | GeometryError::IndexOutOfRange { .. }
            | GeometryError::ZeroExtent(_))
    ));
}

// ============================================================================
// Lifetime
// ============================================================================

#[rstest]
#[case::gpu(false)]
#[case::cpu(true)]
fn test_release_frees_every_resource(#[case] on_cpu: bool) {
    let mut engine = cornell_engine(small_config(8, on_cpu), 64, 64);
    engine.frame(&FrameInput::new(), DT).unwrap();
    engine.resize(32, 32).unwrap();
    assert!(engine.backend().live_buffer_count() > 0);

    engine.release();
    assert_eq!(engine.backend().live_buffer_count(), 0);
    assert_eq!(engine.backend().live_texture_count(), 0);
}
