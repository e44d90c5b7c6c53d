//! Common utilities for the orchestrator integration tests.

#![allow(dead_code)]

use voxel_cone_tracing::backend::dummy::{DummyBackend, RecordedCommand};
use voxel_cone_tracing::backend::types::Viewport;
use voxel_cone_tracing::{DemoConfig, Engine, Scene, VoxelConfig};

/// Config with a small volume so tests stay fast
pub fn small_config(resolution: u32, on_cpu: bool) -> DemoConfig {
    DemoConfig {
        voxel: VoxelConfig {
            resolution,
            visualize_level: 1,
            voxelize_on_cpu: on_cpu,
            ..Default::default()
        },
        ..Default::default()
    }
}

/// Engine on the Cornell box, rendering into a `width x height` surface
pub fn cornell_engine(config: DemoConfig, width: u32, height: u32) -> Engine<DummyBackend> {
    let scene = Scene::cornell_box().expect("cornell box is valid");
    Engine::new(DummyBackend::with_size(width, height), scene, config).expect("engine init")
}

/// Labels of every render and compute pass, in recording order
pub fn pass_labels(commands: &[RecordedCommand]) -> Vec<String> {
    commands
        .iter()
        .filter_map(|c| match c {
            RecordedCommand::BeginRenderPass { label, .. } => label.clone(),
            RecordedCommand::BeginComputePass { label } => label.clone(),
            _ => None,
        })
        .collect()
}

/// Viewport bound when each draw of each render pass was recorded, keyed by
/// the pass label
pub fn draw_viewports(commands: &[RecordedCommand]) -> Vec<(String, Option<Viewport>)> {
    let mut pass = String::new();
    let mut viewport = None;
    let mut draws = Vec::new();
    for command in commands {
        match command {
            RecordedCommand::BeginRenderPass { label, .. } => {
                pass = label.clone().unwrap_or_default();
                viewport = None;
            }
            RecordedCommand::SetViewport(v) => viewport = Some(*v),
            RecordedCommand::Draw { .. } | RecordedCommand::DrawIndexed { .. } => {
                draws.push((pass.clone(), viewport));
            }
            _ => {}
        }
    }
    draws
}
