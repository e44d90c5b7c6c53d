//! Cornell box rendered with voxel cone traced global illumination
//!
//! Controls: WASD walk and strafe, Q/E up and down, drag with the left mouse
//! button to look around, `1` toggles voxelization, `P` logs the indirect
//! light under the screen center (with `--cpu`), Escape quits.

use clap::Parser;
use voxel_cone_tracing::window;
use voxel_cone_tracing::{DemoConfig, DemoResult, Scene, VisualizeMode, VoxelConfig, WgpuBackend};

/// Volume visualizer display for CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
enum CliVisualizeMode {
    /// Filtered radiance of the chosen level.
    #[default]
    Radiance,
    /// Averaged surface normals.
    Normal,
}

impl From<CliVisualizeMode> for VisualizeMode {
    fn from(cli: CliVisualizeMode) -> Self {
        match cli {
            CliVisualizeMode::Radiance => VisualizeMode::Radiance,
            CliVisualizeMode::Normal => VisualizeMode::Normal,
        }
    }
}

#[derive(Parser, Debug)]
#[command(
    name = "cornell_box",
    about = "Voxel cone tracing demo",
    long_about = "Voxelizes a Cornell box into a mip-mapped radiance volume and shades it \
        with indirect light gathered by cone tracing.\n\n\
        EXAMPLES:\n\
          # Smaller volume, normals of the finest level\n\
          ./cornell_box --resolution 64 --lod 0 --visualize normal\n\
        \n\
          # CPU voxelization with the indirect light probe on P\n\
          ./cornell_box --cpu --resolution 64",
    version
)]
struct Args {
    /// Voxels per axis, a power of two from 8 to 256.
    #[arg(long, default_value = "256")]
    resolution: u32,

    /// Initial window width in pixels.
    #[arg(long, default_value = "1280")]
    width: u32,

    /// Initial window height in pixels.
    #[arg(long, default_value = "720")]
    height: u32,

    /// Voxelize on the CPU and upload the volume.
    #[arg(long)]
    cpu: bool,

    /// Mip level drawn by the visualizer.
    #[arg(long, default_value = "2")]
    lod: u32,

    /// What the visualizer draws per voxel.
    #[arg(long, default_value = "radiance", value_enum)]
    visualize: CliVisualizeMode,

    /// Do not draw the voxel volume.
    #[arg(long)]
    no_visualize: bool,

    /// Disable vertical sync (may cause tearing).
    #[arg(long)]
    no_vsync: bool,

    /// Orbit the light around the vertical axis, in radians per second.
    #[arg(long, default_value = "0.0")]
    light_orbit: f32,
}

impl From<Args> for DemoConfig {
    fn from(args: Args) -> Self {
        DemoConfig {
            width: args.width,
            height: args.height,
            vsync: !args.no_vsync,
            visualize: !args.no_visualize,
            voxel: VoxelConfig {
                resolution: args.resolution,
                visualize_level: args.lod,
                visualize_mode: args.visualize.into(),
                voxelize_on_cpu: args.cpu,
                ..Default::default()
            },
            ..Default::default()
        }
    }
}

fn main() -> DemoResult<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let light_orbit = args.light_orbit;
    let config = DemoConfig::from(args);

    let mut scene = Scene::cornell_box()?;
    scene.light = scene.light.with_orbit(light_orbit);

    window::run::<WgpuBackend>(config, scene)
}
