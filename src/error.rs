//! Crate-level error types

use crate::backend::BackendError;
use crate::resources::GeometryError;
use crate::voxel::VoxelError;
use thiserror::Error;

/// Invalid demo configuration
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error(transparent)]
    Voxel(#[from] VoxelError),
    #[error("Visualize level {level} exceeds the {mip_count} mip levels of a {resolution}^3 volume")]
    VisualizeLevel {
        level: u32,
        resolution: u32,
        mip_count: u32,
    },
    #[error("Window size must be non-zero, got {width}x{height}")]
    WindowSize { width: u32, height: u32 },
    #[error("Cone aperture must lie in (0, 90) degrees, got {0} degrees")]
    Aperture(f32),
    #[error("{name} must be positive and finite, got {value}")]
    NonPositive { name: &'static str, value: f32 },
}

/// Any error the demo can fail with
#[derive(Error, Debug)]
pub enum DemoError {
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error(transparent)]
    Geometry(#[from] GeometryError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Voxel(#[from] VoxelError),
    #[error("Event loop error: {0}")]
    EventLoop(#[from] winit::error::EventLoopError),
    #[error("Failed to create window: {0}")]
    Window(#[from] winit::error::OsError),
}

pub type DemoResult<T> = Result<T, DemoError>;
