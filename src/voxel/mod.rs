//! CPU side of the voxel pipeline
//!
//! [`VoxelGrid`] is the world-to-volume mapping shared with the GPU passes.
//! [`VoxelVolume`], the rasterizer and the cone tracer form a reference
//! implementation of what the shaders do. It backs the CPU voxelization
//! fallback and the indirect light probe.

mod cone;
mod grid;
mod rasterize;
mod volume;

pub use cone::*;
pub use grid::*;
pub use rasterize::*;
pub use volume::*;

use thiserror::Error;

/// Errors raised while setting up a voxel volume
#[derive(Error, Debug, Clone, PartialEq)]
pub enum VoxelError {
    #[error("Voxel resolution must be a power of two between {min} and {max}, got {value}")]
    InvalidResolution { value: u32, min: u32, max: u32 },
    #[error("Cannot build a voxel grid around a bounding box with extents {0:?}")]
    DegenerateBounds(glam::Vec3),
}
