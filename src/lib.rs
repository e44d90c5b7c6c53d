//! Voxel Cone Tracing - real-time global illumination on a voxelized scene
//!
//! The scene is voxelized into a mip-mapped 3D radiance volume, then every
//! visible fragment gathers indirect light by marching a few cones through
//! that volume.
//!
//! # Features
//! - GPU voxelization by dominant-axis rasterization with atomic averaging
//! - CPU reference voxelizer and cone tracer, usable as a fallback
//! - Pre-filtered volume mips built by compute passes
//! - Volume visualizer for radiance and normals at any level
//! - wgpu backend, plus a recording backend for running without a GPU

pub mod backend;
pub mod config;
pub mod engine;
pub mod error;
pub mod pipeline;
pub mod resources;
pub mod scene;
pub mod voxel;
pub mod window;

pub use config::{DemoConfig, VisualizeMode, VoxelConfig};
pub use engine::{Engine, FrameStatus, RenderMode};
pub use error::{ConfigError, DemoError, DemoResult};
pub use scene::{FrameInput, Scene};

// Re-export wgpu backend for direct access
pub use backend::wgpu_backend::WgpuBackend;
