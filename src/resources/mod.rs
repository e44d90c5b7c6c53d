//! Resource management
//!
//! Scene geometry: triangle meshes, their bounding boxes and load-time
//! validation.

mod mesh;

pub use mesh::*;
