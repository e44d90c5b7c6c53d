//! Scene management

mod camera;
mod camera_controller;
mod light;
mod transform;

pub use camera::*;
pub use camera_controller::*;
pub use light::*;
pub use transform::*;

use crate::resources::{Aabb, GeometryError, Mesh};
use glam::Vec3;

/// The scene: one static mesh, its bounds, a point light and the camera
#[derive(Debug, Clone)]
pub struct Scene {
    mesh: Mesh,
    bounds: Aabb,
    pub light: PointLight,
    pub transform: Transform,
    pub camera: Camera,
}

impl Scene {
    /// Build a scene around `mesh`, rejecting degenerate geometry
    pub fn new(mesh: Mesh, light: PointLight, camera: Camera) -> Result<Self, GeometryError> {
        let bounds = mesh.bounds()?;
        log::info!(
            "Scene '{}': {} vertices, {} triangles, bounds {:?}..{:?}",
            mesh.name,
            mesh.vertex_count(),
            mesh.triangle_count(),
            bounds.min,
            bounds.max
        );
        Ok(Self {
            mesh,
            bounds,
            light,
            transform: Transform::default(),
            camera,
        })
    }

    /// Cornell box lit by a warm light under the ceiling, viewed through the
    /// open side
    pub fn cornell_box() -> Result<Self, GeometryError> {
        let light = PointLight::new(Vec3::new(0.0, 0.8, 0.0), Vec3::new(1.0, 0.85, 0.7), 1.6, 3.5);
        let camera = Camera::new(Vec3::new(0.0, 0.0, 3.5), Vec3::ZERO);
        Self::new(Mesh::cornell_box(), light, camera)
    }

    pub fn mesh(&self) -> &Mesh {
        &self.mesh
    }

    /// Object-space bounds of the mesh
    pub fn bounds(&self) -> Aabb {
        self.bounds
    }

    /// Bounds of the mesh under the scene transform
    pub fn world_bounds(&self) -> Aabb {
        self.bounds.transformed(&self.transform.matrix())
    }
}
