//! Transforms

use glam::{Mat4, Quat, Vec3};

use super::Camera;

/// Position, rotation and scale of an object in 3D space
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    pub position: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            scale: Vec3::ONE,
        }
    }
}

impl Transform {
    /// Model matrix: scale, then rotate, then translate
    pub fn matrix(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(self.scale, self.rotation, self.position)
    }
}

/// Matrices shared by every pass of a frame.
///
/// The inverse-transpose always matches the world matrix: the only way to
/// change the world matrix is [`TransformSet::set_world`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransformSet {
    world: Mat4,
    world_inv_transpose: Mat4,
    pub view: Mat4,
    pub projection: Mat4,
    pub camera_position: Vec3,
}

impl Default for TransformSet {
    fn default() -> Self {
        Self {
            world: Mat4::IDENTITY,
            world_inv_transpose: Mat4::IDENTITY,
            view: Mat4::IDENTITY,
            projection: Mat4::IDENTITY,
            camera_position: Vec3::ZERO,
        }
    }
}

impl TransformSet {
    pub fn new(world: Mat4) -> Self {
        let mut set = Self::default();
        set.set_world(world);
        set
    }

    pub fn set_world(&mut self, world: Mat4) {
        self.world = world;
        self.world_inv_transpose = world.inverse().transpose();
    }

    pub fn world(&self) -> Mat4 {
        self.world
    }

    pub fn world_inv_transpose(&self) -> Mat4 {
        self.world_inv_transpose
    }

    /// Copy view, projection and position from the camera
    pub fn update_from_camera(&mut self, camera: &Camera) {
        self.view = camera.view_matrix();
        self.projection = camera.projection_matrix();
        self.camera_position = camera.position();
    }

    pub fn view_projection(&self) -> Mat4 {
        self.projection * self.view
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inverse_transpose_follows_world() {
        let transform = Transform {
            position: Vec3::new(1.0, 2.0, 3.0),
            scale: Vec3::new(2.0, 1.0, 0.5),
            ..Default::default()
        };
        let mut set = TransformSet::default();
        set.set_world(transform.matrix());
        // Non-uniform scale: normals scale by the reciprocal
        let expected = Mat4::from_scale(Vec3::new(0.5, 1.0, 2.0));
        let normal_part = Mat4::from_mat3(glam::Mat3::from_mat4(set.world_inv_transpose()));
        assert!(normal_part.abs_diff_eq(expected, 1e-5));

        set.set_world(Mat4::IDENTITY);
        assert_eq!(set.world_inv_transpose(), Mat4::IDENTITY);
    }

    #[test]
    fn test_update_from_camera() {
        let camera = Camera::new(Vec3::new(0.0, 0.0, 3.5), Vec3::ZERO);
        let mut set = TransformSet::new(Mat4::IDENTITY);
        set.update_from_camera(&camera);
        assert_eq!(set.camera_position, Vec3::new(0.0, 0.0, 3.5));
        assert_eq!(set.view_projection(), camera.view_projection_matrix());
    }

    #[test]
    fn test_matrix_rotates_then_translates() {
        let transform = Transform {
            position: Vec3::new(0.0, 1.0, 0.0),
            rotation: Quat::from_rotation_y(std::f32::consts::FRAC_PI_2),
            ..Default::default()
        };
        let x = transform.matrix().transform_point3(Vec3::X);
        assert!((x - Vec3::new(0.0, 1.0, -1.0)).length() < 1e-5);
    }
}
