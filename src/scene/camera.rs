//! Camera system

use glam::{Mat3, Mat4, Vec3};

/// Perspective lens. Angles in radians.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Lens {
    pub fov_y: f32,
    pub aspect: f32,
    pub near: f32,
    pub far: f32,
}

impl Default for Lens {
    fn default() -> Self {
        Self {
            fov_y: std::f32::consts::FRAC_PI_4,
            aspect: 16.0 / 9.0,
            near: 0.1,
            far: 1000.0,
        }
    }
}

impl Lens {
    pub fn matrix(&self) -> Mat4 {
        Mat4::perspective_rh(self.fov_y, self.aspect, self.near, self.far)
    }
}

/// First-person camera with an explicit orthonormal basis.
///
/// Movement and rotation edit the basis directly; the view matrix is rebuilt
/// from it once per frame by [`Camera::update_view_matrix`].
#[derive(Debug, Clone)]
pub struct Camera {
    position: Vec3,
    right: Vec3,
    up: Vec3,
    look: Vec3,
    view: Mat4,
    lens: Lens,
}

impl Default for Camera {
    fn default() -> Self {
        Self::new(Vec3::new(0.0, 0.0, 5.0), Vec3::ZERO)
    }
}

impl Camera {
    /// Camera at `position` looking at `target`, world Y up
    pub fn new(position: Vec3, target: Vec3) -> Self {
        let look = (target - position).try_normalize().unwrap_or(Vec3::NEG_Z);
        let right = look.cross(Vec3::Y).try_normalize().unwrap_or(Vec3::X);
        let up = right.cross(look);
        let mut camera = Self {
            position,
            right,
            up,
            look,
            view: Mat4::IDENTITY,
            lens: Lens::default(),
        };
        camera.update_view_matrix();
        camera
    }

    pub fn position(&self) -> Vec3 {
        self.position
    }

    pub fn set_position(&mut self, position: Vec3) {
        self.position = position;
    }

    /// Get the forward direction
    pub fn forward(&self) -> Vec3 {
        self.look
    }

    /// Get the right direction
    pub fn right(&self) -> Vec3 {
        self.right
    }

    pub fn up(&self) -> Vec3 {
        self.up
    }

    /// Set the perspective lens
    pub fn set_lens(&mut self, fov_y: f32, aspect: f32, near: f32, far: f32) {
        self.lens = Lens {
            fov_y,
            aspect,
            near,
            far,
        };
    }

    pub fn lens(&self) -> &Lens {
        &self.lens
    }

    /// Aspect ratio from a surface size. A zero height keeps the current one.
    pub fn set_aspect(&mut self, width: f32, height: f32) {
        if height > 0.0 {
            self.lens.aspect = width / height;
        }
    }

    /// Move along the view direction
    pub fn walk(&mut self, distance: f32) {
        self.position += self.look * distance;
    }

    /// Move sideways along the right vector
    pub fn strafe(&mut self, distance: f32) {
        self.position += self.right * distance;
    }

    /// Move along world up
    pub fn fly_vertical(&mut self, distance: f32) {
        self.position += Vec3::Y * distance;
    }

    /// Rotate up and look around the right vector. Positive angles look up.
    pub fn pitch(&mut self, angle: f32) {
        let rotation = Mat3::from_axis_angle(self.right, angle);
        self.up = rotation * self.up;
        self.look = rotation * self.look;
    }

    /// Rotate the whole basis around world Y. Positive angles turn left.
    pub fn rotate_y(&mut self, angle: f32) {
        let rotation = Mat3::from_rotation_y(angle);
        self.right = rotation * self.right;
        self.up = rotation * self.up;
        self.look = rotation * self.look;
    }

    /// Re-orthonormalize the basis and rebuild the view matrix
    pub fn update_view_matrix(&mut self) {
        self.look = self.look.normalize();
        self.up = self.right.cross(self.look).normalize();
        self.right = self.look.cross(self.up);
        self.view = Mat4::look_to_rh(self.position, self.look, self.up);
    }

    /// Get the view matrix
    pub fn view_matrix(&self) -> Mat4 {
        self.view
    }

    /// Get the projection matrix
    pub fn projection_matrix(&self) -> Mat4 {
        self.lens.matrix()
    }

    /// Get combined view-projection matrix
    pub fn view_projection_matrix(&self) -> Mat4 {
        self.projection_matrix() * self.view_matrix()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_orthonormal(camera: &Camera) {
        assert!((camera.forward().length() - 1.0).abs() < 1e-5);
        assert!((camera.up().length() - 1.0).abs() < 1e-5);
        assert!((camera.right().length() - 1.0).abs() < 1e-5);
        assert!(camera.forward().dot(camera.up()).abs() < 1e-5);
        assert!(camera.forward().dot(camera.right()).abs() < 1e-5);
    }

    #[test]
    fn test_new_looks_at_target() {
        let camera = Camera::new(Vec3::new(0.0, 0.0, 3.0), Vec3::ZERO);
        assert_eq!(camera.forward(), Vec3::NEG_Z);
        assert_eq!(camera.right(), Vec3::X);
        assert_eq!(camera.up(), Vec3::Y);
        let origin = camera.view_matrix().transform_point3(Vec3::ZERO);
        assert!((origin - Vec3::new(0.0, 0.0, -3.0)).length() < 1e-5);
    }

    #[test]
    fn test_walk_strafe_fly() {
        let mut camera = Camera::new(Vec3::ZERO, Vec3::NEG_Z);
        camera.walk(2.0);
        camera.strafe(1.0);
        camera.fly_vertical(-0.5);
        assert_eq!(camera.position(), Vec3::new(1.0, -0.5, -2.0));
    }

    #[test]
    fn test_pitch_looks_up() {
        let mut camera = Camera::new(Vec3::ZERO, Vec3::NEG_Z);
        camera.pitch(0.3);
        camera.update_view_matrix();
        assert!(camera.forward().y > 0.0);
        assert_orthonormal(&camera);
    }

    #[test]
    fn test_rotate_y_full_turn() {
        let mut camera = Camera::new(Vec3::ZERO, Vec3::NEG_Z);
        camera.rotate_y(0.5);
        camera.update_view_matrix();
        assert!(camera.forward().x < 0.0, "positive angle turns left");
        for _ in 0..3 {
            camera.rotate_y(std::f32::consts::FRAC_PI_2);
        }
        camera.rotate_y(std::f32::consts::FRAC_PI_2 - 0.5);
        camera.update_view_matrix();
        assert!((camera.forward() - Vec3::NEG_Z).length() < 1e-4);
        assert_orthonormal(&camera);
    }

    #[test]
    fn test_set_lens_and_aspect() {
        let mut camera = Camera::default();
        camera.set_lens(std::f32::consts::FRAC_PI_4, 1.0, 1.0, 1000.0);
        camera.set_aspect(1280.0, 720.0);
        assert!((camera.lens().aspect - 1280.0 / 720.0).abs() < 1e-6);
        assert_eq!(camera.lens().near, 1.0);
        assert_eq!(camera.projection_matrix(), camera.lens().matrix());

        // Zero height (minimized window) keeps the previous aspect
        camera.set_aspect(0.0, 0.0);
        assert!((camera.lens().aspect - 1280.0 / 720.0).abs() < 1e-6);
        assert!(camera.projection_matrix().is_finite());
    }
}
