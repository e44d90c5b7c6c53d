//! Light types for the scene

use glam::{Vec3, Vec4};

/// Point light with a smooth distance falloff
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointLight {
    pub position: Vec3,
    pub color: Vec3,
    pub intensity: f32,
    /// Distance at which the light fades to zero
    pub radius: f32,
    /// Constant term added to every lit surface
    pub ambient: f32,
    /// Radians per second around the vertical axis through the origin. Zero
    /// keeps the light still.
    pub orbit_speed: f32,
}

impl Default for PointLight {
    fn default() -> Self {
        Self {
            position: Vec3::new(0.0, 0.9, 0.0),
            color: Vec3::new(1.0, 0.9, 0.75),
            intensity: 1.5,
            radius: 4.0,
            ambient: 0.05,
            orbit_speed: 0.0,
        }
    }
}

impl PointLight {
    pub fn new(position: Vec3, color: Vec3, intensity: f32, radius: f32) -> Self {
        Self {
            position,
            color,
            intensity,
            radius,
            ..Default::default()
        }
    }

    pub fn with_orbit(mut self, radians_per_second: f32) -> Self {
        self.orbit_speed = radians_per_second;
        self
    }

    /// Light position at `time_seconds`
    pub fn position_at(&self, time_seconds: f32) -> Vec3 {
        if self.orbit_speed == 0.0 {
            return self.position;
        }
        let (sin, cos) = (self.orbit_speed * time_seconds).sin_cos();
        let p = self.position;
        Vec3::new(p.x * cos - p.z * sin, p.y, p.x * sin + p.z * cos)
    }

    /// `(1 - (d / radius)^2)^2`, zero beyond the radius
    pub fn attenuation(&self, distance: f32) -> f32 {
        if self.radius <= 0.0 {
            return 1.0;
        }
        let x = (distance / self.radius).min(1.0);
        let falloff = 1.0 - x * x;
        falloff * falloff
    }

    /// Direct diffuse shading plus ambient, lit from `light_position`
    pub fn shade(&self, light_position: Vec3, position: Vec3, normal: Vec3, albedo: Vec3) -> Vec3 {
        self.shade_with_ambient(self.ambient, light_position, position, normal, albedo)
    }

    /// [`PointLight::shade`] with the ambient term replaced
    pub fn shade_with_ambient(
        &self,
        ambient: f32,
        light_position: Vec3,
        position: Vec3,
        normal: Vec3,
        albedo: Vec3,
    ) -> Vec3 {
        let to_light = light_position - position;
        let distance = to_light.length();
        let n_dot_l = if distance > f32::EPSILON {
            normal.dot(to_light / distance).max(0.0)
        } else {
            0.0
        };
        let direct = self.color * self.intensity * n_dot_l * self.attenuation(distance);
        albedo * (Vec3::splat(ambient) + direct)
    }

    /// Shader layout: `(position, intensity)` and `(color, ambient)`
    pub fn gpu_data(&self, time_seconds: f32) -> [Vec4; 2] {
        [
            self.position_at(time_seconds).extend(self.intensity),
            self.color.extend(self.ambient),
        ]
    }
}
