//! Cone tracing through the pre-filtered volume
//!
//! A cone marches from a surface point and samples coarser mip levels as its
//! footprint widens: at distance `d` the diameter is `2 * tan(aperture) * d`
//! and the level is `log2(diameter / voxel_size)`. Samples are composited
//! front to back until the cone is saturated or leaves the volume.

use super::VoxelVolume;
use crate::scene::PointLight;
use glam::Vec3;
use std::f32::consts::TAU;

/// Number of cones gathered per surface point
pub const CONE_COUNT: usize = 6;

/// Weight of the cone along the normal
pub const CENTER_CONE_WEIGHT: f32 = 0.25;
/// Weight of each of the five cones tilted 60 degrees off the normal
pub const RING_CONE_WEIGHT: f32 = 0.15;
/// Cosine of the tilt of the ring cones
pub const RING_CONE_COS: f32 = 0.5;

/// Cone tracing parameters shared by the CPU tracer and the shaders
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConeTraceSettings {
    /// Cone half-angle in radians
    pub aperture: f32,
    /// Longest march, in units of the volume edge length
    pub max_distance: f32,
    /// Step length as a fraction of the current cone diameter
    pub step_scale: f32,
    /// Offset of the cone origin along the normal, in voxels
    pub start_offset: f32,
    /// Accumulated opacity at which a cone stops
    pub opacity_cutoff: f32,
    /// Multiplier applied to the gathered indirect light
    pub indirect_strength: f32,
}

impl Default for ConeTraceSettings {
    fn default() -> Self {
        Self {
            aperture: 30f32.to_radians(),
            max_distance: 1.0,
            step_scale: 0.5,
            start_offset: 1.5,
            opacity_cutoff: 0.95,
            indirect_strength: 1.0,
        }
    }
}

/// One cone of the gather set
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Cone {
    pub direction: Vec3,
    pub weight: f32,
}

/// Result of marching a single cone
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ConeSample {
    pub radiance: Vec3,
    pub opacity: f32,
}

/// Indirect light gathered over the hemisphere
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct IndirectLight {
    pub radiance: Vec3,
    /// Weighted opacity of all cones, 0 = fully open, 1 = fully occluded
    pub occlusion: f32,
}

impl IndirectLight {
    /// Final surface color: point light shading with the ambient term scaled
    /// by the open part of the hemisphere, plus the gathered bounce light
    pub fn shade(&self, light: &PointLight, light_position: Vec3, position: Vec3, normal: Vec3, albedo: Vec3) -> Vec3 {
        let ambient = light.ambient * (1.0 - self.occlusion);
        light.shade_with_ambient(ambient, light_position, position, normal, albedo) + albedo * self.radiance
    }
}

/// Tangent and bitangent completing `normal` to an orthonormal basis
pub fn orthonormal_basis(normal: Vec3) -> (Vec3, Vec3) {
    let up = if normal.y.abs() < 0.9 { Vec3::Y } else { Vec3::X };
    let tangent = normal.cross(up).normalize();
    let bitangent = tangent.cross(normal).normalize();
    (tangent, bitangent)
}

/// The gather set: one cone along `normal` and five at 60 degrees around it
pub fn hemisphere_cones(normal: Vec3) -> [Cone; CONE_COUNT] {
    let (tangent, bitangent) = orthonormal_basis(normal);
    let sin_tilt = (1.0 - RING_CONE_COS * RING_CONE_COS).sqrt();
    let mut cones = [Cone {
        direction: normal,
        weight: CENTER_CONE_WEIGHT,
    }; CONE_COUNT];
    for (i, cone) in cones.iter_mut().skip(1).enumerate() {
        let angle = i as f32 / (CONE_COUNT - 1) as f32 * TAU;
        let direction = normal * RING_CONE_COS
            + tangent * (angle.cos() * sin_tilt)
            + bitangent * (angle.sin() * sin_tilt);
        *cone = Cone {
            direction: direction.normalize(),
            weight: RING_CONE_WEIGHT,
        };
    }
    cones
}

/// March one cone from `origin` along `direction`.
///
/// Leaving the volume ends the march; samples outside it contribute nothing.
pub fn trace_cone(
    volume: &VoxelVolume,
    origin: Vec3,
    direction: Vec3,
    settings: &ConeTraceSettings,
) -> ConeSample {
    let Some(direction) = direction.try_normalize() else {
        return ConeSample::default();
    };
    if !origin.is_finite() {
        return ConeSample::default();
    }

    let grid = volume.grid();
    let voxel = grid.voxel_size();
    let tan_aperture = settings.aperture.tan();
    let max_distance = settings.max_distance * grid.size();
    let step_scale = settings.step_scale.max(0.05);

    let mut radiance = Vec3::ZERO;
    let mut alpha = 0.0f32;
    let mut dist = voxel;
    while dist < max_distance && alpha < settings.opacity_cutoff {
        let uvw = grid.world_to_uvw(origin + direction * dist);
        if uvw.cmplt(Vec3::ZERO).any() || uvw.cmpgt(Vec3::ONE).any() {
            break;
        }
        let diameter = (2.0 * tan_aperture * dist).max(voxel);
        let lod = (diameter / voxel).log2();
        let sample = volume.sample(uvw, lod);

        // Premultiplied front-to-back compositing
        radiance += sample.truncate() * (1.0 - alpha);
        alpha += sample.w * (1.0 - alpha);

        dist += diameter * step_scale;
    }

    ConeSample {
        radiance,
        opacity: alpha.clamp(0.0, 1.0),
    }
}

/// Gather indirect light at a surface point.
///
/// Each cone's result is weighted by its gather weight times the cosine
/// against the normal.
pub fn trace_indirect(
    volume: &VoxelVolume,
    position: Vec3,
    normal: Vec3,
    settings: &ConeTraceSettings,
) -> IndirectLight {
    let Some(normal) = normal.try_normalize() else {
        return IndirectLight::default();
    };
    let origin = position + normal * volume.grid().voxel_size() * settings.start_offset;

    let mut radiance = Vec3::ZERO;
    let mut occlusion = 0.0;
    let mut total_weight = 0.0;
    for cone in hemisphere_cones(normal) {
        let weight = cone.weight * cone.direction.dot(normal).max(0.0);
        let sample = trace_cone(volume, origin, cone.direction, settings);
        radiance += sample.radiance * weight;
        occlusion += sample.opacity * weight;
        total_weight += weight;
    }

    if total_weight <= 0.0 {
        return IndirectLight::default();
    }
    IndirectLight {
        radiance: radiance / total_weight * settings.indirect_strength,
        occlusion: occlusion / total_weight,
    }
}
