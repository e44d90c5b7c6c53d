//! World-to-volume mapping

use super::VoxelError;
use crate::resources::Aabb;
use glam::{Mat4, UVec3, Vec3};

/// Smallest supported resolution
pub const MIN_RESOLUTION: u32 = 8;
/// Largest supported resolution. The scatter buffers hold one `u32` per cell,
/// 256^3 cells fit in the default storage binding limit.
pub const MAX_RESOLUTION: u32 = 256;

/// Cubic grid of uniform voxels tightly bounding a scene.
///
/// The grid is centered on the bounding box and its side is twice the largest
/// half-extent, so every point of the box falls inside.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VoxelGrid {
    resolution: u32,
    center: Vec3,
    half_size: f32,
}

impl VoxelGrid {
    pub fn from_bounds(bounds: &Aabb, resolution: u32) -> Result<Self, VoxelError> {
        check_resolution(resolution)?;
        let half_size = bounds.max_extent();
        if !half_size.is_finite() || half_size <= f32::EPSILON {
            return Err(VoxelError::DegenerateBounds(bounds.extents()));
        }
        Ok(Self {
            resolution,
            center: bounds.center(),
            half_size,
        })
    }

    pub fn resolution(&self) -> u32 {
        self.resolution
    }

    /// Edge length of one voxel in world units: `2 * max_extent / resolution`
    pub fn voxel_size(&self) -> f32 {
        2.0 * self.half_size / self.resolution as f32
    }

    pub fn center(&self) -> Vec3 {
        self.center
    }

    /// World-space minimum corner
    pub fn origin(&self) -> Vec3 {
        self.center - Vec3::splat(self.half_size)
    }

    /// Edge length of the whole volume
    pub fn size(&self) -> f32 {
        2.0 * self.half_size
    }

    pub fn bounds(&self) -> Aabb {
        Aabb::from_center_extents(self.center, Vec3::splat(self.half_size))
    }

    /// Number of mip levels down to a single voxel
    pub fn mip_count(&self) -> u32 {
        self.resolution.trailing_zeros() + 1
    }

    /// Resolution of a mip level
    pub fn level_resolution(&self, level: u32) -> u32 {
        (self.resolution >> level).max(1)
    }

    /// Normalized volume coordinates, `[0, 1]` inside the grid
    pub fn world_to_uvw(&self, position: Vec3) -> Vec3 {
        (position - self.origin()) / self.size()
    }

    /// Voxel containing `position`, clamped so points on the far faces land in
    /// the last cell. `None` when the point lies outside the grid.
    pub fn voxel_coord(&self, position: Vec3) -> Option<UVec3> {
        let uvw = self.world_to_uvw(position);
        let tolerance = 1e-4 / self.resolution as f32;
        if !uvw.is_finite()
            || uvw.cmplt(Vec3::splat(-tolerance)).any()
            || uvw.cmpgt(Vec3::splat(1.0 + tolerance)).any()
        {
            return None;
        }
        let last = (self.resolution - 1) as f32;
        let cell = (uvw * self.resolution as f32)
            .floor()
            .clamp(Vec3::ZERO, Vec3::splat(last));
        Some(cell.as_uvec3())
    }

    /// World-space center of a voxel
    pub fn voxel_center(&self, coord: UVec3) -> Vec3 {
        self.origin() + (coord.as_vec3() + 0.5) * self.voxel_size()
    }

    /// Linear index in x-major order
    pub fn linear_index(&self, coord: UVec3) -> usize {
        let res = self.resolution as usize;
        coord.x as usize + coord.y as usize * res + coord.z as usize * res * res
    }

    /// Orthographic view-projections looking down X, Y and Z at the grid.
    ///
    /// Each maps the grid cube onto the full clip-space square, so rasterizing
    /// into a `resolution x resolution` viewport yields one fragment per voxel
    /// column along that axis.
    pub fn axis_view_projections(&self) -> [Mat4; 3] {
        let h = self.half_size;
        let projection = Mat4::orthographic_rh(-h, h, -h, h, h, 3.0 * h);
        let views = [
            (Vec3::X, Vec3::Y),
            (Vec3::Y, Vec3::Z),
            (Vec3::Z, Vec3::Y),
        ];
        views.map(|(axis, up)| {
            projection * Mat4::look_at_rh(self.center + axis * 2.0 * h, self.center, up)
        })
    }
}

/// Check a resolution is a supported power of two
pub fn check_resolution(resolution: u32) -> Result<(), VoxelError> {
    if !resolution.is_power_of_two() || !(MIN_RESOLUTION..=MAX_RESOLUTION).contains(&resolution) {
        return Err(VoxelError::InvalidResolution {
            value: resolution,
            min: MIN_RESOLUTION,
            max: MAX_RESOLUTION,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cube_grid(resolution: u32) -> VoxelGrid {
        let bounds = Aabb::from_center_extents(Vec3::ZERO, Vec3::ONE);
        VoxelGrid::from_bounds(&bounds, resolution).unwrap()
    }

    #[test]
    fn test_voxel_size_from_max_extent() {
        let extents = [
            Vec3::new(1.0, 1.0, 1.0),
            Vec3::new(3.0, 0.5, 0.25),
            Vec3::new(0.01, 0.02, 0.015),
            Vec3::new(100.0, 250.0, 7.5),
            Vec3::new(0.0, 0.0, 4.0),
        ];
        for resolution in [8, 64, 256] {
            for extent in extents {
                let bounds = Aabb::from_center_extents(Vec3::new(5.0, -2.0, 1.0), extent);
                let grid = VoxelGrid::from_bounds(&bounds, resolution).unwrap();
                let expected = 2.0 * extent.max_element() / resolution as f32;
                assert!(
                    (grid.voxel_size() - expected).abs() <= expected * 1e-5,
                    "extent {:?} res {}",
                    extent,
                    resolution
                );
            }
        }
    }

    #[test]
    fn test_corners_map_to_boundary_voxels() {
        let bounds = Aabb::new(Vec3::new(-2.0, -1.0, 0.0), Vec3::new(2.0, 3.0, 4.0));
        let grid = VoxelGrid::from_bounds(&bounds, 256).unwrap();
        let last = 255;
        // The grid is cubic and every axis here has the same extent
        assert_eq!(grid.voxel_coord(bounds.min), Some(UVec3::ZERO));
        assert_eq!(grid.voxel_coord(bounds.max), Some(UVec3::splat(last)));
        for corner in bounds.corners() {
            let coord = grid.voxel_coord(corner).unwrap();
            for c in coord.to_array() {
                assert!(c == 0 || c == last, "corner {:?} -> {:?}", corner, coord);
            }
        }
    }

    #[test]
    fn test_corners_of_flat_box_stay_in_range() {
        let bounds = Aabb::new(Vec3::new(-4.0, -0.5, -1.0), Vec3::new(4.0, 0.5, 1.0));
        let grid = VoxelGrid::from_bounds(&bounds, 64).unwrap();
        for corner in bounds.corners() {
            let coord = grid.voxel_coord(corner).unwrap();
            assert!(coord.cmplt(UVec3::splat(64)).all());
            assert!(coord.x == 0 || coord.x == 63);
        }
    }

    #[test]
    fn test_outside_points_rejected() {
        let grid = cube_grid(64);
        assert!(grid.voxel_coord(Vec3::new(1.1, 0.0, 0.0)).is_none());
        assert!(grid.voxel_coord(Vec3::new(0.0, -1.5, 0.0)).is_none());
        assert!(grid.voxel_coord(Vec3::NAN).is_none());
        assert!(grid.voxel_coord(Vec3::ZERO).is_some());
    }

    #[test]
    fn test_voxel_center_roundtrip() {
        let grid = cube_grid(32);
        let coord = UVec3::new(3, 17, 31);
        assert_eq!(grid.voxel_coord(grid.voxel_center(coord)), Some(coord));
        assert_eq!(grid.linear_index(UVec3::new(1, 1, 1)), 1 + 32 + 32 * 32);
    }

    #[test]
    fn test_mip_count() {
        assert_eq!(cube_grid(256).mip_count(), 9);
        assert_eq!(cube_grid(8).mip_count(), 4);
        assert_eq!(cube_grid(256).level_resolution(8), 1);
        assert_eq!(cube_grid(256).level_resolution(12), 1);
    }

    #[test]
    fn test_degenerate_bounds_rejected() {
        let bounds = Aabb::new(Vec3::ONE, Vec3::ONE);
        assert!(matches!(
            VoxelGrid::from_bounds(&bounds, 64),
            Err(VoxelError::DegenerateBounds(_))
        ));
    }

    #[test]
    fn test_invalid_resolution_rejected() {
        let bounds = Aabb::from_center_extents(Vec3::ZERO, Vec3::ONE);
        for resolution in [0, 4, 100, 512] {
            assert!(VoxelGrid::from_bounds(&bounds, resolution).is_err());
        }
    }

    #[test]
    fn test_axis_projections_cover_grid() {
        let bounds = Aabb::new(Vec3::new(1.0, 2.0, 3.0), Vec3::new(3.0, 4.0, 5.0));
        let grid = VoxelGrid::from_bounds(&bounds, 64).unwrap();
        for view_proj in grid.axis_view_projections() {
            for corner in grid.bounds().corners() {
                let ndc = view_proj.project_point3(corner);
                assert!(ndc.x.abs() <= 1.0 + 1e-4 && ndc.y.abs() <= 1.0 + 1e-4);
                assert!(ndc.z >= -1e-4 && ndc.z <= 1.0 + 1e-4, "depth {}", ndc.z);
            }
        }
    }
}
