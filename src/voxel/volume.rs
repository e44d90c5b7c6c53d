//! Sparse CPU voxel volume with a pre-filtered mip chain

use super::VoxelGrid;
use glam::{IVec3, UVec3, Vec3, Vec4};
use half::f16;
use std::collections::HashMap;

/// Accumulated contributions of every fragment that landed in one voxel
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct VoxelCell {
    pub radiance_sum: Vec3,
    pub normal_sum: Vec3,
    pub count: u32,
}

impl VoxelCell {
    /// Average radiance of all contributions
    pub fn radiance(&self) -> Vec3 {
        if self.count == 0 {
            Vec3::ZERO
        } else {
            self.radiance_sum / self.count as f32
        }
    }

    /// Average normal, zero when contributions cancel out
    pub fn normal(&self) -> Vec3 {
        self.normal_sum.normalize_or_zero()
    }

    pub fn opacity(&self) -> f32 {
        if self.count > 0 {
            1.0
        } else {
            0.0
        }
    }
}

/// Voxel volume keyed by linear cell index.
///
/// Only occupied cells are stored. Mip levels hold premultiplied
/// `(radiance * opacity, opacity)`; level 0 is derived from the cells by
/// [`VoxelVolume::build_mips`].
#[derive(Debug, Clone)]
pub struct VoxelVolume {
    grid: VoxelGrid,
    cells: HashMap<usize, VoxelCell>,
    levels: Vec<HashMap<usize, Vec4>>,
}

impl VoxelVolume {
    pub fn new(grid: VoxelGrid) -> Self {
        Self {
            grid,
            cells: HashMap::new(),
            levels: Vec::new(),
        }
    }

    pub fn grid(&self) -> &VoxelGrid {
        &self.grid
    }

    pub fn clear(&mut self) {
        self.cells.clear();
        self.levels.clear();
    }

    /// Blend one fragment into its cell. Contributions are summed, never
    /// overwritten, so overlapping triangles all count.
    pub fn accumulate(&mut self, coord: UVec3, radiance: Vec3, normal: Vec3) {
        let index = self.grid.linear_index(coord);
        let cell = self.cells.entry(index).or_default();
        cell.radiance_sum += radiance;
        cell.normal_sum += normal;
        cell.count += 1;
    }

    pub fn cell(&self, coord: UVec3) -> Option<&VoxelCell> {
        self.cells.get(&self.grid.linear_index(coord))
    }

    pub fn occupied_count(&self) -> usize {
        self.cells.len()
    }

    /// Coordinates and contents of every occupied cell
    pub fn occupied(&self) -> impl Iterator<Item = (UVec3, &VoxelCell)> + '_ {
        let res = self.grid.resolution() as usize;
        self.cells.iter().map(move |(&index, cell)| {
            let coord = UVec3::new(
                (index % res) as u32,
                ((index / res) % res) as u32,
                (index / (res * res)) as u32,
            );
            (coord, cell)
        })
    }

    /// Number of built mip levels, zero before [`VoxelVolume::build_mips`]
    pub fn level_count(&self) -> usize {
        self.levels.len()
    }

    /// Rebuild level 0 from the cells and average each 2x2x2 block into the
    /// next level down to a single voxel.
    pub fn build_mips(&mut self) {
        self.levels.clear();
        let base: HashMap<usize, Vec4> = self
            .cells
            .iter()
            .map(|(&index, cell)| (index, (cell.radiance() * cell.opacity()).extend(cell.opacity())))
            .collect();
        self.levels.push(base);

        for level in 1..self.grid.mip_count() {
            let parent_res = self.grid.level_resolution(level - 1) as usize;
            let res = self.grid.level_resolution(level) as usize;
            let mut next: HashMap<usize, Vec4> = HashMap::new();
            for (&index, value) in &self.levels[level as usize - 1] {
                let (x, y, z) = (
                    index % parent_res,
                    (index / parent_res) % parent_res,
                    index / (parent_res * parent_res),
                );
                let target = x / 2 + (y / 2) * res + (z / 2) * res * res;
                *next.entry(target).or_insert(Vec4::ZERO) += *value * 0.125;
            }
            self.levels.push(next);
        }
    }

    /// Texel of a mip level, zero for empty or out-of-range coordinates
    pub fn fetch(&self, level: u32, coord: IVec3) -> Vec4 {
        let Some(texels) = self.levels.get(level as usize) else {
            return Vec4::ZERO;
        };
        let res = self.grid.level_resolution(level) as i32;
        if coord.cmplt(IVec3::ZERO).any() || coord.cmpge(IVec3::splat(res)).any() {
            return Vec4::ZERO;
        }
        let (x, y, z) = (coord.x as usize, coord.y as usize, coord.z as usize);
        let res = res as usize;
        texels
            .get(&(x + y * res + z * res * res))
            .copied()
            .unwrap_or(Vec4::ZERO)
    }

    fn sample_level(&self, level: u32, uvw: Vec3) -> Vec4 {
        let res = self.grid.level_resolution(level) as i32;
        let texel = uvw * res as f32 - 0.5;
        let base = texel.floor();
        let f = texel - base;
        let base = base.as_ivec3();
        let max = IVec3::splat(res - 1);

        let mut result = Vec4::ZERO;
        for corner in 0..8 {
            let offset = IVec3::new(corner & 1, (corner >> 1) & 1, (corner >> 2) & 1);
            let weight = Vec3::new(
                if offset.x == 1 { f.x } else { 1.0 - f.x },
                if offset.y == 1 { f.y } else { 1.0 - f.y },
                if offset.z == 1 { f.z } else { 1.0 - f.z },
            );
            // Clamp to edge like the GPU sampler
            let coord = (base + offset).clamp(IVec3::ZERO, max);
            result += self.fetch(level, coord) * weight.x * weight.y * weight.z;
        }
        result
    }

    /// Trilinearly filtered sample between two mip levels.
    ///
    /// Any coordinate outside `[0, 1]` returns zero: the volume contributes
    /// nothing beyond its bounds.
    pub fn sample(&self, uvw: Vec3, lod: f32) -> Vec4 {
        if self.levels.is_empty()
            || !uvw.is_finite()
            || uvw.cmplt(Vec3::ZERO).any()
            || uvw.cmpgt(Vec3::ONE).any()
        {
            return Vec4::ZERO;
        }
        let max_level = (self.levels.len() - 1) as f32;
        let lod = if lod.is_finite() { lod.clamp(0.0, max_level) } else { 0.0 };
        let low = lod.floor();
        let t = lod - low;
        let a = self.sample_level(low as u32, uvw);
        if t <= 0.0 {
            return a;
        }
        let b = self.sample_level((low as u32 + 1).min(max_level as u32), uvw);
        a.lerp(b, t)
    }

    /// March a ray until it enters an occupied voxel. Returns the hit point and
    /// the voxel's normal.
    pub fn raycast(&self, origin: Vec3, direction: Vec3, max_distance: f32) -> Option<(Vec3, Vec3)> {
        let direction = direction.try_normalize()?;
        let step = self.grid.voxel_size() * 0.5;
        let mut t = 0.0;
        while t <= max_distance {
            let point = origin + direction * t;
            if let Some(cell) = self.grid.voxel_coord(point).and_then(|c| self.cell(c)) {
                return Some((point, cell.normal()));
            }
            t += step;
        }
        None
    }

    /// Dense Rgba16Float texels of a mip level, x-major
    pub fn level_rgba16f(&self, level: u32) -> Vec<f16> {
        let res = self.grid.level_resolution(level) as usize;
        let mut data = vec![f16::ZERO; res * res * res * 4];
        if let Some(texels) = self.levels.get(level as usize) {
            for (&index, value) in texels {
                for (channel, v) in value.to_array().into_iter().enumerate() {
                    data[index * 4 + channel] = f16::from_f32(v);
                }
            }
        }
        data
    }

    /// Dense Rgba8Unorm normals of level 0: `normal * 0.5 + 0.5`, alpha marks
    /// occupied cells
    pub fn normals_rgba8(&self) -> Vec<u8> {
        let res = self.grid.resolution() as usize;
        let mut data = vec![0u8; res * res * res * 4];
        for (&index, cell) in &self.cells {
            let encoded = (cell.normal() * 0.5 + 0.5).extend(1.0);
            for (channel, v) in encoded.to_array().into_iter().enumerate() {
                data[index * 4 + channel] = (v.clamp(0.0, 1.0) * 255.0).round() as u8;
            }
        }
        data
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::Aabb;

    fn volume(resolution: u32) -> VoxelVolume {
        let bounds = Aabb::from_center_extents(Vec3::ZERO, Vec3::ONE);
        VoxelVolume::new(VoxelGrid::from_bounds(&bounds, resolution).unwrap())
    }

    #[test]
    fn test_accumulate_averages() {
        let mut vol = volume(8);
        let coord = UVec3::new(1, 2, 3);
        vol.accumulate(coord, Vec3::new(1.0, 0.0, 0.0), Vec3::X);
        vol.accumulate(coord, Vec3::new(0.0, 1.0, 0.0), Vec3::Y);
        let cell = vol.cell(coord).unwrap();
        assert_eq!(cell.count, 2);
        assert_eq!(cell.radiance(), Vec3::new(0.5, 0.5, 0.0));
        assert!((cell.normal() - Vec3::new(1.0, 1.0, 0.0).normalize()).length() < 1e-6);
        assert_eq!(vol.occupied_count(), 1);
        assert_eq!(vol.occupied().next().unwrap().0, coord);
    }

    #[test]
    fn test_mip_chain_averages_children() {
        let mut vol = volume(8);
        vol.accumulate(UVec3::new(0, 0, 0), Vec3::ONE, Vec3::Y);
        vol.accumulate(UVec3::new(1, 1, 1), Vec3::ONE, Vec3::Y);
        vol.build_mips();

        assert_eq!(vol.level_count(), 4);
        assert_eq!(vol.fetch(0, IVec3::ZERO), Vec4::ONE);
        // Two of eight children occupied
        assert_eq!(vol.fetch(1, IVec3::ZERO), Vec4::splat(0.25));
        assert_eq!(vol.fetch(2, IVec3::ZERO), Vec4::splat(0.25 / 8.0));
        assert_eq!(vol.fetch(3, IVec3::ZERO), Vec4::splat(0.25 / 64.0));
    }

    #[test]
    fn test_sample_outside_is_zero() {
        let mut vol = volume(8);
        for x in 0..8 {
            for y in 0..8 {
                for z in 0..8 {
                    vol.accumulate(UVec3::new(x, y, z), Vec3::ONE, Vec3::Z);
                }
            }
        }
        vol.build_mips();
        assert_eq!(vol.sample(Vec3::splat(0.5), 0.0), Vec4::ONE);
        assert_eq!(vol.sample(Vec3::new(1.01, 0.5, 0.5), 0.0), Vec4::ZERO);
        assert_eq!(vol.sample(Vec3::new(0.5, -0.2, 0.5), 2.0), Vec4::ZERO);
        assert_eq!(vol.sample(Vec3::NAN, 0.0), Vec4::ZERO);
        // Out-of-range lods clamp instead of failing
        assert_eq!(vol.sample(Vec3::splat(0.5), 99.0), Vec4::ONE);
        assert_eq!(vol.sample(Vec3::splat(0.5), f32::NAN), Vec4::ONE);
    }

    #[test]
    fn test_sample_interpolates_levels() {
        let mut vol = volume(8);
        vol.accumulate(UVec3::new(0, 0, 0), Vec3::ONE, Vec3::Y);
        vol.build_mips();
        let at_voxel = Vec3::splat(0.5 / 8.0);
        assert_eq!(vol.sample(at_voxel, 0.0), Vec4::ONE);
        let half = vol.sample(at_voxel, 0.5);
        assert!(half.w < 1.0 && half.w > 0.0);
    }

    #[test]
    fn test_raycast_hits_first_occupied() {
        let mut vol = volume(16);
        let grid = *vol.grid();
        let target = grid.voxel_coord(Vec3::new(0.0, 0.0, -0.5)).unwrap();
        vol.accumulate(target, Vec3::ONE, Vec3::Z);
        let (hit, normal) = vol
            .raycast(Vec3::new(0.0, 0.0, 0.9), Vec3::NEG_Z, 2.0)
            .unwrap();
        assert_eq!(grid.voxel_coord(hit), Some(target));
        assert_eq!(normal, Vec3::Z);
        assert!(vol.raycast(Vec3::new(0.0, 0.0, 0.9), Vec3::Z, 2.0).is_none());
    }

    #[test]
    fn test_dense_exports() {
        let mut vol = volume(8);
        vol.accumulate(UVec3::new(1, 0, 0), Vec3::new(0.5, 0.25, 1.0), Vec3::X);
        vol.build_mips();
        let dense = vol.level_rgba16f(0);
        assert_eq!(dense.len(), 8 * 8 * 8 * 4);
        assert_eq!(dense[4].to_f32(), 0.5);
        assert_eq!(dense[7].to_f32(), 1.0);
        assert_eq!(vol.level_rgba16f(3).len(), 4);

        let normals = vol.normals_rgba8();
        assert_eq!(&normals[4..8], &[255, 128, 128, 255]);
        assert_eq!(&normals[0..4], &[0, 0, 0, 0]);
    }
}
