//! Triangle voxelization by dominant-axis rasterization

use super::{VoxelGrid, VoxelVolume};
use crate::backend::types::Vertex;
use crate::resources::Mesh;
use glam::{Mat3, Mat4, UVec3, Vec2, Vec3, Vec4};

/// Interpolated surface attributes at one rasterized sample
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Fragment {
    pub position: Vec3,
    pub normal: Vec3,
    pub color: Vec4,
}

/// Index of the largest absolute component: the axis the triangle is
/// projected along so its projected area is maximal.
pub fn dominant_axis(normal: Vec3) -> usize {
    let n = normal.abs();
    if n.x >= n.y && n.x >= n.z {
        0
    } else if n.y >= n.z {
        1
    } else {
        2
    }
}

fn edge(a: Vec2, b: Vec2, p: Vec2) -> f32 {
    (b - a).perp_dot(p - a)
}

/// Rasterize one world-space triangle into the grid.
///
/// The triangle is projected along its dominant axis onto a
/// `resolution x resolution` raster; every pixel center it covers becomes one
/// fragment, mapped back to its voxel through the interpolated world position.
pub fn rasterize_triangle(
    grid: &VoxelGrid,
    axis_view_proj: &[Mat4; 3],
    triangle: [Fragment; 3],
    mut emit: impl FnMut(UVec3, &Fragment),
) {
    let [a, b, c] = triangle;
    let face_normal = (b.position - a.position).cross(c.position - a.position);
    if face_normal.length_squared() <= f32::EPSILON * f32::EPSILON {
        return;
    }
    let view_proj = &axis_view_proj[dominant_axis(face_normal)];
    let res = grid.resolution() as f32;
    let to_raster = |p: Vec3| {
        let ndc = view_proj.project_point3(p);
        (Vec2::new(ndc.x, ndc.y) * 0.5 + 0.5) * res
    };
    let (s0, s1, s2) = (to_raster(a.position), to_raster(b.position), to_raster(c.position));

    let area = edge(s0, s1, s2);
    if area.abs() <= f32::EPSILON {
        return;
    }

    let lo = s0.min(s1).min(s2).floor().max(Vec2::ZERO);
    let hi = s0.max(s1).max(s2).ceil().min(Vec2::splat(res));
    let (x0, y0) = (lo.x as u32, lo.y as u32);
    let (x1, y1) = (hi.x as u32, hi.y as u32);

    const INSIDE_EPSILON: f32 = -1e-6;
    for y in y0..y1 {
        for x in x0..x1 {
            let p = Vec2::new(x as f32 + 0.5, y as f32 + 0.5);
            let w0 = edge(s1, s2, p) / area;
            let w1 = edge(s2, s0, p) / area;
            let w2 = edge(s0, s1, p) / area;
            if w0 < INSIDE_EPSILON || w1 < INSIDE_EPSILON || w2 < INSIDE_EPSILON {
                continue;
            }
            let fragment = Fragment {
                position: a.position * w0 + b.position * w1 + c.position * w2,
                normal: (a.normal * w0 + b.normal * w1 + c.normal * w2).normalize_or_zero(),
                color: a.color * w0 + b.color * w1 + c.color * w2,
            };
            if let Some(coord) = grid.voxel_coord(fragment.position) {
                emit(coord, &fragment);
            }
        }
    }
}

/// Transform a vertex into world space
pub fn world_fragment(vertex: &Vertex, world: &Mat4, normal_matrix: &Mat3) -> Fragment {
    Fragment {
        position: world.transform_point3(vertex.position),
        normal: (*normal_matrix * vertex.normal).normalize_or_zero(),
        color: vertex.color,
    }
}

/// Voxelize every triangle of `mesh` under `world` into `volume`.
///
/// `shade` turns a fragment into the radiance stored in the voxel. Returns the
/// number of fragments written.
pub fn voxelize_mesh(
    mesh: &Mesh,
    world: &Mat4,
    world_inv_transpose: &Mat4,
    volume: &mut VoxelVolume,
    shade: impl Fn(&Fragment) -> Vec3,
) -> usize {
    let grid = *volume.grid();
    let axis_view_proj = grid.axis_view_projections();
    let normal_matrix = Mat3::from_mat4(*world_inv_transpose);
    let mut fragments = 0;
    for [a, b, c] in mesh.triangles() {
        let triangle = [
            world_fragment(a, world, &normal_matrix),
            world_fragment(b, world, &normal_matrix),
            world_fragment(c, world, &normal_matrix),
        ];
        rasterize_triangle(&grid, &axis_view_proj, triangle, |coord, fragment| {
            volume.accumulate(coord, shade(fragment), fragment.normal);
            fragments += 1;
        });
    }
    fragments
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::Aabb;

    fn grid(extent: f32, resolution: u32) -> VoxelGrid {
        let bounds = Aabb::from_center_extents(Vec3::ZERO, Vec3::splat(extent));
        VoxelGrid::from_bounds(&bounds, resolution).unwrap()
    }

    fn voxelize(mesh: &Mesh, grid: VoxelGrid) -> VoxelVolume {
        let mut volume = VoxelVolume::new(grid);
        voxelize_mesh(mesh, &Mat4::IDENTITY, &Mat4::IDENTITY, &mut volume, |f| {
            f.color.truncate()
        });
        volume
    }

    #[test]
    fn test_dominant_axis() {
        assert_eq!(dominant_axis(Vec3::new(0.1, -0.9, 0.3)), 1);
        assert_eq!(dominant_axis(Vec3::new(-2.0, 1.0, 1.0)), 0);
        assert_eq!(dominant_axis(Vec3::new(0.0, 0.0, -1.0)), 2);
    }

    #[test]
    fn test_unit_cube_stays_inside_extent() {
        let cube = Mesh::cube(1.0, Vec4::ONE);
        let bounds = cube.bounds().unwrap();
        let grid = VoxelGrid::from_bounds(&bounds, 256).unwrap();
        let volume = voxelize(&cube, grid);

        assert!(volume.occupied_count() > 0);
        // Surface voxelization: six faces of 256x256 voxels, edges shared
        assert!(volume.occupied_count() <= 6 * 256 * 256);
        for (coord, _) in volume.occupied() {
            assert!(coord.cmplt(UVec3::splat(256)).all());
            // Every occupied voxel lies on the cube's shell
            let on_shell = coord.to_array().iter().any(|&c| c == 0 || c == 255);
            assert!(on_shell, "interior voxel {:?}", coord);
        }
    }

    #[test]
    fn test_small_cube_occupies_centered_region() {
        // Half-size cube inside a grid sized for extent 1
        let cube = Mesh::cube(0.5, Vec4::ONE);
        let volume = voxelize(&cube, grid(1.0, 256));
        let (lo, hi) = (64, 192);
        assert!(volume.occupied_count() > 0);
        for (coord, _) in volume.occupied() {
            for c in coord.to_array() {
                assert!((lo..=hi).contains(&c), "voxel {:?} outside cube", coord);
            }
        }
    }

    #[test]
    fn test_axis_aligned_face_fully_covered() {
        let quad = Mesh::quad(
            "floor",
            [
                Vec3::new(-1.0, 0.0, 1.0),
                Vec3::new(1.0, 0.0, 1.0),
                Vec3::new(1.0, 0.0, -1.0),
                Vec3::new(-1.0, 0.0, -1.0),
            ],
            Vec4::ONE,
        );
        let volume = voxelize(&quad, grid(1.0, 32));
        assert_eq!(volume.occupied_count(), 32 * 32);
        for (coord, cell) in volume.occupied() {
            assert_eq!(coord.y, 16);
            assert!((cell.normal() - Vec3::Y).length() < 1e-5);
        }
    }

    #[test]
    fn test_overlapping_triangles_accumulate() {
        let red = Mesh::quad(
            "red",
            [
                Vec3::new(-1.0, 0.0, 1.0),
                Vec3::new(1.0, 0.0, 1.0),
                Vec3::new(1.0, 0.0, -1.0),
                Vec3::new(-1.0, 0.0, -1.0),
            ],
            Vec4::new(1.0, 0.0, 0.0, 1.0),
        );
        let mut both = red.clone();
        let mut blue = red.clone();
        for v in &mut blue.vertices {
            v.color = Vec4::new(0.0, 0.0, 1.0, 1.0);
        }
        both.append(&blue);
        let volume = voxelize(&both, grid(1.0, 16));
        let cell = volume.cell(UVec3::new(3, 8, 5)).unwrap();
        assert!((cell.radiance() - Vec3::new(0.5, 0.0, 0.5)).length() < 1e-5);
    }

    #[test]
    fn test_sloped_triangle_is_watertight() {
        // 45 degree ramp: each raster column steps at most one voxel in depth
        let ramp = Mesh::quad(
            "ramp",
            [
                Vec3::new(-1.0, -1.0, 1.0),
                Vec3::new(1.0, -1.0, 1.0),
                Vec3::new(1.0, 1.0, -1.0),
                Vec3::new(-1.0, 1.0, -1.0),
            ],
            Vec4::ONE,
        );
        let volume = voxelize(&ramp, grid(1.0, 32));
        for y in 0..32 {
            let column = (0..32).filter(|&z| volume.cell(UVec3::new(10, y, z)).is_some());
            assert!(column.count() >= 1, "gap at y = {}", y);
        }
    }

    #[test]
    fn test_degenerate_triangle_skipped() {
        let grid = grid(1.0, 16);
        let f = Fragment {
            position: Vec3::ZERO,
            normal: Vec3::Y,
            color: Vec4::ONE,
        };
        let mut hits = 0;
        rasterize_triangle(&grid, &grid.axis_view_projections(), [f, f, f], |_, _| {
            hits += 1
        });
        assert_eq!(hits, 0);
    }

    #[test]
    fn test_world_transform_applied() {
        let cube = Mesh::cube(0.25, Vec4::ONE);
        let world = Mat4::from_translation(Vec3::new(0.5, 0.0, 0.0));
        let mut volume = VoxelVolume::new(grid(1.0, 64));
        voxelize_mesh(&cube, &world, &world.inverse().transpose(), &mut volume, |_| Vec3::ONE);
        for (coord, _) in volume.occupied() {
            // x in [0.25, 0.75] world -> voxels [40, 56]
            assert!((40..=56).contains(&coord.x), "{:?}", coord);
        }
    }
}
