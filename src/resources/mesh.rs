//! Mesh data structures and generation

use crate::backend::types::Vertex;
use glam::{Mat3, Mat4, Vec2, Vec3, Vec4};
use thiserror::Error;

/// Geometry rejected at load time
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GeometryError {
    #[error("Mesh '{0}' has no triangles")]
    Empty(String),
    #[error("Mesh '{name}' has {count} indices, not a multiple of 3")]
    IncompleteTriangle { name: String, count: usize },
    #[error("Mesh '{name}' references vertex {index} but has only {vertex_count}")]
    IndexOutOfRange {
        name: String,
        index: u32,
        vertex_count: usize,
    },
    #[error("Mesh '{name}' has a non-finite vertex position")]
    NonFinite { name: String },
    #[error("Bounding box has zero extent: {0:?}")]
    ZeroExtent(Vec3),
}

/// Axis-aligned bounding box
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self {
            min: min.min(max),
            max: min.max(max),
        }
    }

    /// Box around a center with half-size `extents` on each axis
    pub fn from_center_extents(center: Vec3, extents: Vec3) -> Self {
        Self::new(center - extents.abs(), center + extents.abs())
    }

    /// Smallest box containing all points, `None` for an empty iterator
    pub fn from_points(points: impl IntoIterator<Item = Vec3>) -> Option<Self> {
        points.into_iter().fold(None, |acc, p| match acc {
            None => Some(Self { min: p, max: p }),
            Some(b) => Some(Self {
                min: b.min.min(p),
                max: b.max.max(p),
            }),
        })
    }

    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    /// Half-size on each axis
    pub fn extents(&self) -> Vec3 {
        (self.max - self.min) * 0.5
    }

    /// Largest half-size component
    pub fn max_extent(&self) -> f32 {
        self.extents().max_element()
    }

    pub fn corners(&self) -> [Vec3; 8] {
        let (a, b) = (self.min, self.max);
        [
            Vec3::new(a.x, a.y, a.z),
            Vec3::new(b.x, a.y, a.z),
            Vec3::new(a.x, b.y, a.z),
            Vec3::new(b.x, b.y, a.z),
            Vec3::new(a.x, a.y, b.z),
            Vec3::new(b.x, a.y, b.z),
            Vec3::new(a.x, b.y, b.z),
            Vec3::new(b.x, b.y, b.z),
        ]
    }

    /// Bounds of this box after an affine transform
    pub fn transformed(&self, matrix: &Mat4) -> Self {
        let corners = self.corners().map(|c| matrix.transform_point3(c));
        Self::from_points(corners).unwrap_or(*self)
    }

    pub fn contains(&self, point: Vec3) -> bool {
        point.cmpge(self.min).all() && point.cmple(self.max).all()
    }
}

/// A mesh with vertex and index data
#[derive(Debug, Clone)]
pub struct Mesh {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
    pub name: String,
}

impl Mesh {
    pub fn new(name: &str) -> Self {
        Self {
            vertices: Vec::new(),
            indices: Vec::new(),
            name: name.to_string(),
        }
    }

    /// Calculate vertex count
    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    /// Calculate index count
    pub fn index_count(&self) -> usize {
        self.indices.len()
    }

    /// Calculate triangle count
    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    /// Get vertex data as bytes
    pub fn vertex_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.vertices)
    }

    /// Get index data as bytes
    pub fn index_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.indices)
    }

    /// Iterate triangles as vertex triples
    pub fn triangles(&self) -> impl Iterator<Item = [&Vertex; 3]> + '_ {
        self.indices.chunks_exact(3).filter_map(|tri| {
            Some([
                self.vertices.get(tri[0] as usize)?,
                self.vertices.get(tri[1] as usize)?,
                self.vertices.get(tri[2] as usize)?,
            ])
        })
    }

    /// Reject meshes that cannot be voxelized
    pub fn validate(&self) -> Result<(), GeometryError> {
        if self.indices.is_empty() || self.vertices.is_empty() {
            return Err(GeometryError::Empty(self.name.clone()));
        }
        if self.indices.len() % 3 != 0 {
            return Err(GeometryError::IncompleteTriangle {
                name: self.name.clone(),
                count: self.indices.len(),
            });
        }
        if let Some(&index) = self
            .indices
            .iter()
            .find(|&&i| i as usize >= self.vertices.len())
        {
            return Err(GeometryError::IndexOutOfRange {
                name: self.name.clone(),
                index,
                vertex_count: self.vertices.len(),
            });
        }
        if self.vertices.iter().any(|v| !v.position.is_finite()) {
            return Err(GeometryError::NonFinite {
                name: self.name.clone(),
            });
        }
        Ok(())
    }

    /// Validated bounding box of all vertex positions
    pub fn bounds(&self) -> Result<Aabb, GeometryError> {
        self.validate()?;
        let bounds = Aabb::from_points(self.vertices.iter().map(|v| v.position))
            .ok_or_else(|| GeometryError::Empty(self.name.clone()))?;
        if bounds.max_extent() <= f32::EPSILON {
            return Err(GeometryError::ZeroExtent(bounds.extents()));
        }
        Ok(bounds)
    }

    /// Append another mesh, offsetting its indices
    pub fn append(&mut self, other: &Mesh) {
        let base = self.vertices.len() as u32;
        self.vertices.extend_from_slice(&other.vertices);
        self.indices.extend(other.indices.iter().map(|i| i + base));
    }

    /// Transform positions by `matrix` and normals by its inverse-transpose
    pub fn transform(&mut self, matrix: &Mat4) {
        let normal_matrix = Mat3::from_mat4(*matrix).inverse().transpose();
        for vertex in &mut self.vertices {
            vertex.position = matrix.transform_point3(vertex.position);
            vertex.normal = (normal_matrix * vertex.normal).normalize_or_zero();
        }
    }

    /// Single quad from four corners in counter-clockwise order
    pub fn quad(name: &str, corners: [Vec3; 4], color: Vec4) -> Self {
        let mut mesh = Mesh::new(name);
        let normal = (corners[1] - corners[0])
            .cross(corners[2] - corners[0])
            .normalize_or_zero();
        let uvs = [
            Vec2::new(0.0, 1.0),
            Vec2::new(1.0, 1.0),
            Vec2::new(1.0, 0.0),
            Vec2::new(0.0, 0.0),
        ];
        for (position, uv) in corners.into_iter().zip(uvs) {
            mesh.vertices.push(Vertex::new(position, normal, uv, color));
        }
        mesh.indices.extend_from_slice(&[0, 1, 2, 0, 2, 3]);
        mesh
    }

    /// Axis-aligned box between `min` and `max` with outward normals
    pub fn cuboid(name: &str, min: Vec3, max: Vec3, color: Vec4) -> Self {
        let mut mesh = Mesh::new(name);
        let center = (min + max) * 0.5;
        let size = max - min;

        let faces = [
            // Front face
            (Vec3::new(-0.5, -0.5, 0.5), Vec3::Z, Vec2::new(0.0, 1.0)),
            (Vec3::new(0.5, -0.5, 0.5), Vec3::Z, Vec2::new(1.0, 1.0)),
            (Vec3::new(0.5, 0.5, 0.5), Vec3::Z, Vec2::new(1.0, 0.0)),
            (Vec3::new(-0.5, 0.5, 0.5), Vec3::Z, Vec2::new(0.0, 0.0)),
            // Back face
            (Vec3::new(0.5, -0.5, -0.5), -Vec3::Z, Vec2::new(0.0, 1.0)),
            (Vec3::new(-0.5, -0.5, -0.5), -Vec3::Z, Vec2::new(1.0, 1.0)),
            (Vec3::new(-0.5, 0.5, -0.5), -Vec3::Z, Vec2::new(1.0, 0.0)),
            (Vec3::new(0.5, 0.5, -0.5), -Vec3::Z, Vec2::new(0.0, 0.0)),
            // Right face
            (Vec3::new(0.5, -0.5, 0.5), Vec3::X, Vec2::new(0.0, 1.0)),
            (Vec3::new(0.5, -0.5, -0.5), Vec3::X, Vec2::new(1.0, 1.0)),
            (Vec3::new(0.5, 0.5, -0.5), Vec3::X, Vec2::new(1.0, 0.0)),
            (Vec3::new(0.5, 0.5, 0.5), Vec3::X, Vec2::new(0.0, 0.0)),
            // Left face
            (Vec3::new(-0.5, -0.5, -0.5), -Vec3::X, Vec2::new(0.0, 1.0)),
            (Vec3::new(-0.5, -0.5, 0.5), -Vec3::X, Vec2::new(1.0, 1.0)),
            (Vec3::new(-0.5, 0.5, 0.5), -Vec3::X, Vec2::new(1.0, 0.0)),
            (Vec3::new(-0.5, 0.5, -0.5), -Vec3::X, Vec2::new(0.0, 0.0)),
            // Top face
            (Vec3::new(-0.5, 0.5, 0.5), Vec3::Y, Vec2::new(0.0, 1.0)),
            (Vec3::new(0.5, 0.5, 0.5), Vec3::Y, Vec2::new(1.0, 1.0)),
            (Vec3::new(0.5, 0.5, -0.5), Vec3::Y, Vec2::new(1.0, 0.0)),
            (Vec3::new(-0.5, 0.5, -0.5), Vec3::Y, Vec2::new(0.0, 0.0)),
            // Bottom face
            (Vec3::new(-0.5, -0.5, -0.5), -Vec3::Y, Vec2::new(0.0, 1.0)),
            (Vec3::new(0.5, -0.5, -0.5), -Vec3::Y, Vec2::new(1.0, 1.0)),
            (Vec3::new(0.5, -0.5, 0.5), -Vec3::Y, Vec2::new(1.0, 0.0)),
            (Vec3::new(-0.5, -0.5, 0.5), -Vec3::Y, Vec2::new(0.0, 0.0)),
        ];

        for (corner, normal, uv) in faces {
            mesh.vertices
                .push(Vertex::new(center + corner * size, normal, uv, color));
        }

        // Two triangles per face
        for face in 0..6 {
            let base = face * 4;
            mesh.indices.extend_from_slice(&[
                base,
                base + 1,
                base + 2,
                base,
                base + 2,
                base + 3,
            ]);
        }

        mesh
    }

    /// Cube centered at the origin with half-size `extent` on each axis
    pub fn cube(extent: f32, color: Vec4) -> Self {
        Self::cuboid("cube", Vec3::splat(-extent), Vec3::splat(extent), color)
    }

    /// Cornell box spanning [-1, 1] on each axis, open towards +Z
    pub fn cornell_box() -> Self {
        let white = Vec4::new(0.725, 0.71, 0.68, 1.0);
        let red = Vec4::new(0.63, 0.065, 0.05, 1.0);
        let green = Vec4::new(0.14, 0.45, 0.091, 1.0);

        let (l, h) = (-1.0, 1.0);
        let mut mesh = Mesh::new("cornell_box");
        let walls = [
            (
                "floor",
                [
                    Vec3::new(l, l, h),
                    Vec3::new(h, l, h),
                    Vec3::new(h, l, l),
                    Vec3::new(l, l, l),
                ],
                white,
            ),
            (
                "ceiling",
                [
                    Vec3::new(l, h, l),
                    Vec3::new(h, h, l),
                    Vec3::new(h, h, h),
                    Vec3::new(l, h, h),
                ],
                white,
            ),
            (
                "back",
                [
                    Vec3::new(l, l, l),
                    Vec3::new(h, l, l),
                    Vec3::new(h, h, l),
                    Vec3::new(l, h, l),
                ],
                white,
            ),
            (
                "left",
                [
                    Vec3::new(l, l, h),
                    Vec3::new(l, l, l),
                    Vec3::new(l, h, l),
                    Vec3::new(l, h, h),
                ],
                red,
            ),
            (
                "right",
                [
                    Vec3::new(h, l, l),
                    Vec3::new(h, l, h),
                    Vec3::new(h, h, h),
                    Vec3::new(h, h, l),
                ],
                green,
            ),
        ];
        for (name, corners, color) in walls {
            mesh.append(&Mesh::quad(name, corners, color));
        }

        let mut short_block = Mesh::cuboid(
            "short_block",
            Vec3::new(-0.3, -0.3, -0.3),
            Vec3::new(0.3, 0.3, 0.3),
            white,
        );
        short_block.transform(
            &(Mat4::from_translation(Vec3::new(0.35, -0.7, 0.3))
                * Mat4::from_rotation_y(-17f32.to_radians())),
        );
        mesh.append(&short_block);

        let mut tall_block = Mesh::cuboid(
            "tall_block",
            Vec3::new(-0.3, -0.6, -0.3),
            Vec3::new(0.3, 0.6, 0.3),
            white,
        );
        tall_block.transform(
            &(Mat4::from_translation(Vec3::new(-0.35, -0.4, -0.35))
                * Mat4::from_rotation_y(20f32.to_radians())),
        );
        mesh.append(&tall_block);

        mesh
    }
}
