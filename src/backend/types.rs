//! Common types shared between backends

use bytemuck::{Pod, Zeroable};
use glam::{Vec2, Vec3, Vec4};

/// Swapchain formats plus the formats the voxel volume and depth buffer use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    Rgba8Unorm,
    Rgba8UnormSrgb,
    Bgra8Unorm,
    Bgra8UnormSrgb,
    Rgba16Float,
    Depth32Float,
}

impl TextureFormat {
    pub fn bytes_per_pixel(&self) -> u32 {
        match self {
            TextureFormat::Rgba16Float => 8,
            _ => 4,
        }
    }
}

bit_flags! {
    TextureUsage {
        COPY_DST = 1 << 0,
        TEXTURE_BINDING = 1 << 1,
        STORAGE_BINDING = 1 << 2,
        RENDER_ATTACHMENT = 1 << 3,
    }
}

/// Viewport rectangle with depth range, in framebuffer pixels
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub min_depth: f32,
    pub max_depth: f32,
}

impl Viewport {
    /// Full-depth viewport anchored at the origin
    pub fn from_size(width: u32, height: u32) -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            width: width as f32,
            height: height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        }
    }
}

/// Dimension a texture view is interpreted with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureViewDimension {
    D2,
    D3,
}

/// Access mode of a storage texture binding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageTextureAccess {
    WriteOnly,
    ReadWrite,
}

/// Texture view descriptor. The default covers every mip level and lets the
/// backend infer the dimension from the texture.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TextureViewDescriptor {
    pub label: Option<String>,
    pub base_mip_level: u32,
    pub mip_level_count: Option<u32>,
    pub dimension: Option<TextureViewDimension>,
}

impl TextureViewDescriptor {
    /// View over a single mip level
    pub fn single_mip(level: u32, dimension: TextureViewDimension) -> Self {
        Self {
            label: None,
            base_mip_level: level,
            mip_level_count: Some(1),
            dimension: Some(dimension),
        }
    }
}

/// Destination of a texture upload: one full mip level, tightly packed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureRegion {
    pub mip_level: u32,
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    pub bytes_per_pixel: u32,
}

impl TextureRegion {
    pub fn level_3d(mip_level: u32, size: u32, format: TextureFormat) -> Self {
        Self {
            mip_level,
            width: size,
            height: size,
            depth: size,
            bytes_per_pixel: format.bytes_per_pixel(),
        }
    }

    /// Expected length of the data slice in bytes
    pub fn byte_len(&self) -> usize {
        self.width as usize
            * self.height as usize
            * self.depth as usize
            * self.bytes_per_pixel as usize
    }
}

bit_flags! {
    BufferUsage {
        COPY_DST = 1 << 0,
        INDEX = 1 << 1,
        VERTEX = 1 << 2,
        UNIFORM = 1 << 3,
        STORAGE = 1 << 4,
    }
}

/// Texture descriptor
#[derive(Debug, Clone)]
pub struct TextureDescriptor {
    pub label: Option<String>,
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    pub mip_levels: u32,
    pub format: TextureFormat,
    pub usage: TextureUsage,
}

impl Default for TextureDescriptor {
    fn default() -> Self {
        Self {
            label: None,
            width: 1,
            height: 1,
            depth: 1,
            mip_levels: 1,
            format: TextureFormat::Rgba8Unorm,
            usage: TextureUsage::TEXTURE_BINDING | TextureUsage::COPY_DST,
        }
    }
}

/// Buffer descriptor
#[derive(Debug, Clone)]
pub struct BufferDescriptor {
    pub label: Option<String>,
    pub size: u64,
    pub usage: BufferUsage,
    pub mapped_at_creation: bool,
}

/// Vertex attribute format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VertexFormat {
    Float32x2,
    Float32x3,
    Float32x4,
}

impl VertexFormat {
    pub fn size(&self) -> u64 {
        match self {
            VertexFormat::Float32x2 => 8,
            VertexFormat::Float32x3 => 12,
            VertexFormat::Float32x4 => 16,
        }
    }
}

/// Vertex attribute description
#[derive(Debug, Clone)]
pub struct VertexAttribute {
    pub location: u32,
    pub format: VertexFormat,
    pub offset: u64,
}

/// Per-vertex buffer layout
#[derive(Debug, Clone)]
pub struct VertexBufferLayout {
    pub array_stride: u64,
    pub attributes: Vec<VertexAttribute>,
}

/// Scene vertex: position, normal, UV and a linear RGBA albedo.
///
/// The voxelization shader reads vertices as raw `f32` storage data, so the
/// layout is twelve tightly packed floats.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: Vec3,
    pub normal: Vec3,
    pub uv: Vec2,
    pub color: Vec4,
}

impl Vertex {
    /// Number of `f32` values per vertex.
    pub const FLOATS: usize = 12;

    pub fn new(position: Vec3, normal: Vec3, uv: Vec2, color: Vec4) -> Self {
        Self {
            position,
            normal,
            uv,
            color,
        }
    }

    pub fn layout() -> VertexBufferLayout {
        VertexBufferLayout {
            array_stride: std::mem::size_of::<Self>() as u64,
            attributes: vec![
                VertexAttribute {
                    location: 0,
                    format: VertexFormat::Float32x3,
                    offset: 0,
                },
                VertexAttribute {
                    location: 1,
                    format: VertexFormat::Float32x3,
                    offset: 12,
                },
                VertexAttribute {
                    location: 2,
                    format: VertexFormat::Float32x2,
                    offset: 24,
                },
                VertexAttribute {
                    location: 3,
                    format: VertexFormat::Float32x4,
                    offset: 32,
                },
            ],
        }
    }
}

/// Cull mode. Pipelines always rasterize counter-clockwise triangle lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CullMode {
    None,
    Back,
}

/// Depth compare function
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareFunction {
    Less,
    LessEqual,
    Always,
}

/// Filter mode for samplers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterMode {
    Nearest,
    Linear,
}

/// Sampler descriptor. Addressing is always clamp-to-edge.
#[derive(Debug, Clone)]
pub struct SamplerDescriptor {
    pub label: Option<String>,
    pub mag_filter: FilterMode,
    pub min_filter: FilterMode,
    pub mipmap_filter: FilterMode,
}

impl Default for SamplerDescriptor {
    fn default() -> Self {
        Self {
            label: None,
            mag_filter: FilterMode::Linear,
            min_filter: FilterMode::Linear,
            mipmap_filter: FilterMode::Linear,
        }
    }
}
