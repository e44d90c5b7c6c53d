//! Voxel cone tracing pipeline
//!
//! Passes, in frame order:
//! 1. Voxelize - scatters the scene into the voxel volume and pre-filters it
//! 2. Visualize - optional diagnostic drawing one cube per occupied cell
//! 3. Cone trace - forward pass shading the scene with direct light plus
//!    indirect light gathered through the volume
//!
//! Each pass owns its GPU resources and frees them in `release`.

/// Point light shading shared by the voxelization and cone tracing shaders.
/// Mirrors [`PointLight::shade`](crate::scene::PointLight::shade).
macro_rules! point_light_wgsl {
    () => {
        r#"
fn light_attenuation(distance: f32, radius: f32) -> f32 {
    if radius <= 0.0 {
        return 1.0;
    }
    let x = min(distance / radius, 1.0);
    let falloff = 1.0 - x * x;
    return falloff * falloff;
}

fn shade_point_light(
    light_position: vec3<f32>,
    light_color: vec3<f32>,
    intensity: f32,
    ambient: f32,
    radius: f32,
    position: vec3<f32>,
    normal: vec3<f32>,
    albedo: vec3<f32>
) -> vec3<f32> {
    let to_light = light_position - position;
    let distance = length(to_light);
    var n_dot_l = 0.0;
    if distance > 1e-6 {
        n_dot_l = max(dot(normal, to_light / distance), 0.0);
    }
    let direct = light_color * intensity * n_dot_l * light_attenuation(distance, radius);
    return albedo * (vec3<f32>(ambient) + direct);
}
"#
    };
}

pub mod cone_trace_pass;
pub mod visualize_pass;
pub mod voxelize_pass;

pub use cone_trace_pass::ConeTracer;
pub use visualize_pass::Visualizer;
pub use voxelize_pass::Voxelizer;

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::resources::Mesh;
use crate::voxel::VoxelGrid;

/// Scene geometry on the GPU.
///
/// Both buffers are also bound as storage so the voxelizer can fetch whole
/// triangles in its vertex shader.
#[derive(Debug)]
pub struct GeometryBuffers {
    pub vertex_buffer: BufferHandle,
    pub index_buffer: BufferHandle,
    pub index_count: u32,
}

impl GeometryBuffers {
    pub fn upload<B: GraphicsBackend>(backend: &mut B, mesh: &Mesh) -> BackendResult<Self> {
        let vertex_buffer = backend.create_buffer_init(
            &BufferDescriptor {
                label: Some(format!("{} Vertices", mesh.name)),
                size: mesh.vertex_bytes().len() as u64,
                usage: BufferUsage::VERTEX | BufferUsage::STORAGE,
                mapped_at_creation: false,
            },
            mesh.vertex_bytes(),
        )?;
        let index_buffer = backend.create_buffer_init(
            &BufferDescriptor {
                label: Some(format!("{} Indices", mesh.name)),
                size: mesh.index_bytes().len() as u64,
                usage: BufferUsage::INDEX | BufferUsage::STORAGE,
                mapped_at_creation: false,
            },
            mesh.index_bytes(),
        )?;
        log::info!(
            "Uploaded geometry '{}': {} vertices, {} indices",
            mesh.name,
            mesh.vertex_count(),
            mesh.index_count()
        );
        Ok(Self {
            vertex_buffer,
            index_buffer,
            index_count: mesh.index_count() as u32,
        })
    }

    pub fn release<B: GraphicsBackend>(&self, backend: &mut B) {
        backend.destroy_buffer(self.vertex_buffer);
        backend.destroy_buffer(self.index_buffer);
    }
}

/// The main color and depth targets with the full-window viewport.
///
/// Passes that render to the window open their render pass through
/// [`RenderTargets::begin`], which loads the existing contents and sets the
/// viewport again, whatever an earlier pass left bound.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderTargets {
    pub color: TextureViewHandle,
    pub depth: TextureViewHandle,
    pub viewport: Viewport,
}

impl RenderTargets {
    pub fn new(color: TextureViewHandle, depth: TextureViewHandle, width: u32, height: u32) -> Self {
        Self {
            color,
            depth,
            viewport: Viewport::from_size(width, height),
        }
    }

    /// Begin a render pass on the targets, keeping their contents
    pub fn begin<B: GraphicsBackend>(&self, backend: &mut B, label: &str) {
        backend.begin_render_pass(&RenderPassDescriptor {
            label: Some(label.into()),
            color_attachments: vec![ColorAttachment {
                view: self.color,
                resolve_target: None,
                load_op: LoadOp::Load,
                store_op: StoreOp::Store,
            }],
            depth_stencil_attachment: Some(DepthStencilAttachment {
                view: self.depth,
                depth_load_op: LoadOp::Load,
                depth_store_op: StoreOp::Store,
                depth_clear_value: 1.0,
            }),
        });
        self.apply_viewport(backend);
    }

    pub fn apply_viewport<B: GraphicsBackend>(&self, backend: &mut B) {
        backend.set_viewport(self.viewport);
    }
}

/// Read-only handle to the voxel volume
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VolumeView {
    /// Premultiplied radiance and opacity, full mip chain
    pub radiance: TextureViewHandle,
    /// Encoded normals of level 0, alpha marks occupied cells
    pub normals: TextureViewHandle,
    pub grid: VoxelGrid,
}

impl VolumeView {
    pub fn resolution(&self) -> u32 {
        self.grid.resolution()
    }

    pub fn mip_count(&self) -> u32 {
        self.grid.mip_count()
    }
}

/// Depth attachment matching the window size
#[derive(Debug)]
pub struct DepthTarget {
    pub texture: TextureHandle,
    pub view: TextureViewHandle,
    pub width: u32,
    pub height: u32,
}

impl DepthTarget {
    pub const FORMAT: TextureFormat = TextureFormat::Depth32Float;

    pub fn new<B: GraphicsBackend>(backend: &mut B, width: u32, height: u32) -> BackendResult<Self> {
        let texture = backend.create_texture(&TextureDescriptor {
            label: Some("Depth Buffer".into()),
            width,
            height,
            depth: 1,
            mip_levels: 1,
            format: Self::FORMAT,
            usage: TextureUsage::RENDER_ATTACHMENT,
        })?;
        let view = backend.create_texture_view(texture)?;
        Ok(Self {
            texture,
            view,
            width,
            height,
        })
    }

    pub fn release<B: GraphicsBackend>(&self, backend: &mut B) {
        backend.destroy_texture(self.texture);
    }
}

/// Uniform buffer with `UNIFORM | COPY_DST` usage sized for `T`
pub(crate) fn create_uniform_buffer<B: GraphicsBackend, T: bytemuck::Pod>(
    backend: &mut B,
    label: &str,
) -> BackendResult<BufferHandle> {
    backend.create_buffer(&BufferDescriptor {
        label: Some(label.into()),
        size: std::mem::size_of::<T>() as u64,
        usage: BufferUsage::UNIFORM | BufferUsage::COPY_DST,
        mapped_at_creation: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::dummy::{DummyBackend, RecordedCommand};
    use glam::Vec4;

    #[test]
    fn test_geometry_upload_and_release() {
        let mut backend = DummyBackend::with_size(64, 64);
        let mesh = Mesh::cube(1.0, Vec4::ONE);
        let geometry = GeometryBuffers::upload(&mut backend, &mesh).unwrap();
        assert_eq!(geometry.index_count, 36);
        let desc = backend.buffer_descriptor(geometry.vertex_buffer).unwrap();
        assert!(desc.usage.contains(BufferUsage::STORAGE | BufferUsage::VERTEX));
        assert_eq!(desc.size, mesh.vertex_bytes().len() as u64);
        geometry.release(&mut backend);
        assert_eq!(backend.live_buffer_count(), 0);
    }

    #[test]
    fn test_targets_begin_restores_viewport() {
        let mut backend = DummyBackend::with_size(640, 480);
        let frame = backend.begin_frame().unwrap();
        let depth = DepthTarget::new(&mut backend, 640, 480).unwrap();
        let targets = RenderTargets::new(frame.swapchain_view, depth.view, 640, 480);
        targets.begin(&mut backend, "Test");
        backend.end_render_pass();
        backend.end_frame().unwrap();

        let commands = backend.take_commands();
        assert!(commands.contains(&RecordedCommand::SetViewport(Viewport::from_size(640, 480))));
        assert!(commands.iter().any(|c| matches!(
            c,
            RecordedCommand::BeginRenderPass { clears_color: false, depth_view: Some(_), .. }
        )));
    }
}
