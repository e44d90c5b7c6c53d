//! Voxel volume visualizer
//!
//! Draws one cube per cell of a chosen mip level. Cells with zero opacity
//! collapse to a degenerate position and produce no fragments.

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::config::VisualizeMode;
use crate::pipeline::{create_uniform_buffer, DepthTarget, RenderTargets, VolumeView};
use crate::scene::TransformSet;
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec4};

/// Vertices per cube instance
pub const CUBE_VERTEX_COUNT: u32 = 36;

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct VisualizeUniforms {
    pub view_proj: Mat4,
    /// xyz: volume minimum corner, w: voxel size at level 0
    pub volume_min_voxel_size: Vec4,
    /// x: level, y: level resolution, z: mode
    pub params: [u32; 4],
}

pub const VISUALIZE_SHADER: &str = r#"
struct VisualizeUniforms {
    view_proj: mat4x4<f32>,
    volume_min_voxel_size: vec4<f32>,
    params: vec4<u32>,
}

@group(0) @binding(0) var<uniform> visualize: VisualizeUniforms;
@group(0) @binding(1) var radiance_volume: texture_3d<f32>;
@group(0) @binding(2) var normal_volume: texture_3d<f32>;

var<private> CUBE_CORNERS: array<vec3<f32>, 8> = array<vec3<f32>, 8>(
    vec3<f32>(0.0, 0.0, 0.0),
    vec3<f32>(1.0, 0.0, 0.0),
    vec3<f32>(1.0, 1.0, 0.0),
    vec3<f32>(0.0, 1.0, 0.0),
    vec3<f32>(0.0, 0.0, 1.0),
    vec3<f32>(1.0, 0.0, 1.0),
    vec3<f32>(1.0, 1.0, 1.0),
    vec3<f32>(0.0, 1.0, 1.0)
);

var<private> CUBE_INDICES: array<u32, 36> = array<u32, 36>(
    0u, 2u, 1u, 0u, 3u, 2u,
    4u, 5u, 6u, 4u, 6u, 7u,
    0u, 1u, 5u, 0u, 5u, 4u,
    3u, 6u, 2u, 3u, 7u, 6u,
    0u, 4u, 7u, 0u, 7u, 3u,
    1u, 2u, 6u, 1u, 6u, 5u
);

struct VertexOutput {
    @builtin(position) clip_position: vec4<f32>,
    @location(0) color: vec4<f32>,
}

@vertex
fn vs_main(
    @builtin(vertex_index) vertex_index: u32,
    @builtin(instance_index) instance_index: u32
) -> VertexOutput {
    let level = visualize.params.x;
    let resolution = visualize.params.y;
    let mode = visualize.params.z;
    let coord = vec3<u32>(
        instance_index % resolution,
        (instance_index / resolution) % resolution,
        instance_index / (resolution * resolution)
    );

    var output: VertexOutput;
    let radiance = textureLoad(radiance_volume, vec3<i32>(coord), i32(level));
    if radiance.a <= 0.0 {
        output.clip_position = vec4<f32>(0.0, 0.0, 0.0, 1.0);
        output.color = vec4<f32>(0.0);
        return output;
    }

    if mode == 1u {
        let normal = textureLoad(normal_volume, vec3<i32>(coord << vec3<u32>(level)), 0);
        output.color = vec4<f32>(normal.rgb, 1.0);
    } else {
        output.color = vec4<f32>(radiance.rgb / radiance.a, 1.0);
    }

    let cell_size = visualize.volume_min_voxel_size.w * f32(1u << level);
    let corner = CUBE_CORNERS[CUBE_INDICES[vertex_index]];
    let position = visualize.volume_min_voxel_size.xyz + (vec3<f32>(coord) + corner) * cell_size;
    output.clip_position = visualize.view_proj * vec4<f32>(position, 1.0);
    return output;
}

@fragment
fn fs_main(input: VertexOutput) -> @location(0) vec4<f32> {
    return input.color;
}
"#;

/// Diagnostic view of the voxel volume
#[derive(Debug)]
pub struct Visualizer {
    uniforms: VisualizeUniforms,
    uniform_buffer: BufferHandle,
    bind_group: BindGroupHandle,
    pipeline: RenderPipelineHandle,
    mode: VisualizeMode,
}

impl Visualizer {
    /// Levels past the last mip are clamped to it.
    pub fn init<B: GraphicsBackend>(
        backend: &mut B,
        volume: &VolumeView,
        level: u32,
        mode: VisualizeMode,
    ) -> BackendResult<Self> {
        let last = volume.mip_count() - 1;
        let level = if level > last {
            log::warn!("Visualize level {} clamped to {}", level, last);
            last
        } else {
            level
        };

        let uniform_buffer = create_uniform_buffer::<B, VisualizeUniforms>(backend, "Visualize Uniforms")?;
        let volume_entry = |binding| BindGroupLayoutEntry {
            binding,
            visibility: ShaderStageFlags::VERTEX,
            ty: BindingType::Texture {
                sample_type: TextureSampleType::Float { filterable: true },
                view_dimension: TextureViewDimension::D3,
            },
        };
        let layout = backend.create_bind_group_layout(&[
            BindGroupLayoutEntry {
                binding: 0,
                visibility: ShaderStageFlags::VERTEX,
                ty: BindingType::UniformBuffer,
            },
            volume_entry(1),
            volume_entry(2),
        ])?;
        let bind_group = backend.create_bind_group(
            layout,
            &[
                (
                    0,
                    BindGroupEntry::Buffer {
                        buffer: uniform_buffer,
                        offset: 0,
                        size: None,
                    },
                ),
                (1, BindGroupEntry::Texture(volume.radiance)),
                (2, BindGroupEntry::Texture(volume.normals)),
            ],
        )?;
        let pipeline = backend.create_render_pipeline(&RenderPipelineDescriptor {
            label: Some("Voxel Visualize Pipeline".into()),
            vertex_shader: VISUALIZE_SHADER.into(),
            fragment_shader: Some(VISUALIZE_SHADER.into()),
            vertex_layouts: vec![],
            bind_group_layouts: vec![layout],
            cull_mode: CullMode::Back,
            depth_stencil: Some(DepthStencilState {
                format: DepthTarget::FORMAT,
                depth_write_enabled: true,
                depth_compare: CompareFunction::Less,
            }),
            color_targets: vec![ColorTargetState {
                format: backend.swapchain_format(),
                write_mask: ColorWrites::ALL,
            }],
        })?;

        let grid = &volume.grid;
        Ok(Self {
            uniforms: VisualizeUniforms {
                view_proj: Mat4::IDENTITY,
                volume_min_voxel_size: grid.origin().extend(grid.voxel_size()),
                params: [level, grid.level_resolution(level), mode.shader_index(), 0],
            },
            uniform_buffer,
            bind_group,
            pipeline,
            mode,
        })
    }

    pub fn set_matrix(&mut self, transforms: &TransformSet) {
        self.uniforms.view_proj = transforms.view_projection();
    }

    pub fn render<B: GraphicsBackend>(&self, backend: &mut B, targets: &RenderTargets) {
        backend.write_buffer(self.uniform_buffer, 0, bytemuck::bytes_of(&self.uniforms));
        targets.begin(backend, "Voxel Visualize");
        backend.set_render_pipeline(self.pipeline);
        backend.set_bind_group(0, self.bind_group);
        backend.draw(0..CUBE_VERTEX_COUNT, 0..self.instance_count());
        backend.end_render_pass();
    }

    pub fn level(&self) -> u32 {
        self.uniforms.params[0]
    }

    pub fn mode(&self) -> VisualizeMode {
        self.mode
    }

    /// One instance per cell of the drawn level
    pub fn instance_count(&self) -> u32 {
        self.uniforms.params[1].pow(3)
    }

    pub fn release<B: GraphicsBackend>(&self, backend: &mut B) {
        backend.destroy_buffer(self.uniform_buffer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::dummy::{DummyBackend, RecordedCommand};
    use crate::resources::Aabb;
    use crate::voxel::VoxelGrid;
    use glam::Vec3;

    fn volume(backend: &mut DummyBackend, resolution: u32) -> VolumeView {
        let grid = VoxelGrid::from_bounds(&Aabb::from_center_extents(Vec3::ZERO, Vec3::ONE), resolution).unwrap();
        let desc = TextureDescriptor {
            label: None,
            width: resolution,
            height: resolution,
            depth: resolution,
            mip_levels: grid.mip_count(),
            format: TextureFormat::Rgba16Float,
            usage: TextureUsage::TEXTURE_BINDING,
        };
        let radiance = backend.create_texture(&desc).unwrap();
        let normals = backend
            .create_texture(&TextureDescriptor {
                mip_levels: 1,
                format: TextureFormat::Rgba8Unorm,
                ..desc
            })
            .unwrap();
        VolumeView {
            radiance: backend.create_texture_view(radiance).unwrap(),
            normals: backend.create_texture_view(normals).unwrap(),
            grid,
        }
    }

    #[test]
    fn test_uniform_layout() {
        assert_eq!(std::mem::size_of::<VisualizeUniforms>(), 96);
    }

    #[test]
    fn test_draws_one_cube_per_cell_of_level() {
        let mut backend = DummyBackend::with_size(200, 100);
        let view = volume(&mut backend, 32);
        let visualizer = Visualizer::init(&mut backend, &view, 2, VisualizeMode::Radiance).unwrap();
        assert_eq!(visualizer.instance_count(), 8 * 8 * 8);

        let frame = backend.begin_frame().unwrap();
        let depth = DepthTarget::new(&mut backend, 200, 100).unwrap();
        let targets = RenderTargets::new(frame.swapchain_view, depth.view, 200, 100);
        visualizer.render(&mut backend, &targets);
        backend.end_frame().unwrap();

        let commands = backend.take_commands();
        assert!(commands.contains(&RecordedCommand::SetViewport(Viewport::from_size(200, 100))));
        assert!(commands.contains(&RecordedCommand::Draw {
            vertices: 0..CUBE_VERTEX_COUNT,
            instances: 0..512,
        }));
    }

    #[test]
    fn test_level_clamped_to_last_mip() {
        let mut backend = DummyBackend::with_size(64, 64);
        let view = volume(&mut backend, 16);
        let visualizer = Visualizer::init(&mut backend, &view, 9, VisualizeMode::Normal).unwrap();
        assert_eq!(visualizer.level(), 4);
        assert_eq!(visualizer.instance_count(), 1);
        assert_eq!(visualizer.mode(), VisualizeMode::Normal);
    }

    #[test]
    fn test_set_matrix_records_nothing() {
        let mut backend = DummyBackend::with_size(64, 64);
        let view = volume(&mut backend, 8);
        let mut visualizer = Visualizer::init(&mut backend, &view, 0, VisualizeMode::Radiance).unwrap();
        backend.take_commands();
        visualizer.set_matrix(&TransformSet::new(Mat4::IDENTITY));
        assert!(backend.commands().is_empty());
    }
}
