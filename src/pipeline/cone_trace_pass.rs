//! Cone traced forward pass
//!
//! Draws the scene once with direct point light shading plus diffuse
//! indirect light gathered from the voxel volume by six cones per fragment.

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::pipeline::{create_uniform_buffer, DepthTarget, GeometryBuffers, RenderTargets, VolumeView};
use crate::scene::{PointLight, Scene, TransformSet};
use crate::voxel::ConeTraceSettings;
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec4};

/// Cone tracing uniforms
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct ConeTraceUniforms {
    pub view_proj: Mat4,
    pub world: Mat4,
    pub world_inv_transpose: Mat4,
    /// xyz: camera position, w: time in seconds
    pub camera_position: Vec4,
    /// xyz: volume minimum corner, w: voxel size
    pub volume_min_voxel_size: Vec4,
    /// x: volume edge length, y: mip count, z: max cone distance, w: tan(aperture)
    pub volume_params: Vec4,
    pub light_position_intensity: Vec4,
    pub light_color_ambient: Vec4,
    /// x: light radius
    pub light_params: Vec4,
    /// x: step scale, y: opacity cutoff, z: indirect strength, w: start offset in voxels
    pub trace_params: Vec4,
}

impl ConeTraceUniforms {
    fn new(volume: &VolumeView, settings: &ConeTraceSettings) -> Self {
        let grid = &volume.grid;
        Self {
            view_proj: Mat4::IDENTITY,
            world: Mat4::IDENTITY,
            world_inv_transpose: Mat4::IDENTITY,
            camera_position: Vec4::ZERO,
            volume_min_voxel_size: grid.origin().extend(grid.voxel_size()),
            volume_params: Vec4::new(
                grid.size(),
                grid.mip_count() as f32,
                settings.max_distance * grid.size(),
                settings.aperture.tan(),
            ),
            light_position_intensity: Vec4::ZERO,
            light_color_ambient: Vec4::ZERO,
            light_params: Vec4::ZERO,
            trace_params: Vec4::new(
                settings.step_scale,
                settings.opacity_cutoff,
                settings.indirect_strength,
                settings.start_offset,
            ),
        }
    }
}

pub const CONE_TRACE_SHADER: &str = concat!(
    point_light_wgsl!(),
    r#"
struct ConeTraceUniforms {
    view_proj: mat4x4<f32>,
    world: mat4x4<f32>,
    world_inv_transpose: mat4x4<f32>,
    camera_position: vec4<f32>,
    volume_min_voxel_size: vec4<f32>,
    volume_params: vec4<f32>,
    light_position_intensity: vec4<f32>,
    light_color_ambient: vec4<f32>,
    light_params: vec4<f32>,
    trace_params: vec4<f32>,
}

@group(0) @binding(0) var<uniform> frame: ConeTraceUniforms;
@group(0) @binding(1) var radiance_volume: texture_3d<f32>;
@group(0) @binding(2) var volume_sampler: sampler;

const MAX_STEPS: u32 = 128u;
const RING_CONES: u32 = 5u;
const CENTER_CONE_WEIGHT: f32 = 0.25;
const RING_CONE_WEIGHT: f32 = 0.15;
const RING_CONE_COS: f32 = 0.5;
const TAU: f32 = 6.28318530718;

struct VertexInput {
    @location(0) position: vec3<f32>,
    @location(1) normal: vec3<f32>,
    @location(2) uv: vec2<f32>,
    @location(3) color: vec4<f32>,
}

struct VertexOutput {
    @builtin(position) clip_position: vec4<f32>,
    @location(0) world_position: vec3<f32>,
    @location(1) world_normal: vec3<f32>,
    @location(2) color: vec4<f32>,
}

@vertex
fn vs_main(input: VertexInput) -> VertexOutput {
    let world_position = frame.world * vec4<f32>(input.position, 1.0);
    var output: VertexOutput;
    output.clip_position = frame.view_proj * world_position;
    output.world_position = world_position.xyz;
    output.world_normal = (frame.world_inv_transpose * vec4<f32>(input.normal, 0.0)).xyz;
    output.color = input.color;
    return output;
}

// Front-to-back march of one cone, premultiplied radiance in rgb and
// accumulated opacity in a
fn trace_cone(origin: vec3<f32>, direction: vec3<f32>) -> vec4<f32> {
    let volume_min = frame.volume_min_voxel_size.xyz;
    let voxel = frame.volume_min_voxel_size.w;
    let volume_size = frame.volume_params.x;
    let max_lod = frame.volume_params.y - 1.0;
    let max_distance = frame.volume_params.z;
    let tan_aperture = frame.volume_params.w;
    let step_scale = max(frame.trace_params.x, 0.05);
    let cutoff = frame.trace_params.y;

    var radiance = vec3<f32>(0.0);
    var alpha = 0.0;
    var dist = voxel;
    for (var i = 0u; i < MAX_STEPS; i = i + 1u) {
        if dist >= max_distance || alpha >= cutoff {
            break;
        }
        let uvw = (origin + direction * dist - volume_min) / volume_size;
        if any(uvw < vec3<f32>(0.0)) || any(uvw > vec3<f32>(1.0)) {
            break;
        }
        let diameter = max(2.0 * tan_aperture * dist, voxel);
        let lod = clamp(log2(diameter / voxel), 0.0, max_lod);
        let texel = textureSampleLevel(radiance_volume, volume_sampler, uvw, lod);
        radiance = radiance + texel.rgb * (1.0 - alpha);
        alpha = alpha + texel.a * (1.0 - alpha);
        dist = dist + diameter * step_scale;
    }
    return vec4<f32>(radiance, clamp(alpha, 0.0, 1.0));
}

// Weighted bounce radiance in rgb, weighted cone opacity in a
fn trace_indirect(position: vec3<f32>, normal: vec3<f32>) -> vec4<f32> {
    var up = vec3<f32>(0.0, 1.0, 0.0);
    if abs(normal.y) >= 0.9 {
        up = vec3<f32>(1.0, 0.0, 0.0);
    }
    let tangent = normalize(cross(normal, up));
    let bitangent = normalize(cross(tangent, normal));
    let origin = position + normal * frame.volume_min_voxel_size.w * frame.trace_params.w;
    let sin_tilt = sqrt(1.0 - RING_CONE_COS * RING_CONE_COS);

    let center = trace_cone(origin, normal);
    var radiance = center.rgb * CENTER_CONE_WEIGHT;
    var occlusion = center.a * CENTER_CONE_WEIGHT;
    var total_weight = CENTER_CONE_WEIGHT;
    for (var i = 0u; i < RING_CONES; i = i + 1u) {
        let angle = f32(i) / f32(RING_CONES) * TAU;
        let direction = normalize(
            normal * RING_CONE_COS
                + tangent * (cos(angle) * sin_tilt)
                + bitangent * (sin(angle) * sin_tilt)
        );
        let weight = RING_CONE_WEIGHT * max(dot(direction, normal), 0.0);
        let cone = trace_cone(origin, direction);
        radiance = radiance + cone.rgb * weight;
        occlusion = occlusion + cone.a * weight;
        total_weight = total_weight + weight;
    }
    return vec4<f32>(radiance / total_weight * frame.trace_params.z, occlusion / total_weight);
}

@fragment
fn fs_main(input: VertexOutput) -> @location(0) vec4<f32> {
    let normal = normalize(input.world_normal);
    let albedo = input.color.rgb;
    let indirect = trace_indirect(input.world_position, normal);
    let direct = shade_point_light(
        frame.light_position_intensity.xyz,
        frame.light_color_ambient.rgb,
        frame.light_position_intensity.w,
        frame.light_color_ambient.a * (1.0 - indirect.a),
        frame.light_params.x,
        input.world_position,
        normal,
        albedo
    );
    return vec4<f32>(direct + albedo * indirect.rgb, 1.0);
}
"#
);

/// Forward pass shading the scene with direct and cone traced indirect light
#[derive(Debug)]
pub struct ConeTracer {
    light: PointLight,
    settings: ConeTraceSettings,
    uniforms: ConeTraceUniforms,
    uniform_buffer: BufferHandle,
    bind_group: BindGroupHandle,
    pipeline: RenderPipelineHandle,
    vertex_buffer: BufferHandle,
    index_buffer: BufferHandle,
    index_count: u32,
}

impl ConeTracer {
    pub fn init<B: GraphicsBackend>(
        backend: &mut B,
        scene: &Scene,
        geometry: &GeometryBuffers,
        volume: &VolumeView,
        settings: ConeTraceSettings,
    ) -> BackendResult<Self> {
        let uniform_buffer = create_uniform_buffer::<B, ConeTraceUniforms>(backend, "Cone Trace Uniforms")?;
        let sampler = backend.create_sampler(&SamplerDescriptor {
            label: Some("Voxel Sampler".into()),
            ..Default::default()
        })?;

        let layout = backend.create_bind_group_layout(&[
            BindGroupLayoutEntry {
                binding: 0,
                visibility: ShaderStageFlags::VERTEX_FRAGMENT,
                ty: BindingType::UniformBuffer,
            },
            BindGroupLayoutEntry {
                binding: 1,
                visibility: ShaderStageFlags::FRAGMENT,
                ty: BindingType::Texture {
                    sample_type: TextureSampleType::Float { filterable: true },
                    view_dimension: TextureViewDimension::D3,
                },
            },
            BindGroupLayoutEntry {
                binding: 2,
                visibility: ShaderStageFlags::FRAGMENT,
                ty: BindingType::Sampler { comparison: false },
            },
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
                (2, BindGroupEntry::Sampler(sampler)),
            ],
        )?;

        let pipeline = backend.create_render_pipeline(&RenderPipelineDescriptor {
            label: Some("Cone Trace Pipeline".into()),
            vertex_shader: CONE_TRACE_SHADER.into(),
            fragment_shader: Some(CONE_TRACE_SHADER.into()),
            vertex_layouts: vec![Vertex::layout()],
            bind_group_layouts: vec![layout],
            cull_mode: CullMode::None,
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

        log::debug!(
            "Cone tracer: aperture {:.1} deg, max distance {:.3}",
            settings.aperture.to_degrees(),
            settings.max_distance * volume.grid.size()
        );

        Ok(Self {
            light: scene.light,
            settings,
            uniforms: ConeTraceUniforms::new(volume, &settings),
            uniform_buffer,
            bind_group,
            pipeline,
            vertex_buffer: geometry.vertex_buffer,
            index_buffer: geometry.index_buffer,
            index_count: geometry.index_count,
        })
    }

    /// Stage camera and world matrices for the next draw
    pub fn set_matrix(&mut self, transforms: &TransformSet) {
        self.uniforms.view_proj = transforms.view_projection();
        self.uniforms.world = transforms.world();
        self.uniforms.world_inv_transpose = transforms.world_inv_transpose();
        let time = self.uniforms.camera_position.w;
        self.uniforms.camera_position = transforms.camera_position.extend(time);
    }

    /// Draw the scene into `targets`, keeping what earlier passes drew
    pub fn render<B: GraphicsBackend>(&mut self, backend: &mut B, targets: &RenderTargets, time_seconds: f32) {
        let [position_intensity, color_ambient] = self.light.gpu_data(time_seconds);
        self.uniforms.camera_position.w = time_seconds;
        self.uniforms.light_position_intensity = position_intensity;
        self.uniforms.light_color_ambient = color_ambient;
        self.uniforms.light_params = Vec4::new(self.light.radius, 0.0, 0.0, 0.0);
        backend.write_buffer(self.uniform_buffer, 0, bytemuck::bytes_of(&self.uniforms));

        targets.begin(backend, "Cone Trace");
        backend.set_render_pipeline(self.pipeline);
        backend.set_bind_group(0, self.bind_group);
        backend.set_vertex_buffer(0, self.vertex_buffer, 0);
        backend.set_index_buffer(self.index_buffer, 0, IndexFormat::Uint32);
        backend.draw_indexed(0..self.index_count, 0, 0..1);
        backend.end_render_pass();
    }

    pub fn settings(&self) -> &ConeTraceSettings {
        &self.settings
    }

    pub fn uniforms(&self) -> &ConeTraceUniforms {
        &self.uniforms
    }

    pub fn release<B: GraphicsBackend>(&self, backend: &mut B) {
        backend.destroy_buffer(self.uniform_buffer);
    }
}
