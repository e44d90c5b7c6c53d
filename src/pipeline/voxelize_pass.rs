//! Voxelization pass
//!
//! Builds the radiance volume from the scene triangles. On the GPU this runs
//! in three steps:
//! 1. Scatter - every triangle is rasterized from its dominant axis into a
//!    `resolution x resolution` viewport. Each fragment finds its voxel from
//!    its world position and folds its lit color and normal into a packed
//!    RGBA8 running average with a compare-exchange loop.
//! 2. Resolve - a compute pass converts the packed averages into level 0 of
//!    the 3D radiance texture and the normal texture.
//! 3. Mips - a compute pass per level averages each 2x2x2 block.
//!
//! The CPU strategy runs the reference rasterizer from [`crate::voxel`] and
//! uploads every level instead.

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::pipeline::{create_uniform_buffer, GeometryBuffers, VolumeView};
use crate::resources::Mesh;
use crate::scene::{PointLight, Scene, TransformSet};
use crate::voxel::{voxelize_mesh, VoxelGrid, VoxelVolume};
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3, Vec4};

/// Format of the radiance volume
pub const RADIANCE_FORMAT: TextureFormat = TextureFormat::Rgba16Float;
/// Format of the normal volume
pub const NORMAL_FORMAT: TextureFormat = TextureFormat::Rgba8Unorm;
/// Compute workgroup edge, matches `@workgroup_size(4, 4, 4)`
const WORKGROUP_SIZE: u32 = 4;

/// Voxelization uniforms
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct VoxelizeUniforms {
    pub world: Mat4,
    pub world_inv_transpose: Mat4,
    pub axis_view_proj: [Mat4; 3],
    /// xyz: volume minimum corner, w: voxel size
    pub volume_min_voxel_size: Vec4,
    /// xyz: light position, w: intensity
    pub light_position_intensity: Vec4,
    /// rgb: light color, a: ambient
    pub light_color_ambient: Vec4,
    /// x: light radius
    pub light_params: Vec4,
    /// x: resolution
    pub grid: [u32; 4],
}

impl VoxelizeUniforms {
    fn new(grid: &VoxelGrid) -> Self {
        Self {
            world: Mat4::IDENTITY,
            world_inv_transpose: Mat4::IDENTITY,
            axis_view_proj: grid.axis_view_projections(),
            volume_min_voxel_size: grid.origin().extend(grid.voxel_size()),
            light_position_intensity: Vec4::ZERO,
            light_color_ambient: Vec4::ZERO,
            light_params: Vec4::ZERO,
            grid: [grid.resolution(), 0, 0, 0],
        }
    }

    fn set_light(&mut self, light: &PointLight, time_seconds: f32) {
        let [position_intensity, color_ambient] = light.gpu_data(time_seconds);
        self.light_position_intensity = position_intensity;
        self.light_color_ambient = color_ambient;
        self.light_params = Vec4::new(light.radius, 0.0, 0.0, 0.0);
    }
}

/// Packing helpers shared by the scatter and resolve shaders
macro_rules! rgba8_wgsl {
    () => {
        r#"
fn pack_rgba8(value: vec4<f32>) -> u32 {
    let c = vec4<u32>(clamp(value, vec4<f32>(0.0), vec4<f32>(255.0)) + vec4<f32>(0.5));
    return (c.w << 24u) | (c.z << 16u) | (c.y << 8u) | c.x;
}

fn unpack_rgba8(value: u32) -> vec4<f32> {
    return vec4<f32>(
        f32(value & 0xffu),
        f32((value >> 8u) & 0xffu),
        f32((value >> 16u) & 0xffu),
        f32(value >> 24u)
    );
}
"#
    };
}

/// Running average of RGBA8 values into one atomic grid. Alpha counts the
/// samples, saturating at 255. Spins are bounded by `MAX_SPINS`.
macro_rules! accumulate_wgsl {
    ($name:literal, $grid:literal) => {
        concat!(
            "\nfn ", $name, "(index: u32, value: vec3<f32>) {",
            r#"
    let incoming = clamp(value, vec3<f32>(0.0), vec3<f32>(1.0)) * 255.0;
    var expected = 0u;
    var desired = pack_rgba8(vec4<f32>(incoming, 1.0));
    for (var spin = 0u; spin < MAX_SPINS; spin = spin + 1u) {
        let result = atomicCompareExchangeWeak(&"#, $grid, r#"[index], expected, desired);
        if result.exchanged {
            break;
        }
        expected = result.old_value;
        let current = unpack_rgba8(expected);
        let count = current.w;
        let average = (current.xyz * count + incoming) / (count + 1.0);
        desired = pack_rgba8(vec4<f32>(average, min(count + 1.0, 255.0)));
    }
}
"#
        )
    };
}

/// Scatter shader: dominant-axis rasterization into the packed grids
pub const VOXELIZE_SHADER: &str = concat!(
    point_light_wgsl!(),
    rgba8_wgsl!(),
    r#"
struct VoxelizeUniforms {
    world: mat4x4<f32>,
    world_inv_transpose: mat4x4<f32>,
    axis_view_proj: array<mat4x4<f32>, 3>,
    volume_min_voxel_size: vec4<f32>,
    light_position_intensity: vec4<f32>,
    light_color_ambient: vec4<f32>,
    light_params: vec4<f32>,
    grid: vec4<u32>,
}

@group(0) @binding(0) var<uniform> voxelize: VoxelizeUniforms;
@group(0) @binding(1) var<storage, read> vertices: array<f32>;
@group(0) @binding(2) var<storage, read> indices: array<u32>;
@group(0) @binding(3) var<storage, read_write> radiance_grid: array<atomic<u32>>;
@group(0) @binding(4) var<storage, read_write> normal_grid: array<atomic<u32>>;

const VERTEX_FLOATS: u32 = 12u;
const MAX_SPINS: u32 = 64u;

struct VertexOutput {
    @builtin(position) clip_position: vec4<f32>,
    @location(0) world_position: vec3<f32>,
    @location(1) world_normal: vec3<f32>,
    @location(2) color: vec4<f32>,
}

fn load_position(vertex: u32) -> vec3<f32> {
    let base = vertex * VERTEX_FLOATS;
    return vec3<f32>(vertices[base], vertices[base + 1u], vertices[base + 2u]);
}

fn load_normal(vertex: u32) -> vec3<f32> {
    let base = vertex * VERTEX_FLOATS + 3u;
    return vec3<f32>(vertices[base], vertices[base + 1u], vertices[base + 2u]);
}

fn load_color(vertex: u32) -> vec4<f32> {
    let base = vertex * VERTEX_FLOATS + 8u;
    return vec4<f32>(vertices[base], vertices[base + 1u], vertices[base + 2u], vertices[base + 3u]);
}

fn world_position(vertex: u32) -> vec3<f32> {
    return (voxelize.world * vec4<f32>(load_position(vertex), 1.0)).xyz;
}

fn dominant_axis(normal: vec3<f32>) -> u32 {
    let n = abs(normal);
    if n.x >= n.y && n.x >= n.z {
        return 0u;
    }
    if n.y >= n.z {
        return 1u;
    }
    return 2u;
}

@vertex
fn vs_main(@builtin(vertex_index) vertex_index: u32) -> VertexOutput {
    // Every vertex of a triangle fetches the whole triangle so all three
    // agree on the projection axis
    let first = vertex_index - vertex_index % 3u;
    let p0 = world_position(indices[first]);
    let p1 = world_position(indices[first + 1u]);
    let p2 = world_position(indices[first + 2u]);
    let axis = dominant_axis(cross(p1 - p0, p2 - p0));

    let vertex = indices[vertex_index];
    let position = world_position(vertex);
    let normal = (voxelize.world_inv_transpose * vec4<f32>(load_normal(vertex), 0.0)).xyz;

    var output: VertexOutput;
    output.clip_position = voxelize.axis_view_proj[axis] * vec4<f32>(position, 1.0);
    output.world_position = position;
    output.world_normal = normal;
    output.color = load_color(vertex);
    return output;
}

"#,
    accumulate_wgsl!("accumulate_radiance", "radiance_grid"),
    accumulate_wgsl!("accumulate_normal", "normal_grid"),
    r#"
@fragment
fn fs_main(input: VertexOutput) -> @location(0) vec4<f32> {
    let resolution = voxelize.grid.x;
    let limit = f32(resolution);
    let cell = (input.world_position - voxelize.volume_min_voxel_size.xyz) / voxelize.volume_min_voxel_size.w;
    if any(cell < vec3<f32>(-1e-4)) || any(cell > vec3<f32>(limit + 1e-4)) {
        return vec4<f32>(0.0);
    }
    let coord = vec3<u32>(clamp(floor(cell), vec3<f32>(0.0), vec3<f32>(limit - 1.0)));
    let index = coord.x + coord.y * resolution + coord.z * resolution * resolution;

    let normal = normalize(input.world_normal);
    let radiance = shade_point_light(
        voxelize.light_position_intensity.xyz,
        voxelize.light_color_ambient.rgb,
        voxelize.light_position_intensity.w,
        voxelize.light_color_ambient.a,
        voxelize.light_params.x,
        input.world_position,
        normal,
        input.color.rgb
    );
    accumulate_radiance(index, radiance);
    accumulate_normal(index, normal * 0.5 + 0.5);
    return vec4<f32>(0.0);
}
"#
);

/// Resolve shader: packed averages to level 0 of the volume textures
pub const RESOLVE_SHADER: &str = concat!(
    rgba8_wgsl!(),
    r#"
@group(0) @binding(0) var<storage, read> radiance_grid: array<u32>;
@group(0) @binding(1) var<storage, read> normal_grid: array<u32>;
@group(0) @binding(2) var radiance_volume: texture_storage_3d<rgba16float, write>;
@group(0) @binding(3) var normal_volume: texture_storage_3d<rgba8unorm, write>;

@compute @workgroup_size(4, 4, 4)
fn cs_resolve(@builtin(global_invocation_id) id: vec3<u32>) {
    let size = textureDimensions(radiance_volume);
    if any(id >= size) {
        return;
    }
    let index = id.x + id.y * size.x + id.z * size.x * size.y;

    // Occupied cells are opaque, so premultiplying leaves the color as is
    let radiance = unpack_rgba8(radiance_grid[index]);
    var value = vec4<f32>(0.0);
    if radiance.w > 0.0 {
        value = vec4<f32>(radiance.xyz / 255.0, 1.0);
    }
    textureStore(radiance_volume, id, value);

    let normal = unpack_rgba8(normal_grid[index]);
    var encoded = vec4<f32>(0.0);
    if normal.w > 0.0 {
        encoded = vec4<f32>(normal.xyz / 255.0, 1.0);
    }
    textureStore(normal_volume, id, encoded);
}
"#
);

/// Mip shader: box filter of one level into the next
pub const DOWNSAMPLE_SHADER: &str = r#"
@group(0) @binding(0) var source: texture_3d<f32>;
@group(0) @binding(1) var destination: texture_storage_3d<rgba16float, write>;

@compute @workgroup_size(4, 4, 4)
fn cs_downsample(@builtin(global_invocation_id) id: vec3<u32>) {
    let size = textureDimensions(destination);
    if any(id >= size) {
        return;
    }
    let base = vec3<i32>(id * 2u);
    var sum = vec4<f32>(0.0);
    for (var i = 0; i < 8; i = i + 1) {
        let offset = vec3<i32>(i & 1, (i >> 1u) & 1, (i >> 2u) & 1);
        sum = sum + textureLoad(source, base + offset, 0);
    }
    textureStore(destination, id, sum * 0.125);
}
"#;

fn workgroups(size: u32) -> u32 {
    size.div_ceil(WORKGROUP_SIZE).max(1)
}

/// GPU scatter resources
#[derive(Debug)]
struct GpuScatter {
    uniform_buffer: BufferHandle,
    bind_group: BindGroupHandle,
    pipeline: RenderPipelineHandle,
    radiance_grid: BufferHandle,
    normal_grid: BufferHandle,
    target_texture: TextureHandle,
    target_view: TextureViewHandle,
    resolve_pipeline: ComputePipelineHandle,
    resolve_bind_group: BindGroupHandle,
    downsample_pipeline: ComputePipelineHandle,
    /// One bind group per destination level, starting at level 1
    downsample_bind_groups: Vec<BindGroupHandle>,
    index_count: u32,
}

/// CPU reference voxelization, rebuilt only when its inputs change
#[derive(Debug)]
struct CpuScatter {
    mesh: Mesh,
    volume: VoxelVolume,
    built_for: Option<(Mat4, Vec3)>,
}

#[derive(Debug)]
enum Strategy {
    Gpu(Box<GpuScatter>),
    Cpu(Box<CpuScatter>),
}

/// Owner of the voxel volume
#[derive(Debug)]
pub struct Voxelizer {
    grid: VoxelGrid,
    light: PointLight,
    uniforms: VoxelizeUniforms,
    radiance_texture: TextureHandle,
    radiance_view: TextureViewHandle,
    normal_texture: TextureHandle,
    normal_view: TextureViewHandle,
    strategy: Strategy,
    builds: u64,
}

impl Voxelizer {
    /// Allocate the volume textures and either the GPU scatter resources or
    /// the CPU volume.
    pub fn init<B: GraphicsBackend>(
        backend: &mut B,
        scene: &Scene,
        geometry: &GeometryBuffers,
        grid: VoxelGrid,
        on_cpu: bool,
    ) -> BackendResult<Self> {
        let resolution = grid.resolution();
        let mut usage = TextureUsage::TEXTURE_BINDING | TextureUsage::COPY_DST;
        if !on_cpu {
            usage = usage | TextureUsage::STORAGE_BINDING;
        }
        let radiance_texture = backend.create_texture(&TextureDescriptor {
            label: Some("Voxel Radiance".into()),
            width: resolution,
            height: resolution,
            depth: resolution,
            mip_levels: grid.mip_count(),
            format: RADIANCE_FORMAT,
            usage,
        })?;
        let radiance_view = backend.create_texture_view_with(
            radiance_texture,
            &TextureViewDescriptor {
                label: Some("Voxel Radiance View".into()),
                dimension: Some(TextureViewDimension::D3),
                ..Default::default()
            },
        )?;
        let normal_texture = backend.create_texture(&TextureDescriptor {
            label: Some("Voxel Normals".into()),
            width: resolution,
            height: resolution,
            depth: resolution,
            mip_levels: 1,
            format: NORMAL_FORMAT,
            usage,
        })?;
        let normal_view = backend.create_texture_view_with(
            normal_texture,
            &TextureViewDescriptor::single_mip(0, TextureViewDimension::D3),
        )?;

        let strategy = if on_cpu {
            Strategy::Cpu(Box::new(CpuScatter {
                mesh: scene.mesh().clone(),
                volume: VoxelVolume::new(grid),
                built_for: None,
            }))
        } else {
            Strategy::Gpu(Box::new(Self::create_scatter(
                backend,
                geometry,
                &grid,
                radiance_texture,
                normal_view,
            )?))
        };

        log::info!(
            "Voxel volume: {}^3, {} mips, voxel size {:.4}, {} voxelization",
            resolution,
            grid.mip_count(),
            grid.voxel_size(),
            if on_cpu { "CPU" } else { "GPU" }
        );

        Ok(Self {
            grid,
            light: scene.light,
            uniforms: VoxelizeUniforms::new(&grid),
            radiance_texture,
            radiance_view,
            normal_texture,
            normal_view,
            strategy,
            builds: 0,
        })
    }

    fn create_scatter<B: GraphicsBackend>(
        backend: &mut B,
        geometry: &GeometryBuffers,
        grid: &VoxelGrid,
        radiance_texture: TextureHandle,
        normal_view: TextureViewHandle,
    ) -> BackendResult<GpuScatter> {
        let resolution = grid.resolution();
        let cells = (resolution as u64).pow(3);

        let uniform_buffer = create_uniform_buffer::<B, VoxelizeUniforms>(backend, "Voxelize Uniforms")?;
        let grid_desc = |label: &str| BufferDescriptor {
            label: Some(label.into()),
            size: cells * std::mem::size_of::<u32>() as u64,
            usage: BufferUsage::STORAGE | BufferUsage::COPY_DST,
            mapped_at_creation: false,
        };
        let radiance_grid = backend.create_buffer(&grid_desc("Voxel Radiance Scatter"))?;
        let normal_grid = backend.create_buffer(&grid_desc("Voxel Normal Scatter"))?;

        // Rasterization needs an attachment; nothing is ever written to it
        let target_texture = backend.create_texture(&TextureDescriptor {
            label: Some("Voxelize Target".into()),
            width: resolution,
            height: resolution,
            depth: 1,
            mip_levels: 1,
            format: TextureFormat::Rgba8Unorm,
            usage: TextureUsage::RENDER_ATTACHMENT,
        })?;
        let target_view = backend.create_texture_view(target_texture)?;

        // Scatter
        let layout = backend.create_bind_group_layout(&[
            BindGroupLayoutEntry {
                binding: 0,
                visibility: ShaderStageFlags::VERTEX_FRAGMENT,
                ty: BindingType::UniformBuffer,
            },
            BindGroupLayoutEntry {
                binding: 1,
                visibility: ShaderStageFlags::VERTEX,
                ty: BindingType::StorageBuffer { read_only: true },
            },
            BindGroupLayoutEntry {
                binding: 2,
                visibility: ShaderStageFlags::VERTEX,
                ty: BindingType::StorageBuffer { read_only: true },
            },
            BindGroupLayoutEntry {
                binding: 3,
                visibility: ShaderStageFlags::FRAGMENT,
                ty: BindingType::StorageBuffer { read_only: false },
            },
            BindGroupLayoutEntry {
                binding: 4,
                visibility: ShaderStageFlags::FRAGMENT,
                ty: BindingType::StorageBuffer { read_only: false },
            },
        ])?;
        let buffer = |buffer| BindGroupEntry::Buffer {
            buffer,
            offset: 0,
            size: None,
        };
        let bind_group = backend.create_bind_group(
            layout,
            &[
                (0, buffer(uniform_buffer)),
                (1, buffer(geometry.vertex_buffer)),
                (2, buffer(geometry.index_buffer)),
                (3, buffer(radiance_grid)),
                (4, buffer(normal_grid)),
            ],
        )?;
        let pipeline = backend.create_render_pipeline(&RenderPipelineDescriptor {
            label: Some("Voxelize Pipeline".into()),
            vertex_shader: VOXELIZE_SHADER.into(),
            fragment_shader: Some(VOXELIZE_SHADER.into()),
            vertex_layouts: vec![],
            bind_group_layouts: vec![layout],
            cull_mode: CullMode::None,
            depth_stencil: None,
            color_targets: vec![ColorTargetState {
                format: TextureFormat::Rgba8Unorm,
                write_mask: ColorWrites::NONE,
            }],
        })?;

        // Resolve
        let resolve_layout = backend.create_bind_group_layout(&[
            BindGroupLayoutEntry {
                binding: 0,
                visibility: ShaderStageFlags::COMPUTE,
                ty: BindingType::StorageBuffer { read_only: true },
            },
            BindGroupLayoutEntry {
                binding: 1,
                visibility: ShaderStageFlags::COMPUTE,
                ty: BindingType::StorageBuffer { read_only: true },
            },
            BindGroupLayoutEntry {
                binding: 2,
                visibility: ShaderStageFlags::COMPUTE,
                ty: BindingType::StorageTexture {
                    format: RADIANCE_FORMAT,
                    access: StorageTextureAccess::WriteOnly,
                    view_dimension: TextureViewDimension::D3,
                },
            },
            BindGroupLayoutEntry {
                binding: 3,
                visibility: ShaderStageFlags::COMPUTE,
                ty: BindingType::StorageTexture {
                    format: NORMAL_FORMAT,
                    access: StorageTextureAccess::WriteOnly,
                    view_dimension: TextureViewDimension::D3,
                },
            },
        ])?;
        let level_zero = backend.create_texture_view_with(
            radiance_texture,
            &TextureViewDescriptor::single_mip(0, TextureViewDimension::D3),
        )?;
        let resolve_bind_group = backend.create_bind_group(
            resolve_layout,
            &[
                (0, buffer(radiance_grid)),
                (1, buffer(normal_grid)),
                (2, BindGroupEntry::StorageTexture(level_zero)),
                (3, BindGroupEntry::StorageTexture(normal_view)),
            ],
        )?;
        let resolve_pipeline = backend.create_compute_pipeline(&ComputePipelineDescriptor {
            label: Some("Voxel Resolve Pipeline".into()),
            shader: RESOLVE_SHADER.into(),
            entry_point: "cs_resolve".into(),
            bind_group_layouts: vec![resolve_layout],
        })?;

        // Mips
        let downsample_layout = backend.create_bind_group_layout(&[
            BindGroupLayoutEntry {
                binding: 0,
                visibility: ShaderStageFlags::COMPUTE,
                ty: BindingType::Texture {
                    sample_type: TextureSampleType::Float { filterable: true },
                    view_dimension: TextureViewDimension::D3,
                },
            },
            BindGroupLayoutEntry {
                binding: 1,
                visibility: ShaderStageFlags::COMPUTE,
                ty: BindingType::StorageTexture {
                    format: RADIANCE_FORMAT,
                    access: StorageTextureAccess::WriteOnly,
                    view_dimension: TextureViewDimension::D3,
                },
            },
        ])?;
        let mut level_views = vec![level_zero];
        let mut downsample_bind_groups = Vec::new();
        for level in 1..grid.mip_count() {
            let view = backend.create_texture_view_with(
                radiance_texture,
                &TextureViewDescriptor::single_mip(level, TextureViewDimension::D3),
            )?;
            let bind_group = backend.create_bind_group(
                downsample_layout,
                &[
                    (0, BindGroupEntry::Texture(level_views[level as usize - 1])),
                    (1, BindGroupEntry::StorageTexture(view)),
                ],
            )?;
            level_views.push(view);
            downsample_bind_groups.push(bind_group);
        }
        let downsample_pipeline = backend.create_compute_pipeline(&ComputePipelineDescriptor {
            label: Some("Voxel Mip Pipeline".into()),
            shader: DOWNSAMPLE_SHADER.into(),
            entry_point: "cs_downsample".into(),
            bind_group_layouts: vec![downsample_layout],
        })?;

        Ok(GpuScatter {
            uniform_buffer,
            bind_group,
            pipeline,
            radiance_grid,
            normal_grid,
            target_texture,
            target_view,
            resolve_pipeline,
            resolve_bind_group,
            downsample_pipeline,
            downsample_bind_groups,
            index_count: geometry.index_count,
        })
    }

    /// Stage the world matrices for the next [`Voxelizer::render`]. Records no
    /// GPU work.
    pub fn set_matrix(&mut self, transforms: &TransformSet) {
        self.uniforms.world = transforms.world();
        self.uniforms.world_inv_transpose = transforms.world_inv_transpose();
    }

    /// Rebuild the volume. Leaves the voxelization viewport bound; later
    /// passes must restore their own targets.
    pub fn render<B: GraphicsBackend>(&mut self, backend: &mut B, time_seconds: f32) -> BackendResult<()> {
        self.uniforms.set_light(&self.light, time_seconds);
        match &mut self.strategy {
            Strategy::Gpu(scatter) => {
                Self::scatter_gpu(backend, scatter, &self.uniforms, &self.grid);
                self.builds += 1;
            }
            Strategy::Cpu(scatter) => {
                let light_position = self.light.position_at(time_seconds);
                let key = (self.uniforms.world, light_position);
                if scatter.built_for == Some(key) {
                    log::trace!("CPU voxel volume is up to date");
                    return Ok(());
                }
                Self::scatter_cpu(scatter, &self.light, light_position, &self.uniforms);
                Self::upload(backend, &scatter.volume, self.radiance_texture, self.normal_texture)?;
                scatter.built_for = Some(key);
                self.builds += 1;
            }
        }
        Ok(())
    }

    fn scatter_gpu<B: GraphicsBackend>(
        backend: &mut B,
        scatter: &GpuScatter,
        uniforms: &VoxelizeUniforms,
        grid: &VoxelGrid,
    ) {
        let resolution = grid.resolution();
        backend.write_buffer(scatter.uniform_buffer, 0, bytemuck::bytes_of(uniforms));
        backend.clear_buffer(scatter.radiance_grid);
        backend.clear_buffer(scatter.normal_grid);

        backend.begin_render_pass(&RenderPassDescriptor {
            label: Some("Voxelize".into()),
            color_attachments: vec![ColorAttachment {
                view: scatter.target_view,
                resolve_target: None,
                load_op: LoadOp::Clear([0.0; 4]),
                store_op: StoreOp::Discard,
            }],
            depth_stencil_attachment: None,
        });
        backend.set_viewport(Viewport::from_size(resolution, resolution));
        backend.set_render_pipeline(scatter.pipeline);
        backend.set_bind_group(0, scatter.bind_group);
        backend.draw(0..scatter.index_count, 0..1);
        backend.end_render_pass();

        backend.begin_compute_pass(Some("Voxel Resolve"));
        backend.set_compute_pipeline(scatter.resolve_pipeline);
        backend.set_bind_group(0, scatter.resolve_bind_group);
        let groups = workgroups(resolution);
        backend.dispatch_compute(groups, groups, groups);
        backend.end_compute_pass();

        backend.begin_compute_pass(Some("Voxel Mips"));
        backend.set_compute_pipeline(scatter.downsample_pipeline);
        for (i, bind_group) in scatter.downsample_bind_groups.iter().enumerate() {
            let groups = workgroups(grid.level_resolution(i as u32 + 1));
            backend.set_bind_group(0, *bind_group);
            backend.dispatch_compute(groups, groups, groups);
        }
        backend.end_compute_pass();
    }

    fn scatter_cpu(
        scatter: &mut CpuScatter,
        light: &PointLight,
        light_position: Vec3,
        uniforms: &VoxelizeUniforms,
    ) {
        scatter.volume.clear();
        let fragments = voxelize_mesh(
            &scatter.mesh,
            &uniforms.world,
            &uniforms.world_inv_transpose,
            &mut scatter.volume,
            |fragment| {
                // Same range as the packed RGBA8 averages of the GPU path
                light
                    .shade(light_position, fragment.position, fragment.normal, fragment.color.truncate())
                    .clamp(Vec3::ZERO, Vec3::ONE)
            },
        );
        scatter.volume.build_mips();
        log::debug!(
            "CPU voxelization: {} fragments into {} cells",
            fragments,
            scatter.volume.occupied_count()
        );
    }

    fn upload<B: GraphicsBackend>(
        backend: &mut B,
        volume: &VoxelVolume,
        radiance_texture: TextureHandle,
        normal_texture: TextureHandle,
    ) -> BackendResult<()> {
        let grid = volume.grid();
        for level in 0..grid.mip_count() {
            let texels = volume.level_rgba16f(level);
            backend.write_texture(
                radiance_texture,
                bytemuck::cast_slice(&texels),
                TextureRegion::level_3d(level, grid.level_resolution(level), RADIANCE_FORMAT),
            )?;
        }
        backend.write_texture(
            normal_texture,
            &volume.normals_rgba8(),
            TextureRegion::level_3d(0, grid.resolution(), NORMAL_FORMAT),
        )
    }

    /// Read-only view of the volume
    pub fn srv(&self) -> VolumeView {
        VolumeView {
            radiance: self.radiance_view,
            normals: self.normal_view,
            grid: self.grid,
        }
    }

    /// Cells per axis
    pub fn res(&self) -> u32 {
        self.grid.resolution()
    }

    pub fn grid(&self) -> &VoxelGrid {
        &self.grid
    }

    /// The CPU volume, when voxelizing on the CPU
    pub fn cpu_volume(&self) -> Option<&VoxelVolume> {
        match &self.strategy {
            Strategy::Cpu(scatter) if scatter.built_for.is_some() => Some(&scatter.volume),
            _ => None,
        }
    }

    /// Number of times the volume has been rebuilt
    pub fn build_count(&self) -> u64 {
        self.builds
    }

    pub fn radiance_texture(&self) -> TextureHandle {
        self.radiance_texture
    }

    pub fn normal_texture(&self) -> TextureHandle {
        self.normal_texture
    }

    pub fn release<B: GraphicsBackend>(&self, backend: &mut B) {
        if let Strategy::Gpu(scatter) = &self.strategy {
            backend.destroy_buffer(scatter.uniform_buffer);
            backend.destroy_buffer(scatter.radiance_grid);
            backend.destroy_buffer(scatter.normal_grid);
            backend.destroy_texture(scatter.target_texture);
        }
        backend.destroy_texture(self.radiance_texture);
        backend.destroy_texture(self.normal_texture);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::dummy::{DummyBackend, RecordedCommand};

    fn setup(on_cpu: bool, resolution: u32) -> (DummyBackend, Scene, GeometryBuffers, Voxelizer) {
        let mut backend = DummyBackend::with_size(128, 128);
        let scene = Scene::cornell_box().unwrap();
        let geometry = GeometryBuffers::upload(&mut backend, scene.mesh()).unwrap();
        let grid = VoxelGrid::from_bounds(&scene.world_bounds(), resolution).unwrap();
        let voxelizer = Voxelizer::init(&mut backend, &scene, &geometry, grid, on_cpu).unwrap();
        (backend, scene, geometry, voxelizer)
    }

    #[test]
    fn test_uniform_layout() {
        assert_eq!(std::mem::size_of::<VoxelizeUniforms>(), 400);
        assert_eq!(std::mem::size_of::<VoxelizeUniforms>() % 16, 0);
        // The shader reads the vertex buffer as flat floats
        assert_eq!(std::mem::size_of::<Vertex>(), Vertex::FLOATS * 4);
        assert!(VOXELIZE_SHADER.contains(&format!("const VERTEX_FLOATS: u32 = {}u;", Vertex::FLOATS)));
    }

    #[test]
    fn test_gpu_render_scatters_resolves_and_filters() {
        let (mut backend, _scene, geometry, mut voxelizer) = setup(false, 16);
        backend.begin_frame().unwrap();
        backend.take_commands();
        voxelizer.render(&mut backend, 0.0).unwrap();
        let commands = backend.take_commands();

        let clears = commands
            .iter()
            .filter(|c| matches!(c, RecordedCommand::ClearBuffer(_)))
            .count();
        assert_eq!(clears, 2);
        assert!(commands.contains(&RecordedCommand::SetViewport(Viewport::from_size(16, 16))));
        assert!(commands.contains(&RecordedCommand::Draw {
            vertices: 0..geometry.index_count,
            instances: 0..1,
        }));

        let dispatches: Vec<_> = commands
            .iter()
            .filter_map(|c| match c {
                RecordedCommand::Dispatch { x, y, z } => Some((*x, *y, *z)),
                _ => None,
            })
            .collect();
        // Resolve at 16^3, then mips 8, 4, 2, 1
        assert_eq!(dispatches, vec![(4, 4, 4), (2, 2, 2), (1, 1, 1), (1, 1, 1), (1, 1, 1)]);
        assert_eq!(voxelizer.build_count(), 1);
    }

    #[test]
    fn test_set_matrix_records_nothing() {
        let (mut backend, _scene, _geometry, mut voxelizer) = setup(false, 8);
        backend.take_commands();
        voxelizer.set_matrix(&TransformSet::new(Mat4::from_scale(Vec3::splat(0.5))));
        assert!(backend.commands().is_empty());
        assert_eq!(voxelizer.build_count(), 0);
    }

    #[test]
    fn test_cpu_render_uploads_every_level() {
        let (mut backend, _scene, _geometry, mut voxelizer) = setup(true, 16);
        voxelizer.render(&mut backend, 0.0).unwrap();

        let texture = voxelizer.radiance_texture();
        for level in 0..voxelizer.grid().mip_count() {
            let size = voxelizer.grid().level_resolution(level) as usize;
            let data = backend.texture_data(texture, level).unwrap();
            assert_eq!(data.len(), size * size * size * 8);
        }
        let level0 = backend.texture_data(texture, 0).unwrap();
        assert!(level0.iter().any(|&b| b != 0));
        assert!(backend.texture_data(voxelizer.normal_texture(), 0).is_some());
        assert!(voxelizer.cpu_volume().unwrap().occupied_count() > 0);
    }

    #[test]
    fn test_cpu_volume_cached_until_inputs_change() {
        let (mut backend, _scene, _geometry, mut voxelizer) = setup(true, 8);
        voxelizer.render(&mut backend, 0.0).unwrap();
        backend.take_commands();

        voxelizer.render(&mut backend, 1.0).unwrap();
        assert!(backend.take_commands().is_empty());
        assert_eq!(voxelizer.build_count(), 1);

        voxelizer.set_matrix(&TransformSet::new(Mat4::from_translation(Vec3::X * 0.1)));
        voxelizer.render(&mut backend, 1.0).unwrap();
        assert!(backend
            .take_commands()
            .iter()
            .any(|c| matches!(c, RecordedCommand::WriteTexture { .. })));
        assert_eq!(voxelizer.build_count(), 2);
    }

    #[test]
    fn test_srv_reports_grid() {
        let (_backend, _scene, _geometry, voxelizer) = setup(false, 32);
        let view = voxelizer.srv();
        assert_eq!(view.resolution(), 32);
        assert_eq!(voxelizer.res(), 32);
        assert_eq!(view.mip_count(), 6);
        assert!(voxelizer.cpu_volume().is_none());
    }

    #[test]
    fn test_release_frees_volume() {
        for on_cpu in [false, true] {
            let (mut backend, _scene, geometry, voxelizer) = setup(on_cpu, 8);
            voxelizer.release(&mut backend);
            geometry.release(&mut backend);
            assert_eq!(backend.live_buffer_count(), 0);
            assert_eq!(backend.live_texture_count(), 0);
        }
    }
}
