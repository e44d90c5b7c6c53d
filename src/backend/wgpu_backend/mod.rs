//! wgpu backend implementation

mod convert;
mod pass;

use crate::backend::traits::*;
use crate::backend::types::*;
use pass::{ComputeCommand, OpenPass, RenderCommand};
use std::collections::HashMap;
use std::ops::Range;
use std::sync::Arc;
use wgpu::util::DeviceExt;

/// GPU objects addressed by handle id
#[derive(Default)]
struct Resources {
    buffers: HashMap<u64, wgpu::Buffer>,
    textures: HashMap<u64, wgpu::Texture>,
    views: HashMap<u64, wgpu::TextureView>,
    samplers: HashMap<u64, wgpu::Sampler>,
    layouts: HashMap<u64, wgpu::BindGroupLayout>,
    bind_groups: HashMap<u64, wgpu::BindGroup>,
    render_pipelines: HashMap<u64, wgpu::RenderPipeline>,
    compute_pipelines: HashMap<u64, wgpu::ComputePipeline>,
}

/// Swapchain image and encoder of the frame in flight
struct Frame {
    texture: wgpu::SurfaceTexture,
    view: wgpu::TextureView,
    view_id: u64,
    encoder: wgpu::CommandEncoder,
}

/// wgpu backend implementation
pub struct WgpuBackend {
    surface: wgpu::Surface<'static>,
    device: wgpu::Device,
    queue: wgpu::Queue,
    surface_config: wgpu::SurfaceConfiguration,
    swapchain_format: TextureFormat,
    resources: Resources,
    next_id: u64,
    frame: Option<Frame>,
    open_pass: Option<OpenPass>,
}

impl WgpuBackend {
    /// Async initialization, wrapped by `new` with `pollster`.
    ///
    /// `WGPU_BACKEND` and `WGPU_POWER_PREF` override adapter selection.
    pub async fn new_async(window: Arc<winit::window::Window>, vsync: bool) -> BackendResult<Self> {
        let backends = wgpu::util::backend_bits_from_env().unwrap_or(wgpu::Backends::PRIMARY);
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends,
            ..Default::default()
        });

        let size = window.inner_size();
        let surface = instance
            .create_surface(window)
            .map_err(|e| BackendError::SurfaceCreationFailed(e.to_string()))?;

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::util::power_preference_from_env()
                    .unwrap_or(wgpu::PowerPreference::HighPerformance),
                compatible_surface: Some(&surface),
                force_fallback_adapter: false,
            })
            .await
            .ok_or_else(|| BackendError::InitializationFailed(format!("No adapter for {:?}", backends)))?;

        let info = adapter.get_info();
        log::info!("Selected GPU: {} ({:?} backend)", info.name, info.backend);
        convert::check_downlevel(&adapter.get_downlevel_capabilities())
            .map_err(|missing| BackendError::DeviceCreationFailed(format!("{}: {}", info.name, missing)))?;

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("Voxel Cone Tracing Device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::default(),
                },
                None,
            )
            .await
            .map_err(|e| BackendError::DeviceCreationFailed(e.to_string()))?;
        // Creation errors are caught by scopes, this only sees errors raised while encoding
        device.on_uncaptured_error(Box::new(|error: wgpu::Error| log::error!("wgpu: {}", error)));

        let caps = surface.get_capabilities(&adapter);
        let (surface_format, swapchain_format) = caps
            .formats
            .iter()
            .filter_map(|&f| convert::swapchain_format(f).map(|ours| (f, ours)))
            .min_by_key(|(f, _)| !f.is_srgb())
            .ok_or_else(|| {
                BackendError::SurfaceCreationFailed(format!(
                    "No supported swapchain format in {:?}",
                    caps.formats
                ))
            })?;

        let max = device.limits().max_texture_dimension_2d;
        let (width, height) = convert::clamp_surface_size(size.width, size.height, max);
        let surface_config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format: surface_format,
            width,
            height,
            present_mode: if vsync {
                wgpu::PresentMode::AutoVsync
            } else {
                wgpu::PresentMode::AutoNoVsync
            },
            alpha_mode: caps
                .alpha_modes
                .first()
                .copied()
                .unwrap_or(wgpu::CompositeAlphaMode::Auto),
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&device, &surface_config);
        log::info!("Surface {}x{} {:?}", width, height, surface_format);

        Ok(Self {
            surface,
            device,
            queue,
            surface_config,
            swapchain_format,
            resources: Resources::default(),
            next_id: 1,
            frame: None,
            open_pass: None,
        })
    }

    fn allocate_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Run `create` inside validation and out-of-memory error scopes.
    ///
    /// wgpu hands back an object even when creation failed, so the scopes are
    /// the only place the failure shows up.
    fn checked<T>(
        &self,
        failed: fn(String) -> BackendError,
        create: impl FnOnce(&wgpu::Device) -> T,
    ) -> BackendResult<T> {
        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let created = create(&self.device);
        let validation = pollster::block_on(self.device.pop_error_scope());
        let out_of_memory = pollster::block_on(self.device.pop_error_scope());
        convert::scope_error(out_of_memory.or(validation), failed)?;
        Ok(created)
    }

    fn pipeline_layout(
        &self,
        label: Option<&str>,
        layouts: &[BindGroupLayoutHandle],
    ) -> BackendResult<wgpu::PipelineLayout> {
        let layouts = layouts
            .iter()
            .map(|h| {
                self.resources
                    .layouts
                    .get(&h.0)
                    .ok_or_else(|| BackendError::PipelineCreationFailed(format!("Unknown {:?}", h)))
            })
            .collect::<BackendResult<Vec<&wgpu::BindGroupLayout>>>()?;
        self.checked(BackendError::PipelineCreationFailed, |device| {
            device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label,
                bind_group_layouts: &layouts,
                push_constant_ranges: &[],
            })
        })
    }

    fn shader_module(&self, label: Option<&str>, source: &str) -> BackendResult<wgpu::ShaderModule> {
        self.checked(BackendError::ShaderCreationFailed, |device| {
            device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label,
                source: wgpu::ShaderSource::Wgsl(source.into()),
            })
        })
    }
}

impl GraphicsBackend for WgpuBackend {
    fn new(window: Arc<winit::window::Window>, vsync: bool) -> BackendResult<Self> {
        pollster::block_on(Self::new_async(window, vsync))
    }

    fn resize(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            return;
        }
        let max = self.device.limits().max_texture_dimension_2d;
        let (width, height) = convert::clamp_surface_size(width, height, max);
        self.surface_config.width = width;
        self.surface_config.height = height;
        self.surface.configure(&self.device, &self.surface_config);
    }

    fn surface_size(&self) -> (u32, u32) {
        (self.surface_config.width, self.surface_config.height)
    }

    fn begin_frame(&mut self) -> BackendResult<FrameContext> {
        let texture = self.surface.get_current_texture().map_err(|e| match e {
            wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated => BackendError::SurfaceLost,
            wgpu::SurfaceError::OutOfMemory => BackendError::OutOfMemory,
            _ => BackendError::AcquireImageFailed(e.to_string()),
        })?;
        let view = texture.texture.create_view(&wgpu::TextureViewDescriptor::default());
        let encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Frame Encoder"),
        });
        let view_id = self.allocate_id();
        self.frame = Some(Frame {
            texture,
            view,
            view_id,
            encoder,
        });

        Ok(FrameContext {
            swapchain_view: TextureViewHandle(view_id),
            width: self.surface_config.width,
            height: self.surface_config.height,
        })
    }

    fn end_frame(&mut self) -> BackendResult<()> {
        if self.open_pass.take().is_some() {
            log::warn!("Frame ended with an open pass, its commands were dropped");
        }
        let frame = self
            .frame
            .take()
            .ok_or_else(|| BackendError::PresentFailed("No frame in flight".into()))?;
        self.queue.submit(std::iter::once(frame.encoder.finish()));
        frame.texture.present();
        Ok(())
    }

    fn swapchain_format(&self) -> TextureFormat {
        self.swapchain_format
    }

    fn create_buffer(&mut self, desc: &BufferDescriptor) -> BackendResult<BufferHandle> {
        let buffer = self.checked(BackendError::BufferCreationFailed, |device| {
            device.create_buffer(&wgpu::BufferDescriptor {
                label: desc.label.as_deref(),
                size: desc.size,
                usage: convert::buffer_usages(desc.usage),
                mapped_at_creation: desc.mapped_at_creation,
            })
        })?;
        let id = self.allocate_id();
        self.resources.buffers.insert(id, buffer);
        Ok(BufferHandle(id))
    }

    fn create_buffer_init(&mut self, desc: &BufferDescriptor, data: &[u8]) -> BackendResult<BufferHandle> {
        let buffer = self.checked(BackendError::BufferCreationFailed, |device| {
            device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: desc.label.as_deref(),
                contents: data,
                usage: convert::buffer_usages(desc.usage),
            })
        })?;
        let id = self.allocate_id();
        self.resources.buffers.insert(id, buffer);
        Ok(BufferHandle(id))
    }

    fn write_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8]) {
        match self.resources.buffers.get(&buffer.0) {
            Some(target) => self.queue.write_buffer(target, offset, data),
            None => log::warn!("write_buffer on unknown {:?}", buffer),
        }
    }

    fn create_texture(&mut self, desc: &TextureDescriptor) -> BackendResult<TextureHandle> {
        let dimension = if desc.depth > 1 {
            wgpu::TextureDimension::D3
        } else {
            wgpu::TextureDimension::D2
        };
        let texture = self.checked(BackendError::TextureCreationFailed, |device| {
            device.create_texture(&wgpu::TextureDescriptor {
                label: desc.label.as_deref(),
                size: wgpu::Extent3d {
                    width: desc.width,
                    height: desc.height,
                    depth_or_array_layers: desc.depth,
                },
                mip_level_count: desc.mip_levels,
                sample_count: 1,
                dimension,
                format: convert::texture_format(desc.format),
                usage: convert::texture_usages(desc.usage),
                view_formats: &[],
            })
        })?;
        let id = self.allocate_id();
        self.resources.textures.insert(id, texture);
        Ok(TextureHandle(id))
    }

    fn create_texture_view_with(
        &mut self,
        texture: TextureHandle,
        desc: &TextureViewDescriptor,
    ) -> BackendResult<TextureViewHandle> {
        let target = self
            .resources
            .textures
            .get(&texture.0)
            .ok_or_else(|| BackendError::TextureCreationFailed(format!("Unknown {:?}", texture)))?;
        let view = self.checked(BackendError::TextureCreationFailed, |_| {
            target.create_view(&wgpu::TextureViewDescriptor {
                label: desc.label.as_deref(),
                dimension: desc.dimension.map(convert::view_dimension),
                base_mip_level: desc.base_mip_level,
                mip_level_count: desc.mip_level_count,
                ..Default::default()
            })
        })?;
        let id = self.allocate_id();
        self.resources.views.insert(id, view);
        Ok(TextureViewHandle(id))
    }

    fn write_texture(&mut self, texture: TextureHandle, data: &[u8], region: TextureRegion) -> BackendResult<()> {
        if data.len() != region.byte_len() {
            return Err(BackendError::UploadFailed(format!(
                "got {} bytes, expected {}",
                data.len(),
                region.byte_len()
            )));
        }
        let target = self
            .resources
            .textures
            .get(&texture.0)
            .ok_or_else(|| BackendError::UploadFailed(format!("Unknown {:?}", texture)))?;
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        self.queue.write_texture(
            wgpu::ImageCopyTexture {
                texture: target,
                mip_level: region.mip_level,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            data,
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(region.width * region.bytes_per_pixel),
                rows_per_image: Some(region.height),
            },
            wgpu::Extent3d {
                width: region.width,
                height: region.height,
                depth_or_array_layers: region.depth,
            },
        );
        convert::scope_error(
            pollster::block_on(self.device.pop_error_scope()),
            BackendError::UploadFailed,
        )
    }

    fn clear_buffer(&mut self, buffer: BufferHandle) {
        let Some(target) = self.resources.buffers.get(&buffer.0) else {
            return;
        };
        match self.frame.as_mut() {
            Some(frame) => frame.encoder.clear_buffer(target, 0, None),
            None => log::warn!("clear_buffer called outside of a frame, ignored"),
        }
    }

    fn create_sampler(&mut self, desc: &SamplerDescriptor) -> BackendResult<SamplerHandle> {
        let sampler = self.checked(BackendError::TextureCreationFailed, |device| {
            device.create_sampler(&wgpu::SamplerDescriptor {
                label: desc.label.as_deref(),
                mag_filter: convert::filter_mode(desc.mag_filter),
                min_filter: convert::filter_mode(desc.min_filter),
                mipmap_filter: convert::filter_mode(desc.mipmap_filter),
                ..Default::default()
            })
        })?;
        let id = self.allocate_id();
        self.resources.samplers.insert(id, sampler);
        Ok(SamplerHandle(id))
    }

    fn create_bind_group_layout(&mut self, entries: &[BindGroupLayoutEntry]) -> BackendResult<BindGroupLayoutHandle> {
        let entries: Vec<wgpu::BindGroupLayoutEntry> = entries
            .iter()
            .map(|e| wgpu::BindGroupLayoutEntry {
                binding: e.binding,
                visibility: convert::shader_stages(e.visibility),
                ty: convert::binding_type(&e.ty),
                count: None,
            })
            .collect();
        let layout = self.checked(BackendError::PipelineCreationFailed, |device| {
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor { label: None, entries: &entries })
        })?;
        let id = self.allocate_id();
        self.resources.layouts.insert(id, layout);
        Ok(BindGroupLayoutHandle(id))
    }

    fn create_bind_group(
        &mut self,
        layout: BindGroupLayoutHandle,
        entries: &[(u32, BindGroupEntry)],
    ) -> BackendResult<BindGroupHandle> {
        let bind_group = {
            let resources = &self.resources;
            let layout = resources
                .layouts
                .get(&layout.0)
                .ok_or_else(|| BackendError::PipelineCreationFailed(format!("Unknown {:?}", layout)))?;

            let entries = entries
                .iter()
                .map(|(binding, entry)| {
                    let resource = match entry {
                        BindGroupEntry::Buffer { buffer, offset, size } => resources
                            .buffers
                            .get(&buffer.0)
                            .map(|buffer| {
                                wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                                    buffer,
                                    offset: *offset,
                                    size: size.and_then(std::num::NonZeroU64::new),
                                })
                            }),
                        BindGroupEntry::Texture(view) | BindGroupEntry::StorageTexture(view) => {
                            resources.views.get(&view.0).map(wgpu::BindingResource::TextureView)
                        }
                        BindGroupEntry::Sampler(sampler) => {
                            resources.samplers.get(&sampler.0).map(wgpu::BindingResource::Sampler)
                        }
                    };
                    resource
                        .map(|resource| wgpu::BindGroupEntry {
                            binding: *binding,
                            resource,
                        })
                        .ok_or_else(|| {
                            BackendError::PipelineCreationFailed(format!("Binding {} refers to a released resource", binding))
                        })
                })
                .collect::<BackendResult<Vec<_>>>()?;

            self.checked(BackendError::PipelineCreationFailed, |device| {
                device.create_bind_group(&wgpu::BindGroupDescriptor {
                    label: None,
                    layout,
                    entries: &entries,
                })
            })?
        };
        let id = self.allocate_id();
        self.resources.bind_groups.insert(id, bind_group);
        Ok(BindGroupHandle(id))
    }

    fn create_render_pipeline(&mut self, desc: &RenderPipelineDescriptor) -> BackendResult<RenderPipelineHandle> {
        let label = desc.label.as_deref();
        let vertex_module = self.shader_module(label, &desc.vertex_shader)?;
        let fragment_module = match &desc.fragment_shader {
            Some(source) if source != &desc.vertex_shader => Some(self.shader_module(label, source)?),
            _ => None,
        };
        let layout = self.pipeline_layout(label, &desc.bind_group_layouts)?;

        let attributes: Vec<Vec<wgpu::VertexAttribute>> = desc
            .vertex_layouts
            .iter()
            .map(|layout| {
                layout
                    .attributes
                    .iter()
                    .map(|a| wgpu::VertexAttribute {
                        format: convert::vertex_format(a.format),
                        offset: a.offset,
                        shader_location: a.location,
                    })
                    .collect()
            })
            .collect();
        let buffers: Vec<wgpu::VertexBufferLayout> = desc
            .vertex_layouts
            .iter()
            .zip(&attributes)
            .map(|(layout, attributes)| wgpu::VertexBufferLayout {
                array_stride: layout.array_stride,
                step_mode: wgpu::VertexStepMode::Vertex,
                attributes,
            })
            .collect();
        let targets: Vec<Option<wgpu::ColorTargetState>> = desc
            .color_targets
            .iter()
            .map(|target| {
                Some(wgpu::ColorTargetState {
                    format: convert::texture_format(target.format),
                    blend: None,
                    write_mask: wgpu::ColorWrites::from_bits_truncate(target.write_mask.bits()),
                })
            })
            .collect();

        let pipeline = self.checked(BackendError::PipelineCreationFailed, |device| {
            device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label,
                layout: Some(&layout),
                vertex: wgpu::VertexState {
                    module: &vertex_module,
                    entry_point: "vs_main",
                    buffers: &buffers,
                    compilation_options: Default::default(),
                },
                fragment: desc.fragment_shader.as_ref().map(|_| wgpu::FragmentState {
                    module: fragment_module.as_ref().unwrap_or(&vertex_module),
                    entry_point: "fs_main",
                    targets: &targets,
                    compilation_options: Default::default(),
                }),
                primitive: wgpu::PrimitiveState {
                    topology: wgpu::PrimitiveTopology::TriangleList,
                    front_face: wgpu::FrontFace::Ccw,
                    cull_mode: convert::cull_mode(desc.cull_mode),
                    ..Default::default()
                },
                depth_stencil: desc.depth_stencil.as_ref().map(|ds| wgpu::DepthStencilState {
                    format: convert::texture_format(ds.format),
                    depth_write_enabled: ds.depth_write_enabled,
                    depth_compare: convert::compare_function(ds.depth_compare),
                    stencil: Default::default(),
                    bias: Default::default(),
                }),
                multisample: Default::default(),
                multiview: None,
            })
        })?;
        let id = self.allocate_id();
        self.resources.render_pipelines.insert(id, pipeline);
        Ok(RenderPipelineHandle(id))
    }

    fn create_compute_pipeline(&mut self, desc: &ComputePipelineDescriptor) -> BackendResult<ComputePipelineHandle> {
        let label = desc.label.as_deref();
        let module = self.shader_module(label, &desc.shader)?;
        let layout = self.pipeline_layout(label, &desc.bind_group_layouts)?;
        let pipeline = self.checked(BackendError::PipelineCreationFailed, |device| {
            device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label,
                layout: Some(&layout),
                module: &module,
                entry_point: &desc.entry_point,
                compilation_options: Default::default(),
            })
        })?;
        let id = self.allocate_id();
        self.resources.compute_pipelines.insert(id, pipeline);
        Ok(ComputePipelineHandle(id))
    }

    fn begin_render_pass(&mut self, desc: &RenderPassDescriptor) {
        self.open_pass = Some(OpenPass::Render {
            descriptor: desc.clone(),
            commands: Vec::new(),
        });
    }

    fn end_render_pass(&mut self) {
        self.finish_pass();
    }

    fn begin_compute_pass(&mut self, label: Option<&str>) {
        self.open_pass = Some(OpenPass::Compute {
            label: label.map(str::to_owned),
            commands: Vec::new(),
        });
    }

    fn end_compute_pass(&mut self) {
        self.finish_pass();
    }

    fn set_render_pipeline(&mut self, pipeline: RenderPipelineHandle) {
        self.record_render(RenderCommand::SetPipeline(pipeline));
    }

    fn set_compute_pipeline(&mut self, pipeline: ComputePipelineHandle) {
        self.record_compute(ComputeCommand::SetPipeline(pipeline));
    }

    fn set_bind_group(&mut self, index: u32, bind_group: BindGroupHandle) {
        match self.open_pass {
            Some(OpenPass::Compute { .. }) => self.record_compute(ComputeCommand::SetBindGroup(index, bind_group)),
            _ => self.record_render(RenderCommand::SetBindGroup(index, bind_group)),
        }
    }

    fn set_vertex_buffer(&mut self, slot: u32, buffer: BufferHandle, offset: u64) {
        self.record_render(RenderCommand::SetVertexBuffer { slot, buffer, offset });
    }

    fn set_index_buffer(&mut self, buffer: BufferHandle, offset: u64, format: IndexFormat) {
        self.record_render(RenderCommand::SetIndexBuffer { buffer, offset, format });
    }

    fn set_viewport(&mut self, viewport: Viewport) {
        self.record_render(RenderCommand::SetViewport(viewport));
    }

    fn draw(&mut self, vertices: Range<u32>, instances: Range<u32>) {
        self.record_render(RenderCommand::Draw { vertices, instances });
    }

    fn draw_indexed(&mut self, indices: Range<u32>, base_vertex: i32, instances: Range<u32>) {
        self.record_render(RenderCommand::DrawIndexed {
            indices,
            base_vertex,
            instances,
        });
    }

    fn dispatch_compute(&mut self, x: u32, y: u32, z: u32) {
        self.record_compute(ComputeCommand::Dispatch([x, y, z]));
    }

    // Dropping lets wgpu free the memory once in-flight work no longer uses it
    fn destroy_buffer(&mut self, buffer: BufferHandle) {
        self.resources.buffers.remove(&buffer.0);
    }

    fn destroy_texture(&mut self, texture: TextureHandle) {
        self.resources.textures.remove(&texture.0);
    }
}
