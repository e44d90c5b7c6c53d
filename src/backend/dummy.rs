//! Dummy backend for testing without GPU hardware.
//!
//! Every call is validated against the handles it has handed out and recorded
//! into a command log. Texture uploads keep their bytes so tests can inspect
//! volume contents between frames.

use crate::backend::traits::*;
use crate::backend::types::*;
use std::collections::{HashMap, HashSet};
use std::ops::Range;
use std::sync::Arc;

/// A command recorded by [`DummyBackend`]
#[derive(Debug, Clone, PartialEq)]
pub enum RecordedCommand {
    BeginFrame {
        width: u32,
        height: u32,
    },
    EndFrame,
    WriteBuffer {
        buffer: BufferHandle,
        offset: u64,
        len: usize,
    },
    WriteTexture {
        texture: TextureHandle,
        region: TextureRegion,
    },
    ClearBuffer(BufferHandle),
    BeginRenderPass {
        label: Option<String>,
        color_views: Vec<TextureViewHandle>,
        depth_view: Option<TextureViewHandle>,
        clears_color: bool,
    },
    EndRenderPass,
    BeginComputePass {
        label: Option<String>,
    },
    EndComputePass,
    SetRenderPipeline(RenderPipelineHandle),
    SetComputePipeline(ComputePipelineHandle),
    SetBindGroup {
        index: u32,
        bind_group: BindGroupHandle,
    },
    SetVertexBuffer {
        slot: u32,
        buffer: BufferHandle,
    },
    SetIndexBuffer {
        buffer: BufferHandle,
        format: IndexFormat,
    },
    SetViewport(Viewport),
    Draw {
        vertices: Range<u32>,
        instances: Range<u32>,
    },
    DrawIndexed {
        indices: Range<u32>,
        base_vertex: i32,
        instances: Range<u32>,
    },
    Dispatch {
        x: u32,
        y: u32,
        z: u32,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PassState {
    None,
    Render,
    Compute,
}

/// Recording backend implementing [`GraphicsBackend`] without a device
#[derive(Debug)]
pub struct DummyBackend {
    width: u32,
    height: u32,
    next_id: u64,
    swapchain_view: Option<TextureViewHandle>,
    pass: PassState,
    surface_lost: bool,
    commands: Vec<RecordedCommand>,
    buffers: HashMap<u64, BufferDescriptor>,
    textures: HashMap<u64, TextureDescriptor>,
    /// View id to the texture it was created from
    texture_views: HashMap<u64, TextureHandle>,
    texture_data: HashMap<(u64, u32), Vec<u8>>,
    render_pipelines: HashSet<u64>,
    compute_pipelines: HashSet<u64>,
}

impl DummyBackend {
    /// Create a dummy backend with a fixed surface size
    pub fn with_size(width: u32, height: u32) -> Self {
        log::trace!("DummyBackend: created with surface {}x{}", width, height);
        Self {
            width,
            height,
            next_id: 1,
            swapchain_view: None,
            pass: PassState::None,
            surface_lost: false,
            commands: Vec::new(),
            buffers: HashMap::new(),
            textures: HashMap::new(),
            texture_views: HashMap::new(),
            texture_data: HashMap::new(),
            render_pipelines: HashSet::new(),
            compute_pipelines: HashSet::new(),
        }
    }

    fn next_handle(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn record(&mut self, command: RecordedCommand) {
        log::trace!("DummyBackend: {:?}", command);
        self.commands.push(command);
    }

    fn record_in_render_pass(&mut self, command: RecordedCommand) {
        if self.pass == PassState::Render {
            self.record(command);
        } else {
            log::warn!("DummyBackend: {:?} outside of a render pass, ignored", command);
        }
    }

    /// All commands recorded so far
    pub fn commands(&self) -> &[RecordedCommand] {
        &self.commands
    }

    /// Drain the command log
    pub fn take_commands(&mut self) -> Vec<RecordedCommand> {
        std::mem::take(&mut self.commands)
    }

    /// Make the next `begin_frame` fail with [`BackendError::SurfaceLost`]
    pub fn lose_surface_once(&mut self) {
        self.surface_lost = true;
    }

    /// Bytes last uploaded to a mip level of a texture
    pub fn texture_data(&self, texture: TextureHandle, mip_level: u32) -> Option<&[u8]> {
        self.texture_data
            .get(&(texture.0, mip_level))
            .map(|data| data.as_slice())
    }

    /// Descriptor a live buffer was created with
    pub fn buffer_descriptor(&self, buffer: BufferHandle) -> Option<&BufferDescriptor> {
        self.buffers.get(&buffer.0)
    }

    pub fn live_buffer_count(&self) -> usize {
        self.buffers.len()
    }

    pub fn live_texture_count(&self) -> usize {
        self.textures.len()
    }

    fn has_entry_point(shader: &str, name: &str) -> bool {
        shader.contains(&format!("fn {}(", name))
    }
}

impl GraphicsBackend for DummyBackend {
    fn new(window: Arc<winit::window::Window>, _vsync: bool) -> BackendResult<Self> {
        let size = window.inner_size();
        Ok(Self::with_size(size.width.max(1), size.height.max(1)))
    }

    fn resize(&mut self, width: u32, height: u32) {
        if width > 0 && height > 0 {
            self.width = width;
            self.height = height;
        }
    }

    fn surface_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn begin_frame(&mut self) -> BackendResult<FrameContext> {
        if std::mem::take(&mut self.surface_lost) {
            return Err(BackendError::SurfaceLost);
        }
        if self.swapchain_view.is_some() {
            return Err(BackendError::AcquireImageFailed(
                "Previous frame was not presented".into(),
            ));
        }
        let view = TextureViewHandle(self.next_handle());
        self.swapchain_view = Some(view);
        self.record(RecordedCommand::BeginFrame {
            width: self.width,
            height: self.height,
        });
        Ok(FrameContext {
            swapchain_view: view,
            width: self.width,
            height: self.height,
        })
    }

    fn end_frame(&mut self) -> BackendResult<()> {
        if self.pass != PassState::None {
            return Err(BackendError::PresentFailed("A pass is still open".into()));
        }
        if self.swapchain_view.take().is_none() {
            return Err(BackendError::PresentFailed("No frame in flight".into()));
        }
        self.record(RecordedCommand::EndFrame);
        Ok(())
    }

    fn swapchain_format(&self) -> TextureFormat {
        TextureFormat::Bgra8UnormSrgb
    }

    fn create_buffer(&mut self, desc: &BufferDescriptor) -> BackendResult<BufferHandle> {
        if desc.size == 0 {
            return Err(BackendError::BufferCreationFailed(format!(
                "{:?}: zero-sized buffer",
                desc.label
            )));
        }
        log::trace!(
            "DummyBackend: creating buffer {:?} (size: {})",
            desc.label,
            desc.size
        );
        let id = self.next_handle();
        self.buffers.insert(id, desc.clone());
        Ok(BufferHandle(id))
    }

    fn create_buffer_init(
        &mut self,
        desc: &BufferDescriptor,
        data: &[u8],
    ) -> BackendResult<BufferHandle> {
        let desc = BufferDescriptor {
            size: data.len() as u64,
            ..desc.clone()
        };
        self.create_buffer(&desc)
    }

    fn write_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8]) {
        if !self.buffers.contains_key(&buffer.0) {
            log::warn!("DummyBackend: write to unknown buffer {:?}", buffer);
            return;
        }
        self.record(RecordedCommand::WriteBuffer {
            buffer,
            offset,
            len: data.len(),
        });
    }

    fn create_texture(&mut self, desc: &TextureDescriptor) -> BackendResult<TextureHandle> {
        if desc.width == 0 || desc.height == 0 || desc.depth == 0 || desc.mip_levels == 0 {
            return Err(BackendError::TextureCreationFailed(format!(
                "{:?}: invalid size {}x{}x{} with {} mips",
                desc.label, desc.width, desc.height, desc.depth, desc.mip_levels
            )));
        }
        log::trace!(
            "DummyBackend: creating texture {:?} ({}x{}x{})",
            desc.label,
            desc.width,
            desc.height,
            desc.depth
        );
        let id = self.next_handle();
        self.textures.insert(id, desc.clone());
        Ok(TextureHandle(id))
    }

    fn create_texture_view_with(
        &mut self,
        texture: TextureHandle,
        desc: &TextureViewDescriptor,
    ) -> BackendResult<TextureViewHandle> {
        let tex = self
            .textures
            .get(&texture.0)
            .ok_or_else(|| BackendError::TextureCreationFailed("Texture not found".into()))?;
        let requested = desc.base_mip_level + desc.mip_level_count.unwrap_or(1);
        if requested > tex.mip_levels {
            return Err(BackendError::TextureCreationFailed(format!(
                "View mips {}..{} exceed {} levels",
                desc.base_mip_level, requested, tex.mip_levels
            )));
        }
        let id = self.next_handle();
        self.texture_views.insert(id, texture);
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
        if !self.textures.contains_key(&texture.0) {
            return Err(BackendError::UploadFailed(format!("Unknown {:?}", texture)));
        }
        self.texture_data
            .insert((texture.0, region.mip_level), data.to_vec());
        self.record(RecordedCommand::WriteTexture { texture, region });
        Ok(())
    }

    fn clear_buffer(&mut self, buffer: BufferHandle) {
        if self.swapchain_view.is_none() {
            log::warn!("DummyBackend: clear_buffer outside of a frame, ignored");
            return;
        }
        self.record(RecordedCommand::ClearBuffer(buffer));
    }

    fn create_sampler(&mut self, desc: &SamplerDescriptor) -> BackendResult<SamplerHandle> {
        log::trace!("DummyBackend: creating sampler {:?}", desc.label);
        Ok(SamplerHandle(self.next_handle()))
    }

    fn create_bind_group_layout(
        &mut self,
        entries: &[BindGroupLayoutEntry],
    ) -> BackendResult<BindGroupLayoutHandle> {
        log::trace!("DummyBackend: creating bind group layout ({} entries)", entries.len());
        Ok(BindGroupLayoutHandle(self.next_handle()))
    }

    fn create_bind_group(
        &mut self,
        _layout: BindGroupLayoutHandle,
        entries: &[(u32, BindGroupEntry)],
    ) -> BackendResult<BindGroupHandle> {
        for (binding, entry) in entries {
            let known = match entry {
                BindGroupEntry::Buffer { buffer, .. } => self.buffers.contains_key(&buffer.0),
                BindGroupEntry::Texture(view) | BindGroupEntry::StorageTexture(view) => {
                    self.texture_views.contains_key(&view.0)
                }
                BindGroupEntry::Sampler(_) => true,
            };
            if !known {
                return Err(BackendError::PipelineCreationFailed(format!(
                    "Binding {} references an unknown resource",
                    binding
                )));
            }
        }
        Ok(BindGroupHandle(self.next_handle()))
    }

    fn create_render_pipeline(
        &mut self,
        desc: &RenderPipelineDescriptor,
    ) -> BackendResult<RenderPipelineHandle> {
        let has_vertex = Self::has_entry_point(&desc.vertex_shader, "vs_main");
        let has_fragment = desc
            .fragment_shader
            .as_deref()
            .map_or(true, |source| Self::has_entry_point(source, "fs_main"));
        if !has_vertex || !has_fragment {
            return Err(BackendError::ShaderCreationFailed(format!(
                "{:?}: missing vs_main/fs_main entry point",
                desc.label
            )));
        }
        let id = self.next_handle();
        self.render_pipelines.insert(id);
        Ok(RenderPipelineHandle(id))
    }

    fn create_compute_pipeline(
        &mut self,
        desc: &ComputePipelineDescriptor,
    ) -> BackendResult<ComputePipelineHandle> {
        if !Self::has_entry_point(&desc.shader, &desc.entry_point) {
            return Err(BackendError::ShaderCreationFailed(format!(
                "{:?}: missing entry point {}",
                desc.label, desc.entry_point
            )));
        }
        let id = self.next_handle();
        self.compute_pipelines.insert(id);
        Ok(ComputePipelineHandle(id))
    }

    fn begin_render_pass(&mut self, desc: &RenderPassDescriptor) {
        self.pass = PassState::Render;
        self.record(RecordedCommand::BeginRenderPass {
            label: desc.label.clone(),
            color_views: desc.color_attachments.iter().map(|att| att.view).collect(),
            depth_view: desc.depth_stencil_attachment.as_ref().map(|att| att.view),
            clears_color: desc
                .color_attachments
                .iter()
                .any(|att| matches!(att.load_op, LoadOp::Clear(_))),
        });
    }

    fn end_render_pass(&mut self) {
        if self.pass == PassState::Render {
            self.pass = PassState::None;
            self.record(RecordedCommand::EndRenderPass);
        }
    }

    fn begin_compute_pass(&mut self, label: Option<&str>) {
        self.pass = PassState::Compute;
        self.record(RecordedCommand::BeginComputePass {
            label: label.map(|s| s.to_string()),
        });
    }

    fn end_compute_pass(&mut self) {
        if self.pass == PassState::Compute {
            self.pass = PassState::None;
            self.record(RecordedCommand::EndComputePass);
        }
    }

    fn set_render_pipeline(&mut self, pipeline: RenderPipelineHandle) {
        if !self.render_pipelines.contains(&pipeline.0) {
            log::warn!("DummyBackend: unknown {:?}, ignored", pipeline);
            return;
        }
        self.record_in_render_pass(RecordedCommand::SetRenderPipeline(pipeline));
    }

    fn set_compute_pipeline(&mut self, pipeline: ComputePipelineHandle) {
        if !self.compute_pipelines.contains(&pipeline.0) {
            log::warn!("DummyBackend: unknown {:?}, ignored", pipeline);
            return;
        }
        if self.pass == PassState::Compute {
            self.record(RecordedCommand::SetComputePipeline(pipeline));
        }
    }

    fn set_bind_group(&mut self, index: u32, bind_group: BindGroupHandle) {
        if self.pass != PassState::None {
            self.record(RecordedCommand::SetBindGroup { index, bind_group });
        }
    }

    fn set_vertex_buffer(&mut self, slot: u32, buffer: BufferHandle, _offset: u64) {
        self.record_in_render_pass(RecordedCommand::SetVertexBuffer { slot, buffer });
    }

    fn set_index_buffer(&mut self, buffer: BufferHandle, _offset: u64, format: IndexFormat) {
        self.record_in_render_pass(RecordedCommand::SetIndexBuffer { buffer, format });
    }

    fn set_viewport(&mut self, viewport: Viewport) {
        self.record_in_render_pass(RecordedCommand::SetViewport(viewport));
    }

    fn draw(&mut self, vertices: Range<u32>, instances: Range<u32>) {
        self.record_in_render_pass(RecordedCommand::Draw {
            vertices,
            instances,
        });
    }

    fn draw_indexed(&mut self, indices: Range<u32>, base_vertex: i32, instances: Range<u32>) {
        self.record_in_render_pass(RecordedCommand::DrawIndexed {
            indices,
            base_vertex,
            instances,
        });
    }

    fn dispatch_compute(&mut self, x: u32, y: u32, z: u32) {
        if self.pass == PassState::Compute {
            self.record(RecordedCommand::Dispatch { x, y, z });
        }
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) {
        self.buffers.remove(&buffer.0);
    }

    fn destroy_texture(&mut self, texture: TextureHandle) {
        self.textures.remove(&texture.0);
        self.texture_data.retain(|(id, _), _| *id != texture.0);
        self.texture_views.retain(|_, source| *source != texture);
    }
}
