//! Core backend abstraction
//!
//! [`GraphicsBackend`] is implemented by the wgpu backend and by the
//! recording [`DummyBackend`](crate::backend::dummy::DummyBackend). GPU objects
//! are addressed through copyable handles; the backend owns the objects.

use crate::backend::types::*;
use std::ops::Range;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("Backend initialization failed: {0}")]
    InitializationFailed(String),
    #[error("Surface creation failed: {0}")]
    SurfaceCreationFailed(String),
    #[error("Device creation failed: {0}")]
    DeviceCreationFailed(String),
    #[error("Could not acquire the next swapchain image: {0}")]
    AcquireImageFailed(String),
    #[error("Present failed: {0}")]
    PresentFailed(String),
    #[error("Buffer creation failed: {0}")]
    BufferCreationFailed(String),
    #[error("Texture creation failed: {0}")]
    TextureCreationFailed(String),
    #[error("Pipeline creation failed: {0}")]
    PipelineCreationFailed(String),
    #[error("Shader rejected: {0}")]
    ShaderCreationFailed(String),
    #[error("Texture upload rejected: {0}")]
    UploadFailed(String),
    /// The swapchain must be reconfigured before the next frame
    #[error("Surface lost")]
    SurfaceLost,
    #[error("Out of memory")]
    OutOfMemory,
}

pub type BackendResult<T> = Result<T, BackendError>;

macro_rules! handles {
    ($($(#[$doc:meta])* $name:ident;)*) => {
        $(
            $(#[$doc])*
            #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
            pub struct $name(pub(crate) u64);
        )*
    };
}

handles! {
    BufferHandle;
    TextureHandle;
    /// View over a texture, or the swapchain image of the current frame
    TextureViewHandle;
    SamplerHandle;
    RenderPipelineHandle;
    ComputePipelineHandle;
    BindGroupHandle;
    BindGroupLayoutHandle;
}

bit_flags! {
    /// Shader stages a binding is visible to
    ShaderStageFlags {
        VERTEX = 1 << 0,
        FRAGMENT = 1 << 1,
        COMPUTE = 1 << 2,
        VERTEX_FRAGMENT = (1 << 0) | (1 << 1),
    }
}

/// Resource bound at one slot of a bind group
#[derive(Debug, Clone)]
pub enum BindGroupEntry {
    Buffer {
        buffer: BufferHandle,
        offset: u64,
        size: Option<u64>,
    },
    Texture(TextureViewHandle),
    Sampler(SamplerHandle),
    StorageTexture(TextureViewHandle),
}

#[derive(Debug, Clone)]
pub struct BindGroupLayoutEntry {
    pub binding: u32,
    pub visibility: ShaderStageFlags,
    pub ty: BindingType,
}

#[derive(Debug, Clone)]
pub enum BindingType {
    UniformBuffer,
    StorageBuffer { read_only: bool },
    Texture {
        sample_type: TextureSampleType,
        view_dimension: TextureViewDimension,
    },
    StorageTexture {
        format: TextureFormat,
        access: StorageTextureAccess,
        view_dimension: TextureViewDimension,
    },
    Sampler { comparison: bool },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureSampleType {
    Float { filterable: bool },
    Uint,
}

/// Render pipeline over triangle lists.
///
/// Entry points are `vs_main` and `fs_main`. When both stages live in one
/// WGSL module, pass the same source for both.
#[derive(Debug, Clone)]
pub struct RenderPipelineDescriptor {
    pub label: Option<String>,
    pub vertex_shader: String,
    pub fragment_shader: Option<String>,
    pub vertex_layouts: Vec<VertexBufferLayout>,
    pub bind_group_layouts: Vec<BindGroupLayoutHandle>,
    pub cull_mode: CullMode,
    pub depth_stencil: Option<DepthStencilState>,
    pub color_targets: Vec<ColorTargetState>,
}

#[derive(Debug, Clone)]
pub struct DepthStencilState {
    pub format: TextureFormat,
    pub depth_write_enabled: bool,
    pub depth_compare: CompareFunction,
}

#[derive(Debug, Clone)]
pub struct ColorTargetState {
    pub format: TextureFormat,
    pub write_mask: ColorWrites,
}

/// Color channel write mask, RGBA in the low four bits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColorWrites(pub u32);

impl ColorWrites {
    pub const NONE: Self = Self(0);
    pub const ALL: Self = Self(0xF);

    pub fn bits(&self) -> u32 {
        self.0
    }
}

#[derive(Debug, Clone)]
pub struct ComputePipelineDescriptor {
    pub label: Option<String>,
    pub shader: String,
    pub entry_point: String,
    pub bind_group_layouts: Vec<BindGroupLayoutHandle>,
}

#[derive(Debug, Clone)]
pub struct ColorAttachment {
    pub view: TextureViewHandle,
    pub resolve_target: Option<TextureViewHandle>,
    pub load_op: LoadOp,
    pub store_op: StoreOp,
}

#[derive(Debug, Clone)]
pub enum LoadOp {
    Clear([f32; 4]),
    Load,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOp {
    Store,
    Discard,
}

#[derive(Debug, Clone)]
pub struct DepthStencilAttachment {
    pub view: TextureViewHandle,
    pub depth_load_op: LoadOp,
    pub depth_store_op: StoreOp,
    pub depth_clear_value: f32,
}

/// Attachments of one render pass. A pass without color attachments only
/// runs fragment side effects.
#[derive(Debug, Clone)]
pub struct RenderPassDescriptor {
    pub label: Option<String>,
    pub color_attachments: Vec<ColorAttachment>,
    pub depth_stencil_attachment: Option<DepthStencilAttachment>,
}

/// Returned by [`GraphicsBackend::begin_frame`]
#[derive(Debug, Clone, Copy)]
pub struct FrameContext {
    pub swapchain_view: TextureViewHandle,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexFormat {
    Uint16,
    Uint32,
}

/// Graphics backend.
///
/// A frame is bracketed by [`begin_frame`](Self::begin_frame) and
/// [`end_frame`](Self::end_frame). Inside it, commands are recorded in passes:
/// `set_*`, `draw*` and `dispatch_compute` calls only take effect between the
/// begin and end of a matching pass. Resource creation and uploads may happen
/// at any time; uploads land before the next submitted frame.
pub trait GraphicsBackend: Sized {
    fn new(window: Arc<winit::window::Window>, vsync: bool) -> BackendResult<Self>;

    /// Reconfigure the swapchain. Zero sizes are ignored.
    fn resize(&mut self, width: u32, height: u32);

    /// Swapchain size actually in use, possibly clamped by device limits
    fn surface_size(&self) -> (u32, u32);

    /// Acquire the next swapchain image. Fails with
    /// [`BackendError::SurfaceLost`] when the surface needs a resize first.
    fn begin_frame(&mut self) -> BackendResult<FrameContext>;

    /// Submit the recorded frame and present it
    fn end_frame(&mut self) -> BackendResult<()>;

    fn swapchain_format(&self) -> TextureFormat;

    // Resources

    fn create_buffer(&mut self, desc: &BufferDescriptor) -> BackendResult<BufferHandle>;

    fn create_buffer_init(&mut self, desc: &BufferDescriptor, data: &[u8]) -> BackendResult<BufferHandle>;

    fn write_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8]);

    /// Zero a whole buffer. Recorded into the current frame, ignored outside one.
    fn clear_buffer(&mut self, buffer: BufferHandle);

    /// Depth greater than one makes a 3D texture
    fn create_texture(&mut self, desc: &TextureDescriptor) -> BackendResult<TextureHandle>;

    /// View over every mip level of a texture
    fn create_texture_view(&mut self, texture: TextureHandle) -> BackendResult<TextureViewHandle> {
        self.create_texture_view_with(texture, &TextureViewDescriptor::default())
    }

    fn create_texture_view_with(
        &mut self,
        texture: TextureHandle,
        desc: &TextureViewDescriptor,
    ) -> BackendResult<TextureViewHandle>;

    /// Upload one tightly packed mip level. Data whose length does not match
    /// the region is rejected with [`BackendError::UploadFailed`].
    fn write_texture(&mut self, texture: TextureHandle, data: &[u8], region: TextureRegion) -> BackendResult<()>;

    fn create_sampler(&mut self, desc: &SamplerDescriptor) -> BackendResult<SamplerHandle>;

    fn destroy_buffer(&mut self, buffer: BufferHandle);

    fn destroy_texture(&mut self, texture: TextureHandle);

    // Pipelines

    fn create_bind_group_layout(&mut self, entries: &[BindGroupLayoutEntry]) -> BackendResult<BindGroupLayoutHandle>;

    fn create_bind_group(
        &mut self,
        layout: BindGroupLayoutHandle,
        entries: &[(u32, BindGroupEntry)],
    ) -> BackendResult<BindGroupHandle>;

    fn create_render_pipeline(&mut self, desc: &RenderPipelineDescriptor) -> BackendResult<RenderPipelineHandle>;

    fn create_compute_pipeline(&mut self, desc: &ComputePipelineDescriptor) -> BackendResult<ComputePipelineHandle>;

    // Passes

    fn begin_render_pass(&mut self, desc: &RenderPassDescriptor);

    fn end_render_pass(&mut self);

    fn begin_compute_pass(&mut self, label: Option<&str>);

    fn end_compute_pass(&mut self);

    fn set_render_pipeline(&mut self, pipeline: RenderPipelineHandle);

    fn set_compute_pipeline(&mut self, pipeline: ComputePipelineHandle);

    /// Applies to whichever kind of pass is open
    fn set_bind_group(&mut self, index: u32, bind_group: BindGroupHandle);

    fn set_vertex_buffer(&mut self, slot: u32, buffer: BufferHandle, offset: u64);

    fn set_index_buffer(&mut self, buffer: BufferHandle, offset: u64, format: IndexFormat);

    /// Viewport for the following draws of the open render pass. A new pass
    /// starts with a viewport covering its attachments.
    fn set_viewport(&mut self, viewport: Viewport);

    fn draw(&mut self, vertices: Range<u32>, instances: Range<u32>);

    fn draw_indexed(&mut self, indices: Range<u32>, base_vertex: i32, instances: Range<u32>);

    fn dispatch_compute(&mut self, x: u32, y: u32, z: u32);
}
