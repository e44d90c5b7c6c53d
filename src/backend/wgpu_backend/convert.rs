//! Mapping from backend-neutral types to wgpu

use crate::backend::traits::*;
use crate::backend::types::*;

pub(super) fn texture_format(format: TextureFormat) -> wgpu::TextureFormat {
    match format {
        TextureFormat::Rgba8Unorm => wgpu::TextureFormat::Rgba8Unorm,
        TextureFormat::Rgba8UnormSrgb => wgpu::TextureFormat::Rgba8UnormSrgb,
        TextureFormat::Bgra8Unorm => wgpu::TextureFormat::Bgra8Unorm,
        TextureFormat::Bgra8UnormSrgb => wgpu::TextureFormat::Bgra8UnormSrgb,
        TextureFormat::Rgba16Float => wgpu::TextureFormat::Rgba16Float,
        TextureFormat::Depth32Float => wgpu::TextureFormat::Depth32Float,
    }
}

/// Surface formats the renderer can draw into. `None` for anything else.
pub(super) fn swapchain_format(format: wgpu::TextureFormat) -> Option<TextureFormat> {
    match format {
        wgpu::TextureFormat::Rgba8Unorm => Some(TextureFormat::Rgba8Unorm),
        wgpu::TextureFormat::Rgba8UnormSrgb => Some(TextureFormat::Rgba8UnormSrgb),
        wgpu::TextureFormat::Bgra8Unorm => Some(TextureFormat::Bgra8Unorm),
        wgpu::TextureFormat::Bgra8UnormSrgb => Some(TextureFormat::Bgra8UnormSrgb),
        _ => None,
    }
}

const BUFFER_USAGES: [(BufferUsage, wgpu::BufferUsages); 5] = [
    (BufferUsage::COPY_DST, wgpu::BufferUsages::COPY_DST),
    (BufferUsage::INDEX, wgpu::BufferUsages::INDEX),
    (BufferUsage::VERTEX, wgpu::BufferUsages::VERTEX),
    (BufferUsage::UNIFORM, wgpu::BufferUsages::UNIFORM),
    (BufferUsage::STORAGE, wgpu::BufferUsages::STORAGE),
];

const TEXTURE_USAGES: [(TextureUsage, wgpu::TextureUsages); 4] = [
    (TextureUsage::COPY_DST, wgpu::TextureUsages::COPY_DST),
    (TextureUsage::TEXTURE_BINDING, wgpu::TextureUsages::TEXTURE_BINDING),
    (TextureUsage::STORAGE_BINDING, wgpu::TextureUsages::STORAGE_BINDING),
    (TextureUsage::RENDER_ATTACHMENT, wgpu::TextureUsages::RENDER_ATTACHMENT),
];

const SHADER_STAGES: [(ShaderStageFlags, wgpu::ShaderStages); 3] = [
    (ShaderStageFlags::VERTEX, wgpu::ShaderStages::VERTEX),
    (ShaderStageFlags::FRAGMENT, wgpu::ShaderStages::FRAGMENT),
    (ShaderStageFlags::COMPUTE, wgpu::ShaderStages::COMPUTE),
];

pub(super) fn buffer_usages(usage: BufferUsage) -> wgpu::BufferUsages {
    BUFFER_USAGES
        .iter()
        .filter(|(flag, _)| usage.contains(*flag))
        .fold(wgpu::BufferUsages::empty(), |acc, (_, bits)| acc | *bits)
}

pub(super) fn texture_usages(usage: TextureUsage) -> wgpu::TextureUsages {
    TEXTURE_USAGES
        .iter()
        .filter(|(flag, _)| usage.contains(*flag))
        .fold(wgpu::TextureUsages::empty(), |acc, (_, bits)| acc | *bits)
}

pub(super) fn shader_stages(stages: ShaderStageFlags) -> wgpu::ShaderStages {
    SHADER_STAGES
        .iter()
        .filter(|(flag, _)| stages.contains(*flag))
        .fold(wgpu::ShaderStages::empty(), |acc, (_, bits)| acc | *bits)
}

pub(super) fn view_dimension(dimension: TextureViewDimension) -> wgpu::TextureViewDimension {
    match dimension {
        TextureViewDimension::D2 => wgpu::TextureViewDimension::D2,
        TextureViewDimension::D3 => wgpu::TextureViewDimension::D3,
    }
}

pub(super) fn vertex_format(format: VertexFormat) -> wgpu::VertexFormat {
    match format {
        VertexFormat::Float32x2 => wgpu::VertexFormat::Float32x2,
        VertexFormat::Float32x3 => wgpu::VertexFormat::Float32x3,
        VertexFormat::Float32x4 => wgpu::VertexFormat::Float32x4,
    }
}

pub(super) fn compare_function(func: CompareFunction) -> wgpu::CompareFunction {
    match func {
        CompareFunction::Less => wgpu::CompareFunction::Less,
        CompareFunction::LessEqual => wgpu::CompareFunction::LessEqual,
        CompareFunction::Always => wgpu::CompareFunction::Always,
    }
}

pub(super) fn filter_mode(mode: FilterMode) -> wgpu::FilterMode {
    match mode {
        FilterMode::Nearest => wgpu::FilterMode::Nearest,
        FilterMode::Linear => wgpu::FilterMode::Linear,
    }
}

pub(super) fn cull_mode(mode: CullMode) -> Option<wgpu::Face> {
    match mode {
        CullMode::None => None,
        CullMode::Back => Some(wgpu::Face::Back),
    }
}

pub(super) fn index_format(format: IndexFormat) -> wgpu::IndexFormat {
    match format {
        IndexFormat::Uint16 => wgpu::IndexFormat::Uint16,
        IndexFormat::Uint32 => wgpu::IndexFormat::Uint32,
    }
}

pub(super) fn load_op<T>(op: &LoadOp, clear: impl FnOnce(&[f32; 4]) -> T) -> wgpu::LoadOp<T> {
    match op {
        LoadOp::Clear(color) => wgpu::LoadOp::Clear(clear(color)),
        LoadOp::Load => wgpu::LoadOp::Load,
    }
}

pub(super) fn store_op(op: StoreOp) -> wgpu::StoreOp {
    match op {
        StoreOp::Store => wgpu::StoreOp::Store,
        StoreOp::Discard => wgpu::StoreOp::Discard,
    }
}

pub(super) fn binding_type(ty: &BindingType) -> wgpu::BindingType {
    match ty {
        BindingType::UniformBuffer => wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        BindingType::StorageBuffer { read_only } => wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage {
                read_only: *read_only,
            },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        BindingType::Texture {
            sample_type,
            view_dimension: dimension,
        } => wgpu::BindingType::Texture {
            sample_type: match sample_type {
                TextureSampleType::Float { filterable } => wgpu::TextureSampleType::Float {
                    filterable: *filterable,
                },
                TextureSampleType::Uint => wgpu::TextureSampleType::Uint,
            },
            view_dimension: view_dimension(*dimension),
            multisampled: false,
        },
        BindingType::StorageTexture {
            format,
            access,
            view_dimension: dimension,
        } => wgpu::BindingType::StorageTexture {
            access: match access {
                StorageTextureAccess::WriteOnly => wgpu::StorageTextureAccess::WriteOnly,
                StorageTextureAccess::ReadWrite => wgpu::StorageTextureAccess::ReadWrite,
            },
            format: texture_format(*format),
            view_dimension: view_dimension(*dimension),
        },
        BindingType::Sampler { comparison: true } => {
            wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Comparison)
        }
        BindingType::Sampler { comparison: false } => {
            wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering)
        }
    }
}

/// Turn the error popped from a creation scope into the matching
/// [`BackendError`]. Allocation failures always map to `OutOfMemory`.
pub(super) fn scope_error(error: Option<wgpu::Error>, failed: fn(String) -> BackendError) -> BackendResult<()> {
    match error {
        None => Ok(()),
        Some(wgpu::Error::OutOfMemory { .. }) => Err(BackendError::OutOfMemory),
        Some(error) => Err(failed(error.to_string())),
    }
}

/// The voxelizer writes storage buffers from the fragment stage and reads
/// the mesh from storage in the vertex stage; the resolve and mip passes are
/// compute.
const REQUIRED_DOWNLEVEL: [(wgpu::DownlevelFlags, &str); 3] = [
    (wgpu::DownlevelFlags::COMPUTE_SHADERS, "compute shaders"),
    (wgpu::DownlevelFlags::FRAGMENT_WRITABLE_STORAGE, "fragment stage storage writes"),
    (wgpu::DownlevelFlags::VERTEX_STORAGE, "vertex stage storage buffers"),
];

/// Names every capability the adapter lacks
pub(super) fn check_downlevel(caps: &wgpu::DownlevelCapabilities) -> Result<(), String> {
    let missing: Vec<&str> = REQUIRED_DOWNLEVEL
        .iter()
        .filter(|(flag, _)| !caps.flags.contains(*flag))
        .map(|(_, name)| *name)
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(format!("adapter lacks {}", missing.join(", ")))
    }
}

/// Fit a requested surface size inside the device's 2D texture limit,
/// keeping the aspect ratio. Never returns a zero dimension.
pub(super) fn clamp_surface_size(width: u32, height: u32, max: u32) -> (u32, u32) {
    if width <= max && height <= max {
        return (width.max(1), height.max(1));
    }
    let scale = (max as f32 / width as f32).min(max as f32 / height as f32);
    (
        ((width as f32 * scale) as u32).clamp(1, max),
        ((height as f32 * scale) as u32).clamp(1, max),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_swapchain_formats_map_back() {
        for format in [
            TextureFormat::Rgba8Unorm,
            TextureFormat::Rgba8UnormSrgb,
            TextureFormat::Bgra8Unorm,
            TextureFormat::Bgra8UnormSrgb,
        ] {
            assert_eq!(swapchain_format(texture_format(format)), Some(format));
        }
        assert_eq!(swapchain_format(wgpu::TextureFormat::Rgba16Float), None);
        assert_eq!(swapchain_format(wgpu::TextureFormat::Rgb10a2Unorm), None);
    }

    #[test]
    fn test_usage_flags() {
        assert_eq!(
            buffer_usages(BufferUsage::VERTEX | BufferUsage::STORAGE),
            wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::STORAGE
        );
        assert_eq!(
            texture_usages(TextureUsage::TEXTURE_BINDING | TextureUsage::STORAGE_BINDING),
            wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::STORAGE_BINDING
        );
        assert_eq!(
            shader_stages(ShaderStageFlags::VERTEX_FRAGMENT),
            wgpu::ShaderStages::VERTEX_FRAGMENT
        );
    }

    #[test]
    fn test_scope_errors_are_fatal() {
        assert!(scope_error(None, BackendError::BufferCreationFailed).is_ok());

        let oom = wgpu::Error::OutOfMemory {
            source: Box::new(std::fmt::Error),
        };
        assert!(matches!(
            scope_error(Some(oom), BackendError::BufferCreationFailed),
            Err(BackendError::OutOfMemory)
        ));

        let invalid = wgpu::Error::Validation {
            source: Box::new(std::fmt::Error),
            description: "fragment stage storage writes unsupported".into(),
        };
        match scope_error(Some(invalid), BackendError::PipelineCreationFailed) {
            Err(BackendError::PipelineCreationFailed(message)) => {
                assert!(message.contains("fragment stage storage writes"))
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_downlevel_requirements() {
        assert!(check_downlevel(&wgpu::DownlevelCapabilities::default()).is_ok());

        let caps = wgpu::DownlevelCapabilities {
            flags: wgpu::DownlevelFlags::all()
                - wgpu::DownlevelFlags::FRAGMENT_WRITABLE_STORAGE
                - wgpu::DownlevelFlags::VERTEX_STORAGE,
            ..Default::default()
        };
        let missing = check_downlevel(&caps).unwrap_err();
        assert!(missing.contains("fragment stage storage writes"));
        assert!(missing.contains("vertex stage storage buffers"));
        assert!(!missing.contains("compute"));
    }

    #[test]
    fn test_clamp_surface_size() {
        assert_eq!(clamp_surface_size(1280, 720, 8192), (1280, 720));
        assert_eq!(clamp_surface_size(0, 0, 8192), (1, 1));
        assert_eq!(clamp_surface_size(16384, 4096, 8192), (8192, 2048));
        assert_eq!(clamp_surface_size(100000, 1, 8192), (8192, 1));
    }
}
