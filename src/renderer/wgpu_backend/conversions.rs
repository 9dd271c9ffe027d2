//! Mappings between the backend-neutral descriptors and their wgpu counterparts.

use crate::renderer::backend::{
    AddressMode, BlendMode, BufferUsage, ColorSpace, CullMode, Filter, FrontFace, ImageUsage,
    PhysicalDeviceType, PixelFormat, PresentMode, SurfaceFormat, VertexFormat,
};
use crate::renderer::shaders::ShaderStage;

pub fn texture_format(format: PixelFormat) -> wgpu::TextureFormat {
    match format {
        PixelFormat::Bgra8Unorm => wgpu::TextureFormat::Bgra8Unorm,
        PixelFormat::Bgra8UnormSrgb => wgpu::TextureFormat::Bgra8UnormSrgb,
        PixelFormat::Rgba8Unorm => wgpu::TextureFormat::Rgba8Unorm,
        PixelFormat::Rgba8UnormSrgb => wgpu::TextureFormat::Rgba8UnormSrgb,
        PixelFormat::Rgb10a2Unorm => wgpu::TextureFormat::Rgb10a2Unorm,
        PixelFormat::Rgba16Float => wgpu::TextureFormat::Rgba16Float,
    }
}

/// Surface formats we cannot describe are skipped by returning `None`.
pub fn surface_format(format: wgpu::TextureFormat) -> Option<SurfaceFormat> {
    let (format, color_space) = match format {
        wgpu::TextureFormat::Bgra8Unorm => (PixelFormat::Bgra8Unorm, ColorSpace::SrgbNonLinear),
        wgpu::TextureFormat::Bgra8UnormSrgb => {
            (PixelFormat::Bgra8UnormSrgb, ColorSpace::SrgbNonLinear)
        }
        wgpu::TextureFormat::Rgba8Unorm => (PixelFormat::Rgba8Unorm, ColorSpace::SrgbNonLinear),
        wgpu::TextureFormat::Rgba8UnormSrgb => {
            (PixelFormat::Rgba8UnormSrgb, ColorSpace::SrgbNonLinear)
        }
        wgpu::TextureFormat::Rgb10a2Unorm => {
            (PixelFormat::Rgb10a2Unorm, ColorSpace::SrgbNonLinear)
        }
        wgpu::TextureFormat::Rgba16Float => {
            (PixelFormat::Rgba16Float, ColorSpace::ExtendedSrgbLinear)
        }
        _ => return None,
    };
    Some(SurfaceFormat {
        format,
        color_space,
    })
}

pub fn present_mode(mode: PresentMode) -> wgpu::PresentMode {
    match mode {
        PresentMode::Immediate => wgpu::PresentMode::Immediate,
        PresentMode::Mailbox => wgpu::PresentMode::Mailbox,
        PresentMode::Fifo => wgpu::PresentMode::Fifo,
        PresentMode::FifoRelaxed => wgpu::PresentMode::FifoRelaxed,
    }
}

pub fn from_present_mode(mode: wgpu::PresentMode) -> Option<PresentMode> {
    match mode {
        wgpu::PresentMode::Immediate => Some(PresentMode::Immediate),
        wgpu::PresentMode::Mailbox => Some(PresentMode::Mailbox),
        wgpu::PresentMode::Fifo => Some(PresentMode::Fifo),
        wgpu::PresentMode::FifoRelaxed => Some(PresentMode::FifoRelaxed),
        _ => None,
    }
}

pub fn device_type(device_type: wgpu::DeviceType) -> PhysicalDeviceType {
    match device_type {
        wgpu::DeviceType::DiscreteGpu => PhysicalDeviceType::Discrete,
        wgpu::DeviceType::IntegratedGpu => PhysicalDeviceType::Integrated,
        wgpu::DeviceType::VirtualGpu => PhysicalDeviceType::Virtual,
        wgpu::DeviceType::Cpu => PhysicalDeviceType::Cpu,
        wgpu::DeviceType::Other => PhysicalDeviceType::Other,
    }
}

/// Host-visible memory is written through the queue, which needs `COPY_DST`.
pub fn buffer_usages(usage: BufferUsage, host_visible: bool) -> wgpu::BufferUsages {
    let mut usages = wgpu::BufferUsages::empty();
    if usage.contains(BufferUsage::TRANSFER_SRC) {
        usages |= wgpu::BufferUsages::COPY_SRC;
    }
    if usage.contains(BufferUsage::TRANSFER_DST) || host_visible {
        usages |= wgpu::BufferUsages::COPY_DST;
    }
    if usage.contains(BufferUsage::VERTEX) {
        usages |= wgpu::BufferUsages::VERTEX;
    }
    if usage.contains(BufferUsage::INDEX) {
        usages |= wgpu::BufferUsages::INDEX;
    }
    if usage.contains(BufferUsage::UNIFORM) {
        usages |= wgpu::BufferUsages::UNIFORM;
    }
    usages
}

pub fn texture_usages(usage: ImageUsage) -> wgpu::TextureUsages {
    let mut usages = wgpu::TextureUsages::empty();
    if usage.contains(ImageUsage::TRANSFER_DST) {
        usages |= wgpu::TextureUsages::COPY_DST;
    }
    if usage.contains(ImageUsage::SAMPLED) {
        usages |= wgpu::TextureUsages::TEXTURE_BINDING;
    }
    usages
}

pub fn vertex_format(format: VertexFormat) -> wgpu::VertexFormat {
    match format {
        VertexFormat::Float32x2 => wgpu::VertexFormat::Float32x2,
        VertexFormat::Float32x3 => wgpu::VertexFormat::Float32x3,
        VertexFormat::Float32x4 => wgpu::VertexFormat::Float32x4,
    }
}

pub fn cull_mode(mode: CullMode) -> Option<wgpu::Face> {
    match mode {
        CullMode::None => None,
        CullMode::Front => Some(wgpu::Face::Front),
        CullMode::Back => Some(wgpu::Face::Back),
    }
}

pub fn front_face(face: FrontFace) -> wgpu::FrontFace {
    match face {
        FrontFace::Clockwise => wgpu::FrontFace::Cw,
        FrontFace::CounterClockwise => wgpu::FrontFace::Ccw,
    }
}

pub fn blend_state(mode: BlendMode) -> Option<wgpu::BlendState> {
    match mode {
        BlendMode::Opaque => None,
        BlendMode::Alpha => Some(wgpu::BlendState {
            color: wgpu::BlendComponent {
                src_factor: wgpu::BlendFactor::SrcAlpha,
                dst_factor: wgpu::BlendFactor::OneMinusSrcAlpha,
                operation: wgpu::BlendOperation::Add,
            },
            alpha: wgpu::BlendComponent::REPLACE,
        }),
    }
}

pub fn filter_mode(filter: Filter) -> wgpu::FilterMode {
    match filter {
        Filter::Nearest => wgpu::FilterMode::Nearest,
        Filter::Linear => wgpu::FilterMode::Linear,
    }
}

pub fn address_mode(mode: AddressMode) -> wgpu::AddressMode {
    match mode {
        AddressMode::Repeat => wgpu::AddressMode::Repeat,
        AddressMode::ClampToEdge => wgpu::AddressMode::ClampToEdge,
    }
}

/// wgpu rejects an anisotropy clamp above 1 unless every filter is linear.
pub fn anisotropy_clamp(filter: Filter, max_anisotropy: Option<f32>) -> u16 {
    match (filter, max_anisotropy) {
        (Filter::Linear, Some(max)) => max.clamp(1.0, 16.0) as u16,
        _ => 1,
    }
}

pub fn shader_stages(stage: ShaderStage) -> wgpu::ShaderStages {
    match stage {
        ShaderStage::Vertex => wgpu::ShaderStages::VERTEX,
        ShaderStage::Fragment => wgpu::ShaderStages::FRAGMENT,
    }
}

pub fn clear_color(color: [f32; 4]) -> wgpu::Color {
    wgpu::Color {
        r: f64::from(color[0]),
        g: f64::from(color[1]),
        b: f64::from(color[2]),
        a: f64::from(color[3]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_visible_buffers_accept_queue_writes() {
        let usages = buffer_usages(BufferUsage::UNIFORM, true);
        assert!(usages.contains(wgpu::BufferUsages::COPY_DST));
        assert!(usages.contains(wgpu::BufferUsages::UNIFORM));

        let device_local = buffer_usages(BufferUsage::VERTEX, false);
        assert!(!device_local.contains(wgpu::BufferUsages::COPY_DST));
    }

    #[test]
    fn nearest_sampling_never_requests_anisotropy() {
        assert_eq!(anisotropy_clamp(Filter::Nearest, Some(16.0)), 1);
        assert_eq!(anisotropy_clamp(Filter::Linear, Some(8.0)), 8);
        assert_eq!(anisotropy_clamp(Filter::Linear, Some(64.0)), 16);
        assert_eq!(anisotropy_clamp(Filter::Linear, None), 1);
    }

    #[test]
    fn unknown_surface_formats_are_skipped() {
        assert_eq!(surface_format(wgpu::TextureFormat::R8Unorm), None);
        assert_eq!(
            surface_format(wgpu::TextureFormat::Bgra8Unorm),
            Some(SurfaceFormat {
                format: PixelFormat::Bgra8Unorm,
                color_space: ColorSpace::SrgbNonLinear,
            })
        );
        assert_eq!(from_present_mode(wgpu::PresentMode::AutoVsync), None);
    }
}
