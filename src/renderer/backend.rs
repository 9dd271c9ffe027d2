//! The explicit graphics API surface the [`Device`](super::Device) is written against.
//!
//! Resources are plain integer handles. Creation, memory binding and destruction are separate
//! calls, and frame recording is a list of [`Command`] values the backend replays, so the
//! device's bookkeeping can be exercised against [`RecordingBackend`](super::RecordingBackend)
//! as well as the real [`WgpuBackend`](super::WgpuBackend).

use std::fmt;

use bitflags::bitflags;

use crate::error::RenderError;
use crate::renderer::shaders::{ShaderCode, ShaderStage};

macro_rules! resource_ids {
    ($($name:ident => $kind:literal),* $(,)?) => {
        $(
            #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
            pub struct $name(pub u64);

            impl $name {
                pub const KIND: &'static str = $kind;

                pub fn raw(self) -> u64 {
                    self.0
                }

                pub fn invalid(self) -> RenderError {
                    RenderError::InvalidHandle { kind: $kind, id: self.0 }
                }
            }

            impl From<u64> for $name {
                fn from(raw: u64) -> Self {
                    Self(raw)
                }
            }

            impl fmt::Display for $name {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    write!(f, "{}#{}", $kind, self.0)
                }
            }
        )*
    };
}

resource_ids! {
    BufferId => "buffer",
    MemoryId => "memory",
    ImageId => "image",
    ImageViewId => "image view",
    SamplerId => "sampler",
    ShaderModuleId => "shader module",
    RenderPassId => "render pass",
    DescriptorSetLayoutId => "descriptor set layout",
    DescriptorPoolId => "descriptor pool",
    DescriptorSetId => "descriptor set",
    PipelineLayoutId => "pipeline layout",
    PipelineId => "pipeline",
    FramebufferId => "framebuffer",
    CommandPoolId => "command pool",
    CommandBufferId => "command buffer",
    FenceId => "fence",
    SemaphoreId => "semaphore",
}

/// Monotonic handle source shared by every resource kind of one backend.
#[derive(Debug, Default)]
pub struct IdAllocator {
    next: u64,
}

impl IdAllocator {
    pub fn next<T: From<u64>>(&mut self) -> T {
        self.next += 1;
        T::from(self.next)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Extent2d {
    pub width: u32,
    pub height: u32,
}

impl Extent2d {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_zero(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    Bgra8Unorm,
    Bgra8UnormSrgb,
    Rgba8Unorm,
    Rgba8UnormSrgb,
    Rgb10a2Unorm,
    Rgba16Float,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> u32 {
        match self {
            PixelFormat::Rgba16Float => 8,
            _ => 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColorSpace {
    SrgbNonLinear,
    ExtendedSrgbLinear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SurfaceFormat {
    pub format: PixelFormat,
    pub color_space: ColorSpace,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PresentMode {
    Immediate,
    Mailbox,
    Fifo,
    FifoRelaxed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SurfaceCapabilities {
    /// `None` when the surface lets the swapchain pick its own extent.
    pub current_extent: Option<Extent2d>,
    pub min_image_extent: Extent2d,
    pub max_image_extent: Extent2d,
    pub min_image_count: u32,
    /// Zero means no upper bound.
    pub max_image_count: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SwapchainSupport {
    pub capabilities: SurfaceCapabilities,
    pub formats: Vec<SurfaceFormat>,
    pub present_modes: Vec<PresentMode>,
}

impl SwapchainSupport {
    pub fn is_adequate(&self) -> bool {
        !self.formats.is_empty() && !self.present_modes.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueueFamilies {
    pub graphics: Option<u32>,
    pub present: Option<u32>,
}

impl QueueFamilies {
    pub fn is_complete(&self) -> bool {
        self.graphics.is_some() && self.present.is_some()
    }

    /// Distinct family indices, in graphics-then-present order.
    pub fn unique(&self) -> Vec<u32> {
        let mut families = Vec::with_capacity(2);
        for family in [self.graphics, self.present].into_iter().flatten() {
            if !families.contains(&family) {
                families.push(family);
            }
        }
        families
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhysicalDeviceType {
    Discrete,
    Integrated,
    Virtual,
    Cpu,
    Other,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PhysicalDeviceInfo {
    pub index: usize,
    pub name: String,
    pub device_type: PhysicalDeviceType,
    pub queue_families: QueueFamilies,
    pub supports_swapchain: bool,
    pub swapchain_support: SwapchainSupport,
    pub max_sampler_anisotropy: f32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceConfig {
    pub application_name: String,
    pub extensions: Vec<String>,
    pub validation_layers: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapchainConfig {
    pub format: SurfaceFormat,
    pub present_mode: PresentMode,
    pub extent: Extent2d,
    pub image_count: u32,
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BufferUsage: u32 {
        const TRANSFER_SRC = 1 << 0;
        const TRANSFER_DST = 1 << 1;
        const VERTEX = 1 << 2;
        const INDEX = 1 << 3;
        const UNIFORM = 1 << 4;
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ImageUsage: u32 {
        const TRANSFER_DST = 1 << 0;
        const SAMPLED = 1 << 1;
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct MemoryProperties: u32 {
        const DEVICE_LOCAL = 1 << 0;
        const HOST_VISIBLE = 1 << 1;
        const HOST_COHERENT = 1 << 2;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryType {
    pub properties: MemoryProperties,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryRequirements {
    pub size: u64,
    /// Bit `i` set means memory type `i` may back the resource.
    pub type_bits: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferDescriptor {
    pub label: &'static str,
    pub size: u64,
    pub usage: BufferUsage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageDescriptor {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub usage: ImageUsage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageLayout {
    Undefined,
    TransferDst,
    ShaderReadOnly,
    PresentSrc,
}

/// Work recorded into a one-time command buffer and waited on before returning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferCommand {
    CopyBuffer {
        src: BufferId,
        dst: BufferId,
        size: u64,
    },
    TransitionImage {
        image: ImageId,
        from: ImageLayout,
        to: ImageLayout,
    },
    CopyBufferToImage {
        buffer: BufferId,
        image: ImageId,
        width: u32,
        height: u32,
        bytes_per_row: u32,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderPassDescriptor {
    pub color_format: PixelFormat,
    pub clear_on_load: bool,
    pub store_on_end: bool,
    pub final_layout: ImageLayout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DescriptorKind {
    UniformBuffer,
    CombinedImageSampler,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorPoolDescriptor {
    pub uniform_buffers: u32,
    pub combined_image_samplers: u32,
    pub free_individual_sets: bool,
}

impl DescriptorPoolDescriptor {
    pub fn max_sets(&self) -> u32 {
        self.uniform_buffers + self.combined_image_samplers
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorBinding {
    UniformBuffer { buffer: BufferId, size: u64 },
    CombinedImageSampler { view: ImageViewId, sampler: SamplerId },
}

impl DescriptorBinding {
    pub fn kind(&self) -> DescriptorKind {
        match self {
            DescriptorBinding::UniformBuffer { .. } => DescriptorKind::UniformBuffer,
            DescriptorBinding::CombinedImageSampler { .. } => DescriptorKind::CombinedImageSampler,
        }
    }
}

/// Per-kind capacity accounting for one descriptor pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorPoolUsage {
    pub descriptor: DescriptorPoolDescriptor,
    pub uniform_buffers: u32,
    pub combined_image_samplers: u32,
}

impl DescriptorPoolUsage {
    pub fn new(descriptor: DescriptorPoolDescriptor) -> Self {
        Self {
            descriptor,
            uniform_buffers: 0,
            combined_image_samplers: 0,
        }
    }

    pub fn allocate(&mut self, kind: DescriptorKind) -> Result<(), RenderError> {
        let (used, capacity) = match kind {
            DescriptorKind::UniformBuffer => {
                (&mut self.uniform_buffers, self.descriptor.uniform_buffers)
            }
            DescriptorKind::CombinedImageSampler => (
                &mut self.combined_image_samplers,
                self.descriptor.combined_image_samplers,
            ),
        };
        if *used >= capacity {
            return Err(RenderError::DescriptorPoolExhausted { capacity });
        }
        *used += 1;
        Ok(())
    }

    pub fn free(&mut self, kind: DescriptorKind) {
        match kind {
            DescriptorKind::UniformBuffer => {
                self.uniform_buffers = self.uniform_buffers.saturating_sub(1)
            }
            DescriptorKind::CombinedImageSampler => {
                self.combined_image_samplers = self.combined_image_samplers.saturating_sub(1)
            }
        }
    }

    pub fn live_sets(&self) -> u32 {
        self.uniform_buffers + self.combined_image_samplers
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VertexFormat {
    Float32x2,
    Float32x3,
    Float32x4,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VertexAttribute {
    pub location: u32,
    pub format: VertexFormat,
    pub offset: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VertexLayout {
    pub stride: u64,
    pub attributes: Vec<VertexAttribute>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CullMode {
    None,
    Front,
    Back,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrontFace {
    Clockwise,
    CounterClockwise,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlendMode {
    Opaque,
    /// `src * src_alpha + dst * (1 - src_alpha)` for colour, source alpha kept as-is.
    Alpha,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineDescriptor {
    pub vertex_shader: ShaderModuleId,
    pub fragment_shader: ShaderModuleId,
    pub layout: PipelineLayoutId,
    pub render_pass: RenderPassId,
    pub vertex_layout: VertexLayout,
    pub cull_mode: CullMode,
    pub front_face: FrontFace,
    pub blend: BlendMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Filter {
    Nearest,
    Linear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressMode {
    Repeat,
    ClampToEdge,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplerDescriptor {
    pub filter: Filter,
    pub address_mode: AddressMode,
    pub max_anisotropy: Option<f32>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub min_depth: f32,
    pub max_depth: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect2d {
    pub x: i32,
    pub y: i32,
    pub extent: Extent2d,
}

/// One recorded operation of a frame's command buffer.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    BeginRenderPass {
        render_pass: RenderPassId,
        framebuffer: FramebufferId,
        extent: Extent2d,
        clear_color: [f32; 4],
    },
    BindPipeline(PipelineId),
    SetViewport(Viewport),
    SetScissor(Rect2d),
    BindVertexBuffer(BufferId),
    BindIndexBuffer(BufferId),
    BindDescriptorSets {
        layout: PipelineLayoutId,
        sets: Vec<DescriptorSetId>,
    },
    DrawIndexed {
        index_count: u32,
    },
    /// Hands the command buffer to the UI overlay, if one was supplied for the frame.
    RecordOverlay,
    EndRenderPass,
}

#[derive(Debug, Clone, Copy)]
pub struct Submission<'a> {
    pub command_buffer: CommandBufferId,
    pub commands: &'a [Command],
    pub wait_semaphore: SemaphoreId,
    pub signal_semaphore: SemaphoreId,
    pub fence: FenceId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    Acquired { image_index: u32, suboptimal: bool },
    OutOfDate,
    Timeout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentOutcome {
    Presented,
    Suboptimal,
    OutOfDate,
}

/// Appends overlay draw commands to the frame's command buffer before the render pass ends.
pub trait UiOverlay<B: GraphicsBackend> {
    fn record(&mut self, target: &mut B::OverlayContext<'_>);
}

pub trait GraphicsBackend: Sized {
    /// What an overlay gets to record into.
    type OverlayContext<'a>;

    fn required_instance_extensions(&self) -> Vec<String>;
    fn supported_instance_extensions(&self) -> Result<Vec<String>, RenderError>;
    fn supported_validation_layers(&self) -> Result<Vec<String>, RenderError>;
    fn create_instance(&mut self, config: &InstanceConfig) -> Result<(), RenderError>;
    fn create_surface(&mut self) -> Result<(), RenderError>;
    /// Current drawable size of the window in pixels.
    fn framebuffer_size(&self) -> Extent2d;

    fn enumerate_physical_devices(&mut self) -> Result<Vec<PhysicalDeviceInfo>, RenderError>;
    fn create_logical_device(
        &mut self,
        physical_device: usize,
        queue_families: &[u32],
    ) -> Result<(), RenderError>;
    fn memory_types(&self) -> Vec<MemoryType>;
    /// Required alignment of `bytes_per_row` in buffer to image copies.
    fn image_copy_row_alignment(&self) -> u32;

    fn query_swapchain_support(&mut self) -> Result<SwapchainSupport, RenderError>;
    /// Returns the number of images the swapchain actually holds.
    fn create_swapchain(&mut self, config: &SwapchainConfig) -> Result<u32, RenderError>;
    /// A view of swapchain image `image_index`, released with `destroy_image_view`.
    fn create_swapchain_image_view(&mut self, image_index: u32)
        -> Result<ImageViewId, RenderError>;
    /// Every view and framebuffer of the swapchain must be gone first.
    fn destroy_swapchain(&mut self);
    fn create_framebuffer(
        &mut self,
        render_pass: RenderPassId,
        attachment: ImageViewId,
        extent: Extent2d,
    ) -> Result<FramebufferId, RenderError>;
    fn destroy_framebuffer(&mut self, framebuffer: FramebufferId);

    fn create_shader_module(&mut self, code: &ShaderCode) -> Result<ShaderModuleId, RenderError>;
    fn destroy_shader_module(&mut self, module: ShaderModuleId);
    fn create_render_pass(
        &mut self,
        desc: &RenderPassDescriptor,
    ) -> Result<RenderPassId, RenderError>;
    fn destroy_render_pass(&mut self, render_pass: RenderPassId);
    fn create_descriptor_set_layout(
        &mut self,
        kind: DescriptorKind,
        stage: ShaderStage,
    ) -> Result<DescriptorSetLayoutId, RenderError>;
    fn destroy_descriptor_set_layout(&mut self, layout: DescriptorSetLayoutId);
    fn create_pipeline_layout(
        &mut self,
        set_layouts: &[DescriptorSetLayoutId],
    ) -> Result<PipelineLayoutId, RenderError>;
    fn destroy_pipeline_layout(&mut self, layout: PipelineLayoutId);
    fn create_graphics_pipeline(
        &mut self,
        desc: &PipelineDescriptor,
    ) -> Result<PipelineId, RenderError>;
    fn destroy_pipeline(&mut self, pipeline: PipelineId);
    fn create_sampler(&mut self, desc: &SamplerDescriptor) -> Result<SamplerId, RenderError>;
    fn destroy_sampler(&mut self, sampler: SamplerId);

    fn create_buffer(&mut self, desc: &BufferDescriptor) -> Result<BufferId, RenderError>;
    fn buffer_memory_requirements(
        &self,
        buffer: BufferId,
    ) -> Result<MemoryRequirements, RenderError>;
    fn create_image(&mut self, desc: &ImageDescriptor) -> Result<ImageId, RenderError>;
    fn image_memory_requirements(&self, image: ImageId)
        -> Result<MemoryRequirements, RenderError>;
    fn allocate_memory(&mut self, size: u64, memory_type: u32) -> Result<MemoryId, RenderError>;
    fn bind_buffer_memory(&mut self, buffer: BufferId, memory: MemoryId)
        -> Result<(), RenderError>;
    fn bind_image_memory(&mut self, image: ImageId, memory: MemoryId) -> Result<(), RenderError>;
    /// Copies `data` into host-visible memory at `offset`.
    fn write_memory(&mut self, memory: MemoryId, offset: u64, data: &[u8])
        -> Result<(), RenderError>;
    fn destroy_buffer(&mut self, buffer: BufferId);
    fn destroy_image(&mut self, image: ImageId);
    fn free_memory(&mut self, memory: MemoryId);
    fn create_image_view(
        &mut self,
        image: ImageId,
        format: PixelFormat,
    ) -> Result<ImageViewId, RenderError>;
    fn destroy_image_view(&mut self, view: ImageViewId);

    fn create_descriptor_pool(
        &mut self,
        desc: &DescriptorPoolDescriptor,
    ) -> Result<DescriptorPoolId, RenderError>;
    fn destroy_descriptor_pool(&mut self, pool: DescriptorPoolId);
    fn allocate_descriptor_set(
        &mut self,
        pool: DescriptorPoolId,
        layout: DescriptorSetLayoutId,
        binding: &DescriptorBinding,
    ) -> Result<DescriptorSetId, RenderError>;
    fn free_descriptor_set(&mut self, pool: DescriptorPoolId, set: DescriptorSetId);

    fn create_command_pool(&mut self, queue_family: u32) -> Result<CommandPoolId, RenderError>;
    fn destroy_command_pool(&mut self, pool: CommandPoolId);
    fn allocate_command_buffers(
        &mut self,
        pool: CommandPoolId,
        count: usize,
    ) -> Result<Vec<CommandBufferId>, RenderError>;
    fn free_command_buffers(&mut self, pool: CommandPoolId, buffers: &[CommandBufferId]);
    fn reset_command_buffer(&mut self, buffer: CommandBufferId) -> Result<(), RenderError>;
    /// Records `commands` into a throwaway command buffer, submits it and waits for completion.
    fn execute_one_time(
        &mut self,
        pool: CommandPoolId,
        commands: &[TransferCommand],
    ) -> Result<(), RenderError>;

    fn create_semaphore(&mut self) -> Result<SemaphoreId, RenderError>;
    fn destroy_semaphore(&mut self, semaphore: SemaphoreId);
    fn create_fence(&mut self, signaled: bool) -> Result<FenceId, RenderError>;
    fn destroy_fence(&mut self, fence: FenceId);
    fn wait_for_fence(&mut self, fence: FenceId) -> Result<(), RenderError>;
    fn reset_fence(&mut self, fence: FenceId) -> Result<(), RenderError>;

    fn acquire_next_image(&mut self, signal: SemaphoreId) -> Result<AcquireOutcome, RenderError>;
    fn submit(
        &mut self,
        submission: &Submission<'_>,
        overlay: Option<&mut dyn UiOverlay<Self>>,
    ) -> Result<(), RenderError>;
    fn present(
        &mut self,
        image_index: u32,
        wait: SemaphoreId,
    ) -> Result<PresentOutcome, RenderError>;
    fn wait_idle(&mut self) -> Result<(), RenderError>;

    fn destroy_device(&mut self);
    fn destroy_surface(&mut self);
    fn destroy_instance(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unique_families_collapse_shared_queue() {
        let shared = QueueFamilies {
            graphics: Some(0),
            present: Some(0),
        };
        assert_eq!(shared.unique(), vec![0]);

        let split = QueueFamilies {
            graphics: Some(0),
            present: Some(2),
        };
        assert_eq!(split.unique(), vec![0, 2]);
    }

    #[test]
    fn incomplete_families_are_reported() {
        let families = QueueFamilies {
            graphics: Some(1),
            present: None,
        };
        assert!(!families.is_complete());
        assert_eq!(families.unique(), vec![1]);
    }

    #[test]
    fn pool_usage_enforces_per_kind_capacity() {
        let mut usage = DescriptorPoolUsage::new(DescriptorPoolDescriptor {
            uniform_buffers: 1,
            combined_image_samplers: 2,
            free_individual_sets: true,
        });

        usage.allocate(DescriptorKind::UniformBuffer).unwrap();
        assert!(matches!(
            usage.allocate(DescriptorKind::UniformBuffer),
            Err(RenderError::DescriptorPoolExhausted { capacity: 1 })
        ));

        usage.allocate(DescriptorKind::CombinedImageSampler).unwrap();
        usage.allocate(DescriptorKind::CombinedImageSampler).unwrap();
        assert!(usage.allocate(DescriptorKind::CombinedImageSampler).is_err());

        usage.free(DescriptorKind::CombinedImageSampler);
        usage.allocate(DescriptorKind::CombinedImageSampler).unwrap();
        assert_eq!(usage.live_sets(), 3);
    }

    #[test]
    fn allocator_hands_out_distinct_ids() {
        let mut ids = IdAllocator::default();
        let a: BufferId = ids.next();
        let b: BufferId = ids.next();
        let c: FenceId = ids.next();
        assert_ne!(a, b);
        assert_ne!(a.raw(), c.raw());
        assert_eq!(a.to_string(), format!("buffer#{}", a.raw()));
    }
}
