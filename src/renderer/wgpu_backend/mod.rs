//! [`GraphicsBackend`] on top of wgpu.
//!
//! wgpu hides most of what the explicit API exposes, so several concepts collapse:
//! memory binding is where the wgpu buffer or texture is actually created, layout
//! transitions are validated and otherwise ignored, semaphores only exist as handles
//! because the queue already orders submissions, and fences wrap a `SubmissionIndex`.

mod conversions;
mod frame;

use std::collections::{HashMap, HashSet};
use std::num::NonZeroU64;
use std::sync::Arc;

use winit::window::Window;

use crate::error::RenderError;
use crate::renderer::backend::{
    AcquireOutcome, BufferDescriptor, BufferId, CommandBufferId, CommandPoolId, DescriptorBinding,
    DescriptorKind, DescriptorPoolDescriptor, DescriptorPoolId, DescriptorPoolUsage,
    DescriptorSetId, DescriptorSetLayoutId, Extent2d, FenceId, FramebufferId, GraphicsBackend,
    IdAllocator, ImageDescriptor, ImageId, ImageViewId, InstanceConfig, MemoryId,
    MemoryProperties, MemoryRequirements, MemoryType, PhysicalDeviceInfo, PipelineDescriptor,
    PipelineId, PipelineLayoutId, PixelFormat, PresentOutcome, QueueFamilies,
    RenderPassDescriptor, RenderPassId, SamplerDescriptor, SamplerId, SemaphoreId,
    ShaderModuleId, Submission, SurfaceCapabilities, SurfaceFormat, SwapchainConfig,
    SwapchainSupport, TransferCommand, UiOverlay,
};
use crate::renderer::device::{Device, VALIDATION_LAYER};
use crate::renderer::shaders::{EmbeddedShaders, ShaderCode};
use crate::settings::RenderSettings;

pub use frame::WgpuOverlayTarget;

/// Name reported for the ability to present to a window surface.
pub const SURFACE_EXTENSION: &str = "wgpu_surface";

const DEVICE_LOCAL_TYPE: u32 = 0;
const HOST_VISIBLE_TYPE: u32 = 1;
const ANY_MEMORY_TYPE: u32 = 0b11;
const DEVICE_LOCAL_ONLY: u32 = 0b01;

/// Where frames end up: a window surface, or offscreen textures for tests and tools.
enum Target {
    Window(Arc<Window>),
    Headless(Extent2d),
}

struct Gpu {
    device: wgpu::Device,
    queue: wgpu::Queue,
}

enum Bound {
    Buffer(BufferId),
    Image(ImageId),
}

struct Allocation {
    size: u64,
    memory_type: u32,
    bound: Option<Bound>,
}

struct BufferSlot {
    desc: BufferDescriptor,
    memory: Option<MemoryId>,
    buffer: Option<wgpu::Buffer>,
}

struct ImageSlot {
    desc: ImageDescriptor,
    memory: Option<MemoryId>,
    texture: Option<wgpu::Texture>,
}

struct ShaderModule {
    module: wgpu::ShaderModule,
    entry_point: String,
}

struct SetLayout {
    kind: DescriptorKind,
    layout: wgpu::BindGroupLayout,
}

struct DescriptorSet {
    pool: DescriptorPoolId,
    kind: DescriptorKind,
    bind_group: wgpu::BindGroup,
}

#[derive(Debug, Clone, Copy)]
struct Framebuffer {
    image_index: u32,
    extent: Extent2d,
}

enum Fence {
    Signaled,
    Unsignaled,
    Pending(wgpu::SubmissionIndex),
}

struct Swapchain {
    config: SwapchainConfig,
    /// One render target per image when running headless.
    offscreen: Vec<wgpu::TextureView>,
}

enum AcquiredImage {
    Surface {
        image_index: u32,
        texture: wgpu::SurfaceTexture,
        view: wgpu::TextureView,
    },
    Offscreen {
        image_index: u32,
    },
}

impl AcquiredImage {
    fn image_index(&self) -> u32 {
        match self {
            AcquiredImage::Surface { image_index, .. }
            | AcquiredImage::Offscreen { image_index } => *image_index,
        }
    }
}

pub struct WgpuBackend {
    target: Target,
    ids: IdAllocator,
    instance: Option<wgpu::Instance>,
    surface: Option<wgpu::Surface<'static>>,
    adapters: Vec<wgpu::Adapter>,
    adapter: Option<wgpu::Adapter>,
    gpu: Option<Gpu>,
    swapchain: Option<Swapchain>,
    acquired: Option<AcquiredImage>,
    images_acquired: u32,
    memory: HashMap<MemoryId, Allocation>,
    buffers: HashMap<BufferId, BufferSlot>,
    images: HashMap<ImageId, ImageSlot>,
    views: HashMap<ImageViewId, wgpu::TextureView>,
    /// Surface textures only exist between acquire and present, so a swapchain view
    /// names an image index and the real view is made for each acquired frame.
    swapchain_views: HashMap<ImageViewId, u32>,
    samplers: HashMap<SamplerId, wgpu::Sampler>,
    shader_modules: HashMap<ShaderModuleId, ShaderModule>,
    render_passes: HashMap<RenderPassId, RenderPassDescriptor>,
    set_layouts: HashMap<DescriptorSetLayoutId, SetLayout>,
    pipeline_layouts: HashMap<PipelineLayoutId, wgpu::PipelineLayout>,
    pipelines: HashMap<PipelineId, wgpu::RenderPipeline>,
    framebuffers: HashMap<FramebufferId, Framebuffer>,
    descriptor_pools: HashMap<DescriptorPoolId, DescriptorPoolUsage>,
    descriptor_sets: HashMap<DescriptorSetId, DescriptorSet>,
    command_pools: HashSet<CommandPoolId>,
    command_buffers: HashMap<CommandBufferId, CommandPoolId>,
    semaphores: HashSet<SemaphoreId>,
    fences: HashMap<FenceId, Fence>,
}

impl WgpuBackend {
    /// Renders into `window`'s surface.
    pub fn new(window: Arc<Window>) -> Self {
        Self::with_target(Target::Window(window))
    }

    /// Renders into offscreen textures of the given size; nothing is shown.
    pub fn headless(extent: Extent2d) -> Self {
        Self::with_target(Target::Headless(extent))
    }

    fn with_target(target: Target) -> Self {
        Self {
            target,
            ids: IdAllocator::default(),
            instance: None,
            surface: None,
            adapters: Vec::new(),
            adapter: None,
            gpu: None,
            swapchain: None,
            acquired: None,
            images_acquired: 0,
            memory: HashMap::new(),
            buffers: HashMap::new(),
            images: HashMap::new(),
            views: HashMap::new(),
            swapchain_views: HashMap::new(),
            samplers: HashMap::new(),
            shader_modules: HashMap::new(),
            render_passes: HashMap::new(),
            set_layouts: HashMap::new(),
            pipeline_layouts: HashMap::new(),
            pipelines: HashMap::new(),
            framebuffers: HashMap::new(),
            descriptor_pools: HashMap::new(),
            descriptor_sets: HashMap::new(),
            command_pools: HashSet::new(),
            command_buffers: HashMap::new(),
            semaphores: HashSet::new(),
            fences: HashMap::new(),
        }
    }

    pub fn window(&self) -> Option<&Arc<Window>> {
        match &self.target {
            Target::Window(window) => Some(window),
            Target::Headless(_) => None,
        }
    }

    /// Changes the size of the offscreen targets. Windows report their own size.
    pub fn set_headless_size(&mut self, extent: Extent2d) {
        if let Target::Headless(size) = &mut self.target {
            *size = extent;
        }
    }

    pub fn wgpu_device(&self) -> Option<&wgpu::Device> {
        self.gpu.as_ref().map(|gpu| &gpu.device)
    }

    pub fn wgpu_queue(&self) -> Option<&wgpu::Queue> {
        self.gpu.as_ref().map(|gpu| &gpu.queue)
    }

    pub fn surface_texture_format(&self) -> Option<wgpu::TextureFormat> {
        self.swapchain
            .as_ref()
            .map(|swapchain| conversions::texture_format(swapchain.config.format.format))
    }

    fn gpu(&self) -> Result<&Gpu, RenderError> {
        self.gpu.as_ref().ok_or(RenderError::DeviceLost)
    }

    fn adapter(&self) -> Result<&wgpu::Adapter, RenderError> {
        self.adapter
            .as_ref()
            .ok_or_else(|| RenderError::Backend("no logical device has been created".into()))
    }

    fn buffer(&self, id: BufferId) -> Result<&wgpu::Buffer, RenderError> {
        self.buffers
            .get(&id)
            .and_then(|slot| slot.buffer.as_ref())
            .ok_or(id.invalid())
    }

    fn texture(&self, id: ImageId) -> Result<&wgpu::Texture, RenderError> {
        self.images
            .get(&id)
            .and_then(|slot| slot.texture.as_ref())
            .ok_or(id.invalid())
    }

    fn physical_device_info(&self, index: usize, adapter: &wgpu::Adapter) -> PhysicalDeviceInfo {
        let info = adapter.get_info();
        let present_supported = self
            .surface
            .as_ref()
            .is_none_or(|surface| adapter.is_surface_supported(surface));

        // wgpu exposes a single queue that both draws and presents.
        let queue_families = QueueFamilies {
            graphics: Some(0),
            present: present_supported.then_some(0),
        };

        PhysicalDeviceInfo {
            index,
            name: info.name,
            device_type: conversions::device_type(info.device_type),
            queue_families,
            supports_swapchain: true,
            swapchain_support: self.swapchain_support_for(adapter),
            max_sampler_anisotropy: 16.0,
        }
    }

    fn swapchain_support_for(&self, adapter: &wgpu::Adapter) -> SwapchainSupport {
        let max_dimension = adapter.limits().max_texture_dimension_2d;
        let capabilities = SurfaceCapabilities {
            current_extent: None,
            min_image_extent: Extent2d::new(1, 1),
            max_image_extent: Extent2d::new(max_dimension, max_dimension),
            min_image_count: 2,
            max_image_count: 3,
        };

        match &self.surface {
            Some(surface) => {
                let caps = surface.get_capabilities(adapter);
                SwapchainSupport {
                    capabilities,
                    formats: caps
                        .formats
                        .iter()
                        .copied()
                        .filter_map(conversions::surface_format)
                        .collect(),
                    present_modes: caps
                        .present_modes
                        .iter()
                        .copied()
                        .filter_map(conversions::from_present_mode)
                        .collect(),
                }
            }
            None => SwapchainSupport {
                capabilities,
                formats: vec![SurfaceFormat {
                    format: PixelFormat::Bgra8Unorm,
                    color_space: crate::renderer::backend::ColorSpace::SrgbNonLinear,
                }],
                present_modes: vec![crate::renderer::backend::PresentMode::Fifo],
            },
        }
    }

    /// Blocks until `submission` (or all work, when `None`) has finished on the GPU.
    fn wait_for_submission(
        &self,
        submission: Option<wgpu::SubmissionIndex>,
    ) -> Result<(), RenderError> {
        let gpu = self.gpu()?;
        gpu.device
            .poll(wgpu::PollType::Wait {
                submission_index: submission,
                timeout: None,
            })
            .map(|_| ())
            .map_err(|err| RenderError::backend("device poll", err))
    }

    fn descriptor_resource_check(&self, binding: &DescriptorBinding) -> Result<(), RenderError> {
        match *binding {
            DescriptorBinding::UniformBuffer { buffer, .. } => self.buffer(buffer).map(|_| ()),
            DescriptorBinding::CombinedImageSampler { view, sampler } => {
                if !self.views.contains_key(&view) {
                    return Err(view.invalid());
                }
                if !self.samplers.contains_key(&sampler) {
                    return Err(sampler.invalid());
                }
                Ok(())
            }
        }
    }
}

impl GraphicsBackend for WgpuBackend {
    type OverlayContext<'a> = WgpuOverlayTarget<'a>;

    fn required_instance_extensions(&self) -> Vec<String> {
        match self.target {
            Target::Window(_) => vec![SURFACE_EXTENSION.to_string()],
            Target::Headless(_) => Vec::new(),
        }
    }

    fn supported_instance_extensions(&self) -> Result<Vec<String>, RenderError> {
        Ok(vec![SURFACE_EXTENSION.to_string()])
    }

    fn supported_validation_layers(&self) -> Result<Vec<String>, RenderError> {
        // Requesting the layer maps onto wgpu's own validation flags.
        Ok(vec![VALIDATION_LAYER.to_string()])
    }

    fn create_instance(&mut self, config: &InstanceConfig) -> Result<(), RenderError> {
        let flags = if config.validation_layers.is_empty() {
            wgpu::InstanceFlags::empty()
        } else {
            wgpu::InstanceFlags::VALIDATION | wgpu::InstanceFlags::DEBUG
        };
        log::info!(
            "Creating wgpu instance for {:?} (flags {:?})",
            config.application_name,
            flags
        );

        self.instance = Some(wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            flags,
            ..Default::default()
        }));
        Ok(())
    }

    fn create_surface(&mut self) -> Result<(), RenderError> {
        let Target::Window(window) = &self.target else {
            return Ok(());
        };
        let instance = self
            .instance
            .as_ref()
            .ok_or_else(|| RenderError::Backend("surface requested before instance".into()))?;
        let surface = instance
            .create_surface(Arc::clone(window))
            .map_err(|err| RenderError::backend("create surface", err))?;
        self.surface = Some(surface);
        Ok(())
    }

    fn framebuffer_size(&self) -> Extent2d {
        match &self.target {
            Target::Window(window) => {
                let size = window.inner_size();
                Extent2d::new(size.width, size.height)
            }
            Target::Headless(extent) => *extent,
        }
    }

    fn enumerate_physical_devices(&mut self) -> Result<Vec<PhysicalDeviceInfo>, RenderError> {
        let instance = self
            .instance
            .as_ref()
            .ok_or_else(|| RenderError::Backend("no instance".into()))?;

        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: self.surface.as_ref(),
            force_fallback_adapter: false,
        }));

        self.adapters = match adapter {
            Ok(adapter) => vec![adapter],
            Err(err) => {
                log::warn!("No adapter available: {err}");
                Vec::new()
            }
        };

        Ok(self
            .adapters
            .iter()
            .enumerate()
            .map(|(index, adapter)| self.physical_device_info(index, adapter))
            .collect())
    }

    fn create_logical_device(
        &mut self,
        physical_device: usize,
        queue_families: &[u32],
    ) -> Result<(), RenderError> {
        let adapter = self
            .adapters
            .get(physical_device)
            .cloned()
            .ok_or(RenderError::NoSuitableDevice)?;
        log::info!("Using adapter: {:?}", adapter.get_info());
        log::debug!("Requested queue families {queue_families:?}");

        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("Device"),
            required_features: wgpu::Features::empty(),
            required_limits: wgpu::Limits::default(),
            experimental_features: wgpu::ExperimentalFeatures::disabled(),
            memory_hints: wgpu::MemoryHints::Performance,
            trace: wgpu::Trace::Off,
        }))
        .map_err(|err| RenderError::backend("request device", err))?;

        self.adapter = Some(adapter);
        self.gpu = Some(Gpu { device, queue });
        Ok(())
    }

    fn memory_types(&self) -> Vec<MemoryType> {
        vec![
            MemoryType {
                properties: MemoryProperties::DEVICE_LOCAL,
            },
            MemoryType {
                properties: MemoryProperties::HOST_VISIBLE | MemoryProperties::HOST_COHERENT,
            },
        ]
    }

    fn image_copy_row_alignment(&self) -> u32 {
        wgpu::COPY_BYTES_PER_ROW_ALIGNMENT
    }

    fn query_swapchain_support(&mut self) -> Result<SwapchainSupport, RenderError> {
        let adapter = self.adapter()?;
        Ok(self.swapchain_support_for(adapter))
    }

    fn create_swapchain(&mut self, config: &SwapchainConfig) -> Result<u32, RenderError> {
        let gpu = self.gpu()?;
        let format = conversions::texture_format(config.format.format);
        let image_count = config.image_count.max(2);

        let offscreen = match &self.surface {
            Some(surface) => {
                let adapter = self.adapter()?;
                let caps = surface.get_capabilities(adapter);
                let surface_config = wgpu::SurfaceConfiguration {
                    usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
                    format,
                    width: config.extent.width,
                    height: config.extent.height,
                    present_mode: conversions::present_mode(config.present_mode),
                    alpha_mode: caps
                        .alpha_modes
                        .first()
                        .copied()
                        .unwrap_or(wgpu::CompositeAlphaMode::Auto),
                    view_formats: vec![],
                    desired_maximum_frame_latency: image_count - 1,
                };
                surface.configure(&gpu.device, &surface_config);
                Vec::new()
            }
            None => (0..image_count)
                .map(|index| {
                    let texture = gpu.device.create_texture(&wgpu::TextureDescriptor {
                        label: Some(&format!("Offscreen target {index}")),
                        size: wgpu::Extent3d {
                            width: config.extent.width,
                            height: config.extent.height,
                            depth_or_array_layers: 1,
                        },
                        mip_level_count: 1,
                        sample_count: 1,
                        dimension: wgpu::TextureDimension::D2,
                        format,
                        usage: wgpu::TextureUsages::RENDER_ATTACHMENT
                            | wgpu::TextureUsages::COPY_SRC,
                        view_formats: &[],
                    });
                    texture.create_view(&wgpu::TextureViewDescriptor::default())
                })
                .collect(),
        };

        self.swapchain = Some(Swapchain {
            config: SwapchainConfig {
                image_count,
                ..*config
            },
            offscreen,
        });
        self.images_acquired = 0;
        Ok(image_count)
    }

    fn create_swapchain_image_view(
        &mut self,
        image_index: u32,
    ) -> Result<ImageViewId, RenderError> {
        let image_count = self
            .swapchain
            .as_ref()
            .map_or(0, |swapchain| swapchain.config.image_count);
        if image_index >= image_count {
            return Err(RenderError::Backend(format!(
                "view of image {image_index} of a {image_count}-image swapchain"
            )));
        }
        let id = self.ids.next();
        self.swapchain_views.insert(id, image_index);
        Ok(id)
    }

    fn destroy_swapchain(&mut self) {
        self.acquired = None;
        self.swapchain = None;
    }

    fn create_framebuffer(
        &mut self,
        render_pass: RenderPassId,
        attachment: ImageViewId,
        extent: Extent2d,
    ) -> Result<FramebufferId, RenderError> {
        if !self.render_passes.contains_key(&render_pass) {
            return Err(render_pass.invalid());
        }
        let image_index = *self
            .swapchain_views
            .get(&attachment)
            .ok_or(attachment.invalid())?;

        let id = self.ids.next();
        self.framebuffers.insert(
            id,
            Framebuffer {
                image_index,
                extent,
            },
        );
        Ok(id)
    }

    fn destroy_framebuffer(&mut self, framebuffer: FramebufferId) {
        self.framebuffers.remove(&framebuffer);
    }

    fn create_shader_module(&mut self, code: &ShaderCode) -> Result<ShaderModuleId, RenderError> {
        let gpu = self.gpu()?;
        gpu.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let module = gpu
            .device
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(&code.label),
                source: wgpu::ShaderSource::Wgsl(code.wgsl.as_str().into()),
            });
        if let Some(err) = pollster::block_on(gpu.device.pop_error_scope()) {
            return Err(RenderError::ShaderCompile {
                label: code.label.clone(),
                reason: err.to_string(),
            });
        }

        let id = self.ids.next();
        self.shader_modules.insert(
            id,
            ShaderModule {
                module,
                entry_point: code.entry_point.clone(),
            },
        );
        Ok(id)
    }

    fn destroy_shader_module(&mut self, module: ShaderModuleId) {
        self.shader_modules.remove(&module);
    }

    fn create_render_pass(
        &mut self,
        desc: &RenderPassDescriptor,
    ) -> Result<RenderPassId, RenderError> {
        let id = self.ids.next();
        self.render_passes.insert(id, *desc);
        Ok(id)
    }

    fn destroy_render_pass(&mut self, render_pass: RenderPassId) {
        self.render_passes.remove(&render_pass);
    }

    fn create_descriptor_set_layout(
        &mut self,
        kind: DescriptorKind,
        stage: crate::renderer::shaders::ShaderStage,
    ) -> Result<DescriptorSetLayoutId, RenderError> {
        let visibility = conversions::shader_stages(stage);
        let entries: Vec<wgpu::BindGroupLayoutEntry> = match kind {
            DescriptorKind::UniformBuffer => vec![wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            }],
            DescriptorKind::CombinedImageSampler => vec![
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility,
                    ty: wgpu::BindingType::Texture {
                        multisampled: false,
                        view_dimension: wgpu::TextureViewDimension::D2,
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        };

        let layout = self
            .gpu()?
            .device
            .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some(match kind {
                    DescriptorKind::UniformBuffer => "View uniform layout",
                    DescriptorKind::CombinedImageSampler => "Sprite texture layout",
                }),
                entries: &entries,
            });

        let id = self.ids.next();
        self.set_layouts.insert(id, SetLayout { kind, layout });
        Ok(id)
    }

    fn destroy_descriptor_set_layout(&mut self, layout: DescriptorSetLayoutId) {
        self.set_layouts.remove(&layout);
    }

    fn create_pipeline_layout(
        &mut self,
        set_layouts: &[DescriptorSetLayoutId],
    ) -> Result<PipelineLayoutId, RenderError> {
        let layouts = set_layouts
            .iter()
            .map(|id| {
                self.set_layouts
                    .get(id)
                    .map(|entry| &entry.layout)
                    .ok_or(id.invalid())
            })
            .collect::<Result<Vec<_>, _>>()?;

        let layout = self
            .gpu()?
            .device
            .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("Sprite pipeline layout"),
                bind_group_layouts: &layouts,
                push_constant_ranges: &[],
            });

        let id = self.ids.next();
        self.pipeline_layouts.insert(id, layout);
        Ok(id)
    }

    fn destroy_pipeline_layout(&mut self, layout: PipelineLayoutId) {
        self.pipeline_layouts.remove(&layout);
    }

    fn create_graphics_pipeline(
        &mut self,
        desc: &PipelineDescriptor,
    ) -> Result<PipelineId, RenderError> {
        let vertex = self
            .shader_modules
            .get(&desc.vertex_shader)
            .ok_or(desc.vertex_shader.invalid())?;
        let fragment = self
            .shader_modules
            .get(&desc.fragment_shader)
            .ok_or(desc.fragment_shader.invalid())?;
        let layout = self
            .pipeline_layouts
            .get(&desc.layout)
            .ok_or(desc.layout.invalid())?;
        let render_pass = self
            .render_passes
            .get(&desc.render_pass)
            .ok_or(desc.render_pass.invalid())?;

        let attributes: Vec<wgpu::VertexAttribute> = desc
            .vertex_layout
            .attributes
            .iter()
            .map(|attribute| wgpu::VertexAttribute {
                format: conversions::vertex_format(attribute.format),
                offset: attribute.offset,
                shader_location: attribute.location,
            })
            .collect();

        let gpu = self.gpu()?;
        gpu.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let pipeline = gpu
            .device
            .create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some("Sprite pipeline"),
                layout: Some(layout),
                vertex: wgpu::VertexState {
                    module: &vertex.module,
                    entry_point: Some(vertex.entry_point.as_str()),
                    compilation_options: Default::default(),
                    buffers: &[wgpu::VertexBufferLayout {
                        array_stride: desc.vertex_layout.stride,
                        step_mode: wgpu::VertexStepMode::Vertex,
                        attributes: &attributes,
                    }],
                },
                fragment: Some(wgpu::FragmentState {
                    module: &fragment.module,
                    entry_point: Some(fragment.entry_point.as_str()),
                    compilation_options: Default::default(),
                    targets: &[Some(wgpu::ColorTargetState {
                        format: conversions::texture_format(render_pass.color_format),
                        blend: conversions::blend_state(desc.blend),
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                }),
                primitive: wgpu::PrimitiveState {
                    topology: wgpu::PrimitiveTopology::TriangleList,
                    strip_index_format: None,
                    front_face: conversions::front_face(desc.front_face),
                    cull_mode: conversions::cull_mode(desc.cull_mode),
                    unclipped_depth: false,
                    polygon_mode: wgpu::PolygonMode::Fill,
                    conservative: false,
                },
                depth_stencil: None,
                multisample: wgpu::MultisampleState::default(),
                multiview: None,
                cache: None,
            });
        if let Some(err) = pollster::block_on(gpu.device.pop_error_scope()) {
            return Err(RenderError::backend("create render pipeline", err));
        }

        let id = self.ids.next();
        self.pipelines.insert(id, pipeline);
        Ok(id)
    }

    fn destroy_pipeline(&mut self, pipeline: PipelineId) {
        self.pipelines.remove(&pipeline);
    }

    fn create_sampler(&mut self, desc: &SamplerDescriptor) -> Result<SamplerId, RenderError> {
        let filter = conversions::filter_mode(desc.filter);
        let address_mode = conversions::address_mode(desc.address_mode);
        let sampler = self
            .gpu()?
            .device
            .create_sampler(&wgpu::SamplerDescriptor {
                label: Some("Sprite sampler"),
                address_mode_u: address_mode,
                address_mode_v: address_mode,
                address_mode_w: address_mode,
                mag_filter: filter,
                min_filter: filter,
                mipmap_filter: filter,
                anisotropy_clamp: conversions::anisotropy_clamp(desc.filter, desc.max_anisotropy),
                ..Default::default()
            });

        let id = self.ids.next();
        self.samplers.insert(id, sampler);
        Ok(id)
    }

    fn destroy_sampler(&mut self, sampler: SamplerId) {
        self.samplers.remove(&sampler);
    }

    fn create_buffer(&mut self, desc: &BufferDescriptor) -> Result<BufferId, RenderError> {
        if desc.size == 0 {
            return Err(RenderError::Backend(format!(
                "buffer {:?} has zero size",
                desc.label
            )));
        }
        let id = self.ids.next();
        self.buffers.insert(
            id,
            BufferSlot {
                desc: *desc,
                memory: None,
                buffer: None,
            },
        );
        Ok(id)
    }

    fn buffer_memory_requirements(
        &self,
        buffer: BufferId,
    ) -> Result<MemoryRequirements, RenderError> {
        let slot = self.buffers.get(&buffer).ok_or(buffer.invalid())?;
        Ok(MemoryRequirements {
            size: slot.desc.size.next_multiple_of(wgpu::COPY_BUFFER_ALIGNMENT),
            type_bits: ANY_MEMORY_TYPE,
        })
    }

    fn create_image(&mut self, desc: &ImageDescriptor) -> Result<ImageId, RenderError> {
        if desc.width == 0 || desc.height == 0 {
            return Err(RenderError::Backend("image has no pixels".into()));
        }
        let id = self.ids.next();
        self.images.insert(
            id,
            ImageSlot {
                desc: *desc,
                memory: None,
                texture: None,
            },
        );
        Ok(id)
    }

    fn image_memory_requirements(
        &self,
        image: ImageId,
    ) -> Result<MemoryRequirements, RenderError> {
        let slot = self.images.get(&image).ok_or(image.invalid())?;
        let desc = slot.desc;
        Ok(MemoryRequirements {
            size: u64::from(desc.width)
                * u64::from(desc.height)
                * u64::from(desc.format.bytes_per_pixel()),
            type_bits: DEVICE_LOCAL_ONLY,
        })
    }

    fn allocate_memory(&mut self, size: u64, memory_type: u32) -> Result<MemoryId, RenderError> {
        if memory_type > HOST_VISIBLE_TYPE {
            return Err(RenderError::Backend(format!(
                "memory type {memory_type} does not exist"
            )));
        }
        let id = self.ids.next();
        self.memory.insert(
            id,
            Allocation {
                size,
                memory_type,
                bound: None,
            },
        );
        Ok(id)
    }

    fn bind_buffer_memory(&mut self, buffer: BufferId, memory: MemoryId) -> Result<(), RenderError> {
        let allocation = self.memory.get(&memory).ok_or(memory.invalid())?;
        if allocation.bound.is_some() {
            return Err(RenderError::Backend(format!("{memory} is already bound")));
        }
        let slot = self.buffers.get(&buffer).ok_or(buffer.invalid())?;
        let size = slot.desc.size.next_multiple_of(wgpu::COPY_BUFFER_ALIGNMENT);
        if allocation.size < size {
            return Err(RenderError::Backend(format!(
                "{memory} holds {} bytes, {buffer} needs {size}",
                allocation.size
            )));
        }

        let usage = conversions::buffer_usages(
            slot.desc.usage,
            allocation.memory_type == HOST_VISIBLE_TYPE,
        );
        let wgpu_buffer = self
            .gpu()?
            .device
            .create_buffer(&wgpu::BufferDescriptor {
                label: Some(slot.desc.label),
                size,
                usage,
                mapped_at_creation: false,
            });

        if let Some(slot) = self.buffers.get_mut(&buffer) {
            slot.buffer = Some(wgpu_buffer);
            slot.memory = Some(memory);
        }
        if let Some(allocation) = self.memory.get_mut(&memory) {
            allocation.bound = Some(Bound::Buffer(buffer));
        }
        Ok(())
    }

    fn bind_image_memory(&mut self, image: ImageId, memory: MemoryId) -> Result<(), RenderError> {
        let allocation = self.memory.get(&memory).ok_or(memory.invalid())?;
        if allocation.bound.is_some() {
            return Err(RenderError::Backend(format!("{memory} is already bound")));
        }
        if allocation.memory_type != DEVICE_LOCAL_TYPE {
            return Err(RenderError::Backend(format!(
                "{image} must live in device-local memory"
            )));
        }
        let desc = self.images.get(&image).ok_or(image.invalid())?.desc;

        let texture = self
            .gpu()?
            .device
            .create_texture(&wgpu::TextureDescriptor {
                label: Some("Sprite texture"),
                size: wgpu::Extent3d {
                    width: desc.width,
                    height: desc.height,
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: conversions::texture_format(desc.format),
                usage: conversions::texture_usages(desc.usage),
                view_formats: &[],
            });

        if let Some(slot) = self.images.get_mut(&image) {
            slot.texture = Some(texture);
            slot.memory = Some(memory);
        }
        if let Some(allocation) = self.memory.get_mut(&memory) {
            allocation.bound = Some(Bound::Image(image));
        }
        Ok(())
    }

    fn write_memory(&mut self, memory: MemoryId, offset: u64, data: &[u8]) -> Result<(), RenderError> {
        let allocation = self.memory.get(&memory).ok_or(memory.invalid())?;
        if allocation.memory_type != HOST_VISIBLE_TYPE {
            return Err(RenderError::Backend(format!("{memory} is not host visible")));
        }
        let Some(Bound::Buffer(buffer_id)) = allocation.bound else {
            return Err(RenderError::Backend(format!("{memory} backs no buffer")));
        };
        let buffer = self.buffer(buffer_id)?;
        let queue = &self.gpu()?.queue;

        // Queue writes must cover whole words.
        let aligned = (data.len() as u64).next_multiple_of(wgpu::COPY_BUFFER_ALIGNMENT);
        if aligned == data.len() as u64 {
            queue.write_buffer(buffer, offset, data);
        } else {
            let mut padded = data.to_vec();
            padded.resize(aligned as usize, 0);
            queue.write_buffer(buffer, offset, &padded);
        }
        Ok(())
    }

    fn destroy_buffer(&mut self, buffer: BufferId) {
        if let Some(slot) = self.buffers.remove(&buffer) {
            if let Some(allocation) = slot.memory.and_then(|memory| self.memory.get_mut(&memory)) {
                allocation.bound = None;
            }
            if let Some(buffer) = slot.buffer {
                buffer.destroy();
            }
        }
    }

    fn destroy_image(&mut self, image: ImageId) {
        if let Some(slot) = self.images.remove(&image) {
            if let Some(allocation) = slot.memory.and_then(|memory| self.memory.get_mut(&memory)) {
                allocation.bound = None;
            }
            if let Some(texture) = slot.texture {
                texture.destroy();
            }
        }
    }

    fn free_memory(&mut self, memory: MemoryId) {
        if let Some(allocation) = self.memory.remove(&memory) {
            match allocation.bound {
                Some(Bound::Buffer(buffer)) => log::warn!("{memory} freed while {buffer} is bound"),
                Some(Bound::Image(image)) => log::warn!("{memory} freed while {image} is bound"),
                None => {}
            }
        }
    }

    fn create_image_view(
        &mut self,
        image: ImageId,
        format: PixelFormat,
    ) -> Result<ImageViewId, RenderError> {
        let view = self
            .texture(image)?
            .create_view(&wgpu::TextureViewDescriptor {
                label: Some("Sprite texture view"),
                format: Some(conversions::texture_format(format)),
                ..Default::default()
            });
        let id = self.ids.next();
        self.views.insert(id, view);
        Ok(id)
    }

    fn destroy_image_view(&mut self, view: ImageViewId) {
        self.views.remove(&view);
        self.swapchain_views.remove(&view);
    }

    fn create_descriptor_pool(
        &mut self,
        desc: &DescriptorPoolDescriptor,
    ) -> Result<DescriptorPoolId, RenderError> {
        let id = self.ids.next();
        self.descriptor_pools
            .insert(id, DescriptorPoolUsage::new(*desc));
        Ok(id)
    }

    fn destroy_descriptor_pool(&mut self, pool: DescriptorPoolId) {
        self.descriptor_pools.remove(&pool);
        self.descriptor_sets.retain(|_, set| set.pool != pool);
    }

    fn allocate_descriptor_set(
        &mut self,
        pool: DescriptorPoolId,
        layout: DescriptorSetLayoutId,
        binding: &DescriptorBinding,
    ) -> Result<DescriptorSetId, RenderError> {
        let set_layout = self.set_layouts.get(&layout).ok_or(layout.invalid())?;
        let kind = binding.kind();
        if set_layout.kind != kind {
            return Err(RenderError::Backend(format!(
                "{layout} expects {:?}, got {:?}",
                set_layout.kind, kind
            )));
        }
        self.descriptor_resource_check(binding)?;

        let bind_group = {
            let device = &self.gpu()?.device;
            match *binding {
                DescriptorBinding::UniformBuffer { buffer, size } => {
                    device.create_bind_group(&wgpu::BindGroupDescriptor {
                        label: Some("View uniform bind group"),
                        layout: &set_layout.layout,
                        entries: &[wgpu::BindGroupEntry {
                            binding: 0,
                            resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                                buffer: self.buffer(buffer)?,
                                offset: 0,
                                size: NonZeroU64::new(size),
                            }),
                        }],
                    })
                }
                DescriptorBinding::CombinedImageSampler { view, sampler } => {
                    let view = self.views.get(&view).ok_or(view.invalid())?;
                    let sampler = self.samplers.get(&sampler).ok_or(sampler.invalid())?;
                    device.create_bind_group(&wgpu::BindGroupDescriptor {
                        label: Some("Sprite texture bind group"),
                        layout: &set_layout.layout,
                        entries: &[
                            wgpu::BindGroupEntry {
                                binding: 0,
                                resource: wgpu::BindingResource::TextureView(view),
                            },
                            wgpu::BindGroupEntry {
                                binding: 1,
                                resource: wgpu::BindingResource::Sampler(sampler),
                            },
                        ],
                    })
                }
            }
        };

        self.descriptor_pools
            .get_mut(&pool)
            .ok_or(pool.invalid())?
            .allocate(kind)?;

        let id = self.ids.next();
        self.descriptor_sets.insert(
            id,
            DescriptorSet {
                pool,
                kind,
                bind_group,
            },
        );
        Ok(id)
    }

    fn free_descriptor_set(&mut self, pool: DescriptorPoolId, set: DescriptorSetId) {
        let Some(entry) = self.descriptor_sets.remove(&set) else {
            return;
        };
        if entry.pool != pool {
            log::warn!("{set} freed through a pool it was not allocated from");
        }
        if let Some(usage) = self.descriptor_pools.get_mut(&entry.pool) {
            usage.free(entry.kind);
        }
    }

    fn create_command_pool(&mut self, queue_family: u32) -> Result<CommandPoolId, RenderError> {
        if queue_family != 0 {
            return Err(RenderError::Backend(format!(
                "queue family {queue_family} does not exist"
            )));
        }
        let id = self.ids.next();
        self.command_pools.insert(id);
        Ok(id)
    }

    fn destroy_command_pool(&mut self, pool: CommandPoolId) {
        self.command_pools.remove(&pool);
        self.command_buffers.retain(|_, owner| *owner != pool);
    }

    fn allocate_command_buffers(
        &mut self,
        pool: CommandPoolId,
        count: usize,
    ) -> Result<Vec<CommandBufferId>, RenderError> {
        if !self.command_pools.contains(&pool) {
            return Err(pool.invalid());
        }
        Ok((0..count)
            .map(|_| {
                let id = self.ids.next();
                self.command_buffers.insert(id, pool);
                id
            })
            .collect())
    }

    fn free_command_buffers(&mut self, _pool: CommandPoolId, buffers: &[CommandBufferId]) {
        for buffer in buffers {
            self.command_buffers.remove(buffer);
        }
    }

    fn reset_command_buffer(&mut self, buffer: CommandBufferId) -> Result<(), RenderError> {
        // Encoders are created fresh for every submission.
        if self.command_buffers.contains_key(&buffer) {
            Ok(())
        } else {
            Err(buffer.invalid())
        }
    }

    fn execute_one_time(
        &mut self,
        pool: CommandPoolId,
        commands: &[TransferCommand],
    ) -> Result<(), RenderError> {
        if !self.command_pools.contains(&pool) {
            return Err(pool.invalid());
        }
        let gpu = self.gpu()?;
        let mut encoder = gpu
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("One-time transfer"),
            });

        for command in commands {
            match *command {
                TransferCommand::CopyBuffer { src, dst, size } => {
                    encoder.copy_buffer_to_buffer(
                        self.buffer(src)?,
                        0,
                        self.buffer(dst)?,
                        0,
                        size.next_multiple_of(wgpu::COPY_BUFFER_ALIGNMENT),
                    );
                }
                TransferCommand::TransitionImage { image, from, to } => {
                    self.texture(image)?;
                    log::trace!("{image}: {from:?} -> {to:?} (tracked by wgpu)");
                }
                TransferCommand::CopyBufferToImage {
                    buffer,
                    image,
                    width,
                    height,
                    bytes_per_row,
                } => {
                    encoder.copy_buffer_to_texture(
                        wgpu::TexelCopyBufferInfo {
                            buffer: self.buffer(buffer)?,
                            layout: wgpu::TexelCopyBufferLayout {
                                offset: 0,
                                bytes_per_row: Some(bytes_per_row),
                                rows_per_image: Some(height),
                            },
                        },
                        wgpu::TexelCopyTextureInfo {
                            texture: self.texture(image)?,
                            mip_level: 0,
                            origin: wgpu::Origin3d::ZERO,
                            aspect: wgpu::TextureAspect::All,
                        },
                        wgpu::Extent3d {
                            width,
                            height,
                            depth_or_array_layers: 1,
                        },
                    );
                }
            }
        }

        let index = gpu.queue.submit(Some(encoder.finish()));
        self.wait_for_submission(Some(index))
    }

    fn create_semaphore(&mut self) -> Result<SemaphoreId, RenderError> {
        let id = self.ids.next();
        self.semaphores.insert(id);
        Ok(id)
    }

    fn destroy_semaphore(&mut self, semaphore: SemaphoreId) {
        self.semaphores.remove(&semaphore);
    }

    fn create_fence(&mut self, signaled: bool) -> Result<FenceId, RenderError> {
        let id = self.ids.next();
        let state = if signaled {
            Fence::Signaled
        } else {
            Fence::Unsignaled
        };
        self.fences.insert(id, state);
        Ok(id)
    }

    fn destroy_fence(&mut self, fence: FenceId) {
        self.fences.remove(&fence);
    }

    fn wait_for_fence(&mut self, fence: FenceId) -> Result<(), RenderError> {
        match self.fences.get(&fence).ok_or(fence.invalid())? {
            Fence::Signaled => return Ok(()),
            Fence::Unsignaled => return Err(RenderError::FenceNeverSubmitted(fence.raw())),
            Fence::Pending(index) => self.wait_for_submission(Some(index.clone()))?,
        }
        self.fences.insert(fence, Fence::Signaled);
        Ok(())
    }

    fn reset_fence(&mut self, fence: FenceId) -> Result<(), RenderError> {
        let state = self.fences.get_mut(&fence).ok_or(fence.invalid())?;
        *state = Fence::Unsignaled;
        Ok(())
    }

    fn acquire_next_image(&mut self, signal: SemaphoreId) -> Result<AcquireOutcome, RenderError> {
        if !self.semaphores.contains(&signal) {
            return Err(signal.invalid());
        }
        let image_count = self
            .swapchain
            .as_ref()
            .map(|swapchain| swapchain.config.image_count)
            .ok_or_else(|| RenderError::Backend("no swapchain".into()))?;
        let image_index = self.images_acquired % image_count;

        let (acquired, suboptimal) = match &self.surface {
            Some(surface) => match surface.get_current_texture() {
                Ok(texture) => {
                    let view = texture
                        .texture
                        .create_view(&wgpu::TextureViewDescriptor::default());
                    let suboptimal = texture.suboptimal;
                    (
                        AcquiredImage::Surface {
                            image_index,
                            texture,
                            view,
                        },
                        suboptimal,
                    )
                }
                Err(wgpu::SurfaceError::Outdated | wgpu::SurfaceError::Lost) => {
                    return Ok(AcquireOutcome::OutOfDate)
                }
                Err(wgpu::SurfaceError::Timeout) => return Ok(AcquireOutcome::Timeout),
                Err(err) => return Err(RenderError::backend("acquire surface texture", err)),
            },
            None => (AcquiredImage::Offscreen { image_index }, false),
        };

        self.images_acquired = self.images_acquired.wrapping_add(1);
        self.acquired = Some(acquired);
        Ok(AcquireOutcome::Acquired {
            image_index,
            suboptimal,
        })
    }

    fn submit(
        &mut self,
        submission: &Submission<'_>,
        overlay: Option<&mut dyn UiOverlay<Self>>,
    ) -> Result<(), RenderError> {
        if !self.fences.contains_key(&submission.fence) {
            return Err(submission.fence.invalid());
        }
        if !self.command_buffers.contains_key(&submission.command_buffer) {
            return Err(submission.command_buffer.invalid());
        }

        let command_buffer = self.encode_frame(submission.commands, overlay)?;
        let index = self.gpu()?.queue.submit(Some(command_buffer));
        self.fences.insert(submission.fence, Fence::Pending(index));
        Ok(())
    }

    fn present(&mut self, image_index: u32, wait: SemaphoreId) -> Result<PresentOutcome, RenderError> {
        if !self.semaphores.contains(&wait) {
            return Err(wait.invalid());
        }
        let acquired = self
            .acquired
            .take()
            .ok_or_else(|| RenderError::Backend("present without an acquired image".into()))?;
        if acquired.image_index() != image_index {
            return Err(RenderError::Backend(format!(
                "presenting image {image_index}, but image {} was acquired",
                acquired.image_index()
            )));
        }

        match acquired {
            AcquiredImage::Surface { texture, .. } => {
                let suboptimal = texture.suboptimal;
                if let Some(window) = self.window() {
                    window.pre_present_notify();
                }
                texture.present();
                Ok(if suboptimal {
                    PresentOutcome::Suboptimal
                } else {
                    PresentOutcome::Presented
                })
            }
            AcquiredImage::Offscreen { .. } => Ok(PresentOutcome::Presented),
        }
    }

    fn wait_idle(&mut self) -> Result<(), RenderError> {
        if self.gpu.is_none() {
            return Ok(());
        }
        self.wait_for_submission(None)?;
        for state in self.fences.values_mut() {
            if matches!(state, Fence::Pending(_)) {
                *state = Fence::Signaled;
            }
        }
        Ok(())
    }

    fn destroy_device(&mut self) {
        self.acquired = None;
        self.swapchain = None;
        self.descriptor_sets.clear();
        self.descriptor_pools.clear();
        self.views.clear();
        self.images.clear();
        self.buffers.clear();
        self.memory.clear();
        self.samplers.clear();
        self.pipelines.clear();
        self.pipeline_layouts.clear();
        self.set_layouts.clear();
        self.shader_modules.clear();
        self.render_passes.clear();
        self.framebuffers.clear();
        self.swapchain_views.clear();
        self.command_buffers.clear();
        self.command_pools.clear();
        self.fences.clear();
        self.semaphores.clear();
        self.gpu = None;
        self.adapter = None;
        self.adapters.clear();
    }

    fn destroy_surface(&mut self) {
        self.surface = None;
    }

    fn destroy_instance(&mut self) {
        self.instance = None;
    }
}

/// A device rendering into a small offscreen target, or `None` when no adapter is available.
pub fn headless_device() -> Option<Device<WgpuBackend>> {
    let settings = RenderSettings {
        enable_validation: false,
        ..RenderSettings::default()
    };
    let backend = WgpuBackend::headless(Extent2d::new(64, 64));
    match Device::new(backend, &EmbeddedShaders, &settings) {
        Ok(device) => Some(device),
        Err(err) => {
            log::warn!("No headless device: {err}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::device::FrameStatus;

    // Requires a GPU
    #[test]
    #[ignore]
    fn headless_device_renders_an_empty_frame() {
        let Some(mut device) = headless_device() else {
            return;
        };

        let status = device.begin_frame(0.016).unwrap();
        assert!(matches!(status, FrameStatus::Ready { .. }));
        device.end_frame(&[], &[], None).unwrap();
        assert_eq!(device.frames_presented(), 1);
        device.destroy();
    }

    // Requires a GPU
    #[test]
    #[ignore]
    fn headless_device_cycles_both_frame_slots() {
        let Some(mut device) = headless_device() else {
            return;
        };

        for expected_slot in [0, 1, 0, 1] {
            match device.begin_frame(0.016).unwrap() {
                FrameStatus::Ready { slot, .. } => assert_eq!(slot, expected_slot),
                FrameStatus::Skipped => panic!("headless frames are never skipped"),
            }
            device.end_frame(&[], &[], None).unwrap();
        }
    }
}
