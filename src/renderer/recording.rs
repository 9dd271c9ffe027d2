//! A [`GraphicsBackend`] that simulates the GPU in memory.
//!
//! Every call is logged, buffer and image contents are kept so uploads can be inspected, and
//! fences stay pending after a submit until they are waited on. Misuse that a real driver would
//! punish (freeing memory that is still bound, destroying a buffer a pending submission reads,
//! tearing down a parent before its children) is recorded in [`RecordingBackend::violations`]
//! instead of crashing.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::error::RenderError;
use crate::renderer::backend::{
    AcquireOutcome, BufferDescriptor, BufferId, ColorSpace, Command, CommandBufferId,
    CommandPoolId, DescriptorBinding, DescriptorKind, DescriptorPoolDescriptor, DescriptorPoolId,
    DescriptorPoolUsage, DescriptorSetId, DescriptorSetLayoutId, Extent2d, FenceId,
    FramebufferId, GraphicsBackend, IdAllocator, ImageDescriptor, ImageId, ImageLayout,
    ImageViewId, InstanceConfig, MemoryId, MemoryProperties, MemoryRequirements, MemoryType,
    PhysicalDeviceInfo, PhysicalDeviceType, PipelineDescriptor, PipelineId, PipelineLayoutId,
    PixelFormat, PresentMode, PresentOutcome, QueueFamilies, RenderPassDescriptor, RenderPassId,
    SamplerDescriptor, SamplerId, SemaphoreId, ShaderModuleId, Submission, SurfaceCapabilities,
    SurfaceFormat, SwapchainConfig, SwapchainSupport, TransferCommand, UiOverlay,
};
use crate::renderer::shaders::{ShaderCode, ShaderStage};

const DEVICE_LOCAL_TYPE: u32 = 0;
const HOST_VISIBLE_TYPE: u32 = 1;

/// What an overlay sees when it records against the [`RecordingBackend`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OverlayFrame {
    pub image_index: u32,
    pub extent: Extent2d,
}

#[derive(Debug, Clone, PartialEq)]
pub enum BackendEvent {
    CreateInstance(InstanceConfig),
    CreateSurface,
    CreateDevice { physical_device: usize },
    CreateSwapchain(SwapchainConfig),
    DestroySwapchain,
    Create { kind: &'static str, id: u64 },
    Destroy { kind: &'static str, id: u64 },
    OneTime(Vec<TransferCommand>),
    WaitFence(FenceId),
    ResetFence(FenceId),
    Acquire(AcquireOutcome),
    Submit { fence: FenceId, commands: Vec<Command> },
    OverlayRecorded { image_index: u32 },
    Present { image_index: u32, outcome: PresentOutcome },
    WaitIdle,
    DestroyDevice,
    DestroySurface,
    DestroyInstance,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FenceState {
    Signaled,
    Unsignaled,
    /// Submitted; the listed buffers are read by the pending work.
    Pending(Vec<BufferId>),
}

#[derive(Debug, Clone)]
pub struct RecordingConfig {
    pub physical_devices: Vec<PhysicalDeviceInfo>,
    pub framebuffer_size: Extent2d,
    pub required_extensions: Vec<String>,
    pub supported_extensions: Vec<String>,
    pub supported_layers: Vec<String>,
    pub image_copy_row_alignment: u32,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        let extensions = vec!["surface".to_string(), "platform_surface".to_string()];
        Self {
            physical_devices: vec![Self::physical_device(0, "recording gpu")],
            framebuffer_size: Extent2d::new(800, 600),
            required_extensions: extensions.clone(),
            supported_extensions: extensions,
            supported_layers: vec!["VK_LAYER_KHRONOS_validation".to_string()],
            image_copy_row_alignment: 1,
        }
    }
}

impl RecordingConfig {
    /// A fully capable discrete GPU with one shared graphics/present queue family.
    pub fn physical_device(index: usize, name: &str) -> PhysicalDeviceInfo {
        PhysicalDeviceInfo {
            index,
            name: name.to_string(),
            device_type: PhysicalDeviceType::Discrete,
            queue_families: QueueFamilies {
                graphics: Some(0),
                present: Some(0),
            },
            supports_swapchain: true,
            swapchain_support: SwapchainSupport {
                capabilities: SurfaceCapabilities {
                    current_extent: None,
                    min_image_extent: Extent2d::new(1, 1),
                    max_image_extent: Extent2d::new(8192, 8192),
                    min_image_count: 2,
                    max_image_count: 3,
                },
                formats: vec![
                    SurfaceFormat {
                        format: PixelFormat::Bgra8UnormSrgb,
                        color_space: ColorSpace::SrgbNonLinear,
                    },
                    SurfaceFormat {
                        format: PixelFormat::Bgra8Unorm,
                        color_space: ColorSpace::SrgbNonLinear,
                    },
                ],
                present_modes: vec![PresentMode::Fifo, PresentMode::Mailbox],
            },
            max_sampler_anisotropy: 16.0,
        }
    }
}

#[derive(Debug)]
struct MemoryState {
    properties: MemoryProperties,
    bytes: Vec<u8>,
    bound_to: Option<u64>,
}

#[derive(Debug)]
struct BufferState {
    desc: BufferDescriptor,
    memory: Option<MemoryId>,
}

#[derive(Debug)]
struct ImageState {
    desc: ImageDescriptor,
    memory: Option<MemoryId>,
    layout: ImageLayout,
    views: u32,
    /// Tightly packed texels written by buffer copies.
    texels: Vec<u8>,
}

#[derive(Debug)]
struct SetState {
    pool: DescriptorPoolId,
    kind: DescriptorKind,
    view: Option<ImageViewId>,
}

#[derive(Debug, Default)]
pub struct RecordingBackend {
    config: RecordingConfig,
    ids: IdAllocator,
    events: Vec<BackendEvent>,
    violations: Vec<String>,
    instance: bool,
    surface: bool,
    device: bool,
    swapchain: Option<SwapchainConfig>,
    next_image: u32,
    acquired_image: Option<u32>,
    acquire_script: VecDeque<AcquireOutcome>,
    present_script: VecDeque<PresentOutcome>,
    failure_script: HashMap<&'static str, usize>,
    live: HashMap<u64, &'static str>,
    memory: HashMap<MemoryId, MemoryState>,
    buffers: HashMap<BufferId, BufferState>,
    images: HashMap<ImageId, ImageState>,
    views: HashMap<ImageViewId, ImageId>,
    set_layouts: HashMap<DescriptorSetLayoutId, DescriptorKind>,
    pools: HashMap<DescriptorPoolId, DescriptorPoolUsage>,
    sets: HashMap<DescriptorSetId, SetState>,
    command_buffers: HashMap<CommandBufferId, CommandPoolId>,
    fences: HashMap<FenceId, FenceState>,
    semaphores: HashSet<SemaphoreId>,
    swapchain_views: HashMap<ImageViewId, u32>,
    /// Attachment view and the swapchain image behind it.
    framebuffers: HashMap<FramebufferId, (ImageViewId, u32)>,
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self::with_config(RecordingConfig::default())
    }

    pub fn with_config(config: RecordingConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    pub fn events(&self) -> &[BackendEvent] {
        &self.events
    }

    pub fn clear_events(&mut self) {
        self.events.clear();
    }

    pub fn violations(&self) -> &[String] {
        &self.violations
    }

    pub fn set_framebuffer_size(&mut self, size: Extent2d) {
        self.config.framebuffer_size = size;
    }

    /// Queues the result of an upcoming `acquire_next_image` call.
    pub fn script_acquire(&mut self, outcome: AcquireOutcome) {
        self.acquire_script.push_back(outcome);
    }

    /// Queues the result of an upcoming `present` call.
    pub fn script_present(&mut self, outcome: PresentOutcome) {
        self.present_script.push_back(outcome);
    }

    /// Makes the `skip + 1`-th upcoming call of `call` fail with a backend error.
    ///
    /// Recognised calls are `create_buffer`, `create_image` and `execute_one_time`.
    pub fn script_failure(&mut self, call: &'static str, skip: usize) {
        self.failure_script.insert(call, skip);
    }

    /// Number of live resources of `kind` (as named by the handle's `KIND`).
    pub fn live_count(&self, kind: &str) -> usize {
        self.live.values().filter(|live| **live == kind).count()
    }

    pub fn live_total(&self) -> usize {
        self.live.len()
    }

    pub fn is_live(&self, id: u64) -> bool {
        self.live.contains_key(&id)
    }

    /// Command lists of every submission so far, oldest first.
    pub fn submissions(&self) -> Vec<&[Command]> {
        self.events
            .iter()
            .filter_map(|event| match event {
                BackendEvent::Submit { commands, .. } => Some(commands.as_slice()),
                _ => None,
            })
            .collect()
    }

    pub fn count_events(&self, predicate: impl Fn(&BackendEvent) -> bool) -> usize {
        self.events.iter().filter(|event| predicate(event)).count()
    }

    pub fn buffer_contents(&self, buffer: BufferId) -> Option<&[u8]> {
        let memory = self.buffers.get(&buffer)?.memory?;
        let size = self.buffers.get(&buffer)?.desc.size as usize;
        self.memory
            .get(&memory)
            .map(|state| &state.bytes[..size.min(state.bytes.len())])
    }

    pub fn image_texels(&self, image: ImageId) -> Option<&[u8]> {
        self.images.get(&image).map(|state| state.texels.as_slice())
    }

    pub fn image_layout(&self, image: ImageId) -> Option<ImageLayout> {
        self.images.get(&image).map(|state| state.layout)
    }

    pub fn fence_state(&self, fence: FenceId) -> Option<&FenceState> {
        self.fences.get(&fence)
    }

    pub fn swapchain(&self) -> Option<&SwapchainConfig> {
        self.swapchain.as_ref()
    }

    fn violation(&mut self, message: String) {
        log::warn!("recording backend: {message}");
        self.violations.push(message);
    }

    fn create<T: From<u64> + Copy>(&mut self, kind: &'static str) -> T {
        let raw: u64 = self.ids.next();
        self.live.insert(raw, kind);
        self.events.push(BackendEvent::Create { kind, id: raw });
        T::from(raw)
    }

    fn release(&mut self, kind: &'static str, id: u64) -> bool {
        match self.live.remove(&id) {
            Some(live_kind) if live_kind == kind => {
                self.events.push(BackendEvent::Destroy { kind, id });
                true
            }
            Some(other) => {
                self.live.insert(id, other);
                self.violation(format!("destroy of {kind}#{id} which is a {other}"));
                false
            }
            None => {
                self.violation(format!("destroy of unknown or already destroyed {kind}#{id}"));
                false
            }
        }
    }

    fn scripted_failure(&mut self, call: &'static str) -> Result<(), RenderError> {
        match self.failure_script.get_mut(call) {
            Some(0) => {
                self.failure_script.remove(call);
                Err(RenderError::Backend(format!("scripted {call} failure")))
            }
            Some(skip) => {
                *skip -= 1;
                Ok(())
            }
            None => Ok(()),
        }
    }

    fn require_device(&self) -> Result<(), RenderError> {
        if self.device {
            Ok(())
        } else {
            Err(RenderError::DeviceLost)
        }
    }

    fn in_flight(&self, buffer: BufferId) -> bool {
        self.fences.values().any(|state| match state {
            FenceState::Pending(buffers) => buffers.contains(&buffer),
            _ => false,
        })
    }

    fn memory_bytes_mut(&mut self, buffer: BufferId) -> Result<&mut Vec<u8>, RenderError> {
        let memory = self
            .buffers
            .get(&buffer)
            .and_then(|state| state.memory)
            .ok_or_else(|| buffer.invalid())?;
        self.memory
            .get_mut(&memory)
            .map(|state| &mut state.bytes)
            .ok_or_else(|| memory.invalid())
    }

    fn copy_buffer(&mut self, src: BufferId, dst: BufferId, size: u64) -> Result<(), RenderError> {
        let data = self
            .buffer_contents(src)
            .ok_or_else(|| src.invalid())?
            .get(..size as usize)
            .ok_or_else(|| RenderError::Backend(format!("copy of {size} bytes overruns {src}")))?
            .to_vec();
        let target = self.memory_bytes_mut(dst)?;
        if target.len() < data.len() {
            return Err(RenderError::Backend(format!(
                "copy of {size} bytes overruns {dst}"
            )));
        }
        target[..data.len()].copy_from_slice(&data);
        Ok(())
    }

    fn copy_buffer_to_image(
        &mut self,
        buffer: BufferId,
        image: ImageId,
        width: u32,
        height: u32,
        bytes_per_row: u32,
    ) -> Result<(), RenderError> {
        let source = self
            .buffer_contents(buffer)
            .ok_or_else(|| buffer.invalid())?
            .to_vec();
        let (layout, format) = self
            .images
            .get(&image)
            .map(|state| (state.layout, state.desc.format))
            .ok_or_else(|| image.invalid())?;
        if layout != ImageLayout::TransferDst {
            self.violation(format!("copy into {image} while in layout {layout:?}"));
        }
        if bytes_per_row % self.config.image_copy_row_alignment.max(1) != 0 {
            self.violation(format!(
                "bytes_per_row {bytes_per_row} is not aligned to {}",
                self.config.image_copy_row_alignment
            ));
        }

        let bpp = format.bytes_per_pixel();
        let row_bytes = (width * bpp) as usize;
        let mut texels = Vec::with_capacity(row_bytes * height as usize);
        for row in 0..height as usize {
            let start = row * bytes_per_row as usize;
            let texel_row = source.get(start..start + row_bytes).ok_or_else(|| {
                RenderError::Backend(format!("buffer {buffer} too small for image copy"))
            })?;
            texels.extend_from_slice(texel_row);
        }

        if let Some(state) = self.images.get_mut(&image) {
            state.texels = texels;
        }
        Ok(())
    }
}

impl GraphicsBackend for RecordingBackend {
    type OverlayContext<'a> = OverlayFrame;

    fn required_instance_extensions(&self) -> Vec<String> {
        self.config.required_extensions.clone()
    }

    fn supported_instance_extensions(&self) -> Result<Vec<String>, RenderError> {
        Ok(self.config.supported_extensions.clone())
    }

    fn supported_validation_layers(&self) -> Result<Vec<String>, RenderError> {
        Ok(self.config.supported_layers.clone())
    }

    fn create_instance(&mut self, config: &InstanceConfig) -> Result<(), RenderError> {
        self.instance = true;
        self.events.push(BackendEvent::CreateInstance(config.clone()));
        Ok(())
    }

    fn create_surface(&mut self) -> Result<(), RenderError> {
        if !self.instance {
            return Err(RenderError::Backend("surface requires an instance".into()));
        }
        self.surface = true;
        self.events.push(BackendEvent::CreateSurface);
        Ok(())
    }

    fn framebuffer_size(&self) -> Extent2d {
        self.config.framebuffer_size
    }

    fn enumerate_physical_devices(&mut self) -> Result<Vec<PhysicalDeviceInfo>, RenderError> {
        Ok(self.config.physical_devices.clone())
    }

    fn create_logical_device(
        &mut self,
        physical_device: usize,
        queue_families: &[u32],
    ) -> Result<(), RenderError> {
        if queue_families.is_empty() {
            return Err(RenderError::Backend("no queue families requested".into()));
        }
        self.device = true;
        self.events
            .push(BackendEvent::CreateDevice { physical_device });
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
        self.config.image_copy_row_alignment
    }

    fn query_swapchain_support(&mut self) -> Result<SwapchainSupport, RenderError> {
        self.config
            .physical_devices
            .first()
            .map(|device| device.swapchain_support.clone())
            .ok_or(RenderError::NoSuitableDevice)
    }

    fn create_swapchain(&mut self, config: &SwapchainConfig) -> Result<u32, RenderError> {
        self.require_device()?;
        if self.swapchain.is_some() {
            self.violation("swapchain created while another is alive".into());
        }
        if config.extent.is_zero() {
            return Err(RenderError::Backend("zero-sized swapchain".into()));
        }
        self.swapchain = Some(*config);
        self.next_image = 0;
        self.events.push(BackendEvent::CreateSwapchain(*config));
        Ok(config.image_count)
    }

    fn create_swapchain_image_view(
        &mut self,
        image_index: u32,
    ) -> Result<ImageViewId, RenderError> {
        let image_count = self
            .swapchain
            .map(|swapchain| swapchain.image_count)
            .ok_or_else(|| RenderError::Backend("image view without swapchain".into()))?;
        if image_index >= image_count {
            return Err(RenderError::Backend(format!(
                "swapchain has no image {image_index}"
            )));
        }
        let id: ImageViewId = self.create(ImageViewId::KIND);
        self.swapchain_views.insert(id, image_index);
        Ok(id)
    }

    fn destroy_swapchain(&mut self) {
        if !self.framebuffers.is_empty() {
            let count = self.framebuffers.len();
            self.violation(format!("swapchain destroyed with {count} live framebuffers"));
        }
        if !self.swapchain_views.is_empty() {
            let count = self.swapchain_views.len();
            self.violation(format!("swapchain destroyed with {count} live image views"));
        }
        self.swapchain = None;
        self.acquired_image = None;
        self.events.push(BackendEvent::DestroySwapchain);
    }

    fn create_framebuffer(
        &mut self,
        _render_pass: RenderPassId,
        attachment: ImageViewId,
        _extent: Extent2d,
    ) -> Result<FramebufferId, RenderError> {
        let image_index = *self.swapchain_views.get(&attachment).ok_or_else(|| {
            RenderError::Backend(format!("{attachment} is not a swapchain image view"))
        })?;
        let id: FramebufferId = self.create(FramebufferId::KIND);
        self.framebuffers.insert(id, (attachment, image_index));
        Ok(id)
    }

    fn destroy_framebuffer(&mut self, framebuffer: FramebufferId) {
        if self.release(FramebufferId::KIND, framebuffer.raw()) {
            self.framebuffers.remove(&framebuffer);
        }
    }

    fn create_shader_module(&mut self, code: &ShaderCode) -> Result<ShaderModuleId, RenderError> {
        self.require_device()?;
        let entry = format!("fn {}", code.entry_point);
        if !code.wgsl.contains(&entry) {
            return Err(RenderError::ShaderCompile {
                label: code.label.clone(),
                reason: format!("entry point {} not found", code.entry_point),
            });
        }
        Ok(self.create(ShaderModuleId::KIND))
    }

    fn destroy_shader_module(&mut self, module: ShaderModuleId) {
        self.release(ShaderModuleId::KIND, module.raw());
    }

    fn create_render_pass(
        &mut self,
        _desc: &RenderPassDescriptor,
    ) -> Result<RenderPassId, RenderError> {
        self.require_device()?;
        Ok(self.create(RenderPassId::KIND))
    }

    fn destroy_render_pass(&mut self, render_pass: RenderPassId) {
        self.release(RenderPassId::KIND, render_pass.raw());
    }

    fn create_descriptor_set_layout(
        &mut self,
        kind: DescriptorKind,
        _stage: ShaderStage,
    ) -> Result<DescriptorSetLayoutId, RenderError> {
        self.require_device()?;
        let id: DescriptorSetLayoutId = self.create(DescriptorSetLayoutId::KIND);
        self.set_layouts.insert(id, kind);
        Ok(id)
    }

    fn destroy_descriptor_set_layout(&mut self, layout: DescriptorSetLayoutId) {
        if self.release(DescriptorSetLayoutId::KIND, layout.raw()) {
            self.set_layouts.remove(&layout);
        }
    }

    fn create_pipeline_layout(
        &mut self,
        set_layouts: &[DescriptorSetLayoutId],
    ) -> Result<PipelineLayoutId, RenderError> {
        if let Some(missing) = set_layouts
            .iter()
            .find(|layout| !self.set_layouts.contains_key(layout))
        {
            return Err(missing.invalid());
        }
        Ok(self.create(PipelineLayoutId::KIND))
    }

    fn destroy_pipeline_layout(&mut self, layout: PipelineLayoutId) {
        self.release(PipelineLayoutId::KIND, layout.raw());
    }

    fn create_graphics_pipeline(
        &mut self,
        desc: &PipelineDescriptor,
    ) -> Result<PipelineId, RenderError> {
        for module in [desc.vertex_shader, desc.fragment_shader] {
            if !self.is_live(module.raw()) {
                return Err(module.invalid());
            }
        }
        if !self.is_live(desc.layout.raw()) {
            return Err(desc.layout.invalid());
        }
        Ok(self.create(PipelineId::KIND))
    }

    fn destroy_pipeline(&mut self, pipeline: PipelineId) {
        self.release(PipelineId::KIND, pipeline.raw());
    }

    fn create_sampler(&mut self, _desc: &SamplerDescriptor) -> Result<SamplerId, RenderError> {
        self.require_device()?;
        Ok(self.create(SamplerId::KIND))
    }

    fn destroy_sampler(&mut self, sampler: SamplerId) {
        self.release(SamplerId::KIND, sampler.raw());
    }

    fn create_buffer(&mut self, desc: &BufferDescriptor) -> Result<BufferId, RenderError> {
        self.require_device()?;
        self.scripted_failure("create_buffer")?;
        if desc.size == 0 {
            return Err(RenderError::Backend(format!(
                "zero-sized buffer {:?}",
                desc.label
            )));
        }
        let id: BufferId = self.create(BufferId::KIND);
        self.buffers.insert(
            id,
            BufferState {
                desc: *desc,
                memory: None,
            },
        );
        Ok(id)
    }

    fn buffer_memory_requirements(
        &self,
        buffer: BufferId,
    ) -> Result<MemoryRequirements, RenderError> {
        let state = self.buffers.get(&buffer).ok_or_else(|| buffer.invalid())?;
        Ok(MemoryRequirements {
            size: state.desc.size,
            type_bits: (1 << DEVICE_LOCAL_TYPE) | (1 << HOST_VISIBLE_TYPE),
        })
    }

    fn create_image(&mut self, desc: &ImageDescriptor) -> Result<ImageId, RenderError> {
        self.require_device()?;
        self.scripted_failure("create_image")?;
        if desc.width == 0 || desc.height == 0 {
            return Err(RenderError::Backend("zero-sized image".into()));
        }
        let id: ImageId = self.create(ImageId::KIND);
        self.images.insert(
            id,
            ImageState {
                desc: *desc,
                memory: None,
                layout: ImageLayout::Undefined,
                views: 0,
                texels: Vec::new(),
            },
        );
        Ok(id)
    }

    fn image_memory_requirements(
        &self,
        image: ImageId,
    ) -> Result<MemoryRequirements, RenderError> {
        let state = self.images.get(&image).ok_or_else(|| image.invalid())?;
        let desc = state.desc;
        Ok(MemoryRequirements {
            size: u64::from(desc.width * desc.height * desc.format.bytes_per_pixel()),
            type_bits: 1 << DEVICE_LOCAL_TYPE,
        })
    }

    fn allocate_memory(&mut self, size: u64, memory_type: u32) -> Result<MemoryId, RenderError> {
        let properties = self
            .memory_types()
            .get(memory_type as usize)
            .map(|memory_type| memory_type.properties)
            .ok_or_else(|| RenderError::Backend(format!("no memory type {memory_type}")))?;
        let id: MemoryId = self.create(MemoryId::KIND);
        self.memory.insert(
            id,
            MemoryState {
                properties,
                bytes: vec![0; size as usize],
                bound_to: None,
            },
        );
        Ok(id)
    }

    fn bind_buffer_memory(
        &mut self,
        buffer: BufferId,
        memory: MemoryId,
    ) -> Result<(), RenderError> {
        let state = self.memory.get_mut(&memory).ok_or_else(|| memory.invalid())?;
        if state.bound_to.is_some() {
            return Err(RenderError::Backend(format!("{memory} is already bound")));
        }
        state.bound_to = Some(buffer.raw());
        self.buffers
            .get_mut(&buffer)
            .ok_or_else(|| buffer.invalid())?
            .memory = Some(memory);
        Ok(())
    }

    fn bind_image_memory(&mut self, image: ImageId, memory: MemoryId) -> Result<(), RenderError> {
        let state = self.memory.get_mut(&memory).ok_or_else(|| memory.invalid())?;
        if state.bound_to.is_some() {
            return Err(RenderError::Backend(format!("{memory} is already bound")));
        }
        state.bound_to = Some(image.raw());
        self.images
            .get_mut(&image)
            .ok_or_else(|| image.invalid())?
            .memory = Some(memory);
        Ok(())
    }

    fn write_memory(
        &mut self,
        memory: MemoryId,
        offset: u64,
        data: &[u8],
    ) -> Result<(), RenderError> {
        let state = self.memory.get_mut(&memory).ok_or_else(|| memory.invalid())?;
        if !state.properties.contains(MemoryProperties::HOST_VISIBLE) {
            return Err(RenderError::Backend(format!("{memory} is not host visible")));
        }
        let start = offset as usize;
        let target = state
            .bytes
            .get_mut(start..start + data.len())
            .ok_or_else(|| RenderError::Backend(format!("write overruns {memory}")))?;
        target.copy_from_slice(data);
        Ok(())
    }

    fn destroy_buffer(&mut self, buffer: BufferId) {
        if self.in_flight(buffer) {
            self.violation(format!("{buffer} destroyed while a pending submission reads it"));
        }
        if self.release(BufferId::KIND, buffer.raw()) {
            self.buffers.remove(&buffer);
        }
    }

    fn destroy_image(&mut self, image: ImageId) {
        if let Some(state) = self.images.get(&image) {
            if state.views > 0 {
                let views = state.views;
                self.violation(format!("{image} destroyed with {views} live views"));
            }
        }
        if self.release(ImageId::KIND, image.raw()) {
            self.images.remove(&image);
        }
    }

    fn free_memory(&mut self, memory: MemoryId) {
        if let Some(owner) = self.memory.get(&memory).and_then(|state| state.bound_to) {
            if let Some(kind) = self.live.get(&owner).copied() {
                self.violation(format!("{memory} freed while {kind}#{owner} is still bound"));
            }
        }
        if self.release(MemoryId::KIND, memory.raw()) {
            self.memory.remove(&memory);
        }
    }

    fn create_image_view(
        &mut self,
        image: ImageId,
        _format: PixelFormat,
    ) -> Result<ImageViewId, RenderError> {
        let state = self.images.get_mut(&image).ok_or_else(|| image.invalid())?;
        if state.memory.is_none() {
            return Err(RenderError::Backend(format!("{image} has no memory bound")));
        }
        state.views += 1;
        let id: ImageViewId = self.create(ImageViewId::KIND);
        self.views.insert(id, image);
        Ok(id)
    }

    fn destroy_image_view(&mut self, view: ImageViewId) {
        if self.sets.values().any(|set| set.view == Some(view)) {
            self.violation(format!("{view} destroyed while a descriptor set references it"));
        }
        if self.framebuffers.values().any(|(attachment, _)| *attachment == view) {
            self.violation(format!("{view} destroyed while a framebuffer attaches it"));
        }
        if self.release(ImageViewId::KIND, view.raw()) {
            self.swapchain_views.remove(&view);
            if let Some(image) = self.views.remove(&view) {
                if let Some(state) = self.images.get_mut(&image) {
                    state.views = state.views.saturating_sub(1);
                }
            }
        }
    }

    fn create_descriptor_pool(
        &mut self,
        desc: &DescriptorPoolDescriptor,
    ) -> Result<DescriptorPoolId, RenderError> {
        self.require_device()?;
        let id: DescriptorPoolId = self.create(DescriptorPoolId::KIND);
        self.pools.insert(id, DescriptorPoolUsage::new(*desc));
        Ok(id)
    }

    fn destroy_descriptor_pool(&mut self, pool: DescriptorPoolId) {
        let live_sets = self.pools.get(&pool).map_or(0, DescriptorPoolUsage::live_sets);
        if live_sets > 0 {
            self.violation(format!("{pool} destroyed with {live_sets} live sets"));
        }
        if self.release(DescriptorPoolId::KIND, pool.raw()) {
            self.pools.remove(&pool);
        }
    }

    fn allocate_descriptor_set(
        &mut self,
        pool: DescriptorPoolId,
        layout: DescriptorSetLayoutId,
        binding: &DescriptorBinding,
    ) -> Result<DescriptorSetId, RenderError> {
        let layout_kind = *self.set_layouts.get(&layout).ok_or_else(|| layout.invalid())?;
        if layout_kind != binding.kind() {
            return Err(RenderError::Backend(format!(
                "{binding:?} does not match layout {layout} ({layout_kind:?})"
            )));
        }
        let view = match *binding {
            DescriptorBinding::UniformBuffer { buffer, .. } => {
                if !self.buffers.contains_key(&buffer) {
                    return Err(buffer.invalid());
                }
                None
            }
            DescriptorBinding::CombinedImageSampler { view, sampler } => {
                if !self.views.contains_key(&view) {
                    return Err(view.invalid());
                }
                if !self.is_live(sampler.raw()) {
                    return Err(sampler.invalid());
                }
                Some(view)
            }
        };

        self.pools
            .get_mut(&pool)
            .ok_or_else(|| pool.invalid())?
            .allocate(layout_kind)?;

        let id: DescriptorSetId = self.create(DescriptorSetId::KIND);
        self.sets.insert(
            id,
            SetState {
                pool,
                kind: layout_kind,
                view,
            },
        );
        Ok(id)
    }

    fn free_descriptor_set(&mut self, pool: DescriptorPoolId, set: DescriptorSetId) {
        let Some(state) = self.sets.get(&set) else {
            self.violation(format!("free of unknown {set}"));
            return;
        };
        if state.pool != pool {
            self.violation(format!("{set} freed into {pool} but belongs to {}", state.pool));
            return;
        }
        let kind = state.kind;
        let allowed = self
            .pools
            .get(&pool)
            .map_or(true, |usage| usage.descriptor.free_individual_sets);
        if !allowed {
            self.violation(format!("{pool} does not allow freeing individual sets"));
        }
        if let Some(usage) = self.pools.get_mut(&pool) {
            usage.free(kind);
        }
        if self.release(DescriptorSetId::KIND, set.raw()) {
            self.sets.remove(&set);
        }
    }

    fn create_command_pool(&mut self, _queue_family: u32) -> Result<CommandPoolId, RenderError> {
        self.require_device()?;
        Ok(self.create(CommandPoolId::KIND))
    }

    fn destroy_command_pool(&mut self, pool: CommandPoolId) {
        let live = self
            .command_buffers
            .values()
            .filter(|owner| **owner == pool)
            .count();
        if live > 0 {
            self.violation(format!("{pool} destroyed with {live} live command buffers"));
        }
        self.release(CommandPoolId::KIND, pool.raw());
    }

    fn allocate_command_buffers(
        &mut self,
        pool: CommandPoolId,
        count: usize,
    ) -> Result<Vec<CommandBufferId>, RenderError> {
        if !self.is_live(pool.raw()) {
            return Err(pool.invalid());
        }
        Ok((0..count)
            .map(|_| {
                let id: CommandBufferId = self.create(CommandBufferId::KIND);
                self.command_buffers.insert(id, pool);
                id
            })
            .collect())
    }

    fn free_command_buffers(&mut self, _pool: CommandPoolId, buffers: &[CommandBufferId]) {
        for buffer in buffers {
            if self.release(CommandBufferId::KIND, buffer.raw()) {
                self.command_buffers.remove(buffer);
            }
        }
    }

    fn reset_command_buffer(&mut self, buffer: CommandBufferId) -> Result<(), RenderError> {
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
        if !self.is_live(pool.raw()) {
            return Err(pool.invalid());
        }
        self.scripted_failure("execute_one_time")?;
        for command in commands {
            match *command {
                TransferCommand::CopyBuffer { src, dst, size } => self.copy_buffer(src, dst, size)?,
                TransferCommand::TransitionImage { image, from, to } => {
                    let state = self.images.get_mut(&image).ok_or_else(|| image.invalid())?;
                    let current = state.layout;
                    state.layout = to;
                    if current != from {
                        self.violation(format!(
                            "{image} transitioned from {from:?} but was {current:?}"
                        ));
                    }
                }
                TransferCommand::CopyBufferToImage {
                    buffer,
                    image,
                    width,
                    height,
                    bytes_per_row,
                } => self.copy_buffer_to_image(buffer, image, width, height, bytes_per_row)?,
            }
        }
        self.events.push(BackendEvent::OneTime(commands.to_vec()));
        Ok(())
    }

    fn create_semaphore(&mut self) -> Result<SemaphoreId, RenderError> {
        self.require_device()?;
        let id: SemaphoreId = self.create(SemaphoreId::KIND);
        self.semaphores.insert(id);
        Ok(id)
    }

    fn destroy_semaphore(&mut self, semaphore: SemaphoreId) {
        if self.release(SemaphoreId::KIND, semaphore.raw()) {
            self.semaphores.remove(&semaphore);
        }
    }

    fn create_fence(&mut self, signaled: bool) -> Result<FenceId, RenderError> {
        self.require_device()?;
        let id: FenceId = self.create(FenceId::KIND);
        let state = if signaled {
            FenceState::Signaled
        } else {
            FenceState::Unsignaled
        };
        self.fences.insert(id, state);
        Ok(id)
    }

    fn destroy_fence(&mut self, fence: FenceId) {
        if matches!(self.fences.get(&fence), Some(FenceState::Pending(_))) {
            self.violation(format!("{fence} destroyed while pending"));
        }
        if self.release(FenceId::KIND, fence.raw()) {
            self.fences.remove(&fence);
        }
    }

    fn wait_for_fence(&mut self, fence: FenceId) -> Result<(), RenderError> {
        let state = self.fences.get_mut(&fence).ok_or_else(|| fence.invalid())?;
        if matches!(state, FenceState::Unsignaled) {
            return Err(RenderError::FenceNeverSubmitted(fence.raw()));
        }
        *state = FenceState::Signaled;
        self.events.push(BackendEvent::WaitFence(fence));
        Ok(())
    }

    fn reset_fence(&mut self, fence: FenceId) -> Result<(), RenderError> {
        let state = self.fences.get_mut(&fence).ok_or_else(|| fence.invalid())?;
        if matches!(state, FenceState::Pending(_)) {
            self.violation(format!("{fence} reset while pending"));
            return Ok(());
        }
        *state = FenceState::Unsignaled;
        self.events.push(BackendEvent::ResetFence(fence));
        Ok(())
    }

    fn acquire_next_image(&mut self, signal: SemaphoreId) -> Result<AcquireOutcome, RenderError> {
        if !self.semaphores.contains(&signal) {
            return Err(signal.invalid());
        }
        let image_count = self
            .swapchain
            .map(|swapchain| swapchain.image_count)
            .ok_or_else(|| RenderError::Backend("acquire without swapchain".into()))?;

        let outcome = self.acquire_script.pop_front().unwrap_or_else(|| {
            let image_index = self.next_image % image_count;
            AcquireOutcome::Acquired {
                image_index,
                suboptimal: false,
            }
        });
        if let AcquireOutcome::Acquired { image_index, .. } = outcome {
            self.next_image = image_index + 1;
            self.acquired_image = Some(image_index);
        }
        self.events.push(BackendEvent::Acquire(outcome));
        Ok(outcome)
    }

    fn submit(
        &mut self,
        submission: &Submission<'_>,
        mut overlay: Option<&mut dyn UiOverlay<Self>>,
    ) -> Result<(), RenderError> {
        if !self.command_buffers.contains_key(&submission.command_buffer) {
            return Err(submission.command_buffer.invalid());
        }
        for semaphore in [submission.wait_semaphore, submission.signal_semaphore] {
            if !self.semaphores.contains(&semaphore) {
                return Err(semaphore.invalid());
            }
        }
        match self.fences.get(&submission.fence).cloned() {
            Some(FenceState::Unsignaled) => {}
            Some(state) => {
                self.violation(format!(
                    "submit with {} in state {state:?}",
                    submission.fence
                ));
            }
            None => return Err(submission.fence.invalid()),
        }

        let commands = submission.commands;
        if !matches!(commands.first(), Some(Command::BeginRenderPass { .. }))
            || !matches!(commands.last(), Some(Command::EndRenderPass))
        {
            self.violation("command buffer is not a single closed render pass".into());
        }

        let mut read_buffers = Vec::new();
        let mut extent = Extent2d::default();
        for command in commands {
            match command {
                Command::BeginRenderPass {
                    framebuffer,
                    extent: pass_extent,
                    ..
                } => {
                    let target = self.framebuffers.get(framebuffer).map(|(_, image)| *image);
                    if target.is_none() || target != self.acquired_image {
                        self.violation(format!(
                            "{framebuffer} does not target the acquired image"
                        ));
                    }
                    extent = *pass_extent;
                }
                Command::BindVertexBuffer(buffer) | Command::BindIndexBuffer(buffer) => {
                    if !self.buffers.contains_key(buffer) {
                        return Err(buffer.invalid());
                    }
                    read_buffers.push(*buffer);
                }
                Command::BindDescriptorSets { sets, .. } => {
                    if let Some(missing) = sets.iter().find(|set| !self.sets.contains_key(set)) {
                        return Err(missing.invalid());
                    }
                }
                Command::RecordOverlay => {
                    if let Some(overlay) = overlay.as_deref_mut() {
                        let image_index = self.acquired_image.unwrap_or_default();
                        overlay.record(&mut OverlayFrame {
                            image_index,
                            extent,
                        });
                        self.events
                            .push(BackendEvent::OverlayRecorded { image_index });
                    }
                }
                _ => {}
            }
        }

        self.fences
            .insert(submission.fence, FenceState::Pending(read_buffers));
        self.events.push(BackendEvent::Submit {
            fence: submission.fence,
            commands: commands.to_vec(),
        });
        Ok(())
    }

    fn present(
        &mut self,
        image_index: u32,
        wait: SemaphoreId,
    ) -> Result<PresentOutcome, RenderError> {
        if !self.semaphores.contains(&wait) {
            return Err(wait.invalid());
        }
        if self.acquired_image != Some(image_index) {
            self.violation(format!("present of image {image_index} that was not acquired"));
        }
        self.acquired_image = None;
        let outcome = self
            .present_script
            .pop_front()
            .unwrap_or(PresentOutcome::Presented);
        self.events.push(BackendEvent::Present {
            image_index,
            outcome,
        });
        Ok(outcome)
    }

    fn wait_idle(&mut self) -> Result<(), RenderError> {
        for state in self.fences.values_mut() {
            if matches!(state, FenceState::Pending(_)) {
                *state = FenceState::Signaled;
            }
        }
        self.events.push(BackendEvent::WaitIdle);
        Ok(())
    }

    fn destroy_device(&mut self) {
        if self.swapchain.is_some() {
            self.violation("device destroyed before its swapchain".into());
        }
        if !self.live.is_empty() {
            let mut kinds: Vec<&str> = self.live.values().copied().collect();
            kinds.sort_unstable();
            kinds.dedup();
            let count = self.live.len();
            self.violation(format!(
                "device destroyed with {count} live resources ({})",
                kinds.join(", ")
            ));
        }
        self.device = false;
        self.events.push(BackendEvent::DestroyDevice);
    }

    fn destroy_surface(&mut self) {
        if self.swapchain.is_some() {
            self.violation("surface destroyed before its swapchain".into());
        }
        self.surface = false;
        self.events.push(BackendEvent::DestroySurface);
    }

    fn destroy_instance(&mut self) {
        if self.device {
            self.violation("instance destroyed before the device".into());
        }
        if self.surface {
            self.violation("instance destroyed before the surface".into());
        }
        self.instance = false;
        self.events.push(BackendEvent::DestroyInstance);
    }
}
