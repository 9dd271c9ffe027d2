//! The graphics device: sole owner of every GPU object the sprite renderer uses.

use crate::error::RenderError;
use crate::renderer::backend::{
    AcquireOutcome, BlendMode, BufferDescriptor, BufferId, BufferUsage, Command, CommandBufferId,
    CommandPoolId, CullMode, DescriptorBinding, DescriptorKind, DescriptorPoolDescriptor,
    DescriptorPoolId, DescriptorSetId, DescriptorSetLayoutId, Extent2d, FenceId, Filter,
    FramebufferId, FrontFace, GraphicsBackend, ImageDescriptor, ImageId, ImageLayout,
    ImageViewId, InstanceConfig, MemoryId, MemoryProperties, PhysicalDeviceInfo,
    PipelineDescriptor, PipelineId, PipelineLayoutId, PixelFormat, PresentMode, PresentOutcome,
    Rect2d, RenderPassDescriptor, RenderPassId, SamplerDescriptor, SamplerId, SemaphoreId,
    Submission, SurfaceFormat, SwapchainConfig, TransferCommand, UiOverlay, Viewport,
    AddressMode,
};
use crate::renderer::selection;
use crate::renderer::shaders::{
    ShaderLibrary, ShaderStage, SPRITE_FRAGMENT_SHADER, SPRITE_VERTEX_SHADER,
};
use crate::renderer::uniforms::ViewUniform;
use crate::renderer::vertex::{quad_indices, Quad, Vertex};
use crate::settings::RenderSettings;

/// Frames the CPU may record ahead of the GPU. Sizes every per-frame array.
pub const MAX_FRAMES_IN_FLIGHT: usize = 2;

/// Layer name requested when validation is enabled in the settings.
pub const VALIDATION_LAYER: &str = "VK_LAYER_KHRONOS_validation";

/// A buffer together with the memory backing it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GpuBuffer {
    pub buffer: BufferId,
    pub memory: MemoryId,
    pub size: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GpuImage {
    pub image: ImageId,
    pub memory: MemoryId,
}

/// Vertex data of one textured batch, ready to be drawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GeometryBatch {
    pub vertices: GpuBuffer,
    pub texture_set: DescriptorSetId,
    pub sprite_count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStatus {
    /// An image was acquired; the caller must finish the frame with `end_frame`.
    Ready { slot: usize, image_index: u32 },
    /// Nothing to draw into this time (swapchain rebuilt or window minimised).
    Skipped,
}

#[derive(Debug)]
struct FrameResources {
    image_available: SemaphoreId,
    render_finished: SemaphoreId,
    in_flight: FenceId,
    command_buffer: CommandBufferId,
    uniform: GpuBuffer,
    uniform_set: DescriptorSetId,
}

#[derive(Debug)]
struct Swapchain {
    format: SurfaceFormat,
    present_mode: PresentMode,
    extent: Extent2d,
    image_count: u32,
    image_views: Vec<ImageViewId>,
    framebuffers: Vec<FramebufferId>,
}

pub struct Device<B: GraphicsBackend> {
    backend: B,
    settings: RenderSettings,
    physical_device: PhysicalDeviceInfo,
    swapchain: Swapchain,
    render_pass: RenderPassId,
    uniform_layout: DescriptorSetLayoutId,
    texture_layout: DescriptorSetLayoutId,
    pipeline_layout: PipelineLayoutId,
    pipeline: PipelineId,
    command_pool: CommandPoolId,
    sampler: SamplerId,
    descriptor_pool: DescriptorPoolId,
    frames: Vec<FrameResources>,
    current_frame: usize,
    frames_presented: u64,
    last_frame_time: f32,
    acquired_image: Option<u32>,
    framebuffer_resized: bool,
    swapchain_deferred: bool,
    destroyed: bool,
}

impl<B: GraphicsBackend> Device<B> {
    pub fn new(
        mut backend: B,
        shaders: &dyn ShaderLibrary,
        settings: &RenderSettings,
    ) -> Result<Self, RenderError> {
        // 1. Instance, with every requested extension and layer checked up front.
        create_instance(&mut backend, settings)?;

        // 2. Surface.
        backend.create_surface()?;
        log::info!("Surface created successfully!");

        // 3. Physical device.
        let candidates = backend.enumerate_physical_devices()?;
        let physical_device = selection::select_physical_device(&candidates)?.clone();
        log::info!(
            "Using GPU {:?} ({:?}, score {})",
            physical_device.name,
            physical_device.device_type,
            selection::score_physical_device(&physical_device)
        );
        let graphics_family = physical_device
            .queue_families
            .graphics
            .ok_or(RenderError::NoSuitableDevice)?;

        // 4. Logical device and queues.
        backend.create_logical_device(
            physical_device.index,
            &physical_device.queue_families.unique(),
        )?;

        // 5. Swapchain.
        let mut swapchain = create_swapchain(&mut backend, settings)?;

        // 6. Shader modules.
        let vertex_code = shaders.load(SPRITE_VERTEX_SHADER, ShaderStage::Vertex)?;
        let fragment_code = shaders.load(SPRITE_FRAGMENT_SHADER, ShaderStage::Fragment)?;
        let vertex_shader = backend.create_shader_module(&vertex_code)?;
        let fragment_shader = backend.create_shader_module(&fragment_code)?;

        // 7. Render pass.
        let render_pass = backend.create_render_pass(&RenderPassDescriptor {
            color_format: swapchain.format.format,
            clear_on_load: true,
            store_on_end: true,
            final_layout: ImageLayout::PresentSrc,
        })?;

        // 8. Descriptor set layouts.
        let uniform_layout =
            backend.create_descriptor_set_layout(DescriptorKind::UniformBuffer, ShaderStage::Vertex)?;
        let texture_layout = backend.create_descriptor_set_layout(
            DescriptorKind::CombinedImageSampler,
            ShaderStage::Fragment,
        )?;

        // 9. Pipeline. The modules are only needed while it is built.
        let pipeline_layout = backend.create_pipeline_layout(&[uniform_layout, texture_layout])?;
        let pipeline = backend.create_graphics_pipeline(&PipelineDescriptor {
            vertex_shader,
            fragment_shader,
            layout: pipeline_layout,
            render_pass,
            vertex_layout: Vertex::layout(),
            cull_mode: CullMode::Back,
            front_face: FrontFace::CounterClockwise,
            blend: BlendMode::Alpha,
        })?;
        backend.destroy_shader_module(vertex_shader);
        backend.destroy_shader_module(fragment_shader);

        // 10. Framebuffers.
        swapchain.framebuffers = create_framebuffers(&mut backend, render_pass, &swapchain)?;

        // 11. Command pool and one command buffer per frame slot.
        let command_pool = backend.create_command_pool(graphics_family)?;
        let command_buffers = backend.allocate_command_buffers(command_pool, MAX_FRAMES_IN_FLIGHT)?;

        // 12. Sampler shared by every texture.
        let sampler = backend.create_sampler(&SamplerDescriptor {
            filter: Filter::Nearest,
            address_mode: AddressMode::Repeat,
            max_anisotropy: Some(physical_device.max_sampler_anisotropy),
        })?;

        // 13. Uniform buffers, descriptor pool and per-frame uniform sets.
        let descriptor_pool = backend.create_descriptor_pool(&DescriptorPoolDescriptor {
            uniform_buffers: MAX_FRAMES_IN_FLIGHT as u32,
            combined_image_samplers: settings.max_textures,
            free_individual_sets: true,
        })?;

        let mut frames = Vec::with_capacity(MAX_FRAMES_IN_FLIGHT);
        for command_buffer in command_buffers {
            let uniform = allocate_buffer(
                &mut backend,
                "view uniform",
                ViewUniform::SIZE,
                BufferUsage::UNIFORM,
                MemoryProperties::HOST_VISIBLE | MemoryProperties::HOST_COHERENT,
            )?;
            let uniform_set = backend.allocate_descriptor_set(
                descriptor_pool,
                uniform_layout,
                &DescriptorBinding::UniformBuffer {
                    buffer: uniform.buffer,
                    size: ViewUniform::SIZE,
                },
            )?;

            // 14. Sync objects; fences start signalled so the first wait returns at once.
            frames.push(FrameResources {
                image_available: backend.create_semaphore()?,
                render_finished: backend.create_semaphore()?,
                in_flight: backend.create_fence(true)?,
                command_buffer,
                uniform,
                uniform_set,
            });
        }

        log::info!(
            "Device ready: {} frames in flight, room for {} textures",
            MAX_FRAMES_IN_FLIGHT,
            settings.max_textures
        );

        Ok(Self {
            backend,
            settings: settings.clone(),
            physical_device,
            swapchain,
            render_pass,
            uniform_layout,
            texture_layout,
            pipeline_layout,
            pipeline,
            command_pool,
            sampler,
            descriptor_pool,
            frames,
            current_frame: 0,
            frames_presented: 0,
            last_frame_time: 0.0,
            acquired_image: None,
            framebuffer_resized: false,
            swapchain_deferred: false,
            destroyed: false,
        })
    }

    /// Waits for the current slot to retire and acquires the next swapchain image.
    pub fn begin_frame(&mut self, dt: f32) -> Result<FrameStatus, RenderError> {
        if self.destroyed {
            return Err(RenderError::DeviceLost);
        }
        if self.acquired_image.is_some() {
            return Err(RenderError::FrameAlreadyInProgress);
        }
        self.last_frame_time = dt;

        let slot = self.current_frame;
        let frame = &self.frames[slot];
        let (fence, image_available, command_buffer) =
            (frame.in_flight, frame.image_available, frame.command_buffer);

        self.backend.wait_for_fence(fence)?;

        if self.swapchain_deferred && !self.recreate_swapchain()? {
            log::debug!("Framebuffer has no area, skipping frame");
            return Ok(FrameStatus::Skipped);
        }

        let image_index = match self.backend.acquire_next_image(image_available)? {
            AcquireOutcome::Acquired {
                image_index,
                suboptimal,
            } => {
                if suboptimal {
                    log::debug!("Acquired image {image_index} is suboptimal");
                }
                image_index
            }
            AcquireOutcome::OutOfDate => {
                log::debug!("Swapchain out of date on acquire");
                self.recreate_swapchain()?;
                return Ok(FrameStatus::Skipped);
            }
            AcquireOutcome::Timeout => {
                log::debug!("Timed out acquiring a swapchain image");
                return Ok(FrameStatus::Skipped);
            }
        };

        // Only reset once work is guaranteed to be submitted against this fence.
        self.backend.reset_fence(fence)?;
        self.backend.reset_command_buffer(command_buffer)?;
        self.acquired_image = Some(image_index);

        Ok(FrameStatus::Ready { slot, image_index })
    }

    /// Records, submits and presents the frame begun by the last successful `begin_frame`.
    ///
    /// `geometry[i]` is drawn with `indices[i]`. The overlay, when given, records after the
    /// batches and before the render pass ends.
    pub fn end_frame(
        &mut self,
        geometry: &[GeometryBatch],
        indices: &[GpuBuffer],
        overlay: Option<&mut dyn UiOverlay<B>>,
    ) -> Result<(), RenderError> {
        if geometry.len() != indices.len() {
            return Err(RenderError::BatchMismatch {
                geometry: geometry.len(),
                indices: indices.len(),
            });
        }
        let image_index = self
            .acquired_image
            .take()
            .ok_or(RenderError::NoFrameInProgress)?;

        let commands = self.record_frame(image_index, geometry, indices)?;
        self.update_uniform_buffer()?;

        let frame = &self.frames[self.current_frame];
        let submission = Submission {
            command_buffer: frame.command_buffer,
            commands: &commands,
            wait_semaphore: frame.image_available,
            signal_semaphore: frame.render_finished,
            fence: frame.in_flight,
        };
        self.backend.submit(&submission, overlay)?;

        let outcome = self.backend.present(image_index, submission.signal_semaphore)?;
        if matches!(
            outcome,
            PresentOutcome::OutOfDate | PresentOutcome::Suboptimal
        ) || self.framebuffer_resized
        {
            log::debug!("Recreating swapchain after present ({outcome:?})");
            self.recreate_swapchain()?;
        }

        self.current_frame = (self.current_frame + 1) % MAX_FRAMES_IN_FLIGHT;
        self.frames_presented += 1;
        Ok(())
    }

    fn record_frame(
        &self,
        image_index: u32,
        geometry: &[GeometryBatch],
        indices: &[GpuBuffer],
    ) -> Result<Vec<Command>, RenderError> {
        let framebuffer = *self
            .swapchain
            .framebuffers
            .get(image_index as usize)
            .ok_or(RenderError::InvalidHandle {
                kind: FramebufferId::KIND,
                id: u64::from(image_index),
            })?;
        let extent = self.swapchain.extent;
        let uniform_set = self.frames[self.current_frame].uniform_set;

        let mut commands = Vec::with_capacity(6 + geometry.len() * 4);
        commands.push(Command::BeginRenderPass {
            render_pass: self.render_pass,
            framebuffer,
            extent,
            clear_color: self.settings.clear_color,
        });
        commands.push(Command::BindPipeline(self.pipeline));
        commands.push(Command::SetViewport(Viewport {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        }));
        commands.push(Command::SetScissor(Rect2d {
            x: 0,
            y: 0,
            extent,
        }));

        for (batch, index_buffer) in geometry.iter().zip(indices) {
            if batch.sprite_count == 0 {
                continue;
            }
            commands.push(Command::BindVertexBuffer(batch.vertices.buffer));
            commands.push(Command::BindIndexBuffer(index_buffer.buffer));
            commands.push(Command::BindDescriptorSets {
                layout: self.pipeline_layout,
                sets: vec![uniform_set, batch.texture_set],
            });
            commands.push(Command::DrawIndexed {
                index_count: batch.sprite_count * 6,
            });
        }

        commands.push(Command::RecordOverlay);
        commands.push(Command::EndRenderPass);
        Ok(commands)
    }

    fn update_uniform_buffer(&mut self) -> Result<(), RenderError> {
        let uniform = ViewUniform::new(&self.settings.camera, self.swapchain.extent);
        let memory = self.frames[self.current_frame].uniform.memory;
        self.backend
            .write_memory(memory, 0, bytemuck::bytes_of(&uniform))
    }

    /// Marks the swapchain stale; it is rebuilt after the next present.
    pub fn notify_resized(&mut self) {
        self.framebuffer_resized = true;
    }

    /// Rebuilds the swapchain and its framebuffers for the current window size.
    ///
    /// Returns `false` without touching anything while the framebuffer has no area; the
    /// rebuild is retried at the next `begin_frame`.
    pub fn recreate_swapchain(&mut self) -> Result<bool, RenderError> {
        if self.backend.framebuffer_size().is_zero() {
            self.swapchain_deferred = true;
            return Ok(false);
        }

        self.backend.wait_idle()?;
        self.cleanup_swapchain();

        let mut swapchain = create_swapchain(&mut self.backend, &self.settings)?;
        swapchain.framebuffers =
            create_framebuffers(&mut self.backend, self.render_pass, &swapchain)?;
        self.swapchain = swapchain;

        self.framebuffer_resized = false;
        self.swapchain_deferred = false;
        Ok(true)
    }

    fn cleanup_swapchain(&mut self) {
        for framebuffer in self.swapchain.framebuffers.drain(..) {
            self.backend.destroy_framebuffer(framebuffer);
        }
        for view in self.swapchain.image_views.drain(..) {
            self.backend.destroy_image_view(view);
        }
        self.backend.destroy_swapchain();
    }

    pub fn create_buffer(
        &mut self,
        label: &'static str,
        size: u64,
        usage: BufferUsage,
        properties: MemoryProperties,
    ) -> Result<GpuBuffer, RenderError> {
        allocate_buffer(&mut self.backend, label, size, usage, properties)
    }

    /// Copies `data` into a host-visible buffer.
    pub fn write_buffer(&mut self, buffer: &GpuBuffer, data: &[u8]) -> Result<(), RenderError> {
        self.backend.write_memory(buffer.memory, 0, data)
    }

    pub fn copy_buffer(&mut self, src: BufferId, dst: BufferId, size: u64) -> Result<(), RenderError> {
        self.backend.execute_one_time(
            self.command_pool,
            &[TransferCommand::CopyBuffer { src, dst, size }],
        )
    }

    /// Uploads every quad of a batch into one device-local vertex buffer.
    pub fn create_combined_vertex_buffer(&mut self, quads: &[Quad]) -> Result<GpuBuffer, RenderError> {
        if quads.is_empty() {
            return Err(RenderError::EmptyBatch);
        }
        self.upload_through_staging("sprite vertices", bytemuck::cast_slice(quads), BufferUsage::VERTEX)
    }

    /// Uploads the two-triangles-per-quad index pattern for `sprite_count` quads.
    pub fn create_index_buffer(&mut self, sprite_count: u32) -> Result<GpuBuffer, RenderError> {
        if sprite_count == 0 {
            return Err(RenderError::EmptyBatch);
        }
        let indices = quad_indices(sprite_count);
        self.upload_through_staging("sprite indices", bytemuck::cast_slice(&indices), BufferUsage::INDEX)
    }

    fn upload_through_staging(
        &mut self,
        label: &'static str,
        bytes: &[u8],
        usage: BufferUsage,
    ) -> Result<GpuBuffer, RenderError> {
        let size = bytes.len() as u64;
        let staging = self.create_buffer(
            "staging",
            size,
            BufferUsage::TRANSFER_SRC,
            MemoryProperties::HOST_VISIBLE | MemoryProperties::HOST_COHERENT,
        )?;
        let target = self.write_buffer(&staging, bytes).and_then(|()| {
            self.create_buffer(
                label,
                size,
                usage | BufferUsage::TRANSFER_DST,
                MemoryProperties::DEVICE_LOCAL,
            )
        });
        let target = match target {
            Ok(target) => target,
            Err(err) => {
                self.clear_buffer(staging);
                return Err(err);
            }
        };

        let copied = self.copy_buffer(staging.buffer, target.buffer, size);
        self.clear_buffer(staging);
        match copied {
            Ok(()) => Ok(target),
            Err(err) => {
                self.clear_buffer(target);
                Err(err)
            }
        }
    }

    /// Destroys the buffer and frees its memory. The GPU must be done reading it.
    pub fn clear_buffer(&mut self, buffer: GpuBuffer) {
        self.backend.destroy_buffer(buffer.buffer);
        self.backend.free_memory(buffer.memory);
    }

    pub fn create_image(
        &mut self,
        desc: &ImageDescriptor,
        properties: MemoryProperties,
    ) -> Result<GpuImage, RenderError> {
        let image = self.backend.create_image(desc)?;
        let requirements = self.backend.image_memory_requirements(image)?;
        let memory_type = selection::find_memory_type(
            &self.backend.memory_types(),
            requirements.type_bits,
            properties,
        )?;
        let memory = self
            .backend
            .allocate_memory(requirements.size, memory_type)?;
        self.backend.bind_image_memory(image, memory)?;
        Ok(GpuImage { image, memory })
    }

    /// Destroys the image before the memory bound to it.
    pub fn destroy_image(&mut self, image: GpuImage) {
        self.backend.destroy_image(image.image);
        self.backend.free_memory(image.memory);
    }

    pub fn create_image_view(
        &mut self,
        image: ImageId,
        format: PixelFormat,
    ) -> Result<ImageViewId, RenderError> {
        self.backend.create_image_view(image, format)
    }

    pub fn destroy_image_view(&mut self, view: ImageViewId) {
        self.backend.destroy_image_view(view);
    }

    pub fn transition_image_layout(
        &mut self,
        image: ImageId,
        from: ImageLayout,
        to: ImageLayout,
    ) -> Result<(), RenderError> {
        check_transition(from, to)?;
        self.backend.execute_one_time(
            self.command_pool,
            &[TransferCommand::TransitionImage { image, from, to }],
        )
    }

    pub fn copy_buffer_to_image(
        &mut self,
        buffer: BufferId,
        image: ImageId,
        width: u32,
        height: u32,
        bytes_per_row: u32,
    ) -> Result<(), RenderError> {
        self.backend.execute_one_time(
            self.command_pool,
            &[TransferCommand::CopyBufferToImage {
                buffer,
                image,
                width,
                height,
                bytes_per_row,
            }],
        )
    }

    /// Binds `view` and the shared sampler into a fresh set from the texture quota.
    pub fn create_texture_descriptor_set(
        &mut self,
        view: ImageViewId,
    ) -> Result<DescriptorSetId, RenderError> {
        self.backend.allocate_descriptor_set(
            self.descriptor_pool,
            self.texture_layout,
            &DescriptorBinding::CombinedImageSampler {
                view,
                sampler: self.sampler,
            },
        )
    }

    pub fn free_descriptor_set(&mut self, set: DescriptorSetId) {
        self.backend.free_descriptor_set(self.descriptor_pool, set);
    }

    pub fn image_copy_row_alignment(&self) -> u32 {
        self.backend.image_copy_row_alignment().max(1)
    }

    pub fn wait_idle(&mut self) -> Result<(), RenderError> {
        self.backend.wait_idle()
    }

    /// Frame slot the next `end_frame` will use.
    pub fn current_frame(&self) -> usize {
        self.current_frame
    }

    pub fn frame_in_progress(&self) -> bool {
        self.acquired_image.is_some()
    }

    pub fn frames_presented(&self) -> u64 {
        self.frames_presented
    }

    pub fn last_frame_time(&self) -> f32 {
        self.last_frame_time
    }

    pub fn extent(&self) -> Extent2d {
        self.swapchain.extent
    }

    pub fn surface_format(&self) -> SurfaceFormat {
        self.swapchain.format
    }

    pub fn present_mode(&self) -> PresentMode {
        self.swapchain.present_mode
    }

    pub fn swapchain_image_count(&self) -> u32 {
        self.swapchain.image_count
    }

    pub fn physical_device(&self) -> &PhysicalDeviceInfo {
        &self.physical_device
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    /// Tears every object down in dependency order. Runs at most once.
    ///
    /// Textures and batch buffers created through this device must already be gone.
    pub fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;
        self.acquired_image = None;

        if let Err(err) = self.backend.wait_idle() {
            log::error!("wait_idle failed during teardown: {err}");
        }

        for frame in &self.frames {
            self.backend.destroy_semaphore(frame.image_available);
            self.backend.destroy_semaphore(frame.render_finished);
            self.backend.destroy_fence(frame.in_flight);
        }

        // Sets go back to the pool before the pool goes.
        for frame in &self.frames {
            self.backend
                .free_descriptor_set(self.descriptor_pool, frame.uniform_set);
        }
        self.backend.destroy_descriptor_pool(self.descriptor_pool);

        for frame in &self.frames {
            self.backend.destroy_buffer(frame.uniform.buffer);
            self.backend.free_memory(frame.uniform.memory);
        }

        let command_buffers: Vec<CommandBufferId> =
            self.frames.iter().map(|frame| frame.command_buffer).collect();
        self.backend
            .free_command_buffers(self.command_pool, &command_buffers);
        self.backend.destroy_command_pool(self.command_pool);
        self.frames.clear();

        self.cleanup_swapchain();

        self.backend.destroy_sampler(self.sampler);
        self.backend.destroy_pipeline(self.pipeline);
        self.backend.destroy_pipeline_layout(self.pipeline_layout);
        self.backend.destroy_descriptor_set_layout(self.texture_layout);
        self.backend.destroy_descriptor_set_layout(self.uniform_layout);
        self.backend.destroy_render_pass(self.render_pass);

        self.backend.destroy_device();
        self.backend.destroy_surface();
        self.backend.destroy_instance();

        log::info!("Device destroyed");
    }
}

impl<B: GraphicsBackend> Drop for Device<B> {
    fn drop(&mut self) {
        self.destroy();
    }
}

fn create_instance<B: GraphicsBackend>(
    backend: &mut B,
    settings: &RenderSettings,
) -> Result<(), RenderError> {
    let extensions = backend.required_instance_extensions();
    let supported = backend.supported_instance_extensions()?;
    if let Some(missing) = selection::first_missing(&extensions, &supported) {
        return Err(RenderError::UnsupportedExtension(missing.to_string()));
    }

    let validation_layers = if settings.enable_validation {
        let layers = vec![VALIDATION_LAYER.to_string()];
        let available = backend.supported_validation_layers()?;
        if let Some(missing) = selection::first_missing(&layers, &available) {
            return Err(RenderError::UnsupportedLayer(missing.to_string()));
        }
        layers
    } else {
        Vec::new()
    };

    backend.create_instance(&InstanceConfig {
        application_name: settings.window_title.clone(),
        extensions,
        validation_layers,
    })?;
    log::info!("Instance created");
    Ok(())
}

fn create_swapchain<B: GraphicsBackend>(
    backend: &mut B,
    settings: &RenderSettings,
) -> Result<Swapchain, RenderError> {
    let support = backend.query_swapchain_support()?;
    let format = selection::choose_surface_format(&support.formats)?;
    let present_mode = settings.present_mode(&support.present_modes);
    let extent = selection::choose_extent(&support.capabilities, backend.framebuffer_size());
    let requested_images = selection::choose_image_count(&support.capabilities);

    let image_count = backend.create_swapchain(&SwapchainConfig {
        format,
        present_mode,
        extent,
        image_count: requested_images,
    })?;

    let mut image_views = Vec::with_capacity(image_count as usize);
    for image_index in 0..image_count {
        match backend.create_swapchain_image_view(image_index) {
            Ok(view) => image_views.push(view),
            Err(err) => {
                for view in image_views {
                    backend.destroy_image_view(view);
                }
                backend.destroy_swapchain();
                return Err(err);
            }
        }
    }

    log::info!(
        "Swapchain created: {}x{} {:?} {:?}, {} images",
        extent.width,
        extent.height,
        format.format,
        present_mode,
        image_count
    );

    Ok(Swapchain {
        format,
        present_mode,
        extent,
        image_count,
        image_views,
        framebuffers: Vec::new(),
    })
}

fn create_framebuffers<B: GraphicsBackend>(
    backend: &mut B,
    render_pass: RenderPassId,
    swapchain: &Swapchain,
) -> Result<Vec<FramebufferId>, RenderError> {
    swapchain
        .image_views
        .iter()
        .map(|view| backend.create_framebuffer(render_pass, *view, swapchain.extent))
        .collect()
}

fn allocate_buffer<B: GraphicsBackend>(
    backend: &mut B,
    label: &'static str,
    size: u64,
    usage: BufferUsage,
    properties: MemoryProperties,
) -> Result<GpuBuffer, RenderError> {
    let buffer = backend.create_buffer(&BufferDescriptor { label, size, usage })?;
    let requirements = backend.buffer_memory_requirements(buffer)?;
    let memory_type =
        selection::find_memory_type(&backend.memory_types(), requirements.type_bits, properties)?;
    let memory = backend.allocate_memory(requirements.size, memory_type)?;
    backend.bind_buffer_memory(buffer, memory)?;
    Ok(GpuBuffer {
        buffer,
        memory,
        size,
    })
}

fn check_transition(from: ImageLayout, to: ImageLayout) -> Result<(), RenderError> {
    match (from, to) {
        (ImageLayout::Undefined, ImageLayout::TransferDst)
        | (ImageLayout::TransferDst, ImageLayout::ShaderReadOnly) => Ok(()),
        _ => Err(RenderError::UnsupportedLayoutTransition { from, to }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upload_transitions_are_the_only_supported_ones() {
        assert!(check_transition(ImageLayout::Undefined, ImageLayout::TransferDst).is_ok());
        assert!(check_transition(ImageLayout::TransferDst, ImageLayout::ShaderReadOnly).is_ok());
        assert!(matches!(
            check_transition(ImageLayout::Undefined, ImageLayout::ShaderReadOnly),
            Err(RenderError::UnsupportedLayoutTransition { .. })
        ));
        assert!(check_transition(ImageLayout::ShaderReadOnly, ImageLayout::PresentSrc).is_err());
    }
}
