use crate::error::RenderError;
use crate::renderer::backend::{Command, UiOverlay};

use super::{conversions, AcquiredImage, WgpuBackend};

/// What a UI overlay records into: the frame's encoder and the image being drawn.
///
/// The sprite pass has ended by the time the overlay runs, so overlays open their own
/// pass with `LoadOp::Load` on `view`.
pub struct WgpuOverlayTarget<'a> {
    pub device: &'a wgpu::Device,
    pub queue: &'a wgpu::Queue,
    pub encoder: &'a mut wgpu::CommandEncoder,
    pub view: &'a wgpu::TextureView,
    pub format: wgpu::TextureFormat,
    pub surface_size: [u32; 2],
}

fn open_pass<'a>(
    pass: &'a mut Option<wgpu::RenderPass<'static>>,
) -> Result<&'a mut wgpu::RenderPass<'static>, RenderError> {
    pass.as_mut()
        .ok_or_else(|| RenderError::Backend("draw command outside a render pass".into()))
}

impl WgpuBackend {
    /// View of the swapchain image `image_index`, which must be the acquired one.
    fn target_view(&self, image_index: u32) -> Result<&wgpu::TextureView, RenderError> {
        match &self.acquired {
            Some(AcquiredImage::Surface {
                image_index: acquired,
                view,
                ..
            }) if *acquired == image_index => Ok(view),
            Some(AcquiredImage::Offscreen {
                image_index: acquired,
            }) if *acquired == image_index => self
                .swapchain
                .as_ref()
                .and_then(|swapchain| swapchain.offscreen.get(image_index as usize))
                .ok_or_else(|| RenderError::Backend(format!("no offscreen image {image_index}"))),
            _ => Err(RenderError::Backend(format!(
                "image {image_index} has not been acquired"
            ))),
        }
    }

    /// Replays a frame's command list into a fresh encoder.
    pub(super) fn encode_frame(
        &self,
        commands: &[Command],
        mut overlay: Option<&mut dyn UiOverlay<Self>>,
    ) -> Result<wgpu::CommandBuffer, RenderError> {
        let gpu = self.gpu()?;
        let format = self
            .surface_texture_format()
            .ok_or_else(|| RenderError::Backend("no swapchain".into()))?;
        let mut encoder = gpu
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Frame encoder"),
            });

        let mut pass: Option<wgpu::RenderPass<'static>> = None;
        let mut target = None;

        for command in commands {
            match command {
                Command::BeginRenderPass {
                    render_pass,
                    framebuffer,
                    extent,
                    clear_color,
                } => {
                    if target.is_some() {
                        return Err(RenderError::Backend("render passes cannot nest".into()));
                    }
                    let desc = self
                        .render_passes
                        .get(render_pass)
                        .ok_or(render_pass.invalid())?;
                    let framebuffer = self
                        .framebuffers
                        .get(framebuffer)
                        .ok_or(framebuffer.invalid())?;
                    if *extent != framebuffer.extent {
                        return Err(RenderError::Backend(format!(
                            "render area {extent:?} does not match the framebuffer"
                        )));
                    }
                    let view = self.target_view(framebuffer.image_index)?;

                    let load = if desc.clear_on_load {
                        wgpu::LoadOp::Clear(conversions::clear_color(*clear_color))
                    } else {
                        wgpu::LoadOp::Load
                    };
                    let store = if desc.store_on_end {
                        wgpu::StoreOp::Store
                    } else {
                        wgpu::StoreOp::Discard
                    };

                    let render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                        label: Some("Sprite pass"),
                        color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                            view,
                            depth_slice: None,
                            resolve_target: None,
                            ops: wgpu::Operations { load, store },
                        })],
                        depth_stencil_attachment: None,
                        timestamp_writes: None,
                        occlusion_query_set: None,
                    });
                    pass = Some(render_pass.forget_lifetime());
                    target = Some((view, *extent));
                }
                Command::BindPipeline(id) => {
                    let pipeline = self.pipelines.get(id).ok_or(id.invalid())?;
                    open_pass(&mut pass)?.set_pipeline(pipeline);
                }
                Command::SetViewport(viewport) => {
                    open_pass(&mut pass)?.set_viewport(
                        viewport.x,
                        viewport.y,
                        viewport.width,
                        viewport.height,
                        viewport.min_depth,
                        viewport.max_depth,
                    );
                }
                Command::SetScissor(rect) => {
                    open_pass(&mut pass)?.set_scissor_rect(
                        rect.x.max(0) as u32,
                        rect.y.max(0) as u32,
                        rect.extent.width,
                        rect.extent.height,
                    );
                }
                Command::BindVertexBuffer(id) => {
                    let buffer = self.buffer(*id)?;
                    open_pass(&mut pass)?.set_vertex_buffer(0, buffer.slice(..));
                }
                Command::BindIndexBuffer(id) => {
                    let buffer = self.buffer(*id)?;
                    open_pass(&mut pass)?
                        .set_index_buffer(buffer.slice(..), wgpu::IndexFormat::Uint32);
                }
                Command::BindDescriptorSets { layout, sets } => {
                    if !self.pipeline_layouts.contains_key(layout) {
                        return Err(layout.invalid());
                    }
                    let render_pass = open_pass(&mut pass)?;
                    for (group, set) in sets.iter().enumerate() {
                        let entry = self.descriptor_sets.get(set).ok_or(set.invalid())?;
                        render_pass.set_bind_group(group as u32, &entry.bind_group, &[]);
                    }
                }
                Command::DrawIndexed { index_count } => {
                    open_pass(&mut pass)?.draw_indexed(0..*index_count, 0, 0..1);
                }
                Command::RecordOverlay => {
                    let Some(overlay) = overlay.take() else {
                        continue;
                    };
                    let (view, extent) = target.ok_or_else(|| {
                        RenderError::Backend("overlay recorded outside a render pass".into())
                    })?;

                    // The encoder is locked while the sprite pass is alive.
                    pass = None;
                    let mut context = WgpuOverlayTarget {
                        device: &gpu.device,
                        queue: &gpu.queue,
                        encoder: &mut encoder,
                        view,
                        format,
                        surface_size: [extent.width, extent.height],
                    };
                    overlay.record(&mut context);
                }
                Command::EndRenderPass => {
                    if target.take().is_none() {
                        return Err(RenderError::Backend("no render pass to end".into()));
                    }
                    pass = None;
                }
            }
        }

        if target.is_some() {
            return Err(RenderError::Backend("frame ended with an open render pass".into()));
        }
        drop(pass);
        Ok(encoder.finish())
    }
}
