use std::sync::Arc;

use egui_wgpu::ScreenDescriptor;
use winit::event::WindowEvent;
use winit::window::Window;

use crate::renderer::{UiOverlay, WgpuBackend, WgpuOverlayTarget};

pub type EguiUiCallback = Box<dyn FnMut(&egui::Context) + 'static>;

/// egui drawn on top of the sprites through the device's overlay hook.
pub struct EguiOverlay {
    ctx: egui::Context,
    state: egui_winit::State,
    renderer: egui_wgpu::Renderer,
    window: Arc<Window>,
    ui_callback: Option<EguiUiCallback>,
    pending: Option<egui::FullOutput>,
    textures: PendingTextures,
}

/// Texture updates not yet uploaded.
///
/// egui sends each texture only once, so updates from frames that were never drawn
/// carry over to the next drawn one.
#[derive(Default)]
struct PendingTextures(egui::TexturesDelta);

impl PendingTextures {
    fn push(&mut self, delta: egui::TexturesDelta) {
        self.0.append(delta);
    }

    /// Everything queued so far, or `None` while the surface has no area.
    fn take_for(&mut self, surface_size: [u32; 2]) -> Option<egui::TexturesDelta> {
        if surface_size[0] == 0 || surface_size[1] == 0 {
            return None;
        }
        Some(std::mem::take(&mut self.0))
    }
}

impl EguiOverlay {
    pub fn new(device: &wgpu::Device, output_format: wgpu::TextureFormat, window: Arc<Window>) -> Self {
        let ctx = egui::Context::default();
        let state = egui_winit::State::new(
            ctx.clone(),
            ctx.viewport_id(),
            &window,
            Some(window.scale_factor() as f32),
            None,
            Some(2048),
        );
        let renderer = egui_wgpu::Renderer::new(
            device,
            output_format,
            egui_wgpu::RendererOptions {
                depth_stencil_format: None,
                msaa_samples: 1,
                dithering: true,
                predictable_texture_filtering: false,
            },
        );

        Self {
            ctx,
            state,
            renderer,
            window,
            ui_callback: None,
            pending: None,
            textures: PendingTextures::default(),
        }
    }

    pub fn set_ui<F>(&mut self, callback: F)
    where
        F: FnMut(&egui::Context) + 'static,
    {
        self.ui_callback = Some(Box::new(callback));
    }

    /// Returns true when egui consumed the event.
    pub fn handle_event(&mut self, event: &WindowEvent) -> bool {
        self.state.on_window_event(&self.window, event).consumed
    }

    /// Runs the UI callback; the result is drawn by the next `record`.
    pub fn prepare(&mut self) {
        let raw_input = self.state.take_egui_input(&self.window);
        self.ctx.begin_pass(raw_input);
        if let Some(callback) = &mut self.ui_callback {
            callback(&self.ctx);
        }
        let mut output = self.ctx.end_pass();
        self.state
            .handle_platform_output(&self.window, output.platform_output.clone());
        self.textures
            .push(std::mem::take(&mut output.textures_delta));
        self.pending = Some(output);
    }

    pub fn context(&self) -> &egui::Context {
        &self.ctx
    }
}

impl UiOverlay<WgpuBackend> for EguiOverlay {
    fn record(&mut self, target: &mut WgpuOverlayTarget<'_>) {
        let Some(output) = self.pending.take() else {
            log::warn!("egui overlay recorded without a prepared frame");
            return;
        };
        let Some(textures) = self.textures.take_for(target.surface_size) else {
            return;
        };

        let screen = ScreenDescriptor {
            size_in_pixels: target.surface_size,
            pixels_per_point: output.pixels_per_point,
        };

        for (id, delta) in &textures.set {
            self.renderer
                .update_texture(target.device, target.queue, *id, delta);
        }
        let primitives = self.ctx.tessellate(output.shapes, output.pixels_per_point);
        self.renderer.update_buffers(
            target.device,
            target.queue,
            target.encoder,
            &primitives,
            &screen,
        );

        let pass = target.encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("egui overlay"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: target.view,
                depth_slice: None,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Load,
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        // egui-wgpu renders into a 'static pass.
        let mut pass = pass.forget_lifetime();
        self.renderer.render(&mut pass, &primitives, &screen);
        drop(pass);

        for id in &textures.free {
            self.renderer.free_texture(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use egui::{TextureId, TexturesDelta};

    fn freeing(id: u64) -> TexturesDelta {
        TexturesDelta {
            set: Vec::new(),
            free: vec![TextureId::Managed(id)],
        }
    }

    #[test]
    fn zero_sized_surface_keeps_queued_textures() {
        let mut textures = PendingTextures::default();
        textures.push(freeing(1));

        assert!(textures.take_for([0, 600]).is_none());
        assert!(textures.take_for([800, 0]).is_none());

        let delta = textures.take_for([800, 600]).unwrap();
        assert_eq!(delta.free, vec![TextureId::Managed(1)]);
        assert!(textures.take_for([800, 600]).unwrap().is_empty());
    }

    #[test]
    fn undrawn_frames_accumulate() {
        let mut textures = PendingTextures::default();
        textures.push(freeing(1));
        textures.push(freeing(2));

        let delta = textures.take_for([800, 600]).unwrap();
        assert_eq!(delta.free, vec![TextureId::Managed(1), TextureId::Managed(2)]);
    }
}
