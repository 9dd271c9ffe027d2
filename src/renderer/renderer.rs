// renderer/renderer.rs
use crate::asset::Handle;
use crate::error::RenderError;
use crate::io::FileSystem;
use crate::renderer::backend::{GraphicsBackend, UiOverlay};
use crate::renderer::batch::batch_sprites;
use crate::renderer::device::{Device, FrameStatus};
use crate::renderer::drawer::BatchDrawer;
use crate::renderer::shaders::ShaderLibrary;
use crate::renderer::sprite::SpriteInfo;
use crate::renderer::texture::Texture;
use crate::renderer::texture_cache::TextureCache;
use crate::settings::RenderSettings;

/// Counters describing the last frame that reached `end_frame`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RendererStats {
    pub sprites: usize,
    pub batches: usize,
    pub draw_calls: usize,
    pub frame_index: u64,
}

/// Ties the device, texture cache and batch drawer into a per-frame sprite API.
pub struct SpriteRenderer<B: GraphicsBackend> {
    device: Device<B>,
    textures: TextureCache,
    drawer: BatchDrawer,
    sprites: Vec<SpriteInfo>,
    frame: Option<FrameStatus>,
    stats: RendererStats,
    shut_down: bool,
}

impl<B: GraphicsBackend> SpriteRenderer<B> {
    pub fn new(
        backend: B,
        shaders: &dyn ShaderLibrary,
        fs: Box<dyn FileSystem>,
        settings: &RenderSettings,
    ) -> Result<Self, RenderError> {
        let device = Device::new(backend, shaders, settings)?;
        Ok(Self {
            device,
            textures: TextureCache::new(fs),
            drawer: BatchDrawer::new(),
            sprites: Vec::new(),
            frame: None,
            stats: RendererStats::default(),
            shut_down: false,
        })
    }

    /// Queues a sprite for the current frame. The queue is emptied by `end_frame`.
    pub fn add_sprite(&mut self, sprite: SpriteInfo) {
        self.sprites.push(sprite);
    }

    pub fn queued_sprites(&self) -> &[SpriteInfo] {
        &self.sprites
    }

    /// Loads a texture ahead of the first frame that uses it.
    pub fn preload_texture(&mut self, path: &str) -> Result<Handle<Texture>, RenderError> {
        self.textures.load_texture(&mut self.device, path)
    }

    pub fn begin_frame(&mut self, dt: f32) -> Result<FrameStatus, RenderError> {
        if self.frame.is_some() {
            return Err(RenderError::FrameAlreadyInProgress);
        }
        let status = self.device.begin_frame(dt)?;
        self.frame = Some(status);
        Ok(status)
    }

    /// Batches the queued sprites, draws them and presents.
    ///
    /// When `begin_frame` skipped the frame the queue is dropped without drawing.
    pub fn end_frame(&mut self, overlay: Option<&mut dyn UiOverlay<B>>) -> Result<(), RenderError> {
        let status = self.frame.take().ok_or(RenderError::NoFrameInProgress)?;
        let sprites = std::mem::take(&mut self.sprites);

        if status == FrameStatus::Skipped {
            log::debug!("Frame skipped, dropping {} queued sprites", sprites.len());
            return Ok(());
        }

        let batches = batch_sprites(&sprites, &mut self.textures, &mut self.device)?;
        self.drawer.draw(&mut self.device, &batches, overlay)?;

        self.stats = RendererStats {
            sprites: sprites.len(),
            batches: batches.len(),
            draw_calls: batches.iter().filter(|b| b.sprite_count > 0).count(),
            frame_index: self.device.frames_presented(),
        };
        Ok(())
    }

    /// Runs `begin_frame` and `end_frame` back to back.
    pub fn render_frame(
        &mut self,
        dt: f32,
        overlay: Option<&mut dyn UiOverlay<B>>,
    ) -> Result<FrameStatus, RenderError> {
        let status = self.begin_frame(dt)?;
        self.end_frame(overlay)?;
        Ok(status)
    }

    pub fn notify_resized(&mut self) {
        self.device.notify_resized();
    }

    pub fn stats(&self) -> RendererStats {
        self.stats
    }

    pub fn texture_cache(&self) -> &TextureCache {
        &self.textures
    }

    pub fn drawer(&self) -> &BatchDrawer {
        &self.drawer
    }

    pub fn device(&self) -> &Device<B> {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut Device<B> {
        &mut self.device
    }

    /// Releases batch buffers, then cached textures, then the device itself.
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;
        self.frame = None;
        self.sprites.clear();

        self.drawer.release_all(&mut self.device);
        self.textures.destroy_all(&mut self.device);
        self.device.destroy();
    }
}

impl<B: GraphicsBackend> Drop for SpriteRenderer<B> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
