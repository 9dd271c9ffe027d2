// app.rs
use std::sync::Arc;
use std::time::Instant;

use winit::{
    application::ApplicationHandler,
    event::*,
    event_loop::ActiveEventLoop,
    keyboard::{Key, NamedKey},
    window::{Window, WindowId},
};

use crate::error::{AppError, RenderError};
use crate::io::VirtualFs;
use crate::renderer::{EmbeddedShaders, FrameStatus, SpriteRenderer, WgpuBackend};
use crate::settings::RenderSettings;

#[cfg(feature = "egui")]
use crate::ui::{EguiOverlay, FrameStatsHandle, FrameStatsHistory, StatsWindow};

pub type WindowRenderer = SpriteRenderer<WgpuBackend>;

/// Gameplay side of the application: queues the sprites of every frame.
pub trait SpriteScene {
    /// Called once after the renderer exists, e.g. to preload textures.
    fn setup(&mut self, renderer: &mut WindowRenderer) -> Result<(), RenderError> {
        let _ = renderer;
        Ok(())
    }

    /// Advances the scene and queues this frame's sprites.
    fn update(&mut self, dt: f32, renderer: &mut WindowRenderer);
}

pub struct App {
    settings: RenderSettings,
    scene: Box<dyn SpriteScene>,
    window: Option<Arc<Window>>,
    renderer: Option<WindowRenderer>,
    last_frame: Instant,
    error: Option<AppError>,
    #[cfg(feature = "egui")]
    overlay: Option<EguiOverlay>,
    #[cfg(feature = "egui")]
    frame_stats: FrameStatsHandle,
}

impl App {
    pub fn new(settings: RenderSettings, scene: Box<dyn SpriteScene>) -> Self {
        Self {
            settings,
            scene,
            window: None,
            renderer: None,
            last_frame: Instant::now(),
            error: None,
            #[cfg(feature = "egui")]
            overlay: None,
            #[cfg(feature = "egui")]
            frame_stats: FrameStatsHistory::handle(),
        }
    }

    /// The error that stopped the event loop, if any.
    pub fn take_error(&mut self) -> Option<AppError> {
        self.error.take()
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, err: AppError) {
        log::error!("Fatal: {err}");
        self.error = Some(err);
        self.shutdown();
        event_loop.exit();
    }

    fn init(&mut self, event_loop: &ActiveEventLoop) -> Result<(), AppError> {
        let resolution = &self.settings.resolution;
        let attributes = Window::default_attributes()
            .with_title(self.settings.window_title.clone())
            .with_inner_size(winit::dpi::PhysicalSize::new(
                resolution.width,
                resolution.height,
            ));
        let window = Arc::new(event_loop.create_window(attributes)?);

        let backend = WgpuBackend::new(Arc::clone(&window));
        let fs = VirtualFs::new(&self.settings.asset_root);
        let mut renderer =
            SpriteRenderer::new(backend, &EmbeddedShaders, Box::new(fs), &self.settings)?;
        self.scene.setup(&mut renderer)?;

        #[cfg(feature = "egui")]
        {
            let backend = renderer.device().backend();
            if let (Some(device), Some(format)) =
                (backend.wgpu_device(), backend.surface_texture_format())
            {
                let mut overlay = EguiOverlay::new(device, format, Arc::clone(&window));
                let mut stats_window = StatsWindow::new(self.frame_stats.clone());
                let mut stats_open = true;
                overlay.set_ui(move |ctx| stats_window.show(ctx, Some(&mut stats_open)));
                self.overlay = Some(overlay);
            }
        }

        window.request_redraw();
        self.window = Some(window);
        self.renderer = Some(renderer);
        Ok(())
    }

    fn redraw(&mut self) -> Result<(), AppError> {
        let Some(renderer) = self.renderer.as_mut() else {
            return Ok(());
        };

        let now = Instant::now();
        let dt = (now - self.last_frame).as_secs_f32();
        self.last_frame = now;

        self.scene.update(dt, renderer);

        if renderer.begin_frame(dt)? == FrameStatus::Skipped {
            renderer.end_frame(None)?;
            return Ok(());
        }

        #[cfg(feature = "egui")]
        {
            match self.overlay.as_mut() {
                Some(overlay) => {
                    overlay.prepare();
                    renderer.end_frame(Some(overlay))?;
                }
                None => renderer.end_frame(None)?,
            }
            if let Ok(mut history) = self.frame_stats.lock() {
                history.record(dt, renderer.stats());
            }
        }
        #[cfg(not(feature = "egui"))]
        renderer.end_frame(None)?;

        Ok(())
    }

    fn shutdown(&mut self) {
        #[cfg(feature = "egui")]
        {
            self.overlay = None;
        }
        if let Some(mut renderer) = self.renderer.take() {
            renderer.shutdown();
        }
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }
        if let Err(err) = self.init(event_loop) {
            self.fail(event_loop, err);
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, id: WindowId, event: WindowEvent) {
        let Some(window) = self.window.clone() else {
            return;
        };
        if window.id() != id {
            return;
        }

        #[cfg(feature = "egui")]
        if let Some(overlay) = self.overlay.as_mut() {
            if overlay.handle_event(&event) {
                return;
            }
        }

        match event {
            WindowEvent::CloseRequested | WindowEvent::Destroyed => {
                self.shutdown();
                event_loop.exit();
            }
            WindowEvent::Resized(_) | WindowEvent::ScaleFactorChanged { .. } => {
                if let Some(renderer) = self.renderer.as_mut() {
                    renderer.notify_resized();
                }
            }
            WindowEvent::RedrawRequested => {
                if let Err(err) = self.redraw() {
                    self.fail(event_loop, err);
                    return;
                }
                window.request_redraw();
            }
            WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        logical_key: Key::Named(NamedKey::Escape),
                        state: ElementState::Pressed,
                        ..
                    },
                ..
            } => {
                self.shutdown();
                event_loop.exit();
            }
            _ => {}
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        self.shutdown();
    }
}
