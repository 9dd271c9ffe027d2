pub mod app;
pub mod asset;
pub mod error;
pub mod io;
pub mod renderer;
pub mod settings;

#[cfg(feature = "egui")]
pub mod ui;

use winit::event_loop::EventLoop;

pub use app::{App, SpriteScene, WindowRenderer};
pub use error::{AppError, RenderError};
pub use settings::RenderSettings;

/// Sets up `env_logger`; `RUST_LOG` overrides the defaults. Safe to call more than once.
pub fn init_logging() {
    let _ = env_logger::Builder::new()
        .filter_level(log::LevelFilter::Info)
        .filter_module("wgpu_core", log::LevelFilter::Warn)
        .filter_module("wgpu_hal", log::LevelFilter::Warn)
        .filter_module("naga", log::LevelFilter::Warn)
        .parse_default_env()
        .try_init();
}

/// Opens a window and renders `scene` until the window closes or a fatal error occurs.
pub fn run(scene: Box<dyn SpriteScene>) -> Result<(), AppError> {
    init_logging();
    log::info!("Starting wgpu sprite renderer");

    let settings = RenderSettings::load();
    let event_loop = EventLoop::new()?;
    let mut app = App::new(settings, scene);

    let result = event_loop.run_app(&mut app);
    if let Some(err) = app.take_error() {
        return Err(err);
    }
    result?;

    log::info!("Application shutdown complete");
    Ok(())
}
