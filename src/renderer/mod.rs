pub mod backend;
pub mod batch;
pub mod device;
pub mod drawer;
pub mod recording;
pub mod renderer;
pub mod selection;
pub mod shaders;
pub mod sprite;
pub mod texture;
pub mod texture_cache;
pub mod uniforms;
pub mod vertex;
pub mod wgpu_backend;

pub use backend::{GraphicsBackend, UiOverlay};
pub use batch::{batch_sprites, plan_batches, TexturedBatch};
pub use device::{Device, FrameStatus, GeometryBatch, GpuBuffer, MAX_FRAMES_IN_FLIGHT};
pub use drawer::BatchDrawer;
pub use recording::{RecordingBackend, RecordingConfig};
pub use renderer::{RendererStats, SpriteRenderer};
pub use shaders::{EmbeddedShaders, FsShaders, ShaderLibrary};
pub use sprite::SpriteInfo;
pub use texture::Texture;
pub use texture_cache::TextureCache;
pub use uniforms::ViewUniform;
pub use vertex::Vertex;
pub use wgpu_backend::{WgpuBackend, WgpuOverlayTarget};
