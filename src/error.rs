use thiserror::Error;

/// Every failure the rendering core can report.
///
/// Apart from swapchain invalidation (handled internally by recreation) these are all
/// unrecoverable: the application shell logs them and shuts down.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("required instance extension {0:?} is not supported")]
    UnsupportedExtension(String),
    #[error("requested validation layer {0:?} is not available")]
    UnsupportedLayer(String),
    #[error("no suitable GPU found")]
    NoSuitableDevice,
    #[error("surface reports no supported formats")]
    NoSurfaceFormat,
    #[error("no memory type matches bits {type_bits:#b} with properties {properties}")]
    NoSuitableMemoryType { type_bits: u32, properties: String },
    #[error("failed to load shader {path}: {reason}")]
    ShaderLoad { path: String, reason: String },
    #[error("failed to compile shader {label}: {reason}")]
    ShaderCompile { label: String, reason: String },
    #[error("file not found: {0}")]
    FileNotFound(String),
    #[error("failed to read {path}: {reason}")]
    FileRead { path: String, reason: String },
    #[error("failed to decode texture {path}: {reason}")]
    TextureDecode { path: String, reason: String },
    #[error("texture path must not be empty")]
    EmptyTexturePath,
    #[error("invalid {kind} handle {id}")]
    InvalidHandle { kind: &'static str, id: u64 },
    #[error("unsupported image layout transition {from:?} -> {to:?}")]
    UnsupportedLayoutTransition {
        from: crate::renderer::backend::ImageLayout,
        to: crate::renderer::backend::ImageLayout,
    },
    #[error("begin_frame called while a frame is already in progress")]
    FrameAlreadyInProgress,
    #[error("end_frame called without a successful begin_frame")]
    NoFrameInProgress,
    #[error("{geometry} geometry buffers but {indices} index buffers")]
    BatchMismatch { geometry: usize, indices: usize },
    #[error("cannot create a buffer for an empty batch")]
    EmptyBatch,
    #[error("descriptor pool exhausted ({capacity} sets of this kind)")]
    DescriptorPoolExhausted { capacity: u32 },
    #[error("fence {0} was waited on but never submitted")]
    FenceNeverSubmitted(u64),
    #[error("device has already been destroyed")]
    DeviceLost,
    #[error("graphics backend error: {0}")]
    Backend(String),
}

impl RenderError {
    pub(crate) fn backend(context: &str, err: impl std::fmt::Display) -> Self {
        RenderError::Backend(format!("{context}: {err}"))
    }
}

/// Why the windowed application stopped.
#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    EventLoop(#[from] winit::error::EventLoopError),
    #[error("failed to create window: {0}")]
    Window(#[from] winit::error::OsError),
    #[error(transparent)]
    Render(#[from] RenderError),
}
