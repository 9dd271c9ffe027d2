#![allow(dead_code)]

use std::io::Cursor;

use image::{ImageFormat, Rgba, RgbaImage};

use wgpu_sprites::io::MemoryFs;
use wgpu_sprites::renderer::recording::BackendEvent;
use wgpu_sprites::renderer::{Device, EmbeddedShaders, RecordingBackend, SpriteRenderer};
use wgpu_sprites::RenderSettings;

pub const TEXTURE_A: &str = "textures/a.png";
pub const TEXTURE_B: &str = "textures/b.png";

pub fn png(width: u32, height: u32, color: [u8; 4]) -> Vec<u8> {
    let image = RgbaImage::from_pixel(width, height, Rgba(color));
    let mut bytes = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .unwrap();
    bytes
}

pub fn asset_fs() -> MemoryFs {
    MemoryFs::new()
        .with_file(TEXTURE_A, png(4, 4, [255, 0, 0, 255]))
        .with_file(TEXTURE_B, png(2, 8, [0, 0, 255, 128]))
        .with_file("textures/broken.png", b"not an image".to_vec())
}

pub fn settings() -> RenderSettings {
    RenderSettings {
        enable_validation: true,
        max_textures: 8,
        ..RenderSettings::default()
    }
}

pub fn device() -> Device<RecordingBackend> {
    Device::new(RecordingBackend::new(), &EmbeddedShaders, &settings()).unwrap()
}

pub fn renderer_with(backend: RecordingBackend) -> SpriteRenderer<RecordingBackend> {
    SpriteRenderer::new(backend, &EmbeddedShaders, Box::new(asset_fs()), &settings()).unwrap()
}

pub fn renderer() -> SpriteRenderer<RecordingBackend> {
    renderer_with(RecordingBackend::new())
}

pub fn draw_calls(commands: &[wgpu_sprites::renderer::backend::Command]) -> Vec<u32> {
    commands
        .iter()
        .filter_map(|command| match command {
            wgpu_sprites::renderer::backend::Command::DrawIndexed { index_count } => {
                Some(*index_count)
            }
            _ => None,
        })
        .collect()
}

pub fn swapchains_created(backend: &RecordingBackend) -> usize {
    backend.count_events(|event| matches!(event, BackendEvent::CreateSwapchain(_)))
}

pub fn presents(backend: &RecordingBackend) -> usize {
    backend.count_events(|event| matches!(event, BackendEvent::Present { .. }))
}

pub fn assert_clean(backend: &RecordingBackend) {
    assert!(
        backend.violations().is_empty(),
        "unexpected violations: {:#?}",
        backend.violations()
    );
}
