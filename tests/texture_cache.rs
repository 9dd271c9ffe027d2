mod common;

use wgpu_sprites::io::MemoryFs;
use wgpu_sprites::renderer::backend::{BufferId, ImageId, ImageLayout, MemoryId};
use wgpu_sprites::renderer::{
    Device, EmbeddedShaders, RecordingBackend, RecordingConfig, TextureCache,
};
use wgpu_sprites::RenderError;

use common::{assert_clean, asset_fs, settings, TEXTURE_A, TEXTURE_B};

fn cache() -> TextureCache {
    TextureCache::new(Box::new(asset_fs()))
}

#[test]
fn same_path_loads_once() {
    let mut device = common::device();
    let mut cache = cache();

    let first = cache.load_texture(&mut device, TEXTURE_A).unwrap();
    let second = cache.load_texture(&mut device, TEXTURE_A).unwrap();
    let spelled_differently = cache.load_texture(&mut device, "./textures\\a.png").unwrap();

    assert_eq!(first, second);
    assert_eq!(first, spelled_differently);
    assert_eq!(cache.len(), 1);
    assert_eq!(device.backend().live_count(ImageId::KIND), 1);

    cache.destroy_all(&mut device);
}

#[test]
fn distinct_paths_get_distinct_textures() {
    let mut device = common::device();
    let mut cache = cache();

    let a = cache.load_texture(&mut device, TEXTURE_A).unwrap();
    let b = cache.load_texture(&mut device, TEXTURE_B).unwrap();
    assert_ne!(a, b);

    let texture_a = cache.get(a).unwrap();
    let texture_b = cache.get(b).unwrap();
    assert_eq!((texture_a.width, texture_a.height), (4, 4));
    assert_eq!((texture_b.width, texture_b.height), (2, 8));
    assert_ne!(texture_a.descriptor_set, texture_b.descriptor_set);
    assert_eq!(cache.handle_for("textures/b.png"), Some(b));
    assert_eq!(cache.handle_for("textures/none.png"), None);

    cache.destroy_all(&mut device);
}

#[test]
fn uploaded_texels_match_the_file() {
    let mut device = common::device();
    let mut cache = cache();

    let handle = cache.load_texture(&mut device, TEXTURE_B).unwrap();
    let image = cache.get(handle).unwrap().image.image;

    let backend = device.backend();
    assert_eq!(backend.image_layout(image), Some(ImageLayout::ShaderReadOnly));
    let texels = backend.image_texels(image).unwrap();
    assert_eq!(texels.len(), 2 * 8 * 4);
    assert!(texels.chunks_exact(4).all(|texel| texel == [0, 0, 255, 128]));
    assert_clean(backend);

    cache.destroy_all(&mut device);
}

#[test]
fn rows_are_padded_for_aligned_copies() {
    let config = RecordingConfig {
        image_copy_row_alignment: 256,
        ..RecordingConfig::default()
    };
    let mut device =
        Device::new(RecordingBackend::with_config(config), &EmbeddedShaders, &settings()).unwrap();
    let mut cache = cache();

    let handle = cache.load_texture(&mut device, TEXTURE_A).unwrap();
    let image = cache.get(handle).unwrap().image.image;

    let texels = device.backend().image_texels(image).unwrap();
    assert_eq!(texels.len(), 4 * 4 * 4);
    assert!(texels.chunks_exact(4).all(|texel| texel == [255, 0, 0, 255]));
    assert_clean(device.backend());

    cache.destroy_all(&mut device);
}

#[test]
fn load_failures_are_reported() {
    let mut device = common::device();
    let mut cache = cache();

    assert!(matches!(
        cache.load_texture(&mut device, ""),
        Err(RenderError::EmptyTexturePath)
    ));
    assert!(matches!(
        cache.load_texture(&mut device, "textures/missing.png"),
        Err(RenderError::FileNotFound(_))
    ));
    assert!(matches!(
        cache.load_texture(&mut device, "textures/broken.png"),
        Err(RenderError::TextureDecode { .. })
    ));
    assert!(cache.is_empty());
    assert_eq!(device.backend().live_count(ImageId::KIND), 0);
}

#[test]
fn full_descriptor_pool_fails_without_leaking() {
    let mut limited = settings();
    limited.max_textures = 1;
    let mut device = Device::new(RecordingBackend::new(), &EmbeddedShaders, &limited).unwrap();
    let mut cache = cache();

    cache.load_texture(&mut device, TEXTURE_A).unwrap();
    assert!(matches!(
        cache.load_texture(&mut device, TEXTURE_B),
        Err(RenderError::DescriptorPoolExhausted { capacity: 1 })
    ));
    assert_eq!(cache.len(), 1);
    assert_eq!(device.backend().live_count(ImageId::KIND), 1);

    cache.destroy_all(&mut device);
    device.destroy();
    assert_eq!(device.backend().live_total(), 0);
    assert_clean(device.backend());
}

#[test]
fn failed_upload_releases_staging_and_image() {
    // Image creation, then each of the three one-time submissions of an upload.
    let failures = [
        ("create_image", 0),
        ("execute_one_time", 0),
        ("execute_one_time", 1),
        ("execute_one_time", 2),
    ];

    for (call, skip) in failures {
        let mut device = common::device();
        let mut cache = cache();
        let buffers = device.backend().live_count(BufferId::KIND);
        let memory = device.backend().live_count(MemoryId::KIND);

        device.backend_mut().script_failure(call, skip);
        assert!(
            matches!(cache.load_texture(&mut device, TEXTURE_A), Err(RenderError::Backend(_))),
            "{call} #{skip} should fail the load"
        );

        assert!(cache.is_empty());
        assert_eq!(device.backend().live_count(ImageId::KIND), 0, "{call} #{skip}");
        assert_eq!(device.backend().live_count(BufferId::KIND), buffers, "{call} #{skip}");
        assert_eq!(device.backend().live_count(MemoryId::KIND), memory, "{call} #{skip}");

        // The device is still usable afterwards.
        cache.load_texture(&mut device, TEXTURE_A).unwrap();
        cache.destroy_all(&mut device);
        device.destroy();
        assert_eq!(device.backend().live_total(), 0);
        assert_clean(device.backend());
    }
}

#[test]
fn destroy_all_releases_every_texture() {
    let mut device = common::device();
    let mut cache = cache();
    let handle = cache.load_texture(&mut device, TEXTURE_A).unwrap();
    cache.load_texture(&mut device, TEXTURE_B).unwrap();

    cache.destroy_all(&mut device);

    assert!(cache.is_empty());
    assert!(cache.get(handle).is_none());
    assert_eq!(device.backend().live_count(ImageId::KIND), 0);

    // Loading again after a flush starts from scratch.
    cache.load_texture(&mut device, TEXTURE_A).unwrap();
    assert_eq!(device.backend().live_count(ImageId::KIND), 1);
    cache.destroy_all(&mut device);
    assert_clean(device.backend());
}

#[test]
fn cache_reads_through_its_file_system() {
    let fs = MemoryFs::new().with_file("sprites/dot.png", common::png(1, 1, [1, 2, 3, 4]));
    let mut cache = TextureCache::new(Box::new(fs));
    let mut device = common::device();

    assert!(cache.file_system().exists("sprites/dot.png"));
    let handle = cache.load_texture(&mut device, "sprites/dot.png").unwrap();
    assert_eq!(cache.get(handle).unwrap().path, "sprites/dot.png");

    cache.destroy_all(&mut device);
}
