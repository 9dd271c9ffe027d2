mod common;

use glam::Vec3;

use wgpu_sprites::renderer::backend::{BufferId, Command, MemoryId};
use wgpu_sprites::renderer::vertex::{quad_indices, translated_quad, Quad};
use wgpu_sprites::renderer::{batch_sprites, SpriteInfo, TextureCache};

use common::{assert_clean, asset_fs, TEXTURE_A, TEXTURE_B};

fn sprite(z: f32, texture: &str) -> SpriteInfo {
    SpriteInfo::new(Vec3::new(z, -z, z), texture)
}

#[test]
fn no_sprites_no_batches() {
    let mut device = common::device();
    let mut cache = TextureCache::new(Box::new(asset_fs()));

    let batches = batch_sprites(&[], &mut cache, &mut device).unwrap();
    assert!(batches.is_empty());
    assert!(cache.is_empty());
}

#[test]
fn two_textures_make_two_batches_in_depth_order() {
    let mut device = common::device();
    let mut cache = TextureCache::new(Box::new(asset_fs()));

    let sprites = [sprite(1.0, TEXTURE_B), sprite(0.0, TEXTURE_A)];
    let batches = batch_sprites(&sprites, &mut cache, &mut device).unwrap();

    let summary: Vec<(&str, u32)> = batches
        .iter()
        .map(|batch| (batch.texture_path.as_str(), batch.sprite_count))
        .collect();
    assert_eq!(summary, vec![(TEXTURE_A, 1), (TEXTURE_B, 1)]);
    assert_eq!(
        batches[0].descriptor_set,
        cache.get(batches[0].texture).unwrap().descriptor_set
    );
    assert_ne!(batches[0].descriptor_set, batches[1].descriptor_set);

    cache.destroy_all(&mut device);
}

#[test]
fn one_texture_makes_one_batch() {
    let mut device = common::device();
    let mut cache = TextureCache::new(Box::new(asset_fs()));

    let sprites = [sprite(0.0, TEXTURE_A), sprite(1.0, TEXTURE_A)];
    let batches = batch_sprites(&sprites, &mut cache, &mut device).unwrap();

    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].sprite_count, 2);
    assert_eq!(
        batches[0].geometry,
        vec![
            translated_quad(sprites[0].position),
            translated_quad(sprites[1].position)
        ]
    );
    assert_eq!(cache.len(), 1);

    cache.destroy_all(&mut device);
}

#[test]
fn missing_texture_fails_the_whole_batch() {
    let mut device = common::device();
    let mut cache = TextureCache::new(Box::new(asset_fs()));

    let sprites = [sprite(0.0, TEXTURE_A), sprite(1.0, "textures/missing.png")];
    assert!(batch_sprites(&sprites, &mut cache, &mut device).is_err());

    cache.destroy_all(&mut device);
}

#[test]
fn uploaded_geometry_matches_the_batch() {
    let mut renderer = common::renderer();
    let positions = [
        Vec3::new(-1.0, 0.0, 0.0),
        Vec3::new(1.0, 0.5, 0.2),
        Vec3::new(0.0, -1.0, 0.4),
    ];
    for position in positions {
        renderer.add_sprite(SpriteInfo::new(position, TEXTURE_A));
    }
    renderer.render_frame(1.0 / 60.0, None).unwrap();

    let backend = renderer.device().backend();
    let commands = backend.submissions()[0];
    let vertex_buffer = commands
        .iter()
        .find_map(|command| match command {
            Command::BindVertexBuffer(buffer) => Some(*buffer),
            _ => None,
        })
        .unwrap();
    let index_buffer = commands
        .iter()
        .find_map(|command| match command {
            Command::BindIndexBuffer(buffer) => Some(*buffer),
            _ => None,
        })
        .unwrap();

    let expected: Vec<Quad> = positions.iter().map(|p| translated_quad(*p)).collect();
    assert_eq!(
        backend.buffer_contents(vertex_buffer).unwrap(),
        bytemuck::cast_slice::<Quad, u8>(&expected)
    );
    assert_eq!(
        backend.buffer_contents(index_buffer).unwrap(),
        bytemuck::cast_slice::<u32, u8>(&quad_indices(3))
    );
    assert_eq!(common::draw_calls(commands), vec![18]);
}

#[test]
fn interleaved_textures_bind_their_own_sets() {
    let mut renderer = common::renderer();
    for (z, texture) in [(0.0, TEXTURE_A), (1.0, TEXTURE_B), (2.0, TEXTURE_A)] {
        renderer.add_sprite(sprite(z, texture));
    }
    renderer.render_frame(1.0 / 60.0, None).unwrap();

    let cache = renderer.texture_cache();
    let set_a = cache
        .get(cache.handle_for(TEXTURE_A).unwrap())
        .unwrap()
        .descriptor_set;
    let set_b = cache
        .get(cache.handle_for(TEXTURE_B).unwrap())
        .unwrap()
        .descriptor_set;

    let backend = renderer.device().backend();
    let bound: Vec<_> = backend.submissions()[0]
        .iter()
        .filter_map(|command| match command {
            Command::BindDescriptorSets { sets, .. } => sets.last().copied(),
            _ => None,
        })
        .collect();
    assert_eq!(bound, vec![set_a, set_b, set_a]);
    assert_eq!(renderer.stats().batches, 3);
    assert_eq!(cache.len(), 2);
}

#[test]
fn failed_staging_upload_releases_its_buffers() {
    // Target buffer creation, then the staging-to-device copy.
    for (call, skip) in [("create_buffer", 1), ("execute_one_time", 0)] {
        let mut device = common::device();
        let buffers = device.backend().live_count(BufferId::KIND);
        let memory = device.backend().live_count(MemoryId::KIND);

        device.backend_mut().script_failure(call, skip);
        assert!(device.create_index_buffer(2).is_err(), "{call} #{skip}");

        assert_eq!(device.backend().live_count(BufferId::KIND), buffers, "{call} #{skip}");
        assert_eq!(device.backend().live_count(MemoryId::KIND), memory, "{call} #{skip}");
        device.destroy();
        assert_eq!(device.backend().live_total(), 0);
        assert_clean(device.backend());
    }
}
