use glam::Vec3;
use rand::{rngs::SmallRng, Rng, SeedableRng};

use wgpu_sprites::renderer::SpriteInfo;
use wgpu_sprites::{RenderError, SpriteScene, WindowRenderer};

const SPRITE_COUNT: usize = 24;
const FIELD_HALF_SIZE: f32 = 1.0;
const DEPTH_RANGE: std::ops::Range<f32> = -1.5..0.5;
const DRIFT_SPEED_RANGE: std::ops::Range<f32> = 0.2..0.8;
const TEXTURES: [&str; 2] = ["textures/crate.png", "textures/gem.png"];

struct DriftingSprite {
    origin: Vec3,
    speed: f32,
    phase: f32,
    texture: &'static str,
}

/// Two textures scattered over interleaved depths, bobbing up and down.
pub struct SpriteField {
    sprites: Vec<DriftingSprite>,
    elapsed: f32,
}

impl SpriteField {
    pub fn new(seed: u64) -> Self {
        let mut rng = SmallRng::seed_from_u64(seed);
        let sprites = (0..SPRITE_COUNT)
            .map(|i| DriftingSprite {
                origin: Vec3::new(
                    rng.gen_range(-FIELD_HALF_SIZE..FIELD_HALF_SIZE),
                    rng.gen_range(-FIELD_HALF_SIZE..FIELD_HALF_SIZE),
                    rng.gen_range(DEPTH_RANGE),
                ),
                speed: rng.gen_range(DRIFT_SPEED_RANGE),
                phase: rng.gen_range(0.0..std::f32::consts::TAU),
                texture: TEXTURES[i % TEXTURES.len()],
            })
            .collect();

        Self {
            sprites,
            elapsed: 0.0,
        }
    }
}

impl Default for SpriteField {
    fn default() -> Self {
        Self::new(0x5EED_CAFE)
    }
}

impl SpriteScene for SpriteField {
    fn setup(&mut self, renderer: &mut WindowRenderer) -> Result<(), RenderError> {
        for texture in TEXTURES {
            renderer.preload_texture(texture)?;
        }
        Ok(())
    }

    fn update(&mut self, dt: f32, renderer: &mut WindowRenderer) {
        self.elapsed += dt;
        for sprite in &self.sprites {
            let bob = (self.elapsed * sprite.speed + sprite.phase).sin() * 0.25;
            renderer.add_sprite(SpriteInfo::new(
                sprite.origin + Vec3::new(0.0, bob, 0.0),
                sprite.texture,
            ));
        }
    }
}
