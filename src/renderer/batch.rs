// renderer/batch.rs
use crate::asset::Handle;
use crate::error::RenderError;
use crate::renderer::backend::{DescriptorSetId, GraphicsBackend};
use crate::renderer::device::Device;
use crate::renderer::sprite::SpriteInfo;
use crate::renderer::texture::Texture;
use crate::renderer::texture_cache::TextureCache;
use crate::renderer::vertex::{translated_quad, Quad};

/// Sprites sharing a texture that can be drawn with a single indexed draw.
#[derive(Debug, Clone)]
pub struct TexturedBatch {
    pub texture_path: String,
    pub texture: Handle<Texture>,
    pub descriptor_set: DescriptorSetId,
    pub geometry: Vec<Quad>,
    pub sprite_count: u32,
}

/// A run of depth-sorted sprites that share a texture path, before any texture is loaded.
#[derive(Debug, PartialEq)]
pub struct BatchPlan<'a> {
    pub texture_path: &'a str,
    pub sprites: Vec<&'a SpriteInfo>,
}

/// Orders sprites back to front and splits them into runs of equal texture.
///
/// The sort is stable, so sprites at equal depth keep their submission order. Only
/// adjacent sprites are merged: a texture that reappears after another one starts a
/// new run rather than being pulled forward past it.
pub fn plan_batches(sprites: &[SpriteInfo]) -> Vec<BatchPlan<'_>> {
    let mut sorted: Vec<&SpriteInfo> = sprites.iter().collect();
    // Adding zero folds -0.0 into 0.0 so the two tie.
    sorted.sort_by(|a, b| (a.position.z + 0.0).total_cmp(&(b.position.z + 0.0)));

    sorted
        .chunk_by(|a, b| a.texture_path == b.texture_path)
        .map(|run| BatchPlan {
            texture_path: &run[0].texture_path,
            sprites: run.to_vec(),
        })
        .collect()
}

/// Resolves each planned run through the texture cache and builds its world-space quads.
pub fn batch_sprites<B: GraphicsBackend>(
    sprites: &[SpriteInfo],
    cache: &mut TextureCache,
    device: &mut Device<B>,
) -> Result<Vec<TexturedBatch>, RenderError> {
    plan_batches(sprites)
        .into_iter()
        .map(|plan| {
            let texture = cache.load_texture(device, plan.texture_path)?;
            let descriptor_set = cache
                .get(texture)
                .map(|t| t.descriptor_set)
                .ok_or(RenderError::InvalidHandle {
                    kind: "Texture",
                    id: texture.index() as u64,
                })?;

            let geometry: Vec<Quad> = plan
                .sprites
                .iter()
                .map(|sprite| translated_quad(sprite.position))
                .collect();

            Ok(TexturedBatch {
                texture_path: plan.texture_path.to_string(),
                texture,
                descriptor_set,
                sprite_count: geometry.len() as u32,
                geometry,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    fn sprite(z: f32, texture: &str) -> SpriteInfo {
        SpriteInfo::new(Vec3::new(0.0, 0.0, z), texture)
    }

    fn summary(plans: &[BatchPlan<'_>]) -> Vec<(String, usize)> {
        plans
            .iter()
            .map(|plan| (plan.texture_path.to_string(), plan.sprites.len()))
            .collect()
    }

    #[test]
    fn no_sprites_means_no_batches() {
        assert!(plan_batches(&[]).is_empty());
    }

    #[test]
    fn different_textures_make_separate_batches_in_depth_order() {
        let sprites = [sprite(1.0, "B"), sprite(0.0, "A")];
        let plans = plan_batches(&sprites);

        assert_eq!(summary(&plans), vec![("A".into(), 1), ("B".into(), 1)]);
    }

    #[test]
    fn same_texture_merges_into_one_batch() {
        let sprites = [sprite(0.0, "A"), sprite(1.0, "A")];
        let plans = plan_batches(&sprites);

        assert_eq!(summary(&plans), vec![("A".into(), 2)]);
    }

    #[test]
    fn interleaved_textures_are_not_regrouped() {
        let sprites = [
            sprite(0.0, "A"),
            sprite(2.0, "A"),
            sprite(1.0, "B"),
            sprite(3.0, "B"),
        ];
        let plans = plan_batches(&sprites);

        assert_eq!(
            summary(&plans),
            vec![
                ("A".into(), 1),
                ("B".into(), 1),
                ("A".into(), 1),
                ("B".into(), 1)
            ]
        );
        for pair in plans.windows(2) {
            assert_ne!(pair[0].texture_path, pair[1].texture_path);
        }
    }

    #[test]
    fn flattened_batches_are_sorted_by_depth() {
        let depths = [0.7, -1.5, 3.25, 0.0, 2.0, -0.25, 1.0];
        let textures = ["a", "b", "a", "a", "c", "b", "b"];
        let sprites: Vec<SpriteInfo> = depths
            .iter()
            .zip(textures)
            .map(|(z, texture)| sprite(*z, texture))
            .collect();

        let flattened: Vec<f32> = plan_batches(&sprites)
            .iter()
            .flat_map(|plan| plan.sprites.iter().map(|s| s.position.z))
            .collect();

        let mut expected = depths.to_vec();
        expected.sort_by(f32::total_cmp);
        assert_eq!(flattened, expected);
    }

    #[test]
    fn equal_depths_keep_submission_order() {
        let sprites = [sprite(0.0, "first"), sprite(0.0, "second"), sprite(0.0, "first")];
        let plans = plan_batches(&sprites);

        assert_eq!(
            summary(&plans),
            vec![
                ("first".into(), 1),
                ("second".into(), 1),
                ("first".into(), 1)
            ]
        );
    }

    #[test]
    fn negative_zero_depth_ties_with_zero() {
        let sprites = [sprite(0.0, "first"), sprite(-0.0, "second")];
        let plans = plan_batches(&sprites);

        assert_eq!(
            summary(&plans),
            vec![("first".into(), 1), ("second".into(), 1)]
        );
    }
}
