use glam::Vec3;

/// One sprite to draw this frame.
///
/// `position.z` only orders sprites: lower values are drawn first.
#[derive(Debug, Clone, PartialEq)]
pub struct SpriteInfo {
    pub position: Vec3,
    pub texture_path: String,
}

impl SpriteInfo {
    pub fn new(position: Vec3, texture_path: impl Into<String>) -> Self {
        Self {
            position,
            texture_path: texture_path.into(),
        }
    }
}
