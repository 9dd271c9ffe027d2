use std::collections::HashMap;

use crate::asset::{AssetCache, Handle};
use crate::error::RenderError;
use crate::io::{normalize_path, FileSystem};
use crate::renderer::backend::GraphicsBackend;
use crate::renderer::device::Device;
use crate::renderer::texture::Texture;

/// Loads each texture path once and hands out the same handle afterwards.
///
/// Textures live until [`TextureCache::destroy_all`]; nothing is evicted.
pub struct TextureCache {
    fs: Box<dyn FileSystem>,
    textures: AssetCache<Texture>,
    by_path: HashMap<String, Handle<Texture>>,
}

impl TextureCache {
    pub fn new(fs: Box<dyn FileSystem>) -> Self {
        Self {
            fs,
            textures: AssetCache::new(),
            by_path: HashMap::new(),
        }
    }

    pub fn load_texture<B: GraphicsBackend>(
        &mut self,
        device: &mut Device<B>,
        path: &str,
    ) -> Result<Handle<Texture>, RenderError> {
        // Equivalent spellings of one file share an entry.
        let key = normalize_path(path).ok_or(RenderError::EmptyTexturePath)?;
        if let Some(handle) = self.by_path.get(&key) {
            return Ok(*handle);
        }

        let texture = Texture::load(device, self.fs.as_ref(), &key)?;
        let handle = self.textures.insert(texture);
        self.by_path.insert(key, handle);
        Ok(handle)
    }

    pub fn get(&self, handle: Handle<Texture>) -> Option<&Texture> {
        self.textures.get(handle)
    }

    pub fn handle_for(&self, path: &str) -> Option<Handle<Texture>> {
        normalize_path(path).and_then(|key| self.by_path.get(&key).copied())
    }

    pub fn len(&self) -> usize {
        self.by_path.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_path.is_empty()
    }

    pub fn file_system(&self) -> &dyn FileSystem {
        self.fs.as_ref()
    }

    /// Destroys every cached texture. Handles handed out earlier become dangling.
    pub fn destroy_all<B: GraphicsBackend>(&mut self, device: &mut Device<B>) {
        let count = self.textures.len();
        for texture in self.textures.drain() {
            texture.destroy(device);
        }
        self.by_path.clear();
        if count > 0 {
            log::info!("Released {count} cached textures");
        }
    }
}
