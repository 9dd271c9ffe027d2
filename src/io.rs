use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::RenderError;

/// Read-only access to assets by virtual path (`textures/player.png`).
pub trait FileSystem {
    fn exists(&self, path: &str) -> bool;
    fn load(&self, path: &str) -> Result<Vec<u8>, RenderError>;
}

/// Canonical form of a virtual path: forward slashes, no leading `./` or `/`.
///
/// Returns `None` for paths that are empty once normalised.
pub fn normalize_path(path: &str) -> Option<String> {
    let mut normalized = path.replace('\\', "/");

    while let Some(stripped) = normalized.strip_prefix("./") {
        normalized = stripped.to_string();
    }

    let normalized = normalized.trim_start_matches('/');
    if normalized.is_empty() {
        None
    } else {
        Some(normalized.to_string())
    }
}

/// Maps virtual paths onto a directory on disk.
#[derive(Debug, Clone)]
pub struct VirtualFs {
    root: PathBuf,
}

impl VirtualFs {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn native_path(&self, path: &str) -> Option<PathBuf> {
        normalize_path(path).map(|relative| self.root.join(relative))
    }
}

impl FileSystem for VirtualFs {
    fn exists(&self, path: &str) -> bool {
        self.native_path(path).is_some_and(|native| native.is_file())
    }

    fn load(&self, path: &str) -> Result<Vec<u8>, RenderError> {
        let native = self
            .native_path(path)
            .ok_or_else(|| RenderError::FileNotFound(path.to_string()))?;

        std::fs::read(&native).map_err(|err| {
            if err.kind() == std::io::ErrorKind::NotFound {
                RenderError::FileNotFound(path.to_string())
            } else {
                RenderError::FileRead {
                    path: native.display().to_string(),
                    reason: err.to_string(),
                }
            }
        })
    }
}

/// In-memory file table, used for tests and assets compiled into the binary.
#[derive(Debug, Clone, Default)]
pub struct MemoryFs {
    files: HashMap<String, Vec<u8>>,
}

impl MemoryFs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: &str, bytes: impl Into<Vec<u8>>) {
        if let Some(key) = normalize_path(path) {
            self.files.insert(key, bytes.into());
        }
    }

    pub fn with_file(mut self, path: &str, bytes: impl Into<Vec<u8>>) -> Self {
        self.insert(path, bytes);
        self
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

impl FileSystem for MemoryFs {
    fn exists(&self, path: &str) -> bool {
        normalize_path(path).is_some_and(|key| self.files.contains_key(&key))
    }

    fn load(&self, path: &str) -> Result<Vec<u8>, RenderError> {
        normalize_path(path)
            .and_then(|key| self.files.get(&key).cloned())
            .ok_or_else(|| RenderError::FileNotFound(path.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_handles_separators_and_prefixes() {
        assert_eq!(
            normalize_path("textures\\ui\\button.png").as_deref(),
            Some("textures/ui/button.png")
        );
        assert_eq!(
            normalize_path("././shaders/sprite.vert.wgsl").as_deref(),
            Some("shaders/sprite.vert.wgsl")
        );
        assert_eq!(normalize_path("/a.png").as_deref(), Some("a.png"));
        assert_eq!(normalize_path(""), None);
        assert_eq!(normalize_path("./"), None);
    }

    #[test]
    fn memory_fs_resolves_equivalent_paths() {
        let fs = MemoryFs::new().with_file("textures/a.png", vec![1, 2, 3]);

        assert!(fs.exists("textures\\a.png"));
        assert!(fs.exists("./textures/a.png"));
        assert!(!fs.exists("textures/b.png"));
        assert_eq!(fs.load("/textures/a.png").unwrap(), vec![1, 2, 3]);
        assert!(matches!(
            fs.load("textures/b.png"),
            Err(RenderError::FileNotFound(_))
        ));
    }

    #[test]
    fn virtual_fs_reads_from_root() {
        let root = std::env::temp_dir().join(format!("wgpu-sprites-vfs-{}", std::process::id()));
        std::fs::create_dir_all(root.join("data")).unwrap();
        std::fs::write(root.join("data").join("hello.txt"), b"hello").unwrap();

        let fs = VirtualFs::new(&root);
        assert!(fs.exists("data\\hello.txt"));
        assert_eq!(fs.load("data/hello.txt").unwrap(), b"hello".to_vec());
        assert!(matches!(
            fs.load("data/missing.txt"),
            Err(RenderError::FileNotFound(_))
        ));
        assert!(!fs.exists(""));

        std::fs::remove_dir_all(&root).unwrap();
    }
}
