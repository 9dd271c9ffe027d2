use crate::error::RenderError;
use crate::io::FileSystem;

pub const SPRITE_VERTEX_SHADER: &str = "shaders/sprite.vert.wgsl";
pub const SPRITE_FRAGMENT_SHADER: &str = "shaders/sprite.frag.wgsl";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

impl ShaderStage {
    pub fn entry_point(self) -> &'static str {
        match self {
            ShaderStage::Vertex => "vs_main",
            ShaderStage::Fragment => "fs_main",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderCode {
    pub label: String,
    pub stage: ShaderStage,
    pub entry_point: String,
    pub wgsl: String,
}

impl ShaderCode {
    pub fn wgsl(label: &str, stage: ShaderStage, source: impl Into<String>) -> Self {
        Self {
            label: label.to_string(),
            stage,
            entry_point: stage.entry_point().to_string(),
            wgsl: source.into(),
        }
    }
}

/// Hands out shader code for a virtual path.
pub trait ShaderLibrary {
    fn load(&self, path: &str, stage: ShaderStage) -> Result<ShaderCode, RenderError>;
}

/// The sprite shaders compiled into the binary.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmbeddedShaders;

impl ShaderLibrary for EmbeddedShaders {
    fn load(&self, path: &str, stage: ShaderStage) -> Result<ShaderCode, RenderError> {
        let source = match path {
            SPRITE_VERTEX_SHADER => include_str!("../../assets/shaders/sprite.vert.wgsl"),
            SPRITE_FRAGMENT_SHADER => include_str!("../../assets/shaders/sprite.frag.wgsl"),
            _ => {
                return Err(RenderError::ShaderLoad {
                    path: path.to_string(),
                    reason: "no embedded shader with this path".into(),
                })
            }
        };
        Ok(ShaderCode::wgsl(path, stage, source))
    }
}

/// Reads WGSL source through a [`FileSystem`].
pub struct FsShaders<F: FileSystem> {
    fs: F,
}

impl<F: FileSystem> FsShaders<F> {
    pub fn new(fs: F) -> Self {
        Self { fs }
    }
}

impl<F: FileSystem> ShaderLibrary for FsShaders<F> {
    fn load(&self, path: &str, stage: ShaderStage) -> Result<ShaderCode, RenderError> {
        let bytes = self.fs.load(path).map_err(|err| RenderError::ShaderLoad {
            path: path.to_string(),
            reason: err.to_string(),
        })?;
        let source = String::from_utf8(bytes).map_err(|err| RenderError::ShaderLoad {
            path: path.to_string(),
            reason: err.to_string(),
        })?;
        Ok(ShaderCode::wgsl(path, stage, source))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::MemoryFs;

    #[test]
    fn embedded_shaders_expose_stage_entry_points() {
        let vertex = EmbeddedShaders
            .load(SPRITE_VERTEX_SHADER, ShaderStage::Vertex)
            .unwrap();
        assert_eq!(vertex.entry_point, "vs_main");
        assert!(vertex.wgsl.contains("fn vs_main"));

        let fragment = EmbeddedShaders
            .load(SPRITE_FRAGMENT_SHADER, ShaderStage::Fragment)
            .unwrap();
        assert!(fragment.wgsl.contains("fn fs_main"));
    }

    #[test]
    fn unknown_embedded_shader_is_an_error() {
        assert!(matches!(
            EmbeddedShaders.load("shaders/missing.wgsl", ShaderStage::Vertex),
            Err(RenderError::ShaderLoad { .. })
        ));
    }

    #[test]
    fn fs_shaders_read_and_validate_utf8() {
        let fs = MemoryFs::new()
            .with_file("shaders/a.wgsl", "@vertex fn vs_main() {}")
            .with_file("shaders/bad.wgsl", vec![0xff, 0xfe]);
        let shaders = FsShaders::new(fs);

        let code = shaders.load("shaders/a.wgsl", ShaderStage::Vertex).unwrap();
        assert_eq!(code.label, "shaders/a.wgsl");
        assert!(shaders
            .load("shaders/bad.wgsl", ShaderStage::Vertex)
            .is_err());
        assert!(shaders
            .load("shaders/none.wgsl", ShaderStage::Fragment)
            .is_err());
    }
}
