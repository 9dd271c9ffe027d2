use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::renderer::backend::PresentMode;
use crate::renderer::selection;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderSettings {
    /// Upper bound on textures alive at once; sizes the descriptor pool.
    #[serde(default = "RenderSettings::default_max_textures")]
    pub max_textures: u32,
    #[serde(default)]
    pub present_mode: PresentModeSetting,
    #[serde(default)]
    pub resolution: Resolution,
    #[serde(default = "RenderSettings::default_clear_color")]
    pub clear_color: [f32; 4],
    #[serde(default)]
    pub camera: CameraSettings,
    #[serde(default = "RenderSettings::default_enable_validation")]
    pub enable_validation: bool,
    #[serde(default = "RenderSettings::default_window_title")]
    pub window_title: String,
    #[serde(default = "RenderSettings::default_asset_root")]
    pub asset_root: String,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            max_textures: Self::default_max_textures(),
            present_mode: PresentModeSetting::default(),
            resolution: Resolution::default(),
            clear_color: Self::default_clear_color(),
            camera: CameraSettings::default(),
            enable_validation: Self::default_enable_validation(),
            window_title: Self::default_window_title(),
            asset_root: Self::default_asset_root(),
        }
    }
}

impl RenderSettings {
    pub fn load() -> Self {
        Self::load_from_path("settings.json")
    }

    pub fn load_from_path<P: AsRef<std::path::Path>>(path: P) -> Self {
        use std::fs;

        let path = path.as_ref();
        match fs::read_to_string(path) {
            Ok(contents) => Self::from_json(&contents).unwrap_or_else(|err| {
                warn!(
                    "Failed to parse {:?} ({}). Falling back to default render settings.",
                    path, err
                );
                RenderSettings::default()
            }),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                info!(
                    "Render settings file {:?} not found. Using default settings.",
                    path
                );
                RenderSettings::default()
            }
            Err(err) => {
                warn!(
                    "Failed to read {:?} ({}). Falling back to default render settings.",
                    path, err
                );
                RenderSettings::default()
            }
        }
    }

    pub fn from_json(contents: &str) -> Result<Self, serde_json::Error> {
        let settings = serde_json::from_str::<RenderSettings>(contents)?;
        info!("Loaded render settings");
        Ok(settings.validate())
    }

    pub fn validate(mut self) -> Self {
        if self.max_textures == 0 {
            warn!("max_textures must be greater than zero. Using default value.");
            self.max_textures = Self::default_max_textures();
        }

        if self.resolution.width == 0 || self.resolution.height == 0 {
            warn!("Resolution must be greater than zero. Using default resolution.");
            self.resolution = Resolution::default();
        }

        if !self.camera.is_valid() {
            warn!("Camera projection parameters are invalid. Using default camera.");
            self.camera = CameraSettings::default();
        }

        self
    }

    pub fn present_mode(&self, available: &[PresentMode]) -> PresentMode {
        let desired = self.present_mode.to_present_mode();
        let chosen = selection::choose_present_mode(desired, available);
        if chosen != desired {
            warn!(
                "Requested present mode {:?} is not supported. Falling back to FIFO.",
                desired
            );
        }
        chosen
    }

    const fn default_max_textures() -> u32 {
        200
    }

    const fn default_clear_color() -> [f32; 4] {
        [0.2, 0.2, 0.2, 1.0]
    }

    const fn default_enable_validation() -> bool {
        cfg!(debug_assertions)
    }

    fn default_window_title() -> String {
        "wgpu sprites".to_string()
    }

    fn default_asset_root() -> String {
        "assets".to_string()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Default for Resolution {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraSettings {
    pub eye: [f32; 3],
    pub target: [f32; 3],
    pub fov_y_degrees: f32,
    pub near: f32,
    pub far: f32,
}

impl CameraSettings {
    fn is_valid(&self) -> bool {
        self.fov_y_degrees > 0.0
            && self.fov_y_degrees < 180.0
            && self.near > 0.0
            && self.near < self.far
            && self.eye != self.target
    }
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            eye: [0.0, 0.0, 2.0],
            target: [0.0, 0.0, 0.0],
            fov_y_degrees: 45.0,
            near: 0.1,
            far: 10.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresentModeSetting {
    Fifo,
    FifoRelaxed,
    Immediate,
    #[default]
    Mailbox,
}

impl PresentModeSetting {
    pub fn to_present_mode(self) -> PresentMode {
        match self {
            PresentModeSetting::Fifo => PresentMode::Fifo,
            PresentModeSetting::FifoRelaxed => PresentMode::FifoRelaxed,
            PresentModeSetting::Immediate => PresentMode::Immediate,
            PresentModeSetting::Mailbox => PresentMode::Mailbox,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn invalid_settings() -> RenderSettings {
        RenderSettings {
            max_textures: 0,
            resolution: Resolution {
                width: 0,
                height: 0,
            },
            camera: CameraSettings {
                near: 5.0,
                far: 1.0,
                ..CameraSettings::default()
            },
            ..RenderSettings::default()
        }
    }

    #[test]
    fn validate_replaces_invalid_values_with_defaults() {
        let validated = invalid_settings().validate();

        assert_eq!(validated.max_textures, 200);
        assert_eq!(validated.resolution.width, Resolution::default().width);
        assert_eq!(validated.resolution.height, Resolution::default().height);
        assert_eq!(validated.camera, CameraSettings::default());
    }

    #[test]
    fn validate_preserves_valid_values() {
        let valid = RenderSettings {
            max_textures: 16,
            resolution: Resolution {
                width: 1920,
                height: 1080,
            },
            present_mode: PresentModeSetting::Immediate,
            ..RenderSettings::default()
        };

        let validated = valid.clone().validate();

        assert_eq!(validated.max_textures, valid.max_textures);
        assert_eq!(validated.resolution.width, valid.resolution.width);
        assert_eq!(validated.present_mode, PresentModeSetting::Immediate);
    }

    #[test]
    fn partial_json_fills_in_defaults() {
        let settings =
            RenderSettings::from_json(r#"{ "max_textures": 8, "present_mode": "fifo" }"#).unwrap();

        assert_eq!(settings.max_textures, 8);
        assert_eq!(settings.present_mode, PresentModeSetting::Fifo);
        assert_eq!(settings.clear_color, [0.2, 0.2, 0.2, 1.0]);
        assert_eq!(settings.camera.fov_y_degrees, 45.0);
        assert_eq!(settings.asset_root, "assets");
    }

    #[test]
    fn malformed_json_is_rejected() {
        assert!(RenderSettings::from_json("{ max_textures: }").is_err());
    }

    #[test]
    fn missing_file_uses_defaults() {
        let settings = RenderSettings::load_from_path("does/not/exist/settings.json");
        assert_eq!(settings.max_textures, 200);
        assert_eq!(settings.present_mode, PresentModeSetting::Mailbox);
    }

    #[test]
    fn present_mode_returns_desired_when_available() {
        let settings = RenderSettings::default();
        let available = [PresentMode::Fifo, PresentMode::Mailbox];

        assert_eq!(settings.present_mode(&available), PresentMode::Mailbox);
    }

    #[test]
    fn present_mode_falls_back_to_fifo_when_desired_missing() {
        let settings = RenderSettings::default();
        let available = [PresentMode::Fifo, PresentMode::Immediate];

        assert_eq!(settings.present_mode(&available), PresentMode::Fifo);
    }
}
