use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV_VAR: &str = "CATALYST_CONFIG";
/// Looked up in the working directory when the variable is unset.
pub const DEFAULT_CONFIG_FILE: &str = "catalyst.json";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    pub scene_path: PathBuf,

    pub window_title: String,
    pub window_width: u32,
    pub window_height: u32,

    /// Size of the offscreen color/depth attachments. They are never
    /// reallocated, larger windows are clipped to this extent.
    pub render_width: u32,
    pub render_height: u32,

    pub start_with_indirect: bool,
    pub validation: bool,
    pub vsync: bool,
    pub shader_dir: PathBuf,
    pub fence_timeout_ns: u64,

    pub scene_translation: [f32; 3],
    pub camera_position: [f32; 3],
    pub camera_speed: f32,
    pub mouse_sensitivity: f32,
    pub fov_degrees: f32,
    pub near_plane: f32,
    pub far_cull_distance: f32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            scene_path: PathBuf::from("assets/scene.glb"),
            window_title: "Catalyst Engine".to_string(),
            window_width: 1280,
            window_height: 720,
            render_width: 1920,
            render_height: 1080,
            start_with_indirect: true,
            validation: cfg!(debug_assertions),
            vsync: true,
            shader_dir: PathBuf::from("crates/catalyst_renderer/shaders/spirv"),
            fence_timeout_ns: 1_000_000_000,
            scene_translation: [0.0, 0.0, 0.0],
            camera_position: [0.0, 2.0, 8.0],
            camera_speed: 5.0,
            mouse_sensitivity: 0.002,
            fov_degrees: 45.0,
            near_plane: 0.1,
            far_cull_distance: 10_000.0,
        }
    }
}

impl EngineConfig {
    pub fn from_json_str(json: &str, origin: &Path) -> Result<Self, ConfigError> {
        serde_json::from_str(json).map_err(|source| ConfigError::Parse {
            path: origin.to_path_buf(),
            source,
        })
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&json, path)
    }

    /// `CATALYST_CONFIG`, then `./catalyst.json`, then the built-in defaults.
    /// A file that exists but does not parse is an error.
    pub fn load() -> Result<Self, ConfigError> {
        let explicit = std::env::var_os(CONFIG_ENV_VAR).map(PathBuf::from);
        Self::load_from(explicit.as_deref())
    }

    pub fn load_from(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            log::info!("Loading config from {}", path.display());
            return Self::from_file(path);
        }

        let fallback = Path::new(DEFAULT_CONFIG_FILE);
        if fallback.is_file() {
            log::info!("Loading config from {}", fallback.display());
            return Self::from_file(fallback);
        }

        log::info!("No config file found, using defaults");
        Ok(Self::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let config = EngineConfig::from_json_str(
            r#"{ "start_with_indirect": false, "window_width": 800 }"#,
            Path::new("inline"),
        )
        .unwrap();

        assert!(!config.start_with_indirect);
        assert_eq!(config.window_width, 800);
        assert_eq!(config.window_height, EngineConfig::default().window_height);
        assert_eq!(config.fence_timeout_ns, 1_000_000_000);
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        let err = EngineConfig::from_json_str("{ not json", Path::new("broken.json")).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("broken.json"));
    }

    #[test]
    fn explicit_missing_file_is_an_io_error() {
        let err = EngineConfig::load_from(Some(Path::new("definitely/not/here.json"))).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
