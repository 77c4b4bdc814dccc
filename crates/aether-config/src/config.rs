//! Configuration structs with sensible defaults and RON persistence.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

const CONFIG_FILE: &str = "config.ron";

/// Top-level renderer configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Render target and shader lookup settings.
    pub render: RenderConfig,
    /// Initial atmosphere effect parameters.
    pub atmosphere: AtmosphereConfig,
    /// Debug/development settings.
    pub debug: DebugConfig,
}

/// Render target and shader lookup settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RenderConfig {
    /// Offscreen render target width in pixels.
    pub target_width: u32,
    /// Offscreen render target height in pixels.
    pub target_height: u32,
    /// Color target format name: `"rgba8unorm"`, `"rgba8unorm-srgb"`, `"bgra8unorm"`
    /// or `"bgra8unorm-srgb"`.
    pub color_format: String,
    /// Attach a depth buffer to the atmosphere pass.
    pub depth_enabled: bool,
    /// Directory searched for `.wgsl` overrides. Bundled shaders are used when unset.
    pub shader_dir: Option<PathBuf>,
}

/// Starting values pushed into the atmosphere effect each frame.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AtmosphereConfig {
    /// Direction the sunlight travels, world space.
    pub light_dir: [f32; 3],
    /// Camera forward vector.
    pub camera_look_at: [f32; 3],
    /// Camera right vector.
    pub camera_right: [f32; 3],
    /// Multiplier applied to wall-clock seconds before `g_Time` is written.
    pub time_scale: f32,
}

/// Debug/development configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DebugConfig {
    /// Log level override (e.g., "debug", "info", "warn").
    pub log_level: String,
    /// Attach debug labels to GPU objects.
    pub label_gpu_objects: bool,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            target_width: 1280,
            target_height: 720,
            color_format: "rgba8unorm-srgb".to_string(),
            depth_enabled: false,
            shader_dir: None,
        }
    }
}

impl Default for AtmosphereConfig {
    fn default() -> Self {
        Self {
            light_dir: [0.0, -0.5, 0.866],
            camera_look_at: [0.0, 0.0, 1.0],
            camera_right: [1.0, 0.0, 0.0],
            time_scale: 1.0,
        }
    }
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            label_gpu_objects: cfg!(debug_assertions),
        }
    }
}

/// Per-user config directory for Aether (`<config_dir>/aether`).
pub fn default_config_dir() -> Result<PathBuf, ConfigError> {
    dirs::config_dir()
        .map(|dir| dir.join("aether"))
        .ok_or(ConfigError::NoConfigDir)
}

// --- Load / Save / Reload ---

impl Config {
    /// Load config from the given directory, or create a default config file.
    pub fn load_or_create(config_dir: &Path) -> Result<Self, ConfigError> {
        let config_path = config_dir.join(CONFIG_FILE);

        if config_path.exists() {
            let config = Self::read(&config_path)?;
            log::info!("Loaded config from {}", config_path.display());
            Ok(config)
        } else {
            let config = Config::default();
            config.save(config_dir)?;
            log::info!("Created default config at {}", config_path.display());
            Ok(config)
        }
    }

    /// Save config to the given directory as `config.ron`.
    pub fn save(&self, config_dir: &Path) -> Result<(), ConfigError> {
        std::fs::create_dir_all(config_dir).map_err(ConfigError::WriteError)?;

        let pretty = ron::ser::PrettyConfig::new()
            .depth_limit(3)
            .separate_tuple_members(true)
            .enumerate_arrays(false);
        let serialized =
            ron::ser::to_string_pretty(self, pretty).map_err(ConfigError::SerializeError)?;

        std::fs::write(config_dir.join(CONFIG_FILE), serialized)
            .map_err(ConfigError::WriteError)
    }

    /// Hot-reload: returns `Some(new_config)` if the file changed, `None` otherwise.
    pub fn reload(&self, config_dir: &Path) -> Result<Option<Self>, ConfigError> {
        let new_config = Self::read(&config_dir.join(CONFIG_FILE))?;

        if &new_config != self {
            log::info!("Config reloaded with changes");
            Ok(Some(new_config))
        } else {
            Ok(None)
        }
    }

    fn read(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(ConfigError::ReadError)?;
        ron::from_str(&contents).map_err(ConfigError::ParseError)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_serializes() {
        let config = Config::default();
        let ron_str =
            ron::ser::to_string_pretty(&config, ron::ser::PrettyConfig::new().depth_limit(3))
                .unwrap();
        assert!(ron_str.contains("target_width: 1280"));
        assert!(ron_str.contains("time_scale: 1.0"));
    }

    #[test]
    fn test_missing_section_uses_default() {
        let config: Config = ron::from_str("(render: (target_width: 640))").unwrap();
        assert_eq!(config.render.target_width, 640);
        assert_eq!(config.render.target_height, 720);
        assert_eq!(config.atmosphere, AtmosphereConfig::default());
    }

    #[test]
    fn test_extra_field_ignored() {
        let result: Result<Config, _> = ron::from_str("(future_setting: true)");
        assert!(result.is_ok());
    }

    #[test]
    fn test_shader_dir_parses_as_optional_path() {
        let config: Config = ron::from_str(r#"(render: (shader_dir: Some("assets/shaders")))"#)
            .unwrap();
        assert_eq!(
            config.render.shader_dir,
            Some(PathBuf::from("assets/shaders"))
        );
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.render.target_width = 1920;
        config.atmosphere.light_dir = [0.0, -1.0, 0.0];

        config.save(dir.path()).unwrap();
        let loaded = Config::load_or_create(dir.path()).unwrap();
        assert_eq!(config, loaded);
    }

    #[test]
    fn test_load_or_create_writes_default_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_or_create(dir.path()).unwrap();
        assert_eq!(config, Config::default());
        assert!(dir.path().join(CONFIG_FILE).exists());
    }

    #[test]
    fn test_reload_detects_changes() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::default();
        config.save(dir.path()).unwrap();

        let mut modified = config.clone();
        modified.atmosphere.time_scale = 0.25;
        modified.save(dir.path()).unwrap();

        let reloaded = config.reload(dir.path()).unwrap();
        assert_eq!(reloaded.unwrap().atmosphere.time_scale, 0.25);
    }

    #[test]
    fn test_reload_no_changes() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::default();
        config.save(dir.path()).unwrap();

        assert!(config.reload(dir.path()).unwrap().is_none());
    }

    #[test]
    fn test_invalid_ron_produces_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), "{{not valid}}").unwrap();
        let result = Config::load_or_create(dir.path());
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }
}
