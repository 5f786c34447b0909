//! Configuration management for crabshot
//!
//! Settings live in a TOML file (`crabshot.toml` by default). Any key can be
//! overridden from the environment as `CRABSHOT__<SECTION>__<KEY>`, e.g.
//! `CRABSHOT__CAPTURE__FLASH_PRECHARGE_MS=120`.

use crate::errors::CameraError;
use crate::session::request::AfMode;
use crate::types::{CameraFacing, CameraFlash};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const ENV_PREFIX: &str = "CRABSHOT";

/// Root configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct CrabShotConfig {
    pub camera: CameraConfig,
    pub capture: CaptureConfig,
    pub preview: PreviewConfig,
    pub runtime: RuntimeConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// Camera opened when the caller does not choose one
    pub default_facing: CameraFacing,
    /// Flash mode in effect right after construction
    pub default_flash: CameraFlash,
    /// Clockwise rotation applied to preview images (0, 90, 180, 270)
    pub preview_orientation: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Delay between the flash pre-charge and the still request
    pub flash_precharge_ms: u64,
    /// AF mode written into preview and still requests
    pub af_mode: AfMode,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreviewConfig {
    /// Minimum spacing between preview listener calls
    pub cooldown_ms: u64,
    /// Preview size = photo size / divisor when no preview size is set
    pub scale_divisor: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Worker threads of the preview conversion runtime
    pub preview_worker_threads: usize,
    /// How long `release` waits for the event thread to stop
    pub join_timeout_ms: u64,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            default_facing: CameraFacing::Back,
            default_flash: CameraFlash::Off,
            preview_orientation: 0,
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            flash_precharge_ms: 75,
            af_mode: AfMode::Macro,
        }
    }
}

impl Default for PreviewConfig {
    fn default() -> Self {
        Self {
            cooldown_ms: 200,
            scale_divisor: 2,
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            preview_worker_threads: 1,
            join_timeout_ms: 2000,
        }
    }
}

impl CrabShotConfig {
    /// Load configuration from TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, CameraError> {
        let path = path.as_ref();

        if !path.exists() {
            log::info!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .map_err(|e| CameraError::Config(format!("Failed to read config file: {}", e)))?;

        let config: CrabShotConfig = toml::from_str(&contents)
            .map_err(|e| CameraError::Config(format!("Failed to parse config file: {}", e)))?;

        log::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), CameraError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                CameraError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }

        let toml_string = toml::to_string_pretty(self)
            .map_err(|e| CameraError::Config(format!("Failed to serialize config: {}", e)))?;

        fs::write(path, toml_string)
            .map_err(|e| CameraError::Config(format!("Failed to write config file: {}", e)))?;

        log::info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Defaults, then the TOML file at `path` if it exists, then
    /// `CRABSHOT__*` environment variables.
    pub fn load_layered(path: Option<&Path>) -> Result<Self, CameraError> {
        Self::load_layered_with_prefix(path, ENV_PREFIX)
    }

    pub(crate) fn load_layered_with_prefix(
        path: Option<&Path>,
        prefix: &str,
    ) -> Result<Self, CameraError> {
        let defaults = config::Config::try_from(&Self::default())
            .map_err(|e| CameraError::Config(format!("Failed to build defaults: {}", e)))?;

        let mut builder = config::Config::builder().add_source(defaults);
        if let Some(path) = path {
            builder = builder.add_source(
                config::File::from(path)
                    .format(config::FileFormat::Toml)
                    .required(false),
            );
        }
        builder = builder.add_source(
            config::Environment::with_prefix(prefix)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config: CrabShotConfig = builder
            .build()
            .and_then(|built| built.try_deserialize::<CrabShotConfig>())
            .map_err(|e| CameraError::Config(format!("Failed to load configuration: {}", e)))?;
        config.validate().map_err(CameraError::Config)?;
        Ok(config)
    }

    /// Get default config file path
    pub fn default_path() -> PathBuf {
        PathBuf::from("crabshot.toml")
    }

    /// Load from default location or fall back to defaults
    pub fn load_or_default() -> Self {
        Self::load_layered(Some(&Self::default_path())).unwrap_or_else(|e| {
            log::warn!("Failed to load config, using defaults: {}", e);
            Self::default()
        })
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), String> {
        if !matches!(self.camera.preview_orientation, 0 | 90 | 180 | 270) {
            return Err("Preview orientation must be 0, 90, 180 or 270".to_string());
        }
        if self.capture.flash_precharge_ms > 5_000 {
            return Err("Flash pre-charge must be at most 5000 ms".to_string());
        }
        if self.preview.scale_divisor == 0 || self.preview.scale_divisor > 16 {
            return Err("Preview scale divisor must be between 1 and 16".to_string());
        }
        if self.runtime.preview_worker_threads == 0 || self.runtime.preview_worker_threads > 8 {
            return Err("Preview worker threads must be between 1 and 8".to_string());
        }
        if self.runtime.join_timeout_ms == 0 {
            return Err("Join timeout must be positive".to_string());
        }
        Ok(())
    }

    pub fn flash_precharge(&self) -> Duration {
        Duration::from_millis(self.capture.flash_precharge_ms)
    }

    pub fn preview_cooldown(&self) -> Duration {
        Duration::from_millis(self.preview.cooldown_ms)
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.runtime.join_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = CrabShotConfig::default();
        assert_eq!(config.capture.flash_precharge_ms, 75);
        assert_eq!(config.capture.af_mode, AfMode::Macro);
        assert_eq!(config.preview.cooldown_ms, 200);
        assert_eq!(config.preview.scale_divisor, 2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut bad = CrabShotConfig::default();
        bad.camera.preview_orientation = 45;
        assert!(bad.validate().is_err());

        let mut bad = CrabShotConfig::default();
        bad.preview.scale_divisor = 0;
        assert!(bad.validate().is_err());

        let mut bad = CrabShotConfig::default();
        bad.runtime.preview_worker_threads = 0;
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_config_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("crabshot.toml");

        let mut config = CrabShotConfig::default();
        config.camera.default_flash = CameraFlash::On;
        config.capture.af_mode = AfMode::ContinuousPicture;
        config.save_to_file(&path).unwrap();

        let loaded = CrabShotConfig::load_from_file(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_config_toml_format() {
        let toml_string = toml::to_string_pretty(&CrabShotConfig::default()).unwrap();
        assert!(toml_string.contains("[camera]"));
        assert!(toml_string.contains("[capture]"));
        assert!(toml_string.contains("[preview]"));
        assert!(toml_string.contains("[runtime]"));
        assert!(toml_string.contains("af_mode = \"macro\""));
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("crabshot.toml");
        fs::write(&path, "[capture]\nflash_precharge_ms = 120\n").unwrap();

        let loaded = CrabShotConfig::load_from_file(&path).unwrap();
        assert_eq!(loaded.capture.flash_precharge_ms, 120);
        assert_eq!(loaded.capture.af_mode, AfMode::Macro);
        assert_eq!(loaded.preview.cooldown_ms, 200);
    }

    #[test]
    fn test_load_nonexistent_file() {
        let loaded = CrabShotConfig::load_from_file("nonexistent_crabshot.toml").unwrap();
        assert_eq!(loaded, CrabShotConfig::default());
    }

    #[test]
    fn test_layered_environment_override() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("crabshot.toml");
        fs::write(&path, "[preview]\ncooldown_ms = 150\n").unwrap();

        std::env::set_var("CRABSHOT_LAYER_TEST__CAPTURE__FLASH_PRECHARGE_MS", "90");
        std::env::set_var("CRABSHOT_LAYER_TEST__CAMERA__DEFAULT_FACING", "front");
        let loaded =
            CrabShotConfig::load_layered_with_prefix(Some(&path), "CRABSHOT_LAYER_TEST").unwrap();
        std::env::remove_var("CRABSHOT_LAYER_TEST__CAPTURE__FLASH_PRECHARGE_MS");
        std::env::remove_var("CRABSHOT_LAYER_TEST__CAMERA__DEFAULT_FACING");

        assert_eq!(loaded.preview.cooldown_ms, 150);
        assert_eq!(loaded.capture.flash_precharge_ms, 90);
        assert_eq!(loaded.camera.default_facing, CameraFacing::Front);
        assert_eq!(loaded.preview.scale_divisor, 2);
    }

    #[test]
    fn test_layered_rejects_invalid_values() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("crabshot.toml");
        fs::write(&path, "[camera]\npreview_orientation = 30\n").unwrap();
        let err = CrabShotConfig::load_layered_with_prefix(Some(&path), "CRABSHOT_INVALID_TEST")
            .unwrap_err();
        assert!(matches!(err, CameraError::Config(_)));
    }
}
