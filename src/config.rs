//! Configuration management for CrabPreview
//!
//! Provides loading, saving and validation of the camera selection, preview
//! request and timeout settings used by the preview controller.

use crate::errors::CameraError;
use crate::types::{AeMode, AfMode, LensFacing, Size};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrabPreviewConfig {
    pub camera: CameraConfig,
    pub preview: PreviewConfig,
    pub timeouts: TimeoutConfig,
}

/// Camera selection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CameraConfig {
    /// Lens facing to look for when enumerating cameras
    pub preferred_facing: LensFacing,
    /// Aspect ratio every preview size must match [width, height]
    pub fixed_aspect: [u32; 2],
}

/// Repeating preview request settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreviewConfig {
    pub auto_focus: AfMode,
    /// Downgraded to `on` when the camera has no flash unit
    pub auto_exposure: AeMode,
}

/// Bounds on every wait the controller performs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutConfig {
    /// Camera open/close lock acquisition
    pub lock_timeout_ms: u64,
    /// Device open callback
    pub open_timeout_ms: u64,
    /// Session configured/configure-failed callback
    pub configure_timeout_ms: u64,
    /// User response to the permission prompt
    pub permission_timeout_ms: u64,
}

impl TimeoutConfig {
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    pub fn open_timeout(&self) -> Duration {
        Duration::from_millis(self.open_timeout_ms)
    }

    pub fn configure_timeout(&self) -> Duration {
        Duration::from_millis(self.configure_timeout_ms)
    }

    pub fn permission_timeout(&self) -> Duration {
        Duration::from_millis(self.permission_timeout_ms)
    }
}

impl CameraConfig {
    pub fn fixed_aspect(&self) -> Size {
        Size::new(self.fixed_aspect[0], self.fixed_aspect[1])
    }
}

impl Default for CrabPreviewConfig {
    fn default() -> Self {
        Self {
            camera: CameraConfig {
                preferred_facing: LensFacing::Back,
                fixed_aspect: [16, 9],
            },
            preview: PreviewConfig {
                auto_focus: AfMode::ContinuousPicture,
                auto_exposure: AeMode::OnAutoFlash,
            },
            timeouts: TimeoutConfig {
                lock_timeout_ms: 2500,
                open_timeout_ms: 5000,
                configure_timeout_ms: 5000,
                permission_timeout_ms: 60_000,
            },
        }
    }
}

impl CrabPreviewConfig {
    /// Load configuration from TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, CameraError> {
        let path = path.as_ref();

        if !path.exists() {
            log::info!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .map_err(|e| CameraError::Config(format!("Failed to read config file: {}", e)))?;

        let config: CrabPreviewConfig = toml::from_str(&contents)
            .map_err(|e| CameraError::Config(format!("Failed to parse config file: {}", e)))?;

        config.validate().map_err(CameraError::Config)?;

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

    /// Get default config file path
    pub fn default_path() -> PathBuf {
        PathBuf::from("crabpreview.toml")
    }

    /// Load from default location or fall back to defaults
    pub fn load_or_default() -> Self {
        Self::load_from_file(Self::default_path()).unwrap_or_else(|e| {
            log::warn!("Failed to load config, using defaults: {}", e);
            Self::default()
        })
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), String> {
        if self.camera.fixed_aspect[0] == 0 || self.camera.fixed_aspect[1] == 0 {
            return Err("Fixed aspect ratio must be non-zero".to_string());
        }

        let t = &self.timeouts;
        if t.lock_timeout_ms == 0
            || t.open_timeout_ms == 0
            || t.configure_timeout_ms == 0
            || t.permission_timeout_ms == 0
        {
            return Err("Timeouts must be greater than zero".to_string());
        }

        Ok(())
    }
}
