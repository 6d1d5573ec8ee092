// SPDX-License-Identifier: GPL-3.0-only

//! Persistent settings
//!
//! Stored as JSON under the user config directory. Missing fields fall back
//! to their defaults so older files keep loading.

use crate::constants::{DEFAULT_IR_CAMERA_ID, DEFAULT_RGB_CAMERA_ID, MIN_CALLBACK_BUFFERS, synthetic};
use crate::errors::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Directory name under the user config directory
const APP_DIR: &str = "dualcam";

const CONFIG_FILE: &str = "config.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Logical index of the visible light camera
    pub rgb_camera_id: u32,
    /// Logical index of the infrared camera
    pub ir_camera_id: u32,
    /// Extra clockwise rotation of the preview, in degrees
    pub orientation_degrees: i32,
    /// Mirror the preview horizontally
    pub mirror: bool,
    /// Callback buffers per camera (at least three)
    pub buffer_count: usize,
    /// Frame rate of the synthetic cameras
    pub synthetic_fps: u32,
    /// Log filter used when `RUST_LOG` is unset (e.g. "dualcam=debug")
    pub log_filter: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            rgb_camera_id: DEFAULT_RGB_CAMERA_ID,
            ir_camera_id: DEFAULT_IR_CAMERA_ID,
            orientation_degrees: 0,
            mirror: false,
            buffer_count: MIN_CALLBACK_BUFFERS,
            synthetic_fps: synthetic::DEFAULT_FPS,
            log_filter: None,
        }
    }
}

impl Config {
    /// Default location of the config file
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(APP_DIR).join(CONFIG_FILE))
    }

    /// Read a config file
    pub fn load(path: &Path) -> AppResult<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&text)?;
        config.validate()?;
        debug!(path = %path.display(), "Loaded config");
        Ok(config)
    }

    /// Read the config from the default location
    ///
    /// A missing file or config directory gives the defaults.
    pub fn load_default() -> AppResult<Self> {
        match Self::default_path() {
            Some(path) if path.exists() => Self::load(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Write the config, creating parent directories
    pub fn save(&self, path: &Path) -> AppResult<()> {
        self.validate()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let text = serde_json::to_string_pretty(self)?;
        std::fs::write(path, text)?;
        debug!(path = %path.display(), "Saved config");
        Ok(())
    }

    pub fn validate(&self) -> AppResult<()> {
        if self.rgb_camera_id == self.ir_camera_id {
            return Err(AppError::Config(format!(
                "RGB and IR cameras share index {}",
                self.rgb_camera_id
            )));
        }
        if self.buffer_count < MIN_CALLBACK_BUFFERS {
            return Err(AppError::Config(format!(
                "buffer_count must be at least {}",
                MIN_CALLBACK_BUFFERS
            )));
        }
        if self.synthetic_fps == 0 {
            return Err(AppError::Config("synthetic_fps must be positive".into()));
        }
        Ok(())
    }
}
