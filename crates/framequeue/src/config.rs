//! # Demo Configuration
//!
//! Loaded once at startup from an optional TOML file. Every field has a
//! default, so an empty file is a valid configuration.
//!
//! ```toml
//! frames = 600
//! target_fps = 30
//! cube_count = 2000
//! log_filter = "framequeue=debug"
//! ```

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{ConfigError, ConfigResult};

/// Configuration for a demo run.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DemoConfig {
    /// Frames to run before stopping. 0 runs until the process is killed.
    pub frames: u64,
    /// Frame rate the coordinator paces to.
    pub target_fps: u32,
    /// Cubes spawned when the game logic thread starts.
    pub cube_count: usize,
    /// Cubes added or removed at each step.
    pub cube_step: usize,
    /// Frames between steps. 0 disables stepping.
    pub step_every: u64,
    /// Simulated physics work per frame, in milliseconds.
    pub physics_work_ms: u64,
    /// Bytes pre-allocated by every command queue.
    pub initial_queue_bytes: usize,
    /// `tracing` filter used when `RUST_LOG` is not set.
    pub log_filter: String,
    /// Seed for cube generation. 0 picks one from the clock.
    pub seed: u64,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            frames: 300,
            target_fps: 60,
            cube_count: 5000,
            cube_step: 100,
            step_every: 120,
            physics_work_ms: 5,
            initial_queue_bytes: 0,
            log_filter: "info".to_owned(),
            seed: 0,
        }
    }
}

impl DemoConfig {
    /// Reads and validates a configuration file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, is not valid TOML, or
    /// fails [`validate`](Self::validate).
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Parses and validates a configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not valid TOML or fails
    /// [`validate`](Self::validate).
    pub fn from_toml_str(text: &str) -> ConfigResult<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks value ranges.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if `target_fps` is zero.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.target_fps == 0 {
            return Err(ConfigError::Invalid("target_fps must be non-zero".to_owned()));
        }
        Ok(())
    }

    /// Wall time one frame may take at `target_fps`.
    #[must_use]
    pub fn frame_budget(&self) -> Duration {
        Duration::from_secs(1) / self.target_fps.max(1)
    }

    /// Simulated physics work per frame.
    #[must_use]
    pub fn physics_work(&self) -> Duration {
        Duration::from_millis(self.physics_work_ms)
    }
}
