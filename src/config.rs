// src/config.rs

use std::fs;
use std::path::Path;
use std::time::Duration;

use log::warn;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Tunables for the transport engine and metronome.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Position sampler period.
    pub poll_interval_ms: u64,
    /// Grain length of the time/pitch stage.
    pub grain_ms: u32,
    /// Capacity of the control -> render command queue.
    pub command_queue_capacity: usize,
    pub asset_extension: String,
    pub click_resource: String,
    pub click_extension: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 50,
            grain_ms: 40,
            command_queue_capacity: 64,
            asset_extension: "wav".to_string(),
            click_resource: "click".to_string(),
            click_extension: "wav".to_string(),
        }
    }
}

impl EngineConfig {
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn from_json_str(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_ms == 0 {
            return Err(Error::Config("poll_interval_ms must be > 0".into()));
        }
        if self.grain_ms == 0 {
            return Err(Error::Config("grain_ms must be > 0".into()));
        }
        if self.command_queue_capacity < 4 {
            return Err(Error::Config("command_queue_capacity must be >= 4".into()));
        }
        Ok(())
    }

    /// Returns `self` if valid, otherwise logs and falls back to defaults.
    pub fn validated_or_default(self) -> Self {
        match self.validate() {
            Ok(()) => self,
            Err(e) => {
                warn!("{e}; using default engine config");
                Self::default()
            }
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Grain length in frames at `sample_rate`, rounded up to an even count.
    pub fn grain_frames(&self, sample_rate: u32) -> usize {
        let frames = (sample_rate as u64 * self.grain_ms as u64 / 1000).max(2) as usize;
        frames + (frames & 1)
    }
}
