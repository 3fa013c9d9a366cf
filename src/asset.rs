// src/asset.rs

use std::path::Path;
use std::time::Duration;

use crate::decoder;
use crate::error::Result;

/// Immutable decoded audio. Interleaved f32 at the file's native rate.
#[derive(Debug)]
pub struct AudioAsset {
    name: String,
    sample_rate: u32,
    channels: usize,
    samples: Vec<f32>,
}

impl AudioAsset {
    pub fn from_interleaved(
        name: impl Into<String>,
        samples: Vec<f32>,
        sample_rate: u32,
        channels: usize,
    ) -> Self {
        let channels = channels.max(1);
        let mut samples = samples;
        // Drop a trailing partial frame.
        samples.truncate(samples.len() / channels * channels);
        Self {
            name: name.into(),
            sample_rate,
            channels,
            samples,
        }
    }

    /// Decodes the whole file up front; no partial asset is ever returned.
    pub fn decode_file(name: &str, path: &Path) -> Result<Self> {
        decoder::decode_asset(name, path)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn total_frames(&self) -> u64 {
        (self.samples.len() / self.channels) as u64
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// `total_frames / sample_rate` in seconds.
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.total_frames() as f64 / self.sample_rate as f64
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.duration_secs())
    }
}
