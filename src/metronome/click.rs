// src/metronome/click.rs

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use log::{debug, info, warn};

use crate::asset::AudioAsset;
use crate::audio::{OutputFormat, OutputThread};
use crate::config::EngineConfig;
use crate::decoder::{dsp, resample};
use crate::error::{Error, Result};
use crate::resource::ResourceResolver;

/// Something that can sound one click. Called from the metronome timer.
pub trait ClickVoice: Send + Sync {
    fn trigger(&self);
}

const IDLE: usize = usize::MAX;

/// Read position into the click, in interleaved samples.
struct ClickCursor {
    position: AtomicUsize,
}

impl ClickCursor {
    fn new() -> Self {
        Self {
            position: AtomicUsize::new(IDLE),
        }
    }

    fn rewind(&self) {
        self.position.store(0, Ordering::Release);
    }
}

/// Render side of the click: plays the sample once per rewind.
struct ClickRender {
    samples: Vec<f32>,
    cursor: Arc<ClickCursor>,
}

impl ClickRender {
    fn render(&mut self, out: &mut [f32]) {
        out.fill(0.0);
        let pos = self.cursor.position.load(Ordering::Acquire);
        if pos >= self.samples.len() {
            return;
        }
        let n = (self.samples.len() - pos).min(out.len());
        out[..n].copy_from_slice(&self.samples[pos..pos + n]);
        // A rewind that landed meanwhile wins.
        let _ = self.cursor.position.compare_exchange(
            pos,
            pos + n,
            Ordering::AcqRel,
            Ordering::Relaxed,
        );
    }
}

fn click_for_device(asset: &AudioAsset, format: OutputFormat) -> Vec<f32> {
    let mixed = dsp::updown_mix_interleaved(asset.samples(), asset.channels(), format.channels);
    match resample::resample_interleaved(
        &mixed,
        format.channels,
        asset.sample_rate(),
        format.sample_rate,
    ) {
        Ok(samples) => samples,
        Err(e) => {
            warn!("click not resampled, playing at native rate: {e:#}");
            mixed
        }
    }
}

/// Click sample played on its own output stream.
pub struct DeviceClick {
    cursor: Arc<ClickCursor>,
    _output: OutputThread,
}

impl DeviceClick {
    /// Resolves and decodes the configured click sample, then opens output.
    pub fn load(resolver: &dyn ResourceResolver, config: &EngineConfig) -> Result<Self> {
        let path = resolver
            .resolve(&config.click_resource, &config.click_extension)
            .ok_or_else(|| Error::ResourceMissing {
                name: config.click_resource.clone(),
                extension: config.click_extension.clone(),
            })?;
        let asset = AudioAsset::decode_file(&config.click_resource, &path)?;
        Self::open(asset)
    }

    pub fn open(asset: AudioAsset) -> Result<Self> {
        let cursor = Arc::new(ClickCursor::new());
        let render_cursor = cursor.clone();
        let name = asset.name().to_string();

        let output = OutputThread::spawn("metronome-output", move |format: OutputFormat| {
            let mut click = ClickRender {
                samples: click_for_device(&asset, format),
                cursor: render_cursor,
            };
            move |out: &mut [f32]| click.render(out)
        })
        .map_err(|e| Error::EngineStart(format!("{e:#}")))?;

        info!("🥁 Click '{name}' ready");
        Ok(Self {
            cursor,
            _output: output,
        })
    }
}

impl ClickVoice for DeviceClick {
    fn trigger(&self) {
        self.cursor.rewind();
        debug!("click");
    }
}
