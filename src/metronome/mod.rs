// src/metronome/mod.rs

pub mod click;

pub use click::{ClickVoice, DeviceClick};

use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

use log::{info, warn};
use serde::Serialize;
use tokio::runtime::Handle;

use crate::config::EngineConfig;
use crate::engine::time::beat_interval;
use crate::error::Error;
use crate::resource::ResourceResolver;
use crate::timer::RepeatingTask;

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct MetronomeState {
    pub bpm: f64,
    pub is_running: bool,
}

impl Default for MetronomeState {
    fn default() -> Self {
        Self {
            bpm: 120.0,
            is_running: false,
        }
    }
}

/// Clicks once per beat. The first click of a run comes one full beat after
/// `start`.
pub struct Metronome {
    voice: Option<Arc<dyn ClickVoice>>,
    runtime: Handle,
    state: MetronomeState,
    timer: Option<RepeatingTask>,
}

impl Metronome {
    /// Without a voice the metronome still keeps time, silently.
    pub fn new(voice: Option<Arc<dyn ClickVoice>>, runtime: Handle) -> Self {
        Self {
            voice,
            runtime,
            state: MetronomeState::default(),
            timer: None,
        }
    }

    /// Loads the configured click sample onto its own output stream.
    pub fn with_device_click(
        resolver: &dyn ResourceResolver,
        config: &EngineConfig,
        runtime: Handle,
    ) -> Self {
        let voice = match DeviceClick::load(resolver, config) {
            Ok(click) => Some(Arc::new(click) as Arc<dyn ClickVoice>),
            Err(e) => {
                warn!("metronome will be silent: {e}");
                None
            }
        };
        Self::new(voice, runtime)
    }

    pub fn start(&mut self, bpm: f64) {
        let Some(interval) = beat_interval(bpm) else {
            warn!("{}", Error::InvalidParameter(format!("metronome tempo {bpm}")));
            return;
        };
        self.stop_timer();

        let voice = self.voice.clone();
        self.timer = Some(RepeatingTask::spawn(&self.runtime, interval, move || {
            if let Some(voice) = &voice {
                voice.trigger();
            }
            ControlFlow::Continue(())
        }));
        self.state = MetronomeState {
            bpm,
            is_running: true,
        };
        info!("✅ Metronome started at {} BPM", bpm.round() as i64);
    }

    pub fn stop(&mut self) {
        self.stop_timer();
        self.state.is_running = false;
        info!("🛑 Metronome stopped");
    }

    /// Restarts at the new tempo if running; otherwise does nothing. The beat
    /// phase restarts at the moment of the call.
    pub fn update(&mut self, bpm: f64) {
        if !self.state.is_running {
            return;
        }
        self.start(bpm);
    }

    pub fn state(&self) -> MetronomeState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state.is_running
    }

    /// Beat period of the running timer.
    pub fn interval(&self) -> Option<Duration> {
        self.timer.as_ref().map(|t| t.period())
    }

    pub fn has_voice(&self) -> bool {
        self.voice.is_some()
    }

    fn stop_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.cancel();
        }
    }
}
