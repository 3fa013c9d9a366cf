// src/session.rs

use std::sync::OnceLock;

use log::{info, warn};

use crate::audio::setup_output_device;
use crate::error::{Error, Result};

/// Process-wide audio session. Activation happens at most once; later calls
/// report the cached outcome.
pub trait AudioSession: Send + Sync {
    fn activate(&self) -> Result<()>;
}

type Probe = fn() -> anyhow::Result<String>;

/// Runs its probe the first time it is activated and remembers the outcome.
pub struct SessionGate {
    outcome: OnceLock<std::result::Result<String, String>>,
    probe: Probe,
}

impl SessionGate {
    pub const fn new(probe: Probe) -> Self {
        Self {
            outcome: OnceLock::new(),
            probe,
        }
    }

    pub fn activate(&self) -> Result<()> {
        let outcome = self.outcome.get_or_init(|| match (self.probe)() {
            Ok(description) => {
                info!("🎧 Audio session active: {description}");
                Ok(description)
            }
            Err(e) => {
                warn!("audio session setup failed: {e:#}");
                Err(format!("{e:#}"))
            }
        });
        match outcome {
            Ok(_) => Ok(()),
            Err(reason) => Err(Error::EngineStart(reason.clone())),
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.outcome.get().is_some()
    }
}

fn probe_default_output() -> anyhow::Result<String> {
    let output = setup_output_device()?;
    Ok(format!(
        "{} Hz, {} ch, {:?}",
        output.output_sample_rate, output.output_channels, output.sample_format
    ))
}

static DEVICE_SESSION: SessionGate = SessionGate::new(probe_default_output);

/// Session for the default cpal host and output device.
#[derive(Clone, Copy, Debug, Default)]
pub struct DeviceSession;

impl AudioSession for DeviceSession {
    fn activate(&self) -> Result<()> {
        DEVICE_SESSION.activate()
    }
}

/// Session that is always available. Used when no device is involved.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullSession;

impl AudioSession for NullSession {
    fn activate(&self) -> Result<()> {
        Ok(())
    }
}
