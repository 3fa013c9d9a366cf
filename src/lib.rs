// src/lib.rs

pub mod asset;
pub mod audio;
pub mod config;
pub mod decoder;
pub mod engine;
pub mod error;
pub mod metronome;
pub mod resource;
pub mod session;
pub mod timer;

pub use asset::AudioAsset;
pub use config::EngineConfig;
pub use engine::{DeviceGraph, PlaybackGraph, PlaybackState, TransportEngine};
pub use error::{Error, Result};
pub use metronome::{ClickVoice, Metronome, MetronomeState};
pub use resource::{BundleResolver, ResourceResolver};
pub use session::{AudioSession, DeviceSession};
