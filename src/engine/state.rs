// src/engine/state.rs

use serde::Serialize;
use tokio::sync::watch;

/// Published transport state. Times are in seconds.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct PlaybackState {
    pub is_playing: bool,
    pub current_time: f64,
    pub duration: f64,
    pub rate_factor: f32,
    pub pitch_semitones: i32,
}

impl Default for PlaybackState {
    fn default() -> Self {
        Self {
            is_playing: false,
            current_time: 0.0,
            duration: 0.0,
            rate_factor: 1.0,
            pitch_semitones: 0,
        }
    }
}

impl PlaybackState {
    /// True once playback reached the end on its own.
    pub fn is_at_end(&self) -> bool {
        self.duration > 0.0 && self.current_time >= self.duration
    }
}

/// Origin of the currently scheduled play region.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PlaybackSegment {
    pub start_time: f64,
    pub generation: u64,
}

/// Holds the state and notifies every subscriber on each mutation.
pub struct StatePublisher {
    tx: watch::Sender<PlaybackState>,
}

impl StatePublisher {
    pub fn new(initial: PlaybackState) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx }
    }

    pub fn get(&self) -> PlaybackState {
        *self.tx.borrow()
    }

    /// Applies `f` and notifies, even when nothing changed.
    pub fn update(&self, f: impl FnOnce(&mut PlaybackState)) {
        self.tx.send_modify(|state| {
            f(state);
            debug_assert!(state.current_time >= 0.0);
        });
    }

    pub fn subscribe(&self) -> watch::Receiver<PlaybackState> {
        self.tx.subscribe()
    }
}
