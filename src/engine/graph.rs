// src/engine/graph.rs

use std::sync::Arc;

use tokio::sync::mpsc::UnboundedSender;

use crate::asset::AudioAsset;
use crate::error::Result;

/// Notifications travelling from the graph back to the transport.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EngineEvent {
    SegmentFinished { generation: u64 },
}

/// Completion token handed to the graph with every scheduled segment.
///
/// The graph fires it exactly once: when the segment has rendered to its
/// end, or when `stop` flushes it. Firing is safe from any thread.
#[derive(Debug)]
pub struct SegmentDone {
    generation: u64,
    tx: UnboundedSender<EngineEvent>,
}

impl SegmentDone {
    pub(crate) fn new(generation: u64, tx: UnboundedSender<EngineEvent>) -> Self {
        Self { generation, tx }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn fire(self) {
        // The engine may already be gone.
        let _ = self.tx.send(EngineEvent::SegmentFinished {
            generation: self.generation,
        });
    }
}

/// One continuous run of an asset, in the asset's own frames.
#[derive(Debug)]
pub struct ScheduledSegment {
    pub asset: Arc<AudioAsset>,
    pub start_frame: u64,
    pub frame_count: u64,
    pub done: SegmentDone,
}

/// Position of the player inside the current segment, read from the
/// render clock rather than the wall clock.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PlayerTime {
    pub sample_time: u64,
    pub sample_rate: f64,
}

impl PlayerTime {
    pub fn seconds(&self) -> f64 {
        if self.sample_rate <= 0.0 {
            return 0.0;
        }
        self.sample_time as f64 / self.sample_rate
    }
}

/// The playback graph: player -> time/pitch stage -> output.
pub trait PlaybackGraph: Send {
    /// Starts (or restarts) audio output. Idempotent while running.
    fn start(&mut self) -> Result<()>;

    fn is_running(&self) -> bool;

    /// Called once per loaded asset, before any segment of it is scheduled.
    fn prepare(&mut self, asset: &Arc<AudioAsset>) -> Result<()>;

    /// Queues a segment. It does not sound until `play`. On error the
    /// segment is dropped without firing its completion.
    fn schedule(&mut self, segment: ScheduledSegment) -> Result<()>;

    fn play(&mut self);

    /// Freezes output and the render clock, keeping the queued segment.
    fn pause(&mut self);

    /// Flushes the queued segment (firing its completion) and resets the
    /// render clock.
    fn stop(&mut self);

    /// `None` until the current segment has rendered at least once.
    fn player_time(&self) -> Option<PlayerTime>;

    fn set_rate(&mut self, rate: f32);

    fn set_pitch(&mut self, cents: f32);
}
