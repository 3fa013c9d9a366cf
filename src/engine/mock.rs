// src/engine/mock.rs

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::time::Instant;

use super::graph::{PlaybackGraph, PlayerTime, ScheduledSegment, SegmentDone};
use crate::asset::AudioAsset;
use crate::error::{Error, Result};

pub const FIXTURE_RATE: u32 = 1_000;

/// Writes a quiet mono WAV of `secs` seconds at [`FIXTURE_RATE`].
pub fn write_fixture(dir: &Path, name: &str, secs: f64) {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: FIXTURE_RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut w = hound::WavWriter::create(dir.join(format!("{name}.wav")), spec).unwrap();
    let frames = (secs * FIXTURE_RATE as f64).round() as usize;
    for i in 0..frames {
        w.write_sample(((i % 100) as i16 - 50) * 20).unwrap();
    }
    w.finalize().unwrap();
}

pub struct MockState {
    pub running: bool,
    pub failing_starts: u32,
    pub starts: u32,
    pub prepared: Vec<String>,
    /// (start_frame, frame_count, generation) per scheduled segment.
    pub scheduled: Vec<(u64, u64, u64)>,
    pub fired_on_stop: u32,
    pub rate: f32,
    pub cents: f32,
    pending: Option<SegmentDone>,
    sample_rate: f64,
    playing_since: Option<Instant>,
    accumulated: Duration,
    rendered: bool,
}

impl MockState {
    fn reset_clock(&mut self) {
        self.playing_since = None;
        self.accumulated = Duration::ZERO;
        self.rendered = false;
    }
}

/// Graph whose render clock is tokio's (virtual) clock scaled by the rate.
/// Segments only end naturally through [`ManualGraph::finish_segment`].
#[derive(Clone)]
pub struct ManualGraph {
    inner: Arc<Mutex<MockState>>,
}

impl ManualGraph {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(MockState {
                running: false,
                failing_starts: 0,
                starts: 0,
                prepared: Vec::new(),
                scheduled: Vec::new(),
                fired_on_stop: 0,
                rate: 1.0,
                cents: 0.0,
                pending: None,
                sample_rate: FIXTURE_RATE as f64,
                playing_since: None,
                accumulated: Duration::ZERO,
                rendered: false,
            })),
        }
    }

    pub fn log(&self) -> MutexGuard<'_, MockState> {
        self.inner.lock().unwrap()
    }

    pub fn fail_next_starts(&self, n: u32) {
        self.log().failing_starts = n;
    }

    /// Simulates the output device going away.
    pub fn crash(&self) {
        self.log().running = false;
    }

    /// Fires the pending segment's completion as if it rendered to the end.
    pub fn finish_segment(&self) {
        let done = self.log().pending.take();
        if let Some(done) = done {
            done.fire();
        }
    }
}

impl PlaybackGraph for ManualGraph {
    fn start(&mut self) -> Result<()> {
        let mut s = self.log();
        if s.failing_starts > 0 {
            s.failing_starts -= 1;
            return Err(Error::EngineStart("mock device refused".into()));
        }
        s.running = true;
        s.starts += 1;
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.log().running
    }

    fn prepare(&mut self, asset: &Arc<AudioAsset>) -> Result<()> {
        self.log().prepared.push(asset.name().to_string());
        Ok(())
    }

    fn schedule(&mut self, segment: ScheduledSegment) -> Result<()> {
        let mut s = self.log();
        if let Some(old) = s.pending.take() {
            old.fire();
        }
        s.scheduled.push((
            segment.start_frame,
            segment.frame_count,
            segment.done.generation(),
        ));
        s.pending = Some(segment.done);
        s.reset_clock();
        Ok(())
    }

    fn play(&mut self) {
        let mut s = self.log();
        if s.pending.is_some() && s.playing_since.is_none() {
            s.playing_since = Some(Instant::now());
            s.rendered = true;
        }
    }

    fn pause(&mut self) {
        let mut s = self.log();
        if let Some(since) = s.playing_since.take() {
            s.accumulated += since.elapsed();
        }
    }

    fn stop(&mut self) {
        let mut s = self.log();
        if let Some(done) = s.pending.take() {
            s.fired_on_stop += 1;
            done.fire();
        }
        s.reset_clock();
    }

    fn player_time(&self) -> Option<PlayerTime> {
        let s = self.log();
        if !s.rendered {
            return None;
        }
        let elapsed = s.accumulated + s.playing_since.map(|t| t.elapsed()).unwrap_or_default();
        let frames = elapsed.as_secs_f64() * s.rate as f64 * s.sample_rate;
        Some(PlayerTime {
            sample_time: frames.round() as u64,
            sample_rate: s.sample_rate,
        })
    }

    fn set_rate(&mut self, rate: f32) {
        self.log().rate = rate;
    }

    fn set_pitch(&mut self, cents: f32) {
        self.log().cents = cents;
    }
}
