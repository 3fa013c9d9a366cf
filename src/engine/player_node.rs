// src/engine/player_node.rs

use std::sync::{
    atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering},
    Arc,
};

use ringbuf::traits::{Consumer, Producer};
use ringbuf::{HeapCons, HeapProd};

use super::stretch::TimePitch;
use super::time::cents_to_ratio;

/// Render copy of an asset at the output device's rate and channel count.
#[derive(Debug)]
pub struct RenderBuffer {
    pub samples: Vec<f32>,
    pub channels: usize,
    pub sample_rate: u32,
}

impl RenderBuffer {
    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            return 0;
        }
        self.samples.len() / self.channels
    }
}

/// Commands the render thread can handle.
pub enum GraphCmd {
    Schedule {
        buffer: Arc<RenderBuffer>,
        start: usize,
        end: usize,
        generation: u64,
    },
    Play,
    Pause,
    Stop,
}

/// Lock-free state shared between the control side and the render callback.
pub struct NodeShared {
    rate: AtomicU32,
    pitch_cents: AtomicU32,
    clock_frames: AtomicU64,
    clock_valid: AtomicBool,
}

impl Default for NodeShared {
    fn default() -> Self {
        Self {
            rate: AtomicU32::new(1.0f32.to_bits()),
            pitch_cents: AtomicU32::new(0.0f32.to_bits()),
            clock_frames: AtomicU64::new(0),
            clock_valid: AtomicBool::new(false),
        }
    }
}

impl NodeShared {
    pub fn set_rate(&self, rate: f32) {
        self.rate.store(rate.to_bits(), Ordering::Relaxed);
    }

    pub fn rate(&self) -> f32 {
        f32::from_bits(self.rate.load(Ordering::Relaxed))
    }

    pub fn set_pitch_cents(&self, cents: f32) {
        self.pitch_cents.store(cents.to_bits(), Ordering::Relaxed);
    }

    pub fn pitch_cents(&self) -> f32 {
        f32::from_bits(self.pitch_cents.load(Ordering::Relaxed))
    }

    /// Source frames consumed since the current segment started, if the
    /// segment has rendered at all.
    pub fn clock(&self) -> Option<u64> {
        self.clock_valid
            .load(Ordering::Acquire)
            .then(|| self.clock_frames.load(Ordering::Relaxed))
    }

    pub(crate) fn set_clock(&self, frames: u64) {
        self.clock_frames.store(frames, Ordering::Relaxed);
        self.clock_valid.store(true, Ordering::Release);
    }

    pub(crate) fn clear_clock(&self) {
        self.clock_valid.store(false, Ordering::Release);
        self.clock_frames.store(0, Ordering::Relaxed);
    }
}

struct ActiveSegment {
    buffer: Arc<RenderBuffer>,
    start: usize,
    end: usize,
    generation: u64,
}

/// Player node living inside the output callback. Segments that render to
/// their end are reported by generation on `finished`; flushed ones are not.
pub struct PlayerNode {
    commands: HeapCons<GraphCmd>,
    finished: HeapProd<u64>,
    shared: Arc<NodeShared>,
    stretch: TimePitch,
    segment: Option<ActiveSegment>,
    playing: bool,
    channels: usize,
}

impl PlayerNode {
    pub fn new(
        commands: HeapCons<GraphCmd>,
        finished: HeapProd<u64>,
        shared: Arc<NodeShared>,
        stretch: TimePitch,
        channels: usize,
    ) -> Self {
        Self {
            commands,
            finished,
            shared,
            stretch,
            segment: None,
            playing: false,
            channels,
        }
    }

    fn flush(&mut self) {
        self.segment = None;
        self.shared.clear_clock();
    }

    fn drain_commands(&mut self) {
        while let Some(cmd) = self.commands.try_pop() {
            match cmd {
                GraphCmd::Schedule { buffer, start, end, generation } => {
                    self.flush();
                    self.stretch.reset(start as f64);
                    self.segment = Some(ActiveSegment {
                        buffer,
                        start,
                        end,
                        generation,
                    });
                }
                GraphCmd::Play => self.playing = true,
                GraphCmd::Pause => self.playing = false,
                GraphCmd::Stop => {
                    self.playing = false;
                    self.flush();
                }
            }
        }
    }

    /// Fills one interleaved output block.
    pub fn render(&mut self, out: &mut [f32]) {
        self.drain_commands();
        out.fill(0.0);

        if !self.playing || self.channels == 0 {
            return;
        }
        let Some(seg) = self.segment.as_mut() else {
            return;
        };
        if seg.buffer.channels != self.channels {
            return;
        }

        let frames = out.len() / self.channels;
        let rate = self.shared.rate();
        let ratio = cents_to_ratio(self.shared.pitch_cents());
        let rendered = self.stretch.process(
            &seg.buffer.samples,
            self.channels,
            seg.end,
            rate,
            ratio,
            out,
        );

        let consumed = (self.stretch.anchor() - seg.start as f64).max(0.0);
        let length = (seg.end - seg.start) as f64;
        self.shared.set_clock(consumed.min(length) as u64);

        if rendered < frames {
            let _ = self.finished.try_push(seg.generation);
            self.segment = None;
        }
    }
}
