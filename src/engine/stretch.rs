// src/engine/stretch.rs

//! Granular time-stretch / pitch-shift stage.
//!
//! Two overlapping Hann-windowed grains run half a grain apart. New grains
//! start at the anchor, which walks through the source at `rate` frames per
//! output frame; each grain reads the source at `pitch_ratio` frames per
//! output frame. Tempo and pitch are therefore independent. With hop = N/2
//! the periodic Hann windows sum to one, so unity settings reproduce the
//! source exactly once the first grain has faded in.

use std::f32::consts::PI;

#[derive(Clone, Copy, Debug, Default)]
struct Grain {
    start: f64,
    age: usize,
    active: bool,
}

pub struct TimePitch {
    window: Vec<f32>,
    hop: usize,
    grains: [Grain; 2],
    next: usize,
    since_hop: usize,
    anchor: f64,
}

impl TimePitch {
    pub fn new(grain_frames: usize) -> Self {
        let len = (grain_frames.max(4) + 1) & !1;
        let window = (0..len)
            .map(|i| 0.5 - 0.5 * (2.0 * PI * i as f32 / len as f32).cos())
            .collect();
        Self {
            window,
            hop: len / 2,
            grains: [Grain::default(); 2],
            next: 0,
            since_hop: 0,
            anchor: 0.0,
        }
    }

    pub fn grain_frames(&self) -> usize {
        self.window.len()
    }

    /// Drops running grains and moves the anchor to `frame`.
    pub fn reset(&mut self, frame: f64) {
        self.grains = [Grain::default(); 2];
        self.next = 0;
        self.since_hop = 0;
        self.anchor = frame;
    }

    /// Source frame the stage has consumed up to.
    pub fn anchor(&self) -> f64 {
        self.anchor
    }

    /// Renders interleaved output from `source` (same channel layout), never
    /// reading at or past `end_frame`. Returns the frames rendered before the
    /// anchor reached `end_frame`; the rest of `out` is silence.
    pub fn process(
        &mut self,
        source: &[f32],
        channels: usize,
        end_frame: usize,
        rate: f32,
        pitch_ratio: f32,
        out: &mut [f32],
    ) -> usize {
        out.fill(0.0);
        if channels == 0 {
            return 0;
        }
        let end_frame = end_frame.min(source.len() / channels);
        let frames = out.len() / channels;
        let rate = rate.max(0.0) as f64;
        let pitch_ratio = pitch_ratio.max(0.0) as f64;

        for f in 0..frames {
            if self.anchor >= end_frame as f64 {
                return f;
            }

            if self.since_hop == 0 {
                self.grains[self.next] = Grain {
                    start: self.anchor,
                    age: 0,
                    active: true,
                };
                self.next ^= 1;
            }

            let frame = &mut out[f * channels..(f + 1) * channels];
            for grain in self.grains.iter_mut().filter(|g| g.active) {
                let pos = grain.start + grain.age as f64 * pitch_ratio;
                let gain = self.window[grain.age];
                add_interpolated(source, channels, end_frame, pos, gain, frame);
                grain.age += 1;
                if grain.age >= self.window.len() {
                    grain.active = false;
                }
            }

            self.anchor += rate;
            self.since_hop += 1;
            if self.since_hop >= self.hop {
                self.since_hop = 0;
            }
        }
        frames
    }
}

#[inline]
fn add_interpolated(
    source: &[f32],
    channels: usize,
    end_frame: usize,
    pos: f64,
    gain: f32,
    frame: &mut [f32],
) {
    if pos < 0.0 || pos >= end_frame as f64 {
        return;
    }
    let i = pos as usize;
    let frac = (pos - i as f64) as f32;
    let j = i + 1;
    for (ch, out) in frame.iter_mut().enumerate() {
        let a = source[i * channels + ch];
        let b = if j < end_frame { source[j * channels + ch] } else { 0.0 };
        *out += (a + (b - a) * frac) * gain;
    }
}
