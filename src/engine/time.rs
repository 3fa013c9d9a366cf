// src/engine/time.rs

use std::time::Duration;

pub const CENTS_PER_SEMITONE: i32 = 100;

/// Playback speed multiplier that turns `original_bpm` into `new_bpm`.
/// `None` unless both tempos are finite and positive.
pub fn rate_factor(original_bpm: f64, new_bpm: f64) -> Option<f32> {
    if !(original_bpm.is_finite() && original_bpm > 0.0) {
        return None;
    }
    if !(new_bpm.is_finite() && new_bpm > 0.0) {
        return None;
    }
    Some((new_bpm / original_bpm) as f32)
}

/// Seconds per beat (e.g., 120 BPM -> 0.5s). `None` for tempos that give
/// no usable period, including ones so fast the beat rounds to zero.
pub fn beat_interval(bpm: f64) -> Option<Duration> {
    if !(bpm.is_finite() && bpm > 0.0) {
        return None;
    }
    Duration::try_from_secs_f64(60.0 / bpm)
        .ok()
        .filter(|d| !d.is_zero())
}

pub fn semitones_to_cents(semitones: i32) -> f32 {
    (semitones.saturating_mul(CENTS_PER_SEMITONE)) as f32
}

/// Frequency ratio of a shift in cents (1200 cents per octave).
pub fn cents_to_ratio(cents: f32) -> f32 {
    2f32.powf(cents / 1200.0)
}

pub fn seconds_to_frames(seconds: f64, sample_rate: u32) -> u64 {
    (seconds.max(0.0) * sample_rate as f64) as u64
}

pub fn frames_to_seconds(frames: u64, sample_rate: u32) -> f64 {
    if sample_rate == 0 {
        return 0.0;
    }
    frames as f64 / sample_rate as f64
}
