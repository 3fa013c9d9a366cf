// src/decoder/resample.rs

use anyhow::Result;
use rubato::{
    calculate_cutoff, Resampler, SincFixedIn, SincInterpolationParameters,
    SincInterpolationType, WindowFunction,
};
use crate::decoder::dsp;

pub fn build_resampler(
    src_rate: u32,
    dst_rate: u32,
    channels: usize,
) -> Result<Option<SincFixedIn<f32>>> {
    if src_rate == dst_rate {
        return Ok(None);
    }
    let ratio = dst_rate as f64 / src_rate as f64;
    let sinc_len = 128usize;
    let window = WindowFunction::BlackmanHarris2;
    let f_cutoff = calculate_cutoff(sinc_len, window);
    let params = SincInterpolationParameters {
        sinc_len,
        f_cutoff,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 128,
        window,
    };
    let chunk_size = 1024;
    let r = SincFixedIn::<f32>::new(ratio, 1.0, params, chunk_size, channels)?;
    Ok(Some(r))
}

fn try_process_exact(
    resampler: &mut SincFixedIn<f32>,
    stage_planar: &mut [Vec<f32>],
) -> Result<Option<Vec<Vec<f32>>>> {
    let need = resampler.input_frames_next();
    if dsp::planar_len(stage_planar) < need {
        return Ok(None);
    }
    let in_block = dsp::take_from_planar(stage_planar, need);
    Ok(Some(resampler.process(&in_block, None)?))
}

fn append_planar(dst: &mut [Vec<f32>], block: &[Vec<f32>]) {
    for (d, b) in dst.iter_mut().zip(block) {
        d.extend_from_slice(b);
    }
}

/// Converts a whole interleaved buffer from `src_rate` to `dst_rate`,
/// compensating for the resampler's output delay so the result lines up
/// with the input frame for frame.
pub fn resample_interleaved(
    input: &[f32],
    channels: usize,
    src_rate: u32,
    dst_rate: u32,
) -> Result<Vec<f32>> {
    let Some(mut resampler) = build_resampler(src_rate, dst_rate, channels)? else {
        return Ok(input.to_vec());
    };

    let in_frames = input.len() / channels;
    let expected = (in_frames as f64 * dst_rate as f64 / src_rate as f64).round() as usize;
    let delay = resampler.output_delay();

    let mut stage = dsp::deinterleave(input, channels);
    let mut out: Vec<Vec<f32>> = vec![Vec::with_capacity(expected + delay); channels];

    while let Some(block) = try_process_exact(&mut resampler, &mut stage)? {
        append_planar(&mut out, &block);
    }

    let rest = dsp::planar_len(&stage);
    if rest > 0 {
        let tail = dsp::take_from_planar(&mut stage, rest);
        let block = resampler.process_partial(Some(tail.as_slice()), None)?;
        append_planar(&mut out, &block);
    }

    while dsp::planar_len(&out) < expected + delay {
        let block = resampler.process_partial::<Vec<f32>>(None, None)?;
        if block.first().is_none_or(|b| b.is_empty()) {
            break;
        }
        append_planar(&mut out, &block);
    }

    for ch in out.iter_mut() {
        ch.drain(..delay.min(ch.len()));
        ch.truncate(expected);
    }
    Ok(dsp::interleave(&out))
}
