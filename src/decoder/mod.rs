// src/decoder/mod.rs

pub mod dsp;
pub mod resample;

use anyhow::{anyhow, Context};
use log::{debug, info};
use std::fs::File;
use std::path::Path;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::default::{get_codecs, get_probe};

use crate::asset::AudioAsset;
use crate::error::{Error, Result};

/// Decodes a whole file into an [`AudioAsset`].
pub fn decode_asset(name: &str, path: &Path) -> Result<AudioAsset> {
    let (samples, sample_rate, channels) =
        decode_to_vec(path).map_err(|e| Error::Decode {
            name: name.to_string(),
            reason: format!("{e:#}"),
        })?;

    let asset = AudioAsset::from_interleaved(name, samples, sample_rate, channels);
    info!(
        "📂 Decoded '{}': {} Hz / {} ch / {:.2}s",
        name,
        sample_rate,
        channels,
        asset.duration_secs()
    );
    Ok(asset)
}

fn decode_to_vec(path: &Path) -> anyhow::Result<(Vec<f32>, u32, usize)> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());
    let probed = get_probe().format(
        &Default::default(),
        mss,
        &FormatOptions::default(),
        &MetadataOptions::default(),
    )?;
    let mut format = probed.format;
    let track = format
        .default_track()
        .ok_or_else(|| anyhow!("no default audio track"))?;
    let track_id = track.id;
    let codec_params = track.codec_params.clone();

    let mut decoder = get_codecs().make(&codec_params, &DecoderOptions::default())?;
    let mut sample_buf: Option<SampleBuffer<f32>> = None;
    let mut out = Vec::<f32>::new();

    // Locked on the first non-empty packet.
    let mut layout: Option<(u32, usize)> = None;

    loop {
        let packet = match format.next_packet() {
            Ok(p) => p,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break
            }
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => return Err(e.into()),
        };
        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(d) => d,
            Err(SymphoniaError::DecodeError(e)) => {
                debug!("skipping undecodable packet: {e}");
                continue;
            }
            Err(e) => return Err(e.into()),
        };
        if decoded.frames() == 0 {
            continue;
        }

        let spec = *decoded.spec();
        let packet_channels = spec.channels.count();
        let (_, channels) = *layout.get_or_insert((spec.rate, packet_channels));

        let needs_new_buf = sample_buf
            .as_ref()
            .is_none_or(|b| b.capacity() < decoded.capacity());
        if needs_new_buf {
            sample_buf = Some(SampleBuffer::<f32>::new(decoded.capacity() as u64, spec));
        }
        let Some(buf) = sample_buf.as_mut() else {
            continue;
        };
        buf.copy_interleaved_ref(decoded);

        if packet_channels == channels {
            out.extend_from_slice(buf.samples());
        } else {
            out.extend(dsp::updown_mix_interleaved(buf.samples(), packet_channels, channels));
        }
    }

    let (sample_rate, channels) = layout.ok_or_else(|| anyhow!("no audio frames decoded"))?;
    if sample_rate == 0 {
        return Err(anyhow!("stream reports a zero sample rate"));
    }
    Ok((out, sample_rate, channels))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn write_wav(path: &Path, rate: u32, channels: u16, frames: usize) {
        let spec = hound::WavSpec {
            channels,
            sample_rate: rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for i in 0..frames {
            let v = ((i as f32 * 0.05).sin() * 8_000.0) as i16;
            for _ in 0..channels {
                writer.write_sample(v).unwrap();
            }
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn decodes_wav_metadata_and_duration() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("groove.wav");
        write_wav(&path, 22_050, 2, 22_050 * 2);

        let asset = decode_asset("groove", &path).unwrap();
        assert_eq!(asset.sample_rate(), 22_050);
        assert_eq!(asset.channels(), 2);
        assert_eq!(asset.total_frames(), 44_100);
        assert_relative_eq!(asset.duration_secs(), 2.0);
    }

    #[test]
    fn garbage_file_is_a_decode_failure() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.wav");
        std::fs::write(&path, b"definitely not audio").unwrap();

        let err = decode_asset("broken", &path).unwrap_err();
        assert!(matches!(err, Error::Decode { ref name, .. } if name == "broken"));
    }

    #[test]
    fn missing_file_is_a_decode_failure() {
        let dir = tempfile::tempdir().unwrap();
        let err = decode_asset("ghost", &dir.path().join("ghost.wav")).unwrap_err();
        assert!(matches!(err, Error::Decode { .. }));
    }
}
