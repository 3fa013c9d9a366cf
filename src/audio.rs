// src/audio.rs

use anyhow::{bail, Context};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, SizedSample, Stream, StreamConfig};
use log::{error, info};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    mpsc::{self, RecvTimeoutError},
    Arc,
};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Helper struct to hold output device info
pub struct OutputConfig {
    pub device: Device,
    pub config: StreamConfig,
    pub sample_format: SampleFormat,
    pub output_channels: usize,
    pub output_sample_rate: u32,
}

/// Rate and channel count the render callback is driven at.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OutputFormat {
    pub sample_rate: u32,
    pub channels: usize,
}

/// Finds the default audio output device and its config.
pub fn setup_output_device() -> anyhow::Result<OutputConfig> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .context("no output device available")?;
    let supported_config = device.default_output_config()?;
    let sample_format = supported_config.sample_format();
    let config = supported_config.config();
    let output_channels = config.channels as usize;
    let output_sample_rate = config.sample_rate.0;

    info!(
        "🔊 Output device: channels: {}, sample_rate: {:?}",
        output_channels, config.sample_rate
    );

    Ok(OutputConfig {
        device,
        config,
        sample_format,
        output_channels,
        output_sample_rate,
    })
}

/// Build CPAL output stream around an f32 render callback.
fn build_stream<T, R>(
    device: &Device,
    config: &StreamConfig,
    mut render: R,
    alive: Arc<AtomicBool>,
) -> anyhow::Result<Stream>
where
    T: cpal::Sample + cpal::FromSample<f32> + SizedSample,
    R: FnMut(&mut [f32]) + Send + 'static,
{
    let mut scratch: Vec<f32> = Vec::with_capacity(4096);
    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                if scratch.len() != data.len() {
                    scratch.resize(data.len(), 0.0);
                }
                render(&mut scratch);
                for (out, &s) in data.iter_mut().zip(scratch.iter()) {
                    *out = T::from_sample(s);
                }
            },
            move |err| {
                error!("output stream error: {err}");
                alive.store(false, Ordering::Relaxed);
            },
            None,
        )
        .map_err(Into::into)
}

/// Owns a cpal stream on a dedicated thread. The stream is built, played and
/// dropped on that thread; dropping this handle shuts it down.
pub struct OutputThread {
    format: OutputFormat,
    alive: Arc<AtomicBool>,
    shutdown: Option<mpsc::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl OutputThread {
    /// Opens the default output device. `make_render` is called on the output
    /// thread once the device format is known.
    pub fn spawn<F, R>(label: &str, make_render: F) -> anyhow::Result<Self>
    where
        F: FnOnce(OutputFormat) -> R + Send + 'static,
        R: FnMut(&mut [f32]) + Send + 'static,
    {
        Self::spawn_with_housekeeping(label, make_render, Duration::MAX, || {})
    }

    /// Like [`OutputThread::spawn`], and also runs `housekeeping` on the
    /// output thread (outside the audio callback) every `period`.
    pub fn spawn_with_housekeeping<F, R, H>(
        label: &str,
        make_render: F,
        period: Duration,
        mut housekeeping: H,
    ) -> anyhow::Result<Self>
    where
        F: FnOnce(OutputFormat) -> R + Send + 'static,
        R: FnMut(&mut [f32]) + Send + 'static,
        H: FnMut() + Send + 'static,
    {
        let (ready_tx, ready_rx) = mpsc::channel::<anyhow::Result<OutputFormat>>();
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let alive = Arc::new(AtomicBool::new(true));
        let alive_thread = alive.clone();

        let handle = thread::Builder::new()
            .name(label.to_string())
            .spawn(move || {
                let opened = (|| -> anyhow::Result<(Stream, OutputFormat)> {
                    let output = setup_output_device()?;
                    let format = OutputFormat {
                        sample_rate: output.output_sample_rate,
                        channels: output.output_channels,
                    };
                    let render = make_render(format);
                    let stream = match output.sample_format {
                        SampleFormat::F32 => build_stream::<f32, _>(
                            &output.device,
                            &output.config,
                            render,
                            alive_thread.clone(),
                        )?,
                        SampleFormat::I16 => build_stream::<i16, _>(
                            &output.device,
                            &output.config,
                            render,
                            alive_thread.clone(),
                        )?,
                        SampleFormat::U16 => build_stream::<u16, _>(
                            &output.device,
                            &output.config,
                            render,
                            alive_thread.clone(),
                        )?,
                        other => bail!("unsupported sample format: {other:?}"),
                    };
                    stream.play()?;
                    Ok((stream, format))
                })();

                match opened {
                    Ok((stream, format)) => {
                        let _ = ready_tx.send(Ok(format));
                        // Park until the owner goes away.
                        while let Err(RecvTimeoutError::Timeout) = shutdown_rx.recv_timeout(period) {
                            housekeeping();
                        }
                        drop(stream);
                    }
                    Err(e) => {
                        alive_thread.store(false, Ordering::Relaxed);
                        let _ = ready_tx.send(Err(e));
                    }
                }
            })
            .context("spawning output thread")?;

        let format = match ready_rx.recv() {
            Ok(Ok(format)) => format,
            Ok(Err(e)) => {
                let _ = handle.join();
                return Err(e);
            }
            Err(_) => {
                let _ = handle.join();
                bail!("output thread exited before reporting");
            }
        };

        Ok(Self {
            format,
            alive,
            shutdown: Some(shutdown_tx),
            handle: Some(handle),
        })
    }

    pub fn format(&self) -> OutputFormat {
        self.format
    }

    /// False once the stream reported an error.
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Relaxed)
    }
}

impl Drop for OutputThread {
    fn drop(&mut self) {
        drop(self.shutdown.take());
        if let Some(h) = self.handle.take() {
            let _ = h.join();
        }
    }
}
