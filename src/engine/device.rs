// src/engine/device.rs

use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{debug, info, warn};
use ringbuf::traits::{Consumer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};

use super::graph::{PlaybackGraph, PlayerTime, ScheduledSegment, SegmentDone};
use super::player_node::{GraphCmd, NodeShared, PlayerNode, RenderBuffer};
use super::stretch::TimePitch;
use crate::asset::AudioAsset;
use crate::audio::{OutputFormat, OutputThread};
use crate::config::EngineConfig;
use crate::decoder::{dsp, resample};
use crate::error::{Error, Result};

struct Prepared {
    asset: Arc<AudioAsset>,
    buffer: Option<Arc<RenderBuffer>>,
}

/// How often the output thread forwards finished segments.
const COMPLETION_POLL: Duration = Duration::from_millis(5);

/// Completion of the segment currently handed to the render thread.
type PendingDone = Arc<Mutex<Option<SegmentDone>>>;

fn fire_pending(pending: &PendingDone) {
    let done = match pending.lock() {
        Ok(mut slot) => slot.take(),
        Err(_) => None,
    };
    if let Some(done) = done {
        done.fire();
    }
}

/// Turns generations reported by the render thread into completions.
struct CompletionPump {
    finished: HeapCons<u64>,
    pending: PendingDone,
}

impl CompletionPump {
    fn drain(&mut self) {
        while let Some(generation) = self.finished.try_pop() {
            let done = match self.pending.lock() {
                Ok(mut slot) if slot.as_ref().is_some_and(|d| d.generation() == generation) => {
                    slot.take()
                }
                _ => None,
            };
            match done {
                Some(done) => done.fire(),
                None => debug!("segment {generation} already flushed"),
            }
        }
    }
}

/// [`PlaybackGraph`] backed by the default cpal output device.
pub struct DeviceGraph {
    grain_ms: u32,
    queue_capacity: usize,
    shared: Arc<NodeShared>,
    output: Option<OutputThread>,
    commands: Option<HeapProd<GraphCmd>>,
    pending: PendingDone,
    prepared: Option<Prepared>,
}

impl DeviceGraph {
    /// Creates the graph without touching the device; `start` opens it.
    /// An invalid config is replaced by the defaults.
    pub fn new(config: &EngineConfig) -> Self {
        let config = config.clone().validated_or_default();
        Self {
            grain_ms: config.grain_ms,
            queue_capacity: config.command_queue_capacity,
            shared: Arc::new(NodeShared::default()),
            output: None,
            commands: None,
            pending: Arc::new(Mutex::new(None)),
            prepared: None,
        }
    }

    /// Creates the graph and starts output right away.
    pub fn open(config: &EngineConfig) -> Result<Self> {
        let mut graph = Self::new(config);
        graph.start()?;
        Ok(graph)
    }

    pub fn format(&self) -> Option<OutputFormat> {
        self.output.as_ref().map(|o| o.format())
    }

    fn send(&mut self, cmd: GraphCmd) -> bool {
        let Some(prod) = self.commands.as_mut() else {
            debug!("graph not started, dropping command");
            return false;
        };
        if prod.try_push(cmd).is_err() {
            warn!("render command queue full, dropping command");
            return false;
        }
        true
    }

    fn render_buffer(&mut self, asset: &Arc<AudioAsset>) -> Result<Arc<RenderBuffer>> {
        let format = self
            .format()
            .ok_or_else(|| Error::EngineStart("output device not open".into()))?;

        if let Some(p) = &self.prepared {
            if Arc::ptr_eq(&p.asset, asset) {
                if let Some(buf) = &p.buffer {
                    if buf.sample_rate == format.sample_rate && buf.channels == format.channels {
                        return Ok(buf.clone());
                    }
                }
            }
        }

        let buffer = Arc::new(build_render_buffer(asset, format)?);
        self.prepared = Some(Prepared {
            asset: asset.clone(),
            buffer: Some(buffer.clone()),
        });
        Ok(buffer)
    }
}

fn build_render_buffer(asset: &AudioAsset, format: OutputFormat) -> Result<RenderBuffer> {
    let mixed = dsp::updown_mix_interleaved(asset.samples(), asset.channels(), format.channels);
    let samples = resample::resample_interleaved(
        &mixed,
        format.channels,
        asset.sample_rate(),
        format.sample_rate,
    )
    .map_err(|e| Error::Decode {
        name: asset.name().to_string(),
        reason: format!("resampling to {} Hz: {e:#}", format.sample_rate),
    })?;

    debug!(
        "render copy of '{}': {} Hz -> {} Hz, {} ch -> {} ch",
        asset.name(),
        asset.sample_rate(),
        format.sample_rate,
        asset.channels(),
        format.channels
    );
    Ok(RenderBuffer {
        samples,
        channels: format.channels,
        sample_rate: format.sample_rate,
    })
}

/// Maps an asset frame onto the render copy's timeline.
fn to_output_frame(frame: u64, asset_rate: u32, output_rate: u32) -> usize {
    if asset_rate == output_rate || asset_rate == 0 {
        return frame as usize;
    }
    (frame as f64 * output_rate as f64 / asset_rate as f64).round() as usize
}

impl PlaybackGraph for DeviceGraph {
    fn start(&mut self) -> Result<()> {
        if self.is_running() {
            return Ok(());
        }
        // Tear down a stream that died before opening a new one.
        self.commands = None;
        self.output = None;

        // A segment queued on the dead stream will never finish there.
        fire_pending(&self.pending);

        let (prod, cons) = HeapRb::<GraphCmd>::new(self.queue_capacity).split();
        let (fin_prod, fin_cons) = HeapRb::<u64>::new(self.queue_capacity).split();
        let shared = self.shared.clone();
        let grain_ms = self.grain_ms;
        let mut pump = CompletionPump {
            finished: fin_cons,
            pending: self.pending.clone(),
        };

        let output = OutputThread::spawn_with_housekeeping(
            "transport-output",
            move |format: OutputFormat| {
                let grain = EngineConfig {
                    grain_ms,
                    ..Default::default()
                }
                .grain_frames(format.sample_rate);
                let mut node = PlayerNode::new(
                    cons,
                    fin_prod,
                    shared,
                    TimePitch::new(grain),
                    format.channels,
                );
                move |out: &mut [f32]| node.render(out)
            },
            COMPLETION_POLL,
            move || pump.drain(),
        )
        .map_err(|e| Error::EngineStart(format!("{e:#}")))?;

        info!(
            "▶️ Playback graph running at {} Hz / {} ch",
            output.format().sample_rate,
            output.format().channels
        );
        self.output = Some(output);
        self.commands = Some(prod);
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.output.as_ref().is_some_and(|o| o.is_alive())
    }

    fn prepare(&mut self, asset: &Arc<AudioAsset>) -> Result<()> {
        self.prepared = Some(Prepared {
            asset: asset.clone(),
            buffer: None,
        });
        if self.format().is_some() {
            self.render_buffer(asset)?;
        }
        Ok(())
    }

    fn schedule(&mut self, segment: ScheduledSegment) -> Result<()> {
        let ScheduledSegment {
            asset,
            start_frame,
            frame_count,
            done,
        } = segment;

        let buffer = self.render_buffer(&asset)?;
        let start = to_output_frame(start_frame, asset.sample_rate(), buffer.sample_rate)
            .min(buffer.frames());
        let end = to_output_frame(start_frame + frame_count, asset.sample_rate(), buffer.sample_rate)
            .min(buffer.frames());

        let generation = done.generation();
        let previous = match self.pending.lock() {
            Ok(mut slot) => slot.replace(done),
            Err(_) => return Err(Error::EngineStart("completion slot poisoned".into())),
        };
        // The new segment replaces the old one on the render side.
        if let Some(previous) = previous {
            previous.fire();
        }

        if self.send(GraphCmd::Schedule { buffer, start, end, generation }) {
            Ok(())
        } else {
            if let Ok(mut slot) = self.pending.lock() {
                slot.take();
            }
            Err(Error::EngineStart("render queue unavailable".into()))
        }
    }

    fn play(&mut self) {
        self.send(GraphCmd::Play);
    }

    fn pause(&mut self) {
        self.send(GraphCmd::Pause);
    }

    fn stop(&mut self) {
        self.send(GraphCmd::Stop);
        self.shared.clear_clock();
        fire_pending(&self.pending);
    }

    fn player_time(&self) -> Option<PlayerTime> {
        let format = self.format()?;
        let frames = self.shared.clock()?;
        Some(PlayerTime {
            sample_time: frames,
            sample_rate: format.sample_rate as f64,
        })
    }

    fn set_rate(&mut self, rate: f32) {
        self.shared.set_rate(rate);
    }

    fn set_pitch(&mut self, cents: f32) {
        self.shared.set_pitch_cents(cents);
    }
}
