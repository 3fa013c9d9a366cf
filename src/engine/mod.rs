// src/engine/mod.rs

pub mod device;
pub mod graph;
pub mod player_node;
pub mod state;
pub mod stretch;
pub mod time;

#[cfg(test)]
mod mock;

pub use device::DeviceGraph;
pub use graph::{EngineEvent, PlaybackGraph, PlayerTime, ScheduledSegment, SegmentDone};
pub use state::{PlaybackSegment, PlaybackState, StatePublisher};

use std::ops::ControlFlow;
use std::sync::{Arc, Mutex, Weak};

use log::{debug, error, info, trace, warn};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::asset::AudioAsset;
use crate::config::EngineConfig;
use crate::error::Error;
use crate::resource::ResourceResolver;
use crate::session::AudioSession;
use crate::timer::RepeatingTask;

struct EngineCore {
    this: Weak<Mutex<EngineCore>>,
    runtime: Handle,
    config: EngineConfig,
    graph: Box<dyn PlaybackGraph>,
    resolver: Arc<dyn ResourceResolver>,
    asset: Option<Arc<AudioAsset>>,
    publisher: StatePublisher,
    segment: Option<PlaybackSegment>,
    // Bumped whenever the scheduled segment is invalidated.
    generation: u64,
    poller: Option<RepeatingTask>,
    events: mpsc::UnboundedSender<EngineEvent>,
}

impl EngineCore {
    fn state(&self) -> PlaybackState {
        self.publisher.get()
    }

    fn halt_output(&mut self) {
        self.generation += 1;
        self.segment = None;
        self.poller = None;
        self.graph.stop();
    }

    fn load(&mut self, name: &str) {
        self.stop();

        let extension = self.config.asset_extension.clone();
        let Some(path) = self.resolver.resolve(name, &extension) else {
            let err = Error::ResourceMissing {
                name: name.to_string(),
                extension,
            };
            warn!("load skipped: {err}");
            return;
        };

        let asset = match AudioAsset::decode_file(name, &path) {
            Ok(asset) => Arc::new(asset),
            Err(e) => {
                warn!("load skipped: {e}");
                return;
            }
        };
        if let Err(e) = self.graph.prepare(&asset) {
            warn!("load skipped: {e}");
            return;
        }

        let duration = asset.duration_secs();
        self.asset = Some(asset);
        self.publisher.update(|s| {
            s.duration = duration;
            s.current_time = 0.0;
            s.is_playing = false;
        });
        info!("🎵 Loaded '{name}' ({duration:.2}s)");
    }

    fn play(&mut self) {
        let Some(asset) = self.asset.clone() else {
            debug!("play ignored: no asset loaded");
            return;
        };
        if self.state().is_playing {
            return;
        }
        if !self.graph.is_running() {
            if let Err(e) = self.graph.start() {
                warn!("play failed, will retry on next play: {e}");
                return;
            }
        }

        // Always start a fresh segment so the render clock restarts at zero.
        self.halt_output();
        let from = self.state().current_time;
        if !self.schedule_from(&asset, from) {
            return;
        }
        self.graph.play();
        self.publisher.update(|s| s.is_playing = true);
        self.start_poller();
        debug!("playing from {from:.3}s");
    }

    fn pause(&mut self) {
        if !self.state().is_playing {
            return;
        }
        self.graph.pause();
        self.poller = None;
        self.publisher.update(|s| s.is_playing = false);
        debug!("paused at {:.3}s", self.state().current_time);
    }

    fn stop(&mut self) {
        self.halt_output();
        self.publisher.update(|s| {
            s.is_playing = false;
            s.current_time = 0.0;
        });
    }

    fn seek(&mut self, target: f64) {
        let Some(asset) = self.asset.clone() else {
            debug!("seek ignored: no asset loaded");
            return;
        };
        if target.is_nan() {
            warn!("{}", Error::InvalidParameter("seek target is NaN".into()));
            return;
        }

        let state = self.state();
        let clamped = target.clamp(0.0, state.duration);
        self.halt_output();
        self.publisher.update(|s| s.current_time = clamped);

        if state.is_playing {
            if self.schedule_from(&asset, clamped) {
                self.graph.play();
                self.start_poller();
            } else {
                self.publisher.update(|s| s.is_playing = false);
            }
        }
        debug!("seek to {clamped:.3}s");
    }

    fn change_rate(&mut self, original_tempo: f64, new_tempo: f64) {
        let Some(factor) = time::rate_factor(original_tempo, new_tempo) else {
            warn!(
                "{}",
                Error::InvalidParameter(format!(
                    "tempo change {original_tempo} -> {new_tempo}"
                ))
            );
            return;
        };
        self.graph.set_rate(factor);
        self.publisher.update(|s| s.rate_factor = factor);
        debug!("rate factor {factor:.3}");
    }

    fn change_pitch(&mut self, semitones: i32) {
        self.graph.set_pitch(time::semitones_to_cents(semitones));
        self.publisher.update(|s| s.pitch_semitones = semitones);
        debug!("pitch {semitones:+} st");
    }

    /// Schedules the rest of the asset from `time`. Returns false when
    /// nothing was scheduled.
    fn schedule_from(&mut self, asset: &Arc<AudioAsset>, time: f64) -> bool {
        let start_frame = time::seconds_to_frames(time, asset.sample_rate());
        let total = asset.total_frames();
        if start_frame >= total {
            let duration = self.state().duration;
            self.publisher.update(|s| {
                s.current_time = duration;
                s.is_playing = false;
            });
            debug!("nothing left to play from {time:.3}s");
            return false;
        }

        let generation = self.generation;
        let segment = ScheduledSegment {
            asset: asset.clone(),
            start_frame,
            frame_count: total - start_frame,
            done: SegmentDone::new(generation, self.events.clone()),
        };
        match self.graph.schedule(segment) {
            Ok(()) => {
                self.segment = Some(PlaybackSegment {
                    start_time: time,
                    generation,
                });
                true
            }
            Err(e) => {
                warn!("could not schedule playback: {e}");
                false
            }
        }
    }

    fn start_poller(&mut self) {
        let weak = self.this.clone();
        let generation = self.generation;
        self.poller = Some(RepeatingTask::spawn(
            &self.runtime,
            self.config.poll_interval(),
            move || {
                let Some(shared) = weak.upgrade() else {
                    return ControlFlow::Break(());
                };
                let Ok(mut core) = shared.lock() else {
                    return ControlFlow::Break(());
                };
                core.sample_position(generation)
            },
        ));
    }

    fn sample_position(&mut self, generation: u64) -> ControlFlow<()> {
        if generation != self.generation {
            return ControlFlow::Break(());
        }
        let Some(segment) = self.segment else {
            return ControlFlow::Break(());
        };
        let state = self.state();
        if !state.is_playing {
            return ControlFlow::Break(());
        }
        let Some(player_time) = self.graph.player_time() else {
            trace!("no render time yet");
            return ControlFlow::Continue(());
        };

        let now = (segment.start_time + player_time.seconds())
            .min(state.duration)
            .max(state.current_time);
        self.publisher.update(|s| s.current_time = now);
        trace!("position {now:.3}s");

        if now >= state.duration {
            self.finish_at_end();
            return ControlFlow::Break(());
        }
        ControlFlow::Continue(())
    }

    fn finish_at_end(&mut self) {
        self.halt_output();
        self.publisher.update(|s| {
            s.is_playing = false;
            s.current_time = s.duration;
        });
        info!("⏹️ Reached end of track");
    }

    fn handle_event(&mut self, event: EngineEvent) {
        match event {
            EngineEvent::SegmentFinished { generation } => {
                if self.segment.is_none_or(|s| s.generation != generation) {
                    debug!("ignoring completion of superseded segment {generation}");
                    return;
                }
                self.finish_at_end();
            }
        }
    }
}

/// Plays one audio asset at a time through a rate/pitch stage and publishes
/// its position.
///
/// All operations are synchronous and never fail from the caller's point of
/// view; problems are logged and leave the state unchanged.
pub struct TransportEngine {
    core: Arc<Mutex<EngineCore>>,
    driver: JoinHandle<()>,
}

impl TransportEngine {
    /// Activates the audio session, then starts the graph. Neither failure is
    /// fatal: the first `play` retries the graph.
    pub fn new(
        mut graph: Box<dyn PlaybackGraph>,
        resolver: Arc<dyn ResourceResolver>,
        session: &dyn AudioSession,
        config: EngineConfig,
        runtime: Handle,
    ) -> Self {
        let config = config.validated_or_default();
        if let Err(e) = session.activate() {
            warn!("audio session unavailable: {e}");
        }
        if let Err(e) = graph.start() {
            warn!("playback graph not started: {e}");
        }

        let (events, mut rx) = mpsc::unbounded_channel();
        let core = Arc::new_cyclic(|this| {
            Mutex::new(EngineCore {
                this: this.clone(),
                runtime: runtime.clone(),
                config,
                graph,
                resolver,
                asset: None,
                publisher: StatePublisher::new(PlaybackState::default()),
                segment: None,
                generation: 0,
                poller: None,
                events,
            })
        });

        let weak = Arc::downgrade(&core);
        let driver = runtime.spawn(async move {
            while let Some(event) = rx.recv().await {
                let Some(shared) = weak.upgrade() else {
                    break;
                };
                if let Ok(mut core) = shared.lock() {
                    core.handle_event(event);
                };
            }
        });

        Self { core, driver }
    }

    fn with_core<R>(&self, f: impl FnOnce(&mut EngineCore) -> R) -> Option<R> {
        match self.core.lock() {
            Ok(mut core) => Some(f(&mut core)),
            Err(_) => {
                error!("transport state lock poisoned");
                None
            }
        }
    }

    pub fn load(&self, name: &str) {
        self.with_core(|c| c.load(name));
    }

    pub fn play(&self) {
        self.with_core(|c| c.play());
    }

    pub fn pause(&self) {
        self.with_core(|c| c.pause());
    }

    pub fn stop(&self) {
        self.with_core(|c| c.stop());
    }

    pub fn seek(&self, target_secs: f64) {
        self.with_core(|c| c.seek(target_secs));
    }

    pub fn change_rate(&self, original_tempo: f64, new_tempo: f64) {
        self.with_core(|c| c.change_rate(original_tempo, new_tempo));
    }

    pub fn change_pitch(&self, semitones: i32) {
        self.with_core(|c| c.change_pitch(semitones));
    }

    pub fn state(&self) -> PlaybackState {
        self.with_core(|c| c.state()).unwrap_or_default()
    }

    /// Receives every published state change.
    pub fn subscribe(&self) -> watch::Receiver<PlaybackState> {
        match self.core.lock() {
            Ok(core) => core.publisher.subscribe(),
            Err(poisoned) => poisoned.into_inner().publisher.subscribe(),
        }
    }

    pub fn has_asset(&self) -> bool {
        self.with_core(|c| c.asset.is_some()).unwrap_or(false)
    }
}

impl Drop for TransportEngine {
    fn drop(&mut self) {
        self.driver.abort();
        self.with_core(|c| c.halt_output());
    }
}

#[cfg(test)]
mod tests {
    use super::mock::{write_fixture, ManualGraph};
    use super::*;
    use crate::resource::BundleResolver;
    use crate::session::NullSession;
    use approx::assert_abs_diff_eq;
    use std::time::Duration;
    use tokio::time::sleep;

    struct Rig {
        engine: TransportEngine,
        graph: ManualGraph,
        _dir: tempfile::TempDir,
    }

    fn rig_with(graph: ManualGraph) -> Rig {
        rig_with_config(graph, EngineConfig::default())
    }

    fn rig_with_config(graph: ManualGraph, config: EngineConfig) -> Rig {
        let dir = tempfile::tempdir().unwrap();
        write_fixture(dir.path(), "long", 180.0);
        write_fixture(dir.path(), "short", 1.0);
        std::fs::write(dir.path().join("broken.wav"), b"not a wav").unwrap();
        let engine = TransportEngine::new(
            Box::new(graph.clone()),
            Arc::new(BundleResolver::new(dir.path())),
            &NullSession,
            config,
            Handle::current(),
        );
        Rig { engine, graph, _dir: dir }
    }

    fn rig() -> Rig {
        rig_with(ManualGraph::new())
    }

    #[tokio::test(start_paused = true)]
    async fn play_without_asset_changes_nothing() {
        let r = rig();
        let before = r.engine.state();
        r.engine.play();
        sleep(Duration::from_millis(200)).await;
        assert_eq!(r.engine.state(), before);
        assert!(r.graph.log().scheduled.is_empty());
        assert!(!r.engine.has_asset());
    }

    #[tokio::test(start_paused = true)]
    async fn load_publishes_duration_and_resets_time() {
        let r = rig();
        r.engine.load("long");
        let s = r.engine.state();
        assert!(r.engine.has_asset());
        assert_abs_diff_eq!(s.duration, 180.0, epsilon = 1e-9);
        assert_eq!(s.current_time, 0.0);
        assert!(!s.is_playing);
        assert_eq!(r.graph.log().prepared, vec!["long".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn position_follows_render_clock() {
        let r = rig();
        r.engine.load("long");
        r.engine.play();
        assert!(r.engine.state().is_playing);

        sleep(Duration::from_millis(60)).await;
        let s = r.engine.state();
        assert_abs_diff_eq!(s.current_time, 0.05, epsilon = 0.05);
        assert_abs_diff_eq!(s.duration, 180.0, epsilon = 1e-9);
    }

    #[tokio::test(start_paused = true)]
    async fn seek_clamps_regardless_of_play_state() {
        let r = rig();
        r.engine.load("long");

        r.engine.seek(-5.0);
        assert_eq!(r.engine.state().current_time, 0.0);
        r.engine.seek(500.0);
        assert_eq!(r.engine.state().current_time, 180.0);
        r.engine.seek(42.5);
        assert_eq!(r.engine.state().current_time, 42.5);
        assert!(!r.engine.state().is_playing);

        r.engine.play();
        r.engine.seek(90.0);
        let s = r.engine.state();
        assert_eq!(s.current_time, 90.0);
        assert!(s.is_playing);
    }

    #[tokio::test(start_paused = true)]
    async fn seek_without_asset_or_with_nan_is_ignored() {
        let r = rig();
        r.engine.seek(10.0);
        assert_eq!(r.engine.state(), PlaybackState::default());

        r.engine.load("long");
        r.engine.seek(20.0);
        r.engine.seek(f64::NAN);
        assert_eq!(r.engine.state().current_time, 20.0);
    }

    #[tokio::test(start_paused = true)]
    async fn seeking_to_the_end_stops_at_duration() {
        let r = rig();
        r.engine.load("short");
        let duration = r.engine.state().duration;
        r.engine.seek(duration);
        sleep(Duration::from_millis(50)).await;
        let s = r.engine.state();
        assert!(!s.is_playing);
        assert_eq!(s.current_time, duration);

        r.engine.seek(0.0);
        r.engine.play();
        r.engine.seek(duration);
        sleep(Duration::from_millis(50)).await;
        let s = r.engine.state();
        assert!(!s.is_playing);
        assert_eq!(s.current_time, duration);
    }

    #[tokio::test(start_paused = true)]
    async fn natural_end_leaves_time_at_duration() {
        let r = rig();
        r.engine.load("short");
        r.engine.play();
        sleep(Duration::from_millis(1_100)).await;
        let s = r.engine.state();
        assert!(!s.is_playing);
        assert_eq!(s.current_time, 1.0);

        // The poller is gone: time does not move any more.
        sleep(Duration::from_millis(500)).await;
        assert_eq!(r.engine.state().current_time, 1.0);
    }

    #[tokio::test(start_paused = true)]
    async fn completion_of_current_segment_ends_playback() {
        let r = rig();
        r.engine.load("long");
        r.engine.play();
        sleep(Duration::from_millis(120)).await;
        r.graph.finish_segment();
        sleep(Duration::from_millis(1)).await;
        let s = r.engine.state();
        assert!(!s.is_playing);
        assert_eq!(s.current_time, 180.0);
    }

    #[tokio::test(start_paused = true)]
    async fn superseded_completion_is_ignored() {
        let r = rig();
        r.engine.load("long");
        r.engine.play();
        r.engine.seek(50.0);
        // The flush in this seek fires the previous segment's completion.
        r.engine.seek(10.0);
        sleep(Duration::from_millis(1)).await;

        let s = r.engine.state();
        assert!(s.is_playing);
        assert_eq!(s.current_time, 10.0);
        assert!(r.graph.log().fired_on_stop >= 2);

        sleep(Duration::from_millis(110)).await;
        let s = r.engine.state();
        assert!(s.is_playing);
        assert_abs_diff_eq!(s.current_time, 10.1, epsilon = 0.051);
    }

    #[tokio::test(start_paused = true)]
    async fn pause_and_resume_keep_position_continuous() {
        let r = rig();
        r.engine.load("long");
        r.engine.play();
        sleep(Duration::from_millis(210)).await;
        let before = r.engine.state().current_time;
        assert_abs_diff_eq!(before, 0.2, epsilon = 1e-3);

        r.engine.pause();
        assert!(!r.engine.state().is_playing);
        sleep(Duration::from_secs(2)).await;
        assert_eq!(r.engine.state().current_time, before);

        r.engine.play();
        sleep(Duration::from_millis(60)).await;
        let after = r.engine.state().current_time;
        assert!(after >= before);
        assert_abs_diff_eq!(after, before + 0.05, epsilon = 1e-3);

        let last = r.graph.log().scheduled.last().copied().unwrap();
        assert_eq!(last.0, 200);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_resets_time_but_keeps_asset() {
        let r = rig();
        r.engine.load("long");
        r.engine.play();
        sleep(Duration::from_millis(110)).await;
        r.engine.stop();
        let s = r.engine.state();
        assert!(!s.is_playing);
        assert_eq!(s.current_time, 0.0);
        assert!(r.engine.has_asset());

        r.engine.play();
        assert!(r.engine.state().is_playing);
    }

    #[tokio::test(start_paused = true)]
    async fn loading_while_playing_discards_the_old_track() {
        let r = rig();
        r.engine.load("long");
        r.engine.play();
        sleep(Duration::from_millis(120)).await;
        assert!(r.engine.state().current_time > 0.0);

        r.engine.load("short");
        sleep(Duration::from_millis(1)).await;
        let s = r.engine.state();
        assert!(!s.is_playing);
        assert_eq!(s.current_time, 0.0);
        assert_eq!(s.duration, 1.0);
        assert_eq!(r.graph.log().fired_on_stop, 1);

        sleep(Duration::from_millis(300)).await;
        let s = r.engine.state();
        assert!(!s.is_playing);
        assert_eq!(s.current_time, 0.0);
        assert_eq!(r.graph.log().prepared, vec!["long".to_string(), "short".to_string()]);

        r.engine.play();
        sleep(Duration::from_millis(60)).await;
        assert_abs_diff_eq!(r.engine.state().current_time, 0.05, epsilon = 1e-3);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_poll_interval_falls_back_to_default() {
        let config = EngineConfig {
            poll_interval_ms: 0,
            ..Default::default()
        };
        let r = rig_with_config(ManualGraph::new(), config);
        r.engine.load("long");
        r.engine.play();

        sleep(Duration::from_millis(30)).await;
        assert_eq!(r.engine.state().current_time, 0.0);
        sleep(Duration::from_millis(30)).await;
        assert_abs_diff_eq!(r.engine.state().current_time, 0.05, epsilon = 1e-3);
        assert!(r.engine.state().is_playing);
    }

    #[tokio::test(start_paused = true)]
    async fn rate_changes() {
        let r = rig();
        r.engine.change_rate(120.0, 120.0);
        assert_eq!(r.engine.state().rate_factor, 1.0);

        r.engine.change_rate(100.0, 150.0);
        assert_eq!(r.engine.state().rate_factor, 1.5);
        r.engine.change_rate(0.0, 150.0);
        assert_eq!(r.engine.state().rate_factor, 1.5);
        assert_eq!(r.graph.log().rate, 1.5);
    }

    #[tokio::test(start_paused = true)]
    async fn faster_rate_moves_position_faster() {
        let r = rig();
        r.engine.load("long");
        r.engine.change_rate(100.0, 200.0);
        r.engine.play();
        sleep(Duration::from_millis(110)).await;
        assert_abs_diff_eq!(r.engine.state().current_time, 0.2, epsilon = 1e-3);
    }

    #[tokio::test(start_paused = true)]
    async fn pitch_is_applied_in_cents() {
        let r = rig();
        r.engine.change_pitch(-2);
        assert_eq!(r.engine.state().pitch_semitones, -2);
        assert_eq!(r.graph.log().cents, -200.0);
        assert_eq!(r.engine.state().rate_factor, 1.0);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_loads_keep_previous_asset() {
        let r = rig();
        r.engine.load("long");
        r.engine.seek(30.0);

        r.engine.load("missing");
        let s = r.engine.state();
        assert!(r.engine.has_asset());
        assert_eq!(s.duration, 180.0);
        assert_eq!(s.current_time, 0.0);

        r.engine.load("broken");
        assert_eq!(r.engine.state().duration, 180.0);
        assert_eq!(r.graph.log().prepared.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn graph_start_failure_is_retried_on_play() {
        let graph = ManualGraph::new();
        graph.fail_next_starts(2);
        let r = rig_with(graph);
        r.engine.load("long");

        r.engine.play();
        assert!(!r.engine.state().is_playing);

        r.engine.play();
        assert!(r.engine.state().is_playing);
        assert_eq!(r.graph.log().starts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stopped_graph_is_restarted_lazily() {
        let r = rig();
        r.engine.load("long");
        r.graph.crash();
        r.engine.play();
        assert!(r.engine.state().is_playing);
        assert_eq!(r.graph.log().starts, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn subscribers_see_each_change() {
        let r = rig();
        let mut rx = r.engine.subscribe();
        r.engine.load("long");
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().duration, 180.0);

        r.engine.play();
        rx.changed().await.unwrap();
        assert!(rx.borrow_and_update().is_playing);

        sleep(Duration::from_millis(60)).await;
        assert!(rx.has_changed().unwrap());
        assert!(rx.borrow_and_update().current_time > 0.0);
    }
}
