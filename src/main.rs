// src/main.rs

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind, KeyModifiers},
    terminal::{disable_raw_mode, enable_raw_mode},
};

use backing_drums::{
    BundleResolver, DeviceGraph, DeviceSession, EngineConfig, Metronome, PlaybackState,
    TransportEngine,
};

const SEEK_STEP_SECS: f64 = 5.0;
const TEMPO_STEP_BPM: f64 = 5.0;

struct Practice {
    engine: TransportEngine,
    metronome: Metronome,
    original_bpm: f64,
    bpm: f64,
    semitones: i32,
}

impl Practice {
    /// Returns false when the user asked to quit.
    fn handle_key(&mut self, code: KeyCode) -> bool {
        match code {
            KeyCode::Char('q') | KeyCode::Esc => return false,
            KeyCode::Char(' ') => {
                if self.engine.state().is_playing {
                    self.engine.pause();
                } else {
                    self.engine.play();
                }
            }
            KeyCode::Char('s') => self.engine.stop(),
            KeyCode::Left => {
                let now = self.engine.state().current_time;
                self.engine.seek(now - SEEK_STEP_SECS);
            }
            KeyCode::Right => {
                let now = self.engine.state().current_time;
                self.engine.seek(now + SEEK_STEP_SECS);
            }
            KeyCode::Char('+') | KeyCode::Char('=') => self.set_tempo(self.bpm + TEMPO_STEP_BPM),
            KeyCode::Char('-') => self.set_tempo(self.bpm - TEMPO_STEP_BPM),
            KeyCode::Char(']') => self.set_pitch(self.semitones + 1),
            KeyCode::Char('[') => self.set_pitch(self.semitones - 1),
            KeyCode::Char('m') => {
                if self.metronome.is_running() {
                    self.metronome.stop();
                } else {
                    self.metronome.start(self.bpm);
                }
            }
            _ => {}
        }
        true
    }

    fn set_tempo(&mut self, bpm: f64) {
        if bpm <= 0.0 {
            return;
        }
        self.bpm = bpm;
        self.engine.change_rate(self.original_bpm, bpm);
        self.metronome.update(bpm);
    }

    fn set_pitch(&mut self, semitones: i32) {
        self.semitones = semitones.clamp(-12, 12);
        self.engine.change_pitch(self.semitones);
    }
}

fn status_line(state: &PlaybackState, bpm: f64, metronome_on: bool) -> String {
    format!(
        "\r{} {:>7.2}s / {:>7.2}s | {:>5.1} BPM (x{:.2}) | {:+} st | click {}   ",
        if state.is_playing { "▶" } else { "⏸" },
        state.current_time,
        state.duration,
        bpm,
        state.rate_factor,
        state.pitch_semitones,
        if metronome_on { "on " } else { "off" },
    )
}

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 3 {
        eprintln!("usage: practice <bundle-dir> <track> [bpm] [config.json]");
        std::process::exit(2);
    }
    let bundle = args[1].clone();
    let track = args[2].clone();
    let original_bpm: f64 = match args.get(3) {
        Some(s) => s.parse().with_context(|| format!("invalid bpm '{s}'"))?,
        None => 120.0,
    };
    let config = match args.get(4) {
        Some(path) => EngineConfig::from_json_file(path)?,
        None => EngineConfig::default(),
    };

    let runtime = tokio::runtime::Runtime::new().context("starting tokio runtime")?;
    let resolver = Arc::new(BundleResolver::new(&bundle));

    let engine = TransportEngine::new(
        Box::new(DeviceGraph::new(&config)),
        resolver.clone(),
        &DeviceSession,
        config.clone(),
        runtime.handle().clone(),
    );
    let metronome = Metronome::with_device_click(resolver.as_ref(), &config, runtime.handle().clone());

    engine.load(&track);
    if !engine.has_asset() {
        anyhow::bail!("could not load '{track}' from {bundle}");
    }

    let mut practice = Practice {
        engine,
        metronome,
        original_bpm,
        bpm: original_bpm,
        semitones: 0,
    };
    let mut updates = practice.engine.subscribe();

    println!(
        "[SPACE] Play/Pause | [S] Stop | [←/→] Seek | [+/-] Tempo | [ [ / ] ] Pitch | [M] Metronome | [Q] Quit"
    );
    enable_raw_mode()?;

    let mut stdout = std::io::stdout();
    loop {
        if event::poll(Duration::from_millis(50))? {
            if let Event::Key(ev) = event::read()? {
                if ev.kind == KeyEventKind::Press {
                    if ev.code == KeyCode::Char('c') && ev.modifiers.contains(KeyModifiers::CONTROL)
                    {
                        break;
                    }
                    if !practice.handle_key(ev.code) {
                        break;
                    }
                }
            }
        }

        let state = *updates.borrow_and_update();
        let line = status_line(&state, practice.bpm, practice.metronome.is_running());
        print!("{line}");
        stdout.flush()?;
    }

    disable_raw_mode()?;
    practice.metronome.stop();
    practice.engine.stop();
    println!("\n🛑 Exiting practice.");
    Ok(())
}
