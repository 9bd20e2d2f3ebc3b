//! Scenario runner - records a simulated scene, replays it into a fresh one
//! and compares what the replay produced with what was recorded.

use crate::context::SimContext;
use crate::exporter::{EntityPose, ReplayExport, ReplayFrame};
use crate::scenarios::ScenarioId;
use crate::scene::{SceneLayout, SimScene, VISITOR_PATH};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};
use xrecho_core::naming::scan_session;
use xrecho_core::{BehaviorRegistry, EchoConfig, EchoError, EchoSession, RecordingFiles, ReplayState, TrackedEntity};
use xrecho_env::{EnvError, Transform};

/// Largest position gap (m) tolerated between recorded and replayed poses.
pub const POSITION_TOLERANCE: f32 = 1e-4;

/// Wait between frames while a background load is pending.
const LOAD_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Scene every scenario starts in.
pub const START_SCENE: &str = "Lobby";

/// Scene the scene hop scenario moves to.
pub const HOP_SCENE: &str = "Garden";

/// Errors of a simulation run.
#[derive(Debug, Error)]
pub enum SimError {
    #[error(transparent)]
    Echo(#[from] EchoError),

    #[error(transparent)]
    Env(#[from] EnvError),

    #[error("Export failed: {0}")]
    Export(#[from] std::io::Error),

    #[error("No recording in {0}")]
    NoRecording(PathBuf),

    #[error("Replay did not reach the end within {0} ticks")]
    Timeout(u64),
}

// ============================================================================
// HARNESS
// ============================================================================

/// A simulated host frame loop around one session.
pub struct Harness {
    pub context: Arc<SimContext>,
    pub scene: SimScene,
    pub session: EchoSession,

    /// Frame duration (s)
    pub dt: f32,
}

impl Harness {
    /// # Arguments
    /// * `config` - Session configuration
    /// * `context` - Wall clock of the recorder
    /// * `scene` - Freshly populated scene
    /// * `tracked` - Statically configured tracked entities
    /// * `tick_rate_hz` - Host frame rate
    pub fn new(
        config: EchoConfig,
        context: Arc<SimContext>,
        scene: SimScene,
        tracked: Vec<TrackedEntity>,
        tick_rate_hz: u32,
    ) -> Result<Self, SimError> {
        let mut session = EchoSession::new(config, context.clone(), BehaviorRegistry::with_builtins(), tracked)?;
        session.attach(&scene);
        Ok(Self {
            context,
            scene,
            session,
            dt: 1.0 / tick_rate_hz.max(1) as f32,
        })
    }

    /// One host frame: walkers move (when `simulate`), the clock advances and
    /// the engines run. Completed scene loads are reported to the session.
    pub fn frame(&mut self, simulate: bool) -> Result<(), SimError> {
        if simulate {
            self.scene.step(self.dt);
        }
        self.context.advance_secs(self.dt);
        self.session.update(&mut self.scene, self.dt)?;
        if self.scene.take_loaded() {
            self.session.on_scene_loaded(&self.scene)?;
        }
        Ok(())
    }

    /// Runs `ticks` simulated frames.
    pub fn simulate(&mut self, ticks: u64) -> Result<(), SimError> {
        for _ in 0..ticks {
            self.frame(true)?;
        }
        Ok(())
    }

    /// Moves to another scene through the session.
    pub fn change_scene(&mut self, name: &str) -> Result<(), SimError> {
        self.session.change_scene(&mut self.scene, name)?;
        if self.scene.take_loaded() {
            self.session.on_scene_loaded(&self.scene)?;
        }
        Ok(())
    }

    /// Stops the recording in progress; returns the bytes it wrote.
    pub fn stop_recording(&mut self) -> Result<usize, SimError> {
        let bytes = self.session.recorder().files_size();
        self.session.stop_recording()?;
        Ok(bytes)
    }

    /// Ticks the replay until it pauses at the end. Frames spent waiting for
    /// a background load do not count.
    ///
    /// # Arguments
    /// * `max_ticks` - Give up after this many frames
    /// * `export` - Collects one frame every `every` ticks
    pub fn play_to_end(&mut self, max_ticks: u64, mut export: Option<(&mut ReplayExport, u64)>) -> Result<u64, SimError> {
        let mut tick = 0;
        while tick < max_ticks {
            if self.session.replayer().is_paused_at_end() {
                return Ok(tick);
            }
            let loading = self.session.replayer().state() == ReplayState::Loading;
            self.frame(false)?;
            if loading {
                std::thread::sleep(LOAD_POLL_INTERVAL);
                continue;
            }

            if let Some((export, every)) = export.as_mut() {
                let events = self.session.replayer_mut().take_fired_events();
                if tick % (*every).max(1) == 0 || !events.is_empty() {
                    export.add_frame(ReplayFrame {
                        time_sec: self.session.replayer().current_time(),
                        entities: self.poses(),
                        events,
                    });
                }
            }
            tick += 1;
        }
        Err(SimError::Timeout(max_ticks))
    }

    pub fn poses(&self) -> Vec<EntityPose> {
        self.scene
            .snapshot()
            .iter()
            .map(|(path, transform)| EntityPose::new(path, transform))
            .collect()
    }
}

/// Largest position gap between two snapshots of the same layout.
pub fn max_position_error(expected: &[(String, Transform)], actual: &[(String, Transform)]) -> f32 {
    if expected.len() != actual.len() {
        return f32::INFINITY;
    }
    expected
        .iter()
        .zip(actual)
        .map(|((p1, t1), (p2, t2))| {
            if p1 != p2 {
                f32::INFINITY
            } else {
                (t1.position - t2.position).norm()
            }
        })
        .fold(0.0, f32::max)
}

// ============================================================================
// SCENARIOS
// ============================================================================

/// Results from running a scenario.
#[derive(Debug, Clone)]
pub struct ScenarioResult {
    /// Scenario that was run
    pub scenario: ScenarioId,

    /// Seed used
    pub seed: u64,

    /// Whether scenario passed all assertions
    pub passed: bool,

    /// Recorded frames
    pub total_ticks: u64,

    /// Replay clock when the replay paused at the end
    pub final_time_secs: f32,

    /// Failure message if any
    pub failure_reason: Option<String>,

    /// Metrics collected during run
    pub metrics: ScenarioMetrics,
}

/// Metrics collected during scenario execution.
#[derive(Debug, Clone, Default)]
pub struct ScenarioMetrics {
    /// Recordings written
    pub recordings: usize,

    /// Bytes written to data files
    pub bytes_written: usize,

    /// Events replayed
    pub replayed_events: usize,

    /// Object or event rows the replay could not apply
    pub skipped_rows: usize,

    /// Largest recorded/replayed position gap (m)
    pub max_position_error: f32,
}

/// What a scenario observed before its verdict.
struct Outcome {
    final_time: f32,
    failure: Option<String>,
}

/// Runs record/replay scenarios.
pub struct ScenarioRunner {
    /// Configuration seed
    seed: u64,

    /// Tick rate in Hz
    tick_rate_hz: u32,

    /// Recorded duration in seconds
    duration_secs: f32,

    /// Folder receiving the `Recordings/` tree
    root: PathBuf,

    /// Replay export destination
    export: Option<PathBuf>,
}

impl ScenarioRunner {
    /// Creates a new scenario runner writing under `root`.
    pub fn new(seed: u64, root: impl Into<PathBuf>) -> Self {
        Self {
            seed,
            tick_rate_hz: 30,
            duration_secs: 5.0,
            root: root.into(),
            export: None,
        }
    }

    /// Sets the tick rate.
    pub fn with_tick_rate(mut self, hz: u32) -> Self {
        self.tick_rate_hz = hz.max(1);
        self
    }

    /// Sets the recorded duration.
    pub fn with_duration(mut self, secs: f32) -> Self {
        self.duration_secs = secs;
        self
    }

    /// Exports the replayed frames to a JSON file.
    pub fn with_export(mut self, path: impl Into<PathBuf>) -> Self {
        self.export = Some(path.into());
        self
    }

    fn ticks(&self) -> u64 {
        (self.duration_secs * self.tick_rate_hz as f32).ceil().max(2.0) as u64
    }

    /// Session folder of a scenario, emptied first so stamps never collide.
    fn config(&self, scenario: ScenarioId) -> Result<EchoConfig, SimError> {
        let mut config = EchoConfig {
            root: self.root.clone(),
            project: "scenarios".to_string(),
            session: format!("{}-{}", scenario.name(), self.seed),
            ..EchoConfig::default()
        };
        config.recorder.default_rate_hz = self.tick_rate_hz as f32;

        let folder = config.session_dir();
        if folder.exists() {
            std::fs::remove_dir_all(&folder)?;
        }
        Ok(config)
    }

    fn harness(&self, config: &EchoConfig, scenario: ScenarioId, scene: &str) -> Result<Harness, SimError> {
        let layout = scenario.layout();
        let tracked = match scenario {
            ScenarioId::Crowd => vec![TrackedEntity::pose(VISITOR_PATH, self.tick_rate_hz as f32); layout.visitors],
            _ => Vec::new(),
        };
        Harness::new(
            config.clone(),
            SimContext::shared(),
            SimScene::new(self.seed, scene, layout),
            tracked,
            self.tick_rate_hz,
        )
    }

    /// Runs a scenario and returns the result.
    pub fn run(&self, scenario: ScenarioId) -> ScenarioResult {
        info!("Starting scenario: {} (seed={})", scenario.name(), self.seed);
        let mut metrics = ScenarioMetrics::default();
        let mut export = ReplayExport::new(scenario.name(), self.seed);

        let outcome = match scenario {
            ScenarioId::Walkabout | ScenarioId::Crowd => self.run_round_trip(scenario, &mut metrics, &mut export),
            ScenarioId::SceneHop => self.run_scene_hop(&mut metrics, &mut export),
            ScenarioId::Scrub => self.run_scrub(&mut metrics),
        };

        let (passed, final_time, failure_reason) = match outcome {
            Ok(Outcome { final_time, failure }) => (failure.is_none(), final_time, failure),
            Err(e) => (false, 0.0, Some(e.to_string())),
        };

        if let Some(path) = &self.export {
            export.finalize(passed, Some(metrics.max_position_error));
            match export.write_to_file(path) {
                Ok(()) => info!("Exported {} frames to {}", export.frames.len(), path.display()),
                Err(e) => warn!("Failed to write export: {}", e),
            }
        }

        ScenarioResult {
            scenario,
            seed: self.seed,
            passed,
            total_ticks: self.ticks(),
            final_time_secs: final_time,
            failure_reason,
            metrics,
        }
    }

    fn export_target<'a>(&self, export: &'a mut ReplayExport) -> Option<(&'a mut ReplayExport, u64)> {
        self.export
            .is_some()
            .then(|| (export, (self.tick_rate_hz / 10).max(1) as u64))
    }

    /// Record, replay into a fresh scene, compare the final poses.
    fn run_round_trip(
        &self,
        scenario: ScenarioId,
        metrics: &mut ScenarioMetrics,
        export: &mut ReplayExport,
    ) -> Result<Outcome, SimError> {
        let config = self.config(scenario)?;
        let ticks = self.ticks();

        let mut recording = self.harness(&config, scenario, START_SCENE)?;
        recording.session.start_recording(&recording.scene)?;
        recording.simulate(ticks)?;
        metrics.bytes_written = recording.stop_recording()?;
        metrics.recordings = 1;
        let expected = recording.scene.snapshot();

        let mut replay = self.harness(&config, scenario, START_SCENE)?;
        replay.session.replay_session(&replay.scene, true)?;
        replay.play_to_end(ticks * 2 + 100, self.export_target(export))?;

        metrics.skipped_rows = replay.session.replayer().skipped_rows();
        metrics.max_position_error = max_position_error(&expected, &replay.scene.snapshot());
        debug!("{}: max position error {:.6}m", scenario, metrics.max_position_error);

        Ok(Outcome {
            final_time: replay.session.replayer().current_time(),
            failure: (metrics.max_position_error > POSITION_TOLERANCE)
                .then(|| format!("replayed poses off by {:.4}m", metrics.max_position_error)),
        })
    }

    /// Record across a scene change, then replay the first recording: it
    /// must reload the second scene and resume; the second recording must
    /// replay onto that scene.
    fn run_scene_hop(&self, metrics: &mut ScenarioMetrics, export: &mut ReplayExport) -> Result<Outcome, SimError> {
        let config = self.config(ScenarioId::SceneHop)?;
        let half = self.ticks() / 2;

        let mut recording = self.harness(&config, ScenarioId::SceneHop, START_SCENE)?;
        recording.session.start_recording(&recording.scene)?;
        recording.simulate(half)?;
        metrics.bytes_written = recording.session.recorder().files_size();
        recording.change_scene(HOP_SCENE)?;
        if !recording.session.recorder().is_recording() {
            return Ok(Outcome {
                final_time: 0.0,
                failure: Some("recording did not resume after the scene change".into()),
            });
        }
        recording.simulate(half)?;
        metrics.bytes_written += recording.stop_recording()?;
        metrics.recordings = recording.session.recorder().history().len();
        let expected = recording.scene.snapshot();

        let folder = config.session_dir();
        let of_scene = |scene: &str| -> Result<Vec<RecordingFiles>, SimError> {
            let files = scan_session(&config, &folder, Some(scene));
            if files.is_empty() {
                return Err(SimError::NoRecording(folder.clone()));
            }
            Ok(files)
        };

        let mut replay = self.harness(&config, ScenarioId::SceneHop, START_SCENE)?;
        replay.session.replay(&replay.scene, of_scene(START_SCENE)?, false)?;
        replay.play_to_end(half * 2 + 100, self.export_target(export))?;
        metrics.replayed_events += replay.session.replayer_mut().take_fired_events().len();

        if replay.scene.load_history() != [HOP_SCENE.to_string()] {
            return Ok(Outcome {
                final_time: replay.session.replayer().current_time(),
                failure: Some(format!("replay loaded scenes {:?}", replay.scene.load_history())),
            });
        }

        replay.session.replay(&replay.scene, of_scene(HOP_SCENE)?, false)?;
        replay.play_to_end(half * 2 + 100, None)?;

        metrics.skipped_rows = replay.session.replayer().skipped_rows();
        metrics.max_position_error = max_position_error(&expected, &replay.scene.snapshot());

        Ok(Outcome {
            final_time: replay.session.replayer().current_time(),
            failure: (metrics.max_position_error > POSITION_TOLERANCE)
                .then(|| format!("{} replay off by {:.4}m", HOP_SCENE, metrics.max_position_error)),
        })
    }

    /// Replay halfway, remember the poses, play to the end, seek back to the
    /// same time: the poses must match.
    fn run_scrub(&self, metrics: &mut ScenarioMetrics) -> Result<Outcome, SimError> {
        let config = self.config(ScenarioId::Scrub)?;
        let ticks = self.ticks();

        let mut recording = self.harness(&config, ScenarioId::Scrub, START_SCENE)?;
        recording.session.start_recording(&recording.scene)?;
        recording.simulate(ticks)?;
        metrics.bytes_written = recording.stop_recording()?;
        metrics.recordings = 1;

        let mut replay = self.harness(&config, ScenarioId::Scrub, START_SCENE)?;
        replay.session.replay_session(&replay.scene, false)?;
        for _ in 0..ticks / 2 {
            replay.frame(false)?;
        }
        let mid_time = replay.session.replayer().current_time();
        let incremental = replay.scene.snapshot();

        replay.play_to_end(ticks * 2 + 100, None)?;
        replay.session.replayer_mut().seek_to(mid_time);
        replay.frame(false)?;

        metrics.max_position_error = max_position_error(&incremental, &replay.scene.snapshot());
        let time_error = (replay.session.replayer().current_time() - mid_time).abs();

        let failure = if time_error > 0.0 {
            Some(format!("seek landed {:.4}s away from {:.4}s", time_error, mid_time))
        } else if metrics.max_position_error > 0.0 {
            Some(format!("seek differs from incremental replay by {:.4}m", metrics.max_position_error))
        } else {
            None
        };
        Ok(Outcome {
            final_time: mid_time,
            failure,
        })
    }
}

// ============================================================================
// COMMANDS
// ============================================================================

/// Result of a plain session replay.
#[derive(Debug, Clone)]
pub struct ReplaySummary {
    pub recordings: usize,
    pub total_time: f32,
    pub ticks: u64,
    pub fired_events: Vec<String>,
    pub skipped_rows: usize,
}

/// Records a seeded walk for `duration` seconds into the configured session.
///
/// Stamps use the real clock so repeated runs never collide.
pub fn record_walk(
    config: &EchoConfig,
    seed: u64,
    layout: SceneLayout,
    duration: f32,
    tick_rate_hz: u32,
) -> Result<usize, SimError> {
    let context = Arc::new(SimContext::starting_at(std::time::SystemTime::now()));
    let mut harness = Harness::new(
        config.clone(),
        context,
        SimScene::new(seed, START_SCENE, layout),
        Vec::new(),
        tick_rate_hz,
    )?;

    harness.session.start_recording(&harness.scene)?;
    harness.simulate((duration * tick_rate_hz as f32).ceil() as u64)?;
    let bytes = harness.stop_recording()?;
    harness.session.close()?;
    Ok(bytes)
}

/// Replays every recording of the configured session into a fresh scene.
///
/// # Arguments
/// * `export` - Writes the replayed frames as JSON
pub fn replay_recorded(
    config: &EchoConfig,
    seed: u64,
    layout: SceneLayout,
    timescale: f32,
    tick_rate_hz: u32,
    export: Option<&Path>,
) -> Result<ReplaySummary, SimError> {
    let folder = config.session_dir();
    let files = scan_session(config, &folder, None);
    let Some(first) = files.first() else {
        return Err(SimError::NoRecording(folder));
    };
    let scene = SimScene::new(seed, &first.scene, layout);
    let recordings = files.len();

    let mut harness = Harness::new(config.clone(), SimContext::shared(), scene, Vec::new(), tick_rate_hz)?;
    harness.session.replay(&harness.scene, files, false)?;
    harness.session.replayer_mut().set_timescale(timescale);

    let total_time = harness.session.replayer().total_time();
    let budget = (total_time / (harness.dt * timescale.max(0.01))).ceil() as u64 + 100;
    let mut frames = ReplayExport::new("replay", seed);
    let every = (tick_rate_hz / 10).max(1) as u64;
    let ticks = harness.play_to_end(budget, export.is_some().then_some((&mut frames, every)))?;

    if let Some(path) = export {
        frames.finalize(true, None);
        frames.write_to_file(path)?;
        info!("Exported {} frames to {}", frames.frames.len(), path.display());
    }

    let fired_events = frames
        .frames
        .iter()
        .flat_map(|f| f.events.iter().cloned())
        .chain(harness.session.replayer_mut().take_fired_events())
        .collect();

    Ok(ReplaySummary {
        recordings,
        total_time,
        ticks,
        fired_events,
        skipped_rows: harness.session.replayer().skipped_rows(),
    })
}
