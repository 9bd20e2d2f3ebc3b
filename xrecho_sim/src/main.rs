//! XREcho Simulator CLI
//!
//! Record seeded walks, replay them, and turn recordings into heatmaps and
//! trajectories.

use clap::{Parser, Subcommand};
use nalgebra::Vector3;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::SystemTime;
use tracing::{error, info, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use xrecho_core::dataset::{project_traces, session_traces};
use xrecho_core::trajectory::render_trajectory;
use xrecho_core::xrecho_space::{export_heatmap, write_heatmap_csv};
use xrecho_core::{EchoConfig, HeatmapEngine, PlaneBounds, PolylineSink, TrajectorySettings};
use xrecho_sim::scenarios::ScenarioId;
use xrecho_sim::scene::room_bounds;
use xrecho_sim::{record_walk, replay_recorded, ScenarioResult, ScenarioRunner, SceneLayout, SimError};

/// XREcho simulation CLI
#[derive(Parser, Debug)]
#[command(name = "xrecho-sim")]
#[command(about = "Record, replay and analyze simulated XR sessions", long_about = None)]
struct Args {
    /// Config file, created with defaults when absent
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Folder receiving the Recordings/ and Heatmaps/ trees
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    #[arg(long, global = true)]
    project: Option<String>,

    #[arg(long, global = true)]
    session: Option<String>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// JSON output for CI parsing
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Record a seeded walk in the simulated scene
    Record {
        #[arg(short, long, default_value = "42")]
        seed: u64,

        /// Recorded duration in seconds
        #[arg(short, long, default_value = "10")]
        duration: f32,

        /// Host frame rate in Hz
        #[arg(long, default_value = "60")]
        rate: u32,

        /// Walkers sharing one path
        #[arg(long, default_value = "0")]
        visitors: usize,
    },

    /// Replay every recording of the session into a fresh scene
    Replay {
        /// Seed the recording was made with
        #[arg(short, long, default_value = "42")]
        seed: u64,

        #[arg(long, default_value = "1")]
        timescale: f32,

        #[arg(long, default_value = "60")]
        rate: u32,

        #[arg(long, default_value = "0")]
        visitors: usize,

        /// Write the replayed frames to a JSON file
        #[arg(long)]
        export: Option<PathBuf>,
    },

    /// Compute a position heatmap of the session (or project)
    Heatmap {
        /// Grid cells per meter
        #[arg(long, default_value = "10")]
        ppm: f32,

        /// Kernel standard deviation in cells
        #[arg(long, default_value = "2")]
        sigma: f32,

        /// Sum every recording of the project instead of the last one of the session
        #[arg(long)]
        aggregate: bool,

        /// Lower end of the display window, fraction of the hottest cell
        #[arg(long, default_value = "0")]
        lower: f32,

        /// Upper end of the display window, fraction of the hottest cell
        #[arg(long, default_value = "1")]
        upper: f32,

        /// Only recordings of this scene
        #[arg(long)]
        scene: Option<String>,

        /// Size the grid around the recorded positions instead of the room
        #[arg(long)]
        fit: bool,

        /// Write the gaussian grid to this file instead of the Heatmaps/ tree
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Print the simplified trajectories of the session
    Trajectory {
        /// Largest deviation (m) of a dropped point
        #[arg(long, default_value = "0.1")]
        tolerance: f32,

        /// Step (m) above which a new section starts
        #[arg(long, default_value = "0.5")]
        teleport: f32,

        #[arg(long)]
        scene: Option<String>,
    },

    /// Run record/replay scenarios
    Scenario {
        /// Scenario to run (walkabout, scene_hop, crowd, scrub, all)
        #[arg(short = 'S', long, default_value = "all")]
        name: String,

        /// Master seed for determinism (0 = random from time)
        #[arg(short, long, default_value = "42")]
        seed: u64,

        /// Number of consecutive seeds to test
        #[arg(long, default_value = "1")]
        seeds: usize,

        /// Recorded duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: f32,

        /// Export replayed frames to a JSON file (single scenario only)
        #[arg(long)]
        export: Option<PathBuf>,
    },
}

fn main() -> ExitCode {
    let args = Args::parse();

    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str())))
        .with_writer(std::io::stderr)
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
        return ExitCode::FAILURE;
    }

    match run(&args) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

/// Builds the configuration from the file (if any) and the overrides.
fn load_config(args: &Args) -> Result<EchoConfig, SimError> {
    let mut config = match &args.config {
        Some(path) => EchoConfig::load_or_create(path)?,
        None => EchoConfig::default(),
    };
    if let Some(root) = &args.root {
        config.root = root.clone();
    }
    if let Some(project) = &args.project {
        config.project = project.clone();
    }
    if let Some(session) = &args.session {
        config.session = session.clone();
    }
    config.validate()?;
    Ok(config)
}

fn crowd(visitors: usize) -> SceneLayout {
    SceneLayout {
        visitors,
        ..SceneLayout::default()
    }
}

/// Returns whether the command succeeded.
fn run(args: &Args) -> Result<bool, SimError> {
    let config = load_config(args)?;

    match &args.command {
        Command::Record {
            seed,
            duration,
            rate,
            visitors,
        } => {
            let bytes = record_walk(&config, *seed, crowd(*visitors), *duration, *rate)?;
            info!(
                "Recorded {:.1}s into {} ({} bytes)",
                duration,
                config.session_dir().display(),
                bytes
            );
            Ok(true)
        }

        Command::Replay {
            seed,
            timescale,
            rate,
            visitors,
            export,
        } => {
            let summary = replay_recorded(&config, *seed, crowd(*visitors), *timescale, *rate, export.as_deref())?;
            if args.json {
                let report = serde_json::json!({
                    "recordings": summary.recordings,
                    "total_time": summary.total_time,
                    "ticks": summary.ticks,
                    "events": summary.fired_events,
                    "skipped_rows": summary.skipped_rows,
                });
                println!("{}", serde_json::to_string_pretty(&report).map_err(std::io::Error::from)?);
            } else {
                info!(
                    "Replayed {} recordings ({:.2}s) in {} ticks, {} events, {} rows skipped",
                    summary.recordings,
                    summary.total_time,
                    summary.ticks,
                    summary.fired_events.len(),
                    summary.skipped_rows
                );
            }
            Ok(summary.skipped_rows == 0)
        }

        Command::Heatmap {
            ppm,
            sigma,
            aggregate,
            lower,
            upper,
            scene,
            fit,
            out,
        } => {
            let traces = if *aggregate {
                project_traces(&config, scene.as_deref())
            } else {
                session_traces(&config, scene.as_deref())
            };
            if traces.is_empty() {
                return Err(SimError::NoRecording(config.session_dir()));
            }

            let bounds = if *fit {
                PlaneBounds::around(traces.iter().flat_map(|t| t.positions.iter()), 0.5).unwrap_or_else(room_bounds)
            } else {
                room_bounds()
            };
            let engine = HeatmapEngine::new(bounds, *ppm, *sigma)?;
            let heatmap = match traces.last() {
                Some(last) if !*aggregate => engine.single(last, *lower, *upper),
                _ => engine.aggregate(&traces),
            };

            match out {
                Some(path) => {
                    write_heatmap_csv(path, &heatmap.gaussian, &heatmap.normalized, config.dialect)?;
                    info!("Heatmap written to {}", path.display());
                }
                None => {
                    export_heatmap(&config, &heatmap, SystemTime::now())?;
                }
            }

            let (width, height) = engine.grid_dims();
            if args.json {
                let report = serde_json::json!({
                    "recordings": traces.len(),
                    "width": width,
                    "height": height,
                    "max_duration": heatmap.max_duration,
                    "gaussian_max": heatmap.gaussian.max(),
                });
                println!("{}", serde_json::to_string_pretty(&report).map_err(std::io::Error::from)?);
            } else if let Some(max) = heatmap.max_duration {
                info!("{}x{} heatmap, hottest cell {:.2}s", width, height, max);
            }
            Ok(true)
        }

        Command::Trajectory {
            tolerance,
            teleport,
            scene,
        } => {
            let traces = session_traces(&config, scene.as_deref());
            if traces.is_empty() {
                return Err(SimError::NoRecording(config.session_dir()));
            }

            let settings = TrajectorySettings {
                tolerance: *tolerance,
                teleport_threshold: *teleport,
            };
            for (index, trace) in traces.iter().enumerate() {
                let mut report = SectionReport::default();
                render_trajectory(trace, &settings, &mut report);
                info!(
                    "Recording {}: {} samples -> {} sections, {} points, {:.2}m",
                    index,
                    trace.len(),
                    report.sections,
                    report.points,
                    report.length
                );
            }
            Ok(true)
        }

        Command::Scenario {
            name,
            seed,
            seeds,
            duration,
            export,
        } => run_scenarios(args.json, &config, name, *seed, *seeds, *duration, export.as_ref()),
    }
}

/// Counts what a trajectory renders to.
#[derive(Default)]
struct SectionReport {
    sections: usize,
    points: usize,
    length: f32,
}

impl PolylineSink for SectionReport {
    fn section(&mut self, points: &[Vector3<f32>]) {
        self.sections += 1;
        self.points += points.len();
        self.length += points.windows(2).map(|w| (w[1] - w[0]).norm()).sum::<f32>();
    }
}

fn run_scenarios(
    json: bool,
    config: &EchoConfig,
    name: &str,
    seed: u64,
    seeds: usize,
    duration: f32,
    export: Option<&PathBuf>,
) -> Result<bool, SimError> {
    let scenarios: Vec<ScenarioId> = if name == "all" {
        ScenarioId::all()
    } else {
        match name.parse() {
            Ok(scenario) => vec![scenario],
            Err(e) => {
                error!("{}. Available scenarios: walkabout, scene_hop, crowd, scrub, all", e);
                return Ok(false);
            }
        }
    };
    if export.is_some() && (scenarios.len() > 1 || seeds > 1) {
        error!("--export only supports a single scenario and seed");
        return Ok(false);
    }

    let base_seed = if seed == 0 {
        SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(42)
    } else {
        seed
    };

    if !json {
        info!("XREcho simulator v{}", env!("CARGO_PKG_VERSION"));
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    }

    let mut all_results: Vec<ScenarioResult> = Vec::new();
    for seed_offset in 0..seeds.max(1) {
        let seed = base_seed.wrapping_add(seed_offset as u64);
        let mut runner = ScenarioRunner::new(seed, config.root.clone()).with_duration(duration);
        if let Some(path) = export {
            runner = runner.with_export(path);
        }

        for scenario in &scenarios {
            let result = runner.run(*scenario);
            if !json {
                if result.passed {
                    info!(
                        "✓ {} (seed={}) PASSED, max error {:.6}m",
                        scenario.name(),
                        seed,
                        result.metrics.max_position_error
                    );
                } else {
                    error!(
                        "✗ {} (seed={}) FAILED: {}",
                        scenario.name(),
                        seed,
                        result.failure_reason.as_deref().unwrap_or("unknown")
                    );
                }
            }
            all_results.push(result);
        }
    }

    let total = all_results.len();
    let failed_count = all_results.iter().filter(|r| !r.passed).count();

    if json {
        let summary = serde_json::json!({
            "total": total,
            "passed": total - failed_count,
            "failed": failed_count,
            "results": all_results.iter().map(|r| {
                serde_json::json!({
                    "scenario": r.scenario.name(),
                    "seed": r.seed,
                    "passed": r.passed,
                    "ticks": r.total_ticks,
                    "time_secs": r.final_time_secs,
                    "bytes_written": r.metrics.bytes_written,
                    "max_position_error": r.metrics.max_position_error,
                    "failure_reason": r.failure_reason,
                })
            }).collect::<Vec<_>>(),
        });
        println!("{}", serde_json::to_string_pretty(&summary).map_err(std::io::Error::from)?);
    } else {
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
        if failed_count == 0 {
            info!("All {} scenario runs passed", total);
        } else {
            error!("{}/{} scenario runs failed", failed_count, total);
        }
    }

    Ok(failed_count == 0)
}
