//! XREcho Deterministic Simulation Harness
//!
//! This crate provides a scripted XR scene in which recordings can be made
//! and replayed without a game engine.
//!
//! # Core Principle: Same Seed, Same Files
//!
//! Every source of non-determinism is controlled:
//! - **Time**: a virtual clock drives file stamps and tick columns
//! - **Motion**: walkers follow a random walk seeded from one 64-bit seed
//! - **Scenes**: reloading a scene repopulates it from the seed and its name
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                       Harness                        │
//! │  ┌────────────┐   update(dt)   ┌──────────────────┐  │
//! │  │ SimContext │◄──────────────►│   EchoSession    │  │
//! │  └────────────┘                │ Recorder/Replayer│  │
//! │                                └────────┬─────────┘  │
//! │                          SceneHost      │            │
//! │                        ┌────────────────▼─────────┐  │
//! │                        │  SimScene (rig, crowd,   │  │
//! │                        │  props, scene loads)     │  │
//! │                        └──────────────────────────┘  │
//! └──────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use xrecho_sim::{ScenarioRunner, scenarios::ScenarioId};
//!
//! let runner = ScenarioRunner::new(42, "/tmp/xrecho").with_duration(5.0);
//! let result = runner.run(ScenarioId::SceneHop);
//! assert!(result.passed);
//! ```

mod context;
mod exporter;
mod runner;
pub mod scenarios;
pub mod scene;

pub use context::SimContext;
pub use exporter::{EntityPose, ReplayExport, ReplayFrame};
pub use runner::{
    max_position_error, record_walk, replay_recorded, Harness, ReplaySummary, ScenarioMetrics, ScenarioResult,
    ScenarioRunner, SimError, HOP_SCENE, POSITION_TOLERANCE, START_SCENE,
};
pub use scene::{SceneLayout, SimEntity, SimScene};
