//! XREcho Core - Deterministic Record/Replay for Tracked XR Sessions
//!
//! This library captures what tracked entities did during an interactive
//! session and plays it back:
//! 1. **Record**: variable-rate, change-suppressed sampling of poses and camera
//!    intrinsics plus a discrete event log, written as delimited text files
//! 2. **Replay**: a virtual clock merging the object and event streams of one
//!    or more recordings, with pause, timescale, seek and scene reloads
//! 3. **Space**: dwell-time heatmaps (Gaussian smoothed) and simplified
//!    trajectories derived from the recorded positions

pub mod behaviors;
pub mod codec;
pub mod config;
pub mod dataset;
pub mod error;
pub mod loader;
pub mod naming;
pub mod session;
pub mod tracking;
pub mod trajectory;
pub mod xrecho_record;
pub mod xrecho_replay;
pub mod xrecho_space;

#[cfg(test)]
mod test_support;

// Re-export key types for convenience
pub use behaviors::{BehaviorRegistry, ReplayBehavior, Trail};
pub use codec::{read_table, Dialect, Field, Row, TableWriter};
pub use config::{EchoConfig, RecorderConfig};
pub use dataset::RecordTrace;
pub use error::{EchoError, Result};
pub use loader::{load_recording, BackgroundLoad, RecordingData};
pub use naming::{scan_session, RecordingFiles};
pub use session::EchoSession;
pub use tracking::{ActionKind, TrackedEntity, TrackingRoster};
pub use trajectory::{simplify_trajectory, PolylineSink, TrajectorySettings};
pub use xrecho_record::{Recorder, RecordingMetadata};
pub use xrecho_replay::{ReplayState, Replayer};
pub use xrecho_space::{GaussianKernel, Heatmap, HeatmapEngine, HeatmapGrid, PlaneBounds};
