//! JSON exporter for replayed frames.
//!
//! Exports what a replay put in the scene, frame by frame, so external
//! viewers can plot it without parsing the recording files.

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use xrecho_env::Transform;

/// A single frame of replayed data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplayFrame {
    /// Replay clock in seconds
    pub time_sec: f32,

    /// Pose of every scene entity
    pub entities: Vec<EntityPose>,

    /// Events replayed since the previous frame
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<String>,
}

/// Pose of an entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityPose {
    pub path: String,
    pub position: [f32; 3],

    /// Euler angles in degrees
    pub rotation: [f32; 3],
}

impl EntityPose {
    pub fn new(path: &str, transform: &Transform) -> Self {
        let array = |v: Vector3<f32>| [v.x, v.y, v.z];
        Self {
            path: path.to_string(),
            position: array(transform.position),
            rotation: array(transform.rotation),
        }
    }
}

/// Complete replay export.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplayExport {
    /// Scenario name, or `replay` for a plain session replay
    pub scenario: String,

    /// Seed of the simulated scene
    pub seed: u64,

    /// Replay clock of the last frame
    pub duration_sec: f32,

    /// Frames in replay order
    pub frames: Vec<ReplayFrame>,

    /// Whether the replay matched the recording
    pub passed: bool,

    /// Largest position gap between recorded and replayed entities (m)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_position_error: Option<f32>,
}

impl ReplayExport {
    pub fn new(scenario: &str, seed: u64) -> Self {
        Self {
            scenario: scenario.to_string(),
            seed,
            duration_sec: 0.0,
            frames: Vec::new(),
            passed: false,
            max_position_error: None,
        }
    }

    /// Appends a frame; the export lasts until its time.
    pub fn add_frame(&mut self, frame: ReplayFrame) {
        self.duration_sec = frame.time_sec;
        self.frames.push(frame);
    }

    /// Records the verdict once the replay is over.
    pub fn finalize(&mut self, passed: bool, max_position_error: Option<f32>) {
        self.passed = passed;
        self.max_position_error = max_position_error;
    }

    /// Writes pretty JSON to `path`, replacing any previous export.
    pub fn write_to_file(&self, path: &Path) -> std::io::Result<()> {
        let mut file = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(&mut file, self)?;
        file.flush()
    }
}
