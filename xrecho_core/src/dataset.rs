//! Position traces for the analysis engines.
//!
//! A trace is the head position (action 0) of one recording, with the
//! recording's duration. It can come from a loaded replay or straight from
//! the objects data files of a project.

use crate::codec::read_table;
use crate::config::{subfolders, EchoConfig};
use crate::error::Result;
use crate::loader::{ObjectSample, RecordingData};
use crate::naming::scan_session;
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, error, info};

/// Action whose positions make up a trace (the first tracked entity).
pub const TRACE_ACTION: usize = 0;

/// Positions of one recording over time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordTrace {
    pub positions: Vec<Vector3<f32>>,

    /// One per position, ascending
    pub timestamps: Vec<f32>,

    /// Timestamp of the last row of the recording, whatever its action
    pub total_duration: f32,
}

impl RecordTrace {
    /// Keeps the positioned rows of [`TRACE_ACTION`].
    pub fn from_samples(objects: &[ObjectSample]) -> Self {
        let (positions, timestamps) = objects
            .iter()
            .filter(|o| o.action_id == TRACE_ACTION)
            .filter_map(|o| Some((o.position?, o.timestamp)))
            .unzip();

        Self {
            positions,
            timestamps,
            total_duration: objects.last().map_or(0.0, |o| o.timestamp),
        }
    }

    pub fn from_recording(data: &RecordingData) -> Self {
        Self::from_samples(&data.objects)
    }

    /// Reads an objects data file on its own; no format file is needed.
    pub fn from_objects_data(path: &Path, config: &EchoConfig) -> Result<Self> {
        let samples: Vec<ObjectSample> = read_table(path, &config.dialect, None)?
            .iter()
            .filter_map(ObjectSample::from_row)
            .collect();
        Ok(Self::from_samples(&samples))
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}

/// Traces of every recording of the current project, across all sessions.
///
/// Unreadable files are logged and skipped.
///
/// # Arguments
/// * `scene` - Only keep recordings made in this scene
pub fn project_traces(config: &EchoConfig, scene: Option<&str>) -> Vec<RecordTrace> {
    let project = config.project_dir();
    let mut traces = Vec::new();

    for session in subfolders(&project) {
        for files in scan_session(config, &project.join(&session), scene) {
            match RecordTrace::from_objects_data(&files.objects_data, config) {
                Ok(trace) => {
                    debug!("{}/{}: {} samples", session, files.stamp, trace.len());
                    traces.push(trace);
                }
                Err(e) => error!("Skipping {}: {}", files.objects_data.display(), e),
            }
        }
    }

    info!("Found {} recordings in project '{}'", traces.len(), config.project);
    traces
}

/// Traces of every recording of the current session.
pub fn session_traces(config: &EchoConfig, scene: Option<&str>) -> Vec<RecordTrace> {
    scan_session(config, &config.session_dir(), scene)
        .iter()
        .filter_map(|files| match RecordTrace::from_objects_data(&files.objects_data, config) {
            Ok(trace) => Some(trace),
            Err(e) => {
                error!("Skipping {}: {}", files.objects_data.display(), e);
                None
            }
        })
        .collect()
}
