//! Recording loader.
//!
//! Parses the files of a recording into replayable streams. Large object
//! data files can be parsed on a worker thread; the replayer polls the result
//! once per tick and consumes nothing before it arrives.

use crate::codec::{read_table, Row};
use crate::config::EchoConfig;
use crate::error::{EchoError, Result};
use crate::naming::RecordingFiles;
use crate::tracking::TrackedEntity;
use crossbeam::channel::{bounded, Receiver, TryRecvError};
use nalgebra::Vector3;
use std::collections::HashMap;
use std::thread::{self, JoinHandle};
use tracing::{debug, error, warn};

/// One row of the objects data stream.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ObjectSample {
    pub timestamp: f32,
    pub action_id: usize,

    /// `None` when the position cells are blank
    pub position: Option<Vector3<f32>>,

    /// `None` when the rotation cells are blank
    pub rotation: Option<Vector3<f32>>,
}

impl ObjectSample {
    pub(crate) fn from_row(row: &Row) -> Option<Self> {
        let timestamp = row.f32("timestamp")?;
        let action_id = row.index("actionId")?;
        let triple = |prefix: &str| {
            ["x", "y", "z"]
                .iter()
                .any(|axis| row.contains(&format!("{prefix}.{axis}")))
                .then(|| row.vec3(prefix))
        };

        Some(Self {
            timestamp,
            action_id,
            position: triple("position"),
            rotation: triple("rotation"),
        })
    }
}

/// One row of the events data stream.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EventSample {
    pub timestamp: f32,
    pub event_id: usize,
}

/// Everything needed to replay one recording.
#[derive(Debug, Clone)]
pub struct RecordingData {
    pub files: RecordingFiles,

    /// Entities in objects format order
    pub entities: Vec<TrackedEntity>,

    pub objects: Vec<ObjectSample>,
    pub events: Vec<EventSample>,

    /// Event dictionary (id -> name)
    pub event_names: HashMap<usize, String>,

    /// Largest timestamp of either stream
    pub total_time: f32,
}

impl RecordingData {
    /// Name of an event id, if the dictionary has it.
    pub fn event_name(&self, id: usize) -> Option<&str> {
        self.event_names.get(&id).map(String::as_str)
    }
}

/// Parses one recording.
///
/// # Errors
/// `MissingFormat` when no objects format file accompanies the data file, or
/// any codec error on the objects files. Missing event files mean "no events".
pub fn load_recording(config: &EchoConfig, files: &RecordingFiles) -> Result<RecordingData> {
    let dialect = &config.dialect;

    let format_path = files
        .objects_format
        .as_ref()
        .ok_or_else(|| EchoError::MissingFormat(files.objects_data.clone()))?;
    let entities: Vec<TrackedEntity> = read_table(format_path, dialect, None)?
        .iter()
        .filter_map(|row| TrackedEntity::from_format_row(row, config.replay_behaviors_separator))
        .collect();

    let rows = read_table(&files.objects_data, dialect, None)?;
    let mut objects: Vec<ObjectSample> = rows.iter().filter_map(ObjectSample::from_row).collect();
    if objects.len() != rows.len() {
        warn!(
            "{}: skipped {} rows without timestamp or action id",
            files.objects_data.display(),
            rows.len() - objects.len()
        );
    }
    sort_stream(&mut objects, |o| o.timestamp);

    let (mut events, event_names) = match (&files.events_format, &files.events_data) {
        (Some(format), Some(data)) => read_events(config, format, data)?,
        _ => (Vec::new(), HashMap::new()),
    };
    sort_stream(&mut events, |e| e.timestamp);

    let total_time = objects
        .iter()
        .map(|o| o.timestamp)
        .chain(events.iter().map(|e| e.timestamp))
        .fold(0.0_f32, f32::max);

    debug!(
        "Loaded {} ({} entities, {} object rows, {} events, {:.2}s)",
        files.objects_data.display(),
        entities.len(),
        objects.len(),
        events.len(),
        total_time
    );

    Ok(RecordingData {
        files: files.clone(),
        entities,
        objects,
        events,
        event_names,
        total_time,
    })
}

fn read_events(
    config: &EchoConfig,
    format: &std::path::Path,
    data: &std::path::Path,
) -> Result<(Vec<EventSample>, HashMap<usize, String>)> {
    let names = read_table(format, &config.dialect, None)?
        .iter()
        .filter_map(|row| Some((row.index("id")?, row.text("event")?)))
        .collect();

    let events = read_table(data, &config.dialect, None)?
        .iter()
        .filter_map(|row| {
            Some(EventSample {
                timestamp: row.f32("timestamp")?,
                event_id: row.index("eventId")?,
            })
        })
        .collect();

    Ok((events, names))
}

/// Streams are written in order; a stable sort only repairs hand-edited files.
fn sort_stream<T>(stream: &mut [T], key: impl Fn(&T) -> f32) {
    if stream.windows(2).any(|w| key(&w[0]) > key(&w[1])) {
        warn!("Stream timestamps are out of order, sorting");
        stream.sort_by(|a, b| key(a).total_cmp(&key(b)));
    }
}

/// Parses every recording, skipping (and logging) the ones that fail.
///
/// # Errors
/// `LoadFailed` when `files` is not empty but none of them could be loaded.
pub fn load_all(config: &EchoConfig, files: &[RecordingFiles]) -> Result<Vec<RecordingData>> {
    let mut loaded = Vec::with_capacity(files.len());

    for file in files {
        match load_recording(config, file) {
            Ok(data) => loaded.push(data),
            Err(e) => error!("Skipping recording {}: {}", file.objects_data.display(), e),
        }
    }

    if loaded.is_empty() && !files.is_empty() {
        return Err(EchoError::LoadFailed(format!("none of the {} recordings could be loaded", files.len())));
    }
    Ok(loaded)
}

// ============================================================================
// BACKGROUND LOADING
// ============================================================================

/// A [`load_all`] running on a worker thread.
pub struct BackgroundLoad {
    rx: Receiver<Result<Vec<RecordingData>>>,
    handle: Option<JoinHandle<()>>,
}

impl BackgroundLoad {
    /// Starts parsing `files` on a new thread.
    pub fn spawn(config: EchoConfig, files: Vec<RecordingFiles>) -> Result<Self> {
        let (tx, rx) = bounded(1);

        let handle = thread::Builder::new()
            .name("xrecho-loader".into())
            .spawn(move || {
                // The receiver may be gone if the replay was cancelled
                let _ = tx.send(load_all(&config, &files));
            })?;

        Ok(Self {
            rx,
            handle: Some(handle),
        })
    }

    /// Non-blocking check for the result.
    pub fn poll(&mut self) -> Option<Result<Vec<RecordingData>>> {
        match self.rx.try_recv() {
            Ok(result) => {
                self.join();
                Some(result)
            }
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => {
                self.join();
                Some(Err(EchoError::LoadFailed("loader thread exited without a result".into())))
            }
        }
    }

    /// Blocks until the result is available.
    pub fn wait(mut self) -> Result<Vec<RecordingData>> {
        let result = self
            .rx
            .recv()
            .unwrap_or_else(|_| Err(EchoError::LoadFailed("loader thread exited without a result".into())));
        self.join();
        result
    }

    fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("Loader thread panicked");
            }
        }
    }
}
