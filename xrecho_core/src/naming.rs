//! Session and file naming.
//!
//! Every recording produces four correlated files sharing one leading
//! timestamp: `<stamp><sep><type><sep><scene>.csv`. The timestamp is the only
//! thing tying an objects data file to its format and event files, so every
//! engine derives names through this module.

use crate::config::EchoConfig;
use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

const EXTENSION: &str = "csv";

/// The files making up a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileKind {
    ObjectsFormat,
    ObjectsData,
    EventsFormat,
    EventsData,
    /// One per session, one row per recording
    Metadata,
}

impl FileKind {
    pub fn label(self) -> &'static str {
        match self {
            FileKind::ObjectsFormat => "objectsFormat",
            FileKind::ObjectsData => "objectsData",
            FileKind::EventsFormat => "eventsFormat",
            FileKind::EventsData => "eventsData",
            FileKind::Metadata => "metadata",
        }
    }
}

/// Renders the leading timestamp of a recording's file names.
pub fn stamp(time: SystemTime, date_format: &str) -> String {
    DateTime::<Local>::from(time).format(date_format).to_string()
}

/// `<stamp><sep><type><sep><scene>.csv`
pub fn file_name(config: &EchoConfig, stamp: &str, kind: FileKind, scene: &str) -> String {
    let sep = config.filename_separator;
    format!("{stamp}{sep}{}{sep}{scene}.{EXTENSION}", kind.label())
}

/// Full path of a file in the configured session folder.
pub fn session_file(config: &EchoConfig, stamp: &str, kind: FileKind, scene: &str) -> PathBuf {
    config.session_dir().join(file_name(config, stamp, kind, scene))
}

/// Leading timestamp of a file name.
pub fn stamp_of<'a>(config: &EchoConfig, file_name: &'a str) -> Option<&'a str> {
    file_name
        .split_once(config.filename_separator)
        .map(|(stamp, _)| stamp)
        .filter(|s| !s.is_empty())
}

/// Renders a wall-clock duration as `hh:mm:ss.fffffff`.
pub fn format_duration(duration: Duration) -> String {
    let total = duration.as_secs();
    let ticks = duration.subsec_nanos() / 100;
    format!(
        "{:02}:{:02}:{:02}.{:07}",
        total / 3600,
        (total / 60) % 60,
        total % 60,
        ticks
    )
}

// ============================================================================
// RECORDING INDEX
// ============================================================================

/// The files of one recording found on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordingFiles {
    pub stamp: String,
    pub scene: String,
    pub objects_data: PathBuf,
    pub objects_format: Option<PathBuf>,
    pub events_format: Option<PathBuf>,
    pub events_data: Option<PathBuf>,
}

impl RecordingFiles {
    /// Locates the companions of an objects data file by its timestamp.
    pub fn from_objects_data(config: &EchoConfig, objects_data: &Path) -> Option<Self> {
        let name = objects_data.file_name()?.to_str()?;
        let stamp = stamp_of(config, name)?;
        let marker = format!("{sep}{}{sep}", FileKind::ObjectsData.label(), sep = config.filename_separator);
        let (_, tail) = name.split_once(&marker)?;
        let scene = tail.strip_suffix(&format!(".{EXTENSION}"))?;

        let folder = objects_data.parent().unwrap_or_else(|| Path::new(""));
        let companion = |kind: FileKind| {
            let path = folder.join(file_name(config, stamp, kind, scene));
            path.is_file().then_some(path)
        };

        Some(Self {
            stamp: stamp.to_string(),
            scene: scene.to_string(),
            objects_data: objects_data.to_path_buf(),
            objects_format: companion(FileKind::ObjectsFormat),
            events_format: companion(FileKind::EventsFormat),
            events_data: companion(FileKind::EventsData),
        })
    }

    /// Both event files are present.
    pub fn has_events(&self) -> bool {
        self.events_format.is_some() && self.events_data.is_some()
    }
}

/// Every recording in `folder`, oldest first.
///
/// # Arguments
/// * `scene` - Only keep recordings made in this scene
pub fn scan_session(config: &EchoConfig, folder: &Path, scene: Option<&str>) -> Vec<RecordingFiles> {
    let Ok(entries) = std::fs::read_dir(folder) else {
        return Vec::new();
    };

    let mut paths: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file())
        .collect();
    paths.sort();

    paths
        .iter()
        .filter_map(|p| RecordingFiles::from_objects_data(config, p))
        .filter(|r| scene.map_or(true, |s| r.scene == s))
        .collect()
}

/// The most recent recording of a folder.
pub fn last_recording(config: &EchoConfig, folder: &Path, scene: Option<&str>) -> Option<RecordingFiles> {
    scan_session(config, folder, scene).pop()
}
