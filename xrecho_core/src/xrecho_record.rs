//! The "RECORD" Engine - Rate-gated, change-suppressed sampler
//!
//! Samples every tracked entity at its own rate, writes a row only when the
//! sampled pose differs from the last one written, and logs discrete events
//! alongside. One recording is four correlated files sharing a timestamp,
//! plus one row in the session's metadata file when it stops.

use crate::codec::{Field, TableWriter};
use crate::config::{ensure_dir, EchoConfig};
use crate::error::{EchoError, Result};
use crate::naming::{format_duration, session_file, stamp, FileKind};
use crate::tracking::{
    compute_actions, ActionKind, PathCache, TrackedEntity, TrackingAction, TrackingRoster, OBJECTS_FORMAT_HEADER,
};
use nalgebra::Vector3;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::{debug, error, info, warn};
use xrecho_env::{EchoContext, EntityHandle, SceneHost};

/// Header of the objects data file.
pub const OBJECTS_DATA_HEADER: [&str; 9] = [
    "timestamp",
    "ticksSince1970 (100ns)",
    "actionId",
    "position.x",
    "position.y",
    "position.z",
    "rotation.x",
    "rotation.y",
    "rotation.z",
];

/// Header of the events format file.
pub const EVENTS_FORMAT_HEADER: [&str; 2] = ["id", "event"];

/// Header of the events data file.
pub const EVENTS_DATA_HEADER: [&str; 3] = ["timestamp", "ticksSince1970 (100ns)", "eventId"];

/// Header of the session metadata file.
pub const METADATA_HEADER: [&str; 7] = [
    "timestamp",
    "ticksSince1970 (100ns)",
    "scene",
    "duration",
    "nbTrackedObjects",
    "nbEvents",
    "trackingScripts",
];

/// Event name prefix recognized by the replayer as a scene transition.
pub const SCENE_LOAD_EVENT: &str = "SceneLoad";

// ============================================================================
// METADATA
// ============================================================================

/// Summary of one start/stop cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordingMetadata {
    /// Leading timestamp of the recording's file names
    pub stamp: String,

    /// Wall-clock start
    pub started_at: SystemTime,

    /// 100ns ticks since the Unix epoch at start
    pub start_ticks: i64,

    pub scene: String,

    /// Wall-clock duration, known once stopped
    pub duration: Option<Duration>,

    pub tracked_count: usize,
    pub event_count: usize,
}

// ============================================================================
// RECORDER
// ============================================================================

/// Rate gate and change cache of one tracked entity.
#[derive(Debug, Clone)]
struct Sampler {
    interval: f32,
    time_since_last_write: f32,
    last_position: Option<Vector3<f32>>,
    last_rotation: Option<Vector3<f32>>,
}

impl Sampler {
    fn new(entity: &TrackedEntity) -> Self {
        let interval = entity.sampling_interval();
        Self {
            interval,
            // Eligible on the first tick
            time_since_last_write: interval,
            last_position: None,
            last_rotation: None,
        }
    }
}

/// Files and frozen state of the recording in progress.
struct OpenRecording {
    meta: RecordingMetadata,
    entities: Vec<TrackedEntity>,
    actions: Vec<TrackingAction>,
    samplers: Vec<Sampler>,

    /// Instances claimed at start and by hot-plug
    claims: PathCache,
    objects_format: TableWriter,
    objects_data: TableWriter,
    events_format: TableWriter,
    events_data: TableWriter,
    event_ids: HashMap<String, usize>,
}

impl OpenRecording {
    fn close(self) -> Result<RecordingMetadata> {
        self.objects_data.close()?;
        self.events_data.close()?;
        self.objects_format.close()?;
        self.events_format.close()?;
        Ok(self.meta)
    }
}

/// Samples tracked entities into recording files.
///
/// `Idle -> Recording -> Idle`. The host calls [`Recorder::update`] once per
/// frame; nothing here blocks or spawns.
pub struct Recorder {
    config: EchoConfig,
    context: Arc<dyn EchoContext>,
    roster: TrackingRoster,
    active: Option<OpenRecording>,

    /// Opened by the first recording of a session, closed with the session
    metadata: Option<TableWriter>,

    /// Recordings stopped during this session
    history: Vec<RecordingMetadata>,

    /// Seconds since the current (or last) recording started
    time_since_start: f32,

    /// A recording was interrupted by a scene unload
    resume_on_scene_load: bool,
}

impl Recorder {
    /// Creates an idle recorder.
    ///
    /// # Arguments
    /// * `config` - Naming, dialect and discovery settings
    /// * `context` - Clock used for tick columns and file stamps
    /// * `roster` - Tracked entities (configured entries first)
    pub fn new(config: EchoConfig, context: Arc<dyn EchoContext>, roster: TrackingRoster) -> Self {
        Self {
            config,
            context,
            roster,
            active: None,
            metadata: None,
            history: Vec::new(),
            time_since_start: 0.0,
            resume_on_scene_load: false,
        }
    }

    pub fn is_recording(&self) -> bool {
        self.active.is_some()
    }

    pub fn config(&self) -> &EchoConfig {
        &self.config
    }

    pub fn roster(&self) -> &TrackingRoster {
        &self.roster
    }

    pub fn roster_mut(&mut self) -> &mut TrackingRoster {
        &mut self.roster
    }

    /// Stopped recordings of the current session, oldest first.
    pub fn history(&self) -> &[RecordingMetadata] {
        &self.history
    }

    pub fn time_since_start(&self) -> f32 {
        self.time_since_start
    }

    /// Metadata of the recording in progress.
    pub fn current(&self) -> Option<&RecordingMetadata> {
        self.active.as_ref().map(|r| &r.meta)
    }

    /// Bytes written to the data files of the recording in progress.
    pub fn files_size(&self) -> usize {
        self.active
            .as_ref()
            .map_or(0, |r| r.objects_data.size_of_file() + r.events_data.size_of_file())
    }

    /// Replaces the configuration. Ignored while recording.
    pub fn set_config(&mut self, config: EchoConfig) -> Result<()> {
        if self.is_recording() {
            return Err(EchoError::InvalidState("can't change configuration while recording"));
        }
        self.config = config;
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Start / stop
    // ------------------------------------------------------------------------

    /// Starts a recording in the host's active scene.
    ///
    /// Fails when the session folder can't be created or when the objects
    /// format file of this recording already exists.
    pub fn start<H: SceneHost + ?Sized>(&mut self, host: &H) -> Result<()> {
        if self.is_recording() {
            return Err(EchoError::InvalidState("already recording"));
        }

        self.config.validate()?;
        let folder = self.config.session_dir();
        if let Err(e) = ensure_dir(&folder) {
            error!("Can't create directory to save recordings, aborting recording: {}", e);
            return Err(e);
        }

        let started_at = self.context.system_time();
        let stamp = stamp(started_at, &self.config.date_format);
        let scene = host.active_scene();

        let format_path = session_file(&self.config, &stamp, FileKind::ObjectsFormat, &scene);
        if format_path.exists() {
            error!(
                "Format file {} would be overwritten by recording, please wait a bit between recordings",
                format_path.display()
            );
            self.stop()?;
            return Err(EchoError::FormatExists(format_path));
        }

        let entities = self.roster.entries().to_vec();
        let mut cache = PathCache::new();
        let targets: Vec<Option<EntityHandle>> = entities
            .iter()
            .map(|entity| {
                let target = cache.next(host, &entity.path);
                if target.is_none() {
                    warn!("{} is not in the scene, you can hot-plug it during the recording", entity.path);
                }
                target
            })
            .collect();

        let mut actions = compute_actions(&entities);
        for action in &mut actions {
            action.target = targets[action.entity];
        }

        let dialect = self.config.dialect;
        let sep = self.config.replay_behaviors_separator;

        let mut objects_format = TableWriter::create(&format_path, dialect)?;
        objects_format.write_header(&OBJECTS_FORMAT_HEADER)?;
        for entity in &entities {
            let cells = entity.format_cells(sep);
            let fields: Vec<Field<'_>> = cells.iter().map(|c| Field::Str(c)).collect();
            objects_format.write_line(&fields)?;
        }

        let file = |kind| session_file(&self.config, &stamp, kind, &scene);
        let mut objects_data = TableWriter::create(&file(FileKind::ObjectsData), dialect)?;
        objects_data.write_header(&OBJECTS_DATA_HEADER)?;
        let mut events_format = TableWriter::create(&file(FileKind::EventsFormat), dialect)?;
        events_format.write_header(&EVENTS_FORMAT_HEADER)?;
        let mut events_data = TableWriter::create(&file(FileKind::EventsData), dialect)?;
        events_data.write_header(&EVENTS_DATA_HEADER)?;

        if self.metadata.is_none() {
            let mut metadata = TableWriter::create(&file(FileKind::Metadata), dialect)?;
            metadata.write_header(&METADATA_HEADER)?;
            self.metadata = Some(metadata);
        }

        self.time_since_start = 0.0;
        let samplers = entities.iter().map(Sampler::new).collect();

        let meta = RecordingMetadata {
            stamp,
            started_at,
            start_ticks: self.context.ticks_since_epoch(),
            scene,
            duration: None,
            tracked_count: entities.len(),
            event_count: 0,
        };

        let mut recording = OpenRecording {
            meta,
            entities,
            actions,
            samplers,
            claims: cache,
            objects_format,
            objects_data,
            events_format,
            events_data,
            event_ids: HashMap::new(),
        };
        write_initial_cameras(&mut recording, host, self.context.ticks_since_epoch())?;

        info!(
            "Recording started in scene {} ({} entities, {} actions)",
            recording.meta.scene,
            recording.entities.len(),
            recording.actions.len()
        );
        self.active = Some(recording);
        Ok(())
    }

    /// Closes the recording files and appends its metadata row.
    ///
    /// No-op when idle.
    pub fn stop(&mut self) -> Result<()> {
        let Some(recording) = self.active.take() else {
            return Ok(());
        };

        let mut meta = recording.close()?;
        let duration = self
            .context
            .system_time()
            .duration_since(meta.started_at)
            .unwrap_or_default();
        meta.duration = Some(duration);

        if let Some(metadata) = self.metadata.as_mut() {
            let date = stamp(meta.started_at, &self.config.date_format);
            let duration = format_duration(duration);
            metadata.write_line(&[
                Field::Str(&date),
                Field::Long(meta.start_ticks),
                Field::Str(&meta.scene),
                Field::Str(&duration),
                Field::Int(meta.tracked_count as i32),
                Field::Int(meta.event_count as i32),
                Field::Str(""),
            ])?;
            metadata.flush()?;
        }

        info!(
            "Recording stopped after {:.2}s ({} events)",
            self.time_since_start, meta.event_count
        );
        self.history.push(meta);
        Ok(())
    }

    /// Starts when idle; stops when the recording is at least `min_record_time`
    /// seconds old.
    pub fn toggle<H: SceneHost + ?Sized>(&mut self, host: &H, min_record_time: f32) -> Result<()> {
        if !self.is_recording() {
            self.start(host)
        } else if self.time_since_start >= min_record_time {
            self.stop()
        } else {
            debug!(
                "Ignoring stop request {:.2}s into the recording (minimum {:.2}s)",
                self.time_since_start, min_record_time
            );
            Ok(())
        }
    }

    // ------------------------------------------------------------------------
    // Per-frame sampling
    // ------------------------------------------------------------------------

    /// Advances the sampling timers by `dt` and writes due rows.
    pub fn update<H: SceneHost + ?Sized>(&mut self, host: &H, dt: f32) -> Result<()> {
        self.time_since_start += dt;

        let Some(recording) = self.active.as_mut() else {
            return Ok(());
        };

        for sampler in &mut recording.samplers {
            sampler.time_since_last_write += dt;
        }

        let timestamp = self.time_since_start;
        let ticks = self.context.ticks_since_epoch();

        for index in 0..recording.actions.len() {
            let action = &mut recording.actions[index];
            if action.kind == ActionKind::Camera {
                continue;
            }

            let entity = &recording.entities[action.entity];
            let target = match action.target {
                Some(target) => target,
                None => match recording.claims.next(host, &entity.path) {
                    Some(found) => {
                        debug!("{} appeared, now tracking it", entity.path);
                        action.target = Some(found);
                        found
                    }
                    None => continue,
                },
            };

            let sampler = &mut recording.samplers[action.entity];
            if sampler.time_since_last_write < sampler.interval {
                continue;
            }
            sampler.time_since_last_write = 0.0;

            let Some(transform) = host.transform(target) else {
                debug!("{} left the scene", entity.path);
                action.target = None;
                continue;
            };

            let position = transform.position;
            let rotation = transform.rotation;
            let position_changed = sampler.last_position != Some(position);
            let rotation_changed = sampler.last_rotation != Some(rotation);
            let action_id = index as i32;

            match action.kind {
                ActionKind::PositionAndRotation if position_changed || rotation_changed => {
                    recording.objects_data.write_line(&[
                        Field::Float(timestamp),
                        Field::Long(ticks),
                        Field::Int(action_id),
                        Field::Vec3(position),
                        Field::Vec3(rotation),
                    ])?;
                }
                ActionKind::Position if position_changed => {
                    recording.objects_data.write_line(&[
                        Field::Float(timestamp),
                        Field::Long(ticks),
                        Field::Int(action_id),
                        Field::Vec3(position),
                    ])?;
                }
                ActionKind::Rotation if rotation_changed => {
                    recording.objects_data.write_line(&[
                        Field::Float(timestamp),
                        Field::Long(ticks),
                        Field::Int(action_id),
                        Field::EmptyVec3,
                        Field::Vec3(rotation),
                    ])?;
                }
                _ => {}
            }

            sampler.last_position = Some(position);
            sampler.last_rotation = Some(rotation);
        }

        Ok(())
    }

    // ------------------------------------------------------------------------
    // Events
    // ------------------------------------------------------------------------

    /// Logs a discrete event. No-op when idle.
    pub fn log_event(&mut self, name: &str) -> Result<()> {
        let Some(recording) = self.active.as_mut() else {
            return Ok(());
        };

        let id = match recording.event_ids.get(name) {
            Some(id) => *id,
            None => {
                let id = recording.event_ids.len();
                recording.events_format.write_line(&[Field::Int(id as i32), Field::Str(name)])?;
                recording.event_ids.insert(name.to_string(), id);
                recording.meta.event_count = recording.event_ids.len();
                id
            }
        };

        recording.events_data.write_line(&[
            Field::Float(self.time_since_start),
            Field::Long(self.context.ticks_since_epoch()),
            Field::Int(id as i32),
        ])
    }

    /// Logs the `SceneLoad<sep><scene>` event.
    pub fn log_scene_load(&mut self, scene: &str) -> Result<()> {
        let name = format!("{SCENE_LOAD_EVENT}{}{scene}", self.config.scene_load_separator);
        self.log_event(&name)
    }

    // ------------------------------------------------------------------------
    // Scene and session lifecycle
    // ------------------------------------------------------------------------

    /// The active scene is going away: stops the recording in progress.
    pub fn on_scene_unloaded(&mut self) -> Result<()> {
        if !self.is_recording() {
            return Ok(());
        }
        self.resume_on_scene_load = self.config.keep_recording_across_scene;
        self.stop()
    }

    /// A new scene is ready: rediscovers entities and restarts a recording
    /// interrupted by the unload.
    pub fn on_scene_loaded<H: SceneHost + ?Sized>(&mut self, host: &H) -> Result<()> {
        self.roster.rebuild(host, &self.config.recorder);

        if std::mem::take(&mut self.resume_on_scene_load) {
            info!("Resuming recording in scene {}", host.active_scene());
            self.start(host)?;
        }
        Ok(())
    }

    /// Closes the session's metadata file; the next recording opens a new one.
    pub fn new_session(&mut self) -> Result<()> {
        self.stop()?;
        if let Some(metadata) = self.metadata.take() {
            metadata.close()?;
        }
        self.history.clear();
        Ok(())
    }

    /// Stops any recording and releases every file.
    pub fn close_session(&mut self) -> Result<()> {
        self.new_session()
    }
}

/// Writes the intrinsics of every resolved camera at t=0.
///
/// Field of view, aspect and near plane ride in the position columns, the far
/// plane in `rotation.x`.
fn write_initial_cameras<H: SceneHost + ?Sized>(recording: &mut OpenRecording, host: &H, ticks: i64) -> Result<()> {
    for (index, action) in recording.actions.iter().enumerate() {
        if action.kind != ActionKind::Camera {
            continue;
        }
        let Some(camera) = action.target.and_then(|t| host.camera(t)) else {
            continue;
        };

        recording.objects_data.write_line(&[
            Field::Float(0.0),
            Field::Long(ticks),
            Field::Int(index as i32),
            Field::Float(camera.field_of_view),
            Field::Float(camera.aspect),
            Field::Float(camera.near),
            Field::Float(camera.far),
        ])?;
    }
    Ok(())
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{read_table, Dialect};
    use crate::test_support::{MockClock, MockHost};
    use approx::assert_relative_eq;
    use std::path::Path;

    fn recorder_in(root: &Path, entities: Vec<TrackedEntity>) -> (Recorder, Arc<MockClock>) {
        let clock = Arc::new(MockClock::new());
        let config = EchoConfig {
            root: root.to_path_buf(),
            ..EchoConfig::default()
        };
        (Recorder::new(config, clock.clone(), TrackingRoster::new(entities)), clock)
    }

    fn objects_rows(recorder: &Recorder, meta: &RecordingMetadata) -> Vec<crate::codec::Row> {
        let path = session_file(recorder.config(), &meta.stamp, FileKind::ObjectsData, &meta.scene);
        read_table(&path, &Dialect::english(), None).unwrap()
    }

    #[test]
    fn test_single_change_writes_two_rows() {
        let dir = tempfile::tempdir().unwrap();
        let mut host = MockHost::new("Lobby");
        let head = host.spawn("/Head", Vector3::zeros());
        let (mut recorder, _clock) = recorder_in(dir.path(), vec![TrackedEntity {
            track_rotation: false,
            ..TrackedEntity::pose("/Head", 10.0)
        }]);

        recorder.start(&host).unwrap();
        for frame in 1..=20 {
            if frame == 10 {
                host.move_to(head, Vector3::new(1.0, 0.0, 0.0));
            }
            recorder.update(&host, 0.1).unwrap();
        }
        recorder.stop().unwrap();

        let meta = recorder.history()[0].clone();
        let rows = objects_rows(&recorder, &meta);
        assert_eq!(rows.len(), 2);
        assert_relative_eq!(rows[0].f32("timestamp").unwrap(), 0.1, epsilon = 1e-5);
        assert_relative_eq!(rows[1].f32("timestamp").unwrap(), 1.0, epsilon = 1e-4);
        assert_eq!(rows[1].vec3("position"), Vector3::new(1.0, 0.0, 0.0));
        assert!(!rows[1].contains("rotation.x"));
    }

    #[test]
    fn test_rate_gate_bounds_checks() {
        let dir = tempfile::tempdir().unwrap();
        let mut host = MockHost::new("Lobby");
        let cube = host.spawn("/Cube", Vector3::zeros());
        let (mut recorder, _clock) = recorder_in(dir.path(), vec![TrackedEntity::pose("/Cube", 5.0)]);

        recorder.start(&host).unwrap();
        // Moves every frame: every eligible check writes
        for frame in 0..100 {
            host.move_to(cube, Vector3::new(frame as f32, 0.0, 0.0));
            recorder.update(&host, 0.02).unwrap();
        }
        recorder.stop().unwrap();

        let meta = recorder.history()[0].clone();
        let rows = objects_rows(&recorder, &meta);
        // 2 seconds at 5 Hz
        assert!(rows.len() <= 10, "{} rows", rows.len());
        assert!(rows.len() >= 9);
    }

    #[test]
    fn test_rotation_only_leaves_position_blank() {
        let dir = tempfile::tempdir().unwrap();
        let mut host = MockHost::new("Lobby");
        let knob = host.spawn("/Knob", Vector3::new(1.0, 2.0, 3.0));
        host.rotate_to(knob, Vector3::new(0.0, 90.0, 0.0));
        let (mut recorder, _clock) = recorder_in(dir.path(), vec![TrackedEntity {
            track_position: false,
            ..TrackedEntity::pose("/Knob", 10.0)
        }]);

        recorder.start(&host).unwrap();
        recorder.update(&host, 0.1).unwrap();
        recorder.stop().unwrap();

        let meta = recorder.history()[0].clone();
        let rows = objects_rows(&recorder, &meta);
        assert_eq!(rows.len(), 1);
        assert!(!rows[0].contains("position.x"));
        assert_eq!(rows[0].vec3("rotation"), Vector3::new(0.0, 90.0, 0.0));
    }

    #[test]
    fn test_events_get_first_seen_ids() {
        let dir = tempfile::tempdir().unwrap();
        let host = MockHost::new("Lobby");
        let (mut recorder, _clock) = recorder_in(dir.path(), Vec::new());

        recorder.log_event("ignored").unwrap();
        recorder.start(&host).unwrap();
        for name in ["A", "B", "A"] {
            recorder.log_event(name).unwrap();
        }
        recorder.stop().unwrap();

        let meta = recorder.history()[0].clone();
        assert_eq!(meta.event_count, 2);

        let config = recorder.config();
        let format = read_table(
            &session_file(config, &meta.stamp, FileKind::EventsFormat, &meta.scene),
            &config.dialect,
            None,
        )
        .unwrap();
        let names: Vec<(usize, String)> = format
            .iter()
            .map(|r| (r.index("id").unwrap(), r.text("event").unwrap()))
            .collect();
        assert_eq!(names, vec![(0, "A".to_string()), (1, "B".to_string())]);

        let data = read_table(
            &session_file(config, &meta.stamp, FileKind::EventsData, &meta.scene),
            &config.dialect,
            None,
        )
        .unwrap();
        let ids: Vec<usize> = data.iter().map(|r| r.index("eventId").unwrap()).collect();
        assert_eq!(ids, vec![0, 1, 0]);
    }

    #[test]
    fn test_existing_format_file_refuses_start() {
        let dir = tempfile::tempdir().unwrap();
        let host = MockHost::new("Lobby");
        let (mut recorder, clock) = recorder_in(dir.path(), Vec::new());

        recorder.start(&host).unwrap();
        recorder.stop().unwrap();

        // Same wall-clock second, same file names
        let err = recorder.start(&host).unwrap_err();
        assert!(matches!(err, EchoError::FormatExists(_)));
        assert!(!recorder.is_recording());

        clock.advance_wall(Duration::from_secs(2));
        recorder.start(&host).unwrap();
        recorder.stop().unwrap();
        assert_eq!(recorder.history().len(), 2);
    }

    #[test]
    fn test_camera_intrinsics_written_at_start() {
        let dir = tempfile::tempdir().unwrap();
        let mut host = MockHost::new("Lobby");
        let camera = host.spawn("/Main Camera", Vector3::zeros());
        host.attach_camera(camera, xrecho_env::CameraIntrinsics::default());
        let (mut recorder, _clock) = recorder_in(dir.path(), vec![TrackedEntity::pose("/Main Camera", 10.0).with_camera()]);

        recorder.start(&host).unwrap();
        recorder.stop().unwrap();

        let meta = recorder.history()[0].clone();
        let rows = objects_rows(&recorder, &meta);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].index("actionId"), Some(1));
        assert_relative_eq!(rows[0].f32("position.x").unwrap(), 60.0);
        assert_relative_eq!(rows[0].f32("rotation.x").unwrap(), 1000.0);
    }

    #[test]
    fn test_hot_plugged_entity_is_sampled() {
        let dir = tempfile::tempdir().unwrap();
        let mut host = MockHost::new("Lobby");
        let (mut recorder, _clock) = recorder_in(dir.path(), vec![TrackedEntity::pose("/Late", 10.0)]);

        recorder.start(&host).unwrap();
        recorder.update(&host, 0.1).unwrap();
        host.spawn("/Late", Vector3::new(0.0, 1.0, 0.0));
        recorder.update(&host, 0.1).unwrap();
        recorder.stop().unwrap();

        let meta = recorder.history()[0].clone();
        let rows = objects_rows(&recorder, &meta);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].vec3("position"), Vector3::new(0.0, 1.0, 0.0));
    }

    #[test]
    fn test_duplicate_paths_bind_distinct_instances() {
        let dir = tempfile::tempdir().unwrap();
        let mut host = MockHost::new("Lobby");
        host.spawn("/Visitor", Vector3::new(1.0, 0.0, 0.0));
        host.spawn("/Visitor", Vector3::new(2.0, 0.0, 0.0));
        let visitor = TrackedEntity::pose("/Visitor", 10.0);
        let (mut recorder, _clock) = recorder_in(dir.path(), vec![visitor.clone(), visitor]);

        recorder.start(&host).unwrap();
        recorder.update(&host, 0.1).unwrap();
        recorder.stop().unwrap();

        let meta = recorder.history()[0].clone();
        let rows = objects_rows(&recorder, &meta);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].f32("position.x"), Some(1.0));
        assert_eq!(rows[1].f32("position.x"), Some(2.0));
    }

    #[test]
    fn test_late_duplicates_bind_distinct_instances() {
        let dir = tempfile::tempdir().unwrap();
        let mut host = MockHost::new("Lobby");
        let visitor = TrackedEntity::pose("/Visitor", 10.0);
        let (mut recorder, _clock) = recorder_in(dir.path(), vec![visitor.clone(), visitor.clone(), visitor]);

        host.spawn("/Visitor", Vector3::new(1.0, 0.0, 0.0));
        recorder.start(&host).unwrap();

        // Two more visitors spawn after the recording started
        host.spawn("/Visitor", Vector3::new(2.0, 0.0, 0.0));
        host.spawn("/Visitor", Vector3::new(3.0, 0.0, 0.0));
        recorder.update(&host, 0.1).unwrap();
        recorder.stop().unwrap();

        let meta = recorder.history()[0].clone();
        let xs: Vec<Option<f32>> = objects_rows(&recorder, &meta)
            .iter()
            .map(|row| row.f32("position.x"))
            .collect();
        assert_eq!(xs, vec![Some(1.0), Some(2.0), Some(3.0)]);
    }

    #[test]
    fn test_metadata_row_per_recording() {
        let dir = tempfile::tempdir().unwrap();
        let host = MockHost::new("Lobby");
        let (mut recorder, clock) = recorder_in(dir.path(), vec![TrackedEntity::pose("/Head", 10.0)]);

        recorder.start(&host).unwrap();
        recorder.log_scene_load("Garden").unwrap();
        clock.advance_wall(Duration::from_secs(3));
        recorder.stop().unwrap();
        recorder.start(&host).unwrap();
        recorder.stop().unwrap();

        let first = recorder.history()[0].clone();
        assert_eq!(first.duration, Some(Duration::from_secs(3)));
        let config = recorder.config().clone();
        recorder.close_session().unwrap();

        let rows = read_table(
            &session_file(&config, &first.stamp, FileKind::Metadata, &first.scene),
            &config.dialect,
            None,
        )
        .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].text("duration").as_deref(), Some("00:00:03.0000000"));
        assert_eq!(rows[0].index("nbTrackedObjects"), Some(1));
        assert_eq!(rows[0].index("nbEvents"), Some(1));
        assert!(!rows[0].contains("trackingScripts"));
    }

    #[test]
    fn test_toggle_respects_minimum() {
        let dir = tempfile::tempdir().unwrap();
        let host = MockHost::new("Lobby");
        let (mut recorder, _clock) = recorder_in(dir.path(), Vec::new());

        recorder.toggle(&host, 1.0).unwrap();
        assert!(recorder.is_recording());
        recorder.update(&host, 0.5).unwrap();
        recorder.toggle(&host, 1.0).unwrap();
        assert!(recorder.is_recording());
        recorder.update(&host, 0.6).unwrap();
        recorder.toggle(&host, 1.0).unwrap();
        assert!(!recorder.is_recording());
    }

    #[test]
    fn test_scene_change_restarts_recording() {
        let dir = tempfile::tempdir().unwrap();
        let mut host = MockHost::new("Lobby");
        let (mut recorder, clock) = recorder_in(dir.path(), Vec::new());

        recorder.start(&host).unwrap();
        recorder.on_scene_unloaded().unwrap();
        assert!(!recorder.is_recording());

        clock.advance_wall(Duration::from_secs(1));
        host.load_scene("Garden").unwrap();
        recorder.on_scene_loaded(&host).unwrap();
        assert!(recorder.is_recording());
        assert_eq!(recorder.current().unwrap().scene, "Garden");
    }

    #[test]
    fn test_french_dialect_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut host = MockHost::new("Lobby");
        host.spawn("/Head", Vector3::new(0.5, 1.25, 0.0));
        let clock = Arc::new(MockClock::new());
        let config = EchoConfig {
            root: dir.path().to_path_buf(),
            dialect: Dialect::french(),
            ..EchoConfig::default()
        };
        let mut recorder = Recorder::new(config.clone(), clock, TrackingRoster::new(vec![TrackedEntity::pose("/Head", 10.0)]));

        recorder.start(&host).unwrap();
        recorder.update(&host, 0.1).unwrap();
        assert!(recorder.files_size() > 0);
        recorder.stop().unwrap();

        let meta = recorder.history()[0].clone();
        let path = session_file(&config, &meta.stamp, FileKind::ObjectsData, &meta.scene);
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.lines().nth(1).unwrap().contains("0,5;1,25;0"));

        let rows = read_table(&path, &Dialect::french(), None).unwrap();
        assert_relative_eq!(rows[0].f32("position.y").unwrap(), 1.25);
    }
}
