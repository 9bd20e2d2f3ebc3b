//! The "REPLAY" Engine - Two-stream merge on a virtual clock
//!
//! Every loaded recording holds two forward-only streams (object samples and
//! events). Each tick advances a virtual clock and, per recording, applies
//! every row with `timestamp <= t` in timestamp order, events first on ties.
//! Going backward restarts both cursors from zero and fast-forwards.

use crate::behaviors::{BehaviorRegistry, ReplayBehavior};
use crate::config::EchoConfig;
use crate::error::{EchoError, Result};
use crate::loader::{load_all, BackgroundLoad, EventSample, ObjectSample, RecordingData};
use crate::naming::RecordingFiles;
use crate::tracking::{compute_actions, ActionKind, PathCache, TrackedEntity};
use crate::xrecho_record::SCENE_LOAD_EVENT;
use tracing::{debug, error, info, warn};
use xrecho_env::{CameraIntrinsics, EntityHandle, SceneHost};

/// Lifecycle of the replayer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayState {
    /// Nothing loaded
    Idle,
    /// Recordings are being parsed on a worker thread
    Loading,
    /// Recordings loaded, clock not running
    Loaded,
    Playing,
    Paused,
    /// A replayed scene load is in progress; resumes on `on_scene_ready`
    PendingSceneReload,
}

/// Next row of a recording in merge order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextRow {
    Object(usize),
    Event(usize),
}

/// Picks the next row to apply at virtual time `t`.
///
/// Returns `None` when the earliest unconsumed row is later than `t` or both
/// streams are exhausted. Ties go to the event.
pub fn next_row(
    objects: &[ObjectSample],
    events: &[EventSample],
    object_cursor: usize,
    event_cursor: usize,
    t: f32,
) -> Option<NextRow> {
    let object = objects.get(object_cursor).map(|o| o.timestamp);
    let event = events.get(event_cursor).map(|e| e.timestamp);

    let (next, timestamp) = match (object, event) {
        (Some(o), Some(e)) if e <= o => (NextRow::Event(event_cursor), e),
        (Some(o), _) => (NextRow::Object(object_cursor), o),
        (None, Some(e)) => (NextRow::Event(event_cursor), e),
        (None, None) => return None,
    };

    (timestamp <= t).then_some(next)
}

// ============================================================================
// PER-RECORDING STATE
// ============================================================================

struct ReplayAction {
    entity: usize,
    kind: ActionKind,
    target: Option<EntityHandle>,
}

/// Sinks filled while stepping a recording.
struct StepOutput<'a> {
    camera: &'a mut Option<EntityHandle>,
    fired: &'a mut Vec<String>,
    claims: &'a mut PathCache,
}

struct ReplayTrack {
    data: RecordingData,
    actions: Vec<ReplayAction>,

    /// Behaviors of each entity, in entity order
    behaviors: Vec<Vec<Box<dyn ReplayBehavior>>>,

    object_cursor: usize,
    event_cursor: usize,
    skipped_rows: usize,
}

enum StepOutcome {
    Finished,
    Pending,
    SceneLoad(String),
}

impl ReplayTrack {
    fn new(data: RecordingData, registry: &BehaviorRegistry) -> Self {
        let actions = compute_actions(&data.entities)
            .into_iter()
            .map(|a| ReplayAction {
                entity: a.entity,
                kind: a.kind,
                target: None,
            })
            .collect();
        let behaviors = data
            .entities
            .iter()
            .map(|e| registry.instantiate(&e.replay_behaviors))
            .collect();

        Self {
            data,
            actions,
            behaviors,
            object_cursor: 0,
            event_cursor: 0,
            skipped_rows: 0,
        }
    }

    fn finished(&self) -> bool {
        self.object_cursor >= self.data.objects.len() && self.event_cursor >= self.data.events.len()
    }

    fn rewind(&mut self) {
        self.object_cursor = 0;
        self.event_cursor = 0;
    }

    /// Binds every action to a live entity (surrogate first).
    fn resolve_targets<H: SceneHost + ?Sized>(&mut self, host: &H, cache: &mut PathCache) {
        let mut resolved = Vec::with_capacity(self.data.entities.len());
        for (index, entity) in self.data.entities.iter().enumerate() {
            let target = resolve_entity(host, cache, entity);
            match target {
                Some(target) => {
                    for behavior in &mut self.behaviors[index] {
                        behavior.attach(target);
                    }
                }
                None => warn!("{} not found, will retry during replay", entity.path),
            }
            resolved.push(target);
        }

        for action in &mut self.actions {
            action.target = resolved[action.entity];
        }
    }

    /// Late resolution of an entity missing when the replay started.
    fn hot_plug<H: SceneHost + ?Sized>(&mut self, host: &H, entity: usize, claims: &mut PathCache) -> Option<EntityHandle> {
        let found = resolve_entity(host, claims, &self.data.entities[entity])?;
        debug!("{} appeared, now replaying it", self.data.entities[entity].path);

        for action in self.actions.iter_mut().filter(|a| a.entity == entity) {
            action.target = Some(found);
        }
        for behavior in &mut self.behaviors[entity] {
            behavior.attach(found);
        }
        Some(found)
    }

    /// Applies every row due at `t`.
    fn step<H: SceneHost + ?Sized>(
        &mut self,
        host: &mut H,
        t: f32,
        scene_separator: char,
        out: &mut StepOutput<'_>,
    ) -> StepOutcome {
        while let Some(next) = next_row(&self.data.objects, &self.data.events, self.object_cursor, self.event_cursor, t) {
            match next {
                NextRow::Event(index) => {
                    self.event_cursor += 1;
                    let Some(name) = self.data.event_name(self.data.events[index].event_id) else {
                        self.skipped_rows += 1;
                        continue;
                    };
                    out.fired.push(name.to_string());

                    let scene = name
                        .strip_prefix(SCENE_LOAD_EVENT)
                        .and_then(|rest| rest.strip_prefix(scene_separator))
                        .filter(|scene| !scene.is_empty());
                    if let Some(scene) = scene {
                        return StepOutcome::SceneLoad(scene.to_string());
                    }
                }
                NextRow::Object(index) => {
                    self.object_cursor += 1;
                    self.apply_object(host, index, out);
                }
            }
        }

        if self.finished() {
            StepOutcome::Finished
        } else {
            StepOutcome::Pending
        }
    }

    fn apply_object<H: SceneHost + ?Sized>(&mut self, host: &mut H, index: usize, out: &mut StepOutput<'_>) {
        let sample = self.data.objects[index];
        let Some(action) = self.actions.get(sample.action_id) else {
            self.skipped_rows += 1;
            return;
        };
        let (entity, kind) = (action.entity, action.kind);

        let target = match action.target {
            Some(target) => target,
            None => match self.hot_plug(host, entity, out.claims) {
                Some(found) => found,
                None => return,
            },
        };

        match kind {
            ActionKind::Position | ActionKind::Rotation | ActionKind::PositionAndRotation => {
                if let Some(position) = sample.position.filter(|_| kind.has_position()) {
                    host.set_position(target, position);
                }
                if let Some(rotation) = sample.rotation.filter(|_| kind.has_rotation()) {
                    host.set_rotation(target, rotation);
                }
            }
            ActionKind::Camera => {
                let Some(params) = sample.position else {
                    return;
                };
                let far = sample.rotation.map_or(CameraIntrinsics::default().far, |r| r.x);
                host.set_camera(
                    target,
                    CameraIntrinsics {
                        field_of_view: params.x,
                        aspect: params.y,
                        near: params.z,
                        far,
                    },
                );
                *out.camera = Some(target);
                return;
            }
        }

        for behavior in &mut self.behaviors[entity] {
            behavior.on_sample(target, &sample);
        }
    }

    fn detach_behaviors(&mut self) {
        for behavior in self.behaviors.iter_mut().flatten() {
            behavior.detach();
        }
    }
}

/// Surrogate if it resolves, else the next unclaimed instance of the path.
fn resolve_entity<H: SceneHost + ?Sized>(host: &H, cache: &mut PathCache, entity: &TrackedEntity) -> Option<EntityHandle> {
    entity
        .replay_surrogate
        .as_deref()
        .and_then(|surrogate| host.resolve(surrogate))
        .or_else(|| cache.next(host, &entity.path))
}

// ============================================================================
// REPLAYER
// ============================================================================

/// Replays one or more recordings into a host scene.
///
/// `Idle -> Loaded -> Playing <-> Paused -> Idle`. Driven by [`Replayer::tick`]
/// once per host frame.
pub struct Replayer {
    config: EchoConfig,
    registry: BehaviorRegistry,
    state: ReplayState,
    tracks: Vec<ReplayTrack>,
    background: Option<BackgroundLoad>,

    /// Start as soon as the background load completes
    start_when_loaded: bool,

    /// Virtual clock (seconds)
    time: f32,

    /// Longest recording (seconds)
    total_time: f32,

    timescale: f32,

    /// One-shot signed jump consumed by the next tick
    seek_delta: f32,

    /// One-shot absolute position consumed by the next tick
    seek_target: Option<f32>,

    paused_at_end: bool,

    /// Last camera whose intrinsics were replayed
    replay_camera: Option<EntityHandle>,

    /// Names of the events replayed since the last drain
    fired_events: Vec<String>,

    /// Instances bound at load and by hot-plug, shared by every track
    claims: PathCache,
}

impl Replayer {
    pub fn new(config: EchoConfig, registry: BehaviorRegistry) -> Self {
        Self {
            config,
            registry,
            state: ReplayState::Idle,
            tracks: Vec::new(),
            background: None,
            start_when_loaded: false,
            time: 0.0,
            total_time: 0.0,
            timescale: 1.0,
            seek_delta: 0.0,
            seek_target: None,
            paused_at_end: false,
            replay_camera: None,
            fired_events: Vec::new(),
            claims: PathCache::new(),
        }
    }

    pub fn state(&self) -> ReplayState {
        self.state
    }

    /// Playing, paused, or waiting for a replayed scene load.
    pub fn is_replaying(&self) -> bool {
        matches!(
            self.state,
            ReplayState::Playing | ReplayState::Paused | ReplayState::PendingSceneReload
        )
    }

    pub fn current_time(&self) -> f32 {
        self.time
    }

    pub fn total_time(&self) -> f32 {
        self.total_time
    }

    pub fn timescale(&self) -> f32 {
        self.timescale
    }

    /// Every recording finished and the clock stopped at the end.
    pub fn is_paused_at_end(&self) -> bool {
        self.paused_at_end
    }

    pub fn replay_camera(&self) -> Option<EntityHandle> {
        self.replay_camera
    }

    pub fn recording_count(&self) -> usize {
        self.tracks.len()
    }

    /// Loaded recordings, in load order.
    pub fn recordings(&self) -> impl Iterator<Item = &RecordingData> {
        self.tracks.iter().map(|t| &t.data)
    }

    /// Behaviors attached to an entity of a loaded recording.
    pub fn behaviors(&self, recording: usize, entity: usize) -> &[Box<dyn ReplayBehavior>] {
        self.tracks
            .get(recording)
            .and_then(|t| t.behaviors.get(entity))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Object rows skipped because their action id was out of range.
    pub fn skipped_rows(&self) -> usize {
        self.tracks.iter().map(|t| t.skipped_rows).sum()
    }

    /// Event names replayed since the previous call.
    pub fn take_fired_events(&mut self) -> Vec<String> {
        std::mem::take(&mut self.fired_events)
    }

    pub fn set_config(&mut self, config: EchoConfig) {
        self.config = config;
    }

    pub fn registry_mut(&mut self) -> &mut BehaviorRegistry {
        &mut self.registry
    }

    // ------------------------------------------------------------------------
    // Loading
    // ------------------------------------------------------------------------

    /// Parses and binds recordings on the calling thread.
    pub fn load<H: SceneHost + ?Sized>(&mut self, host: &H, files: &[RecordingFiles]) -> Result<()> {
        self.stop();
        let data = load_all(&self.config, files)?;
        self.install(host, data)
    }

    /// Binds already parsed recordings.
    pub fn load_data<H: SceneHost + ?Sized>(&mut self, host: &H, data: Vec<RecordingData>) -> Result<()> {
        self.stop();
        self.install(host, data)
    }

    /// Parses recordings on a worker thread. [`Replayer::tick`] picks the
    /// result up.
    pub fn load_in_background(&mut self, files: Vec<RecordingFiles>) -> Result<()> {
        self.stop();
        if files.is_empty() {
            return Err(EchoError::InvalidState("no recording to load"));
        }
        self.background = Some(BackgroundLoad::spawn(self.config.clone(), files)?);
        self.state = ReplayState::Loading;
        Ok(())
    }

    fn install<H: SceneHost + ?Sized>(&mut self, host: &H, data: Vec<RecordingData>) -> Result<()> {
        if data.is_empty() {
            return Err(EchoError::InvalidState("no recording to load"));
        }

        self.claims.clear();
        let claims = &mut self.claims;
        self.tracks = data
            .into_iter()
            .map(|d| {
                let mut track = ReplayTrack::new(d, &self.registry);
                track.resolve_targets(host, claims);
                track
            })
            .collect();

        self.total_time = self.tracks.iter().map(|t| t.data.total_time).fold(0.0, f32::max);
        self.time = 0.0;
        self.state = ReplayState::Loaded;

        info!(
            "Loaded {} recordings ({:.2}s)",
            self.tracks.len(),
            self.total_time
        );
        Ok(())
    }

    fn poll_background<H: SceneHost + ?Sized>(&mut self, host: &H) -> Result<()> {
        let Some(result) = self.background.as_mut().and_then(BackgroundLoad::poll) else {
            return Ok(());
        };
        self.background = None;

        match result.and_then(|data| self.install(host, data)) {
            Ok(()) => {
                if std::mem::take(&mut self.start_when_loaded) {
                    self.start()?;
                }
                Ok(())
            }
            Err(e) => {
                error!("Background load failed: {}", e);
                self.state = ReplayState::Idle;
                self.start_when_loaded = false;
                Err(e)
            }
        }
    }

    // ------------------------------------------------------------------------
    // Transport
    // ------------------------------------------------------------------------

    /// Plays from the beginning.
    pub fn start(&mut self) -> Result<()> {
        match self.state {
            ReplayState::Idle => Err(EchoError::InvalidState("nothing loaded to replay")),
            ReplayState::Loading => {
                self.start_when_loaded = true;
                Ok(())
            }
            _ => {
                for track in &mut self.tracks {
                    track.rewind();
                }
                self.time = 0.0;
                self.seek_delta = 0.0;
                self.seek_target = None;
                self.timescale = 1.0;
                self.paused_at_end = false;
                self.state = ReplayState::Playing;
                info!("Replay started");
                Ok(())
            }
        }
    }

    pub fn pause(&mut self) {
        if self.state == ReplayState::Playing {
            self.state = ReplayState::Paused;
        }
    }

    pub fn resume(&mut self) {
        if self.state == ReplayState::Paused {
            self.state = ReplayState::Playing;
        }
    }

    pub fn toggle_pause(&mut self) {
        match self.state {
            ReplayState::Playing => self.pause(),
            ReplayState::Paused => self.resume(),
            _ => {}
        }
    }

    /// Speed multiplier of the clock. Negative values are clamped to 0; go
    /// backward with [`Replayer::seek`].
    pub fn set_timescale(&mut self, timescale: f32) {
        self.timescale = timescale.max(0.0);
    }

    /// Jumps the clock by `delta` seconds on the next tick.
    pub fn seek(&mut self, delta: f32) {
        self.seek_delta += delta;
    }

    /// Jumps to an absolute time on the next tick.
    pub fn seek_to(&mut self, time: f32) {
        self.seek_delta = 0.0;
        self.seek_target = Some(time);
    }

    /// Stops and forgets every loaded recording.
    pub fn stop(&mut self) {
        if self.state != ReplayState::Idle {
            info!("Replay stopped at {:.2}s", self.time);
        }
        for track in &mut self.tracks {
            track.detach_behaviors();
        }
        self.tracks.clear();
        self.background = None;
        self.start_when_loaded = false;
        self.state = ReplayState::Idle;
        self.time = 0.0;
        self.total_time = 0.0;
        self.seek_delta = 0.0;
        self.seek_target = None;
        self.paused_at_end = false;
    }

    // ------------------------------------------------------------------------
    // Clock
    // ------------------------------------------------------------------------

    /// Advances the clock by `dt * timescale` plus any pending seek and applies
    /// the rows that became due.
    pub fn tick<H: SceneHost + ?Sized>(&mut self, host: &mut H, dt: f32) -> Result<()> {
        match self.state {
            ReplayState::Loading => return self.poll_background(host),
            ReplayState::Playing | ReplayState::Paused => {}
            _ => return Ok(()),
        }

        let jump = std::mem::take(&mut self.seek_delta);
        let target = self.seek_target.take();
        let playing = self.state == ReplayState::Playing;
        if !playing && jump == 0.0 && target.is_none() {
            return Ok(());
        }

        let base = target.unwrap_or(self.time);
        if jump < 0.0 || base < self.time {
            for track in &mut self.tracks {
                track.rewind();
            }
        }
        if jump != 0.0 || target.is_some() {
            self.paused_at_end = false;
        }

        let advance = if playing { dt * self.timescale } else { 0.0 };
        self.time = (base + advance + jump).max(0.0);

        let separator = self.config.scene_load_separator;
        let mut out = StepOutput {
            camera: &mut self.replay_camera,
            fired: &mut self.fired_events,
            claims: &mut self.claims,
        };
        let mut all_finished = true;
        let mut scene_load = None;
        for track in &mut self.tracks {
            match track.step(host, self.time, separator, &mut out) {
                StepOutcome::Finished => {}
                StepOutcome::Pending => all_finished = false,
                StepOutcome::SceneLoad(scene) => {
                    scene_load = Some(scene);
                    break;
                }
            }
        }

        if let Some(scene) = scene_load {
            return self.replay_scene_load(host, &scene);
        }

        if all_finished {
            self.time = self.time.min(self.total_time);
            if !self.paused_at_end {
                info!("Replay reached the end ({:.2}s)", self.total_time);
            }
            self.paused_at_end = true;
            self.state = ReplayState::Paused;
        }
        Ok(())
    }

    fn replay_scene_load<H: SceneHost + ?Sized>(&mut self, host: &mut H, scene: &str) -> Result<()> {
        info!("Replaying scene load: {}", scene);
        host.load_scene(scene)?;

        if self.config.keep_replaying_across_scene {
            self.state = ReplayState::PendingSceneReload;
        } else {
            self.stop();
        }
        Ok(())
    }

    /// The host finished a scene load: rebinds targets and resumes a replay
    /// interrupted by a replayed scene load.
    pub fn on_scene_ready<H: SceneHost + ?Sized>(&mut self, host: &H) {
        if self.state != ReplayState::PendingSceneReload {
            return;
        }

        self.claims.clear();
        for track in &mut self.tracks {
            track.resolve_targets(host, &mut self.claims);
        }
        self.replay_camera = None;
        self.state = ReplayState::Playing;
        info!("Replay resumed in scene {} at {:.2}s", host.active_scene(), self.time);
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::behaviors::Trail;
    use crate::test_support::MockHost;
    use approx::assert_relative_eq;
    use nalgebra::Vector3;
    use proptest::prelude::*;
    use std::collections::HashMap;
    use std::path::PathBuf;

    fn files(name: &str) -> RecordingFiles {
        RecordingFiles {
            stamp: name.to_string(),
            scene: "Lobby".to_string(),
            objects_data: PathBuf::from(name),
            objects_format: None,
            events_format: None,
            events_data: None,
        }
    }

    fn at(timestamp: f32, action_id: usize, x: f32) -> ObjectSample {
        ObjectSample {
            timestamp,
            action_id,
            position: Some(Vector3::new(x, 0.0, 0.0)),
            rotation: None,
        }
    }

    fn recording(entities: Vec<TrackedEntity>, objects: Vec<ObjectSample>, events: Vec<(f32, &str)>) -> RecordingData {
        let mut names: HashMap<usize, String> = HashMap::new();
        let mut samples = Vec::new();
        for (timestamp, name) in events {
            let id = match names.iter().find(|(_, n)| *n == name) {
                Some((id, _)) => *id,
                None => {
                    let id = names.len();
                    names.insert(id, name.to_string());
                    id
                }
            };
            samples.push(EventSample { timestamp, event_id: id });
        }

        let total_time = objects
            .iter()
            .map(|o| o.timestamp)
            .chain(samples.iter().map(|e| e.timestamp))
            .fold(0.0, f32::max);

        RecordingData {
            files: files("rec"),
            entities,
            objects,
            events: samples,
            event_names: names,
            total_time,
        }
    }

    fn cube_recording(xs: &[(f32, f32)]) -> RecordingData {
        recording(
            vec![TrackedEntity {
                track_rotation: false,
                ..TrackedEntity::pose("/Cube", 10.0)
            }],
            xs.iter().map(|(t, x)| at(*t, 0, *x)).collect(),
            Vec::new(),
        )
    }

    fn replayer() -> Replayer {
        Replayer::new(EchoConfig::default(), BehaviorRegistry::with_builtins())
    }

    #[test]
    fn test_next_row_prefers_event_on_tie() {
        let objects = vec![at(1.0, 0, 0.0)];
        let events = vec![EventSample { timestamp: 1.0, event_id: 0 }];

        assert_eq!(next_row(&objects, &events, 0, 0, 0.5), None);
        assert_eq!(next_row(&objects, &events, 0, 0, 1.0), Some(NextRow::Event(0)));
        assert_eq!(next_row(&objects, &events, 0, 1, 1.0), Some(NextRow::Object(0)));
        assert_eq!(next_row(&objects, &events, 1, 1, 9.0), None);
    }

    #[test]
    fn test_plays_rows_up_to_clock() {
        let mut host = MockHost::new("Lobby");
        let cube = host.spawn("/Cube", Vector3::zeros());
        let mut replayer = replayer();
        replayer
            .load_data(&host, vec![cube_recording(&[(0.1, 1.0), (0.5, 2.0), (1.0, 3.0)])])
            .unwrap();
        assert_eq!(replayer.state(), ReplayState::Loaded);
        assert_eq!(replayer.total_time(), 1.0);

        replayer.start().unwrap();
        replayer.tick(&mut host, 0.3).unwrap();
        assert_eq!(host.position(cube).x, 1.0);

        replayer.tick(&mut host, 0.3).unwrap();
        assert_eq!(host.position(cube).x, 2.0);
        assert_eq!(replayer.state(), ReplayState::Playing);

        replayer.tick(&mut host, 0.5).unwrap();
        assert_eq!(host.position(cube).x, 3.0);
        assert!(replayer.is_paused_at_end());
        assert_eq!(replayer.state(), ReplayState::Paused);
        assert_eq!(replayer.current_time(), 1.0);
    }

    #[test]
    fn test_pause_freezes_clock() {
        let mut host = MockHost::new("Lobby");
        host.spawn("/Cube", Vector3::zeros());
        let mut replayer = replayer();
        replayer.load_data(&host, vec![cube_recording(&[(5.0, 1.0)])]).unwrap();
        replayer.start().unwrap();

        replayer.tick(&mut host, 1.0).unwrap();
        replayer.toggle_pause();
        replayer.tick(&mut host, 1.0).unwrap();
        assert_eq!(replayer.current_time(), 1.0);

        replayer.resume();
        replayer.set_timescale(2.0);
        replayer.tick(&mut host, 1.0).unwrap();
        assert_eq!(replayer.current_time(), 3.0);
    }

    #[test]
    fn test_backward_seek_replays_from_start() {
        let mut host = MockHost::new("Lobby");
        let cube = host.spawn("/Cube", Vector3::zeros());
        let mut replayer = replayer();
        replayer
            .load_data(&host, vec![cube_recording(&[(0.0, 1.0), (1.0, 2.0), (2.0, 3.0), (3.0, 4.0)])])
            .unwrap();
        replayer.start().unwrap();

        replayer.tick(&mut host, 2.5).unwrap();
        assert_eq!(host.position(cube).x, 3.0);

        replayer.seek(-1.0);
        replayer.tick(&mut host, 0.0).unwrap();
        assert_relative_eq!(replayer.current_time(), 1.5);
        assert_eq!(host.position(cube).x, 2.0);

        replayer.seek(-10.0);
        replayer.tick(&mut host, 0.0).unwrap();
        assert_eq!(replayer.current_time(), 0.0);
        assert_eq!(host.position(cube).x, 1.0);
    }

    #[test]
    fn test_seek_while_paused_scrubs() {
        let mut host = MockHost::new("Lobby");
        let cube = host.spawn("/Cube", Vector3::zeros());
        let mut replayer = replayer();
        replayer
            .load_data(&host, vec![cube_recording(&[(0.0, 1.0), (1.0, 2.0), (4.0, 3.0)])])
            .unwrap();
        replayer.start().unwrap();
        replayer.pause();

        replayer.seek_to(1.5);
        replayer.tick(&mut host, 0.25).unwrap();
        assert_eq!(replayer.current_time(), 1.5);
        assert_eq!(host.position(cube).x, 2.0);
        assert_eq!(replayer.state(), ReplayState::Paused);
    }

    #[test]
    fn test_longest_recording_sets_end() {
        let mut host = MockHost::new("Lobby");
        host.spawn("/Cube", Vector3::zeros());
        host.spawn("/Cube", Vector3::zeros());
        let mut replayer = replayer();
        replayer
            .load_data(&host, vec![cube_recording(&[(0.0, 0.0), (5.0, 1.0)]), cube_recording(&[(0.0, 0.0), (3.0, 1.0)])])
            .unwrap();
        assert_eq!(replayer.total_time(), 5.0);
        replayer.start().unwrap();

        for _ in 0..4 {
            replayer.tick(&mut host, 1.0).unwrap();
            assert!(!replayer.is_paused_at_end());
        }
        replayer.tick(&mut host, 1.0).unwrap();
        assert!(replayer.is_paused_at_end());
    }

    #[test]
    fn test_duplicate_paths_bind_distinct_instances() {
        let mut host = MockHost::new("Lobby");
        let first = host.spawn("/Cube", Vector3::zeros());
        let second = host.spawn("/Cube", Vector3::zeros());
        let mut replayer = replayer();
        replayer
            .load_data(&host, vec![cube_recording(&[(0.0, 1.0)]), cube_recording(&[(0.0, 2.0)])])
            .unwrap();
        replayer.start().unwrap();
        replayer.tick(&mut host, 0.1).unwrap();

        assert_eq!(host.position(first).x, 1.0);
        assert_eq!(host.position(second).x, 2.0);
    }

    #[test]
    fn test_out_of_range_action_is_skipped() {
        let mut host = MockHost::new("Lobby");
        let cube = host.spawn("/Cube", Vector3::zeros());
        let mut replayer = replayer();
        let data = recording(
            vec![TrackedEntity::pose("/Cube", 10.0)],
            vec![at(0.0, 7, 9.0), at(0.1, 0, 1.0)],
            Vec::new(),
        );
        replayer.load_data(&host, vec![data]).unwrap();
        replayer.start().unwrap();
        replayer.tick(&mut host, 1.0).unwrap();

        assert_eq!(replayer.skipped_rows(), 1);
        assert_eq!(host.position(cube).x, 1.0);
    }

    #[test]
    fn test_surrogate_and_camera() {
        let mut host = MockHost::new("Lobby");
        let original = host.spawn("/Main Camera", Vector3::zeros());
        let ghost = host.spawn("/Ghost Camera", Vector3::zeros());
        let mut replayer = replayer();
        let camera_row = ObjectSample {
            timestamp: 0.0,
            action_id: 1,
            position: Some(Vector3::new(90.0, 1.5, 0.1)),
            rotation: Some(Vector3::new(500.0, 0.0, 0.0)),
        };
        let data = recording(
            vec![TrackedEntity::pose("/Main Camera", 10.0)
                .with_camera()
                .with_surrogate("/Ghost Camera")
                .with_behavior(Trail::NAME)],
            vec![camera_row, at(0.1, 0, 4.0)],
            Vec::new(),
        );
        replayer.load_data(&host, vec![data]).unwrap();
        replayer.start().unwrap();
        replayer.tick(&mut host, 0.2).unwrap();

        assert_eq!(host.position(original).x, 0.0);
        assert_eq!(host.position(ghost).x, 4.0);
        let camera = host.camera(ghost).unwrap();
        assert_eq!(camera.field_of_view, 90.0);
        assert_eq!(camera.far, 500.0);
        assert_eq!(replayer.replay_camera(), Some(ghost));

        let trail = replayer.behaviors(0, 0)[0].as_any().downcast_ref::<Trail>().unwrap();
        assert_eq!(trail.len(), 1);
    }

    #[test]
    fn test_late_entity_is_hot_plugged() {
        let mut host = MockHost::new("Lobby");
        let mut replayer = replayer();
        replayer.load_data(&host, vec![cube_recording(&[(0.0, 1.0), (1.0, 2.0)])]).unwrap();
        replayer.start().unwrap();
        replayer.tick(&mut host, 0.5).unwrap();

        let cube = host.spawn("/Cube", Vector3::zeros());
        replayer.tick(&mut host, 0.5).unwrap();
        assert_eq!(host.position(cube).x, 2.0);
    }

    #[test]
    fn test_late_duplicates_bind_distinct_instances() {
        let mut host = MockHost::new("Lobby");
        let mut replayer = replayer();
        replayer
            .load_data(
                &host,
                vec![cube_recording(&[(0.0, 1.0), (1.0, 2.0)]), cube_recording(&[(0.0, 1.0), (1.0, 3.0)])],
            )
            .unwrap();
        replayer.start().unwrap();
        replayer.tick(&mut host, 0.5).unwrap();

        let first = host.spawn("/Cube", Vector3::zeros());
        let second = host.spawn("/Cube", Vector3::zeros());
        replayer.tick(&mut host, 0.5).unwrap();

        assert_eq!(host.position(first).x, 2.0);
        assert_eq!(host.position(second).x, 3.0);
    }

    #[test]
    fn test_scene_load_event_pauses_until_ready() {
        let mut host = MockHost::new("Lobby");
        let cube = host.spawn("/Cube", Vector3::zeros());
        let mut replayer = replayer();
        let data = recording(
            vec![TrackedEntity {
                track_rotation: false,
                ..TrackedEntity::pose("/Cube", 10.0)
            }],
            vec![at(0.0, 0, 1.0), at(1.0, 0, 2.0), at(2.0, 0, 3.0)],
            vec![(1.0, "SceneLoad:Garden")],
        );
        replayer.load_data(&host, vec![data]).unwrap();
        replayer.start().unwrap();

        replayer.tick(&mut host, 1.5).unwrap();
        assert_eq!(host.loads, vec!["Garden".to_string()]);
        assert_eq!(replayer.state(), ReplayState::PendingSceneReload);
        // The event cut the frame before the tied object row
        assert_eq!(host.position(cube).x, 1.0);
        assert_eq!(replayer.take_fired_events(), vec!["SceneLoad:Garden".to_string()]);

        replayer.tick(&mut host, 1.0).unwrap();
        assert_eq!(replayer.current_time(), 1.5);

        replayer.on_scene_ready(&host);
        replayer.tick(&mut host, 1.0).unwrap();
        assert_eq!(host.position(cube).x, 3.0);
        assert!(replayer.is_paused_at_end());
    }

    #[test]
    fn test_scene_load_without_keep_stops() {
        let mut host = MockHost::new("Lobby");
        host.spawn("/Cube", Vector3::zeros());
        let mut replayer = Replayer::new(
            EchoConfig {
                keep_replaying_across_scene: false,
                ..EchoConfig::default()
            },
            BehaviorRegistry::new(),
        );
        let data = recording(
            vec![TrackedEntity::pose("/Cube", 10.0)],
            vec![at(0.0, 0, 1.0), at(2.0, 0, 3.0)],
            vec![(1.0, "SceneLoad:Garden")],
        );
        replayer.load_data(&host, vec![data]).unwrap();
        replayer.start().unwrap();
        replayer.tick(&mut host, 1.5).unwrap();

        assert_eq!(replayer.state(), ReplayState::Idle);
        assert_eq!(host.scene, "Garden");
    }

    #[test]
    fn test_start_requires_load() {
        let mut replayer = replayer();
        assert!(matches!(replayer.start(), Err(EchoError::InvalidState(_))));
        assert!(replayer.load_data(&MockHost::new("Lobby"), Vec::new()).is_err());
        assert!(replayer.load_in_background(Vec::new()).is_err());
    }

    #[test]
    fn test_stop_returns_to_idle() {
        let mut host = MockHost::new("Lobby");
        host.spawn("/Cube", Vector3::zeros());
        let mut replayer = replayer();
        replayer.load_data(&host, vec![cube_recording(&[(0.0, 1.0)])]).unwrap();
        replayer.start().unwrap();
        replayer.stop();

        assert_eq!(replayer.state(), ReplayState::Idle);
        assert_eq!(replayer.recording_count(), 0);
        assert!(!replayer.is_replaying());
    }

    // ------------------------------------------------------------------------
    // Properties
    // ------------------------------------------------------------------------

    fn sorted_times(max_len: usize) -> impl Strategy<Value = Vec<f32>> {
        prop::collection::vec(0u16..400, 0..max_len).prop_map(|mut v| {
            v.sort_unstable();
            v.into_iter().map(|t| t as f32 / 100.0).collect()
        })
    }

    proptest! {
        #[test]
        fn prop_merge_applies_due_rows_in_order(
            object_times in sorted_times(30),
            event_times in sorted_times(30),
            t in 0.0f32..5.0,
        ) {
            let objects: Vec<ObjectSample> = object_times.iter().map(|ts| at(*ts, 0, 0.0)).collect();
            let events: Vec<EventSample> = event_times.iter().map(|ts| EventSample { timestamp: *ts, event_id: 0 }).collect();

            let (mut oc, mut ec) = (0, 0);
            let mut applied: Vec<(f32, bool)> = Vec::new();
            while let Some(next) = next_row(&objects, &events, oc, ec, t) {
                match next {
                    NextRow::Object(i) => { applied.push((objects[i].timestamp, false)); oc += 1; }
                    NextRow::Event(i) => { applied.push((events[i].timestamp, true)); ec += 1; }
                }
            }

            let due = object_times.iter().chain(event_times.iter()).filter(|ts| **ts <= t).count();
            prop_assert_eq!(applied.len(), due);
            for pair in applied.windows(2) {
                prop_assert!(pair[0].0 <= pair[1].0);
                if pair[0].0 == pair[1].0 {
                    // Never an object before an event of the same timestamp
                    prop_assert!(pair[0].1 || !pair[1].1);
                }
            }
        }

        #[test]
        fn prop_seek_matches_incremental_ticks(
            xs in prop::collection::vec(-10.0f32..10.0, 1..40),
            steps in prop::collection::vec(1u8..30, 1..20),
        ) {
            let rows: Vec<(f32, f32)> = xs.iter().enumerate().map(|(i, x)| (i as f32 * 0.1, *x)).collect();

            let mut incremental_host = MockHost::new("Lobby");
            let a = incremental_host.spawn("/Cube", Vector3::zeros());
            let mut incremental = replayer();
            incremental.load_data(&incremental_host, vec![cube_recording(&rows)]).unwrap();
            incremental.start().unwrap();
            for step in &steps {
                incremental.tick(&mut incremental_host, *step as f32 * 0.05).unwrap();
            }

            let mut seek_host = MockHost::new("Lobby");
            let b = seek_host.spawn("/Cube", Vector3::zeros());
            let mut seeking = replayer();
            seeking.load_data(&seek_host, vec![cube_recording(&rows)]).unwrap();
            seeking.start().unwrap();
            seeking.tick(&mut seek_host, 100.0).unwrap();
            seeking.seek_to(incremental.current_time());
            seeking.tick(&mut seek_host, 0.0).unwrap();

            prop_assert_eq!(seeking.current_time(), incremental.current_time());
            prop_assert_eq!(seek_host.position(b), incremental_host.position(a));
        }
    }
}
