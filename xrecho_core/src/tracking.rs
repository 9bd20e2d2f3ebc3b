//! Tracking descriptor model.
//!
//! A [`TrackedEntity`] says *what* to sample on one host entity and *how
//! often*. Each recording freezes the entity list into an ordered list of
//! [`TrackingAction`]s; the index of an action is the `actionId` column of
//! the objects data file. Because the replayer rebuilds that list from the
//! objects format file alone, [`compute_actions`] must be a pure function of
//! the entity descriptors.

use crate::codec::Row;
use crate::config::RecorderConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, warn};
use xrecho_env::{EntityHandle, EntityRole, SceneHost, TrackableInfo};

/// Value of the `type` column for entity rows in the objects format file.
pub const OBJECT_ROW_TYPE: &str = "object";

/// Header of the objects format file.
pub const OBJECTS_FORMAT_HEADER: [&str; 8] = [
    "type",
    "trackedData",
    "position",
    "rotation",
    "camera",
    "trackingRate",
    "replayGameObject",
    "replayScripts",
];

// ============================================================================
// TRACKED ENTITY
// ============================================================================

/// Identity of a host entity plus what to sample on it and at what rate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedEntity {
    /// Stable scene-graph path (e.g. `/XR Rig/Camera Offset/Main Camera`)
    pub path: String,

    pub track_position: bool,
    pub track_rotation: bool,
    pub track_camera: bool,

    /// Samples per second
    pub sampling_rate_hz: f32,

    /// Path of the entity to drive instead of the original during replay
    #[serde(default)]
    pub replay_surrogate: Option<String>,

    /// Named behaviors attached to the replay target
    #[serde(default)]
    pub replay_behaviors: Vec<String>,
}

impl TrackedEntity {
    /// Tracks position and rotation of `path` at `sampling_rate_hz`.
    pub fn pose(path: impl Into<String>, sampling_rate_hz: f32) -> Self {
        Self {
            path: path.into(),
            track_position: true,
            track_rotation: true,
            track_camera: false,
            sampling_rate_hz,
            replay_surrogate: None,
            replay_behaviors: Vec::new(),
        }
    }

    pub fn with_camera(mut self) -> Self {
        self.track_camera = true;
        self
    }

    pub fn with_surrogate(mut self, path: impl Into<String>) -> Self {
        self.replay_surrogate = Some(path.into());
        self
    }

    pub fn with_behavior(mut self, name: impl Into<String>) -> Self {
        self.replay_behaviors.push(name.into());
        self
    }

    /// Seconds between two sampling checks.
    pub fn sampling_interval(&self) -> f32 {
        1.0 / self.sampling_rate_hz
    }

    /// Cells of this entity's objects format row, in header order.
    pub fn format_cells(&self, behaviors_separator: char) -> [String; 8] {
        [
            OBJECT_ROW_TYPE.to_string(),
            self.path.clone(),
            bool_cell(self.track_position),
            bool_cell(self.track_rotation),
            bool_cell(self.track_camera),
            self.sampling_rate_hz.to_string(),
            self.replay_surrogate.clone().unwrap_or_default(),
            self.replay_behaviors.join(&behaviors_separator.to_string()),
        ]
    }

    /// Rebuilds a descriptor from an objects format row.
    ///
    /// Returns `None` for rows that do not describe an entity (other `type`
    /// values, or no path).
    pub fn from_format_row(row: &Row, behaviors_separator: char) -> Option<Self> {
        if row.text("type").as_deref() != Some(OBJECT_ROW_TYPE) {
            return None;
        }

        let path = row.text("trackedData")?;
        let flag = |column: &str| row.text(column).map_or(false, |v| v.eq_ignore_ascii_case("true"));

        let replay_behaviors = row
            .text("replayScripts")
            .map(|s| {
                s.split(behaviors_separator)
                    .filter(|name| !name.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        Some(Self {
            path,
            track_position: flag("position"),
            track_rotation: flag("rotation"),
            track_camera: flag("camera"),
            sampling_rate_hz: row.f32("trackingRate").unwrap_or(RecorderConfig::default().default_rate_hz),
            replay_surrogate: row.text("replayGameObject"),
            replay_behaviors,
        })
    }
}

fn bool_cell(value: bool) -> String {
    let text = if value { "True" } else { "False" };
    text.to_string()
}

// ============================================================================
// ACTIONS
// ============================================================================

/// Row kind of an action. The discriminant is persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActionKind {
    Position = 0,
    Rotation = 1,
    PositionAndRotation = 2,
    Camera = 3,
}

impl ActionKind {
    pub fn index(self) -> i32 {
        self as i32
    }

    pub fn has_position(self) -> bool {
        matches!(self, ActionKind::Position | ActionKind::PositionAndRotation)
    }

    pub fn has_rotation(self) -> bool {
        matches!(self, ActionKind::Rotation | ActionKind::PositionAndRotation)
    }
}

/// Per-recording runtime projection of one tracked entity.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackingAction {
    /// Index of the source entity in the frozen entity list
    pub entity: usize,

    /// Fixed for the lifetime of the recording
    pub kind: ActionKind,

    /// Live entity this action reads from or writes to; `None` until resolved
    pub target: Option<EntityHandle>,
}

/// Derives the ordered action list of an entity list.
///
/// Position and rotation fold into one action; camera is always a separate
/// action following it. Entities tracking nothing produce no action.
pub fn compute_actions(entities: &[TrackedEntity]) -> Vec<TrackingAction> {
    let mut actions = Vec::new();

    for (index, entity) in entities.iter().enumerate() {
        let pose = match (entity.track_position, entity.track_rotation) {
            (true, true) => Some(ActionKind::PositionAndRotation),
            (true, false) => Some(ActionKind::Position),
            (false, true) => Some(ActionKind::Rotation),
            (false, false) => None,
        };

        if let Some(kind) = pose {
            actions.push(TrackingAction {
                entity: index,
                kind,
                target: None,
            });
        }

        if entity.track_camera {
            actions.push(TrackingAction {
                entity: index,
                kind: ActionKind::Camera,
                target: None,
            });
        }
    }

    actions
}

// ============================================================================
// PATH CACHE
// ============================================================================

/// Hands out the instances at a path first-come-first-served.
///
/// When several tracked entities share the same path, the first request gets
/// the first instance, the second request the second, and so on, instead of
/// all binding to the same host entity. Claims are remembered, so instances
/// that appear later (hot-plug) go to the next entity still waiting for one.
#[derive(Debug, Default)]
pub struct PathCache {
    claimed: HashMap<String, Vec<EntityHandle>>,
}

impl PathCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// First instance at `path` not claimed yet.
    pub fn next<H: SceneHost + ?Sized>(&mut self, host: &H, path: &str) -> Option<EntityHandle> {
        let claimed = self.claimed.entry(path.to_string()).or_default();
        let free = host.instances(path).into_iter().find(|h| !claimed.contains(h))?;
        claimed.push(free);
        Some(free)
    }

    /// Forgets every claim (after a scene change).
    pub fn clear(&mut self) {
        self.claimed.clear();
    }
}

// ============================================================================
// ROSTER
// ============================================================================

/// The tracked entity list of a recorder.
///
/// The first `static_count` entries come from configuration and survive scene
/// changes; the rest are discovered from the host and recomputed on every
/// scene (re)load.
#[derive(Debug, Clone, Default)]
pub struct TrackingRoster {
    entries: Vec<TrackedEntity>,
    static_count: usize,
}

impl TrackingRoster {
    /// Creates a roster whose configured entries are `configured`.
    ///
    /// Entries without a positive, finite sampling rate are dropped: they
    /// would be sampled once (rate 0) or on every frame (negative rate).
    pub fn new(configured: Vec<TrackedEntity>) -> Self {
        let configured: Vec<TrackedEntity> = configured
            .into_iter()
            .filter(|entity| {
                let valid = entity.sampling_rate_hz.is_finite() && entity.sampling_rate_hz > 0.0;
                if !valid {
                    warn!(
                        "{} has sampling rate {} Hz, not tracking it",
                        entity.path, entity.sampling_rate_hz
                    );
                }
                valid
            })
            .collect();
        let static_count = configured.len();
        Self {
            entries: configured,
            static_count,
        }
    }

    pub fn entries(&self) -> &[TrackedEntity] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn position_of(&self, path: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.path == path)
    }

    /// Drops discovered entries and rediscovers them from the host.
    pub fn rebuild<H: SceneHost + ?Sized>(&mut self, host: &H, config: &RecorderConfig) {
        self.entries.truncate(self.static_count);

        for info in host.trackables() {
            if self.wants(&info, config) {
                self.add_discovered(&info, config.default_rate_hz);
            } else {
                self.remove_discovered(&info.path);
            }
        }

        debug!(
            "Tracking roster rebuilt: {} configured, {} discovered",
            self.static_count,
            self.entries.len() - self.static_count
        );
    }

    fn wants(&self, info: &TrackableInfo, config: &RecorderConfig) -> bool {
        let on_tracked_layer = info
            .layer
            .as_ref()
            .map_or(false, |layer| config.track_layers.iter().any(|l| l == layer));

        match info.role {
            EntityRole::MainCamera => config.track_main_camera || on_tracked_layer,
            EntityRole::Controller => config.track_controllers || on_tracked_layer,
            EntityRole::Interactable => config.track_interactables || on_tracked_layer,
            EntityRole::Generic => on_tracked_layer,
        }
    }

    fn add_discovered(&mut self, info: &TrackableInfo, rate_hz: f32) {
        if self.position_of(&info.path).is_some() {
            return;
        }

        let mut entity = TrackedEntity::pose(info.path.clone(), rate_hz);
        entity.track_camera = info.role == EntityRole::MainCamera;
        self.entries.push(entity);
    }

    fn remove_discovered(&mut self, path: &str) {
        if let Some(index) = self.position_of(path) {
            if index >= self.static_count {
                self.entries.remove(index);
            }
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
