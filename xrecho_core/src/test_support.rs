//! In-memory host and clock shared by the engine tests.

use nalgebra::Vector3;
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use xrecho_env::{CameraIntrinsics, EchoContext, EntityHandle, EnvError, SceneHost, TrackableInfo, Transform};

/// Clock frozen at a fixed date until advanced.
pub struct MockClock {
    offset: Mutex<Duration>,
}

impl MockClock {
    pub fn new() -> Self {
        Self {
            offset: Mutex::new(Duration::ZERO),
        }
    }

    pub fn advance_wall(&self, by: Duration) {
        *self.offset.lock().unwrap() += by;
    }
}

impl EchoContext for MockClock {
    fn now(&self) -> Duration {
        *self.offset.lock().unwrap()
    }

    fn system_time(&self) -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(1_700_000_000) + self.now()
    }
}

pub struct MockEntity {
    pub path: String,
    pub transform: Transform,
    pub camera: Option<CameraIntrinsics>,
    pub active: bool,
}

/// Flat list of entities; handles are indices.
pub struct MockHost {
    pub scene: String,
    pub entities: Vec<MockEntity>,
    pub trackables: Vec<TrackableInfo>,
    pub loads: Vec<String>,
}

impl MockHost {
    pub fn new(scene: &str) -> Self {
        Self {
            scene: scene.to_string(),
            entities: Vec::new(),
            trackables: Vec::new(),
            loads: Vec::new(),
        }
    }

    pub fn spawn(&mut self, path: &str, position: Vector3<f32>) -> EntityHandle {
        self.entities.push(MockEntity {
            path: path.to_string(),
            transform: Transform::at(position),
            camera: None,
            active: true,
        });
        EntityHandle(self.entities.len() as u64 - 1)
    }

    pub fn move_to(&mut self, entity: EntityHandle, position: Vector3<f32>) {
        self.entities[entity.0 as usize].transform.position = position;
    }

    pub fn rotate_to(&mut self, entity: EntityHandle, rotation: Vector3<f32>) {
        self.entities[entity.0 as usize].transform.rotation = rotation;
    }

    pub fn attach_camera(&mut self, entity: EntityHandle, intrinsics: CameraIntrinsics) {
        self.entities[entity.0 as usize].camera = Some(intrinsics);
    }

    pub fn position(&self, entity: EntityHandle) -> Vector3<f32> {
        self.entities[entity.0 as usize].transform.position
    }

    pub fn rotation(&self, entity: EntityHandle) -> Vector3<f32> {
        self.entities[entity.0 as usize].transform.rotation
    }
}

impl SceneHost for MockHost {
    fn resolve(&self, path: &str) -> Option<EntityHandle> {
        self.instances(path).first().copied()
    }

    fn instances(&self, path: &str) -> Vec<EntityHandle> {
        self.entities
            .iter()
            .enumerate()
            .filter(|(_, e)| e.path == path)
            .map(|(i, _)| EntityHandle(i as u64))
            .collect()
    }

    fn transform(&self, entity: EntityHandle) -> Option<Transform> {
        self.entities.get(entity.0 as usize).map(|e| e.transform)
    }

    fn set_position(&mut self, entity: EntityHandle, position: Vector3<f32>) {
        if let Some(e) = self.entities.get_mut(entity.0 as usize) {
            e.transform.position = position;
        }
    }

    fn set_rotation(&mut self, entity: EntityHandle, rotation: Vector3<f32>) {
        if let Some(e) = self.entities.get_mut(entity.0 as usize) {
            e.transform.rotation = rotation;
        }
    }

    fn camera(&self, entity: EntityHandle) -> Option<CameraIntrinsics> {
        self.entities.get(entity.0 as usize).and_then(|e| e.camera)
    }

    fn set_camera(&mut self, entity: EntityHandle, intrinsics: CameraIntrinsics) {
        if let Some(e) = self.entities.get_mut(entity.0 as usize) {
            e.camera = Some(intrinsics);
        }
    }

    fn set_active(&mut self, entity: EntityHandle, active: bool) {
        if let Some(e) = self.entities.get_mut(entity.0 as usize) {
            e.active = active;
        }
    }

    fn active_scene(&self) -> String {
        self.scene.clone()
    }

    fn load_scene(&mut self, name: &str) -> Result<(), EnvError> {
        self.loads.push(name.to_string());
        self.scene = name.to_string();
        Ok(())
    }

    fn trackables(&self) -> Vec<TrackableInfo> {
        self.trackables.clone()
    }
}
