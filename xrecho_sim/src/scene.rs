//! Seeded in-memory scene implementing SceneHost.
//!
//! The scene is a square room with an XR rig (head camera and two hands),
//! an optional crowd of identically named visitors and a few static props.
//! Walkers follow a bounded random walk driven by a ChaCha8 RNG, so the
//! same seed always produces the same motion.

use nalgebra::Vector3;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, StandardNormal, Uniform};
use serde::{Deserialize, Serialize};
use tracing::debug;
use xrecho_core::PlaneBounds;
use xrecho_env::{CameraIntrinsics, EntityHandle, EntityRole, EnvError, SceneHost, TrackableInfo, Transform};

/// Half the side of the room (m).
pub const ROOM_HALF_EXTENT: f32 = 5.0;

/// Walking speed cap (m/s).
pub const MAX_SPEED: f32 = 1.4;

/// Standard deviation of the random walk acceleration (m/s²).
pub const WALK_JITTER: f32 = 2.0;

/// Eye height of the head camera (m).
pub const EYE_HEIGHT: f32 = 1.7;

pub const HEAD_PATH: &str = "/XR Rig/Camera";
pub const LEFT_HAND_PATH: &str = "/XR Rig/LeftHand";
pub const RIGHT_HAND_PATH: &str = "/XR Rig/RightHand";
pub const VISITOR_PATH: &str = "/Crowd/Visitor";
pub const PROP_PATH: &str = "/Props/Cube";

/// Layer the crowd lives on.
pub const CROWD_LAYER: &str = "Crowd";

/// Floor every scene is built on.
pub fn room_bounds() -> PlaneBounds {
    PlaneBounds::new(
        Vector3::new(-ROOM_HALF_EXTENT, 0.0, -ROOM_HALF_EXTENT),
        Vector3::new(2.0 * ROOM_HALF_EXTENT, 0.0, 2.0 * ROOM_HALF_EXTENT),
    )
}

/// What a freshly loaded scene contains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SceneLayout {
    /// Head camera and both hands
    pub rig: bool,

    /// Walkers sharing [`VISITOR_PATH`]
    pub visitors: usize,

    /// Static interactables sharing [`PROP_PATH`]
    pub props: usize,
}

impl Default for SceneLayout {
    fn default() -> Self {
        Self {
            rig: true,
            visitors: 0,
            props: 3,
        }
    }
}

/// One live entity of the simulated scene.
#[derive(Debug, Clone)]
pub struct SimEntity {
    pub path: String,
    pub role: EntityRole,
    pub layer: Option<String>,
    pub transform: Transform,
    pub camera: Option<CameraIntrinsics>,
    pub active: bool,

    /// Current velocity (m/s); walkers only
    velocity: Vector3<f32>,
    walker: bool,
}

impl SimEntity {
    fn new(path: &str, role: EntityRole, position: Vector3<f32>) -> Self {
        Self {
            path: path.to_string(),
            role,
            layer: None,
            transform: Transform::at(position),
            camera: None,
            active: true,
            velocity: Vector3::zeros(),
            walker: false,
        }
    }
}

/// The simulated scene.
pub struct SimScene {
    /// Master seed; each scene load reseeds from it and the scene name
    seed: u64,

    name: String,
    layout: SceneLayout,

    /// Bumped on every load so handles of a previous scene go stale
    generation: u32,

    rng: ChaCha8Rng,

    entities: Vec<SimEntity>,

    /// A scene load finished and has not been reported yet
    loaded: bool,

    /// Names of every scene loaded through [`SceneHost::load_scene`]
    history: Vec<String>,
}

impl SimScene {
    /// Creates and populates the scene `name`.
    pub fn new(seed: u64, name: &str, layout: SceneLayout) -> Self {
        let mut scene = Self {
            seed,
            name: name.to_string(),
            layout,
            generation: 0,
            rng: ChaCha8Rng::seed_from_u64(seed),
            entities: Vec::new(),
            loaded: false,
            history: Vec::new(),
        };
        scene.populate();
        scene
    }

    fn handle(&self, index: usize) -> EntityHandle {
        EntityHandle(((self.generation as u64) << 32) | index as u64)
    }

    fn index(&self, handle: EntityHandle) -> Option<usize> {
        let (generation, index) = ((handle.0 >> 32) as u32, (handle.0 & 0xffff_ffff) as usize);
        (generation == self.generation && index < self.entities.len()).then_some(index)
    }

    /// Rebuilds the entity list for the current scene name.
    fn populate(&mut self) {
        self.rng = ChaCha8Rng::seed_from_u64(self.seed ^ name_hash(&self.name));
        self.entities.clear();

        let spawn_area = Uniform::new(-ROOM_HALF_EXTENT * 0.8, ROOM_HALF_EXTENT * 0.8);

        if self.layout.rig {
            let mut head = SimEntity::new(HEAD_PATH, EntityRole::MainCamera, Vector3::new(0.0, EYE_HEIGHT, 0.0));
            head.camera = Some(CameraIntrinsics::default());
            head.walker = true;
            self.entities.push(head);
            self.entities.push(SimEntity::new(LEFT_HAND_PATH, EntityRole::Controller, Vector3::zeros()));
            self.entities.push(SimEntity::new(RIGHT_HAND_PATH, EntityRole::Controller, Vector3::zeros()));
        }

        for _ in 0..self.layout.visitors {
            let position = Vector3::new(spawn_area.sample(&mut self.rng), EYE_HEIGHT, spawn_area.sample(&mut self.rng));
            let mut visitor = SimEntity::new(VISITOR_PATH, EntityRole::Generic, position);
            visitor.layer = Some(CROWD_LAYER.to_string());
            visitor.walker = true;
            self.entities.push(visitor);
        }

        for _ in 0..self.layout.props {
            let position = Vector3::new(spawn_area.sample(&mut self.rng), 0.5, spawn_area.sample(&mut self.rng));
            self.entities.push(SimEntity::new(PROP_PATH, EntityRole::Interactable, position));
        }

        self.place_hands();
        debug!("Scene {} populated with {} entities", self.name, self.entities.len());
    }

    /// Hands hang at fixed offsets from the head.
    fn place_hands(&mut self) {
        let Some(head) = self.entities.iter().find(|e| e.path == HEAD_PATH).map(|e| e.transform) else {
            return;
        };
        for entity in &mut self.entities {
            let offset = match entity.path.as_str() {
                LEFT_HAND_PATH => Vector3::new(-0.25, -0.5, 0.3),
                RIGHT_HAND_PATH => Vector3::new(0.25, -0.5, 0.3),
                _ => continue,
            };
            entity.transform.position = head.position + offset;
            entity.transform.rotation = head.rotation;
        }
    }

    /// Advances every walker by `dt` seconds.
    pub fn step(&mut self, dt: f32) {
        for i in 0..self.entities.len() {
            if !self.entities[i].walker || !self.entities[i].active {
                continue;
            }
            let ax: f32 = StandardNormal.sample(&mut self.rng);
            let az: f32 = StandardNormal.sample(&mut self.rng);
            let accel = Vector3::new(ax, 0.0, az) * WALK_JITTER;

            let entity = &mut self.entities[i];
            entity.velocity += accel * dt;
            let speed = entity.velocity.norm();
            if speed > MAX_SPEED {
                entity.velocity *= MAX_SPEED / speed;
            }

            let mut position = entity.transform.position + entity.velocity * dt;
            for axis in [0, 2] {
                if position[axis].abs() > ROOM_HALF_EXTENT {
                    position[axis] = position[axis].clamp(-ROOM_HALF_EXTENT, ROOM_HALF_EXTENT);
                    entity.velocity[axis] = -entity.velocity[axis];
                }
            }
            entity.transform.position = position;

            if entity.velocity.x != 0.0 || entity.velocity.z != 0.0 {
                let yaw = entity.velocity.x.atan2(entity.velocity.z).to_degrees();
                entity.transform.rotation = Vector3::new(0.0, yaw.rem_euclid(360.0), 0.0);
            }
        }
        self.place_hands();
    }

    /// Moves an entity instantly (a teleport, as far as trajectories go).
    pub fn teleport(&mut self, entity: EntityHandle, position: Vector3<f32>) {
        if let Some(i) = self.index(entity) {
            self.entities[i].transform.position = position;
            self.place_hands();
        }
    }

    /// Stops or restarts the random walk of every walker.
    pub fn freeze(&mut self, frozen: bool) {
        for entity in &mut self.entities {
            if entity.role == EntityRole::MainCamera || entity.path == VISITOR_PATH {
                entity.walker = !frozen;
                entity.velocity = Vector3::zeros();
            }
        }
    }

    pub fn entities(&self) -> &[SimEntity] {
        &self.entities
    }

    pub fn layout(&self) -> SceneLayout {
        self.layout
    }

    /// Scenes loaded so far, in order.
    pub fn load_history(&self) -> &[String] {
        &self.history
    }

    /// Room floor, for heatmaps.
    pub fn bounds(&self) -> PlaneBounds {
        room_bounds()
    }

    /// Reports (once) that a scene load completed.
    pub fn take_loaded(&mut self) -> bool {
        std::mem::take(&mut self.loaded)
    }

    /// Transforms of every entity, in scene order.
    pub fn snapshot(&self) -> Vec<(String, Transform)> {
        self.entities.iter().map(|e| (e.path.clone(), e.transform)).collect()
    }
}

/// FNV-1a, stable across runs and platforms.
fn name_hash(name: &str) -> u64 {
    name.bytes()
        .fold(0xcbf2_9ce4_8422_2325, |h, b| (h ^ b as u64).wrapping_mul(0x0100_0000_01b3))
}

impl SceneHost for SimScene {
    fn resolve(&self, path: &str) -> Option<EntityHandle> {
        self.entities.iter().position(|e| e.path == path).map(|i| self.handle(i))
    }

    fn instances(&self, path: &str) -> Vec<EntityHandle> {
        self.entities
            .iter()
            .enumerate()
            .filter(|(_, e)| e.path == path)
            .map(|(i, _)| self.handle(i))
            .collect()
    }

    fn transform(&self, entity: EntityHandle) -> Option<Transform> {
        self.index(entity).map(|i| self.entities[i].transform)
    }

    fn set_position(&mut self, entity: EntityHandle, position: Vector3<f32>) {
        if let Some(i) = self.index(entity) {
            self.entities[i].transform.position = position;
        }
    }

    fn set_rotation(&mut self, entity: EntityHandle, rotation: Vector3<f32>) {
        if let Some(i) = self.index(entity) {
            self.entities[i].transform.rotation = rotation;
        }
    }

    fn camera(&self, entity: EntityHandle) -> Option<CameraIntrinsics> {
        self.index(entity).and_then(|i| self.entities[i].camera)
    }

    fn set_camera(&mut self, entity: EntityHandle, intrinsics: CameraIntrinsics) {
        if let Some(i) = self.index(entity) {
            self.entities[i].camera = Some(intrinsics);
        }
    }

    fn set_active(&mut self, entity: EntityHandle, active: bool) {
        if let Some(i) = self.index(entity) {
            self.entities[i].active = active;
        }
    }

    fn active_scene(&self) -> String {
        self.name.clone()
    }

    fn load_scene(&mut self, name: &str) -> Result<(), EnvError> {
        if name.trim().is_empty() {
            return Err(EnvError::scene_load("empty scene name"));
        }
        self.name = name.to_string();
        self.generation = self.generation.wrapping_add(1);
        self.populate();
        self.history.push(name.to_string());
        self.loaded = true;
        Ok(())
    }

    fn trackables(&self) -> Vec<TrackableInfo> {
        let mut seen: Vec<&str> = Vec::new();
        self.entities
            .iter()
            .filter(|e| {
                let first = !seen.contains(&e.path.as_str());
                if first {
                    seen.push(&e.path);
                }
                first
            })
            .map(|e| {
                let info = TrackableInfo::new(e.path.clone(), e.role);
                match &e.layer {
                    Some(layer) => info.on_layer(layer.clone()),
                    None => info,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use proptest::prelude::*;

    #[test]
    fn test_same_seed_same_walk() {
        let layout = SceneLayout {
            visitors: 4,
            ..SceneLayout::default()
        };
        let mut a = SimScene::new(7, "Lobby", layout);
        let mut b = SimScene::new(7, "Lobby", layout);
        for _ in 0..100 {
            a.step(0.05);
            b.step(0.05);
        }
        assert_eq!(a.snapshot(), b.snapshot());

        let mut c = SimScene::new(8, "Lobby", layout);
        for _ in 0..100 {
            c.step(0.05);
        }
        assert_ne!(a.snapshot(), c.snapshot());
    }

    #[test]
    fn test_walkers_stay_in_room() {
        let mut scene = SimScene::new(3, "Lobby", SceneLayout { visitors: 8, ..SceneLayout::default() });
        for _ in 0..2_000 {
            scene.step(0.05);
        }
        for entity in scene.entities() {
            assert!(entity.transform.position.x.abs() <= ROOM_HALF_EXTENT + 1.0);
            assert!(entity.transform.position.z.abs() <= ROOM_HALF_EXTENT + 1.0);
        }
    }

    #[test]
    fn test_hands_follow_head() {
        let mut scene = SimScene::new(1, "Lobby", SceneLayout::default());
        scene.step(0.1);
        let head = scene.transform(scene.resolve(HEAD_PATH).unwrap()).unwrap();
        let left = scene.transform(scene.resolve(LEFT_HAND_PATH).unwrap()).unwrap();
        assert_relative_eq!(left.position.x, head.position.x - 0.25, epsilon = 1e-5);
    }

    #[test]
    fn test_scene_load_invalidates_handles() {
        let mut scene = SimScene::new(1, "Lobby", SceneLayout::default());
        let head = scene.resolve(HEAD_PATH).unwrap();

        scene.load_scene("Garden").unwrap();
        assert!(scene.take_loaded());
        assert!(!scene.take_loaded());
        assert_eq!(scene.active_scene(), "Garden");
        assert!(scene.transform(head).is_none());
        assert!(scene.resolve(HEAD_PATH).is_some());
        assert!(scene.load_scene(" ").is_err());
    }

    #[test]
    fn test_duplicates_listed_once_as_trackables() {
        let scene = SimScene::new(1, "Lobby", SceneLayout { visitors: 3, props: 2, rig: true });
        assert_eq!(scene.instances(VISITOR_PATH).len(), 3);

        let trackables = scene.trackables();
        assert_eq!(trackables.len(), 5);
        let visitor = trackables.iter().find(|t| t.path == VISITOR_PATH).unwrap();
        assert_eq!(visitor.layer.as_deref(), Some(CROWD_LAYER));
    }

    proptest! {
        #[test]
        fn prop_walk_is_seeded_and_bounded(seed in any::<u64>(), visitors in 0usize..6, steps in 1usize..300) {
            let layout = SceneLayout { visitors, ..SceneLayout::default() };
            let mut a = SimScene::new(seed, "Lobby", layout);
            let mut b = SimScene::new(seed, "Lobby", layout);
            for _ in 0..steps {
                a.step(0.05);
                b.step(0.05);
            }

            prop_assert_eq!(a.snapshot(), b.snapshot());
            for entity in a.entities().iter().filter(|e| e.walker) {
                prop_assert!(entity.transform.position.x.abs() <= ROOM_HALF_EXTENT);
                prop_assert!(entity.transform.position.z.abs() <= ROOM_HALF_EXTENT);
            }
        }
    }
}
