//! Scene host abstraction for XREcho engines.

use crate::error::EnvError;
use crate::types::{CameraIntrinsics, EntityHandle, TrackableInfo, Transform};
use nalgebra::Vector3;

/// Abstraction over the live 3D scene the engines record from and replay into.
///
/// # Implementations
///
/// - **Production**: an adapter over a game engine's scene graph
/// - **Simulation**: `SimScene` in `xrecho_sim`, a seeded in-memory scene
///
/// # Ownership
///
/// The recorder only reads through this trait; the replayer is the only
/// writer of transforms while a replay is running.
pub trait SceneHost {
    /// Best-effort lookup of the first live entity at `path`.
    ///
    /// Returns `None` when the entity does not exist (yet). Callers treat this
    /// as a normal, recoverable condition.
    fn resolve(&self, path: &str) -> Option<EntityHandle>;

    /// Every live entity at `path`, in a stable host-defined order.
    ///
    /// Used to bind several identically-named tracked entities to distinct
    /// instances.
    fn instances(&self, path: &str) -> Vec<EntityHandle>;

    /// Current world transform of an entity, `None` if it is gone.
    fn transform(&self, entity: EntityHandle) -> Option<Transform>;

    /// Moves an entity.
    fn set_position(&mut self, entity: EntityHandle, position: Vector3<f32>);

    /// Rotates an entity (Euler angles in degrees).
    fn set_rotation(&mut self, entity: EntityHandle, rotation: Vector3<f32>);

    /// Camera intrinsics of an entity, `None` if it has no camera.
    fn camera(&self, entity: EntityHandle) -> Option<CameraIntrinsics>;

    /// Sets camera intrinsics, creating the camera component if absent.
    fn set_camera(&mut self, entity: EntityHandle, intrinsics: CameraIntrinsics);

    /// Shows or hides an entity. Hosts without visibility control ignore it.
    fn set_active(&mut self, _entity: EntityHandle, _active: bool) {}

    /// Name of the active scene.
    fn active_scene(&self) -> String;

    /// Requests a transition to another scene.
    ///
    /// The transition may complete asynchronously; the host signals
    /// completion by calling back into the session (`on_scene_loaded`).
    fn load_scene(&mut self, name: &str) -> Result<(), EnvError>;

    /// Entities the host offers for automatic tracking in the active scene.
    fn trackables(&self) -> Vec<TrackableInfo> {
        Vec::new()
    }
}
