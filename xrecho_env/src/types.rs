//! Common types shared between the XREcho engines and their host.

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

/// Opaque reference to a live entity inside the host scene.
///
/// Handles are only meaningful to the host that issued them and become stale
/// after a scene transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityHandle(pub u64);

impl std::fmt::Display for EntityHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// World-space pose of an entity.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    /// Position in meters
    pub position: Vector3<f32>,

    /// Euler angles in degrees (x, y, z)
    pub rotation: Vector3<f32>,
}

impl Transform {
    /// Creates a transform from a position and Euler angles.
    pub fn new(position: Vector3<f32>, rotation: Vector3<f32>) -> Self {
        Self { position, rotation }
    }

    /// Creates a transform at `position` with no rotation.
    pub fn at(position: Vector3<f32>) -> Self {
        Self {
            position,
            rotation: Vector3::zeros(),
        }
    }
}

impl Default for Transform {
    fn default() -> Self {
        Self::at(Vector3::zeros())
    }
}

/// Intrinsic parameters of a camera component.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CameraIntrinsics {
    /// Vertical field of view in degrees
    pub field_of_view: f32,

    /// Width / height
    pub aspect: f32,

    /// Near clip plane distance
    pub near: f32,

    /// Far clip plane distance
    pub far: f32,
}

impl Default for CameraIntrinsics {
    fn default() -> Self {
        Self {
            field_of_view: 60.0,
            aspect: 16.0 / 9.0,
            near: 0.3,
            far: 1000.0,
        }
    }
}

/// Why a host entity is a candidate for automatic tracking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityRole {
    /// The camera the user looks through (head-mounted display)
    MainCamera,

    /// A hand-held XR controller
    Controller,

    /// An object the user can grab or otherwise interact with
    Interactable,

    /// Anything else (matched by layer only)
    Generic,
}

/// Discovery record for an entity the host offers for tracking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackableInfo {
    /// Path of the entity in the host scene graph (e.g. `/XR Rig/Camera`)
    pub path: String,

    /// Role of the entity
    pub role: EntityRole,

    /// Layer the entity lives on, if the host has layers
    pub layer: Option<String>,
}

impl TrackableInfo {
    /// Creates a discovery record without a layer.
    pub fn new(path: impl Into<String>, role: EntityRole) -> Self {
        Self {
            path: path.into(),
            role,
            layer: None,
        }
    }

    /// Sets the layer of this record.
    pub fn on_layer(mut self, layer: impl Into<String>) -> Self {
        self.layer = Some(layer.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_transform_at_has_no_rotation() {
        let t = Transform::at(Vector3::new(1.0, 2.0, 3.0));
        assert_relative_eq!(t.rotation, Vector3::zeros());
        assert_relative_eq!(t.position, Vector3::new(1.0, 2.0, 3.0));
        assert_eq!(Transform::default(), Transform::new(Vector3::zeros(), Vector3::zeros()));
    }

    #[test]
    fn test_default_camera_is_widescreen() {
        let camera = CameraIntrinsics::default();
        assert_relative_eq!(camera.aspect * 9.0, 16.0, epsilon = 1e-5);
        assert_relative_eq!(camera.field_of_view, 60.0);
        assert!(camera.near < camera.far);
    }

    #[test]
    fn test_trackable_on_layer() {
        let info = TrackableInfo::new("/Props/Cube", EntityRole::Generic).on_layer("Tracked");
        assert_eq!(info.layer.as_deref(), Some("Tracked"));
    }

    #[test]
    fn test_handle_display() {
        assert_eq!(EntityHandle(7).to_string(), "#7");
    }
}
