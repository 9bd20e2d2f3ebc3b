//! XREcho Environment Abstraction Layer
//!
//! This crate provides the "Sans-IO" seam that lets the XREcho engines run
//! against a real 3D host (a game engine, an XR runtime) or against the
//! deterministic simulation in `xrecho_sim`.
//!
//! # Core Concept: The Host Pattern
//!
//! The record/replay engines never touch a scene graph directly. Everything
//! they need from the outside world is intercepted here:
//! - Time (`now()`, `system_time()`, `ticks_since_epoch()`)
//! - Entity lookup by path (`resolve()`, `instances()`)
//! - Transforms and camera intrinsics (getters and setters)
//! - Scene transitions (`load_scene()`)
//!
//! # Example
//!
//! ```ignore
//! use xrecho_env::{EchoContext, SceneHost};
//!
//! fn frame<H: SceneHost>(host: &mut H, recorder: &mut Recorder, dt: f32) {
//!     recorder.update(host, dt);
//! }
//! ```

mod context;
mod host;
mod types;
mod error;
mod system_impl;

pub use context::{EchoContext, TICKS_PER_SECOND};
pub use host::SceneHost;
pub use types::{CameraIntrinsics, EntityHandle, EntityRole, TrackableInfo, Transform};
pub use error::EnvError;
pub use system_impl::SystemContext;
