//! Error types for the XREcho environment abstraction.

use thiserror::Error;

/// Errors that can occur in the environment abstraction layer.
#[derive(Debug, Error)]
pub enum EnvError {
    /// The host refused or failed a scene transition
    #[error("Scene load failed: {0}")]
    SceneLoad(String),

    /// The referenced entity no longer exists in the host
    #[error("Entity not found: {0}")]
    EntityNotFound(String),

    /// Context operation failed
    #[error("Context error: {0}")]
    ContextError(String),
}

impl EnvError {
    /// Creates a scene load error.
    pub fn scene_load(msg: impl Into<String>) -> Self {
        Self::SceneLoad(msg.into())
    }

    /// Creates an entity-not-found error.
    pub fn entity_not_found(entity: impl std::fmt::Display) -> Self {
        Self::EntityNotFound(entity.to_string())
    }
}
