//! Error types for the XREcho engines.
//!
//! Only configuration problems and the overwrite guard stop an operation.
//! Resolution misses, dangling action ids and missing event files are logged
//! and skipped by the engines instead of surfacing here.

use std::path::PathBuf;
use thiserror::Error;
use xrecho_env::EnvError;

/// Errors returned by the record/replay engines.
#[derive(Debug, Error)]
pub enum EchoError {
    /// Empty project or session name, or another unusable setting
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The session folder could not be created
    #[error("Can't create directory {path}: {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Starting a recording would overwrite an existing objects format file
    #[error("Format file {0} would be overwritten by recording")]
    FormatExists(PathBuf),

    /// A file the codec was asked to read does not exist
    #[error("File not found: {0}")]
    NotFound(PathBuf),

    /// No objects format file accompanies an objects data file
    #[error("No objects format file for {0}")]
    MissingFormat(PathBuf),

    /// Operation not allowed in the current engine state
    #[error("Invalid state: {0}")]
    InvalidState(&'static str),

    /// The background loader died or returned garbage
    #[error("Load failed: {0}")]
    LoadFailed(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Host error: {0}")]
    Env(#[from] EnvError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result alias used throughout the engines.
pub type Result<T> = std::result::Result<T, EchoError>;
