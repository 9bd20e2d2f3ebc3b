//! Configuration of an XREcho installation.
//!
//! Persisted as pretty JSON so the last project/session survive restarts.

use crate::codec::Dialect;
use crate::error::{EchoError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

/// Name of the folder under the root holding every project.
pub const RECORDINGS_FOLDER: &str = "Recordings";

/// Settings of the automatic entity discovery and sampling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecorderConfig {
    /// Sampling rate of discovered entities (Hz)
    pub default_rate_hz: f32,

    /// Track the main camera (head-mounted display)
    pub track_main_camera: bool,

    /// Track XR controllers found in the scene
    pub track_controllers: bool,

    /// Track XR interactables found in the scene
    pub track_interactables: bool,

    /// Layers whose entities are tracked regardless of role
    pub track_layers: Vec<String>,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            default_rate_hz: 100.0,
            track_main_camera: true,
            track_controllers: true,
            track_interactables: true,
            track_layers: Vec::new(),
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EchoConfig {
    /// Folder holding `Recordings/`
    pub root: PathBuf,

    pub project: String,
    pub session: String,

    /// Separates the fields of a file name (`<date>_<type>_<scene>.csv`)
    pub filename_separator: char,

    /// Separates behavior names in the `replayScripts` column
    pub replay_behaviors_separator: char,

    /// Separates `SceneLoad` from the scene name in scene load events
    pub scene_load_separator: char,

    /// chrono format of the leading timestamp of file names
    pub date_format: String,

    /// Cell and decimal separators of every file
    pub dialect: Dialect,

    /// Resume a replay after a recorded scene load finished
    pub keep_replaying_across_scene: bool,

    /// Restart recording automatically after a scene change
    pub keep_recording_across_scene: bool,

    pub recorder: RecorderConfig,
}

impl Default for EchoConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("XREcho"),
            project: "project".to_string(),
            session: "session".to_string(),
            filename_separator: '_',
            replay_behaviors_separator: '|',
            scene_load_separator: ':',
            date_format: "%y-%m-%d-%H-%M-%S".to_string(),
            dialect: Dialect::english(),
            keep_replaying_across_scene: true,
            keep_recording_across_scene: true,
            recorder: RecorderConfig::default(),
        }
    }
}

impl EchoConfig {
    /// Rejects settings no engine can work with.
    pub fn validate(&self) -> Result<()> {
        if self.project.trim().is_empty() {
            return Err(EchoError::InvalidConfig("project name can't be empty".into()));
        }
        if self.session.trim().is_empty() {
            return Err(EchoError::InvalidConfig("session name can't be empty".into()));
        }
        if self.dialect.separator == self.dialect.decimal {
            return Err(EchoError::InvalidConfig(format!(
                "list separator and decimal mark are both '{}'",
                self.dialect.separator
            )));
        }
        if !(self.recorder.default_rate_hz > 0.0) {
            return Err(EchoError::InvalidConfig("default tracking rate must be positive".into()));
        }
        Ok(())
    }

    pub fn recordings_dir(&self) -> PathBuf {
        self.root.join(RECORDINGS_FOLDER)
    }

    pub fn project_dir(&self) -> PathBuf {
        self.recordings_dir().join(&self.project)
    }

    /// `<root>/Recordings/<project>/<session>`
    pub fn session_dir(&self) -> PathBuf {
        self.project_dir().join(&self.session)
    }

    /// Loads a config file, creating it with defaults when absent.
    pub fn load_or_create(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!("Creating config file: {}", path.display());
            let config = Self::default();
            config.save(path)?;
            return Ok(config);
        }

        info!("Importing config from {}", path.display());
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

/// Creates `path` and its parents if needed.
pub fn ensure_dir(path: &Path) -> Result<()> {
    std::fs::create_dir_all(path).map_err(|source| EchoError::CreateDirectory {
        path: path.to_path_buf(),
        source,
    })
}

/// Names of the sub-folders of `folder`, sorted. Missing folders yield nothing.
pub fn subfolders(folder: &Path) -> Vec<String> {
    let Ok(entries) = std::fs::read_dir(folder) else {
        return Vec::new();
    };

    let mut names: Vec<String> = entries
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().map(|t| t.is_dir()).unwrap_or(false))
        .filter_map(|e| e.file_name().into_string().ok())
        .collect();
    names.sort();
    names
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_paths() {
        let config = EchoConfig {
            root: PathBuf::from("/data"),
            ..EchoConfig::default()
        };
        assert_eq!(config.session_dir(), PathBuf::from("/data/Recordings/project/session"));
    }

    #[test]
    fn test_empty_names_are_rejected() {
        let config = EchoConfig {
            session: "  ".into(),
            ..EchoConfig::default()
        };
        assert!(matches!(config.validate(), Err(EchoError::InvalidConfig(_))));

        let config = EchoConfig {
            project: String::new(),
            ..EchoConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_clashing_dialect_is_rejected() {
        let config = EchoConfig {
            dialect: Dialect {
                separator: ',',
                decimal: ',',
            },
            ..EchoConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_or_create_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("xrecho_config.json");

        let created = EchoConfig::load_or_create(&path).unwrap();
        assert_eq!(created, EchoConfig::default());
        assert!(path.exists());

        let changed = EchoConfig {
            project: "museum".into(),
            session: "visitor12".into(),
            dialect: Dialect::french(),
            ..EchoConfig::default()
        };
        changed.save(&path).unwrap();

        assert_eq!(EchoConfig::load_or_create(&path).unwrap(), changed);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: EchoConfig = serde_json::from_str(r#"{ "project": "p2" }"#).unwrap();
        assert_eq!(config.project, "p2");
        assert_eq!(config.session, "session");
        assert_eq!(config.recorder.default_rate_hz, 100.0);
    }

    #[test]
    fn test_subfolders_sorted() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("b")).unwrap();
        std::fs::create_dir(dir.path().join("a")).unwrap();
        std::fs::write(dir.path().join("file.csv"), "x").unwrap();

        assert_eq!(subfolders(dir.path()), vec!["a".to_string(), "b".to_string()]);
        assert!(subfolders(&dir.path().join("missing")).is_empty());
    }
}
