//! Session orchestration.
//!
//! One [`EchoSession`] owns the configuration, the recorder and the replayer
//! of a running application and routes host callbacks (frame ticks, scene
//! changes) to both. Hosts hold the session; nothing here is global.

use crate::behaviors::BehaviorRegistry;
use crate::config::EchoConfig;
use crate::dataset::RecordTrace;
use crate::error::{EchoError, Result};
use crate::naming::{last_recording, scan_session, RecordingFiles};
use crate::tracking::{TrackedEntity, TrackingRoster};
use crate::xrecho_record::Recorder;
use crate::xrecho_replay::Replayer;
use std::path::Path;
use std::sync::Arc;
use tracing::info;
use xrecho_env::{EchoContext, SceneHost};

/// Recorder and replayer of one application.
///
/// Recording and replaying are mutually exclusive: the replayer writes the
/// transforms the recorder would read.
pub struct EchoSession {
    config: EchoConfig,
    recorder: Recorder,
    replayer: Replayer,
}

impl EchoSession {
    /// # Arguments
    /// * `config` - Shared by both engines
    /// * `context` - Clock of the recorder
    /// * `registry` - Replay behaviors known to the replayer
    /// * `tracked` - Statically configured tracked entities
    pub fn new(
        config: EchoConfig,
        context: Arc<dyn EchoContext>,
        registry: BehaviorRegistry,
        tracked: Vec<TrackedEntity>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            recorder: Recorder::new(config.clone(), context, TrackingRoster::new(tracked)),
            replayer: Replayer::new(config.clone(), registry),
            config,
        })
    }

    pub fn config(&self) -> &EchoConfig {
        &self.config
    }

    pub fn recorder(&self) -> &Recorder {
        &self.recorder
    }

    pub fn recorder_mut(&mut self) -> &mut Recorder {
        &mut self.recorder
    }

    pub fn replayer(&self) -> &Replayer {
        &self.replayer
    }

    pub fn replayer_mut(&mut self) -> &mut Replayer {
        &mut self.replayer
    }

    /// Discovers trackable entities in the active scene. Call once the
    /// first scene is ready.
    pub fn attach<H: SceneHost + ?Sized>(&mut self, host: &H) {
        let recorder_config = self.config.recorder.clone();
        self.recorder.roster_mut().rebuild(host, &recorder_config);
    }

    /// Advances whichever engine is running.
    pub fn update<H: SceneHost + ?Sized>(&mut self, host: &mut H, dt: f32) -> Result<()> {
        self.recorder.update(&*host, dt)?;
        self.replayer.tick(host, dt)
    }

    // ------------------------------------------------------------------------
    // Recording
    // ------------------------------------------------------------------------

    pub fn start_recording<H: SceneHost + ?Sized>(&mut self, host: &H) -> Result<()> {
        if self.replayer.is_replaying() {
            return Err(EchoError::InvalidState("can't record while replaying"));
        }
        self.recorder.start(host)
    }

    pub fn stop_recording(&mut self) -> Result<()> {
        self.recorder.stop()
    }

    pub fn toggle_recording<H: SceneHost + ?Sized>(&mut self, host: &H, min_record_time: f32) -> Result<()> {
        if !self.recorder.is_recording() && self.replayer.is_replaying() {
            return Err(EchoError::InvalidState("can't record while replaying"));
        }
        self.recorder.toggle(host, min_record_time)
    }

    /// Logs an event into the recording in progress, if any.
    pub fn log_event(&mut self, name: &str) -> Result<()> {
        self.recorder.log_event(name)
    }

    // ------------------------------------------------------------------------
    // Replaying
    // ------------------------------------------------------------------------

    /// Loads `files` and plays them from the start.
    ///
    /// # Arguments
    /// * `background` - Parse on a worker thread; playback starts on the tick
    ///   that picks the result up
    pub fn replay<H: SceneHost + ?Sized>(&mut self, host: &H, files: Vec<RecordingFiles>, background: bool) -> Result<()> {
        if self.recorder.is_recording() {
            return Err(EchoError::InvalidState("can't replay while recording"));
        }

        if background {
            self.replayer.load_in_background(files)?;
        } else {
            self.replayer.load(host, &files)?;
        }
        self.replayer.start()
    }

    /// Replays every recording of the current session together.
    pub fn replay_session<H: SceneHost + ?Sized>(&mut self, host: &H, background: bool) -> Result<()> {
        let folder = self.config.session_dir();
        let files = scan_session(&self.config, &folder, None);
        if files.is_empty() {
            return Err(EchoError::NotFound(folder));
        }
        self.replay(host, files, background)
    }

    /// Replays the most recent recording of the current session.
    pub fn replay_last<H: SceneHost + ?Sized>(&mut self, host: &H) -> Result<()> {
        let folder = self.config.session_dir();
        let files = last_recording(&self.config, &folder, None).ok_or(EchoError::NotFound(folder))?;
        self.replay(host, vec![files], false)
    }

    pub fn stop_replay(&mut self) {
        self.replayer.stop();
    }

    /// Position traces of the loaded recordings, in load order.
    pub fn loaded_traces(&self) -> Vec<RecordTrace> {
        self.replayer.recordings().map(RecordTrace::from_recording).collect()
    }

    // ------------------------------------------------------------------------
    // Scenes
    // ------------------------------------------------------------------------

    /// Leaves the active scene for `scene`.
    ///
    /// A recording in progress logs the scene load and stops; the host calls
    /// [`EchoSession::on_scene_loaded`] once the new scene is ready.
    pub fn change_scene<H: SceneHost + ?Sized>(&mut self, host: &mut H, scene: &str) -> Result<()> {
        self.recorder.log_scene_load(scene)?;
        self.recorder.on_scene_unloaded()?;
        info!("Loading scene {}", scene);
        host.load_scene(scene)?;
        Ok(())
    }

    /// The host finished loading a scene (requested by either engine).
    pub fn on_scene_loaded<H: SceneHost + ?Sized>(&mut self, host: &H) -> Result<()> {
        self.recorder.on_scene_loaded(host)?;
        self.replayer.on_scene_ready(host);
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Project / session
    // ------------------------------------------------------------------------

    /// Switches to another session folder of the current project.
    pub fn new_session(&mut self, session: &str) -> Result<()> {
        let config = EchoConfig {
            session: session.to_string(),
            ..self.config.clone()
        };
        self.switch(config)
    }

    /// Switches to another project (and session).
    pub fn new_project(&mut self, project: &str, session: &str) -> Result<()> {
        let config = EchoConfig {
            project: project.to_string(),
            session: session.to_string(),
            ..self.config.clone()
        };
        self.switch(config)
    }

    fn switch(&mut self, config: EchoConfig) -> Result<()> {
        config.validate()?;
        self.replayer.stop();
        self.recorder.new_session()?;
        self.recorder.set_config(config.clone())?;
        self.replayer.set_config(config.clone());
        info!("Now using {}/{}", config.project, config.session);
        self.config = config;
        Ok(())
    }

    /// Saves the configuration, e.g. to reopen the same project next time.
    pub fn save_config(&self, path: &Path) -> Result<()> {
        self.config.save(path)
    }

    /// Stops both engines and closes every file.
    pub fn close(&mut self) -> Result<()> {
        self.replayer.stop();
        self.recorder.close_session()
    }
}
