//! Virtual clock for the simulated host.

use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use xrecho_env::EchoContext;

/// 2024-01-01 00:00:00 UTC, where a default clock starts.
const DEFAULT_START_UNIX_SECS: u64 = 1_704_067_200;

/// Clock that only moves when the harness says so.
///
/// File stamps, tick columns and metadata durations all derive from it, so
/// two runs with the same seed write byte-identical recordings. Clones share
/// the same elapsed time.
#[derive(Clone)]
pub struct SimContext {
    elapsed: Arc<Mutex<Duration>>,

    /// Wall-clock reading at zero elapsed time
    start: SystemTime,
}

impl SimContext {
    pub fn new() -> Self {
        Self::starting_at(UNIX_EPOCH + Duration::from_secs(DEFAULT_START_UNIX_SECS))
    }

    /// Clock whose wall reading starts at `start`, e.g. the real time for
    /// recordings that must not collide with earlier runs.
    pub fn starting_at(start: SystemTime) -> Self {
        Self {
            elapsed: Arc::new(Mutex::new(Duration::ZERO)),
            start,
        }
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn advance(&self, by: Duration) {
        if let Ok(mut elapsed) = self.elapsed.lock() {
            *elapsed += by;
        }
    }

    /// Advances by one host frame of `dt` seconds; negative frames are ignored.
    pub fn advance_secs(&self, dt: f32) {
        if dt > 0.0 {
            self.advance(Duration::from_secs_f32(dt));
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed.lock().map(|e| *e).unwrap_or_default()
    }
}

impl Default for SimContext {
    fn default() -> Self {
        Self::new()
    }
}

impl EchoContext for SimContext {
    fn now(&self) -> Duration {
        self.elapsed()
    }

    fn system_time(&self) -> SystemTime {
        self.start + self.elapsed()
    }
}
