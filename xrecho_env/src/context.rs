//! Clock abstraction for XREcho engines.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Number of 100ns ticks in one second (the unit of the `ticksSince1970` columns).
pub const TICKS_PER_SECOND: i64 = 10_000_000;

/// The clocks an XREcho engine reads.
///
/// # Implementations
///
/// - **Production**: `SystemContext` - wraps `Instant` and `SystemTime::now()`
/// - **Simulation**: `SimContext` - a virtual clock advanced by the harness
///
/// Simulated time (the `timestamp` column) is never read from here: it is the
/// sum of the per-frame deltas handed to the engines by the host. This trait
/// only supplies the wall clock used for file names, metadata and the
/// `ticksSince1970` column.
pub trait EchoContext: Send + Sync + 'static {
    /// Returns the monotonic time since context creation.
    fn now(&self) -> Duration;

    /// Returns the wall-clock time.
    ///
    /// In simulation, this is derived from virtual clock + epoch offset.
    fn system_time(&self) -> SystemTime;

    /// Returns the wall clock as 100ns ticks since 1970-01-01 UTC.
    fn ticks_since_epoch(&self) -> i64 {
        match self.system_time().duration_since(UNIX_EPOCH) {
            Ok(elapsed) => (elapsed.as_nanos() / 100) as i64,
            Err(before) => -((before.duration().as_nanos() / 100) as i64),
        }
    }
}
