use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ClockError;

/// Which time source the clock reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClockMode {
    /// Wall-clock time
    Real,
    /// Driver-advanced simulated time
    Simulated,
}

impl std::fmt::Display for ClockMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClockMode::Real => write!(f, "real"),
            ClockMode::Simulated => write!(f, "simulated"),
        }
    }
}

impl std::str::FromStr for ClockMode {
    type Err = ClockError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "real" => Ok(ClockMode::Real),
            "simulated" | "sim" => Ok(ClockMode::Simulated),
            other => Err(ClockError::InvalidMode(other.to_string())),
        }
    }
}

/// Complete, persistable clock state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClockState {
    pub mode: ClockMode,
    /// Current simulated instant (kept even while in `Real` mode)
    pub simulated_time: DateTime<Utc>,
    /// Where `reset` rewinds to
    pub sim_start: DateTime<Utc>,
    /// Simulated seconds per wall-clock second
    pub speed: f64,
    pub running: bool,
}

impl ClockState {
    /// A paused clock at `start` running at 1x.
    pub fn new(mode: ClockMode, start: DateTime<Utc>) -> Self {
        Self {
            mode,
            simulated_time: start,
            sim_start: start,
            speed: 1.0,
            running: false,
        }
    }

    /// Repair values that cannot have come from a valid clock (e.g. a hand-edited row).
    fn sanitized(mut self) -> Self {
        if !self.speed.is_finite() || self.speed <= 0.0 {
            tracing::warn!("Restored clock had invalid speed {}, using 1.0", self.speed);
            self.speed = 1.0;
        }
        self
    }
}

/// Shared handle to the process-wide clock.
///
/// Cloning is cheap; every clone observes the same state. All access goes
/// through a short-lived lock that is never held across an `.await`.
#[derive(Debug, Clone)]
pub struct Clock {
    inner: Arc<RwLock<ClockState>>,
}

impl Clock {
    pub fn from_state(state: ClockState) -> Self {
        Self {
            inner: Arc::new(RwLock::new(state.sanitized())),
        }
    }

    /// Paused simulated clock starting at `start`.
    pub fn simulated(start: DateTime<Utc>) -> Self {
        Self::from_state(ClockState::new(ClockMode::Simulated, start))
    }

    /// Wall-clock mode; simulated time starts at the current instant.
    pub fn real() -> Self {
        Self::from_state(ClockState::new(ClockMode::Real, Utc::now()))
    }

    fn read(&self) -> RwLockReadGuard<'_, ClockState> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, ClockState> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current time according to the active mode.
    pub fn now(&self) -> DateTime<Utc> {
        self.current_time().0
    }

    pub fn current_time(&self) -> (DateTime<Utc>, ClockMode) {
        let state = self.read();
        match state.mode {
            ClockMode::Real => (Utc::now(), ClockMode::Real),
            ClockMode::Simulated => (state.simulated_time, ClockMode::Simulated),
        }
    }

    pub fn mode(&self) -> ClockMode {
        self.read().mode
    }

    pub fn speed(&self) -> f64 {
        self.read().speed
    }

    pub fn is_running(&self) -> bool {
        self.read().running
    }

    pub fn sim_start(&self) -> DateTime<Utc> {
        self.read().sim_start
    }

    pub fn simulated_time(&self) -> DateTime<Utc> {
        self.read().simulated_time
    }

    pub fn snapshot(&self) -> ClockState {
        self.read().clone()
    }

    /// Switch time source. Returns `true` if the mode changed.
    ///
    /// Simulated time is preserved across switches.
    pub fn set_mode(&self, mode: ClockMode) -> bool {
        let mut state = self.write();
        if state.mode == mode {
            return false;
        }
        state.mode = mode;
        true
    }

    /// Returns `true` if the speed changed.
    pub fn set_speed(&self, speed: f64) -> Result<bool, ClockError> {
        if !speed.is_finite() || speed <= 0.0 {
            return Err(ClockError::InvalidSpeed(speed));
        }
        let mut state = self.write();
        if state.speed == speed {
            return Ok(false);
        }
        state.speed = speed;
        Ok(true)
    }

    /// Jump simulated time to `time`.
    ///
    /// Rejected for pre-epoch instants, and for backward jumps while running.
    pub fn set_time(&self, time: DateTime<Utc>) -> Result<(), ClockError> {
        if time.timestamp() < 0 {
            return Err(ClockError::InvalidTime(format!(
                "{} is before the Unix epoch",
                time.to_rfc3339()
            )));
        }
        let mut state = self.write();
        if state.running && time < state.simulated_time {
            return Err(ClockError::InvalidTime(format!(
                "cannot move simulated time backwards while running ({} < {})",
                time.to_rfc3339(),
                state.simulated_time.to_rfc3339()
            )));
        }
        state.simulated_time = time;
        Ok(())
    }

    /// Rebase the simulation: both `sim_start` and simulated time move to `start`.
    pub fn configure_start(&self, start: DateTime<Utc>) -> Result<(), ClockError> {
        if start.timestamp() < 0 {
            return Err(ClockError::InvalidTime(format!(
                "{} is before the Unix epoch",
                start.to_rfc3339()
            )));
        }
        let mut state = self.write();
        if state.running {
            return Err(ClockError::Running);
        }
        state.sim_start = start;
        state.simulated_time = start;
        Ok(())
    }

    /// Returns `true` if the running flag changed.
    pub(crate) fn set_running(&self, running: bool) -> bool {
        let mut state = self.write();
        if state.running == running {
            return false;
        }
        state.running = running;
        true
    }

    /// Stop and rewind to `sim_start`. Returns `true` if anything changed.
    pub(crate) fn rewind(&self) -> bool {
        let mut state = self.write();
        let changed = state.running || state.simulated_time != state.sim_start;
        state.running = false;
        state.simulated_time = state.sim_start;
        changed
    }

    /// Advance simulated time by `wall × speed` if running in simulated mode.
    ///
    /// Returns the new simulated time when an advance happened.
    pub(crate) fn advance(&self, wall: Duration) -> Option<DateTime<Utc>> {
        let mut state = self.write();
        if !state.running || state.mode != ClockMode::Simulated {
            return None;
        }
        let nanos = (wall.as_nanos() as f64 * state.speed).round();
        if !nanos.is_finite() || nanos <= 0.0 || nanos > i64::MAX as f64 {
            return None;
        }
        let delta = chrono::Duration::nanoseconds(nanos as i64);
        let next = state.simulated_time.checked_add_signed(delta)?;
        state.simulated_time = next;
        Some(next)
    }
}
