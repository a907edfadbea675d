//! Simulated clock for the tick coordinator.
//!
//! The clock is owned exclusively by the coordinator. It counts emitted
//! ticks and holds the simulated timestamp, which moves forward by a fixed
//! step exactly once per emitted tick.
//!
//! All arithmetic is checked: the tick counter and the timestamp refuse to
//! overflow instead of wrapping.

use chrono::{DateTime, TimeDelta, Utc};
use daws_store::ClockCheckpoint;

/// Errors that can occur during clock operations.
#[derive(Debug, thiserror::Error)]
pub enum ClockError {
    /// Tick counter would overflow.
    #[error("tick counter overflow: cannot advance beyond u64::MAX")]
    TickOverflow,

    /// Simulated time would leave the representable range.
    #[error("simulated time overflow after {0}")]
    TimeOverflow(DateTime<Utc>),

    /// Invalid clock configuration (e.g. a zero step).
    #[error("invalid clock configuration: {reason}")]
    InvalidConfig {
        /// Explanation of what is wrong with the configuration.
        reason: String,
    },
}

/// The simulated clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimClock {
    /// Number of ticks emitted so far. The next tick is `ticks_emitted + 1`.
    ticks_emitted: u64,

    /// Simulated time at the start of the next tick.
    sim_time: DateTime<Utc>,

    /// Simulated time that passes per tick.
    step: TimeDelta,
}

impl SimClock {
    /// Create a clock that has emitted nothing yet.
    ///
    /// # Errors
    ///
    /// Returns [`ClockError::InvalidConfig`] if `step` is not positive.
    pub fn new(start: DateTime<Utc>, step: TimeDelta) -> Result<Self, ClockError> {
        Self::from_parts(0, start, step)
    }

    /// Create a clock with a step of `step_seconds` simulated seconds.
    ///
    /// # Errors
    ///
    /// Returns [`ClockError::InvalidConfig`] if the step is zero or too
    /// large.
    pub fn with_step_seconds(start: DateTime<Utc>, step_seconds: u64) -> Result<Self, ClockError> {
        let step = i64::try_from(step_seconds)
            .ok()
            .and_then(TimeDelta::try_seconds)
            .ok_or_else(|| ClockError::InvalidConfig {
                reason: format!("step of {step_seconds}s is out of range"),
            })?;
        Self::new(start, step)
    }

    /// Restore a clock from explicit parts.
    ///
    /// # Errors
    ///
    /// Returns [`ClockError::InvalidConfig`] if `step` is not positive.
    pub fn from_parts(
        ticks_emitted: u64,
        sim_time: DateTime<Utc>,
        step: TimeDelta,
    ) -> Result<Self, ClockError> {
        if step <= TimeDelta::zero() {
            return Err(ClockError::InvalidConfig {
                reason: "step must be positive".to_owned(),
            });
        }
        Ok(Self {
            ticks_emitted,
            sim_time,
            step,
        })
    }

    /// Restore a clock from a persisted checkpoint.
    ///
    /// # Errors
    ///
    /// Returns [`ClockError::InvalidConfig`] if `step` is not positive.
    pub fn from_checkpoint(
        checkpoint: &ClockCheckpoint,
        step: TimeDelta,
    ) -> Result<Self, ClockError> {
        Self::from_parts(checkpoint.ticks_emitted, checkpoint.sim_time, step)
    }

    /// Index of the tick that would be emitted next.
    ///
    /// # Errors
    ///
    /// Returns [`ClockError::TickOverflow`] once `u64::MAX` ticks were
    /// emitted.
    pub fn next_tick(&self) -> Result<u64, ClockError> {
        self.ticks_emitted
            .checked_add(1)
            .ok_or(ClockError::TickOverflow)
    }

    /// Record one emitted tick and move simulated time forward by one step.
    /// Returns the index of the tick just recorded.
    ///
    /// # Errors
    ///
    /// Returns [`ClockError::TickOverflow`] or [`ClockError::TimeOverflow`];
    /// the clock is unchanged on error.
    pub fn advance(&mut self) -> Result<u64, ClockError> {
        let tick = self.next_tick()?;
        let sim_time = self
            .sim_time
            .checked_add_signed(self.step)
            .ok_or(ClockError::TimeOverflow(self.sim_time))?;
        self.ticks_emitted = tick;
        self.sim_time = sim_time;
        Ok(tick)
    }

    /// Number of ticks emitted so far.
    pub const fn ticks_emitted(&self) -> u64 {
        self.ticks_emitted
    }

    /// Simulated time at the start of the next tick.
    pub const fn sim_time(&self) -> DateTime<Utc> {
        self.sim_time
    }

    /// Simulated time per tick.
    pub const fn step(&self) -> TimeDelta {
        self.step
    }

    /// Snapshot the clock for persistence.
    pub const fn checkpoint(&self, saved_at: DateTime<Utc>) -> ClockCheckpoint {
        ClockCheckpoint {
            ticks_emitted: self.ticks_emitted,
            sim_time: self.sim_time,
            saved_at,
        }
    }
}
