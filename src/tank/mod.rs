//! # Tank Simulation
//!
//! The simulated oxygen tank: a level in percent that drains while a consumer
//! requests oxygen, refills after the request stops and freezes while an alarm
//! is raised.
//!
//! ```text
//! tank/
//! ├── publisher.rs  - change-only retained publications
//! ├── simulator.rs  - Idle / Draining / Settling / Refilling state machine
//! └── timer.rs      - step timers keyed by direction
//! ```
//!
//! Nothing in here awaits. The simulator is driven by the session loop with
//! explicit instants, which is also how the tests run it on virtual time.

pub mod publisher;
pub mod simulator;
pub mod timer;

pub use publisher::{ChangePublisher, PublishReport};
pub use simulator::{Tank, TankState};
pub use timer::{StepTimer, TimerWheel};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Oxygen level in percent, always within `[MIN, MAX]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OxygenLevel(u8);

impl OxygenLevel {
    pub const MIN: u8 = 1;
    pub const MAX: u8 = 100;

    pub fn new(value: u8) -> Option<Self> {
        (Self::MIN..=Self::MAX).contains(&value).then_some(Self(value))
    }

    pub fn full() -> Self {
        Self(Self::MAX)
    }

    pub fn value(self) -> u8 {
        self.0
    }

    /// One unit down; `false` once the floor is reached.
    pub fn decrement(&mut self) -> bool {
        if self.0 > Self::MIN {
            self.0 -= 1;
            true
        } else {
            false
        }
    }

    /// One unit up; `false` once the ceiling is reached.
    pub fn increment(&mut self) -> bool {
        if self.0 < Self::MAX {
            self.0 += 1;
            true
        } else {
            false
        }
    }
}

impl fmt::Display for OxygenLevel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Published fill state, derived from the level delta.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FillDirection {
    Increase,
    Decrease,
    Stable,
}

impl FillDirection {
    pub fn between(previous: OxygenLevel, current: OxygenLevel) -> Self {
        match current.cmp(&previous) {
            std::cmp::Ordering::Greater => FillDirection::Increase,
            std::cmp::Ordering::Less => FillDirection::Decrease,
            std::cmp::Ordering::Equal => FillDirection::Stable,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FillDirection::Increase => "INCREASE",
            FillDirection::Decrease => "DECREASE",
            FillDirection::Stable => "STABLE",
        }
    }
}

impl fmt::Display for FillDirection {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TankSettings {
    pub initial_level: u8,
    /// Delay between two level steps.
    pub step_interval_ms: u64,
    /// Pause between a fill request going off and the first refill step.
    pub settling_delay_ms: u64,
}

impl Default for TankSettings {
    fn default() -> Self {
        Self {
            initial_level: OxygenLevel::MAX,
            step_interval_ms: 10,
            settling_delay_ms: 5_000,
        }
    }
}

impl TankSettings {
    pub fn step_interval(&self) -> Duration {
        Duration::from_millis(self.step_interval_ms)
    }

    pub fn settling_delay(&self) -> Duration {
        Duration::from_millis(self.settling_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_rejects_out_of_range_values() {
        assert!(OxygenLevel::new(0).is_none());
        assert!(OxygenLevel::new(101).is_none());
        assert_eq!(OxygenLevel::new(1).map(OxygenLevel::value), Some(1));
    }

    #[test]
    fn level_stops_at_both_bounds() {
        let mut low = OxygenLevel::new(2).unwrap();
        assert!(low.decrement());
        assert!(!low.decrement());
        assert_eq!(low.value(), 1);

        let mut high = OxygenLevel::new(99).unwrap();
        assert!(high.increment());
        assert!(!high.increment());
        assert_eq!(high, OxygenLevel::full());
    }

    #[test]
    fn direction_follows_the_level_delta() {
        let fifty = OxygenLevel::new(50).unwrap();
        let fortynine = OxygenLevel::new(49).unwrap();
        assert_eq!(FillDirection::between(fifty, fortynine), FillDirection::Decrease);
        assert_eq!(FillDirection::between(fortynine, fifty), FillDirection::Increase);
        assert_eq!(FillDirection::between(fifty, fifty).as_str(), "STABLE");
    }
}
