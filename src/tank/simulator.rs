//! Timer-driven oxygen tank state machine.
//!
//! # States
//!
//! ```text
//!                fill ON                       level == 1
//!   Idle ───────────────────► Draining ───────────────────► Idle
//!    ▲  ▲                      │    ▲
//!    │  │ alarm ON             │    │ fill ON / alarm OFF (fill still ON)
//!    │  └──────────────────────┤    │
//!    │                fill OFF ▼    │
//!    │                       Settling ──(settling delay)──► Refilling
//!    │                                                          │
//!    └──────────────────────── level == 100 / alarm ON ─────────┘
//! ```
//!
//! Every transition that starts a directional phase cancels the pending step
//! timers first, so at most one step timer is ever armed. `Settling` is the
//! entry phase of refilling: its timer is the `Refill` timer, only delayed.

use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::publisher::{ChangePublisher, PublishReport};
use super::timer::{StepTimer, TimerWheel};
use super::{FillDirection, OxygenLevel, TankSettings};
use crate::mqtt::dispatcher::Command;
use crate::mqtt::transport::Transport;
use crate::mqtt::TopicSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TankState {
    Idle,
    Draining,
    Settling,
    Refilling,
}

pub struct Tank {
    settings: TankSettings,
    level: OxygenLevel,
    fill_request: bool,
    alarm_active: bool,
    state: TankState,
    timers: TimerWheel,
    publisher: ChangePublisher,
}

impl Tank {
    pub fn new(settings: TankSettings, topics: &TopicSet) -> Self {
        let level = OxygenLevel::new(settings.initial_level).unwrap_or_else(|| {
            warn!(
                "Initial level {} out of range, starting full",
                settings.initial_level
            );
            OxygenLevel::full()
        });
        info!("Tank created at {}% with settings: {:?}", level, settings);

        Self {
            settings,
            level,
            fill_request: false,
            alarm_active: false,
            state: TankState::Idle,
            timers: TimerWheel::new(),
            publisher: ChangePublisher::new(&topics.oxygen_level, &topics.fill_state),
        }
    }

    pub fn level(&self) -> OxygenLevel {
        self.level
    }

    pub fn state(&self) -> TankState {
        self.state
    }

    pub fn fill_request(&self) -> bool {
        self.fill_request
    }

    pub fn alarm_active(&self) -> bool {
        self.alarm_active
    }

    #[cfg(test)]
    pub fn timers(&self) -> &TimerWheel {
        &self.timers
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.timers.next_deadline()
    }

    /// Publishes the full retained state: current level and last direction.
    pub fn publish_state<T: Transport>(&mut self, transport: &mut T) -> PublishReport {
        self.publisher.republish(self.level, transport)
    }

    /// Records a decoded command and runs the matching transition.
    pub fn apply<T: Transport>(&mut self, command: Command, now: Instant, transport: &mut T) {
        match command {
            Command::FillRequest(requested) => {
                self.fill_request = requested;
                self.on_fill_request_changed(requested, now, transport);
            }
            Command::Alarm(active) => {
                self.alarm_active = active;
                self.on_alarm_changed(active, now, transport);
            }
        }
    }

    pub fn on_fill_request_changed<T: Transport>(
        &mut self,
        requested: bool,
        now: Instant,
        transport: &mut T,
    ) {
        if self.alarm_active {
            info!(
                "Alarm active, holding fill request {} until it clears",
                if requested { "ON" } else { "OFF" }
            );
            return;
        }

        self.timers.cancel(StepTimer::Refill);
        self.timers.cancel(StepTimer::Drain);

        if requested {
            self.enter(TankState::Draining);
            self.step(StepTimer::Drain, now, transport);
        } else {
            self.publisher.force_direction(FillDirection::Stable, transport);
            self.timers
                .schedule(StepTimer::Refill, now + self.settings.settling_delay());
            self.enter(TankState::Settling);
        }
    }

    pub fn on_alarm_changed<T: Transport>(&mut self, active: bool, now: Instant, transport: &mut T) {
        if active {
            self.timers.cancel_all();
            self.enter(TankState::Idle);
            self.publisher.force_direction(FillDirection::Stable, transport);
        } else if self.fill_request {
            self.timers.cancel(StepTimer::Drain);
            self.timers.cancel(StepTimer::Refill);
            info!("Alarm cleared, resuming drain from {}%", self.level);
            self.enter(TankState::Draining);
            self.step(StepTimer::Drain, now, transport);
        } else {
            debug!("Alarm cleared with no fill request, staying {:?}", self.state);
        }
    }

    /// Fires every step timer due at or before `now`, each at its own deadline.
    ///
    /// Returns the number of steps taken.
    pub fn advance_to<T: Transport>(&mut self, now: Instant, transport: &mut T) -> usize {
        let mut fired = 0;
        while let Some((timer, at)) = self.timers.pop_due(now) {
            self.step(timer, at, transport);
            fired += 1;
        }
        fired
    }

    fn step<T: Transport>(&mut self, timer: StepTimer, at: Instant, transport: &mut T) {
        if timer == StepTimer::Refill && self.state == TankState::Settling {
            self.enter(TankState::Refilling);
        }

        let moved = match timer {
            StepTimer::Drain => self.level.decrement(),
            StepTimer::Refill => self.level.increment(),
        };
        self.publisher.publish_change(self.level, transport);

        if moved {
            self.timers
                .schedule(timer, at + self.settings.step_interval());
        } else {
            info!("Level settled at {}%", self.level);
            self.enter(TankState::Idle);
        }
    }

    fn enter(&mut self, next: TankState) {
        if self.state != next {
            debug!("Tank {:?} -> {:?} at {}%", self.state, next, self.level);
            self.state = next;
        }
    }
}
