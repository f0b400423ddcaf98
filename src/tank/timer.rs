use tokio::time::Instant;
use tracing::debug;

/// Identity of a step timer: which direction the level moves when it fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StepTimer {
    Drain,
    Refill,
}

/// Register/cancel timer set for the tank's step callbacks.
///
/// The wheel itself allows several entries so that misuse stays observable;
/// the simulator is responsible for keeping at most one armed.
#[derive(Debug, Default)]
pub struct TimerWheel {
    entries: Vec<(StepTimer, Instant)>,
}

impl TimerWheel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule(&mut self, timer: StepTimer, at: Instant) {
        debug!("Scheduling {:?} step", timer);
        self.entries.push((timer, at));
    }

    /// Removes every pending entry for `timer`; returns how many were dropped.
    pub fn cancel(&mut self, timer: StepTimer) -> usize {
        let before = self.entries.len();
        self.entries.retain(|(t, _)| *t != timer);
        let removed = before - self.entries.len();
        if removed > 0 {
            debug!("Cancelled {} pending {:?} step(s)", removed, timer);
        }
        removed
    }

    pub fn cancel_all(&mut self) {
        self.entries.clear();
    }

    #[cfg(test)]
    pub fn is_armed(&self, timer: StepTimer) -> bool {
        self.entries.iter().any(|(t, _)| *t == timer)
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.entries.iter().map(|(_, at)| *at).min()
    }

    /// Takes the earliest entry whose deadline is not after `now`.
    pub fn pop_due(&mut self, now: Instant) -> Option<(StepTimer, Instant)> {
        let index = self
            .entries
            .iter()
            .enumerate()
            .filter(|(_, (_, at))| *at <= now)
            .min_by_key(|(_, (_, at))| *at)
            .map(|(index, _)| index)?;
        Some(self.entries.swap_remove(index))
    }
}
