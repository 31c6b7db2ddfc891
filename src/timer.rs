//! Alert rate limiting.
//!
//! `PriceTimer` only answers "may another alert go out yet". It never wakes
//! anyone up and is never rearmed by a deviation check; the alert loop rearms
//! it after each alert it actually emits.

use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerState {
    /// Never armed.
    Idle,
    /// Counting down toward the deadline.
    Armed,
    /// Deadline passed and not yet rearmed.
    Fired,
}

#[derive(Debug, Default)]
pub struct PriceTimer {
    deadline: Option<Instant>,
}

impl PriceTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a fresh window from now, whatever the current state.
    pub fn rearm(&mut self, window: Duration) {
        self.deadline = Some(Instant::now() + window);
    }

    pub fn state(&self) -> TimerState {
        match self.deadline {
            None => TimerState::Idle,
            Some(deadline) if Instant::now() >= deadline => TimerState::Fired,
            Some(_) => TimerState::Armed,
        }
    }

    pub fn fired(&self) -> bool {
        self.state() == TimerState::Fired
    }

    /// Time left before the window elapses; zero once fired.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }
}
