//! Deadlines checked against a host-supplied clock.

use std::cell::Cell;
use std::rc::Rc;
use std::time::{Duration, Instant};

/// Source of monotonic time for every timer in the crate.
///
/// The host decides what "now" means: wall-clock time for a live process,
/// simulation time for a fixed-step game loop or a test.
pub trait Clock {
    fn now(&self) -> Instant;
}

/// Monotonic process time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Clock that only moves when told to.
///
/// Clones share the same time, so one handle can be given to the manager
/// while the host keeps another to advance it.
#[derive(Debug, Clone)]
pub struct ManualClock {
    origin: Instant,
    elapsed: Rc<Cell<Duration>>,
}

impl ManualClock {
    #[must_use]
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            elapsed: Rc::new(Cell::new(Duration::ZERO)),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.elapsed.set(self.elapsed.get() + by);
    }

    /// Time advanced since creation.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.elapsed.get()
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + self.elapsed.get()
    }
}

/// A deadline, or the absence of one.
///
/// `Timer::none()` never expires; resetting a running timer to none cancels
/// it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Timer {
    deadline: Option<Instant>,
}

impl Timer {
    /// Deadline `duration` after `now`. A deadline past what `Instant` can
    /// represent never expires.
    #[must_use]
    pub fn create(now: Instant, duration: Duration) -> Self {
        Self {
            deadline: now.checked_add(duration),
        }
    }

    #[must_use]
    pub const fn none() -> Self {
        Self { deadline: None }
    }

    #[must_use]
    pub fn is_expired(&self, now: Instant) -> bool {
        self.deadline.is_some_and(|deadline| now >= deadline)
    }

    #[must_use]
    pub const fn is_none(&self) -> bool {
        self.deadline.is_none()
    }

    pub fn reset(&mut self) {
        self.deadline = None;
    }

    /// Time left until expiry, zero once expired, `None` for no timer.
    #[must_use]
    pub fn remaining(&self, now: Instant) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(now))
    }
}
