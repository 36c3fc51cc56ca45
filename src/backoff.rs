use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn set(&self, value: DateTime<Utc>) {
        *self.now.lock() = value;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffState {
    Active,
    Sleeping { wake_time: DateTime<Utc> },
}

/// Suspends outbound geocoding after the provider reports rate limiting.
///
/// There is a single wake time for every query. It is only checked when a
/// caller asks for permission; nothing runs in the background. The guard
/// wakes once `now > wake_time`, so a call made exactly at the wake time is
/// still refused.
pub struct BackoffGuard {
    clock: Arc<dyn Clock>,
    window: Duration,
    wake_time: Mutex<Option<DateTime<Utc>>>,
}

impl BackoffGuard {
    pub fn new(window: Duration) -> Self {
        Self::with_clock(window, Arc::new(SystemClock))
    }

    pub fn with_clock(window: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            window,
            wake_time: Mutex::new(None),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn state(&self) -> BackoffState {
        match *self.wake_time.lock() {
            Some(wake_time) => BackoffState::Sleeping { wake_time },
            None => BackoffState::Active,
        }
    }

    /// Returns `true` when a provider call may go out, waking the guard if
    /// its window has passed.
    pub fn try_acquire(&self) -> bool {
        let mut wake_time = self.wake_time.lock();
        let Some(wake_at) = *wake_time else {
            return true;
        };

        let now = self.clock.now();
        if now > wake_at {
            info!(target: "geocode", %now, "geocoding backoff window elapsed; waking up");
            *wake_time = None;
            true
        } else {
            debug!(target: "geocode", %wake_at, %now, "geocoding suspended until wake time");
            false
        }
    }

    /// Starts a new backoff window, replacing any window already running.
    pub fn trip(&self) -> DateTime<Utc> {
        let now = self.clock.now();
        let wake_at = now + self.window;
        let previous = self.wake_time.lock().replace(wake_at);
        warn!(
            target: "geocode",
            %now,
            %wake_at,
            previous = ?previous,
            "geocoding provider rate limited; suspending calls"
        );
        wake_at
    }
}
