use std::cell::Cell;
use std::time::Duration;
use tokio::time::Instant;

// Deadlines past this horizon are parked here instead of overflowing `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// Monotonic loop clock. Loop time is cached and only moves on `update`.
pub(crate) struct Clock {
    origin: Instant,
    now: Cell<u64>,
}

impl Clock {
    pub(crate) fn new() -> Self {
        Self {
            origin: Instant::now(),
            now: Cell::new(0),
        }
    }

    /// Cached loop time in milliseconds since the clock was created.
    pub(crate) fn now(&self) -> u64 {
        self.now.get()
    }

    pub(crate) fn update(&self) -> u64 {
        let elapsed = u64::try_from(self.origin.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.now.set(elapsed);
        elapsed
    }

    /// Instant at which loop time reaches `millis`.
    pub(crate) fn instant_at(&self, millis: u64) -> Instant {
        let offset = Duration::from_millis(millis).min(FAR_FUTURE);
        self.origin
            .checked_add(offset)
            .unwrap_or_else(|| self.origin + FAR_FUTURE)
    }
}
