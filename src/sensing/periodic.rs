use std::time::{Duration, Instant};

/// A repeating deadline on the serialization loop.
///
/// The n-th deadline is always `origin + n / rate`, so late wake-ups never
/// accumulate drift. Missed deadlines are skipped rather than replayed in a
/// burst.
#[derive(Debug, Clone)]
pub struct PeriodicTimer {
    rate_hz: f64,
    origin: Instant,
    fired: u64,
}

impl PeriodicTimer {
    /// First deadline is `origin` itself.
    pub fn new(rate_hz: f64, origin: Instant) -> Self {
        Self {
            rate_hz,
            origin,
            fired: 0,
        }
    }

    /// `None` once the deadline is too far out to represent.
    pub fn next_due(&self) -> Option<Instant> {
        self.deadline(self.fired)
    }

    pub fn is_due(&self, now: Instant) -> bool {
        self.next_due().is_some_and(|due| due <= now)
    }

    /// Consume the current deadline if it has passed. Returns whether the
    /// task should run now.
    pub fn poll(&mut self, now: Instant) -> bool {
        if !self.is_due(now) {
            return false;
        }
        let elapsed = now.duration_since(self.origin).as_secs_f64();
        let mut next = ((elapsed * self.rate_hz).floor() as u64).max(self.fired + 1);
        while self.deadline(next).is_some_and(|due| due <= now) {
            next += 1;
        }
        self.fired = next;
        true
    }

    pub fn fired(&self) -> u64 {
        self.fired
    }

    fn deadline(&self, n: u64) -> Option<Instant> {
        let offset = Duration::try_from_secs_f64(n as f64 / self.rate_hz).ok()?;
        self.origin.checked_add(offset)
    }
}
