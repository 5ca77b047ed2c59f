use std::time::Duration;

use tokio::time::Instant;

/// Fixed-interval throttle for scroll samples.
///
/// The first sample in an interval is admitted immediately; later ones are remembered so the
/// final resting position can be sampled once the interval has passed.
#[derive(Debug, Clone)]
pub struct ScrollThrottle {
    interval: Duration,
    last_admitted: Option<Instant>,
    trailing: bool,
}

impl ScrollThrottle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_admitted: None,
            trailing: false,
        }
    }

    pub fn set_interval(&mut self, interval: Duration) {
        self.interval = interval;
    }

    pub fn admit(&mut self, now: Instant) -> bool {
        let ready = self
            .last_admitted
            .is_none_or(|last| now.duration_since(last) >= self.interval);

        if ready {
            self.last_admitted = Some(now);
            self.trailing = false;
        } else {
            self.trailing = true;
        }
        ready
    }

    /// Admits the sample that was held back, once its interval elapsed.
    pub fn take_trailing(&mut self, now: Instant) -> bool {
        self.trailing && self.admit(now)
    }

    pub fn reset(&mut self) {
        self.last_admitted = None;
        self.trailing = false;
    }
}
