//! Rate limiting for best-effort progress notifications.

use std::time::Duration;

use tokio::time::Instant;

/// Lets a notification through at most once per interval.
#[derive(Debug, Clone)]
pub struct ProgressThrottle {
    interval: Duration,
    last: Option<Instant>,
}

impl ProgressThrottle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: None,
        }
    }

    /// Whether a notification may go out at `now`. Records it if so.
    pub fn ready(&mut self, now: Instant) -> bool {
        match self.last {
            Some(last) if now.saturating_duration_since(last) < self.interval => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_first_is_immediate_then_spaced() {
        let mut throttle = ProgressThrottle::new(Duration::from_secs(10));
        let start = Instant::now();

        assert!(throttle.ready(start));
        assert!(!throttle.ready(start + Duration::from_secs(3)));
        assert!(!throttle.ready(start + Duration::from_secs(9)));
        assert!(throttle.ready(start + Duration::from_secs(10)));
        assert!(!throttle.ready(start + Duration::from_secs(15)));
    }
}
