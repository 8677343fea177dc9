//! Reconnection backoff.

use std::time::Duration;

use rand::Rng;

/// Upper bound (exclusive) of the random jitter, in milliseconds.
pub const JITTER_MAX_MS: u64 = 1000;

/// Double `current`, capped at `ceiling`.
pub fn next_backoff(current: Duration, ceiling: Duration) -> Duration {
    current.saturating_mul(2).min(ceiling)
}

/// Uniform random jitter in `[0, 1000)` milliseconds.
pub fn jitter() -> Duration {
    Duration::from_millis(rand::thread_rng().gen_range(0..JITTER_MAX_MS))
}

/// Exponential backoff state for the reconnect loop.
///
/// Only the base delay is persisted. Jitter is drawn fresh for every sleep
/// and is not capped by the ceiling.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    /// Create a new backoff starting at `initial` and capped at `max`.
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            current: initial,
        }
    }

    /// The current base delay.
    pub fn current(&self) -> Duration {
        self.current
    }

    /// The delay to sleep before the next attempt.
    pub fn delay(&self, with_jitter: bool) -> Duration {
        if with_jitter {
            self.current.saturating_add(jitter())
        } else {
            self.current
        }
    }

    /// Record a failed attempt.
    pub fn advance(&mut self) {
        self.current = next_backoff(self.current, self.max);
    }

    /// Record a successful connection.
    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(60))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_backoff_doubles() {
        let max = Duration::from_secs(60);
        assert_eq!(next_backoff(Duration::from_secs(1), max), Duration::from_secs(2));
        assert_eq!(next_backoff(Duration::from_secs(16), max), Duration::from_secs(32));
    }

    #[test]
    fn test_next_backoff_capped() {
        let max = Duration::from_secs(60);
        assert_eq!(next_backoff(Duration::from_secs(32), max), max);
        assert_eq!(next_backoff(max, max), max);
        assert_eq!(next_backoff(Duration::MAX, max), max);
    }

    #[test]
    fn test_failure_sequence() {
        let mut backoff = Backoff::default();
        let mut applied = Vec::new();
        for _ in 0..9 {
            applied.push(backoff.delay(false).as_secs());
            backoff.advance();
        }
        assert_eq!(applied, vec![1, 2, 4, 8, 16, 32, 60, 60, 60]);
    }

    #[test]
    fn test_reset_after_success() {
        let mut backoff = Backoff::default();
        backoff.advance();
        backoff.advance();
        assert_eq!(backoff.current(), Duration::from_secs(4));

        backoff.reset();
        assert_eq!(backoff.delay(false), Duration::from_secs(1));
    }

    #[test]
    fn test_jitter_bounds() {
        for _ in 0..1000 {
            assert!(jitter() < Duration::from_millis(JITTER_MAX_MS));
        }
    }

    #[test]
    fn test_jitter_added_on_top_of_base() {
        let mut backoff = Backoff::default();
        for _ in 0..10 {
            backoff.advance();
        }
        for _ in 0..100 {
            let delay = backoff.delay(true);
            assert!(delay >= Duration::from_secs(60));
            assert!(delay < Duration::from_secs(61));
        }
        // Jitter is never persisted.
        assert_eq!(backoff.current(), Duration::from_secs(60));
    }

    #[test]
    fn test_jitter_saturates_at_max_duration() {
        let backoff = Backoff::new(Duration::MAX, Duration::MAX);
        assert_eq!(backoff.delay(true), Duration::MAX);
    }
}
