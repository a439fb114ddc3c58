//! Reconnection backoff policy
//!
//! Tracks attempt count and produces the exponentially increasing delay
//! inserted between successive reconnection attempts:
//! `base_delay * 2^(attempt - 1)`, up to `max_attempts`. With the defaults
//! (1000 ms base, 5 attempts) the sequence is 1s, 2s, 4s, 8s, 16s.

use std::time::Duration;

/// Exponential backoff state for automatic reconnection
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    base_delay: Duration,
    max_attempts: u32,
    attempts: u32,
}

impl ReconnectPolicy {
    pub fn new(base_delay: Duration, max_attempts: u32) -> Self {
        Self {
            base_delay,
            max_attempts,
            attempts: 0,
        }
    }

    /// Consume one attempt and return the delay before it.
    ///
    /// Returns None once `max_attempts` have been consumed; no further
    /// attempts should be scheduled until [`reset`](Self::reset).
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempts >= self.max_attempts {
            return None;
        }
        self.attempts += 1;
        Some(self.base_delay * 2u32.saturating_pow(self.attempts - 1))
    }

    /// Clear the attempt counter (called on successful open).
    pub fn reset(&mut self) {
        self.attempts = 0;
    }

    /// Attempts consumed since the last reset.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Configured attempt ceiling.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Whether the policy has exhausted its attempts.
    pub fn is_exhausted(&self) -> bool {
        self.attempts >= self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_delay_sequence() {
        let mut policy = ReconnectPolicy::new(Duration::from_millis(1000), 5);

        let delays: Vec<u64> = std::iter::from_fn(|| policy.next_delay())
            .map(|d| d.as_millis() as u64)
            .collect();

        assert_eq!(delays, vec![1000, 2000, 4000, 8000, 16000]);
    }

    #[test]
    fn test_sixth_failure_schedules_nothing() {
        let mut policy = ReconnectPolicy::new(Duration::from_millis(1000), 5);
        for _ in 0..5 {
            assert!(policy.next_delay().is_some());
        }

        assert!(policy.is_exhausted());
        assert_eq!(policy.next_delay(), None);
        assert_eq!(policy.next_delay(), None);
        assert_eq!(policy.attempts(), 5);
    }

    #[test]
    fn test_reset_restarts_the_sequence() {
        let mut policy = ReconnectPolicy::new(Duration::from_millis(100), 3);
        policy.next_delay();
        policy.next_delay();

        policy.reset();
        assert_eq!(policy.attempts(), 0);
        assert_eq!(policy.next_delay(), Some(Duration::from_millis(100)));
    }

    #[test]
    fn test_zero_max_attempts_never_schedules() {
        let mut policy = ReconnectPolicy::new(Duration::from_millis(100), 0);
        assert_eq!(policy.next_delay(), None);
        assert!(policy.is_exhausted());
    }
}
