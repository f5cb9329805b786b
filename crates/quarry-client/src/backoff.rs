//! Polling delays: the Fibonacci sequence capped at a maximum.

use std::time::Duration;

/// Default cap on a single polling delay, in seconds.
pub const DEFAULT_MAX_BACKOFF_SECS: u64 = 60;

/// Describes a delay sequence. Each wait loop starts a fresh [`Backoff`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    max_secs: u64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_BACKOFF_SECS)
    }
}

impl BackoffPolicy {
    /// Policy capping delays at `max_secs` (at least one second).
    pub fn new(max_secs: u64) -> Self {
        Self {
            max_secs: max_secs.max(1),
        }
    }

    pub fn max_secs(&self) -> u64 {
        self.max_secs
    }

    /// Starts a new delay sequence.
    pub fn start(&self) -> Backoff {
        Backoff {
            current: 1,
            next: 1,
            max: self.max_secs,
        }
    }
}

/// Infinite, non-decreasing sequence of delays in seconds:
/// 1, 1, 2, 3, 5, 8, ... up to the cap, then the cap forever.
#[derive(Debug, Clone)]
pub struct Backoff {
    current: u64,
    next: u64,
    max: u64,
}

impl Backoff {
    /// Returns the next delay.
    pub fn next_delay(&mut self) -> Duration {
        Duration::from_secs(self.next_secs())
    }

    fn next_secs(&mut self) -> u64 {
        let value = self.current.min(self.max);
        if self.current < self.max {
            let following = self.current.saturating_add(self.next);
            self.current = self.next;
            self.next = following;
        }
        value
    }
}

impl Iterator for Backoff {
    type Item = u64;

    fn next(&mut self) -> Option<u64> {
        Some(self.next_secs())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_sequence() {
        let delays: Vec<u64> = BackoffPolicy::default().start().take(13).collect();
        assert_eq!(delays, vec![1, 1, 2, 3, 5, 8, 13, 21, 34, 55, 60, 60, 60]);
    }

    #[test]
    fn small_cap() {
        let delays: Vec<u64> = BackoffPolicy::new(4).start().take(7).collect();
        assert_eq!(delays, vec![1, 1, 2, 3, 4, 4, 4]);
    }

    #[test]
    fn zero_cap_is_one_second() {
        let delays: Vec<u64> = BackoffPolicy::new(0).start().take(3).collect();
        assert_eq!(delays, vec![1, 1, 1]);
    }

    #[test]
    fn restart_begins_from_one() {
        let policy = BackoffPolicy::new(10);
        let mut first = policy.start();
        first.by_ref().take(5).for_each(drop);
        assert_eq!(policy.start().next_delay(), Duration::from_secs(1));
        assert_eq!(first.next_delay(), Duration::from_secs(8));
    }

    #[test]
    fn huge_cap_does_not_overflow() {
        let delays: Vec<u64> = BackoffPolicy::new(u64::MAX).start().take(200).collect();
        assert!(delays.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(delays[199], u64::MAX);
    }
}
