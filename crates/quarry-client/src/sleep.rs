//! Interruptible sleeping between status polls.
//!
//! The backoff sleep is the only point where waiting for an execution can be
//! interrupted. [`CancellationToken`] delivers interruptions from another
//! thread (a Ctrl-C handler, a UI); [`ScriptedSleep`] replays them in tests.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

/// A sleep was cut short by an interruption signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("sleep interrupted")]
pub struct Interrupted;

/// Blocks the calling thread between polls.
pub trait Sleep: Send + Sync + fmt::Debug {
    /// Sleeps for `duration` unless interrupted first.
    fn sleep(&self, duration: Duration) -> Result<(), Interrupted>;
}

// ---------------------------------------------------------------------------
// ThreadSleep
// ---------------------------------------------------------------------------

/// Plain, uninterruptible thread sleep.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadSleep;

impl Sleep for ThreadSleep {
    fn sleep(&self, duration: Duration) -> Result<(), Interrupted> {
        thread::sleep(duration);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// CancellationToken
// ---------------------------------------------------------------------------

/// Sleep that can be interrupted from other threads.
///
/// Each [`CancellationToken::cancel`] call interrupts exactly one sleep:
/// the one in progress, or the next one if nobody is sleeping. Clones share
/// the same signal.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    inner: Arc<TokenState>,
}

#[derive(Debug, Default)]
struct TokenState {
    pending: Mutex<usize>,
    signal: Condvar,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delivers one interruption.
    pub fn cancel(&self) {
        *self.lock() += 1;
        self.inner.signal.notify_all();
    }

    /// Number of interruptions not yet consumed by a sleep.
    pub fn pending(&self) -> usize {
        *self.lock()
    }

    fn lock(&self) -> MutexGuard<'_, usize> {
        self.inner
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl Sleep for CancellationToken {
    fn sleep(&self, duration: Duration) -> Result<(), Interrupted> {
        let guard = self.lock();
        let (mut pending, _) = self
            .inner
            .signal
            .wait_timeout_while(guard, duration, |pending| *pending == 0)
            .unwrap_or_else(PoisonError::into_inner);
        if *pending > 0 {
            *pending -= 1;
            return Err(Interrupted);
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// ScriptedSleep
// ---------------------------------------------------------------------------

/// Test sleep that returns immediately, records every requested delay, and
/// interrupts the calls whose zero-based index was scheduled.
#[derive(Debug, Default)]
pub struct ScriptedSleep {
    state: Mutex<ScriptState>,
}

#[derive(Debug, Default)]
struct ScriptState {
    delays: Vec<Duration>,
    interrupt_at: BTreeSet<usize>,
}

impl ScriptedSleep {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep interrupting the given calls.
    pub fn interrupting(calls: impl IntoIterator<Item = usize>) -> Self {
        let sleep = Self::new();
        sleep.lock().interrupt_at.extend(calls);
        sleep
    }

    /// Delays requested so far, interrupted calls included.
    pub fn delays(&self) -> Vec<Duration> {
        self.lock().delays.clone()
    }

    /// Delays requested so far, in whole seconds.
    pub fn delay_secs(&self) -> Vec<u64> {
        self.lock().delays.iter().map(Duration::as_secs).collect()
    }

    fn lock(&self) -> MutexGuard<'_, ScriptState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Sleep for ScriptedSleep {
    fn sleep(&self, duration: Duration) -> Result<(), Interrupted> {
        let mut state = self.lock();
        let call = state.delays.len();
        state.delays.push(duration);
        if state.interrupt_at.contains(&call) {
            return Err(Interrupted);
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn token_without_signal_sleeps_full_duration() {
        let token = CancellationToken::new();
        let start = Instant::now();
        assert_eq!(token.sleep(Duration::from_millis(20)), Ok(()));
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn pending_signal_interrupts_next_sleep_once() {
        let token = CancellationToken::new();
        token.cancel();
        assert_eq!(token.pending(), 1);
        assert_eq!(token.sleep(Duration::from_secs(60)), Err(Interrupted));
        assert_eq!(token.pending(), 0);
        assert_eq!(token.sleep(Duration::from_millis(1)), Ok(()));
    }

    #[test]
    fn signal_from_other_thread_wakes_sleeper() {
        let token = CancellationToken::new();
        let remote = token.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            remote.cancel();
        });
        let start = Instant::now();
        assert_eq!(token.sleep(Duration::from_secs(30)), Err(Interrupted));
        assert!(start.elapsed() < Duration::from_secs(30));
        handle.join().unwrap();
    }

    #[test]
    fn scripted_sleep_records_and_interrupts() {
        let sleep = ScriptedSleep::interrupting([1]);
        assert_eq!(sleep.sleep(Duration::from_secs(1)), Ok(()));
        assert_eq!(sleep.sleep(Duration::from_secs(2)), Err(Interrupted));
        assert_eq!(sleep.sleep(Duration::from_secs(3)), Ok(()));
        assert_eq!(sleep.delay_secs(), vec![1, 2, 3]);
    }
}
