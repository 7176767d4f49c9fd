//! Time, sleeping and randomness providers
//!
//! The host never reads hardware clocks or entropy directly: every instance
//! is handed a [`Clock`], a [`Sleeper`] and a [`RandomSource`]. Production
//! embedders use [`SystemClock`], [`ThreadSleeper`] and [`OsRandom`]; tests
//! use [`ManualClock`] (which is both a clock and a sleeper, so waiting just
//! moves time forward) and [`SeededRandom`].

use crate::abi::ClockId;
use crate::errno::{Errno, WasiResult};
use rand::rngs::{OsRng, StdRng};
use rand::{RngCore, SeedableRng};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Source of timestamps, in nanoseconds
pub trait Clock: Send + Sync {
    fn now(&self, id: ClockId) -> WasiResult<u64>;
    fn resolution(&self, id: ClockId) -> WasiResult<u64>;
}

/// Blocks the calling thread
pub trait Sleeper: Send + Sync {
    /// Sleep for `duration` unless cancelled first; returns `false` when the
    /// sleep was cut short by `cancel`
    fn sleep(&self, duration: Duration, cancel: &CancelToken) -> bool;
}

/// Source of bytes for `random_get`
pub trait RandomSource: Send {
    fn fill(&mut self, buf: &mut [u8]) -> WasiResult<()>;
}

fn nanos(d: Duration) -> WasiResult<u64> {
    u64::try_from(d.as_nanos()).map_err(|_| Errno::Overflow)
}

// ============================================================================
// Cancellation
// ============================================================================

#[derive(Debug, Default)]
struct CancelState {
    cancelled: Mutex<bool>,
    cond: Condvar,
}

/// Cross-thread cancellation of a running instance
///
/// Clones share state. Once cancelled, a token stays cancelled.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    state: Arc<CancelState>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        let mut cancelled = self
            .state
            .cancelled
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *cancelled = true;
        self.state.cond.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        *self
            .state
            .cancelled
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Wait up to `timeout`; returns `true` if cancelled
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let guard = self
            .state
            .cancelled
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let (guard, _) = self
            .state
            .cond
            .wait_timeout_while(guard, timeout, |cancelled| !*cancelled)
            .unwrap_or_else(PoisonError::into_inner);
        *guard
    }
}

// ============================================================================
// System providers
// ============================================================================

/// Wall clock plus a monotonic clock anchored at construction
#[derive(Debug, Clone)]
pub struct SystemClock {
    start: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self, id: ClockId) -> WasiResult<u64> {
        match id {
            ClockId::Realtime => {
                let since = SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .map_err(|_| Errno::Overflow)?;
                nanos(since)
            }
            ClockId::Monotonic => nanos(self.start.elapsed()),
            ClockId::ProcessCputime | ClockId::ThreadCputime => Err(Errno::Inval),
        }
    }

    fn resolution(&self, id: ClockId) -> WasiResult<u64> {
        match id {
            ClockId::Realtime => Ok(1_000),
            ClockId::Monotonic => Ok(1),
            ClockId::ProcessCputime | ClockId::ThreadCputime => Err(Errno::Inval),
        }
    }
}

/// Sleeps on the cancel token's condvar so cancellation wakes it early
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration, cancel: &CancelToken) -> bool {
        !cancel.wait_timeout(duration)
    }
}

/// Operating system entropy
#[derive(Debug, Clone, Copy, Default)]
pub struct OsRandom;

impl RandomSource for OsRandom {
    fn fill(&mut self, buf: &mut [u8]) -> WasiResult<()> {
        OsRng.try_fill_bytes(buf).map_err(|err| {
            tracing::warn!("os entropy unavailable: {}", err);
            Errno::Io
        })
    }
}

/// Deterministic pseudo-random bytes
#[derive(Debug, Clone)]
pub struct SeededRandom {
    rng: StdRng,
}

impl SeededRandom {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl RandomSource for SeededRandom {
    fn fill(&mut self, buf: &mut [u8]) -> WasiResult<()> {
        self.rng.fill_bytes(buf);
        Ok(())
    }
}

// ============================================================================
// Manual clock
// ============================================================================

/// A clock that only moves when told to
///
/// Also implements [`Sleeper`]: sleeping advances the clock by the requested
/// duration and returns immediately. Clones share the same time.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    /// Nanoseconds since the epoch
    now: Arc<Mutex<u64>>,
}

impl ManualClock {
    /// Start at `start_ns` nanoseconds past the epoch
    pub fn new(start_ns: u64) -> Self {
        Self {
            now: Arc::new(Mutex::new(start_ns)),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now = now.saturating_add(u64::try_from(by.as_nanos()).unwrap_or(u64::MAX));
    }

    pub fn now_ns(&self) -> u64 {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Clock for ManualClock {
    fn now(&self, id: ClockId) -> WasiResult<u64> {
        match id {
            ClockId::Realtime | ClockId::Monotonic => Ok(self.now_ns()),
            ClockId::ProcessCputime | ClockId::ThreadCputime => Err(Errno::Inval),
        }
    }

    fn resolution(&self, id: ClockId) -> WasiResult<u64> {
        match id {
            ClockId::Realtime | ClockId::Monotonic => Ok(1),
            ClockId::ProcessCputime | ClockId::ThreadCputime => Err(Errno::Inval),
        }
    }
}

impl Sleeper for ManualClock {
    fn sleep(&self, duration: Duration, cancel: &CancelToken) -> bool {
        if cancel.is_cancelled() {
            return false;
        }
        self.advance(duration);
        true
    }
}
