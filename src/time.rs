//! Monotonic time sources with interruptible sleeps
//!
//! The recorder never calls `std::thread::sleep` directly. It goes through a
//! [`TimeSource`], which lets another thread cut a sleep short with
//! [`wake_now`](TimeSource::wake_now) and lets tests replace wall-clock time
//! with a [`FakeTimeSource`].
//!
//! Times are absolute [`Duration`]s measured from a reference fixed when the
//! time source is created.
//!
//! A wake issued while nobody is sleeping is remembered: the next
//! `sleep_until` returns immediately. Several wakes before that sleep
//! coalesce into one.

use crate::error::Result;
use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};
use tracing::trace;

/// Monotonic clock with an interruptible absolute sleep
pub trait TimeSource: Send + Sync {
    /// Time elapsed since this source's fixed reference point
    fn now(&self) -> Duration;

    /// Block until `deadline` (as measured by [`now`](Self::now)) or until
    /// [`wake_now`](Self::wake_now) is called, whichever comes first.
    ///
    /// An error means the sleep was interrupted; callers treat it as an early wake.
    fn sleep_until(&self, deadline: Duration) -> Result<()>;

    /// Make the current (or next) `sleep_until` return immediately
    fn wake_now(&self);
}

/// Time source backed by the operating system's monotonic clock
#[derive(Debug)]
pub struct SystemMonotonicTimeSource {
    origin: Instant,
    /// Pending wake flag
    woken: Mutex<bool>,
    wakeup: Condvar,
}

impl SystemMonotonicTimeSource {
    /// Create a time source whose reference point is now
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            woken: Mutex::new(false),
            wakeup: Condvar::new(),
        }
    }
}

impl Default for SystemMonotonicTimeSource {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for SystemMonotonicTimeSource {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }

    fn sleep_until(&self, deadline: Duration) -> Result<()> {
        let mut woken = self.woken.lock();
        loop {
            if *woken {
                *woken = false;
                trace!("Sleep interrupted by wake");
                return Ok(());
            }
            let now = self.now();
            if now >= deadline {
                return Ok(());
            }
            // Spurious wakeups just loop around and re-check both conditions
            self.wakeup.wait_for(&mut woken, deadline - now);
        }
    }

    fn wake_now(&self) {
        *self.woken.lock() = true;
        self.wakeup.notify_all();
    }
}

#[derive(Debug, Default)]
struct FakeClock {
    now: Duration,
    woken: bool,
    sleeps: usize,
}

/// Deterministic time source for tests
///
/// `sleep_until` never blocks: it jumps the clock forward to the deadline,
/// unless a wake is pending, in which case it consumes the wake and leaves
/// the clock where it is.
#[derive(Debug, Default)]
pub struct FakeTimeSource {
    clock: Mutex<FakeClock>,
}

impl FakeTimeSource {
    /// Create a fake clock at time zero
    pub fn new() -> Self {
        Self::default()
    }

    /// Move the clock forward by `step`
    pub fn advance(&self, step: Duration) {
        self.clock.lock().now += step;
    }

    /// Set the clock to `now`; moving it backward is ignored
    pub fn set(&self, now: Duration) {
        let mut clock = self.clock.lock();
        clock.now = clock.now.max(now);
    }

    /// Number of `sleep_until` calls so far
    pub fn sleeps(&self) -> usize {
        self.clock.lock().sleeps
    }

    /// Whether a wake is pending
    pub fn wake_pending(&self) -> bool {
        self.clock.lock().woken
    }
}

impl TimeSource for FakeTimeSource {
    fn now(&self) -> Duration {
        self.clock.lock().now
    }

    fn sleep_until(&self, deadline: Duration) -> Result<()> {
        let mut clock = self.clock.lock();
        clock.sleeps += 1;
        if clock.woken {
            clock.woken = false;
        } else if deadline > clock.now {
            clock.now = deadline;
        }
        Ok(())
    }

    fn wake_now(&self) {
        self.clock.lock().woken = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_system_clock_is_monotonic() {
        let source = SystemMonotonicTimeSource::new();
        let a = source.now();
        let b = source.now();
        assert!(b >= a);
    }

    #[test]
    fn test_system_sleep_reaches_deadline() {
        let source = SystemMonotonicTimeSource::new();
        let deadline = source.now() + Duration::from_millis(20);
        source.sleep_until(deadline).unwrap();
        assert!(source.now() >= deadline);

        // A deadline in the past returns at once
        source.sleep_until(Duration::ZERO).unwrap();
    }

    #[test]
    fn test_system_wake_interrupts_sleep() {
        let source = Arc::new(SystemMonotonicTimeSource::new());
        let sleeper = Arc::clone(&source);
        let started = Instant::now();

        let handle = thread::spawn(move || {
            let deadline = sleeper.now() + Duration::from_secs(30);
            sleeper.sleep_until(deadline).unwrap();
        });

        thread::sleep(Duration::from_millis(20));
        source.wake_now();
        handle.join().unwrap();
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn test_system_pending_wake_is_remembered() {
        let source = SystemMonotonicTimeSource::new();
        source.wake_now();
        source.wake_now();
        let started = Instant::now();
        source.sleep_until(source.now() + Duration::from_secs(30)).unwrap();
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn test_fake_sleep_jumps_to_deadline() {
        let source = FakeTimeSource::new();
        source.sleep_until(Duration::from_secs(5)).unwrap();
        assert_eq!(source.now(), Duration::from_secs(5));

        // Deadlines in the past leave the clock alone
        source.sleep_until(Duration::from_secs(1)).unwrap();
        assert_eq!(source.now(), Duration::from_secs(5));
        assert_eq!(source.sleeps(), 2);
    }

    #[test]
    fn test_fake_wake_coalesces() {
        let source = FakeTimeSource::new();
        source.wake_now();
        source.wake_now();
        assert!(source.wake_pending());

        source.sleep_until(Duration::from_secs(5)).unwrap();
        assert_eq!(source.now(), Duration::ZERO);
        assert!(!source.wake_pending());

        source.sleep_until(Duration::from_secs(5)).unwrap();
        assert_eq!(source.now(), Duration::from_secs(5));
    }

    #[test]
    fn test_fake_manual_control() {
        let source = FakeTimeSource::new();
        source.advance(Duration::from_secs(3));
        source.set(Duration::from_secs(10));
        source.set(Duration::from_secs(2));
        assert_eq!(source.now(), Duration::from_secs(10));
    }
}
