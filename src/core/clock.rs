//! Clock abstraction with real and simulated implementations.
//!
//! Workers never read `Instant`/`SystemTime` directly; they go through
//! [`Clocks`] so tests can substitute a simulated clock. Monotonic and
//! realtime are distinct domains: all scheduling uses the monotonic one,
//! realtime exists for log output only.

use once_cell::sync::Lazy;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Process-wide anchor for the monotonic domain. All `RealClocks` values
/// share it so monotonic readings compare across threads.
static MONOTONIC_ANCHOR: Lazy<Instant> = Lazy::new(Instant::now);

/// Interface to the system clocks, replaceable for tests.
pub trait Clocks: Send + Sync + 'static {
    /// Seconds on a strictly non-decreasing clock, process-local origin.
    fn monotonic(&self) -> f64;

    /// Seconds since the UNIX epoch, for logging only.
    fn realtime(&self) -> f64;

    /// Blocks the calling thread for the given number of seconds.
    fn sleep(&self, seconds: f64);

    /// Waits on `condvar` until `deadline` (monotonic) or a notification,
    /// whichever comes first. Used by `Flag::wait_until`.
    fn wait_deadline<'a>(
        &self,
        condvar: &Condvar,
        guard: MutexGuard<'a, bool>,
        deadline: f64,
    ) -> MutexGuard<'a, bool>;
}

/// The real system clocks.
#[derive(Clone, Copy, Debug, Default)]
pub struct RealClocks;

impl Clocks for RealClocks {
    fn monotonic(&self) -> f64 {
        MONOTONIC_ANCHOR.elapsed().as_secs_f64()
    }

    fn realtime(&self) -> f64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0)
    }

    fn sleep(&self, seconds: f64) {
        if seconds > 0.0 {
            thread::sleep(Duration::from_secs_f64(seconds));
        }
    }

    fn wait_deadline<'a>(
        &self,
        condvar: &Condvar,
        guard: MutexGuard<'a, bool>,
        deadline: f64,
    ) -> MutexGuard<'a, bool> {
        let now = self.monotonic();
        if deadline <= now {
            return guard;
        }
        let timeout = Duration::from_secs_f64(deadline - now);
        condvar
            .wait_timeout(guard, timeout)
            .unwrap_or_else(|e| e.into_inner())
            .0
    }
}

/// Returns the shared real-clock instance.
pub fn global_clocks() -> Arc<dyn Clocks> {
    static CLOCKS: Lazy<Arc<dyn Clocks>> = Lazy::new(|| Arc::new(RealClocks));
    Arc::clone(&CLOCKS)
}

/// Simulated clock for tests: time only moves when slept or advanced.
#[derive(Clone)]
pub struct SimClocks(Arc<SimInner>);

struct SimInner {
    boot_realtime: f64,
    uptime: Mutex<f64>,
}

impl SimClocks {
    pub fn new(boot_realtime: f64) -> Self {
        SimClocks(Arc::new(SimInner {
            boot_realtime,
            uptime: Mutex::new(0.0),
        }))
    }

    /// Advances the clock without blocking.
    pub fn advance(&self, seconds: f64) {
        let mut up = self.0.uptime.lock().unwrap_or_else(|e| e.into_inner());
        *up += seconds.max(0.0);
    }
}

impl Clocks for SimClocks {
    fn monotonic(&self) -> f64 {
        *self.0.uptime.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn realtime(&self) -> f64 {
        self.0.boot_realtime + self.monotonic()
    }

    fn sleep(&self, seconds: f64) {
        self.advance(seconds);
    }

    /// Jumps straight to the deadline instead of blocking.
    fn wait_deadline<'a>(
        &self,
        _condvar: &Condvar,
        guard: MutexGuard<'a, bool>,
        deadline: f64,
    ) -> MutexGuard<'a, bool> {
        let mut up = self.0.uptime.lock().unwrap_or_else(|e| e.into_inner());
        if *up < deadline {
            *up = deadline;
        }
        guard
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_real_monotonic_non_decreasing() {
        let clocks = RealClocks;
        let a = clocks.monotonic();
        let b = clocks.monotonic();
        assert!(b >= a);
    }

    #[test]
    fn test_real_sleep_advances_monotonic() {
        let clocks = RealClocks;
        let before = clocks.monotonic();
        clocks.sleep(0.01);
        assert!(clocks.monotonic() - before >= 0.009);
    }

    #[test]
    fn test_sim_clock_advances_only_on_demand() {
        let clocks = SimClocks::new(1_700_000_000.0);
        assert_eq!(clocks.monotonic(), 0.0);
        clocks.sleep(2.5);
        assert_eq!(clocks.monotonic(), 2.5);
        clocks.advance(0.5);
        assert_eq!(clocks.monotonic(), 3.0);
        assert_eq!(clocks.realtime(), 1_700_000_003.0);
    }
}
