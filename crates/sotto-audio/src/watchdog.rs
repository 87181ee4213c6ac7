use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use sotto_foundation::SharedClock;

/// No-data watchdog for the capture stream.
///
/// The capture callback calls `feed` on every delivered buffer; the capture
/// thread's supervision loop calls `check`. Going `timeout` without a feed
/// latches the trigger so a dead device surfaces as a fault instead of a
/// silent hang. Time comes from a `Clock` handle so tests can drive it.
#[derive(Clone)]
pub struct CaptureWatchdog {
    timeout: Duration,
    clock: SharedClock,
    last_feed: Arc<RwLock<Option<Instant>>>,
    triggered: Arc<AtomicBool>,
}

impl CaptureWatchdog {
    pub fn new(timeout: Duration, clock: SharedClock) -> Self {
        Self {
            timeout,
            clock,
            last_feed: Arc::new(RwLock::new(None)),
            triggered: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Arm the watchdog; the window starts now.
    pub fn arm(&self) {
        *self.last_feed.write() = Some(self.clock.now());
        self.triggered.store(false, Ordering::SeqCst);
    }

    pub fn feed(&self) {
        *self.last_feed.write() = Some(self.clock.now());
        self.triggered.store(false, Ordering::SeqCst);
    }

    /// Evaluate the window; returns true (and latches) on expiry.
    pub fn check(&self) -> bool {
        if self.triggered.load(Ordering::SeqCst) {
            return true;
        }
        let expired = {
            let guard = self.last_feed.read();
            match *guard {
                Some(last) => self.clock.now().saturating_duration_since(last) > self.timeout,
                None => false,
            }
        };
        if expired {
            tracing::error!(timeout = ?self.timeout, "watchdog expired, no audio data");
            self.triggered.store(true, Ordering::SeqCst);
        }
        expired
    }

    pub fn is_triggered(&self) -> bool {
        self.triggered.load(Ordering::SeqCst)
    }

    pub fn disarm(&self) {
        *self.last_feed.write() = None;
        self.triggered.store(false, Ordering::SeqCst);
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sotto_foundation::TestClock;

    fn watchdog_with_clock() -> (CaptureWatchdog, Arc<TestClock>) {
        let clock = Arc::new(TestClock::new());
        let dog = CaptureWatchdog::new(Duration::from_secs(5), clock.clone());
        (dog, clock)
    }

    #[test]
    fn unarmed_watchdog_never_triggers() {
        let (dog, clock) = watchdog_with_clock();
        clock.advance(Duration::from_secs(60));
        assert!(!dog.check());
    }

    #[test]
    fn triggers_after_timeout_without_feeds() {
        let (dog, clock) = watchdog_with_clock();
        dog.arm();
        clock.advance(Duration::from_secs(4));
        assert!(!dog.check());
        clock.advance(Duration::from_secs(2));
        assert!(dog.check());
        assert!(dog.is_triggered());
    }

    #[test]
    fn feeding_resets_the_window() {
        let (dog, clock) = watchdog_with_clock();
        dog.arm();
        for _ in 0..10 {
            clock.advance(Duration::from_secs(3));
            dog.feed();
        }
        assert!(!dog.check());
    }

    #[test]
    fn disarm_clears_a_latched_trigger() {
        let (dog, clock) = watchdog_with_clock();
        dog.arm();
        clock.advance(Duration::from_secs(10));
        assert!(dog.check());
        dog.disarm();
        assert!(!dog.check());
    }
}
