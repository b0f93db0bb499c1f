use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Last-activity clock shared between the read loop and the idle watchdog.
///
/// A single atomic scalar holding elapsed-millis-since-session-start; the
/// read loop stores on every received chunk, the watchdog only loads. No
/// further synchronization is needed.
#[derive(Debug)]
pub struct ActivityTracker {
    start: Instant,
    last_millis: AtomicU64,
}

impl ActivityTracker {
    pub fn new(start: Instant) -> Self {
        Self {
            start,
            last_millis: AtomicU64::new(0),
        }
    }

    /// Record that bytes just arrived.
    pub fn touch(&self) {
        let elapsed = self.start.elapsed().as_millis() as u64;
        self.last_millis.store(elapsed, Ordering::Relaxed);
    }

    /// Time since the last recorded activity.
    pub fn idle_for(&self) -> Duration {
        let now = self.start.elapsed().as_millis() as u64;
        let last = self.last_millis.load(Ordering::Relaxed);
        Duration::from_millis(now.saturating_sub(last))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn touch_resets_idle_clock() {
        let tracker = ActivityTracker::new(Instant::now());
        std::thread::sleep(Duration::from_millis(30));
        assert!(tracker.idle_for() >= Duration::from_millis(25));

        tracker.touch();
        assert!(tracker.idle_for() < Duration::from_millis(20));
    }
}
