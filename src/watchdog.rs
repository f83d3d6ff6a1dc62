//! Churn detection for output-set changes.
//!
//! Some hardware decoders get stuck replacing their output slot set over and
//! over. A single change is routine. A burst of them means the decoder state is
//! bad and the session should be torn down and rebuilt.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Sliding-window counter that fires when `threshold` events land inside `window`
#[derive(Debug, Clone)]
pub struct ChurnWatchdog {
    threshold: usize,
    window: Duration,
    events: VecDeque<Instant>,
}

impl ChurnWatchdog {
    pub fn new(threshold: usize, window: Duration) -> Self {
        let threshold = threshold.max(1);
        Self { threshold, window, events: VecDeque::with_capacity(threshold) }
    }

    /// Record one event at `now`.
    ///
    /// Returns `true` when this event completes a burst. Firing clears the
    /// history, so one burst triggers exactly one reset.
    pub fn record(&mut self, now: Instant) -> bool {
        self.events.push_back(now);
        while let Some(&oldest) = self.events.front() {
            if now.saturating_duration_since(oldest) >= self.window {
                self.events.pop_front();
            } else {
                break;
            }
        }

        if self.events.len() >= self.threshold {
            self.events.clear();
            true
        } else {
            false
        }
    }

    pub fn reset(&mut self) {
        self.events.clear();
    }

    /// Events currently inside the window
    pub fn pending(&self) -> usize {
        self.events.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const WINDOW: Duration = Duration::from_secs(1);

    #[test]
    fn ten_changes_within_a_second_fire_once() {
        let mut watchdog = ChurnWatchdog::new(10, WINDOW);
        let start = Instant::now();

        let fired: Vec<bool> =
            (0..10).map(|i| watchdog.record(start + Duration::from_millis(i * 50))).collect();

        assert_eq!(fired.iter().filter(|f| **f).count(), 1);
        assert!(fired[9]);
        assert_eq!(watchdog.pending(), 0);
    }

    #[test]
    fn nine_changes_do_not_fire() {
        let mut watchdog = ChurnWatchdog::new(10, WINDOW);
        let start = Instant::now();
        for i in 0..9 {
            assert!(!watchdog.record(start + Duration::from_millis(i * 10)));
        }
        assert_eq!(watchdog.pending(), 9);
    }

    #[test]
    fn spread_out_changes_do_not_fire() {
        let mut watchdog = ChurnWatchdog::new(10, WINDOW);
        let start = Instant::now();
        // One change every 150ms never puts ten inside one second.
        for i in 0..40 {
            assert!(!watchdog.record(start + Duration::from_millis(i * 150)));
        }
    }

    #[test]
    fn reset_forgets_history() {
        let mut watchdog = ChurnWatchdog::new(3, WINDOW);
        let now = Instant::now();
        watchdog.record(now);
        watchdog.record(now);
        watchdog.reset();
        assert!(!watchdog.record(now));
    }

    proptest! {
        #[test]
        fn fires_iff_threshold_inside_window(gaps in prop::collection::vec(0u64..400, 1..40)) {
            let mut watchdog = ChurnWatchdog::new(10, WINDOW);
            let start = Instant::now();
            let mut offset = 0u64;
            let mut model: Vec<u64> = Vec::new();

            for gap in gaps {
                offset += gap;
                model.push(offset);
                model.retain(|t| offset - t < 1000);
                let expected = model.len() >= 10;
                if expected {
                    model.clear();
                }
                prop_assert_eq!(watchdog.record(start + Duration::from_millis(offset)), expected);
            }
        }
    }
}
