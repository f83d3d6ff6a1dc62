//! Update rate control for diagnostic streams

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Rate at which diagnostic updates are delivered to a subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpdateRate {
    /// Every update as soon as it is published
    Native,

    /// At most this many updates per second, keeping only the latest
    Max(u32),
}

impl UpdateRate {
    /// Interval between emitted updates, `None` when unthrottled.
    ///
    /// `Max(0)` is treated as `Native`.
    pub fn interval(self) -> Option<Duration> {
        match self {
            UpdateRate::Native | UpdateRate::Max(0) => None,
            UpdateRate::Max(hz) => Some(Duration::from_secs_f64(1.0 / hz as f64)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn native_and_zero_are_unthrottled() {
        assert_eq!(UpdateRate::Native.interval(), None);
        assert_eq!(UpdateRate::Max(0).interval(), None);
    }

    #[test]
    fn max_rate_maps_to_period() {
        assert_eq!(UpdateRate::Max(4).interval(), Some(Duration::from_millis(250)));
    }
}
