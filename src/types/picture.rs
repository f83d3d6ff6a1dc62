//! Decoded picture handed to pixel consumers

use std::time::Duration;

/// A decoded raw picture in planar YUV 4:2:0.
///
/// Pictures are immutable once built by the decode loop; the dispatcher moves them
/// to the consumer without copying again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedPicture {
    pub pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Presentation timestamp of the source access-unit in microseconds
    pub pts_us: u64,
}

/// Per-frame delay measurement published for diagnostics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DelayReport {
    pub sequence: u64,
    pub queue_delay: Duration,
    pub decode_delay: Duration,
}

impl DelayReport {
    /// Same measurement as `decode_delay`
    pub fn total_delay(&self) -> Duration {
        self.decode_delay
    }
}
