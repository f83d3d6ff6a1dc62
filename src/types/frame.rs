//! Frame records flowing from the producer to the decoder

use std::sync::Arc;
use std::time::{Duration, Instant};

/// One compressed access-unit plus its timing metadata.
///
/// This is the unit handed from the producer to the decode loop. The payload is
/// shared via `Arc` so the record stays cheap to move between the queue and the
/// loop.
#[derive(Debug, Clone)]
pub struct FrameRecord {
    /// Compressed access-unit bytes
    pub payload: Arc<[u8]>,

    /// Presentation timestamp in microseconds
    pub pts_us: u64,

    /// Sequence number assigned by the upstream parser
    pub sequence: u64,

    /// Arrival order at the sink, independent of the parser numbering
    pub index: u64,

    /// Whether the parser flagged this unit as a key frame
    pub key_frame: bool,

    /// Coded width, 0 when unknown
    pub width: u32,

    /// Coded height, 0 when unknown
    pub height: u32,

    /// Timing checkpoints used for delay diagnostics
    pub timing: FrameTiming,
}

impl FrameRecord {
    /// Create a record for a unit that arrived just now
    pub fn new(
        payload: impl Into<Arc<[u8]>>,
        pts_us: u64,
        sequence: u64,
        key_frame: bool,
        width: u32,
        height: u32,
    ) -> Self {
        Self {
            payload: payload.into(),
            pts_us,
            sequence,
            index: 0,
            key_frame,
            width,
            height,
            timing: FrameTiming::arrived_now(),
        }
    }

    /// Set the arrival index
    pub fn with_index(mut self, index: u64) -> Self {
        self.index = index;
        self
    }

    /// Build a synthetic reference frame that logically precedes `trigger`.
    ///
    /// The reference takes the trigger's resolution and presentation time, and
    /// the sequence and index just before it.
    pub fn synthetic_reference(payload: Arc<[u8]>, trigger: &FrameRecord) -> Self {
        Self {
            payload,
            pts_us: trigger.pts_us,
            sequence: trigger.sequence.saturating_sub(1),
            index: trigger.index.saturating_sub(1),
            key_frame: true,
            width: trigger.width,
            height: trigger.height,
            timing: FrameTiming::arrived_now(),
        }
    }

    /// Payload length in bytes
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// Whether the payload is empty
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Whether the record carries a usable resolution
    pub fn has_resolution(&self) -> bool {
        self.width != 0 && self.height != 0
    }
}

/// Arrival, feed and output instants of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameTiming {
    pub arrived_at: Instant,
    pub fed_at: Option<Instant>,
    pub output_at: Option<Instant>,
}

impl FrameTiming {
    fn arrived_now() -> Self {
        Self { arrived_at: Instant::now(), fed_at: None, output_at: None }
    }

    /// Time spent waiting in the queue
    pub fn queue_delay(&self) -> Option<Duration> {
        self.fed_at.map(|fed| fed.saturating_duration_since(self.arrived_at))
    }

    /// Time between feeding the decoder and receiving its output
    pub fn decode_delay(&self) -> Option<Duration> {
        match (self.fed_at, self.output_at) {
            (Some(fed), Some(out)) => Some(out.saturating_duration_since(fed)),
            _ => None,
        }
    }

    /// Same measurement as [`decode_delay`](Self::decode_delay).
    pub fn total_delay(&self) -> Option<Duration> {
        self.decode_delay()
    }
}
