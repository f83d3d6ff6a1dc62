//! Bounded drop-oldest frame queue between the producer and the decode loop.
//!
//! The queue never blocks either side. When the producer outruns the decoder the
//! oldest pending frame is evicted, so playback favors freshness over
//! completeness.
//!
//! ```rust
//! use streamdecode::{FrameQueue, types::FrameRecord};
//!
//! let queue = FrameQueue::new(2);
//! for seq in 1..=3 {
//!     queue.enqueue(FrameRecord::new(vec![0u8], 0, seq, false, 640, 480));
//! }
//! assert_eq!(queue.dequeue().map(|f| f.sequence), Some(2));
//! assert_eq!(queue.dequeue().map(|f| f.sequence), Some(3));
//! assert!(queue.dequeue().is_none());
//! ```

use parking_lot::Mutex;
use std::collections::VecDeque;
use tokio::sync::Notify;
use tracing::{debug, trace};

use crate::types::FrameRecord;

/// Capacity used when no configuration overrides it
pub const DEFAULT_QUEUE_CAPACITY: usize = 30;

/// Fixed-capacity FIFO of [`FrameRecord`]s with drop-oldest overflow
#[derive(Debug)]
pub struct FrameQueue {
    inner: Mutex<Inner>,
    capacity: usize,
    notify: Notify,
}

#[derive(Debug)]
struct Inner {
    frames: VecDeque<FrameRecord>,
    evicted: u64,
}

impl FrameQueue {
    /// Create a queue holding at most `capacity` frames (minimum 1)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Mutex::new(Inner { frames: VecDeque::with_capacity(capacity), evicted: 0 }),
            capacity,
            notify: Notify::new(),
        }
    }

    /// Append a frame, evicting the single oldest entry when full.
    ///
    /// Returns the evicted frame, if any. Never blocks.
    pub fn enqueue(&self, frame: FrameRecord) -> Option<FrameRecord> {
        let evicted = {
            let mut inner = self.inner.lock();
            let evicted = if inner.frames.len() >= self.capacity {
                let dropped = inner.frames.pop_front();
                inner.evicted += 1;
                dropped
            } else {
                None
            };
            inner.frames.push_back(frame);
            evicted
        };

        if let Some(dropped) = &evicted {
            debug!(sequence = dropped.sequence, index = dropped.index, "Queue full, dropped oldest frame");
        }
        self.notify.notify_one();
        evicted
    }

    /// Remove and return the oldest frame without blocking
    pub fn dequeue(&self) -> Option<FrameRecord> {
        self.inner.lock().frames.pop_front()
    }

    /// Discard every pending frame, returning how many were dropped
    pub fn clear(&self) -> usize {
        let mut inner = self.inner.lock();
        let dropped = inner.frames.len();
        inner.frames.clear();
        if dropped > 0 {
            trace!(dropped, "Frame queue cleared");
        }
        dropped
    }

    pub fn len(&self) -> usize {
        self.inner.lock().frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().frames.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Total frames evicted by overflow since creation
    pub fn evicted_total(&self) -> u64 {
        self.inner.lock().evicted
    }

    /// Wait until a frame has been enqueued since the last wake-up.
    ///
    /// Returns immediately if an enqueue happened while nobody was waiting.
    pub async fn wait_for_frames(&self) {
        if !self.is_empty() {
            return;
        }
        self.notify.notified().await;
    }
}

impl Default for FrameQueue {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Arc;
    use std::time::Duration;

    fn frame(sequence: u64) -> FrameRecord {
        FrameRecord::new(vec![sequence as u8], sequence * 1000, sequence, false, 1280, 720)
    }

    #[test]
    fn overflow_keeps_newest_thirty() {
        let queue = FrameQueue::new(30);
        for seq in 1..=35 {
            queue.enqueue(frame(seq));
        }

        assert_eq!(queue.len(), 30);
        assert_eq!(queue.evicted_total(), 5);

        let drained: Vec<u64> = std::iter::from_fn(|| queue.dequeue()).map(|f| f.sequence).collect();
        assert_eq!(drained, (6..=35).collect::<Vec<_>>());
    }

    #[test]
    fn enqueue_reports_evicted_frame() {
        let queue = FrameQueue::new(2);
        assert!(queue.enqueue(frame(1)).is_none());
        assert!(queue.enqueue(frame(2)).is_none());
        let evicted = queue.enqueue(frame(3)).expect("oldest frame should be evicted");
        assert_eq!(evicted.sequence, 1);
    }

    #[test]
    fn clear_discards_everything() {
        let queue = FrameQueue::default();
        for seq in 1..=4 {
            queue.enqueue(frame(seq));
        }
        assert_eq!(queue.clear(), 4);
        assert!(queue.is_empty());
        assert!(queue.dequeue().is_none());
    }

    #[test]
    fn zero_capacity_is_raised_to_one() {
        let queue = FrameQueue::new(0);
        assert_eq!(queue.capacity(), 1);
        queue.enqueue(frame(1));
        queue.enqueue(frame(2));
        assert_eq!(queue.dequeue().map(|f| f.sequence), Some(2));
    }

    #[tokio::test]
    async fn wait_wakes_on_enqueue_from_another_thread() {
        let queue = Arc::new(FrameQueue::new(4));
        let producer = Arc::clone(&queue);

        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            producer.enqueue(frame(9));
        });

        tokio::time::timeout(Duration::from_secs(2), queue.wait_for_frames())
            .await
            .expect("enqueue should wake the waiter");
        assert_eq!(queue.dequeue().map(|f| f.sequence), Some(9));
        handle.join().expect("producer thread panicked");
    }

    #[tokio::test]
    async fn enqueue_before_wait_is_not_lost() {
        let queue = FrameQueue::new(4);
        queue.enqueue(frame(1));
        let _ = queue.dequeue();

        // The permit from the enqueue above is still stored.
        tokio::time::timeout(Duration::from_millis(200), queue.wait_for_frames())
            .await
            .expect("stored notification should complete the wait");
    }

    proptest! {
        #[test]
        fn prop_capacity_never_exceeded_and_newest_retained(
            capacity in 1usize..64,
            count in 1u64..200,
        ) {
            let queue = FrameQueue::new(capacity);
            for seq in 1..=count {
                queue.enqueue(frame(seq));
                prop_assert!(queue.len() <= capacity);
            }

            let drained: Vec<u64> = std::iter::from_fn(|| queue.dequeue()).map(|f| f.sequence).collect();
            prop_assert_eq!(drained.last().copied(), Some(count));

            let kept = (count as usize).min(capacity) as u64;
            let expected: Vec<u64> = (count - kept + 1..=count).collect();
            prop_assert_eq!(drained, expected);
        }
    }
}
