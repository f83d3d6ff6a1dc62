//! Latest-wins rate limiting for diagnostic streams

use futures::Stream;
use pin_project_lite::pin_project;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::time::{Interval, MissedTickBehavior, interval};

/// Adds [`throttle`](ThrottleExt::throttle) to every stream
pub trait ThrottleExt: Stream {
    /// Emit at most one item per `period`.
    ///
    /// Items arriving faster than that overwrite each other; the newest one is
    /// emitted on the next tick. An idle source produces nothing.
    fn throttle(self, period: Duration) -> Throttle<Self>
    where
        Self: Sized,
    {
        Throttle::new(self, period)
    }
}

impl<T: Stream> ThrottleExt for T {}

pin_project! {
    /// Stream returned by [`ThrottleExt::throttle`]
    pub struct Throttle<S: Stream> {
        #[pin]
        source: S,
        ticks: Interval,
        latest: Option<S::Item>,
        finished: bool,
    }
}

impl<S: Stream> Throttle<S> {
    pub fn new(source: S, period: Duration) -> Self {
        let mut ticks = interval(period.max(Duration::from_millis(1)));
        ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self { source, ticks, latest: None, finished: false }
    }
}

impl<S: Stream> Stream for Throttle<S> {
    type Item = S::Item;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();

        while !*this.finished {
            match this.source.as_mut().poll_next(cx) {
                Poll::Ready(Some(item)) => *this.latest = Some(item),
                Poll::Ready(None) => *this.finished = true,
                Poll::Pending => break,
            }
        }

        if this.latest.is_none() {
            return if *this.finished { Poll::Ready(None) } else { Poll::Pending };
        }

        match this.ticks.poll_tick(cx) {
            Poll::Ready(_) => Poll::Ready(this.latest.take()),
            Poll::Pending => Poll::Pending,
        }
    }
}
