//! Public pipeline facade.
//!
//! [`StreamDecoder`] owns the frame queue, the output dispatcher and the decode
//! loop task, and exposes the lifecycle operations: `init`, `change_surface`,
//! `stop`, `resume` and `destroy`. Compressed units enter through a
//! [`FrameSink`], which the bitstream parser can hold on any thread.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use streamdecode::{DecoderConfig, ReferenceFrameProvider, StreamDecoder};
//! # use streamdecode::CodecFactory;
//!
//! # async fn run(factory: Arc<dyn CodecFactory>) -> streamdecode::Result<()> {
//! let mut decoder = StreamDecoder::new(DecoderConfig::default(), factory, ReferenceFrameProvider::unavailable())?;
//! decoder.register_pixel_consumer(|picture: streamdecode::types::DecodedPicture| {
//!     println!("{}x{} @ {}us", picture.width, picture.height, picture.pts_us);
//! })?;
//! decoder.init(None)?;
//!
//! let sink = decoder.sink();
//! let unit = vec![0u8, 0, 0, 1, 0x65];
//! sink.on_access_unit(unit.clone(), unit.len(), 1, true, 1280, 720);
//!
//! decoder.destroy().await?;
//! # Ok(())
//! # }
//! ```

use futures::stream::BoxStream;
use futures::{Stream, StreamExt};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;
use tracing::{debug, error, info, trace, warn};

use crate::codec::{CodecFactory, SurfaceRef};
use crate::decode_loop::{Command, DecodeLoop, DecoderStatus, LoopContext, LoopHandle, LoopState};
use crate::dispatch::{OutputDispatcher, PixelConsumer};
use crate::queue::FrameQueue;
use crate::reference::ReferenceFrameProvider;
use crate::stream::ThrottleExt;
use crate::types::{DelayReport, FrameRecord, UpdateRate};
use crate::{DecodeError, DecoderConfig, Result};


/// Producer entry point for compressed access-units.
///
/// Cloneable and thread-safe. Enqueueing never blocks: when the queue is full
/// the oldest pending frame is evicted.
#[derive(Clone)]
pub struct FrameSink {
    queue: Arc<FrameQueue>,
    status: watch::Receiver<DecoderStatus>,
    next_index: Arc<AtomicU64>,
    epoch: Instant,
}

impl FrameSink {
    /// Accept one access-unit from the bitstream parser.
    ///
    /// `size` must equal the payload length. Zero `width` or `height` means the
    /// resolution is not known yet. Returns `false` when the unit was rejected
    /// (length mismatch, or the decoder is stopped).
    pub fn on_access_unit(
        &self,
        data: impl Into<Arc<[u8]>>,
        size: usize,
        sequence: u64,
        key_frame: bool,
        width: u32,
        height: u32,
    ) -> bool {
        if self.status.borrow().state == LoopState::Stopped {
            trace!(sequence, "Decoder stopped, access unit ignored");
            return false;
        }

        let payload: Arc<[u8]> = data.into();
        if payload.len() != size {
            warn!(sequence, declared = size, actual = payload.len(), "Access unit length mismatch, ignored");
            return false;
        }

        let index = self.next_index.fetch_add(1, Ordering::Relaxed);
        let pts_us = u64::try_from(self.epoch.elapsed().as_micros()).unwrap_or(u64::MAX);
        let frame = FrameRecord::new(payload, pts_us, sequence, key_frame, width, height).with_index(index);
        self.queue.enqueue(frame);
        true
    }

    /// Frames waiting for the decode loop
    pub fn pending(&self) -> usize {
        self.queue.len()
    }
}

impl std::fmt::Debug for FrameSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameSink")
            .field("pending", &self.queue.len())
            .field("next_index", &self.next_index.load(Ordering::Relaxed))
            .finish()
    }
}

/// Real-time decoding pipeline
pub struct StreamDecoder {
    config: DecoderConfig,
    factory: Arc<dyn CodecFactory>,
    references: Arc<ReferenceFrameProvider>,
    queue: Arc<FrameQueue>,
    dispatcher: OutputDispatcher,
    status: watch::Sender<DecoderStatus>,
    delays: watch::Sender<Option<DelayReport>>,
    sink: FrameSink,
    surface: Option<SurfaceRef>,
    worker: Option<LoopHandle>,
}

impl StreamDecoder {
    /// Build the pipeline and start the decode loop.
    ///
    /// Must be called inside a tokio runtime. No decoder is created until the
    /// first frame with a known resolution arrives or [`init`](Self::init) is
    /// called after one has.
    pub fn new(
        config: DecoderConfig,
        factory: Arc<dyn CodecFactory>,
        references: ReferenceFrameProvider,
    ) -> Result<Self> {
        config.validate()?;

        let queue = Arc::new(FrameQueue::new(config.queue_capacity));
        let dispatcher = OutputDispatcher::spawn()?;
        let (status, status_rx) = watch::channel(DecoderStatus::default());
        let (delays, _) = watch::channel(None);
        let sink = FrameSink {
            queue: Arc::clone(&queue),
            status: status_rx,
            next_index: Arc::new(AtomicU64::new(0)),
            epoch: Instant::now(),
        };

        let mut decoder = Self {
            config,
            factory,
            references: Arc::new(references),
            queue,
            dispatcher,
            status,
            delays,
            sink,
            surface: None,
            worker: None,
        };
        decoder.start_worker()?;
        info!(capacity = decoder.queue.capacity(), model = ?decoder.references.model(), "Stream decoder created");
        Ok(decoder)
    }

    /// Prepare for output, rendering to `surface` when given.
    ///
    /// If the stream resolution is already known the session is rebuilt now,
    /// otherwise on the first frame that carries one.
    pub fn init(&mut self, surface: Option<SurfaceRef>) -> Result<()> {
        debug!(surface = surface.is_some(), "Init requested");
        self.surface = surface.clone();
        self.send(Command::Init(surface))
    }

    /// Switch between surface rendering and raw pixel output
    pub fn change_surface(&mut self, surface: Option<SurfaceRef>) -> Result<()> {
        debug!(surface = surface.is_some(), "Surface change requested");
        self.surface = surface.clone();
        self.send(Command::ChangeSurface(surface))
    }

    /// Stop decoding and release the decoder.
    ///
    /// Pending frames are discarded and further access-units are ignored until
    /// [`resume`](Self::resume). Waits up to the configured stop timeout for the
    /// worker to finish; on expiry the worker is aborted and `Timeout` returned.
    pub async fn stop(&mut self) -> Result<()> {
        let Some(worker) = self.worker.take() else {
            debug!("Stop requested but decode loop is not running");
            return Ok(());
        };

        info!("Stopping decode loop");
        self.status.send_modify(|s| s.state = LoopState::Stopped);
        worker.cancel.cancel();
        self.queue.clear();

        let timeout = self.config.stop_timeout();
        let mut task = worker.task;
        let result = match tokio::time::timeout(timeout, &mut task).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                error!("Decode loop task failed: {}", e);
                Ok(())
            }
            Err(_) => {
                warn!(?timeout, "Decode loop did not stop in time, aborting");
                task.abort();
                Err(DecodeError::Timeout { duration: timeout })
            }
        };

        self.queue.clear();
        self.status.send_modify(|s| s.state = LoopState::Stopped);
        result
    }

    /// Restart the decode loop after [`stop`](Self::stop).
    ///
    /// The next key frame (or first frame with a synthetic reference) starts a
    /// fresh session. Does nothing while the loop is running.
    pub fn resume(&mut self) -> Result<()> {
        if self.worker.is_some() {
            debug!("Resume requested but decode loop is already running");
            return Ok(());
        }
        info!("Resuming decode loop");
        self.start_worker()
    }

    /// Stop the loop and shut the dispatcher down
    pub async fn destroy(mut self) -> Result<()> {
        let stopped = self.stop().await;
        let dispatched = self.dispatcher.shutdown().await;
        info!("Stream decoder destroyed");
        stopped.and(dispatched)
    }

    /// Install the consumer for raw pictures, replacing any previous one
    pub fn register_pixel_consumer(&self, consumer: impl PixelConsumer) -> Result<()> {
        self.dispatcher.register(consumer)
    }

    pub fn unregister_pixel_consumer(&self) -> Result<()> {
        self.dispatcher.unregister()
    }

    /// Producer handle for access-units
    pub fn sink(&self) -> FrameSink {
        self.sink.clone()
    }

    /// Current loop status
    pub fn status(&self) -> DecoderStatus {
        self.status.borrow().clone()
    }

    /// Every status change, starting with the current one
    pub fn status_updates(&self) -> impl Stream<Item = DecoderStatus> + 'static {
        WatchStream::new(self.status.subscribe())
    }

    /// Per-frame delay measurements, at most one per `rate` interval
    pub fn delay_reports(&self, rate: UpdateRate) -> BoxStream<'static, DelayReport> {
        let reports = WatchStream::new(self.delays.subscribe()).filter_map(|report| async move { report });
        match rate.interval() {
            None => reports.boxed(),
            Some(period) => reports.throttle(period).boxed(),
        }
    }

    pub fn config(&self) -> &DecoderConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.worker.is_some()
    }

    fn start_worker(&mut self) -> Result<()> {
        let dispatch = self.dispatcher.handle()?;
        self.status.send_modify(|s| s.state = LoopState::Idle);
        self.worker = Some(DecodeLoop::spawn(LoopContext {
            config: self.config.clone(),
            factory: Arc::clone(&self.factory),
            references: Arc::clone(&self.references),
            queue: Arc::clone(&self.queue),
            dispatch,
            status: self.status.clone(),
            delays: self.delays.clone(),
            surface: self.surface.clone(),
        }));
        Ok(())
    }

    fn send(&self, command: Command) -> Result<()> {
        let worker = self.worker.as_ref().ok_or(DecodeError::WorkerStopped)?;
        worker.commands.send(command).map_err(|_| DecodeError::WorkerStopped)
    }
}

impl Drop for StreamDecoder {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            debug!("Dropping stream decoder, cancelling decode loop");
            worker.cancel.cancel();
        }
    }
}
