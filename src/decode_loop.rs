//! The decode loop task.
//!
//! One tokio task owns the [`DecoderSession`] and runs the feed/drain cycle:
//! dequeue a frame, gate it on the reference state, make sure the session matches
//! its resolution, feed it, then drain one output. When the queue is empty the
//! task parks on the queue's notifier instead of spinning, waking on a short tick
//! only while frames are still inside the codec. A run of empty ticks expires
//! those frames so the tick does not outlive the codec's output.
//!
//! Nothing here is fatal. Codec errors rebuild the session, output churn resets
//! it, configuration failures park the loop in `Idle` until the next frame, and
//! busy input drops the frame. Progress is published through a
//! [`watch`] channel of [`DecoderStatus`].

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::codec::{CodecFactory, SurfaceRef};
use crate::dispatch::DispatchHandle;
use crate::queue::FrameQueue;
use crate::reference::ReferenceFrameProvider;
use crate::session::{BufferPools, DecoderSession, Drained, FeedOutcome, ReferenceState};
use crate::types::{DecodedPicture, DelayReport, FrameRecord, FrameTiming, Resolution};
use crate::watchdog::ChurnWatchdog;
use crate::{DecodeError, DecoderConfig};

/// Sequence number the parser gives the first unit of a stream
pub const FIRST_SEQUENCE: u64 = 1;

/// Upper bound on frames tracked for delay accounting
const IN_FLIGHT_LIMIT: usize = 64;

/// Empty drain ticks after which in-flight frames are assumed swallowed by the codec
const IDLE_DRAIN_LIMIT: u32 = 20;

/// Decode loop state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoopState {
    /// No decoder session
    #[default]
    Idle,
    /// Building a session for a known resolution
    Configuring,
    /// Feeding and draining
    Running,
    /// Rebuilding the session after output churn
    Recovering,
    /// Worker terminated, resources released
    Stopped,
}

/// Snapshot of the loop published after every state or counter change
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecoderStatus {
    pub state: LoopState,
    /// Resolution of the live session
    pub resolution: Option<Resolution>,
    /// Whether outputs are rendered to a surface instead of dispatched
    pub surface_output: bool,
    pub reference: ReferenceState,
    /// Slot counts of the live codec
    pub pools: BufferPools,
    pub frames_fed: u64,
    pub frames_decoded: u64,
    /// Frames discarded by the loop (reference gate, busy input, teardown)
    pub frames_dropped: u64,
    /// Frames dropped because no input slot became free
    pub busy_drops: u64,
    /// Session configurations attempted, including the first
    pub reconfigurations: u64,
    /// Full resets triggered by output churn
    pub resets: u64,
    /// Most recent failure, cleared by the next successful configuration unless
    /// that configuration was the rebuild after a codec error
    pub last_error: Option<String>,
}

/// Requests from the pipeline facade
pub(crate) enum Command {
    Init(Option<SurfaceRef>),
    ChangeSurface(Option<SurfaceRef>),
}

/// Handle to a running loop
pub(crate) struct LoopHandle {
    pub commands: mpsc::UnboundedSender<Command>,
    pub cancel: CancellationToken,
    pub task: JoinHandle<()>,
}

/// Everything a new loop needs from the facade
pub(crate) struct LoopContext {
    pub config: DecoderConfig,
    pub factory: Arc<dyn CodecFactory>,
    pub references: Arc<ReferenceFrameProvider>,
    pub queue: Arc<FrameQueue>,
    pub dispatch: DispatchHandle,
    pub status: watch::Sender<DecoderStatus>,
    pub delays: watch::Sender<Option<DelayReport>>,
    pub surface: Option<SurfaceRef>,
}

/// Why the session is being (re)built
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Trigger {
    StreamStart,
    Init,
    ResolutionChange,
    SurfaceChange,
    CodecError,
    OutputChurn,
}

impl Trigger {
    /// Whether queued frames from before the rebuild are discarded
    fn flushes_pending(self) -> bool {
        matches!(self, Trigger::Init | Trigger::SurfaceChange | Trigger::CodecError | Trigger::OutputChurn)
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Trigger::StreamStart => "stream start",
            Trigger::Init => "init request",
            Trigger::ResolutionChange => "resolution change",
            Trigger::SurfaceChange => "surface change",
            Trigger::CodecError => "codec error",
            Trigger::OutputChurn => "output churn",
        };
        f.write_str(text)
    }
}

struct InFlight {
    pts_us: u64,
    sequence: u64,
    timing: FrameTiming,
}

pub(crate) struct DecodeLoop {
    session: DecoderSession,
    references: Arc<ReferenceFrameProvider>,
    queue: Arc<FrameQueue>,
    dispatch: DispatchHandle,
    status: watch::Sender<DecoderStatus>,
    delays: watch::Sender<Option<DelayReport>>,
    watchdog: ChurnWatchdog,
    surface: Option<SurfaceRef>,
    drain_tick: Duration,

    /// Last known non-zero resolution of the stream
    stream_resolution: Option<Resolution>,
    /// Frames staged ahead of the shared queue (the trigger after a synthetic reference)
    primed: VecDeque<FrameRecord>,
    in_flight: VecDeque<InFlight>,
    /// Consecutive drain ticks that found no output
    empty_drains: u32,
}

impl DecodeLoop {
    /// Spawn the loop on the current tokio runtime
    pub(crate) fn spawn(ctx: LoopContext) -> LoopHandle {
        let (commands, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let decode_loop = DecodeLoop::new(ctx);
        let task = tokio::spawn(decode_loop.run(rx, cancel.clone()));
        LoopHandle { commands, cancel, task }
    }

    fn new(ctx: LoopContext) -> Self {
        Self {
            session: DecoderSession::new(ctx.factory, &ctx.config),
            references: ctx.references,
            queue: ctx.queue,
            dispatch: ctx.dispatch,
            status: ctx.status,
            delays: ctx.delays,
            watchdog: ChurnWatchdog::new(ctx.config.churn_threshold, ctx.config.churn_window()),
            surface: ctx.surface,
            drain_tick: ctx.config.drain_tick(),
            stream_resolution: None,
            primed: VecDeque::new(),
            in_flight: VecDeque::new(),
            empty_drains: 0,
        }
    }

    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>, cancel: CancellationToken) {
        info!(surface_output = self.surface.is_some(), "Decode loop started");
        let surface_output = self.surface.is_some();
        self.update_status(|s| {
            s.state = LoopState::Idle;
            s.surface_output = surface_output;
        });

        let queue = Arc::clone(&self.queue);
        let mut drain_tick = tokio::time::interval(self.drain_tick);
        drain_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if cancel.is_cancelled() {
                info!("Decode loop cancelled");
                break;
            }

            if self.has_pending_frames() {
                while let Ok(command) = commands.try_recv() {
                    self.handle_command(command);
                }
                self.cycle().await;
                tokio::task::yield_now().await;
                continue;
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("Decode loop cancelled while idle");
                    break;
                }
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => {
                        debug!("Command channel closed, shutting down");
                        break;
                    }
                },
                _ = queue.wait_for_frames() => {}
                _ = drain_tick.tick(), if !self.in_flight.is_empty() => self.drain_idle(),
            }
        }

        self.shutdown();
    }

    fn has_pending_frames(&self) -> bool {
        !self.primed.is_empty() || !self.queue.is_empty()
    }

    fn handle_command(&mut self, command: Command) {
        let (surface, trigger) = match command {
            Command::Init(surface) => (surface, Trigger::Init),
            Command::ChangeSurface(surface) => (surface, Trigger::SurfaceChange),
        };
        self.surface = surface;
        let surface_output = self.surface.is_some();
        self.update_status(|s| s.surface_output = surface_output);

        match self.session.resolution().or(self.stream_resolution) {
            Some(resolution) => {
                self.configure(resolution, trigger);
            }
            None => debug!(%trigger, "Resolution unknown, deferring configuration to first frame"),
        }
    }

    /// One feed/drain step
    async fn cycle(&mut self) {
        let frame = match self.primed.pop_front() {
            Some(frame) => frame,
            None => {
                let Some(frame) = self.queue.dequeue() else {
                    return;
                };
                match self.admit(frame).await {
                    Some(frame) => frame,
                    None => return,
                }
            }
        };

        self.feed(frame).await;
        self.drain_once();
    }

    /// Apply the reference gate and match the session to the frame.
    ///
    /// Returns the frame to feed now, which is a synthetic reference when one was
    /// injected ahead of `frame`.
    async fn admit(&mut self, frame: FrameRecord) -> Option<FrameRecord> {
        let admitted = self.session.reference_state() != ReferenceState::Missing;
        if !admitted && frame.sequence != FIRST_SEQUENCE && !frame.key_frame {
            self.drop_frame(&frame, "waiting for reference frame");
            return None;
        }

        if let Some(resolution) = Resolution::known(frame.width, frame.height) {
            self.stream_resolution = Some(resolution);
            if self.session.resolution() != Some(resolution) {
                let trigger =
                    if self.session.is_configured() { Trigger::ResolutionChange } else { Trigger::StreamStart };
                if !self.configure(resolution, trigger) {
                    self.drop_frame(&frame, "decoder not configured");
                    return None;
                }
                // The stream already has its reference; the new session carries it over.
                if admitted {
                    self.session.mark_reference_queued();
                    self.publish_reference();
                }
            }
        }

        let Some(resolution) = self.session.resolution() else {
            self.drop_frame(&frame, "resolution unknown");
            return None;
        };

        if admitted {
            return Some(frame);
        }

        match self.references.reference_frame(resolution.width).await {
            Some(payload) => {
                let synthetic = FrameRecord::synthetic_reference(payload, &frame);
                let discarded = self.queue.clear();
                debug!(
                    sequence = frame.sequence,
                    reference_len = synthetic.len(),
                    discarded,
                    "Injecting synthetic reference frame"
                );
                self.count_dropped(discarded as u64);
                self.session.mark_reference_queued();
                self.primed.push_front(frame);
                self.publish_reference();
                Some(synthetic)
            }
            None if frame.key_frame => {
                debug!(sequence = frame.sequence, "Key frame admitted as reference");
                self.session.mark_reference_queued();
                self.publish_reference();
                Some(frame)
            }
            None => {
                self.drop_frame(&frame, "no reference frame available");
                None
            }
        }
    }

    async fn feed(&mut self, mut frame: FrameRecord) {
        match self.session.feed(&frame.payload, frame.pts_us).await {
            Ok(FeedOutcome::Queued(slot)) => {
                frame.timing.fed_at = Some(Instant::now());
                trace!(sequence = frame.sequence, index = frame.index, slot, "Fed frame");

                if self.in_flight.len() >= IN_FLIGHT_LIMIT {
                    self.in_flight.pop_front();
                }
                self.in_flight.push_back(InFlight {
                    pts_us: frame.pts_us,
                    sequence: frame.sequence,
                    timing: frame.timing,
                });

                self.empty_drains = 0;
                let reference = self.session.reference_state();
                self.update_status(|s| {
                    s.frames_fed += 1;
                    s.reference = reference;
                });
            }
            Ok(FeedOutcome::Busy) => {
                warn!(sequence = frame.sequence, "Decoder input busy, dropping frame");
                self.update_status(|s| {
                    s.busy_drops += 1;
                    s.frames_dropped += 1;
                });
            }
            Err(e) => {
                self.count_dropped(1);
                self.recover_from_codec_error(e);
            }
        }
    }

    /// Drain on the idle tick, giving up on frames the codec never returns.
    ///
    /// Parameter sets and frames the codec discards internally produce no
    /// output, so their in-flight entries would otherwise keep the tick armed.
    fn drain_idle(&mut self) {
        if self.drain_once() {
            self.empty_drains = 0;
            return;
        }

        self.empty_drains += 1;
        if self.empty_drains >= IDLE_DRAIN_LIMIT {
            debug!(expired = self.in_flight.len(), "No decoder output, expiring in-flight frames");
            self.in_flight.clear();
            self.empty_drains = 0;
        }
    }

    /// Poll the session for one output and act on it.
    ///
    /// Returns `false` when the codec had nothing to report.
    fn drain_once(&mut self) -> bool {
        enum Action {
            Decoded(u64),
            Churn,
            FormatChanged,
            Nothing,
            Failed(DecodeError),
        }

        let action = match self.session.drain() {
            Err(e) => Action::Failed(e),
            Ok(Drained::NoOutput) => Action::Nothing,
            Ok(Drained::OutputSetChanged) => Action::Churn,
            Ok(Drained::FormatChanged(format)) => {
                info!(resolution = %format.resolution, color_format = ?format.color_format, "Decoder output format changed");
                Action::FormatChanged
            }
            Ok(Drained::Output(guard)) => {
                let info = guard.info();
                let resolution = guard.resolution();
                let released = if guard.renders_to_surface() {
                    guard.render()
                } else {
                    let pixels = guard.pixels().map(<[u8]>::to_vec);
                    match pixels {
                        Ok(pixels) => {
                            let picture = DecodedPicture {
                                pixels,
                                width: resolution.width,
                                height: resolution.height,
                                pts_us: info.pts_us,
                            };
                            if !self.dispatch.dispatch(picture) {
                                warn!(pts_us = info.pts_us, "Output dispatcher gone, picture discarded");
                            }
                            guard.release()
                        }
                        Err(e) => Err(e),
                    }
                };
                match released {
                    Ok(()) => Action::Decoded(info.pts_us),
                    Err(e) => Action::Failed(e),
                }
            }
        };

        match action {
            Action::Decoded(pts_us) => self.complete_output(pts_us),
            Action::Churn => {
                if self.watchdog.record(Instant::now()) {
                    self.recover_from_churn();
                } else {
                    self.session.refresh_output_pool();
                    let pools = self.session.pools();
                    self.update_status(|s| s.pools = pools);
                }
            }
            Action::FormatChanged => {}
            Action::Nothing => return false,
            Action::Failed(e) => self.recover_from_codec_error(e),
        }
        true
    }

    fn complete_output(&mut self, pts_us: u64) {
        self.update_status(|s| s.frames_decoded += 1);

        let Some(position) = self.in_flight.iter().position(|f| f.pts_us == pts_us) else {
            return;
        };
        if let Some(mut done) = self.in_flight.remove(position) {
            done.timing.output_at = Some(Instant::now());
            if let (Some(queue_delay), Some(decode_delay)) =
                (done.timing.queue_delay(), done.timing.decode_delay())
            {
                trace!(sequence = done.sequence, ?queue_delay, ?decode_delay, "Frame decoded");
                self.delays.send_replace(Some(DelayReport { sequence: done.sequence, queue_delay, decode_delay }));
            }
        }
    }

    /// Build a session for `resolution`, discarding pending work from any previous one.
    ///
    /// Returns `false` and parks the loop in `Idle` when configuration fails.
    fn configure(&mut self, resolution: Resolution, trigger: Trigger) -> bool {
        let state = match trigger {
            Trigger::OutputChurn => LoopState::Recovering,
            _ => LoopState::Configuring,
        };
        self.update_status(|s| s.state = state);

        // Frames behind a resolution change already belong to the new stream.
        let mut discarded = self.primed.len();
        self.primed.clear();
        if trigger.flushes_pending() {
            discarded += self.queue.clear();
        }
        self.count_dropped(discarded as u64);
        self.in_flight.clear();
        self.empty_drains = 0;
        self.watchdog.reset();

        let result = self.session.configure(resolution.width, resolution.height, self.surface.clone());
        let reference = self.session.reference_state();
        let pools = self.session.pools();
        match result {
            Ok(()) => {
                info!(%resolution, %trigger, "Decode loop running");
                self.update_status(|s| {
                    s.state = LoopState::Running;
                    s.resolution = Some(resolution);
                    s.reference = reference;
                    s.pools = pools;
                    s.reconfigurations += 1;
                    // Keep the cause of a self-healing rebuild visible
                    if trigger != Trigger::CodecError {
                        s.last_error = None;
                    }
                });
                true
            }
            Err(e) => {
                error!(%resolution, %trigger, "Decoder configuration failed: {}", e);
                let message = e.to_string();
                self.update_status(|s| {
                    s.state = LoopState::Idle;
                    s.resolution = None;
                    s.reference = reference;
                    s.pools = pools;
                    s.reconfigurations += 1;
                    s.last_error = Some(message);
                });
                false
            }
        }
    }

    fn recover_from_codec_error(&mut self, e: DecodeError) {
        warn!("Codec error, rebuilding decoder: {}", e);
        let message = e.to_string();
        self.update_status(|s| s.last_error = Some(message));

        match self.session.resolution().or(self.stream_resolution) {
            Some(resolution) => {
                self.configure(resolution, Trigger::CodecError);
            }
            None => {
                self.session.flush_and_release();
                self.update_status(|s| {
                    s.state = LoopState::Idle;
                    s.pools = BufferPools::default();
                });
            }
        }
    }

    fn recover_from_churn(&mut self) {
        error!("Decoder output set keeps changing, resetting session");
        self.update_status(|s| s.resets += 1);

        match self.session.resolution().or(self.stream_resolution) {
            Some(resolution) => {
                self.configure(resolution, Trigger::OutputChurn);
            }
            None => {
                self.session.flush_and_release();
                self.update_status(|s| {
                    s.state = LoopState::Idle;
                    s.pools = BufferPools::default();
                });
            }
        }
    }

    fn drop_frame(&self, frame: &FrameRecord, reason: &'static str) {
        debug!(sequence = frame.sequence, key_frame = frame.key_frame, reason, "Dropped frame");
        self.count_dropped(1);
    }

    fn count_dropped(&self, count: u64) {
        if count > 0 {
            self.update_status(|s| s.frames_dropped += count);
        }
    }

    fn publish_reference(&self) {
        let reference = self.session.reference_state();
        self.update_status(|s| s.reference = reference);
    }

    fn update_status(&self, f: impl FnOnce(&mut DecoderStatus)) {
        self.status.send_modify(f);
    }

    fn shutdown(&mut self) {
        let discarded = self.queue.clear() + self.primed.len();
        self.primed.clear();
        self.in_flight.clear();
        self.session.flush_and_release();
        info!(discarded, "Decode loop stopped");
        self.update_status(|s| {
            s.state = LoopState::Stopped;
            s.resolution = None;
            s.reference = ReferenceState::Missing;
            s.pools = BufferPools::default();
        });
    }
}
