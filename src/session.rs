//! Decoder session: one codec instance and its buffer pools.
//!
//! The session is owned by the decode loop and never shared, so it carries no
//! locks. Every way out of a session (reconfiguration, error, stop, drop) goes
//! through [`DecoderSession::flush_and_release`], so a codec handle is never
//! leaked.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

use crate::codec::{CodecFactory, CodecOutput, HardwareCodec, OutputBufferInfo, SurfaceRef};
use crate::types::{ColorFormat, OutputFormat, Resolution, VideoFormat};
use crate::{DecodeError, DecoderConfig, Result};

/// Whether the codec has something to predict from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReferenceState {
    /// No key frame admitted since the session was configured
    #[default]
    Missing,
    /// A key frame (genuine or synthetic) is admitted but not yet fed
    Queued,
    /// A key frame has been fed to the codec
    InDecoder,
}

/// Slot counts of the codec's current input and output pools
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BufferPools {
    pub input: usize,
    pub output: usize,
}

/// Outcome of [`DecoderSession::feed`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedOutcome {
    /// The unit was queued into this input slot
    Queued(usize),
    /// No input slot became free within the retry budget
    Busy,
}

/// Outcome of [`DecoderSession::drain`]
#[derive(Debug)]
pub enum Drained<'a> {
    Output(OutputGuard<'a>),
    NoOutput,
    OutputSetChanged,
    FormatChanged(OutputFormat),
}

/// A filled output slot that must go back to the codec exactly once.
///
/// Call [`render`](Self::render) or [`release`](Self::release); dropping the guard
/// releases the slot without rendering.
pub struct OutputGuard<'a> {
    codec: &'a mut (dyn HardwareCodec + 'static),
    info: OutputBufferInfo,
    resolution: Resolution,
    surface_output: bool,
    released: bool,
}

impl OutputGuard<'_> {
    pub fn info(&self) -> OutputBufferInfo {
        self.info
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    /// Whether the codec composites this output onto a presentation surface
    pub fn renders_to_surface(&self) -> bool {
        self.surface_output
    }

    /// Decoded payload of this output slot
    pub fn pixels(&self) -> Result<&[u8]> {
        let data = self.codec.output_data(self.info.slot)?;
        let end = self.info.offset.checked_add(self.info.size).filter(|end| *end <= data.len());
        match end {
            Some(end) => Ok(&data[self.info.offset..end]),
            None => Err(DecodeError::codec_failed(
                "read output",
                format!(
                    "output range {}+{} exceeds slot {} of {} bytes",
                    self.info.offset,
                    self.info.size,
                    self.info.slot,
                    data.len()
                ),
            )),
        }
    }

    /// Release the slot and composite it onto the surface
    pub fn render(mut self) -> Result<()> {
        self.finish(true)
    }

    /// Release the slot without rendering
    pub fn release(mut self) -> Result<()> {
        self.finish(false)
    }

    fn finish(&mut self, render: bool) -> Result<()> {
        self.released = true;
        self.codec.release_output(self.info.slot, render)
    }
}

impl Drop for OutputGuard<'_> {
    fn drop(&mut self) {
        if !self.released {
            if let Err(e) = self.finish(false) {
                warn!(slot = self.info.slot, "Failed to release output slot: {}", e);
            }
        }
    }
}

impl std::fmt::Debug for OutputGuard<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputGuard")
            .field("info", &self.info)
            .field("resolution", &self.resolution)
            .field("surface_output", &self.surface_output)
            .finish()
    }
}

/// Hardware decoder handle plus the state needed to rebuild it
pub struct DecoderSession {
    factory: Arc<dyn CodecFactory>,
    mime_type: String,
    retry_limit: u32,
    retry_backoff: Duration,

    codec: Option<Box<dyn HardwareCodec>>,
    resolution: Option<Resolution>,
    surface: Option<SurfaceRef>,
    pools: BufferPools,
    reference: ReferenceState,
    output_format: Option<OutputFormat>,
}

impl DecoderSession {
    pub fn new(factory: Arc<dyn CodecFactory>, config: &DecoderConfig) -> Self {
        Self {
            factory,
            mime_type: config.mime_type.clone(),
            retry_limit: config.input_retry_limit.max(1),
            retry_backoff: config.input_retry_backoff(),
            codec: None,
            resolution: None,
            surface: None,
            pools: BufferPools::default(),
            reference: ReferenceState::Missing,
            output_format: None,
        }
    }

    /// (Re)create the codec for `width`x`height`.
    ///
    /// Without a surface the codec is asked for planar YUV output; with one it
    /// renders directly. Any previous codec is flushed and released first. On
    /// failure the session stays unconfigured.
    pub fn configure(&mut self, width: u32, height: u32, surface: Option<SurfaceRef>) -> Result<()> {
        self.flush_and_release();
        self.surface = surface;

        let resolution = Resolution::known(width, height).ok_or_else(|| {
            DecodeError::configuration(width, height, "width and height must be non-zero")
        })?;

        let color_format =
            if self.surface.is_some() { ColorFormat::Surface } else { ColorFormat::Yuv420Planar };
        let format = VideoFormat { mime_type: self.mime_type.clone(), resolution, color_format };

        let mut codec = self.factory.create(&self.mime_type).map_err(|e| {
            DecodeError::configuration_with_source(width, height, "codec unavailable", e)
        })?;

        let started = codec.configure(&format, self.surface.as_ref()).and_then(|()| codec.start());
        if let Err(e) = started {
            codec.release();
            return Err(DecodeError::configuration_with_source(
                width,
                height,
                "codec rejected format",
                e,
            ));
        }

        self.pools = BufferPools { input: codec.input_slots(), output: codec.output_slots() };
        self.codec = Some(codec);
        self.resolution = Some(resolution);
        self.reference = ReferenceState::Missing;
        self.output_format = None;

        info!(
            %resolution,
            ?color_format,
            input_slots = self.pools.input,
            output_slots = self.pools.output,
            "Decoder configured"
        );
        Ok(())
    }

    /// Submit one compressed unit.
    ///
    /// Tries up to the configured number of times to get a free input slot,
    /// pausing briefly between attempts, and reports `Busy` instead of waiting
    /// any longer.
    pub async fn feed(&mut self, data: &[u8], pts_us: u64) -> Result<FeedOutcome> {
        let codec = self.codec.as_mut().ok_or_else(not_configured)?;

        for attempt in 1..=self.retry_limit {
            if let Some(slot) = codec.dequeue_input()? {
                codec.queue_input(slot, data, pts_us)?;
                trace!(slot, attempt, len = data.len(), pts_us, "Queued input");
                if self.reference == ReferenceState::Queued {
                    self.reference = ReferenceState::InDecoder;
                }
                return Ok(FeedOutcome::Queued(slot));
            }
            if attempt < self.retry_limit {
                tokio::time::sleep(self.retry_backoff).await;
            }
        }

        debug!(attempts = self.retry_limit, "No input slot available");
        Ok(FeedOutcome::Busy)
    }

    /// Poll for one decoded unit without waiting
    pub fn drain(&mut self) -> Result<Drained<'_>> {
        let resolution = self
            .output_format
            .map(|format| format.resolution)
            .or(self.resolution)
            .ok_or_else(not_configured)?;
        let surface_output = self.surface.is_some();
        let codec = self.codec.as_deref_mut().ok_or_else(not_configured)?;

        match codec.dequeue_output()? {
            CodecOutput::Buffer(info) => Ok(Drained::Output(OutputGuard {
                codec,
                info,
                resolution,
                surface_output,
                released: false,
            })),
            CodecOutput::TryAgainLater => Ok(Drained::NoOutput),
            CodecOutput::BuffersChanged => Ok(Drained::OutputSetChanged),
            CodecOutput::FormatChanged(format) => {
                self.output_format = Some(format);
                Ok(Drained::FormatChanged(format))
            }
        }
    }

    /// Re-acquire the output pool after the codec replaced it
    pub fn refresh_output_pool(&mut self) {
        if let Some(codec) = self.codec.as_ref() {
            self.pools.output = codec.output_slots();
            trace!(output_slots = self.pools.output, "Output pool refreshed");
        }
    }

    /// Flush and destroy the codec, keeping only the surface choice
    pub fn flush_and_release(&mut self) {
        if let Some(mut codec) = self.codec.take() {
            if let Err(e) = codec.flush() {
                warn!("Failed to flush decoder: {}", e);
            }
            codec.release();
            debug!(resolution = ?self.resolution, "Decoder released");
        }
        self.resolution = None;
        self.pools = BufferPools::default();
        self.reference = ReferenceState::Missing;
        self.output_format = None;
    }

    /// Record that a key frame has been admitted for this session
    pub fn mark_reference_queued(&mut self) {
        if self.reference == ReferenceState::Missing {
            self.reference = ReferenceState::Queued;
        }
    }

    pub fn is_configured(&self) -> bool {
        self.codec.is_some()
    }

    /// Resolution of the live codec, `None` when unconfigured
    pub fn resolution(&self) -> Option<Resolution> {
        self.resolution
    }

    pub fn surface(&self) -> Option<&SurfaceRef> {
        self.surface.as_ref()
    }

    pub fn pools(&self) -> BufferPools {
        self.pools
    }

    pub fn reference_state(&self) -> ReferenceState {
        self.reference
    }
}

impl Drop for DecoderSession {
    fn drop(&mut self) {
        self.flush_and_release();
    }
}

fn not_configured() -> DecodeError {
    DecodeError::codec_failed("session", "decoder session is not configured")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{MOCK_SLOTS, MockCodecFactory, MockSurface};

    fn session(factory: &MockCodecFactory) -> DecoderSession {
        DecoderSession::new(Arc::new(factory.clone()), &DecoderConfig::default())
    }

    #[test]
    fn zero_resolution_is_a_configuration_error() {
        let factory = MockCodecFactory::new();
        let mut session = session(&factory);

        let err = session.configure(0, 720, None).unwrap_err();
        assert!(matches!(err, DecodeError::Configuration { width: 0, height: 720, .. }));
        assert!(!session.is_configured());
        assert_eq!(factory.snapshot().created, 0);
    }

    #[test]
    fn codec_creation_failure_leaves_session_unconfigured() {
        let factory = MockCodecFactory::new();
        factory.update(|b| b.fail_create = true);
        let mut session = session(&factory);

        let err = session.configure(1280, 720, None).unwrap_err();
        assert!(matches!(err, DecodeError::Configuration { .. }));
        assert!(!session.is_configured());
        assert_eq!(session.resolution(), None);
    }

    #[test]
    fn surface_selects_color_format() {
        let factory = MockCodecFactory::new();
        let mut session = session(&factory);

        session.configure(1280, 720, None).expect("raw configure");
        let surface: SurfaceRef = Arc::new(MockSurface(7));
        session.configure(1280, 720, Some(surface)).expect("surface configure");

        let log = factory.snapshot();
        let formats: Vec<ColorFormat> = log.configured.iter().map(|f| f.color_format).collect();
        assert_eq!(formats, vec![ColorFormat::Yuv420Planar, ColorFormat::Surface]);
        assert_eq!(log.surfaces, vec![None, Some(7)]);
        // The first codec was flushed and released before the second was built.
        assert_eq!(log.flushed, 1);
        assert_eq!(log.destroyed, 1);
        assert_eq!(session.surface().map(|s| s.native_handle()), Some(7));
    }

    #[test]
    fn flush_and_release_clears_pools_but_keeps_surface() {
        let factory = MockCodecFactory::new();
        let mut session = session(&factory);
        let surface: SurfaceRef = Arc::new(MockSurface(2));

        session.configure(640, 480, Some(surface)).expect("configure");
        assert_eq!(session.pools(), BufferPools { input: MOCK_SLOTS, output: MOCK_SLOTS });

        session.flush_and_release();
        assert_eq!(session.pools(), BufferPools::default());
        assert_eq!(session.resolution(), None);
        assert!(session.surface().is_some());
        assert_eq!(factory.snapshot().destroyed, 1);
    }

    #[tokio::test]
    async fn feed_then_drain_yields_configured_resolution() {
        let factory = MockCodecFactory::new();
        let mut session = session(&factory);
        session.configure(1280, 720, None).expect("configure");

        let outcome = session.feed(&[0x65, 1, 2, 3], 42).await.expect("feed");
        assert!(matches!(outcome, FeedOutcome::Queued(_)));

        match session.drain().expect("drain") {
            Drained::Output(guard) => {
                assert_eq!(guard.resolution(), Resolution::new(1280, 720));
                assert_eq!(guard.info().pts_us, 42);
                assert_eq!(guard.pixels().expect("pixels").len(), Resolution::new(1280, 720).yuv420_len());
                assert!(!guard.renders_to_surface());
                guard.release().expect("release");
            }
            other => panic!("expected decoded output, got {:?}", other),
        }

        assert!(matches!(session.drain().expect("drain"), Drained::NoOutput));
        assert_eq!(factory.snapshot().released, vec![(0, false)]);
    }

    #[tokio::test]
    async fn dropped_guard_releases_exactly_once() {
        let factory = MockCodecFactory::new();
        let mut session = session(&factory);
        session.configure(640, 480, None).expect("configure");
        session.feed(&[1], 1).await.expect("feed");

        if let Drained::Output(guard) = session.drain().expect("drain") {
            drop(guard);
        } else {
            panic!("expected output");
        }

        assert_eq!(factory.snapshot().released, vec![(0, false)]);
    }

    #[tokio::test]
    async fn busy_after_retry_budget() {
        let factory = MockCodecFactory::new();
        factory.update(|b| b.busy_input = true);
        let config = DecoderConfig { input_retry_limit: 3, input_retry_backoff_ms: 0, ..Default::default() };
        let mut session = DecoderSession::new(Arc::new(factory.clone()), &config);
        session.configure(640, 480, None).expect("configure");

        let outcome = session.feed(&[1, 2], 0).await.expect("feed");
        assert_eq!(outcome, FeedOutcome::Busy);
        assert_eq!(factory.snapshot().input_polls, 3);
        assert!(factory.snapshot().fed.is_empty());
    }

    #[tokio::test]
    async fn reference_state_moves_to_decoder_on_feed() {
        let factory = MockCodecFactory::new();
        let mut session = session(&factory);
        session.configure(640, 480, None).expect("configure");
        assert_eq!(session.reference_state(), ReferenceState::Missing);

        session.mark_reference_queued();
        assert_eq!(session.reference_state(), ReferenceState::Queued);

        session.feed(&[0x65], 0).await.expect("feed");
        assert_eq!(session.reference_state(), ReferenceState::InDecoder);

        session.mark_reference_queued();
        assert_eq!(session.reference_state(), ReferenceState::InDecoder);
    }

    #[test]
    fn drop_releases_codec() {
        let factory = MockCodecFactory::new();
        {
            let mut session = session(&factory);
            session.configure(640, 480, None).expect("configure");
        }
        assert_eq!(factory.snapshot().destroyed, 1);
    }

    #[tokio::test]
    async fn feeding_unconfigured_session_is_a_codec_error() {
        let factory = MockCodecFactory::new();
        let mut session = session(&factory);
        let err = session.feed(&[1], 0).await.unwrap_err();
        assert!(matches!(err, DecodeError::Codec { .. }));
    }
}
