//! Scripted codec backend for tests and benchmarks.
//!
//! [`MockCodecFactory`] hands out [`MockCodec`] instances that "decode" each
//! input immediately into one output slot filled with the input's first byte.
//! Every codec created by a factory writes into the same [`MockCodecLog`], so a
//! test can assert on the full history across reconfigurations.

#![cfg(any(test, feature = "benchmark"))]

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use crate::codec::{
    CodecFactory, CodecOutput, HardwareCodec, OutputBufferInfo, PresentationSurface, SurfaceRef,
};
use crate::types::{ColorFormat, VideoFormat};
use crate::{DecodeError, Result};

/// Input and output slots per mock codec
pub const MOCK_SLOTS: usize = 4;

/// Everything the mock codecs were asked to do
#[derive(Debug, Clone, Default)]
pub struct MockCodecLog {
    pub created: usize,
    pub configured: Vec<VideoFormat>,
    /// Native handle of the surface passed to each `configure`
    pub surfaces: Vec<Option<usize>>,
    /// Payloads in the order they reached a codec
    pub fed: Vec<Vec<u8>>,
    pub input_polls: usize,
    pub output_polls: usize,
    /// `(slot, rendered)` for every returned output slot
    pub released: Vec<(usize, bool)>,
    pub flushed: usize,
    pub destroyed: usize,
}

/// Knobs applied to codecs at call time
#[derive(Debug, Clone, Default)]
pub struct MockBehavior {
    pub fail_create: bool,
    pub fail_configure: bool,
    /// Never hand out an input slot
    pub busy_input: bool,
    /// Fail the next `queue_input` call, then behave again
    pub fail_next_queue: bool,
    /// Fail the next `dequeue_output` call, then behave again
    pub fail_next_output: bool,
    /// Accept the next input without ever producing an output for it
    pub swallow_next_input: bool,
    /// Block the calling thread inside every `dequeue_input`
    pub stall_input: Option<Duration>,
    /// `BuffersChanged` events emitted ahead of each decoded output
    pub buffers_changed_per_input: usize,
}

#[derive(Debug, Default)]
struct Shared {
    log: MockCodecLog,
    behavior: MockBehavior,
}

/// Factory for [`MockCodec`]s sharing one log
#[derive(Debug, Clone, Default)]
pub struct MockCodecFactory {
    shared: Arc<Mutex<Shared>>,
}

impl MockCodecFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Change the behavior of current and future codecs
    pub fn update(&self, f: impl FnOnce(&mut MockBehavior)) {
        f(&mut self.shared.lock().behavior);
    }

    /// Copy of the log as it is right now
    pub fn snapshot(&self) -> MockCodecLog {
        self.shared.lock().log.clone()
    }
}

impl CodecFactory for MockCodecFactory {
    fn create(&self, mime_type: &str) -> Result<Box<dyn HardwareCodec>> {
        let mut shared = self.shared.lock();
        if shared.behavior.fail_create {
            return Err(DecodeError::codec_failed("create", format!("no decoder for {mime_type}")));
        }
        shared.log.created += 1;
        Ok(Box::new(MockCodec::new(Arc::clone(&self.shared))))
    }
}

/// Immediate-output codec driven by [`MockBehavior`]
#[derive(Debug)]
pub struct MockCodec {
    shared: Arc<Mutex<Shared>>,
    format: Option<VideoFormat>,
    started: bool,
    next_input: usize,
    outputs: Vec<Vec<u8>>,
    held: [bool; MOCK_SLOTS],
    events: VecDeque<CodecOutput>,
}

impl MockCodec {
    fn new(shared: Arc<Mutex<Shared>>) -> Self {
        Self {
            shared,
            format: None,
            started: false,
            next_input: 0,
            outputs: vec![Vec::new(); MOCK_SLOTS],
            held: [false; MOCK_SLOTS],
            events: VecDeque::new(),
        }
    }

    fn free_output_slot(&self) -> Option<usize> {
        (0..MOCK_SLOTS).find(|slot| {
            !self.held[*slot]
                && !self.events.iter().any(|e| matches!(e, CodecOutput::Buffer(info) if info.slot == *slot))
        })
    }
}

impl HardwareCodec for MockCodec {
    fn configure(&mut self, format: &VideoFormat, surface: Option<&SurfaceRef>) -> Result<()> {
        let mut shared = self.shared.lock();
        if shared.behavior.fail_configure {
            return Err(DecodeError::codec_failed("configure", "format rejected"));
        }
        shared.log.configured.push(format.clone());
        shared.log.surfaces.push(surface.map(|s| s.native_handle()));
        self.format = Some(format.clone());
        Ok(())
    }

    fn start(&mut self) -> Result<()> {
        if self.format.is_none() {
            return Err(DecodeError::codec_failed("start", "codec not configured"));
        }
        self.started = true;
        Ok(())
    }

    fn input_slots(&self) -> usize {
        MOCK_SLOTS
    }

    fn output_slots(&self) -> usize {
        MOCK_SLOTS
    }

    fn dequeue_input(&mut self) -> Result<Option<usize>> {
        let stall = self.shared.lock().behavior.stall_input;
        if let Some(stall) = stall {
            std::thread::sleep(stall);
        }

        let mut shared = self.shared.lock();
        shared.log.input_polls += 1;
        if shared.behavior.busy_input || !self.started {
            return Ok(None);
        }
        let slot = self.next_input;
        self.next_input = (self.next_input + 1) % MOCK_SLOTS;
        Ok(Some(slot))
    }

    fn queue_input(&mut self, _slot: usize, data: &[u8], pts_us: u64) -> Result<()> {
        let changes = {
            let mut shared = self.shared.lock();
            if shared.behavior.fail_next_queue {
                shared.behavior.fail_next_queue = false;
                return Err(DecodeError::codec_failed("queue input", "codec in error state"));
            }
            shared.log.fed.push(data.to_vec());
            if shared.behavior.swallow_next_input {
                shared.behavior.swallow_next_input = false;
                return Ok(());
            }
            shared.behavior.buffers_changed_per_input
        };

        let Some(format) = self.format.as_ref() else {
            return Err(DecodeError::codec_failed("queue input", "codec not configured"));
        };
        let size = match format.color_format {
            ColorFormat::Yuv420Planar => format.resolution.yuv420_len(),
            ColorFormat::Surface => 0,
        };

        self.events.extend(std::iter::repeat_n(CodecOutput::BuffersChanged, changes));
        if let Some(slot) = self.free_output_slot() {
            self.outputs[slot] = vec![data.first().copied().unwrap_or(0); size];
            self.events.push_back(CodecOutput::Buffer(OutputBufferInfo { slot, offset: 0, size, pts_us }));
        }
        Ok(())
    }

    fn dequeue_output(&mut self) -> Result<CodecOutput> {
        {
            let mut shared = self.shared.lock();
            shared.log.output_polls += 1;
            if shared.behavior.fail_next_output {
                shared.behavior.fail_next_output = false;
                return Err(DecodeError::codec_failed("dequeue output", "output queue in error state"));
            }
        }

        let event = self.events.pop_front().unwrap_or(CodecOutput::TryAgainLater);
        if let CodecOutput::Buffer(info) = event {
            self.held[info.slot] = true;
        }
        Ok(event)
    }

    fn output_data(&self, slot: usize) -> Result<&[u8]> {
        self.outputs
            .get(slot)
            .map(Vec::as_slice)
            .ok_or_else(|| DecodeError::codec_failed("output data", format!("no output slot {slot}")))
    }

    fn release_output(&mut self, slot: usize, render: bool) -> Result<()> {
        if !self.held.get(slot).copied().unwrap_or(false) {
            return Err(DecodeError::codec_failed("release output", format!("slot {slot} is not held")));
        }
        self.held[slot] = false;
        self.shared.lock().log.released.push((slot, render));
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.events.clear();
        self.held = [false; MOCK_SLOTS];
        self.shared.lock().log.flushed += 1;
        Ok(())
    }

    fn release(&mut self) {
        self.started = false;
        self.shared.lock().log.destroyed += 1;
    }
}

/// Surface identified only by its handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MockSurface(pub usize);

impl PresentationSurface for MockSurface {
    fn native_handle(&self) -> usize {
        self.0
    }
}

/// Access-unit payload whose first byte tags it with `sequence`
pub fn access_unit(sequence: u64, key_frame: bool) -> Vec<u8> {
    let nal = if key_frame { 0x65 } else { 0x41 };
    vec![sequence as u8, 0, 0, 1, nal, 0x88]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Resolution;

    fn format(color_format: ColorFormat) -> VideoFormat {
        VideoFormat { mime_type: "video/avc".into(), resolution: Resolution::new(4, 4), color_format }
    }

    #[test]
    fn mock_emits_churn_before_output() -> anyhow::Result<()> {
        let factory = MockCodecFactory::new();
        factory.update(|b| b.buffers_changed_per_input = 2);
        let mut codec = factory.create("video/avc")?;
        codec.configure(&format(ColorFormat::Yuv420Planar), None)?;
        codec.start()?;

        let slot = codec.dequeue_input()?.expect("input slot");
        codec.queue_input(slot, &[9, 1], 5)?;

        assert_eq!(codec.dequeue_output()?, CodecOutput::BuffersChanged);
        assert_eq!(codec.dequeue_output()?, CodecOutput::BuffersChanged);
        let CodecOutput::Buffer(info) = codec.dequeue_output()? else {
            panic!("expected a decoded buffer");
        };
        assert_eq!(codec.output_data(info.slot)?, &[9u8; 24][..]);
        codec.release_output(info.slot, false)?;
        assert!(codec.release_output(info.slot, false).is_err());
        Ok(())
    }
}
