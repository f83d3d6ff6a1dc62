//! openh264-backed software decoder

use openh264::decoder::Decoder;
use openh264::formats::YUVSource;
use std::collections::VecDeque;
use tracing::{debug, trace};

use crate::codec::{CodecFactory, CodecOutput, HardwareCodec, OutputBufferInfo, SurfaceRef};
use crate::config::AVC_MIME_TYPE;
use crate::types::{ColorFormat, OutputFormat, Resolution, VideoFormat};
use crate::{DecodeError, Result};

const INPUT_SLOTS: usize = 1;
const OUTPUT_SLOTS: usize = 4;

/// Creates [`SoftwareCodec`]s for H.264
#[derive(Debug, Clone, Copy, Default)]
pub struct SoftwareCodecFactory;

impl CodecFactory for SoftwareCodecFactory {
    fn create(&self, mime_type: &str) -> Result<Box<dyn HardwareCodec>> {
        if mime_type != AVC_MIME_TYPE {
            return Err(DecodeError::codec_failed("create", format!("unsupported MIME type {mime_type}")));
        }
        Ok(Box::new(SoftwareCodec::default()))
    }
}

// SAFETY: the openh264 decoder holds raw pointers into its own C state and is
// only ever used through `&mut self` by the single owning session.
struct SendDecoder(Decoder);
unsafe impl Send for SendDecoder {}

/// CPU decoder speaking the slot protocol.
///
/// Decoding happens synchronously inside `queue_input`; a decoded picture is
/// copied into a free output slot as tightly packed planar YUV 4:2:0. Input is
/// refused while every output slot is still held or pending, which the session
/// sees as a busy decoder.
#[derive(Default)]
pub struct SoftwareCodec {
    decoder: Option<SendDecoder>,
    configured: Option<Resolution>,
    output: Option<Resolution>,
    slots: Vec<Vec<u8>>,
    held: [bool; OUTPUT_SLOTS],
    events: VecDeque<CodecOutput>,
}

impl SoftwareCodec {
    fn free_slot(&self) -> Option<usize> {
        (0..OUTPUT_SLOTS).find(|slot| {
            !self.held[*slot]
                && !self.events.iter().any(|e| matches!(e, CodecOutput::Buffer(info) if info.slot == *slot))
        })
    }

    fn decoder(&mut self) -> Result<&mut Decoder> {
        self.decoder
            .as_mut()
            .map(|d| &mut d.0)
            .ok_or_else(|| DecodeError::codec_failed("decode", "codec not started"))
    }
}

impl HardwareCodec for SoftwareCodec {
    fn configure(&mut self, format: &VideoFormat, surface: Option<&SurfaceRef>) -> Result<()> {
        if surface.is_some() || format.color_format != ColorFormat::Yuv420Planar {
            return Err(DecodeError::codec_failed("configure", "software decoder cannot render to a surface"));
        }
        if format.mime_type != AVC_MIME_TYPE {
            return Err(DecodeError::codec_failed(
                "configure",
                format!("unsupported MIME type {}", format.mime_type),
            ));
        }
        self.configured = Some(format.resolution);
        Ok(())
    }

    fn start(&mut self) -> Result<()> {
        if self.configured.is_none() {
            return Err(DecodeError::codec_failed("start", "codec not configured"));
        }
        let decoder = Decoder::new().map_err(|e| DecodeError::codec_failed("start", format!("openh264: {e}")))?;
        self.decoder = Some(SendDecoder(decoder));
        self.slots = vec![Vec::new(); OUTPUT_SLOTS];
        self.output = self.configured;
        debug!(resolution = ?self.configured, "Software decoder started");
        Ok(())
    }

    fn input_slots(&self) -> usize {
        INPUT_SLOTS
    }

    fn output_slots(&self) -> usize {
        OUTPUT_SLOTS
    }

    fn dequeue_input(&mut self) -> Result<Option<usize>> {
        if self.decoder.is_none() {
            return Err(DecodeError::codec_failed("dequeue input", "codec not started"));
        }
        Ok(self.free_slot().map(|_| 0))
    }

    fn queue_input(&mut self, _slot: usize, data: &[u8], pts_us: u64) -> Result<()> {
        let picture = {
            let decoded = self
                .decoder()?
                .decode(data)
                .map_err(|e| DecodeError::codec_failed("decode", format!("openh264: {e}")))?;
            decoded.map(|yuv| pack_i420(&yuv))
        };

        let Some((pixels, resolution)) = picture else {
            trace!(len = data.len(), "No picture for this unit");
            return Ok(());
        };
        let Some(slot) = self.free_slot() else {
            trace!(pts_us, "All output slots busy, picture discarded");
            return Ok(());
        };

        if self.output != Some(resolution) {
            self.output = Some(resolution);
            self.events.push_back(CodecOutput::FormatChanged(OutputFormat {
                resolution,
                color_format: ColorFormat::Yuv420Planar,
            }));
        }
        let size = pixels.len();
        self.slots[slot] = pixels;
        self.events.push_back(CodecOutput::Buffer(OutputBufferInfo { slot, offset: 0, size, pts_us }));
        Ok(())
    }

    fn dequeue_output(&mut self) -> Result<CodecOutput> {
        let event = self.events.pop_front().unwrap_or(CodecOutput::TryAgainLater);
        if let CodecOutput::Buffer(info) = event {
            self.held[info.slot] = true;
        }
        Ok(event)
    }

    fn output_data(&self, slot: usize) -> Result<&[u8]> {
        self.slots
            .get(slot)
            .map(Vec::as_slice)
            .ok_or_else(|| DecodeError::codec_failed("output data", format!("no output slot {slot}")))
    }

    fn release_output(&mut self, slot: usize, _render: bool) -> Result<()> {
        match self.held.get_mut(slot) {
            Some(held) if *held => {
                *held = false;
                Ok(())
            }
            _ => Err(DecodeError::codec_failed("release output", format!("slot {slot} is not held"))),
        }
    }

    fn flush(&mut self) -> Result<()> {
        self.events.clear();
        self.held = [false; OUTPUT_SLOTS];
        Ok(())
    }

    fn release(&mut self) {
        self.decoder = None;
        self.slots.clear();
        self.configured = None;
        self.output = None;
    }
}

/// Copy a decoded picture into one tightly packed I420 buffer
fn pack_i420(yuv: &impl YUVSource) -> (Vec<u8>, Resolution) {
    let (width, height) = yuv.dimensions();
    let (y_stride, u_stride, v_stride) = yuv.strides();
    let (chroma_width, chroma_height) = (width.div_ceil(2), height.div_ceil(2));

    let mut pixels = Vec::with_capacity(width * height + 2 * chroma_width * chroma_height);
    copy_plane(yuv.y(), y_stride, width, height, &mut pixels);
    copy_plane(yuv.u(), u_stride, chroma_width, chroma_height, &mut pixels);
    copy_plane(yuv.v(), v_stride, chroma_width, chroma_height, &mut pixels);

    (pixels, Resolution::new(width as u32, height as u32))
}

/// Append `rows` rows of `width` bytes from a plane laid out with `stride`
fn copy_plane(plane: &[u8], stride: usize, width: usize, rows: usize, out: &mut Vec<u8>) {
    for row in plane.chunks(stride.max(1)).take(rows) {
        out.extend_from_slice(&row[..width.min(row.len())]);
    }
}
