//! Codec trait for hardware decoder backends
//!
//! The pipeline drives a codec through the same buffer-slot protocol the platform
//! decoders expose: acquire a free input slot, queue a compressed unit into it,
//! then poll output slots and hand each one back exactly once. All calls are
//! non-blocking; waiting and retrying is the session's job.

use std::fmt;
use std::sync::Arc;

use crate::Result;
use crate::types::{OutputFormat, VideoFormat};

/// Opaque presentation target for surface output mode.
///
/// Backends that composite directly downcast or interpret `native_handle` in
/// their own terms; the pipeline only passes the surface through.
pub trait PresentationSurface: Send + Sync + fmt::Debug + 'static {
    /// Platform window or surface handle
    fn native_handle(&self) -> usize;
}

/// Shared handle to a presentation surface
pub type SurfaceRef = Arc<dyn PresentationSurface>;

/// Metadata of a filled output slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputBufferInfo {
    pub slot: usize,
    pub offset: usize,
    pub size: usize,
    pub pts_us: u64,
}

/// Result of polling the codec for output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecOutput {
    /// A decoded unit is ready in an output slot
    Buffer(OutputBufferInfo),
    /// Nothing ready yet
    TryAgainLater,
    /// The output slot set was replaced and must be re-acquired
    BuffersChanged,
    /// The output format changed
    FormatChanged(OutputFormat),
}

/// A stateful decoder instance
///
/// Lifecycle: `configure` → `start` → feed/drain → `flush` → `release`.
/// The pipeline never calls into a codec after `release`.
pub trait HardwareCodec: Send + 'static {
    /// Prepare the codec for `format`, rendering to `surface` when given
    fn configure(&mut self, format: &VideoFormat, surface: Option<&SurfaceRef>) -> Result<()>;

    fn start(&mut self) -> Result<()>;

    /// Number of input slots in the current input pool
    fn input_slots(&self) -> usize;

    /// Number of output slots in the current output pool
    fn output_slots(&self) -> usize;

    /// Acquire a free input slot without waiting
    fn dequeue_input(&mut self) -> Result<Option<usize>>;

    /// Copy `data` into `slot` and submit it for decoding
    fn queue_input(&mut self, slot: usize, data: &[u8], pts_us: u64) -> Result<()>;

    /// Poll for one output event without waiting
    fn dequeue_output(&mut self) -> Result<CodecOutput>;

    /// Full contents of an output slot
    fn output_data(&self, slot: usize) -> Result<&[u8]>;

    /// Return an output slot; `render` composites it to the surface first
    fn release_output(&mut self, slot: usize, render: bool) -> Result<()>;

    /// Discard all pending input and output
    fn flush(&mut self) -> Result<()>;

    /// Destroy the codec instance
    fn release(&mut self);
}

/// Creates codec instances for a MIME type
pub trait CodecFactory: Send + Sync + 'static {
    fn create(&self, mime_type: &str) -> Result<Box<dyn HardwareCodec>>;
}
