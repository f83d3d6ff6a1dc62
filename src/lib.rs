//! Real-time video stream decoding pipeline.
//!
//! Streamdecode sits between a bitstream parser and a display. Compressed H.264
//! access-units go in through a [`FrameSink`]; decoded pictures come out either
//! to a registered pixel consumer or, when a presentation surface is configured,
//! straight onto that surface through the hardware path.
//!
//! # Features
//!
//! - **Freshness first**: a bounded drop-oldest queue keeps latency flat when
//!   the decoder falls behind
//! - **Mid-GOP starts**: a synthetic reference frame primes the decoder so a
//!   stream joined between key frames still produces pictures
//! - **Self-healing**: codec errors, resolution changes and output-buffer churn
//!   rebuild the decoder session instead of surfacing as failures
//! - **Pluggable codecs**: platform decoders implement [`HardwareCodec`] and
//!   [`CodecFactory`]; an openh264 software backend ships behind the `openh264`
//!   feature
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use futures::StreamExt;
//! use streamdecode::{DecoderConfig, ReferenceFrameProvider, StreamDecoder, UpdateRate};
//! # use streamdecode::CodecFactory;
//!
//! # async fn run(factory: Arc<dyn CodecFactory>) -> streamdecode::Result<()> {
//! let config = DecoderConfig::load("decoder.yaml").await?;
//! let mut decoder = StreamDecoder::new(config, factory, ReferenceFrameProvider::unavailable())?;
//! decoder.register_pixel_consumer(|picture: streamdecode::types::DecodedPicture| {
//!     println!("picture {}x{}", picture.width, picture.height);
//! })?;
//!
//! let mut delays = decoder.delay_reports(UpdateRate::Max(1));
//! tokio::spawn(async move {
//!     while let Some(report) = delays.next().await {
//!         println!("decode delay {:?}", report.decode_delay);
//!     }
//! });
//!
//! let sink = decoder.sink();
//! // Called by the bitstream parser for every access-unit:
//! // sink.on_access_unit(bytes, len, sequence, is_key_frame, width, height);
//! # let _ = sink;
//!
//! decoder.destroy().await?;
//! # Ok(())
//! # }
//! ```

// Core types and error handling
mod error;
#[cfg(any(test, feature = "benchmark"))]
pub mod test_utils;
pub mod types;

// Configuration and codec seams
pub mod codec;
pub mod codecs;
pub mod config;
pub mod reference;

// Pipeline stages
pub mod decode_loop;
pub mod dispatch;
pub mod pipeline;
pub mod queue;
pub mod session;
pub mod stream;
pub mod watchdog;

// Core exports
pub use error::*;
pub use types::UpdateRate;

pub use codec::{CodecFactory, CodecOutput, HardwareCodec, OutputBufferInfo, PresentationSurface, SurfaceRef};
pub use config::{AVC_MIME_TYPE, DecoderConfig};
pub use decode_loop::{DecoderStatus, LoopState};
pub use dispatch::PixelConsumer;
pub use pipeline::{FrameSink, StreamDecoder};
pub use queue::FrameQueue;
pub use reference::{AssetSource, DeviceModel, DirectoryAssets, ReferenceFrameProvider, StaticAssets};
pub use session::{DecoderSession, ReferenceState};
