//! Core value types shared across the pipeline.
//!
//! - [`FrameRecord`] is one compressed access-unit with its timing checkpoints
//! - [`Resolution`], [`VideoFormat`] and [`OutputFormat`] describe codec configuration
//! - [`DecodedPicture`] is what a pixel consumer receives in raw-output mode
//! - [`DelayReport`] carries per-frame queue and decode delays for diagnostics
//! - [`UpdateRate`] throttles diagnostic streams
//!
//! ## Usage Example
//!
//! ```rust
//! use streamdecode::types::{FrameRecord, Resolution};
//!
//! let frame = FrameRecord::new(vec![0u8, 0, 0, 1, 0x65], 0, 1, true, 1280, 720);
//! assert!(frame.has_resolution());
//! assert_eq!(Resolution::known(frame.width, frame.height), Some(Resolution::new(1280, 720)));
//! ```

mod format;
mod frame;
mod picture;
mod update_rate;

pub use format::{ColorFormat, OutputFormat, Resolution, VideoFormat};
pub use frame::{FrameRecord, FrameTiming};
pub use picture::{DecodedPicture, DelayReport};
pub use update_rate::UpdateRate;
