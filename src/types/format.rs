//! Resolution and codec format descriptions

use serde::{Deserialize, Serialize};
use std::fmt;

/// Coded picture size in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// `None` when either dimension is zero ("unknown")
    pub fn known(width: u32, height: u32) -> Option<Self> {
        (width != 0 && height != 0).then_some(Self { width, height })
    }

    /// Size in bytes of one planar YUV 4:2:0 picture at this resolution
    pub fn yuv420_len(&self) -> usize {
        let w = self.width as usize;
        let h = self.height as usize;
        w * h + 2 * (w.div_ceil(2) * h.div_ceil(2))
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Output color format requested from the codec
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColorFormat {
    /// Planar YUV 4:2:0 delivered in CPU-visible output buffers
    Yuv420Planar,
    /// Output composited straight onto a presentation surface
    Surface,
}

/// Format handed to [`HardwareCodec::configure`](crate::HardwareCodec::configure)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoFormat {
    pub mime_type: String,
    pub resolution: Resolution,
    pub color_format: ColorFormat,
}

/// Output format reported by the codec after a format change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputFormat {
    pub resolution: Resolution,
    pub color_format: ColorFormat,
}
