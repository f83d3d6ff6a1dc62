//! Built-in codec backends.
//!
//! Platform hardware decoders live outside this crate and plug in through
//! [`CodecFactory`](crate::CodecFactory). The software backend here decodes
//! H.264 on the CPU with openh264 and is meant for development machines and
//! CI, where no hardware decoder is reachable.

#[cfg(feature = "openh264")]
mod software;

#[cfg(feature = "openh264")]
pub use software::{SoftwareCodec, SoftwareCodecFactory};
