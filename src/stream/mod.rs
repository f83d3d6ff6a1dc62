//! Stream adapters for diagnostic feeds

mod throttle;

pub use throttle::{Throttle, ThrottleExt};
