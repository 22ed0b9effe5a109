//! Screen capture module
//!
//! A capture source turns a display into a stream of raw NV12 frames once the
//! user has consented. Frames are handed over through a single newest-wins
//! slot: a consumer that falls behind skips frames instead of queueing them.

pub mod consent;
mod generic;
mod handle;
mod traits;

pub use consent::{CaptureConsent, ConsentGate, ConsentResult, DeferredConsent, TerminalConsent};
pub use generic::{GenericDisplay, GenericScreenCapture};
pub use handle::CaptureHandle;
pub use traits::{DisplayInfo, ScreenCapture};

use crate::pipeline::Timestamp;
use bytes::Bytes;

/// One raw frame in NV12 layout.
///
/// `luminance` holds `width * height` bytes; `chrominance` holds interleaved
/// U/V pairs for every 2x2 block, `width * height / 2` bytes.
#[derive(Clone)]
pub struct RawFrame {
    /// Position in the capture stream, starting at 0
    pub sequence: u64,
    pub captured_at: Timestamp,
    pub width: u32,
    pub height: u32,
    pub luminance: Bytes,
    pub chrominance: Bytes,
}

impl RawFrame {
    pub fn new(
        sequence: u64,
        captured_at: Timestamp,
        width: u32,
        height: u32,
        luminance: Bytes,
        chrominance: Bytes,
    ) -> Self {
        debug_assert_eq!(luminance.len(), (width * height) as usize);
        debug_assert_eq!(chrominance.len(), (width * height / 2) as usize);
        Self {
            sequence,
            captured_at,
            width,
            height,
            luminance,
            chrominance,
        }
    }

    pub fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

impl std::fmt::Debug for RawFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawFrame")
            .field("sequence", &self.sequence)
            .field("captured_at", &self.captured_at)
            .field("width", &self.width)
            .field("height", &self.height)
            .finish()
    }
}

/// NV12 needs even dimensions. Rounds `wanted` (clamped to `native`) up to
/// the next even value, or down when that would exceed `native`; never below 2.
pub fn even_within(wanted: u32, native: u32) -> u32 {
    let v = wanted.min(native);
    let up = v + v % 2;
    if up <= native { up.max(2) } else { (v - v % 2).max(2) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_even_within_native() {
        assert_eq!(even_within(101, 640), 102);
        assert_eq!(even_within(1080, 767), 766);
        assert_eq!(even_within(767, 767), 766);
        assert_eq!(even_within(1366, 1366), 1366);
        assert_eq!(even_within(1, 1080), 2);
    }
}
