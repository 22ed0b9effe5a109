//! Values passed between the pipeline stages

use bytes::Bytes;
use std::ops::Add;
use std::time::Duration;

/// Capture time of a frame, in microseconds since its capture started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Timestamp {
    pub micros: i64,
}

impl Timestamp {
    pub fn from_micros(micros: i64) -> Self {
        Self { micros }
    }

    pub fn from_duration(duration: Duration) -> Self {
        Self::from_micros(duration.as_micros() as i64)
    }
}

impl Add<Duration> for Timestamp {
    type Output = Timestamp;

    fn add(self, rhs: Duration) -> Timestamp {
        Timestamp::from_micros(self.micros + rhs.as_micros() as i64)
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}µs", self.micros)
    }
}

/// One compressed frame produced by the encoder.
///
/// Keyframes carry a whole frame; other units are deltas against the
/// previous unit of the same stream.
#[derive(Clone, PartialEq, Eq)]
pub struct EncodedUnit {
    /// Position in the encoder's output, starting at 0
    pub sequence: u64,
    /// Capture time of the source frame
    pub pts: Timestamp,
    pub is_keyframe: bool,
    /// Low bits dropped from every sample before compression
    pub quant_shift: u8,
    /// Compressed NV12 planes
    pub payload: Bytes,
}

impl EncodedUnit {
    /// Payload size in bytes
    pub fn size(&self) -> usize {
        self.payload.len()
    }
}

impl std::fmt::Debug for EncodedUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncodedUnit")
            .field("sequence", &self.sequence)
            .field("pts", &self.pts)
            .field("keyframe", &self.is_keyframe)
            .field("quant_shift", &self.quant_shift)
            .field("size", &self.size())
            .finish()
    }
}
