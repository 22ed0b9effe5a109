//! Video encoder
//!
//! Turns raw NV12 frames into compressed units: keyframes carry a whole
//! quantized frame, deltas carry its XOR against the previous one, and both
//! are brotli-compressed. A small rate controller trades sample precision
//! for size to stay near the configured bitrate.

mod frame_encoder;

pub use frame_encoder::{FrameEncoder, compress, decompress};
