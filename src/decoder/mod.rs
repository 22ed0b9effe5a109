//! Video decoding module
//!
//! Reverses the frame encoder for the receiving side: keyframes replace the
//! reference frame, deltas are XORed onto it.

mod frame_decoder;

pub use frame_decoder::FrameDecoder;

/// Decoded NV12 frame.
#[derive(Debug, Clone)]
pub struct DecodedFrame {
    pub sequence: u64,
    pub width: u32,
    pub height: u32,
    /// Y plane followed by the interleaved UV plane
    pub data: Vec<u8>,
}

impl DecodedFrame {
    pub fn luminance(&self) -> &[u8] {
        &self.data[..(self.width * self.height) as usize]
    }

    pub fn chrominance(&self) -> &[u8] {
        &self.data[(self.width * self.height) as usize..]
    }
}
