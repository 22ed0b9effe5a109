use log::{debug, warn};

use crate::decoder::DecodedFrame;
use crate::encoder::decompress;
use crate::error::DecodeError;
use crate::pipeline::EncodedUnit;

/// Rebuilds frames from a unit stream of a fixed size.
///
/// After a gap the decoder discards deltas until the next keyframe.
pub struct FrameDecoder {
    width: u32,
    height: u32,
    reference: Option<Vec<u8>>,
    last_sequence: Option<u64>,
    keyframes: u64,
}

impl FrameDecoder {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            reference: None,
            last_sequence: None,
            keyframes: 0,
        }
    }

    pub fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Keyframes decoded so far
    pub fn keyframes(&self) -> u64 {
        self.keyframes
    }

    fn frame_size(&self) -> usize {
        (self.width as usize) * (self.height as usize) * 3 / 2
    }

    /// Forget the reference frame; the next unit must be a keyframe.
    pub fn reset(&mut self) {
        self.reference = None;
        self.last_sequence = None;
    }

    pub fn decode(&mut self, unit: &EncodedUnit) -> Result<DecodedFrame, DecodeError> {
        if !unit.is_keyframe {
            if self.reference.is_none() {
                return Err(DecodeError::MissingKeyframe);
            }
            let expected = self.last_sequence.map_or(0, |s| s + 1);
            if unit.sequence != expected {
                warn!("Unit {} arrived, expected {}", unit.sequence, expected);
                self.reset();
                return Err(DecodeError::SequenceGap {
                    expected,
                    got: unit.sequence,
                });
            }
        }

        let expected = self.frame_size();
        let data = decompress(&unit.payload, expected)?;
        if data.len() != expected {
            self.reset();
            return Err(DecodeError::SizeMismatch {
                expected,
                got: data.len(),
            });
        }

        let frame = match self.reference.take() {
            Some(mut reference) if !unit.is_keyframe => {
                for (r, d) in reference.iter_mut().zip(&data) {
                    *r ^= d;
                }
                reference
            }
            _ => {
                debug!("Keyframe {} ({} bytes)", unit.sequence, unit.size());
                self.keyframes += 1;
                data
            }
        };

        let decoded = DecodedFrame {
            sequence: unit.sequence,
            width: self.width,
            height: self.height,
            data: frame.clone(),
        };
        self.reference = Some(frame);
        self.last_sequence = Some(unit.sequence);
        Ok(decoded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::RawFrame;
    use crate::encoder::FrameEncoder;
    use crate::pipeline::Timestamp;
    use crate::settings::{Bitrate, Resolution};
    use bytes::Bytes;

    fn frame(sequence: u64, (w, h): (u32, u32)) -> RawFrame {
        let luma: Vec<u8> = (0..w * h)
            .map(|i| ((i % w) + (i / w) * 2 + sequence as u32 * 5) as u8)
            .collect();
        let chroma: Vec<u8> = (0..w * h / 2).map(|i| (i % 7) as u8 + 120).collect();
        RawFrame::new(
            sequence,
            Timestamp::from_micros(sequence as i64 * 33_334),
            w,
            h,
            Bytes::from(luma),
            Bytes::from(chroma),
        )
    }

    fn planes(frame: &RawFrame) -> Vec<u8> {
        [frame.luminance.as_ref(), frame.chrominance.as_ref()].concat()
    }

    #[test]
    fn test_keyframe_and_deltas_reproduce_source() {
        let mut encoder = FrameEncoder::configure(Resolution::Sd, 30, Bitrate::Mbps10).unwrap();
        let mut decoder = FrameDecoder::new(854, 480);

        for seq in 0..4 {
            let source = frame(seq, (854, 480));
            let unit = encoder.push(&source).unwrap().unwrap();
            assert_eq!(unit.quant_shift, 0);

            let decoded = decoder.decode(&unit).unwrap();
            assert_eq!(decoded.sequence, seq);
            assert_eq!(decoded.data, planes(&source));
        }
    }

    #[test]
    fn test_delta_before_keyframe_is_rejected() {
        let mut encoder = FrameEncoder::configure(Resolution::Sd, 30, Bitrate::Mbps10).unwrap();
        let mut decoder = FrameDecoder::new(854, 480);

        let _key = encoder.push(&frame(0, (854, 480))).unwrap().unwrap();
        let delta = encoder.push(&frame(1, (854, 480))).unwrap().unwrap();
        assert!(matches!(
            decoder.decode(&delta),
            Err(DecodeError::MissingKeyframe)
        ));
    }

    #[test]
    fn test_gap_waits_for_next_keyframe() {
        let mut encoder = FrameEncoder::configure(Resolution::Sd, 30, Bitrate::Mbps10).unwrap();
        let mut decoder = FrameDecoder::new(854, 480);

        let key = encoder.push(&frame(0, (854, 480))).unwrap().unwrap();
        let _lost = encoder.push(&frame(1, (854, 480))).unwrap().unwrap();
        let late = encoder.push(&frame(2, (854, 480))).unwrap().unwrap();

        decoder.decode(&key).unwrap();
        assert!(matches!(
            decoder.decode(&late),
            Err(DecodeError::SequenceGap { expected: 1, got: 2 })
        ));
        assert!(matches!(
            decoder.decode(&late),
            Err(DecodeError::MissingKeyframe)
        ));

        encoder.request_keyframe();
        let source = frame(3, (854, 480));
        let recovery = encoder.push(&source).unwrap().unwrap();
        assert_eq!(decoder.decode(&recovery).unwrap().data, planes(&source));
    }

    #[test]
    fn test_small_capture_is_scaled_up() {
        let mut encoder = FrameEncoder::configure(Resolution::Sd, 30, Bitrate::Mbps10).unwrap();
        let mut decoder = FrameDecoder::new(854, 480);

        let source = frame(0, (64, 32));
        let decoded = decoder
            .decode(&encoder.push(&source).unwrap().unwrap())
            .unwrap();

        assert_eq!(decoded.luminance().len(), 854 * 480);
        assert_eq!(decoded.chrominance().len(), 854 * 480 / 2);
        assert_eq!(decoded.luminance()[0], source.luminance[0]);
        assert_eq!(decoded.luminance()[853], source.luminance[63]);
    }

    #[test]
    fn test_wrong_size_is_reported() {
        let mut encoder = FrameEncoder::configure(Resolution::Sd, 30, Bitrate::Mbps10).unwrap();
        let mut decoder = FrameDecoder::new(1280, 720);

        let unit = encoder.push(&frame(0, (854, 480))).unwrap().unwrap();
        assert!(matches!(
            decoder.decode(&unit),
            Err(DecodeError::SizeMismatch { .. })
        ));
    }

    #[test]
    fn test_oversized_payload_is_not_inflated() {
        let mut decoder = FrameDecoder::new(2, 2);
        let unit = EncodedUnit {
            sequence: 0,
            pts: Timestamp::default(),
            is_keyframe: true,
            quant_shift: 0,
            payload: crate::encoder::compress(&vec![0u8; 16 * 1024 * 1024], 4).unwrap(),
        };

        assert!(matches!(
            decoder.decode(&unit),
            Err(DecodeError::SizeMismatch { expected: 6, got: 7 })
        ));
    }
}
