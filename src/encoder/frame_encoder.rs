use bytes::Bytes;
use log::{debug, info, trace};
use std::io::{Read, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::assets::{KEYFRAME_INTERVAL_SECS, MAX_FRAME_RATE, MAX_QUANT_SHIFT, MIN_FRAME_RATE};
use crate::capture::RawFrame;
use crate::error::EncoderError;
use crate::pipeline::{EncodedUnit, Timestamp};
use crate::settings::{Bitrate, Resolution};

const BROTLI_BUFFER: usize = 64 * 1024;
const BROTLI_LGWIN: u32 = 22;

/// Frame encoder for one session.
///
/// Frames go in at capture cadence; units come out at the configured frame
/// rate, scaled to the configured resolution.
pub struct FrameEncoder {
    resolution: Resolution,
    width: usize,
    height: usize,
    fps: u32,
    bitrate: Bitrate,
    frame_interval: Duration,
    keyframe_interval: u32,
    quality: u32,

    next_due: Option<Timestamp>,
    frames_since_keyframe: u32,
    sequence: u64,
    quant_shift: u8,

    // last emitted frame, quantized, Y plane then UV plane
    reference: Option<Vec<u8>>,
    current: Vec<u8>,
    delta: Vec<u8>,

    force_keyframe: Arc<AtomicBool>,
}

impl FrameEncoder {
    /// Validate the combination and build an encoder for it.
    pub fn configure(
        resolution: Resolution,
        fps: u32,
        bitrate: Bitrate,
    ) -> Result<Self, EncoderError> {
        if !(MIN_FRAME_RATE..=MAX_FRAME_RATE).contains(&fps) {
            return Err(EncoderError::UnsupportedFrameRate {
                fps,
                min: MIN_FRAME_RATE,
                max: MAX_FRAME_RATE,
            });
        }

        let minimum = resolution.min_bitrate();
        if bitrate < minimum {
            return Err(EncoderError::UnsupportedCombination {
                resolution: resolution.as_str().to_string(),
                bitrate: bitrate.as_str().to_string(),
                minimum: minimum.as_str().to_string(),
            });
        }

        let (width, height) = resolution.dimensions();
        let (width, height) = (width as usize, height as usize);
        // large frames get the fast setting so a frame fits its interval
        let quality = if width * height >= 1920 * 1080 { 1 } else { 4 };

        info!(
            "Using encoder: brotli-nv12 {} @ {}fps, {} (quality {})",
            resolution.as_str(),
            fps,
            bitrate.as_str(),
            quality
        );

        Ok(Self {
            resolution,
            width,
            height,
            fps,
            bitrate,
            frame_interval: Duration::from_micros(1_000_000 / fps as u64),
            keyframe_interval: fps * KEYFRAME_INTERVAL_SECS,
            quality,
            next_due: None,
            frames_since_keyframe: 0,
            sequence: 0,
            quant_shift: 0,
            reference: None,
            current: Vec::new(),
            delta: Vec::new(),
            force_keyframe: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    pub fn fps(&self) -> u32 {
        self.fps
    }

    /// Current quantization shift picked by the rate controller
    pub fn quant_shift(&self) -> u8 {
        self.quant_shift
    }

    /// Make the next emitted unit a keyframe.
    pub fn request_keyframe(&self) {
        self.force_keyframe.store(true, Ordering::SeqCst);
    }

    /// Shared flag for requesting keyframes from other tasks.
    pub fn force_keyframe_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.force_keyframe)
    }

    /// Feed one captured frame.
    ///
    /// Returns `None` when the frame arrives ahead of the next output slot.
    pub fn push(&mut self, frame: &RawFrame) -> Result<Option<EncodedUnit>, EncoderError> {
        if !self.take_slot(frame.captured_at) {
            trace!("Frame {} paced out", frame.sequence);
            return Ok(None);
        }

        self.load_frame(frame)?;

        let forced = self.force_keyframe.swap(false, Ordering::SeqCst);
        let keyframe = forced
            || self.reference.is_none()
            || self.frames_since_keyframe >= self.keyframe_interval;

        let raw = match self.reference.as_deref() {
            Some(reference) if !keyframe => {
                self.delta.clear();
                self.delta
                    .extend(self.current.iter().zip(reference).map(|(c, p)| c ^ p));
                &self.delta
            }
            _ => &self.current,
        };
        let payload = compress(raw, self.quality)?;

        let unit = EncodedUnit {
            sequence: self.sequence,
            pts: frame.captured_at,
            is_keyframe: keyframe,
            quant_shift: self.quant_shift,
            payload,
        };

        self.sequence += 1;
        self.frames_since_keyframe = if keyframe {
            1
        } else {
            self.frames_since_keyframe + 1
        };
        match self.reference.as_mut() {
            Some(reference) => std::mem::swap(reference, &mut self.current),
            None => self.reference = Some(std::mem::take(&mut self.current)),
        }
        self.adjust_rate(unit.size(), keyframe);

        if forced {
            debug!("Forced keyframe at unit {}", unit.sequence);
        }
        Ok(Some(unit))
    }

    fn take_slot(&mut self, captured_at: Timestamp) -> bool {
        let Some(due) = self.next_due else {
            self.next_due = Some(captured_at + self.frame_interval);
            return true;
        };

        // capture clocks jitter; accept frames slightly early
        if captured_at + self.frame_interval / 4 < due {
            return false;
        }

        let next = due + self.frame_interval;
        self.next_due = Some(if next <= captured_at {
            captured_at + self.frame_interval
        } else {
            next
        });
        true
    }

    /// Scale the frame into `current` and drop the quantized low bits.
    fn load_frame(&mut self, frame: &RawFrame) -> Result<(), EncoderError> {
        let (sw, sh) = (frame.width as usize, frame.height as usize);
        if sw < 2 || sh < 2 || sw % 2 != 0 || sh % 2 != 0 {
            return Err(EncoderError::InvalidFrame(format!(
                "unusable size {}x{}",
                sw, sh
            )));
        }
        if frame.luminance.len() < sw * sh || frame.chrominance.len() < sw * sh / 2 {
            return Err(EncoderError::InvalidFrame(format!(
                "planes too short for {}x{}",
                sw, sh
            )));
        }

        let (w, h) = (self.width, self.height);
        let mask = 0xFFu8 << self.quant_shift;
        self.current.resize(w * h * 3 / 2, 0);
        let (luma, chroma) = self.current.split_at_mut(w * h);

        if (sw, sh) == (w, h) {
            for (d, s) in luma.iter_mut().zip(frame.luminance.iter()) {
                *d = s & mask;
            }
            for (d, s) in chroma.iter_mut().zip(frame.chrominance.iter()) {
                *d = s & mask;
            }
            return Ok(());
        }

        // nearest neighbour
        for (y, dst) in luma.chunks_exact_mut(w).enumerate() {
            let src = &frame.luminance[(y * sh / h) * sw..][..sw];
            for (x, d) in dst.iter_mut().enumerate() {
                *d = src[x * sw / w] & mask;
            }
        }

        let (cw, ch) = (w / 2, h / 2);
        let (scw, sch) = (sw / 2, sh / 2);
        for (y, dst) in chroma.chunks_exact_mut(cw * 2).enumerate() {
            let src = &frame.chrominance[(y * sch / ch) * scw * 2..][..scw * 2];
            for (x, pair) in dst.chunks_exact_mut(2).enumerate() {
                let sx = (x * scw / cw) * 2;
                pair[0] = src[sx] & mask;
                pair[1] = src[sx + 1] & mask;
            }
        }
        Ok(())
    }

    fn adjust_rate(&mut self, size: usize, keyframe: bool) {
        let budget = (self.bitrate.bits_per_second() / 8 / self.fps as u64) as usize;
        let allowance = if keyframe { budget * 4 } else { budget };

        if size > allowance && self.quant_shift < MAX_QUANT_SHIFT {
            self.quant_shift += 1;
            debug!(
                "Unit of {} bytes over budget {}, quantization now {}",
                size, allowance, self.quant_shift
            );
        } else if size < allowance / 3 && self.quant_shift > 0 {
            self.quant_shift -= 1;
            debug!("Quantization relaxed to {}", self.quant_shift);
        }
    }
}

/// Brotli-compress a plane buffer.
pub fn compress(data: &[u8], quality: u32) -> Result<Bytes, std::io::Error> {
    let mut writer = brotli::CompressorWriter::new(
        Vec::with_capacity(data.len() / 8 + 64),
        BROTLI_BUFFER,
        quality,
        BROTLI_LGWIN,
    );
    writer.write_all(data)?;
    // into_inner finishes the stream
    Ok(Bytes::from(writer.into_inner()))
}

/// Inverse of [`compress`].
///
/// Inflates at most `size_hint + 1` bytes, so an oversized payload shows up as
/// a length mismatch instead of an unbounded allocation.
pub fn decompress(data: &[u8], size_hint: usize) -> Result<Vec<u8>, std::io::Error> {
    let mut out = Vec::with_capacity(size_hint);
    brotli::Decompressor::new(data, BROTLI_BUFFER)
        .take(size_hint as u64 + 1)
        .read_to_end(&mut out)?;
    Ok(out)
}
