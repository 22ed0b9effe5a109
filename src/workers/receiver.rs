use log::{debug, info, warn};
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;

use crate::decoder::{DecodedFrame, FrameDecoder};
use crate::error::{DecodeError, ReceiveError};
use crate::utils::net::StreamHeader;
use crate::utils::net::wire::{read_header, read_unit};

/// What a receiving run saw.
#[derive(Debug, Clone, PartialEq)]
pub struct ReceiveStats {
    pub header: StreamHeader,
    pub units: u64,
    pub keyframes: u64,
    pub payload_bytes: u64,
    pub decode_errors: u64,
    pub elapsed: Duration,
}

impl ReceiveStats {
    pub fn units_per_second(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs <= 0.0 {
            return 0.0;
        }
        self.units as f64 / secs
    }
}

impl std::fmt::Display for ReceiveStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}x{} @ {}fps: {} units ({} keyframes, {} bytes) in {:.1?}, {:.1} units/s, {} decode errors",
            self.header.width,
            self.header.height,
            self.header.fps,
            self.units,
            self.keyframes,
            self.payload_bytes,
            self.elapsed,
            self.units_per_second(),
            self.decode_errors
        )
    }
}

/// Client side of a mirroring stream.
pub struct Receiver {
    stream: TcpStream,
    header: StreamHeader,
    decoder: FrameDecoder,
}

impl Receiver {
    pub async fn connect(addr: SocketAddr) -> Result<Self, ReceiveError> {
        let mut stream = TcpStream::connect(addr).await?;
        let header = read_header(&mut stream).await?;
        info!(
            "Receiving {}x{} @ {}fps from {}",
            header.width, header.height, header.fps, addr
        );

        Ok(Self {
            stream,
            decoder: FrameDecoder::new(header.width, header.height),
            header,
        })
    }

    pub fn header(&self) -> &StreamHeader {
        &self.header
    }

    /// Read and decode the next unit.
    ///
    /// `Ok(None)` means the caster closed the stream. Decode errors leave the
    /// receiver usable; it resynchronizes on the next keyframe.
    pub async fn next_frame(&mut self) -> Result<Option<(DecodedFrame, usize)>, ReceiveError> {
        let Some(unit) = read_unit(&mut self.stream).await? else {
            return Ok(None);
        };
        let frame = self.decoder.decode(&unit)?;
        Ok(Some((frame, unit.size())))
    }

    /// Receive until the stream ends, `max_units` arrived, or `cancel` fires.
    pub async fn run(
        mut self,
        max_units: Option<u64>,
        cancel: CancellationToken,
    ) -> Result<ReceiveStats, ReceiveError> {
        let started = Instant::now();
        let mut stats = ReceiveStats {
            header: self.header,
            units: 0,
            keyframes: 0,
            payload_bytes: 0,
            decode_errors: 0,
            elapsed: Duration::ZERO,
        };

        while max_units.is_none_or(|max| stats.units < max) {
            let next = tokio::select! {
                _ = cancel.cancelled() => break,
                next = self.next_frame() => next,
            };

            match next {
                Ok(Some((frame, size))) => {
                    stats.units += 1;
                    stats.payload_bytes += size as u64;
                    if frame.sequence % 100 == 0 {
                        debug!("Frame {} decoded", frame.sequence);
                    }
                }
                Ok(None) => {
                    info!("Caster closed the stream");
                    break;
                }
                Err(ReceiveError::Decode(e)) => {
                    stats.units += 1;
                    stats.decode_errors += 1;
                    match e {
                        DecodeError::MissingKeyframe => debug!("Waiting for a keyframe"),
                        other => warn!("Dropping unit: {}", other),
                    }
                }
                Err(e) => return Err(e),
            }
        }

        stats.keyframes = self.decoder.keyframes();
        stats.elapsed = started.elapsed();
        Ok(stats)
    }
}
