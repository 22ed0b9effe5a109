//! Stream framing
//!
//! A stream opens with a fixed 16 byte header, then carries encoded units back
//! to back, each prefixed by its length. All integers are big-endian.
//!
//! ```text
//! header: "MIRR" | version u8 | codec u8 | fps u8 | flags u8 | width u32 | height u32
//! unit:   len u32 | sequence u64 | pts u64 | flags u8 | quant u8 | payload
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::assets::{CODEC_BROTLI_NV12, MAX_UNIT_SIZE, STREAM_MAGIC, STREAM_VERSION};
use crate::error::WireError;
use crate::pipeline::{EncodedUnit, Timestamp};

pub const HEADER_LEN: usize = 16;
/// Unit fields between the length prefix and the payload
const UNIT_FIELDS_LEN: usize = 8 + 8 + 1 + 1;

const HEADER_FLAG_AUDIO: u8 = 0x01;
const UNIT_FLAG_KEYFRAME: u8 = 0x01;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamHeader {
    pub fps: u8,
    pub width: u32,
    pub height: u32,
    pub audio: bool,
}

impl StreamHeader {
    pub fn new(fps: u32, (width, height): (u32, u32), audio: bool) -> Self {
        Self {
            fps: fps.min(u8::MAX as u32) as u8,
            width,
            height,
            audio,
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(HEADER_LEN);
        buf.put_slice(&STREAM_MAGIC);
        buf.put_u8(STREAM_VERSION);
        buf.put_u8(CODEC_BROTLI_NV12);
        buf.put_u8(self.fps);
        buf.put_u8(if self.audio { HEADER_FLAG_AUDIO } else { 0 });
        buf.put_u32(self.width);
        buf.put_u32(self.height);
        buf.freeze()
    }

    pub fn decode(raw: &[u8; HEADER_LEN]) -> Result<Self, WireError> {
        let mut buf = &raw[..];

        let mut magic = [0u8; 4];
        buf.copy_to_slice(&mut magic);
        if magic != STREAM_MAGIC {
            return Err(WireError::BadMagic(magic));
        }
        let version = buf.get_u8();
        if version != STREAM_VERSION {
            return Err(WireError::UnsupportedVersion(version));
        }
        let codec = buf.get_u8();
        if codec != CODEC_BROTLI_NV12 {
            return Err(WireError::UnsupportedCodec(codec));
        }

        let fps = buf.get_u8();
        let flags = buf.get_u8();
        Ok(Self {
            fps,
            audio: flags & HEADER_FLAG_AUDIO != 0,
            width: buf.get_u32(),
            height: buf.get_u32(),
        })
    }
}

/// Frame one unit for the wire.
pub fn encode_unit(unit: &EncodedUnit) -> Bytes {
    let len = UNIT_FIELDS_LEN + unit.payload.len();
    let mut buf = BytesMut::with_capacity(4 + len);
    buf.put_u32(len as u32);
    buf.put_u64(unit.sequence);
    buf.put_u64(unit.pts.micros.max(0) as u64);
    buf.put_u8(if unit.is_keyframe { UNIT_FLAG_KEYFRAME } else { 0 });
    buf.put_u8(unit.quant_shift);
    buf.put_slice(&unit.payload);
    buf.freeze()
}

pub async fn read_header<R>(reader: &mut R) -> Result<StreamHeader, WireError>
where
    R: AsyncRead + Unpin,
{
    let mut raw = [0u8; HEADER_LEN];
    reader.read_exact(&mut raw).await?;
    StreamHeader::decode(&raw)
}

/// Read the next unit, or `None` once the peer closed the stream between units.
pub async fn read_unit<R>(reader: &mut R) -> Result<Option<EncodedUnit>, WireError>
where
    R: AsyncRead + Unpin,
{
    let len = match reader.read_u32().await {
        Ok(len) => len as usize,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    if len > MAX_UNIT_SIZE {
        return Err(WireError::UnitTooLarge(len));
    }
    if len < UNIT_FIELDS_LEN {
        return Err(WireError::Truncated(len));
    }

    let mut body = BytesMut::zeroed(len);
    reader.read_exact(&mut body).await.map_err(|e| match e.kind() {
        std::io::ErrorKind::UnexpectedEof => WireError::Truncated(len),
        _ => WireError::Io(e),
    })?;

    let sequence = body.get_u64();
    let pts = Timestamp::from_micros(body.get_u64() as i64);
    let flags = body.get_u8();
    let quant_shift = body.get_u8();

    Ok(Some(EncodedUnit {
        sequence,
        pts,
        is_keyframe: flags & UNIT_FLAG_KEYFRAME != 0,
        quant_shift,
        payload: body.freeze(),
    }))
}
