//! Error types shared across the mirroring pipeline.

use std::time::Duration;

/// Failures of a mirroring session as seen by its callers.
///
/// Kept `Clone` so the last failure can be published with the session status.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("screen capture permission denied")]
    PermissionDenied,

    #[error("resource unavailable: {0}")]
    ResourceUnavailable(String),

    #[error("port {port} unavailable: {reason}")]
    PortInUse { port: u16, reason: String },

    #[error("mirroring session already active")]
    AlreadyActive,

    #[error("mirroring stopped unexpectedly: {0}")]
    WriteFailure(String),

    #[error("session did not become active within {0:?}")]
    Timeout(Duration),

    #[error("settings error: {0}")]
    Settings(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CaptureError {
    #[error("screen capture permission denied")]
    PermissionDenied,

    #[error("display unavailable: {0}")]
    DisplayUnavailable(String),
}

#[derive(Debug, thiserror::Error)]
pub enum EncoderError {
    #[error("unsupported frame rate {fps} (expected {min}..={max})")]
    UnsupportedFrameRate { fps: u32, min: u32, max: u32 },

    #[error("{resolution} needs at least {minimum}, got {bitrate}")]
    UnsupportedCombination {
        resolution: String,
        bitrate: String,
        minimum: String,
    },

    #[error("malformed frame: {0}")]
    InvalidFrame(String),

    #[error("compression failed: {0}")]
    Compression(#[from] std::io::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("settings io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("settings file is corrupted: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("{key} must be within {min}..={max}, got {value}")]
    OutOfRange {
        key: &'static str,
        value: i64,
        min: i64,
        max: i64,
    },

    #[error("unknown settings key: {0}")]
    UnknownKey(String),

    #[error("invalid value {value:?} for {key}")]
    InvalidValue { key: String, value: String },
}

#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("stream io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("not a mirroring stream (magic {0:?})")]
    BadMagic([u8; 4]),

    #[error("unsupported stream version {0}")]
    UnsupportedVersion(u8),

    #[error("unsupported codec {0}")]
    UnsupportedCodec(u8),

    #[error("unit of {0} bytes exceeds limit")]
    UnitTooLarge(usize),

    #[error("unit truncated: {0} bytes")]
    Truncated(usize),
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("delta unit without a reference keyframe")]
    MissingKeyframe,

    #[error("sequence gap: expected {expected}, got {got}")]
    SequenceGap { expected: u64, got: u64 },

    #[error("decompression failed: {0}")]
    Decompress(#[from] std::io::Error),

    #[error("decoded {got} bytes, expected {expected}")]
    SizeMismatch { expected: usize, got: usize },
}

impl From<CaptureError> for SessionError {
    fn from(e: CaptureError) -> Self {
        match e {
            CaptureError::PermissionDenied => SessionError::PermissionDenied,
            CaptureError::DisplayUnavailable(reason) => {
                SessionError::ResourceUnavailable(format!("display: {}", reason))
            }
        }
    }
}

impl From<EncoderError> for SessionError {
    fn from(e: EncoderError) -> Self {
        SessionError::ResourceUnavailable(format!("encoder: {}", e))
    }
}

impl From<SettingsError> for SessionError {
    fn from(e: SettingsError) -> Self {
        SessionError::Settings(e.to_string())
    }
}

/// Failures of the receiving side.
#[derive(Debug, thiserror::Error)]
pub enum ReceiveError {
    #[error(transparent)]
    Wire(#[from] WireError),

    #[error(transparent)]
    Decode(#[from] DecodeError),
}

impl From<std::io::Error> for ReceiveError {
    fn from(e: std::io::Error) -> Self {
        ReceiveError::Wire(WireError::Io(e))
    }
}
