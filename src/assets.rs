use std::time::Duration;

pub const FRAME_RATE: u32 = 30;
pub const MIN_FRAME_RATE: u32 = 15;
pub const MAX_FRAME_RATE: u32 = 60;
// fastest display cadence a capture backend will drive
pub const MAX_REFRESH_HZ: u32 = 1_000;

// connections
pub const CAST_SERVICE_PORT: u16 = 8080;
pub const WRITE_TIMEOUT: Duration = Duration::from_secs(5);
pub const START_TIMEOUT: Duration = Duration::from_secs(15);

// persisted settings
pub const SETTINGS_NAMESPACE: &str = "mirroring_settings";

// pipeline
pub const UNIT_QUEUE_DEPTH: usize = 8;
pub const KEYFRAME_INTERVAL_SECS: u32 = 2;
pub const MAX_QUANT_SHIFT: u8 = 4;
pub const HEALTH_LOG_INTERVAL: Duration = Duration::from_secs(30);

// wire
pub const STREAM_MAGIC: [u8; 4] = *b"MIRR";
pub const STREAM_VERSION: u8 = 1;
pub const CODEC_BROTLI_NV12: u8 = 1;
pub const MAX_UNIT_SIZE: usize = 64 * 1024 * 1024;
