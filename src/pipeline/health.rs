//! Health monitoring and metrics for a mirroring session

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Health metrics for a session
///
/// Tracks counters shared by the capture, encode and transmit stages.
/// All fields use atomic operations for thread-safe access.
pub struct PipelineHealth {
    /// Frames the encode stage picked up
    pub frames_captured: AtomicU64,

    /// Frames overwritten before the encoder saw them, or units dropped on a full queue
    pub frame_drops: AtomicU64,

    /// Units produced by the encoder
    pub units_encoded: AtomicU64,

    /// Keyframes produced by the encoder
    pub keyframes_encoded: AtomicU64,

    /// Units written to the client
    pub units_sent: AtomicU64,

    /// Bytes written to the client, framing included
    pub bytes_sent: AtomicU64,

    /// Connections refused because a client was already attached
    pub rejected_clients: AtomicU64,

    /// Failed writes
    pub network_errors: AtomicU64,

    /// Timestamp (as Unix microseconds) of the last encoded unit
    pub last_unit_time: AtomicU64,
}

fn now_micros() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or_default()
}

impl PipelineHealth {
    /// Create a new health metrics instance
    pub fn new() -> Self {
        Self {
            frames_captured: AtomicU64::new(0),
            frame_drops: AtomicU64::new(0),
            units_encoded: AtomicU64::new(0),
            keyframes_encoded: AtomicU64::new(0),
            units_sent: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            rejected_clients: AtomicU64::new(0),
            network_errors: AtomicU64::new(0),
            last_unit_time: AtomicU64::new(now_micros()),
        }
    }

    pub fn record_frame_captured(&self) {
        self.frames_captured.fetch_add(1, Ordering::Relaxed);
    }

    /// Record `count` dropped frames
    pub fn record_frame_drops(&self, count: u64) {
        self.frame_drops.fetch_add(count, Ordering::Relaxed);
    }

    /// Record a unit leaving the encoder
    pub fn record_unit(&self, is_keyframe: bool) {
        self.last_unit_time.store(now_micros(), Ordering::Relaxed);
        self.units_encoded.fetch_add(1, Ordering::Relaxed);
        if is_keyframe {
            self.keyframes_encoded.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record a unit written to the client
    pub fn record_sent(&self, bytes: usize) {
        self.units_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_rejected_client(&self) {
        self.rejected_clients.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_network_error(&self) {
        self.network_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn frames_captured(&self) -> u64 {
        self.frames_captured.load(Ordering::Relaxed)
    }

    pub fn frame_drops(&self) -> u64 {
        self.frame_drops.load(Ordering::Relaxed)
    }

    pub fn units_encoded(&self) -> u64 {
        self.units_encoded.load(Ordering::Relaxed)
    }

    pub fn keyframes_encoded(&self) -> u64 {
        self.keyframes_encoded.load(Ordering::Relaxed)
    }

    pub fn units_sent(&self) -> u64 {
        self.units_sent.load(Ordering::Relaxed)
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent.load(Ordering::Relaxed)
    }

    pub fn rejected_clients(&self) -> u64 {
        self.rejected_clients.load(Ordering::Relaxed)
    }

    pub fn network_errors(&self) -> u64 {
        self.network_errors.load(Ordering::Relaxed)
    }

    /// Calculate the frame drop rate as a percentage of captured frames
    pub fn frame_drop_rate(&self) -> f64 {
        let drops = self.frame_drops();
        let seen = self.frames_captured() + drops;
        if seen == 0 {
            return 0.0;
        }
        (drops as f64 / seen as f64) * 100.0
    }

    /// Check if the encoder has stalled (no units for given duration)
    pub fn is_stalled(&self, threshold: Duration) -> bool {
        let last = self.last_unit_time.load(Ordering::Relaxed);
        now_micros().saturating_sub(last) > threshold.as_micros() as u64
    }

    /// Get a summary of health metrics
    pub fn summary(&self) -> HealthSummary {
        HealthSummary {
            frames_captured: self.frames_captured(),
            frame_drops: self.frame_drops(),
            frame_drop_rate: self.frame_drop_rate(),
            units_encoded: self.units_encoded(),
            keyframes_encoded: self.keyframes_encoded(),
            units_sent: self.units_sent(),
            bytes_sent: self.bytes_sent(),
            rejected_clients: self.rejected_clients(),
            network_errors: self.network_errors(),
        }
    }
}

impl Default for PipelineHealth {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of health metrics
#[derive(Debug, Clone, PartialEq)]
pub struct HealthSummary {
    pub frames_captured: u64,
    pub frame_drops: u64,
    pub frame_drop_rate: f64,
    pub units_encoded: u64,
    pub keyframes_encoded: u64,
    pub units_sent: u64,
    pub bytes_sent: u64,
    pub rejected_clients: u64,
    pub network_errors: u64,
}

impl std::fmt::Display for HealthSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Health: {} frames ({} drops, {:.2}%), {} units ({} keyframes), {} sent ({} bytes), {} rejected clients, {} network errors",
            self.frames_captured,
            self.frame_drops,
            self.frame_drop_rate,
            self.units_encoded,
            self.keyframes_encoded,
            self.units_sent,
            self.bytes_sent,
            self.rejected_clients,
            self.network_errors
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_metrics() {
        let health = PipelineHealth::new();

        health.record_frame_captured();
        health.record_frame_captured();
        health.record_frame_captured();
        health.record_unit(true);
        health.record_unit(false);
        health.record_sent(1000);
        health.record_sent(500);

        let summary = health.summary();
        assert_eq!(summary.frames_captured, 3);
        assert_eq!(summary.units_encoded, 2);
        assert_eq!(summary.keyframes_encoded, 1);
        assert_eq!(summary.bytes_sent, 1500);
        assert_eq!(summary.frame_drops, 0);
        assert_eq!(summary.frame_drop_rate, 0.0);

        health.record_frame_drops(1);
        assert_eq!(health.frame_drops(), 1);
        assert!((health.frame_drop_rate() - 25.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_stall_detection() {
        let health = PipelineHealth::new();

        assert!(!health.is_stalled(Duration::from_secs(1)));

        health.record_unit(false);
        std::thread::sleep(Duration::from_millis(150));

        assert!(health.is_stalled(Duration::from_millis(100)));
    }
}
