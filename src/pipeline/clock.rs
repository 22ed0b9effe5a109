//! Capture clock: frame timestamps and sequence numbers

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use super::types::Timestamp;

/// Clock owned by one capture.
///
/// Timestamps count from the moment the capture started, so the first frame
/// lands near zero. Clones share the base and the sequence counter.
#[derive(Clone)]
pub struct MediaClock {
    started: Instant,
    sequence: Arc<AtomicU64>,
}

impl MediaClock {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            sequence: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn now(&self) -> Timestamp {
        Timestamp::from_duration(self.started.elapsed())
    }

    /// Sequence number for the next produced frame
    pub fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for MediaClock {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MediaClock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaClock")
            .field("now", &self.now())
            .field("produced", &self.sequence.load(Ordering::Relaxed))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_timestamps_count_from_start() {
        let clock = MediaClock::new();
        let first = clock.now();
        thread::sleep(Duration::from_millis(10));

        assert!(first.micros < 10_000);
        assert!(clock.now().micros >= 10_000, "clock only reached {}", clock.now());
    }

    #[test]
    fn test_clones_share_the_sequence() {
        let clock = MediaClock::new();
        let other = clock.clone();

        assert_eq!(clock.next_sequence(), 0);
        assert_eq!(other.next_sequence(), 1);
        assert_eq!(clock.next_sequence(), 2);
    }
}
