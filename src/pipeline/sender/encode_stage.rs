//! Encode stage for the sender pipeline
//!
//! Takes the newest frame from the capture slot, runs it through the frame
//! encoder and queues the resulting units for the sender.

use async_trait::async_trait;
use log::{debug, info};
use std::sync::Arc;
use tokio::runtime::RuntimeFlavor;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::capture::RawFrame;
use crate::encoder::FrameEncoder;
use crate::error::{EncoderError, SessionError};
use crate::pipeline::health::PipelineHealth;
use crate::pipeline::types::EncodedUnit;
use crate::pipeline::PipelineStage;

/// Encode stage: transforms captured frames into encoded units
pub struct EncodeStage {
    encoder: FrameEncoder,
    frames: watch::Receiver<Option<RawFrame>>,
    output_tx: mpsc::Sender<EncodedUnit>,
    health: Arc<PipelineHealth>,
    cancel: CancellationToken,
    /// Capture sequence of the last frame taken from the slot
    last_frame: Option<u64>,
}

impl EncodeStage {
    pub fn new(
        encoder: FrameEncoder,
        frames: watch::Receiver<Option<RawFrame>>,
        output_tx: mpsc::Sender<EncodedUnit>,
        health: Arc<PipelineHealth>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            encoder,
            frames,
            output_tx,
            health,
            cancel,
            last_frame: None,
        }
    }

    /// Count frames the capture overwrote before we got to them.
    fn track_frame(&mut self, frame: &RawFrame) {
        if let Some(last) = self.last_frame {
            let missed = frame.sequence.saturating_sub(last + 1);
            if missed > 0 {
                self.health.record_frame_drops(missed);
            }
        }
        self.last_frame = Some(frame.sequence);
        self.health.record_frame_captured();
    }

    fn encode(&mut self, frame: &RawFrame) -> Result<Option<EncodedUnit>, EncoderError> {
        // compression is CPU bound; keep other tasks moving when we can
        match tokio::runtime::Handle::try_current().map(|h| h.runtime_flavor()) {
            Ok(RuntimeFlavor::MultiThread) => {
                tokio::task::block_in_place(|| self.encoder.push(frame))
            }
            _ => self.encoder.push(frame),
        }
    }
}

#[async_trait]
impl PipelineStage for EncodeStage {
    async fn run(&mut self) -> Result<(), SessionError> {
        info!("EncodeStage: started");
        let mut total_units = 0u64;

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                changed = self.frames.changed() => {
                    if changed.is_err() {
                        if self.cancel.is_cancelled() {
                            break;
                        }
                        return Err(SessionError::ResourceUnavailable(
                            "display: capture stopped producing frames".to_string(),
                        ));
                    }
                }
            }

            let Some(frame) = self.frames.borrow_and_update().clone() else {
                continue;
            };
            self.track_frame(&frame);

            let Some(unit) = self.encode(&frame)? else {
                continue;
            };
            self.health.record_unit(unit.is_keyframe);
            total_units += 1;

            match self.output_tx.try_send(unit) {
                Ok(()) => {}
                Err(TrySendError::Full(unit)) => {
                    // the client would see a broken delta chain; restart it
                    debug!("EncodeStage: queue full, dropped unit {}", unit.sequence);
                    self.health.record_frame_drops(1);
                    self.encoder.request_keyframe();
                }
                Err(TrySendError::Closed(_)) => {
                    info!("EncodeStage: output channel closed");
                    break;
                }
            }
        }

        info!("EncodeStage: finished after {} units", total_units);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "EncodeStage"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::Timestamp;
    use crate::settings::{Bitrate, Resolution};
    use bytes::Bytes;
    use std::time::Duration;

    fn frame(sequence: u64) -> RawFrame {
        RawFrame::new(
            sequence,
            Timestamp::from_micros(sequence as i64 * 20_000),
            64,
            32,
            Bytes::from(vec![(sequence * 13) as u8; 64 * 32]),
            Bytes::from(vec![128u8; 64 * 16]),
        )
    }

    async fn wait_until(what: &str, cond: impl Fn() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !cond() {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {what}"));
    }

    struct Harness {
        frames_tx: watch::Sender<Option<RawFrame>>,
        units_rx: mpsc::Receiver<EncodedUnit>,
        health: Arc<PipelineHealth>,
        cancel: CancellationToken,
        task: tokio::task::JoinHandle<Result<(), SessionError>>,
    }

    fn spawn_stage(queue: usize) -> Harness {
        let encoder = FrameEncoder::configure(Resolution::Sd, 60, Bitrate::Mbps5).unwrap();
        let (frames_tx, frames_rx) = watch::channel(None);
        let (units_tx, units_rx) = mpsc::channel(queue);
        let health = Arc::new(PipelineHealth::new());
        let cancel = CancellationToken::new();

        let mut stage = EncodeStage::new(
            encoder,
            frames_rx,
            units_tx,
            Arc::clone(&health),
            cancel.clone(),
        );
        let task = tokio::spawn(async move { stage.run().await });

        Harness {
            frames_tx,
            units_rx,
            health,
            cancel,
            task,
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_full_queue_drops_and_restarts_with_keyframe() {
        let mut h = spawn_stage(1);

        h.frames_tx.send_replace(Some(frame(0)));
        wait_until("first unit", || h.health.units_encoded() == 1).await;
        h.frames_tx.send_replace(Some(frame(1)));
        wait_until("second unit", || h.health.units_encoded() == 2).await;
        assert_eq!(h.health.frame_drops(), 1);

        let first = h.units_rx.recv().await.unwrap();
        assert!(first.is_keyframe);

        h.frames_tx.send_replace(Some(frame(2)));
        let third = h.units_rx.recv().await.unwrap();
        assert_eq!(third.sequence, 2);
        assert!(third.is_keyframe);

        h.cancel.cancel();
        assert!(h.task.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_skipped_capture_frames_count_as_drops() {
        let mut h = spawn_stage(8);

        h.frames_tx.send_replace(Some(frame(0)));
        h.units_rx.recv().await.unwrap();
        h.frames_tx.send_replace(Some(frame(5)));
        h.units_rx.recv().await.unwrap();

        assert_eq!(h.health.frames_captured(), 2);
        assert_eq!(h.health.frame_drops(), 4);

        h.cancel.cancel();
        assert!(h.task.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_lost_capture_is_a_failure() {
        let h = spawn_stage(8);
        drop(h.frames_tx);

        assert!(matches!(
            h.task.await.unwrap(),
            Err(SessionError::ResourceUnavailable(_))
        ));
    }
}
