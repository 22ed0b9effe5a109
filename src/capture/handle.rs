use crate::capture::RawFrame;
use log::{debug, error};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Owned capture session.
///
/// Dropping the handle cancels the producer; [`CaptureHandle::release`] also
/// waits for it to finish.
pub struct CaptureHandle {
    width: u32,
    height: u32,
    frames: watch::Receiver<Option<RawFrame>>,
    cancel: CancellationToken,
    producer: Option<JoinHandle<()>>,
}

impl CaptureHandle {
    pub fn new(
        width: u32,
        height: u32,
        frames: watch::Receiver<Option<RawFrame>>,
        cancel: CancellationToken,
        producer: JoinHandle<()>,
    ) -> Self {
        Self {
            width,
            height,
            frames,
            cancel,
            producer: Some(producer),
        }
    }

    /// Size of the virtual display
    pub fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Subscribe to the newest-frame slot.
    ///
    /// The slot holds `None` until the first frame arrives. The receiver sees
    /// a closed channel once the producer stops.
    pub fn frames(&self) -> watch::Receiver<Option<RawFrame>> {
        self.frames.clone()
    }

    pub fn is_running(&self) -> bool {
        self.producer.as_ref().is_some_and(|p| !p.is_finished())
    }

    /// Stop the producer and wait until it has let go of the display.
    pub async fn release(mut self) {
        self.cancel.cancel();
        if let Some(producer) = self.producer.take() {
            if let Err(e) = producer.await {
                error!("Capture producer ended abnormally: {}", e);
            }
        }
        debug!("Capture released ({}x{})", self.width, self.height);
    }
}

impl Drop for CaptureHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
