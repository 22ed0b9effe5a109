use async_trait::async_trait;
use bytes::Bytes;
use log::{debug, info, warn};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::assets::{MAX_FRAME_RATE, MAX_REFRESH_HZ};
use crate::capture::{
    CaptureConsent, CaptureHandle, ConsentResult, DisplayInfo, RawFrame, ScreenCapture,
    even_within,
};
use crate::error::CaptureError;
use crate::pipeline::MediaClock;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GenericDisplay {
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub refresh_hz: u32,
}

impl GenericDisplay {
    pub fn new(name: impl Into<String>, width: u32, height: u32, refresh_hz: u32) -> Self {
        Self {
            name: name.into(),
            width,
            height,
            refresh_hz,
        }
    }
}

impl Default for GenericDisplay {
    fn default() -> Self {
        Self::new("Virtual Display", 1920, 1080, MAX_FRAME_RATE)
    }
}

impl std::fmt::Display for GenericDisplay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} ({} x {} @ {}Hz)",
            self.name, self.width, self.height, self.refresh_hz
        )
    }
}

impl DisplayInfo for GenericDisplay {
    fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn refresh_rate(&self) -> u32 {
        self.refresh_hz
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Platform-independent capture backend.
///
/// Renders a deterministic test pattern (a luma gradient with a bar sweeping
/// across it) at the display's refresh cadence, so the rest of the pipeline
/// behaves exactly as it would with a real display.
pub struct GenericScreenCapture {
    display: GenericDisplay,
    consent: Arc<dyn CaptureConsent>,
    live_producers: Arc<AtomicUsize>,
}

impl GenericScreenCapture {
    pub fn new(display: GenericDisplay, consent: Arc<dyn CaptureConsent>) -> Self {
        Self {
            display,
            consent,
            live_producers: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Number of producer tasks currently holding the display.
    pub fn live_producers(&self) -> usize {
        self.live_producers.load(Ordering::SeqCst)
    }

    fn virtual_size(&self, hint: (u32, u32)) -> (u32, u32) {
        let (dw, dh) = self.display.resolution();
        (even_within(hint.0, dw), even_within(hint.1, dh))
    }
}

#[async_trait]
impl ScreenCapture for GenericScreenCapture {
    fn display(&self) -> &dyn DisplayInfo {
        &self.display
    }

    async fn acquire(&self, resolution_hint: (u32, u32)) -> Result<CaptureHandle, CaptureError> {
        let (dw, dh) = self.display.resolution();
        if dw == 0 || dh == 0 {
            return Err(CaptureError::DisplayUnavailable(format!(
                "{} reports no pixels",
                self.display.name
            )));
        }
        let refresh_hz = self.display.refresh_rate();
        if !(1..=MAX_REFRESH_HZ).contains(&refresh_hz) {
            return Err(CaptureError::DisplayUnavailable(format!(
                "{} reports an unusable refresh rate of {}Hz",
                self.display.name, refresh_hz
            )));
        }

        match self.consent.request().await {
            ConsentResult::Granted => debug!("Capture consent granted"),
            ConsentResult::Denied => {
                warn!("Capture consent denied for {}", self.display);
                return Err(CaptureError::PermissionDenied);
            }
        }

        let (w, h) = self.virtual_size(resolution_hint);
        let (frames_tx, frames_rx) = watch::channel(None);
        let cancel = CancellationToken::new();
        let live = Arc::clone(&self.live_producers);
        live.fetch_add(1, Ordering::SeqCst);

        let producer = tokio::spawn(produce_frames(
            w,
            h,
            Duration::from_micros(1_000_000 / refresh_hz as u64),
            frames_tx,
            cancel.clone(),
            live,
        ));

        info!("Capturing {} into a {}x{} virtual display", self.display, w, h);
        Ok(CaptureHandle::new(w, h, frames_rx, cancel, producer))
    }
}

async fn produce_frames(
    width: u32,
    height: u32,
    period: Duration,
    frames_tx: watch::Sender<Option<RawFrame>>,
    cancel: CancellationToken,
    live: Arc<AtomicUsize>,
) {
    let clock = MediaClock::new();
    let pattern = TestPattern::new(width, height);
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let sequence = clock.next_sequence();
        let frame = pattern.render(sequence, clock.now());
        // newest wins: an unread frame is simply replaced
        frames_tx.send_replace(Some(frame));
    }

    live.fetch_sub(1, Ordering::SeqCst);
    debug!("Capture producer stopped");
}

struct TestPattern {
    width: u32,
    height: u32,
    gradient_row: Vec<u8>,
    chrominance: Bytes,
}

impl TestPattern {
    fn new(width: u32, height: u32) -> Self {
        let gradient_row = (0..width)
            .map(|x| (16 + (x * 200 / width.max(1))) as u8)
            .collect();
        Self {
            width,
            height,
            gradient_row,
            chrominance: Bytes::from(vec![128u8; (width * height / 2) as usize]),
        }
    }

    fn render(&self, sequence: u64, captured_at: crate::pipeline::Timestamp) -> RawFrame {
        let w = self.width as usize;
        let bar_width = (w / 16).max(1);
        let step = (w / 120).max(1);
        let bar_start = (sequence as usize * step) % w;

        let mut luma = Vec::with_capacity(w * self.height as usize);
        for _ in 0..self.height {
            luma.extend_from_slice(&self.gradient_row);
        }
        let bar_end = (bar_start + bar_width).min(w);
        for row in luma.chunks_exact_mut(w) {
            row[bar_start..bar_end].fill(235);
        }

        RawFrame::new(
            sequence,
            captured_at,
            self.width,
            self.height,
            Bytes::from(luma),
            self.chrominance.clone(),
        )
    }
}
