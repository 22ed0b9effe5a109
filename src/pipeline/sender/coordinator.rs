//! Session controller
//!
//! Owns the capture handle, the encode stage and the stream sender of the one
//! mirroring session and serializes every transition between them:
//!
//! ```text
//! Idle → Starting → Active → Stopping → Idle
//!           └────── (failure / timeout) ──────┘
//! ```

use log::{debug, error, info, warn};
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::assets::{HEALTH_LOG_INTERVAL, START_TIMEOUT, UNIT_QUEUE_DEPTH, WRITE_TIMEOUT};
use crate::capture::{CaptureHandle, ScreenCapture};
use crate::encoder::FrameEncoder;
use crate::error::SessionError;
use crate::pipeline::health::{HealthSummary, PipelineHealth};
use crate::pipeline::sender::encode_stage::EncodeStage;
use crate::pipeline::sender::transmit_stage::{self, StreamSender};
use crate::pipeline::state::{SessionPhase, SessionStatus};
use crate::pipeline::PipelineStage;
use crate::settings::SettingsStore;
use crate::utils::net::StreamHeader;

/// Runtime knobs that are not user settings.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub bind_addr: IpAddr,
    pub start_timeout: Duration,
    pub write_timeout: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            bind_addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            start_timeout: START_TIMEOUT,
            write_timeout: WRITE_TIMEOUT,
        }
    }
}

/// Resources of the running session. Only the controller touches them.
struct ActiveSession {
    id: u64,
    port: u16,
    cancel: CancellationToken,
    capture: Option<CaptureHandle>,
    workers: Vec<JoinHandle<()>>,
    health: Arc<PipelineHealth>,
}

impl ActiveSession {
    async fn shutdown(mut self) {
        self.cancel.cancel();
        if let Some(capture) = self.capture.take() {
            capture.release().await;
        }
        for worker in self.workers.drain(..) {
            if let Err(e) = worker.await {
                error!("Session {} worker ended abnormally: {}", self.id, e);
            }
        }
        info!("Session {} released: {}", self.id, self.health.summary());
    }
}

struct Inner {
    capture: Arc<dyn ScreenCapture>,
    settings: Arc<SettingsStore>,
    options: SessionOptions,
    session: Mutex<Option<ActiveSession>>,
    status_tx: Arc<watch::Sender<SessionStatus>>,
    last_id: AtomicU64,
}

/// Single owner of the mirroring session.
///
/// Cheap to clone; clones drive the same session.
#[derive(Clone)]
pub struct SessionController {
    inner: Arc<Inner>,
}

impl SessionController {
    pub fn new(
        capture: Arc<dyn ScreenCapture>,
        settings: Arc<SettingsStore>,
        options: SessionOptions,
    ) -> Self {
        let (status_tx, _) = watch::channel(SessionStatus::idle());
        Self {
            inner: Arc::new(Inner {
                capture,
                settings,
                options,
                session: Mutex::new(None),
                status_tx: Arc::new(status_tx),
                last_id: AtomicU64::new(0),
            }),
        }
    }

    /// Start a session with the persisted settings.
    ///
    /// Returns the port the listener holds once capture, encoder and sender
    /// are all up. Fails with [`SessionError::AlreadyActive`] unless idle.
    pub async fn start(&self) -> Result<u16, SessionError> {
        let id = self.inner.last_id.fetch_add(1, Ordering::SeqCst) + 1;
        let claimed = self.inner.status_tx.send_if_modified(|s| {
            if !s.phase.can_transition_to(&SessionPhase::Starting) {
                return false;
            }
            *s = SessionStatus {
                phase: SessionPhase::Starting,
                session_id: id,
                ..SessionStatus::idle()
            };
            true
        });
        if !claimed {
            debug!("Start of session {} refused: {}", id, self.status().phase);
            return Err(SessionError::AlreadyActive);
        }

        let mut guard = StartGuard {
            status_tx: &self.inner.status_tx,
            id,
            armed: true,
        };
        let mut slot = self.inner.session.lock().await;

        let timeout = self.inner.options.start_timeout;
        let result = match tokio::time::timeout(timeout, self.establish(id)).await {
            Ok(result) => result,
            Err(_) => Err(SessionError::Timeout(timeout)),
        };
        guard.armed = false;

        match result {
            Ok(session) => {
                let port = session.port;
                *slot = Some(session);
                self.inner.status_tx.send_modify(|s| {
                    s.phase = SessionPhase::Active {
                        started_at: Instant::now(),
                    };
                    s.port = Some(port);
                });
                info!("Mirroring session {} active on port {}", id, port);
                Ok(port)
            }
            Err(e) => {
                warn!("Mirroring session {} failed to start: {}", id, e);
                self.publish_idle(Some(e.clone()));
                Err(e)
            }
        }
    }

    /// Stop the session and wait until every resource is released.
    ///
    /// Succeeds without doing anything when idle. A stop issued while a start
    /// is in flight waits for it and then tears the new session down.
    pub async fn stop(&self) -> Result<(), SessionError> {
        let mut slot = self.inner.session.lock().await;
        // `start` publishes Starting before it holds the lock
        while slot.is_none() && self.inner.status_tx.borrow().phase == SessionPhase::Starting {
            drop(slot);
            debug!("Stop waiting for the session being started");
            let mut status = self.subscribe();
            let _ = status
                .wait_for(|s| s.phase != SessionPhase::Starting)
                .await;
            slot = self.inner.session.lock().await;
        }
        let Some(session) = slot.take() else {
            debug!("Stop requested while idle");
            return Ok(());
        };

        let id = session.id;
        let ran_for = self.inner.status_tx.borrow().phase.active_duration();
        self.inner
            .status_tx
            .send_modify(|s| s.phase = SessionPhase::Stopping);
        session.shutdown().await;
        self.publish_idle(None);

        match ran_for {
            Some(d) => info!("Mirroring session {} stopped after {:.1?}", id, d),
            None => info!("Mirroring session {} stopped", id),
        }
        Ok(())
    }

    pub fn is_active(&self) -> bool {
        self.inner.status_tx.borrow().phase.is_active()
    }

    pub fn status(&self) -> SessionStatus {
        self.inner.status_tx.borrow().clone()
    }

    /// Follow status changes.
    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.inner.status_tx.subscribe()
    }

    /// Counters of the running session.
    pub async fn health(&self) -> Option<HealthSummary> {
        let slot = self.inner.session.lock().await;
        slot.as_ref().map(|s| s.health.summary())
    }

    fn publish_idle(&self, failure: Option<SessionError>) {
        self.inner.status_tx.send_modify(|s| {
            let session_id = s.session_id;
            *s = SessionStatus {
                session_id,
                last_failure: failure,
                ..SessionStatus::idle()
            };
        });
    }

    async fn establish(&self, id: u64) -> Result<ActiveSession, SessionError> {
        let inner = &self.inner;
        let settings = inner.settings.load_settings().await;
        info!("Starting mirroring session {}: {}", id, settings);
        if settings.audio_enabled {
            warn!("Audio capture is not available, streaming video only");
        }

        let encoder = FrameEncoder::configure(settings.resolution, settings.fps, settings.bitrate)?;
        let capture = inner.capture.acquire(settings.resolution.dimensions()).await?;

        let listener = match transmit_stage::bind(inner.options.bind_addr, settings.port).await {
            Ok(listener) => listener,
            Err(e) => {
                capture.release().await;
                return Err(e);
            }
        };

        let cancel = CancellationToken::new();
        let health = Arc::new(PipelineHealth::new());
        let header = StreamHeader::new(
            encoder.fps(),
            encoder.resolution().dimensions(),
            settings.audio_enabled,
        );

        let mut sender =
            match StreamSender::new(listener, header, Arc::clone(&health), cancel.clone()) {
                Ok(sender) => sender,
                Err(e) => {
                    capture.release().await;
                    return Err(e);
                }
            };
        let (units_tx, units_rx) = mpsc::channel(UNIT_QUEUE_DEPTH);
        sender.set_input(units_rx, encoder.force_keyframe_flag());
        sender.set_status(Arc::clone(&inner.status_tx));
        sender.set_write_timeout(inner.options.write_timeout);
        let port = sender.local_port();

        let encode = EncodeStage::new(
            encoder,
            capture.frames(),
            units_tx,
            Arc::clone(&health),
            cancel.clone(),
        );

        // from here on nothing awaits, so a start timeout cannot leave tasks behind
        let (failures_tx, failures_rx) = mpsc::channel(2);
        let workers = vec![
            spawn_stage(encode, failures_tx.clone()),
            spawn_stage(sender, failures_tx),
            tokio::spawn(log_health(Arc::clone(&health), cancel.clone())),
        ];
        tokio::spawn(supervise(self.clone(), id, cancel.clone(), failures_rx));

        Ok(ActiveSession {
            id,
            port,
            cancel,
            capture: Some(capture),
            workers,
            health,
        })
    }
}

/// Puts the status back to idle if `start` is dropped mid-way.
struct StartGuard<'a> {
    status_tx: &'a watch::Sender<SessionStatus>,
    id: u64,
    armed: bool,
}

impl Drop for StartGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let id = self.id;
        self.status_tx.send_if_modified(|s| {
            if s.session_id != id || s.phase != SessionPhase::Starting {
                return false;
            }
            *s = SessionStatus {
                session_id: id,
                last_failure: Some(SessionError::ResourceUnavailable(
                    "start was abandoned".to_string(),
                )),
                ..SessionStatus::idle()
            };
            true
        });
    }
}

fn spawn_stage<S>(mut stage: S, failures: mpsc::Sender<SessionError>) -> JoinHandle<()>
where
    S: PipelineStage + 'static,
{
    tokio::spawn(async move {
        let name = stage.name();
        match stage.run().await {
            Ok(()) => debug!("{} finished", name),
            Err(e) => {
                error!("{} failed: {}", name, e);
                let _ = failures.try_send(e);
            }
        }
    })
}

async fn log_health(health: Arc<PipelineHealth>, cancel: CancellationToken) {
    let mut interval = tokio::time::interval(HEALTH_LOG_INTERVAL);
    // the first tick completes immediately
    interval.tick().await;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {
                info!("Sender pipeline: {}", health.summary());
                if health.is_stalled(HEALTH_LOG_INTERVAL) {
                    warn!("No unit encoded in the last {:?}", HEALTH_LOG_INTERVAL);
                }
            }
        }
    }
}

/// Tears the session down when a worker fails on its own.
async fn supervise(
    controller: SessionController,
    id: u64,
    cancel: CancellationToken,
    mut failures: mpsc::Receiver<SessionError>,
) {
    let failure = tokio::select! {
        _ = cancel.cancelled() => return,
        failure = failures.recv() => match failure {
            Some(failure) => failure,
            None => return,
        },
    };

    let mut slot = controller.inner.session.lock().await;
    // a stop or a newer session got here first
    if slot.as_ref().map(|s| s.id) != Some(id) {
        return;
    }
    let Some(session) = slot.take() else {
        return;
    };

    warn!("Mirroring stopped unexpectedly: {}", failure);
    controller
        .inner
        .status_tx
        .send_modify(|s| s.phase = SessionPhase::Stopping);
    session.shutdown().await;
    controller.publish_idle(Some(failure));
}
