//! Transmit stage for the sender pipeline
//!
//! Owns the listening socket and at most one client. Units are written to the
//! client in the order the encoder produced them.

use async_trait::async_trait;
use log::{debug, info, warn};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::assets::WRITE_TIMEOUT;
use crate::error::SessionError;
use crate::pipeline::PipelineStage;
use crate::pipeline::health::PipelineHealth;
use crate::pipeline::state::SessionStatus;
use crate::pipeline::types::EncodedUnit;
use crate::utils::net::StreamHeader;
use crate::utils::net::wire::encode_unit;

/// Bind the mirroring port. Port 0 picks a free one.
pub async fn bind(addr: IpAddr, port: u16) -> Result<TcpListener, SessionError> {
    TcpListener::bind(SocketAddr::new(addr, port))
        .await
        .map_err(|e| SessionError::PortInUse {
            port,
            reason: e.to_string(),
        })
}

struct Client {
    stream: TcpStream,
    peer: SocketAddr,
    /// Deltas are useless until the client has seen a keyframe
    synced: bool,
}

/// Transmit stage: forwards encoded units to the connected client
pub struct StreamSender {
    listener: TcpListener,
    port: u16,
    header: StreamHeader,
    health: Arc<PipelineHealth>,
    cancel: CancellationToken,
    write_timeout: Duration,
    input_rx: Option<mpsc::Receiver<EncodedUnit>>,
    force_keyframe: Arc<AtomicBool>,
    status: Option<Arc<watch::Sender<SessionStatus>>>,
}

impl StreamSender {
    pub fn new(
        listener: TcpListener,
        header: StreamHeader,
        health: Arc<PipelineHealth>,
        cancel: CancellationToken,
    ) -> Result<Self, SessionError> {
        let port = listener
            .local_addr()
            .map_err(|e| SessionError::ResourceUnavailable(format!("listener: {}", e)))?
            .port();

        Ok(Self {
            listener,
            port,
            header,
            health,
            cancel,
            write_timeout: WRITE_TIMEOUT,
            input_rx: None,
            force_keyframe: Arc::new(AtomicBool::new(false)),
            status: None,
        })
    }

    /// Port the listener actually holds
    pub fn local_port(&self) -> u16 {
        self.port
    }

    /// Set the unit queue and the encoder's keyframe request flag.
    pub fn set_input(&mut self, rx: mpsc::Receiver<EncodedUnit>, force_keyframe: Arc<AtomicBool>) {
        self.input_rx = Some(rx);
        self.force_keyframe = force_keyframe;
    }

    /// Publish the connected client through the session status.
    pub fn set_status(&mut self, status: Arc<watch::Sender<SessionStatus>>) {
        self.status = Some(status);
    }

    pub fn set_write_timeout(&mut self, timeout: Duration) {
        self.write_timeout = timeout;
    }

    fn publish_client(&self, client: Option<SocketAddr>) {
        if let Some(status) = &self.status {
            status.send_if_modified(|s| {
                let changed = s.client != client;
                s.client = client;
                changed
            });
        }
    }

    async fn attach(&self, mut stream: TcpStream, peer: SocketAddr) -> Option<Client> {
        if let Err(e) = stream.set_nodelay(true) {
            debug!("StreamSender: TCP_NODELAY on {}: {}", peer, e);
        }

        let header = self.header.encode();
        match tokio::time::timeout(self.write_timeout, stream.write_all(&header)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!("StreamSender: client {} gone before the header: {}", peer, e);
                self.health.record_network_error();
                return None;
            }
            Err(_) => {
                warn!("StreamSender: header write to {} timed out", peer);
                self.health.record_network_error();
                return None;
            }
        }

        self.force_keyframe.store(true, Ordering::SeqCst);
        self.publish_client(Some(peer));
        info!("StreamSender: client {} connected", peer);

        Some(Client {
            stream,
            peer,
            synced: false,
        })
    }

    async fn send(&self, client: &mut Client, unit: &EncodedUnit) -> Result<(), SessionError> {
        if !client.synced {
            if !unit.is_keyframe {
                return Ok(());
            }
            client.synced = true;
        }

        let framed = encode_unit(unit);
        match tokio::time::timeout(self.write_timeout, client.stream.write_all(&framed)).await {
            Ok(Ok(())) => {
                self.health.record_sent(framed.len());
                Ok(())
            }
            Ok(Err(e)) => {
                self.health.record_network_error();
                Err(SessionError::WriteFailure(format!(
                    "client {}: {}",
                    client.peer, e
                )))
            }
            Err(_) => {
                self.health.record_network_error();
                Err(SessionError::WriteFailure(format!(
                    "client {} stopped reading for {:?}",
                    client.peer, self.write_timeout
                )))
            }
        }
    }
}

#[async_trait]
impl PipelineStage for StreamSender {
    async fn run(&mut self) -> Result<(), SessionError> {
        let mut input_rx = self.input_rx.take().ok_or_else(|| {
            SessionError::ResourceUnavailable("sender: no input channel".to_string())
        })?;

        info!("StreamSender: listening on port {}", self.port);
        let mut client: Option<Client> = None;
        let mut discarded = 0u64;

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        if let Some(current) = &client {
                            // single client: close the newcomer right away
                            info!("StreamSender: rejected {} while streaming to {}", peer, current.peer);
                            self.health.record_rejected_client();
                            drop(stream);
                        } else {
                            client = self.attach(stream, peer).await;
                        }
                    }
                    Err(e) => warn!("StreamSender: accept failed: {}", e),
                },
                unit = input_rx.recv() => {
                    let Some(unit) = unit else {
                        debug!("StreamSender: input closed");
                        break;
                    };
                    match client.as_mut() {
                        Some(c) => {
                            if let Err(e) = self.send(c, &unit).await {
                                self.publish_client(None);
                                return Err(e);
                            }
                        }
                        None => discarded += 1,
                    }
                }
            }
        }

        if let Some(mut c) = client.take() {
            let _ = c.stream.shutdown().await;
            self.publish_client(None);
        }
        info!(
            "StreamSender: finished, {} units sent, {} discarded without a client",
            self.health.units_sent(),
            discarded
        );
        Ok(())
    }

    fn name(&self) -> &'static str {
        "StreamSender"
    }
}
