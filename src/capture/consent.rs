//! Capture consent
//!
//! Screen capture must be approved by the local user before the first frame.
//! How the question is asked depends on where the service runs, so it is a
//! trait the capture source awaits.

use async_trait::async_trait;
use log::{debug, error};
use std::io::{BufRead, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::watch;

/// Result of a consent prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsentResult {
    Granted,
    Denied,
}

#[async_trait]
pub trait CaptureConsent: Send + Sync {
    /// Ask for permission. May wait indefinitely for an answer.
    async fn request(&self) -> ConsentResult;
}

/// A standing grant that can be revoked and granted again.
#[derive(Debug, Clone)]
pub struct ConsentGate {
    granted: Arc<AtomicBool>,
}

impl ConsentGate {
    pub fn granted() -> Self {
        Self {
            granted: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn denied() -> Self {
        Self {
            granted: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn grant(&self) {
        self.granted.store(true, Ordering::SeqCst);
    }

    pub fn revoke(&self) {
        self.granted.store(false, Ordering::SeqCst);
    }

    pub fn is_granted(&self) -> bool {
        self.granted.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CaptureConsent for ConsentGate {
    async fn request(&self) -> ConsentResult {
        if self.is_granted() {
            ConsentResult::Granted
        } else {
            ConsentResult::Denied
        }
    }
}

/// Consent answered later, from elsewhere; pending requests wait until then.
///
/// Models a permission dialog that stays on screen.
#[derive(Debug, Clone)]
pub struct DeferredConsent {
    answer_tx: Arc<watch::Sender<Option<ConsentResult>>>,
}

impl DeferredConsent {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self {
            answer_tx: Arc::new(tx),
        }
    }

    pub fn answer(&self, result: ConsentResult) {
        self.answer_tx.send_replace(Some(result));
    }

    /// Forget the answer so the next request waits again.
    pub fn reset(&self) {
        self.answer_tx.send_replace(None);
    }
}

impl Default for DeferredConsent {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CaptureConsent for DeferredConsent {
    async fn request(&self) -> ConsentResult {
        let mut rx = self.answer_tx.subscribe();
        match rx.wait_for(Option::is_some).await {
            Ok(answer) => (*answer).unwrap_or(ConsentResult::Denied),
            // the sender lives in self, so this is unreachable in practice
            Err(_) => ConsentResult::Denied,
        }
    }
}

/// Asks on the controlling terminal.
#[derive(Debug, Default, Clone)]
pub struct TerminalConsent;

#[async_trait]
impl CaptureConsent for TerminalConsent {
    async fn request(&self) -> ConsentResult {
        // stdin blocks, keep it off the runtime workers
        let answer = tokio::task::spawn_blocking(|| -> std::io::Result<bool> {
            let mut stdout = std::io::stdout();
            write!(stdout, "Allow this device's screen to be captured and streamed? [y/N] ")?;
            stdout.flush()?;

            let mut line = String::new();
            std::io::stdin().lock().read_line(&mut line)?;
            Ok(matches!(line.trim().to_ascii_lowercase().as_str(), "y" | "yes"))
        })
        .await;

        match answer {
            Ok(Ok(true)) => ConsentResult::Granted,
            Ok(Ok(false)) => ConsentResult::Denied,
            Ok(Err(e)) => {
                debug!("Consent prompt failed: {}", e);
                ConsentResult::Denied
            }
            Err(e) => {
                error!("Consent task panicked: {}", e);
                ConsentResult::Denied
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_gate_can_be_revoked() {
        let gate = ConsentGate::granted();
        assert_eq!(gate.request().await, ConsentResult::Granted);

        gate.revoke();
        assert_eq!(gate.request().await, ConsentResult::Denied);

        gate.grant();
        assert_eq!(gate.clone().request().await, ConsentResult::Granted);
    }

    #[tokio::test]
    async fn test_deferred_waits_for_answer() {
        let consent = DeferredConsent::new();

        let pending = tokio::time::timeout(Duration::from_millis(50), consent.request()).await;
        assert!(pending.is_err(), "request must wait while unanswered");

        let asker = consent.clone();
        let waiting = tokio::spawn(async move { asker.request().await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        consent.answer(ConsentResult::Granted);

        assert_eq!(waiting.await.unwrap(), ConsentResult::Granted);
    }
}
