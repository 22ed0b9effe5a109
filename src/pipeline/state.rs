//! Session state management

use std::net::SocketAddr;
use std::time::Instant;

use crate::error::SessionError;

/// Session state machine
///
/// Callers only ever see whether a session is `Active`; the intermediate
/// phases exist so that start and stop can be serialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// No session, no resources held
    Idle,

    /// Capture, encoder and sender are being brought up
    Starting,

    /// All three sub-resources are up
    Active {
        /// When the session became active
        started_at: Instant,
    },

    /// Resources are being released
    Stopping,
}

impl SessionPhase {
    /// Check if this state transition is valid
    pub fn can_transition_to(&self, target: &SessionPhase) -> bool {
        use SessionPhase::*;

        match (self, target) {
            (Idle, Starting) => true,

            (Starting, Active { .. }) => true,
            (Starting, Idle) => true, // initialization failed

            (Active { .. }, Stopping) => true,

            (Stopping, Idle) => true,

            _ => false,
        }
    }

    /// Get a human-readable description of this state
    pub fn description(&self) -> &'static str {
        match self {
            SessionPhase::Idle => "Idle",
            SessionPhase::Starting => "Starting",
            SessionPhase::Active { .. } => "Active",
            SessionPhase::Stopping => "Stopping",
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, SessionPhase::Active { .. })
    }

    pub fn is_idle(&self) -> bool {
        matches!(self, SessionPhase::Idle)
    }

    /// Get the duration since the session became active
    pub fn active_duration(&self) -> Option<std::time::Duration> {
        if let SessionPhase::Active { started_at } = self {
            Some(started_at.elapsed())
        } else {
            None
        }
    }
}

impl std::fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// Snapshot published to subscribers on every change.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionStatus {
    pub phase: SessionPhase,

    /// Incremented for every start attempt
    pub session_id: u64,

    /// Port actually held by the listener, while active
    pub port: Option<u16>,

    /// The single connected client, if any
    pub client: Option<SocketAddr>,

    /// Why the last session failed to start or ended on its own
    pub last_failure: Option<SessionError>,
}

impl SessionStatus {
    pub fn idle() -> Self {
        Self {
            phase: SessionPhase::Idle,
            session_id: 0,
            port: None,
            client: None,
            last_failure: None,
        }
    }

    pub fn is_mirroring(&self) -> bool {
        self.phase.is_active()
    }
}

impl Default for SessionStatus {
    fn default() -> Self {
        Self::idle()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_transitions() {
        let idle = SessionPhase::Idle;
        let starting = SessionPhase::Starting;
        let active = SessionPhase::Active {
            started_at: Instant::now(),
        };
        let stopping = SessionPhase::Stopping;

        assert!(idle.can_transition_to(&starting));
        assert!(starting.can_transition_to(&active));
        assert!(starting.can_transition_to(&idle));
        assert!(active.can_transition_to(&stopping));
        assert!(stopping.can_transition_to(&idle));
    }

    #[test]
    fn test_invalid_transitions() {
        let idle = SessionPhase::Idle;
        let starting = SessionPhase::Starting;
        let active = SessionPhase::Active {
            started_at: Instant::now(),
        };
        let stopping = SessionPhase::Stopping;

        assert!(!idle.can_transition_to(&active)); // must go through Starting
        assert!(!idle.can_transition_to(&stopping));
        assert!(!starting.can_transition_to(&starting)); // concurrent start
        assert!(!active.can_transition_to(&starting));
        assert!(!active.can_transition_to(&idle)); // must release first
        assert!(!stopping.can_transition_to(&active));
    }

    #[test]
    fn test_only_active_counts_as_mirroring() {
        let mut status = SessionStatus::idle();
        assert!(!status.is_mirroring());

        status.phase = SessionPhase::Starting;
        assert!(!status.is_mirroring());

        status.phase = SessionPhase::Active {
            started_at: Instant::now(),
        };
        assert!(status.is_mirroring());
        assert!(status.phase.active_duration().is_some());

        status.phase = SessionPhase::Stopping;
        assert!(!status.is_mirroring());
    }
}
