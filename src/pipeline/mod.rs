//! Mirroring pipeline
//!
//! One session runs three workers connected by channels:
//!
//! ```text
//! Capture ─(newest-wins slot)→ Encode ─(bounded queue)→ Transmit → client
//! ```
//!
//! - The capture producer overwrites a single frame slot, so a slow encoder
//!   skips frames instead of building latency.
//! - The encode stage paces, encodes and hands units to the sender through a
//!   small bounded queue; when it is full the unit is dropped and the next
//!   one becomes a keyframe.
//! - The transmit stage owns the listener and the one connected client.
//!
//! The session controller in [`sender::coordinator`] owns all of it and is the
//! only thing that starts or stops a session.

pub mod clock;
pub mod health;
pub mod sender;
pub mod stage;
pub mod state;
pub mod types;

pub use clock::MediaClock;
pub use health::{HealthSummary, PipelineHealth};
pub use stage::PipelineStage;
pub use state::{SessionPhase, SessionStatus};
pub use types::{EncodedUnit, Timestamp};
