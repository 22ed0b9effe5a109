//! Front-facing workers
//!
//! What a user interface binds to: the caster with its start and stop
//! controls, status and device details, and a receiver for the other end of
//! the stream.

pub mod caster;
pub mod receiver;

pub use caster::{Caster, HomeState};
pub use receiver::{ReceiveStats, Receiver};
