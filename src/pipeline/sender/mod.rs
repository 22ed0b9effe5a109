//! Sender pipeline components
//!
//! - EncodeStage: raw frames to encoded units
//! - StreamSender: listener, single client, framed writes
//! - SessionController: lifecycle of the whole session
//!
//! ```text
//! CaptureHandle → EncodeStage → StreamSender → Network
//! ```

pub mod coordinator;
pub mod encode_stage;
pub mod transmit_stage;

pub use coordinator::{SessionController, SessionOptions};
pub use encode_stage::EncodeStage;
pub use transmit_stage::StreamSender;
