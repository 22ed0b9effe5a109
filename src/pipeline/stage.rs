//! Pipeline stage trait
//!
//! Defines the interface the session controller uses to drive its workers.

use async_trait::async_trait;

use crate::error::SessionError;

/// Trait for pipeline stages that process media data
#[async_trait]
pub trait PipelineStage: Send {
    /// Run the stage, processing data until its input ends or it is cancelled
    async fn run(&mut self) -> Result<(), SessionError>;

    /// Get the name of this stage for logging
    fn name(&self) -> &'static str;
}
