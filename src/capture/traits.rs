//! Traits for screen capture functionality

use crate::capture::CaptureHandle;
use crate::error::CaptureError;
use async_trait::async_trait;

/// Trait for screen capture implementations
///
/// The session controller owns the returned handle for the whole session; no
/// other component touches the capture directly.
#[async_trait]
pub trait ScreenCapture: Send + Sync {
    /// The display frames are taken from
    fn display(&self) -> &dyn DisplayInfo;

    /// Ask for consent and start producing frames.
    ///
    /// `resolution_hint` is the size the consumer wants; the virtual display
    /// is created at that size clamped to the native one.
    async fn acquire(&self, resolution_hint: (u32, u32)) -> Result<CaptureHandle, CaptureError>;
}

/// Trait for display information
pub trait DisplayInfo: Send + Sync {
    /// Get the resolution of the display in (width, height)
    fn resolution(&self) -> (u32, u32);
    /// Native refresh cadence in frames per second
    fn refresh_rate(&self) -> u32;
    /// Human readable name
    fn name(&self) -> &str;
}
