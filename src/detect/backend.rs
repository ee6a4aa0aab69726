use anyhow::Result;

use crate::detect::result::Detection;
use crate::frame::Frame;

/// Detector backend trait.
///
/// One instance is shared by every connection, so `detect` takes `&self` and
/// implementations must be safe for concurrent read-only inference.
///
/// Implementations must treat the frame as read-only and ephemeral: no pixel
/// data may be retained past the `detect` call, written to disk, or logged.
pub trait DetectorBackend: Send + Sync {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection on a frame.
    ///
    /// Returned boxes are in source-frame pixel coordinates. No caller-side
    /// confidence policy is applied here; backends only drop candidates below
    /// their own model-level floor.
    fn detect(&self, frame: &Frame) -> Result<Vec<Detection>>;

    /// Optional warm-up hook.
    fn warm_up(&self) -> Result<()> {
        Ok(())
    }
}
