use anyhow::Result;

use crate::detect::result::Detection;
use crate::frame::Frame;

/// Detector backend trait.
///
/// The model behind a backend is a black box: it receives a frame and returns
/// boxes in that frame's pixel coordinates, a class index and a confidence in
/// `[0, 1]`. Backends do not filter by the run's confidence threshold; the
/// pipeline does that so drawing and alerting share one rule.
pub trait DetectorBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection on a frame.
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
