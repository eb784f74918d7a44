use anyhow::Result;

use crate::detect::result::Point;
use crate::frame::Frame;

/// Detector backend trait.
///
/// A backend runs on the detection worker thread and owns whatever state it
/// needs between frames. It only sees frames through a shared borrow and
/// reports at most one position per frame.
pub trait DetectorBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Locate the object in a frame.
    ///
    /// `Ok(None)` means nothing usable was found; the caller keeps the
    /// previous position. `Err` is reserved for frames the backend cannot
    /// interpret at all.
    fn detect(&mut self, frame: &Frame) -> Result<Option<Point>>;

    /// Optional warm-up hook, called once on the worker thread before the
    /// first frame.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
