use anyhow::Result;

use crate::detect::backend::DetectorBackend;
use crate::detect::pipeline;
use crate::detect::result::Point;
use crate::frame::Frame;

/// Edge/contour pipeline backend. Stateless between frames.
#[derive(Debug, Default)]
pub struct ContourBackend;

impl ContourBackend {
    pub fn new() -> Self {
        Self
    }
}

impl DetectorBackend for ContourBackend {
    fn name(&self) -> &'static str {
        "contour"
    }

    fn detect(&mut self, frame: &Frame) -> Result<Option<Point>> {
        pipeline::locate(frame)
    }
}
