use anyhow::{bail, Result};
use std::collections::VecDeque;
use std::time::Duration;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::Point;
use crate::frame::Frame;

/// Stub backend for testing. Replays a fixed script of results, one per
/// frame, and returns `None` once the script is exhausted.
pub struct StubBackend {
    script: VecDeque<StubStep>,
    delay: Option<Duration>,
}

#[derive(Clone, Debug)]
pub enum StubStep {
    Found(Point),
    Missed,
    Fail,
}

impl StubBackend {
    pub fn new(script: impl IntoIterator<Item = StubStep>) -> Self {
        Self {
            script: script.into_iter().collect(),
            delay: None,
        }
    }

    /// Simulate a slow pipeline.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

impl Default for StubBackend {
    fn default() -> Self {
        Self::new([])
    }
}

impl DetectorBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn detect(&mut self, _frame: &Frame) -> Result<Option<Point>> {
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        match self.script.pop_front() {
            Some(StubStep::Found(point)) => Ok(Some(point)),
            Some(StubStep::Missed) | None => Ok(None),
            Some(StubStep::Fail) => bail!("scripted detector failure"),
        }
    }
}
