//! Tracking error evaluation on the origin endpoint.

use anyhow::{anyhow, Result};
use std::sync::{Arc, Mutex};

use crate::detect::Point;

/// Signed discrepancy between ground truth and a tracker's detection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ErrorSample {
    pub dx: i32,
    pub dy: i32,
}

impl ErrorSample {
    pub fn magnitude(&self) -> f64 {
        f64::from(self.dx).hypot(f64::from(self.dy))
    }
}

/// `real - calculated`, per axis, saturating at the `i32` range.
pub fn evaluate(real: Point, calculated: Point) -> ErrorSample {
    ErrorSample {
        dx: real.x.saturating_sub(calculated.x),
        dy: real.y.saturating_sub(calculated.y),
    }
}

/// Receives every error sample, synchronously, in arrival order.
pub trait ErrorSink: Send {
    fn report(&mut self, sample: ErrorSample);
}

/// Logs each sample.
#[derive(Debug, Default)]
pub struct LogSink;

impl ErrorSink for LogSink {
    fn report(&mut self, sample: ErrorSample) {
        log::info!("error: x={} y={}", sample.dx, sample.dy);
    }
}

/// Running summary of error samples.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ErrorStats {
    pub count: u64,
    pub sum_abs_dx: u64,
    pub sum_abs_dy: u64,
    pub max_magnitude: f64,
    pub last: Option<ErrorSample>,
}

impl ErrorStats {
    pub fn record(&mut self, sample: ErrorSample) {
        self.count += 1;
        self.sum_abs_dx += u64::from(sample.dx.unsigned_abs());
        self.sum_abs_dy += u64::from(sample.dy.unsigned_abs());
        self.max_magnitude = self.max_magnitude.max(sample.magnitude());
        self.last = Some(sample);
    }

    pub fn mean_abs_dx(&self) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        self.sum_abs_dx as f64 / self.count as f64
    }

    pub fn mean_abs_dy(&self) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        self.sum_abs_dy as f64 / self.count as f64
    }
}

impl std::fmt::Display for ErrorStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "samples={} mean_abs=({:.2}, {:.2}) max={:.2}",
            self.count,
            self.mean_abs_dx(),
            self.mean_abs_dy(),
            self.max_magnitude
        )
    }
}

/// Logs each sample and keeps a shared running summary.
#[derive(Clone, Debug, Default)]
pub struct StatsSink {
    stats: Arc<Mutex<ErrorStats>>,
}

impl StatsSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> Result<ErrorStats> {
        self.stats
            .lock()
            .map(|guard| *guard)
            .map_err(|_| anyhow!("error stats lock poisoned"))
    }
}

impl ErrorSink for StatsSink {
    fn report(&mut self, sample: ErrorSample) {
        LogSink.report(sample);
        match self.stats.lock() {
            Ok(mut guard) => guard.record(sample),
            Err(_) => log::error!("error stats lock poisoned; sample not recorded"),
        }
    }
}
