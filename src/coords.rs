//! Coordinate side-channel protocol.
//!
//! Two comma-separated text messages travel over the side channel:
//!
//! - `coords,<x>,<y>`: ground truth, origin -> tracker, once per frame.
//! - `calculated,<realX>,<realY>,<detX>,<detY>`: tracker -> origin, on the
//!   tracker's own timer.
//!
//! Loss tolerance: malformed messages are dropped by the receivers and
//! nothing is retried. Every tick carries fresh state, so a dropped message
//! is superseded rather than corrected.

use anyhow::{anyhow, bail, Context, Result};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::detect::{DetectionSlot, Point};

pub const TAG_REAL: &str = "coords";
pub const TAG_CALCULATED: &str = "calculated";

/// Default tracker report period.
pub const DEFAULT_REPORT_INTERVAL: Duration = Duration::from_millis(33);

// ----------------------------------------------------------------------------
// Wire format
// ----------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CoordinateMessage {
    /// Ground truth from the origin.
    Real { x: i32, y: i32 },
    /// Tracker report: the ground truth it last received plus its detection.
    Calculated { real: Point, detected: Point },
}

impl CoordinateMessage {
    pub fn encode(&self) -> String {
        match self {
            CoordinateMessage::Real { x, y } => format!("{},{},{}", TAG_REAL, x, y),
            CoordinateMessage::Calculated { real, detected } => format!(
                "{},{},{},{},{}",
                TAG_CALCULATED, real.x, real.y, detected.x, detected.y
            ),
        }
    }

    /// Parse one message.
    ///
    /// Fields are trimmed before parsing, so `calculated,1,2,3, 4` is
    /// accepted. Unknown tags, a wrong field count or a non-integer field
    /// are errors.
    pub fn parse(text: &str) -> Result<Self> {
        let fields: Vec<&str> = text.split(',').map(str::trim).collect();
        let (tag, values) = fields
            .split_first()
            .ok_or_else(|| anyhow!("empty coordinate message"))?;
        match *tag {
            TAG_REAL => {
                let [x, y] = parse_fields::<2>(tag, values)?;
                Ok(CoordinateMessage::Real { x, y })
            }
            TAG_CALCULATED => {
                let [rx, ry, dx, dy] = parse_fields::<4>(tag, values)?;
                Ok(CoordinateMessage::Calculated {
                    real: Point::new(rx, ry),
                    detected: Point::new(dx, dy),
                })
            }
            other => bail!("unknown coordinate message tag '{}'", other),
        }
    }
}

impl FromStr for CoordinateMessage {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl std::fmt::Display for CoordinateMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.encode())
    }
}

fn parse_fields<const N: usize>(tag: &str, values: &[&str]) -> Result<[i32; N]> {
    if values.len() != N {
        bail!(
            "'{}' message needs {} fields, got {}",
            tag,
            N,
            values.len()
        );
    }
    let mut out = [0i32; N];
    for (slot, raw) in out.iter_mut().zip(values) {
        *slot = raw
            .parse()
            .with_context(|| format!("'{}' field '{}' is not an integer", tag, raw))?;
    }
    Ok(out)
}

// ----------------------------------------------------------------------------
// Ground truth cache (tracker side)
// ----------------------------------------------------------------------------

/// Latest ground truth received by the tracker. Overwritten on every
/// `coords` message; starts at the origin.
#[derive(Clone, Debug, Default)]
pub struct GroundTruthCache {
    inner: Arc<Mutex<Point>>,
}

impl GroundTruthCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store(&self, point: Point) -> Result<()> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|_| anyhow!("ground truth lock poisoned"))?;
        *guard = point;
        Ok(())
    }

    pub fn load(&self) -> Result<Point> {
        let guard = self
            .inner
            .lock()
            .map_err(|_| anyhow!("ground truth lock poisoned"))?;
        Ok(*guard)
    }

    /// Apply an inbound side-channel message. Returns `true` when the cache
    /// was updated; malformed and non-`coords` messages are dropped.
    pub fn apply_message(&self, text: &str) -> bool {
        match CoordinateMessage::parse(text) {
            Ok(CoordinateMessage::Real { x, y }) => match self.store(Point::new(x, y)) {
                Ok(()) => true,
                Err(err) => {
                    log::error!("ground truth not stored: {}", err);
                    false
                }
            },
            Ok(other) => {
                log::debug!("tracker ignoring message {:?}", other);
                false
            }
            Err(err) => {
                log::debug!("dropping malformed message {:?}: {}", text, err);
                false
            }
        }
    }
}

// ----------------------------------------------------------------------------
// Reporter (tracker side sender)
// ----------------------------------------------------------------------------

/// Anything that can carry a side-channel text message.
pub trait TextSink: Send + Sync {
    fn send_text(&self, text: &str) -> Result<()>;
}

impl<T: TextSink + ?Sized> TextSink for Arc<T> {
    fn send_text(&self, text: &str) -> Result<()> {
        (**self).send_text(text)
    }
}

/// Periodically sends `calculated` reports from its own thread.
///
/// The timer is independent of frame arrival and of detection progress; each
/// report pairs whatever ground truth and detection are current at send time.
pub struct CoordinateReporter {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<u64>>,
}

impl CoordinateReporter {
    pub fn spawn<S>(
        sink: S,
        truth: GroundTruthCache,
        slot: DetectionSlot,
        interval: Duration,
    ) -> Result<Self>
    where
        S: TextSink + 'static,
    {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_thread = stop.clone();
        let handle = std::thread::Builder::new()
            .name("coord-reporter".into())
            .spawn(move || run_reporter(&sink, &truth, &slot, interval, &stop_thread))
            .context("failed to spawn coordinate reporter")?;
        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }

    /// Stop the timer and join. Returns the number of reports sent.
    pub fn stop(mut self) -> Result<u64> {
        self.halt()
    }

    fn halt(&mut self) -> Result<u64> {
        self.stop.store(true, Ordering::SeqCst);
        match self.handle.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| anyhow!("coordinate reporter thread panicked")),
            None => Ok(0),
        }
    }
}

impl Drop for CoordinateReporter {
    fn drop(&mut self) {
        if let Err(err) = self.halt() {
            log::error!("{}", err);
        }
    }
}

/// Build the report for the current state.
pub fn current_report(truth: &GroundTruthCache, slot: &DetectionSlot) -> Result<CoordinateMessage> {
    Ok(CoordinateMessage::Calculated {
        real: truth.load()?,
        detected: slot.snapshot()?,
    })
}

fn run_reporter(
    sink: &impl TextSink,
    truth: &GroundTruthCache,
    slot: &DetectionSlot,
    interval: Duration,
    stop: &AtomicBool,
) -> u64 {
    let mut sent = 0u64;
    while !stop.load(Ordering::SeqCst) {
        let started = Instant::now();
        match current_report(truth, slot) {
            Ok(report) => match sink.send_text(&report.encode()) {
                Ok(()) => sent += 1,
                Err(err) => log::debug!("report not sent: {}", err),
            },
            Err(err) => {
                log::error!("coordinate reporter stopping: {}", err);
                break;
            }
        }
        // Sleep in short slices so stop() is honoured promptly.
        while !stop.load(Ordering::SeqCst) {
            let elapsed = started.elapsed();
            if elapsed >= interval {
                break;
            }
            std::thread::sleep((interval - elapsed).min(Duration::from_millis(10)));
        }
    }
    sent
}
