//! Tracker endpoint (answer role): detects the ball in received frames and
//! reports detections, paired with the latest ground truth, back to the
//! origin.

use anyhow::{anyhow, Result};
use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender};
use std::time::{Duration, Instant};

use crate::coords::{CoordinateReporter, GroundTruthCache, DEFAULT_REPORT_INTERVAL};
use crate::detect::{DetectionSlot, DetectionWorker, DetectorBackend, FrameQueue, Point, WorkerStats};
use crate::frame::Frame;
use crate::session::{PeerSession, SessionEvent};

const IDLE_POLL: Duration = Duration::from_millis(250);

#[derive(Clone, Debug, Default)]
pub struct TrackerSummary {
    pub frames_received: u64,
    /// Frames evicted from a bounded detection queue.
    pub frames_dropped: u64,
    pub reports_sent: u64,
    pub worker: WorkerStats,
    pub last_detection: Option<Point>,
    pub last_truth: Point,
    /// Most recent frame, when `keep_last_frame` was requested.
    pub last_frame: Option<Frame>,
    pub reason: String,
}

pub struct Tracker {
    session: PeerSession,
    events: Receiver<SessionEvent>,
    report_interval: Duration,
    max_backlog: Option<usize>,
    max_duration: Option<Duration>,
    keep_last_frame: bool,
}

impl Tracker {
    pub fn new(session: PeerSession, events: Receiver<SessionEvent>) -> Self {
        Self {
            session,
            events,
            report_interval: DEFAULT_REPORT_INTERVAL,
            max_backlog: None,
            max_duration: None,
            keep_last_frame: false,
        }
    }

    pub fn with_report_interval(mut self, interval: Duration) -> Self {
        self.report_interval = interval;
        self
    }

    /// Bound the detection queue; the oldest pending frame is dropped when
    /// the worker falls behind.
    pub fn with_max_backlog(mut self, max_backlog: Option<usize>) -> Self {
        self.max_backlog = max_backlog;
        self
    }

    pub fn with_max_duration(mut self, limit: Duration) -> Self {
        self.max_duration = Some(limit);
        self
    }

    pub fn keep_last_frame(mut self, keep: bool) -> Self {
        self.keep_last_frame = keep;
        self
    }

    pub fn event_sender(&self) -> Sender<SessionEvent> {
        self.session.event_sender()
    }

    /// Track until the session ends. Shutdown runs in order: stop the
    /// reporter, drain and join the detection worker, close the link, close
    /// signaling.
    pub fn run<B: DetectorBackend + 'static>(mut self, backend: B) -> Result<TrackerSummary> {
        let queue = match self.max_backlog {
            Some(max) => FrameQueue::with_max_backlog(max),
            None => FrameQueue::unbounded(),
        };
        let slot = DetectionSlot::new();
        let truth = GroundTruthCache::new();
        let worker = DetectionWorker::spawn(backend, queue.clone(), slot.clone())?;
        log::info!("tracker: detection backend '{}'", worker.backend_name());

        let mut state = TrackState {
            worker: &worker,
            slot: &slot,
            truth: &truth,
            reporter: None,
            summary: TrackerSummary::default(),
        };
        let outcome = self.session.start().and_then(|()| self.event_loop(&mut state));

        let TrackState {
            reporter,
            mut summary,
            ..
        } = state;
        let mut teardown: Result<()> = Ok(());
        if let Some(reporter) = reporter {
            match reporter.stop() {
                Ok(sent) => summary.reports_sent = sent,
                Err(e) => teardown = Err(e),
            }
        }
        match worker.shutdown() {
            Ok(stats) => summary.worker = stats,
            Err(e) => {
                if teardown.is_ok() {
                    teardown = Err(e);
                }
            }
        }
        let closed = self.session.close();

        let reason = outcome?;
        teardown?;
        closed?;

        summary.frames_dropped = queue.evicted()?;
        if summary.frames_dropped > 0 {
            log::info!(
                "tracker: {} frames dropped behind the worker",
                summary.frames_dropped
            );
        }
        summary.last_detection = slot.latest()?;
        summary.last_truth = truth.load()?;
        log::info!(
            "tracker: session over ({}): frames={} detections={} reports={}",
            reason,
            summary.frames_received,
            summary.worker.detections,
            summary.reports_sent
        );
        summary.reason = reason;
        Ok(summary)
    }

    fn event_loop(&mut self, state: &mut TrackState<'_>) -> Result<String> {
        let deadline = self.max_duration.map(|limit| Instant::now() + limit);
        loop {
            let wait = match deadline {
                Some(deadline) => deadline.saturating_duration_since(Instant::now()),
                None => IDLE_POLL,
            };
            let event = match self.events.recv_timeout(wait) {
                Ok(event) => event,
                Err(RecvTimeoutError::Timeout) => {
                    if deadline.is_some_and(|d| Instant::now() >= d) {
                        return Ok("time limit reached".to_string());
                    }
                    continue;
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Ok("event channel closed".to_string());
                }
            };
            match self.session.handle(event)? {
                None => {}
                Some(SessionEvent::FrameReceived(frame)) => {
                    state.summary.frames_received += 1;
                    if self.keep_last_frame {
                        state.summary.last_frame = Some(frame.clone());
                    }
                    state.worker.submit(frame)?;
                }
                Some(SessionEvent::MessageReceived(text)) => {
                    state.truth.apply_message(&text);
                }
                Some(SessionEvent::ChannelOpened(label)) => {
                    if state.reporter.is_none() {
                        let link = self
                            .session
                            .link()
                            .ok_or_else(|| anyhow!("channel '{}' opened without a link", label))?;
                        state.reporter = Some(CoordinateReporter::spawn(
                            link,
                            state.truth.clone(),
                            state.slot.clone(),
                            self.report_interval,
                        )?);
                        log::info!(
                            "tracker: channel '{}' open, reporting every {:?}",
                            label,
                            self.report_interval
                        );
                    }
                }
                Some(SessionEvent::SessionEnded(reason)) => return Ok(reason),
                Some(other) => log::debug!("tracker ignoring event {:?}", other),
            }
        }
    }
}

struct TrackState<'a> {
    worker: &'a DetectionWorker,
    slot: &'a DetectionSlot,
    truth: &'a GroundTruthCache,
    reporter: Option<CoordinateReporter>,
    summary: TrackerSummary,
}
