//! Origin endpoint (offer role): streams the bouncing ball with its ground
//! truth and scores the positions reported back by the tracker.

use anyhow::{anyhow, Context, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::config::VideoSettings;
use crate::coords::CoordinateMessage;
use crate::evaluate::{evaluate, ErrorSink};
use crate::frame::BallProducer;
use crate::session::{PeerSession, SessionEvent};
use crate::sim::Ball;
use crate::transport::PeerLink;

const IDLE_POLL: Duration = Duration::from_millis(250);

#[derive(Clone, Debug, Default)]
pub struct OriginSummary {
    pub frames_sent: u64,
    pub reports_received: u64,
    pub malformed: u64,
    pub reason: String,
}

pub struct Origin {
    session: PeerSession,
    events: Receiver<SessionEvent>,
    video: VideoSettings,
    max_duration: Option<Duration>,
}

impl Origin {
    pub fn new(session: PeerSession, events: Receiver<SessionEvent>, video: VideoSettings) -> Self {
        Self {
            session,
            events,
            video,
            max_duration: None,
        }
    }

    /// End the session on its own after `limit`.
    pub fn with_max_duration(mut self, limit: Duration) -> Self {
        self.max_duration = Some(limit);
        self
    }

    pub fn event_sender(&self) -> Sender<SessionEvent> {
        self.session.event_sender()
    }

    /// Negotiate, stream until the session ends, then shut down: stop the
    /// frame thread, close the link, close signaling.
    pub fn run<S: ErrorSink>(mut self, sink: &mut S) -> Result<OriginSummary> {
        let mut summary = OriginSummary::default();
        let mut streamer: Option<FrameStreamer> = None;

        let outcome = self.session.start().and_then(|()| {
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
                if let Some(reason) = self.dispatch(event, sink, &mut streamer, &mut summary)? {
                    return Ok(reason);
                }
            }
        });

        let mut teardown = Ok(());
        if let Some(streamer) = streamer.take() {
            match streamer.stop() {
                Ok(frames) => summary.frames_sent = frames,
                Err(e) => teardown = Err(e),
            }
        }
        let closed = self.session.close();

        let reason = outcome?;
        teardown?;
        closed?;
        log::info!(
            "origin: session over ({}): frames={} reports={} malformed={}",
            reason,
            summary.frames_sent,
            summary.reports_received,
            summary.malformed
        );
        summary.reason = reason;
        Ok(summary)
    }

    fn dispatch<S: ErrorSink>(
        &mut self,
        event: SessionEvent,
        sink: &mut S,
        streamer: &mut Option<FrameStreamer>,
        summary: &mut OriginSummary,
    ) -> Result<Option<String>> {
        match self.session.handle(event)? {
            None => {}
            Some(SessionEvent::ChannelOpened(label)) => {
                if streamer.is_none() {
                    let link = self
                        .session
                        .link()
                        .ok_or_else(|| anyhow!("channel '{}' opened without a link", label))?;
                    *streamer = Some(FrameStreamer::spawn(
                        link,
                        producer_for(&self.video),
                        self.session.event_sender(),
                    )?);
                    log::info!(
                        "origin: streaming {}x{}@{}",
                        self.video.width,
                        self.video.height,
                        self.video.fps
                    );
                }
            }
            Some(SessionEvent::MessageReceived(text)) => match CoordinateMessage::parse(&text) {
                Ok(CoordinateMessage::Calculated { real, detected }) => {
                    summary.reports_received += 1;
                    sink.report(evaluate(real, detected));
                }
                Ok(other) => log::debug!("origin ignoring message {:?}", other),
                Err(err) => {
                    summary.malformed += 1;
                    log::debug!("dropping malformed message {:?}: {}", text, err);
                }
            },
            Some(SessionEvent::SessionEnded(reason)) => return Ok(Some(reason)),
            Some(other) => log::debug!("origin ignoring event {:?}", other),
        }
        Ok(None)
    }
}

fn producer_for(video: &VideoSettings) -> BallProducer {
    let ball = Ball::with_radius(video.width as i32, video.height as i32, video.radius);
    BallProducer::with_ball(ball, video.fps)
}

// ----------------------------------------------------------------------------
// Frame thread
// ----------------------------------------------------------------------------

/// Produces one frame per clock tick and sends it, followed by the ball's
/// position, until stopped or the link fails.
struct FrameStreamer {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<u64>>,
}

impl FrameStreamer {
    fn spawn(
        link: Arc<dyn PeerLink>,
        mut producer: BallProducer,
        events: Sender<SessionEvent>,
    ) -> Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_thread = stop.clone();
        let handle = std::thread::Builder::new()
            .name("frame-producer".into())
            .spawn(move || {
                let mut sent = 0u64;
                while !stop_thread.load(Ordering::SeqCst) {
                    let frame = producer.next_frame();
                    let (x, y) = producer.position();
                    let result = link.send_frame(&frame).and_then(|()| {
                        link.send_text(&CoordinateMessage::Real { x, y }.encode())
                    });
                    if let Err(err) = result {
                        if !stop_thread.load(Ordering::SeqCst) {
                            let _ = events.send(SessionEvent::SessionEnded(format!(
                                "media send failed: {:#}",
                                err
                            )));
                        }
                        break;
                    }
                    sent += 1;
                }
                sent
            })
            .context("failed to spawn frame producer")?;
        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }

    fn stop(mut self) -> Result<u64> {
        self.halt()
    }

    fn halt(&mut self) -> Result<u64> {
        self.stop.store(true, Ordering::SeqCst);
        match self.handle.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| anyhow!("frame producer thread panicked")),
            None => Ok(0),
        }
    }
}

impl Drop for FrameStreamer {
    fn drop(&mut self) {
        if let Err(err) = self.halt() {
            log::error!("{}", err);
        }
    }
}
