//! Peer session state machine.
//!
//! A `PeerSession` owns the negotiation channel, the link factory and the
//! established link. Everything that happens to a session (signaling
//! traffic, link traffic, interruption) arrives as a `SessionEvent` on one
//! channel and is fed back through `handle`, which consumes negotiation
//! events and hands the rest to the endpoint.
//!
//! ```text
//! Idle --start--> Negotiating --link up--> Connected --ended/close--> Closed
//! ```

use anyhow::{anyhow, bail, Result};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;

use crate::frame::Frame;
use crate::signaling::{
    DescriptionKind, IceCandidate, SessionDescription, SignalMessage, Signaling, VideoFormat,
};
use crate::transport::{LinkFactory, PeerLink};

/// Label of the coordinate side channel.
pub const CHANNEL_LABEL: &str = "coords";

/// Everything a session loop reacts to.
pub enum SessionEvent {
    SessionDescriptionReceived(SessionDescription),
    IceCandidateReceived(IceCandidate),
    /// The offering side accepted a peer link.
    TransportConnected(Arc<dyn PeerLink>),
    ChannelOpened(String),
    MessageReceived(String),
    FrameReceived(Frame),
    SessionEnded(String),
}

impl fmt::Debug for SessionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionEvent::SessionDescriptionReceived(desc) => f
                .debug_tuple("SessionDescriptionReceived")
                .field(&desc.kind)
                .finish(),
            SessionEvent::IceCandidateReceived(candidate) => f
                .debug_tuple("IceCandidateReceived")
                .field(&candidate.candidate)
                .finish(),
            SessionEvent::TransportConnected(_) => f.write_str("TransportConnected"),
            SessionEvent::ChannelOpened(label) => {
                f.debug_tuple("ChannelOpened").field(label).finish()
            }
            SessionEvent::MessageReceived(text) => {
                f.debug_tuple("MessageReceived").field(text).finish()
            }
            SessionEvent::FrameReceived(frame) => {
                f.debug_tuple("FrameReceived").field(frame).finish()
            }
            SessionEvent::SessionEnded(reason) => {
                f.debug_tuple("SessionEnded").field(reason).finish()
            }
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    /// Initiator; streams the ball.
    Offer,
    /// Responder; tracks the ball.
    Answer,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Offer => f.write_str("offer"),
            Role::Answer => f.write_str("answer"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Negotiating,
    Connected,
    Closed,
}

pub struct PeerSession {
    role: Role,
    state: SessionState,
    format: VideoFormat,
    signaling: Arc<dyn Signaling>,
    links: Box<dyn LinkFactory>,
    events: Sender<SessionEvent>,
    link: Option<Arc<dyn PeerLink>>,
    local: Option<SessionDescription>,
    remote: Option<SessionDescription>,
    closing: Arc<AtomicBool>,
    pump: Option<JoinHandle<()>>,
}

impl PeerSession {
    /// Create an idle session and the receiving end of its event channel.
    pub fn new(
        role: Role,
        format: VideoFormat,
        signaling: Arc<dyn Signaling>,
        links: Box<dyn LinkFactory>,
    ) -> (Self, Receiver<SessionEvent>) {
        let (events, rx) = mpsc::channel();
        let session = Self {
            role,
            state: SessionState::Idle,
            format,
            signaling,
            links,
            events,
            link: None,
            local: None,
            remote: None,
            closing: Arc::new(AtomicBool::new(false)),
            pump: None,
        };
        (session, rx)
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Sender for injecting events, e.g. an interruption from a signal
    /// handler.
    pub fn event_sender(&self) -> Sender<SessionEvent> {
        self.events.clone()
    }

    /// The established link, once `Connected`.
    pub fn link(&self) -> Option<Arc<dyn PeerLink>> {
        self.link.clone()
    }

    /// Negotiated video format. For the answering side this is the format
    /// announced in the remote offer.
    pub fn video_format(&self) -> VideoFormat {
        self.format
    }

    /// Connect signaling and begin negotiating. The offering side starts
    /// listening for a link and sends its offer followed by its candidates.
    pub fn start(&mut self) -> Result<()> {
        if self.state != SessionState::Idle {
            bail!("session already started (state {:?})", self.state);
        }
        self.signaling.connect()?;
        self.spawn_pump()?;
        self.state = SessionState::Negotiating;

        if self.role == Role::Offer {
            let candidates = self.links.listen(self.events.clone())?;
            let offer = SessionDescription::offer(
                self.format.width,
                self.format.height,
                self.format.fps,
            );
            self.signaling
                .send(&SignalMessage::Description(offer.clone()))?;
            self.local = Some(offer);
            for candidate in candidates {
                self.signaling.send(&SignalMessage::Candidate(candidate))?;
            }
            log::info!("session: offer sent, waiting for peer");
        } else {
            log::info!("session: waiting for offer");
        }
        Ok(())
    }

    fn spawn_pump(&mut self) -> Result<()> {
        let signaling = self.signaling.clone();
        let events = self.events.clone();
        let closing = self.closing.clone();
        let handle = std::thread::Builder::new()
            .name("signaling-rx".to_string())
            .spawn(move || loop {
                let event = match signaling.receive() {
                    Ok(SignalMessage::Description(desc)) => {
                        SessionEvent::SessionDescriptionReceived(desc)
                    }
                    Ok(SignalMessage::Candidate(candidate)) => {
                        SessionEvent::IceCandidateReceived(candidate)
                    }
                    Ok(SignalMessage::Bye) => {
                        if !closing.load(Ordering::SeqCst) {
                            let _ = events.send(SessionEvent::SessionEnded(
                                "peer ended the session".to_string(),
                            ));
                        }
                        return;
                    }
                    Err(err) => {
                        if !closing.load(Ordering::SeqCst) {
                            let _ = events.send(SessionEvent::SessionEnded(format!(
                                "signaling failed: {:#}",
                                err
                            )));
                        }
                        return;
                    }
                };
                if events.send(event).is_err() {
                    return;
                }
            })
            .map_err(|e| anyhow!("failed to spawn signaling reader: {}", e))?;
        self.pump = Some(handle);
        Ok(())
    }

    /// Apply one event. Negotiation events are consumed (`Ok(None)`);
    /// everything the endpoint must see is returned.
    pub fn handle(&mut self, event: SessionEvent) -> Result<Option<SessionEvent>> {
        match event {
            SessionEvent::SessionDescriptionReceived(desc) => {
                self.on_description(desc)?;
                Ok(None)
            }
            SessionEvent::IceCandidateReceived(candidate) => {
                self.on_candidate(&candidate)?;
                Ok(None)
            }
            SessionEvent::TransportConnected(link) => self.on_transport(link),
            SessionEvent::SessionEnded(reason) => {
                self.state = SessionState::Closed;
                Ok(Some(SessionEvent::SessionEnded(reason)))
            }
            other => Ok(Some(other)),
        }
    }

    /// Apply one message read straight from signaling.
    pub fn handle_signal(&mut self, message: SignalMessage) -> Result<Option<SessionEvent>> {
        let event = match message {
            SignalMessage::Description(desc) => SessionEvent::SessionDescriptionReceived(desc),
            SignalMessage::Candidate(candidate) => SessionEvent::IceCandidateReceived(candidate),
            SignalMessage::Bye => SessionEvent::SessionEnded("peer ended the session".into()),
        };
        self.handle(event)
    }

    fn on_description(&mut self, desc: SessionDescription) -> Result<()> {
        if !matches!(
            self.state,
            SessionState::Negotiating | SessionState::Connected
        ) {
            bail!(
                "unexpected {:?} description in state {:?}",
                desc.kind,
                self.state
            );
        }
        if self.remote.is_some() {
            bail!("duplicate remote description");
        }
        match (self.role, desc.kind) {
            (Role::Answer, DescriptionKind::Offer) => {
                let answer = SessionDescription::answer_for(&desc)?;
                if let Some(format) = desc.video_format() {
                    self.format = format;
                }
                self.signaling
                    .send(&SignalMessage::Description(answer.clone()))?;
                log::info!(
                    "session: answered offer for {}x{}@{}",
                    self.format.width,
                    self.format.height,
                    self.format.fps
                );
                self.local = Some(answer);
            }
            (Role::Offer, DescriptionKind::Answer) => {
                log::info!("session: offer accepted by peer");
            }
            (role, kind) => bail!("{} peer cannot accept a remote {:?}", role, kind),
        }
        self.remote = Some(desc);
        Ok(())
    }

    fn on_candidate(&mut self, candidate: &IceCandidate) -> Result<()> {
        match self.role {
            Role::Offer => {
                log::debug!("session: ignoring remote candidate {}", candidate.candidate);
                Ok(())
            }
            Role::Answer => {
                if !matches!(
                    self.state,
                    SessionState::Negotiating | SessionState::Connected
                ) {
                    bail!("unexpected candidate in state {:?}", self.state);
                }
                if self.remote.is_none() {
                    bail!("candidate received before the remote description");
                }
                if self.link.is_some() {
                    log::debug!("session: already connected, ignoring {}", candidate.candidate);
                    return Ok(());
                }
                let link = self.links.connect(candidate, self.events.clone())?;
                self.link = Some(link);
                self.state = SessionState::Connected;
                log::info!("session: connected via {}", candidate.candidate);
                Ok(())
            }
        }
    }

    fn on_transport(&mut self, link: Arc<dyn PeerLink>) -> Result<Option<SessionEvent>> {
        if self.role != Role::Offer || self.state != SessionState::Negotiating {
            let _ = link.close();
            bail!(
                "unexpected transport for {} peer in state {:?}",
                self.role,
                self.state
            );
        }
        link.open_channel(CHANNEL_LABEL)?;
        self.link = Some(link);
        self.state = SessionState::Connected;
        log::info!("session: peer connected, channel '{}' open", CHANNEL_LABEL);
        Ok(Some(SessionEvent::ChannelOpened(CHANNEL_LABEL.to_string())))
    }

    /// Say bye, close the link, then close signaling and join the reader.
    /// Safe to call more than once.
    pub fn close(&mut self) -> Result<()> {
        self.closing.store(true, Ordering::SeqCst);
        let mut first_err = None;
        if self.pump.is_some() {
            if let Err(e) = self.signaling.send(&SignalMessage::Bye) {
                log::debug!("session: bye not delivered: {:#}", e);
            }
        }
        if let Some(link) = self.link.take() {
            if let Err(e) = link.close() {
                first_err = first_err.or(Some(e));
            }
        }
        if let Some(handle) = self.pump.take() {
            if let Err(e) = self.signaling.close() {
                first_err = first_err.or(Some(e));
            }
            if handle.join().is_err() {
                first_err = first_err.or(Some(anyhow!("signaling reader thread panicked")));
            }
        }
        if self.state != SessionState::Closed {
            log::info!("session: closed");
        }
        self.state = SessionState::Closed;
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl Drop for PeerSession {
    fn drop(&mut self) {
        if self.pump.is_some() || self.link.is_some() {
            if let Err(e) = self.close() {
                log::warn!("session: close on drop failed: {:#}", e);
            }
        }
    }
}
