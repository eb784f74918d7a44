//! Peer transport: the media path for frames and the side channel for
//! coordinate text.
//!
//! A `PeerLink` is the established connection. Inbound traffic is not
//! pulled from the link; it is pushed into the session's event channel as
//! `SessionEvent`s by the link itself. A `LinkFactory` produces links during
//! negotiation: the offering side `listen`s and advertises candidates, the
//! answering side `connect`s to a candidate it received.

pub mod codec;
pub mod loopback;
pub mod tcp;

use anyhow::Result;
use std::sync::mpsc::Sender;
use std::sync::Arc;

use crate::coords::TextSink;
use crate::frame::Frame;
use crate::session::SessionEvent;
use crate::signaling::IceCandidate;

pub use codec::Packet;
pub use loopback::LoopbackRendezvous;
pub use tcp::{TcpLink, TcpLinkFactory};

/// Established connection to the remote peer. Side-channel text goes
/// through the `TextSink` supertrait.
pub trait PeerLink: TextSink {
    /// Send one video frame.
    fn send_frame(&self, frame: &Frame) -> Result<()>;

    /// Announce the side channel; the peer observes `ChannelOpened(label)`.
    fn open_channel(&self, label: &str) -> Result<()>;

    /// Tear the link down. Idempotent.
    fn close(&self) -> Result<()>;
}

/// Creates links while a session negotiates.
pub trait LinkFactory: Send {
    /// Offering side: start accepting a peer and return the candidates to
    /// advertise. The accepted link is delivered later as
    /// `SessionEvent::TransportConnected`.
    fn listen(&mut self, events: Sender<SessionEvent>) -> Result<Vec<IceCandidate>>;

    /// Answering side: connect to an advertised candidate.
    fn connect(
        &mut self,
        candidate: &IceCandidate,
        events: Sender<SessionEvent>,
    ) -> Result<Arc<dyn PeerLink>>;
}
