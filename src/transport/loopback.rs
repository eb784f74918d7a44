//! In-process peer link.
//!
//! Both peers share a `LoopbackRendezvous`. The offering side registers its
//! event channel under a name and advertises it as a `loopback` candidate;
//! the answering side looks the name up and builds a connected pair of
//! links, handing one end back to the offerer as `TransportConnected`.

use anyhow::{anyhow, bail, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex};

use super::{LinkFactory, PeerLink};
use crate::coords::TextSink;
use crate::frame::Frame;
use crate::session::SessionEvent;
use crate::signaling::IceCandidate;

const TRANSPORT: &str = "loopback";

/// One end of an in-process link. Everything sent is delivered to the
/// peer's event channel.
pub struct LoopbackLink {
    peer: Mutex<Option<Sender<SessionEvent>>>,
}

impl LoopbackLink {
    fn deliver(&self, event: SessionEvent) -> Result<()> {
        let guard = self
            .peer
            .lock()
            .map_err(|_| anyhow!("loopback link lock poisoned"))?;
        let peer = guard
            .as_ref()
            .ok_or_else(|| anyhow!("loopback link closed"))?;
        peer.send(event)
            .map_err(|_| anyhow!("loopback peer has gone away"))
    }
}

/// Two links wired to each other's event channels.
pub fn pair(
    a_events: Sender<SessionEvent>,
    b_events: Sender<SessionEvent>,
) -> (LoopbackLink, LoopbackLink) {
    (
        LoopbackLink {
            peer: Mutex::new(Some(b_events)),
        },
        LoopbackLink {
            peer: Mutex::new(Some(a_events)),
        },
    )
}

impl TextSink for LoopbackLink {
    fn send_text(&self, text: &str) -> Result<()> {
        self.deliver(SessionEvent::MessageReceived(text.to_string()))
    }
}

impl PeerLink for LoopbackLink {
    fn send_frame(&self, frame: &Frame) -> Result<()> {
        self.deliver(SessionEvent::FrameReceived(frame.clone()))
    }

    fn open_channel(&self, label: &str) -> Result<()> {
        self.deliver(SessionEvent::ChannelOpened(label.to_string()))
    }

    fn close(&self) -> Result<()> {
        let mut guard = self
            .peer
            .lock()
            .map_err(|_| anyhow!("loopback link lock poisoned"))?;
        if let Some(peer) = guard.take() {
            let _ = peer.send(SessionEvent::SessionEnded("peer closed the link".into()));
        }
        Ok(())
    }
}

/// Shared meeting point for in-process peers.
#[derive(Clone, Default)]
pub struct LoopbackRendezvous {
    waiting: Arc<Mutex<HashMap<String, Sender<SessionEvent>>>>,
    next_id: Arc<AtomicU64>,
}

impl LoopbackRendezvous {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LinkFactory for LoopbackRendezvous {
    fn listen(&mut self, events: Sender<SessionEvent>) -> Result<Vec<IceCandidate>> {
        let name = format!("peer-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        self.waiting
            .lock()
            .map_err(|_| anyhow!("rendezvous lock poisoned"))?
            .insert(name.clone(), events);
        Ok(vec![IceCandidate::host(TRANSPORT, &name, 0)])
    }

    fn connect(
        &mut self,
        candidate: &IceCandidate,
        events: Sender<SessionEvent>,
    ) -> Result<Arc<dyn PeerLink>> {
        let addr = candidate.address()?;
        if addr.transport != TRANSPORT {
            bail!("loopback cannot connect to a {} candidate", addr.transport);
        }
        let listener = self
            .waiting
            .lock()
            .map_err(|_| anyhow!("rendezvous lock poisoned"))?
            .remove(&addr.address)
            .ok_or_else(|| anyhow!("no loopback peer listening as '{}'", addr.address))?;
        let (ours, theirs) = pair(events, listener.clone());
        listener
            .send(SessionEvent::TransportConnected(Arc::new(theirs)))
            .map_err(|_| anyhow!("loopback listener has gone away"))?;
        Ok(Arc::new(ours))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn pair_delivers_to_the_other_side() {
        let (a_tx, a_rx) = mpsc::channel();
        let (b_tx, b_rx) = mpsc::channel();
        let (a, b) = pair(a_tx, b_tx);

        a.send_text("coords,1,2").unwrap();
        a.send_frame(&Frame::blank(2, 2, 3000)).unwrap();
        b.open_channel("coords").unwrap();

        assert!(matches!(b_rx.recv().unwrap(), SessionEvent::MessageReceived(m) if m == "coords,1,2"));
        assert!(matches!(b_rx.recv().unwrap(), SessionEvent::FrameReceived(f) if f.pts == 3000));
        assert!(matches!(a_rx.recv().unwrap(), SessionEvent::ChannelOpened(l) if l == "coords"));

        a.close().unwrap();
        assert!(matches!(b_rx.recv().unwrap(), SessionEvent::SessionEnded(_)));
        assert!(a.send_text("late").is_err());
        a.close().unwrap();
    }

    #[test]
    fn rendezvous_connects_listener_and_dialer() {
        let mut rendezvous = LoopbackRendezvous::new();
        let (offer_tx, offer_rx) = mpsc::channel();
        let (answer_tx, answer_rx) = mpsc::channel();

        let candidates = rendezvous.listen(offer_tx).unwrap();
        assert_eq!(candidates.len(), 1);
        let dialer = rendezvous.clone().connect(&candidates[0], answer_tx).unwrap();

        let accepted = match offer_rx.recv().unwrap() {
            SessionEvent::TransportConnected(link) => link,
            other => panic!("unexpected event {:?}", other),
        };
        accepted.send_text("coords,5,6").unwrap();
        assert!(matches!(answer_rx.recv().unwrap(), SessionEvent::MessageReceived(m) if m == "coords,5,6"));
        dialer.send_text("calculated,5,6,5,6").unwrap();
        assert!(matches!(offer_rx.recv().unwrap(), SessionEvent::MessageReceived(_)));

        // A name can be claimed once.
        assert!(rendezvous.connect(&candidates[0], mpsc::channel().0).is_err());
    }
}
