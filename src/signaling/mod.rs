//! Session negotiation.
//!
//! Peers exchange session descriptions, transport candidates and a final
//! `bye` through a `Signaling` channel. Messages are JSON objects keyed by
//! `type`:
//!
//! ```text
//! {"type": "offer", "sdp": "..."}
//! {"type": "answer", "sdp": "..."}
//! {"type": "candidate", "candidate": "candidate:...", "id": "0", "label": 0}
//! {"type": "bye"}
//! ```
//!
//! Implementations: an in-process `loopback_pair` and `tcp::TcpSignaling`.

pub mod tcp;

use anyhow::{anyhow, bail, Context, Result};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Mutex;

pub use tcp::TcpSignaling;

/// Offer or answer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DescriptionKind {
    Offer,
    Answer,
}

/// A session description: what each peer sends and how.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionDescription {
    pub kind: DescriptionKind,
    pub sdp: String,
}

impl SessionDescription {
    /// Describe a raw RGB video stream plus a text data channel.
    pub fn offer(width: u32, height: u32, fps: u32) -> Self {
        Self {
            kind: DescriptionKind::Offer,
            sdp: build_sdp(width, height, fps, "actpass"),
        }
    }

    /// Accept a remote offer, mirroring its media section.
    pub fn answer_for(offer: &SessionDescription) -> Result<Self> {
        if offer.kind != DescriptionKind::Offer {
            bail!("cannot answer a session description of kind {:?}", offer.kind);
        }
        let format = offer
            .video_format()
            .ok_or_else(|| anyhow!("offer carries no video format"))?;
        Ok(Self {
            kind: DescriptionKind::Answer,
            sdp: build_sdp(format.width, format.height, format.fps, "active"),
        })
    }

    /// Video format announced in the `a=fmtp` line, if any.
    pub fn video_format(&self) -> Option<VideoFormat> {
        let fmtp = self
            .sdp
            .lines()
            .find_map(|line| line.strip_prefix("a=fmtp:96 "))?;
        let mut format = VideoFormat::default();
        for pair in fmtp.split(';') {
            let (key, value) = pair.split_once('=')?;
            let value: u32 = value.trim().parse().ok()?;
            match key.trim() {
                "width" => format.width = value,
                "height" => format.height = value,
                "framerate" => format.fps = value,
                _ => {}
            }
        }
        if format.width == 0 || format.height == 0 {
            return None;
        }
        Some(format)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct VideoFormat {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

fn build_sdp(width: u32, height: u32, fps: u32, setup: &str) -> String {
    let mut rng = rand::thread_rng();
    let session_id = rng.next_u64() >> 1;
    let mut ufrag = [0u8; 4];
    let mut pwd = [0u8; 12];
    rng.fill_bytes(&mut ufrag);
    rng.fill_bytes(&mut pwd);
    format!(
        "v=0\r\n\
         o=- {session_id} 1 IN IP4 0.0.0.0\r\n\
         s=ball-track\r\n\
         t=0 0\r\n\
         m=video 9 RAW/AVP 96\r\n\
         a=rtpmap:96 rgb24/90000\r\n\
         a=fmtp:96 width={width};height={height};framerate={fps}\r\n\
         m=application 9 TEXT coords\r\n\
         a=ice-ufrag:{}\r\n\
         a=ice-pwd:{}\r\n\
         a=setup:{setup}\r\n",
        hex::encode(ufrag),
        hex::encode(pwd),
    )
}

/// A transport candidate the peer may connect to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IceCandidate {
    pub candidate: String,
    pub sdp_mid: Option<String>,
    pub sdp_mline_index: Option<u32>,
}

/// Parsed `candidate:` attribute: transport, address and port.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CandidateAddress {
    pub transport: String,
    pub address: String,
    pub port: u16,
}

impl IceCandidate {
    /// `candidate:<foundation> <component> <transport> <priority> <address> <port> typ host`
    pub fn host(transport: &str, address: &str, port: u16) -> Self {
        Self {
            candidate: format!(
                "candidate:1 1 {} 2130706431 {} {} typ host",
                transport, address, port
            ),
            sdp_mid: Some("0".to_string()),
            sdp_mline_index: Some(0),
        }
    }

    pub fn address(&self) -> Result<CandidateAddress> {
        let body = self
            .candidate
            .strip_prefix("candidate:")
            .unwrap_or(&self.candidate);
        let fields: Vec<&str> = body.split_whitespace().collect();
        if fields.len() < 6 {
            bail!("malformed candidate '{}'", self.candidate);
        }
        let port = fields[5]
            .parse()
            .with_context(|| format!("malformed candidate port in '{}'", self.candidate))?;
        Ok(CandidateAddress {
            transport: fields[2].to_ascii_lowercase(),
            address: fields[4].to_string(),
            port,
        })
    }
}

/// Everything that travels over the signaling channel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SignalMessage {
    Description(SessionDescription),
    Candidate(IceCandidate),
    Bye,
}

#[derive(Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum WireMessage {
    Offer {
        sdp: String,
    },
    Answer {
        sdp: String,
    },
    Candidate {
        candidate: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        label: Option<u32>,
    },
    Bye,
}

impl SignalMessage {
    pub fn to_json(&self) -> Result<String> {
        let wire = match self.clone() {
            SignalMessage::Description(desc) => match desc.kind {
                DescriptionKind::Offer => WireMessage::Offer { sdp: desc.sdp },
                DescriptionKind::Answer => WireMessage::Answer { sdp: desc.sdp },
            },
            SignalMessage::Candidate(cand) => WireMessage::Candidate {
                candidate: cand.candidate,
                id: cand.sdp_mid,
                label: cand.sdp_mline_index,
            },
            SignalMessage::Bye => WireMessage::Bye,
        };
        Ok(serde_json::to_string(&wire)?)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let wire: WireMessage =
            serde_json::from_str(text).map_err(|e| anyhow!("invalid signaling message: {}", e))?;
        Ok(match wire {
            WireMessage::Offer { sdp } => SignalMessage::Description(SessionDescription {
                kind: DescriptionKind::Offer,
                sdp,
            }),
            WireMessage::Answer { sdp } => SignalMessage::Description(SessionDescription {
                kind: DescriptionKind::Answer,
                sdp,
            }),
            WireMessage::Candidate {
                candidate,
                id,
                label,
            } => SignalMessage::Candidate(IceCandidate {
                candidate,
                sdp_mid: id,
                sdp_mline_index: label,
            }),
            WireMessage::Bye => SignalMessage::Bye,
        })
    }
}

/// Negotiation channel between the two peers.
///
/// Methods take `&self` so one thread can block in `receive` while another
/// sends; implementations synchronise internally. `close` must unblock a
/// pending `receive`, which then returns an error.
pub trait Signaling: Send + Sync {
    fn connect(&self) -> Result<()>;
    fn send(&self, message: &SignalMessage) -> Result<()>;
    fn receive(&self) -> Result<SignalMessage>;
    fn close(&self) -> Result<()>;
}

// ----------------------------------------------------------------------------
// Loopback signaling (in-process)
// ----------------------------------------------------------------------------

enum LoopbackItem {
    Message(SignalMessage),
    Closed,
}

/// One end of an in-process signaling pair.
pub struct LoopbackSignaling {
    peer: Mutex<Option<Sender<LoopbackItem>>>,
    own: Sender<LoopbackItem>,
    inbox: Mutex<Receiver<LoopbackItem>>,
}

/// Two connected in-process signaling ends.
pub fn loopback_pair() -> (LoopbackSignaling, LoopbackSignaling) {
    let (a_tx, a_rx) = mpsc::channel();
    let (b_tx, b_rx) = mpsc::channel();
    let a = LoopbackSignaling {
        peer: Mutex::new(Some(b_tx.clone())),
        own: a_tx.clone(),
        inbox: Mutex::new(a_rx),
    };
    let b = LoopbackSignaling {
        peer: Mutex::new(Some(a_tx)),
        own: b_tx,
        inbox: Mutex::new(b_rx),
    };
    (a, b)
}

impl Signaling for LoopbackSignaling {
    fn connect(&self) -> Result<()> {
        Ok(())
    }

    fn send(&self, message: &SignalMessage) -> Result<()> {
        let guard = self
            .peer
            .lock()
            .map_err(|_| anyhow!("signaling lock poisoned"))?;
        let peer = guard
            .as_ref()
            .ok_or_else(|| anyhow!("signaling channel closed"))?;
        peer.send(LoopbackItem::Message(message.clone()))
            .map_err(|_| anyhow!("signaling peer is gone"))
    }

    fn receive(&self) -> Result<SignalMessage> {
        let inbox = self
            .inbox
            .lock()
            .map_err(|_| anyhow!("signaling lock poisoned"))?;
        match inbox.recv() {
            Ok(LoopbackItem::Message(message)) => Ok(message),
            Ok(LoopbackItem::Closed) | Err(_) => bail!("signaling channel closed"),
        }
    }

    fn close(&self) -> Result<()> {
        let mut guard = self
            .peer
            .lock()
            .map_err(|_| anyhow!("signaling lock poisoned"))?;
        guard.take();
        // Wake a blocked receive(); fails only if the inbox is already gone.
        let _ = self.own.send(LoopbackItem::Closed);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_shapes() {
        let bye = SignalMessage::Bye.to_json().unwrap();
        assert_eq!(bye, r#"{"type":"bye"}"#);

        let offer = SignalMessage::Description(SessionDescription {
            kind: DescriptionKind::Offer,
            sdp: "v=0".into(),
        });
        assert_eq!(offer.to_json().unwrap(), r#"{"type":"offer","sdp":"v=0"}"#);

        let cand = SignalMessage::Candidate(IceCandidate::host("tcp", "127.0.0.1", 4000));
        let json: serde_json::Value = serde_json::from_str(&cand.to_json().unwrap()).unwrap();
        assert_eq!(json["type"], "candidate");
        assert_eq!(json["id"], "0");
        assert_eq!(json["label"], 0);
        assert_eq!(SignalMessage::from_json(&cand.to_json().unwrap()).unwrap(), cand);
    }

    #[test]
    fn rejects_unknown_message_types() {
        assert!(SignalMessage::from_json(r#"{"type":"hello"}"#).is_err());
        assert!(SignalMessage::from_json("not json").is_err());
    }

    #[test]
    fn answer_mirrors_offer_format() {
        let offer = SessionDescription::offer(640, 480, 30);
        assert_eq!(
            offer.video_format(),
            Some(VideoFormat {
                width: 640,
                height: 480,
                fps: 30
            })
        );
        let answer = SessionDescription::answer_for(&offer).unwrap();
        assert_eq!(answer.kind, DescriptionKind::Answer);
        assert_eq!(answer.video_format(), offer.video_format());
        assert!(answer.sdp.contains("a=setup:active"));
        assert!(SessionDescription::answer_for(&answer).is_err());
    }

    #[test]
    fn candidate_address_parses() {
        let cand = IceCandidate::host("tcp", "10.0.0.2", 5555);
        assert_eq!(
            cand.address().unwrap(),
            CandidateAddress {
                transport: "tcp".into(),
                address: "10.0.0.2".into(),
                port: 5555,
            }
        );
        let bad = IceCandidate {
            candidate: "candidate:1 1 tcp".into(),
            sdp_mid: None,
            sdp_mline_index: None,
        };
        assert!(bad.address().is_err());
    }

    #[test]
    fn loopback_delivers_in_order_and_close_unblocks() {
        let (a, b) = loopback_pair();
        a.send(&SignalMessage::Description(SessionDescription::offer(8, 8, 30)))
            .unwrap();
        a.send(&SignalMessage::Bye).unwrap();
        assert!(matches!(b.receive().unwrap(), SignalMessage::Description(_)));
        assert_eq!(b.receive().unwrap(), SignalMessage::Bye);

        let b = std::sync::Arc::new(b);
        let reader = b.clone();
        let handle = std::thread::spawn(move || reader.receive());
        std::thread::sleep(std::time::Duration::from_millis(20));
        b.close().unwrap();
        assert!(handle.join().unwrap().is_err());
        assert!(b.send(&SignalMessage::Bye).is_err());
    }
}
