//! TCP peer link using the packet framing in `codec`.
//!
//! The offering side binds a listener and advertises it as a `tcp` host
//! candidate; the answering side dials the first candidate it receives.
//! A reader thread per link turns inbound packets into session events.

use anyhow::{anyhow, bail, Context, Result};
use std::io::{BufReader, BufWriter, ErrorKind, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use super::codec::{self, Packet};
use super::{LinkFactory, PeerLink};
use crate::coords::TextSink;
use crate::frame::Frame;
use crate::session::SessionEvent;
use crate::signaling::IceCandidate;

const TRANSPORT: &str = "tcp";
const ACCEPT_POLL: Duration = Duration::from_millis(20);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

pub struct TcpLink {
    peer: SocketAddr,
    writer: Mutex<BufWriter<TcpStream>>,
    closing: Arc<AtomicBool>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl TcpLink {
    /// Wrap a connected stream and start delivering inbound packets to
    /// `events`.
    pub fn start(stream: TcpStream, events: Sender<SessionEvent>) -> Result<Self> {
        stream.set_nodelay(true)?;
        let peer = stream.peer_addr()?;
        let read_half = stream.try_clone()?;
        let closing = Arc::new(AtomicBool::new(false));
        let closing_reader = closing.clone();
        let handle = std::thread::Builder::new()
            .name(format!("link-rx-{}", peer))
            .spawn(move || read_loop(read_half, events, closing_reader))
            .map_err(|e| anyhow!("failed to spawn link reader: {}", e))?;
        log::info!("link: connected to {}", peer);
        Ok(Self {
            peer,
            writer: Mutex::new(BufWriter::new(stream)),
            closing,
            reader: Mutex::new(Some(handle)),
        })
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    fn write_packet(&self, packet: &Packet) -> Result<()> {
        let mut writer = self
            .writer
            .lock()
            .map_err(|_| anyhow!("link writer lock poisoned"))?;
        writer.write_all(&packet.encode())?;
        writer.flush()?;
        Ok(())
    }
}

fn read_loop(stream: TcpStream, events: Sender<SessionEvent>, closing: Arc<AtomicBool>) {
    let mut reader = BufReader::new(stream);
    let reason = loop {
        let event = match codec::read_packet(&mut reader) {
            Ok(Some(Packet::Frame(frame))) => SessionEvent::FrameReceived(frame),
            Ok(Some(Packet::Text(text))) => SessionEvent::MessageReceived(text),
            Ok(Some(Packet::ChannelOpen(label))) => SessionEvent::ChannelOpened(label),
            Ok(None) => break "peer closed the link".to_string(),
            Err(err) => break format!("link read failed: {}", err),
        };
        if events.send(event).is_err() {
            return;
        }
    };
    if closing.load(Ordering::SeqCst) {
        return;
    }
    log::info!("link: {}", reason);
    let _ = events.send(SessionEvent::SessionEnded(reason));
}

impl TextSink for TcpLink {
    fn send_text(&self, text: &str) -> Result<()> {
        self.write_packet(&Packet::Text(text.to_string()))
    }
}

impl PeerLink for TcpLink {
    fn send_frame(&self, frame: &Frame) -> Result<()> {
        let mut writer = self
            .writer
            .lock()
            .map_err(|_| anyhow!("link writer lock poisoned"))?;
        codec::write_frame(&mut *writer, frame)?;
        writer.flush()?;
        Ok(())
    }

    fn open_channel(&self, label: &str) -> Result<()> {
        self.write_packet(&Packet::ChannelOpen(label.to_string()))
    }

    fn close(&self) -> Result<()> {
        self.closing.store(true, Ordering::SeqCst);
        {
            let writer = self
                .writer
                .lock()
                .map_err(|_| anyhow!("link writer lock poisoned"))?;
            let _ = writer.get_ref().shutdown(Shutdown::Both);
        }
        let handle = self
            .reader
            .lock()
            .map_err(|_| anyhow!("link reader lock poisoned"))?
            .take();
        if let Some(handle) = handle {
            handle
                .join()
                .map_err(|_| anyhow!("link reader thread panicked"))?;
            log::debug!("link: closed {}", self.peer);
        }
        Ok(())
    }
}

impl Drop for TcpLink {
    fn drop(&mut self) {
        if let Err(e) = PeerLink::close(self) {
            log::warn!("link: close on drop failed: {:#}", e);
        }
    }
}

// ----------------------------------------------------------------------------
// Factory
// ----------------------------------------------------------------------------

/// Produces TCP links. `port` 0 binds an ephemeral port when listening.
pub struct TcpLinkFactory {
    host: String,
    port: u16,
    connect_timeout: Duration,
    stop: Arc<AtomicBool>,
    acceptor: Option<JoinHandle<()>>,
}

impl TcpLinkFactory {
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            host: host.to_string(),
            port,
            connect_timeout: CONNECT_TIMEOUT,
            stop: Arc::new(AtomicBool::new(false)),
            acceptor: None,
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

impl LinkFactory for TcpLinkFactory {
    fn listen(&mut self, events: Sender<SessionEvent>) -> Result<Vec<IceCandidate>> {
        if self.acceptor.is_some() {
            bail!("link factory is already listening");
        }
        let listener = TcpListener::bind((self.host.as_str(), self.port))
            .with_context(|| format!("cannot bind link listener on {}:{}", self.host, self.port))?;
        listener.set_nonblocking(true)?;
        let local = listener.local_addr()?;
        log::info!("link: listening on {}", local);

        let stop = self.stop.clone();
        let handle = std::thread::Builder::new()
            .name("link-accept".to_string())
            .spawn(move || accept_one(listener, events, stop))
            .map_err(|e| anyhow!("failed to spawn link acceptor: {}", e))?;
        self.acceptor = Some(handle);

        Ok(vec![IceCandidate::host(
            TRANSPORT,
            &local.ip().to_string(),
            local.port(),
        )])
    }

    fn connect(
        &mut self,
        candidate: &IceCandidate,
        events: Sender<SessionEvent>,
    ) -> Result<Arc<dyn PeerLink>> {
        let addr = candidate.address()?;
        if addr.transport != TRANSPORT {
            bail!("tcp link cannot connect to a {} candidate", addr.transport);
        }
        let target = (addr.address.as_str(), addr.port)
            .to_socket_addrs()
            .with_context(|| format!("cannot resolve candidate {}:{}", addr.address, addr.port))?
            .next()
            .ok_or_else(|| anyhow!("candidate {} resolves to nothing", addr.address))?;
        let stream = TcpStream::connect_timeout(&target, self.connect_timeout)
            .with_context(|| format!("cannot connect link to {}", target))?;
        Ok(Arc::new(TcpLink::start(stream, events)?))
    }
}

fn accept_one(listener: TcpListener, events: Sender<SessionEvent>, stop: Arc<AtomicBool>) {
    while !stop.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, _)) => {
                let link = stream
                    .set_nonblocking(false)
                    .map_err(anyhow::Error::from)
                    .and_then(|_| TcpLink::start(stream, events.clone()));
                let event = match link {
                    Ok(link) => SessionEvent::TransportConnected(Arc::new(link)),
                    Err(err) => SessionEvent::SessionEnded(format!("link accept failed: {:#}", err)),
                };
                let _ = events.send(event);
                return;
            }
            Err(err) if err.kind() == ErrorKind::WouldBlock => std::thread::sleep(ACCEPT_POLL),
            Err(err) => {
                let _ = events.send(SessionEvent::SessionEnded(format!(
                    "link accept failed: {}",
                    err
                )));
                return;
            }
        }
    }
}

impl Drop for TcpLinkFactory {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.acceptor.take() {
            if handle.join().is_err() {
                log::warn!("link: acceptor thread panicked");
            }
        }
    }
}
