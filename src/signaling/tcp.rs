//! TCP signaling: newline-delimited JSON over one TCP connection.
//!
//! The answering peer listens and the offering peer connects, retrying until
//! `connect_timeout` elapses. Either wait ends early once the stop flag is
//! set. End of stream is reported as `bye`.

use anyhow::{anyhow, bail, Context, Result};
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use super::{SignalMessage, Signaling};

/// Upper bound for one signaling line.
const MAX_LINE_BYTES: u64 = 64 * 1024;

const RETRY_DELAY: Duration = Duration::from_millis(100);

const ACCEPT_POLL: Duration = Duration::from_millis(50);

/// Which side of the TCP connection this peer takes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TcpRole {
    Listen,
    Connect,
}

pub struct TcpSignaling {
    addr: String,
    role: TcpRole,
    connect_timeout: Duration,
    stop: Arc<AtomicBool>,
    writer: Mutex<Option<TcpStream>>,
    reader: Mutex<Option<BufReader<TcpStream>>>,
}

impl TcpSignaling {
    pub fn new(host: &str, port: u16, role: TcpRole, connect_timeout: Duration) -> Self {
        Self {
            addr: format!("{}:{}", host, port),
            role,
            connect_timeout,
            stop: Arc::new(AtomicBool::new(false)),
            writer: Mutex::new(None),
            reader: Mutex::new(None),
        }
    }

    /// Share a stop flag; setting it makes a pending `connect` fail.
    pub fn with_stop_flag(mut self, stop: Arc<AtomicBool>) -> Self {
        self.stop = stop;
        self
    }

    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    fn check_stop(&self) -> Result<()> {
        if self.stop.load(Ordering::SeqCst) {
            bail!("signaling interrupted while waiting for {}", self.addr);
        }
        Ok(())
    }

    fn resolve(&self) -> Result<SocketAddr> {
        self.addr
            .to_socket_addrs()
            .with_context(|| format!("cannot resolve signaling address {}", self.addr))?
            .next()
            .ok_or_else(|| anyhow!("signaling address {} resolves to nothing", self.addr))
    }

    fn open_stream(&self) -> Result<TcpStream> {
        let addr = self.resolve()?;
        match self.role {
            TcpRole::Listen => {
                let listener = TcpListener::bind(addr)
                    .with_context(|| format!("cannot listen for signaling on {}", addr))?;
                listener.set_nonblocking(true)?;
                log::info!("signaling: waiting for peer on {}", listener.local_addr()?);
                loop {
                    self.check_stop()?;
                    match listener.accept() {
                        Ok((stream, peer)) => {
                            stream.set_nonblocking(false)?;
                            log::info!("signaling: peer connected from {}", peer);
                            return Ok(stream);
                        }
                        Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                            std::thread::sleep(ACCEPT_POLL);
                        }
                        Err(e) => return Err(e).context("signaling accept failed"),
                    }
                }
            }
            TcpRole::Connect => {
                let deadline = Instant::now() + self.connect_timeout;
                loop {
                    self.check_stop()?;
                    match TcpStream::connect(addr) {
                        Ok(stream) => {
                            log::info!("signaling: connected to {}", addr);
                            return Ok(stream);
                        }
                        Err(err) if Instant::now() < deadline => {
                            log::debug!("signaling: {} not reachable yet: {}", addr, err);
                            std::thread::sleep(RETRY_DELAY);
                        }
                        Err(err) => {
                            return Err(err)
                                .with_context(|| format!("cannot reach signaling peer {}", addr))
                        }
                    }
                }
            }
        }
    }
}

impl Signaling for TcpSignaling {
    fn connect(&self) -> Result<()> {
        let stream = self.open_stream()?;
        stream.set_nodelay(true)?;
        let read_half = stream.try_clone()?;
        *self
            .writer
            .lock()
            .map_err(|_| anyhow!("signaling lock poisoned"))? = Some(stream);
        *self
            .reader
            .lock()
            .map_err(|_| anyhow!("signaling lock poisoned"))? = Some(BufReader::new(read_half));
        Ok(())
    }

    fn send(&self, message: &SignalMessage) -> Result<()> {
        let mut line = message.to_json()?;
        line.push('\n');
        let mut guard = self
            .writer
            .lock()
            .map_err(|_| anyhow!("signaling lock poisoned"))?;
        let stream = guard
            .as_mut()
            .ok_or_else(|| anyhow!("signaling not connected"))?;
        stream.write_all(line.as_bytes())?;
        stream.flush()?;
        Ok(())
    }

    fn receive(&self) -> Result<SignalMessage> {
        let mut guard = self
            .reader
            .lock()
            .map_err(|_| anyhow!("signaling lock poisoned"))?;
        let reader = guard
            .as_mut()
            .ok_or_else(|| anyhow!("signaling not connected"))?;
        let mut line = String::new();
        let read = reader.by_ref().take(MAX_LINE_BYTES).read_line(&mut line)?;
        if read == 0 {
            return Ok(SignalMessage::Bye);
        }
        if !line.ends_with('\n') && read as u64 == MAX_LINE_BYTES {
            bail!("signaling message exceeds {} bytes", MAX_LINE_BYTES);
        }
        SignalMessage::from_json(line.trim_end())
    }

    fn close(&self) -> Result<()> {
        let guard = self
            .writer
            .lock()
            .map_err(|_| anyhow!("signaling lock poisoned"))?;
        if let Some(stream) = guard.as_ref() {
            // Unblocks a reader parked in receive().
            let _ = stream.shutdown(Shutdown::Both);
        }
        Ok(())
    }
}
