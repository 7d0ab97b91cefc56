//! Connection Manager
//!
//! Keeps one logical session alive across physical reconnects.
//!
//! ## States
//! ```text
//!                 connect()
//!                     │
//!                     ▼
//!   ┌──────────────▶ Open ───── EOF / I/O error ─────┐
//!   │                 │                               ▼
//!   │            close() / CLOSE               Connecting
//!   │                 │                        (fixed delay,
//!   │                 ▼                         ≤ max_retries)
//!   │           Disconnected ◀── exhausted ───────────┤
//!   │                                                 │
//!   └───── WELCOME, replay queued frames in order ────┘
//! ```
//!
//! A single supervisor thread owns the inbound half of the socket. It routes
//! responses to the correlator, pongs to their ping waiters, and runs the
//! reconnect loop, so reconnection never races with itself.
//!
//! Requests sent while `Connecting` are queued and replayed after the next
//! successful handshake, skipping any whose caller already gave up.

use std::collections::{HashMap, VecDeque};
use std::io::{BufReader, ErrorKind};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;

use crate::config::ClientConfig;
use crate::error::{Result, VaultError};
use crate::protocol::{read_frame, write_frame, CloseCode, Frame, FrameKind, Response};

use super::correlator::RequestCorrelator;

/// Connection lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Open,
    Closing,
}

/// What `send` did with a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Written to the open socket
    Sent,
    /// Held until the connection is re-established
    Queued,
}

/// Notifications about the connection, delivered to subscribers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    Connected,
    Reconnecting { attempt: u32 },
    /// `terminal` is set when no further reconnects will be attempted
    Disconnected { terminal: bool },
    /// A queued request was not replayed because its caller stopped waiting
    Dropped { request_id: String },
    Error(String),
}

/// Why the connection ended for good
#[derive(Debug, Clone)]
enum Terminal {
    Local,
    Remote { code: u16, reason: String },
    Exhausted { attempts: u32 },
}

impl Terminal {
    fn error(&self) -> VaultError {
        match self {
            Terminal::Local => VaultError::NotConnected,
            Terminal::Remote { code, reason } => VaultError::Closed {
                code: *code,
                reason: reason.clone(),
            },
            Terminal::Exhausted { attempts } => VaultError::ReconnectExhausted {
                attempts: *attempts,
            },
        }
    }
}

/// How a read loop ended
enum Disconnect {
    /// `close()` was called
    Local,
    /// The server sent CLOSE
    Remote { code: CloseCode, reason: String },
    /// The socket dropped without a CLOSE
    Abnormal(VaultError),
}

struct Queued {
    request_id: String,
    frame: Frame,
}

struct Link {
    state: ConnectionState,
    writer: Option<TcpStream>,
    attempts: u32,
    queue: VecDeque<Queued>,
    terminal: Option<Terminal>,
}

struct Shared {
    config: ClientConfig,
    correlator: Arc<RequestCorrelator>,
    link: Mutex<Link>,
    pings: Mutex<HashMap<u64, Sender<Instant>>>,
    next_nonce: AtomicU64,
    listeners: Mutex<Vec<Sender<ClientEvent>>>,

    /// Interrupts the reconnect delay when the manager is closed
    wake_tx: Sender<()>,
    wake_rx: Receiver<()>,
}

/// Owns the transport for a client
pub struct ConnectionManager {
    shared: Arc<Shared>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionManager {
    /// Open the transport and start the supervisor
    ///
    /// Fails with `Unauthorized` when the server rejects the credential and
    /// with `ConnectionTimeout` when it cannot be reached in time. The
    /// initial connect is not retried.
    pub fn connect(config: ClientConfig, correlator: Arc<RequestCorrelator>) -> Result<Self> {
        let stream = open_transport(&config)?;
        let writer = stream.try_clone()?;
        tracing::info!("Connected to {}", config.server_addr);

        let (wake_tx, wake_rx) = channel::unbounded();
        let shared = Arc::new(Shared {
            config,
            correlator,
            link: Mutex::new(Link {
                state: ConnectionState::Open,
                writer: Some(writer),
                attempts: 0,
                queue: VecDeque::new(),
                terminal: None,
            }),
            pings: Mutex::new(HashMap::new()),
            next_nonce: AtomicU64::new(1),
            listeners: Mutex::new(Vec::new()),
            wake_tx,
            wake_rx,
        });

        let supervisor = {
            let shared = Arc::clone(&shared);
            thread::Builder::new()
                .name("vaultkv-client".to_string())
                .spawn(move || shared.supervise(stream))?
        };

        Ok(Self {
            shared,
            supervisor: Mutex::new(Some(supervisor)),
        })
    }

    /// Write a frame now, or queue it while reconnecting
    pub fn send(&self, request_id: &str, frame: Frame) -> Result<Delivery> {
        let mut link = self.shared.link.lock();
        match link.state {
            ConnectionState::Open => {
                let written = match link.writer.as_mut() {
                    Some(writer) => write_frame(writer, &frame),
                    None => Err(VaultError::NotConnected),
                };
                match written {
                    Ok(()) => Ok(Delivery::Sent),
                    Err(VaultError::Io(e))
                        if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) =>
                    {
                        // The peer stopped reading and the socket may now hold a
                        // partial frame; drop it so the supervisor reconnects
                        tracing::warn!("Write of {} timed out, dropping connection", request_id);
                        if let Some(writer) = link.writer.as_ref() {
                            let _ = writer.shutdown(Shutdown::Both);
                        }
                        Err(VaultError::RequestTimeout {
                            request_id: request_id.to_string(),
                        })
                    }
                    Err(e) => {
                        // The supervisor will see the drop and replay this
                        tracing::debug!("Write failed, queueing {}: {}", request_id, e);
                        link.queue.push_back(Queued {
                            request_id: request_id.to_string(),
                            frame,
                        });
                        Ok(Delivery::Queued)
                    }
                }
            }
            ConnectionState::Connecting => {
                link.queue.push_back(Queued {
                    request_id: request_id.to_string(),
                    frame,
                });
                Ok(Delivery::Queued)
            }
            ConnectionState::Closing => Err(VaultError::NotConnected),
            ConnectionState::Disconnected => Err(link
                .terminal
                .as_ref()
                .map(Terminal::error)
                .unwrap_or(VaultError::NotConnected)),
        }
    }

    /// Measure a round trip
    ///
    /// `Ok(None)` means no PONG arrived within the ping timeout. Never
    /// touches the retry counter.
    pub fn ping(&self) -> Result<Option<Duration>> {
        let nonce = self.shared.next_nonce.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = channel::bounded(1);
        self.shared.pings.lock().insert(nonce, tx);

        let started = Instant::now();
        let written = {
            let mut link = self.shared.link.lock();
            let open = link.state == ConnectionState::Open;
            match link.writer.as_mut() {
                Some(writer) if open => Some(write_frame(writer, &Frame::ping(nonce))),
                _ => None,
            }
        };
        let Some(written) = written else {
            self.shared.pings.lock().remove(&nonce);
            return Err(VaultError::NotConnected);
        };

        let rtt = match written {
            Ok(()) => rx
                .recv_timeout(self.shared.config.ping_timeout)
                .ok()
                .map(|at| at.saturating_duration_since(started)),
            Err(e) => {
                tracing::debug!("Ping write failed: {}", e);
                None
            }
        };
        self.shared.pings.lock().remove(&nonce);
        Ok(rtt)
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.link.lock().state
    }

    /// Consecutive failed reconnect attempts so far
    pub fn reconnect_attempts(&self) -> u32 {
        self.shared.link.lock().attempts
    }

    /// Receive connection events from now on
    pub fn subscribe(&self) -> Receiver<ClientEvent> {
        let (tx, rx) = channel::unbounded();
        self.shared.listeners.lock().push(tx);
        rx
    }

    /// Close the connection for good (no reconnect)
    ///
    /// Queued and in-flight requests fail with `NotConnected`. Idempotent.
    pub fn close(&self) {
        let (writer, was_terminal) = {
            let mut link = self.shared.link.lock();
            let was_terminal = link.terminal.is_some();
            if !was_terminal {
                link.state = ConnectionState::Closing;
            }
            link.queue.clear();
            (link.writer.take(), was_terminal)
        };

        let _ = self.shared.wake_tx.send(());
        if let Some(mut stream) = writer {
            let _ = write_frame(&mut stream, &Frame::close(CloseCode::Normal, "client closed"));
            let _ = stream.shutdown(Shutdown::Both);
        }

        // Queued requests are pending too
        self.shared.correlator.fail_all(|| VaultError::NotConnected);

        if let Some(handle) = self.supervisor.lock().take() {
            let _ = handle.join();
        }

        if !was_terminal {
            {
                let mut link = self.shared.link.lock();
                link.state = ConnectionState::Disconnected;
                link.terminal.get_or_insert(Terminal::Local);
            }
            tracing::info!("Connection to {} closed", self.shared.config.server_addr);
            self.shared
                .emit(ClientEvent::Disconnected { terminal: true });
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.close();
    }
}

// =============================================================================
// Supervisor
// =============================================================================

impl Shared {
    fn supervise(self: Arc<Self>, mut stream: TcpStream) {
        loop {
            match self.read_until_disconnect(stream) {
                Disconnect::Local => return,
                Disconnect::Remote { code, reason } => {
                    tracing::warn!("Server closed the connection ({}): {}", code.as_u16(), reason);
                    self.terminate(Terminal::Remote {
                        code: code.as_u16(),
                        reason,
                    });
                    return;
                }
                Disconnect::Abnormal(e) => {
                    tracing::warn!(
                        "Connection to {} lost ({}): {}",
                        self.config.server_addr,
                        CloseCode::Abnormal.as_u16(),
                        e
                    );
                    match self.reconnect() {
                        Some(next) => stream = next,
                        None => return,
                    }
                }
            }
        }
    }

    fn read_until_disconnect(&self, stream: TcpStream) -> Disconnect {
        let mut reader = BufReader::new(stream);
        loop {
            let frame = match read_frame(&mut reader) {
                Ok(frame) => frame,
                Err(_) if self.is_closing() => return Disconnect::Local,
                Err(e) => return Disconnect::Abnormal(e),
            };

            match frame.kind {
                FrameKind::Message => self.on_message(&frame.payload),
                FrameKind::Pong => match frame.nonce() {
                    Ok(nonce) => {
                        if let Some(waiter) = self.pings.lock().remove(&nonce) {
                            let _ = waiter.send(Instant::now());
                        }
                    }
                    Err(e) => tracing::warn!("Ignoring malformed PONG: {}", e),
                },
                FrameKind::Close => {
                    if self.is_closing() {
                        return Disconnect::Local;
                    }
                    let (code, reason) = frame.close_reason().unwrap_or_else(|_| {
                        (CloseCode::ProtocolError, "malformed CLOSE frame".to_string())
                    });
                    return Disconnect::Remote { code, reason };
                }
                other => tracing::warn!("Ignoring unexpected {:?} frame", other),
            }
        }
    }

    fn on_message(&self, payload: &[u8]) {
        match Response::from_slice(payload) {
            Ok(response) => {
                let request_id = response.request_id.clone();
                self.correlator.resolve(&request_id, response.into_result());
            }
            Err(e) => {
                tracing::warn!("Discarding undecodable response: {}", e);
                self.emit(ClientEvent::Error(e.to_string()));
            }
        }
    }

    /// Retry with a fixed delay until a handshake succeeds, the retry budget
    /// runs out, or the manager is closed
    fn reconnect(&self) -> Option<TcpStream> {
        {
            let mut link = self.link.lock();
            if link.state == ConnectionState::Closing {
                return None;
            }
            link.state = ConnectionState::Connecting;
            link.writer = None;
        }
        self.emit(ClientEvent::Disconnected { terminal: false });

        loop {
            let attempt = {
                let mut link = self.link.lock();
                if link.state == ConnectionState::Closing {
                    return None;
                }
                if link.attempts >= self.config.max_retries {
                    let attempts = link.attempts;
                    drop(link);
                    tracing::error!(
                        "Giving up on {} after {} attempts",
                        self.config.server_addr,
                        attempts
                    );
                    self.terminate(Terminal::Exhausted { attempts });
                    return None;
                }
                link.attempts += 1;
                link.attempts
            };

            self.emit(ClientEvent::Reconnecting { attempt });
            match self.wake_rx.recv_timeout(self.config.reconnect_delay) {
                Err(RecvTimeoutError::Timeout) => {}
                Ok(()) | Err(RecvTimeoutError::Disconnected) => return None,
            }

            let stream = match open_transport(&self.config) {
                Ok(stream) => stream,
                Err(e) => {
                    tracing::warn!(
                        "Reconnect attempt {}/{} failed: {}",
                        attempt,
                        self.config.max_retries,
                        e
                    );
                    self.emit(ClientEvent::Error(e.to_string()));
                    continue;
                }
            };

            match self.resume(&stream) {
                Ok(true) => {
                    tracing::info!("Reconnected to {}", self.config.server_addr);
                    self.emit(ClientEvent::Connected);
                    return Some(stream);
                }
                Ok(false) => {
                    let _ = stream.shutdown(Shutdown::Both);
                    return None;
                }
                Err(e) => {
                    tracing::warn!("Replay after reconnect failed: {}", e);
                    self.emit(ClientEvent::Error(e.to_string()));
                }
            }
        }
    }

    /// Install a fresh socket and replay the queue in send order
    ///
    /// Holds the link lock throughout, so new sends land after the replay.
    /// Returns `Ok(false)` if the manager was closed meanwhile.
    fn resume(&self, stream: &TcpStream) -> Result<bool> {
        let mut dropped = Vec::new();
        let mut link = self.link.lock();
        if link.state == ConnectionState::Closing {
            return Ok(false);
        }

        let mut writer = stream.try_clone()?;
        while let Some(entry) = link.queue.front() {
            if !self.correlator.is_pending(&entry.request_id) {
                dropped.push(entry.request_id.clone());
            } else {
                write_frame(&mut writer, &entry.frame)?;
            }
            link.queue.pop_front();
        }

        link.writer = Some(writer);
        link.attempts = 0;
        link.state = ConnectionState::Open;
        drop(link);

        for request_id in dropped {
            tracing::debug!("Dropping expired queued request {}", request_id);
            self.emit(ClientEvent::Dropped { request_id });
        }
        Ok(true)
    }

    /// End the connection for good and fail everything still waiting
    fn terminate(&self, terminal: Terminal) {
        {
            let mut link = self.link.lock();
            link.state = ConnectionState::Disconnected;
            link.writer = None;
            link.terminal = Some(terminal.clone());
            link.queue.clear();
        }

        self.correlator.fail_all(|| terminal.error());
        self.emit(ClientEvent::Disconnected { terminal: true });
    }

    fn is_closing(&self) -> bool {
        self.link.lock().state == ConnectionState::Closing
    }

    fn emit(&self, event: ClientEvent) {
        self.listeners
            .lock()
            .retain(|listener| listener.send(event.clone()).is_ok());
    }
}

// =============================================================================
// Handshake
// =============================================================================

/// Connect, send HELLO and wait for WELCOME
fn open_transport(config: &ClientConfig) -> Result<TcpStream> {
    let addr = resolve(&config.server_addr)?;
    let stream = TcpStream::connect_timeout(&addr, config.connect_timeout).map_err(|e| {
        if e.kind() == ErrorKind::TimedOut {
            VaultError::ConnectionTimeout
        } else {
            VaultError::Io(e)
        }
    })?;
    stream.set_nodelay(true)?;
    stream.set_read_timeout(Some(config.connect_timeout))?;
    // Shared by every clone of the socket, so a stalled peer can't pin the link lock
    stream.set_write_timeout(Some(config.request_timeout))?;

    let mut io = &stream;
    write_frame(&mut io, &Frame::hello(config.auth_token.as_deref()))?;
    let reply = read_frame(&mut io).map_err(|e| match e {
        VaultError::Io(io_err)
            if matches!(io_err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) =>
        {
            VaultError::ConnectionTimeout
        }
        other => other,
    })?;

    match reply.kind {
        FrameKind::Welcome => {}
        FrameKind::Close => {
            let (code, reason) = reply.close_reason()?;
            return Err(if code.is_auth_failure() {
                VaultError::Unauthorized {
                    code: code.as_u16(),
                    reason,
                }
            } else {
                VaultError::Closed {
                    code: code.as_u16(),
                    reason,
                }
            });
        }
        other => {
            return Err(VaultError::Protocol(format!(
                "Expected WELCOME, got {:?}",
                other
            )))
        }
    }

    stream.set_read_timeout(None)?;
    Ok(stream)
}

fn resolve(addr: &str) -> Result<SocketAddr> {
    addr.to_socket_addrs()?
        .next()
        .ok_or_else(|| VaultError::Config(format!("Address {} did not resolve", addr)))
}
