//! Session Handler
//!
//! Handles one client connection from handshake to close.
//!
//! ```text
//! Accepted ──▶ Authenticating ──▶ Open ──▶ Closed
//!                    │                        ▲
//!                    └── CLOSE 4001/4002 ─────┘
//! ```

use std::io::{BufReader, BufWriter, ErrorKind};
use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{Result, VaultError};
use crate::protocol::{read_frame, write_frame, CloseCode, Frame, FrameKind, Request};

use super::auth::Authenticator;
use super::dispatch::Dispatcher;

/// Session lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Accepted,
    Authenticating,
    Open,
    Closed,
}

/// Handles a single client connection
pub struct Session {
    /// TCP stream reader (buffered for efficiency)
    reader: BufReader<TcpStream>,

    /// TCP stream writer (buffered for efficiency)
    writer: BufWriter<TcpStream>,

    dispatcher: Arc<Dispatcher>,
    authenticator: Arc<dyn Authenticator>,
    handshake_timeout: Duration,
    state: SessionState,

    /// Peer address for logging
    peer_addr: String,
}

impl Session {
    /// Create a new session handler
    pub fn new(
        stream: TcpStream,
        dispatcher: Arc<Dispatcher>,
        authenticator: Arc<dyn Authenticator>,
        handshake_timeout: Duration,
    ) -> Result<Self> {
        let peer_addr = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "unknown".to_string());

        // Disable Nagle's algorithm for low latency
        stream.set_nodelay(true)?;

        let read_stream = stream.try_clone()?;

        Ok(Self {
            reader: BufReader::new(read_stream),
            writer: BufWriter::new(stream),
            dispatcher,
            authenticator,
            handshake_timeout,
            state: SessionState::Accepted,
            peer_addr,
        })
    }

    /// Run the session (blocking until closed)
    pub fn run(&mut self) -> Result<()> {
        tracing::debug!("Connection established from {}", self.peer_addr);

        let result = match self.authenticate() {
            Ok(true) => self.serve(),
            Ok(false) => Ok(()),
            Err(e) => Err(e),
        };

        self.state = SessionState::Closed;
        tracing::debug!("Connection closed from {}", self.peer_addr);
        result
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn peer_addr(&self) -> &str {
        &self.peer_addr
    }

    // =========================================================================
    // Handshake
    // =========================================================================

    /// Returns `Ok(true)` once the session is open
    fn authenticate(&mut self) -> Result<bool> {
        self.state = SessionState::Authenticating;
        self.reader
            .get_ref()
            .set_read_timeout(Some(self.handshake_timeout))?;

        let frame = match read_frame(&mut self.reader) {
            Ok(frame) => frame,
            Err(e) if is_disconnect(&e) => {
                tracing::debug!("{} went away during handshake: {}", self.peer_addr, e);
                return Ok(false);
            }
            Err(e) => {
                self.close(CloseCode::ProtocolError, &e.to_string());
                return Ok(false);
            }
        };

        if frame.kind != FrameKind::Hello {
            self.close(CloseCode::ProtocolError, "expected HELLO");
            return Ok(false);
        }

        let credential = match frame.credential() {
            Ok(credential) => credential,
            Err(e) => {
                self.close(CloseCode::ProtocolError, &e.to_string());
                return Ok(false);
            }
        };

        if let Err(rejection) = self.authenticator.authenticate(credential.as_deref()) {
            tracing::warn!(
                "Rejected connection from {}: {}",
                self.peer_addr,
                rejection.reason
            );
            self.close(rejection.code, &rejection.reason);
            return Ok(false);
        }

        write_frame(&mut self.writer, &Frame::welcome())?;
        self.reader.get_ref().set_read_timeout(None)?;
        self.state = SessionState::Open;
        tracing::info!("Session opened for {}", self.peer_addr);
        Ok(true)
    }

    // =========================================================================
    // Request Loop
    // =========================================================================

    fn serve(&mut self) -> Result<()> {
        loop {
            let frame = match read_frame(&mut self.reader) {
                Ok(frame) => frame,
                Err(e) if is_disconnect(&e) => {
                    tracing::debug!("Client {} disconnected: {}", self.peer_addr, e);
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!("Error reading from {}: {}", self.peer_addr, e);
                    self.close(CloseCode::ProtocolError, &e.to_string());
                    return Err(e);
                }
            };

            match frame.kind {
                FrameKind::Message => {
                    let request = match Request::from_slice(&frame.payload) {
                        Ok(request) => request,
                        Err(e) => {
                            tracing::warn!("Closing {}: {}", self.peer_addr, e);
                            self.close(CloseCode::ProtocolError, &e.to_string());
                            return Ok(());
                        }
                    };
                    if !self.handle_request(request)? {
                        return Ok(());
                    }
                }
                FrameKind::Ping => {
                    let nonce = match frame.nonce() {
                        Ok(nonce) => nonce,
                        Err(e) => {
                            tracing::warn!("Closing {}: {}", self.peer_addr, e);
                            self.close(CloseCode::ProtocolError, &e.to_string());
                            return Ok(());
                        }
                    };
                    if let Err(e) = write_frame(&mut self.writer, &Frame::pong(nonce)) {
                        return self.write_failed(e);
                    }
                }
                FrameKind::Close => {
                    tracing::debug!("Client {} closed the session", self.peer_addr);
                    return Ok(());
                }
                other => {
                    let reason = format!("unexpected {:?} frame", other);
                    self.close(CloseCode::ProtocolError, &reason);
                    return Ok(());
                }
            }
        }
    }

    /// Dispatch (which also logs), then reply. Returns `false` if the client
    /// went away.
    fn handle_request(&mut self, request: Request) -> Result<bool> {
        tracing::trace!(
            "{} {} {:?} from {}",
            request.method(),
            request.request_id,
            request.path,
            self.peer_addr
        );

        let response = self.dispatcher.handle(&request);
        let sent = response
            .to_bytes()
            .and_then(|bytes| write_frame(&mut self.writer, &Frame::message(bytes)));

        match sent {
            Ok(()) => Ok(true),
            Err(e) => self.write_failed(e).map(|_| false),
        }
    }

    /// Treat a vanished client as a clean exit
    fn write_failed(&self, e: VaultError) -> Result<()> {
        if is_disconnect(&e) {
            tracing::debug!(
                "Client {} disconnected before response could be sent: {}",
                self.peer_addr,
                e
            );
            return Ok(());
        }
        tracing::warn!("Error writing to {}: {}", self.peer_addr, e);
        Err(e)
    }

    /// Send a CLOSE frame, ignoring failures
    fn close(&mut self, code: CloseCode, reason: &str) {
        let _ = write_frame(&mut self.writer, &Frame::close(code, reason));
        self.state = SessionState::Closed;
    }
}

/// Errors that just mean the peer is gone
fn is_disconnect(error: &VaultError) -> bool {
    match error {
        VaultError::Io(e) => matches!(
            e.kind(),
            ErrorKind::UnexpectedEof
                | ErrorKind::ConnectionReset
                | ErrorKind::ConnectionAborted
                | ErrorKind::BrokenPipe
                | ErrorKind::WouldBlock
                | ErrorKind::TimedOut
        ),
        _ => false,
    }
}
