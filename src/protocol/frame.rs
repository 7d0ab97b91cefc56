//! Transport frames
//!
//! Encoding and decoding functions for the framed duplex channel that
//! carries envelopes between client and server.
//!
//! ## Wire Format
//! ```text
//! ┌──────────┬──────────┬─────────────────────────────┐
//! │ Kind (1) │ Len (4)  │         Payload             │
//! └──────────┴──────────┴─────────────────────────────┘
//! ```
//!
//! ### Payload by Frame Kind
//! - HELLO:   credential bytes (empty = no credential)
//! - WELCOME: empty
//! - MESSAGE: JSON envelope
//! - PING:    nonce (8 bytes)
//! - PONG:    nonce echoed from PING (8 bytes)
//! - CLOSE:   code (2 bytes) + UTF-8 reason

use std::io::{Read, Write};

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{Result, VaultError};

/// Header size: 1 byte kind + 4 bytes length
pub const HEADER_SIZE: usize = 5;

/// Maximum payload size (16 MB)
pub const MAX_PAYLOAD_SIZE: u32 = 16 * 1024 * 1024;

/// Frame kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameKind {
    Hello = 0x01,
    Welcome = 0x02,
    Message = 0x03,
    Ping = 0x04,
    Pong = 0x05,
    Close = 0x06,
}

impl FrameKind {
    fn from_u8(byte: u8) -> Result<Self> {
        match byte {
            0x01 => Ok(FrameKind::Hello),
            0x02 => Ok(FrameKind::Welcome),
            0x03 => Ok(FrameKind::Message),
            0x04 => Ok(FrameKind::Ping),
            0x05 => Ok(FrameKind::Pong),
            0x06 => Ok(FrameKind::Close),
            _ => Err(VaultError::Protocol(format!(
                "Unknown frame kind: 0x{:02x}",
                byte
            ))),
        }
    }
}

// =============================================================================
// Close Codes
// =============================================================================

/// Reasons a connection is closed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseCode {
    /// Orderly application close; never triggers a reconnect
    Normal,

    /// Peer sent something that is not valid protocol
    ProtocolError,

    /// Connection dropped without a CLOSE frame (local only, never sent)
    Abnormal,

    /// Server-side failure
    InternalError,

    /// HELLO carried no credential
    MissingCredentials,

    /// HELLO carried the wrong credential
    InvalidCredentials,

    Other(u16),
}

impl CloseCode {
    pub fn as_u16(&self) -> u16 {
        match self {
            CloseCode::Normal => 1000,
            CloseCode::ProtocolError => 1002,
            CloseCode::Abnormal => 1006,
            CloseCode::InternalError => 1011,
            CloseCode::MissingCredentials => 4001,
            CloseCode::InvalidCredentials => 4002,
            CloseCode::Other(code) => *code,
        }
    }

    pub fn from_u16(code: u16) -> Self {
        match code {
            1000 => CloseCode::Normal,
            1002 => CloseCode::ProtocolError,
            1006 => CloseCode::Abnormal,
            1011 => CloseCode::InternalError,
            4001 => CloseCode::MissingCredentials,
            4002 => CloseCode::InvalidCredentials,
            other => CloseCode::Other(other),
        }
    }

    /// Authentication rejections
    pub fn is_auth_failure(&self) -> bool {
        matches!(
            self,
            CloseCode::MissingCredentials | CloseCode::InvalidCredentials
        )
    }
}

// =============================================================================
// Frame
// =============================================================================

/// A single transport frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub kind: FrameKind,
    pub payload: Bytes,
}

impl Frame {
    pub fn new(kind: FrameKind, payload: impl Into<Bytes>) -> Self {
        Self {
            kind,
            payload: payload.into(),
        }
    }

    /// HELLO carrying an optional credential
    pub fn hello(credential: Option<&str>) -> Self {
        let payload = credential.map(|c| c.as_bytes().to_vec()).unwrap_or_default();
        Self::new(FrameKind::Hello, payload)
    }

    pub fn welcome() -> Self {
        Self::new(FrameKind::Welcome, Bytes::new())
    }

    pub fn message(envelope: Vec<u8>) -> Self {
        Self::new(FrameKind::Message, envelope)
    }

    pub fn ping(nonce: u64) -> Self {
        Self::new(FrameKind::Ping, nonce.to_be_bytes().to_vec())
    }

    pub fn pong(nonce: u64) -> Self {
        Self::new(FrameKind::Pong, nonce.to_be_bytes().to_vec())
    }

    pub fn close(code: CloseCode, reason: &str) -> Self {
        let mut payload = BytesMut::with_capacity(2 + reason.len());
        payload.put_u16(code.as_u16());
        payload.put_slice(reason.as_bytes());
        Self::new(FrameKind::Close, payload.freeze())
    }

    /// Credential of a HELLO frame (`None` when empty)
    pub fn credential(&self) -> Result<Option<String>> {
        self.expect_kind(FrameKind::Hello)?;
        if self.payload.is_empty() {
            return Ok(None);
        }
        String::from_utf8(self.payload.to_vec())
            .map(Some)
            .map_err(|_| VaultError::Protocol("HELLO credential is not UTF-8".to_string()))
    }

    /// Nonce of a PING or PONG frame
    pub fn nonce(&self) -> Result<u64> {
        if !matches!(self.kind, FrameKind::Ping | FrameKind::Pong) {
            return Err(VaultError::Protocol(format!(
                "Expected PING/PONG, got {:?}",
                self.kind
            )));
        }
        if self.payload.len() != 8 {
            return Err(VaultError::Protocol(format!(
                "{:?} frame: expected 8-byte nonce, got {} bytes",
                self.kind,
                self.payload.len()
            )));
        }
        Ok(self.payload.clone().get_u64())
    }

    /// Code and reason of a CLOSE frame
    pub fn close_reason(&self) -> Result<(CloseCode, String)> {
        self.expect_kind(FrameKind::Close)?;
        if self.payload.len() < 2 {
            return Err(VaultError::Protocol(
                "CLOSE frame: missing close code".to_string(),
            ));
        }
        let mut payload = self.payload.clone();
        let code = CloseCode::from_u16(payload.get_u16());
        let reason = String::from_utf8_lossy(&payload).into_owned();
        Ok((code, reason))
    }

    fn expect_kind(&self, kind: FrameKind) -> Result<()> {
        if self.kind != kind {
            return Err(VaultError::Protocol(format!(
                "Expected {:?} frame, got {:?}",
                kind, self.kind
            )));
        }
        Ok(())
    }
}

// =============================================================================
// Frame Encoding/Decoding
// =============================================================================

/// Encode a frame to bytes
///
/// Format: kind (1) + payload_len (4) + payload
pub fn encode_frame(frame: &Frame) -> Bytes {
    let mut message = BytesMut::with_capacity(HEADER_SIZE + frame.payload.len());
    message.put_u8(frame.kind as u8);
    message.put_u32(frame.payload.len() as u32);
    message.put_slice(&frame.payload);
    message.freeze()
}

/// Decode a frame from bytes
pub fn decode_frame(bytes: &[u8]) -> Result<Frame> {
    if bytes.len() < HEADER_SIZE {
        return Err(VaultError::Protocol(format!(
            "Incomplete header: expected {} bytes, got {}",
            HEADER_SIZE,
            bytes.len()
        )));
    }

    let kind = FrameKind::from_u8(bytes[0])?;
    let payload_len = u32::from_be_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]);
    check_payload_len(payload_len)?;

    let total_len = HEADER_SIZE + payload_len as usize;
    if bytes.len() < total_len {
        return Err(VaultError::Protocol(format!(
            "Incomplete payload: expected {} bytes, got {}",
            total_len,
            bytes.len()
        )));
    }

    Ok(Frame::new(
        kind,
        Bytes::copy_from_slice(&bytes[HEADER_SIZE..total_len]),
    ))
}

// =============================================================================
// Stream-based I/O helpers
// =============================================================================

/// Read a complete frame from a stream
///
/// Blocks until a complete frame is received or an error occurs
pub fn read_frame<R: Read>(reader: &mut R) -> Result<Frame> {
    let mut header = [0u8; HEADER_SIZE];
    reader.read_exact(&mut header)?;

    let kind = FrameKind::from_u8(header[0])?;
    let payload_len = u32::from_be_bytes([header[1], header[2], header[3], header[4]]);
    check_payload_len(payload_len)?;

    let mut payload = vec![0u8; payload_len as usize];
    if payload_len > 0 {
        reader.read_exact(&mut payload)?;
    }

    Ok(Frame::new(kind, payload))
}

/// Write a frame to a stream
pub fn write_frame<W: Write>(writer: &mut W, frame: &Frame) -> Result<()> {
    writer.write_all(&encode_frame(frame))?;
    writer.flush()?;
    Ok(())
}

fn check_payload_len(payload_len: u32) -> Result<()> {
    if payload_len > MAX_PAYLOAD_SIZE {
        return Err(VaultError::Protocol(format!(
            "Payload too large: {} bytes (max {})",
            payload_len, MAX_PAYLOAD_SIZE
        )));
    }
    Ok(())
}
