//! Protocol Module
//!
//! Defines the wire protocol for client-server communication.
//!
//! ## Layers
//! - **Frames**: length-prefixed binary frames over TCP (handshake, messages,
//!   ping/pong, close)
//! - **Envelopes**: JSON request/response documents carried in `MESSAGE`
//!   frames and correlated by `requestId`
//!
//! ## Session
//! ```text
//! client                          server
//!   │ ── HELLO(credential) ────────▶ │  authenticate
//!   │ ◀──────────────────── WELCOME ─│  (or CLOSE 4001 / 4002)
//!   │ ── MESSAGE(request) ─────────▶ │  dispatch
//!   │ ◀─────────── MESSAGE(response) │
//!   │ ── PING(nonce) ──────────────▶ │
//!   │ ◀──────────────── PONG(nonce) ─│
//!   │ ── CLOSE(1000) ──────────────▶ │
//! ```

mod envelope;
mod frame;

pub use envelope::{Entry, Method, Operation, Request, Response};
pub use frame::{
    decode_frame, encode_frame, read_frame, write_frame, CloseCode, Frame, FrameKind,
    HEADER_SIZE, MAX_PAYLOAD_SIZE,
};
