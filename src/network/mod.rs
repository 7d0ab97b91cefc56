//! Network Module
//!
//! Server side of the session protocol.
//!
//! ## Architecture
//! - Single acceptor loop (non-blocking, polls for shutdown)
//! - One thread per session
//! - Requests routed through the Dispatcher to the key space registry
//! - Served mutations forwarded to the operation log

mod auth;
mod dispatch;
mod server;
mod session;

pub use auth::{AllowAll, Authenticator, Rejection, TokenAuthenticator};
pub use dispatch::Dispatcher;
pub use server::{Server, ShutdownHandle};
pub use session::{Session, SessionState};
