//! TCP Server
//!
//! Runs recovery, then accepts connections and hands each one to a
//! session thread.

use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;

use crate::config::Config;
use crate::error::Result;
use crate::oplog::{OpLogWriter, RecoveryEngine, RecoveryReport};
use crate::storage::KeySpaceRegistry;

use super::auth::{AllowAll, Authenticator, TokenAuthenticator};
use super::dispatch::Dispatcher;
use super::session::Session;

/// How often the accept loop checks for shutdown
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Live connections, so shutdown can sever them
type ConnectionTable = Arc<Mutex<HashMap<u64, TcpStream>>>;

/// TCP server for VaultKV
pub struct Server {
    config: Config,
    listener: TcpListener,
    local_addr: SocketAddr,
    registry: Arc<KeySpaceRegistry>,
    oplog: Arc<OpLogWriter>,
    dispatcher: Arc<Dispatcher>,
    authenticator: Arc<dyn Authenticator>,
    recovery: RecoveryReport,
    shutdown: Arc<AtomicBool>,
    connections: ConnectionTable,
    next_connection_id: AtomicU64,
}

/// Signals a running server to stop
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    flag: Arc<AtomicBool>,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_shutdown(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

impl Server {
    /// Prepare a server
    ///
    /// On startup:
    /// 1. Create the data directory
    /// 2. Replay the operation log tail (before any connection is accepted)
    /// 3. Open the operation log for appending
    /// 4. Bind the listener
    pub fn bind(config: Config) -> Result<Self> {
        fs::create_dir_all(&config.data_dir)?;

        let registry = Arc::new(KeySpaceRegistry::new(
            config.data_dir.clone(),
            config.store_options(),
        ));

        let oplog_path = config.oplog_path();
        let recovery = RecoveryEngine::new(&oplog_path, config.replay_window).run(&registry)?;
        let oplog = Arc::new(OpLogWriter::open(&oplog_path)?);

        let listener = TcpListener::bind(&config.listen_addr)?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;

        let authenticator: Arc<dyn Authenticator> = match &config.auth_token {
            Some(token) => Arc::new(TokenAuthenticator::new(token.clone())),
            None => Arc::new(AllowAll),
        };

        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&registry),
            Arc::clone(&oplog),
            config.audit_reads,
        ));

        tracing::info!("Server listening on {}", local_addr);

        Ok(Self {
            config,
            listener,
            local_addr,
            registry,
            oplog,
            dispatcher,
            authenticator,
            recovery,
            shutdown: Arc::new(AtomicBool::new(false)),
            connections: Arc::new(Mutex::new(HashMap::new())),
            next_connection_id: AtomicU64::new(1),
        })
    }

    /// Replace the authentication predicate
    pub fn with_authenticator(mut self, authenticator: impl Authenticator + 'static) -> Self {
        self.authenticator = Arc::new(authenticator);
        self
    }

    /// Address actually bound (useful with port 0)
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            flag: Arc::clone(&self.shutdown),
        }
    }

    pub fn registry(&self) -> &Arc<KeySpaceRegistry> {
        &self.registry
    }

    /// What startup recovery did
    pub fn recovery_report(&self) -> &RecoveryReport {
        &self.recovery
    }

    /// Serve until shutdown is requested (blocking)
    ///
    /// On exit every live connection is severed, every key space is flushed
    /// and closed, and the operation log is synced.
    pub fn run(self) -> Result<()> {
        let mut workers: Vec<JoinHandle<()>> = Vec::new();

        while !self.shutdown.load(Ordering::SeqCst) {
            match self.listener.accept() {
                Ok((stream, addr)) => {
                    workers.retain(|w| !w.is_finished());
                    if workers.len() >= self.config.max_connections {
                        tracing::warn!("Connection limit reached, refusing {}", addr);
                        let _ = stream.shutdown(Shutdown::Both);
                        continue;
                    }
                    match self.spawn_session(stream) {
                        Ok(worker) => workers.push(worker),
                        Err(e) => tracing::warn!("Failed to start session for {}: {}", addr, e),
                    }
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => thread::sleep(ACCEPT_POLL_INTERVAL),
                Err(e) => tracing::warn!("Accept failed: {}", e),
            }
        }

        tracing::info!("Shutting down, closing {} connection(s)", self.connections.lock().len());
        for (_, stream) in self.connections.lock().drain() {
            let _ = stream.shutdown(Shutdown::Both);
        }
        for worker in workers {
            let _ = worker.join();
        }

        self.registry.close_all()?;
        self.oplog.sync()?;
        tracing::info!("Server stopped");
        Ok(())
    }

    fn spawn_session(&self, stream: TcpStream) -> Result<JoinHandle<()>> {
        stream.set_nonblocking(false)?;

        let id = self.next_connection_id.fetch_add(1, Ordering::Relaxed);
        self.connections.lock().insert(id, stream.try_clone()?);

        let mut session = Session::new(
            stream,
            Arc::clone(&self.dispatcher),
            Arc::clone(&self.authenticator),
            Duration::from_millis(self.config.handshake_timeout_ms),
        )?;
        let connections = Arc::clone(&self.connections);

        let handle = thread::Builder::new()
            .name(format!("vaultkv-session-{}", id))
            .spawn(move || {
                if let Err(e) = session.run() {
                    tracing::warn!("Session {} ended with error: {}", session.peer_addr(), e);
                }
                connections.lock().remove(&id);
            })?;

        Ok(handle)
    }
}
