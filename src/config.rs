//! Configuration for VaultKV
//!
//! Centralized configuration with sensible defaults. The server, each key
//! space, and the client all read their knobs from here.

use std::path::PathBuf;
use std::time::Duration;

/// Default number of keys a single shard file may hold
pub const DEFAULT_MAX_KEYS_PER_SHARD: usize = 100;

/// Default quiet period before dirty shards are written back
pub const DEFAULT_DEBOUNCE_INTERVAL: Duration = Duration::from_millis(250);

/// Default number of mutations that forces an immediate write-back
pub const DEFAULT_MAX_DEBOUNCE_COUNT: usize = 250;

/// Default number of mutating log records replayed on startup
pub const DEFAULT_REPLAY_WINDOW: usize = 1000;

/// Main configuration for a VaultKV server
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Root directory for all key spaces
    /// Internal structure:
    ///   {data_dir}/
    ///     ├── oplog.log            (operation log, unless overridden)
    ///     └── {path}/              (one directory per key space)
    ///           ├── index.json
    ///           └── data_<n>.json
    pub data_dir: PathBuf,

    /// Operation log location; `None` places it at `{data_dir}/oplog.log`
    pub oplog_path: Option<PathBuf>,

    /// Maximum keys held by one shard file
    pub max_keys_per_shard: usize,

    /// Quiet period before a debounced flush fires
    pub debounce_interval: Duration,

    /// Mutation count that forces a flush regardless of the timer
    pub max_debounce_count: usize,

    // -------------------------------------------------------------------------
    // Recovery Configuration
    // -------------------------------------------------------------------------
    /// Number of trailing mutating records replayed at startup
    pub replay_window: usize,

    /// Also record GET/ALL/GET_MANY requests in the operation log
    pub audit_reads: bool,

    // -------------------------------------------------------------------------
    // Network Configuration
    // -------------------------------------------------------------------------
    /// TCP listen address
    pub listen_addr: String,

    /// Shared credential clients must present; `None` disables authentication
    pub auth_token: Option<String>,

    /// Max concurrent client connections
    pub max_connections: usize,

    /// Time allowed for a client to send its HELLO frame (milliseconds)
    pub handshake_timeout_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./vaultkv_data"),
            oplog_path: None,
            max_keys_per_shard: DEFAULT_MAX_KEYS_PER_SHARD,
            debounce_interval: DEFAULT_DEBOUNCE_INTERVAL,
            max_debounce_count: DEFAULT_MAX_DEBOUNCE_COUNT,
            replay_window: DEFAULT_REPLAY_WINDOW,
            audit_reads: false,
            listen_addr: "127.0.0.1:8080".to_string(),
            auth_token: None,
            max_connections: 1024,
            handshake_timeout_ms: 5000,
        }
    }
}

impl Config {
    const OPLOG_FILENAME: &'static str = "oplog.log";

    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Resolved location of the operation log
    pub fn oplog_path(&self) -> PathBuf {
        self.oplog_path
            .clone()
            .unwrap_or_else(|| self.data_dir.join(Self::OPLOG_FILENAME))
    }

    /// Per-key-space options derived from this config
    pub fn store_options(&self) -> StoreOptions {
        StoreOptions {
            max_keys_per_shard: self.max_keys_per_shard,
            debounce_interval: self.debounce_interval,
            max_debounce_count: self.max_debounce_count,
        }
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the data directory (root for all key spaces)
    pub fn data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.data_dir = path.into();
        self
    }

    /// Set an explicit operation log path
    pub fn oplog_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.oplog_path = Some(path.into());
        self
    }

    /// Set the shard capacity
    pub fn max_keys_per_shard(mut self, count: usize) -> Self {
        self.config.max_keys_per_shard = count;
        self
    }

    /// Set the debounce interval
    pub fn debounce_interval(mut self, interval: Duration) -> Self {
        self.config.debounce_interval = interval;
        self
    }

    /// Set the forced-flush mutation threshold
    pub fn max_debounce_count(mut self, count: usize) -> Self {
        self.config.max_debounce_count = count;
        self
    }

    /// Set the recovery replay window
    pub fn replay_window(mut self, count: usize) -> Self {
        self.config.replay_window = count;
        self
    }

    /// Record read requests in the operation log too
    pub fn audit_reads(mut self, enabled: bool) -> Self {
        self.config.audit_reads = enabled;
        self
    }

    /// Set the TCP listen address
    pub fn listen_addr(mut self, addr: impl Into<String>) -> Self {
        self.config.listen_addr = addr.into();
        self
    }

    /// Require clients to present this credential
    pub fn auth_token(mut self, token: impl Into<String>) -> Self {
        self.config.auth_token = Some(token.into());
        self
    }

    /// Set the maximum number of concurrent connections
    pub fn max_connections(mut self, count: usize) -> Self {
        self.config.max_connections = count;
        self
    }

    /// Set the handshake timeout (in milliseconds)
    pub fn handshake_timeout_ms(mut self, ms: u64) -> Self {
        self.config.handshake_timeout_ms = ms;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}

// =============================================================================
// Key Space Options
// =============================================================================

/// Tuning for a single key space's storage engine
#[derive(Debug, Clone, Copy)]
pub struct StoreOptions {
    /// Maximum keys held by one shard file
    pub max_keys_per_shard: usize,

    /// Quiet period before a debounced flush fires
    pub debounce_interval: Duration,

    /// Mutation count that forces a flush regardless of the timer
    pub max_debounce_count: usize,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            max_keys_per_shard: DEFAULT_MAX_KEYS_PER_SHARD,
            debounce_interval: DEFAULT_DEBOUNCE_INTERVAL,
            max_debounce_count: DEFAULT_MAX_DEBOUNCE_COUNT,
        }
    }
}

// =============================================================================
// Client Configuration
// =============================================================================

/// Configuration for a VaultKV client
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server address (host:port)
    pub server_addr: String,

    /// Credential sent in the HELLO frame
    pub auth_token: Option<String>,

    /// How long a sent request waits for its response
    pub request_timeout: Duration,

    /// How long a request queued during an outage waits for its response
    pub disconnected_timeout: Duration,

    /// TCP connect timeout, also bounds the handshake
    pub connect_timeout: Duration,

    /// Fixed delay between reconnect attempts
    pub reconnect_delay: Duration,

    /// Consecutive failed reconnects before giving up
    pub max_retries: u32,

    /// How long a ping waits for its pong
    pub ping_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_addr: "127.0.0.1:8080".to_string(),
            auth_token: None,
            request_timeout: Duration::from_millis(2500),
            disconnected_timeout: Duration::from_millis(10_000),
            connect_timeout: Duration::from_millis(3000),
            reconnect_delay: Duration::from_millis(1000),
            max_retries: 5,
            ping_timeout: Duration::from_millis(2500),
        }
    }
}

impl ClientConfig {
    /// Create a new client config builder
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::default()
    }
}

/// Builder for ClientConfig
#[derive(Default)]
pub struct ClientConfigBuilder {
    config: ClientConfig,
}

impl ClientConfigBuilder {
    pub fn server_addr(mut self, addr: impl Into<String>) -> Self {
        self.config.server_addr = addr.into();
        self
    }

    pub fn auth_token(mut self, token: impl Into<String>) -> Self {
        self.config.auth_token = Some(token.into());
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    pub fn disconnected_timeout(mut self, timeout: Duration) -> Self {
        self.config.disconnected_timeout = timeout;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    pub fn reconnect_delay(mut self, delay: Duration) -> Self {
        self.config.reconnect_delay = delay;
        self
    }

    pub fn max_retries(mut self, retries: u32) -> Self {
        self.config.max_retries = retries;
        self
    }

    pub fn ping_timeout(mut self, timeout: Duration) -> Self {
        self.config.ping_timeout = timeout;
        self
    }

    pub fn build(self) -> ClientConfig {
        self.config
    }
}
