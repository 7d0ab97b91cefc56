//! VaultKV Server Binary
//!
//! Replays the operation log, then serves clients until killed.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::{fmt, EnvFilter};
use vaultkv::config::{
    DEFAULT_DEBOUNCE_INTERVAL, DEFAULT_MAX_DEBOUNCE_COUNT, DEFAULT_MAX_KEYS_PER_SHARD,
    DEFAULT_REPLAY_WINDOW,
};
use vaultkv::{Config, Server};

/// VaultKV Server
#[derive(Parser, Debug)]
#[command(name = "vaultkv-server")]
#[command(about = "Network-attached sharded key-value store")]
#[command(version)]
struct Args {
    /// Data directory
    #[arg(short, long, default_value = "./vaultkv_data")]
    data_dir: PathBuf,

    /// Listen address (host:port)
    #[arg(short, long, default_value = "127.0.0.1:8080")]
    listen: String,

    /// Credential clients must present (no authentication when omitted)
    #[arg(short, long)]
    token: Option<String>,

    /// Operation log path (defaults to <data_dir>/oplog.log)
    #[arg(long)]
    oplog: Option<PathBuf>,

    /// Maximum keys per shard file
    #[arg(long, default_value_t = DEFAULT_MAX_KEYS_PER_SHARD)]
    max_keys_per_shard: usize,

    /// Quiet period before dirty shards are written, in milliseconds
    #[arg(long, default_value_t = DEFAULT_DEBOUNCE_INTERVAL.as_millis() as u64)]
    debounce_ms: u64,

    /// Mutations that force an immediate write
    #[arg(long, default_value_t = DEFAULT_MAX_DEBOUNCE_COUNT)]
    max_debounce_count: usize,

    /// Mutating log records replayed on startup
    #[arg(long, default_value_t = DEFAULT_REPLAY_WINDOW)]
    replay_window: usize,

    /// Also log read requests
    #[arg(long)]
    audit_reads: bool,

    /// Maximum concurrent connections
    #[arg(short, long, default_value = "1024")]
    max_connections: usize,

    /// Time allowed for the client handshake, in milliseconds
    #[arg(long, default_value = "5000")]
    handshake_timeout_ms: u64,
}

fn main() {
    // Initialize tracing/logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,vaultkv=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .init();

    let args = Args::parse();

    tracing::info!("VaultKV Server v{}", vaultkv::VERSION);
    tracing::info!("Data directory: {}", args.data_dir.display());
    tracing::info!("Listen address: {}", args.listen);

    let mut builder = Config::builder()
        .data_dir(&args.data_dir)
        .listen_addr(&args.listen)
        .max_keys_per_shard(args.max_keys_per_shard)
        .debounce_interval(Duration::from_millis(args.debounce_ms))
        .max_debounce_count(args.max_debounce_count)
        .replay_window(args.replay_window)
        .audit_reads(args.audit_reads)
        .max_connections(args.max_connections)
        .handshake_timeout_ms(args.handshake_timeout_ms);
    if let Some(token) = &args.token {
        builder = builder.auth_token(token);
    }
    if let Some(oplog) = &args.oplog {
        builder = builder.oplog_path(oplog);
    }
    let config = builder.build();

    if config.auth_token.is_none() {
        tracing::warn!("No token configured, accepting every client");
    }

    let server = match Server::bind(config) {
        Ok(server) => server,
        Err(e) => {
            tracing::error!("Failed to start server: {}", e);
            std::process::exit(1);
        }
    };

    let report = server.recovery_report();
    tracing::info!(
        "Recovery replayed {} of {} mutation(s) across {} key space(s)",
        report.replayed,
        report.mutations_found,
        report.key_spaces
    );

    if let Err(e) = server.run() {
        tracing::error!("Server error: {}", e);
        std::process::exit(1);
    }

    tracing::info!("Server stopped");
}
