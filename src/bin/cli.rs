//! VaultKV CLI Client
//!
//! Command-line interface for interacting with VaultKV.

use std::process::ExitCode;

use clap::{Parser, Subcommand};
use serde_json::Value;
use tracing_subscriber::{fmt, EnvFilter};
use vaultkv::{Client, ClientConfig};

/// VaultKV CLI
#[derive(Parser, Debug)]
#[command(name = "vaultkv-cli")]
#[command(about = "CLI for the VaultKV key-value store")]
#[command(version)]
struct Args {
    /// Server address
    #[arg(short, long, default_value = "127.0.0.1:8080")]
    server: String,

    /// Credential sent during the handshake
    #[arg(short, long)]
    token: Option<String>,

    /// Key space to operate on
    #[arg(short, long, default_value = "default")]
    path: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Get a value by key
    Get {
        /// The key to get
        key: String,
    },

    /// Set a key-value pair
    Set {
        /// The key to set
        key: String,

        /// The value to set (JSON, or a plain string)
        value: String,
    },

    /// Delete a key
    Del {
        /// The key to delete
        key: String,
    },

    /// Check whether a key holds a value
    Has {
        /// The key to check
        key: String,
    },

    /// Print every key in the key space
    All,

    /// Ping the server
    Ping,
}

fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    fmt().with_env_filter(filter).with_writer(std::io::stderr).init();

    let args = Args::parse();

    let mut builder = ClientConfig::builder().server_addr(&args.server);
    if let Some(token) = &args.token {
        builder = builder.auth_token(token);
    }

    let client = match Client::connect(builder.build()) {
        Ok(client) => client,
        Err(e) => {
            eprintln!("(error) {}", e);
            return ExitCode::FAILURE;
        }
    };

    let result = run(&client, &args.path, args.command);
    client.close();

    match result {
        Ok(output) => {
            println!("{}", output);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("(error) {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(client: &Client, path: &str, command: Commands) -> vaultkv::Result<String> {
    let db = client.database::<Value>(path);

    match command {
        Commands::Get { key } => Ok(match db.get(&key)? {
            Some(value) => render(&value),
            None => "(nil)".to_string(),
        }),
        Commands::Set { key, value } => {
            let stored = db.set(&key, &parse_value(&value))?;
            Ok(render(&stored))
        }
        Commands::Del { key } => {
            db.delete(&key)?;
            Ok("OK".to_string())
        }
        Commands::Has { key } => Ok(db.has(&key)?.to_string()),
        Commands::All => {
            let mut entries: Vec<(String, Value)> = db.all()?.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            if entries.is_empty() {
                return Ok("(empty)".to_string());
            }
            Ok(entries
                .iter()
                .map(|(key, value)| format!("{}: {}", key, render(value)))
                .collect::<Vec<_>>()
                .join("\n"))
        }
        Commands::Ping => Ok(match client.ping()? {
            Some(rtt) => format!("PONG ({:.2} ms)", rtt.as_secs_f64() * 1000.0),
            None => "(unreachable)".to_string(),
        }),
    }
}

/// JSON when it parses, otherwise the raw string
fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
