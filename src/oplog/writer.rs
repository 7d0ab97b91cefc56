//! Operation log writer
//!
//! A single appender thread owns the log file. Callers hand records over a
//! channel and move on, so appending never blocks a response; the channel
//! serializes appends from every connection into one order.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::thread::{self, JoinHandle};

use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::Mutex;

use crate::error::{Result, VaultError};

use super::OpLogRecord;

enum AppendMessage {
    Line(String),
    Sync(Sender<Result<()>>),
}

/// Appends records to the operation log
pub struct OpLogWriter {
    path: PathBuf,
    tx: Mutex<Option<Sender<AppendMessage>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl OpLogWriter {
    /// Open (or create) the log in append mode and start the appender
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let (tx, rx) = channel::unbounded();

        let handle = thread::Builder::new()
            .name("vaultkv-oplog".to_string())
            .spawn(move || append_loop(BufWriter::new(file), rx))?;

        Ok(Self {
            path: path.to_path_buf(),
            tx: Mutex::new(Some(tx)),
            handle: Mutex::new(Some(handle)),
        })
    }

    /// Queue a record for appending (fire-and-forget)
    pub fn append(&self, record: &OpLogRecord) {
        self.send(AppendMessage::Line(record.to_line()));
    }

    /// Wait until every record appended before this call is synced to disk
    pub fn sync(&self) -> Result<()> {
        let (ack_tx, ack_rx) = channel::bounded(1);
        if !self.send(AppendMessage::Sync(ack_tx)) {
            return Err(VaultError::Storage("Operation log is closed".to_string()));
        }
        ack_rx
            .recv()
            .map_err(|_| VaultError::Storage("Operation log appender exited".to_string()))?
    }

    /// Drain pending records and stop the appender. Idempotent.
    pub fn close(&self) {
        self.tx.lock().take();
        if let Some(handle) = self.handle.lock().take() {
            if handle.join().is_err() {
                tracing::error!("Operation log appender panicked");
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn send(&self, message: AppendMessage) -> bool {
        match self.tx.lock().as_ref() {
            Some(tx) => tx.send(message).is_ok(),
            None => {
                tracing::warn!("Operation log closed, record dropped");
                false
            }
        }
    }
}

impl Drop for OpLogWriter {
    fn drop(&mut self) {
        self.close();
    }
}

fn append_loop(mut writer: BufWriter<File>, rx: Receiver<AppendMessage>) {
    for message in rx.iter() {
        match message {
            AppendMessage::Line(line) => {
                if let Err(e) = writer.write_all(line.as_bytes()) {
                    tracing::error!("Failed to append to operation log: {}", e);
                }
                // Hand the batch to the OS once the backlog is drained
                if rx.is_empty() {
                    if let Err(e) = writer.flush() {
                        tracing::error!("Failed to flush operation log: {}", e);
                    }
                }
            }
            AppendMessage::Sync(ack) => {
                let result = writer
                    .flush()
                    .and_then(|_| writer.get_ref().sync_data())
                    .map_err(VaultError::from);
                let _ = ack.send(result);
            }
        }
    }

    if let Err(e) = writer.flush().and_then(|_| writer.get_ref().sync_data()) {
        tracing::error!("Failed to sync operation log on close: {}", e);
    }
}
