//! Recovery Engine
//!
//! Rebuilds recent writes after an unclean shutdown by replaying the tail
//! of the operation log.
//!
//! ## Replay Contract
//! - Only mutating records (SET, DELETE, SET_MANY, DELETE_MANY) count
//! - The most recent `replay_window` of them are replayed, oldest first
//! - Replay goes through the same `set`/`delete` primitives as live traffic
//! - A malformed line is skipped; the rest of the replay continues
//! - The window is a suffix of the log, not of history: a key whose SET
//!   falls just outside the window keeps whatever state the shard files
//!   held, and a DELETE inside the window still removes it
//!
//! Every touched key space is flushed before `run` returns.

use std::collections::{BTreeSet, VecDeque};
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::error::Result;
use crate::storage::KeySpaceRegistry;

use super::{Mutation, OpLogReader, OpLogRecord};

/// Outcome of a recovery run
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Non-empty lines read from the log
    pub lines_read: usize,

    /// Well-formed mutating records found in the whole log
    pub mutations_found: usize,

    /// Records replayed (at most the replay window)
    pub replayed: usize,

    /// Lines skipped as malformed
    pub skipped_malformed: usize,

    /// Key spaces that received replayed mutations
    pub key_spaces: usize,
}

/// Replays the operation log tail into a registry
pub struct RecoveryEngine {
    log_path: PathBuf,
    replay_window: usize,
}

impl RecoveryEngine {
    pub fn new(log_path: impl Into<PathBuf>, replay_window: usize) -> Self {
        Self {
            log_path: log_path.into(),
            replay_window,
        }
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    /// Run recovery; a missing log is a no-op
    pub fn run(&self, registry: &KeySpaceRegistry) -> Result<RecoveryReport> {
        let mut report = RecoveryReport::default();

        if !self.log_path.exists() {
            tracing::warn!(
                "Skipping recovery, no operation log at {}",
                self.log_path.display()
            );
            return Ok(report);
        }

        tracing::info!("Running recovery from {}", self.log_path.display());
        let start = Instant::now();

        let window = self.collect_window(&mut report)?;

        let mut touched = BTreeSet::new();
        for (record, mutations) in &window {
            let space = match registry.get_or_open(&record.path) {
                Ok(space) => space,
                Err(e) => {
                    tracing::warn!("Skipping record {}: {}", record.request_id, e);
                    report.skipped_malformed += 1;
                    continue;
                }
            };

            for mutation in mutations {
                match mutation {
                    Mutation::Set { key, value } => {
                        space.set(key, value.clone())?;
                    }
                    Mutation::Delete { key } => {
                        space.delete(key)?;
                    }
                }
            }

            report.replayed += 1;
            touched.insert(record.path.clone());
        }

        for path in &touched {
            if let Some(space) = registry.get(path) {
                space.flush()?;
            }
        }
        report.key_spaces = touched.len();

        tracing::info!(
            "Recovery replayed the last {} of {} mutations in {:?} ({} malformed lines skipped)",
            report.replayed,
            report.mutations_found,
            start.elapsed(),
            report.skipped_malformed
        );

        Ok(report)
    }

    /// Scan the log, keeping the trailing window of mutating records
    fn collect_window(
        &self,
        report: &mut RecoveryReport,
    ) -> Result<VecDeque<(OpLogRecord, Vec<Mutation>)>> {
        let mut window = VecDeque::with_capacity(self.replay_window.min(4096));

        for (line_no, parsed) in OpLogReader::open(&self.log_path)? {
            report.lines_read += 1;

            let record = match parsed {
                Ok(record) => record,
                Err(e) => {
                    tracing::warn!("Skipping malformed log line {}: {}", line_no, e);
                    report.skipped_malformed += 1;
                    continue;
                }
            };

            if !record.method.is_mutating() {
                continue;
            }

            let mutations = match record.mutations() {
                Ok(mutations) => mutations,
                Err(e) => {
                    tracing::warn!("Skipping malformed log line {}: {}", line_no, e);
                    report.skipped_malformed += 1;
                    continue;
                }
            };

            report.mutations_found += 1;
            window.push_back((record, mutations));
            if window.len() > self.replay_window {
                window.pop_front();
            }
        }

        Ok(window)
    }
}
