//! Operation Log Module
//!
//! Append-only record of served requests, used only for crash recovery.
//!
//! ## Responsibilities
//! - Append one line per mutating request, off the response path
//! - Preserve append order across connections (single appender)
//! - Replay the trailing window of mutations at startup
//!
//! ## File Format
//! ```text
//! 1718000000000,\t6f9c...,\tusers,\tSET,\talice,\t{"age":30}
//! 1718000000004,\t0b1e...,\tusers,\tDELETE,\tbob,\t
//! 1718000000009,\t9a2d...,\tusers,\tSET_MANY,\t,\t[{"key":"c","value":1}]
//! ```

mod reader;
mod record;
mod recovery;
mod writer;

pub use reader::OpLogReader;
pub use record::{Mutation, OpLogRecord, SEPARATOR};
pub use recovery::{RecoveryEngine, RecoveryReport};
pub use writer::OpLogWriter;
