//! Operation log reader
//!
//! Streams records from a log file line by line.

use std::fs::File;
use std::io::{BufRead, BufReader, Lines};
use std::path::Path;

use crate::error::Result;

use super::OpLogRecord;

/// Reads records from an operation log
pub struct OpLogReader {
    lines: Lines<BufReader<File>>,
    line_no: usize,
}

impl OpLogReader {
    /// Open a log file for reading
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        Ok(Self {
            lines: BufReader::new(file).lines(),
            line_no: 0,
        })
    }

    /// Number of lines consumed so far
    pub fn line_no(&self) -> usize {
        self.line_no
    }
}

impl Iterator for OpLogReader {
    /// 1-based line number and the parsed record
    type Item = (usize, Result<OpLogRecord>);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let line = self.lines.next()?;
            self.line_no += 1;

            match line {
                Ok(line) if line.trim().is_empty() => continue,
                Ok(line) => return Some((self.line_no, OpLogRecord::parse(&line))),
                Err(e) => return Some((self.line_no, Err(e.into()))),
            }
        }
    }
}
