//! Line-oriented output sinks for the event trace.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::warn;

/// Destination for trace lines and the final snapshot.
pub trait OutputSink {
    fn line(&mut self, line: &str);
}

/// Prints every line to stdout.
#[derive(Debug, Default)]
pub struct ConsoleSink;

impl OutputSink for ConsoleSink {
    fn line(&mut self, line: &str) {
        println!("{line}");
    }
}

/// Discards everything (`--quiet`).
#[derive(Debug, Default)]
pub struct NullSink;

impl OutputSink for NullSink {
    fn line(&mut self, _line: &str) {}
}

/// Buffered per-trial trace file.
#[derive(Debug)]
pub struct FileSink {
    writer: BufWriter<File>,
}

impl FileSink {
    pub fn create(path: &Path) -> std::io::Result<Self> {
        Ok(Self {
            writer: BufWriter::new(File::create(path)?),
        })
    }
}

impl OutputSink for FileSink {
    fn line(&mut self, line: &str) {
        if let Err(error) = writeln!(self.writer, "{line}") {
            warn!(%error, "dropped trace line");
        }
    }
}

impl Drop for FileSink {
    fn drop(&mut self) {
        if let Err(error) = self.writer.flush() {
            warn!(%error, "failed to flush trace file");
        }
    }
}
