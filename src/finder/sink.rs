//! Where accepted entries go
//!
//! Listing output is written from every worker, so sinks take `&self` and
//! serialize internally. Lines from different threads never interleave but
//! their order is whatever the scheduler produced.

use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use log::debug;

use super::report::format_timestamp;

/// How each listed path is written
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// `path\n`
    #[default]
    Line,
    /// `path\0`
    Null,
    /// `YYYY-MM-DD HH:MM:SS path\n`, modification time in local time
    Timestamped,
}

/// Receives every accepted entry of a listing scan
pub trait ResultSink: Send + Sync {
    /// `mtime` is only meaningful when the scan fetched metadata for the entry
    fn emit(&self, path: &Path, mtime: i64);

    /// Flush buffered output once the scan is over
    fn finish(&self) -> io::Result<()> {
        Ok(())
    }
}

/// Formats entries onto any writer, typically stdout
pub struct WriterSink<W: Write + Send> {
    out: Mutex<BufWriter<W>>,
    format: OutputFormat,
    broken: AtomicBool,
}

impl<W: Write + Send> WriterSink<W> {
    pub fn new(writer: W, format: OutputFormat) -> Self {
        Self {
            out: Mutex::new(BufWriter::new(writer)),
            format,
            broken: AtomicBool::new(false),
        }
    }

    pub fn format(&self) -> OutputFormat {
        self.format
    }

    fn write_entry(&self, out: &mut impl Write, path: &Path, mtime: i64) -> io::Result<()> {
        let bytes = path.as_os_str().as_encoded_bytes();
        match self.format {
            OutputFormat::Line => {
                out.write_all(bytes)?;
                out.write_all(b"\n")
            }
            OutputFormat::Null => {
                out.write_all(bytes)?;
                out.write_all(b"\0")
            }
            OutputFormat::Timestamped => {
                out.write_all(format_timestamp(mtime).as_bytes())?;
                out.write_all(b" ")?;
                out.write_all(bytes)?;
                out.write_all(b"\n")
            }
        }
    }

    /// Recover the writer after the scan
    pub fn into_inner(self) -> io::Result<W> {
        let out = self.out.into_inner().unwrap_or_else(PoisonError::into_inner);
        out.into_inner().map_err(|e| e.into_error())
    }
}

impl<W: Write + Send> ResultSink for WriterSink<W> {
    fn emit(&self, path: &Path, mtime: i64) {
        if self.broken.load(Ordering::Relaxed) {
            return;
        }
        let mut out = self.out.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = self.write_entry(&mut *out, path, mtime) {
            // a closed pipe stops the output, not the scan
            debug!("Output stopped: {}", e);
            self.broken.store(true, Ordering::Relaxed);
        }
    }

    fn finish(&self) -> io::Result<()> {
        if self.broken.load(Ordering::Relaxed) {
            return Ok(());
        }
        self.out
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .flush()
    }
}

/// Keeps every emitted path in memory
#[derive(Debug, Default)]
pub struct CollectingSink {
    paths: Mutex<Vec<PathBuf>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Emitted paths, sorted
    pub fn paths(&self) -> Vec<PathBuf> {
        let mut paths = self
            .paths
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        paths.sort();
        paths
    }

    pub fn len(&self) -> usize {
        self.paths.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ResultSink for CollectingSink {
    fn emit(&self, path: &Path, _mtime: i64) {
        self.paths
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(path.to_path_buf());
    }
}
