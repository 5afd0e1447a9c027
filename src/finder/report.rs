//! Text rendering of scan results
//!
//! Everything here is pure formatting; the binary decides which stream each
//! piece goes to.

use std::fmt::Write as _;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{Local, TimeZone};

use super::heap::Ranked;
use super::options::RankMetric;
use super::queue::QueuePolicy;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// `YYYY-MM-DD HH:MM:SS` in local time
pub fn format_timestamp(secs: i64) -> String {
    match Local.timestamp_opt(secs, 0).earliest() {
        Some(t) => t.format(TIMESTAMP_FORMAT).to_string(),
        // out of chrono's range; keep the column width
        None => format!("{:>19}", secs),
    }
}

/// Human-scaled disk usage followed by the tab-separated roots
///
/// `blocks` counts 512-byte blocks. Whole KiB are scaled by 1024 until the
/// value fits, then printed with one decimal: `12.0K`, `3.4M`, `1.0G`, `2.5T`.
pub fn format_disk_usage(blocks: u64, roots: &[PathBuf]) -> String {
    const KIB: u64 = 1024;
    let kib = blocks / 2;
    let mut line = if kib < KIB {
        format!("{:.1}K", kib as f64)
    } else if kib < KIB * KIB {
        format!("{:.1}M", kib as f64 / 1024.0)
    } else if kib < KIB * KIB * KIB {
        format!("{:.1}G", kib as f64 / 1024.0 / 1024.0)
    } else {
        format!("{:.1}T", kib as f64 / 1024.0 / 1024.0 / 1024.0)
    };
    for root in roots {
        line.push('\t');
        line.push_str(&root.display().to_string());
    }
    line
}

/// One line per ranked entry, best first
pub fn format_ranking(metric: RankMetric, ranked: &[Ranked]) -> String {
    let mut out = String::new();
    for entry in ranked {
        if metric.is_time() {
            let _ = writeln!(out, "{} {}", format_timestamp(entry.key), entry.path.display());
        } else {
            let _ = writeln!(out, "{:<19} {}", entry.key, entry.path.display());
        }
    }
    out
}

/// Progress line; `rate` is `None` until a whole second has passed
pub fn format_progress(processed: u64, rate: Option<u64>) -> String {
    match rate {
        Some(rate) => format!("About {} files processed ({} files/s)...", processed, rate),
        None => format!(
            "About {} files processed (currently running too fast to calculate files/s)...",
            processed
        ),
    }
}

pub fn format_elapsed(elapsed: Duration) -> String {
    format!("Real: {:.2} seconds", elapsed.as_secs_f64())
}

/// Counters gathered over one scan
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanStats {
    pub threads: usize,
    /// `u64::MAX` when every subdirectory is walked inline
    pub inline_threshold: u64,
    /// Metadata fetches the walk could not do without
    pub expected_fetches: u64,
    /// Fetches caused by listings that gave no entry type
    pub unexpected_fetches: u64,
    pub queue_policy: QueuePolicy,
    pub enqueued: u64,
    pub bypassed: u64,
    pub overflowed_signals: u64,
    pub diagnostics: u64,
    pub untrusted_link_counts: bool,
}

impl ScanStats {
    /// The `--stats` block
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "+------------------------------+");
        let _ = writeln!(out, "| Some final tidbits from \"-S\" |");
        let _ = writeln!(out, "+------------------------------+");
        let _ = writeln!(out, "- Version: {}", env!("CARGO_PKG_VERSION"));
        let _ = writeln!(out, "- Number of threads used: {}", self.threads);
        let _ = writeln!(
            out,
            "- Max number of subdirectories that could be processed in-line per directory"
        );
        if self.inline_threshold == u64::MAX {
            let _ = writeln!(out, "  (and not in a separate thread): unlimited");
        } else {
            let _ = writeln!(out, "  (and not in a separate thread): {}", self.inline_threshold);
        }
        let _ = writeln!(
            out,
            "- Mandatory lstat calls (at least 1 per directory): {}",
            self.expected_fetches
        );
        let _ = writeln!(
            out,
            "- Unexpected lstat calls (when the entry type is unknown): {}",
            self.unexpected_fetches
        );
        let policy = match self.queue_policy {
            QueuePolicy::Lifo => "LIFO",
            QueuePolicy::Fifo => "FIFO",
            QueuePolicy::InodeOrder => "INODE",
        };
        let _ = writeln!(out, "- Number of {} enqueued directories: {}", policy, self.enqueued);
        if self.queue_policy == QueuePolicy::InodeOrder {
            let _ = writeln!(out, "- INO queue insert bypasscount: {}", self.bypassed);
        }
        let _ = writeln!(out, "- Overflowed wake-up signals: {}", self.overflowed_signals);
        let _ = writeln!(out, "- Untrusted directory link counts: {}", self.untrusted_link_counts);
        let _ = writeln!(out, "- Diagnostics emitted: {}", self.diagnostics);
        out
    }
}
