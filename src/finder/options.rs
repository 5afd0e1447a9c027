//! Options for a scan
//!
//! This module provides the knobs that shape a scan: traversal limits,
//! parallelism, output format and the aggregate mode.

use super::filter::MatchTarget;
use super::fs::EntryMetadata;
use super::heap::HeapOrder;
use super::queue::QueuePolicy;
use super::sink::OutputFormat;
use super::thread_pool::{default_threads, ThreadPoolConfig, MAX_THREADS};
use crate::errors::{ScanError, ScanResult};

/// Subdirectories per directory walked on the current call stack by default
pub const DEFAULT_INLINE_THRESHOLD: u64 = 2;

/// What a ranking orders by
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RankMetric {
    /// Directories holding the most accepted entries
    MostFiles,
    /// Directories furthest from their root
    Deepest,
    /// Largest entries by size in bytes
    Largest,
    MostRecentlyModified,
    MostRecentlyAccessed,
    LeastRecentlyModified,
    LeastRecentlyAccessed,
}

impl RankMetric {
    /// The heap direction that keeps the best entries
    pub fn order(self) -> HeapOrder {
        match self {
            RankMetric::LeastRecentlyModified | RankMetric::LeastRecentlyAccessed => {
                HeapOrder::Descending
            }
            _ => HeapOrder::Ascending,
        }
    }

    /// Ranked once per directory rather than once per entry
    pub fn per_directory(self) -> bool {
        matches!(self, RankMetric::MostFiles | RankMetric::Deepest)
    }

    /// Keys are timestamps and print as such
    pub fn is_time(self) -> bool {
        matches!(
            self,
            RankMetric::MostRecentlyModified
                | RankMetric::MostRecentlyAccessed
                | RankMetric::LeastRecentlyModified
                | RankMetric::LeastRecentlyAccessed
        )
    }

    /// Ranking key of an entry, for per-entry metrics
    pub fn entry_key(self, meta: &EntryMetadata) -> Option<i64> {
        match self {
            RankMetric::Largest => Some(i64::try_from(meta.size).unwrap_or(i64::MAX)),
            RankMetric::MostRecentlyModified | RankMetric::LeastRecentlyModified => Some(meta.mtime),
            RankMetric::MostRecentlyAccessed | RankMetric::LeastRecentlyAccessed => Some(meta.atime),
            RankMetric::MostFiles | RankMetric::Deepest => None,
        }
    }
}

/// Keep the best `count` entries by `metric`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ranking {
    pub metric: RankMetric,
    pub count: usize,
}

impl Ranking {
    pub fn new(metric: RankMetric, count: usize) -> Self {
        Self { metric, count }
    }
}

/// Options for configuring a scan
#[derive(Debug, Clone)]
pub struct ScanOptions {
    /// Levels below the roots to descend into; `Some(1)` lists the roots'
    /// children only
    pub max_depth: Option<usize>,

    /// Worker thread count
    pub threads: usize,

    /// Subdirectories per directory walked inline; 0 queues every one
    pub inline_threshold: u64,

    pub queue_policy: QueuePolicy,

    /// Do not descend into directories on other devices
    pub one_file_system: bool,

    pub match_target: MatchTarget,

    pub output: OutputFormat,

    /// Count accepted entries instead of listing them
    pub count_only: bool,

    /// Sum the disk usage of accepted entries instead of listing them
    pub disk_usage: bool,

    /// Count a file with several links once in the disk usage sum,
    /// not once per name
    pub hardlink_dedup: bool,

    /// List empty directories only
    pub empty_dirs: bool,

    pub ranking: Option<Ranking>,

    /// Progress line every this many accepted entries
    pub progress_interval: Option<u64>,

    /// Cap on pending work signals
    pub wake_cap: usize,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl ScanOptions {
    /// Create a new ScanOptions with default values
    pub fn new() -> Self {
        Self {
            max_depth: None,
            threads: default_threads(),
            inline_threshold: DEFAULT_INLINE_THRESHOLD,
            queue_policy: QueuePolicy::default(),
            one_file_system: false,
            match_target: MatchTarget::default(),
            output: OutputFormat::default(),
            count_only: false,
            disk_usage: false,
            hardlink_dedup: true,
            empty_dirs: false,
            ranking: None,
            progress_interval: None,
            wake_cap: ThreadPoolConfig::default().wake_cap,
        }
    }

    /// Set the maximum depth to descend
    pub fn with_max_depth(mut self, max_depth: Option<usize>) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    pub fn with_inline_threshold(mut self, threshold: u64) -> Self {
        self.inline_threshold = threshold;
        self
    }

    pub fn with_queue_policy(mut self, policy: QueuePolicy) -> Self {
        self.queue_policy = policy;
        self
    }

    pub fn with_one_file_system(mut self, enabled: bool) -> Self {
        self.one_file_system = enabled;
        self
    }

    pub fn with_match_target(mut self, target: MatchTarget) -> Self {
        self.match_target = target;
        self
    }

    pub fn with_output(mut self, output: OutputFormat) -> Self {
        self.output = output;
        self
    }

    pub fn with_count_only(mut self, enabled: bool) -> Self {
        self.count_only = enabled;
        self
    }

    pub fn with_disk_usage(mut self, enabled: bool) -> Self {
        self.disk_usage = enabled;
        self
    }

    pub fn with_hardlink_dedup(mut self, enabled: bool) -> Self {
        self.hardlink_dedup = enabled;
        self
    }

    pub fn with_empty_dirs(mut self, enabled: bool) -> Self {
        self.empty_dirs = enabled;
        self
    }

    pub fn with_ranking(mut self, ranking: Option<Ranking>) -> Self {
        self.ranking = ranking;
        self
    }

    pub fn with_progress_interval(mut self, interval: Option<u64>) -> Self {
        self.progress_interval = interval;
        self
    }

    pub fn with_wake_cap(mut self, cap: usize) -> Self {
        self.wake_cap = cap;
        self
    }

    /// Check option values and combinations
    pub fn validate(&self) -> ScanResult<()> {
        if self.threads == 0 || self.threads > MAX_THREADS {
            return Err(ScanError::InvalidOption(format!(
                "thread count must be between 1 and {}, got {}",
                MAX_THREADS, self.threads
            )));
        }
        if self.max_depth == Some(0) {
            return Err(ScanError::InvalidOption(
                "maximum depth must be greater than 0".to_string(),
            ));
        }
        if let Some(ranking) = self.ranking {
            if ranking.count == 0 {
                return Err(ScanError::InvalidOption(
                    "ranking count must be greater than 0".to_string(),
                ));
            }
        }
        if self.progress_interval == Some(0) {
            return Err(ScanError::InvalidOption(
                "progress interval must be greater than 0".to_string(),
            ));
        }

        let modes = [
            self.count_only,
            self.disk_usage,
            self.empty_dirs,
            self.ranking.is_some(),
        ];
        if modes.iter().filter(|m| **m).count() > 1 {
            return Err(ScanError::InvalidOption(
                "count, disk usage, empty directories and rankings are mutually exclusive".to_string(),
            ));
        }
        Ok(())
    }

    /// Inline threshold actually used; a lone worker walks everything inline
    pub fn effective_inline_threshold(&self) -> u64 {
        if self.threads == 1 {
            u64::MAX
        } else {
            self.inline_threshold
        }
    }

    /// Accepted entries are written to the sink one by one
    pub fn lists_entries(&self) -> bool {
        !self.count_only
            && !self.disk_usage
            && !self.empty_dirs
            && self.ranking.is_none()
            && self.progress_interval.is_none()
    }

    /// Every entry needs its metadata, not only directories
    pub fn needs_metadata(&self, predicates_active: bool) -> bool {
        predicates_active
            || self.disk_usage
            || self.output == OutputFormat::Timestamped && self.lists_entries()
            || self.ranking.map_or(false, |r| !r.metric.per_directory())
    }

    pub fn pool_config(&self) -> ThreadPoolConfig {
        ThreadPoolConfig::new(self.threads).with_wake_cap(self.wake_cap)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = ScanOptions::new();
        assert_eq!(options.inline_threshold, 2);
        assert_eq!(options.queue_policy, QueuePolicy::Lifo);
        assert!(options.threads >= 1 && options.threads <= 8);
        assert!(options.lists_entries());
        assert!(!options.needs_metadata(false));
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_single_thread_inlines_everything() {
        let options = ScanOptions::new().with_threads(1).with_inline_threshold(0);
        assert_eq!(options.effective_inline_threshold(), u64::MAX);

        let options = ScanOptions::new().with_threads(4).with_inline_threshold(0);
        assert_eq!(options.effective_inline_threshold(), 0);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        assert!(ScanOptions::new().with_threads(0).validate().is_err());
        assert!(ScanOptions::new().with_threads(MAX_THREADS + 1).validate().is_err());
        assert!(ScanOptions::new().with_threads(MAX_THREADS).validate().is_ok());
        assert!(ScanOptions::new().with_max_depth(Some(0)).validate().is_err());
        assert!(ScanOptions::new()
            .with_ranking(Some(Ranking::new(RankMetric::Largest, 0)))
            .validate()
            .is_err());
        assert!(ScanOptions::new()
            .with_count_only(true)
            .with_disk_usage(true)
            .validate()
            .is_err());
    }

    #[test]
    fn test_metadata_needs() {
        let options = ScanOptions::new().with_ranking(Some(Ranking::new(RankMetric::Deepest, 3)));
        assert!(!options.needs_metadata(false));
        assert!(!options.lists_entries());

        let options = ScanOptions::new().with_ranking(Some(Ranking::new(RankMetric::Largest, 3)));
        assert!(options.needs_metadata(false));

        let options = ScanOptions::new().with_output(OutputFormat::Timestamped);
        assert!(options.needs_metadata(false));

        assert!(ScanOptions::new().with_disk_usage(true).needs_metadata(false));
        assert!(ScanOptions::new().needs_metadata(true));
    }

    #[test]
    fn test_rank_metric_directions() {
        assert_eq!(RankMetric::Largest.order(), HeapOrder::Ascending);
        assert_eq!(RankMetric::LeastRecentlyAccessed.order(), HeapOrder::Descending);
        assert!(RankMetric::MostFiles.per_directory());
        assert!(RankMetric::MostRecentlyModified.is_time());
        assert!(!RankMetric::Largest.is_time());
    }
}
