//! Hardlink bookkeeping for disk-usage totals
//!
//! A file with several names must be counted once. Every hardlinked
//! non-directory seen during a disk-usage scan is recorded here by
//! `(inode, device, is_dir)`; later sightings of the same triple add nothing.

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Bucket count, a prime
pub const DEDUP_BUCKETS: usize = 311;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DedupEntry {
    pub inode: u64,
    pub device: u64,
    pub is_dir: bool,
}

/// Chained hash set of [`DedupEntry`], bucketed by `inode % 311`
#[derive(Debug)]
pub struct DedupTable {
    buckets: Mutex<Vec<Vec<DedupEntry>>>,
}

impl Default for DedupTable {
    fn default() -> Self {
        Self::new()
    }
}

impl DedupTable {
    pub fn new() -> Self {
        Self {
            buckets: Mutex::new(vec![Vec::new(); DEDUP_BUCKETS]),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Vec<DedupEntry>>> {
        self.buckets.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn bucket(inode: u64) -> usize {
        (inode % DEDUP_BUCKETS as u64) as usize
    }

    pub fn record(&self, inode: u64, device: u64, is_dir: bool) {
        let entry = DedupEntry { inode, device, is_dir };
        self.lock()[Self::bucket(inode)].push(entry);
    }

    pub fn contains(&self, inode: u64, device: u64, is_dir: bool) -> bool {
        let entry = DedupEntry { inode, device, is_dir };
        self.lock()[Self::bucket(inode)].contains(&entry)
    }

    /// Record the triple and report whether it was new, in one critical
    /// section so two workers meeting the same file cannot both count it
    pub fn first_sighting(&self, inode: u64, device: u64, is_dir: bool) -> bool {
        let entry = DedupEntry { inode, device, is_dir };
        let mut buckets = self.lock();
        let bucket = &mut buckets[Self::bucket(inode)];
        if bucket.contains(&entry) {
            return false;
        }
        bucket.push(entry);
        true
    }

    pub fn len(&self) -> usize {
        self.lock().iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
