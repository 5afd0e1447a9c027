//! Directory link-count trust
//!
//! On a POSIX filesystem a directory has `2 + subdirectories` links, so once
//! that many subdirectories have been seen the rest of the listing cannot
//! contain another one and untyped entries need no metadata fetch. btrfs,
//! many FUSE and network filesystems report 0 or 1 instead; trusting those
//! numbers would stop descent early. [`ComplianceMonitor`] notices such
//! directories and from then on the scan treats every link count as
//! untrusted.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use log::debug;

/// What is left of a directory's link count while its entries are scanned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkBudget {
    /// Links not yet accounted for by a discovered subdirectory
    Counted(u64),
    /// The count cannot be used; every entry must be examined
    Untrusted,
}

impl LinkBudget {
    /// A subdirectory was found
    pub fn consume(&mut self) {
        if let LinkBudget::Counted(n) = self {
            *n = n.saturating_sub(1);
        }
    }

    /// Whether an entry of unknown type may still be a directory
    pub fn may_hold_subdirs(&self) -> bool {
        match self {
            LinkBudget::Counted(n) => *n > 2,
            LinkBudget::Untrusted => true,
        }
    }

    /// True when the subdirectory just consumed is one of the last
    /// `threshold` of its parent
    pub fn within_last(&self, threshold: u64) -> bool {
        match self {
            LinkBudget::Counted(n) => *n < threshold.saturating_add(2),
            LinkBudget::Untrusted => false,
        }
    }
}

/// Scan-wide, one-way switch into untrusted link-count mode
#[derive(Debug, Default)]
pub struct ComplianceMonitor {
    simulate: AtomicBool,
}

impl ComplianceMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Once set, never cleared
    pub fn is_simulating(&self) -> bool {
        self.simulate.load(Ordering::SeqCst)
    }

    fn trip(&self, path: &Path) {
        if !self.simulate.swap(true, Ordering::SeqCst) {
            debug!(
                "POSIX non-compliance detected on {} - treating all link counts as untrusted",
                path.display()
            );
        }
    }

    /// Budget for a traversal root, inspected before it is queued
    pub fn check_root(&self, path: &Path, nlink: u64) -> LinkBudget {
        if nlink < 2 {
            self.trip(path);
        }
        debug!(
            "{}, POSIX compliance = {}",
            path.display(),
            !self.is_simulating()
        );
        self.budget_for(nlink)
    }

    /// Budget for a newly discovered subdirectory
    pub fn budget_for(&self, nlink: u64) -> LinkBudget {
        if self.is_simulating() {
            LinkBudget::Untrusted
        } else {
            LinkBudget::Counted(nlink)
        }
    }

    /// Re-check a directory as it is opened. A counted budget below 2 is
    /// impossible on a compliant filesystem.
    pub fn check_directory(&self, path: &Path, budget: &mut LinkBudget) {
        if let LinkBudget::Counted(n) = *budget {
            if n < 2 {
                self.trip(path);
                *budget = LinkBudget::Untrusted;
            }
        }
    }
}
