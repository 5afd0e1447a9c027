//! Shared queue of directories waiting for a worker
//!
//! Three disciplines are available: a LIFO stack (default), a FIFO list, and
//! a tree ordered by inode number which hands out the lowest inode first.
//! The inode order tends to follow the on-disk layout, which helps a single
//! spinning disk and nothing else.
//!
//! `insert` and `extract` never block. Waiting for work is the thread pool's
//! business, not the queue's.

use std::collections::VecDeque;
use std::fmt;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::compliance::LinkBudget;

/// A directory waiting to be walked, together with the totals gathered
/// while walking it
#[derive(Debug, Clone)]
pub struct WorkItem {
    pub path: PathBuf,
    /// Roots are depth 0
    pub depth: usize,
    pub mtime: i64,
    pub budget: LinkBudget,
    /// Subdirectories already walked on this item's call stack
    pub inlined: u64,
    pub file_count: u64,
    /// 512-byte blocks
    pub disk_usage: u64,
    pub device: u64,
    pub inode: u64,
}

impl WorkItem {
    pub fn new(path: impl Into<PathBuf>, depth: usize, budget: LinkBudget) -> Self {
        Self {
            path: path.into(),
            depth,
            mtime: 0,
            budget,
            inlined: 0,
            file_count: 0,
            disk_usage: 0,
            device: 0,
            inode: 0,
        }
    }

    pub fn with_identity(mut self, device: u64, inode: u64) -> Self {
        self.device = device;
        self.inode = inode;
        self
    }

    pub fn with_mtime(mut self, mtime: i64) -> Self {
        self.mtime = mtime;
        self
    }
}

/// Queue discipline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueuePolicy {
    #[default]
    Lifo,
    Fifo,
    InodeOrder,
}

impl fmt::Display for QueuePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            QueuePolicy::Lifo => "LIFO",
            QueuePolicy::Fifo => "FIFO",
            QueuePolicy::InodeOrder => "inode-ordered",
        };
        f.write_str(name)
    }
}

/// Storage behind a [`WorkQueue`]
pub trait QueueDiscipline: Send {
    fn push(&mut self, item: WorkItem);
    fn pop(&mut self) -> Option<WorkItem>;
    /// Nodes stepped over while placing items, for disciplines that search
    fn bypassed(&self) -> u64 {
        0
    }
}

#[derive(Debug, Default)]
pub struct LifoQueue {
    items: Vec<WorkItem>,
}

impl QueueDiscipline for LifoQueue {
    fn push(&mut self, item: WorkItem) {
        self.items.push(item);
    }

    fn pop(&mut self) -> Option<WorkItem> {
        self.items.pop()
    }
}

#[derive(Debug, Default)]
pub struct FifoQueue {
    items: VecDeque<WorkItem>,
}

impl QueueDiscipline for FifoQueue {
    fn push(&mut self, item: WorkItem) {
        self.items.push_back(item);
    }

    fn pop(&mut self) -> Option<WorkItem> {
        self.items.pop_front()
    }
}

#[derive(Debug)]
struct TreeNode {
    item: WorkItem,
    left: Option<usize>,
    right: Option<usize>,
}

/// Unbalanced binary search tree keyed by inode, stored in an arena
///
/// Equal inodes go right, so items with the same inode come out in
/// insertion order.
#[derive(Debug, Default)]
pub struct InodeTree {
    slots: Vec<Option<TreeNode>>,
    free: Vec<usize>,
    root: Option<usize>,
    bypassed: u64,
}

impl InodeTree {
    fn node(&self, idx: usize) -> &TreeNode {
        match &self.slots[idx] {
            Some(node) => node,
            None => unreachable!("inode tree links to a free slot"),
        }
    }

    fn node_mut(&mut self, idx: usize) -> &mut TreeNode {
        match &mut self.slots[idx] {
            Some(node) => node,
            None => unreachable!("inode tree links to a free slot"),
        }
    }

    fn alloc(&mut self, item: WorkItem) -> usize {
        let node = TreeNode {
            item,
            left: None,
            right: None,
        };
        match self.free.pop() {
            Some(idx) => {
                self.slots[idx] = Some(node);
                idx
            }
            None => {
                self.slots.push(Some(node));
                self.slots.len() - 1
            }
        }
    }
}

impl QueueDiscipline for InodeTree {
    fn push(&mut self, item: WorkItem) {
        let inode = item.inode;
        let new = self.alloc(item);

        let Some(mut cur) = self.root else {
            self.root = Some(new);
            return;
        };
        loop {
            self.bypassed += 1;
            let node = self.node(cur);
            let next = if inode < node.item.inode {
                node.left
            } else {
                node.right
            };
            match next {
                Some(child) => cur = child,
                None => {
                    let node = self.node_mut(cur);
                    if inode < node.item.inode {
                        node.left = Some(new);
                    } else {
                        node.right = Some(new);
                    }
                    return;
                }
            }
        }
    }

    fn pop(&mut self) -> Option<WorkItem> {
        let mut parent: Option<usize> = None;
        let mut cur = self.root?;
        while let Some(left) = self.node(cur).left {
            parent = Some(cur);
            cur = left;
        }

        let right = self.node(cur).right;
        match parent {
            Some(p) => self.node_mut(p).left = right,
            None => self.root = right,
        }

        let node = self.slots[cur].take()?;
        self.free.push(cur);
        Some(node.item)
    }

    fn bypassed(&self) -> u64 {
        self.bypassed
    }
}

struct QueueState {
    items: Box<dyn QueueDiscipline>,
    len: usize,
    enqueued: u64,
}

/// The scan-wide directory queue
pub struct WorkQueue {
    policy: QueuePolicy,
    state: Mutex<QueueState>,
}

impl fmt::Debug for WorkQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkQueue")
            .field("policy", &self.policy)
            .field("len", &self.len())
            .finish()
    }
}

impl WorkQueue {
    pub fn new(policy: QueuePolicy) -> Self {
        let items: Box<dyn QueueDiscipline> = match policy {
            QueuePolicy::Lifo => Box::<LifoQueue>::default(),
            QueuePolicy::Fifo => Box::<FifoQueue>::default(),
            QueuePolicy::InodeOrder => Box::<InodeTree>::default(),
        };
        Self {
            policy,
            state: Mutex::new(QueueState {
                items,
                len: 0,
                enqueued: 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn policy(&self) -> QueuePolicy {
        self.policy
    }

    pub fn insert(&self, item: WorkItem) {
        let mut state = self.lock();
        state.items.push(item);
        state.len += 1;
        state.enqueued += 1;
    }

    pub fn extract(&self) -> Option<WorkItem> {
        let mut state = self.lock();
        let item = state.items.pop()?;
        state.len -= 1;
        Some(item)
    }

    /// Run `on_pull` and extract in one critical section
    ///
    /// The pool uses this to leave the sleeping count and take work as one
    /// step, so an empty queue observed under the lock really means no
    /// woken worker is about to receive an item.
    pub fn extract_after(&self, on_pull: impl FnOnce()) -> Option<WorkItem> {
        let mut state = self.lock();
        on_pull();
        let item = state.items.pop()?;
        state.len -= 1;
        Some(item)
    }

    /// True when the queue is empty and `idle` holds, both checked under
    /// the queue lock
    pub fn is_drained_and(&self, idle: impl FnOnce() -> bool) -> bool {
        let state = self.lock();
        state.len == 0 && idle()
    }

    pub fn len(&self) -> usize {
        self.lock().len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Items ever inserted
    pub fn enqueued(&self) -> u64 {
        self.lock().enqueued
    }

    pub fn bypassed(&self) -> u64 {
        self.lock().items.bypassed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(name: &str, inode: u64) -> WorkItem {
        WorkItem::new(name, 1, LinkBudget::Counted(2)).with_identity(1, inode)
    }

    fn drain(queue: &WorkQueue) -> Vec<u64> {
        std::iter::from_fn(|| queue.extract()).map(|i| i.inode).collect()
    }

    #[test]
    fn test_lifo_order() {
        let queue = WorkQueue::new(QueuePolicy::Lifo);
        for inode in [1, 2, 3] {
            queue.insert(item("d", inode));
        }
        assert_eq!(queue.len(), 3);
        assert_eq!(drain(&queue), vec![3, 2, 1]);
        assert!(queue.is_empty());
        assert!(queue.extract().is_none());
    }

    #[test]
    fn test_fifo_order() {
        let queue = WorkQueue::new(QueuePolicy::Fifo);
        for inode in [1, 2, 3] {
            queue.insert(item("d", inode));
        }
        assert_eq!(drain(&queue), vec![1, 2, 3]);
        assert_eq!(queue.enqueued(), 3);
    }

    #[test]
    fn test_inode_order_extracts_smallest_first() {
        let queue = WorkQueue::new(QueuePolicy::InodeOrder);
        for inode in [50, 20, 70, 10, 30, 60, 80, 25] {
            queue.insert(item("d", inode));
        }
        assert_eq!(queue.len(), 8);
        assert_eq!(drain(&queue), vec![10, 20, 25, 30, 50, 60, 70, 80]);
        assert_eq!(queue.len(), 0);
    }

    #[test]
    fn test_inode_order_interleaved_and_slot_reuse() {
        let mut tree = InodeTree::default();
        tree.push(item("a", 5));
        tree.push(item("b", 3));
        assert_eq!(tree.pop().map(|i| i.inode), Some(3));
        tree.push(item("c", 4));
        tree.push(item("d", 9));
        assert_eq!(tree.pop().map(|i| i.inode), Some(4));
        assert_eq!(tree.pop().map(|i| i.inode), Some(5));
        assert_eq!(tree.pop().map(|i| i.inode), Some(9));
        assert!(tree.pop().is_none());
        // 4 inserts, at most 3 live at once
        assert_eq!(tree.slots.len(), 3);
    }

    #[test]
    fn test_inode_bypass_count() {
        let queue = WorkQueue::new(QueuePolicy::InodeOrder);
        // a degenerate chain: each insert walks past every earlier node
        for inode in 1..=4 {
            queue.insert(item("d", inode));
        }
        assert_eq!(queue.bypassed(), 1 + 2 + 3);

        let lifo = WorkQueue::new(QueuePolicy::Lifo);
        lifo.insert(item("d", 1));
        assert_eq!(lifo.bypassed(), 0);
    }

    #[test]
    fn test_duplicate_inodes_keep_insertion_order() {
        let queue = WorkQueue::new(QueuePolicy::InodeOrder);
        queue.insert(item("first", 7));
        queue.insert(item("second", 7));
        let first = queue.extract().unwrap();
        let second = queue.extract().unwrap();
        assert_eq!(first.path, PathBuf::from("first"));
        assert_eq!(second.path, PathBuf::from("second"));
    }
}
