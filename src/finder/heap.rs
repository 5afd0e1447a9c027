//! Bounded top-K selection
//!
//! A fixed-capacity binary heap whose root is always the *worst* element
//! kept. Once full, a candidate only gets in if it beats the root, which
//! is then dropped. Pushes come from every worker at once and take the
//! heap's lock; popping happens after the workers have been joined and so
//! needs `&mut self` and no lock at all.

use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};

/// Which end of the value range the heap keeps
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeapOrder {
    /// Min-heap root; keeps the K largest keys
    Ascending,
    /// Max-heap root; keeps the K smallest keys
    Descending,
}

impl HeapOrder {
    /// `a` should sit above `b` in the heap
    fn above(self, a: i64, b: i64) -> bool {
        match self {
            HeapOrder::Ascending => a < b,
            HeapOrder::Descending => a > b,
        }
    }
}

/// One ranked candidate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ranked {
    pub key: i64,
    pub path: PathBuf,
}

#[derive(Debug)]
struct HeapCore {
    slots: Vec<Ranked>,
    capacity: usize,
    order: HeapOrder,
}

impl HeapCore {
    fn sift_up(&mut self, mut idx: usize) {
        while idx > 0 {
            let parent = (idx - 1) / 2;
            if !self.order.above(self.slots[idx].key, self.slots[parent].key) {
                break;
            }
            self.slots.swap(idx, parent);
            idx = parent;
        }
    }

    fn sift_down(&mut self, mut idx: usize) {
        let len = self.slots.len();
        loop {
            let left = 2 * idx + 1;
            let right = left + 1;
            let mut top = idx;
            if left < len && self.order.above(self.slots[left].key, self.slots[top].key) {
                top = left;
            }
            if right < len && self.order.above(self.slots[right].key, self.slots[top].key) {
                top = right;
            }
            if top == idx {
                break;
            }
            self.slots.swap(idx, top);
            idx = top;
        }
    }

    fn pop(&mut self) -> Option<Ranked> {
        if self.slots.is_empty() {
            return None;
        }
        let last = self.slots.len() - 1;
        self.slots.swap(0, last);
        let root = self.slots.pop();
        self.sift_down(0);
        root
    }

    fn push(&mut self, candidate: Ranked) -> bool {
        if self.capacity == 0 {
            return false;
        }
        if self.slots.len() == self.capacity {
            // strictly better than the worst kept, or out
            if !self.order.above(self.slots[0].key, candidate.key) {
                return false;
            }
            self.pop();
        }
        self.slots.push(candidate);
        let idx = self.slots.len() - 1;
        self.sift_up(idx);
        true
    }
}

/// Thread-safe bounded heap of `(key, path)` pairs
#[derive(Debug)]
pub struct TopK {
    core: Mutex<HeapCore>,
}

impl TopK {
    pub fn new(capacity: usize, order: HeapOrder) -> Self {
        Self {
            core: Mutex::new(HeapCore {
                slots: Vec::with_capacity(capacity.min(4096)),
                capacity,
                order,
            }),
        }
    }

    /// Offer a candidate. Returns `false` when it was rejected.
    pub fn push(&self, key: i64, path: impl Into<PathBuf>) -> bool {
        let candidate = Ranked {
            key,
            path: path.into(),
        };
        self.core
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(candidate)
    }

    /// Remove the worst element kept
    pub fn pop(&mut self) -> Option<Ranked> {
        self.core_mut().pop()
    }

    pub fn len(&mut self) -> usize {
        self.core_mut().slots.len()
    }

    pub fn is_empty(&mut self) -> bool {
        self.len() == 0
    }

    fn core_mut(&mut self) -> &mut HeapCore {
        self.core.get_mut().unwrap_or_else(PoisonError::into_inner)
    }

    /// Drain into a list ordered best first
    pub fn into_ranked(mut self) -> Vec<Ranked> {
        let mut ranked: Vec<Ranked> = std::iter::from_fn(|| self.pop()).collect();
        ranked.reverse();
        ranked
    }
}
