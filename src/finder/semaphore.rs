//! Counting semaphore used for every wake-up between the coordinator and
//! the workers.
//!
//! Mutex + Condvar rather than atomics: waits only happen when a thread has
//! nothing to do, so blocking cost is irrelevant next to directory I/O.
//! The count is capped; a `post` that would exceed the cap is refused and
//! the caller is expected to remember the lost signal and re-post it later.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

/// Default cap, the smallest `SEM_VALUE_MAX` POSIX allows
pub const DEFAULT_SEMAPHORE_CAP: usize = 32767;

#[derive(Debug)]
pub struct Semaphore {
    permits: Mutex<usize>,
    cv: Condvar,
    cap: usize,
}

impl Semaphore {
    pub fn new() -> Self {
        Self::with_cap(DEFAULT_SEMAPHORE_CAP)
    }

    /// A semaphore that holds at most `cap` pending signals (at least 1)
    pub fn with_cap(cap: usize) -> Self {
        Self {
            permits: Mutex::new(0),
            cv: Condvar::new(),
            cap: cap.max(1),
        }
    }

    pub fn cap(&self) -> usize {
        self.cap
    }

    // A panicking walker must not wedge the rest of the pool.
    fn lock(&self) -> MutexGuard<'_, usize> {
        self.permits.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Block until a signal is available, then consume it
    pub fn wait(&self) {
        let mut permits = self.lock();
        while *permits == 0 {
            permits = self.cv.wait(permits).unwrap_or_else(PoisonError::into_inner);
        }
        *permits -= 1;
    }

    /// Consume a signal if one is pending
    #[cfg(test)]
    fn try_wait(&self) -> bool {
        let mut permits = self.lock();
        if *permits == 0 {
            return false;
        }
        *permits -= 1;
        true
    }

    /// Add a signal and wake one waiter. Returns `false`, leaving the count
    /// unchanged, when the semaphore is already at its cap.
    pub fn post(&self) -> bool {
        let mut permits = self.lock();
        if *permits >= self.cap {
            return false;
        }
        *permits += 1;
        drop(permits);
        self.cv.notify_one();
        true
    }

    /// Pending signals right now
    #[cfg(test)]
    fn available(&self) -> usize {
        *self.lock()
    }
}

impl Default for Semaphore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_post_then_wait() {
        let sem = Semaphore::new();
        assert!(sem.post());
        assert!(sem.post());
        assert_eq!(sem.available(), 2);
        sem.wait();
        assert!(sem.try_wait());
        assert!(!sem.try_wait());
    }

    #[test]
    fn test_cap_refuses_excess_posts() {
        let sem = Semaphore::with_cap(2);
        assert!(sem.post());
        assert!(sem.post());
        assert!(!sem.post());
        assert_eq!(sem.available(), 2);
    }

    #[test]
    fn test_zero_cap_is_raised_to_one() {
        let sem = Semaphore::with_cap(0);
        assert_eq!(sem.cap(), 1);
        assert!(sem.post());
    }

    #[test]
    fn test_wait_blocks_until_posted() {
        let sem = Arc::new(Semaphore::new());
        let woken = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let sem = Arc::clone(&sem);
                let woken = Arc::clone(&woken);
                thread::spawn(move || {
                    sem.wait();
                    woken.fetch_add(1, Ordering::SeqCst);
                })
            })
            .collect();

        thread::sleep(Duration::from_millis(50));
        assert_eq!(woken.load(Ordering::SeqCst), 0);

        for _ in 0..4 {
            assert!(sem.post());
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(woken.load(Ordering::SeqCst), 4);
        assert_eq!(sem.available(), 0);
    }
}
