//! 工作线程池与终止检测
//!
//! 固定数量的工作线程从共享队列中取目录处理，调用线程作为协调者，
//! 负责判断整个扫描何时结束：队列为空并且所有工作线程都在等待工作。
//!
//! 工作线程与协调者之间只通过三个信号量和两个原子变量交互：
//! - `work`：有新工作可做（每入队一个目录发一次信号）
//! - `coordinator`：所有工作线程都空闲了，请协调者检查是否结束
//! - `exited`：工作线程已退出
//! - `sleeping`：正在等待工作的线程数
//! - `finished`：扫描结束标志，只会被协调者设置一次

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::thread;

use log::debug;

use super::queue::{WorkItem, WorkQueue};
use super::semaphore::{Semaphore, DEFAULT_SEMAPHORE_CAP};
use crate::errors::{ScanError, ScanResult};

/// 工作线程数上限
pub const MAX_THREADS: usize = 512;

/// 默认线程数的上限
pub const DEFAULT_THREAD_LIMIT: usize = 8;

/// 单线程模式下整棵树都在一个调用栈上递归，需要比默认更大的栈
const WORKER_STACK_SIZE: usize = 16 * 1024 * 1024;

/// 默认线程数：CPU 数，最多 8 个
pub fn default_threads() -> usize {
    num_cpus::get().clamp(1, DEFAULT_THREAD_LIMIT)
}

/// 线程池配置选项
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThreadPoolConfig {
    /// 工作线程数
    pub threads: usize,
    /// 工作信号量的容量上限
    pub wake_cap: usize,
}

impl Default for ThreadPoolConfig {
    fn default() -> Self {
        Self {
            threads: default_threads(),
            wake_cap: DEFAULT_SEMAPHORE_CAP,
        }
    }
}

impl ThreadPoolConfig {
    /// 线程数被限制在 1..=512
    pub fn new(threads: usize) -> Self {
        Self {
            threads: threads.clamp(1, MAX_THREADS),
            ..Self::default()
        }
    }

    /// 设置信号量容量，不会小于线程数
    pub fn with_wake_cap(mut self, cap: usize) -> Self {
        self.wake_cap = cap;
        self
    }

    /// 实际使用的信号量容量
    pub fn effective_wake_cap(&self) -> usize {
        self.wake_cap.max(self.threads)
    }
}

/// 协调者与工作线程共享的同步状态
#[derive(Debug)]
pub struct WorkSignals {
    threads: usize,
    work: Semaphore,
    coordinator: Semaphore,
    exited: Semaphore,
    sleeping: AtomicUsize,
    finished: AtomicBool,
    /// 因信号量已满而暂存的工作信号
    pending_overflow: AtomicU64,
    /// 溢出总次数，用于统计
    overflowed: AtomicU64,
}

impl WorkSignals {
    pub fn new(config: &ThreadPoolConfig) -> Self {
        let cap = config.effective_wake_cap();
        Self {
            threads: config.threads,
            work: Semaphore::with_cap(cap),
            coordinator: Semaphore::with_cap(cap),
            exited: Semaphore::with_cap(cap),
            sleeping: AtomicUsize::new(0),
            finished: AtomicBool::new(false),
            pending_overflow: AtomicU64::new(0),
            overflowed: AtomicU64::new(0),
        }
    }

    /// 通知有一个新目录可处理；信号量已满时记下，由协调者稍后补发
    pub fn notify_work(&self) {
        if !self.work.post() {
            self.pending_overflow.fetch_add(1, Ordering::SeqCst);
            self.overflowed.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// 补发溢出的工作信号，直到信号量再次满为止
    fn drain_overflow(&self) {
        while self.pending_overflow.load(Ordering::SeqCst) > 0 {
            if !self.work.post() {
                break;
            }
            self.pending_overflow.fetch_sub(1, Ordering::SeqCst);
        }
    }

    /// 溢出过的工作信号总数
    pub fn overflowed(&self) -> u64 {
        self.overflowed.load(Ordering::Relaxed)
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }

    fn fall_asleep(&self) {
        let sleeping = self.sleeping.fetch_add(1, Ordering::SeqCst) + 1;
        if sleeping == self.threads {
            // 所有线程都空闲了，让协调者判断是否结束
            self.coordinator.post();
        }
    }

    fn wake_up(&self) {
        self.sleeping.fetch_sub(1, Ordering::SeqCst);
    }

    fn all_asleep(&self) -> bool {
        self.sleeping.load(Ordering::SeqCst) == self.threads
    }

    /// 设置结束标志并唤醒所有工作线程
    fn finish(&self) {
        self.finished.store(true, Ordering::SeqCst);
        for _ in 0..self.threads {
            // 失败说明信号量里已有足够多的信号
            self.work.post();
        }
    }
}

/// 工作线程退出时发出信号；如果是因 panic 退出，
/// 先把自己计入空闲线程，免得协调者永远等下去
struct ExitGuard<'a> {
    signals: &'a WorkSignals,
}

impl Drop for ExitGuard<'_> {
    fn drop(&mut self) {
        if thread::panicking() {
            self.signals.fall_asleep();
        }
        self.signals.exited.post();
    }
}

/// 固定大小的工作线程池
#[derive(Debug, Clone, Copy)]
pub struct WorkerPool {
    config: ThreadPoolConfig,
}

impl WorkerPool {
    pub fn new(config: ThreadPoolConfig) -> Self {
        Self { config }
    }

    pub fn threads(&self) -> usize {
        self.config.threads
    }

    /// 运行扫描直到队列耗尽
    ///
    /// 调用前队列里应已放入起始目录，并且每个目录都通过
    /// [`WorkSignals::notify_work`] 发过信号。`job` 在工作线程中
    /// 处理取出的每个目录，可以继续入队新的目录。
    pub fn run<F>(&self, queue: &WorkQueue, signals: &WorkSignals, job: F) -> ScanResult<()>
    where
        F: Fn(WorkItem) + Sync,
    {
        let threads = self.config.threads;
        debug!("Starting {} workers, {} queued", threads, queue.len());

        thread::scope(|scope| {
            let job = &job;
            let mut spawned = 0;
            for index in 0..threads {
                let spawn = thread::Builder::new()
                    .name(format!("scan-worker-{}", index))
                    .stack_size(WORKER_STACK_SIZE)
                    .spawn_scoped(scope, move || worker_loop(queue, signals, job));
                if let Err(source) = spawn {
                    // 让已启动的线程退出后再返回错误
                    signals.finish();
                    for _ in 0..spawned {
                        signals.exited.wait();
                    }
                    return Err(ScanError::ThreadSpawn { index, source });
                }
                spawned += 1;
            }

            coordinate(queue, signals);
            Ok(())
        })
    }
}

fn worker_loop<F>(queue: &WorkQueue, signals: &WorkSignals, job: &F)
where
    F: Fn(WorkItem) + Sync,
{
    let _guard = ExitGuard { signals };
    loop {
        signals.fall_asleep();
        signals.work.wait();
        if let Some(item) = queue.extract_after(|| signals.wake_up()) {
            job(item);
        }
        if signals.is_finished() {
            break;
        }
    }
}

fn coordinate(queue: &WorkQueue, signals: &WorkSignals) {
    loop {
        signals.coordinator.wait();
        debug!(
            "Coordinator woken, {} queued, {} overflowed signals pending",
            queue.len(),
            signals.pending_overflow.load(Ordering::SeqCst)
        );
        signals.drain_overflow();
        if queue.is_drained_and(|| signals.all_asleep()) {
            break;
        }
    }

    debug!("Queue drained, stopping {} workers", signals.threads);
    signals.finish();
    for _ in 0..signals.threads {
        signals.exited.wait();
    }
    debug!("All workers stopped");
}
