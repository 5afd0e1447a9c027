//! 单次扫描的共享状态
//!
//! `ScanContext` 在扫描开始时构建一次，由协调者和所有工作线程借用。
//! 队列、排名堆、硬链接表、各个累加器和诊断输出各自持有独立的锁，
//! 任何代码路径都不会在持有一把锁时再去获取另一把。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Instant;

use super::compliance::ComplianceMonitor;
use super::dedup::DedupTable;
use super::diagnostics::Diagnostics;
use super::filter::{ExcludeRule, MatchPredicate, TypeMask, ValuePredicates};
use super::fs::FileSystem;
use super::heap::TopK;
use super::options::ScanOptions;
use super::queue::{WorkItem, WorkQueue};
use super::report::{format_progress, ScanStats};
use super::sink::ResultSink;
use super::thread_pool::WorkSignals;

/// 进度输出的节流状态
#[derive(Debug)]
struct ProgressMeter {
    interval: u64,
    state: Mutex<(u64, Instant)>,
}

impl ProgressMeter {
    fn new(interval: u64) -> Self {
        Self {
            interval,
            state: Mutex::new((0, Instant::now())),
        }
    }

    /// 累计数量超过上次输出值加间隔时，返回要输出的进度行
    fn tick(&self, total: u64) -> Option<String> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let (last, since) = *state;
        if total <= last.saturating_add(self.interval) {
            return None;
        }
        let secs = since.elapsed().as_secs();
        let rate = (secs > 0).then(|| (total - last) / secs);
        *state = (total, Instant::now());
        Some(format_progress(total, rate))
    }
}

/// 一次扫描中所有线程共享的状态
pub struct ScanContext<'a> {
    pub options: &'a ScanOptions,
    pub fs: &'a dyn FileSystem,
    pub sink: &'a dyn ResultSink,
    pub diagnostics: &'a Diagnostics,
    pub matcher: &'a dyn MatchPredicate,
    pub types: TypeMask,
    pub predicates: &'a ValuePredicates,
    pub excludes: &'a [ExcludeRule],

    pub queue: WorkQueue,
    pub signals: WorkSignals,
    pub compliance: ComplianceMonitor,
    pub dedup: DedupTable,
    /// 排名模式下的候选堆
    pub ranking: Option<TopK>,

    /// 每个条目都需要元数据
    pub needs_metadata: bool,
    pub inline_threshold: u64,

    matched: AtomicU64,
    disk_usage: AtomicU64,
    expected_fetches: AtomicU64,
    unexpected_fetches: AtomicU64,
    progress: Option<ProgressMeter>,
}

impl<'a> ScanContext<'a> {
    pub fn new(
        options: &'a ScanOptions,
        fs: &'a dyn FileSystem,
        sink: &'a dyn ResultSink,
        diagnostics: &'a Diagnostics,
        selection: Selection<'a>,
    ) -> Self {
        let ranking = options
            .ranking
            .map(|r| TopK::new(r.count, r.metric.order()));
        Self {
            options,
            fs,
            sink,
            diagnostics,
            matcher: selection.matcher,
            types: selection.types,
            predicates: selection.predicates,
            excludes: selection.excludes,
            queue: WorkQueue::new(options.queue_policy),
            signals: WorkSignals::new(&options.pool_config()),
            compliance: ComplianceMonitor::new(),
            dedup: DedupTable::new(),
            ranking,
            needs_metadata: options.needs_metadata(selection.predicates.is_active()),
            inline_threshold: options.effective_inline_threshold(),
            matched: AtomicU64::new(0),
            disk_usage: AtomicU64::new(0),
            expected_fetches: AtomicU64::new(0),
            unexpected_fetches: AtomicU64::new(0),
            progress: options.progress_interval.map(ProgressMeter::new),
        }
    }

    /// 放入队列并唤醒一个工作线程
    pub fn enqueue(&self, item: WorkItem) {
        self.queue.insert(item);
        self.signals.notify_work();
    }

    /// 把一个已处理完的队列项的统计并入全局累加器
    pub fn fold(&self, item: &WorkItem) {
        let total = self.matched.fetch_add(item.file_count, Ordering::SeqCst) + item.file_count;
        self.disk_usage.fetch_add(item.disk_usage, Ordering::SeqCst);

        // 先释放进度锁再写诊断流
        let line = self.progress.as_ref().and_then(|p| p.tick(total));
        if let Some(line) = line {
            self.diagnostics.note(line);
        }
    }

    /// 记录一次元数据获取；`unexpected` 表示列表没有给出条目类型
    pub fn record_fetch(&self, unexpected: bool) {
        if unexpected {
            self.unexpected_fetches.fetch_add(1, Ordering::Relaxed);
        } else {
            self.expected_fetches.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn matched(&self) -> u64 {
        self.matched.load(Ordering::SeqCst)
    }

    /// 512 字节块数
    pub fn disk_usage(&self) -> u64 {
        self.disk_usage.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> ScanStats {
        ScanStats {
            threads: self.options.threads,
            inline_threshold: self.inline_threshold,
            expected_fetches: self.expected_fetches.load(Ordering::Relaxed),
            unexpected_fetches: self.unexpected_fetches.load(Ordering::Relaxed),
            queue_policy: self.queue.policy(),
            enqueued: self.queue.enqueued(),
            bypassed: self.queue.bypassed(),
            overflowed_signals: self.signals.overflowed(),
            diagnostics: self.diagnostics.count(),
            untrusted_link_counts: self.compliance.is_simulating(),
        }
    }
}

/// 决定哪些条目被接受的各项条件
#[derive(Clone, Copy)]
pub struct Selection<'a> {
    pub matcher: &'a dyn MatchPredicate,
    pub types: TypeMask,
    pub predicates: &'a ValuePredicates,
    pub excludes: &'a [ExcludeRule],
}
