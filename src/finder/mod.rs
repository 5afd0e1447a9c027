//! 目录树扫描模块
//!
//! 这个模块提供并行的目录树遍历：固定数量的工作线程从共享队列中
//! 取目录处理，小的子树在当前线程内联处理，其余的交给空闲线程。
//! 结果可以逐条输出，也可以汇总为数量、磁盘占用或排名。

pub mod compliance;
pub mod context;
pub mod dedup;
pub mod diagnostics;
pub mod filter;
pub mod fs;
pub mod heap;
pub mod options;
pub mod queue;
pub mod report;
pub mod semaphore;
pub mod sink;
pub mod thread_pool;
pub mod walker;

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{debug, info};

use crate::errors::{ScanError, ScanResult};

pub use self::diagnostics::Diagnostics;
pub use self::filter::{ExcludeRule, FilterFactory, MatchPredicate, TypeMask, ValuePredicates};
pub use self::fs::{FileSystem, MemoryFileSystem, OsFileSystem};
pub use self::heap::Ranked;
pub use self::options::{RankMetric, Ranking, ScanOptions};
pub use self::report::ScanStats;
pub use self::sink::{CollectingSink, OutputFormat, ResultSink, WriterSink};
pub use self::thread_pool::{ThreadPoolConfig, WorkerPool};

use self::context::{ScanContext, Selection};
use self::filter::MatchAll;
use self::queue::WorkItem;
use self::walker::TreeWalker;

/// 一次扫描的汇总结果
#[derive(Debug, Clone, Default)]
pub struct ScanReport {
    /// 被接受的条目数
    pub matched: u64,
    /// 磁盘占用，单位为 512 字节块
    pub disk_usage_blocks: u64,
    /// 排名结果，最好的在前
    pub ranking: Vec<Ranked>,
    pub stats: ScanStats,
    /// 实际遍历的起始目录
    pub roots: Vec<PathBuf>,
}

/// 目录树扫描器
///
/// 默认扫描真实文件系统，结果写到标准输出，诊断写到标准错误。
pub struct Finder {
    options: ScanOptions,
    filesystem: Box<dyn FileSystem>,
    sink: Arc<dyn ResultSink>,
    diagnostics: Arc<Diagnostics>,
    matcher: Box<dyn MatchPredicate>,
    types: TypeMask,
    predicates: ValuePredicates,
    excludes: Vec<ExcludeRule>,
}

impl Finder {
    /// 创建新的扫描器实例
    pub fn new(options: ScanOptions) -> Self {
        let sink = Arc::new(WriterSink::new(io::stdout(), options.output));
        Self {
            options,
            filesystem: Box::new(OsFileSystem::new()),
            sink,
            diagnostics: Arc::new(Diagnostics::default()),
            matcher: Box::new(MatchAll),
            types: TypeMask::empty(),
            predicates: ValuePredicates::new(),
            excludes: Vec::new(),
        }
    }

    pub fn options(&self) -> &ScanOptions {
        &self.options
    }

    /// 替换文件系统实现
    pub fn with_filesystem<F>(mut self, filesystem: F) -> Self
    where
        F: FileSystem + 'static,
    {
        self.filesystem = Box::new(filesystem);
        self
    }

    /// 设置结果输出
    pub fn with_sink(mut self, sink: Arc<dyn ResultSink>) -> Self {
        self.sink = sink;
        self
    }

    /// 设置诊断输出
    pub fn with_diagnostics(mut self, diagnostics: Arc<Diagnostics>) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    /// 设置名称匹配器
    pub fn with_matcher(mut self, matcher: Box<dyn MatchPredicate>) -> Self {
        self.matcher = matcher;
        self
    }

    /// 设置文件类型掩码，空掩码接受所有类型
    pub fn with_types(mut self, types: TypeMask) -> Self {
        self.types = types;
        self
    }

    /// 设置时间、属主和大小条件
    pub fn with_predicates(mut self, predicates: ValuePredicates) -> Self {
        self.predicates = predicates;
        self
    }

    /// 设置不进入的目录
    pub fn with_excludes(mut self, excludes: Vec<ExcludeRule>) -> Self {
        self.excludes = excludes;
        self
    }

    /// 扫描所有起始目录
    ///
    /// 无效的起始目录会输出诊断并被跳过；一个有效目录都没有时返回
    /// [`ScanError::NoValidRoots`]。起始目录本身不会被输出或计数。
    pub fn run(&self, roots: &[PathBuf]) -> ScanResult<ScanReport> {
        self.options.validate()?;

        let selection = Selection {
            matcher: self.matcher.as_ref(),
            types: self.types,
            predicates: &self.predicates,
            excludes: &self.excludes,
        };
        let mut ctx = ScanContext::new(
            &self.options,
            self.filesystem.as_ref(),
            self.sink.as_ref(),
            &self.diagnostics,
            selection,
        );

        let roots = self.seed(&ctx, roots);
        if roots.is_empty() {
            return Err(ScanError::NoValidRoots);
        }
        info!(
            "Scanning {} root(s) with {} threads, {} queue",
            roots.len(),
            self.options.threads,
            self.options.queue_policy
        );

        let pool = WorkerPool::new(self.options.pool_config());
        pool.run(&ctx.queue, &ctx.signals, |item| TreeWalker::new(&ctx).run(item))?;

        self.sink
            .finish()
            .map_err(|e| ScanError::from_io(e, "<output>"))?;

        let ranking = ctx
            .ranking
            .take()
            .map(|heap| heap.into_ranked())
            .unwrap_or_default();
        Ok(ScanReport {
            matched: ctx.matched(),
            disk_usage_blocks: ctx.disk_usage(),
            ranking,
            stats: ctx.stats(),
            roots,
        })
    }

    /// 检查起始目录并放入队列，返回有效的起始目录
    fn seed(&self, ctx: &ScanContext<'_>, roots: &[PathBuf]) -> Vec<PathBuf> {
        let mut valid = Vec::with_capacity(roots.len());
        for root in roots {
            let root = trim_trailing_slashes(root);
            let meta = match self.filesystem.metadata(&root) {
                Ok(meta) => meta,
                Err(e) => {
                    self.diagnostics.report(&root, e);
                    continue;
                }
            };
            if !meta.is_dir() {
                self.diagnostics.report(&root, "Not a directory");
                continue;
            }

            let budget = ctx.compliance.check_root(&root, meta.nlink);
            debug!("Root {} queued with {:?}", root.display(), budget);
            ctx.enqueue(
                WorkItem::new(root.clone(), 0, budget)
                    .with_identity(meta.device, meta.inode)
                    .with_mtime(meta.mtime),
            );
            valid.push(root);
        }
        valid
    }
}

/// `dir///` 变为 `dir`，`/` 保持不变
fn trim_trailing_slashes(path: &Path) -> PathBuf {
    let raw = path.to_string_lossy();
    match raw.trim_end_matches('/') {
        "" if raw.starts_with('/') => PathBuf::from("/"),
        trimmed if trimmed.len() < raw.len() => PathBuf::from(trimmed),
        _ => path.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::finder::filter::SizeFilter;
    use crate::finder::queue::QueuePolicy;
    use std::fs::{self, File};
    use std::io::Write;
    use tempfile::tempdir;

    fn memory_tree() -> MemoryFileSystem {
        let mut fs = MemoryFileSystem::new();
        fs.file("/root/a/x.txt", 0)
            .file("/root/b/y.txt", 100)
            .file("/root/b/z.txt", 2000);
        fs
    }

    fn scan(options: ScanOptions, fs: MemoryFileSystem) -> (ScanReport, Arc<CollectingSink>) {
        let sink = Arc::new(CollectingSink::new());
        let report = Finder::new(options)
            .with_filesystem(fs)
            .with_sink(sink.clone())
            .with_diagnostics(Arc::new(Diagnostics::captured("treescan")))
            .run(&[PathBuf::from("/root")])
            .unwrap();
        (report, sink)
    }

    #[test]
    fn test_finder_basic() -> Result<(), Box<dyn std::error::Error>> {
        let temp_dir = tempdir()?;
        let base_path = temp_dir.path();

        fs::create_dir(base_path.join("dir1"))?;
        fs::create_dir(base_path.join("dir2"))?;
        File::create(base_path.join("dir1/test1.txt"))?.write_all(b"test content")?;
        File::create(base_path.join("dir2/test2.txt"))?.write_all(b"test content")?;

        let sink = Arc::new(CollectingSink::new());
        let matcher = FilterFactory::create_matcher(None, None, false, &["*.txt".to_string()])?;
        let report = Finder::new(ScanOptions::new())
            .with_sink(sink.clone())
            .with_matcher(matcher)
            .run(&[base_path.to_path_buf()])?;

        assert_eq!(report.matched, 2);
        let results = sink.paths();
        assert!(results.iter().any(|p| p.ends_with("test1.txt")));
        assert!(results.iter().any(|p| p.ends_with("test2.txt")));
        Ok(())
    }

    #[test]
    fn test_every_policy_and_thread_count_agrees() {
        for threads in [1, 2, 3, 8] {
            for policy in [QueuePolicy::Lifo, QueuePolicy::Fifo, QueuePolicy::InodeOrder] {
                let options = ScanOptions::new().with_threads(threads).with_queue_policy(policy);
                let (report, sink) = scan(options, memory_tree());
                assert_eq!(report.matched, 5);
                assert_eq!(sink.len(), 5);
            }
        }
    }

    #[test]
    fn test_size_predicate() {
        let predicates = ValuePredicates::new().with_size(SizeFilter::AtLeast(1));
        let sink = Arc::new(CollectingSink::new());
        Finder::new(ScanOptions::new())
            .with_filesystem(memory_tree())
            .with_sink(sink.clone())
            .with_types(TypeMask::FILE)
            .with_predicates(predicates)
            .run(&[PathBuf::from("/root")])
            .unwrap();
        assert_eq!(
            sink.paths(),
            vec![PathBuf::from("/root/b/y.txt"), PathBuf::from("/root/b/z.txt")]
        );
    }

    #[test]
    fn test_invalid_roots_are_skipped() {
        let diagnostics = Arc::new(Diagnostics::captured("treescan"));
        let sink = Arc::new(CollectingSink::new());
        let report = Finder::new(ScanOptions::new())
            .with_filesystem(memory_tree())
            .with_sink(sink.clone())
            .with_diagnostics(diagnostics.clone())
            .run(&[
                PathBuf::from("/missing"),
                PathBuf::from("/root/b/y.txt"),
                PathBuf::from("/root/a/"),
            ])
            .unwrap();
        assert_eq!(report.roots, vec![PathBuf::from("/root/a")]);
        assert_eq!(report.matched, 1);
        assert_eq!(
            diagnostics.lines(),
            vec![
                "treescan: /missing: No such file or directory",
                "treescan: /root/b/y.txt: Not a directory",
            ]
        );

        let err = Finder::new(ScanOptions::new())
            .with_filesystem(memory_tree())
            .with_diagnostics(Arc::new(Diagnostics::captured("treescan")))
            .run(&[PathBuf::from("/missing")])
            .unwrap_err();
        assert!(matches!(err, ScanError::NoValidRoots));
    }

    #[test]
    fn test_invalid_options_are_rejected() {
        let err = Finder::new(ScanOptions::new().with_threads(0))
            .with_filesystem(memory_tree())
            .run(&[PathBuf::from("/root")])
            .unwrap_err();
        assert!(matches!(err, ScanError::InvalidOption(_)));
    }

    #[test]
    fn test_largest_ranking() {
        let options = ScanOptions::new().with_ranking(Some(Ranking::new(RankMetric::Largest, 2)));
        let (report, sink) = scan(options, memory_tree());
        let keys: Vec<i64> = report.ranking.iter().map(|r| r.key).collect();
        assert_eq!(keys, vec![2000, 100]);
        assert!(sink.is_empty());
    }

    #[test]
    fn test_trim_trailing_slashes() {
        assert_eq!(trim_trailing_slashes(Path::new("a/b//")), PathBuf::from("a/b"));
        assert_eq!(trim_trailing_slashes(Path::new("a")), PathBuf::from("a"));
        assert_eq!(trim_trailing_slashes(Path::new("/")), PathBuf::from("/"));
        assert_eq!(trim_trailing_slashes(Path::new("///")), PathBuf::from("/"));
    }
}
