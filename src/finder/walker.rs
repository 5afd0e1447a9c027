//! 目录遍历
//!
//! 本模块处理单个目录：列出条目、确定类型、过滤、累计统计，
//! 并为每个子目录决定是在当前调用栈上直接处理（内联），
//! 还是放入队列交给其他工作线程。

use std::path::{Path, PathBuf};

use log::debug;

use super::context::ScanContext;
use super::fs::{EntryKind, EntryMetadata, RawEntry};
use super::filter::MatchTarget;
use super::options::RankMetric;
use super::queue::WorkItem;

/// 大于等于 2 TiB 的文件按大小计算块数
const TWO_TIB: u64 = 2 * 1024 * 1024 * 1024 * 1024;

/// 条目占用的 512 字节块数
fn block_count(meta: &EntryMetadata) -> u64 {
    if meta.size < TWO_TIB {
        meta.blocks
    } else {
        meta.size / 512
    }
}

/// 在共享的扫描状态上遍历目录
pub struct TreeWalker<'c, 'a> {
    ctx: &'c ScanContext<'a>,
}

impl<'c, 'a> TreeWalker<'c, 'a> {
    pub fn new(ctx: &'c ScanContext<'a>) -> Self {
        Self { ctx }
    }

    /// 处理一个从队列中取出的目录，并把统计并入全局结果
    pub fn run(&self, mut item: WorkItem) {
        self.walk(&mut item);
        self.ctx.fold(&item);
    }

    /// 遍历目录，内联处理的子目录的统计会累加到 `dir` 上
    pub fn walk(&self, dir: &mut WorkItem) {
        let ctx = self.ctx;
        ctx.compliance.check_directory(&dir.path, &mut dir.budget);

        let entries = match ctx.fs.list_entries(&dir.path) {
            Ok(entries) => entries,
            Err(e) => {
                ctx.diagnostics.report(&dir.path, e);
                return;
            }
        };

        let mut listed = 0u64;
        let mut accepted = 0u64;
        for entry in entries.iter().filter(|e| !e.is_dot()) {
            listed += 1;
            if self.visit(dir, entry) {
                accepted += 1;
            }
        }

        self.finish_directory(dir, listed, accepted);
    }

    /// 处理一个条目，返回它是否被接受
    fn visit(&self, dir: &mut WorkItem, entry: &RawEntry) -> bool {
        let ctx = self.ctx;
        let path = dir.path.join(&entry.name);

        let untyped = entry.kind == EntryKind::Unknown;
        let should_fetch = entry.kind == EntryKind::Directory
            || (untyped && (dir.budget.may_hold_subdirs() || !ctx.types.is_empty()))
            || ctx.needs_metadata;
        let meta = if should_fetch {
            self.fetch(&path, entry.kind)
        } else {
            None
        };
        let kind = meta.map_or(entry.kind, |m| m.kind);

        let mut descend = false;
        if kind == EntryKind::Directory {
            dir.budget.consume();
            if let Some(m) = &meta {
                descend = !(ctx.options.one_file_system && m.device != dir.device);
            }
        }

        let name = entry.name.to_string_lossy();
        if descend {
            if let Some(rule) = ctx.excludes.iter().find(|r| r.matches(&name)) {
                debug!("Skipping dir {} ({})", path.display(), rule.description());
                return false;
            }
        }

        let is_match = match ctx.options.match_target {
            MatchTarget::Name => ctx.matcher.matches(&name),
            MatchTarget::FullPath => ctx.matcher.matches(&path.to_string_lossy()),
        };
        let accepted =
            is_match && ctx.types.accepts(kind) && ctx.predicates.accepts(meta.as_ref());
        if accepted {
            self.accept(dir, &path, meta.as_ref());
        }

        if descend {
            if let Some(m) = meta {
                self.descend(dir, path, &m);
            }
        }
        accepted
    }

    fn fetch(&self, path: &Path, hint: EntryKind) -> Option<EntryMetadata> {
        match self.ctx.fs.symlink_metadata(path) {
            Ok(meta) => {
                self.ctx.record_fetch(hint == EntryKind::Unknown);
                Some(meta)
            }
            Err(e) => {
                self.ctx.diagnostics.report(path, e);
                None
            }
        }
    }

    /// 接受的条目：计数、累计占用空间、排名或输出
    fn accept(&self, dir: &mut WorkItem, path: &Path, meta: Option<&EntryMetadata>) {
        let ctx = self.ctx;
        dir.file_count += 1;

        if let (Some(ranking), Some(metric)) = (&ctx.ranking, ctx.options.ranking.map(|r| r.metric)) {
            if let Some(key) = meta.and_then(|m| metric.entry_key(m)) {
                ranking.push(key, path);
            }
            return;
        }

        if ctx.options.disk_usage {
            if let Some(m) = meta {
                self.add_disk_usage(dir, m);
            }
        }

        if ctx.options.lists_entries() {
            ctx.sink.emit(path, meta.map_or(0, |m| m.mtime));
        }
    }

    fn add_disk_usage(&self, dir: &mut WorkItem, meta: &EntryMetadata) {
        if meta.size == 0 {
            return;
        }
        // 多个链接的文件只在第一次出现时计入
        let counted = meta.is_dir()
            || meta.nlink <= 1
            || !self.ctx.options.hardlink_dedup
            || self.ctx.dedup.first_sighting(meta.inode, meta.device, false);
        if counted {
            dir.disk_usage += block_count(meta);
        }
    }

    /// 内联处理子目录或放入队列
    fn descend(&self, dir: &mut WorkItem, path: PathBuf, meta: &EntryMetadata) {
        let ctx = self.ctx;
        let depth = dir.depth + 1;
        if ctx.options.max_depth.map_or(false, |max| depth >= max) {
            return;
        }

        let threshold = ctx.inline_threshold;
        let child = WorkItem::new(path, depth, ctx.compliance.budget_for(meta.nlink))
            .with_identity(meta.device, meta.inode)
            .with_mtime(meta.mtime);

        let inline = threshold > 0
            && (dir.budget.within_last(threshold)
                || (ctx.compliance.is_simulating() && dir.inlined < threshold));
        if inline {
            dir.inlined += 1;
            let mut child = child;
            self.walk(&mut child);
            dir.file_count += child.file_count;
            dir.disk_usage += child.disk_usage;
        } else {
            ctx.enqueue(child);
        }
    }

    /// 目录处理完后的排名和空目录输出
    fn finish_directory(&self, dir: &WorkItem, listed: u64, accepted: u64) {
        let ctx = self.ctx;
        if let (Some(ranking), Some(r)) = (&ctx.ranking, ctx.options.ranking) {
            match r.metric {
                RankMetric::MostFiles => {
                    ranking.push(i64::try_from(accepted).unwrap_or(i64::MAX), &dir.path);
                }
                RankMetric::Deepest => {
                    ranking.push(i64::try_from(dir.depth).unwrap_or(i64::MAX), &dir.path);
                }
                _ => {}
            }
        }

        if ctx.options.empty_dirs && listed == 0 {
            let in_window = ctx
                .predicates
                .time
                .map_or(true, |t| t.accepts_time(dir.mtime));
            if in_window {
                ctx.sink.emit(&dir.path, dir.mtime);
            }
        }
    }
}
