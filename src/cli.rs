//! treescan 的命令行接口
//!
//! 本模块提供了命令行参数的定义、验证，以及把参数转换为扫描选项、
//! 匹配器和过滤条件的功能。

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::UNIX_EPOCH;

use clap::Parser;

use crate::errors::{ScanError, ScanResult};
use crate::finder::filter::{
    ExcludeRule, FilterFactory, IdClause, MatchPredicate, MatchTarget, OwnerFilter, SizeFilter,
    TimeField, TimeWindow, TypeMask, ValuePredicates,
};
use crate::finder::options::{RankMetric, Ranking, ScanOptions};
use crate::finder::queue::QueuePolicy;
use crate::finder::sink::OutputFormat;

const SECONDS_PER_MINUTE: i64 = 60;
const SECONDS_PER_DAY: i64 = 24 * 60 * SECONDS_PER_MINUTE;

/// 并行目录树扫描工具
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// 起始目录（默认：当前目录）。第一个参数不是目录且没有指定
    /// 其他模式时，作为名称子串模式使用
    pub paths: Vec<String>,

    /// 工作线程数（默认：CPU 数，最多 8）
    #[arg(short = 't', long, value_name = "COUNT")]
    pub threads: Option<usize>,

    /// 名称包含子串（不区分 ASCII 大小写），以 ! 开头表示取反
    #[arg(short = 'N', long = "contains", value_name = "[!]TEXT")]
    pub substring: Option<String>,

    /// 名称匹配正则表达式，以 ! 开头表示取反
    #[arg(short = 'n', long, value_name = "[!]REGEX", conflicts_with = "iregex")]
    pub regex: Option<String>,

    /// 不区分大小写的正则表达式匹配
    #[arg(short = 'i', long, value_name = "[!]REGEX")]
    pub iregex: Option<String>,

    /// 按文件名通配符匹配（可多次指定）
    #[arg(long, value_name = "GLOB", conflicts_with = "iname")]
    pub name: Vec<String>,

    /// 不区分大小写的通配符匹配（可多次指定）
    #[arg(long, value_name = "GLOB")]
    pub iname: Vec<String>,

    /// 对完整路径而不是文件名进行匹配
    #[arg(short = 'a', long)]
    pub full_path: bool,

    /// 不进入名称匹配正则表达式的目录（可多次指定）
    #[arg(short = 'e', long, value_name = "REGEX", conflicts_with = "exclude")]
    pub exclude_regex: Vec<String>,

    /// 不进入指定名称的目录（可多次指定）
    #[arg(short = 'E', long, value_name = "DIR")]
    pub exclude: Vec<String>,

    /// 不进入 .snapshot 目录
    #[arg(short = 'Z', long)]
    pub skip_snapshots: bool,

    /// 只输出普通文件
    #[arg(short = 'f', long)]
    pub files: bool,

    /// 只输出目录
    #[arg(short = 'd', long)]
    pub dirs: bool,

    /// 只输出符号链接
    #[arg(short = 'l', long)]
    pub symlinks: bool,

    /// 只输出块设备
    #[arg(short = 'b', long)]
    pub block_devices: bool,

    /// 只输出字符设备
    #[arg(short = 'c', long)]
    pub char_devices: bool,

    /// 只输出命名管道
    #[arg(short = 'p', long)]
    pub fifos: bool,

    /// 只输出套接字
    #[arg(short = 'k', long)]
    pub sockets: bool,

    /// 文件类型列表，例如 "f,d"（f d l b c p s）
    #[arg(long = "type", value_name = "TYPES")]
    pub types: Option<String>,

    /// 最大搜索深度
    #[arg(short = 'm', long, value_name = "NUM")]
    pub max_depth: Option<usize>,

    /// 不跨越文件系统
    #[arg(short = 'x', long)]
    pub one_file_system: bool,

    /// 只输出空目录
    #[arg(short = 'z', long)]
    pub empty_dirs: bool,

    /// 在路径前输出修改时间
    #[arg(short = 'j', long, conflicts_with = "null")]
    pub timestamps: bool,

    /// 以 NUL 字符而不是换行结束每个路径
    #[arg(short = '0', long)]
    pub null: bool,

    /// 只输出匹配条目的数量
    #[arg(short = 'w', long)]
    pub count: bool,

    /// 输出匹配条目的磁盘占用总和
    #[arg(short = 'H', long)]
    pub disk_usage: bool,

    /// 每处理 COUNT 个条目输出一行进度
    #[arg(short = 'v', long, value_name = "COUNT")]
    pub progress: Option<u64>,

    /// 属于指定 uid（可多次指定）
    #[arg(short = 'u', long, value_name = "UID", conflicts_with = "not_uid")]
    pub uid: Vec<u32>,

    /// 不属于指定 uid（可多次指定）
    #[arg(short = 'U', long, value_name = "UID")]
    pub not_uid: Vec<u32>,

    /// 属于指定 gid（可多次指定）
    #[arg(short = 'g', long, value_name = "GID", conflicts_with = "not_gid")]
    pub gid: Vec<u32>,

    /// 不属于指定 gid（可多次指定）
    #[arg(short = 'G', long, value_name = "GID")]
    pub not_gid: Vec<u32>,

    /// 修改时间早于 DAYS 天前
    #[arg(short = 'o', long, value_name = "DAYS", conflicts_with_all = ["older_minutes", "older_than_file"])]
    pub older_days: Option<i64>,

    /// 修改时间早于 MINUTES 分钟前
    #[arg(short = 'O', long, value_name = "MINUTES", conflicts_with = "older_than_file")]
    pub older_minutes: Option<i64>,

    /// 修改时间早于指定文件
    #[arg(short = 'P', long, value_name = "FILE")]
    pub older_than_file: Option<PathBuf>,

    /// 修改时间晚于 DAYS 天前
    #[arg(short = 'y', long, value_name = "DAYS", conflicts_with_all = ["younger_minutes", "younger_than_file"])]
    pub younger_days: Option<i64>,

    /// 修改时间晚于 MINUTES 分钟前
    #[arg(short = 'Y', long, value_name = "MINUTES", conflicts_with = "younger_than_file")]
    pub younger_minutes: Option<i64>,

    /// 修改时间晚于指定文件
    #[arg(short = 'W', long, value_name = "FILE")]
    pub younger_than_file: Option<PathBuf>,

    /// 时间条件使用访问时间而不是修改时间
    #[arg(long)]
    pub atime: bool,

    /// 大小条件：N、+N、-N 或 +N:-M，可带 k/m/g/t 后缀
    #[arg(short = 's', long, value_name = "SIZE", allow_hyphen_values = true)]
    pub size: Option<String>,

    /// 包含条目最多的 COUNT 个目录
    #[arg(short = 'D', long, value_name = "COUNT")]
    pub most_files: Option<usize>,

    /// 最大的 COUNT 个条目
    #[arg(short = 'F', long, value_name = "COUNT")]
    pub largest: Option<usize>,

    /// 最近修改的 COUNT 个条目
    #[arg(short = 'M', long, value_name = "COUNT")]
    pub recently_modified: Option<usize>,

    /// 最近访问的 COUNT 个条目
    #[arg(short = 'A', long, value_name = "COUNT")]
    pub recently_accessed: Option<usize>,

    /// 最久未修改的 COUNT 个条目
    #[arg(short = 'L', long, value_name = "COUNT")]
    pub least_recently_modified: Option<usize>,

    /// 最久未访问的 COUNT 个条目
    #[arg(short = 'B', long, value_name = "COUNT")]
    pub least_recently_accessed: Option<usize>,

    /// 离起始目录最远的 COUNT 个目录
    #[arg(short = 'R', long, value_name = "COUNT")]
    pub deepest: Option<usize>,

    /// 每个目录中在当前线程内联处理的子目录数（0 表示不内联）
    #[arg(short = 'I', long, value_name = "COUNT")]
    pub inline: Option<u64>,

    /// 使用 FIFO 队列
    #[arg(short = 'q', long, conflicts_with = "inode_queue")]
    pub fifo_queue: bool,

    /// 使用按 inode 排序的队列
    #[arg(short = 'Q', long)]
    pub inode_queue: bool,

    /// 工作信号量的容量上限
    #[arg(long, value_name = "COUNT", hide = true)]
    pub wake_cap: Option<usize>,

    /// 结束时在标准错误输出统计信息
    #[arg(short = 'S', long)]
    pub stats: bool,

    /// 结束时在标准错误输出耗时
    #[arg(short = 'T', long)]
    pub timer: bool,

    /// 启用调试日志
    #[arg(long)]
    pub debug: bool,
}

impl Cli {
    /// 构建扫描选项
    pub fn build_options(&self) -> ScanResult<ScanOptions> {
        let mut options = ScanOptions::new()
            .with_max_depth(self.max_depth)
            .with_queue_policy(self.queue_policy())
            .with_one_file_system(self.one_file_system)
            .with_match_target(if self.full_path {
                MatchTarget::FullPath
            } else {
                MatchTarget::Name
            })
            .with_output(self.output_format())
            .with_count_only(self.count)
            .with_disk_usage(self.disk_usage)
            .with_empty_dirs(self.empty_dirs)
            .with_ranking(self.ranking()?)
            .with_progress_interval(self.progress);

        if let Some(threads) = self.threads {
            options = options.with_threads(threads);
        }
        if let Some(inline) = self.inline {
            options = options.with_inline_threshold(inline);
        }
        if let Some(cap) = self.wake_cap {
            options = options.with_wake_cap(cap);
        }
        Ok(options)
    }

    /// 验证命令行参数
    pub fn validate(&self) -> ScanResult<()> {
        self.build_options()?.validate()?;
        self.build_types()?;
        self.build_predicates()?;
        self.build_excludes()?;
        self.resolve_targets()?;
        Ok(())
    }

    fn queue_policy(&self) -> QueuePolicy {
        if self.fifo_queue {
            QueuePolicy::Fifo
        } else if self.inode_queue {
            QueuePolicy::InodeOrder
        } else {
            QueuePolicy::Lifo
        }
    }

    fn output_format(&self) -> OutputFormat {
        if self.null {
            OutputFormat::Null
        } else if self.timestamps {
            OutputFormat::Timestamped
        } else {
            OutputFormat::Line
        }
    }

    /// 最多只能指定一种排名
    fn ranking(&self) -> ScanResult<Option<Ranking>> {
        let requested = [
            (RankMetric::MostFiles, self.most_files),
            (RankMetric::Largest, self.largest),
            (RankMetric::MostRecentlyModified, self.recently_modified),
            (RankMetric::MostRecentlyAccessed, self.recently_accessed),
            (RankMetric::LeastRecentlyModified, self.least_recently_modified),
            (RankMetric::LeastRecentlyAccessed, self.least_recently_accessed),
            (RankMetric::Deepest, self.deepest),
        ];
        let mut chosen = requested
            .iter()
            .filter_map(|(metric, count)| count.map(|c| Ranking::new(*metric, c)));
        let first = chosen.next();
        if chosen.next().is_some() {
            return Err(ScanError::InvalidOption(
                "only one ranking can be requested at a time".to_string(),
            ));
        }
        Ok(first)
    }

    /// 构建文件类型掩码
    pub fn build_types(&self) -> ScanResult<TypeMask> {
        let mut mask = match &self.types {
            Some(codes) => TypeMask::parse(codes)?,
            None => TypeMask::empty(),
        };
        let flags = [
            (self.files, TypeMask::FILE),
            (self.dirs, TypeMask::DIRECTORY),
            (self.symlinks, TypeMask::SYMLINK),
            (self.block_devices, TypeMask::BLOCK_DEVICE),
            (self.char_devices, TypeMask::CHAR_DEVICE),
            (self.fifos, TypeMask::FIFO),
            (self.sockets, TypeMask::SOCKET),
        ];
        for (set, bit) in flags {
            if set {
                mask = mask.with(bit);
            }
        }
        Ok(mask)
    }

    /// 构建名称匹配器；`positional` 是从位置参数中取出的子串模式
    pub fn build_matcher(&self, positional: Option<&str>) -> ScanResult<Box<dyn MatchPredicate>> {
        let substring = self.substring.as_deref().or(positional);
        let regex = self.regex.as_deref().or(self.iregex.as_deref());
        let (globs, glob_ignore_case) = if self.iname.is_empty() {
            (self.name.as_slice(), false)
        } else {
            (self.iname.as_slice(), true)
        };
        let ignore_case = if regex.is_some() {
            self.iregex.is_some()
        } else {
            glob_ignore_case
        };
        FilterFactory::create_matcher(substring, regex, ignore_case, globs)
    }

    /// 构建时间、属主和大小条件
    pub fn build_predicates(&self) -> ScanResult<ValuePredicates> {
        let now = chrono::Utc::now().timestamp();
        let older = self.instant(now, self.older_days, self.older_minutes, self.older_than_file.as_deref())?;
        let younger = self.instant(
            now,
            self.younger_days,
            self.younger_minutes,
            self.younger_than_file.as_deref(),
        )?;
        let field = if self.atime {
            TimeField::Accessed
        } else {
            TimeField::Modified
        };

        let mut predicates = ValuePredicates::new()
            .with_time(TimeWindow::new(field, older, younger)?)
            .with_owner(self.owner_filter());
        if let Some(spec) = &self.size {
            predicates = predicates.with_size(SizeFilter::from_str(spec)?);
        }
        Ok(predicates)
    }

    fn instant(
        &self,
        now: i64,
        days: Option<i64>,
        minutes: Option<i64>,
        file: Option<&Path>,
    ) -> ScanResult<Option<i64>> {
        if let Some(days) = days {
            return Ok(Some(now - days.saturating_mul(SECONDS_PER_DAY)));
        }
        if let Some(minutes) = minutes {
            return Ok(Some(now - minutes.saturating_mul(SECONDS_PER_MINUTE)));
        }
        match file {
            Some(path) => modification_time(path).map(Some),
            None => Ok(None),
        }
    }

    fn owner_filter(&self) -> OwnerFilter {
        let clause = |positive: &[u32], negative: &[u32]| {
            if !positive.is_empty() {
                Some(IdClause {
                    ids: positive.to_vec(),
                    negated: false,
                })
            } else if !negative.is_empty() {
                Some(IdClause {
                    ids: negative.to_vec(),
                    negated: true,
                })
            } else {
                None
            }
        };
        OwnerFilter {
            uid: clause(&self.uid, &self.not_uid),
            gid: clause(&self.gid, &self.not_gid),
        }
    }

    /// 构建目录排除规则
    pub fn build_excludes(&self) -> ScanResult<Vec<ExcludeRule>> {
        let mut rules = self
            .exclude_regex
            .iter()
            .map(|p| ExcludeRule::pattern(p))
            .collect::<ScanResult<Vec<_>>>()?;
        rules.extend(self.exclude.iter().map(ExcludeRule::exact));
        if self.skip_snapshots {
            rules.push(ExcludeRule::snapshot());
        }
        Ok(rules)
    }

    /// 已经通过选项给出了名称模式
    fn has_pattern_option(&self) -> bool {
        self.substring.is_some()
            || self.regex.is_some()
            || self.iregex.is_some()
            || !self.name.is_empty()
            || !self.iname.is_empty()
    }

    /// 从位置参数中分出子串模式和起始目录
    ///
    /// 第一个参数不是目录、且没有通过选项给出模式时，它就是子串模式；
    /// 含有 `/` 的参数不能作为模式。没有起始目录时使用当前目录。
    pub fn resolve_targets(&self) -> ScanResult<(Option<String>, Vec<PathBuf>)> {
        let mut args = self.paths.iter();
        let mut pattern = None;

        if let Some(first) = self.paths.first() {
            if !self.has_pattern_option() && !Path::new(first).is_dir() {
                if first.contains('/') {
                    return Err(ScanError::NotADirectory(PathBuf::from(first)));
                }
                pattern = Some(first.clone());
                args.next();
            }
        }

        let mut roots: Vec<PathBuf> = args.map(PathBuf::from).collect();
        if roots.is_empty() {
            roots.push(PathBuf::from("."));
        }
        Ok((pattern, roots))
    }
}

fn modification_time(path: &Path) -> ScanResult<i64> {
    let modified = std::fs::metadata(path)
        .and_then(|m| m.modified())
        .map_err(|e| ScanError::from_io(e, path))?;
    let secs = match modified.duration_since(UNIX_EPOCH) {
        Ok(d) => i64::try_from(d.as_secs()).unwrap_or(i64::MAX),
        Err(e) => -i64::try_from(e.duration().as_secs()).unwrap_or(i64::MAX),
    };
    Ok(secs)
}
