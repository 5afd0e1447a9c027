//! 并行目录树扫描库
//!
//! 本库提供了高性能的目录树扫描功能，支持：
//! - 固定大小的工作线程池并行遍历
//! - 名称、类型、时间、属主和大小等多种选择条件
//! - 逐条输出、计数、磁盘占用汇总以及按大小、时间、深度排名
//! - 对目录链接数不可信的文件系统自动切换到安全的遍历方式
//!
//! ## 使用场景
//!
//! - 在大型文件服务器上快速查找文件
//! - 统计目录树的文件数量和磁盘占用
//! - 找出最大、最旧或最深的文件和目录
//!
//! # 示例
//!
//! 基本用法：
//! ```no_run
//! use std::path::PathBuf;
//! use std::sync::Arc;
//! use treescan::finder::{CollectingSink, FilterFactory, Finder, ScanOptions};
//!
//! // 创建扫描选项
//! let options = ScanOptions::new()
//!     .with_max_depth(Some(3))  // 最大搜索深度
//!     .with_threads(4);         // 工作线程数
//!
//! // 收集结果而不是输出到标准输出
//! let sink = Arc::new(CollectingSink::new());
//! let matcher = FilterFactory::create_matcher(None, None, false, &["*.rs".to_string()]).unwrap();
//!
//! let report = Finder::new(options)
//!     .with_sink(sink.clone())
//!     .with_matcher(matcher)
//!     .run(&[PathBuf::from(".")])
//!     .unwrap();
//!
//! println!("找到 {} 个文件", report.matched);
//! for path in sink.paths() {
//!     println!("{}", path.display());
//! }
//! ```
//!
//! 更多用法请参考各模块文档。

pub mod cli;
pub mod errors;
pub mod finder;

// Re-export main types for convenience
pub use errors::{ScanError, ScanResult};
pub use finder::{Finder, ScanReport};
