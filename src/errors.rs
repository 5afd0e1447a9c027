use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for operations that can produce ScanError
pub type ScanResult<T> = Result<T, ScanError>;

/// treescan 的错误类型
///
/// 只有配置错误和致命错误会以 `ScanError` 的形式返回；
/// 遍历过程中单个条目的 IO 失败由诊断输出处理，不会中断扫描。
#[derive(Debug, Error)]
pub enum ScanError {
    /// 文件未找到
    #[error("文件未找到: {}", .0.display())]
    FileNotFound(PathBuf),

    /// 权限不足
    #[error("权限不足: {}", .0.display())]
    PermissionDenied(PathBuf),

    /// 起始路径不是目录
    #[error("不是目录: {}", .0.display())]
    NotADirectory(PathBuf),

    /// 文件系统错误（其他IO错误）
    #[error("文件系统错误 {}: {source}", path.display())]
    FilesystemError {
        #[source]
        source: io::Error,
        path: PathBuf,
    },

    /// 没有可以遍历的起始目录
    #[error("没有可遍历的目录")]
    NoValidRoots,

    /// 模式匹配错误
    #[error("模式匹配错误: {message}")]
    PatternError { message: String },

    /// 无效的文件类型
    #[error("无效的文件类型: {0}")]
    InvalidFileType(String),

    /// 无效的大小参数
    #[error("无效的大小参数 '{spec}': {reason}")]
    InvalidSize { spec: String, reason: String },

    /// 无效的选项组合或取值
    #[error("无效的选项: {0}")]
    InvalidOption(String),

    /// 无法创建工作线程
    #[error("无法创建工作线程 #{index}: {source}")]
    ThreadSpawn {
        index: usize,
        #[source]
        source: io::Error,
    },
}

impl ScanError {
    /// 为 IO 错误附加路径信息
    pub fn from_io(err: io::Error, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        match err.kind() {
            io::ErrorKind::NotFound => ScanError::FileNotFound(path),
            io::ErrorKind::PermissionDenied => ScanError::PermissionDenied(path),
            _ => ScanError::FilesystemError { source: err, path },
        }
    }
}

impl From<io::Error> for ScanError {
    fn from(err: io::Error) -> Self {
        ScanError::from_io(err, PathBuf::new())
    }
}
