//! 诊断输出
//!
//! 遍历过程中的单个条目错误（无法列出目录、无法获取元数据）不会中断扫描，
//! 而是以 `程序名: 路径: 原因` 的形式逐行输出。所有线程共享同一把锁，
//! 保证每一行完整输出，不会与其他线程的输出交错。

use std::fmt::Display;
use std::io::{self, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

/// 诊断信息的去向
#[derive(Debug)]
enum Target {
    Stderr,
    Captured(Vec<String>),
}

/// 线程安全的诊断输出
#[derive(Debug)]
pub struct Diagnostics {
    program: String,
    target: Mutex<Target>,
    emitted: AtomicU64,
}

impl Diagnostics {
    /// 输出到标准错误
    pub fn stderr(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            target: Mutex::new(Target::Stderr),
            emitted: AtomicU64::new(0),
        }
    }

    /// 保存在内存中，供测试检查
    pub fn captured(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            target: Mutex::new(Target::Captured(Vec::new())),
            emitted: AtomicU64::new(0),
        }
    }

    /// 报告某个路径上的错误
    pub fn report(&self, path: &Path, cause: impl Display) {
        self.emitted.fetch_add(1, Ordering::Relaxed);
        let cause = cause.to_string();
        let line = format!("{}: {}: {}", self.program, path.display(), strip_os_code(&cause));
        self.write_line(line);
    }

    /// 输出一行普通信息（进度等），不计入诊断数量
    pub fn note(&self, message: impl Display) {
        self.write_line(message.to_string());
    }

    fn write_line(&self, line: String) {
        let mut target = self.target.lock().unwrap_or_else(PoisonError::into_inner);
        match &mut *target {
            Target::Stderr => {
                let mut err = io::stderr().lock();
                // 标准错误已关闭时没有别的地方可以报告
                let _ = writeln!(err, "{}", line);
            }
            Target::Captured(lines) => lines.push(line),
        }
    }

    /// 已报告的错误数量
    pub fn count(&self) -> u64 {
        self.emitted.load(Ordering::Relaxed)
    }

    /// 已捕获的所有行（输出到标准错误时为空）
    pub fn lines(&self) -> Vec<String> {
        match &*self.target.lock().unwrap_or_else(PoisonError::into_inner) {
            Target::Stderr => Vec::new(),
            Target::Captured(lines) => lines.clone(),
        }
    }
}

/// `Permission denied (os error 13)` 只保留 `Permission denied`
fn strip_os_code(message: &str) -> &str {
    match message.rfind(" (os error ") {
        Some(at) if message.ends_with(')') => &message[..at],
        _ => message,
    }
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self::stderr(env!("CARGO_PKG_NAME"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_report_format() {
        let diag = Diagnostics::captured("treescan");
        diag.report(
            Path::new("/srv/locked"),
            io::Error::new(io::ErrorKind::PermissionDenied, "Permission denied"),
        );
        assert_eq!(diag.lines(), vec!["treescan: /srv/locked: Permission denied"]);
        assert_eq!(diag.count(), 1);
    }

    #[cfg(unix)]
    #[test]
    fn test_os_error_code_is_dropped() {
        let diag = Diagnostics::captured("treescan");
        diag.report(Path::new("/srv/locked"), io::Error::from_raw_os_error(13));
        diag.report(Path::new("/srv/gone"), io::Error::from_raw_os_error(2));
        assert_eq!(
            diag.lines(),
            vec![
                "treescan: /srv/locked: Permission denied",
                "treescan: /srv/gone: No such file or directory",
            ]
        );
        assert_eq!(strip_os_code("odd (os error 5) text"), "odd (os error 5) text");
    }

    #[test]
    fn test_notes_are_not_counted() {
        let diag = Diagnostics::captured("treescan");
        diag.note("About 10 files processed");
        assert_eq!(diag.count(), 0);
        assert_eq!(diag.lines().len(), 1);
    }

    #[test]
    fn test_concurrent_reports_stay_whole() {
        let diag = Diagnostics::captured("p");
        thread::scope(|s| {
            for t in 0..4 {
                let diag = &diag;
                s.spawn(move || {
                    for i in 0..50 {
                        diag.report(Path::new(&format!("/t{t}/f{i}")), "boom");
                    }
                });
            }
        });
        let lines = diag.lines();
        assert_eq!(lines.len(), 200);
        assert!(lines.iter().all(|l| l.starts_with("p: /t") && l.ends_with(": boom")));
        assert_eq!(diag.count(), 200);
    }
}
