//! 同步报告 - 单次运行的汇总、逐文件输出行与退出码

use crate::core::comparator::SyncDecision;
use crate::core::engine::{FileOutcome, FileStage};
use crate::core::scanner::ScanIssue;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt::Write as _;

pub const EXIT_OK: i32 = 0;
pub const EXIT_FATAL: i32 = 1;
pub const EXIT_FILE_FAILURES: i32 = 2;
pub const EXIT_CANCELLED: i32 = 130;

/// 失败记录
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FailureRecord {
    pub relative_path: String,
    pub message: String,
}

/// 单次同步运行的汇总，运行结束输出后即丢弃
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRunSummary {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub dry_run: bool,
    pub scanned: usize,
    pub uploaded: usize,
    pub new_files: usize,
    pub modified_files: usize,
    pub skipped: usize,
    pub failed: usize,
    pub scan_errors: usize,
    pub bytes_transferred: u64,
    /// 取消后未开始处理的文件数
    pub not_started: usize,
    pub cancelled: bool,
    pub failures: Vec<FailureRecord>,
    pub duration_ms: u64,
}

impl SyncRunSummary {
    pub fn new(run_id: impl Into<String>, dry_run: bool) -> Self {
        Self {
            run_id: run_id.into(),
            started_at: Utc::now(),
            dry_run,
            scanned: 0,
            uploaded: 0,
            new_files: 0,
            modified_files: 0,
            skipped: 0,
            failed: 0,
            scan_errors: 0,
            bytes_transferred: 0,
            not_started: 0,
            cancelled: false,
            failures: Vec::new(),
            duration_ms: 0,
        }
    }

    /// 合并一个文件的最终结果
    pub fn record(&mut self, outcome: &FileOutcome) {
        if outcome.stage == FileStage::Failed {
            self.failed += 1;
            self.failures.push(FailureRecord {
                relative_path: outcome.relative_path.clone(),
                message: outcome
                    .error
                    .clone()
                    .unwrap_or_else(|| "unknown error".to_string()),
            });
            return;
        }

        match outcome.decision {
            Some(SyncDecision::Unchanged) | None => self.skipped += 1,
            Some(SyncDecision::New) => {
                self.uploaded += 1;
                self.new_files += 1;
            }
            Some(SyncDecision::Modified) => {
                self.uploaded += 1;
                self.modified_files += 1;
            }
        }
        self.bytes_transferred += outcome.bytes_transferred;
    }

    /// 记录扫描阶段的局部错误
    pub fn record_scan_issue(&mut self, issue: &ScanIssue) {
        self.scan_errors += 1;
        self.failures.push(FailureRecord {
            relative_path: issue.path.clone(),
            message: format!("scan error: {}", issue.message),
        });
    }

    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }

    /// 进程退出码：取消 130；有失败 2（`allow_failures` 时为 0）；否则 0
    pub fn exit_code(&self, allow_failures: bool) -> i32 {
        if self.cancelled {
            EXIT_CANCELLED
        } else if self.has_failures() && !allow_failures {
            EXIT_FILE_FAILURES
        } else {
            EXIT_OK
        }
    }

    /// 渲染最终汇总块
    pub fn render(&self, public_url: Option<&str>) -> String {
        let mut out = String::new();
        let rule = "=".repeat(50);
        let title = if self.cancelled {
            "同步已取消（部分完成）"
        } else if self.dry_run {
            "试运行完成（未上传任何文件）"
        } else {
            "同步完成"
        };
        let upload_label = if self.dry_run { "待上传" } else { "已上传" };

        let _ = writeln!(out, "{}", rule);
        let _ = writeln!(out, "{}", title);
        let _ = writeln!(
            out,
            "  {}: {} 个文件 (新增 {}, 更新 {})",
            upload_label, self.uploaded, self.new_files, self.modified_files
        );
        let _ = writeln!(out, "  传输总量: {}", format_bytes(self.bytes_transferred));
        let _ = writeln!(out, "  未变化跳过: {} 个文件", self.skipped);
        let _ = writeln!(out, "  失败: {} 个", self.failures.len());
        for failure in &self.failures {
            let _ = writeln!(out, "    - {}: {}", failure.relative_path, failure.message);
        }
        if self.not_started > 0 {
            let _ = writeln!(out, "  未处理: {} 个文件", self.not_started);
        }
        let _ = writeln!(
            out,
            "  扫描: {} 个文件, 耗时 {:.1}s",
            self.scanned,
            self.duration_ms as f64 / 1000.0
        );
        if let Some(url) = public_url {
            let _ = writeln!(out, "  公共地址: {}", url);
        }
        let _ = write!(out, "{}", rule);
        out
    }
}

/// 逐文件输出行；未变化的文件不输出
pub fn file_line(outcome: &FileOutcome, dry_run: bool, public_url: Option<String>) -> Option<String> {
    if outcome.stage == FileStage::Failed {
        return Some(format!(
            "  ✗ {}: {}",
            outcome.relative_path,
            outcome.error.as_deref().unwrap_or("unknown error")
        ));
    }

    let tag = match outcome.decision? {
        SyncDecision::Unchanged => return None,
        SyncDecision::New => "新增",
        SyncDecision::Modified => "更新",
    };
    let marker = if dry_run { "~" } else { "✓" };
    let target = public_url.unwrap_or_else(|| outcome.key.clone());

    Some(format!(
        "  {} [{}] {} ({}) -> {}",
        marker,
        tag,
        outcome.relative_path,
        format_bytes(outcome.size_bytes),
        target
    ))
}

/// 格式化字节数（1024 进制）
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 3] = ["KB", "MB", "GB"];

    if bytes < 1024 {
        return format!("{} Bytes", bytes);
    }

    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.2} {}", value, UNITS[unit])
}
