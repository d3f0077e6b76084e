use crate::config::SyncOptions;
use crate::core::comparator::{decide, SyncDecision};
use crate::core::fingerprint::fingerprint_file;
use crate::core::report::SyncRunSummary;
use crate::core::scanner::{FileScanner, LocalFileRecord, ScanConfig, ScanError};
use crate::core::uploader::{remote_key, ObjectUploader};
use crate::storage::RemoteStore;
use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{mpsc, Mutex, Semaphore};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// 同步配置，构造引擎时一次性传入
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// 远程 key 前缀
    pub prefix: String,
    /// 最大并发文件数
    pub max_concurrency: usize,
    /// 最大重试次数
    pub max_retries: u32,
    /// 重试基础延迟（毫秒）
    pub retry_base_delay_ms: u64,
    /// 元数据请求（check / head）超时
    pub request_timeout: Duration,
    /// 上传请求超时
    pub transfer_timeout: Duration,
    pub cache_control: String,
    pub verify_uploads: bool,
    /// 只判定不上传
    pub dry_run: bool,
    /// 扫描配置
    pub scan_config: ScanConfig,
}

impl SyncConfig {
    pub fn from_options(options: &SyncOptions, dry_run: bool) -> Self {
        Self {
            prefix: options.prefix.clone(),
            max_concurrency: options.max_concurrency.max(1),
            max_retries: options.max_retries,
            retry_base_delay_ms: options.retry_base_delay_ms,
            request_timeout: Duration::from_secs(options.request_timeout_secs),
            transfer_timeout: Duration::from_secs(options.io_timeout_secs),
            cache_control: options.cache_control.clone(),
            verify_uploads: options.verify_uploads,
            dry_run,
            scan_config: ScanConfig {
                exclude_patterns: options.exclude_patterns.clone(),
                max_file_size: options.max_file_size,
                include_extensions: options.extensions.clone(),
            },
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::from_options(&SyncOptions::default(), false)
    }
}

/// 单个文件的处理阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStage {
    Scanned,
    Fingerprinted,
    Resolved,
    Decided,
    Uploaded,
    Skipped,
    Recorded,
    Failed,
}

impl fmt::Display for FileStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FileStage::Scanned => "scanned",
            FileStage::Fingerprinted => "fingerprinted",
            FileStage::Resolved => "resolved",
            FileStage::Decided => "decided",
            FileStage::Uploaded => "uploaded",
            FileStage::Skipped => "skipped",
            FileStage::Recorded => "recorded",
            FileStage::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// 单个文件的失败，不会中断整次运行
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct FileError {
    /// 失败前到达的阶段
    pub stage: FileStage,
    pub message: String,
}

impl FileError {
    fn new(stage: FileStage, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
        }
    }
}

/// 中断整次运行的错误
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("remote store preflight failed: {0}")]
    Preflight(String),
    #[error(transparent)]
    Scan(#[from] ScanError),
    #[error("internal error: {0}")]
    Internal(String),
}

/// 单个文件的最终结果
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileOutcome {
    pub relative_path: String,
    pub key: String,
    pub size_bytes: u64,
    pub decision: Option<SyncDecision>,
    pub bytes_transferred: u64,
    pub stage: FileStage,
    pub failed_at: Option<FileStage>,
    pub error: Option<String>,
}

impl FileOutcome {
    fn new(record: &LocalFileRecord, key: String) -> Self {
        Self {
            relative_path: record.relative_path.clone(),
            key,
            size_bytes: record.size_bytes,
            decision: None,
            bytes_transferred: 0,
            stage: FileStage::Scanned,
            failed_at: None,
            error: None,
        }
    }

    fn fail(&mut self, err: FileError) {
        self.failed_at = Some(err.stage);
        self.stage = FileStage::Failed;
        self.error = Some(err.message);
    }
}

/// 运行过程中发出的事件
#[derive(Debug, Clone)]
pub enum SyncEvent {
    Scanned { files: usize, issues: usize },
    File(FileOutcome),
}

/// 同步引擎
pub struct SyncEngine {
    store: Arc<dyn RemoteStore>,
    config: SyncConfig,
    cancelled: Arc<AtomicBool>,
}

impl SyncEngine {
    pub fn new(store: Arc<dyn RemoteStore>, config: SyncConfig) -> Self {
        Self {
            store,
            config,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// 取消标志，可交给信号处理器
    ///
    /// 置位后停止派发新文件，已在处理的文件会执行完；标志不会被 `run` 清除，
    /// 每次独立的同步应使用新的引擎。
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        self.cancelled.clone()
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// 执行一次同步
    ///
    /// 根目录不可用或预检失败时返回 `Err`，此时没有处理任何文件；
    /// 单个文件的失败记录在汇总中。
    pub async fn run(
        &self,
        root: &Path,
        events: Option<mpsc::Sender<SyncEvent>>,
    ) -> Result<SyncRunSummary, SyncError> {
        let run_id = Uuid::new_v4().to_string();
        let start = Instant::now();

        info!(
            "开始同步 [{}]: {} -> {}{}",
            run_id,
            root.display(),
            self.store.name(),
            if self.config.dry_run { " (试运行)" } else { "" }
        );

        // 1. 扫描本地目录
        let scanner = FileScanner::new(self.config.scan_config.clone()).with_cancel(self.cancelled.clone());
        let scan_root = root.to_path_buf();
        let scan = tokio::task::spawn_blocking(move || scanner.scan(&scan_root))
            .await
            .map_err(|e| SyncError::Internal(format!("scan task failed: {}", e)))??;

        // 2. 预检远程存储
        if !self.is_cancelled() {
            self.preflight().await?;
        }

        let mut summary = SyncRunSummary::new(run_id.clone(), self.config.dry_run);
        summary.scanned = scan.files.len();
        for issue in &scan.issues {
            warn!("扫描错误: {}: {}", issue.path, issue.message);
            summary.record_scan_issue(issue);
        }
        let summary = Arc::new(Mutex::new(summary));

        if let Some(tx) = &events {
            let _ = tx
                .send(SyncEvent::Scanned {
                    files: scan.files.len(),
                    issues: scan.issues.len(),
                })
                .await;
        }

        // 3. 逐文件处理，信号量限制并发
        let ctx = Arc::new(WorkerContext {
            store: self.store.clone(),
            uploader: ObjectUploader::new(self.config.cache_control.clone(), self.config.verify_uploads),
            prefix: self.config.prefix.clone(),
            max_retries: self.config.max_retries,
            retry_base_delay_ms: self.config.retry_base_delay_ms,
            request_timeout: self.config.request_timeout,
            transfer_timeout: self.config.transfer_timeout,
            dry_run: self.config.dry_run,
            cancelled: self.cancelled.clone(),
        });
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrency.max(1)));
        let total = scan.files.len();
        let mut handles = Vec::with_capacity(total);

        for record in scan.files {
            if self.is_cancelled() {
                break;
            }

            let permit = match semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };

            // 等待许可期间可能已被取消
            if self.is_cancelled() {
                break;
            }

            let ctx = ctx.clone();
            let summary = summary.clone();
            let events = events.clone();
            let relative_path = record.relative_path.clone();

            let handle = tokio::spawn(async move {
                let outcome = ctx.process(record).await;
                summary.lock().await.record(&outcome);
                if let Some(tx) = events {
                    let _ = tx.send(SyncEvent::File(outcome)).await;
                }
                drop(permit);
            });

            handles.push((relative_path, handle));
        }

        let started = handles.len();

        // 等待所有任务完成
        for (relative_path, handle) in handles {
            if let Err(e) = handle.await {
                error!("文件任务异常退出: {}: {}", relative_path, e);
                let outcome = FileOutcome {
                    key: remote_key(&self.config.prefix, &relative_path),
                    relative_path,
                    size_bytes: 0,
                    decision: None,
                    bytes_transferred: 0,
                    stage: FileStage::Failed,
                    failed_at: None,
                    error: Some(format!("worker task failed: {}", e)),
                };
                summary.lock().await.record(&outcome);
            }
        }

        let mut summary = summary.lock().await.clone();
        summary.not_started = total - started;
        summary.cancelled = self.is_cancelled();
        summary.duration_ms = start.elapsed().as_millis() as u64;

        if summary.cancelled {
            warn!(
                "同步已取消 [{}]: 完成 {} 个, 未处理 {} 个",
                run_id, started, summary.not_started
            );
        } else {
            info!(
                "同步完成 [{}]: 上传 {}, 跳过 {}, 失败 {}, 传输 {} 字节, 耗时 {}ms",
                run_id,
                summary.uploaded,
                summary.skipped,
                summary.failures.len(),
                summary.bytes_transferred,
                summary.duration_ms
            );
        }

        Ok(summary)
    }

    /// 处理任何文件前验证凭据与存储桶
    async fn preflight(&self) -> Result<(), SyncError> {
        debug!("预检远程存储: {}", self.store.name());
        match tokio::time::timeout(self.config.request_timeout, self.store.check()).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                error!("远程存储预检失败: {:#}", e);
                Err(SyncError::Preflight(format!("{:#}", e)))
            }
            Err(_) => {
                error!("远程存储预检超时");
                Err(SyncError::Preflight(format!(
                    "timed out after {:?}",
                    self.config.request_timeout
                )))
            }
        }
    }
}

/// 工作任务共享的只读上下文
struct WorkerContext {
    store: Arc<dyn RemoteStore>,
    uploader: ObjectUploader,
    prefix: String,
    max_retries: u32,
    retry_base_delay_ms: u64,
    request_timeout: Duration,
    transfer_timeout: Duration,
    dry_run: bool,
    cancelled: Arc<AtomicBool>,
}

impl WorkerContext {
    async fn process(&self, record: LocalFileRecord) -> FileOutcome {
        let key = remote_key(&self.prefix, &record.relative_path);
        let mut outcome = FileOutcome::new(&record, key);

        match self.pipeline(&record, &mut outcome).await {
            Ok(()) => outcome.stage = FileStage::Recorded,
            Err(e) => {
                warn!("文件同步失败: {} ({}): {}", record.relative_path, e.stage, e.message);
                outcome.fail(e);
            }
        }

        outcome
    }

    /// 指纹 -> 查询远程 -> 判定 -> 上传或跳过
    async fn pipeline(&self, record: &LocalFileRecord, outcome: &mut FileOutcome) -> Result<(), FileError> {
        let fingerprinted = fingerprint_file(&record.absolute_path)
            .await
            .map_err(|e| FileError::new(FileStage::Scanned, format!("read failed: {}", e)))?;
        let data = fingerprinted.data;
        let digest = record.set_digest(fingerprinted.digest);
        outcome.size_bytes = data.len() as u64;
        outcome.stage = FileStage::Fingerprinted;

        let store = self.store.as_ref();
        let key = outcome.key.clone();
        let key = key.as_str();
        let remote = self
            .with_retry("remote lookup", self.request_timeout, move || store.head(key))
            .await
            .map_err(|m| FileError::new(FileStage::Fingerprinted, m))?;
        outcome.stage = FileStage::Resolved;

        let decision = decide(digest, &remote);
        outcome.decision = Some(decision);
        outcome.stage = FileStage::Decided;
        debug!("{} -> {} ({})", record.relative_path, decision, digest);

        if !decision.needs_upload() {
            outcome.stage = FileStage::Skipped;
            return Ok(());
        }

        if self.dry_run {
            return Ok(());
        }

        let uploader = &self.uploader;
        let sent = self
            .with_retry("upload", self.transfer_timeout, move || {
                uploader.upload(store, key, data.clone(), digest)
            })
            .await
            .map_err(|m| FileError::new(FileStage::Decided, m))?;

        outcome.bytes_transferred = sent;
        outcome.stage = FileStage::Uploaded;
        Ok(())
    }

    /// 带超时与重试的远程调用
    async fn with_retry<T, F, Fut>(&self, what: &str, limit: Duration, mut op: F) -> Result<T, String>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let mut last_error = String::new();

        for attempt in 0..=self.max_retries {
            if attempt > 0 && self.cancelled.load(Ordering::SeqCst) {
                return Err(format!("{} (cancelled before retry)", last_error));
            }

            match tokio::time::timeout(limit, op()).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(e)) => last_error = format!("{} failed: {:#}", what, e),
                Err(_) => last_error = format!("{} timed out after {:?}", what, limit),
            }

            if attempt < self.max_retries {
                // 指数退避
                let delay = self
                    .retry_base_delay_ms
                    .saturating_mul(1_u64 << attempt.min(16));
                warn!(
                    "{}，{}ms 后重试 ({}/{})",
                    last_error,
                    delay,
                    attempt + 1,
                    self.max_retries
                );
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }
        }

        Err(last_error)
    }
}
