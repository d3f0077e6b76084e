use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use thiserror::Error;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// 文件扫描器配置
#[derive(Debug, Clone)]
pub struct ScanConfig {
    /// 排除规则（glob patterns）
    pub exclude_patterns: Vec<String>,
    /// 最大文件大小（0 表示不限制）
    pub max_file_size: u64,
    /// 仅包含的扩展名
    pub include_extensions: Vec<String>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        let options = crate::config::SyncOptions::default();
        Self {
            exclude_patterns: options.exclude_patterns,
            max_file_size: options.max_file_size,
            include_extensions: options.extensions,
        }
    }
}

/// 本地文件记录，一次扫描内不可变
///
/// 摘要在指纹计算时填入，只在本次运行内缓存。
#[derive(Debug)]
pub struct LocalFileRecord {
    pub absolute_path: PathBuf,
    /// 相对同步根目录的路径，统一使用 `/` 分隔
    pub relative_path: String,
    pub size_bytes: u64,
    digest: OnceLock<String>,
}

impl LocalFileRecord {
    pub fn new(absolute_path: PathBuf, relative_path: String, size_bytes: u64) -> Self {
        Self {
            absolute_path,
            relative_path,
            size_bytes,
            digest: OnceLock::new(),
        }
    }

    /// 记录摘要；已有值时保留第一次的结果
    pub fn set_digest(&self, digest: String) -> &str {
        self.digest.get_or_init(|| digest)
    }
}

/// 扫描过程中遇到的局部问题（不可读的子目录、符号链接环等）
#[derive(Debug, Clone)]
pub struct ScanIssue {
    pub path: String,
    pub message: String,
}

/// 扫描结果
#[derive(Debug, Default)]
pub struct ScanOutput {
    pub files: Vec<LocalFileRecord>,
    pub issues: Vec<ScanIssue>,
    pub excluded: usize,
}

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("sync root does not exist: {0:?}")]
    RootNotFound(PathBuf),
    #[error("sync root is not a directory: {0:?}")]
    NotADirectory(PathBuf),
}

/// 文件扫描器
pub struct FileScanner {
    config: ScanConfig,
    cancel_flag: Option<Arc<AtomicBool>>,
}

impl FileScanner {
    pub fn new(config: ScanConfig) -> Self {
        Self {
            config,
            cancel_flag: None,
        }
    }

    /// 附加取消标志
    pub fn with_cancel(mut self, cancel_flag: Arc<AtomicBool>) -> Self {
        self.cancel_flag = Some(cancel_flag);
        self
    }

    fn is_cancelled(&self) -> bool {
        self.cancel_flag
            .as_ref()
            .map(|f| f.load(Ordering::Relaxed))
            .unwrap_or(false)
    }

    /// 检查扩展名是否在允许列表中（直接比较 OsStr，文件名不必是 UTF-8）
    fn extension_allowed(&self, path: &Path) -> bool {
        let ext = match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if !ext.is_empty() => ext.to_lowercase(),
            _ => return false,
        };

        self.config
            .include_extensions
            .iter()
            .any(|e| e.trim_start_matches('.').to_lowercase() == ext)
    }

    /// 检查路径是否命中排除规则
    fn should_exclude(&self, path: &str) -> bool {
        self.config
            .exclude_patterns
            .iter()
            .any(|pattern| matches_pattern(path, pattern))
    }

    /// 目录是否整体被排除（只看 `dir/**` 形式的规则），命中则不再进入
    fn should_prune(&self, relative_dir: &str) -> bool {
        let dir_pattern = format!("{}/", relative_dir);
        self.config
            .exclude_patterns
            .iter()
            .filter(|pattern| pattern.ends_with("/**"))
            .any(|pattern| matches_pattern(&dir_pattern, pattern))
    }

    /// 扫描根目录，返回候选文件与局部错误
    pub fn scan(&self, root: &Path) -> Result<ScanOutput, ScanError> {
        let meta = std::fs::metadata(root).map_err(|_| ScanError::RootNotFound(root.to_path_buf()))?;
        if !meta.is_dir() {
            return Err(ScanError::NotADirectory(root.to_path_buf()));
        }

        info!("开始扫描本地目录: {}", root.display());

        let mut output = ScanOutput::default();
        let mut pruned = 0;

        // 跟随符号链接，walkdir 会把链接环报告为错误项；被排除的目录不进入
        let walker = WalkDir::new(root).follow_links(true).into_iter().filter_entry(|entry| {
            if entry.depth() == 0 || !entry.file_type().is_dir() {
                return true;
            }
            let dir = relative_display(root, entry.path());
            if self.should_prune(&dir) {
                debug!("跳过排除目录: {}", dir);
                pruned += 1;
                return false;
            }
            true
        });

        for entry in walker {
            if self.is_cancelled() {
                warn!("扫描已取消");
                break;
            }

            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    let path = e
                        .path()
                        .map(|p| relative_display(root, p))
                        .unwrap_or_else(|| root.display().to_string());
                    warn!("扫描出错，跳过: {} - {}", path, e);
                    output.issues.push(ScanIssue {
                        path,
                        message: e.to_string(),
                    });
                    continue;
                }
            };

            if !entry.file_type().is_file() {
                continue;
            }

            // 先按扩展名和排除规则过滤，不参与同步的文件不会产生错误
            if !self.extension_allowed(entry.path()) {
                continue;
            }

            let display_path = relative_display(root, entry.path());
            if self.should_exclude(&display_path) {
                debug!("排除文件: {}", display_path);
                output.excluded += 1;
                continue;
            }

            let relative_path = match relative_path(root, entry.path()) {
                Some(p) => p,
                None => {
                    warn!("文件名不是有效的 UTF-8，跳过: {}", display_path);
                    output.issues.push(ScanIssue {
                        path: display_path,
                        message: "path is not valid UTF-8".to_string(),
                    });
                    continue;
                }
            };

            let size = match entry.metadata() {
                Ok(m) => m.len(),
                Err(e) => {
                    output.issues.push(ScanIssue {
                        path: relative_path,
                        message: e.to_string(),
                    });
                    continue;
                }
            };

            if self.config.max_file_size > 0 && size > self.config.max_file_size {
                debug!("跳过大文件: {} ({})", relative_path, size);
                output.excluded += 1;
                continue;
            }

            output.files.push(LocalFileRecord::new(
                entry.path().to_path_buf(),
                relative_path,
                size,
            ));
        }

        output.excluded += pruned;

        // 遍历顺序不保证稳定，排序只为日志与报告可读
        output
            .files
            .sort_by(|a, b| a.relative_path.cmp(&b.relative_path));

        info!(
            "扫描完成: {} 个文件, {} 个被排除, {} 个错误",
            output.files.len(),
            output.excluded,
            output.issues.len()
        );

        Ok(output)
    }
}

/// 相对路径，使用 `/` 连接各段；包含非 UTF-8 段时返回 None
fn relative_path(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let mut parts = Vec::new();
    for component in rel.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_str()?),
            _ => return None,
        }
    }
    if parts.is_empty() {
        return None;
    }
    Some(parts.join("/"))
}

/// 用于日志、报告与排除规则的相对路径，非 UTF-8 字符做替换
fn relative_display(root: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    let parts: Vec<String> = rel
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();
    if parts.is_empty() {
        path.display().to_string()
    } else {
        parts.join("/")
    }
}

/// 简单的 glob 模式匹配（不区分大小写）
///
/// - `dir/**` 匹配任意层级下名为 `dir` 的目录中的文件
/// - `*` 匹配单个路径段内的任意字符，不含 `/` 的模式只与文件名比较
/// - 其他情况要求完整路径或文件名相等
pub fn matches_pattern(path: &str, pattern: &str) -> bool {
    let path = path.to_lowercase();
    let pattern = pattern.to_lowercase();

    if let Some(dir) = pattern.strip_suffix("/**") {
        return path.starts_with(&format!("{}/", dir)) || path.contains(&format!("/{}/", dir));
    }

    let file_name = path.rsplit('/').next().unwrap_or(&path);
    let target = if pattern.contains('/') {
        path.as_str()
    } else {
        file_name
    };

    if pattern.contains('*') {
        let regex_pattern = regex::escape(&pattern).replace("\\*", "[^/]*");
        if let Ok(re) = regex::Regex::new(&format!("^{}$", regex_pattern)) {
            return re.is_match(target);
        }
    }

    target == pattern
}
