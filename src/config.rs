//! 运行配置模块
//!
//! 凭证与目标存储桶来自环境变量；调优参数可以从 JSON 配置文件加载，
//! 未填写的字段使用默认值。

use crate::logging::LogConfig;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const ENV_ACCOUNT_ID: &str = "R2_ACCOUNT_ID";
pub const ENV_ACCESS_KEY_ID: &str = "R2_ACCESS_KEY_ID";
pub const ENV_SECRET_ACCESS_KEY: &str = "R2_SECRET_ACCESS_KEY";
pub const ENV_BUCKET_NAME: &str = "R2_BUCKET_NAME";
pub const ENV_PUBLIC_URL: &str = "R2_PUBLIC_URL";
pub const ENV_ENDPOINT: &str = "R2_ENDPOINT";

pub const DEFAULT_BUCKET: &str = "football-coloring-pages";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variables: {}", .0.join(", "))]
    MissingVars(Vec<&'static str>),
    #[error("invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
    #[error("failed to read config file {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// 远程存储连接配置
#[derive(Clone)]
pub struct StoreConfig {
    pub account_id: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub bucket: String,
    /// 覆盖默认的 R2 endpoint（其他 S3 兼容服务或本地测试时使用）
    pub endpoint: Option<String>,
    /// 仅用于报告中展示的公共访问地址
    pub public_url: Option<String>,
}

impl fmt::Debug for StoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreConfig")
            .field("account_id", &self.account_id)
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"***")
            .field("bucket", &self.bucket)
            .field("endpoint", &self.endpoint)
            .field("public_url", &self.public_url)
            .finish()
    }
}

impl StoreConfig {
    /// 从进程环境变量读取
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// 通过查找函数读取，缺失的必填项会一次性全部列出
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let account_id = get(ENV_ACCOUNT_ID);
        let access_key_id = get(ENV_ACCESS_KEY_ID);
        let secret_access_key = get(ENV_SECRET_ACCESS_KEY);
        // 未设置时使用默认桶名；显式设置为空字符串视为缺失
        let bucket = match lookup(ENV_BUCKET_NAME) {
            None => Some(DEFAULT_BUCKET.to_string()),
            Some(_) => get(ENV_BUCKET_NAME),
        };

        let mut missing = Vec::new();
        if account_id.is_none() {
            missing.push(ENV_ACCOUNT_ID);
        }
        if access_key_id.is_none() {
            missing.push(ENV_ACCESS_KEY_ID);
        }
        if secret_access_key.is_none() {
            missing.push(ENV_SECRET_ACCESS_KEY);
        }
        if bucket.is_none() {
            missing.push(ENV_BUCKET_NAME);
        }

        match (account_id, access_key_id, secret_access_key, bucket) {
            (Some(account_id), Some(access_key_id), Some(secret_access_key), Some(bucket)) => {
                let endpoint = get(ENV_ENDPOINT);
                if let Some(ep) = &endpoint {
                    if !ep.starts_with("http://") && !ep.starts_with("https://") {
                        return Err(ConfigError::Invalid {
                            name: ENV_ENDPOINT,
                            reason: format!("expected an http(s) URL, got {:?}", ep),
                        });
                    }
                }
                Ok(Self {
                    account_id,
                    access_key_id,
                    secret_access_key,
                    bucket,
                    endpoint,
                    public_url: get(ENV_PUBLIC_URL),
                })
            }
            _ => Err(ConfigError::MissingVars(missing)),
        }
    }

    /// S3 API 地址
    pub fn endpoint_url(&self) -> String {
        match &self.endpoint {
            Some(ep) => ep.trim_end_matches('/').to_string(),
            None => format!("https://{}.r2.cloudflarestorage.com", self.account_id),
        }
    }

    /// 对象的公共访问地址（未配置时返回 None）
    pub fn public_url_for(&self, key: &str) -> Option<String> {
        let base = self.public_url.as_deref()?.trim_end_matches('/');
        let encoded: Vec<String> = key
            .split('/')
            .map(|segment| urlencoding::encode(segment).into_owned())
            .collect();
        Some(format!("{}/{}", base, encoded.join("/")))
    }
}

/// 同步调优参数
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SyncOptions {
    /// 远程 key 前缀
    pub prefix: String,
    /// 参与同步的扩展名（不区分大小写）
    pub extensions: Vec<String>,
    /// 排除规则（glob patterns）
    pub exclude_patterns: Vec<String>,
    /// 单个文件大小上限（字节），超过的文件不参与同步；0 表示不限制
    pub max_file_size: u64,
    /// 最大并发文件数
    pub max_concurrency: usize,
    /// 单个请求失败后的最大重试次数
    pub max_retries: u32,
    /// 重试基础延迟（毫秒），按指数退避
    pub retry_base_delay_ms: u64,
    /// 单个请求超时（秒）
    pub request_timeout_secs: u64,
    /// 数据传输超时（秒）
    pub io_timeout_secs: u64,
    /// 上传对象的 Cache-Control
    pub cache_control: String,
    /// 上传后回查 ETag 确认内容一致
    pub verify_uploads: bool,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            prefix: "coloring-pages".to_string(),
            extensions: vec!["svg".to_string(), "png".to_string(), "json".to_string()],
            exclude_patterns: vec![
                ".git/**".to_string(),
                ".svn/**".to_string(),
                "node_modules/**".to_string(),
                ".DS_Store".to_string(),
                "Thumbs.db".to_string(),
                "*.tmp".to_string(),
                "*.temp".to_string(),
                "~*".to_string(),
            ],
            max_file_size: 0,
            max_concurrency: 8,
            max_retries: 2,
            retry_base_delay_ms: 500,
            request_timeout_secs: crate::storage::OP_TIMEOUT_SECS,
            io_timeout_secs: crate::storage::IO_TIMEOUT_SECS,
            cache_control: crate::core::uploader::DEFAULT_CACHE_CONTROL.to_string(),
            verify_uploads: false,
        }
    }
}

impl SyncOptions {
    /// 检查数值范围
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrency == 0 {
            return Err(ConfigError::Invalid {
                name: "maxConcurrency",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.request_timeout_secs == 0 || self.io_timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                name: "requestTimeoutSecs",
                reason: "timeouts must be greater than zero".to_string(),
            });
        }
        if self.extensions.is_empty() {
            return Err(ConfigError::Invalid {
                name: "extensions",
                reason: "at least one extension is required".to_string(),
            });
        }
        Ok(())
    }
}

/// 配置文件内容：`sync` 与 `log` 两个部分
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub sync: SyncOptions,
    pub log: LogConfig,
}

impl AppConfig {
    /// 加载配置文件；未指定文件时返回默认配置
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let Some(path) = path else {
            return Ok(Self::default());
        };

        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let config: AppConfig =
            serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;

        tracing::debug!("已加载配置文件: {:?}", path);
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name: &str| map.get(name).cloned()
    }

    #[test]
    fn test_from_lookup_complete() {
        let config = StoreConfig::from_lookup(lookup_from(&[
            (ENV_ACCOUNT_ID, "acct"),
            (ENV_ACCESS_KEY_ID, "key"),
            (ENV_SECRET_ACCESS_KEY, "secret"),
            (ENV_PUBLIC_URL, "https://pub.example.com/"),
        ]))
        .unwrap();

        assert_eq!(config.bucket, DEFAULT_BUCKET);
        assert_eq!(config.endpoint_url(), "https://acct.r2.cloudflarestorage.com");
        assert_eq!(
            config.public_url_for("coloring-pages/england/svg/man utd.svg").as_deref(),
            Some("https://pub.example.com/coloring-pages/england/svg/man%20utd.svg")
        );
    }

    #[test]
    fn test_missing_vars_are_enumerated() {
        let err = StoreConfig::from_lookup(lookup_from(&[(ENV_ACCESS_KEY_ID, "key")])).unwrap_err();
        match err {
            ConfigError::MissingVars(vars) => {
                assert_eq!(vars, vec![ENV_ACCOUNT_ID, ENV_SECRET_ACCESS_KEY]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_blank_values_count_as_missing() {
        let err = StoreConfig::from_lookup(lookup_from(&[
            (ENV_ACCOUNT_ID, "acct"),
            (ENV_ACCESS_KEY_ID, "  "),
            (ENV_SECRET_ACCESS_KEY, "secret"),
            (ENV_BUCKET_NAME, ""),
        ]))
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "missing required environment variables: R2_ACCESS_KEY_ID, R2_BUCKET_NAME"
        );
    }

    #[test]
    fn test_endpoint_override() {
        let config = StoreConfig::from_lookup(lookup_from(&[
            (ENV_ACCOUNT_ID, "acct"),
            (ENV_ACCESS_KEY_ID, "key"),
            (ENV_SECRET_ACCESS_KEY, "secret"),
            (ENV_ENDPOINT, "http://localhost:9000/"),
        ]))
        .unwrap();
        assert_eq!(config.endpoint_url(), "http://localhost:9000");
        assert!(config.public_url_for("a.svg").is_none());

        let err = StoreConfig::from_lookup(lookup_from(&[
            (ENV_ACCOUNT_ID, "acct"),
            (ENV_ACCESS_KEY_ID, "key"),
            (ENV_SECRET_ACCESS_KEY, "secret"),
            (ENV_ENDPOINT, "localhost:9000"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name: ENV_ENDPOINT, .. }));
    }

    #[test]
    fn test_debug_redacts_secret() {
        let config = StoreConfig::from_lookup(lookup_from(&[
            (ENV_ACCOUNT_ID, "acct"),
            (ENV_ACCESS_KEY_ID, "key"),
            (ENV_SECRET_ACCESS_KEY, "hunter2"),
        ]))
        .unwrap();
        let debug = format!("{:?}", config);
        assert!(!debug.contains("hunter2"));
    }

    #[test]
    fn test_load_partial_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(
            &path,
            r#"{ "sync": { "prefix": "pages", "maxConcurrency": 2, "maxFileSize": 1048576 }, "log": { "level": "debug" } }"#,
        )
        .unwrap();

        let config = AppConfig::load(Some(&path)).unwrap();
        assert_eq!(config.sync.prefix, "pages");
        assert_eq!(config.sync.max_concurrency, 2);
        assert_eq!(config.sync.max_file_size, 1024 * 1024);
        assert_eq!(config.sync.extensions, vec!["svg", "png", "json"]);
        assert_eq!(config.log.level, "debug");
        assert!(config.log.enabled);
    }

    #[test]
    fn test_load_rejects_malformed_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            AppConfig::load(Some(&path)),
            Err(ConfigError::Parse { .. })
        ));
        assert!(matches!(
            AppConfig::load(Some(&dir.path().join("missing.json"))),
            Err(ConfigError::Read { .. })
        ));
    }

    #[test]
    fn test_validate() {
        assert!(SyncOptions::default().validate().is_ok());
        let options = SyncOptions {
            max_concurrency: 0,
            ..Default::default()
        };
        assert!(options.validate().is_err());
    }
}
