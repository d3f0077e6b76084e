pub mod s3;

use crate::config::{StoreConfig, SyncOptions};
use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;

pub use s3::S3Storage;

// ============ 公共常量 ============

/// 非 IO 操作超时（秒）- stat, check 等
pub const OP_TIMEOUT_SECS: u64 = 60;
/// IO 操作超时（秒）- 上传数据
pub const IO_TIMEOUT_SECS: u64 = 300;

/// 远程对象状态
///
/// 查询失败（权限、网络、响应异常）不属于这里的任何一种，
/// 由 `head` 以 `Err` 返回，避免被误当作对象不存在。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteState {
    /// 对象存在，`etag` 已去除引号并转为小写
    Found { etag: String },
    /// 对象不存在
    Absent,
}

impl RemoteState {
    pub fn etag(&self) -> Option<&str> {
        match self {
            RemoteState::Found { etag } => Some(etag),
            RemoteState::Absent => None,
        }
    }
}

/// 上传时附带的对象元数据
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutOptions {
    pub content_type: String,
    pub cache_control: String,
}

/// 远程对象存储接口
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// 检查凭证与存储桶是否可用，运行开始前调用一次
    async fn check(&self) -> Result<()>;

    /// 获取对象的完整性标签
    async fn head(&self, key: &str) -> Result<RemoteState>;

    /// 上传整个对象（单次 PUT，不做重试）
    async fn put(&self, key: &str, data: Bytes, opts: &PutOptions) -> Result<()>;

    /// 获取存储名称（用于日志）
    fn name(&self) -> &str;
}

/// 规范化服务端返回的 ETag，使其可以直接与本地摘要比较
pub fn normalize_etag(raw: &str) -> String {
    raw.trim()
        .trim_start_matches("W/")
        .trim_matches('"')
        .to_ascii_lowercase()
}

/// 根据配置创建远程存储实例（不发起网络请求）
pub fn create_store(config: &StoreConfig, options: &SyncOptions) -> Result<Arc<dyn RemoteStore>> {
    tracing::info!(
        "初始化S3存储: bucket={}, endpoint={}",
        config.bucket,
        config.endpoint_url()
    );
    Ok(Arc::new(S3Storage::new(config, options)?) as Arc<dyn RemoteStore>)
}
