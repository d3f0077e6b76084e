//! 对象上传 - 远程 key 推导、Content-Type 映射与单次 PUT

use crate::storage::{PutOptions, RemoteState, RemoteStore};
use anyhow::{bail, Result};
use bytes::Bytes;
use std::path::Path;
use tracing::debug;

/// key 不变而内容可能被下一次同步覆盖，这里的 immutable 指“直到下次覆盖”
pub const DEFAULT_CACHE_CONTROL: &str = "public, max-age=31536000, immutable";
pub const FALLBACK_CONTENT_TYPE: &str = "application/octet-stream";

/// 由前缀和相对路径推导远程 key（纯函数，跨运行稳定）
pub fn remote_key(prefix: &str, relative_path: &str) -> String {
    let prefix = prefix.trim_matches('/');
    let relative_path = relative_path.trim_start_matches('/');
    if prefix.is_empty() {
        relative_path.to_string()
    } else {
        format!("{}/{}", prefix, relative_path)
    }
}

/// 根据扩展名确定 Content-Type
pub fn content_type_for(path: &str) -> &'static str {
    let ext = Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "svg" => "image/svg+xml",
        "png" => "image/png",
        "json" => "application/json",
        "jpg" | "jpeg" => "image/jpeg",
        "webp" => "image/webp",
        "gif" => "image/gif",
        "html" | "htm" => "text/html; charset=utf-8",
        "css" => "text/css; charset=utf-8",
        "js" => "application/javascript",
        "txt" => "text/plain; charset=utf-8",
        _ => FALLBACK_CONTENT_TYPE,
    }
}

/// 对象上传器，不做内部重试
#[derive(Debug, Clone)]
pub struct ObjectUploader {
    cache_control: String,
    verify: bool,
}

impl ObjectUploader {
    pub fn new(cache_control: impl Into<String>, verify: bool) -> Self {
        Self {
            cache_control: cache_control.into(),
            verify,
        }
    }

    /// 上传完整内容，成功时返回传输的字节数
    ///
    /// 开启校验时会回查 ETag，与本地摘要不一致则视为失败。
    pub async fn upload(
        &self,
        store: &dyn RemoteStore,
        key: &str,
        data: Bytes,
        digest: &str,
    ) -> Result<u64> {
        let size = data.len() as u64;
        let opts = PutOptions {
            content_type: content_type_for(key).to_string(),
            cache_control: self.cache_control.clone(),
        };

        debug!("上传: {} ({}字节, {})", key, size, opts.content_type);
        store.put(key, data, &opts).await?;

        if self.verify {
            match store.head(key).await? {
                RemoteState::Found { etag } if etag == digest => {
                    debug!("  校验通过: {}", key);
                }
                RemoteState::Found { etag } => {
                    bail!("verification failed for {}: remote etag {} != local {}", key, etag, digest)
                }
                RemoteState::Absent => bail!("verification failed for {}: object not found after upload", key),
            }
        }

        Ok(size)
    }
}

impl Default for ObjectUploader {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_CONTROL, false)
    }
}
