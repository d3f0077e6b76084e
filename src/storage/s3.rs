use super::{normalize_etag, PutOptions, RemoteState, RemoteStore};
use crate::config::{StoreConfig, SyncOptions};
use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use opendal::{layers::TimeoutLayer, Operator};
use std::time::Duration;

/// S3 兼容对象存储（R2 使用 region=auto）
pub struct S3Storage {
    operator: Operator,
    name: String,
}

impl S3Storage {
    pub fn new(config: &StoreConfig, options: &SyncOptions) -> Result<Self> {
        use opendal::services::S3;

        let builder = S3::default()
            .bucket(&config.bucket)
            .region("auto")
            .endpoint(&config.endpoint_url())
            .access_key_id(&config.access_key_id)
            .secret_access_key(&config.secret_access_key);

        // 添加超时层，单个请求卡住时不会拖住整个工作池
        let operator = Operator::new(builder)?
            .layer(
                TimeoutLayer::default()
                    .with_timeout(Duration::from_secs(options.request_timeout_secs))
                    .with_io_timeout(Duration::from_secs(options.io_timeout_secs)),
            )
            .finish();

        let name = format!("s3://{}", config.bucket);

        Ok(Self { operator, name })
    }
}

#[async_trait]
impl RemoteStore for S3Storage {
    async fn check(&self) -> Result<()> {
        self.operator.check().await?;
        Ok(())
    }

    async fn head(&self, key: &str) -> Result<RemoteState> {
        match self.operator.stat(key).await {
            Ok(meta) => match meta.etag() {
                Some(etag) => Ok(RemoteState::Found {
                    etag: normalize_etag(etag),
                }),
                // 没有 ETag 时无法证明内容相同，按空标签处理，后续判定为已修改
                None => Ok(RemoteState::Found {
                    etag: String::new(),
                }),
            },
            Err(e) if e.kind() == opendal::ErrorKind::NotFound => Ok(RemoteState::Absent),
            Err(e) => Err(e.into()),
        }
    }

    async fn put(&self, key: &str, data: Bytes, opts: &PutOptions) -> Result<()> {
        self.operator
            .write_with(key, data)
            .content_type(&opts.content_type)
            .cache_control(&opts.cache_control)
            .await?;
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}
