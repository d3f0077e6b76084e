//! 测试用的内存对象存储

use crate::core::fingerprint::fingerprint;
use crate::storage::{PutOptions, RemoteState, RemoteStore};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct StoredObject {
    pub data: Bytes,
    pub etag: String,
    pub content_type: String,
    pub cache_control: String,
}

/// 行为与 S3 单次 PUT 一致：ETag 为内容 MD5，支持注入失败与延迟
#[derive(Default)]
pub struct MemoryStore {
    objects: Mutex<HashMap<String, StoredObject>>,
    put_failures: Mutex<HashMap<String, usize>>,
    head_failures: Mutex<HashSet<String>>,
    stalled: Mutex<HashSet<String>>,
    corrupt: AtomicBool,
    check_fails: AtomicBool,
    cancel_on_put: Mutex<Option<Arc<AtomicBool>>>,
    latency_ms: AtomicU64,
    in_flight: AtomicUsize,
    /// 同时进行中的 head/put 请求数的最大值
    pub max_in_flight: AtomicUsize,
    pub check_calls: AtomicUsize,
    pub head_calls: AtomicUsize,
    pub put_calls: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn object(&self, key: &str) -> Option<StoredObject> {
        self.objects.lock().unwrap().get(key).cloned()
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<_> = self.objects.lock().unwrap().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// 预置一个远程对象
    pub fn insert(&self, key: &str, data: &[u8]) {
        self.objects.lock().unwrap().insert(
            key.to_string(),
            StoredObject {
                data: Bytes::copy_from_slice(data),
                etag: fingerprint(data),
                content_type: "application/octet-stream".to_string(),
                cache_control: String::new(),
            },
        );
    }

    /// 接下来 `times` 次对该 key 的上传失败
    pub fn fail_puts(&self, key: &str, times: usize) {
        self.put_failures.lock().unwrap().insert(key.to_string(), times);
    }

    /// 对该 key 的查询始终返回非 NotFound 错误
    pub fn fail_heads(&self, key: &str) {
        self.head_failures.lock().unwrap().insert(key.to_string());
    }

    /// 对该 key 的上传永不返回
    pub fn stall_puts(&self, key: &str) {
        self.stalled.lock().unwrap().insert(key.to_string());
    }

    /// 存储的 ETag 与内容不符
    pub fn corrupt_etags(&self) {
        self.corrupt.store(true, Ordering::SeqCst);
    }

    pub fn fail_check(&self) {
        self.check_fails.store(true, Ordering::SeqCst);
    }

    /// 第一次上传时设置取消标志
    pub fn cancel_on_first_put(&self, flag: Arc<AtomicBool>) {
        *self.cancel_on_put.lock().unwrap() = Some(flag);
    }

    /// 每次 head/put 的固定延迟
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms.store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    /// 记录一个进行中的请求；守卫在请求结束或被丢弃时计数减一
    async fn enter(&self) -> InFlight<'_> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let guard = InFlight(&self.in_flight);

        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        guard
    }

    pub fn network_calls(&self) -> usize {
        self.check_calls.load(Ordering::SeqCst)
            + self.head_calls.load(Ordering::SeqCst)
            + self.put_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn check(&self) -> Result<()> {
        self.check_calls.fetch_add(1, Ordering::SeqCst);
        if self.check_fails.load(Ordering::SeqCst) {
            return Err(anyhow!("PermissionDenied: invalid access key"));
        }
        Ok(())
    }

    async fn head(&self, key: &str) -> Result<RemoteState> {
        self.head_calls.fetch_add(1, Ordering::SeqCst);
        let _in_flight = self.enter().await;
        if self.head_failures.lock().unwrap().contains(key) {
            return Err(anyhow!("Unexpected: 503 Service Unavailable"));
        }
        Ok(match self.objects.lock().unwrap().get(key) {
            Some(obj) => RemoteState::Found {
                etag: obj.etag.clone(),
            },
            None => RemoteState::Absent,
        })
    }

    async fn put(&self, key: &str, data: Bytes, opts: &PutOptions) -> Result<()> {
        self.put_calls.fetch_add(1, Ordering::SeqCst);
        let _in_flight = self.enter().await;

        let cancel_flag = self.cancel_on_put.lock().unwrap().take();
        if let Some(flag) = cancel_flag {
            flag.store(true, Ordering::SeqCst);
        }

        let stalled = self.stalled.lock().unwrap().contains(key);
        if stalled {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }

        {
            let mut failures = self.put_failures.lock().unwrap();
            if let Some(remaining) = failures.get_mut(key) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(anyhow!("Unexpected: connection reset by peer"));
                }
            }
        }

        let etag = if self.corrupt.load(Ordering::SeqCst) {
            "00000000000000000000000000000000".to_string()
        } else {
            fingerprint(&data)
        };

        self.objects.lock().unwrap().insert(
            key.to_string(),
            StoredObject {
                data,
                etag,
                content_type: opts.content_type.clone(),
                cache_control: opts.cache_control.clone(),
            },
        );
        Ok(())
    }

    fn name(&self) -> &str {
        "memory://test"
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// 在临时目录中创建文件
pub fn write_file(root: &Path, rel: &str, data: &[u8]) {
    let path = root.join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, data).unwrap();
}
