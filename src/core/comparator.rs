use crate::storage::RemoteState;
use serde::Serialize;
use std::fmt;

/// 同步判定结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncDecision {
    /// 本地摘要与远程标签一致
    Unchanged,
    /// 远程不存在
    New,
    /// 远程存在但内容不同
    Modified,
}

impl SyncDecision {
    pub fn needs_upload(&self) -> bool {
        !matches!(self, SyncDecision::Unchanged)
    }
}

impl fmt::Display for SyncDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncDecision::Unchanged => write!(f, "unchanged"),
            SyncDecision::New => write!(f, "new"),
            SyncDecision::Modified => write!(f, "modified"),
        }
    }
}

/// 比较本地摘要与远程状态
///
/// 只有两者完全相等才判定为 Unchanged；无法比较的标签（分片上传的
/// `xxx-N`、缺失的 ETag）一律落到 Modified，宁可多传一次。
pub fn decide(local_digest: &str, remote: &RemoteState) -> SyncDecision {
    match remote.etag() {
        None => SyncDecision::New,
        Some(etag) if !etag.is_empty() && etag.eq_ignore_ascii_case(local_digest) => SyncDecision::Unchanged,
        Some(_) => SyncDecision::Modified,
    }
}
