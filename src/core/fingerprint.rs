//! 内容指纹 - 与 S3 单次上传的 ETag 使用相同算法（MD5，十六进制小写）

use bytes::Bytes;
use md5::{Digest, Md5};
use std::path::Path;

/// 计算数据的内容摘要
pub fn fingerprint(data: &[u8]) -> String {
    format!("{:x}", Md5::digest(data))
}

/// 读取文件并计算摘要，同时保留读取到的字节用于上传
#[derive(Debug, Clone)]
pub struct Fingerprinted {
    pub digest: String,
    pub data: Bytes,
}

pub async fn fingerprint_file(path: &Path) -> std::io::Result<Fingerprinted> {
    let data = tokio::fs::read(path).await?;
    let digest = fingerprint(&data);
    Ok(Fingerprinted {
        digest,
        data: Bytes::from(data),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_digests() {
        assert_eq!(fingerprint(b""), "d41d8cd98f00b204e9800998ecf8427e");
        assert_eq!(fingerprint(b"hello"), "5d41402abc4b2a76b9719d911017c592");
    }

    #[tokio::test]
    async fn test_file_digest_ignores_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.svg");
        let b = dir.path().join("b.svg");
        std::fs::write(&a, b"<svg/>").unwrap();
        std::fs::write(&b, b"<svg/>").unwrap();

        let file = std::fs::File::options().write(true).open(&b).unwrap();
        file.set_modified(std::time::SystemTime::UNIX_EPOCH).unwrap();

        let fa = fingerprint_file(&a).await.unwrap();
        let fb = fingerprint_file(&b).await.unwrap();
        assert_eq!(fa.digest, fb.digest);
        assert_eq!(fa.data.as_ref(), b"<svg/>");
    }

    #[tokio::test]
    async fn test_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(fingerprint_file(&dir.path().join("gone.svg")).await.is_err());
    }
}
