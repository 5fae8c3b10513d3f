//! 内容校验和 - 用于检测资源变化

use crate::error::{SyncError, SyncResult};
use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tokio::sync::Semaphore;
use tracing::debug;

/// 校验和长度（十六进制字符数，128 位）
pub const CHECKSUM_HEX_LEN: usize = 32;

const READ_BUFFER_SIZE: usize = 64 * 1024;

/// 校验和算法
///
/// 已有的 `syncedAssets.json` 和 `.checksum.txt` 都是 MD5，默认保持一致。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChecksumAlgorithm {
    #[default]
    Md5,
    /// BLAKE3 前 16 字节
    Blake3,
}

impl ChecksumAlgorithm {
    /// 计算内容的校验和（小写十六进制）
    pub fn checksum(self, data: &[u8]) -> String {
        let mut hasher = ChecksumHasher::with_algorithm(self);
        hasher.update(data);
        hasher.finalize()
    }
}

/// 使用默认算法计算内容的校验和
pub fn checksum(data: &[u8]) -> String {
    ChecksumAlgorithm::default().checksum(data)
}

/// 增量计算校验和，与 [`ChecksumAlgorithm::checksum`] 结果一致
pub enum ChecksumHasher {
    Md5(Md5),
    Blake3(Box<blake3::Hasher>),
}

impl Default for ChecksumHasher {
    fn default() -> Self {
        Self::with_algorithm(ChecksumAlgorithm::default())
    }
}

impl ChecksumHasher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_algorithm(algorithm: ChecksumAlgorithm) -> Self {
        match algorithm {
            ChecksumAlgorithm::Md5 => Self::Md5(Md5::new()),
            ChecksumAlgorithm::Blake3 => Self::Blake3(Box::new(blake3::Hasher::new())),
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        match self {
            Self::Md5(h) => h.update(data),
            Self::Blake3(h) => {
                h.update(data);
            }
        }
    }

    pub fn finalize(self) -> String {
        match self {
            Self::Md5(h) => format!("{:x}", h.finalize()),
            Self::Blake3(h) => h.finalize().to_hex()[..CHECKSUM_HEX_LEN].to_string(),
        }
    }
}

/// 流式读取文件并计算校验和
pub async fn checksum_file(path: &Path, algorithm: ChecksumAlgorithm) -> SyncResult<String> {
    let to_error = |source| SyncError::Fingerprint {
        path: path.to_path_buf(),
        source,
    };

    let mut file = tokio::fs::File::open(path).await.map_err(to_error)?;
    let mut hasher = ChecksumHasher::with_algorithm(algorithm);
    let mut buffer = vec![0u8; READ_BUFFER_SIZE];

    loop {
        let n = file.read(&mut buffer).await.map_err(to_error)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    Ok(hasher.finalize())
}

/// 并发计算一组文件的校验和
///
/// 全部完成后才返回；任一文件失败则整体失败。
pub async fn fingerprint_all(
    paths: Vec<PathBuf>,
    max_concurrent: usize,
    algorithm: ChecksumAlgorithm,
) -> SyncResult<HashMap<PathBuf, String>> {
    let semaphore = Arc::new(Semaphore::new(max_concurrent.max(1)));
    let mut handles = Vec::with_capacity(paths.len());

    for path in paths {
        let semaphore = semaphore.clone();
        handles.push(tokio::spawn(async move {
            // 信号量不会被关闭
            let _permit = semaphore.acquire_owned().await.ok();
            let result = checksum_file(&path, algorithm).await;
            (path, result)
        }));
    }

    let mut checksums = HashMap::with_capacity(handles.len());
    let mut first_error = None;

    for handle in handles {
        match handle.await {
            Ok((path, Ok(sum))) => {
                checksums.insert(path, sum);
            }
            Ok((_, Err(e))) => {
                first_error.get_or_insert(e);
            }
            Err(e) => {
                first_error.get_or_insert(SyncError::Io(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    format!("校验和任务异常退出: {}", e),
                )));
            }
        }
    }

    if let Some(e) = first_error {
        return Err(e);
    }

    debug!("已计算 {} 个文件的校验和", checksums.len());
    Ok(checksums)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_checksum_is_deterministic_hex() {
        let a = checksum(b"doki doki");
        let b = checksum(b"doki doki");

        assert_eq!(a, b);
        assert_eq!(a.len(), CHECKSUM_HEX_LEN);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_ne!(a, checksum(b"doki doki!"));
    }

    #[test]
    fn test_checksum_known_values() {
        // 与已有清单中的 MD5 值一致
        assert_eq!(checksum(b""), "d41d8cd98f00b204e9800998ecf8427e");
        assert_eq!(checksum(b"hello world"), "5eb63bbbe01eeed093cb22bb8f5acdc3");
        assert_eq!(
            ChecksumAlgorithm::Blake3.checksum(b""),
            "af1349b9f5f9a1a6a0404dea36dcc949"
        );
    }

    #[test]
    fn test_algorithm_from_config_value() {
        let algo: ChecksumAlgorithm = serde_json::from_str("\"blake3\"").unwrap();
        assert_eq!(algo, ChecksumAlgorithm::Blake3);
        assert_eq!(ChecksumAlgorithm::default(), ChecksumAlgorithm::Md5);
    }

    #[test]
    fn test_incremental_matches_oneshot() {
        let mut hasher = ChecksumHasher::new();
        hasher.update(b"hello ");
        hasher.update(b"world");

        assert_eq!(hasher.finalize(), checksum(b"hello world"));

        let mut hasher = ChecksumHasher::with_algorithm(ChecksumAlgorithm::Blake3);
        hasher.update(b"hello ");
        hasher.update(b"world");
        assert_eq!(
            hasher.finalize(),
            ChecksumAlgorithm::Blake3.checksum(b"hello world")
        );
    }

    #[tokio::test]
    async fn test_checksum_file_matches_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("big.bin");
        let data: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
        fs::write(&path, &data).unwrap();

        for algo in [ChecksumAlgorithm::Md5, ChecksumAlgorithm::Blake3] {
            assert_eq!(checksum_file(&path, algo).await.unwrap(), algo.checksum(&data));
        }
    }

    #[tokio::test]
    async fn test_fingerprint_all_fails_on_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let present = dir.path().join("a.txt");
        fs::write(&present, "a").unwrap();

        let result = fingerprint_all(
            vec![present, dir.path().join("gone.txt")],
            4,
            ChecksumAlgorithm::Md5,
        )
        .await;
        assert!(matches!(result, Err(SyncError::Fingerprint { .. })));
    }

    #[tokio::test]
    async fn test_fingerprint_all_collects_every_file() {
        let dir = tempfile::tempdir().unwrap();
        let paths: Vec<PathBuf> = (0..10)
            .map(|i| {
                let p = dir.path().join(format!("{}.txt", i));
                fs::write(&p, format!("content {}", i)).unwrap();
                p
            })
            .collect();

        let sums = fingerprint_all(paths.clone(), 3, ChecksumAlgorithm::Md5)
            .await
            .unwrap();
        assert_eq!(sums.len(), 10);
        assert_eq!(sums[&paths[4]], checksum(b"content 4"));
    }
}
