//! 应用配置模块

use crate::core::fingerprint::ChecksumAlgorithm;
use crate::logging::LogConfig;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// 默认配置文件名（位于项目根目录）
pub const CONFIG_FILE_NAME: &str = "assetsync.json";

/// 资源同步配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetSyncConfig {
    /// 存储桶名称
    #[serde(default = "default_bucket")]
    pub bucket: String,
    /// 存储桶区域
    #[serde(default = "default_region")]
    pub region: String,
    /// 自定义 S3 兼容端点
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    /// 存储桶策略是否已允许公开读取
    ///
    /// S3 后端无法逐对象设置 ACL，为 false 时需要公开读取的上传会失败。
    #[serde(default = "default_bucket_public_read")]
    pub bucket_public_read: bool,
    /// 桶内前缀
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
    /// 需要同步的资源目录（相对项目根目录）
    #[serde(default = "default_asset_directories")]
    pub asset_directories: Vec<String>,
    /// 清单文件路径（相对项目根目录）
    #[serde(default = "default_manifest_file")]
    pub manifest_file: String,
    /// 扫描时排除的文件
    #[serde(default = "default_exclude_patterns")]
    pub exclude_patterns: Vec<String>,
    /// 校验和算法: "md5" 或 "blake3"
    #[serde(default)]
    pub checksum_algorithm: ChecksumAlgorithm,
    /// 上传时是否写入 `.checksum.txt` 校验文件
    #[serde(default = "default_checksum_sidecars")]
    pub checksum_sidecars: bool,
    /// 计算校验和的最大并发数
    #[serde(default = "default_max_concurrent_hashes")]
    pub max_concurrent_hashes: usize,
    /// 最大并发传输数，1 表示串行
    #[serde(default = "default_max_concurrent_transfers")]
    pub max_concurrent_transfers: usize,
    #[serde(default)]
    pub log: LogConfig,
}

fn default_bucket() -> String {
    "doki-theme-assets".to_string()
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_bucket_public_read() -> bool {
    true
}

fn default_asset_directories() -> Vec<String> {
    ["backgrounds", "stickers", "screenshots", "misc"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_manifest_file() -> String {
    "syncedAssets.json".to_string()
}

fn default_exclude_patterns() -> Vec<String> {
    // 下载中断时残留的临时文件
    ["*.tmp", ".DS_Store", "Thumbs.db"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_checksum_sidecars() -> bool {
    true
}

fn default_max_concurrent_hashes() -> usize {
    16
}

fn default_max_concurrent_transfers() -> usize {
    1
}

impl Default for AssetSyncConfig {
    fn default() -> Self {
        Self {
            bucket: default_bucket(),
            region: default_region(),
            endpoint: None,
            bucket_public_read: default_bucket_public_read(),
            prefix: None,
            asset_directories: default_asset_directories(),
            manifest_file: default_manifest_file(),
            exclude_patterns: default_exclude_patterns(),
            checksum_algorithm: ChecksumAlgorithm::default(),
            checksum_sidecars: default_checksum_sidecars(),
            max_concurrent_hashes: default_max_concurrent_hashes(),
            max_concurrent_transfers: default_max_concurrent_transfers(),
            log: LogConfig::default(),
        }
    }
}

impl AssetSyncConfig {
    /// 从配置文件加载
    ///
    /// 文件不存在时使用默认配置；文件存在但格式错误时返回错误，
    /// 避免误用默认存储桶。
    pub fn load(config_file: &Path) -> Result<Self> {
        if !config_file.exists() {
            tracing::debug!("配置文件不存在，使用默认配置: {:?}", config_file);
            return Ok(Self::default());
        }

        let content = fs::read_to_string(config_file)
            .with_context(|| format!("读取配置文件失败: {:?}", config_file))?;
        let config = serde_json::from_str::<Self>(&content)
            .with_context(|| format!("配置文件格式错误: {:?}", config_file))?;

        Ok(config)
    }

    /// 资源目录的绝对路径
    pub fn asset_roots(&self, root: &Path) -> Vec<PathBuf> {
        self.asset_directories
            .iter()
            .map(|dir| root.join(dir))
            .collect()
    }

    /// 清单文件的绝对路径
    pub fn manifest_path(&self, root: &Path) -> PathBuf {
        root.join(&self.manifest_file)
    }
}
