pub mod local;
pub mod s3;

use crate::config::AssetSyncConfig;
use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;

pub use local::LocalStorage;
pub use s3::S3Storage;

// ============ 公共常量 ============

/// 非 IO 操作超时（秒）- stat 等
pub const OP_TIMEOUT_SECS: u64 = 60;
/// IO 操作超时（秒）- read, write 等
pub const IO_TIMEOUT_SECS: u64 = 300;
/// 分块大小（字节）
pub const CHUNK_SIZE: usize = 8 * 1024 * 1024;

/// 对象内容的字节流
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// 上传选项
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutOptions {
    pub content_type: String,
    /// 对象是否公开可读
    pub public_read: bool,
}

impl PutOptions {
    pub fn public(content_type: impl Into<String>) -> Self {
        Self {
            content_type: content_type.into(),
            public_read: true,
        }
    }
}

/// 对象存储抽象接口
#[async_trait]
pub trait Storage: Send + Sync {
    /// 写入整个对象（覆盖），返回写入的字节数
    async fn put_object(&self, key: &str, body: ByteStream, options: &PutOptions) -> Result<u64>;

    /// 以字节流形式读取对象
    async fn get_object(&self, key: &str) -> Result<ByteStream>;

    /// 获取存储名称（用于日志）
    fn name(&self) -> &str;
}

/// 根据配置创建存储实例
///
/// 指定 `local_bucket` 时使用本地目录代替远程存储桶。
pub fn create_storage(
    config: &AssetSyncConfig,
    local_bucket: Option<&Path>,
) -> Result<Arc<dyn Storage>> {
    match local_bucket {
        Some(dir) => {
            tracing::info!("初始化本地存储: {:?}", dir);
            Ok(Arc::new(LocalStorage::new(dir)?) as Arc<dyn Storage>)
        }
        None => {
            tracing::info!(
                "初始化S3存储: bucket={}, region={}",
                config.bucket,
                config.region
            );
            Ok(Arc::new(S3Storage::new(
                &config.bucket,
                &config.region,
                config.endpoint.as_deref(),
                config.prefix.as_deref(),
                config.bucket_public_read,
            )?) as Arc<dyn Storage>)
        }
    }
}
