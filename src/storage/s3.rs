use super::{ByteStream, PutOptions, Storage, CHUNK_SIZE, IO_TIMEOUT_SECS, OP_TIMEOUT_SECS};
use anyhow::{bail, Result};
use async_trait::async_trait;
use bytes::Bytes;
use futures::TryStreamExt;
use opendal::{layers::TimeoutLayer, Operator};
use std::time::Duration;

/// S3 存储
///
/// 凭证由环境提供（`AWS_ACCESS_KEY_ID` / `AWS_SECRET_ACCESS_KEY` 或共享配置文件）。
/// opendal 不支持逐对象 ACL，公开读取依赖存储桶策略；
/// 未声明存储桶公开可读时，要求公开读取的上传直接失败。
pub struct S3Storage {
    operator: Operator,
    name: String,
    bucket_public_read: bool,
}

impl S3Storage {
    pub fn new(
        bucket: &str,
        region: &str,
        endpoint: Option<&str>,
        prefix: Option<&str>,
        bucket_public_read: bool,
    ) -> Result<Self> {
        use opendal::services::S3;

        let mut builder = S3::default().bucket(bucket).region(region);

        if let Some(ep) = endpoint {
            builder = builder.endpoint(ep);
        }

        if let Some(p) = prefix {
            builder = builder.root(p);
        }

        // 添加超时层
        let operator = Operator::new(builder)?
            .layer(
                TimeoutLayer::default()
                    .with_timeout(Duration::from_secs(OP_TIMEOUT_SECS))
                    .with_io_timeout(Duration::from_secs(IO_TIMEOUT_SECS)),
            )
            .finish();

        let name = format!(
            "s3://{}{}",
            bucket,
            prefix.map(|p| format!("/{}", p)).unwrap_or_default()
        );

        Ok(Self {
            operator,
            name,
            bucket_public_read,
        })
    }

    async fn read_chunk(operator: &Operator, key: &str, offset: u64, end: u64) -> Result<Bytes> {
        let data = operator.read_with(key).range(offset..end).await?;
        Ok(Bytes::from(data.to_vec()))
    }
}

#[async_trait]
impl Storage for S3Storage {
    async fn put_object(
        &self,
        key: &str,
        mut body: ByteStream,
        options: &PutOptions,
    ) -> Result<u64> {
        if options.public_read && !self.bucket_public_read {
            bail!(
                "{} 需要公开读取，但存储桶 {} 未配置公开读取策略 (bucketPublicRead)",
                key,
                self.name
            );
        }

        let mut writer = self
            .operator
            .writer_with(key)
            .content_type(&options.content_type)
            .chunk(CHUNK_SIZE)
            .await?;

        let result: Result<u64> = async {
            let mut written = 0u64;
            while let Some(chunk) = body.try_next().await? {
                written += chunk.len() as u64;
                writer.write(chunk).await?;
            }
            writer.close().await?;
            Ok(written)
        }
        .await;

        if result.is_err() {
            // 放弃未完成的分块上传
            let _ = writer.abort().await;
        }

        result
    }

    async fn get_object(&self, key: &str) -> Result<ByteStream> {
        let total = self.operator.stat(key).await?.content_length();
        let operator = self.operator.clone();
        let key = key.to_string();

        // 按范围分块读取
        let stream = futures::stream::try_unfold(0u64, move |offset| {
            let operator = operator.clone();
            let key = key.clone();
            async move {
                if offset >= total {
                    return Ok(None);
                }
                let end = (offset + CHUNK_SIZE as u64).min(total);
                Self::read_chunk(&operator, &key, offset, end)
                    .await
                    .map(|bytes| Some((bytes, end)))
            }
        });

        Ok(Box::pin(stream))
    }

    fn name(&self) -> &str {
        &self.name
    }
}
