use super::{ByteStream, PutOptions, Storage};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;

/// 以本地目录模拟的存储桶
pub struct LocalStorage {
    base_path: PathBuf,
    name: String,
}

impl LocalStorage {
    pub fn new(path: &Path) -> Result<Self> {
        if !path.exists() {
            std::fs::create_dir_all(path)?;
        }
        let name = format!("local:{}", path.display());
        Ok(Self {
            base_path: path.to_path_buf(),
            name,
        })
    }

    fn resolve_path(&self, key: &str) -> Result<PathBuf> {
        let key = key.trim_start_matches('/').trim_start_matches('\\');
        if key.is_empty() || key.split(['/', '\\']).any(|part| part == "..") {
            return Err(anyhow!("Invalid object key: {}", key));
        }
        Ok(self.base_path.join(key))
    }
}

/// 同目录下的隐藏临时文件路径（`.<name>.<pid>.tmp`）
pub(crate) fn temp_path_for(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy())
        .unwrap_or_default();
    path.with_file_name(format!(".{}.{}.tmp", name, std::process::id()))
}

#[async_trait]
impl Storage for LocalStorage {
    async fn put_object(
        &self,
        key: &str,
        mut body: ByteStream,
        _options: &PutOptions,
    ) -> Result<u64> {
        let full_path = self.resolve_path(key)?;

        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent).await?;
        }

        // 使用临时文件写入，然后原子重命名
        let temp_path = temp_path_for(&full_path);
        let mut file = fs::File::create(&temp_path).await?;
        let mut written = 0u64;

        let result: Result<()> = async {
            while let Some(chunk) = body.try_next().await? {
                written += chunk.len() as u64;
                file.write_all(&chunk).await?;
            }
            file.flush().await?;
            file.sync_all().await?;
            Ok(())
        }
        .await;

        if let Err(e) = result {
            let _ = fs::remove_file(&temp_path).await;
            return Err(e);
        }

        fs::rename(&temp_path, &full_path).await?;
        Ok(written)
    }

    async fn get_object(&self, key: &str) -> Result<ByteStream> {
        let file = fs::File::open(self.resolve_path(key)?).await?;
        let stream = ReaderStream::new(file).map(|chunk| chunk.map_err(Into::into));
        Ok(Box::pin(stream))
    }

    fn name(&self) -> &str {
        &self.name
    }
}
