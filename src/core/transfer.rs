//! 传输执行 - 逐个执行上传/下载任务，单个失败不影响整批

use crate::core::fingerprint::{ChecksumAlgorithm, ChecksumHasher};
use crate::core::mime;
use crate::storage::local::temp_path_for;
use crate::storage::{ByteStream, PutOptions, Storage};
use anyhow::{anyhow, Context, Result};
use bytes::Bytes;
use futures::{StreamExt, TryStreamExt};
use serde::Serialize;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, Mutex};
use tokio_util::io::ReaderStream;
use tracing::{debug, info, warn};

/// 传输方向
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferDirection {
    Upload,
    Download,
}

impl std::fmt::Display for TransferDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransferDirection::Upload => write!(f, "upload"),
            TransferDirection::Download => write!(f, "download"),
        }
    }
}

/// 待执行的传输任务
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferTask {
    /// 存储键（对象键）
    pub key: String,
    pub local_path: PathBuf,
    pub direction: TransferDirection,
    /// 计划时得到的校验和（上传为本地校验和，下载为清单记录）
    pub expected_checksum: String,
}

/// 传输结果
#[derive(Debug, Clone)]
pub struct TransferOutcome {
    pub task: TransferTask,
    /// 成功时为确认的校验和，失败时为错误描述
    pub result: std::result::Result<String, String>,
}

impl TransferOutcome {
    pub fn succeeded(&self) -> bool {
        self.result.is_ok()
    }

    /// 可以写入清单的校验和，失败任务返回 None
    pub fn confirmed_checksum(&self) -> Option<&str> {
        self.result.as_deref().ok()
    }

    pub fn error(&self) -> Option<&str> {
        self.result.as_ref().err().map(String::as_str)
    }
}

/// 传输执行器
///
/// 多个 worker 从同一个队列取任务，每个任务恰好执行一次；默认只有一个 worker，即串行执行。
/// 不做重试，失败的任务会在下一次运行时重新检测到。
pub struct TransferExecutor {
    storage: Arc<dyn Storage>,
    max_concurrent: usize,
    algorithm: ChecksumAlgorithm,
}

impl TransferExecutor {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self::with_concurrency(storage, 1)
    }

    pub fn with_concurrency(storage: Arc<dyn Storage>, max_concurrent: usize) -> Self {
        Self {
            storage,
            max_concurrent: max_concurrent.max(1),
            algorithm: ChecksumAlgorithm::default(),
        }
    }

    /// 确认传输内容时使用的校验和算法
    pub fn algorithm(mut self, algorithm: ChecksumAlgorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    /// 执行所有任务并返回每个任务的结果
    pub async fn execute(&self, tasks: Vec<TransferTask>) -> Vec<TransferOutcome> {
        let total = tasks.len();
        if total == 0 {
            return Vec::new();
        }

        let workers = self.max_concurrent.min(total);
        info!(
            "开始传输: {} 个任务, {} 个并发, 存储 {}",
            total,
            workers,
            self.storage.name()
        );

        let queue = Arc::new(Mutex::new(VecDeque::from(tasks)));
        let (tx, mut rx) = mpsc::channel::<TransferOutcome>(total);
        let mut handles = Vec::with_capacity(workers);

        for worker_id in 0..workers {
            let queue = queue.clone();
            let storage = self.storage.clone();
            let tx = tx.clone();
            let algorithm = self.algorithm;

            handles.push(tokio::spawn(async move {
                Self::worker_loop(worker_id, queue, storage, algorithm, tx).await;
            }));
        }
        drop(tx);

        let mut outcomes = Vec::with_capacity(total);
        while let Some(outcome) = rx.recv().await {
            outcomes.push(outcome);
        }

        for handle in handles {
            if let Err(e) = handle.await {
                warn!("传输 worker 异常退出: {}", e);
            }
        }

        if outcomes.len() != total {
            warn!("有 {} 个任务没有返回结果", total - outcomes.len());
        }

        let succeeded = outcomes.iter().filter(|o| o.succeeded()).count();
        info!(
            "传输结束: 成功 {}, 失败 {}",
            succeeded,
            outcomes.len() - succeeded
        );

        outcomes
    }

    async fn worker_loop(
        worker_id: usize,
        queue: Arc<Mutex<VecDeque<TransferTask>>>,
        storage: Arc<dyn Storage>,
        algorithm: ChecksumAlgorithm,
        tx: mpsc::Sender<TransferOutcome>,
    ) {
        loop {
            let task = queue.lock().await.pop_front();
            let Some(task) = task else {
                debug!("worker {} 队列已空", worker_id);
                break;
            };

            let result = Self::execute_task(storage.as_ref(), &task, algorithm).await;
            let result = match result {
                Ok(sum) => Ok(sum),
                Err(e) => {
                    warn!("无法{} {}: {:#}", direction_label(task.direction), task.key, e);
                    Err(format!("{:#}", e))
                }
            };

            if tx.send(TransferOutcome { task, result }).await.is_err() {
                break;
            }
        }
    }

    /// 执行单个任务，返回实际传输内容的校验和
    pub async fn execute_task(
        storage: &dyn Storage,
        task: &TransferTask,
        algorithm: ChecksumAlgorithm,
    ) -> Result<String> {
        match task.direction {
            TransferDirection::Upload => Self::upload(storage, task, algorithm).await,
            TransferDirection::Download => Self::download(storage, task, algorithm).await,
        }
    }

    async fn upload(
        storage: &dyn Storage,
        task: &TransferTask,
        algorithm: ChecksumAlgorithm,
    ) -> Result<String> {
        let content_type = mime::resolve_content_type(&task.local_path).await?;

        let file = fs::File::open(&task.local_path)
            .await
            .with_context(|| format!("无法打开文件流 {:?}", task.local_path))?;

        // 边上传边计算，记录的是实际写入存储桶的内容
        let hasher = Arc::new(std::sync::Mutex::new(ChecksumHasher::with_algorithm(algorithm)));
        let stream_hasher = hasher.clone();
        let body: ByteStream = Box::pin(ReaderStream::new(file).map(move |chunk| -> Result<Bytes> {
            let chunk = chunk?;
            stream_hasher
                .lock()
                .map_err(|_| anyhow!("校验和计算器不可用"))?
                .update(&chunk);
            Ok(chunk)
        }));

        info!("正在上传 {} ({})", task.key, content_type);
        let bytes = storage
            .put_object(&task.key, body, &PutOptions::public(content_type))
            .await?;
        debug!("上传完成: {} ({} 字节)", task.key, bytes);

        let hasher = Arc::try_unwrap(hasher)
            .map_err(|_| anyhow!("上传流未释放: {}", task.key))?
            .into_inner()
            .map_err(|_| anyhow!("校验和计算器不可用"))?;
        let actual = hasher.finalize();
        if actual != task.expected_checksum {
            warn!(
                "本地资源 {} 在比较后发生变化 (比较时 {}, 上传 {})",
                task.key, task.expected_checksum, actual
            );
        }

        Ok(actual)
    }

    async fn download(
        storage: &dyn Storage,
        task: &TransferTask,
        algorithm: ChecksumAlgorithm,
    ) -> Result<String> {
        if let Some(parent) = task.local_path.parent() {
            fs::create_dir_all(parent).await?;
        }

        info!("正在下载 {}", task.key);
        let mut stream = storage.get_object(&task.key).await?;

        // 写入临时文件，失败时删除
        let temp_path = scopeguard::guard(temp_path_for(&task.local_path), |p| {
            let _ = std::fs::remove_file(p);
        });

        let mut file = fs::File::create(&*temp_path).await?;
        let mut hasher = ChecksumHasher::with_algorithm(algorithm);
        let mut bytes = 0u64;

        while let Some(chunk) = stream.try_next().await? {
            hasher.update(&chunk);
            bytes += chunk.len() as u64;
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        fs::rename(&*temp_path, &task.local_path).await?;
        let _ = scopeguard::ScopeGuard::into_inner(temp_path);

        let actual = hasher.finalize();
        if actual != task.expected_checksum {
            warn!(
                "远程资源 {} 与清单记录不同 (清单 {}, 实际 {})",
                task.key, task.expected_checksum, actual
            );
        }
        debug!("下载完成: {} ({} 字节)", task.key, bytes);

        Ok(actual)
    }
}

fn direction_label(direction: TransferDirection) -> &'static str {
    match direction {
        TransferDirection::Upload => "上传",
        TransferDirection::Download => "下载",
    }
}
