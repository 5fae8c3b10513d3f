use crate::config::AssetSyncConfig;
use crate::core::comparator::{download_delta, upload_delta, DeltaSummary, LocalState};
use crate::core::fingerprint::fingerprint_all;
use crate::core::manifest::{resolve_key, storage_key, SyncManifest};
use crate::core::scanner::{FileScanner, ScanConfig};
use crate::core::transfer::{TransferDirection, TransferExecutor, TransferOutcome, TransferTask};
use crate::storage::Storage;
use anyhow::Result;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// 校验文件后缀
pub const SIDECAR_SUFFIX: &str = ".checksum.txt";

/// 同步方向
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    /// 本地 -> 存储桶
    Push,
    /// 存储桶 -> 本地
    Pull,
}

impl SyncMode {
    pub fn direction(self) -> TransferDirection {
        match self {
            SyncMode::Push => TransferDirection::Upload,
            SyncMode::Pull => TransferDirection::Download,
        }
    }
}

/// 运行阶段，依次推进，没有回滚
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunPhase {
    Scan,
    Fingerprint,
    Diff,
    Transfer,
    Commit,
    Done,
}

impl RunPhase {
    pub fn next(self) -> Self {
        match self {
            RunPhase::Scan => RunPhase::Fingerprint,
            RunPhase::Fingerprint => RunPhase::Diff,
            RunPhase::Diff => RunPhase::Transfer,
            RunPhase::Transfer => RunPhase::Commit,
            RunPhase::Commit | RunPhase::Done => RunPhase::Done,
        }
    }
}

impl std::fmt::Display for RunPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RunPhase::Scan => "scan",
            RunPhase::Fingerprint => "fingerprint",
            RunPhase::Diff => "diff",
            RunPhase::Transfer => "transfer",
            RunPhase::Commit => "commit",
            RunPhase::Done => "done",
        };
        f.write_str(name)
    }
}

/// 一次运行的上下文，显式传入各组件
#[derive(Clone)]
pub struct SyncContext {
    pub root: PathBuf,
    pub config: AssetSyncConfig,
    pub storage: Arc<dyn Storage>,
}

impl SyncContext {
    pub fn new(root: PathBuf, config: AssetSyncConfig, storage: Arc<dyn Storage>) -> Self {
        Self {
            root,
            config,
            storage,
        }
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.config.manifest_path(&self.root)
    }

    fn scanner(&self) -> FileScanner {
        FileScanner::new(ScanConfig {
            exclude_patterns: self.config.exclude_patterns.clone(),
        })
    }
}

/// 本地资源
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalAsset {
    pub path: PathBuf,
    pub checksum: String,
}

/// 同步计划：扫描、计算校验和、比较之后的结果
#[derive(Debug, Clone)]
pub struct SyncPlan {
    /// 运行开始时加载的清单
    pub manifest: SyncManifest,
    pub summary: DeltaSummary,
    pub tasks: Vec<TransferTask>,
}

/// 同步报告
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub run_id: String,
    pub mode: SyncMode,
    pub dry_run: bool,
    pub start_time: i64,
    pub end_time: i64,
    pub phase: RunPhase,
    pub files_scanned: usize,
    pub files_changed: usize,
    pub files_skipped: usize,
    pub files_transferred: usize,
    pub files_failed: usize,
    pub manifest_updated: bool,
    pub errors: Vec<String>,
}

/// 单个资源的状态（`scan` 命令使用）
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetStatus {
    pub key: String,
    pub checksum: String,
    /// 与清单记录一致
    pub synced: bool,
}

/// 同步引擎
pub struct SyncEngine {
    ctx: SyncContext,
}

impl SyncEngine {
    pub fn new(ctx: SyncContext) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &SyncContext {
        &self.ctx
    }

    fn advance(phase: &mut RunPhase) {
        *phase = phase.next();
        debug!("进入阶段: {}", phase);
    }

    /// 运行一次完整同步
    pub async fn run(&self, mode: SyncMode, dry_run: bool) -> Result<SyncReport> {
        let start_time = chrono::Utc::now().timestamp();
        let run_id = uuid::Uuid::new_v4().to_string();

        info!(
            "开始资源同步 ({:?}, run={}, dry_run={})",
            mode, run_id, dry_run
        );

        let plan = self.plan(mode).await?;
        let mut phase = RunPhase::Diff;

        let mut report = SyncReport {
            run_id,
            mode,
            dry_run,
            start_time,
            end_time: start_time,
            phase,
            files_scanned: plan.summary.total,
            files_changed: plan.summary.changed,
            files_skipped: plan.summary.unchanged(),
            files_transferred: 0,
            files_failed: 0,
            manifest_updated: false,
            errors: Vec::new(),
        };

        if dry_run {
            for task in &plan.tasks {
                info!("[dry-run] 需要{}: {}", task.direction, task.key);
            }
            report.phase = RunPhase::Done;
            report.end_time = chrono::Utc::now().timestamp();
            return Ok(report);
        }

        Self::advance(&mut phase);
        let outcomes = self.transfer(&plan).await;

        Self::advance(&mut phase);
        let manifest_updated = self.commit(&plan, &outcomes)?;

        Self::advance(&mut phase);

        report.phase = phase;
        report.files_transferred = outcomes.iter().filter(|o| o.succeeded()).count();
        report.files_failed = plan.tasks.len() - report.files_transferred;
        report.manifest_updated = manifest_updated;
        report.errors = outcomes
            .iter()
            .filter_map(|o| o.error().map(|e| format!("{}: {}", o.task.key, e)))
            .collect();
        report.end_time = chrono::Utc::now().timestamp();

        info!(
            "资源同步完成: 扫描 {}, 变化 {}, 成功 {}, 失败 {}",
            report.files_scanned, report.files_changed, report.files_transferred, report.files_failed
        );

        Ok(report)
    }

    /// 扫描、计算校验和并比较，得到传输计划
    ///
    /// 清单损坏、资源目录缺失、读取文件失败都会在这里返回错误，不会开始任何传输。
    pub async fn plan(&self, mode: SyncMode) -> Result<SyncPlan> {
        let manifest = SyncManifest::load(&self.ctx.manifest_path())?;

        let (summary, tasks) = match mode {
            SyncMode::Push => self.plan_push(&manifest).await?,
            SyncMode::Pull => self.plan_pull(&manifest).await?,
        };

        info!(
            "比较完成: {} 个资源, {} 个需要{}",
            summary.total,
            summary.changed,
            mode.direction()
        );

        Ok(SyncPlan {
            manifest,
            summary,
            tasks,
        })
    }

    /// 执行计划中的传输任务
    pub async fn transfer(&self, plan: &SyncPlan) -> Vec<TransferOutcome> {
        TransferExecutor::with_concurrency(
            self.ctx.storage.clone(),
            self.ctx.config.max_concurrent_transfers,
        )
        .algorithm(self.ctx.config.checksum_algorithm)
        .execute(plan.tasks.clone())
        .await
    }

    /// 只把成功传输的校验和合并进清单并保存，返回清单是否有变化
    pub fn commit(&self, plan: &SyncPlan, outcomes: &[TransferOutcome]) -> Result<bool> {
        let updates = outcomes.iter().filter_map(|o| {
            o.confirmed_checksum()
                .map(|sum| (o.task.key.clone(), sum.to_string()))
        });
        let merged = plan.manifest.merge(updates);

        if merged == plan.manifest {
            debug!("清单无变化，跳过写入");
            return Ok(false);
        }

        merged.persist(&self.ctx.manifest_path())?;
        Ok(true)
    }

    /// 扫描并计算所有本地资源的校验和
    ///
    /// `write_sidecars` 为 true 时为每个资源写入 `<资源>.checksum.txt`，校验文件本身也作为资源。
    pub async fn local_assets(&self, write_sidecars: bool) -> Result<HashMap<String, LocalAsset>> {
        let root = &self.ctx.root;
        debug!("进入阶段: {}", RunPhase::Scan);
        let files = self
            .ctx
            .scanner()
            .scan(self.ctx.config.asset_roots(root))
            .await?;

        let (sidecars, assets): (Vec<PathBuf>, Vec<PathBuf>) =
            files.into_iter().partition(|p| is_sidecar(p));

        debug!("进入阶段: {}", RunPhase::Fingerprint);
        let max_hashes = self.ctx.config.max_concurrent_hashes;
        let algorithm = self.ctx.config.checksum_algorithm;
        let sums = fingerprint_all(assets, max_hashes, algorithm).await?;
        let mut local = HashMap::with_capacity(sums.len() * 2);

        for (path, sum) in sums {
            if write_sidecars {
                let sidecar = sidecar_path(&path);
                write_sidecar(&sidecar, &sum).await?;
                local.insert(
                    storage_key(root, &sidecar)?,
                    LocalAsset {
                        path: sidecar,
                        checksum: algorithm.checksum(sum.as_bytes()),
                    },
                );
            }
            local.insert(storage_key(root, &path)?, LocalAsset { path, checksum: sum });
        }

        // 已存在但尚未处理的校验文件按普通文件计算
        let mut pending = Vec::new();
        for path in sidecars {
            if !local.contains_key(&storage_key(root, &path)?) {
                pending.push(path);
            }
        }
        for (path, sum) in fingerprint_all(pending, max_hashes, algorithm).await? {
            local.insert(storage_key(root, &path)?, LocalAsset { path, checksum: sum });
        }

        Ok(local)
    }

    async fn plan_push(&self, manifest: &SyncManifest) -> Result<(DeltaSummary, Vec<TransferTask>)> {
        let local = self
            .local_assets(self.ctx.config.checksum_sidecars)
            .await?;

        let checksums: HashMap<String, String> = local
            .iter()
            .map(|(key, asset)| (key.clone(), asset.checksum.clone()))
            .collect();
        let changed = upload_delta(&checksums, manifest);

        let tasks = changed
            .iter()
            .filter_map(|key| local.get(key).map(|asset| (key, asset)))
            .map(|(key, asset)| TransferTask {
                key: key.clone(),
                local_path: asset.path.clone(),
                direction: TransferDirection::Upload,
                expected_checksum: asset.checksum.clone(),
            })
            .collect();

        Ok((DeltaSummary::new(local.len(), changed.len()), tasks))
    }

    async fn plan_pull(&self, manifest: &SyncManifest) -> Result<(DeltaSummary, Vec<TransferTask>)> {
        let root = &self.ctx.root;
        let mut paths = HashMap::with_capacity(manifest.len());
        let mut local = HashMap::with_capacity(manifest.len());
        let mut existing = Vec::new();

        for (key, _) in manifest.iter() {
            let path = resolve_key(root, key)?;
            if path.is_file() {
                existing.push(path.clone());
            } else {
                info!("远程资源 {} 本地不存在", key);
                local.insert(key.clone(), LocalState::Missing);
            }
            paths.insert(key.clone(), path);
        }

        // 只对本地存在的文件计算校验和
        debug!("进入阶段: {}", RunPhase::Fingerprint);
        let sums = fingerprint_all(
            existing,
            self.ctx.config.max_concurrent_hashes,
            self.ctx.config.checksum_algorithm,
        )
        .await?;
        for (key, path) in &paths {
            if let Some(sum) = sums.get(path) {
                if manifest.get(key) != Some(sum.as_str()) {
                    info!("本地资源 {} 与远程资源不同", key);
                }
                local.insert(key.clone(), LocalState::Present(sum.clone()));
            }
        }

        let changed: BTreeSet<String> = download_delta(manifest, &local);
        let tasks = changed
            .iter()
            .filter_map(|key| {
                let path = paths.get(key)?;
                let expected = manifest.get(key)?;
                Some(TransferTask {
                    key: key.clone(),
                    local_path: path.clone(),
                    direction: TransferDirection::Download,
                    expected_checksum: expected.to_string(),
                })
            })
            .collect();

        Ok((DeltaSummary::new(manifest.len(), changed.len()), tasks))
    }

    /// 列出所有本地资源及其同步状态，不写入任何文件
    pub async fn list_assets(&self) -> Result<Vec<AssetStatus>> {
        let manifest = SyncManifest::load(&self.ctx.manifest_path())?;
        let local = self.local_assets(false).await?;

        let mut assets: Vec<AssetStatus> = local
            .into_iter()
            .map(|(key, asset)| AssetStatus {
                synced: manifest.get(&key) == Some(asset.checksum.as_str()),
                key,
                checksum: asset.checksum,
            })
            .collect();
        assets.sort_by(|a, b| a.key.cmp(&b.key));

        Ok(assets)
    }
}

/// 是否为校验文件
pub fn is_sidecar(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.ends_with(SIDECAR_SUFFIX))
        .unwrap_or(false)
}

/// 资源对应的校验文件路径
pub fn sidecar_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(SIDECAR_SUFFIX);
    PathBuf::from(name)
}

/// 内容不同时才写入，避免无谓改动
async fn write_sidecar(path: &Path, sum: &str) -> Result<()> {
    match tokio::fs::read_to_string(path).await {
        Ok(existing) if existing == sum => return Ok(()),
        Ok(_) => debug!("更新校验文件: {:?}", path),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!("创建校验文件: {:?}", path)
        }
        Err(e) => warn!("读取校验文件失败，将重写: {:?}: {}", path, e),
    }

    tokio::fs::write(path, sum).await?;
    Ok(())
}
