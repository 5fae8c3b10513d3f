use crate::core::manifest::SyncManifest;
use std::collections::{BTreeSet, HashMap};
use tracing::debug;

/// 本地文件相对清单的状态
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalState {
    /// 本地不存在（未读取、未计算校验和）
    Missing,
    /// 本地存在，附当前校验和
    Present(String),
}

/// 上传方向的差异：清单中没有或校验和不同的本地资源
///
/// 只存在于清单中的键不会出现在结果里，不做远程删除。
pub fn upload_delta(
    local_checksums: &HashMap<String, String>,
    manifest: &SyncManifest,
) -> BTreeSet<String> {
    local_checksums
        .iter()
        .filter(|(key, sum)| match manifest.get(key) {
            None => {
                debug!("新资源: {}", key);
                true
            }
            Some(saved) if saved != sum.as_str() => {
                debug!("资源已变化: {}", key);
                true
            }
            Some(_) => false,
        })
        .map(|(key, _)| key.clone())
        .collect()
}

/// 下载方向的差异：本地缺失或校验和与清单不同的条目
///
/// 清单中有但 `local` 中没有的键视为缺失。
pub fn download_delta(
    manifest: &SyncManifest,
    local: &HashMap<String, LocalState>,
) -> BTreeSet<String> {
    manifest
        .iter()
        .filter(|(key, saved)| match local.get(key.as_str()) {
            None | Some(LocalState::Missing) => {
                debug!("远程资源本地不存在: {}", key);
                true
            }
            Some(LocalState::Present(sum)) if sum != *saved => {
                debug!("本地资源与远程不同: {}", key);
                true
            }
            Some(LocalState::Present(_)) => false,
        })
        .map(|(key, _)| key.clone())
        .collect()
}

/// 差异统计
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeltaSummary {
    pub total: usize,
    pub changed: usize,
}

impl DeltaSummary {
    pub fn new(total: usize, changed: usize) -> Self {
        Self { total, changed }
    }

    pub fn unchanged(&self) -> usize {
        self.total.saturating_sub(self.changed)
    }
}
