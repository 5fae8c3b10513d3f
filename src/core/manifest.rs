//! 同步清单 - 记录每个资源最后一次成功同步时的校验和

use crate::error::{SyncError, SyncResult};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info};

/// 存储键 -> 校验和
///
/// 使用有序映射，持久化结果稳定，便于版本控制中查看差异。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncManifest {
    entries: BTreeMap<String, String>,
}

impl SyncManifest {
    pub fn new() -> Self {
        Self::default()
    }

    /// 从磁盘加载清单
    ///
    /// 文件不存在时返回空清单（首次运行）；文件存在但不是字符串到字符串的 JSON 对象时返回错误。
    pub fn load(path: &Path) -> SyncResult<Self> {
        if !path.exists() {
            info!("清单文件不存在，视为首次同步: {:?}", path);
            return Ok(Self::new());
        }

        let content = std::fs::read_to_string(path)?;
        let raw: BTreeMap<String, String> =
            serde_json::from_str(&content).map_err(|source| SyncError::ManifestParse {
                path: path.to_path_buf(),
                source,
            })?;

        let entries: BTreeMap<String, String> = raw
            .into_iter()
            .map(|(key, sum)| (normalize_key(&key), sum))
            .collect();

        debug!("已加载清单: {} 个条目", entries.len());
        Ok(Self { entries })
    }

    /// 合并更新：覆盖同名键，其余条目原样保留，从不删除
    pub fn merge<I>(&self, updates: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut entries = self.entries.clone();
        for (key, sum) in updates {
            entries.insert(normalize_key(&key), sum);
        }
        Self { entries }
    }

    /// 原子写入：先写同目录临时文件，再重命名覆盖
    pub fn persist(&self, path: &Path) -> SyncResult<()> {
        let content = serde_json::to_string_pretty(&self.entries).map_err(|source| {
            SyncError::ManifestParse {
                path: path.to_path_buf(),
                source,
            }
        })?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let temp_path = crate::storage::local::temp_path_for(path);
        let result = std::fs::File::create(&temp_path)
            .and_then(|mut file| {
                file.write_all(content.as_bytes())?;
                file.write_all(b"\n")?;
                // 落盘后再重命名，断电时不会留下空文件
                file.sync_all()
            })
            .and_then(|_| std::fs::rename(&temp_path, path));

        if let Err(e) = result {
            let _ = std::fs::remove_file(&temp_path);
            return Err(e.into());
        }

        info!("清单已保存: {} 个条目 -> {:?}", self.entries.len(), path);
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.entries.iter()
    }
}

impl FromIterator<(String, String)> for SyncManifest {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self::new().merge(iter)
    }
}

/// 规范化路径分隔符（统一使用 /）
pub fn normalize_key(key: &str) -> String {
    key.replace('\\', "/").trim_start_matches('/').to_string()
}

/// 计算文件相对项目根目录的存储键
pub fn storage_key(root: &Path, path: &Path) -> SyncResult<String> {
    let relative = path
        .strip_prefix(root)
        .map_err(|_| SyncError::StorageKey {
            path: path.to_path_buf(),
            root: root.to_path_buf(),
        })?;

    let parts: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();

    if parts.is_empty() {
        return Err(SyncError::StorageKey {
            path: path.to_path_buf(),
            root: root.to_path_buf(),
        });
    }

    Ok(parts.join("/"))
}

/// 将存储键解析为项目内的本地路径，拒绝越出根目录的键
pub fn resolve_key(root: &Path, key: &str) -> SyncResult<PathBuf> {
    let normalized = normalize_key(key);
    let relative = Path::new(&normalized);

    let escapes = normalized.is_empty()
        || relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)));

    if escapes {
        return Err(SyncError::StorageKey {
            path: relative.to_path_buf(),
            root: root.to_path_buf(),
        });
    }

    Ok(root.join(relative))
}
