//! 同步错误分类

use std::path::PathBuf;
use thiserror::Error;

/// 同步过程中的错误
///
/// `ManifestParse`、`MissingRoot`、`Scan`、`Fingerprint` 为致命错误，会在任何传输开始前终止本次运行；
/// 其余错误只影响单个传输任务。
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("清单文件无法解析 {path:?}: {source}")]
    ManifestParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("资源目录不存在或不是目录: {0:?}")]
    MissingRoot(PathBuf),

    #[error("扫描目录失败 {path:?}: {source}")]
    Scan {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },

    #[error("计算校验和失败 {path:?}: {source}")]
    Fingerprint {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("无法识别文件类型: {0:?}")]
    UnknownContentType(PathBuf),

    #[error("路径不在项目根目录下: {path:?} (root={root:?})")]
    StorageKey { path: PathBuf, root: PathBuf },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type SyncResult<T> = std::result::Result<T, SyncError>;
