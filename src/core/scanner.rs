use crate::error::{SyncError, SyncResult};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;

/// 文件扫描器配置
#[derive(Debug, Clone, Default)]
pub struct ScanConfig {
    /// 排除规则（文件名或简单 glob，如 `*.tmp`）
    pub exclude_patterns: Vec<String>,
}

/// 文件扫描器
///
/// 递归列出资源目录下的所有普通文件。不跟随符号链接，符号链接本身也不会被返回。
/// 任何目录读取失败都会使整个扫描失败，不返回部分结果。
pub struct FileScanner {
    patterns: Vec<regex::Regex>,
}

impl FileScanner {
    pub fn new(config: ScanConfig) -> Self {
        let patterns = config
            .exclude_patterns
            .iter()
            .filter_map(|p| Self::compile_pattern(p))
            .collect();
        Self { patterns }
    }

    /// 将简单 glob 转换为匹配文件名的正则
    fn compile_pattern(pattern: &str) -> Option<regex::Regex> {
        let escaped = regex::escape(&pattern.to_lowercase()).replace(r"\*", ".*");
        regex::Regex::new(&format!("^{}$", escaped)).ok()
    }

    /// 检查文件是否应该被排除
    fn should_exclude(&self, path: &Path) -> bool {
        let name = match path.file_name().and_then(|n| n.to_str()) {
            Some(n) => n.to_lowercase(),
            None => return false,
        };
        self.patterns.iter().any(|re| re.is_match(&name))
    }

    /// 扫描单个目录（阻塞）
    fn scan_dir(&self, root: &Path) -> SyncResult<Vec<PathBuf>> {
        if !root.is_dir() {
            return Err(SyncError::MissingRoot(root.to_path_buf()));
        }

        let mut files = Vec::new();
        let mut excluded_count = 0;

        for entry in WalkDir::new(root).follow_links(false) {
            let entry = entry.map_err(|source| SyncError::Scan {
                path: root.to_path_buf(),
                source,
            })?;

            if !entry.file_type().is_file() {
                continue;
            }

            if self.should_exclude(entry.path()) {
                debug!("排除文件: {:?}", entry.path());
                excluded_count += 1;
                continue;
            }

            files.push(entry.into_path());
        }

        debug!(
            "目录扫描完成: {:?}, {} 个文件, {} 个被排除",
            root,
            files.len(),
            excluded_count
        );
        Ok(files)
    }

    /// 扫描多个资源目录并返回所有文件的绝对路径
    pub fn scan_roots(&self, roots: &[PathBuf]) -> SyncResult<Vec<PathBuf>> {
        let mut all = Vec::new();
        for root in roots {
            all.extend(self.scan_dir(root)?);
        }
        all.sort();
        all.dedup();

        info!("扫描完成: {} 个目录, {} 个文件", roots.len(), all.len());
        Ok(all)
    }

    /// 在阻塞线程池中扫描，避免阻塞 async runtime
    pub async fn scan(self, roots: Vec<PathBuf>) -> SyncResult<Vec<PathBuf>> {
        tokio::task::spawn_blocking(move || self.scan_roots(&roots))
            .await
            .map_err(|e| {
                SyncError::Io(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    format!("扫描任务异常退出: {}", e),
                ))
            })?
    }
}

impl Default for FileScanner {
    fn default() -> Self {
        Self::new(ScanConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn scanner(patterns: &[&str]) -> FileScanner {
        FileScanner::new(ScanConfig {
            exclude_patterns: patterns.iter().map(|s| s.to_string()).collect(),
        })
    }

    #[test]
    fn test_scan_nested_directories() {
        let dir = tempfile::tempdir().unwrap();
        let stickers = dir.path().join("stickers");
        fs::create_dir_all(stickers.join("jetbrains/dark")).unwrap();
        fs::write(stickers.join("root.png"), "root").unwrap();
        fs::write(stickers.join("jetbrains/nested.png"), "nested").unwrap();
        fs::write(stickers.join("jetbrains/dark/deep.png"), "deep").unwrap();

        let files = scanner(&[]).scan_roots(&[stickers.clone()]).unwrap();

        assert_eq!(files.len(), 3);
        assert!(files.contains(&stickers.join("jetbrains/dark/deep.png")));
        assert!(files.iter().all(|f| f.is_absolute()));
    }

    #[test]
    fn test_scan_multiple_roots() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["backgrounds", "misc"] {
            fs::create_dir(dir.path().join(name)).unwrap();
            fs::write(dir.path().join(name).join("a.txt"), name).unwrap();
        }

        let roots = vec![dir.path().join("backgrounds"), dir.path().join("misc")];
        let files = scanner(&[]).scan_roots(&roots).unwrap();
        assert_eq!(files.len(), 2);
    }

    #[test]
    fn test_missing_root_is_fatal() {
        let dir = tempfile::tempdir().unwrap();

        let result = scanner(&[]).scan_roots(&[dir.path().join("nope")]);
        assert!(matches!(result, Err(SyncError::MissingRoot(_))));
    }

    #[test]
    fn test_exclude_patterns() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(".DS_Store"), "junk").unwrap();
        fs::write(dir.path().join("scratch.tmp"), "junk").unwrap();
        fs::write(dir.path().join("keep.svg"), "<svg/>").unwrap();

        let files = scanner(&[".DS_Store", "*.tmp"])
            .scan_roots(&[dir.path().to_path_buf()])
            .unwrap();

        assert_eq!(files, vec![dir.path().join("keep.svg")]);
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinks_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("misc");
        fs::create_dir(&root).unwrap();
        fs::write(root.join("real.txt"), "real").unwrap();
        std::os::unix::fs::symlink(root.join("real.txt"), root.join("link.txt")).unwrap();

        let files = scanner(&[]).scan_roots(&[root.clone()]).unwrap();
        assert_eq!(files, vec![root.join("real.txt")]);
    }

    #[tokio::test]
    async fn test_async_scan() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.json"), "{}").unwrap();

        let files = FileScanner::default()
            .scan(vec![dir.path().to_path_buf()])
            .await
            .unwrap();
        assert_eq!(files.len(), 1);
    }
}
