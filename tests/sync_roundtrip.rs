use anyhow::{bail, Result};
use assetsync_lib::core::fingerprint::checksum;
use assetsync_lib::core::manifest::SyncManifest;
use assetsync_lib::storage::{ByteStream, LocalStorage, PutOptions, Storage};
use assetsync_lib::{AssetSyncConfig, SyncContext, SyncEngine, SyncMode};
use async_trait::async_trait;
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

const PNG: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDRpixels";

/// 对指定键返回失败，其余委托给内部存储，并记录写入的键
struct FailingStorage {
    inner: LocalStorage,
    fail_keys: HashSet<String>,
    puts: Mutex<Vec<String>>,
}

impl FailingStorage {
    fn new(bucket: &Path, fail_keys: &[&str]) -> Self {
        Self {
            inner: LocalStorage::new(bucket).unwrap(),
            fail_keys: fail_keys.iter().map(|k| k.to_string()).collect(),
            puts: Mutex::new(Vec::new()),
        }
    }

    fn put_count(&self) -> usize {
        self.puts.lock().unwrap().len()
    }
}

#[async_trait]
impl Storage for FailingStorage {
    async fn put_object(&self, key: &str, body: ByteStream, options: &PutOptions) -> Result<u64> {
        self.puts.lock().unwrap().push(key.to_string());
        if self.fail_keys.contains(key) {
            bail!("injected failure for {}", key);
        }
        self.inner.put_object(key, body, options).await
    }

    async fn get_object(&self, key: &str) -> Result<ByteStream> {
        if self.fail_keys.contains(key) {
            bail!("injected failure for {}", key);
        }
        self.inner.get_object(key).await
    }

    fn name(&self) -> &str {
        "failing"
    }
}

fn project() -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    for sub in ["backgrounds", "stickers", "screenshots", "misc"] {
        fs::create_dir_all(dir.path().join(sub)).unwrap();
    }
    dir
}

fn write(root: &Path, key: &str, content: &[u8]) {
    let path = root.join(key);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

fn engine(root: &Path, storage: Arc<dyn Storage>) -> SyncEngine {
    SyncEngine::new(SyncContext::new(
        root.to_path_buf(),
        AssetSyncConfig::default(),
        storage,
    ))
}

fn local_engine(root: &Path, bucket: &Path) -> SyncEngine {
    engine(root, Arc::new(LocalStorage::new(bucket).unwrap()))
}

fn manifest(root: &Path) -> SyncManifest {
    SyncManifest::load(&root.join("syncedAssets.json")).unwrap()
}

#[tokio::test]
async fn push_uploads_assets_and_sidecars() {
    let project = project();
    let bucket = tempfile::tempdir().unwrap();
    write(project.path(), "stickers/jetbrains/rem.png", PNG);
    write(project.path(), "misc/themes.json", b"{\"a\": 1}");

    let report = local_engine(project.path(), bucket.path())
        .run(SyncMode::Push, false)
        .await
        .unwrap();

    assert_eq!(report.files_scanned, 4);
    assert_eq!(report.files_transferred, 4);
    assert_eq!(report.files_failed, 0);
    assert!(report.manifest_updated);

    assert_eq!(
        fs::read(bucket.path().join("stickers/jetbrains/rem.png")).unwrap(),
        PNG
    );
    assert_eq!(
        fs::read_to_string(bucket.path().join("stickers/jetbrains/rem.png.checksum.txt")).unwrap(),
        checksum(PNG)
    );

    let saved = manifest(project.path());
    assert_eq!(saved.len(), 4);
    assert_eq!(saved.get("stickers/jetbrains/rem.png"), Some(checksum(PNG).as_str()));
}

#[tokio::test]
async fn second_push_is_a_no_op() {
    let project = project();
    let bucket = tempfile::tempdir().unwrap();
    write(project.path(), "backgrounds/a.png", PNG);

    let first = local_engine(project.path(), bucket.path())
        .run(SyncMode::Push, false)
        .await
        .unwrap();
    assert_eq!(first.files_transferred, 2);
    let before = fs::read(project.path().join("syncedAssets.json")).unwrap();

    let storage = Arc::new(FailingStorage::new(bucket.path(), &[]));
    let second = engine(project.path(), storage.clone())
        .run(SyncMode::Push, false)
        .await
        .unwrap();

    assert_eq!(second.files_changed, 0);
    assert_eq!(second.files_transferred, 0);
    assert!(!second.manifest_updated);
    assert_eq!(storage.put_count(), 0);
    assert_eq!(fs::read(project.path().join("syncedAssets.json")).unwrap(), before);
}

#[tokio::test]
async fn changed_asset_is_uploaded_again() {
    let project = project();
    let bucket = tempfile::tempdir().unwrap();
    write(project.path(), "misc/a.json", b"{}");
    write(project.path(), "misc/b.json", b"[]");
    local_engine(project.path(), bucket.path())
        .run(SyncMode::Push, false)
        .await
        .unwrap();

    write(project.path(), "misc/a.json", b"{\"changed\": true}");
    let storage = Arc::new(FailingStorage::new(bucket.path(), &[]));
    let report = engine(project.path(), storage.clone())
        .run(SyncMode::Push, false)
        .await
        .unwrap();

    // 资源本身和它的校验文件
    assert_eq!(report.files_transferred, 2);
    assert_eq!(
        manifest(project.path()).get("misc/a.json"),
        Some(checksum(b"{\"changed\": true}").as_str())
    );
}

#[tokio::test]
async fn failed_uploads_are_left_out_of_the_manifest() {
    let project = project();
    let bucket = tempfile::tempdir().unwrap();
    write(project.path(), "misc/ok.json", b"{}");
    write(project.path(), "misc/bad.json", b"[]");

    let storage = Arc::new(FailingStorage::new(bucket.path(), &["misc/bad.json"]));
    let report = engine(project.path(), storage)
        .run(SyncMode::Push, false)
        .await
        .unwrap();

    assert_eq!(report.files_failed, 1);
    assert_eq!(report.files_transferred, 3);
    assert_eq!(report.errors.len(), 1);
    assert!(report.errors[0].starts_with("misc/bad.json"));

    let saved = manifest(project.path());
    assert!(saved.contains("misc/ok.json"));
    assert!(saved.contains("misc/bad.json.checksum.txt"));
    assert!(!saved.contains("misc/bad.json"));

    // 下一次运行重新检测到失败的资源
    let retry = local_engine(project.path(), bucket.path())
        .run(SyncMode::Push, false)
        .await
        .unwrap();
    assert_eq!(retry.files_transferred, 1);
    assert!(manifest(project.path()).contains("misc/bad.json"));
}

#[tokio::test]
async fn failed_upload_keeps_previous_checksum() {
    let project = project();
    let bucket = tempfile::tempdir().unwrap();
    write(project.path(), "misc/a.json", b"{}");
    local_engine(project.path(), bucket.path())
        .run(SyncMode::Push, false)
        .await
        .unwrap();

    write(project.path(), "misc/a.json", b"{\"v\": 2}");
    let storage = Arc::new(FailingStorage::new(bucket.path(), &["misc/a.json"]));
    engine(project.path(), storage)
        .run(SyncMode::Push, false)
        .await
        .unwrap();

    assert_eq!(
        manifest(project.path()).get("misc/a.json"),
        Some(checksum(b"{}").as_str())
    );
}

#[tokio::test]
async fn interrupted_run_leaves_manifest_untouched() {
    let project = project();
    let bucket = tempfile::tempdir().unwrap();
    write(project.path(), "misc/a.json", b"{}");
    local_engine(project.path(), bucket.path())
        .run(SyncMode::Push, false)
        .await
        .unwrap();
    let before = fs::read(project.path().join("syncedAssets.json")).unwrap();

    write(project.path(), "misc/b.json", b"[]");
    let engine = local_engine(project.path(), bucket.path());
    let plan = engine.plan(SyncMode::Push).await.unwrap();
    let outcomes = engine.transfer(&plan).await;

    // 传输完成但没有进入提交阶段
    assert!(outcomes.iter().all(|o| o.succeeded()));
    assert_eq!(fs::read(project.path().join("syncedAssets.json")).unwrap(), before);
}

#[tokio::test]
async fn push_then_pull_reproduces_assets() {
    let source = project();
    let bucket = tempfile::tempdir().unwrap();
    write(source.path(), "stickers/vscode/emilia.png", PNG);
    write(source.path(), "screenshots/dark.png", PNG);
    write(source.path(), "misc/themes.json", b"{\"themes\": []}");
    local_engine(source.path(), bucket.path())
        .run(SyncMode::Push, false)
        .await
        .unwrap();

    let target = project();
    fs::copy(
        source.path().join("syncedAssets.json"),
        target.path().join("syncedAssets.json"),
    )
    .unwrap();

    let report = local_engine(target.path(), bucket.path())
        .run(SyncMode::Pull, false)
        .await
        .unwrap();

    assert_eq!(report.files_transferred, 6);
    assert_eq!(report.files_failed, 0);
    for key in [
        "stickers/vscode/emilia.png",
        "stickers/vscode/emilia.png.checksum.txt",
        "screenshots/dark.png",
        "misc/themes.json",
    ] {
        assert_eq!(
            fs::read(target.path().join(key)).unwrap(),
            fs::read(source.path().join(key)).unwrap(),
            "{} differs",
            key
        );
    }
    assert_eq!(
        fs::read(target.path().join("syncedAssets.json")).unwrap(),
        fs::read(source.path().join("syncedAssets.json")).unwrap()
    );

    let again = local_engine(target.path(), bucket.path())
        .run(SyncMode::Pull, false)
        .await
        .unwrap();
    assert_eq!(again.files_transferred, 0);
}

#[tokio::test]
async fn pull_only_downloads_missing_or_different() {
    let source = project();
    let bucket = tempfile::tempdir().unwrap();
    write(source.path(), "misc/same.json", b"{}");
    write(source.path(), "misc/stale.json", b"[1]");
    write(source.path(), "misc/missing.json", b"[2]");
    local_engine(source.path(), bucket.path())
        .run(SyncMode::Push, false)
        .await
        .unwrap();

    let target = project();
    fs::copy(
        source.path().join("syncedAssets.json"),
        target.path().join("syncedAssets.json"),
    )
    .unwrap();
    write(target.path(), "misc/same.json", b"{}");
    write(target.path(), "misc/same.json.checksum.txt", checksum(b"{}").as_bytes());
    write(target.path(), "misc/stale.json", b"[0]");
    write(target.path(), "misc/stale.json.checksum.txt", checksum(b"[1]").as_bytes());
    write(target.path(), "misc/missing.json.checksum.txt", checksum(b"[2]").as_bytes());

    let plan = local_engine(target.path(), bucket.path())
        .plan(SyncMode::Pull)
        .await
        .unwrap();

    let keys: Vec<_> = plan.tasks.iter().map(|t| t.key.as_str()).collect();
    assert_eq!(keys, vec!["misc/missing.json", "misc/stale.json"]);
}

#[tokio::test]
async fn pull_failure_keeps_other_downloads() {
    let source = project();
    let bucket = tempfile::tempdir().unwrap();
    write(source.path(), "misc/a.json", b"{}");
    write(source.path(), "misc/b.json", b"[]");
    local_engine(source.path(), bucket.path())
        .run(SyncMode::Push, false)
        .await
        .unwrap();

    let target = project();
    fs::copy(
        source.path().join("syncedAssets.json"),
        target.path().join("syncedAssets.json"),
    )
    .unwrap();

    let storage = Arc::new(FailingStorage::new(bucket.path(), &["misc/b.json"]));
    let report = engine(target.path(), storage)
        .run(SyncMode::Pull, false)
        .await
        .unwrap();

    assert_eq!(report.files_failed, 1);
    assert_eq!(fs::read(target.path().join("misc/a.json")).unwrap(), b"{}");
    assert!(!target.path().join("misc/b.json").exists());
}

#[tokio::test]
async fn missing_asset_root_fails_before_transfer() {
    let project = project();
    let bucket = tempfile::tempdir().unwrap();
    write(project.path(), "misc/a.json", b"{}");
    fs::remove_dir(project.path().join("screenshots")).unwrap();

    let storage = Arc::new(FailingStorage::new(bucket.path(), &[]));
    let result = engine(project.path(), storage.clone())
        .run(SyncMode::Push, false)
        .await;

    assert!(result.is_err());
    assert_eq!(storage.put_count(), 0);
    assert!(!project.path().join("syncedAssets.json").exists());
}

#[tokio::test]
async fn excluded_files_are_not_synced() {
    let project = project();
    let bucket = tempfile::tempdir().unwrap();
    write(project.path(), "misc/a.json", b"{}");
    write(project.path(), "misc/.DS_Store", b"junk");

    local_engine(project.path(), bucket.path())
        .run(SyncMode::Push, false)
        .await
        .unwrap();

    let saved = manifest(project.path());
    assert!(saved.contains("misc/a.json"));
    assert!(!saved.iter().any(|(k, _)| k.contains(".DS_Store")));
}

#[tokio::test]
async fn pull_replaces_stale_local_file() {
    let source = project();
    let bucket = tempfile::tempdir().unwrap();
    write(source.path(), "misc/themes.json", b"{\"themes\": [\"rem\"]}");
    local_engine(source.path(), bucket.path())
        .run(SyncMode::Push, false)
        .await
        .unwrap();

    let target = project();
    fs::copy(
        source.path().join("syncedAssets.json"),
        target.path().join("syncedAssets.json"),
    )
    .unwrap();
    write(target.path(), "misc/themes.json", b"{\"themes\": []}");
    write(
        target.path(),
        "misc/themes.json.checksum.txt",
        checksum(b"{\"themes\": []}").as_bytes(),
    );

    let report = local_engine(target.path(), bucket.path())
        .run(SyncMode::Pull, false)
        .await
        .unwrap();

    assert_eq!(report.files_transferred, 2);
    assert_eq!(report.files_failed, 0);
    assert_eq!(
        fs::read(target.path().join("misc/themes.json")).unwrap(),
        b"{\"themes\": [\"rem\"]}"
    );
    assert_eq!(
        fs::read_to_string(target.path().join("misc/themes.json.checksum.txt")).unwrap(),
        checksum(b"{\"themes\": [\"rem\"]}")
    );
    assert_eq!(
        fs::read(target.path().join("syncedAssets.json")).unwrap(),
        fs::read(source.path().join("syncedAssets.json")).unwrap()
    );

    // 本地已与清单一致
    let plan = local_engine(target.path(), bucket.path())
        .plan(SyncMode::Pull)
        .await
        .unwrap();
    assert!(plan.tasks.is_empty());
}

#[tokio::test]
async fn leftover_download_temp_files_are_ignored() {
    let project = project();
    let bucket = tempfile::tempdir().unwrap();
    write(project.path(), "misc/a.json", b"{}");
    write(project.path(), "misc/b.json.tmp", b"{\"part");
    write(project.path(), "misc/.b.json.4242.tmp", b"{\"part");

    let report = local_engine(project.path(), bucket.path())
        .run(SyncMode::Push, false)
        .await
        .unwrap();

    assert_eq!(report.files_failed, 0);
    let keys: Vec<_> = manifest(project.path())
        .iter()
        .map(|(k, _)| k.clone())
        .collect();
    assert_eq!(keys, vec!["misc/a.json", "misc/a.json.checksum.txt"]);
    assert!(!project.path().join("misc/b.json.tmp.checksum.txt").exists());
}
