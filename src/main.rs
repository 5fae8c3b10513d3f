use anyhow::{Context, Result};
use assetsync_lib::config::CONFIG_FILE_NAME;
use assetsync_lib::logging::init_logging;
use assetsync_lib::storage::create_storage;
use assetsync_lib::{AssetSyncConfig, SyncContext, SyncEngine, SyncMode};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "assetsync", version, about = "主题资源与对象存储的增量同步")]
struct Cli {
    /// 项目根目录
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,

    /// 配置文件，默认为 <root>/assetsync.json
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// 使用本地目录代替远程存储桶
    #[arg(long, global = true, value_name = "DIR")]
    local_bucket: Option<PathBuf>,

    /// 输出更多日志 (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// 上传新增或变化的本地资源
    Push {
        /// 只显示需要传输的资源
        #[arg(long)]
        dry_run: bool,
    },
    /// 下载本地缺失或不同的资源
    Pull {
        #[arg(long)]
        dry_run: bool,
    },
    /// 列出本地资源及同步状态
    Scan,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let root = std::path::absolute(&cli.root)
        .with_context(|| format!("无法解析项目根目录: {:?}", cli.root))?;
    let config_file = cli
        .config
        .clone()
        .unwrap_or_else(|| root.join(CONFIG_FILE_NAME));
    let config = AssetSyncConfig::load(&config_file)?;

    init_logging(&config.log, cli.verbose);
    tracing::debug!("项目根目录: {:?}, 配置文件: {:?}", root, config_file);

    let storage = create_storage(&config, cli.local_bucket.as_deref())?;
    let engine = SyncEngine::new(SyncContext::new(root, config, storage));

    let (mode, dry_run) = match cli.command {
        Command::Push { dry_run } => (SyncMode::Push, dry_run),
        Command::Pull { dry_run } => (SyncMode::Pull, dry_run),
        Command::Scan => {
            let assets = engine.list_assets().await?;
            let pending = assets.iter().filter(|a| !a.synced).count();
            for asset in &assets {
                let state = if asset.synced { "synced" } else { "pending" };
                println!("{}  {:<8} {}", asset.checksum, state, asset.key);
            }
            println!("{} 个资源, {} 个待同步", assets.len(), pending);
            return Ok(());
        }
    };

    let report = engine.run(mode, dry_run).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);

    if report.files_failed > 0 {
        tracing::warn!("{} 个资源同步失败，将在下次运行时重试", report.files_failed);
    }

    Ok(())
}
