use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

use bili_download_manager::common::logger::PrettyLogger;
use bili_download_manager::config::AppConfig;
use bili_download_manager::engine::{DownloadRequest, EngineConfig, spawn_engine};
use bili_download_manager::merge::merger::MediaMerger;
use bili_download_manager::task::models::TaskStatus;
use bili_download_manager::transfer::aria2::Aria2Client;

mod cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let args = cli::Cli::parse();
    let mut config = AppConfig::load(&args.config).context("加载配置失败")?;
    if let Some(dir) = args.output_dir {
        config.download.path = dir;
    }
    if let Some(url) = args.rpc_url {
        config.aria2.rpc_url = url;
    }

    // 读取解析端生成的下载清单
    let manifest = tokio::fs::read_to_string(&args.manifest)
        .await
        .context("读取下载清单失败")?;
    let requests: Vec<DownloadRequest> =
        serde_json::from_str(&manifest).context("下载清单格式错误")?;
    if requests.is_empty() {
        PrettyLogger::error("下载清单为空");
        return Ok(());
    }

    tokio::fs::create_dir_all(&config.download.path)
        .await
        .context("创建下载目录失败")?;

    // 两个外部协作进程的边界对象
    let client = Arc::new(Aria2Client::new(
        &config.aria2.rpc_url,
        config.aria2.secret.clone(),
        config.transfer_headers(),
        config.proxy_url(),
    )?);
    let muxer = Arc::new(MediaMerger::new(&config.ffmpeg_path));
    muxer.check_available().await?;

    let (handle, join) = spawn_engine(
        client,
        muxer,
        EngineConfig {
            download_dir: config.download.path.clone(),
            poll_interval: Duration::from_millis(config.aria2.poll_interval_ms),
        },
    );

    info!("提交 {} 个下载请求", requests.len());
    for request in requests {
        handle.submit(request).await?;
    }

    // 轮询快照渲染总进度，直到所有任务到达终态
    let progress = ProgressBar::new(0);
    progress.set_style(
        ProgressStyle::with_template(
            "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg}",
        )
        .unwrap()
        .progress_chars("#>-"),
    );
    loop {
        tokio::time::sleep(Duration::from_millis(500)).await;
        let views = handle.snapshot().await?;
        let downloaded: u64 = views.iter().map(|v| v.downloaded).sum();
        let total: u64 = views.iter().map(|v| v.total_size).sum();
        progress.set_length(total.max(1));
        progress.set_position(downloaded);

        let active = views
            .iter()
            .filter(|v| !matches!(v.status, TaskStatus::Complete | TaskStatus::Error))
            .count();
        progress.set_message(format!("剩余 {} 个任务", active));
        if active == 0 {
            break;
        }
    }
    progress.finish_and_clear();

    let views = handle.snapshot().await?;
    PrettyLogger::separator();
    PrettyLogger::task_summary(&views);
    PrettyLogger::separator();

    let failed = views
        .iter()
        .filter(|v| v.status == TaskStatus::Error)
        .count();
    if failed > 0 {
        PrettyLogger::error(format!("{} 个任务失败，可检查日志后重试", failed));
    } else {
        PrettyLogger::success("全部任务完成");
    }

    if args.auto_clear {
        let cleared = handle.clear_completed().await?;
        info!("已自动清除 {} 条任务记录", cleared);
    }

    handle.shutdown();
    let _ = join.await;

    if failed > 0 {
        std::process::exit(1);
    }
    Ok(())
}
