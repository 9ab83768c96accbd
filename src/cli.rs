use clap::Parser;
use std::path::PathBuf;

/// B站视频下载管理器
#[derive(Parser, Debug)]
#[command(name = "bilidm")]
#[command(version = "0.1")]
#[command(author = "rpeng252@gmail.com")]
#[command(about = "B站视频下载任务管理引擎 (aria2 传输 + ffmpeg 合并)", long_about = None)]
pub struct Cli {
    /// 下载清单文件 (JSON，由解析端生成)
    #[arg(value_name = "MANIFEST")]
    #[arg(value_hint = clap::ValueHint::FilePath)]
    pub manifest: PathBuf,

    /// 配置文件路径
    #[arg(long, value_name = "FILE")]
    #[arg(default_value = "config.json")]
    #[arg(value_hint = clap::ValueHint::FilePath)]
    pub config: PathBuf,

    /// 视频保存目录 (覆盖配置文件)
    #[arg(long, value_name = "DIR")]
    #[arg(value_hint = clap::ValueHint::DirPath)]
    pub output_dir: Option<PathBuf>,

    /// aria2 RPC 地址 (覆盖配置文件)
    #[arg(long, value_name = "URL")]
    #[arg(value_hint = clap::ValueHint::Url)]
    pub rpc_url: Option<String>,

    /// 全部完成后自动清除已完成任务记录
    #[arg(long, default_value_t = false)]
    pub auto_clear: bool,
}
