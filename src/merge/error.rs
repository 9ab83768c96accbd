use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MergeError {
    #[error("未检测到 ffmpeg，请确认已安装并配置了可执行路径")]
    FfmpegNotFound,
    #[error("文件不存在: {0}")]
    FileNotFound(PathBuf),
    #[error("ffmpeg 合并失败: {0}")]
    Ffmpeg(String),
    #[error("IO错误: {0}")]
    Io(#[from] std::io::Error),
}
