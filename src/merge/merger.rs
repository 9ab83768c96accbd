use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, error, info};

use super::Muxer;
use super::error::MergeError;

/// 外部 ffmpeg 封装：视频流直接拷贝，音频转 AAC
pub struct MediaMerger {
    ffmpeg: PathBuf,
}

impl MediaMerger {
    pub fn new(ffmpeg: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
        }
    }

    /// 检查 ffmpeg 是否可用
    pub async fn check_available(&self) -> Result<(), MergeError> {
        let status = Command::new(&self.ffmpeg)
            .arg("-version")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;
        match status {
            Ok(s) if s.success() => Ok(()),
            _ => {
                error!("❌ 未检测到 ffmpeg: {:?}", self.ffmpeg);
                error!("安装方法参考：https://ffmpeg.org/download.html");
                Err(MergeError::FfmpegNotFound)
            }
        }
    }
}

#[async_trait]
impl Muxer for MediaMerger {
    async fn merge_av(
        &self,
        video_path: &Path,
        audio_path: &Path,
        output_path: &Path,
    ) -> Result<(), MergeError> {
        if !video_path.exists() {
            return Err(MergeError::FileNotFound(video_path.to_path_buf()));
        }
        if !audio_path.exists() {
            return Err(MergeError::FileNotFound(audio_path.to_path_buf()));
        }

        debug!("开始合并视频和音频 -> 输出路径: {:?}", output_path);

        let output = Command::new(&self.ffmpeg)
            .arg("-i")
            .arg(video_path)
            .arg("-i")
            .arg(audio_path)
            .arg("-c:v")
            .arg("copy")
            .arg("-c:a")
            .arg("aac")
            .arg("-y") // 自动覆盖
            .arg(output_path)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .await?;

        if !output.status.success() {
            let err_msg = String::from_utf8_lossy(&output.stderr);
            error!("❌ ffmpeg 合并失败，错误日志如下：\n{}", err_msg);
            return Err(MergeError::Ffmpeg(err_msg.to_string()));
        }

        info!("✅ 视频与音频合并成功，输出文件: {:?}", output_path);
        Ok(())
    }
}
