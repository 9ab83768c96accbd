//! 运行配置。任务记录只存活于进程内，这里持久化的是
//! 下载目录、外部进程地址等设置

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("读取配置文件失败: {0}")]
    Io(#[from] std::io::Error),
    #[error("配置文件格式错误: {0}")]
    Parse(#[from] serde_json::Error),
}

/// 下载设置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadSettings {
    pub path: PathBuf,
    /// 视频清晰度: 116=4K, 80=1080P, 64=720P, 32=480P, 16=360P
    pub video_quality: u32,
    /// 音频码率档位
    pub audio_quality: u32,
}

impl Default for DownloadSettings {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./downloads"),
            video_quality: 80,
            audio_quality: 30280,
        }
    }
}

/// aria2 RPC 设置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Aria2Settings {
    pub rpc_url: String,
    pub secret: Option<String>,
    /// 进度轮询间隔（毫秒）
    pub poll_interval_ms: u64,
}

impl Default for Aria2Settings {
    fn default() -> Self {
        Self {
            rpc_url: "http://127.0.0.1:6800/jsonrpc".to_string(),
            secret: None,
            poll_interval_ms: 500,
        }
    }
}

/// 代理设置，原样转交给外部下载器
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxySettings {
    pub enable: bool,
    pub url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub download: DownloadSettings,
    pub aria2: Aria2Settings,
    pub proxy: ProxySettings,
    pub ffmpeg_path: PathBuf,
    /// 登录态 Cookie，附加到每笔传输的请求头上
    pub cookie_string: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            download: DownloadSettings::default(),
            aria2: Aria2Settings::default(),
            proxy: ProxySettings::default(),
            ffmpeg_path: PathBuf::from("ffmpeg"),
            cookie_string: None,
        }
    }
}

impl AppConfig {
    /// 从 JSON 文件加载，文件不存在时使用默认配置
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    /// 附加到每笔传输上的请求头。Referer 必带，
    /// Cookie 按配置附加
    pub fn transfer_headers(&self) -> Vec<String> {
        let mut headers = vec!["Referer: https://www.bilibili.com".to_string()];
        if let Some(cookie) = &self.cookie_string {
            if !cookie.is_empty() {
                headers.push(format!("Cookie: {}", cookie));
            }
        }
        headers
    }

    /// 启用代理时的代理地址
    pub fn proxy_url(&self) -> Option<String> {
        if self.proxy.enable {
            self.proxy.url.clone()
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_uses_defaults() {
        let raw = r#"{
            "download": { "path": "/data/videos" },
            "aria2": { "secret": "s3cret" }
        }"#;
        let config: AppConfig = serde_json::from_str(raw).unwrap();
        assert_eq!(config.download.path, PathBuf::from("/data/videos"));
        assert_eq!(config.download.video_quality, 80);
        assert_eq!(config.aria2.secret.as_deref(), Some("s3cret"));
        assert_eq!(config.aria2.poll_interval_ms, 500);
        assert!(config.proxy_url().is_none());
    }

    #[test]
    fn test_transfer_headers_include_cookie() {
        let mut config = AppConfig::default();
        assert_eq!(config.transfer_headers().len(), 1);

        config.cookie_string = Some("SESSDATA=abc".to_string());
        let headers = config.transfer_headers();
        assert_eq!(headers.len(), 2);
        assert!(headers[1].starts_with("Cookie: SESSDATA"));
    }

    #[test]
    fn test_proxy_url_requires_enable() {
        let mut config = AppConfig::default();
        config.proxy.url = Some("socks5://127.0.0.1:1080".to_string());
        assert!(config.proxy_url().is_none());

        config.proxy.enable = true;
        assert_eq!(
            config.proxy_url().as_deref(),
            Some("socks5://127.0.0.1:1080")
        );
    }
}
