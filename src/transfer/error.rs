use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("RPC请求失败: {0}")]
    Rpc(#[from] reqwest::Error),
    #[error("无效的RPC地址: {0}")]
    InvalidEndpoint(String),
    #[error("RPC响应格式错误: {0}")]
    InvalidResponse(String),
    #[error("下载器返回错误: {0}")]
    Remote(String),
}
