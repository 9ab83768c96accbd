//! aria2 JSON-RPC 客户端。协议细节只存在于这个文件，
//! 引擎其余部分通过 TransferClient 使用它

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::debug;
use url::Url;

use super::error::TransferError;
use super::{RemoteStatus, TransferClient, TransferSnapshot};

pub struct Aria2Client {
    http: reqwest::Client,
    endpoint: Url,
    secret: Option<String>,
    request_id: AtomicU64,
    /// 附加到每个传输上的请求头（Referer、Cookie 等）
    headers: Vec<String>,
    /// 转交给下载器的代理地址
    proxy: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

// aria2 的数值字段以字符串返回
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatusResult {
    gid: String,
    status: RemoteStatus,
    completed_length: String,
    total_length: String,
    error_message: Option<String>,
}

impl Aria2Client {
    pub fn new(
        endpoint: &str,
        secret: Option<String>,
        headers: Vec<String>,
        proxy: Option<String>,
    ) -> Result<Self, TransferError> {
        let endpoint = Url::parse(endpoint)
            .map_err(|e| TransferError::InvalidEndpoint(format!("{}: {}", endpoint, e)))?;
        Ok(Self {
            http: reqwest::Client::new(),
            endpoint,
            secret,
            request_id: AtomicU64::new(1),
            headers,
            proxy,
        })
    }

    async fn call<T>(&self, method: &str, params: Vec<Value>) -> Result<T, TransferError>
    where
        T: for<'de> Deserialize<'de>,
    {
        // 密钥作为首个参数传入
        let mut full_params: Vec<Value> = self
            .secret
            .iter()
            .map(|s| Value::String(format!("token:{}", s)))
            .collect();
        full_params.extend(params);

        let id = self.request_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "id": id.to_string(),
            "method": method,
            "params": full_params,
        });
        debug!("aria2 调用: {} (id={})", method, id);

        let response: RpcResponse<T> = self
            .http
            .post(self.endpoint.clone())
            .json(&body)
            .send()
            .await?
            .json()
            .await?;

        if let Some(err) = response.error {
            return Err(TransferError::Remote(format!(
                "{} (code={})",
                err.message, err.code
            )));
        }
        response
            .result
            .ok_or_else(|| TransferError::InvalidResponse("缺少 result 字段".to_string()))
    }
}

#[async_trait]
impl TransferClient for Aria2Client {
    async fn start(
        &self,
        url: &str,
        dir: &Path,
        file_name: &str,
    ) -> Result<String, TransferError> {
        let mut options = json!({
            "dir": dir.to_string_lossy(),
            "out": file_name,
        });
        if !self.headers.is_empty() {
            options["header"] = json!(self.headers);
        }
        if let Some(proxy) = &self.proxy {
            options["all-proxy"] = json!(proxy);
        }
        self.call("aria2.addUri", vec![json!([url]), options]).await
    }

    async fn pause(&self, gid: &str) -> Result<(), TransferError> {
        let _: String = self.call("aria2.pause", vec![json!(gid)]).await?;
        Ok(())
    }

    async fn resume(&self, gid: &str) -> Result<(), TransferError> {
        let _: String = self.call("aria2.unpause", vec![json!(gid)]).await?;
        Ok(())
    }

    async fn remove(&self, gid: &str) -> Result<(), TransferError> {
        // 进行中的传输用 remove；已完结的记录用 removeDownloadResult 清理
        if self
            .call::<String>("aria2.remove", vec![json!(gid)])
            .await
            .is_ok()
        {
            return Ok(());
        }
        let _: String = self
            .call("aria2.removeDownloadResult", vec![json!(gid)])
            .await?;
        Ok(())
    }

    async fn tell_status(&self, gid: &str) -> Result<TransferSnapshot, TransferError> {
        let keys = json!(["gid", "status", "completedLength", "totalLength", "errorMessage"]);
        let result: StatusResult = self
            .call("aria2.tellStatus", vec![json!(gid), keys])
            .await?;
        Ok(TransferSnapshot {
            gid: result.gid,
            status: result.status,
            downloaded: parse_length(&result.completed_length)?,
            total: parse_length(&result.total_length)?,
            error_message: result.error_message,
        })
    }
}

fn parse_length(raw: &str) -> Result<u64, TransferError> {
    raw.parse()
        .map_err(|_| TransferError::InvalidResponse(format!("无法解析字节数: {}", raw)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_result_parsing() {
        let raw = r#"{
            "gid": "2089b05ecca3d829",
            "status": "active",
            "completedLength": "34896138",
            "totalLength": "34896138",
            "errorMessage": null
        }"#;
        let parsed: StatusResult = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.gid, "2089b05ecca3d829");
        assert_eq!(parsed.status, RemoteStatus::Active);
        assert_eq!(parse_length(&parsed.completed_length).unwrap(), 34896138);
    }

    #[test]
    fn test_error_response_surfaced() {
        let raw = r#"{"id":"1","jsonrpc":"2.0","error":{"code":1,"message":"GID not found"}}"#;
        let parsed: RpcResponse<String> = serde_json::from_str(raw).unwrap();
        let err = parsed.error.unwrap();
        assert_eq!(err.code, 1);
        assert_eq!(err.message, "GID not found");
    }

    #[test]
    fn test_invalid_length_rejected() {
        assert!(parse_length("abc").is_err());
    }
}
