//! 传输适配层：向外部下载器下发指令，并把它的异步状态
//! 归一化成引擎事件。引擎只依赖 TransferClient 的形状，
//! 不依赖任何具体传输协议

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub mod aria2;
pub mod error;

pub use error::TransferError;

/// 外部下载器侧的传输状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoteStatus {
    Active,
    Waiting,
    Paused,
    Complete,
    Error,
    Removed,
}

/// 一次状态查询返回的传输快照
#[derive(Debug, Clone)]
pub struct TransferSnapshot {
    pub gid: String,
    pub status: RemoteStatus,
    pub downloaded: u64,
    pub total: u64,
    pub error_message: Option<String>,
}

/// 外部下载器的指令边界
#[async_trait]
pub trait TransferClient: Send + Sync {
    /// 发起传输，返回下载器分配的传输标识 gid
    async fn start(
        &self,
        url: &str,
        dir: &Path,
        file_name: &str,
    ) -> Result<String, TransferError>;

    async fn pause(&self, gid: &str) -> Result<(), TransferError>;

    async fn resume(&self, gid: &str) -> Result<(), TransferError>;

    async fn remove(&self, gid: &str) -> Result<(), TransferError>;

    /// 查询单个传输的进度快照
    async fn tell_status(&self, gid: &str) -> Result<TransferSnapshot, TransferError>;
}

/// 归一化后的传输事件，泵按远端产生顺序送入引擎
#[derive(Debug, Clone)]
pub enum TransferEvent {
    Progress {
        gid: String,
        downloaded: u64,
        total: u64,
    },
    Completed {
        gid: String,
    },
    Failed {
        gid: String,
        reason: String,
    },
}

/// 传输适配器：登记 gid、下发指令、驱动轮询泵。
/// 对已完结或未知 gid 的操作静默处理，只记日志
pub struct TransferAdapter {
    client: Arc<dyn TransferClient>,
    // gid -> 是否已发出终态事件
    registry: Arc<DashMap<String, bool>>,
    event_tx: mpsc::UnboundedSender<TransferEvent>,
}

impl TransferAdapter {
    pub fn new(
        client: Arc<dyn TransferClient>,
        event_tx: mpsc::UnboundedSender<TransferEvent>,
    ) -> Self {
        Self {
            client,
            registry: Arc::new(DashMap::new()),
            event_tx,
        }
    }

    /// 发起传输并登记返回的 gid
    pub async fn start_transfer(
        &self,
        url: &str,
        dir: &Path,
        file_name: &str,
    ) -> Result<String, TransferError> {
        let gid = self.client.start(url, dir, file_name).await?;
        self.registry.insert(gid.clone(), false);
        debug!("传输已受理: gid={}, file={}", gid, file_name);
        Ok(gid)
    }

    pub async fn pause(&self, gid: &str) {
        if let Err(e) = self.client.pause(gid).await {
            warn!("暂停传输失败: gid={}, {}", gid, e);
        }
    }

    pub async fn resume(&self, gid: &str) {
        if let Err(e) = self.client.resume(gid).await {
            warn!("恢复传输失败: gid={}, {}", gid, e);
        }
    }

    /// 注销传输。对已完成或不存在的 gid 同样安全：
    /// 远端报错只记日志，本地登记总是被清除
    pub async fn remove(&self, gid: &str) {
        self.registry.remove(gid);
        if let Err(e) = self.client.remove(gid).await {
            debug!("注销传输时下载器报错（忽略）: gid={}, {}", gid, e);
        }
    }

    /// gid 是否仍在适配器登记中
    pub fn is_registered(&self, gid: &str) -> bool {
        self.registry.contains_key(gid)
    }

    /// 启动轮询泵：按固定间隔查询在册且未完结的 gid，
    /// 把远端状态翻译成事件。每个 gid 的终态事件只发一次
    pub fn spawn_poll_pump(
        &self,
        interval: Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        let client = Arc::clone(&self.client);
        let registry = Arc::clone(&self.registry);
        let event_tx = self.event_tx.clone();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                let pending: Vec<String> = registry
                    .iter()
                    .filter(|entry| !*entry.value())
                    .map(|entry| entry.key().clone())
                    .collect();

                for gid in pending {
                    let snapshot = match client.tell_status(&gid).await {
                        Ok(s) => s,
                        Err(e) => {
                            debug!("查询传输状态失败: gid={}, {}", gid, e);
                            continue;
                        }
                    };

                    let event = match snapshot.status {
                        RemoteStatus::Complete => {
                            mark_finished(&registry, &gid);
                            Some(TransferEvent::Completed { gid: gid.clone() })
                        }
                        RemoteStatus::Error => {
                            mark_finished(&registry, &gid);
                            Some(TransferEvent::Failed {
                                gid: gid.clone(),
                                reason: snapshot
                                    .error_message
                                    .unwrap_or_else(|| "未知传输错误".to_string()),
                            })
                        }
                        // 移除总是由引擎主动发起，这里不再重复上报
                        RemoteStatus::Removed => {
                            mark_finished(&registry, &gid);
                            None
                        }
                        RemoteStatus::Active | RemoteStatus::Waiting | RemoteStatus::Paused => {
                            Some(TransferEvent::Progress {
                                gid: gid.clone(),
                                downloaded: snapshot.downloaded,
                                total: snapshot.total,
                            })
                        }
                    };

                    if let Some(event) = event {
                        // 引擎退出后事件无人接收，泵一并退出
                        if event_tx.send(event).is_err() {
                            return;
                        }
                    }
                }
            }
        })
    }
}

fn mark_finished(registry: &DashMap<String, bool>, gid: &str) {
    if let Some(mut entry) = registry.get_mut(gid) {
        *entry.value_mut() = true;
    }
}
