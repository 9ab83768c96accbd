//! 任务编排引擎：单写者事件循环。
//! 任务表的所有变更都发生在 run 循环里，展示层指令与
//! 外部进程的回调只能通过通道进入，天然串行化，
//! 不需要额外的锁纪律

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::merge::{MergeCoordinator, MergeEvent, Muxer};
use crate::task::models::{
    MergeState, PageTask, StreamKind, StreamTask, Task, TaskStatus, VideoTask,
};
use crate::task::projection::{VideoTaskView, completed_video_ids, snapshot};
use crate::task::reducer::{StreamEvent, apply_stream_event};
use crate::task::store::TaskStore;
use crate::transfer::{TransferAdapter, TransferClient, TransferEvent};

/// 下载请求：由上游解析端产出（标题 + 各分P的两路流地址）
#[derive(Debug, Clone, Deserialize)]
pub struct DownloadRequest {
    pub title: String,
    #[serde(default)]
    pub uploader: Option<String>,
    pub pages: Vec<PageRequest>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PageRequest {
    pub title: String,
    pub video_url: String,
    pub audio_url: String,
    /// 输出文件名（不含目录与扩展名），缺省由标题生成
    #[serde(default)]
    pub file_name: Option<String>,
}

/// 引擎配置
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub download_dir: PathBuf,
    pub poll_interval: Duration,
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("引擎已停止")]
    Closed,
}

/// 展示层指令。破坏性操作（清除已完成）的确认交互
/// 由展示层负责，引擎只提供预览与执行
enum EngineCommand {
    Submit {
        request: DownloadRequest,
        reply: oneshot::Sender<String>,
    },
    Pause {
        task_id: String,
    },
    Resume {
        task_id: String,
    },
    Remove {
        task_id: String,
    },
    Retry {
        task_id: String,
    },
    ClearCompleted {
        reply: oneshot::Sender<usize>,
    },
    CompletedTasks {
        reply: oneshot::Sender<Vec<String>>,
    },
    Snapshot {
        reply: oneshot::Sender<Vec<VideoTaskView>>,
    },
    Shutdown,
}

/// gid 到流位置的路由条目
struct StreamRef {
    page_id: String,
    kind: StreamKind,
}

/// 引擎句柄：展示层与引擎交互的唯一入口
#[derive(Clone)]
pub struct EngineHandle {
    cmd_tx: mpsc::UnboundedSender<EngineCommand>,
}

impl EngineHandle {
    fn send(&self, cmd: EngineCommand) -> Result<(), EngineError> {
        self.cmd_tx.send(cmd).map_err(|_| EngineError::Closed)
    }

    /// 受理一个下载请求，返回主任务标识
    pub async fn submit(&self, request: DownloadRequest) -> Result<String, EngineError> {
        let (tx, rx) = oneshot::channel();
        self.send(EngineCommand::Submit { request, reply: tx })?;
        rx.await.map_err(|_| EngineError::Closed)
    }

    pub fn pause(&self, task_id: &str) -> Result<(), EngineError> {
        self.send(EngineCommand::Pause {
            task_id: task_id.to_string(),
        })
    }

    pub fn resume(&self, task_id: &str) -> Result<(), EngineError> {
        self.send(EngineCommand::Resume {
            task_id: task_id.to_string(),
        })
    }

    pub fn remove(&self, task_id: &str) -> Result<(), EngineError> {
        self.send(EngineCommand::Remove {
            task_id: task_id.to_string(),
        })
    }

    /// 重试失败的传输或合并
    pub fn retry(&self, task_id: &str) -> Result<(), EngineError> {
        self.send(EngineCommand::Retry {
            task_id: task_id.to_string(),
        })
    }

    /// 清除所有已完成的主任务，返回删掉的任务条目数
    pub async fn clear_completed(&self) -> Result<usize, EngineError> {
        let (tx, rx) = oneshot::channel();
        self.send(EngineCommand::ClearCompleted { reply: tx })?;
        rx.await.map_err(|_| EngineError::Closed)
    }

    /// 已完成主任务标识（清除前的预览/计数来源）
    pub async fn completed_tasks(&self) -> Result<Vec<String>, EngineError> {
        let (tx, rx) = oneshot::channel();
        self.send(EngineCommand::CompletedTasks { reply: tx })?;
        rx.await.map_err(|_| EngineError::Closed)
    }

    /// 按展示顺序取任务快照
    pub async fn snapshot(&self) -> Result<Vec<VideoTaskView>, EngineError> {
        let (tx, rx) = oneshot::channel();
        self.send(EngineCommand::Snapshot { reply: tx })?;
        rx.await.map_err(|_| EngineError::Closed)
    }

    pub fn shutdown(&self) {
        let _ = self.cmd_tx.send(EngineCommand::Shutdown);
    }
}

/// 启动引擎：装配适配器、轮询泵与合并协调器，
/// 并把事件循环挂到后台任务上
pub fn spawn_engine(
    client: Arc<dyn TransferClient>,
    muxer: Arc<dyn Muxer>,
    config: EngineConfig,
) -> (EngineHandle, JoinHandle<()>) {
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    let (transfer_tx, transfer_rx) = mpsc::unbounded_channel();
    let (merge_tx, merge_rx) = mpsc::unbounded_channel();
    let shutdown = CancellationToken::new();

    let adapter = TransferAdapter::new(client, transfer_tx);
    // 轮询泵随引擎退出时的取消令牌一起结束，句柄不再单独持有
    let _ = adapter.spawn_poll_pump(config.poll_interval, shutdown.clone());
    let coordinator = MergeCoordinator::new(muxer, merge_tx);

    let engine = TaskEngine {
        store: TaskStore::new(),
        gid_routes: HashMap::new(),
        adapter,
        coordinator,
        config,
        cmd_rx,
        transfer_rx,
        merge_rx,
        shutdown,
    };
    let handle = EngineHandle { cmd_tx };
    let join = tokio::spawn(engine.run());
    (handle, join)
}

pub struct TaskEngine {
    store: TaskStore,
    gid_routes: HashMap<String, StreamRef>,
    adapter: TransferAdapter,
    coordinator: MergeCoordinator,
    config: EngineConfig,
    cmd_rx: mpsc::UnboundedReceiver<EngineCommand>,
    transfer_rx: mpsc::UnboundedReceiver<TransferEvent>,
    merge_rx: mpsc::UnboundedReceiver<MergeEvent>,
    shutdown: CancellationToken,
}

impl TaskEngine {
    async fn run(mut self) {
        info!("任务引擎已启动");
        loop {
            tokio::select! {
                Some(cmd) = self.cmd_rx.recv() => {
                    if matches!(cmd, EngineCommand::Shutdown) {
                        break;
                    }
                    self.handle_command(cmd).await;
                }
                Some(event) = self.transfer_rx.recv() => {
                    self.handle_transfer_event(event);
                }
                Some(event) = self.merge_rx.recv() => {
                    self.handle_merge_event(event);
                }
                else => break,
            }
        }
        self.shutdown.cancel();
        info!("任务引擎已退出");
    }

    async fn handle_command(&mut self, cmd: EngineCommand) {
        match cmd {
            EngineCommand::Submit { request, reply } => {
                let video_id = self.handle_submit(request).await;
                let _ = reply.send(video_id);
            }
            EngineCommand::Pause { task_id } => self.handle_pause(&task_id).await,
            EngineCommand::Resume { task_id } => self.handle_resume(&task_id).await,
            EngineCommand::Remove { task_id } => self.handle_remove(&task_id).await,
            EngineCommand::Retry { task_id } => self.handle_retry(&task_id).await,
            EngineCommand::ClearCompleted { reply } => {
                let cleared = self.handle_clear_completed().await;
                let _ = reply.send(cleared);
            }
            EngineCommand::CompletedTasks { reply } => {
                let _ = reply.send(completed_video_ids(&self.store));
            }
            EngineCommand::Snapshot { reply } => {
                let _ = reply.send(snapshot(&self.store));
            }
            EngineCommand::Shutdown => {}
        }
    }

    /// 受理下载请求：主任务与全部分P一起建档，
    /// 随后为每个分P发起两路传输
    async fn handle_submit(&mut self, request: DownloadRequest) -> String {
        let mut video = VideoTask::new(&request.title, request.uploader.clone());
        let video_id = video.id.clone();

        let dir = &self.config.download_dir;
        let mut pages = Vec::with_capacity(request.pages.len());
        for (seq, page_req) in request.pages.iter().enumerate() {
            let base = page_req
                .file_name
                .clone()
                .unwrap_or_else(|| format!("{}_P{}", request.title, seq + 1));
            let base = sanitize_file_name(&base);
            let task_video =
                StreamTask::new(&page_req.video_url, dir.join(format!("{}.video.m4s", base)));
            let task_audio =
                StreamTask::new(&page_req.audio_url, dir.join(format!("{}.audio.m4s", base)));
            let output_path = dir.join(format!("{}.mp4", base));
            pages.push(PageTask::new(
                &video_id,
                &page_req.title,
                task_video,
                task_audio,
                output_path,
            ));
        }
        video.pages = pages.iter().map(|p| p.id.clone()).collect();
        let page_ids = video.pages.clone();

        // 任务标识为 uuid，重复只可能是编程错误
        if let Err(e) = self.store.create_task(Task::Video(video)) {
            warn!("登记主任务失败: {}", e);
            return video_id;
        }
        for page in pages {
            if let Err(e) = self.store.create_task(Task::VideoPage(page)) {
                warn!("登记分P任务失败: {}", e);
            }
        }
        info!(
            "已受理下载请求: << {} >> ({} 个分P)",
            request.title,
            page_ids.len()
        );

        for page_id in &page_ids {
            self.start_stream(page_id, StreamKind::Video).await;
            self.start_stream(page_id, StreamKind::Audio).await;
        }
        video_id
    }

    /// 为某一路流发起传输。受理成功即视为进入下载中
    async fn start_stream(&mut self, page_id: &str, kind: StreamKind) {
        let (url, file_path) = match self.store.get_page(page_id) {
            Some(page) => {
                let stream = page.stream(kind);
                if stream.status != TaskStatus::Queued {
                    return;
                }
                (stream.url.clone(), stream.file_path.clone())
            }
            None => return,
        };
        let file_name = file_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        match self
            .adapter
            .start_transfer(&url, &self.config.download_dir, &file_name)
            .await
        {
            Ok(gid) => {
                let Some(page) = self.store.get_page_mut(page_id) else {
                    // 受理完成前任务已被移除，立即注销这笔传输
                    self.adapter.remove(&gid).await;
                    return;
                };
                let stream = page.stream_mut(kind);
                stream.gid = Some(gid.clone());
                apply_stream_event(stream, &StreamEvent::StartAcked);
                debug!("{}已受理: page={}, gid={}", kind.label(), page_id, gid);
                self.gid_routes.insert(
                    gid,
                    StreamRef {
                        page_id: page_id.to_string(),
                        kind,
                    },
                );
            }
            Err(e) => {
                warn!("发起{}传输失败: page={}, {}", kind.label(), page_id, e);
                if let Some(page) = self.store.get_page_mut(page_id) {
                    let reason = e.to_string();
                    page.fail_reason = Some(reason.clone());
                    apply_stream_event(page.stream_mut(kind), &StreamEvent::Failed { reason });
                }
            }
        }
    }

    /// 指令目标可以是主任务（作用到所有分P）或单个分P
    fn resolve_pages(&self, task_id: &str) -> Vec<String> {
        if let Some(video) = self.store.get_video(task_id) {
            return video.pages.clone();
        }
        if self.store.get_page(task_id).is_some() {
            return vec![task_id.to_string()];
        }
        debug!("指令目标任务不存在: {}", task_id);
        Vec::new()
    }

    async fn handle_pause(&mut self, task_id: &str) {
        for page_id in self.resolve_pages(task_id) {
            let targets: Vec<(StreamKind, String)> = match self.store.get_page(&page_id) {
                Some(page) => [StreamKind::Video, StreamKind::Audio]
                    .into_iter()
                    .filter_map(|kind| {
                        let stream = page.stream(kind);
                        if stream.status != TaskStatus::Downloading {
                            return None;
                        }
                        stream.gid.clone().map(|gid| (kind, gid))
                    })
                    .collect(),
                None => continue,
            };
            join_all(targets.iter().map(|(_, gid)| self.adapter.pause(gid))).await;
            if let Some(page) = self.store.get_page_mut(&page_id) {
                for (kind, _) in &targets {
                    apply_stream_event(page.stream_mut(*kind), &StreamEvent::PauseRequested);
                }
            }
        }
    }

    async fn handle_resume(&mut self, task_id: &str) {
        for page_id in self.resolve_pages(task_id) {
            let targets: Vec<(StreamKind, String)> = match self.store.get_page(&page_id) {
                Some(page) => [StreamKind::Video, StreamKind::Audio]
                    .into_iter()
                    .filter_map(|kind| {
                        let stream = page.stream(kind);
                        if stream.status != TaskStatus::Paused {
                            return None;
                        }
                        stream.gid.clone().map(|gid| (kind, gid))
                    })
                    .collect(),
                None => continue,
            };
            join_all(targets.iter().map(|(_, gid)| self.adapter.resume(gid))).await;
            if let Some(page) = self.store.get_page_mut(&page_id) {
                for (kind, _) in &targets {
                    apply_stream_event(page.stream_mut(*kind), &StreamEvent::ResumeRequested);
                }
            }
        }
    }

    /// 移除任务。先向下级联：注销传输 -> 删分P -> 删主任务。
    /// 对不存在的标识幂等
    async fn handle_remove(&mut self, task_id: &str) {
        if let Some(video) = self.store.get_video(task_id) {
            let page_ids = video.pages.clone();
            for page_id in &page_ids {
                self.remove_page_entry(page_id).await;
            }
            self.store.remove_task(task_id);
            info!("已移除主任务: {}", task_id);
        } else if let Some(page) = self.store.get_page(task_id) {
            let parent_id = page.parent_id.clone();
            self.remove_page_entry(task_id).await;
            // 从父任务摘除；最后一个分P移除后主任务一并删除
            if let Some(video) = self.store.get_video_mut(&parent_id) {
                video.pages.retain(|p| p != task_id);
                if video.pages.is_empty() {
                    self.store.remove_task(&parent_id);
                }
            }
        } else {
            debug!("移除请求的任务不存在（幂等忽略）: {}", task_id);
        }
    }

    /// 移除单个分P条目：未完成的流记为取消，向下载器注销
    /// 两路 gid（已完结的也注销，释放下载器侧的记录），
    /// 最后删除任务表条目。返回是否确实删除了条目
    async fn remove_page_entry(&mut self, page_id: &str) -> bool {
        let gids = match self.store.get_page_mut(page_id) {
            Some(page) => {
                apply_stream_event(&mut page.task_video, &StreamEvent::Removed);
                apply_stream_event(&mut page.task_audio, &StreamEvent::Removed);
                page.gids()
            }
            None => return false,
        };
        for gid in &gids {
            self.gid_routes.remove(gid);
        }
        join_all(gids.iter().map(|gid| self.adapter.remove(gid))).await;
        self.store.remove_task(page_id);
        true
    }

    /// 重试失败的分P：重新发起失败的传输，或重试失败的合并
    async fn handle_retry(&mut self, task_id: &str) {
        for page_id in self.resolve_pages(task_id) {
            let mut stale_gids = Vec::new();
            let mut kinds = Vec::new();
            let mut retry_merge = false;
            match self.store.get_page_mut(&page_id) {
                Some(page) => {
                    for kind in [StreamKind::Video, StreamKind::Audio] {
                        let stream = page.stream_mut(kind);
                        if stream.status == TaskStatus::Error {
                            if let Some(gid) = stream.gid.take() {
                                stale_gids.push(gid);
                            }
                            apply_stream_event(stream, &StreamEvent::Requeued);
                            kinds.push(kind);
                        }
                    }
                    if kinds.is_empty() && page.merge_state == MergeState::Failed {
                        retry_merge = true;
                    }
                    if !kinds.is_empty() {
                        page.fail_reason = None;
                    }
                }
                None => continue,
            }

            // 旧的失败传输注销后再重新发起
            for gid in &stale_gids {
                self.gid_routes.remove(gid);
            }
            join_all(stale_gids.iter().map(|gid| self.adapter.remove(gid))).await;
            for kind in kinds {
                self.start_stream(&page_id, kind).await;
            }
            if retry_merge {
                if let Some(page) = self.store.get_page_mut(&page_id) {
                    info!("重试合并分P: {}", page_id);
                    self.coordinator.retry_merge(page);
                }
            }
        }
    }

    /// 清除全部已完成的主任务，返回删掉的任务条目数
    /// （分P与主任务都计数）。只有每个分P都完成的主任务
    /// 才会被选中；磁盘上的成品文件一律保留
    async fn handle_clear_completed(&mut self) -> usize {
        let mut cleared = 0usize;
        for video_id in completed_video_ids(&self.store) {
            let page_ids = match self.store.get_video(&video_id) {
                Some(video) => video.pages.clone(),
                None => continue,
            };
            for page_id in &page_ids {
                if self.remove_page_entry(page_id).await {
                    cleared += 1;
                }
            }
            self.store.remove_task(&video_id);
            cleared += 1;
        }
        if cleared > 0 {
            info!("已清除 {} 条已完成任务记录", cleared);
        }
        cleared
    }

    /// 传输事件入口。移除与回调之间的竞态在这里收敛：
    /// 查不到归属的事件直接丢弃，绝不写任务表
    fn handle_transfer_event(&mut self, event: TransferEvent) {
        let (gid, stream_event) = match event {
            TransferEvent::Progress {
                gid,
                downloaded,
                total,
            } => (gid, StreamEvent::Progress { downloaded, total }),
            TransferEvent::Completed { gid } => (gid, StreamEvent::Completed),
            TransferEvent::Failed { gid, reason } => (gid, StreamEvent::Failed { reason }),
        };

        let Some(route) = self.gid_routes.get(&gid) else {
            debug!("忽略过期的传输事件: gid={}", gid);
            return;
        };
        let page_id = route.page_id.clone();
        let kind = route.kind;

        let Some(page) = self.store.get_page_mut(&page_id) else {
            debug!("传输事件对应的任务已不存在: gid={}", gid);
            self.gid_routes.remove(&gid);
            return;
        };

        if let StreamEvent::Failed { reason } = &stream_event {
            warn!("{}传输失败: page={}, {}", kind.label(), page_id, reason);
            page.fail_reason = Some(reason.clone());
        }
        let changed = apply_stream_event(page.stream_mut(kind), &stream_event);

        // 两路齐备即进入合并，try_merge 自身幂等
        if changed && page.both_streams_complete() {
            self.coordinator.try_merge(page);
        }
    }

    /// 合并结果入口。合并期间被移除的分P在这里查不到，
    /// 结果同样按过期事件丢弃
    fn handle_merge_event(&mut self, event: MergeEvent) {
        match event {
            MergeEvent::Finished { page_id } => {
                let Some(page) = self.store.get_page_mut(&page_id) else {
                    debug!("忽略过期的合并事件: page={}", page_id);
                    return;
                };
                page.merge_state = MergeState::Done;
                info!("分P合并完成: {} -> {:?}", page_id, page.output_path);
            }
            MergeEvent::Failed { page_id, reason } => {
                let Some(page) = self.store.get_page_mut(&page_id) else {
                    debug!("忽略过期的合并事件: page={}", page_id);
                    return;
                };
                warn!("分P合并失败: {}, {}", page_id, reason);
                page.merge_state = MergeState::Failed;
                page.fail_reason = Some(reason);
            }
        }
    }
}

/// 输出文件名里的非法字符一律替换为下划线
fn sanitize_file_name(name: &str) -> String {
    name.replace(
        ['/', '\\', ':', '?', '*', '"', '<', '>', '|', '\0'],
        "_",
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_file_name() {
        assert_eq!(sanitize_file_name("正常标题"), "正常标题");
        assert_eq!(sanitize_file_name("a/b\\c:d?e"), "a_b_c_d_e");
    }
}
