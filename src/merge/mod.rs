//! 合并协调：两路流都完成后触发外部合并器，
//! 每个分P恰好触发一次

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, warn};

pub mod error;
pub mod merger;

pub use error::MergeError;

use crate::task::models::{MergeState, PageTask};

/// 外部合并器边界：两个已完成的流文件 + 输出路径 -> 成品或错误
#[async_trait]
pub trait Muxer: Send + Sync {
    async fn merge_av(
        &self,
        video_path: &Path,
        audio_path: &Path,
        output_path: &Path,
    ) -> Result<(), MergeError>;
}

/// 合并结果事件，由后台合并任务发回引擎循环
#[derive(Debug, Clone)]
pub enum MergeEvent {
    Finished { page_id: String },
    Failed { page_id: String, reason: String },
}

/// 合并协调器。合并在引擎循环之外运行，结果通过事件送回；
/// 进行中的合并不会被取消，页面被移除时其完成事件由引擎丢弃
pub struct MergeCoordinator {
    muxer: Arc<dyn Muxer>,
    event_tx: mpsc::UnboundedSender<MergeEvent>,
}

impl MergeCoordinator {
    pub fn new(muxer: Arc<dyn Muxer>, event_tx: mpsc::UnboundedSender<MergeEvent>) -> Self {
        Self { muxer, event_tx }
    }

    /// 幂等触发：前置条件不满足、已在进行或已完成的合并
    /// 都直接跳过。返回是否真正发起了一次合并
    pub fn try_merge(&self, page: &mut PageTask) -> bool {
        if !page.both_streams_complete() {
            return false;
        }
        match page.merge_state {
            MergeState::Running | MergeState::Done => return false,
            // 失败后不自动重试，只能由用户显式重试
            MergeState::Failed => return false,
            MergeState::Pending => {}
        }
        page.merge_state = MergeState::Running;

        let muxer = Arc::clone(&self.muxer);
        let event_tx = self.event_tx.clone();
        let page_id = page.id.clone();
        let video_path = page.task_video.file_path.clone();
        let audio_path = page.task_audio.file_path.clone();
        let output_path = page.output_path.clone();
        debug!("开始合并分P: {} -> {:?}", page_id, output_path);

        tokio::spawn(async move {
            let event = match muxer
                .merge_av(&video_path, &audio_path, &output_path)
                .await
            {
                Ok(()) => {
                    // 合并成功后清理临时流文件；合并失败时保留源文件
                    // 供重试，已产出的成品文件不受任何删除路径影响
                    for path in [&video_path, &audio_path] {
                        if let Err(e) = tokio::fs::remove_file(path).await {
                            warn!("清理临时流文件失败: {:?}, {}", path, e);
                        }
                    }
                    MergeEvent::Finished { page_id }
                }
                Err(e) => MergeEvent::Failed {
                    page_id,
                    reason: e.to_string(),
                },
            };
            // 引擎已退出时结果无人接收，直接丢弃
            let _ = event_tx.send(event);
        });
        true
    }

    /// 用户显式重试失败的合并：清除失败标记后重新触发
    pub fn retry_merge(&self, page: &mut PageTask) -> bool {
        if page.merge_state == MergeState::Failed {
            page.merge_state = MergeState::Pending;
            page.fail_reason = None;
        }
        self.try_merge(page)
    }
}
