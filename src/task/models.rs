use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 任务状态，主任务与分P任务共用同一状态域
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Queued,
    Downloading,
    Merging,
    Complete,
    Paused,
    Error,
    Canceled,
}

impl TaskStatus {
    /// 终态不再接受传输事件
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Complete | TaskStatus::Error | TaskStatus::Canceled
        )
    }
}

// --------------------------------------------------------------------

/// 流类型：一个分P需要视频流与音频流各一路传输
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum StreamKind {
    Video,
    Audio,
}

impl StreamKind {
    pub fn label(&self) -> &'static str {
        match self {
            StreamKind::Video => "视频流",
            StreamKind::Audio => "音频流",
        }
    }
}

/// 单路流的传输子记录，gid 由外部下载器受理时异步分配
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamTask {
    pub gid: Option<String>,
    pub url: String,
    pub file_path: PathBuf,
    pub status: TaskStatus,
    pub downloaded: u64,
    pub total_size: u64,
}

impl StreamTask {
    pub fn new(url: impl Into<String>, file_path: impl Into<PathBuf>) -> Self {
        Self {
            gid: None,
            url: url.into(),
            file_path: file_path.into(),
            status: TaskStatus::Queued,
            downloaded: 0,
            total_size: 0,
        }
    }

    /// 进度百分比
    pub fn progress(&self) -> f64 {
        if self.total_size == 0 {
            return 0.0;
        }
        (self.downloaded as f64 / self.total_size as f64) * 100.0
    }
}

// --------------------------------------------------------------------

/// 合并阶段状态。两路流都完成后才会进入 Running
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MergeState {
    Pending,
    Running,
    Done,
    Failed,
}

/// 分P任务：一路视频流 + 一路音频流 + 合并产物
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageTask {
    pub id: String,
    pub parent_id: String,
    pub title: String,
    pub task_video: StreamTask,
    pub task_audio: StreamTask,
    pub output_path: PathBuf,
    pub merge_state: MergeState,
    pub fail_reason: Option<String>,
    pub created_at: i64,
}

impl PageTask {
    pub fn new(
        parent_id: impl Into<String>,
        title: impl Into<String>,
        task_video: StreamTask,
        task_audio: StreamTask,
        output_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            parent_id: parent_id.into(),
            title: title.into(),
            task_video,
            task_audio,
            output_path: output_path.into(),
            merge_state: MergeState::Pending,
            fail_reason: None,
            created_at: chrono::Utc::now().timestamp(),
        }
    }

    pub fn stream(&self, kind: StreamKind) -> &StreamTask {
        match kind {
            StreamKind::Video => &self.task_video,
            StreamKind::Audio => &self.task_audio,
        }
    }

    pub fn stream_mut(&mut self, kind: StreamKind) -> &mut StreamTask {
        match kind {
            StreamKind::Video => &mut self.task_video,
            StreamKind::Audio => &mut self.task_audio,
        }
    }

    /// 两路流是否都已传输完成（合并的前置条件）
    pub fn both_streams_complete(&self) -> bool {
        self.task_video.status == TaskStatus::Complete
            && self.task_audio.status == TaskStatus::Complete
    }

    /// 当前已登记的传输标识
    pub fn gids(&self) -> Vec<String> {
        [&self.task_video, &self.task_audio]
            .into_iter()
            .filter_map(|s| s.gid.clone())
            .collect()
    }
}

// --------------------------------------------------------------------

/// 主任务：一个视频，含一个或多个分P。状态不单独存储，
/// 始终由子任务状态聚合得出
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoTask {
    pub id: String,
    pub title: String,
    pub uploader: Option<String>,
    pub pages: Vec<String>,
    pub created_at: i64,
}

impl VideoTask {
    pub fn new(title: impl Into<String>, uploader: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            title: title.into(),
            uploader,
            pages: Vec::new(),
            created_at: chrono::Utc::now().timestamp(),
        }
    }
}

/// 任务表中的条目
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Task {
    Video(VideoTask),
    VideoPage(PageTask),
}

impl Task {
    pub fn id(&self) -> &str {
        match self {
            Task::Video(v) => &v.id,
            Task::VideoPage(p) => &p.id,
        }
    }

    pub fn as_video(&self) -> Option<&VideoTask> {
        match self {
            Task::Video(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_page(&self) -> Option<&PageTask> {
        match self {
            Task::VideoPage(p) => Some(p),
            _ => None,
        }
    }
}
