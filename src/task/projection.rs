//! 面向展示层的只读投影。展示层只通过这里读任务状态，
//! 不持有任务表的第二份可变拷贝

use serde::Serialize;

use super::models::{PageTask, TaskStatus};
use super::reducer::{page_status, video_status};
use super::store::TaskStore;

/// 分P任务视图
#[derive(Debug, Clone, Serialize)]
pub struct PageTaskView {
    pub id: String,
    pub title: String,
    pub status: TaskStatus,
    pub downloaded: u64,
    pub total_size: u64,
    pub fail_reason: Option<String>,
}

impl PageTaskView {
    fn from_page(page: &PageTask) -> Self {
        Self {
            id: page.id.clone(),
            title: page.title.clone(),
            status: page_status(page),
            downloaded: page.task_video.downloaded + page.task_audio.downloaded,
            total_size: page.task_video.total_size + page.task_audio.total_size,
            fail_reason: page.fail_reason.clone(),
        }
    }
}

/// 主任务视图，进度为全部分P两路流的字节数汇总
#[derive(Debug, Clone, Serialize)]
pub struct VideoTaskView {
    pub id: String,
    pub title: String,
    pub uploader: Option<String>,
    pub status: TaskStatus,
    pub downloaded: u64,
    pub total_size: u64,
    pub pages: Vec<PageTaskView>,
}

impl VideoTaskView {
    pub fn progress(&self) -> f64 {
        if self.total_size == 0 {
            return 0.0;
        }
        (self.downloaded as f64 / self.total_size as f64) * 100.0
    }
}

/// 按索引顺序生成主任务快照
pub fn snapshot(store: &TaskStore) -> Vec<VideoTaskView> {
    store
        .list_index()
        .iter()
        .filter_map(|id| {
            let video = store.get_video(id)?;
            let pages: Vec<PageTaskView> = video
                .pages
                .iter()
                .filter_map(|pid| store.get_page(pid))
                .map(PageTaskView::from_page)
                .collect();
            Some(VideoTaskView {
                id: video.id.clone(),
                title: video.title.clone(),
                uploader: video.uploader.clone(),
                status: video_status(pages.iter().map(|p| p.status)),
                downloaded: pages.iter().map(|p| p.downloaded).sum(),
                total_size: pages.iter().map(|p| p.total_size).sum(),
                pages,
            })
        })
        .collect()
}

/// 全部分P都已完成的主任务标识，按索引顺序。
/// 供清除已完成前的预览与确认使用
pub fn completed_video_ids(store: &TaskStore) -> Vec<String> {
    store
        .list_index()
        .iter()
        .filter_map(|id| {
            let video = store.get_video(id)?;
            if video.pages.is_empty() {
                return None;
            }
            let all_complete = video.pages.iter().all(|pid| {
                store
                    .get_page(pid)
                    .map(|p| page_status(p) == TaskStatus::Complete)
                    .unwrap_or(false)
            });
            all_complete.then(|| video.id.clone())
        })
        .collect()
}
