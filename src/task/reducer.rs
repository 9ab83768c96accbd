//! 状态归约：纯函数 (当前状态, 事件) -> 新状态。
//! 所有 I/O 都留在适配层，这里只有状态机与父子聚合，
//! 重复计算同一输入得到同一结果。

use super::models::{MergeState, PageTask, StreamTask, TaskStatus};

/// 单路流上的归一化事件
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// 外部下载器受理传输（gid 已分配）
    StartAcked,
    /// 进度上报，字节数单调递增
    Progress { downloaded: u64, total: u64 },
    /// 传输完成
    Completed,
    /// 传输失败
    Failed { reason: String },
    /// 暂停指令已下发
    PauseRequested,
    /// 恢复指令已下发
    ResumeRequested,
    /// 任务被移除，未完成的传输记为取消
    Removed,
    /// 用户重试失败的传输，重新排队
    Requeued,
}

/// 对单路流应用事件，返回状态或进度是否发生变化
pub fn apply_stream_event(stream: &mut StreamTask, event: &StreamEvent) -> bool {
    match event {
        StreamEvent::StartAcked => {
            if stream.status == TaskStatus::Queued {
                stream.status = TaskStatus::Downloading;
                return true;
            }
            false
        }
        StreamEvent::Progress { downloaded, total } => {
            if stream.status.is_terminal() {
                return false;
            }
            // 最新进度优先：字节数不增则视为乱序的旧回调，丢弃
            if *downloaded < stream.downloaded {
                return false;
            }
            let changed = *downloaded != stream.downloaded || *total != stream.total_size;
            stream.downloaded = *downloaded;
            stream.total_size = *total;
            changed
        }
        StreamEvent::Completed => {
            // 小文件可能在首个进度回调前就完成，容忍从 Queued 直达
            if stream.status.is_terminal() {
                return false;
            }
            stream.status = TaskStatus::Complete;
            if stream.total_size > 0 {
                stream.downloaded = stream.total_size;
            }
            true
        }
        StreamEvent::Failed { .. } => {
            if stream.status.is_terminal() {
                return false;
            }
            stream.status = TaskStatus::Error;
            true
        }
        StreamEvent::PauseRequested => {
            if stream.status == TaskStatus::Downloading {
                stream.status = TaskStatus::Paused;
                return true;
            }
            false
        }
        StreamEvent::ResumeRequested => {
            if stream.status == TaskStatus::Paused {
                stream.status = TaskStatus::Downloading;
                return true;
            }
            false
        }
        StreamEvent::Removed => {
            if stream.status != TaskStatus::Complete {
                stream.status = TaskStatus::Canceled;
                return true;
            }
            false
        }
        StreamEvent::Requeued => {
            if stream.status == TaskStatus::Error {
                stream.status = TaskStatus::Queued;
                stream.downloaded = 0;
                return true;
            }
            false
        }
    }
}

/// 聚合优先级：父任务总是呈现最"拖后腿"的子状态，
/// 任何一路未完成时父任务绝不显示完成
fn priority(status: TaskStatus) -> u8 {
    match status {
        TaskStatus::Error => 5,
        TaskStatus::Paused => 4,
        TaskStatus::Downloading => 3,
        TaskStatus::Merging => 2,
        TaskStatus::Queued => 1,
        TaskStatus::Complete | TaskStatus::Canceled => 0,
    }
}

/// 分P任务状态：由两路流与合并阶段推导，不单独存储
pub fn page_status(page: &PageTask) -> TaskStatus {
    let video = page.task_video.status;
    let audio = page.task_audio.status;

    // 任一路失败或合并失败都封顶为 error
    if video == TaskStatus::Error
        || audio == TaskStatus::Error
        || page.merge_state == MergeState::Failed
    {
        return TaskStatus::Error;
    }

    if page.both_streams_complete() {
        return match page.merge_state {
            MergeState::Done => TaskStatus::Complete,
            _ => TaskStatus::Merging,
        };
    }

    if priority(video) >= priority(audio) {
        video
    } else {
        audio
    }
}

/// 主任务状态：全部分P完成才算完成，否则取优先级最高的子状态
pub fn video_status<I>(children: I) -> TaskStatus
where
    I: IntoIterator<Item = TaskStatus>,
{
    let mut aggregate: Option<TaskStatus> = None;
    let mut all_complete = true;
    for status in children {
        if status != TaskStatus::Complete {
            all_complete = false;
        }
        aggregate = Some(match aggregate {
            None => status,
            Some(current) if priority(status) > priority(current) => status,
            Some(current) => current,
        });
    }
    match aggregate {
        None => TaskStatus::Queued,
        Some(_) if all_complete => TaskStatus::Complete,
        Some(status) => status,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::models::StreamKind;

    fn stream() -> StreamTask {
        StreamTask::new("http://example/stream", "/tmp/stream.m4s")
    }

    fn page() -> PageTask {
        PageTask::new("parent", "P1", stream(), stream(), "/tmp/out.mp4")
    }

    #[test]
    fn test_stream_lifecycle() {
        let mut s = stream();
        assert_eq!(s.status, TaskStatus::Queued);

        assert!(apply_stream_event(&mut s, &StreamEvent::StartAcked));
        assert_eq!(s.status, TaskStatus::Downloading);

        assert!(apply_stream_event(&mut s, &StreamEvent::PauseRequested));
        assert_eq!(s.status, TaskStatus::Paused);
        assert!(apply_stream_event(&mut s, &StreamEvent::ResumeRequested));
        assert_eq!(s.status, TaskStatus::Downloading);

        assert!(apply_stream_event(&mut s, &StreamEvent::Completed));
        assert_eq!(s.status, TaskStatus::Complete);

        // 终态后的事件不再生效
        assert!(!apply_stream_event(
            &mut s,
            &StreamEvent::Failed {
                reason: "晚到的错误".into()
            }
        ));
        assert_eq!(s.status, TaskStatus::Complete);
    }

    #[test]
    fn test_progress_latest_wins() {
        let mut s = stream();
        apply_stream_event(&mut s, &StreamEvent::StartAcked);

        assert!(apply_stream_event(
            &mut s,
            &StreamEvent::Progress {
                downloaded: 500,
                total: 1000
            }
        ));
        // 乱序到达的旧进度被丢弃
        assert!(!apply_stream_event(
            &mut s,
            &StreamEvent::Progress {
                downloaded: 300,
                total: 1000
            }
        ));
        assert_eq!(s.downloaded, 500);
    }

    #[test]
    fn test_removed_marks_canceled_unless_complete() {
        let mut s = stream();
        apply_stream_event(&mut s, &StreamEvent::StartAcked);
        assert!(apply_stream_event(&mut s, &StreamEvent::Removed));
        assert_eq!(s.status, TaskStatus::Canceled);

        let mut done = stream();
        apply_stream_event(&mut done, &StreamEvent::Completed);
        assert!(!apply_stream_event(&mut done, &StreamEvent::Removed));
        assert_eq!(done.status, TaskStatus::Complete);
    }

    #[test]
    fn test_requeued_resets_failed_stream() {
        let mut s = stream();
        apply_stream_event(&mut s, &StreamEvent::StartAcked);
        apply_stream_event(
            &mut s,
            &StreamEvent::Progress {
                downloaded: 100,
                total: 1000,
            },
        );
        apply_stream_event(
            &mut s,
            &StreamEvent::Failed {
                reason: "网络错误".into(),
            },
        );
        assert_eq!(s.status, TaskStatus::Error);

        assert!(apply_stream_event(&mut s, &StreamEvent::Requeued));
        assert_eq!(s.status, TaskStatus::Queued);
        assert_eq!(s.downloaded, 0);

        // 只有失败的流可以重新排队
        let mut done = stream();
        apply_stream_event(&mut done, &StreamEvent::Completed);
        assert!(!apply_stream_event(&mut done, &StreamEvent::Requeued));
    }

    #[test]
    fn test_page_status_error_dominates() {
        let mut p = page();
        p.task_video.status = TaskStatus::Error;
        p.task_audio.status = TaskStatus::Downloading;
        assert_eq!(page_status(&p), TaskStatus::Error);
    }

    #[test]
    fn test_page_status_merging_until_done() {
        let mut p = page();
        p.task_video.status = TaskStatus::Complete;
        p.task_audio.status = TaskStatus::Complete;
        assert_eq!(page_status(&p), TaskStatus::Merging);

        p.merge_state = MergeState::Running;
        assert_eq!(page_status(&p), TaskStatus::Merging);

        p.merge_state = MergeState::Done;
        assert_eq!(page_status(&p), TaskStatus::Complete);
    }

    #[test]
    fn test_page_status_merge_failure_is_error() {
        let mut p = page();
        p.task_video.status = TaskStatus::Complete;
        p.task_audio.status = TaskStatus::Complete;
        p.merge_state = MergeState::Failed;
        assert_eq!(page_status(&p), TaskStatus::Error);
    }

    #[test]
    fn test_page_status_lagging_stream_wins() {
        let mut p = page();
        p.task_video.status = TaskStatus::Complete;
        p.task_audio.status = TaskStatus::Downloading;
        assert_eq!(page_status(&p), TaskStatus::Downloading);

        p.task_audio.status = TaskStatus::Paused;
        assert_eq!(page_status(&p), TaskStatus::Paused);
    }

    #[test]
    fn test_page_status_getter_consistency() {
        // stream_mut 与聚合读取的是同一份子记录
        let mut p = page();
        p.stream_mut(StreamKind::Audio).status = TaskStatus::Error;
        assert_eq!(p.stream(StreamKind::Audio).status, TaskStatus::Error);
        assert_eq!(page_status(&p), TaskStatus::Error);
    }

    #[test]
    fn test_video_status_complete_only_when_all_complete() {
        let statuses = [TaskStatus::Complete, TaskStatus::Queued];
        assert_eq!(video_status(statuses), TaskStatus::Queued);

        let statuses = [TaskStatus::Complete, TaskStatus::Complete];
        assert_eq!(video_status(statuses), TaskStatus::Complete);
    }

    #[test]
    fn test_video_status_error_dominates_activity() {
        let statuses = [TaskStatus::Error, TaskStatus::Downloading];
        assert_eq!(video_status(statuses), TaskStatus::Error);
    }

    #[test]
    fn test_video_status_recompute_is_idempotent() {
        let statuses = vec![
            TaskStatus::Merging,
            TaskStatus::Complete,
            TaskStatus::Queued,
        ];
        let first = video_status(statuses.clone());
        let second = video_status(statuses);
        assert_eq!(first, second);
        assert_eq!(first, TaskStatus::Merging);
    }
}
