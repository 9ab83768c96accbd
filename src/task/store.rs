use std::collections::HashMap;

use super::error::TaskError;
use super::models::{PageTask, Task, VideoTask};

/// 内存任务表。index 是展示顺序的唯一来源，
/// 查找表本身不承担任何排序职责
#[derive(Debug, Default)]
pub struct TaskStore {
    tasks: HashMap<String, Task>,
    index: Vec<String>,
}

impl TaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 登记新任务并追加到索引，标识重复属于编程错误
    pub fn create_task(&mut self, task: Task) -> Result<(), TaskError> {
        let id = task.id().to_string();
        if self.tasks.contains_key(&id) {
            return Err(TaskError::DuplicateTask(id));
        }
        self.index.push(id.clone());
        self.tasks.insert(id, task);
        Ok(())
    }

    /// 删除任务。不存在的标识为幂等空操作，剩余条目保持相对顺序
    pub fn remove_task(&mut self, id: &str) {
        if self.tasks.remove(id).is_none() {
            return;
        }
        self.index.retain(|x| x != id);
    }

    pub fn get(&self, id: &str) -> Option<&Task> {
        self.tasks.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Task> {
        self.tasks.get_mut(id)
    }

    pub fn get_video(&self, id: &str) -> Option<&VideoTask> {
        self.tasks.get(id).and_then(Task::as_video)
    }

    pub fn get_video_mut(&mut self, id: &str) -> Option<&mut VideoTask> {
        match self.tasks.get_mut(id) {
            Some(Task::Video(v)) => Some(v),
            _ => None,
        }
    }

    pub fn get_page(&self, id: &str) -> Option<&PageTask> {
        self.tasks.get(id).and_then(Task::as_page)
    }

    pub fn get_page_mut(&mut self, id: &str) -> Option<&mut PageTask> {
        match self.tasks.get_mut(id) {
            Some(Task::VideoPage(p)) => Some(p),
            _ => None,
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.tasks.contains_key(id)
    }

    /// 展示顺序（仅含插入顺序，主任务与分P混排，
    /// 展示层按需过滤主任务）
    pub fn list_index(&self) -> &[String] {
        &self.index
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}
