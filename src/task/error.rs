use thiserror::Error;

#[derive(Debug, Error)]
pub enum TaskError {
    #[error("任务已存在: {0}")]
    DuplicateTask(String),
    #[error("任务不存在: {0}")]
    TaskNotFound(String),
    #[error("任务类型不符: {0}")]
    WrongKind(String),
}
