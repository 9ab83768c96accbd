use colored::*;

use crate::task::models::TaskStatus;
use crate::task::projection::VideoTaskView;

/// 漂亮的任务列表输出工具
pub struct PrettyLogger;

impl PrettyLogger {
    /// 显示成功消息
    pub fn success(message: impl AsRef<str>) {
        println!("{} {}", "✓".green().bold(), message.as_ref());
    }

    /// 显示错误消息
    pub fn error(message: impl AsRef<str>) {
        println!("{} {}", "✗".red().bold(), message.as_ref());
    }

    /// 显示分割线
    pub fn separator() {
        println!("{}", "─".repeat(50).bright_black());
    }

    /// 任务状态标签
    pub fn status_label(status: TaskStatus) -> ColoredString {
        match status {
            TaskStatus::Queued => "排队中".bright_black(),
            TaskStatus::Downloading => "下载中".cyan(),
            TaskStatus::Merging => "合并中".yellow(),
            TaskStatus::Complete => "已完成".green(),
            TaskStatus::Paused => "已暂停".blue(),
            TaskStatus::Error => "失败".red().bold(),
            TaskStatus::Canceled => "已取消".bright_black(),
        }
    }

    /// 按展示顺序渲染任务列表摘要
    pub fn task_summary(views: &[VideoTaskView]) {
        if views.is_empty() {
            println!("{}", "啥也木有...".bright_black());
            return;
        }
        for view in views {
            println!(
                "{} {} [{}] {:.1}%",
                "🎬".bold(),
                view.title.bold(),
                Self::status_label(view.status),
                view.progress()
            );
            for page in &view.pages {
                println!("   └ {} [{}]", page.title, Self::status_label(page.status));
                if let Some(reason) = &page.fail_reason {
                    println!("     {}", reason.red());
                }
            }
        }
    }
}
