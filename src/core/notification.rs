//! 用户通知：把 StoryError 映射为非阻塞提示

use serde::Serialize;

use crate::core::StoryError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum NoticeLevel {
    Info,
    Warning,
    Error,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub level: NoticeLevel,
    pub message: String,
}

impl Notification {
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Info,
            message: message.into(),
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Warning,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Error,
            message: message.into(),
        }
    }
}

/// 错误对应的提示；取消不是错误，只给出 Info
pub fn notification_for(err: &StoryError) -> Notification {
    match err {
        StoryError::Cancelled => Notification::info("Generation cancelled"),
        StoryError::JobTimeout { .. } => {
            Notification::error("Generation is taking too long. Please try again.")
        }
        StoryError::StreamAborted => {
            Notification::error("Connection lost before the story finished generating.")
        }
        StoryError::GraphInconsistency(_) | StoryError::NodeNotFound(_) => {
            Notification::warning(err.to_string())
        }
        StoryError::NoStoryLoaded
        | StoryError::NoCurrentNode
        | StoryError::EndingReached
        | StoryError::UnknownChoice(_) => {
            Notification::warning(err.to_string())
        }
        StoryError::Transport(_)
        | StoryError::JobFailed(_)
        | StoryError::StreamError(_) => Notification::error(err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ApiError;

    #[test]
    fn test_levels() {
        assert_eq!(notification_for(&StoryError::Cancelled).level, NoticeLevel::Info);
        assert_eq!(
            notification_for(&StoryError::NodeNotFound(3)).level,
            NoticeLevel::Warning
        );
        let transport = StoryError::from(ApiError::Status {
            status: 503,
            message: "busy".into(),
        });
        let notice = notification_for(&transport);
        assert_eq!(notice.level, NoticeLevel::Error);
        assert!(notice.message.contains("busy"));
    }
}
