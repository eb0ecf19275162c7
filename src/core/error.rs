//! 引擎错误类型
//!
//! 所有错误都在 Orchestrator 边界被捕获：写入 `OrchestratorState::error` 并广播一条 Notification，不会向调用方抛出。

use thiserror::Error;

use crate::api::ApiError;
use crate::model::NodeId;

/// 生成 / 加载 / 路径解析过程中可能出现的错误
#[derive(Error, Debug)]
pub enum StoryError {
    /// 网络或 HTTP 失败（含 5xx）
    #[error(transparent)]
    Transport(#[from] ApiError),

    /// 任务自身报告失败
    #[error("Generation failed: {0}")]
    JobFailed(String),

    /// 轮询次数用尽仍未到达终态
    #[error("Generation timed out after {attempts} status checks")]
    JobTimeout { attempts: u32 },

    /// 流在 done / error 事件之前结束
    #[error("Stream ended before generation finished")]
    StreamAborted,

    /// 流中收到 error 事件
    #[error("Generation error: {0}")]
    StreamError(String),

    /// 多个根节点、缺失祖先或环
    #[error("Story graph is inconsistent: {0}")]
    GraphInconsistency(String),

    #[error("Node {0} not found")]
    NodeNotFound(NodeId),

    #[error("No story loaded")]
    NoStoryLoaded,

    #[error("No current node to continue from")]
    NoCurrentNode,

    #[error("Cannot continue from an ending node")]
    EndingReached,

    /// 当前节点没有该序号的选项
    #[error("Choice {0} is not available on the current node")]
    UnknownChoice(usize),

    /// 调用方取消（离开故事或显式 Cancel）
    #[error("Generation cancelled")]
    Cancelled,
}

impl StoryError {
    /// 路径解析失败：调用方应退回到只显示节点本身
    pub fn is_graph_error(&self) -> bool {
        matches!(self, Self::GraphInconsistency(_) | Self::NodeNotFound(_))
    }
}
