//! 后端传输抽象
//!
//! 所有实现（HTTP / Mock）实现 StoryApi：故事与节点查询、提交生成任务（返回任务句柄）、开启生成流（返回原始字节流）。

use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::Stream;
use serde::Serialize;
use thiserror::Error;

use crate::model::{
    GenerationJob, JobHandle, JobId, JobKind, NodeId, SaveBranchesRequest, Story, StoryBranches,
    StoryDraft, StoryId, StoryNode, StoryPage,
};

/// SSE 响应体：按网络到达顺序的字节块
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, ApiError>> + Send>>;

/// 传输层错误
#[derive(Error, Debug)]
pub enum ApiError {
    /// 非 2xx 响应；message 取后端的 detail 字段
    #[error("HTTP {status}: {message}")]
    Status { status: u16, message: String },

    /// 连接失败、超时、读流中断
    #[error("Request failed: {0}")]
    Request(String),

    /// 响应体无法解析
    #[error("Invalid response: {0}")]
    Decode(String),
}

impl ApiError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Status { status: 404, .. })
    }
}

/// 一次生成请求（开篇 / 按选项续写 / 结局）
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerationRequest {
    Opening {
        story_id: StoryId,
    },
    Continue {
        story_id: StoryId,
        node_id: NodeId,
        choice: ChoiceSelection,
    },
    Ending {
        story_id: StoryId,
        node_id: NodeId,
    },
}

/// 续写请求体
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChoiceSelection {
    pub choice_id: String,
    pub choice_text: String,
}

impl GenerationRequest {
    pub fn kind(&self) -> JobKind {
        match self {
            Self::Opening { .. } => JobKind::Opening,
            Self::Continue { .. } => JobKind::Continuation,
            Self::Ending { .. } => JobKind::Ending,
        }
    }

    pub fn story_id(&self) -> StoryId {
        match self {
            Self::Opening { story_id }
            | Self::Continue { story_id, .. }
            | Self::Ending { story_id, .. } => *story_id,
        }
    }

    /// 新节点的父节点；开篇没有
    pub fn parent_id(&self) -> Option<NodeId> {
        match self {
            Self::Opening { .. } => None,
            Self::Continue { node_id, .. } | Self::Ending { node_id, .. } => Some(*node_id),
        }
    }
}

/// 故事后端：Orchestrator 只通过该 trait 访问网络
#[async_trait]
pub trait StoryApi: Send + Sync {
    async fn get_story(&self, story_id: StoryId) -> Result<Story, ApiError>;

    async fn list_stories(&self, page: u32, page_size: u32) -> Result<StoryPage, ApiError>;

    async fn create_story(&self, draft: &StoryDraft) -> Result<Story, ApiError>;

    async fn delete_story(&self, story_id: StoryId) -> Result<(), ApiError>;

    /// 服务端记录的阅读位置（没有时为根节点）；故事还没有节点时 404
    async fn current_node(&self, story_id: StoryId) -> Result<StoryNode, ApiError>;

    /// 故事的全部节点（扁平列表，按深度与创建时间排序）
    async fn list_nodes(&self, story_id: StoryId) -> Result<Vec<StoryNode>, ApiError>;

    async fn get_node(&self, story_id: StoryId, node_id: NodeId) -> Result<StoryNode, ApiError>;

    /// 服务端计算的根到节点路径
    async fn node_path(&self, story_id: StoryId, node_id: NodeId)
        -> Result<Vec<StoryNode>, ApiError>;

    async fn get_branches(&self, story_id: StoryId) -> Result<StoryBranches, ApiError>;

    async fn save_branches(
        &self,
        story_id: StoryId,
        request: &SaveBranchesRequest,
    ) -> Result<StoryBranches, ApiError>;

    /// 提交生成任务（轮询模式）
    async fn start_generation(&self, request: &GenerationRequest) -> Result<JobHandle, ApiError>;

    async fn get_job(&self, job_id: JobId) -> Result<GenerationJob, ApiError>;

    /// 开启生成流（流式模式），返回 text/event-stream 原始字节
    async fn stream_generation(&self, request: &GenerationRequest) -> Result<ByteStream, ApiError>;
}
