//! 生成流事件：`data: <json>` 行按 `type` 区分 token / done / error

use serde::{Deserialize, Serialize};

use crate::model::{NodeId, StoryChoice};

/// 生成流中的一个事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GenerationEvent {
    /// 增量文本片段；只能追加，不保证是完整句子
    Token { content: String },
    /// 终态：服务端已持久化的新节点
    Done(DoneEvent),
    /// 终态：生成失败
    Error {
        #[serde(default)]
        message: String,
    },
}

impl GenerationEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Token { .. })
    }
}

/// done 事件负载，以此（而非累积的 token）作为权威结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DoneEvent {
    pub node_id: NodeId,
    #[serde(default)]
    pub content: String,
    #[serde(default, deserialize_with = "crate::model::null_as_empty")]
    pub choices: Vec<StoryChoice>,
    #[serde(default)]
    pub is_ending: bool,
}
