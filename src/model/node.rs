//! 故事节点与选项

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::story::StoryId;

pub type NodeId = i64;

/// 节点上的一个选项（仅在非结局节点上驱动后续生成）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoryChoice {
    pub id: String,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consequence_hint: Option<String>,
}

impl StoryChoice {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            consequence_hint: None,
        }
    }
}

/// 节点扩展元数据：已知字段强类型，其余键原样保留在 `extra`
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct NodeMetadata {
    /// 预先合成的音频引用（URL 或 data URL）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mood: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tension: Option<f64>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// 叙事树中的一个节点
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoryNode {
    pub id: NodeId,
    pub story_id: StoryId,
    /// 仅根节点为空
    #[serde(default)]
    pub parent_id: Option<NodeId>,
    pub content: String,
    /// 产生此节点的选项文本
    #[serde(default)]
    pub choice_text: Option<String>,
    #[serde(default, deserialize_with = "crate::model::null_as_empty")]
    pub choices: Vec<StoryChoice>,
    #[serde(default, rename = "node_metadata")]
    pub metadata: Option<NodeMetadata>,
    #[serde(default)]
    pub is_root: bool,
    #[serde(default)]
    pub is_ending: bool,
    #[serde(default)]
    pub depth: u32,
    #[serde(default, with = "crate::model::timestamp")]
    pub created_at: Option<DateTime<Utc>>,
}

impl StoryNode {
    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }

    /// 结局节点的选项只作展示，不能继续生成
    pub fn can_continue(&self) -> bool {
        !self.is_ending
    }

    pub fn audio_url(&self) -> Option<&str> {
        self.metadata.as_ref()?.audio_url.as_deref()
    }
}
