//! 编排器状态：当前故事 / 节点 / 路径、生成中标志、流式缓冲、错误
//!
//! 只由 Orchestrator 自己的操作修改；渲染层通过 watch 通道读取快照。

use serde::Serialize;

use crate::model::{NodeId, Story, StoryBranches, StoryNode};

/// 状态机阶段
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum Phase {
    Idle,
    Loading,
    Generating,
}

/// 完整的编排器状态（也是发布给 UI 的快照）
#[derive(Clone, Debug, Default, Serialize)]
pub struct OrchestratorState {
    pub current_story: Option<Story>,
    pub current_node: Option<StoryNode>,
    /// 根到 current_node 的有序路径
    pub story_path: Vec<StoryNode>,
    pub all_nodes: Vec<StoryNode>,
    pub branches: Option<StoryBranches>,
    pub is_generating: bool,
    pub is_loading: bool,
    pub progress_label: Option<String>,
    /// 本次生成累积的 token 文本，只追加
    pub streaming_buffer: String,
    pub error: Option<String>,
    /// 正在进行的生成操作 id
    #[serde(skip)]
    pub(crate) active_op: Option<u64>,
    /// 最近一次未被放弃的加载 id
    #[serde(skip)]
    pub(crate) pending_load: Option<u64>,
}

impl OrchestratorState {
    pub fn phase(&self) -> Phase {
        if self.is_generating {
            Phase::Generating
        } else if self.is_loading {
            Phase::Loading
        } else {
            Phase::Idle
        }
    }

    pub fn story_id(&self) -> Option<crate::model::StoryId> {
        self.current_story.as_ref().map(|s| s.id)
    }

    pub fn current_node_id(&self) -> Option<NodeId> {
        self.current_node.as_ref().map(|n| n.id)
    }

    /// 当前路径的正文，段落间空一行
    pub fn path_text(&self) -> String {
        self.story_path
            .iter()
            .map(|n| n.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    /// 离开故事：清空全部故事相关状态
    pub(crate) fn clear_story(&mut self) {
        *self = Self::default();
    }
}
