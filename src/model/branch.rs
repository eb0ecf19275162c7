//! 分支集合：从根到叶子（或结局）的完整阅读路径

use serde::{Deserialize, Serialize};

use super::node::{NodeId, StoryNode};
use super::story::StoryId;

/// 分支中的节点摘要
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BranchNode {
    pub id: NodeId,
    pub content: String,
    #[serde(default)]
    pub choice_text: Option<String>,
    #[serde(default)]
    pub is_ending: bool,
}

impl From<&StoryNode> for BranchNode {
    fn from(node: &StoryNode) -> Self {
        Self {
            id: node.id,
            content: node.content.clone(),
            choice_text: node.choice_text.clone(),
            is_ending: node.is_ending,
        }
    }
}

/// 一条分支；`is_complete` 表示以结局收尾（否则止于尚未续写的叶子）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoryBranch {
    pub id: String,
    pub nodes: Vec<BranchNode>,
    #[serde(default)]
    pub is_complete: bool,
}

impl StoryBranch {
    pub fn node_ids(&self) -> Vec<NodeId> {
        self.nodes.iter().map(|n| n.id).collect()
    }

    /// 整条分支的正文，段落间空一行
    pub fn text(&self) -> String {
        self.nodes
            .iter()
            .map(|n| n.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

/// GET/POST /stories/{id}/branches 的响应
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoryBranches {
    pub story_id: StoryId,
    pub title: String,
    #[serde(default)]
    pub complete_story_text: Option<String>,
    #[serde(default)]
    pub branches: Vec<StoryBranch>,
    #[serde(default)]
    pub total_branches: usize,
    #[serde(default)]
    pub has_complete_ending: bool,
}

impl StoryBranches {
    /// 由分支列表汇总；主线为第一条完整分支，没有则取第一条
    pub fn from_branches(story_id: StoryId, title: impl Into<String>, branches: Vec<StoryBranch>) -> Self {
        let main = branches
            .iter()
            .find(|b| b.is_complete)
            .or_else(|| branches.first());
        Self {
            story_id,
            title: title.into(),
            complete_story_text: main.map(StoryBranch::text),
            total_branches: branches.len(),
            has_complete_ending: branches.iter().any(|b| b.is_complete),
            branches,
        }
    }
}

/// POST /stories/{id}/branches 请求体
#[derive(Debug, Clone, Serialize)]
pub struct SaveBranchesRequest {
    pub complete_story_text: Option<String>,
    pub branches: Vec<StoryBranch>,
}

impl From<&StoryBranches> for SaveBranchesRequest {
    fn from(set: &StoryBranches) -> Self {
        Self {
            complete_story_text: set.complete_story_text.clone(),
            branches: set.branches.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn branch(id: &str, contents: &[(NodeId, &str)], complete: bool) -> StoryBranch {
        StoryBranch {
            id: id.to_string(),
            nodes: contents
                .iter()
                .map(|(nid, c)| BranchNode {
                    id: *nid,
                    content: c.to_string(),
                    choice_text: None,
                    is_ending: false,
                })
                .collect(),
            is_complete: complete,
        }
    }

    #[test]
    fn test_main_branch_prefers_complete() {
        let set = StoryBranches::from_branches(
            1,
            "Tale",
            vec![
                branch("branch_1", &[(1, "Start"), (2, "Left")], false),
                branch("branch_2", &[(1, "Start"), (3, "Right"), (4, "The end")], true),
            ],
        );
        assert_eq!(set.total_branches, 2);
        assert!(set.has_complete_ending);
        assert_eq!(set.complete_story_text.as_deref(), Some("Start\n\nRight\n\nThe end"));
    }

    #[test]
    fn test_empty_branches() {
        let set = StoryBranches::from_branches(1, "Tale", vec![]);
        assert_eq!(set.complete_story_text, None);
        assert!(!set.has_complete_ending);
    }
}
