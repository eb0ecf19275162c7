//! 叙事图：一个故事的扁平节点集合，按 parent_id 建立父子索引
//!
//! 只是服务端节点集的派生缓存，可随时丢弃重建。

use std::collections::HashMap;

use crate::core::StoryError;
use crate::model::{NodeId, StoryNode};

#[derive(Debug, Clone, Default)]
pub struct NarrativeGraph {
    /// 保持服务端返回顺序（深度、创建时间）
    nodes: Vec<StoryNode>,
    index: HashMap<NodeId, usize>,
    children: HashMap<NodeId, Vec<usize>>,
    root: Option<usize>,
}

impl NarrativeGraph {
    /// 由扁平列表构建；零节点合法，多根或重复 id 视为数据不一致
    pub fn build(nodes: Vec<StoryNode>) -> Result<Self, StoryError> {
        let mut index = HashMap::with_capacity(nodes.len());
        let mut children: HashMap<NodeId, Vec<usize>> = HashMap::new();
        let mut root = None;

        for (i, node) in nodes.iter().enumerate() {
            if index.insert(node.id, i).is_some() {
                return Err(StoryError::GraphInconsistency(format!(
                    "duplicate node id {}",
                    node.id
                )));
            }
            match node.parent_id {
                None => {
                    if let Some(existing) = root {
                        let first: &StoryNode = &nodes[existing];
                        return Err(StoryError::GraphInconsistency(format!(
                            "multiple root nodes ({} and {})",
                            first.id, node.id
                        )));
                    }
                    root = Some(i);
                }
                Some(parent) => children.entry(parent).or_default().push(i),
            }
        }

        Ok(Self {
            nodes,
            index,
            children,
            root,
        })
    }

    pub fn root(&self) -> Option<&StoryNode> {
        self.root.map(|i| &self.nodes[i])
    }

    pub fn get(&self, id: NodeId) -> Option<&StoryNode> {
        self.index.get(&id).map(|&i| &self.nodes[i])
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.index.contains_key(&id)
    }

    /// 子节点，按创建顺序（第一个子节点约定为主线）
    pub fn children_of(&self, id: NodeId) -> Vec<&StoryNode> {
        self.children
            .get(&id)
            .map(|idx| idx.iter().map(|&i| &self.nodes[i]).collect())
            .unwrap_or_default()
    }

    pub fn nodes(&self) -> &[StoryNode] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
