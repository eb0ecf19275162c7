//! 路径解析：根到节点的阅读路径、全部分支枚举
//!
//! 都是叙事图快照上的纯函数；服务端接口不可用时作为本地兜底。

use crate::core::StoryError;
use crate::graph::NarrativeGraph;
use crate::model::{BranchNode, NodeId, StoryBranch, StoryBranches, StoryId, StoryNode};

/// 从目标节点沿 parent_id 回溯到根，再反转
///
/// 目标不在快照中返回 NodeNotFound；祖先缺失或出现环返回 GraphInconsistency。
pub fn path_to(graph: &NarrativeGraph, node_id: NodeId) -> Result<Vec<&StoryNode>, StoryError> {
    let target = graph.get(node_id).ok_or(StoryError::NodeNotFound(node_id))?;
    let mut path = vec![target];
    let mut cursor = target;

    while let Some(parent_id) = cursor.parent_id {
        if path.len() > graph.len() {
            return Err(StoryError::GraphInconsistency(format!(
                "cycle detected above node {}",
                node_id
            )));
        }
        cursor = graph.get(parent_id).ok_or_else(|| {
            StoryError::GraphInconsistency(format!(
                "ancestor {} of node {} is missing",
                parent_id, node_id
            ))
        })?;
        path.push(cursor);
    }

    path.reverse();
    Ok(path)
}

/// 深度优先枚举分支：到达叶子或结局节点即产出一条分支（结局总是截断分支）
pub fn enumerate_branches(graph: &NarrativeGraph) -> Vec<StoryBranch> {
    let Some(root) = graph.root() else {
        return Vec::new();
    };

    let mut branches = Vec::new();
    // 显式栈：(节点, 到该节点为止的路径)
    let mut stack: Vec<(&StoryNode, Vec<&StoryNode>)> = vec![(root, Vec::new())];

    while let Some((node, mut trail)) = stack.pop() {
        trail.push(node);
        let children = graph.children_of(node.id);

        if node.is_ending || children.is_empty() {
            branches.push(StoryBranch {
                id: format!("branch_{}", branches.len() + 1),
                nodes: trail.iter().map(|n| BranchNode::from(*n)).collect(),
                is_complete: node.is_ending,
            });
            continue;
        }

        // 逆序压栈，保证先访问先创建的子节点；每个节点只有一个父节点，从根出发不会成环
        for child in children.into_iter().rev() {
            stack.push((child, trail.clone()));
        }
    }

    branches
}

/// 本地构建分支集合（服务端分支接口不可用时）
pub fn local_branches(graph: &NarrativeGraph, story_id: StoryId, title: &str) -> StoryBranches {
    StoryBranches::from_branches(story_id, title, enumerate_branches(graph))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::narrative::tests::node;
    use std::collections::HashSet;

    fn ids(path: &[&StoryNode]) -> Vec<NodeId> {
        path.iter().map(|n| n.id).collect()
    }

    fn sample() -> NarrativeGraph {
        //      1
        //    /   \
        //   2     3
        //  / \     \
        // 4   5     6
        NarrativeGraph::build(vec![
            node(1, None),
            node(2, Some(1)),
            node(3, Some(1)),
            node(4, Some(2)),
            node(5, Some(2)),
            node(6, Some(3)),
        ])
        .unwrap()
    }

    #[test]
    fn test_path_starts_at_root_and_links_parents() {
        let graph = sample();
        for n in graph.nodes() {
            let path = path_to(&graph, n.id).unwrap();
            assert_eq!(path.first().map(|p| p.id), graph.root().map(|r| r.id));
            assert_eq!(path.last().map(|p| p.id), Some(n.id));
            for pair in path.windows(2) {
                assert_eq!(pair[1].parent_id, Some(pair[0].id));
            }
        }
        assert_eq!(ids(&path_to(&graph, 5).unwrap()), vec![1, 2, 5]);
    }

    #[test]
    fn test_path_is_idempotent() {
        let graph = sample();
        assert_eq!(
            ids(&path_to(&graph, 6).unwrap()),
            ids(&path_to(&graph, 6).unwrap())
        );
    }

    #[test]
    fn test_path_missing_target_and_ancestor() {
        let graph = NarrativeGraph::build(vec![node(1, None), node(3, Some(2))]).unwrap();
        assert!(matches!(
            path_to(&graph, 9).unwrap_err(),
            StoryError::NodeNotFound(9)
        ));
        assert!(matches!(
            path_to(&graph, 3).unwrap_err(),
            StoryError::GraphInconsistency(_)
        ));
    }

    #[test]
    fn test_path_detects_cycle() {
        let graph = NarrativeGraph::build(vec![node(1, None), node(2, Some(3)), node(3, Some(2))])
            .unwrap();
        assert!(path_to(&graph, 2).unwrap_err().is_graph_error());
    }

    #[test]
    fn test_root_children_with_ending() {
        // R 下有 A、B；A 为结局，B 无子节点
        let mut a = node(2, Some(1));
        a.is_ending = true;
        let graph = NarrativeGraph::build(vec![node(1, None), a, node(3, Some(1))]).unwrap();

        let branches = enumerate_branches(&graph);
        assert_eq!(branches.len(), 2);
        assert_eq!(branches[0].node_ids(), vec![1, 2]);
        assert!(branches[0].is_complete);
        assert_eq!(branches[1].node_ids(), vec![1, 3]);
        assert!(!branches[1].is_complete);
        assert_eq!(branches[0].id, "branch_1");
        assert_eq!(branches[1].id, "branch_2");
    }

    #[test]
    fn test_ending_closes_branch_even_with_children() {
        let mut end = node(2, Some(1));
        end.is_ending = true;
        let graph = NarrativeGraph::build(vec![node(1, None), end, node(3, Some(2))]).unwrap();
        let branches = enumerate_branches(&graph);
        assert_eq!(branches.len(), 1);
        assert_eq!(branches[0].node_ids(), vec![1, 2]);
    }

    #[test]
    fn test_branches_have_no_repeated_nodes() {
        let graph = sample();
        let branches = enumerate_branches(&graph);
        assert_eq!(branches.len(), 3);
        assert_eq!(branches[0].node_ids(), vec![1, 2, 4]);
        assert_eq!(branches[1].node_ids(), vec![1, 2, 5]);
        assert_eq!(branches[2].node_ids(), vec![1, 3, 6]);
        for branch in &branches {
            let unique: HashSet<NodeId> = branch.node_ids().into_iter().collect();
            assert_eq!(unique.len(), branch.nodes.len());
        }
    }

    #[test]
    fn test_empty_graph_has_no_branches() {
        let graph = NarrativeGraph::build(vec![]).unwrap();
        assert!(enumerate_branches(&graph).is_empty());
        let set = local_branches(&graph, 1, "Empty");
        assert_eq!(set.total_branches, 0);
    }

    #[test]
    fn test_single_root_is_one_branch() {
        let graph = NarrativeGraph::build(vec![node(1, None)]).unwrap();
        let set = local_branches(&graph, 1, "Tale");
        assert_eq!(set.total_branches, 1);
        assert_eq!(set.complete_story_text.as_deref(), Some("node 1"));
        assert!(!set.has_complete_ending);
    }
}
