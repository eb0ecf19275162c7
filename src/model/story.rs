//! 故事元数据

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::node::NodeId;

pub type StoryId = i64;

/// 旁白人设
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum NarratorPersona {
    #[default]
    Mysterious,
    Epic,
    Horror,
    Comedic,
    Romantic,
}

/// 故事氛围
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoryAtmosphere {
    Dark,
    #[default]
    Magical,
    Peaceful,
    Tense,
    Whimsical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoryLanguage {
    #[default]
    English,
    Urdu,
}

/// 一个故事：展示元数据 + 根节点 / 当前节点引用
///
/// `root_node_id` 在开篇生成前为空；`current_node_id` 是用户上次阅读的位置（续读点）。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Story {
    pub id: StoryId,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub genre: Option<String>,
    #[serde(default)]
    pub narrator_persona: NarratorPersona,
    #[serde(default)]
    pub atmosphere: StoryAtmosphere,
    #[serde(default)]
    pub language: StoryLanguage,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub is_completed: bool,
    #[serde(default)]
    pub root_node_id: Option<NodeId>,
    #[serde(default)]
    pub current_node_id: Option<NodeId>,
    #[serde(default)]
    pub complete_story_text: Option<String>,
    #[serde(default, with = "crate::model::timestamp")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, with = "crate::model::timestamp")]
    pub updated_at: Option<DateTime<Utc>>,
}

fn default_true() -> bool {
    true
}

impl Story {
    /// 续读点：优先 current_node_id，否则 root_node_id
    pub fn resume_point(&self) -> Option<NodeId> {
        self.current_node_id.or(self.root_node_id)
    }
}

/// 创建故事请求体（POST /stories/）
#[derive(Debug, Clone, Serialize)]
pub struct StoryDraft {
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub genre: String,
    pub narrator_persona: NarratorPersona,
    pub atmosphere: StoryAtmosphere,
    pub language: StoryLanguage,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub initial_prompt: Option<String>,
}

impl StoryDraft {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: None,
            genre: "Fantasy".to_string(),
            narrator_persona: NarratorPersona::default(),
            atmosphere: StoryAtmosphere::default(),
            language: StoryLanguage::default(),
            initial_prompt: None,
        }
    }
}

/// 分页的故事列表（GET /stories/）
#[derive(Debug, Clone, Deserialize)]
pub struct StoryPage {
    pub items: Vec<Story>,
    pub total: u64,
    pub page: u32,
    pub size: u32,
    #[serde(default)]
    pub total_pages: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_story_detail_without_current_node() {
        // GET /stories/{id} 返回的 StoryDetail 不带 current_node_id，且附带 root_node 树
        let json = r#"{
            "id": 3, "title": "The Lantern", "description": null, "genre": "Fantasy",
            "narrator_persona": "epic", "atmosphere": "dark", "language": "english",
            "session_id": "abc", "is_active": true, "is_completed": false,
            "root_node_id": 10, "created_at": "2025-01-02T03:04:05",
            "updated_at": "2025-01-02T03:04:05+00:00",
            "root_node": {"id": 10, "children": []}, "node_count": 1
        }"#;
        let story: Story = serde_json::from_str(json).unwrap();
        assert_eq!(story.narrator_persona, NarratorPersona::Epic);
        assert_eq!(story.current_node_id, None);
        assert_eq!(story.resume_point(), Some(10));
        assert!(story.created_at.is_some());
    }

    #[test]
    fn test_resume_prefers_current_node() {
        let json = r#"{"id": 1, "title": "t", "root_node_id": 1, "current_node_id": 5}"#;
        let story: Story = serde_json::from_str(json).unwrap();
        assert_eq!(story.resume_point(), Some(5));
    }

    #[test]
    fn test_draft_serializes_lowercase_enums() {
        let draft = StoryDraft {
            atmosphere: StoryAtmosphere::Tense,
            ..StoryDraft::new("Night Train")
        };
        let value = serde_json::to_value(&draft).unwrap();
        assert_eq!(value["atmosphere"], "tense");
        assert_eq!(value["narrator_persona"], "mysterious");
        assert!(value.get("initial_prompt").is_none());
    }
}
