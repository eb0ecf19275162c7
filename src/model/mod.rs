//! 数据模型：故事、节点、分支、生成任务（与后端 JSON 一一对应）

pub mod branch;
pub mod job;
pub mod node;
pub mod story;

pub use branch::{BranchNode, SaveBranchesRequest, StoryBranch, StoryBranches};
pub use job::{GenerationJob, JobHandle, JobId, JobKind, JobResult, JobStatus};
pub use node::{NodeId, NodeMetadata, StoryChoice, StoryNode};
pub use story::{
    NarratorPersona, Story, StoryAtmosphere, StoryDraft, StoryId, StoryLanguage, StoryPage,
};

/// 宽松时间戳：后端可能返回 RFC 3339，也可能返回不带时区的 ISO-8601（按 UTC 处理）
pub(crate) mod timestamp {
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn parse(raw: &str) -> Option<DateTime<Utc>> {
        if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
            return Some(dt.with_timezone(&Utc));
        }
        NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
            .ok()
            .map(|naive| naive.and_utc())
    }

    pub fn serialize<S>(value: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(dt) => serializer.serialize_some(&dt.to_rfc3339()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        Ok(raw.as_deref().and_then(parse))
    }
}

/// `null` 与缺省都视为空列表
pub(crate) fn null_as_empty<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: serde::Deserializer<'de>,
    T: serde::Deserialize<'de>,
{
    use serde::Deserialize;
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}
