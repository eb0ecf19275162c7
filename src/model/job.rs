//! 生成任务：后端以任务资源追踪一次异步生成
//!
//! 状态单调：pending -> processing -> completed | failed；`result` 仅在 completed 时存在，`error_message` 仅在 failed 时存在。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::node::{NodeId, StoryChoice};
use super::story::StoryId;

pub type JobId = i64;

/// 任务状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    /// 后端取消（仅 pending 的任务可取消）
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// 单调性比较用的序号
    pub(crate) fn rank(self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Processing => 1,
            Self::Completed | Self::Failed | Self::Cancelled => 2,
        }
    }
}

/// 生成类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobKind {
    #[serde(rename = "generate_opening", alias = "story_start")]
    Opening,
    #[serde(
        rename = "generate_continuation",
        alias = "story_continue",
        alias = "story_branch"
    )]
    Continuation,
    #[serde(rename = "generate_ending")]
    Ending,
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Opening => "opening",
            Self::Continuation => "continuation",
            Self::Ending => "ending",
        };
        f.write_str(name)
    }
}

/// 任务完成时的生成结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    pub content: String,
    #[serde(default, deserialize_with = "crate::model::null_as_empty")]
    pub choices: Vec<StoryChoice>,
    #[serde(default)]
    pub is_ending: bool,
}

/// GET /jobs/{id} 的响应
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationJob {
    pub id: JobId,
    #[serde(default)]
    pub story_id: Option<StoryId>,
    /// 提交时为父节点；完成后后端改写为新建节点
    #[serde(default)]
    pub node_id: Option<NodeId>,
    #[serde(rename = "job_type")]
    pub kind: JobKind,
    pub status: JobStatus,
    #[serde(default)]
    pub result: Option<JobResult>,
    #[serde(default, rename = "error_message")]
    pub error: Option<String>,
    #[serde(default, with = "crate::model::timestamp")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, with = "crate::model::timestamp")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, with = "crate::model::timestamp")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl GenerationJob {
    /// 运行时长（秒），开始与完成时间都存在时才有值
    pub fn duration_secs(&self) -> Option<f64> {
        let started = self.started_at?;
        let completed = self.completed_at?;
        Some((completed - started).num_milliseconds() as f64 / 1000.0)
    }
}

/// 提交生成任务后得到的句柄
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobHandle {
    pub job_id: JobId,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_kind_aliases() {
        let kind: JobKind = serde_json::from_str(r#""story_continue""#).unwrap();
        assert_eq!(kind, JobKind::Continuation);
        let kind: JobKind = serde_json::from_str(r#""generate_ending""#).unwrap();
        assert_eq!(kind, JobKind::Ending);
    }

    #[test]
    fn test_completed_job_decodes() {
        let json = r#"{
            "id": 42, "story_id": 1, "node_id": 9, "job_type": "generate_continuation",
            "status": "completed",
            "result": {"content": "X", "choices": [], "is_ending": false},
            "error_message": null,
            "created_at": "2025-01-01T00:00:00",
            "started_at": "2025-01-01T00:00:01",
            "completed_at": "2025-01-01T00:00:03.500000"
        }"#;
        let job: GenerationJob = serde_json::from_str(json).unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.result.as_ref().unwrap().content, "X");
        assert_eq!(job.duration_secs(), Some(2.5));
    }

    #[test]
    fn test_status_ordering() {
        assert!(JobStatus::Pending.rank() < JobStatus::Processing.rank());
        assert!(JobStatus::Failed.is_terminal());
        assert!(!JobStatus::Processing.is_terminal());
    }
}
