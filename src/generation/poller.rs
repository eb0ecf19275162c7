//! 任务轮询
//!
//! 固定间隔查询任务状态，直到终态或次数用尽。先查询再等待；每个挂起点都与取消令牌竞速。

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::api::StoryApi;
use crate::config::GenerationSection;
use crate::core::StoryError;
use crate::model::{GenerationJob, JobId, JobResult, JobStatus, NodeId};

/// 任务没有给出错误信息时使用
const FALLBACK_FAILURE: &str = "Generation failed";

/// 任务完成后的结果
#[derive(Debug, Clone, PartialEq)]
pub struct JobOutcome {
    pub job_id: JobId,
    /// 后端在完成时写回的新节点 id（可能缺失）
    pub node_id: Option<NodeId>,
    pub result: JobResult,
}

/// 轮询器：间隔与次数上限
#[derive(Debug, Clone)]
pub struct JobPoller {
    interval: Duration,
    max_attempts: u32,
}

impl Default for JobPoller {
    fn default() -> Self {
        Self::new(Duration::from_millis(1000), 120)
    }
}

impl JobPoller {
    pub fn new(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn from_config(section: &GenerationSection) -> Self {
        Self::new(section.poll_interval(), section.max_poll_attempts)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// 轮询直到终态
    ///
    /// 每次观察到 processing 调用一次 `on_progress(attempt, job)`；pending 继续等待但不回调。
    pub async fn poll<F>(
        &self,
        api: &dyn StoryApi,
        job_id: JobId,
        mut on_progress: F,
        cancel: &CancellationToken,
    ) -> Result<JobOutcome, StoryError>
    where
        F: FnMut(u32, &GenerationJob),
    {
        let mut last_status: Option<JobStatus> = None;

        for attempt in 1..=self.max_attempts {
            if attempt > 1 {
                tokio::select! {
                    _ = cancel.cancelled() => return Err(StoryError::Cancelled),
                    _ = tokio::time::sleep(self.interval) => {}
                }
            }

            let job = tokio::select! {
                _ = cancel.cancelled() => return Err(StoryError::Cancelled),
                res = api.get_job(job_id) => res?,
            };
            tracing::debug!(job_id, attempt, status = ?job.status, "Polled generation job");

            if let Some(prev) = last_status {
                if job.status.rank() < prev.rank() {
                    tracing::warn!(job_id, from = ?prev, to = ?job.status, "Job status moved backwards");
                }
            }
            last_status = Some(job.status);

            match job.status {
                JobStatus::Pending => {}
                JobStatus::Processing => on_progress(attempt, &job),
                JobStatus::Completed => {
                    let node_id = job.node_id;
                    return match job.result {
                        Some(result) => Ok(JobOutcome {
                            job_id,
                            node_id,
                            result,
                        }),
                        None => Err(StoryError::JobFailed(
                            "job completed without a result".to_string(),
                        )),
                    };
                }
                JobStatus::Failed => {
                    let message = job
                        .error
                        .filter(|m| !m.trim().is_empty())
                        .unwrap_or_else(|| FALLBACK_FAILURE.to_string());
                    return Err(StoryError::JobFailed(message));
                }
                JobStatus::Cancelled => {
                    return Err(StoryError::JobFailed("job was cancelled".to_string()));
                }
            }
        }

        tracing::warn!(job_id, attempts = self.max_attempts, "Generation job polling exhausted");
        Err(StoryError::JobTimeout {
            attempts: self.max_attempts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::MockStoryApi;

    fn fast(max_attempts: u32) -> JobPoller {
        JobPoller::new(Duration::from_millis(1), max_attempts)
    }

    #[tokio::test]
    async fn test_processing_then_completed() {
        let api = MockStoryApi::new().with_job_script(vec![
            MockStoryApi::job(42, JobStatus::Processing),
            MockStoryApi::job(42, JobStatus::Processing),
            MockStoryApi::job(42, JobStatus::Processing),
            MockStoryApi::completed_job(42, Some(9), "X"),
        ]);
        let mut progress = Vec::new();
        let outcome = fast(120)
            .poll(&api, 42, |n, _| progress.push(n), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome.result.content, "X");
        assert_eq!(outcome.node_id, Some(9));
        assert_eq!(api.job_fetches(), 4);
        assert_eq!(progress, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_never_leaves_pending_times_out() {
        let api = MockStoryApi::new().with_job_script(vec![MockStoryApi::job(1, JobStatus::Pending)]);
        let err = fast(5)
            .poll(&api, 1, |_, _| {}, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, StoryError::JobTimeout { attempts: 5 }));
        assert_eq!(api.job_fetches(), 5);
    }

    #[tokio::test]
    async fn test_failed_carries_job_message() {
        let api = MockStoryApi::new().with_job_script(vec![
            MockStoryApi::job(3, JobStatus::Processing),
            MockStoryApi::failed_job(3, "model overloaded"),
        ]);
        let err = fast(10)
            .poll(&api, 3, |_, _| {}, &CancellationToken::new())
            .await
            .unwrap_err();
        match err {
            StoryError::JobFailed(msg) => assert_eq!(msg, "model overloaded"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_failed_without_message_uses_fallback() {
        let api = MockStoryApi::new().with_job_script(vec![MockStoryApi::job(3, JobStatus::Failed)]);
        let err = fast(10)
            .poll(&api, 3, |_, _| {}, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, StoryError::JobFailed(ref m) if m == FALLBACK_FAILURE));
    }

    #[tokio::test]
    async fn test_missing_job_is_transport_error() {
        let api = MockStoryApi::new();
        let err = fast(10)
            .poll(&api, 3, |_, _| {}, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, StoryError::Transport(_)));
        assert_eq!(api.job_fetches(), 1);
    }

    #[tokio::test]
    async fn test_cancel_stops_polling() {
        let api = MockStoryApi::new().with_job_script(vec![MockStoryApi::job(1, JobStatus::Pending)]);
        let token = CancellationToken::new();
        let poller = JobPoller::new(Duration::from_secs(60), 10);
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });
        let err = poller.poll(&api, 1, |_, _| {}, &token).await.unwrap_err();
        assert!(matches!(err, StoryError::Cancelled));
        assert_eq!(api.job_fetches(), 1);
    }
}
