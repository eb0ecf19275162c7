//! Mock 后端（用于测试，无需网络）
//!
//! 内存中保存故事与节点；生成任务的状态序列、SSE 字节块都可预先编排，并记录调用次数。

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{self, StreamExt};

use crate::api::{ApiError, ByteStream, GenerationRequest, StoryApi};
use crate::model::{
    GenerationJob, JobHandle, JobId, JobKind, JobResult, JobStatus, NodeId, SaveBranchesRequest,
    Story, StoryBranches, StoryDraft, StoryId, StoryNode, StoryPage,
};

#[derive(Debug, Default)]
struct MockState {
    stories: HashMap<StoryId, Story>,
    nodes: Vec<StoryNode>,
    /// 下一个任务依次返回的状态；只剩一条时重复返回
    job_script: VecDeque<GenerationJob>,
    stream_chunks: Vec<Bytes>,
    /// 流在给出全部字节块后挂起，直到被取消
    hang_stream: bool,
    /// 流响应返回前的延迟
    stream_latency: Option<Duration>,
    /// 下一次生成请求时加入节点集的新节点
    generated: VecDeque<StoryNode>,
    server_branches: Option<StoryBranches>,
    saved_branches: Vec<SaveBranchesRequest>,
    story_latency: HashMap<StoryId, Duration>,
    /// 服务端记录、但故事详情不返回的阅读位置
    resume_points: HashMap<StoryId, NodeId>,
    fail_node_path: bool,
    fail_get_story: bool,
    fail_generation: Option<String>,
    next_story_id: StoryId,
}

/// 可编排的内存后端
#[derive(Debug, Default)]
pub struct MockStoryApi {
    state: Mutex<MockState>,
    generation_calls: AtomicUsize,
    stream_calls: AtomicUsize,
    job_fetches: AtomicUsize,
    path_calls: AtomicUsize,
}

impl MockStoryApi {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        // 测试替身：锁中毒时沿用内部数据
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn with_story(self, story: Story) -> Self {
        {
            let mut state = self.lock();
            state.next_story_id = state.next_story_id.max(story.id);
            state.stories.insert(story.id, story);
        }
        self
    }

    pub fn with_nodes(self, nodes: Vec<StoryNode>) -> Self {
        self.lock().nodes = nodes;
        self
    }

    /// 编排下一个任务的状态序列
    pub fn with_job_script(self, jobs: Vec<GenerationJob>) -> Self {
        self.lock().job_script = jobs.into();
        self
    }

    pub fn with_stream_chunks<I, S>(self, chunks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.lock().stream_chunks = chunks
            .into_iter()
            .map(|c| Bytes::from(c.into().into_bytes()))
            .collect();
        self
    }

    pub fn with_hanging_stream(self) -> Self {
        self.lock().hang_stream = true;
        self
    }

    pub fn with_stream_latency(self, latency: Duration) -> Self {
        self.lock().stream_latency = Some(latency);
        self
    }

    /// 生成请求到达时把该节点写入节点集（模拟服务端持久化）
    pub fn with_generated_node(self, node: StoryNode) -> Self {
        self.lock().generated.push_back(node);
        self
    }

    pub fn with_server_branches(self, branches: StoryBranches) -> Self {
        self.lock().server_branches = Some(branches);
        self
    }

    pub fn with_story_latency(self, story_id: StoryId, latency: Duration) -> Self {
        self.lock().story_latency.insert(story_id, latency);
        self
    }

    /// 只能通过 /current 查到的阅读位置
    pub fn with_resume_point(self, story_id: StoryId, node_id: NodeId) -> Self {
        self.lock().resume_points.insert(story_id, node_id);
        self
    }

    pub fn failing_node_path(self) -> Self {
        self.lock().fail_node_path = true;
        self
    }

    pub fn failing_get_story(self) -> Self {
        self.lock().fail_get_story = true;
        self
    }

    /// 生成请求直接返回 500
    pub fn failing_generation(self, message: impl Into<String>) -> Self {
        self.lock().fail_generation = Some(message.into());
        self
    }

    pub fn generation_calls(&self) -> usize {
        self.generation_calls.load(Ordering::SeqCst)
    }

    pub fn stream_calls(&self) -> usize {
        self.stream_calls.load(Ordering::SeqCst)
    }

    pub fn job_fetches(&self) -> usize {
        self.job_fetches.load(Ordering::SeqCst)
    }

    pub fn path_calls(&self) -> usize {
        self.path_calls.load(Ordering::SeqCst)
    }

    pub fn saved_branches(&self) -> Vec<SaveBranchesRequest> {
        self.lock().saved_branches.clone()
    }


    /// 构造一条任务状态，便于编排 job_script
    pub fn job(id: JobId, status: JobStatus) -> GenerationJob {
        GenerationJob {
            id,
            story_id: None,
            node_id: None,
            kind: JobKind::Continuation,
            status,
            result: None,
            error: None,
            created_at: None,
            started_at: None,
            completed_at: None,
        }
    }

    pub fn completed_job(id: JobId, node_id: Option<NodeId>, content: &str) -> GenerationJob {
        GenerationJob {
            node_id,
            result: Some(JobResult {
                content: content.to_string(),
                choices: Vec::new(),
                is_ending: false,
            }),
            ..Self::job(id, JobStatus::Completed)
        }
    }

    pub fn failed_job(id: JobId, message: &str) -> GenerationJob {
        GenerationJob {
            error: Some(message.to_string()),
            ..Self::job(id, JobStatus::Failed)
        }
    }

    fn not_found(what: &str) -> ApiError {
        ApiError::Status {
            status: 404,
            message: format!("{} not found", what),
        }
    }

    /// 生成请求的公共前置：计数、失败注入、写入新节点并推进故事的当前节点
    fn accept_generation(&self, request: &GenerationRequest) -> Result<(), ApiError> {
        self.generation_calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.lock();
        if let Some(message) = state.fail_generation.clone() {
            return Err(ApiError::Status {
                status: 500,
                message,
            });
        }
        if let Some(node) = state.generated.pop_front() {
            if let Some(story) = state.stories.get_mut(&request.story_id()) {
                if node.parent_id.is_none() {
                    story.root_node_id = Some(node.id);
                }
                story.current_node_id = Some(node.id);
            }
            state.resume_points.insert(request.story_id(), node.id);
            state.nodes.push(node);
        }
        Ok(())
    }
}

#[async_trait]
impl StoryApi for MockStoryApi {
    async fn get_story(&self, story_id: StoryId) -> Result<Story, ApiError> {
        let latency = self.lock().story_latency.get(&story_id).copied();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        let state = self.lock();
        if state.fail_get_story {
            return Err(ApiError::Request("connection refused".to_string()));
        }
        state
            .stories
            .get(&story_id)
            .cloned()
            .ok_or_else(|| Self::not_found("Story"))
    }

    async fn list_stories(&self, page: u32, page_size: u32) -> Result<StoryPage, ApiError> {
        let state = self.lock();
        let mut all: Vec<Story> = state.stories.values().cloned().collect();
        all.sort_by_key(|s| s.id);
        let size = page_size.max(1);
        let start = (page.saturating_sub(1) * size) as usize;
        let items = all.iter().skip(start).take(size as usize).cloned().collect();
        let total = all.len() as u64;
        Ok(StoryPage {
            items,
            total,
            page,
            size,
            total_pages: ((total + size as u64 - 1) / size as u64) as u32,
        })
    }

    async fn create_story(&self, draft: &StoryDraft) -> Result<Story, ApiError> {
        let mut state = self.lock();
        state.next_story_id += 1;
        let story = Story {
            id: state.next_story_id,
            title: draft.title.clone(),
            description: draft.description.clone(),
            genre: Some(draft.genre.clone()),
            narrator_persona: draft.narrator_persona,
            atmosphere: draft.atmosphere,
            language: draft.language,
            session_id: None,
            is_active: true,
            is_completed: false,
            root_node_id: None,
            current_node_id: None,
            complete_story_text: None,
            created_at: None,
            updated_at: None,
        };
        state.stories.insert(story.id, story.clone());
        Ok(story)
    }

    async fn delete_story(&self, story_id: StoryId) -> Result<(), ApiError> {
        let mut state = self.lock();
        state
            .stories
            .remove(&story_id)
            .map(|_| ())
            .ok_or_else(|| Self::not_found("Story"))?;
        state.nodes.retain(|n| n.story_id != story_id);
        Ok(())
    }

    async fn current_node(&self, story_id: StoryId) -> Result<StoryNode, ApiError> {
        let state = self.lock();
        let story = state
            .stories
            .get(&story_id)
            .ok_or_else(|| Self::not_found("Story"))?;
        let node_id = state
            .resume_points
            .get(&story_id)
            .copied()
            .or(story.current_node_id)
            .or(story.root_node_id)
            .ok_or_else(|| Self::not_found("Current node"))?;
        state
            .nodes
            .iter()
            .find(|n| n.story_id == story_id && n.id == node_id)
            .cloned()
            .ok_or_else(|| Self::not_found("Current node"))
    }

    async fn list_nodes(&self, story_id: StoryId) -> Result<Vec<StoryNode>, ApiError> {
        let state = self.lock();
        if !state.stories.contains_key(&story_id) {
            return Err(Self::not_found("Story"));
        }
        Ok(state
            .nodes
            .iter()
            .filter(|n| n.story_id == story_id)
            .cloned()
            .collect())
    }

    async fn get_node(&self, story_id: StoryId, node_id: NodeId) -> Result<StoryNode, ApiError> {
        self.lock()
            .nodes
            .iter()
            .find(|n| n.story_id == story_id && n.id == node_id)
            .cloned()
            .ok_or_else(|| Self::not_found("Node"))
    }

    async fn node_path(
        &self,
        story_id: StoryId,
        node_id: NodeId,
    ) -> Result<Vec<StoryNode>, ApiError> {
        self.path_calls.fetch_add(1, Ordering::SeqCst);
        let state = self.lock();
        if state.fail_node_path {
            return Err(ApiError::Status {
                status: 500,
                message: "path lookup failed".to_string(),
            });
        }
        let find = |id: NodeId| {
            state
                .nodes
                .iter()
                .find(|n| n.story_id == story_id && n.id == id)
        };
        let mut path = Vec::new();
        let mut cursor = find(node_id);
        while let Some(node) = cursor {
            path.push(node.clone());
            if path.len() > state.nodes.len() {
                break;
            }
            cursor = node.parent_id.and_then(find);
        }
        if path.is_empty() {
            return Err(Self::not_found("Node"));
        }
        path.reverse();
        Ok(path)
    }

    async fn get_branches(&self, _story_id: StoryId) -> Result<StoryBranches, ApiError> {
        self.lock()
            .server_branches
            .clone()
            .ok_or_else(|| Self::not_found("Branches"))
    }

    async fn save_branches(
        &self,
        story_id: StoryId,
        request: &SaveBranchesRequest,
    ) -> Result<StoryBranches, ApiError> {
        let mut state = self.lock();
        state.saved_branches.push(request.clone());
        let title = state
            .stories
            .get(&story_id)
            .map(|s| s.title.clone())
            .unwrap_or_default();
        let saved = StoryBranches::from_branches(story_id, title, request.branches.clone());
        state.server_branches = Some(saved.clone());
        Ok(saved)
    }

    async fn start_generation(&self, request: &GenerationRequest) -> Result<JobHandle, ApiError> {
        self.accept_generation(request)?;
        let job_id = self.lock().job_script.front().map(|j| j.id).unwrap_or(1);
        Ok(JobHandle { job_id })
    }

    async fn get_job(&self, job_id: JobId) -> Result<GenerationJob, ApiError> {
        self.job_fetches.fetch_add(1, Ordering::SeqCst);
        let mut state = self.lock();
        let job = if state.job_script.len() > 1 {
            state.job_script.pop_front()
        } else {
            state.job_script.front().cloned()
        };
        job.map(|j| GenerationJob { id: job_id, ..j })
            .ok_or_else(|| Self::not_found("Job"))
    }

    async fn stream_generation(&self, request: &GenerationRequest) -> Result<ByteStream, ApiError> {
        self.stream_calls.fetch_add(1, Ordering::SeqCst);
        self.accept_generation(request)?;
        let (chunks, hang, latency) = {
            let state = self.lock();
            (state.stream_chunks.clone(), state.hang_stream, state.stream_latency)
        };
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        let body = stream::iter(chunks.into_iter().map(Ok::<Bytes, ApiError>));
        if hang {
            Ok(Box::pin(body.chain(stream::pending())))
        } else {
            Ok(Box::pin(body))
        }
    }
}
