//! 生成编排器：加载故事、驱动生成、把结果提交到叙事图
//!
//! 状态机 Idle / Loading / Generating。同一实例同时最多一次生成；第二次请求直接返回 Busy，不发网络请求。
//! 每次生成带操作 id、每次加载带加载 id：只有仍然有效的操作才能提交，离开故事或取消后迟到的结果被丢弃。
//! 所有错误在此边界被吸收：写入 `error` 并广播 Notification。

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures_util::StreamExt;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::api::{ChoiceSelection, GenerationRequest, StoryApi};
use crate::config::{GenerationSection, TransportMode};
use crate::core::notification::{notification_for, Notification};
use crate::core::{GenerationSupervisor, OrchestratorState, StoryError};
use crate::generation::{decode_events, GenerationEvent, JobPoller};
use crate::graph::{local_branches, path_to, NarrativeGraph};
use crate::model::{JobKind, NodeId, SaveBranchesRequest, Story, StoryChoice, StoryId, StoryNode};

/// 广播给 UI 的事件
#[derive(Debug, Clone)]
pub enum OrchestratorEvent {
    Progress { label: String },
    Token { content: String },
    NodeCommitted { node_id: NodeId },
    StoryLoaded { story_id: StoryId },
    Notice(Notification),
}

/// 一次操作的结果；错误细节在状态与通知里
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Completed,
    /// 已有生成在进行，请求被忽略
    Busy,
    Failed,
    /// 被取消或被更新的操作取代，没有提交
    Cancelled,
}

/// 发往编排器的命令
#[derive(Debug, Clone)]
pub enum Command {
    Load(StoryId),
    Opening,
    /// 按当前节点选项序号续写（从 0 开始）
    Continue { choice_index: usize },
    Ending,
    GoTo(NodeId),
    Branches,
    Cancel,
    Exit,
}

/// 解析出的当前节点及其路径
#[derive(Debug)]
struct ResolvedPath {
    node: StoryNode,
    path: Vec<StoryNode>,
    /// 路径无法重建时的原因（此时 path 只含节点本身）
    degraded: Option<StoryError>,
}

/// 加载或生成完成后要一次性提交的内容
#[derive(Debug)]
struct StoryView {
    story: Story,
    nodes: Vec<StoryNode>,
    current: Option<ResolvedPath>,
}

enum Begin {
    Busy,
    Invalid(StoryError),
    Started {
        request: GenerationRequest,
        prior: HashSet<NodeId>,
        token: CancellationToken,
    },
}

#[derive(Debug, Clone)]
enum Intent {
    Opening,
    Continue(StoryChoice),
    ContinueIndex(usize),
    Ending,
}

pub struct Orchestrator {
    api: Arc<dyn StoryApi>,
    transport: TransportMode,
    poller: JobPoller,
    state_tx: watch::Sender<OrchestratorState>,
    event_tx: broadcast::Sender<OrchestratorEvent>,
    supervisor: GenerationSupervisor,
    next_op: AtomicU64,
}

impl Orchestrator {
    pub fn new(api: Arc<dyn StoryApi>, generation: &GenerationSection) -> Self {
        let (state_tx, _) = watch::channel(OrchestratorState::default());
        let (event_tx, _) = broadcast::channel(256);
        Self {
            api,
            transport: generation.transport,
            poller: JobPoller::from_config(generation),
            state_tx,
            event_tx,
            supervisor: GenerationSupervisor::new(),
            next_op: AtomicU64::new(1),
        }
    }

    pub fn with_transport(mut self, transport: TransportMode) -> Self {
        self.transport = transport;
        self
    }

    pub fn with_poller(mut self, poller: JobPoller) -> Self {
        self.poller = poller;
        self
    }

    pub fn api(&self) -> Arc<dyn StoryApi> {
        Arc::clone(&self.api)
    }

    pub fn transport(&self) -> TransportMode {
        self.transport
    }

    /// 状态快照订阅
    pub fn subscribe(&self) -> watch::Receiver<OrchestratorState> {
        self.state_tx.subscribe()
    }

    pub fn events(&self) -> broadcast::Receiver<OrchestratorEvent> {
        self.event_tx.subscribe()
    }

    pub fn snapshot(&self) -> OrchestratorState {
        self.state_tx.borrow().clone()
    }

    fn next_id(&self) -> u64 {
        self.next_op.fetch_add(1, Ordering::Relaxed)
    }

    fn emit(&self, event: OrchestratorEvent) {
        let _ = self.event_tx.send(event);
    }

    fn notify(&self, notice: Notification) {
        self.emit(OrchestratorEvent::Notice(notice));
    }

    // ---------- 加载 ----------

    /// 加载故事：并发取元数据与节点集，定位续读点并解析路径
    pub async fn load_story(&self, story_id: StoryId) -> Outcome {
        let load_id = self.next_id();
        let token = self.supervisor.child_token();
        self.state_tx.send_modify(|s| {
            s.pending_load = Some(load_id);
            s.is_loading = true;
            s.error = None;
        });
        tracing::info!(story_id, "Loading story");

        let result = tokio::select! {
            _ = token.cancelled() => Err(StoryError::Cancelled),
            view = self.fetch_story_view(story_id) => view,
        };

        let mut outcome = Outcome::Cancelled;
        let mut notices = Vec::new();
        self.state_tx.send_if_modified(|s| {
            if s.pending_load != Some(load_id) {
                return false;
            }
            s.pending_load = None;
            s.is_loading = false;
            match result {
                Ok(view) => {
                    s.current_story = Some(view.story);
                    s.all_nodes = view.nodes;
                    s.branches = None;
                    match view.current {
                        Some(resolved) => {
                            if let Some(reason) = resolved.degraded {
                                notices.push(notification_for(&reason));
                            }
                            s.current_node = Some(resolved.node);
                            s.story_path = resolved.path;
                        }
                        None => {
                            s.current_node = None;
                            s.story_path = Vec::new();
                        }
                    }
                    outcome = Outcome::Completed;
                }
                Err(StoryError::Cancelled) => {}
                Err(e) => {
                    tracing::error!(story_id, error = %e, "Failed to load story");
                    s.current_story = None;
                    s.current_node = None;
                    s.story_path.clear();
                    s.all_nodes.clear();
                    s.branches = None;
                    s.error = Some(e.to_string());
                    notices.push(notification_for(&e));
                    outcome = Outcome::Failed;
                }
            }
            true
        });

        if outcome == Outcome::Completed {
            tracing::info!(story_id, "Story loaded");
            self.emit(OrchestratorEvent::StoryLoaded { story_id });
        }
        for notice in notices {
            self.notify(notice);
        }
        outcome
    }

    async fn fetch_story_view(&self, story_id: StoryId) -> Result<StoryView, StoryError> {
        let (story, mut nodes) =
            tokio::try_join!(self.api.get_story(story_id), self.api.list_nodes(story_id))?;

        let Some(resume) = self.resume_point(&story, &mut nodes).await else {
            return Ok(StoryView {
                story,
                nodes,
                current: None,
            });
        };

        self.ensure_node(story_id, resume, &mut nodes).await;
        let current = match self.resolve_path(story_id, resume, &nodes).await {
            Ok(resolved) => Some(resolved),
            Err(e) => {
                tracing::warn!(story_id, node_id = resume, error = %e, "Resume point is not available");
                self.notify(notification_for(&e));
                None
            }
        };
        Ok(StoryView {
            story,
            nodes,
            current,
        })
    }

    /// 续读点：故事详情带 current_node_id 时直接使用，否则问 /current；404 或失败时退回根节点
    async fn resume_point(&self, story: &Story, nodes: &mut Vec<StoryNode>) -> Option<NodeId> {
        if story.current_node_id.is_some() {
            return story.resume_point();
        }
        let root = story.root_node_id?;
        match self.api.current_node(story.id).await {
            Ok(node) => {
                let id = node.id;
                if !nodes.iter().any(|n| n.id == id) {
                    nodes.push(node);
                }
                Some(id)
            }
            Err(e) if e.is_not_found() => Some(root),
            Err(e) => {
                tracing::warn!(story_id = story.id, error = %e, "Current position lookup failed, resuming at root");
                Some(root)
            }
        }
    }

    /// 节点集里缺少目标节点时单独获取一次
    async fn ensure_node(&self, story_id: StoryId, node_id: NodeId, nodes: &mut Vec<StoryNode>) {
        if nodes.iter().any(|n| n.id == node_id) {
            return;
        }
        match self.api.get_node(story_id, node_id).await {
            Ok(node) => nodes.push(node),
            Err(e) => tracing::warn!(story_id, node_id, error = %e, "Failed to fetch node"),
        }
    }

    /// 路径：服务端优先，失败时本地解析；本地也失败则只保留节点本身
    async fn resolve_path(
        &self,
        story_id: StoryId,
        node_id: NodeId,
        nodes: &[StoryNode],
    ) -> Result<ResolvedPath, StoryError> {
        let node = nodes
            .iter()
            .find(|n| n.id == node_id)
            .cloned()
            .ok_or(StoryError::NodeNotFound(node_id))?;

        match self.api.node_path(story_id, node_id).await {
            Ok(path) if path.last().map(|n| n.id) == Some(node_id) => {
                return Ok(ResolvedPath {
                    node,
                    path,
                    degraded: None,
                });
            }
            Ok(_) => tracing::warn!(node_id, "Server path does not end at the requested node"),
            Err(e) => tracing::warn!(node_id, error = %e, "Server path lookup failed, resolving locally"),
        }

        let local = NarrativeGraph::build(nodes.to_vec()).and_then(|graph| {
            path_to(&graph, node_id).map(|path| path.into_iter().cloned().collect::<Vec<_>>())
        });
        match local {
            Ok(path) => Ok(ResolvedPath {
                node,
                path,
                degraded: None,
            }),
            Err(e) => {
                tracing::warn!(node_id, error = %e, "Path resolution failed, showing node alone");
                Ok(ResolvedPath {
                    path: vec![node.clone()],
                    node,
                    degraded: Some(e),
                })
            }
        }
    }

    // ---------- 生成 ----------

    pub async fn generate_opening(&self) -> Outcome {
        self.run_generation(Intent::Opening).await
    }

    pub async fn continue_story(&self, choice: &StoryChoice) -> Outcome {
        self.run_generation(Intent::Continue(choice.clone())).await
    }

    /// 按当前节点的选项序号续写
    pub async fn choose(&self, choice_index: usize) -> Outcome {
        self.run_generation(Intent::ContinueIndex(choice_index)).await
    }

    pub async fn generate_ending(&self) -> Outcome {
        self.run_generation(Intent::Ending).await
    }

    /// 依据当前状态构造请求；在任何网络请求之前检查前置条件
    fn request_for(state: &OrchestratorState, intent: &Intent) -> Result<GenerationRequest, StoryError> {
        let story = state.current_story.as_ref().ok_or(StoryError::NoStoryLoaded)?;
        let current = || state.current_node.as_ref().ok_or(StoryError::NoCurrentNode);
        match intent {
            Intent::Opening => Ok(GenerationRequest::Opening { story_id: story.id }),
            Intent::Ending => Ok(GenerationRequest::Ending {
                story_id: story.id,
                node_id: current()?.id,
            }),
            Intent::Continue(choice) => Self::continuation(story.id, current()?, choice.clone()),
            Intent::ContinueIndex(i) => {
                let node = current()?;
                let choice = node
                    .choices
                    .get(*i)
                    .cloned()
                    .ok_or(StoryError::UnknownChoice(*i))?;
                Self::continuation(story.id, node, choice)
            }
        }
    }

    fn continuation(
        story_id: StoryId,
        node: &StoryNode,
        choice: StoryChoice,
    ) -> Result<GenerationRequest, StoryError> {
        if !node.can_continue() {
            return Err(StoryError::EndingReached);
        }
        Ok(GenerationRequest::Continue {
            story_id,
            node_id: node.id,
            choice: ChoiceSelection {
                choice_id: choice.id,
                choice_text: choice.text,
            },
        })
    }

    fn label_for(kind: JobKind) -> &'static str {
        match kind {
            JobKind::Opening => "Creating your story opening...",
            JobKind::Continuation => "Continuing the story...",
            JobKind::Ending => "Writing the ending...",
        }
    }

    async fn run_generation(&self, intent: Intent) -> Outcome {
        let op = self.next_id();
        let mut begin = Begin::Busy;
        self.state_tx.send_if_modified(|s| {
            if s.is_generating {
                return false;
            }
            match Self::request_for(s, &intent) {
                Err(e) => {
                    begin = Begin::Invalid(e);
                    false
                }
                Ok(request) => {
                    s.is_generating = true;
                    s.active_op = Some(op);
                    s.streaming_buffer.clear();
                    s.error = None;
                    s.progress_label = Some(Self::label_for(request.kind()).to_string());
                    // 与 is_generating 同一临界区登记令牌，cancel 不会落在两者之间
                    begin = Begin::Started {
                        request,
                        prior: s.all_nodes.iter().map(|n| n.id).collect(),
                        token: self.supervisor.begin(op),
                    };
                    true
                }
            }
        });

        let (request, prior, token) = match begin {
            Begin::Busy => {
                tracing::warn!("Generation already in progress, request ignored");
                return Outcome::Busy;
            }
            Begin::Invalid(e) => {
                tracing::warn!(error = %e, "Generation request rejected");
                self.state_tx.send_modify(|s| s.error = Some(e.to_string()));
                self.notify(notification_for(&e));
                return Outcome::Failed;
            }
            Begin::Started {
                request,
                prior,
                token,
            } => (request, prior, token),
        };

        let story_id = request.story_id();
        tracing::info!(story_id, kind = %request.kind(), transport = ?self.transport, "Generation started");
        self.emit(OrchestratorEvent::Progress {
            label: Self::label_for(request.kind()).to_string(),
        });

        let result = self.execute(&request, op, &token, &prior).await;
        self.finish(op, &request, &token, result).await
    }

    async fn execute(
        &self,
        request: &GenerationRequest,
        op: u64,
        token: &CancellationToken,
        prior: &HashSet<NodeId>,
    ) -> Result<StoryView, StoryError> {
        let explicit = match self.transport {
            TransportMode::Stream => Some(self.run_stream(request, op, token).await?),
            TransportMode::Poll => self.run_poll(request, op, token).await?,
        };
        tokio::select! {
            _ = token.cancelled() => Err(StoryError::Cancelled),
            view = self.reconcile(request, explicit, prior) => view,
        }
    }

    /// 流式：逐个消费事件，token 追加到缓冲，done 给出新节点 id
    async fn run_stream(
        &self,
        request: &GenerationRequest,
        op: u64,
        token: &CancellationToken,
    ) -> Result<NodeId, StoryError> {
        let body = tokio::select! {
            _ = token.cancelled() => return Err(StoryError::Cancelled),
            body = self.api.stream_generation(request) => body?,
        };
        let events = decode_events(body);
        tokio::pin!(events);

        loop {
            let next = tokio::select! {
                _ = token.cancelled() => return Err(StoryError::Cancelled),
                next = events.next() => next,
            };
            match next {
                Some(Ok(GenerationEvent::Token { content })) => {
                    let mut label = None;
                    self.state_tx.send_if_modified(|s| {
                        if s.active_op != Some(op) {
                            return false;
                        }
                        s.streaming_buffer.push_str(&content);
                        let text = format!("Writing... {} characters", s.streaming_buffer.chars().count());
                        s.progress_label = Some(text.clone());
                        label = Some(text);
                        true
                    });
                    if let Some(label) = label {
                        self.emit(OrchestratorEvent::Token { content });
                        self.emit(OrchestratorEvent::Progress { label });
                    }
                }
                Some(Ok(GenerationEvent::Done(done))) => {
                    tracing::debug!(node_id = done.node_id, is_ending = done.is_ending, "Stream completed");
                    return Ok(done.node_id);
                }
                Some(Ok(GenerationEvent::Error { message })) => {
                    return Err(StoryError::StreamError(message));
                }
                Some(Err(e)) => return Err(e),
                None => return Err(StoryError::StreamAborted),
            }
        }
    }

    /// 轮询：提交任务后等待终态；只有与父节点不同的 node_id 才算显式的新节点
    async fn run_poll(
        &self,
        request: &GenerationRequest,
        op: u64,
        token: &CancellationToken,
    ) -> Result<Option<NodeId>, StoryError> {
        let handle = tokio::select! {
            _ = token.cancelled() => return Err(StoryError::Cancelled),
            handle = self.api.start_generation(request) => handle?,
        };
        tracing::info!(job_id = handle.job_id, "Generation job submitted");

        let base = Self::label_for(request.kind());
        let max_attempts = self.poller.max_attempts();
        let outcome = self
            .poller
            .poll(
                self.api.as_ref(),
                handle.job_id,
                |attempt, _job| {
                    let label = format!("{} ({}/{})", base, attempt, max_attempts);
                    let updated = self.state_tx.send_if_modified(|s| {
                        if s.active_op != Some(op) {
                            return false;
                        }
                        s.progress_label = Some(label.clone());
                        true
                    });
                    if updated {
                        self.emit(OrchestratorEvent::Progress { label });
                    }
                },
                token,
            )
            .await?;

        Ok(outcome.node_id.filter(|id| Some(*id) != request.parent_id()))
    }

    /// 重新获取节点集，定位新节点并解析其路径
    async fn reconcile(
        &self,
        request: &GenerationRequest,
        explicit: Option<NodeId>,
        prior: &HashSet<NodeId>,
    ) -> Result<StoryView, StoryError> {
        let story_id = request.story_id();
        let (story, mut nodes) =
            tokio::try_join!(self.api.get_story(story_id), self.api.list_nodes(story_id))?;

        let node_id = match explicit {
            Some(id) => {
                self.ensure_node(story_id, id, &mut nodes).await;
                id
            }
            None => {
                let ending = request.kind() == JobKind::Ending;
                locate_new_node(&nodes, request.parent_id(), ending, prior).ok_or_else(|| {
                    StoryError::GraphInconsistency("generated node not found in story".to_string())
                })?
            }
        };

        let resolved = self.resolve_path(story_id, node_id, &nodes).await?;
        Ok(StoryView {
            story,
            nodes,
            current: Some(resolved),
        })
    }

    /// 结束一次生成：仍是当前操作、未取消、故事未切换时才提交
    async fn finish(
        &self,
        op: u64,
        request: &GenerationRequest,
        token: &CancellationToken,
        result: Result<StoryView, StoryError>,
    ) -> Outcome {
        let story_id = request.story_id();
        self.supervisor.end(op);
        let cancelled = token.is_cancelled();
        let mut outcome = Outcome::Cancelled;
        let mut committed: Option<(NodeId, Vec<StoryNode>, String)> = None;
        let mut notices = Vec::new();

        self.state_tx.send_if_modified(|s| {
            if s.active_op != Some(op) {
                return false;
            }
            s.active_op = None;
            s.is_generating = false;
            s.progress_label = None;
            s.streaming_buffer.clear();
            if cancelled {
                return true;
            }
            match result {
                Ok(view) if s.story_id() == Some(story_id) => {
                    if let Some(resolved) = view.current {
                        if let Some(reason) = resolved.degraded {
                            notices.push(notification_for(&reason));
                        }
                        committed = Some((resolved.node.id, view.nodes.clone(), view.story.title.clone()));
                        s.current_node = Some(resolved.node);
                        s.story_path = resolved.path;
                    }
                    s.current_story = Some(view.story);
                    s.all_nodes = view.nodes;
                    s.branches = None;
                    outcome = Outcome::Completed;
                }
                Ok(_) => tracing::info!(story_id, "Story changed during generation, result discarded"),
                Err(StoryError::Cancelled) => {}
                Err(e) => {
                    tracing::error!(story_id, error = %e, "Generation failed");
                    s.error = Some(e.to_string());
                    notices.push(notification_for(&e));
                    outcome = Outcome::Failed;
                }
            }
            true
        });

        if outcome == Outcome::Cancelled {
            tracing::info!(story_id, "Generation cancelled");
            self.notify(Notification::info("Generation cancelled"));
        }
        for notice in notices {
            self.notify(notice);
        }

        if let Some((node_id, nodes, title)) = committed {
            tracing::info!(story_id, node_id, "Generated node committed");
            self.emit(OrchestratorEvent::NodeCommitted { node_id });
            if request.kind() == JobKind::Ending {
                self.save_branches(story_id, &title, nodes).await;
            }
        }
        outcome
    }

    /// 结局提交后保存分支集合；失败只提示
    async fn save_branches(&self, story_id: StoryId, title: &str, nodes: Vec<StoryNode>) {
        let branches = match NarrativeGraph::build(nodes) {
            Ok(graph) => local_branches(&graph, story_id, title),
            Err(e) => {
                tracing::warn!(story_id, error = %e, "Skipping branch save");
                return;
            }
        };
        match self
            .api
            .save_branches(story_id, &SaveBranchesRequest::from(&branches))
            .await
        {
            Ok(saved) => {
                tracing::info!(story_id, total = saved.total_branches, "Story branches saved");
                self.state_tx.send_if_modified(|s| {
                    if s.story_id() != Some(story_id) {
                        return false;
                    }
                    s.branches = Some(saved);
                    true
                });
            }
            Err(e) => {
                tracing::warn!(story_id, error = %e, "Failed to save story branches");
                self.notify(Notification::warning(format!("Could not save story branches: {}", e)));
            }
        }
    }

    // ---------- 分支与导航 ----------

    /// 分支集合：服务端优先，失败或为空时本地枚举
    pub async fn load_branches(&self) -> Outcome {
        let snapshot = self.snapshot();
        let Some(story) = snapshot.current_story else {
            return self.reject(StoryError::NoStoryLoaded);
        };
        let token = self.supervisor.child_token();

        let fetched = tokio::select! {
            _ = token.cancelled() => return Outcome::Cancelled,
            fetched = self.api.get_branches(story.id) => fetched,
        };
        let branches = match fetched {
            Ok(set) if !set.branches.is_empty() || snapshot.all_nodes.is_empty() => set,
            other => {
                if let Err(e) = other {
                    tracing::warn!(story_id = story.id, error = %e, "Branch endpoint failed, enumerating locally");
                }
                match NarrativeGraph::build(snapshot.all_nodes) {
                    Ok(graph) => local_branches(&graph, story.id, &story.title),
                    Err(e) => return self.reject(e),
                }
            }
        };

        let total = branches.total_branches;
        let committed = self.state_tx.send_if_modified(|s| {
            if s.story_id() != Some(story.id) {
                return false;
            }
            s.branches = Some(branches);
            true
        });
        if committed {
            tracing::info!(story_id = story.id, total, "Branches loaded");
            Outcome::Completed
        } else {
            Outcome::Cancelled
        }
    }

    /// 跳到已加载故事中的某个节点（本地解析路径）
    pub fn go_to_node(&self, node_id: NodeId) -> Outcome {
        let mut result: Result<Option<StoryError>, StoryError> = Err(StoryError::NoStoryLoaded);
        let mut busy = false;
        self.state_tx.send_if_modified(|s| {
            if s.is_generating {
                busy = true;
                return false;
            }
            if s.current_story.is_none() {
                return false;
            }
            let Some(node) = s.all_nodes.iter().find(|n| n.id == node_id).cloned() else {
                result = Err(StoryError::NodeNotFound(node_id));
                return false;
            };
            let local = NarrativeGraph::build(s.all_nodes.clone()).and_then(|graph| {
                path_to(&graph, node_id).map(|path| path.into_iter().cloned().collect::<Vec<_>>())
            });
            let (path, degraded) = match local {
                Ok(path) => (path, None),
                Err(e) => (vec![node.clone()], Some(e)),
            };
            s.current_node = Some(node);
            s.story_path = path;
            s.error = None;
            result = Ok(degraded);
            true
        });

        if busy {
            tracing::warn!(node_id, "Navigation ignored while generating");
            return Outcome::Busy;
        }
        match result {
            Ok(degraded) => {
                if let Some(reason) = degraded {
                    self.notify(notification_for(&reason));
                }
                tracing::debug!(node_id, "Moved to node");
                Outcome::Completed
            }
            Err(e) => self.reject(e),
        }
    }

    fn reject(&self, err: StoryError) -> Outcome {
        tracing::warn!(error = %err, "Operation rejected");
        self.state_tx.send_modify(|s| s.error = Some(err.to_string()));
        self.notify(notification_for(&err));
        Outcome::Failed
    }

    // ---------- 取消与离开 ----------

    /// 取消正在进行的生成；没有生成时返回 false
    pub fn cancel_generation(&self) -> bool {
        let cancelled = self.supervisor.cancel_current();
        if cancelled {
            tracing::info!("Cancel requested for in-flight generation");
        }
        cancelled
    }

    /// 离开故事：取消全部进行中的操作并清空状态
    pub fn exit_story(&self) {
        self.supervisor.cancel_all();
        self.state_tx.send_modify(|s| s.clear_story());
        tracing::info!("Exited story");
    }

    /// 在后台任务中执行命令；Cancel 与 Exit 立即生效
    pub fn dispatch(self: &Arc<Self>, command: Command) -> JoinHandle<Outcome> {
        let this = Arc::clone(self);
        match command {
            Command::Cancel => {
                let outcome = if self.cancel_generation() {
                    Outcome::Completed
                } else {
                    Outcome::Failed
                };
                tokio::spawn(async move { outcome })
            }
            Command::Exit => {
                self.exit_story();
                tokio::spawn(async { Outcome::Completed })
            }
            Command::GoTo(node_id) => {
                let outcome = self.go_to_node(node_id);
                tokio::spawn(async move { outcome })
            }
            Command::Load(story_id) => tokio::spawn(async move { this.load_story(story_id).await }),
            Command::Opening => tokio::spawn(async move { this.generate_opening().await }),
            Command::Continue { choice_index } => {
                tokio::spawn(async move { this.choose(choice_index).await })
            }
            Command::Ending => tokio::spawn(async move { this.generate_ending().await }),
            Command::Branches => tokio::spawn(async move { this.load_branches().await }),
        }
    }
}

/// 没有显式 id 时按父节点定位新节点：优先生成前不存在的、最新的子节点；结局只匹配 is_ending
pub(crate) fn locate_new_node(
    nodes: &[StoryNode],
    parent: Option<NodeId>,
    ending: bool,
    prior: &HashSet<NodeId>,
) -> Option<NodeId> {
    let candidates: Vec<&StoryNode> = nodes
        .iter()
        .filter(|n| n.parent_id == parent && (!ending || n.is_ending))
        .collect();
    if let Some(fresh) = candidates.iter().rev().find(|n| !prior.contains(&n.id)) {
        return Some(fresh.id);
    }
    let fallback = candidates.last().map(|n| n.id);
    if fallback.is_some() {
        tracing::warn!(?parent, "No new child found, using the newest existing match");
    }
    fallback
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::MockStoryApi;

    fn node(id: NodeId, parent: Option<NodeId>) -> StoryNode {
        StoryNode {
            id,
            story_id: 1,
            parent_id: parent,
            content: format!("node {}", id),
            choice_text: None,
            choices: vec![StoryChoice::new("c1", "Onward")],
            metadata: None,
            is_root: parent.is_none(),
            is_ending: false,
            depth: 0,
            created_at: None,
        }
    }

    #[test]
    fn test_locate_prefers_unseen_child() {
        let nodes = vec![node(1, None), node(2, Some(1)), node(3, Some(1))];
        let prior: HashSet<NodeId> = [1, 3].into_iter().collect();
        assert_eq!(locate_new_node(&nodes, Some(1), false, &prior), Some(2));
    }

    #[test]
    fn test_locate_ending_requires_flag() {
        let mut end = node(3, Some(1));
        end.is_ending = true;
        let nodes = vec![node(1, None), node(2, Some(1)), end];
        let prior: HashSet<NodeId> = [1].into_iter().collect();
        assert_eq!(locate_new_node(&nodes, Some(1), true, &prior), Some(3));
        assert_eq!(locate_new_node(&nodes, Some(1), false, &prior), Some(3));
        assert_eq!(locate_new_node(&nodes, Some(2), true, &prior), None);
    }

    #[test]
    fn test_locate_opening_is_root() {
        let nodes = vec![node(1, None)];
        assert_eq!(locate_new_node(&nodes, None, false, &HashSet::new()), Some(1));
    }

    #[tokio::test]
    async fn test_preconditions_checked_before_network() {
        let api = Arc::new(MockStoryApi::new());
        let orchestrator = Orchestrator::new(api.clone(), &GenerationSection::default());
        assert_eq!(orchestrator.generate_opening().await, Outcome::Failed);
        assert_eq!(orchestrator.generate_ending().await, Outcome::Failed);
        assert_eq!(api.generation_calls(), 0);
        let state = orchestrator.snapshot();
        assert_eq!(state.error.as_deref(), Some("No story loaded"));
        assert!(!state.is_generating);
    }

    #[test]
    fn test_request_for_ending_node_rejects_continue() {
        let mut end = node(2, Some(1));
        end.is_ending = true;
        let state = OrchestratorState {
            current_story: Some(
                serde_json::from_str(r#"{"id": 1, "title": "t", "root_node_id": 1}"#).unwrap(),
            ),
            current_node: Some(end),
            ..OrchestratorState::default()
        };
        let err = Orchestrator::request_for(&state, &Intent::ContinueIndex(0)).unwrap_err();
        assert!(matches!(err, StoryError::EndingReached));
        assert!(matches!(
            Orchestrator::request_for(&state, &Intent::Ending),
            Ok(GenerationRequest::Ending { node_id: 2, .. })
        ));
        assert!(matches!(
            Orchestrator::request_for(&state, &Intent::ContinueIndex(5)),
            Err(StoryError::UnknownChoice(5))
        ));
    }
}
