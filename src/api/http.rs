//! HTTP 后端客户端
//!
//! 通过 reqwest 调用故事后端（默认 http://localhost:8000/api/v1）；非流式请求带整体超时，
//! 流式请求只受连接超时约束（整体超时会切断长时间生成）。

use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::api::{ApiError, ByteStream, GenerationRequest, StoryApi};
use crate::config::ApiSection;
use crate::model::{
    GenerationJob, JobHandle, JobId, NodeId, SaveBranchesRequest, Story, StoryBranches, StoryDraft,
    StoryId, StoryNode, StoryPage,
};

/// FastAPI 风格的错误体
#[derive(Debug, Deserialize)]
struct ErrorBody {
    detail: serde_json::Value,
}

/// HTTP 客户端：持有 reqwest Client、基础地址与可选的 Bearer 令牌
#[derive(Debug, Clone)]
pub struct HttpStoryApi {
    client: Client,
    base_url: String,
    auth_token: Option<String>,
    request_timeout: Duration,
}

impl HttpStoryApi {
    pub fn new(section: &ApiSection) -> Self {
        Self {
            client: build_client(section, concat!("storyloom/", env!("CARGO_PKG_VERSION"))),
            base_url: section.base_url.trim_end_matches('/').to_string(),
            auth_token: section.auth_token.clone(),
            request_timeout: Duration::from_secs(section.request_timeout_secs),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.auth_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// 普通请求：附加认证与超时，发送并检查状态码
    async fn send(&self, request: RequestBuilder) -> Result<Response, ApiError> {
        let request = self.authorize(request).timeout(self.request_timeout);
        let response = request
            .send()
            .await
            .map_err(|e| ApiError::Request(e.to_string()))?;
        check_status(response).await
    }

    async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, ApiError> {
        let response = self.send(request).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| ApiError::Decode(e.to_string()))
    }

    fn generation_path(request: &GenerationRequest, streaming: bool) -> String {
        let stream = if streaming { "stream/" } else { "" };
        match request {
            GenerationRequest::Opening { story_id } => {
                if streaming {
                    format!("/stories/{}/stream/opening", story_id)
                } else {
                    format!("/stories/{}/generate/opening", story_id)
                }
            }
            GenerationRequest::Continue {
                story_id, node_id, ..
            } => format!("/stories/{}/nodes/{}/{}continue", story_id, node_id, stream),
            GenerationRequest::Ending { story_id, node_id } => {
                format!("/stories/{}/nodes/{}/{}ending", story_id, node_id, stream)
            }
        }
    }

    fn generation_request(&self, request: &GenerationRequest, streaming: bool) -> RequestBuilder {
        let builder = self
            .client
            .post(self.url(&Self::generation_path(request, streaming)));
        match request {
            GenerationRequest::Continue { choice, .. } => builder.json(choice),
            _ => builder,
        }
    }
}

/// 构建失败时退回默认 Client（没有连接超时与 User-Agent），并记录警告
fn build_client(section: &ApiSection, user_agent: &str) -> Client {
    Client::builder()
        .connect_timeout(Duration::from_secs(section.connect_timeout_secs))
        .user_agent(user_agent)
        .build()
        .unwrap_or_else(|e| {
            tracing::warn!(error = %e, "HTTP client setup failed, using a default client without connect timeout");
            Client::new()
        })
}

/// 非 2xx 时读出 detail 作为错误信息
async fn check_status(response: Response) -> Result<Response, ApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let message = match serde_json::from_str::<ErrorBody>(&body) {
        Ok(ErrorBody {
            detail: serde_json::Value::String(s),
        }) => s,
        Ok(ErrorBody { detail }) => detail.to_string(),
        Err(_) if body.is_empty() => status.canonical_reason().unwrap_or("error").to_string(),
        Err(_) => body,
    };
    tracing::warn!(status = status.as_u16(), %message, "Story API returned an error");
    Err(ApiError::Status {
        status: status.as_u16(),
        message,
    })
}

#[async_trait]
impl StoryApi for HttpStoryApi {
    async fn get_story(&self, story_id: StoryId) -> Result<Story, ApiError> {
        self.send_json(self.client.get(self.url(&format!("/stories/{}", story_id))))
            .await
    }

    async fn list_stories(&self, page: u32, page_size: u32) -> Result<StoryPage, ApiError> {
        let request = self
            .client
            .get(self.url("/stories/"))
            .query(&[("page", page), ("page_size", page_size)]);
        self.send_json(request).await
    }

    async fn create_story(&self, draft: &StoryDraft) -> Result<Story, ApiError> {
        self.send_json(self.client.post(self.url("/stories/")).json(draft))
            .await
    }

    async fn delete_story(&self, story_id: StoryId) -> Result<(), ApiError> {
        self.send(self.client.delete(self.url(&format!("/stories/{}", story_id))))
            .await?;
        Ok(())
    }

    async fn current_node(&self, story_id: StoryId) -> Result<StoryNode, ApiError> {
        self.send_json(
            self.client
                .get(self.url(&format!("/stories/{}/current", story_id))),
        )
        .await
    }

    async fn list_nodes(&self, story_id: StoryId) -> Result<Vec<StoryNode>, ApiError> {
        self.send_json(
            self.client
                .get(self.url(&format!("/stories/{}/nodes", story_id))),
        )
        .await
    }

    async fn get_node(&self, story_id: StoryId, node_id: NodeId) -> Result<StoryNode, ApiError> {
        self.send_json(
            self.client
                .get(self.url(&format!("/stories/{}/nodes/{}", story_id, node_id))),
        )
        .await
    }

    async fn node_path(
        &self,
        story_id: StoryId,
        node_id: NodeId,
    ) -> Result<Vec<StoryNode>, ApiError> {
        self.send_json(
            self.client
                .get(self.url(&format!("/stories/{}/nodes/{}/path", story_id, node_id))),
        )
        .await
    }

    async fn get_branches(&self, story_id: StoryId) -> Result<StoryBranches, ApiError> {
        self.send_json(
            self.client
                .get(self.url(&format!("/stories/{}/branches", story_id))),
        )
        .await
    }

    async fn save_branches(
        &self,
        story_id: StoryId,
        request: &SaveBranchesRequest,
    ) -> Result<StoryBranches, ApiError> {
        self.send_json(
            self.client
                .post(self.url(&format!("/stories/{}/branches", story_id)))
                .json(request),
        )
        .await
    }

    async fn start_generation(&self, request: &GenerationRequest) -> Result<JobHandle, ApiError> {
        tracing::debug!(kind = %request.kind(), story_id = request.story_id(), "Submitting generation job");
        self.send_json(self.generation_request(request, false)).await
    }

    async fn get_job(&self, job_id: JobId) -> Result<GenerationJob, ApiError> {
        self.send_json(self.client.get(self.url(&format!("/jobs/{}", job_id))))
            .await
    }

    async fn stream_generation(&self, request: &GenerationRequest) -> Result<ByteStream, ApiError> {
        tracing::debug!(kind = %request.kind(), story_id = request.story_id(), "Opening generation stream");
        let builder = self
            .authorize(self.generation_request(request, true))
            .header(reqwest::header::ACCEPT, "text/event-stream");
        let response = builder
            .send()
            .await
            .map_err(|e| ApiError::Request(e.to_string()))?;
        let response = check_status(response).await?;
        let stream = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| ApiError::Request(e.to_string())));
        Ok(Box::pin(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ChoiceSelection;

    #[test]
    fn test_generation_paths() {
        let opening = GenerationRequest::Opening { story_id: 4 };
        assert_eq!(
            HttpStoryApi::generation_path(&opening, false),
            "/stories/4/generate/opening"
        );
        assert_eq!(
            HttpStoryApi::generation_path(&opening, true),
            "/stories/4/stream/opening"
        );

        let cont = GenerationRequest::Continue {
            story_id: 4,
            node_id: 9,
            choice: ChoiceSelection {
                choice_id: "c1".into(),
                choice_text: "Run".into(),
            },
        };
        assert_eq!(
            HttpStoryApi::generation_path(&cont, false),
            "/stories/4/nodes/9/continue"
        );
        assert_eq!(
            HttpStoryApi::generation_path(&cont, true),
            "/stories/4/nodes/9/stream/continue"
        );

        let ending = GenerationRequest::Ending {
            story_id: 4,
            node_id: 9,
        };
        assert_eq!(
            HttpStoryApi::generation_path(&ending, true),
            "/stories/4/nodes/9/stream/ending"
        );
    }

    #[test]
    fn test_invalid_client_settings_fall_back_to_default_client() {
        // 含换行的 User-Agent 不是合法的头部值，builder 会报错
        let client = build_client(&ApiSection::default(), "storyloom\nbroken");
        assert!(client.get("http://localhost/").build().is_ok());
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let section = ApiSection {
            base_url: "http://localhost:8000/api/v1/".into(),
            ..ApiSection::default()
        };
        let api = HttpStoryApi::new(&section);
        assert_eq!(api.base_url(), "http://localhost:8000/api/v1");
        assert_eq!(api.url("/jobs/1"), "http://localhost:8000/api/v1/jobs/1");
    }
}
