//! 后端访问层：StoryApi 抽象、HTTP 实现与测试用 Mock

pub mod http;
pub mod mock;
pub mod traits;

pub use http::HttpStoryApi;
pub use mock::MockStoryApi;
pub use traits::{ApiError, ByteStream, ChoiceSelection, GenerationRequest, StoryApi};
