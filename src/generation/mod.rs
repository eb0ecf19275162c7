//! 生成过程追踪：SSE 流解码与任务轮询

pub mod events;
pub mod poller;
pub mod stream;

pub use events::{DoneEvent, GenerationEvent};
pub use poller::{JobOutcome, JobPoller};
pub use stream::{decode_events, StreamDecoder};
