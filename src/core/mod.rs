//! 核心编排层：错误、状态、取消监管、通知与编排器

pub mod error;
pub mod notification;
pub mod orchestrator;
pub mod state;
pub mod supervisor;

pub use error::StoryError;
pub use notification::{notification_for, NoticeLevel, Notification};
pub use orchestrator::{Command, Orchestrator, OrchestratorEvent, Outcome};
pub use state::{OrchestratorState, Phase};
pub use supervisor::GenerationSupervisor;
