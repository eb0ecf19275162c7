//! Storyloom - 分支叙事客户端引擎
//!
//! 模块划分：
//! - **api**: 后端访问抽象（StoryApi）、reqwest 实现与测试用 Mock
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 编排器状态机、错误、取消监管、通知
//! - **generation**: SSE 流解码与任务轮询
//! - **graph**: 叙事图、路径解析与分支枚举
//! - **model**: 故事 / 节点 / 任务 / 分支数据模型
//! - **observability**: 日志初始化

pub mod api;
pub mod config;
pub mod core;
pub mod generation;
pub mod graph;
pub mod model;
pub mod observability;

pub use crate::core::{Command, Orchestrator, OrchestratorEvent, OrchestratorState, Outcome};
