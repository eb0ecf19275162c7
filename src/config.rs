//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `STORYLOOM__*` 覆盖（双下划线表示嵌套，如 `STORYLOOM__GENERATION__TRANSPORT=poll`）。

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    #[serde(default)]
    pub api: ApiSection,
    #[serde(default)]
    pub generation: GenerationSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

/// [api] 段：后端地址、认证令牌、超时
#[derive(Debug, Clone, Deserialize)]
pub struct ApiSection {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// 设置后以 `Authorization: Bearer` 附加到每个请求
    pub auth_token: Option<String>,
    /// 非流式请求的整体超时（秒）；流式请求只受连接超时约束
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

fn default_base_url() -> String {
    "http://localhost:8000/api/v1".to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_connect_timeout_secs() -> u64 {
    10
}

impl Default for ApiSection {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            auth_token: None,
            request_timeout_secs: default_request_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

/// 生成结果的获取方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TransportMode {
    /// SSE 流：逐 token 展示
    #[default]
    Stream,
    /// 提交任务后轮询任务状态
    Poll,
}

/// [generation] 段：传输模式与轮询参数
#[derive(Debug, Clone, Deserialize)]
pub struct GenerationSection {
    #[serde(default)]
    pub transport: TransportMode,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// 轮询次数上限；默认 120 次 × 1s = 2 分钟
    #[serde(default = "default_max_poll_attempts")]
    pub max_poll_attempts: u32,
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_max_poll_attempts() -> u32 {
    120
}

impl Default for GenerationSection {
    fn default() -> Self {
        Self {
            transport: TransportMode::default(),
            poll_interval_ms: default_poll_interval_ms(),
            max_poll_attempts: default_max_poll_attempts(),
        }
    }
}

impl GenerationSection {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// [logging] 段：EnvFilter 指令（RUST_LOG 优先）
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingSection {
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

fn default_log_filter() -> String {
    "info".to_string()
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
        }
    }
}

/// 从 config 目录加载配置，环境变量 STORYLOOM__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 STORYLOOM__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("STORYLOOM")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.api.base_url, "http://localhost:8000/api/v1");
        assert_eq!(cfg.generation.transport, TransportMode::Stream);
        assert_eq!(cfg.generation.poll_interval(), Duration::from_millis(1000));
        assert_eq!(cfg.generation.max_poll_attempts, 120);
        assert_eq!(cfg.logging.filter, "info");
    }

    #[test]
    fn test_load_explicit_file_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("storyloom.toml");
        std::fs::write(
            &path,
            r#"
[api]
base_url = "https://stories.example.com/api/v1"
auth_token = "secret"

[generation]
transport = "poll"
poll_interval_ms = 250
"#,
        )
        .unwrap();

        let cfg = load_config(Some(path)).unwrap();
        assert_eq!(cfg.api.base_url, "https://stories.example.com/api/v1");
        assert_eq!(cfg.api.auth_token.as_deref(), Some("secret"));
        assert_eq!(cfg.generation.transport, TransportMode::Poll);
        assert_eq!(cfg.generation.poll_interval_ms, 250);
        // 未写的键保持默认
        assert_eq!(cfg.generation.max_poll_attempts, 120);
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let cfg = load_config(Some(PathBuf::from("/nonexistent/storyloom.toml"))).unwrap();
        assert_eq!(cfg.api.request_timeout_secs, 30);
    }
}
