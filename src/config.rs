//! 宿主配置：从 config/default.toml 与环境变量加载
//!
//! 默认值编译进二进制，部署时用 TOML 文件或环境变量 `HIVE__*` 覆盖
//! （双下划线表示嵌套，如 `HIVE__STORAGE__ROOT=/var/lib/hive`）。

use std::path::PathBuf;

use serde::Deserialize;

use crate::assistant_config::ConfigSecret;
use crate::events::DEFAULT_EVENT_LOG_CAPACITY;
use crate::safety::{
    AzureContentSafetyAuthConfig, AzureContentSafetyServiceConfig, SeverityEvaluatorConfig, SeverityLevel,
};

/// 宿主配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct HostConfig {
    pub service: ServiceSection,
    pub storage: StorageSection,
    pub events: EventsSection,
    pub content_safety: ContentSafetySection,
}

/// [service] 段：助手服务的标识与描述
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceSection {
    #[serde(default = "default_service_id")]
    pub id: String,
    #[serde(default = "default_service_name")]
    pub name: String,
    #[serde(default)]
    pub description: String,
}

fn default_service_id() -> String {
    "hive.echo".to_string()
}

fn default_service_name() -> String {
    "Echo assistant".to_string()
}

impl Default for ServiceSection {
    fn default() -> Self {
        Self {
            id: default_service_id(),
            name: default_service_name(),
            description: String::new(),
        }
    }
}

/// [storage] 段：会话状态与助手配置的根目录，未设置时只保存在内存
#[derive(Debug, Clone, Deserialize, Default)]
pub struct StorageSection {
    pub root: Option<PathBuf>,
}

/// [events] 段
#[derive(Debug, Clone, Deserialize)]
pub struct EventsSection {
    /// 每个会话保留的最近事件数
    #[serde(default = "default_log_capacity")]
    pub log_capacity: usize,
}

fn default_log_capacity() -> usize {
    DEFAULT_EVENT_LOG_CAPACITY
}

impl Default for EventsSection {
    fn default() -> Self {
        Self {
            log_capacity: default_log_capacity(),
        }
    }
}

/// [content_safety] 段：消息事件的内容安全评估（默认关闭）
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ContentSafetySection {
    #[serde(default)]
    pub enabled: bool,
    /// 未设置时回退到 AZURE_CONTENT_SAFETY_ENDPOINT
    pub endpoint: Option<String>,
    /// 设置时使用订阅密钥认证，否则使用身份令牌
    pub service_key: Option<String>,
    #[serde(default)]
    pub warn_at_severity: Option<u8>,
    #[serde(default)]
    pub fail_at_severity: Option<u8>,
    #[serde(default)]
    pub max_request_length: Option<usize>,
}

impl ContentSafetySection {
    /// 阈值配置；未填写的项使用评估器默认值
    pub fn evaluator_config(&self) -> Result<SeverityEvaluatorConfig, String> {
        let mut config = SeverityEvaluatorConfig::default();
        if let Some(level) = self.warn_at_severity {
            config.warn_at_severity = SeverityLevel::try_from(level)?;
        }
        if let Some(level) = self.fail_at_severity {
            config.fail_at_severity = SeverityLevel::try_from(level)?;
        }
        if let Some(max) = self.max_request_length {
            config.max_request_length = max;
        }
        Ok(config)
    }

    pub fn service_config(&self) -> AzureContentSafetyServiceConfig {
        let defaults = AzureContentSafetyServiceConfig::default();
        let auth_config = match &self.service_key {
            Some(key) => AzureContentSafetyAuthConfig::ApiKey {
                azure_content_safety_service_key: ConfigSecret::new(key.as_str()),
            },
            None => AzureContentSafetyAuthConfig::AzureIdentity,
        };
        AzureContentSafetyServiceConfig {
            auth_config,
            azure_content_safety_endpoint: self
                .endpoint
                .clone()
                .unwrap_or(defaults.azure_content_safety_endpoint),
        }
    }
}

/// 编译进二进制的默认配置，与仓库中的 config/default.toml 相同
const BUILTIN_DEFAULTS: &str = include_str!("../config/default.toml");

/// 工作目录下的部署配置（可选）
const LOCAL_CONFIG: &str = "config/default";

const ENV_PREFIX: &str = "HIVE";

/// 加载宿主配置，后面的源覆盖前面的键：
/// 内置默认值、工作目录下的 config/default.toml、命令行给出的文件、`HIVE__*` 环境变量。
/// 命令行给出的文件不存在时报错，而不是静默回退。
pub fn load_config(config_path: Option<PathBuf>) -> Result<HostConfig, config::ConfigError> {
    let mut builder = config::Config::builder()
        .add_source(config::File::from_str(BUILTIN_DEFAULTS, config::FileFormat::Toml))
        .add_source(config::File::with_name(LOCAL_CONFIG).required(false));

    if let Some(path) = config_path {
        builder = builder.add_source(config::File::from(path).required(true));
    }

    builder
        .add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        )
        .build()?
        .try_deserialize()
}
