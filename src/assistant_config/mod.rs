//! 助手配置：带密钥的类型化配置、schema 推导与打码
//!
//! - **secret**: `ConfigSecret` 与掩码约定（`SecretUpdate`）
//! - **schema**: 基于 schemars 的校验、打码与 UI schema
//! - **provider**: `AssistantConfigProvider` 契约与 `ModelConfigProvider` 实现

pub mod schema;
mod provider;
mod secret;

pub use provider::{AssistantConfigProvider, CombinedConfig, ConfigModel, ConfigResponse, ModelConfigProvider};
pub use secret::{redact, ConfigSecret, SecretUpdate, SECRET_MASK};
