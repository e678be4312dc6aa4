//! 会话检查器：以 schema 描述的数据展示会话的即时状态
//!
//! 检查器只读、按需生成，框架不持久化其结果。

mod event_log;
mod registry;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::ConversationContext;

pub use event_log::{EventLogInspector, EVENT_LOG_INSPECTOR_ID};
pub use registry::InspectorRegistry;

/// 检查器返回的状态数据
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InspectorState {
    pub data: Value,
    pub json_schema: Value,
    pub ui_schema: Value,
}

#[async_trait]
pub trait InspectorStateProvider: Send + Sync {
    fn display_name(&self) -> &str;

    fn description(&self) -> &str;

    async fn get(&self, conversation: &ConversationContext) -> anyhow::Result<InspectorState>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InspectorDescription {
    pub id: String,
    pub display_name: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InspectorStateResponse {
    pub id: String,
    pub data: Value,
    pub json_schema: Value,
    pub ui_schema: Value,
}
