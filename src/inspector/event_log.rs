//! 内置检查器：会话最近的事件

use async_trait::async_trait;
use schemars::{schema_for, JsonSchema};
use serde::Serialize;
use serde_json::json;

use super::{InspectorState, InspectorStateProvider};
use crate::core::ConversationContext;
use crate::events::ConversationEventType;

pub const EVENT_LOG_INSPECTOR_ID: &str = "event_log";

const DEFAULT_LIMIT: usize = 50;

#[derive(Serialize, JsonSchema)]
struct EventLogEntry {
    id: String,
    event: ConversationEventType,
    correlation_id: String,
    /// 时间戳（毫秒）
    timestamp: u64,
}

#[derive(Serialize, JsonSchema)]
struct EventLogView {
    conversation_id: String,
    title: String,
    /// 旧的在前
    events: Vec<EventLogEntry>,
}

pub struct EventLogInspector {
    limit: usize,
}

impl EventLogInspector {
    pub fn new(limit: usize) -> Self {
        Self { limit }
    }
}

impl Default for EventLogInspector {
    fn default() -> Self {
        Self::new(DEFAULT_LIMIT)
    }
}

#[async_trait]
impl InspectorStateProvider for EventLogInspector {
    fn display_name(&self) -> &str {
        "Event log"
    }

    fn description(&self) -> &str {
        "Most recent events received by this conversation."
    }

    async fn get(&self, conversation: &ConversationContext) -> anyhow::Result<InspectorState> {
        let events = conversation
            .recent_events(self.limit)
            .await
            .into_iter()
            .map(|e| EventLogEntry {
                id: e.id,
                event: e.event,
                correlation_id: e.correlation_id,
                timestamp: e.timestamp,
            })
            .collect();
        let view = EventLogView {
            conversation_id: conversation.id.clone(),
            title: conversation.title.clone(),
            events,
        };
        Ok(InspectorState {
            data: serde_json::to_value(view)?,
            json_schema: serde_json::to_value(schema_for!(EventLogView))?,
            ui_schema: json!({ "ui:options": { "readonly": true } }),
        })
    }
}
