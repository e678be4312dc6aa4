//! 会话事件协议：事件类型、消息类型与路由标签

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::AssistantError;

/// 消息类型（特定标签的子标签）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Chat,
    Notice,
    Note,
    Command,
    CommandResponse,
    Log,
}

/// 会话内事件类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ConversationEventType {
    MessageCreated,
    MessageUpdated,
    MessageDeleted,
    ParticipantCreated,
    ParticipantUpdated,
    FileCreated,
    FileUpdated,
    FileDeleted,
}

impl ConversationEventType {
    pub fn is_message(&self) -> bool {
        matches!(
            self,
            ConversationEventType::MessageCreated
                | ConversationEventType::MessageUpdated
                | ConversationEventType::MessageDeleted
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantRole {
    User,
    Assistant,
    Service,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct MessageSender {
    pub participant_role: ParticipantRole,
    pub participant_id: String,
}

/// 消息事件的 `data.message` 负载
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ConversationMessage {
    pub id: String,
    pub sender: MessageSender,
    pub message_type: MessageType,
    pub content: String,
    #[serde(default = "default_content_type")]
    pub content_type: String,
    #[serde(default)]
    pub filenames: Vec<String>,
    #[serde(default)]
    pub metadata: Value,
    /// 时间戳（毫秒）
    #[serde(default)]
    pub timestamp: u64,
}

fn default_content_type() -> String {
    "text/plain".to_string()
}

pub(crate) fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

fn new_event_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// 会话事件（派发后不可变）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ConversationEvent {
    #[serde(default = "new_event_id")]
    pub id: String,
    pub conversation_id: String,
    /// 请求/响应配对用
    #[serde(default)]
    pub correlation_id: String,
    pub event: ConversationEventType,
    #[serde(default)]
    pub data: Value,
    /// 时间戳（毫秒）
    #[serde(default = "now_millis")]
    pub timestamp: u64,
}

impl ConversationEvent {
    pub fn new(conversation_id: impl Into<String>, event: ConversationEventType, data: Value) -> Self {
        Self {
            id: new_event_id(),
            conversation_id: conversation_id.into(),
            correlation_id: String::new(),
            event,
            data,
            timestamp: now_millis(),
        }
    }

    /// 构造 message_created 事件
    pub fn message_created(conversation_id: impl Into<String>, message: &ConversationMessage) -> Self {
        Self::new(
            conversation_id,
            ConversationEventType::MessageCreated,
            serde_json::json!({ "message": message }),
        )
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = correlation_id.into();
        self
    }

    /// 解析消息负载；非消息事件返回 None
    pub fn message(&self) -> Result<Option<ConversationMessage>, AssistantError> {
        if !self.event.is_message() {
            return Ok(None);
        }
        let raw = self
            .data
            .get("message")
            .ok_or_else(|| AssistantError::bad_request("message event without data.message"))?;
        serde_json::from_value(raw.clone())
            .map(Some)
            .map_err(|e| AssistantError::bad_request(format!("invalid message payload: {e}")))
    }
}

/// 处理器注册键
///
/// 粗粒度标签 `Conversation(event)` 匹配该类型的所有事件；
/// 特定标签 `Message(event, message_type)` 只匹配对应消息类型。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventTag {
    AssistantCreated,
    AssistantUpdated,
    ConversationCreated,
    ConversationUpdated,
    Conversation(ConversationEventType),
    Message(ConversationEventType, MessageType),
}

/// 处理器签名类别
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerKind {
    Assistant,
    Conversation,
    Event,
}

impl EventTag {
    pub fn handler_kind(&self) -> HandlerKind {
        match self {
            EventTag::AssistantCreated | EventTag::AssistantUpdated => HandlerKind::Assistant,
            EventTag::ConversationCreated | EventTag::ConversationUpdated => HandlerKind::Conversation,
            EventTag::Conversation(_) | EventTag::Message(..) => HandlerKind::Event,
        }
    }
}

impl std::fmt::Display for EventTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventTag::AssistantCreated => write!(f, "assistant.created"),
            EventTag::AssistantUpdated => write!(f, "assistant.updated"),
            EventTag::ConversationCreated => write!(f, "conversation.created"),
            EventTag::ConversationUpdated => write!(f, "conversation.updated"),
            EventTag::Conversation(event) => write!(f, "conversation.{event:?}"),
            EventTag::Message(event, message_type) => {
                write!(f, "conversation.{event:?}.{message_type:?}")
            }
        }
    }
}
