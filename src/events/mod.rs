//! 事件协议与路由
//!
//! - **types**: 会话事件、消息负载与路由标签
//! - **handler**: 三类处理器接口及闭包适配
//! - **router**: 两阶段（粗粒度 → 特定）派发
//! - **log**: 会话事件日志（到达顺序）

pub mod handler;
mod log;
pub mod router;
mod types;

pub use handler::{
    sync_assistant_handler, sync_conversation_handler, sync_event_handler, AssistantHandler,
    ConversationHandler, EventHandler, Handler,
};
pub use log::{EventLog, DEFAULT_EVENT_LOG_CAPACITY};
pub use router::{EventRouter, RegistrationError};
pub use types::{
    ConversationEvent, ConversationEventType, ConversationMessage, EventTag, HandlerKind,
    MessageSender, MessageType, ParticipantRole,
};
