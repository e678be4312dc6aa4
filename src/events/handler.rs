//! 事件处理器接口
//!
//! 同步与异步处理器统一为任务式接口：宿主总是 await 处理器返回的 future。
//! 闭包 `|ctx, event| async move { ... }` 直接实现对应 trait；同步闭包用 `sync_*` 适配。

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use super::types::HandlerKind;
use super::ConversationEvent;
use crate::core::{AssistantContext, ConversationContext};

/// 助手生命周期处理器（created / updated）
#[async_trait]
pub trait AssistantHandler: Send + Sync {
    async fn handle(&self, assistant: AssistantContext) -> anyhow::Result<()>;
}

/// 会话生命周期处理器（created / updated）
#[async_trait]
pub trait ConversationHandler: Send + Sync {
    async fn handle(&self, conversation: ConversationContext) -> anyhow::Result<()>;
}

/// 会话事件处理器（消息、参与者、文件）
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, conversation: ConversationContext, event: ConversationEvent) -> anyhow::Result<()>;
}

#[async_trait]
impl<F, Fut> AssistantHandler for F
where
    F: Fn(AssistantContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn handle(&self, assistant: AssistantContext) -> anyhow::Result<()> {
        (self)(assistant).await
    }
}

#[async_trait]
impl<F, Fut> ConversationHandler for F
where
    F: Fn(ConversationContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn handle(&self, conversation: ConversationContext) -> anyhow::Result<()> {
        (self)(conversation).await
    }
}

#[async_trait]
impl<F, Fut> EventHandler for F
where
    F: Fn(ConversationContext, ConversationEvent) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn handle(&self, conversation: ConversationContext, event: ConversationEvent) -> anyhow::Result<()> {
        (self)(conversation, event).await
    }
}

/// 同步事件处理器适配为任务式处理器
pub fn sync_event_handler<F>(f: F) -> impl EventHandler
where
    F: Fn(ConversationContext, ConversationEvent) -> anyhow::Result<()> + Send + Sync + 'static,
{
    move |conversation: ConversationContext, event: ConversationEvent| {
        std::future::ready(f(conversation, event))
    }
}

/// 同步助手生命周期处理器适配
pub fn sync_assistant_handler<F>(f: F) -> impl AssistantHandler
where
    F: Fn(AssistantContext) -> anyhow::Result<()> + Send + Sync + 'static,
{
    move |assistant: AssistantContext| std::future::ready(f(assistant))
}

/// 同步会话生命周期处理器适配
pub fn sync_conversation_handler<F>(f: F) -> impl ConversationHandler
where
    F: Fn(ConversationContext) -> anyhow::Result<()> + Send + Sync + 'static,
{
    move |conversation: ConversationContext| std::future::ready(f(conversation))
}

/// 已注册的处理器
#[derive(Clone)]
pub enum Handler {
    Assistant(Arc<dyn AssistantHandler>),
    Conversation(Arc<dyn ConversationHandler>),
    Event(Arc<dyn EventHandler>),
}

impl Handler {
    pub fn assistant(handler: impl AssistantHandler + 'static) -> Self {
        Handler::Assistant(Arc::new(handler))
    }

    pub fn conversation(handler: impl ConversationHandler + 'static) -> Self {
        Handler::Conversation(Arc::new(handler))
    }

    pub fn event(handler: impl EventHandler + 'static) -> Self {
        Handler::Event(Arc::new(handler))
    }

    pub fn kind(&self) -> HandlerKind {
        match self {
            Handler::Assistant(_) => HandlerKind::Assistant,
            Handler::Conversation(_) => HandlerKind::Conversation,
            Handler::Event(_) => HandlerKind::Event,
        }
    }
}
