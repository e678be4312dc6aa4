//! 事件路由：标签 → 有序处理器列表
//!
//! 派发分两个阶段：先运行粗粒度标签（如「任意消息创建」）的处理器，全部结束后再运行
//! 特定标签（如「chat 消息创建」）的处理器。同一阶段内按注册顺序 spawn、并发运行，
//! 单个处理器失败不影响其它处理器；两个阶段都结束后按注册顺序返回第一个错误。

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures_util::future::join_all;
use thiserror::Error;
use tokio::task::JoinHandle;

use super::handler::Handler;
use super::types::{ConversationEventType, EventTag, HandlerKind, MessageType};
use super::ConversationEvent;
use crate::core::{AssistantContext, ConversationContext};

#[derive(Debug, Error)]
pub enum RegistrationError {
    #[error("handler of kind {actual:?} cannot be registered for {tag} (expects {expected:?})")]
    KindMismatch {
        tag: EventTag,
        expected: HandlerKind,
        actual: HandlerKind,
    },
}

/// 一次派发的调用参数
enum Invocation {
    Assistant(AssistantContext),
    Conversation(ConversationContext),
    Event(ConversationContext, ConversationEvent),
}

#[derive(Default, Clone)]
pub struct EventRouter {
    handlers: HashMap<EventTag, Vec<Handler>>,
}

impl EventRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册处理器；处理器签名必须与标签类别一致
    pub fn register(&mut self, tag: EventTag, handler: Handler) -> Result<(), RegistrationError> {
        let expected = tag.handler_kind();
        let actual = handler.kind();
        if expected != actual {
            return Err(RegistrationError::KindMismatch { tag, expected, actual });
        }
        self.handlers.entry(tag).or_default().push(handler);
        Ok(())
    }

    fn push(&mut self, tag: EventTag, handler: Handler) -> &mut Self {
        self.handlers.entry(tag).or_default().push(handler);
        self
    }

    pub fn on_assistant_created<F, Fut>(&mut self, f: F) -> &mut Self
    where
        F: Fn(AssistantContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.push(EventTag::AssistantCreated, Handler::assistant(f))
    }

    pub fn on_assistant_updated<F, Fut>(&mut self, f: F) -> &mut Self
    where
        F: Fn(AssistantContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.push(EventTag::AssistantUpdated, Handler::assistant(f))
    }

    pub fn on_conversation_created<F, Fut>(&mut self, f: F) -> &mut Self
    where
        F: Fn(ConversationContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.push(EventTag::ConversationCreated, Handler::conversation(f))
    }

    pub fn on_conversation_updated<F, Fut>(&mut self, f: F) -> &mut Self
    where
        F: Fn(ConversationContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.push(EventTag::ConversationUpdated, Handler::conversation(f))
    }

    /// 粗粒度：该类型的所有会话事件
    pub fn on_event<F, Fut>(&mut self, event: ConversationEventType, f: F) -> &mut Self
    where
        F: Fn(ConversationContext, ConversationEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.push(EventTag::Conversation(event), Handler::event(f))
    }

    /// 特定：只匹配 message_type 的消息事件
    pub fn on_message<F, Fut>(&mut self, event: ConversationEventType, message_type: MessageType, f: F) -> &mut Self
    where
        F: Fn(ConversationContext, ConversationEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.push(EventTag::Message(event, message_type), Handler::event(f))
    }

    pub fn handler_count(&self, tag: &EventTag) -> usize {
        self.handlers.get(tag).map(Vec::len).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.values().all(Vec::is_empty)
    }

    /// 派发助手生命周期事件（tag 须为 AssistantCreated / AssistantUpdated）
    pub async fn dispatch_assistant(&self, tag: EventTag, assistant: &AssistantContext) -> anyhow::Result<()> {
        let invocation = Invocation::Assistant(assistant.clone());
        into_result(self.run_phase(tag, &invocation).await)
    }

    /// 派发会话生命周期事件（tag 须为 ConversationCreated / ConversationUpdated）
    pub async fn dispatch_conversation(
        &self,
        tag: EventTag,
        conversation: &ConversationContext,
    ) -> anyhow::Result<()> {
        let invocation = Invocation::Conversation(conversation.clone());
        into_result(self.run_phase(tag, &invocation).await)
    }

    /// 派发会话事件：粗粒度阶段 → 特定阶段
    ///
    /// 消息事件缺少合法的 `data.message` 时在运行任何处理器之前返回 BadRequest。
    pub async fn dispatch_event(
        &self,
        conversation: &ConversationContext,
        event: &ConversationEvent,
    ) -> anyhow::Result<()> {
        let message = event.message()?;
        let invocation = Invocation::Event(conversation.clone(), event.clone());

        let coarse = self
            .run_phase(EventTag::Conversation(event.event), &invocation)
            .await;
        let specific = match message {
            Some(message) => {
                self.run_phase(EventTag::Message(event.event, message.message_type), &invocation)
                    .await
            }
            None => None,
        };
        into_result(coarse.or(specific))
    }

    async fn run_phase(&self, tag: EventTag, invocation: &Invocation) -> Option<anyhow::Error> {
        let handlers = self.handlers.get(&tag)?;
        let tasks: Vec<_> = handlers.iter().map(|h| spawn_handler(h, invocation)).collect();
        tracing::debug!(%tag, handlers = tasks.len(), "dispatching");

        let mut first_error = None;
        for (index, joined) in join_all(tasks).await.into_iter().enumerate() {
            let outcome = match joined {
                Ok(outcome) => outcome,
                Err(e) => Err(anyhow::anyhow!("event handler panicked: {e}")),
            };
            if let Err(e) = outcome {
                tracing::warn!(%tag, index, error = %e, "event handler failed");
                first_error.get_or_insert(e);
            }
        }
        first_error
    }
}

fn into_result(error: Option<anyhow::Error>) -> anyhow::Result<()> {
    match error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

fn spawn_handler(handler: &Handler, invocation: &Invocation) -> JoinHandle<anyhow::Result<()>> {
    match (handler, invocation) {
        (Handler::Assistant(h), Invocation::Assistant(assistant)) => {
            let h = Arc::clone(h);
            let assistant = assistant.clone();
            tokio::spawn(async move { h.handle(assistant).await })
        }
        (Handler::Conversation(h), Invocation::Conversation(conversation)) => {
            let h = Arc::clone(h);
            let conversation = conversation.clone();
            tokio::spawn(async move { h.handle(conversation).await })
        }
        (Handler::Event(h), Invocation::Event(conversation, event)) => {
            let h = Arc::clone(h);
            let conversation = conversation.clone();
            let event = event.clone();
            tokio::spawn(async move { h.handle(conversation, event).await })
        }
        (handler, _) => {
            let kind = handler.kind();
            tokio::spawn(async move { Err::<(), _>(anyhow::anyhow!("{kind:?} handler invoked with a mismatched event")) })
        }
    }
}
