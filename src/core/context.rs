//! 助手实例与会话上下文
//!
//! 事件处理器拿到的都是上下文快照：标识信息 + 会话事件日志句柄 + 持久状态句柄。

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::events::{ConversationEvent, EventLog};
use crate::storage::{MemoryStateStore, RelativePath, StateStore, StorageError};

/// 助手实例上下文
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssistantContext {
    /// 所属助手服务 ID
    pub service_id: String,
    pub id: String,
    /// 显示名称
    pub name: String,
}

impl AssistantContext {
    pub fn new(service_id: impl Into<String>, id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            service_id: service_id.into(),
            id: id.into(),
            name: name.into(),
        }
    }
}

/// 会话上下文（对助手实例是反向引用，不拥有）
#[derive(Clone)]
pub struct ConversationContext {
    pub id: String,
    pub title: String,
    pub assistant: AssistantContext,
    events: EventLog,
    storage: Arc<dyn StateStore>,
}

impl ConversationContext {
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        assistant: AssistantContext,
        events: EventLog,
        storage: Arc<dyn StateStore>,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            assistant,
            events,
            storage,
        }
    }

    /// 脱离宿主的上下文：独立的事件日志 + 内存状态存储
    pub fn detached(id: impl Into<String>, title: impl Into<String>, assistant: AssistantContext) -> Self {
        Self::new(
            id,
            title,
            assistant,
            EventLog::default(),
            Arc::new(MemoryStateStore::new()),
        )
    }

    /// 最近的事件（按到达顺序，最多 limit 条）
    pub async fn recent_events(&self, limit: usize) -> Vec<ConversationEvent> {
        self.events.recent(limit).await
    }

    #[cfg(test)]
    pub(crate) fn event_log(&self) -> &EventLog {
        &self.events
    }

    pub fn storage(&self) -> &Arc<dyn StateStore> {
        &self.storage
    }

    /// 读取会话持久状态中的文件，不存在返回 None
    pub async fn read_state(&self, path: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let path = RelativePath::parse(path)?;
        self.storage.read(self, &path).await
    }

    /// 写入会话持久状态中的文件（自动创建父目录）
    pub async fn write_state(&self, path: &str, data: impl Into<Vec<u8>>) -> Result<(), StorageError> {
        let path = RelativePath::parse(path)?;
        self.storage.write(self, &path, data.into()).await
    }
}

impl PartialEq for ConversationContext {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.title == other.title && self.assistant == other.assistant
    }
}

impl std::fmt::Debug for ConversationContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversationContext")
            .field("id", &self.id)
            .field("title", &self.title)
            .field("assistant", &self.assistant)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_state_roundtrip_through_context() {
        let ctx = ConversationContext::detached(
            "c1",
            "My conversation",
            AssistantContext::new("svc", "a1", "my assistant"),
        );
        assert_eq!(ctx.read_state("notes/a.txt").await.unwrap(), None);
        ctx.write_state("notes/a.txt", "hello").await.unwrap();
        assert_eq!(ctx.read_state("notes/a.txt").await.unwrap(), Some(b"hello".to_vec()));
        assert!(ctx.write_state("../escape", "x").await.is_err());
    }

    #[test]
    fn test_equality_ignores_handles() {
        let assistant = AssistantContext::new("svc", "a1", "my assistant");
        let a = ConversationContext::detached("c1", "t", assistant.clone());
        let b = ConversationContext::detached("c1", "t", assistant);
        assert_eq!(a, b);
    }
}
