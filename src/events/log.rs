//! 会话事件日志：按到达顺序追加，只保留最近 capacity 条

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::RwLock;

use super::ConversationEvent;

pub const DEFAULT_EVENT_LOG_CAPACITY: usize = 1000;

#[derive(Clone)]
pub struct EventLog {
    inner: Arc<RwLock<VecDeque<ConversationEvent>>>,
    capacity: usize,
}

impl EventLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(RwLock::new(VecDeque::new())),
            capacity: capacity.max(1),
        }
    }

    pub async fn append(&self, event: ConversationEvent) {
        let mut events = self.inner.write().await;
        if events.len() == self.capacity {
            events.pop_front();
        }
        events.push_back(event);
    }

    /// 最近 limit 条，旧的在前
    pub async fn recent(&self, limit: usize) -> Vec<ConversationEvent> {
        let events = self.inner.read().await;
        let skip = events.len().saturating_sub(limit);
        events.iter().skip(skip).cloned().collect()
    }

    /// 丢弃全部事件（会话删除后日志不再可读）
    pub async fn clear(&self) {
        self.inner.write().await.clear();
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_LOG_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::ConversationEventType;

    #[tokio::test]
    async fn test_log_keeps_arrival_order_and_capacity() {
        let log = EventLog::new(2);
        for i in 0..3 {
            log.append(
                ConversationEvent::new("c1", ConversationEventType::FileCreated, serde_json::Value::Null)
                    .with_correlation_id(i.to_string()),
            )
            .await;
        }
        let recent = log.recent(10).await;
        let ids: Vec<_> = recent.iter().map(|e| e.correlation_id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2"]);
        assert_eq!(log.recent(1).await[0].correlation_id, "2");
        assert_eq!(log.len().await, 2);

        log.clear().await;
        assert!(log.is_empty().await);
        assert!(log.recent(10).await.is_empty());
    }
}
