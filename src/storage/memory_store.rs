//! 内存状态存储（测试与无持久化部署）

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{RelativePath, StateStore, StateTree, StorageError};
use crate::core::ConversationContext;

type ConversationKey = (String, String);

fn key(conversation: &ConversationContext) -> ConversationKey {
    (conversation.assistant.id.clone(), conversation.id.clone())
}

#[derive(Default)]
pub struct MemoryStateStore {
    trees: RwLock<HashMap<ConversationKey, StateTree>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn snapshot(&self, conversation: &ConversationContext) -> Result<StateTree, StorageError> {
        Ok(self
            .trees
            .read()
            .await
            .get(&key(conversation))
            .cloned()
            .unwrap_or_default())
    }

    async fn replace(&self, conversation: &ConversationContext, tree: StateTree) -> Result<(), StorageError> {
        self.trees.write().await.insert(key(conversation), tree);
        Ok(())
    }

    async fn purge(&self, conversation: &ConversationContext) -> Result<(), StorageError> {
        self.trees.write().await.remove(&key(conversation));
        Ok(())
    }

    async fn read(
        &self,
        conversation: &ConversationContext,
        path: &RelativePath,
    ) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self
            .trees
            .read()
            .await
            .get(&key(conversation))
            .and_then(|tree| tree.file(path))
            .map(|data| data.to_vec()))
    }

    async fn write(
        &self,
        conversation: &ConversationContext,
        path: &RelativePath,
        data: Vec<u8>,
    ) -> Result<(), StorageError> {
        self.trees
            .write()
            .await
            .entry(key(conversation))
            .or_default()
            .insert_file(path.clone(), data);
        Ok(())
    }
}
