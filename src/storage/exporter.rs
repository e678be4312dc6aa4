//! 会话数据导出 / 导入契约与默认实现

use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::{stream, Stream, StreamExt};

use super::{archive, StateStore};
use crate::core::ConversationContext;

/// 导出 / 导入使用的有序字节流
pub type ByteStream = Pin<Box<dyn Stream<Item = std::io::Result<Vec<u8>>> + Send>>;

const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// 把内存中的字节切成流
pub fn byte_stream(data: Vec<u8>, chunk_size: usize) -> ByteStream {
    let chunks: Vec<std::io::Result<Vec<u8>>> = data
        .chunks(chunk_size.max(1))
        .map(|chunk| Ok(chunk.to_vec()))
        .collect();
    Box::pin(stream::iter(chunks))
}

/// 读完整个字节流
pub async fn read_byte_stream(mut stream: ByteStream) -> std::io::Result<Vec<u8>> {
    let mut buffer = Vec::new();
    while let Some(chunk) = stream.next().await {
        buffer.extend_from_slice(&chunk?);
    }
    Ok(buffer)
}

/// 会话持久状态的导出 / 导入
///
/// `import` 必须完全替换目标会话的状态；同一会话的导出与导入由调用方串行化。
#[async_trait]
pub trait ConversationDataExporter: Send + Sync {
    async fn export(&self, conversation: &ConversationContext) -> anyhow::Result<ByteStream>;

    async fn import(&self, conversation: &ConversationContext, stream: ByteStream) -> anyhow::Result<()>;
}

/// 默认导出器：StateStore 快照 → 归档字节流
pub struct StateTreeExporter {
    store: Arc<dyn StateStore>,
    chunk_size: usize,
}

impl StateTreeExporter {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self {
            store,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }
}

#[async_trait]
impl ConversationDataExporter for StateTreeExporter {
    async fn export(&self, conversation: &ConversationContext) -> anyhow::Result<ByteStream> {
        let tree = self
            .store
            .snapshot(conversation)
            .await
            .map_err(|e| e.into_anyhow())?;
        let bytes = archive::encode(&tree).map_err(|e| e.into_anyhow())?;
        tracing::info!(
            conversation_id = %conversation.id,
            entries = tree.len(),
            bytes = bytes.len(),
            "conversation state exported"
        );
        Ok(byte_stream(bytes, self.chunk_size))
    }

    async fn import(&self, conversation: &ConversationContext, stream: ByteStream) -> anyhow::Result<()> {
        let bytes = read_byte_stream(stream).await?;
        let tree = archive::decode(&bytes).map_err(|e| e.into_anyhow())?;
        let entries = tree.len();
        self.store
            .replace(conversation, tree)
            .await
            .map_err(|e| e.into_anyhow())?;
        tracing::info!(
            conversation_id = %conversation.id,
            entries,
            "conversation state imported"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{AssistantContext, AssistantError};
    use crate::storage::{FileStateStore, MemoryStateStore, RelativePath};
    use tempfile::TempDir;

    fn conversation(assistant_id: &str, id: &str) -> ConversationContext {
        ConversationContext::detached(
            id,
            "My conversation",
            AssistantContext::new("svc", assistant_id, "my assistant"),
        )
    }

    async fn seed_source(store: &dyn StateStore, ctx: &ConversationContext) {
        store
            .write(ctx, &RelativePath::parse("test.txt").unwrap(), b"Hello, world".to_vec())
            .await
            .unwrap();
        store
            .write(ctx, &RelativePath::parse("subdir/test.bin").unwrap(), vec![1, 2, 3, 4])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_file_export_import_to_empty_dir() {
        let dir = TempDir::new().unwrap();
        let store: Arc<dyn StateStore> = Arc::new(FileStateStore::new(dir.path()));
        let exporter = StateTreeExporter::new(Arc::clone(&store)).with_chunk_size(7);
        let src = conversation("a1", "src");
        let dest = conversation("a2", "dest");
        seed_source(store.as_ref(), &src).await;

        let stream = exporter.export(&src).await.unwrap();
        exporter.import(&dest, stream).await.unwrap();

        assert_eq!(store.snapshot(&dest).await.unwrap(), store.snapshot(&src).await.unwrap());
    }

    #[tokio::test]
    async fn test_file_export_import_to_non_empty_dir() {
        let dir = TempDir::new().unwrap();
        let file_store = FileStateStore::new(dir.path());
        let src = conversation("a1", "src");
        let dest = conversation("a1", "dest");
        let dest_dir = file_store.conversation_dir(&dest).unwrap();
        let store: Arc<dyn StateStore> = Arc::new(file_store);
        let exporter = StateTreeExporter::new(Arc::clone(&store));

        store
            .write(&dest, &RelativePath::parse("test.txt").unwrap(), b"this file will be overwritten".to_vec())
            .await
            .unwrap();
        store
            .write(&dest, &RelativePath::parse("subdir-gets-deleted/test.bin").unwrap(), vec![1, 2, 3, 4])
            .await
            .unwrap();
        seed_source(store.as_ref(), &src).await;

        let stream = exporter.export(&src).await.unwrap();
        exporter.import(&dest, stream).await.unwrap();

        assert_eq!(std::fs::read_to_string(dest_dir.join("test.txt")).unwrap(), "Hello, world");
        assert_eq!(
            std::fs::read(dest_dir.join("subdir").join("test.bin")).unwrap(),
            vec![1, 2, 3, 4]
        );
        assert!(!dest_dir.join("subdir-gets-deleted").exists());
    }

    #[tokio::test]
    async fn test_export_is_byte_identical_across_calls() {
        let store: Arc<dyn StateStore> = Arc::new(MemoryStateStore::new());
        let exporter = StateTreeExporter::new(Arc::clone(&store));
        let src = conversation("a1", "src");
        seed_source(store.as_ref(), &src).await;

        let first = read_byte_stream(exporter.export(&src).await.unwrap()).await.unwrap();
        let second = read_byte_stream(exporter.export(&src).await.unwrap()).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_import_garbage_is_bad_request() {
        let store: Arc<dyn StateStore> = Arc::new(MemoryStateStore::new());
        let exporter = StateTreeExporter::new(Arc::clone(&store));
        let dest = conversation("a1", "dest");

        let err = exporter
            .import(&dest, byte_stream(vec![0xde, 0xad], 1))
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<AssistantError>(),
            Some(AssistantError::BadRequest(_))
        ));
    }
}
