//! 会话持久状态：状态树、存储后端与导出/导入
//!
//! - **tree**: `StateTree`，按相对路径索引的目录/文件条目
//! - **archive**: 导出字节流的编码格式
//! - **bundle**: 助手导出包（配置 + 各会话导出数据）
//! - **file_store** / **memory_store**: `StateStore` 的文件系统与内存实现
//! - **exporter**: `ConversationDataExporter` 契约及基于状态树的默认实现

pub mod archive;
pub mod bundle;
mod exporter;
mod file_store;
mod memory_store;
mod tree;

use async_trait::async_trait;
use thiserror::Error;

use crate::core::{AssistantError, ConversationContext};

pub use exporter::{byte_stream, read_byte_stream, ByteStream, ConversationDataExporter, StateTreeExporter};
pub use file_store::FileStateStore;
pub use memory_store::MemoryStateStore;
pub use tree::{RelativePath, StateEntry, StateTree};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("invalid state path: {0}")]
    InvalidPath(String),

    #[error("invalid state archive: {0}")]
    InvalidArchive(String),

    #[error("state storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("state serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("state storage task failed: {0}")]
    Task(String),
}

impl StorageError {
    /// 调用方输入导致的错误转为 BadRequest，其余保持原样
    pub fn into_anyhow(self) -> anyhow::Error {
        match self {
            StorageError::InvalidPath(_) | StorageError::InvalidArchive(_) => {
                AssistantError::bad_request(self.to_string()).into()
            }
            other => anyhow::Error::new(other),
        }
    }
}

/// 会话持久状态的存储后端（按 助手 ID + 会话 ID 隔离）
#[async_trait]
pub trait StateStore: Send + Sync {
    /// 获取一致的时间点快照
    async fn snapshot(&self, conversation: &ConversationContext) -> Result<StateTree, StorageError>;

    /// 用 tree 整体替换现有状态（不在 tree 中的旧条目必须消失）
    async fn replace(&self, conversation: &ConversationContext, tree: StateTree) -> Result<(), StorageError>;

    /// 删除会话的全部状态，不存在时也返回 Ok
    async fn purge(&self, conversation: &ConversationContext) -> Result<(), StorageError>;

    async fn read(
        &self,
        conversation: &ConversationContext,
        path: &RelativePath,
    ) -> Result<Option<Vec<u8>>, StorageError>;

    async fn write(
        &self,
        conversation: &ConversationContext,
        path: &RelativePath,
        data: Vec<u8>,
    ) -> Result<(), StorageError>;
}
