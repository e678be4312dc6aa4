//! 文件系统状态存储
//!
//! 目录布局：`<root>/assistants/<assistant_id>/conversations/<conversation_id>/...`
//! 快照先在 spawn_blocking 中完成目录列举，再逐个读取文件；替换先写入暂存目录再整体 rename。

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use walkdir::WalkDir;

use super::{RelativePath, StateEntry, StateStore, StateTree, StorageError};
use crate::core::{validate_id, ConversationContext};

pub struct FileStateStore {
    root: PathBuf,
}

enum ListedEntry {
    Directory,
    File(PathBuf),
}

impl FileStateStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// 助手实例目录（配置等按助手划分的数据也放在这里）
    pub fn assistant_dir(root: &Path, assistant_id: &str) -> PathBuf {
        root.join("assistants").join(assistant_id)
    }

    /// 会话状态目录
    pub fn conversation_dir(&self, conversation: &ConversationContext) -> Result<PathBuf, StorageError> {
        for (kind, id) in [
            ("assistant", conversation.assistant.id.as_str()),
            ("conversation", conversation.id.as_str()),
        ] {
            validate_id(kind, id).map_err(|e| StorageError::InvalidPath(e.to_string()))?;
        }
        Ok(Self::assistant_dir(&self.root, &conversation.assistant.id)
            .join("conversations")
            .join(&conversation.id))
    }
}

fn list_entries(dir: &Path) -> Result<Vec<(RelativePath, ListedEntry)>, StorageError> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut listed = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).sort_by_file_name() {
        let entry = entry.map_err(|e| StorageError::Io(e.into()))?;
        let relative = entry
            .path()
            .strip_prefix(dir)
            .map_err(|e| StorageError::InvalidPath(e.to_string()))?;
        let relative = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/");
        let relative = RelativePath::parse(&relative)?;

        let file_type = entry.file_type();
        if file_type.is_dir() {
            listed.push((relative, ListedEntry::Directory));
        } else if file_type.is_file() {
            listed.push((relative, ListedEntry::File(entry.path().to_path_buf())));
        }
    }
    Ok(listed)
}

async fn write_tree(target: &Path, tree: &StateTree) -> Result<(), StorageError> {
    for (path, entry) in tree.iter() {
        let full = path.to_path(target);
        match entry {
            StateEntry::Directory => fs::create_dir_all(&full).await?,
            StateEntry::File(data) => {
                if let Some(parent) = full.parent() {
                    fs::create_dir_all(parent).await?;
                }
                fs::write(&full, data).await?;
            }
        }
    }
    Ok(())
}

async fn remove_dir_if_exists(dir: &Path) -> Result<(), StorageError> {
    match fs::remove_dir_all(dir).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl StateStore for FileStateStore {
    async fn snapshot(&self, conversation: &ConversationContext) -> Result<StateTree, StorageError> {
        let dir = self.conversation_dir(conversation)?;
        let listing = tokio::task::spawn_blocking(move || list_entries(&dir))
            .await
            .map_err(|e| StorageError::Task(e.to_string()))??;

        let mut tree = StateTree::new();
        for (path, entry) in listing {
            match entry {
                ListedEntry::Directory => tree.insert_dir(path),
                ListedEntry::File(full) => match fs::read(&full).await {
                    Ok(data) => tree.insert_file(path, data),
                    // 列举之后被删除的文件不进入快照
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                    Err(e) => return Err(e.into()),
                },
            }
        }
        Ok(tree)
    }

    async fn replace(&self, conversation: &ConversationContext, tree: StateTree) -> Result<(), StorageError> {
        let dir = self.conversation_dir(conversation)?;
        let staging = self
            .root
            .join(".staging")
            .join(uuid::Uuid::new_v4().to_string());
        fs::create_dir_all(&staging).await?;

        if let Err(e) = write_tree(&staging, &tree).await {
            let _ = remove_dir_if_exists(&staging).await;
            return Err(e);
        }

        remove_dir_if_exists(&dir).await?;
        if let Some(parent) = dir.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::rename(&staging, &dir).await?;
        tracing::debug!(
            conversation_id = %conversation.id,
            entries = tree.len(),
            "conversation state replaced"
        );
        Ok(())
    }

    async fn purge(&self, conversation: &ConversationContext) -> Result<(), StorageError> {
        let dir = self.conversation_dir(conversation)?;
        remove_dir_if_exists(&dir).await
    }

    async fn read(
        &self,
        conversation: &ConversationContext,
        path: &RelativePath,
    ) -> Result<Option<Vec<u8>>, StorageError> {
        let full = path.to_path(&self.conversation_dir(conversation)?);
        match fs::read(&full).await {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write(
        &self,
        conversation: &ConversationContext,
        path: &RelativePath,
        data: Vec<u8>,
    ) -> Result<(), StorageError> {
        let full = path.to_path(&self.conversation_dir(conversation)?);
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&full, data).await?;
        Ok(())
    }
}
