//! 会话状态树：按相对路径索引的条目表（目录 / 文件）
//!
//! 不直接操作文件系统，文件系统、内存等后端都把自己的内容投影成 StateTree。

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use super::StorageError;

/// 规范化的相对路径（`/` 分隔，不允许绝对路径、`.`、`..`）
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RelativePath(String);

impl RelativePath {
    pub fn parse(raw: &str) -> Result<Self, StorageError> {
        if raw.starts_with('/') || raw.contains('\\') {
            return Err(StorageError::InvalidPath(raw.to_string()));
        }
        let segments: Vec<&str> = raw.split('/').filter(|s| !s.is_empty()).collect();
        if segments.is_empty() || segments.iter().any(|s| *s == "." || *s == "..") {
            return Err(StorageError::InvalidPath(raw.to_string()));
        }
        Ok(Self(segments.join("/")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn parent(&self) -> Option<RelativePath> {
        self.0
            .rsplit_once('/')
            .map(|(parent, _)| RelativePath(parent.to_string()))
    }

    /// 是否为 other 本身或其子孙
    pub fn is_within(&self, other: &RelativePath) -> bool {
        self.0 == other.0
            || (self.0.starts_with(&other.0) && self.0.as_bytes().get(other.0.len()) == Some(&b'/'))
    }

    pub fn to_path(&self, root: &Path) -> PathBuf {
        self.0.split('/').fold(root.to_path_buf(), |acc, s| acc.join(s))
    }
}

impl std::fmt::Display for RelativePath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateEntry {
    Directory,
    File(Vec<u8>),
}

/// 某一时刻的会话持久状态
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StateTree {
    entries: BTreeMap<RelativePath, StateEntry>,
}

impl StateTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_dir(&mut self, path: RelativePath) {
        self.ensure_parents(&path);
        self.entries.insert(path, StateEntry::Directory);
    }

    /// 插入文件，缺失的父目录自动补齐
    pub fn insert_file(&mut self, path: RelativePath, data: Vec<u8>) {
        self.ensure_parents(&path);
        self.remove(&path);
        self.entries.insert(path, StateEntry::File(data));
    }

    fn ensure_parents(&mut self, path: &RelativePath) {
        let mut parent = path.parent();
        while let Some(p) = parent {
            parent = p.parent();
            if !matches!(self.entries.get(&p), Some(StateEntry::Directory)) {
                self.entries.insert(p, StateEntry::Directory);
            }
        }
    }

    /// 删除条目及其子孙
    pub fn remove(&mut self, path: &RelativePath) {
        self.entries.retain(|p, _| !p.is_within(path));
    }

    pub fn get(&self, path: &RelativePath) -> Option<&StateEntry> {
        self.entries.get(path)
    }

    pub fn file(&self, path: &RelativePath) -> Option<&[u8]> {
        match self.entries.get(path) {
            Some(StateEntry::File(data)) => Some(data),
            _ => None,
        }
    }

    /// 按路径字典序遍历（父目录总在子条目之前）
    pub fn iter(&self) -> impl Iterator<Item = (&RelativePath, &StateEntry)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
