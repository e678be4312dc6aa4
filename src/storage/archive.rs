//! 导出归档编码：带版本的 JSON 文档，文件内容 base64，条目按路径排序（输出确定）

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};

use super::tree::{RelativePath, StateEntry, StateTree};
use super::StorageError;

pub const ARCHIVE_FORMAT: &str = "hive-conversation-state";
pub const ARCHIVE_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct ArchiveDocument {
    format: String,
    version: u32,
    entries: Vec<ArchiveEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum ArchiveEntry {
    Directory { path: String },
    File { path: String, data: String },
}

pub fn encode(tree: &StateTree) -> Result<Vec<u8>, StorageError> {
    let entries = tree
        .iter()
        .map(|(path, entry)| match entry {
            StateEntry::Directory => ArchiveEntry::Directory {
                path: path.to_string(),
            },
            StateEntry::File(data) => ArchiveEntry::File {
                path: path.to_string(),
                data: STANDARD.encode(data),
            },
        })
        .collect();
    let doc = ArchiveDocument {
        format: ARCHIVE_FORMAT.to_string(),
        version: ARCHIVE_VERSION,
        entries,
    };
    Ok(serde_json::to_vec(&doc)?)
}

pub fn decode(bytes: &[u8]) -> Result<StateTree, StorageError> {
    let doc: ArchiveDocument =
        serde_json::from_slice(bytes).map_err(|e| StorageError::InvalidArchive(e.to_string()))?;
    if doc.format != ARCHIVE_FORMAT {
        return Err(StorageError::InvalidArchive(format!(
            "unexpected format {:?}",
            doc.format
        )));
    }
    if doc.version != ARCHIVE_VERSION {
        return Err(StorageError::InvalidArchive(format!(
            "unsupported version {}",
            doc.version
        )));
    }

    let mut tree = StateTree::new();
    for entry in doc.entries {
        match entry {
            ArchiveEntry::Directory { path } => tree.insert_dir(RelativePath::parse(&path)?),
            ArchiveEntry::File { path, data } => {
                let data = STANDARD
                    .decode(data.as_bytes())
                    .map_err(|e| StorageError::InvalidArchive(format!("{path}: {e}")))?;
                tree.insert_file(RelativePath::parse(&path)?, data);
            }
        }
    }
    Ok(tree)
}
