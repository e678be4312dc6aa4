//! 助手导出包：助手配置（已打码）+ 各会话的导出数据
//!
//! 会话数据是会话导出器产生的不透明字节，这里只做 base64 封装，不解析。
//! 会话按 ID 排序写出，同一状态的两次导出字节相同。

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::StorageError;

pub const BUNDLE_FORMAT: &str = "hive-assistant-export";
pub const BUNDLE_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq)]
pub struct BundledConversation {
    pub id: String,
    pub title: String,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct AssistantBundle {
    /// 没有配置 provider 的服务导出时为 None
    pub config: Option<Value>,
    pub conversations: Vec<BundledConversation>,
}

#[derive(Serialize, Deserialize)]
struct BundleDocument {
    format: String,
    version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    config: Option<Value>,
    conversations: Vec<ConversationEntry>,
}

#[derive(Serialize, Deserialize)]
struct ConversationEntry {
    id: String,
    #[serde(default)]
    title: String,
    data: String,
}

pub fn encode(bundle: &AssistantBundle) -> Result<Vec<u8>, StorageError> {
    let mut conversations: Vec<ConversationEntry> = bundle
        .conversations
        .iter()
        .map(|c| ConversationEntry {
            id: c.id.clone(),
            title: c.title.clone(),
            data: STANDARD.encode(&c.data),
        })
        .collect();
    conversations.sort_by(|a, b| a.id.cmp(&b.id));
    let doc = BundleDocument {
        format: BUNDLE_FORMAT.to_string(),
        version: BUNDLE_VERSION,
        config: bundle.config.clone(),
        conversations,
    };
    Ok(serde_json::to_vec(&doc)?)
}

pub fn decode(bytes: &[u8]) -> Result<AssistantBundle, StorageError> {
    let doc: BundleDocument =
        serde_json::from_slice(bytes).map_err(|e| StorageError::InvalidArchive(e.to_string()))?;
    if doc.format != BUNDLE_FORMAT {
        return Err(StorageError::InvalidArchive(format!(
            "unexpected format {:?}",
            doc.format
        )));
    }
    if doc.version != BUNDLE_VERSION {
        return Err(StorageError::InvalidArchive(format!(
            "unsupported version {}",
            doc.version
        )));
    }

    let mut conversations = Vec::with_capacity(doc.conversations.len());
    for entry in doc.conversations {
        let data = STANDARD
            .decode(entry.data.as_bytes())
            .map_err(|e| StorageError::InvalidArchive(format!("conversation {}: {e}", entry.id)))?;
        if conversations.iter().any(|c: &BundledConversation| c.id == entry.id) {
            return Err(StorageError::InvalidArchive(format!(
                "duplicate conversation {}",
                entry.id
            )));
        }
        conversations.push(BundledConversation {
            id: entry.id,
            title: entry.title,
            data,
        });
    }
    Ok(AssistantBundle {
        config: doc.config,
        conversations,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn bundle() -> AssistantBundle {
        AssistantBundle {
            config: Some(json!({"config": {"prefix": ">"}})),
            conversations: vec![
                BundledConversation {
                    id: "c2".into(),
                    title: "second".into(),
                    data: vec![9, 8, 7],
                },
                BundledConversation {
                    id: "c1".into(),
                    title: "first".into(),
                    data: b"state".to_vec(),
                },
            ],
        }
    }

    #[test]
    fn test_encode_sorts_conversations() {
        let bytes = encode(&bundle()).unwrap();
        let decoded = decode(&bytes).unwrap();
        let ids: Vec<_> = decoded.conversations.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["c1", "c2"]);
        assert_eq!(decoded.conversations[1].data, vec![9, 8, 7]);
        assert_eq!(decoded.config, bundle().config);
    }

    #[test]
    fn test_decode_rejects_foreign_documents() {
        assert!(matches!(decode(b"[]"), Err(StorageError::InvalidArchive(_))));

        let conversation_archive = json!({"format": "hive-conversation-state", "version": 1, "entries": []});
        assert!(decode(conversation_archive.to_string().as_bytes()).is_err());

        let duplicated = json!({
            "format": BUNDLE_FORMAT,
            "version": BUNDLE_VERSION,
            "conversations": [
                {"id": "c1", "data": ""},
                {"id": "c1", "data": ""}
            ]
        });
        let err = decode(duplicated.to_string().as_bytes()).unwrap_err();
        assert!(err.to_string().contains("duplicate conversation c1"));
    }
}
