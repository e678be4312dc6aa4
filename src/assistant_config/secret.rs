//! 密钥字段类型与掩码约定

use schemars::gen::SchemaGenerator;
use schemars::schema::{InstanceType, Metadata, Schema, SchemaObject};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// 对外读取密钥字段时返回的固定掩码
pub const SECRET_MASK: &str = "**********";

/// 密钥字段。序列化为明文（仅用于持久化），对外响应由 provider 按 schema 打码。
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConfigSecret(String);

impl ConfigSecret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// 明文（仅供处理器内部使用）
    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for ConfigSecret {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ConfigSecret {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl std::fmt::Debug for ConfigSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ConfigSecret").field(&redact(&self.0)).finish()
    }
}

impl JsonSchema for ConfigSecret {
    fn schema_name() -> String {
        "ConfigSecret".to_string()
    }

    fn json_schema(_gen: &mut SchemaGenerator) -> Schema {
        SchemaObject {
            instance_type: Some(InstanceType::String.into()),
            format: Some("password".to_string()),
            metadata: Some(Box::new(Metadata {
                write_only: true,
                ..Default::default()
            })),
            ..Default::default()
        }
        .into()
    }
}

/// 非空密钥打码，空值保持为空
pub fn redact(value: &str) -> &str {
    if value.is_empty() {
        ""
    } else {
        SECRET_MASK
    }
}

/// 客户端提交的密钥字段：掩码表示「保持不变」
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecretUpdate {
    Set(String),
    Unchanged,
}

impl SecretUpdate {
    pub fn from_wire(value: &str) -> Self {
        if value == SECRET_MASK {
            SecretUpdate::Unchanged
        } else {
            SecretUpdate::Set(value.to_string())
        }
    }

    /// 得到要持久化的明文；没有已存值时 Unchanged 视为空
    pub fn resolve(self, stored: Option<&str>) -> String {
        match self {
            SecretUpdate::Set(value) => value,
            SecretUpdate::Unchanged => stored.unwrap_or_default().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_never_prints_plaintext() {
        let secret = ConfigSecret::new("hunter2");
        assert_eq!(format!("{secret:?}"), format!("ConfigSecret({SECRET_MASK:?})"));
        assert_eq!(format!("{:?}", ConfigSecret::default()), "ConfigSecret(\"\")");
        assert_eq!(serde_json::to_value(&secret).unwrap(), "hunter2");
    }

    #[test]
    fn test_secret_update_from_wire() {
        assert_eq!(SecretUpdate::from_wire(SECRET_MASK), SecretUpdate::Unchanged);
        assert_eq!(SecretUpdate::from_wire("new"), SecretUpdate::Set("new".into()));
        assert_eq!(SecretUpdate::Unchanged.resolve(Some("old")), "old");
        assert_eq!(SecretUpdate::Unchanged.resolve(None), "");
        assert_eq!(SecretUpdate::Set(String::new()).resolve(Some("old")), "");
    }

    #[test]
    fn test_schema_marks_password_write_only() {
        let schema = serde_json::to_value(schemars::schema_for!(ConfigSecret)).unwrap();
        assert_eq!(schema["format"], "password");
        assert_eq!(schema["writeOnly"], true);
        assert_eq!(schema["type"], "string");
    }
}
