//! 助手错误分类
//!
//! 领域组件直接返回这些固定类别；边界层（translate）把它们映射为对外状态码，
//! 其他任何错误原样透传，不会被当成 4xx 吞掉。

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 校验失败的单个字段（路径形如 `config.test_key`、`config_secrets.items[0]`）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    pub path: String,
    pub message: String,
}

impl FieldError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for FieldError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.path.is_empty() {
            write!(f, "{}", self.message)
        } else {
            write!(f, "{}: {}", self.path, self.message)
        }
    }
}

fn summarize(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// 可被边界层识别的错误类别
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AssistantError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// 配置校验失败，附带所有不合法字段的路径
    #[error("Invalid config: {}", summarize(.0))]
    Validation(Vec<FieldError>),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),
}

impl AssistantError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    /// 对外状态码
    pub fn status_code(&self) -> u16 {
        match self {
            AssistantError::BadRequest(_) | AssistantError::Validation(_) => 400,
            AssistantError::Unauthorized(_) => 401,
            AssistantError::NotFound(_) => 404,
            AssistantError::Conflict(_) => 409,
        }
    }

    pub fn field_errors(&self) -> &[FieldError] {
        match self {
            AssistantError::Validation(errors) => errors,
            _ => &[],
        }
    }
}

/// 校验外部传入的 ID（会被用作存储目录名）
pub fn validate_id(kind: &str, id: &str) -> Result<(), AssistantError> {
    let valid = !id.is_empty()
        && id != "."
        && id != ".."
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(AssistantError::bad_request(format!("invalid {kind} id: {id:?}")))
    }
}
