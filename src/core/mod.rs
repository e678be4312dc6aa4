//! 核心层：错误分类与翻译、助手/会话上下文

pub mod context;
pub mod error;
pub mod translate;

pub use context::{AssistantContext, ConversationContext};
pub use error::{validate_id, AssistantError, FieldError};
pub use translate::{
    translate_assistant_errors, translate_assistant_errors_async, translate_error, HttpError,
};
