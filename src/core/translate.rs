//! 错误翻译：边界层唯一的错误适配点
//!
//! 只翻译 [`AssistantError`]；其他错误保持原样向上抛出，让框架缺陷以 5xx 的形式暴露。

use std::future::Future;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::error::{AssistantError, FieldError};

/// 对外可见的失败响应
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("HTTP {status_code}: {detail}")]
pub struct HttpError {
    pub status_code: u16,
    pub detail: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<FieldError>,
}

impl From<&AssistantError> for HttpError {
    fn from(err: &AssistantError) -> Self {
        Self {
            status_code: err.status_code(),
            detail: err.to_string(),
            errors: err.field_errors().to_vec(),
        }
    }
}

/// 把单个错误翻译为 [`HttpError`]（若可识别），否则原样返回
pub fn translate_error(err: anyhow::Error) -> anyhow::Error {
    match err.downcast::<AssistantError>() {
        Ok(known) => anyhow::Error::new(HttpError::from(&known)),
        Err(other) => other,
    }
}

/// 翻译同步调用的结果
pub fn translate_assistant_errors<T, F>(call: F) -> anyhow::Result<T>
where
    F: FnOnce() -> anyhow::Result<T>,
{
    call().map_err(translate_error)
}

/// 翻译异步调用的结果
pub async fn translate_assistant_errors_async<T, Fut>(call: Fut) -> anyhow::Result<T>
where
    Fut: Future<Output = anyhow::Result<T>>,
{
    call.await.map_err(translate_error)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Error)]
    #[error("unknown error for test")]
    struct UnknownErrorForTest;

    fn canonical_cases() -> Vec<(AssistantError, u16)> {
        vec![
            (AssistantError::not_found("missing"), 404),
            (AssistantError::conflict("exists"), 409),
            (AssistantError::bad_request("bad"), 400),
            (AssistantError::Unauthorized("no".into()), 401),
        ]
    }

    #[test]
    fn test_translate_sync() {
        for (err, status) in canonical_cases() {
            let result: anyhow::Result<()> = translate_assistant_errors(|| Err(err.into()));
            let err = result.unwrap_err();
            let http = err.downcast_ref::<HttpError>().expect("translated");
            assert_eq!(http.status_code, status);
        }
    }

    #[tokio::test]
    async fn test_translate_async() {
        for (err, status) in canonical_cases() {
            let result: anyhow::Result<()> =
                translate_assistant_errors_async(async move { Err(err.into()) }).await;
            let err = result.unwrap_err();
            let http = err.downcast_ref::<HttpError>().expect("translated");
            assert_eq!(http.status_code, status);
        }
    }

    #[tokio::test]
    async fn test_unknown_errors_pass_through() {
        let result: anyhow::Result<()> =
            translate_assistant_errors(|| Err(UnknownErrorForTest.into()));
        let err = result.unwrap_err();
        assert!(err.downcast_ref::<HttpError>().is_none());
        assert!(err.downcast_ref::<UnknownErrorForTest>().is_some());

        let result: anyhow::Result<()> =
            translate_assistant_errors_async(async { Err(UnknownErrorForTest.into()) }).await;
        assert!(result.unwrap_err().downcast_ref::<UnknownErrorForTest>().is_some());
    }

    #[test]
    fn test_validation_errors_keep_fields() {
        let err = AssistantError::Validation(vec![FieldError::new("config.a", "expected string")]);
        let result: anyhow::Result<()> = translate_assistant_errors(|| Err(err.into()));
        let err = result.unwrap_err();
        let http = err.downcast_ref::<HttpError>().unwrap();
        assert_eq!(http.status_code, 400);
        assert_eq!(http.errors[0].path, "config.a");
    }
}
