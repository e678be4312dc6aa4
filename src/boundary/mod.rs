//! 请求边界：JSON 请求信封 → 服务调用 → JSON 响应
//!
//! 每个请求只经过一次错误翻译。可识别的错误以 4xx 返回，
//! 其余错误记 error 日志并以 500 + `fault` 返回，两者在响应里可区分。
//!
//! - **lanes**: 按助手 / 会话分道的请求派发，保持同一会话内的到达顺序

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::app::{AssistantService, PutOutcome};
use crate::core::{translate_assistant_errors_async, AssistantError, HttpError};
use crate::events::ConversationEvent;
use crate::storage::{byte_stream, read_byte_stream, ByteStream};

mod lanes;

pub use lanes::RequestLanes;

const IMPORT_CHUNK_SIZE: usize = 64 * 1024;

/// 请求信封：`id` 原样带回响应，其余字段由 `op` 决定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostRequest {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(flatten)]
    pub op: HostOperation,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum HostOperation {
    ServiceInfo,

    PutAssistant {
        assistant_id: String,
        name: String,
        /// 之前导出的助手（base64），只能用于新建
        #[serde(default)]
        from_export: Option<String>,
    },

    DeleteAssistant {
        assistant_id: String,
    },

    PutConversation {
        assistant_id: String,
        conversation_id: String,
        #[serde(default)]
        title: String,
        /// 之前导出的状态（base64）
        #[serde(default)]
        from_export: Option<String>,
    },

    DeleteConversation {
        assistant_id: String,
        conversation_id: String,
    },

    PostConversationEvent {
        assistant_id: String,
        event: ConversationEvent,
    },

    GetConfig {
        assistant_id: String,
    },

    PutConfig {
        assistant_id: String,
        config: Value,
    },

    ListInspectors {
        assistant_id: String,
        conversation_id: String,
    },

    GetInspectorState {
        assistant_id: String,
        conversation_id: String,
        inspector_id: String,
    },

    /// 响应 body 为 `{"data": <base64>}`
    ExportConversation {
        assistant_id: String,
        conversation_id: String,
    },

    /// 响应 body 为 `{"data": <base64>}`，可作为 put_assistant 的 from_export
    ExportAssistant {
        assistant_id: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub status: u16,
    #[serde(default)]
    pub body: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<HttpError>,
    /// 未识别的内部错误
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fault: Option<String>,
}

impl HostResponse {
    fn ok(id: Option<String>, status: u16, body: Value) -> Self {
        Self {
            id,
            status,
            body,
            error: None,
            fault: None,
        }
    }

    fn failed(id: Option<String>, error: HttpError) -> Self {
        Self {
            id,
            status: error.status_code,
            body: Value::Null,
            error: Some(error),
            fault: None,
        }
    }

    fn fault(id: Option<String>, err: &anyhow::Error) -> Self {
        Self {
            id,
            status: 500,
            body: Value::Null,
            error: None,
            fault: Some(err.to_string()),
        }
    }
}

/// 无法解析的行直接得到 400 响应
fn parse_line(line: &str) -> Result<HostRequest, HostResponse> {
    serde_json::from_str::<HostRequest>(line).map_err(|e| {
        let err = AssistantError::bad_request(format!("invalid request: {e}"));
        HostResponse::failed(None, HttpError::from(&err))
    })
}

/// 解析一行请求并处理
pub async fn handle_line(service: &AssistantService, line: &str) -> HostResponse {
    match parse_line(line) {
        Ok(request) => handle_request(service, request).await,
        Err(response) => response,
    }
}

pub async fn handle_request(service: &AssistantService, request: HostRequest) -> HostResponse {
    let id = request.id;
    match translate_assistant_errors_async(execute(service, request.op)).await {
        Ok((status, body)) => HostResponse::ok(id, status, body),
        Err(err) => match err.downcast::<HttpError>() {
            Ok(http) => HostResponse::failed(id, http),
            Err(other) => {
                tracing::error!(error = ?other, "request failed with unrecognized error");
                HostResponse::fault(id, &other)
            }
        },
    }
}

fn decode_export(field: &str, encoded: Option<String>) -> Result<Option<ByteStream>, AssistantError> {
    match encoded {
        Some(encoded) => {
            let data = STANDARD
                .decode(encoded.as_bytes())
                .map_err(|e| AssistantError::bad_request(format!("{field} is not valid base64: {e}")))?;
            Ok(Some(byte_stream(data, IMPORT_CHUNK_SIZE)))
        }
        None => Ok(None),
    }
}

async fn encode_export(stream: ByteStream) -> anyhow::Result<Value> {
    let data = read_byte_stream(stream).await?;
    Ok(json!({ "data": STANDARD.encode(data) }))
}

fn put_status(outcome: PutOutcome) -> u16 {
    match outcome {
        PutOutcome::Created => 201,
        PutOutcome::Updated => 200,
    }
}

async fn execute(service: &AssistantService, op: HostOperation) -> anyhow::Result<(u16, Value)> {
    match op {
        HostOperation::ServiceInfo => Ok((200, serde_json::to_value(service.service_info()?)?)),
        HostOperation::PutAssistant {
            assistant_id,
            name,
            from_export,
        } => {
            let stream = decode_export("from_export", from_export)?;
            let outcome = service.put_assistant(&assistant_id, &name, stream).await?;
            Ok((
                put_status(outcome),
                json!({ "assistant_id": assistant_id, "name": name, "outcome": outcome }),
            ))
        }
        HostOperation::DeleteAssistant { assistant_id } => {
            service.delete_assistant(&assistant_id).await?;
            Ok((204, Value::Null))
        }
        HostOperation::PutConversation {
            assistant_id,
            conversation_id,
            title,
            from_export,
        } => {
            let stream = decode_export("from_export", from_export)?;
            let outcome = service
                .put_conversation(&assistant_id, &conversation_id, &title, stream)
                .await?;
            Ok((
                put_status(outcome),
                json!({ "conversation_id": conversation_id, "title": title, "outcome": outcome }),
            ))
        }
        HostOperation::DeleteConversation {
            assistant_id,
            conversation_id,
        } => {
            service.delete_conversation(&assistant_id, &conversation_id).await?;
            Ok((204, Value::Null))
        }
        HostOperation::PostConversationEvent { assistant_id, event } => {
            let accepted = service.post_conversation_event(&assistant_id, event).await?;
            Ok((202, serde_json::to_value(accepted)?))
        }
        HostOperation::GetConfig { assistant_id } => {
            let config = service.get_config(&assistant_id).await?;
            Ok((200, serde_json::to_value(config)?))
        }
        HostOperation::PutConfig { assistant_id, config } => {
            let config = service.put_config(&assistant_id, config).await?;
            Ok((200, serde_json::to_value(config)?))
        }
        HostOperation::ListInspectors {
            assistant_id,
            conversation_id,
        } => {
            let inspectors = service.list_inspectors(&assistant_id, &conversation_id).await?;
            Ok((200, json!({ "inspectors": inspectors })))
        }
        HostOperation::GetInspectorState {
            assistant_id,
            conversation_id,
            inspector_id,
        } => {
            let state = service
                .get_inspector_state(&assistant_id, &conversation_id, &inspector_id)
                .await?;
            Ok((200, serde_json::to_value(state)?))
        }
        HostOperation::ExportConversation {
            assistant_id,
            conversation_id,
        } => {
            let stream = service.export_conversation(&assistant_id, &conversation_id).await?;
            Ok((200, encode_export(stream).await?))
        }
        HostOperation::ExportAssistant { assistant_id } => {
            let stream = service.export_assistant(&assistant_id).await?;
            Ok((200, encode_export(stream).await?))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::AssistantApp;
    use crate::core::ConversationContext;

    fn service() -> AssistantService {
        let mut app = AssistantApp::new("svc", "Test", "");
        app.events()
            .on_conversation_created(|ctx: ConversationContext| async move {
                if ctx.title == "explode" {
                    anyhow::bail!("handler blew up");
                }
                ctx.write_state("greeting.txt", "hello").await?;
                anyhow::Ok(())
            });
        app.into_service()
    }

    async fn call(service: &AssistantService, request: Value) -> HostResponse {
        handle_line(service, &request.to_string()).await
    }

    #[tokio::test]
    async fn test_lifecycle_statuses() {
        let service = service();
        let response = call(&service, json!({"id": "r1", "op": "put_assistant", "assistant_id": "a1", "name": "A"})).await;
        assert_eq!(response.status, 201);
        assert_eq!(response.id.as_deref(), Some("r1"));
        let response = call(&service, json!({"op": "put_assistant", "assistant_id": "a1", "name": "B"})).await;
        assert_eq!(response.status, 200);
        assert_eq!(response.body["outcome"], "updated");

        let response = call(&service, json!({"op": "delete_assistant", "assistant_id": "a1"})).await;
        assert_eq!(response.status, 204);
        let response = call(&service, json!({"op": "get_config", "assistant_id": "a1"})).await;
        assert_eq!(response.status, 404);
        assert!(response.fault.is_none());
    }

    #[tokio::test]
    async fn test_malformed_requests_are_bad_requests() {
        let service = service();
        let response = handle_line(&service, "{not json").await;
        assert_eq!(response.status, 400);
        let response = call(&service, json!({"op": "no_such_op"})).await;
        assert_eq!(response.status, 400);

        call(&service, json!({"op": "put_assistant", "assistant_id": "a1", "name": "A"})).await;
        let response = call(
            &service,
            json!({"op": "put_conversation", "assistant_id": "a1", "conversation_id": "c1", "from_export": "%%%"}),
        )
        .await;
        assert_eq!(response.status, 400);
    }

    #[tokio::test]
    async fn test_unrecognized_errors_are_faults() {
        let service = service();
        call(&service, json!({"op": "put_assistant", "assistant_id": "a1", "name": "A"})).await;
        let response = call(
            &service,
            json!({"op": "put_conversation", "assistant_id": "a1", "conversation_id": "c1", "title": "explode"}),
        )
        .await;
        assert_eq!(response.status, 500);
        assert_eq!(response.fault.as_deref(), Some("handler blew up"));
        assert!(response.error.is_none());
    }

    #[tokio::test]
    async fn test_export_then_import_through_envelope() {
        let service = service();
        call(&service, json!({"op": "put_assistant", "assistant_id": "a1", "name": "A"})).await;
        call(&service, json!({"op": "put_conversation", "assistant_id": "a1", "conversation_id": "c1", "title": "t"})).await;

        let exported = call(
            &service,
            json!({"op": "export_conversation", "assistant_id": "a1", "conversation_id": "c1"}),
        )
        .await;
        assert_eq!(exported.status, 200);
        let data = exported.body["data"].as_str().unwrap().to_string();

        let response = call(
            &service,
            json!({
                "op": "put_conversation", "assistant_id": "a1", "conversation_id": "c2",
                "title": "copy", "from_export": data
            }),
        )
        .await;
        assert_eq!(response.status, 201);
        let copied = call(
            &service,
            json!({"op": "export_conversation", "assistant_id": "a1", "conversation_id": "c2"}),
        )
        .await;
        assert_eq!(copied.body["data"], exported.body["data"]);
    }

    #[tokio::test]
    async fn test_assistant_export_through_envelope() {
        let service = service();
        call(&service, json!({"op": "put_assistant", "assistant_id": "a1", "name": "A"})).await;
        call(&service, json!({"op": "put_conversation", "assistant_id": "a1", "conversation_id": "c1", "title": "t"})).await;

        let exported = call(&service, json!({"op": "export_assistant", "assistant_id": "a1"})).await;
        assert_eq!(exported.status, 200);
        let data = exported.body["data"].clone();

        let response = call(
            &service,
            json!({"op": "put_assistant", "assistant_id": "a2", "name": "B", "from_export": data}),
        )
        .await;
        assert_eq!(response.status, 201);
        let copied = call(
            &service,
            json!({"op": "export_conversation", "assistant_id": "a2", "conversation_id": "c1"}),
        )
        .await;
        assert_eq!(copied.status, 200);

        let response = call(
            &service,
            json!({"op": "put_assistant", "assistant_id": "a1", "name": "A", "from_export": data}),
        )
        .await;
        assert_eq!(response.status, 409);
        let response = call(&service, json!({"op": "export_assistant", "assistant_id": "missing"})).await;
        assert_eq!(response.status, 404);
    }
}
