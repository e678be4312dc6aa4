//! 助手服务：助手/会话注册表与请求处理
//!
//! 并发约定：
//! - 每个助手、每个会话各有一个闸门（`gate`），生命周期处理器与事件派发在闸门内执行，
//!   因此同一会话的事件按到达顺序逐个处理，created 处理器一定先于该会话的任何消息事件结束。
//! - 注册表锁只用于查找/插入，从不跨 await 持有到处理器中。
//! - 加锁顺序固定为 助手闸门 → 会话闸门。

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::{Mutex, RwLock};

use crate::assistant_config::{AssistantConfigProvider, ConfigResponse};
use crate::core::{validate_id, AssistantContext, AssistantError, ConversationContext};
use crate::events::{ConversationEvent, ConversationEventType, EventLog, EventRouter, EventTag};
use crate::inspector::{InspectorDescription, InspectorRegistry, InspectorStateResponse};
use crate::safety::{ContentSafetyEvaluation, ContentSafetyEvaluator, ContentSafetyResult};
use crate::storage::bundle::{self, AssistantBundle, BundledConversation};
use crate::storage::{byte_stream, read_byte_stream, ByteStream, ConversationDataExporter, StateStore, StorageError};

const EXPORT_CHUNK_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PutOutcome {
    Created,
    Updated,
}

/// 事件受理结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventAccepted {
    /// 只有 message_created 且配置了评估器时才有
    pub content_safety: Option<ContentSafetyEvaluation>,
    /// false 表示事件被内容安全拦截，处理器未执行
    pub handled: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceInfo {
    pub assistant_service_id: String,
    pub name: String,
    pub description: String,
    pub default_config: ConfigResponse,
}

pub(super) struct ServiceParts {
    pub service_id: String,
    pub name: String,
    pub description: String,
    pub router: EventRouter,
    pub config: Option<Arc<dyn AssistantConfigProvider>>,
    pub exporter: Arc<dyn ConversationDataExporter>,
    pub inspectors: InspectorRegistry,
    pub content_safety: Option<Arc<dyn ContentSafetyEvaluator>>,
    pub store: Arc<dyn StateStore>,
    pub event_log_capacity: usize,
}

struct AssistantState {
    context: AssistantContext,
    deleted: bool,
}

struct AssistantRecord {
    gate: Arc<Mutex<()>>,
    state: RwLock<AssistantState>,
    conversations: RwLock<HashMap<String, Arc<ConversationRecord>>>,
}

impl AssistantRecord {
    fn new(context: AssistantContext) -> Self {
        Self {
            gate: Arc::new(Mutex::new(())),
            state: RwLock::new(AssistantState {
                context,
                deleted: false,
            }),
            conversations: RwLock::new(HashMap::new()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConversationPhase {
    /// 已占位，created 尚未完成
    Unborn,
    Active,
    /// 墓碑：同一 ID 不能再创建
    Deleted,
}

struct ConversationState {
    title: String,
    phase: ConversationPhase,
}

struct ConversationRecord {
    gate: Arc<Mutex<()>>,
    state: RwLock<ConversationState>,
    events: EventLog,
}

impl ConversationRecord {
    fn new(title: &str, log_capacity: usize) -> Self {
        Self {
            gate: Arc::new(Mutex::new(())),
            state: RwLock::new(ConversationState {
                title: title.to_string(),
                phase: ConversationPhase::Unborn,
            }),
            events: EventLog::new(log_capacity),
        }
    }
}

pub struct AssistantService {
    service_id: String,
    name: String,
    description: String,
    router: EventRouter,
    config: Option<Arc<dyn AssistantConfigProvider>>,
    exporter: Arc<dyn ConversationDataExporter>,
    inspectors: InspectorRegistry,
    content_safety: Option<Arc<dyn ContentSafetyEvaluator>>,
    store: Arc<dyn StateStore>,
    event_log_capacity: usize,
    assistants: RwLock<HashMap<String, Arc<AssistantRecord>>>,
}

fn empty_config() -> ConfigResponse {
    ConfigResponse {
        config: json!({}),
        json_schema: json!({}),
        ui_schema: json!({}),
    }
}

impl AssistantService {
    pub(super) fn new(parts: ServiceParts) -> Self {
        Self {
            service_id: parts.service_id,
            name: parts.name,
            description: parts.description,
            router: parts.router,
            config: parts.config,
            exporter: parts.exporter,
            inspectors: parts.inspectors,
            content_safety: parts.content_safety,
            store: parts.store,
            event_log_capacity: parts.event_log_capacity,
            assistants: RwLock::new(HashMap::new()),
        }
    }

    pub fn service_id(&self) -> &str {
        &self.service_id
    }

    pub fn service_info(&self) -> anyhow::Result<ServiceInfo> {
        let default_config = match &self.config {
            Some(provider) => provider.default_config()?,
            None => empty_config(),
        };
        Ok(ServiceInfo {
            assistant_service_id: self.service_id.clone(),
            name: self.name.clone(),
            description: self.description.clone(),
            default_config,
        })
    }

    /// 创建或更新助手实例，并执行对应的生命周期处理器。
    ///
    /// from_export 只能用于新建：先写入导出包里的配置，created 处理器结束后再逐个导入会话。
    /// 导入会话失败时整个助手被删除。已存在的助手带 from_export 返回 Conflict。
    pub async fn put_assistant(
        &self,
        assistant_id: &str,
        name: &str,
        from_export: Option<ByteStream>,
    ) -> anyhow::Result<PutOutcome> {
        validate_id("assistant", assistant_id)?;
        let mut bundle = match from_export {
            Some(stream) => Some(read_bundle(stream).await?),
            None => None,
        };
        loop {
            let (record, fresh_gate) = {
                let mut assistants = self.assistants.write().await;
                match assistants.get(assistant_id) {
                    Some(record) => (Arc::clone(record), None),
                    None => {
                        let record = Arc::new(AssistantRecord::new(AssistantContext::new(
                            self.service_id.as_str(),
                            assistant_id,
                            name,
                        )));
                        // 新记录在可见之前先锁住闸门
                        let gate = Arc::clone(&record.gate).lock_owned().await;
                        assistants.insert(assistant_id.to_string(), Arc::clone(&record));
                        (record, Some(gate))
                    }
                }
            };

            if let Some(gate) = fresh_gate {
                let context = record.state.read().await.context.clone();
                tracing::info!(assistant_id, "assistant created");
                if let Some(bundle) = &bundle {
                    if let Err(e) = self.seed_config(&context, bundle).await {
                        self.discard_assistant(assistant_id, &record).await;
                        return Err(e);
                    }
                }
                self.router
                    .dispatch_assistant(EventTag::AssistantCreated, &context)
                    .await?;
                drop(gate);

                if let Some(bundle) = bundle.take() {
                    self.import_conversations(assistant_id, bundle).await?;
                }
                return Ok(PutOutcome::Created);
            }

            let _gate = record.gate.lock().await;
            let context = {
                let mut state = record.state.write().await;
                if state.deleted {
                    // 拿到闸门时删除已完成，重新查找
                    continue;
                }
                if bundle.is_some() {
                    return Err(AssistantError::conflict(format!(
                        "assistant {assistant_id} already exists, import needs a new assistant"
                    ))
                    .into());
                }
                state.context.name = name.to_string();
                state.context.clone()
            };
            self.router
                .dispatch_assistant(EventTag::AssistantUpdated, &context)
                .await?;
            return Ok(PutOutcome::Updated);
        }
    }

    /// 导出包中的配置经由 provider 的 `set` 写入，按 schema 校验，打码的密钥不会被带入
    async fn seed_config(&self, assistant: &AssistantContext, bundle: &AssistantBundle) -> anyhow::Result<()> {
        match (&self.config, &bundle.config) {
            (Some(provider), Some(config)) => {
                provider.set(assistant, config.clone()).await?;
            }
            (None, Some(_)) => {
                tracing::warn!(assistant_id = %assistant.id, "exported config ignored, service has no configuration");
            }
            (_, None) => {}
        }
        Ok(())
    }

    async fn import_conversations(&self, assistant_id: &str, bundle: AssistantBundle) -> anyhow::Result<()> {
        let total = bundle.conversations.len();
        for conversation in bundle.conversations {
            let stream = byte_stream(conversation.data, EXPORT_CHUNK_SIZE);
            let imported = self
                .put_conversation(assistant_id, &conversation.id, &conversation.title, Some(stream))
                .await;
            if let Err(e) = imported {
                tracing::warn!(assistant_id, conversation_id = %conversation.id, error = %e, "assistant import failed");
                if let Err(cleanup) = self.delete_assistant(assistant_id).await {
                    tracing::error!(assistant_id, error = %cleanup, "failed to remove partially imported assistant");
                }
                return Err(e);
            }
        }
        tracing::info!(assistant_id, conversations = total, "assistant imported");
        Ok(())
    }

    /// 撤销新建的助手；调用方持有其闸门
    async fn discard_assistant(&self, assistant_id: &str, record: &Arc<AssistantRecord>) {
        let assistant = {
            let mut state = record.state.write().await;
            state.deleted = true;
            state.context.clone()
        };
        if let Some(provider) = &self.config {
            if let Err(e) = provider.reset(&assistant).await {
                tracing::warn!(assistant_id, error = %e, "failed to reset config of discarded assistant");
            }
        }
        self.unregister(assistant_id, record).await;
    }

    /// 只移除仍指向 record 的表项，同 ID 的新记录不受影响
    async fn unregister(&self, assistant_id: &str, record: &Arc<AssistantRecord>) {
        let mut assistants = self.assistants.write().await;
        if assistants
            .get(assistant_id)
            .is_some_and(|current| Arc::ptr_eq(current, record))
        {
            assistants.remove(assistant_id);
        }
    }

    /// 删除助手及其全部会话状态并重置配置；不存在时也返回 Ok
    pub async fn delete_assistant(&self, assistant_id: &str) -> anyhow::Result<()> {
        let Some(record) = self.assistants.read().await.get(assistant_id).cloned() else {
            return Ok(());
        };
        let _gate = record.gate.lock().await;
        let assistant = {
            let state = record.state.read().await;
            if state.deleted {
                return Ok(());
            }
            state.context.clone()
        };

        let conversations: Vec<(String, Arc<ConversationRecord>)> = record
            .conversations
            .read()
            .await
            .iter()
            .map(|(id, conversation)| (id.clone(), Arc::clone(conversation)))
            .collect();
        for (conversation_id, conversation) in &conversations {
            self.retire_conversation(conversation_id, &assistant, conversation)
                .await?;
        }
        if let Some(provider) = &self.config {
            provider.reset(&assistant).await?;
        }

        record.state.write().await.deleted = true;
        self.unregister(assistant_id, &record).await;
        tracing::info!(assistant_id, conversations = conversations.len(), "assistant deleted");
        Ok(())
    }

    /// 导出助手：打码后的配置 + 全部活跃会话的导出数据。
    /// 导出期间持有助手闸门，会话逐个在各自闸门内导出。
    pub async fn export_assistant(&self, assistant_id: &str) -> anyhow::Result<ByteStream> {
        let record = self.assistant_record(assistant_id).await?;
        let _gate = record.gate.lock().await;
        let assistant = live_context(assistant_id, &record).await?;

        let config = match &self.config {
            Some(provider) => Some(provider.get(&assistant).await?.config),
            None => None,
        };
        let mut conversations: Vec<(String, Arc<ConversationRecord>)> = record
            .conversations
            .read()
            .await
            .iter()
            .map(|(id, conversation)| (id.clone(), Arc::clone(conversation)))
            .collect();
        conversations.sort_by(|a, b| a.0.cmp(&b.0));

        let mut bundled = Vec::with_capacity(conversations.len());
        for (conversation_id, conversation) in conversations {
            let _conversation_gate = conversation.gate.lock().await;
            let title = {
                let state = conversation.state.read().await;
                if state.phase != ConversationPhase::Active {
                    continue;
                }
                state.title.clone()
            };
            let context = self.conversation_context(&conversation_id, &title, assistant.clone(), &conversation);
            let data = read_byte_stream(self.exporter.export(&context).await?).await?;
            bundled.push(BundledConversation {
                id: conversation_id,
                title,
                data,
            });
        }

        let bytes = bundle::encode(&AssistantBundle {
            config,
            conversations: bundled,
        })
        .map_err(StorageError::into_anyhow)?;
        tracing::info!(assistant_id, bytes = bytes.len(), "assistant exported");
        Ok(byte_stream(bytes, EXPORT_CHUNK_SIZE))
    }

    /// 创建或更新会话；from_export 存在时先导入状态再执行生命周期处理器。
    /// 已删除的会话 ID 返回 Conflict。
    pub async fn put_conversation(
        &self,
        assistant_id: &str,
        conversation_id: &str,
        title: &str,
        from_export: Option<ByteStream>,
    ) -> anyhow::Result<PutOutcome> {
        validate_id("conversation", conversation_id)?;
        let record = self.assistant_record(assistant_id).await?;
        // 存活检查与插入都在助手闸门内：删除助手时拿到的会话表一定包含已插入的会话
        let (assistant, conversation, fresh_gate) = {
            let _assistant_gate = record.gate.lock().await;
            let assistant = live_context(assistant_id, &record).await?;
            let mut conversations = record.conversations.write().await;
            match conversations.get(conversation_id) {
                Some(conversation) => (assistant, Arc::clone(conversation), None),
                None => {
                    let conversation = Arc::new(ConversationRecord::new(title, self.event_log_capacity));
                    let gate = Arc::clone(&conversation.gate).lock_owned().await;
                    conversations.insert(conversation_id.to_string(), Arc::clone(&conversation));
                    (assistant, conversation, Some(gate))
                }
            }
        };
        let _gate = match fresh_gate {
            Some(gate) => gate,
            None => Arc::clone(&conversation.gate).lock_owned().await,
        };

        let phase = {
            let mut state = conversation.state.write().await;
            if state.phase == ConversationPhase::Deleted {
                return Err(
                    AssistantError::conflict(format!("conversation {conversation_id} was deleted")).into(),
                );
            }
            state.title = title.to_string();
            state.phase
        };
        let context = self.conversation_context(conversation_id, title, assistant, &conversation);

        if let Some(stream) = from_export {
            self.exporter.import(&context, stream).await?;
        }

        if phase == ConversationPhase::Unborn {
            conversation.state.write().await.phase = ConversationPhase::Active;
            tracing::info!(assistant_id, conversation_id, "conversation created");
            self.router
                .dispatch_conversation(EventTag::ConversationCreated, &context)
                .await?;
            Ok(PutOutcome::Created)
        } else {
            self.router
                .dispatch_conversation(EventTag::ConversationUpdated, &context)
                .await?;
            Ok(PutOutcome::Updated)
        }
    }

    /// 删除会话状态并留下墓碑；会话不存在时也返回 Ok
    pub async fn delete_conversation(&self, assistant_id: &str, conversation_id: &str) -> anyhow::Result<()> {
        let record = self.assistant_record(assistant_id).await?;
        let assistant = live_context(assistant_id, &record).await?;
        let Some(conversation) = record.conversations.read().await.get(conversation_id).cloned() else {
            return Ok(());
        };
        self.retire_conversation(conversation_id, &assistant, &conversation)
            .await
    }

    async fn retire_conversation(
        &self,
        conversation_id: &str,
        assistant: &AssistantContext,
        conversation: &ConversationRecord,
    ) -> anyhow::Result<()> {
        let _gate = conversation.gate.lock().await;
        let title = {
            let state = conversation.state.read().await;
            if state.phase == ConversationPhase::Deleted {
                return Ok(());
            }
            state.title.clone()
        };
        let context = self.conversation_context(conversation_id, &title, assistant.clone(), conversation);
        self.store
            .purge(&context)
            .await
            .map_err(StorageError::into_anyhow)?;
        conversation.state.write().await.phase = ConversationPhase::Deleted;
        conversation.events.clear().await;
        tracing::info!(assistant_id = %assistant.id, conversation_id, "conversation deleted");
        Ok(())
    }

    /// 受理会话事件：记入事件日志，message_created 先经内容安全评估，
    /// 未被拦截时依次执行粗粒度与特定处理器
    pub async fn post_conversation_event(
        &self,
        assistant_id: &str,
        event: ConversationEvent,
    ) -> anyhow::Result<EventAccepted> {
        let record = self.assistant_record(assistant_id).await?;
        let assistant = live_context(assistant_id, &record).await?;
        let conversation_id = event.conversation_id.clone();
        let conversation = record
            .conversations
            .read()
            .await
            .get(&conversation_id)
            .cloned()
            .ok_or_else(|| AssistantError::not_found(format!("conversation {conversation_id}")))?;

        let _gate = conversation.gate.lock().await;
        let title = {
            let state = conversation.state.read().await;
            match state.phase {
                ConversationPhase::Unborn => {
                    return Err(AssistantError::not_found(format!("conversation {conversation_id}")).into())
                }
                ConversationPhase::Deleted => {
                    return Err(
                        AssistantError::conflict(format!("conversation {conversation_id} was deleted")).into(),
                    )
                }
                ConversationPhase::Active => state.title.clone(),
            }
        };
        let message = event.message()?;
        conversation.events.append(event.clone()).await;
        let context = self.conversation_context(&conversation_id, &title, assistant, &conversation);

        let content_safety = match (&self.content_safety, message) {
            (Some(evaluator), Some(message)) if event.event == ConversationEventType::MessageCreated => {
                Some(evaluator.evaluate(message.content.into()).await)
            }
            _ => None,
        };
        let blocked = matches!(&content_safety, Some(evaluation) if evaluation.result == ContentSafetyResult::Fail);
        if blocked {
            tracing::warn!(
                assistant_id,
                conversation_id = %conversation_id,
                event_id = %event.id,
                "message blocked by content safety"
            );
            return Ok(EventAccepted {
                content_safety,
                handled: false,
            });
        }

        self.router.dispatch_event(&context, &event).await?;
        Ok(EventAccepted {
            content_safety,
            handled: true,
        })
    }

    pub async fn get_config(&self, assistant_id: &str) -> anyhow::Result<ConfigResponse> {
        let record = self.assistant_record(assistant_id).await?;
        let assistant = live_context(assistant_id, &record).await?;
        match &self.config {
            Some(provider) => provider.get(&assistant).await,
            None => Ok(empty_config()),
        }
    }

    /// 校验失败返回 Validation（400），已保存的配置保持不变
    pub async fn put_config(&self, assistant_id: &str, config: Value) -> anyhow::Result<ConfigResponse> {
        let record = self.assistant_record(assistant_id).await?;
        let assistant = live_context(assistant_id, &record).await?;
        match &self.config {
            Some(provider) => provider.set(&assistant, config).await,
            None => Err(AssistantError::bad_request("this assistant service has no configuration").into()),
        }
    }

    pub async fn list_inspectors(
        &self,
        assistant_id: &str,
        conversation_id: &str,
    ) -> anyhow::Result<Vec<InspectorDescription>> {
        self.active_conversation(assistant_id, conversation_id).await?;
        Ok(self.inspectors.list())
    }

    pub async fn get_inspector_state(
        &self,
        assistant_id: &str,
        conversation_id: &str,
        inspector_id: &str,
    ) -> anyhow::Result<InspectorStateResponse> {
        let context = self.active_conversation(assistant_id, conversation_id).await?;
        self.inspectors.get_state(inspector_id, &context).await
    }

    /// 导出会话持久状态
    pub async fn export_conversation(&self, assistant_id: &str, conversation_id: &str) -> anyhow::Result<ByteStream> {
        let context = self.active_conversation(assistant_id, conversation_id).await?;
        self.exporter.export(&context).await
    }

    async fn assistant_record(&self, assistant_id: &str) -> Result<Arc<AssistantRecord>, AssistantError> {
        self.assistants
            .read()
            .await
            .get(assistant_id)
            .cloned()
            .ok_or_else(|| AssistantError::not_found(format!("assistant {assistant_id}")))
    }

    /// 已创建且未删除的会话上下文；不加会话闸门
    async fn active_conversation(
        &self,
        assistant_id: &str,
        conversation_id: &str,
    ) -> Result<ConversationContext, AssistantError> {
        let record = self.assistant_record(assistant_id).await?;
        let assistant = live_context(assistant_id, &record).await?;
        let conversation = record
            .conversations
            .read()
            .await
            .get(conversation_id)
            .cloned()
            .ok_or_else(|| AssistantError::not_found(format!("conversation {conversation_id}")))?;
        let title = {
            let state = conversation.state.read().await;
            if state.phase != ConversationPhase::Active {
                return Err(AssistantError::not_found(format!("conversation {conversation_id}")));
            }
            state.title.clone()
        };
        Ok(self.conversation_context(conversation_id, &title, assistant, &conversation))
    }

    fn conversation_context(
        &self,
        conversation_id: &str,
        title: &str,
        assistant: AssistantContext,
        conversation: &ConversationRecord,
    ) -> ConversationContext {
        ConversationContext::new(
            conversation_id,
            title,
            assistant,
            conversation.events.clone(),
            Arc::clone(&self.store),
        )
    }
}

async fn read_bundle(stream: ByteStream) -> anyhow::Result<AssistantBundle> {
    let bytes = read_byte_stream(stream).await?;
    let bundle = bundle::decode(&bytes).map_err(StorageError::into_anyhow)?;
    for conversation in &bundle.conversations {
        validate_id("conversation", &conversation.id)?;
    }
    Ok(bundle)
}

async fn live_context(assistant_id: &str, record: &AssistantRecord) -> Result<AssistantContext, AssistantError> {
    let state = record.state.read().await;
    if state.deleted {
        return Err(AssistantError::not_found(format!("assistant {assistant_id}")));
    }
    Ok(state.context.clone())
}
