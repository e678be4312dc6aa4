//! 助手服务宿主
//!
//! `AssistantApp` 在启动时收集处理器、配置 provider、导出器、检查器与内容安全评估器，
//! `into_service` 之后得到不可再注册的 `AssistantService`，由边界层驱动。

mod service;

use std::sync::Arc;

use crate::assistant_config::AssistantConfigProvider;
use crate::core::AssistantError;
use crate::events::{EventRouter, DEFAULT_EVENT_LOG_CAPACITY};
use crate::inspector::{EventLogInspector, InspectorRegistry, InspectorStateProvider, EVENT_LOG_INSPECTOR_ID};
use crate::safety::ContentSafetyEvaluator;
use crate::storage::{ConversationDataExporter, MemoryStateStore, StateStore, StateTreeExporter};

pub use service::{AssistantService, EventAccepted, PutOutcome, ServiceInfo};

/// 助手服务构建器
pub struct AssistantApp {
    service_id: String,
    name: String,
    description: String,
    events: EventRouter,
    config_provider: Option<Arc<dyn AssistantConfigProvider>>,
    data_exporter: Option<Arc<dyn ConversationDataExporter>>,
    inspectors: InspectorRegistry,
    content_safety: Option<Arc<dyn ContentSafetyEvaluator>>,
    state_store: Option<Arc<dyn StateStore>>,
    event_log_capacity: usize,
}

impl AssistantApp {
    pub fn new(service_id: impl Into<String>, name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            service_id: service_id.into(),
            name: name.into(),
            description: description.into(),
            events: EventRouter::new(),
            config_provider: None,
            data_exporter: None,
            inspectors: InspectorRegistry::new(),
            content_safety: None,
            state_store: None,
            event_log_capacity: DEFAULT_EVENT_LOG_CAPACITY,
        }
    }

    /// 注册事件处理器
    pub fn events(&mut self) -> &mut EventRouter {
        &mut self.events
    }

    pub fn with_config_provider<P: AssistantConfigProvider + 'static>(mut self, provider: Arc<P>) -> Self {
        let provider: Arc<dyn AssistantConfigProvider> = provider;
        self.config_provider = Some(provider);
        self
    }

    /// 自定义导出器；未设置时使用基于状态存储的 `StateTreeExporter`
    pub fn with_data_exporter<E: ConversationDataExporter + 'static>(mut self, exporter: Arc<E>) -> Self {
        let exporter: Arc<dyn ConversationDataExporter> = exporter;
        self.data_exporter = Some(exporter);
        self
    }

    /// 会话持久状态的存储后端；未设置时使用内存存储
    pub fn with_state_store(mut self, store: Arc<dyn StateStore>) -> Self {
        self.state_store = Some(store);
        self
    }

    /// 注册检查器，重复 id 返回 Conflict
    pub fn with_inspector(
        mut self,
        id: impl Into<String>,
        provider: impl InspectorStateProvider + 'static,
    ) -> Result<Self, AssistantError> {
        self.inspectors.register(id, provider)?;
        Ok(self)
    }

    /// 注册内置的事件日志检查器
    pub fn with_event_log_inspector(self) -> Result<Self, AssistantError> {
        self.with_inspector(EVENT_LOG_INSPECTOR_ID, EventLogInspector::default())
    }

    /// message_created 事件在派发前先经过内容安全评估
    pub fn with_content_safety(mut self, evaluator: Arc<dyn ContentSafetyEvaluator>) -> Self {
        self.content_safety = Some(evaluator);
        self
    }

    pub fn with_event_log_capacity(mut self, capacity: usize) -> Self {
        self.event_log_capacity = capacity;
        self
    }

    pub fn into_service(self) -> AssistantService {
        let store: Arc<dyn StateStore> = match self.state_store {
            Some(store) => store,
            None => Arc::new(MemoryStateStore::new()),
        };
        let exporter: Arc<dyn ConversationDataExporter> = match self.data_exporter {
            Some(exporter) => exporter,
            None => Arc::new(StateTreeExporter::new(Arc::clone(&store))),
        };
        tracing::info!(
            service_id = %self.service_id,
            inspectors = self.inspectors.len(),
            content_safety = self.content_safety.is_some(),
            "assistant service ready"
        );
        AssistantService::new(service::ServiceParts {
            service_id: self.service_id,
            name: self.name,
            description: self.description,
            router: self.events,
            config: self.config_provider,
            exporter,
            inspectors: self.inspectors,
            content_safety: self.content_safety,
            store,
            event_log_capacity: self.event_log_capacity,
        })
    }
}
