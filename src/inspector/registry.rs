//! 检查器注册表：按注册顺序保存，列表结果稳定

use std::sync::Arc;

use super::{InspectorDescription, InspectorStateProvider, InspectorStateResponse};
use crate::core::{AssistantError, ConversationContext};

#[derive(Default, Clone)]
pub struct InspectorRegistry {
    providers: Vec<(String, Arc<dyn InspectorStateProvider>)>,
}

impl InspectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 重复的 id 返回 Conflict
    pub fn register(
        &mut self,
        id: impl Into<String>,
        provider: impl InspectorStateProvider + 'static,
    ) -> Result<(), AssistantError> {
        self.register_arc(id, Arc::new(provider))
    }

    pub fn register_arc(
        &mut self,
        id: impl Into<String>,
        provider: Arc<dyn InspectorStateProvider>,
    ) -> Result<(), AssistantError> {
        let id = id.into();
        if self.providers.iter().any(|(existing, _)| *existing == id) {
            return Err(AssistantError::conflict(format!("inspector {id} already registered")));
        }
        self.providers.push((id, provider));
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn InspectorStateProvider>> {
        self.providers
            .iter()
            .find(|(existing, _)| existing == id)
            .map(|(_, provider)| Arc::clone(provider))
    }

    pub fn list(&self) -> Vec<InspectorDescription> {
        self.providers
            .iter()
            .map(|(id, provider)| InspectorDescription {
                id: id.clone(),
                display_name: provider.display_name().to_string(),
                description: provider.description().to_string(),
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// 未知 id 返回 NotFound
    pub async fn get_state(
        &self,
        id: &str,
        conversation: &ConversationContext,
    ) -> anyhow::Result<InspectorStateResponse> {
        let provider = self
            .get(id)
            .ok_or_else(|| AssistantError::not_found(format!("inspector {id}")))?;
        let state = provider.get(conversation).await?;
        Ok(InspectorStateResponse {
            id: id.to_string(),
            data: state.data,
            json_schema: state.json_schema,
            ui_schema: state.ui_schema,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::AssistantContext;
    use crate::inspector::InspectorState;
    use async_trait::async_trait;
    use serde_json::json;

    struct TestInspector {
        name: &'static str,
    }

    #[async_trait]
    impl InspectorStateProvider for TestInspector {
        fn display_name(&self) -> &str {
            self.name
        }

        fn description(&self) -> &str {
            "Test inspector"
        }

        async fn get(&self, _conversation: &ConversationContext) -> anyhow::Result<InspectorState> {
            Ok(InspectorState {
                data: json!({"test": "data"}),
                json_schema: json!({}),
                ui_schema: json!({}),
            })
        }
    }

    fn conversation() -> ConversationContext {
        ConversationContext::detached("c1", "t", AssistantContext::new("svc", "a1", "n"))
    }

    #[tokio::test]
    async fn test_list_keeps_registration_order() {
        let mut registry = InspectorRegistry::new();
        registry.register("zeta", TestInspector { name: "Z" }).unwrap();
        registry.register("alpha", TestInspector { name: "A" }).unwrap();
        let ids: Vec<_> = registry.list().into_iter().map(|d| d.id).collect();
        assert_eq!(ids, vec!["zeta", "alpha"]);
        assert_eq!(registry.list(), registry.list());

        let err = registry.register("zeta", TestInspector { name: "dup" }).unwrap_err();
        assert_eq!(err.status_code(), 409);
        assert_eq!(registry.len(), 2);
    }

    #[tokio::test]
    async fn test_get_state() {
        let mut registry = InspectorRegistry::new();
        registry.register("test", TestInspector { name: "Test" }).unwrap();

        let state = registry.get_state("test", &conversation()).await.unwrap();
        assert_eq!(
            state,
            InspectorStateResponse {
                id: "test".into(),
                data: json!({"test": "data"}),
                json_schema: json!({}),
                ui_schema: json!({}),
            }
        );

        let err = registry.get_state("missing", &conversation()).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<AssistantError>(),
            Some(AssistantError::NotFound(_))
        ));
    }
}
