//! 配置 provider：按助手实例保存 (config, config_secrets)，对外读时打码
//!
//! `set` 的顺序：还原掩码 → 按 schema 校验 → 反序列化 → 持久化 → 更新缓存。
//! 任何一步失败都不会改动已保存的配置。同一助手的写操作经由各自的互斥槽串行化。

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use schemars::schema::RootSchema;
use schemars::{schema_for, JsonSchema};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::fs;
use tokio::sync::{Mutex, RwLock};

use super::schema;
use crate::core::{validate_id, AssistantContext, AssistantError, FieldError};
use crate::storage::FileStateStore;

const CONFIG_FILE: &str = "config.json";

/// 可作为配置分区的模型
pub trait ConfigModel:
    Serialize + DeserializeOwned + JsonSchema + Default + Clone + Send + Sync + 'static
{
    /// 该分区的自定义 UI schema，会叠加到推导结果上
    fn ui_schema() -> Value {
        Value::Object(Default::default())
    }
}

/// 对外的配置形态：公开配置 + 密钥配置
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CombinedConfig<C, S> {
    pub config: C,
    pub config_secrets: S,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigResponse {
    /// 已打码的配置
    pub config: Value,
    pub json_schema: Value,
    pub ui_schema: Value,
}

#[async_trait]
pub trait AssistantConfigProvider: Send + Sync {
    async fn get(&self, assistant: &AssistantContext) -> anyhow::Result<ConfigResponse>;

    /// 校验失败返回 [`AssistantError::Validation`]，已保存的配置不变
    async fn set(&self, assistant: &AssistantContext, config: Value) -> anyhow::Result<ConfigResponse>;

    /// 恢复默认值（助手被删除时调用）
    async fn reset(&self, assistant: &AssistantContext) -> anyhow::Result<()>;

    /// 默认配置（已打码），用于服务描述
    fn default_config(&self) -> anyhow::Result<ConfigResponse>;
}

type Slot<C, S> = Arc<Mutex<Option<CombinedConfig<C, S>>>>;

/// 基于 serde 模型的配置 provider
pub struct ModelConfigProvider<C: ConfigModel, S: ConfigModel> {
    defaults: CombinedConfig<C, S>,
    schema: RootSchema,
    json_schema: Value,
    ui_schema: Value,
    /// None 时只保存在内存
    storage_root: Option<PathBuf>,
    slots: RwLock<HashMap<String, Slot<C, S>>>,
}

impl<C: ConfigModel, S: ConfigModel> Default for ModelConfigProvider<C, S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: ConfigModel, S: ConfigModel> ModelConfigProvider<C, S> {
    pub fn new() -> Self {
        Self::with_defaults(C::default(), S::default())
    }

    pub fn with_defaults(config: C, config_secrets: S) -> Self {
        let mut schema = schema_for!(CombinedConfig<C, S>);
        schema.schema.metadata().title = Some("CombinedConfig".to_string());
        let json_schema = serde_json::to_value(&schema).unwrap_or_default();
        let ui_schema = schema::ui_schema(
            &schema,
            &[("config", C::ui_schema()), ("config_secrets", S::ui_schema())],
        );
        Self {
            defaults: CombinedConfig {
                config,
                config_secrets,
            },
            schema,
            json_schema,
            ui_schema,
            storage_root: None,
            slots: RwLock::new(HashMap::new()),
        }
    }

    /// 持久化到 `<root>/assistants/<assistant_id>/config.json`
    pub fn with_storage_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.storage_root = Some(root.into());
        self
    }

    /// 处理器读取配置的入口（明文）
    pub async fn get_typed(&self, assistant: &AssistantContext) -> anyhow::Result<CombinedConfig<C, S>> {
        let slot = self.slot(&assistant.id).await;
        let mut cached = slot.lock().await;
        self.load_current(&assistant.id, &mut cached).await
    }

    async fn slot(&self, assistant_id: &str) -> Slot<C, S> {
        if let Some(slot) = self.slots.read().await.get(assistant_id) {
            return Arc::clone(slot);
        }
        let mut slots = self.slots.write().await;
        Arc::clone(slots.entry(assistant_id.to_string()).or_default())
    }

    /// 除表本身与调用方外没有其他持有者时移除槽位；仍有等待者的槽位保留，写操作继续串行
    async fn release_slot(&self, assistant_id: &str, slot: Slot<C, S>) {
        let mut slots = self.slots.write().await;
        let idle = slots
            .get(assistant_id)
            .is_some_and(|current| Arc::ptr_eq(current, &slot) && Arc::strong_count(&slot) == 2);
        if idle {
            slots.remove(assistant_id);
        }
    }

    fn config_path(&self, assistant_id: &str) -> Result<Option<PathBuf>, AssistantError> {
        validate_id("assistant", assistant_id)?;
        Ok(self
            .storage_root
            .as_deref()
            .map(|root| FileStateStore::assistant_dir(root, assistant_id).join(CONFIG_FILE)))
    }

    async fn load_current(
        &self,
        assistant_id: &str,
        cached: &mut Option<CombinedConfig<C, S>>,
    ) -> anyhow::Result<CombinedConfig<C, S>> {
        if let Some(current) = cached.as_ref() {
            return Ok(current.clone());
        }
        let loaded = match self.config_path(assistant_id)? {
            Some(path) => read_persisted(&path).await?,
            None => None,
        };
        let current = loaded.unwrap_or_else(|| self.defaults.clone());
        *cached = Some(current.clone());
        Ok(current)
    }

    fn response(&self, current: &CombinedConfig<C, S>) -> anyhow::Result<ConfigResponse> {
        let mut config = serde_json::to_value(current)?;
        schema::redact(&self.schema, &mut config);
        Ok(ConfigResponse {
            config,
            json_schema: self.json_schema.clone(),
            ui_schema: self.ui_schema.clone(),
        })
    }
}

async fn read_persisted<T: DeserializeOwned>(path: &Path) -> anyhow::Result<Option<T>> {
    match fs::read(path).await {
        Ok(bytes) => {
            let value = serde_json::from_slice(&bytes)
                .with_context(|| format!("failed to parse stored config {}", path.display()))?;
            Ok(Some(value))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e).with_context(|| format!("failed to read stored config {}", path.display())),
    }
}

/// 先写临时文件再 rename，读者不会看到半截内容
async fn persist<T: Serialize>(path: &Path, value: &T) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    let bytes = serde_json::to_vec_pretty(value)?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, bytes).await?;
    fs::rename(&tmp, path)
        .await
        .with_context(|| format!("failed to store config {}", path.display()))?;
    Ok(())
}

#[async_trait]
impl<C: ConfigModel, S: ConfigModel> AssistantConfigProvider for ModelConfigProvider<C, S> {
    async fn get(&self, assistant: &AssistantContext) -> anyhow::Result<ConfigResponse> {
        let current = self.get_typed(assistant).await?;
        self.response(&current)
    }

    async fn set(&self, assistant: &AssistantContext, config: Value) -> anyhow::Result<ConfigResponse> {
        let slot = self.slot(&assistant.id).await;
        let mut cached = slot.lock().await;
        let current = self.load_current(&assistant.id, &mut cached).await?;
        let stored = serde_json::to_value(&current)?;

        let mut incoming = config;
        let Some(sections) = incoming.as_object_mut() else {
            return Err(AssistantError::Validation(vec![FieldError::new("$", "expected object")]).into());
        };
        if !sections.contains_key("config_secrets") {
            if let Some(secrets) = stored.get("config_secrets") {
                sections.insert("config_secrets".to_string(), secrets.clone());
            }
        }
        schema::restore_secrets(&self.schema, &mut incoming, Some(&stored));

        let errors = schema::validate(&self.schema, &incoming);
        if !errors.is_empty() {
            tracing::info!(assistant_id = %assistant.id, errors = errors.len(), "config rejected");
            return Err(AssistantError::Validation(errors).into());
        }
        let updated: CombinedConfig<C, S> = serde_json::from_value(incoming)
            .map_err(|e| AssistantError::Validation(vec![FieldError::new("$", e.to_string())]))?;

        if let Some(path) = self.config_path(&assistant.id)? {
            persist(&path, &updated).await?;
        }
        let response = self.response(&updated)?;
        *cached = Some(updated);
        tracing::info!(assistant_id = %assistant.id, "assistant config updated");
        Ok(response)
    }

    async fn reset(&self, assistant: &AssistantContext) -> anyhow::Result<()> {
        let slot = self.slot(&assistant.id).await;
        {
            let mut cached = slot.lock().await;
            if let Some(path) = self.config_path(&assistant.id)? {
                match fs::remove_file(&path).await {
                    Ok(()) => {}
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => return Err(e).context("failed to remove stored config"),
                }
            }
            *cached = None;
        }
        self.release_slot(&assistant.id, slot).await;
        Ok(())
    }

    fn default_config(&self) -> anyhow::Result<ConfigResponse> {
        self.response(&self.defaults)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assistant_config::{ConfigSecret, SECRET_MASK};
    use serde_json::json;
    use tempfile::TempDir;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
    #[serde(default)]
    struct TestConfig {
        test_key: String,
    }

    impl Default for TestConfig {
        fn default() -> Self {
            Self {
                test_key: "test_value".to_string(),
            }
        }
    }

    impl ConfigModel for TestConfig {}

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
    #[serde(default)]
    struct TestSecrets {
        secret_field: ConfigSecret,
    }

    impl ConfigModel for TestSecrets {}

    type Provider = ModelConfigProvider<TestConfig, TestSecrets>;

    fn assistant() -> AssistantContext {
        AssistantContext::new("svc", "a1", "my assistant")
    }

    #[tokio::test]
    async fn test_get_defaults_and_schemas() {
        let provider = Provider::new();
        let response = provider.get(&assistant()).await.unwrap();
        assert_eq!(
            response.config,
            json!({"config": {"test_key": "test_value"}, "config_secrets": {"secret_field": ""}})
        );
        assert_eq!(
            response.ui_schema,
            json!({
                "config": {"ui:options": {"hide_title": true}},
                "config_secrets": {
                    "ui:options": {"hide_title": true},
                    "secret_field": {"ui:options": {"widget": "password"}}
                }
            })
        );
        let schema = &response.json_schema;
        assert_eq!(schema["title"], "CombinedConfig");
        assert_eq!(schema["required"], json!(["config", "config_secrets"]));
        assert_eq!(schema["definitions"]["ConfigSecret"]["format"], "password");
        assert_eq!(schema["definitions"]["ConfigSecret"]["writeOnly"], true);
    }

    #[tokio::test]
    async fn test_set_redacts_and_mask_keeps_plaintext() {
        let provider = Provider::new();
        let response = provider
            .set(
                &assistant(),
                json!({"config": {"test_key": "new_value"}, "config_secrets": {"secret_field": "new_secret"}}),
            )
            .await
            .unwrap();
        assert_eq!(
            response.config,
            json!({"config": {"test_key": "new_value"}, "config_secrets": {"secret_field": SECRET_MASK}})
        );
        assert_eq!(provider.get(&assistant()).await.unwrap().config, response.config);

        // 原样提交读到的配置（带掩码）不会覆盖明文
        provider.set(&assistant(), response.config.clone()).await.unwrap();
        let typed = provider.get_typed(&assistant()).await.unwrap();
        assert_eq!(typed.config_secrets.secret_field.expose(), "new_secret");

        // 缺少 config_secrets 分区也视为不变
        provider
            .set(&assistant(), json!({"config": {"test_key": "third"}}))
            .await
            .unwrap();
        let typed = provider.get_typed(&assistant()).await.unwrap();
        assert_eq!(typed.config.test_key, "third");
        assert_eq!(typed.config_secrets.secret_field.expose(), "new_secret");
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected_with_paths() {
        let provider = Provider::new();
        let err = provider
            .set(&assistant(), json!({"config": {"test_key": {"invalid_value": 1}}}))
            .await
            .unwrap_err();
        let err = err.downcast_ref::<AssistantError>().unwrap();
        assert_eq!(err.status_code(), 400);
        assert_eq!(err.field_errors()[0].path, "config.test_key");

        let typed = provider.get_typed(&assistant()).await.unwrap();
        assert_eq!(typed.config.test_key, "test_value");

        let err = provider.set(&assistant(), json!("nope")).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<AssistantError>(),
            Some(AssistantError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_config_persists_across_instances_and_resets() {
        let dir = TempDir::new().unwrap();
        let first = Provider::new().with_storage_root(dir.path());
        first
            .set(
                &assistant(),
                json!({"config": {"test_key": "stored"}, "config_secrets": {"secret_field": "s"}}),
            )
            .await
            .unwrap();
        assert!(dir.path().join("assistants/a1/config.json").exists());

        let second = Provider::new().with_storage_root(dir.path());
        let typed = second.get_typed(&assistant()).await.unwrap();
        assert_eq!(typed.config.test_key, "stored");
        assert_eq!(typed.config_secrets.secret_field.expose(), "s");

        second.reset(&assistant()).await.unwrap();
        assert!(!dir.path().join("assistants/a1/config.json").exists());
        assert_eq!(second.get_typed(&assistant()).await.unwrap(), CombinedConfig::default());
    }

    #[tokio::test]
    async fn test_reset_releases_the_slot() {
        let provider = Provider::new();
        provider
            .set(&assistant(), json!({"config": {"test_key": "x"}}))
            .await
            .unwrap();
        assert_eq!(provider.slots.read().await.len(), 1);

        provider.reset(&assistant()).await.unwrap();
        assert!(provider.slots.read().await.is_empty());
        assert_eq!(provider.get_typed(&assistant()).await.unwrap(), CombinedConfig::default());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_sets_on_one_assistant_are_serialized() {
        let dir = TempDir::new().unwrap();
        let provider = Arc::new(Provider::new().with_storage_root(dir.path()));
        let submissions = ["left", "right"];

        for _ in 0..20 {
            let tasks: Vec<_> = submissions
                .iter()
                .map(|value| {
                    let provider = Arc::clone(&provider);
                    let body = json!({"config": {"test_key": value}, "config_secrets": {"secret_field": value}});
                    tokio::spawn(async move { provider.set(&assistant(), body).await })
                })
                .collect();
            for task in tasks {
                task.await.unwrap().unwrap();
            }

            let cached = provider.get_typed(&assistant()).await.unwrap();
            assert!(submissions.contains(&cached.config.test_key.as_str()));
            // 公开配置与密钥来自同一次提交
            assert_eq!(cached.config_secrets.secret_field.expose(), cached.config.test_key);

            let persisted = Provider::new()
                .with_storage_root(dir.path())
                .get_typed(&assistant())
                .await
                .unwrap();
            assert_eq!(persisted, cached);
        }
    }

    #[tokio::test]
    async fn test_set_on_one_assistant_does_not_wait_for_another() {
        let provider = Provider::new();
        let busy = AssistantContext::new("svc", "busy", "busy assistant");
        let slot = provider.slot(&busy.id).await;
        let _held = slot.lock().await;

        let other = tokio::time::timeout(
            std::time::Duration::from_secs(1),
            provider.set(&assistant(), json!({"config": {"test_key": "free"}})),
        )
        .await
        .expect("set on another assistant blocked");
        assert_eq!(other.unwrap().config["config"]["test_key"], "free");

        let blocked = tokio::time::timeout(
            std::time::Duration::from_millis(50),
            provider.set(&busy, json!({"config": {"test_key": "later"}})),
        )
        .await;
        assert!(blocked.is_err());
    }

    #[tokio::test]
    async fn test_default_config_is_redacted() {
        let provider = Provider::with_defaults(
            TestConfig::default(),
            TestSecrets {
                secret_field: ConfigSecret::new("builtin"),
            },
        );
        let defaults = provider.default_config().unwrap();
        assert_eq!(defaults.config["config_secrets"]["secret_field"], SECRET_MASK);
    }
}
