//! hive - 助手服务宿主
//!
//! 入口：初始化日志、加载配置、构建示例 echo 助手服务，
//! 然后从 stdin 逐行读取 JSON 请求，响应逐行写到 stdout（带回请求 id）。
//! 同一会话的请求按到达顺序处理；不同会话的响应之间不保证顺序。

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;

use hive::app::{AssistantApp, AssistantService};
use hive::assistant_config::{ConfigModel, ConfigSecret, ModelConfigProvider};
use hive::boundary::{HostResponse, RequestLanes};
use hive::config::{load_config, HostConfig};
use hive::core::ConversationContext;
use hive::events::{ConversationEvent, ConversationEventType, MessageType};
use hive::safety::AzureContentSafetyAnalyzer;
use hive::storage::{FileStateStore, MemoryStateStore, StateStore};

const NOTES_FILE: &str = "notes/replies.txt";

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
struct EchoConfig {
    /// 回显内容的前缀
    #[schemars(title = "Reply prefix")]
    prefix: String,
    /// 是否把回显记录到会话状态
    #[schemars(title = "Keep notes")]
    keep_notes: bool,
}

impl Default for EchoConfig {
    fn default() -> Self {
        Self {
            prefix: "echo: ".to_string(),
            keep_notes: true,
        }
    }
}

impl ConfigModel for EchoConfig {
    fn ui_schema() -> Value {
        json!({ "prefix": { "ui:placeholder": "echo: " } })
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
struct EchoSecrets {
    #[schemars(title = "Webhook token")]
    webhook_token: ConfigSecret,
}

impl ConfigModel for EchoSecrets {}

type EchoConfigProvider = ModelConfigProvider<EchoConfig, EchoSecrets>;

async fn echo(
    provider: Arc<EchoConfigProvider>,
    conversation: ConversationContext,
    event: ConversationEvent,
) -> anyhow::Result<()> {
    let Some(message) = event.message()? else {
        return Ok(());
    };
    let config = provider.get_typed(&conversation.assistant).await?.config;
    let reply = format!("{}{}", config.prefix, message.content);
    tracing::info!(conversation_id = %conversation.id, %reply, "echo");

    if config.keep_notes {
        let mut notes = conversation.read_state(NOTES_FILE).await?.unwrap_or_default();
        notes.extend_from_slice(reply.as_bytes());
        notes.push(b'\n');
        conversation.write_state(NOTES_FILE, notes).await?;
    }
    Ok(())
}

fn build_service(config: &HostConfig) -> anyhow::Result<AssistantService> {
    let mut provider = EchoConfigProvider::new();
    let store: Arc<dyn StateStore> = match &config.storage.root {
        Some(root) => {
            provider = provider.with_storage_root(root.clone());
            Arc::new(FileStateStore::new(root.clone()))
        }
        None => Arc::new(MemoryStateStore::new()),
    };
    let provider = Arc::new(provider);

    let mut app = AssistantApp::new(
        config.service.id.as_str(),
        config.service.name.as_str(),
        config.service.description.as_str(),
    )
    .with_config_provider(Arc::clone(&provider))
    .with_state_store(store)
    .with_event_log_capacity(config.events.log_capacity)
    .with_event_log_inspector()?;

    if config.content_safety.enabled {
        let thresholds = config
            .content_safety
            .evaluator_config()
            .map_err(anyhow::Error::msg)
            .context("Invalid content safety thresholds")?;
        let analyzer = AzureContentSafetyAnalyzer::new(&config.content_safety.service_config())
            .context("Failed to create content safety backend")?;
        app = app.with_content_safety(Arc::new(analyzer.into_evaluator(thresholds)));
    }

    app.events()
        .on_conversation_created(|conversation: ConversationContext| async move {
            tracing::info!(conversation_id = %conversation.id, title = %conversation.title, "echo conversation ready");
            anyhow::Ok(())
        })
        .on_message(
            ConversationEventType::MessageCreated,
            MessageType::Chat,
            move |conversation: ConversationContext, event: ConversationEvent| {
                echo(Arc::clone(&provider), conversation, event)
            },
        );

    Ok(app.into_service())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    hive::observability::init();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = load_config(config_path).context("Failed to load config")?;
    let service = Arc::new(build_service(&config)?);
    tracing::info!(service_id = %config.service.id, "reading requests from stdin");

    // 同一会话的请求按到达顺序处理，响应经由通道串行写出
    let (tx, mut rx) = mpsc::channel::<HostResponse>(64);
    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(response) = rx.recv().await {
            let line = match serde_json::to_string(&response) {
                Ok(line) => line,
                Err(e) => {
                    tracing::error!(error = %e, request_id = ?response.id, "failed to encode response");
                    continue;
                }
            };
            stdout.write_all(line.as_bytes()).await?;
            stdout.write_all(b"\n").await?;
            stdout.flush().await?;
        }
        anyhow::Ok(())
    });

    let mut lanes = RequestLanes::new(service, tx);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        lanes.submit_line(&line).await;
    }

    // 分道关闭后，已受理的请求全部回复完 writer 才结束
    drop(lanes);
    writer.await.context("Response writer panicked")??;
    Ok(())
}
