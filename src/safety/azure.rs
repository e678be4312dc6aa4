//! Azure Content Safety 文本分析后端
//!
//! `POST {endpoint}/contentsafety/text:analyze?api-version=2023-10-01`，
//! 认证方式由 `auth_method` 标签区分：身份令牌（Bearer）或订阅密钥。

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::severity::{AnalyzerError, CategorySeverity, SeverityAnalysis, SeverityAnalyzer};
use super::{SeverityEvaluator, SeverityEvaluatorConfig};
use crate::assistant_config::{ConfigModel, ConfigSecret};

const API_VERSION: &str = "2023-10-01";
const REQUEST_TIMEOUT_SECS: u64 = 30;
const SUBSCRIPTION_KEY_HEADER: &str = "Ocp-Apim-Subscription-Key";

/// 身份认证方式下读取访问令牌的环境变量
pub const ACCESS_TOKEN_ENV: &str = "AZURE_CONTENT_SAFETY_ACCESS_TOKEN";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "auth_method")]
pub enum AzureContentSafetyAuthConfig {
    #[default]
    #[serde(rename = "azure-identity")]
    #[schemars(title = "Azure identity based authentication")]
    AzureIdentity,

    #[serde(rename = "api-key")]
    #[schemars(title = "API key based authentication")]
    ApiKey {
        /// The Azure Content Safety service key for your resource instance.
        #[schemars(title = "Azure Content Safety Service Key")]
        azure_content_safety_service_key: ConfigSecret,
    },
}

/// 请求时使用的凭据
#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    SubscriptionKey(String),
    BearerToken(String),
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Credential::SubscriptionKey(_) => f.write_str("SubscriptionKey(..)"),
            Credential::BearerToken(_) => f.write_str("BearerToken(..)"),
        }
    }
}

impl AzureContentSafetyAuthConfig {
    /// 生成请求凭据；身份认证方式从环境变量读取令牌
    pub fn credential(&self) -> Result<Credential, AnalyzerError> {
        self.resolve_credential(std::env::var(ACCESS_TOKEN_ENV).ok())
    }

    fn resolve_credential(&self, identity_token: Option<String>) -> Result<Credential, AnalyzerError> {
        match self {
            AzureContentSafetyAuthConfig::AzureIdentity => identity_token
                .filter(|token| !token.is_empty())
                .map(Credential::BearerToken)
                .ok_or_else(|| AnalyzerError::Credentials(format!("{ACCESS_TOKEN_ENV} is not set"))),
            AzureContentSafetyAuthConfig::ApiKey {
                azure_content_safety_service_key,
            } => {
                if azure_content_safety_service_key.is_empty() {
                    Err(AnalyzerError::Credentials("service key is empty".to_string()))
                } else {
                    Ok(Credential::SubscriptionKey(
                        azure_content_safety_service_key.expose().to_string(),
                    ))
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct AzureContentSafetyServiceConfig {
    /// The authentication configuration to use for the Azure Content Safety service.
    #[schemars(title = "Authentication Config")]
    pub auth_config: AzureContentSafetyAuthConfig,
    /// The endpoint to use for the Azure Content Safety service.
    #[schemars(title = "Azure Content Safety Service Endpoint")]
    pub azure_content_safety_endpoint: String,
}

impl Default for AzureContentSafetyServiceConfig {
    fn default() -> Self {
        let endpoint = ["AZURE_CONTENT_SAFETY_ENDPOINT", "ASSISTANT__AZURE_CONTENT_SAFETY_ENDPOINT"]
            .iter()
            .find_map(|name| std::env::var(name).ok())
            .unwrap_or_default();
        Self {
            auth_config: AzureContentSafetyAuthConfig::default(),
            azure_content_safety_endpoint: endpoint,
        }
    }
}

impl ConfigModel for AzureContentSafetyServiceConfig {
    fn ui_schema() -> Value {
        json!({
            "auth_config": {
                "ui:options": { "hide_title": true, "widget": "radio" }
            }
        })
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnalyzeTextResponse {
    #[serde(default)]
    categories_analysis: Vec<CategorySeverity>,
}

/// 解析 text:analyze 响应
pub fn parse_analysis(raw: Value) -> Result<SeverityAnalysis, AnalyzerError> {
    let parsed: AnalyzeTextResponse =
        serde_json::from_value(raw.clone()).map_err(|e| AnalyzerError::InvalidResponse(e.to_string()))?;
    Ok(SeverityAnalysis {
        categories: parsed.categories_analysis,
        raw,
    })
}

pub struct AzureContentSafetyAnalyzer {
    client: Client,
    endpoint: String,
    credential: Credential,
}

impl AzureContentSafetyAnalyzer {
    pub fn new(service: &AzureContentSafetyServiceConfig) -> Result<Self, AnalyzerError> {
        let endpoint = service.azure_content_safety_endpoint.trim_end_matches('/').to_string();
        if endpoint.is_empty() {
            return Err(AnalyzerError::Credentials("endpoint is not configured".to_string()));
        }
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .unwrap_or_default();
        Ok(Self {
            client,
            endpoint,
            credential: service.auth_config.credential()?,
        })
    }

    /// 按阈值配置包装成评估器
    pub fn into_evaluator(self, config: SeverityEvaluatorConfig) -> SeverityEvaluator {
        SeverityEvaluator::new(std::sync::Arc::new(self), config)
    }

    fn analyze_url(&self) -> String {
        format!("{}/contentsafety/text:analyze?api-version={API_VERSION}", self.endpoint)
    }
}

#[async_trait]
impl SeverityAnalyzer for AzureContentSafetyAnalyzer {
    async fn analyze(&self, text: &str) -> Result<SeverityAnalysis, AnalyzerError> {
        let request = self.client.post(self.analyze_url()).json(&json!({ "text": text }));
        let request = match &self.credential {
            Credential::SubscriptionKey(key) => request.header(SUBSCRIPTION_KEY_HEADER, key),
            Credential::BearerToken(token) => request.bearer_auth(token),
        };
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AnalyzerError::Status {
                status: status.as_u16(),
                body,
            });
        }
        let raw: Value = response.json().await?;
        parse_analysis(raw)
    }
}
