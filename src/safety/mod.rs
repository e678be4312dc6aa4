//! 内容安全评估
//!
//! - **severity**: 基于分类严重度阈值的评估器（分块、并发、聚合）
//! - **azure**: Azure Content Safety 风格的 HTTP 严重度分析后端与配置模型

pub mod azure;
mod severity;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use azure::{
    AzureContentSafetyAnalyzer, AzureContentSafetyAuthConfig, AzureContentSafetyServiceConfig, Credential,
};
pub use severity::{
    aggregate, chunk_text, classify, AnalyzerError, CategorySeverity, SeverityAnalysis, SeverityAnalyzer,
    SeverityEvaluator, SeverityEvaluatorConfig, SeverityLevel,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentSafetyResult {
    Pass,
    Warn,
    Fail,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentSafetyEvaluation {
    pub result: ContentSafetyResult,
    #[serde(default)]
    pub note: Option<String>,
    #[serde(default)]
    pub metadata: Value,
}

impl ContentSafetyEvaluation {
    pub fn pass() -> Self {
        Self {
            result: ContentSafetyResult::Pass,
            note: None,
            metadata: Value::Object(Default::default()),
        }
    }
}

/// 待评估内容：单段文本或有序文本列表（以换行拼接）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EvaluationContent {
    Text(String),
    Parts(Vec<String>),
}

impl EvaluationContent {
    pub fn into_text(self) -> String {
        match self {
            EvaluationContent::Text(text) => text,
            EvaluationContent::Parts(parts) => parts.join("\n"),
        }
    }
}

impl From<&str> for EvaluationContent {
    fn from(text: &str) -> Self {
        EvaluationContent::Text(text.to_string())
    }
}

impl From<String> for EvaluationContent {
    fn from(text: String) -> Self {
        EvaluationContent::Text(text)
    }
}

impl From<Vec<String>> for EvaluationContent {
    fn from(parts: Vec<String>) -> Self {
        EvaluationContent::Parts(parts)
    }
}

/// 内容安全评估器；后端故障应转为 Fail 结果，不向上抛错
#[async_trait]
pub trait ContentSafetyEvaluator: Send + Sync {
    async fn evaluate(&self, content: EvaluationContent) -> ContentSafetyEvaluation;
}
