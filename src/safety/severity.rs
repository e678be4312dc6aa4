//! 严重度阈值评估器
//!
//! 内容按字符切成不超过 `max_request_length` 的连续分块，每块一个 tokio 任务交给分析后端，
//! join_all 后按原始顺序聚合：第一个 Fail 决定结果；否则取最后一个 Warn；否则 Pass。

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::join_all;
use schemars::gen::SchemaGenerator;
use schemars::schema::{InstanceType, Schema, SchemaObject};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use thiserror::Error;

use super::{ContentSafetyEvaluation, ContentSafetyEvaluator, ContentSafetyResult, EvaluationContent};
use crate::assistant_config::ConfigModel;

/// 分类严重度（0 / 2 / 4 / 6）
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum SeverityLevel {
    Safe = 0,
    Low = 2,
    Medium = 4,
    High = 6,
}

impl TryFrom<u8> for SeverityLevel {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(SeverityLevel::Safe),
            2 => Ok(SeverityLevel::Low),
            4 => Ok(SeverityLevel::Medium),
            6 => Ok(SeverityLevel::High),
            other => Err(format!("severity must be one of 0, 2, 4, 6 (got {other})")),
        }
    }
}

impl From<SeverityLevel> for u8 {
    fn from(level: SeverityLevel) -> Self {
        level as u8
    }
}

impl JsonSchema for SeverityLevel {
    fn schema_name() -> String {
        "SeverityLevel".to_string()
    }

    fn json_schema(_gen: &mut SchemaGenerator) -> Schema {
        SchemaObject {
            instance_type: Some(InstanceType::Integer.into()),
            enum_values: Some(vec![json!(0), json!(2), json!(4), json!(6)]),
            ..Default::default()
        }
        .into()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct SeverityEvaluatorConfig {
    /// 达到该严重度时警告
    #[schemars(title = "Warn at Severity")]
    pub warn_at_severity: SeverityLevel,
    /// 达到该严重度时判定失败
    #[schemars(title = "Fail at Severity")]
    pub fail_at_severity: SeverityLevel,
    /// 单次请求的最大字符数，超出时分块发送
    #[schemars(title = "Maximum Request Length", range(min = 1))]
    pub max_request_length: usize,
}

impl Default for SeverityEvaluatorConfig {
    fn default() -> Self {
        Self {
            warn_at_severity: SeverityLevel::Low,
            fail_at_severity: SeverityLevel::Medium,
            max_request_length: 10_000,
        }
    }
}

impl ConfigModel for SeverityEvaluatorConfig {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategorySeverity {
    pub category: String,
    #[serde(default)]
    pub severity: Option<u8>,
}

/// 后端对单个分块的分析结果
#[derive(Debug, Clone, PartialEq)]
pub struct SeverityAnalysis {
    pub categories: Vec<CategorySeverity>,
    /// 原始响应，合并进分块 metadata
    pub raw: Value,
}

#[derive(Debug, Error)]
pub enum AnalyzerError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("credentials unavailable: {0}")]
    Credentials(String),

    #[error("{0}")]
    Backend(String),
}

/// 严重度分析后端
#[async_trait]
pub trait SeverityAnalyzer: Send + Sync {
    async fn analyze(&self, text: &str) -> Result<SeverityAnalysis, AnalyzerError>;
}

/// 按字符切分；max_len 至少为 1，空内容也是一个分块
pub fn chunk_text(text: &str, max_len: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    if chars.is_empty() {
        return vec![String::new()];
    }
    chars
        .chunks(max_len.max(1))
        .map(|chunk| chunk.iter().collect())
        .collect()
}

/// 单个分块的判定：类别按顺序扫描，第一个达到失败阈值的立即返回，警告取最后一个
pub fn classify(categories: &[CategorySeverity], config: &SeverityEvaluatorConfig) -> (ContentSafetyResult, Option<String>) {
    let fail_at = u8::from(config.fail_at_severity);
    let warn_at = u8::from(config.warn_at_severity);
    let mut result = ContentSafetyResult::Pass;
    let mut note = None;
    for analysis in categories {
        let Some(severity) = analysis.severity else {
            continue;
        };
        if severity >= fail_at {
            return (
                ContentSafetyResult::Fail,
                Some(format!("Content safety category '{}' failed.", analysis.category)),
            );
        }
        if severity >= warn_at {
            result = ContentSafetyResult::Warn;
            note = Some(format!("Content safety category '{}' warned.", analysis.category));
        }
    }
    (result, note)
}

/// 聚合各分块结果；metadata 中保留全部分块
pub fn aggregate(batches: Vec<ContentSafetyEvaluation>, content_length: usize, max_request_length: usize) -> ContentSafetyEvaluation {
    let mut result = ContentSafetyResult::Pass;
    let mut note = None;
    for batch in &batches {
        match batch.result {
            ContentSafetyResult::Fail => {
                result = ContentSafetyResult::Fail;
                note = batch.note.clone();
                break;
            }
            ContentSafetyResult::Warn => {
                result = ContentSafetyResult::Warn;
                note = batch.note.clone();
            }
            ContentSafetyResult::Pass => {}
        }
    }
    let batches: Vec<Value> = batches.into_iter().map(|b| b.metadata).collect();
    ContentSafetyEvaluation {
        result,
        note,
        metadata: json!({
            "content_length": content_length,
            "max_request_length": max_request_length,
            "batches": batches,
        }),
    }
}

fn failed_batch(note: String, content_length: usize) -> ContentSafetyEvaluation {
    ContentSafetyEvaluation {
        result: ContentSafetyResult::Fail,
        note: Some(note),
        metadata: json!({ "content_length": content_length }),
    }
}

async fn evaluate_chunk(
    analyzer: &dyn SeverityAnalyzer,
    config: &SeverityEvaluatorConfig,
    text: &str,
) -> ContentSafetyEvaluation {
    let content_length = text.chars().count();
    match analyzer.analyze(text).await {
        Ok(analysis) => {
            let (result, note) = classify(&analysis.categories, config);
            let mut metadata = match analysis.raw {
                Value::Object(map) => map,
                _ => Map::new(),
            };
            metadata.insert("content_length".to_string(), json!(content_length));
            ContentSafetyEvaluation {
                result,
                note,
                metadata: Value::Object(metadata),
            }
        }
        Err(e) => {
            tracing::warn!(error = %e, content_length, "content safety backend failed");
            failed_batch(format!("Content safety service error: {e}"), content_length)
        }
    }
}

pub struct SeverityEvaluator {
    analyzer: Arc<dyn SeverityAnalyzer>,
    config: SeverityEvaluatorConfig,
}

impl SeverityEvaluator {
    pub fn new(analyzer: Arc<dyn SeverityAnalyzer>, config: SeverityEvaluatorConfig) -> Self {
        Self { analyzer, config }
    }

    pub fn config(&self) -> &SeverityEvaluatorConfig {
        &self.config
    }
}

#[async_trait]
impl ContentSafetyEvaluator for SeverityEvaluator {
    async fn evaluate(&self, content: EvaluationContent) -> ContentSafetyEvaluation {
        let text = content.into_text();
        let content_length = text.chars().count();
        let chunks = chunk_text(&text, self.config.max_request_length);
        let lengths: Vec<usize> = chunks.iter().map(|c| c.chars().count()).collect();

        let tasks: Vec<_> = chunks
            .into_iter()
            .map(|chunk| {
                let analyzer = Arc::clone(&self.analyzer);
                let config = self.config.clone();
                tokio::spawn(async move { evaluate_chunk(analyzer.as_ref(), &config, &chunk).await })
            })
            .collect();

        let batches: Vec<ContentSafetyEvaluation> = join_all(tasks)
            .await
            .into_iter()
            .zip(lengths)
            .map(|(joined, length)| match joined {
                Ok(evaluation) => evaluation,
                Err(e) => failed_batch(format!("Content safety service error: {e}"), length),
            })
            .collect();

        let evaluation = aggregate(batches, content_length, self.config.max_request_length);
        tracing::debug!(result = ?evaluation.result, content_length, "content safety evaluated");
        evaluation
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    /// 按分块文本查表返回严重度；"ERR" 模拟后端故障
    struct ScriptedAnalyzer {
        script: HashMap<String, Vec<(&'static str, Option<u8>)>>,
    }

    impl ScriptedAnalyzer {
        fn new(entries: &[(&str, Vec<(&'static str, Option<u8>)>)]) -> Arc<Self> {
            Arc::new(Self {
                script: entries
                    .iter()
                    .map(|(text, categories)| (text.to_string(), categories.clone()))
                    .collect(),
            })
        }
    }

    #[async_trait]
    impl SeverityAnalyzer for ScriptedAnalyzer {
        async fn analyze(&self, text: &str) -> Result<SeverityAnalysis, AnalyzerError> {
            if text == "ERR" {
                return Err(AnalyzerError::Backend("service unavailable".into()));
            }
            let categories = self
                .script
                .get(text)
                .cloned()
                .unwrap_or_default()
                .into_iter()
                .map(|(category, severity)| CategorySeverity {
                    category: category.to_string(),
                    severity,
                })
                .collect();
            Ok(SeverityAnalysis {
                categories,
                raw: json!({"analyzed": true}),
            })
        }
    }

    fn config(max_request_length: usize) -> SeverityEvaluatorConfig {
        SeverityEvaluatorConfig {
            max_request_length,
            ..Default::default()
        }
    }

    #[test]
    fn test_chunk_count_and_lengths() {
        for (len, max) in [(0, 5), (1, 5), (5, 5), (6, 5), (11, 5), (3, 0), (10_001, 10_000)] {
            let text = "é".repeat(len);
            let chunks = chunk_text(&text, max);
            let expected = if len == 0 { 1 } else { len.div_ceil(max.max(1)) };
            assert_eq!(chunks.len(), expected, "len={len} max={max}");
            let total: usize = chunks.iter().map(|c| c.chars().count()).sum();
            assert_eq!(total, len);
            assert_eq!(chunks.concat(), text);
        }
    }

    #[test]
    fn test_classify_first_fail_and_last_warn() {
        let cfg = SeverityEvaluatorConfig::default();
        let categories = |entries: &[(&str, Option<u8>)]| -> Vec<CategorySeverity> {
            entries
                .iter()
                .map(|(c, s)| CategorySeverity {
                    category: c.to_string(),
                    severity: *s,
                })
                .collect()
        };

        let (result, note) = classify(&categories(&[("Hate", Some(2)), ("Violence", None), ("SelfHarm", Some(2))]), &cfg);
        assert_eq!(result, ContentSafetyResult::Warn);
        assert_eq!(note.as_deref(), Some("Content safety category 'SelfHarm' warned."));

        let (result, note) = classify(&categories(&[("Sexual", Some(4)), ("Hate", Some(6))]), &cfg);
        assert_eq!(result, ContentSafetyResult::Fail);
        assert_eq!(note.as_deref(), Some("Content safety category 'Sexual' failed."));

        let (result, note) = classify(&categories(&[("Hate", Some(0))]), &cfg);
        assert_eq!((result, note), (ContentSafetyResult::Pass, None));
    }

    #[tokio::test]
    async fn test_second_chunk_failure_fails_whole_content() {
        let analyzer = ScriptedAnalyzer::new(&[("hello", vec![]), ("world", vec![("Hate", Some(6))])]);
        let evaluator = SeverityEvaluator::new(analyzer, config(5));
        let evaluation = evaluator.evaluate("helloworld".into()).await;

        assert_eq!(evaluation.result, ContentSafetyResult::Fail);
        assert_eq!(evaluation.note.as_deref(), Some("Content safety category 'Hate' failed."));
        assert_eq!(evaluation.metadata["content_length"], 10);
        assert_eq!(evaluation.metadata["max_request_length"], 5);
        let batches = evaluation.metadata["batches"].as_array().unwrap();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[1]["content_length"], 5);
        assert_eq!(batches[1]["analyzed"], true);
    }

    #[tokio::test]
    async fn test_first_failing_chunk_wins() {
        let analyzer = ScriptedAnalyzer::new(&[
            ("aa", vec![("Hate", Some(2))]),
            ("bb", vec![("Violence", Some(4))]),
            ("cc", vec![("Sexual", Some(6))]),
        ]);
        let evaluator = SeverityEvaluator::new(analyzer, config(2));
        let evaluation = evaluator
            .evaluate(EvaluationContent::Text("aabbcc".into()))
            .await;
        assert_eq!(evaluation.result, ContentSafetyResult::Fail);
        assert_eq!(evaluation.note.as_deref(), Some("Content safety category 'Violence' failed."));
        assert_eq!(evaluation.metadata["batches"].as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_last_warning_chunk_wins() {
        let analyzer = ScriptedAnalyzer::new(&[
            ("a\n", vec![("Hate", Some(2))]),
            ("b\n", vec![]),
            ("c", vec![("SelfHarm", Some(2))]),
        ]);
        let evaluator = SeverityEvaluator::new(analyzer, config(2));
        let evaluation = evaluator
            .evaluate(vec!["a".to_string(), "b".to_string(), "c".to_string()].into())
            .await;
        assert_eq!(evaluation.result, ContentSafetyResult::Warn);
        assert_eq!(evaluation.note.as_deref(), Some("Content safety category 'SelfHarm' warned."));
        let total: u64 = evaluation.metadata["batches"]
            .as_array()
            .unwrap()
            .iter()
            .map(|b| b["content_length"].as_u64().unwrap())
            .sum();
        assert_eq!(total, 5);
    }

    #[tokio::test]
    async fn test_backend_error_becomes_fail() {
        let evaluator = SeverityEvaluator::new(ScriptedAnalyzer::new(&[]), config(100));
        let evaluation = evaluator.evaluate("ERR".into()).await;
        assert_eq!(evaluation.result, ContentSafetyResult::Fail);
        assert_eq!(
            evaluation.note.as_deref(),
            Some("Content safety service error: service unavailable")
        );
    }

    #[tokio::test]
    async fn test_empty_content_is_single_batch() {
        let evaluator = SeverityEvaluator::new(ScriptedAnalyzer::new(&[]), config(100));
        let evaluation = evaluator.evaluate("".into()).await;
        assert_eq!(evaluation.result, ContentSafetyResult::Pass);
        assert_eq!(evaluation.metadata["batches"].as_array().unwrap().len(), 1);
        assert_eq!(evaluation.metadata["content_length"], 0);
    }

    #[test]
    fn test_severity_level_wire_format() {
        let cfg: SeverityEvaluatorConfig = serde_json::from_value(json!({"fail_at_severity": 6})).unwrap();
        assert_eq!(cfg.fail_at_severity, SeverityLevel::High);
        assert_eq!(cfg.warn_at_severity, SeverityLevel::Low);
        assert_eq!(cfg.max_request_length, 10_000);
        assert!(serde_json::from_value::<SeverityEvaluatorConfig>(json!({"warn_at_severity": 3})).is_err());
        assert_eq!(serde_json::to_value(SeverityLevel::Medium).unwrap(), 4);
    }
}
