use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value as JsonValue};

use crate::config::PipelineKind;
use crate::models::task::Task;

/// 规则评判结果：规则名 -> 分数（失败为 null）
pub type RuleScores = BTreeMap<String, Option<Number>>;

/// 结果记录
///
/// 每个提交的任务恰好对应一条结果记录，写入结果日志的一行。
/// - 成功：带 `response`（生成）或 `model_response`（评判）
/// - 超时：回复字段存在但为 `null`
/// - 失败：没有回复字段，带 `error`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    pub index: usize,
    pub input: Map<String, JsonValue>,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "double_option")]
    pub response: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "double_option")]
    pub model_response: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extracted: Option<JsonValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_based_judgement: Option<JsonValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule_based_judgement: Option<RuleScores>,
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ResultRecord {
    /// 创建只包含输入的记录，回复字段由调用方填充
    pub fn new(task: &Task) -> Self {
        Self {
            index: task.index,
            input: task.payload.clone(),
            response: None,
            model_response: None,
            extracted: None,
            model_based_judgement: None,
            rule_based_judgement: None,
            timestamp: now_iso8601(),
            error: None,
        }
    }

    /// 按流水线类型写入模型回复（`None` 表示超时）
    pub fn with_reply(mut self, kind: PipelineKind, reply: Option<String>) -> Self {
        match kind {
            PipelineKind::Generation => self.response = Some(reply),
            PipelineKind::Judgement => self.model_response = Some(reply),
        }
        self
    }

    /// 失败记录：不带任何回复字段
    pub fn failure(task: &Task, message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Self::new(task)
        }
    }

    /// 模型回复，超时或失败时为 `None`
    pub fn reply(&self) -> Option<&str> {
        self.response
            .as_ref()
            .or(self.model_response.as_ref())
            .and_then(|r| r.as_deref())
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// 模型调用超时：回复字段存在但为 null
    pub fn is_timeout(&self) -> bool {
        matches!(self.response, Some(None)) || matches!(self.model_response, Some(None))
    }

    /// 序列化为一行 JSON（不转义非 ASCII 字符）
    pub fn to_json_line(&self) -> serde_json::Result<String> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }
}

/// 模型评判结果
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelJudgement {
    pub accuracy: Option<i64>,
    pub relevance: Option<i64>,
    pub clarity: Option<i64>,
    pub completeness: Option<i64>,
    pub overall: Option<i64>,
    pub comment: Option<String>,
}

fn now_iso8601() -> String {
    chrono::Local::now().to_rfc3339()
}

/// 区分"字段缺失"与"字段为 null"
mod double_option {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(value: &Option<Option<String>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(inner) => inner.serialize(serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Option<String>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Option::<String>::deserialize(deserializer).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn task() -> Task {
        Task::new(3, json!({"query": "你好"}).as_object().cloned().unwrap())
    }

    #[test]
    fn test_timeout_serializes_null_response() {
        let record = ResultRecord::new(&task()).with_reply(PipelineKind::Generation, None);
        let value: JsonValue = serde_json::from_str(&record.to_json_line().unwrap()).unwrap();
        assert!(value.get("response").unwrap().is_null());
        assert!(value.get("model_response").is_none());
        assert!(value.get("error").is_none());
        assert!(record.is_timeout());
    }

    #[test]
    fn test_failure_has_no_response_key() {
        let record = ResultRecord::failure(&task(), "LlmError: boom");
        let value: JsonValue = serde_json::from_str(&record.to_json_line().unwrap()).unwrap();
        assert!(value.get("response").is_none());
        assert_eq!(value["error"], "LlmError: boom");
        assert_eq!(value["index"], 3);
    }

    #[test]
    fn test_json_line_keeps_unicode() {
        let line = ResultRecord::new(&task()).to_json_line().unwrap();
        assert!(line.contains("你好"));
        assert!(line.ends_with('\n'));
        assert_eq!(line.matches('\n').count(), 1);
    }

    #[test]
    fn test_judgement_reply_field() {
        let record = ResultRecord::new(&task()).with_reply(PipelineKind::Judgement, Some("ok".into()));
        assert_eq!(record.reply(), Some("ok"));
        assert!(record.response.is_none());
    }
}
