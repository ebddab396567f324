//! 标签提取 - 业务能力层
//!
//! 从模型回复中提取 `<tag ...>...</tag>` 包裹的内容。这一层永远不向外抛错：
//! 未命中或内部失败都退化为空列表 / `null`。

use regex::Regex;
use serde_json::Value as JsonValue;
use tracing::{error, warn};

use crate::models::ModelJudgement;

/// 评判结果中的数值标签
const SCORE_TAGS: [&str; 5] = ["accuracy", "relevance", "clarity", "completeness", "overall"];

/// 提取文本中所有 `<tag>...</tag>` 的内容（大小写不敏感，支持属性和多行）
///
/// ```
/// use llm_pipeline::services::extraction::extract_all;
/// assert_eq!(extract_all("draft", "<draft>hello</draft>"), vec!["hello"]);
/// assert!(extract_all("draft", "no tags here").is_empty());
/// ```
pub fn extract_all(tag: &str, text: &str) -> Vec<String> {
    let tag = regex::escape(&tag.trim().to_lowercase());
    if tag.is_empty() {
        return Vec::new();
    }

    let pattern = format!(r"(?is)<{tag}\b[^>]*>\s*(.*?)\s*</{tag}>");
    let re = match Regex::new(&pattern) {
        Ok(re) => re,
        Err(e) => {
            error!("标签 <{}> 的正则构建失败: {}", tag, e);
            return Vec::new();
        }
    };

    re.captures_iter(text)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
        .collect()
}

/// 提取结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Extracted {
    /// 列表模式：全部匹配
    List(Vec<String>),
    /// 单值模式：第一个匹配
    Single(Option<String>),
}

impl Extracted {
    pub fn into_json(self) -> JsonValue {
        match self {
            Extracted::List(items) => JsonValue::from(items),
            Extracted::Single(Some(item)) => JsonValue::String(item),
            Extracted::Single(None) => JsonValue::Null,
        }
    }
}

/// 按模式提取：列表模式未命中返回 `[]`，单值模式未命中返回 `None`
///
/// `text` 为 `None`（模型超时）时按未命中处理。
pub fn extract(tag: &str, text: Option<&str>, to_list: bool) -> Extracted {
    let matches = match text {
        Some(text) => extract_all(tag, text),
        None => Vec::new(),
    };

    if matches.is_empty() {
        warn!("回复中没有找到 <{}>", tag);
        return if to_list {
            Extracted::List(Vec::new())
        } else {
            Extracted::Single(None)
        };
    }

    if to_list {
        Extracted::List(matches)
    } else {
        Extracted::Single(matches.into_iter().next())
    }
}

/// 从评判回复中解析五个分数和评语
///
/// 同一标签出现多次时取最后一次；缺失为 `None`；
/// 非整数的分数只影响对应字段。
pub fn extract_judgement(response: Option<&str>) -> ModelJudgement {
    let Some(text) = response else {
        warn!("评判回复为空，所有字段记为 null");
        return ModelJudgement::default();
    };

    let [accuracy, relevance, clarity, completeness, overall] = SCORE_TAGS.map(|tag| last_score(tag, text));

    ModelJudgement {
        accuracy,
        relevance,
        clarity,
        completeness,
        overall,
        comment: extract_all("comment", text).pop(),
    }
}

fn last_score(tag: &str, text: &str) -> Option<i64> {
    let raw = extract_all(tag, text).pop()?;
    match raw.parse::<i64>() {
        Ok(score) => Some(score),
        Err(e) => {
            error!("<{}> 的值 '{}' 不是整数: {}", tag, raw, e);
            None
        }
    }
}

/// 回复后处理策略
///
/// 编排层对每个任务的模型回复调用一次；返回错误会让该任务记为失败。
/// 任何 `Fn(Option<&str>) -> anyhow::Result<JsonValue>` 闭包都可以直接使用。
pub trait ResponseExtractor: Send + Sync {
    fn extract(&self, response: Option<&str>) -> anyhow::Result<JsonValue>;
}

impl<F> ResponseExtractor for F
where
    F: Fn(Option<&str>) -> anyhow::Result<JsonValue> + Send + Sync,
{
    fn extract(&self, response: Option<&str>) -> anyhow::Result<JsonValue> {
        self(response)
    }
}

/// 按标签提取，对应生成模式的 `extracted` 字段
#[derive(Debug, Clone)]
pub struct TagExtractor {
    tag: String,
    to_list: bool,
}

impl TagExtractor {
    pub fn new(tag: impl Into<String>, to_list: bool) -> Self {
        Self {
            tag: tag.into(),
            to_list,
        }
    }
}

impl ResponseExtractor for TagExtractor {
    fn extract(&self, response: Option<&str>) -> anyhow::Result<JsonValue> {
        Ok(extract(&self.tag, response, self.to_list).into_json())
    }
}

/// 解析评判分数，对应评判模式的 `model_based_judgement` 字段
#[derive(Debug, Clone, Copy, Default)]
pub struct JudgementExtractor;

impl ResponseExtractor for JudgementExtractor {
    fn extract(&self, response: Option<&str>) -> anyhow::Result<JsonValue> {
        Ok(serde_json::to_value(extract_judgement(response))?)
    }
}
