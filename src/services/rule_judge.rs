//! 规则评判 - 业务能力层
//!
//! 固定统计 `answer` / `query` / `GT` 的 token 数，再逐个执行调用方提供的规则。
//! 单个规则失败只会让该规则记为 `null`。

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use serde_json::Number;
use tiktoken_rs::{cl100k_base, CoreBPE};
use tracing::{debug, error};

use crate::error::{AppResult, ConfigError};
use crate::models::{RuleScores, Task};

/// 固定统计的字段及结果键名
const TOKEN_COUNT_FIELDS: [(&str, &str); 3] = [
    ("answer", "answer-token-count"),
    ("query", "query-token-count"),
    ("GT", "GT-token-count"),
];

/// 自定义规则
///
/// 任何 `Fn(&Task) -> anyhow::Result<N>`（`N` 为整数或浮点数）的闭包都可以直接使用。
pub trait Rule: Send + Sync {
    fn evaluate(&self, task: &Task) -> anyhow::Result<Number>;
}

impl<F, N> Rule for F
where
    F: Fn(&Task) -> anyhow::Result<N> + Send + Sync,
    N: IntoScore,
{
    fn evaluate(&self, task: &Task) -> anyhow::Result<Number> {
        self(task)?.into_score()
    }
}

/// 规则分数类型，浮点数必须是有限值
pub trait IntoScore {
    fn into_score(self) -> anyhow::Result<Number>;
}

macro_rules! impl_integer_score {
    ($($ty:ty),*) => {
        $(
            impl IntoScore for $ty {
                fn into_score(self) -> anyhow::Result<Number> {
                    Ok(Number::from(self))
                }
            }
        )*
    };
}

impl_integer_score!(i8, i16, i32, i64, isize, u8, u16, u32, u64, usize);

impl IntoScore for f64 {
    fn into_score(self) -> anyhow::Result<Number> {
        Number::from_f64(self).ok_or_else(|| anyhow::anyhow!("分数不是有限数值: {}", self))
    }
}

impl IntoScore for f32 {
    fn into_score(self) -> anyhow::Result<Number> {
        f64::from(self).into_score()
    }
}

impl IntoScore for Number {
    fn into_score(self) -> anyhow::Result<Number> {
        Ok(self)
    }
}

/// 有序的规则集合
#[derive(Clone, Default)]
pub struct RuleSet {
    rules: Vec<(String, Arc<dyn Rule>)>,
}

impl RuleSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// 添加规则，同名规则后加入的覆盖先加入的结果
    pub fn with_rule(mut self, name: impl Into<String>, rule: impl Rule + 'static) -> Self {
        self.rules.push((name.into(), Arc::new(rule)));
        self
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &dyn Rule)> {
        self.rules.iter().map(|(name, rule)| (name.as_str(), rule.as_ref()))
    }
}

impl std::fmt::Debug for RuleSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.rules.iter().map(|(name, _)| name)).finish()
    }
}

/// 规则评判器，持有 token 编码器
pub struct RuleJudge {
    tokenizer: CoreBPE,
}

impl RuleJudge {
    /// 加载 `cl100k_base` 编码，失败属于启动错误
    pub fn new() -> AppResult<Self> {
        let tokenizer = cl100k_base().map_err(|source| ConfigError::TokenizerLoadFailed { source })?;
        Ok(Self { tokenizer })
    }

    /// 计算文本的 token 数量，空文本为 0
    pub fn count_tokens(&self, text: &str) -> usize {
        if text.is_empty() {
            return 0;
        }
        self.tokenizer.encode_ordinary(text).len()
    }

    /// 执行规则评判
    pub fn run_rules(&self, task: &Task, rules: &RuleSet) -> RuleScores {
        let mut scores = RuleScores::new();

        // 只统计存在且非空的字段
        for (field, key) in TOKEN_COUNT_FIELDS {
            if let Some(text) = task.get_str(field).filter(|t| !t.is_empty()) {
                scores.insert(key.to_string(), Some(Number::from(self.count_tokens(text))));
            }
        }

        for (name, rule) in rules.iter() {
            let outcome = catch_unwind(AssertUnwindSafe(|| rule.evaluate(task)));
            let score = match outcome {
                Ok(Ok(score)) => Some(score),
                Ok(Err(e)) => {
                    error!("规则 {} 执行失败 (任务 {}): {}", name, task.index + 1, e);
                    None
                }
                Err(_) => {
                    error!("规则 {} 执行时 panic (任务 {})", name, task.index + 1);
                    None
                }
            };
            scores.insert(name.to_string(), score);
        }

        debug!("任务 {} 规则评判结果: {:?}", task.index + 1, scores);
        scores
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn task(value: serde_json::Value) -> Task {
        Task::new(0, value.as_object().cloned().unwrap())
    }

    fn count_keyword(task: &Task) -> anyhow::Result<usize> {
        Ok(task.get_str("answer").unwrap_or_default().matches("工具").count())
    }

    #[test]
    fn test_count_tokens() {
        let judge = RuleJudge::new().unwrap();
        assert_eq!(judge.count_tokens(""), 0);
        assert_eq!(judge.count_tokens("hello world"), 2);
    }

    #[test]
    fn test_absent_fields_are_omitted() {
        let judge = RuleJudge::new().unwrap();
        let scores = judge.run_rules(&task(json!({"answer": "hello world", "GT": ""})), &RuleSet::new());
        assert_eq!(scores.get("answer-token-count"), Some(&Some(Number::from(2))));
        assert!(!scores.contains_key("query-token-count"));
        assert!(!scores.contains_key("GT-token-count"));
    }

    #[test]
    fn test_float_rules() {
        let judge = RuleJudge::new().unwrap();
        let rules = RuleSet::new()
            .with_rule("ratio", |task: &Task| -> anyhow::Result<f64> {
                let answer = task.get_str("answer").unwrap_or_default().chars().count() as f64;
                let query = task.get_str("query").unwrap_or_default().chars().count() as f64;
                Ok(answer / query)
            })
            .with_rule("nan", |_: &Task| -> anyhow::Result<f64> { Ok(f64::NAN) });

        let scores = judge.run_rules(&task(json!({"answer": "abc", "query": "abcd"})), &rules);

        assert_eq!(scores["ratio"], Number::from_f64(0.75).map(Some).unwrap());
        assert_eq!(scores["nan"], None);
    }

    #[test]
    fn test_failing_rule_is_isolated() {
        let judge = RuleJudge::new().unwrap();
        let rules = RuleSet::new()
            .with_rule("count-tools", count_keyword)
            .with_rule("broken", |_: &Task| -> anyhow::Result<i64> { anyhow::bail!("boom") })
            .with_rule("panicky", |_: &Task| -> anyhow::Result<i64> { panic!("bad rule") })
            .with_rule("constant", |_: &Task| -> anyhow::Result<i64> { Ok(7) });

        let scores = judge.run_rules(&task(json!({"answer": "用了工具和工具", "query": "q"})), &rules);

        assert_eq!(scores["count-tools"], Some(Number::from(2)));
        assert_eq!(scores["broken"], None);
        assert_eq!(scores["panicky"], None);
        assert_eq!(scores["constant"], Some(Number::from(7)));
        assert!(scores["answer-token-count"].is_some());
        assert!(scores["query-token-count"].is_some());
    }
}
