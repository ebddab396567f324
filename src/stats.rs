//! 结果统计
//!
//! 统计一次运行的结果记录（或读取结果日志），计算成功 / 失败数量、数值字段和取值分布。
//! 字段用点路径表示（如 `model_based_judgement.overall`）；
//! `response.length` 是特殊路径，表示回复的字符数。错误记录不参与字段统计。

use std::collections::BTreeMap;
use std::path::Path;

use serde::Serialize;
use serde_json::Value as JsonValue;
use tracing::{info, warn};

use crate::error::{AppError, AppResult, FileError};
use crate::models::loaders::parse_jsonl;
use crate::models::ResultRecord;

/// 回复长度的特殊路径
pub const RESPONSE_LENGTH: &str = "response.length";

/// 读取结果日志
pub async fn load_results(path: &Path) -> AppResult<Vec<JsonValue>> {
    if !path.exists() {
        return Err(AppError::File(FileError::NotFound {
            path: path.display().to_string(),
        }));
    }

    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| AppError::file_read_failed(path.display().to_string(), e))?;

    let rows = parse_jsonl(&content, &path.display().to_string())?;
    Ok(rows.into_iter().map(JsonValue::Object).collect())
}

/// 数值统计
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NumericStats {
    pub count: usize,
    pub total: f64,
    pub average: f64,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl NumericStats {
    pub fn from_values(values: &[f64]) -> Self {
        if values.is_empty() {
            return Self::default();
        }

        let total: f64 = values.iter().sum();
        Self {
            count: values.len(),
            total,
            average: total / values.len() as f64,
            min: values.iter().copied().reduce(f64::min),
            max: values.iter().copied().reduce(f64::max),
        }
    }
}

/// 结果统计
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ResultStats {
    pub total_count: usize,
    pub success_count: usize,
    pub error_count: usize,
    /// 回复为 null 的记录数（计入成功）
    pub timeout_count: usize,
    pub numeric_stats: BTreeMap<String, NumericStats>,
    pub distribution_stats: BTreeMap<String, BTreeMap<String, usize>>,
}

impl ResultStats {
    pub fn calculate(results: &[JsonValue], numeric_fields: &[&str], distribution_fields: &[&str]) -> Self {
        let mut stats = ResultStats {
            total_count: results.len(),
            ..Default::default()
        };

        for result in results {
            if is_error(result) {
                stats.error_count += 1;
            } else {
                stats.success_count += 1;
                if is_timeout(result) {
                    stats.timeout_count += 1;
                }
            }
        }

        for field in numeric_fields {
            let values: Vec<f64> = extract_field(results, field)
                .iter()
                .filter_map(JsonValue::as_f64)
                .collect();
            stats
                .numeric_stats
                .insert(field.to_string(), NumericStats::from_values(&values));
        }

        for field in distribution_fields {
            let mut distribution = BTreeMap::new();
            for value in extract_field(results, field) {
                let key = match value {
                    JsonValue::String(s) => s,
                    other => other.to_string(),
                };
                *distribution.entry(key).or_insert(0) += 1;
            }
            stats.distribution_stats.insert(field.to_string(), distribution);
        }

        stats
    }

    /// 统计本次运行返回的记录
    ///
    /// 结果日志以追加模式打开，可能包含之前运行的行；这里只统计传入的记录。
    pub fn from_records(records: &[ResultRecord], numeric_fields: &[&str], distribution_fields: &[&str]) -> Self {
        let results: Vec<JsonValue> = records
            .iter()
            .filter_map(|record| match serde_json::to_value(record) {
                Ok(value) => Some(value),
                Err(e) => {
                    warn!("记录 {} 无法转换为 JSON，跳过统计: {}", record.index, e);
                    None
                }
            })
            .collect();
        Self::calculate(&results, numeric_fields, distribution_fields)
    }

    /// 通过日志输出统计报告
    pub fn log_report(&self) {
        info!("{}", "=".repeat(60));
        info!("📈 结果统计");
        info!("{}", "=".repeat(60));
        info!("总数: {}", self.total_count);
        info!("成功: {} (超时 {})", self.success_count, self.timeout_count);
        info!("失败: {}", self.error_count);

        for (field, s) in &self.numeric_stats {
            match (s.min, s.max) {
                (Some(min), Some(max)) => info!(
                    "{}: 数量 {} | 合计 {} | 平均 {:.2} | 最小 {} | 最大 {}",
                    field, s.count, s.total, s.average, min, max
                ),
                _ => info!("{}: 无数据", field),
            }
        }

        for (field, distribution) in &self.distribution_stats {
            info!("{} 分布:", field);
            for (value, count) in distribution {
                info!("  {} → {}", value, count);
            }
        }
        info!("{}", "=".repeat(60));
    }
}

fn is_error(result: &JsonValue) -> bool {
    result.get("error").is_some()
}

fn is_timeout(result: &JsonValue) -> bool {
    ["response", "model_response"]
        .iter()
        .any(|key| result.get(key).is_some_and(JsonValue::is_null))
}

/// 按点路径提取字段值，跳过错误记录和缺失值
pub fn extract_field(results: &[JsonValue], field_path: &str) -> Vec<JsonValue> {
    results
        .iter()
        .filter(|r| !is_error(r))
        .filter_map(|result| {
            if field_path == RESPONSE_LENGTH {
                return result
                    .get("response")
                    .and_then(JsonValue::as_str)
                    .filter(|s| !s.is_empty())
                    .map(|s| JsonValue::from(s.chars().count()));
            }

            field_path
                .split('.')
                .try_fold(result, |current, part| current.get(part))
                .filter(|v| !v.is_null())
                .cloned()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Vec<JsonValue> {
        vec![
            json!({"index": 0, "response": "你好", "model_based_judgement": {"overall": 8}}),
            json!({"index": 1, "response": "hello", "model_based_judgement": {"overall": 6}}),
            json!({"index": 2, "response": null}),
            json!({"index": 3, "error": "LlmError: boom", "model_based_judgement": {"overall": 1}}),
        ]
    }

    #[test]
    fn test_counts() {
        let stats = ResultStats::calculate(&sample(), &[], &[]);
        assert_eq!(stats.total_count, 4);
        assert_eq!(stats.success_count, 3);
        assert_eq!(stats.error_count, 1);
        assert_eq!(stats.timeout_count, 1);
    }

    #[test]
    fn test_numeric_stats_skip_errors() {
        let stats = ResultStats::calculate(&sample(), &["model_based_judgement.overall", RESPONSE_LENGTH], &[]);

        let overall = &stats.numeric_stats["model_based_judgement.overall"];
        assert_eq!(overall.count, 2);
        assert_eq!(overall.total, 14.0);
        assert_eq!(overall.average, 7.0);
        assert_eq!(overall.min, Some(6.0));
        assert_eq!(overall.max, Some(8.0));

        let length = &stats.numeric_stats[RESPONSE_LENGTH];
        assert_eq!(length.count, 2);
        assert_eq!(length.total, 7.0);
    }

    #[test]
    fn test_empty_numeric_stats() {
        let stats = ResultStats::calculate(&sample(), &["missing.field"], &[]);
        assert_eq!(stats.numeric_stats["missing.field"], NumericStats::default());
    }

    #[test]
    fn test_distribution() {
        let stats = ResultStats::calculate(&sample(), &[], &["model_based_judgement.overall", "response"]);
        let overall = &stats.distribution_stats["model_based_judgement.overall"];
        assert_eq!(overall.get("8"), Some(&1));
        assert_eq!(overall.get("1"), None);
        assert_eq!(stats.distribution_stats["response"].get("hello"), Some(&1));
    }

    #[test]
    fn test_from_records_matches_log_lines() {
        use crate::config::PipelineKind;
        use crate::models::Task;

        let task = |i: usize| Task::new(i, json!({"query": i}).as_object().cloned().unwrap());
        let records = vec![
            ResultRecord::new(&task(0)).with_reply(PipelineKind::Generation, Some("你好".into())),
            ResultRecord::new(&task(1)).with_reply(PipelineKind::Generation, None),
            ResultRecord::failure(&task(2), "LlmError: boom"),
        ];

        let stats = ResultStats::from_records(&records, &[RESPONSE_LENGTH], &[]);
        assert_eq!(stats.total_count, 3);
        assert_eq!(stats.success_count, 2);
        assert_eq!(stats.timeout_count, 1);
        assert_eq!(stats.error_count, 1);
        assert_eq!(stats.numeric_stats[RESPONSE_LENGTH].total, 2.0);

        let lines: Vec<JsonValue> = records
            .iter()
            .map(|r| serde_json::from_str(&r.to_json_line().unwrap()).unwrap())
            .collect();
        assert_eq!(stats, ResultStats::calculate(&lines, &[RESPONSE_LENGTH], &[]));
    }

    #[tokio::test]
    async fn test_load_results() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("result.jsonl");
        tokio::fs::write(&path, "{\"index\":0,\"response\":\"OK\"}\n\n{\"index\":1,\"error\":\"x\"}\n")
            .await
            .unwrap();

        let results = load_results(&path).await.unwrap();
        assert_eq!(results.len(), 2);
        assert!(load_results(&dir.path().join("nope.jsonl")).await.is_err());
    }
}
