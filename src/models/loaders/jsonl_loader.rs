use crate::error::{AppError, AppResult, FileError};
use crate::models::task::Task;
use serde_json::{Map, Value as JsonValue};
use std::path::Path;
use tokio::fs;

/// 从 JSONL 文件加载任务列表
///
/// 每行一个 JSON 对象，空行跳过；任何一行解析失败都会终止加载。
pub async fn load_tasks_from_jsonl(path: &Path) -> AppResult<Vec<Task>> {
    if !path.exists() {
        return Err(FileError::NotFound {
            path: path.display().to_string(),
        }
        .into());
    }

    let content = fs::read_to_string(path)
        .await
        .map_err(|e| AppError::file_read_failed(path.display().to_string(), e))?;

    let payloads = parse_jsonl(&content, &path.display().to_string())?;
    tracing::info!("成功加载 {} 个任务: {}", payloads.len(), path.display());

    Ok(Task::from_payloads(payloads))
}

/// 解析 JSONL 文本，`source_name` 仅用于错误信息
pub fn parse_jsonl(content: &str, source_name: &str) -> AppResult<Vec<Map<String, JsonValue>>> {
    let mut payloads = Vec::new();

    for (line_no, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let payload: Map<String, JsonValue> =
            serde_json::from_str(line).map_err(|source| FileError::JsonParseFailed {
                path: source_name.to_string(),
                line: line_no + 1,
                source,
            })?;
        payloads.push(payload);
    }

    Ok(payloads)
}
