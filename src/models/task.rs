use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

/// 单个任务
///
/// `payload` 是调用方提供的原始输入，提示词构建和规则函数直接读取其中的字段：
/// - `system_prompt_kwargs` / `user_prompt_kwargs`：提示词模板变量
/// - `answer` / `query` / `GT`：评判模式使用
/// - `meta_info`：任意附加信息
///
/// 提交后只读，在并发任务之间以 `Arc<Task>` 共享。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// 提交顺序（从 0 开始）
    pub index: usize,
    pub payload: Map<String, JsonValue>,
}

impl Task {
    pub fn new(index: usize, payload: Map<String, JsonValue>) -> Self {
        Self { index, payload }
    }

    /// 按提交顺序为一组输入编号
    pub fn from_payloads(payloads: impl IntoIterator<Item = Map<String, JsonValue>>) -> Vec<Task> {
        payloads
            .into_iter()
            .enumerate()
            .map(|(index, payload)| Task::new(index, payload))
            .collect()
    }

    /// 读取字符串字段，非字符串视为不存在
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(JsonValue::as_str)
    }

    /// 读取提示词变量，缺失或类型不对时返回空表
    pub fn prompt_kwargs(&self, key: &str) -> Map<String, JsonValue> {
        self.payload
            .get(key)
            .and_then(JsonValue::as_object)
            .cloned()
            .unwrap_or_default()
    }

    pub fn system_prompt_kwargs(&self) -> Map<String, JsonValue> {
        self.prompt_kwargs("system_prompt_kwargs")
    }

    pub fn user_prompt_kwargs(&self) -> Map<String, JsonValue> {
        self.prompt_kwargs("user_prompt_kwargs")
    }

    pub fn meta_info(&self) -> Option<&JsonValue> {
        self.payload.get("meta_info")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(value: JsonValue) -> Map<String, JsonValue> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_from_payloads_assigns_indexes() {
        let tasks = Task::from_payloads(vec![payload(json!({"a": 1})), payload(json!({"b": 2}))]);
        assert_eq!(tasks[0].index, 0);
        assert_eq!(tasks[1].index, 1);
    }

    #[test]
    fn test_prompt_kwargs_missing_or_wrong_type() {
        let task = Task::new(0, payload(json!({"user_prompt_kwargs": "oops"})));
        assert!(task.user_prompt_kwargs().is_empty());
        assert!(task.system_prompt_kwargs().is_empty());
    }

    #[test]
    fn test_get_str() {
        let task = Task::new(0, payload(json!({"answer": "yes", "query": 3})));
        assert_eq!(task.get_str("answer"), Some("yes"));
        assert_eq!(task.get_str("query"), None);
    }
}
