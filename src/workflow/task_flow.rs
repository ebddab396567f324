//! 任务处理流程 - 流程层
//!
//! 核心职责：定义"一个任务"的完整处理流程
//!
//! 流程顺序：
//! 1. 构建系统 / 用户提示词
//! 2. 等待限速器放行 → 带超时调用模型
//! 3. 后处理（提取 / 模型评判 / 规则评判）
//! 4. 结果写入（成功、超时、失败都恰好写一条）

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value as JsonValue;
use tracing::{debug, error, warn};

use crate::clients::ModelClient;
use crate::config::{PipelineKind, PromptsConfig};
use crate::error::{AppError, AppResult, ExtractionError, TaskError};
use crate::models::{ResultRecord, Task};
use crate::services::{PromptLoader, RateLimiter, ResponseExtractor, ResultSink, RuleJudge, RuleSet};

/// 任务处理流程
///
/// - 决定何时构建提示词、何时调用模型、何时后处理
/// - 把任务内的任何错误收敛为一条错误记录
/// - 由编排层为每次批量运行创建一个，在所有任务间共享
pub struct TaskFlow {
    kind: PipelineKind,
    system_prompt_path: Option<PathBuf>,
    user_prompt_path: Option<PathBuf>,
    prompt_loader: PromptLoader,
    client: Arc<dyn ModelClient>,
    rate_limiter: Arc<RateLimiter>,
    timeout: Duration,
    extractor: Option<Arc<dyn ResponseExtractor>>,
    rule_judge: Option<Arc<RuleJudge>>,
    rules: RuleSet,
    sink: Arc<ResultSink>,
}

impl TaskFlow {
    /// 创建新的任务处理流程
    pub fn new(
        kind: PipelineKind,
        prompts: &PromptsConfig,
        client: Arc<dyn ModelClient>,
        rate_limiter: Arc<RateLimiter>,
        timeout: Duration,
        sink: Arc<ResultSink>,
    ) -> Self {
        Self {
            kind,
            system_prompt_path: prompts.system_prompt_path.clone(),
            user_prompt_path: prompts.user_prompt_path.clone(),
            prompt_loader: PromptLoader::new(),
            client,
            rate_limiter,
            timeout,
            extractor: None,
            rule_judge: None,
            rules: RuleSet::new(),
            sink,
        }
    }

    /// 设置回复后处理策略
    pub fn with_extractor(mut self, extractor: Option<Arc<dyn ResponseExtractor>>) -> Self {
        self.extractor = extractor;
        self
    }

    /// 设置规则评判（仅评判模式使用）
    pub fn with_rules(mut self, rule_judge: Option<Arc<RuleJudge>>, rules: RuleSet) -> Self {
        self.rule_judge = rule_judge;
        self.rules = rules;
        self
    }

    /// 执行单个任务并写入结果，永不失败
    pub async fn execute(&self, task: &Task) -> ResultRecord {
        let record = match self.run(task).await {
            Ok(record) => record,
            Err(e) => {
                error!("[任务 {}] ❌ 处理失败: {}", task.index + 1, e);
                ResultRecord::failure(task, e.to_record_message())
            }
        };

        // 写盘失败已在写入服务中记录，记录仍进入内存列表
        let _ = self.sink.save(record.clone()).await;
        record
    }

    async fn run(&self, task: &Task) -> AppResult<ResultRecord> {
        match self.kind {
            PipelineKind::Generation => self.generate(task).await,
            PipelineKind::Judgement => self.judge(task).await,
        }
    }

    /// 生成模式：`response` + `extracted`
    async fn generate(&self, task: &Task) -> AppResult<ResultRecord> {
        let reply = self.ask_model(task).await?;
        let extracted = self.post_process(reply.as_deref())?;

        let mut record = ResultRecord::new(task).with_reply(PipelineKind::Generation, reply);
        record.extracted = extracted;
        Ok(record)
    }

    /// 评判模式：可选的模型评判 + 必做的规则评判
    async fn judge(&self, task: &Task) -> AppResult<ResultRecord> {
        if task.get_str("answer").map_or(true, str::is_empty) {
            return Err(TaskError::MissingAnswer.into());
        }

        let mut record = ResultRecord::new(task);

        if self.system_prompt_path.is_some() && self.user_prompt_path.is_some() {
            let reply = self.ask_model(task).await?;
            let judgement = self.post_process(reply.as_deref())?;
            record = record.with_reply(PipelineKind::Judgement, reply);
            record.model_based_judgement = judgement;
        } else {
            warn!("[任务 {}] 未配置评判提示词，跳过模型评判", task.index + 1);
        }

        if let Some(rule_judge) = &self.rule_judge {
            record.rule_based_judgement = Some(rule_judge.run_rules(task, &self.rules));
        }

        Ok(record)
    }

    /// 构建提示词并调用模型，超时返回 `None`
    async fn ask_model(&self, task: &Task) -> AppResult<Option<String>> {
        let system_prompt = self
            .prompt_loader
            .load(self.system_prompt_path.as_deref(), &task.system_prompt_kwargs())
            .await;
        let user_prompt = self
            .prompt_loader
            .load(self.user_prompt_path.as_deref(), &task.user_prompt_kwargs())
            .await;

        self.rate_limiter.acquire().await;

        debug!("[任务 {}] 调用模型，提示词长度: {} 字符", task.index + 1, user_prompt.chars().count());

        let system_prompt = Some(system_prompt.as_str()).filter(|s| !s.is_empty());
        let reply = self
            .client
            .complete_within(&user_prompt, system_prompt, self.timeout)
            .await
            .map_err(AppError::llm_call_failed)?;

        if reply.is_none() {
            warn!("[任务 {}] ⏱ 模型调用超时 ({:?})", task.index + 1, self.timeout);
        }

        Ok(reply)
    }

    fn post_process(&self, reply: Option<&str>) -> AppResult<Option<JsonValue>> {
        let Some(extractor) = &self.extractor else {
            return Ok(None);
        };

        extractor
            .extract(reply)
            .map(Some)
            .map_err(|source| ExtractionError::Failed { source }.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::{JudgementExtractor, TagExtractor};
    use async_trait::async_trait;
    use serde_json::json;
    use tempfile::TempDir;

    struct EchoClient;

    #[async_trait]
    impl ModelClient for EchoClient {
        async fn complete(&self, user_prompt: &str, system_prompt: Option<&str>) -> anyhow::Result<String> {
            Ok(format!("<sys>{}</sys><user>{}</user>", system_prompt.unwrap_or("-"), user_prompt))
        }
    }

    struct PanicOnCallClient;

    #[async_trait]
    impl ModelClient for PanicOnCallClient {
        async fn complete(&self, _user: &str, _system: Option<&str>) -> anyhow::Result<String> {
            panic!("模型不应被调用")
        }
    }

    fn task(index: usize, value: JsonValue) -> Task {
        Task::new(index, value.as_object().cloned().unwrap())
    }

    async fn flow(dir: &TempDir, kind: PipelineKind, prompts: PromptsConfig, client: Arc<dyn ModelClient>) -> TaskFlow {
        let sink = Arc::new(ResultSink::create(dir.path().join("out.jsonl")).await.unwrap());
        TaskFlow::new(
            kind,
            &prompts,
            client,
            Arc::new(RateLimiter::new(0)),
            Duration::from_secs(5),
            sink,
        )
    }

    fn write_prompts(dir: &TempDir) -> PromptsConfig {
        let system = dir.path().join("system.prompt.txt");
        let user = dir.path().join("user.prompt.txt");
        std::fs::write(&system, "你是{role}").unwrap();
        std::fs::write(&user, "问题: {query}").unwrap();
        PromptsConfig {
            system_prompt_path: Some(system),
            user_prompt_path: Some(user),
        }
    }

    #[tokio::test]
    async fn test_generate_builds_prompts_and_extracts() {
        let dir = TempDir::new().unwrap();
        let prompts = write_prompts(&dir);
        let flow = flow(&dir, PipelineKind::Generation, prompts, Arc::new(EchoClient))
            .await
            .with_extractor(Some(Arc::new(TagExtractor::new("user", false))));

        let record = flow
            .execute(&task(0, json!({
                "system_prompt_kwargs": {"role": "助手"},
                "user_prompt_kwargs": {"query": "1+1"}
            })))
            .await;

        assert_eq!(record.reply(), Some("<sys>你是助手</sys><user>问题: 1+1</user>"));
        assert_eq!(record.extracted, Some(json!("问题: 1+1")));
        assert!(record.error.is_none());
    }

    #[tokio::test]
    async fn test_extractor_error_becomes_error_record() {
        let dir = TempDir::new().unwrap();
        let prompts = write_prompts(&dir);
        let failing = |_: Option<&str>| -> anyhow::Result<JsonValue> { anyhow::bail!("坏的提取器") };
        let flow = flow(&dir, PipelineKind::Generation, prompts, Arc::new(EchoClient))
            .await
            .with_extractor(Some(Arc::new(failing)));

        let record = flow.execute(&task(0, json!({}))).await;

        assert!(record.response.is_none());
        let error = record.error.unwrap();
        assert!(error.starts_with("ExtractionError"));
        assert!(error.contains("坏的提取器"));
    }

    #[tokio::test]
    async fn test_judge_requires_answer() {
        let dir = TempDir::new().unwrap();
        let flow = flow(&dir, PipelineKind::Judgement, PromptsConfig::default(), Arc::new(PanicOnCallClient)).await;

        let record = flow.execute(&task(0, json!({"answer": ""}))).await;
        assert!(record.error.unwrap().starts_with("TaskError"));
        assert!(record.model_response.is_none());
    }

    #[tokio::test]
    async fn test_judge_without_prompts_skips_model_call() {
        let dir = TempDir::new().unwrap();
        let flow = flow(&dir, PipelineKind::Judgement, PromptsConfig::default(), Arc::new(PanicOnCallClient))
            .await
            .with_extractor(Some(Arc::new(JudgementExtractor)))
            .with_rules(Some(Arc::new(RuleJudge::new().unwrap())), RuleSet::new());

        let record = flow.execute(&task(0, json!({"answer": "hello world"}))).await;

        assert!(record.error.is_none());
        assert!(record.model_response.is_none());
        assert!(record.model_based_judgement.is_none());
        let rules = record.rule_based_judgement.unwrap();
        assert_eq!(rules["answer-token-count"], Some(serde_json::Number::from(2)));
    }
}
