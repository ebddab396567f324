//! 批量任务处理器 - 编排层
//!
//! ## 职责
//!
//! 1. **资源初始化**：模型客户端、限速器、分词器、输出目录
//! 2. **并发控制**：使用 Semaphore 限制同时处理的任务数
//! 3. **失败隔离**：单个任务的错误或 panic 只产生一条错误记录
//! 4. **结果汇总**：返回本次运行的全部记录（按完成顺序）
//!
//! ## 设计特点
//!
//! - **顶层编排**：不处理单个任务的细节，委托 `workflow::TaskFlow`
//! - **资源所有者**：唯一持有模型客户端和限速器的模块

use std::any::Any;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

use crate::clients::{ModelClient, OpenAiClient};
use crate::config::{Config, PipelineKind};
use crate::error::{AppError, AppResult, FileError, TaskError};
use crate::models::{ResultRecord, Task};
use crate::services::{RateLimiter, ResponseExtractor, ResultSink, RuleJudge, RuleSet};
use crate::utils::logging::{log_progress, log_startup};
use crate::workflow::TaskFlow;

/// 批量任务流水线
pub struct Pipeline {
    config: Config,
    client: Arc<dyn ModelClient>,
    rate_limiter: Arc<RateLimiter>,
    rule_judge: Option<Arc<RuleJudge>>,
    output_dir: PathBuf,
}

impl Pipeline {
    /// 使用配置中的 OpenAI 兼容端点初始化
    pub async fn initialize(config: Config) -> AppResult<Self> {
        let client = OpenAiClient::new(&config.model)?;
        info!("🤖 模型: {}", client.model_name());
        Self::new(config, Arc::new(client)).await
    }

    /// 使用给定的模型客户端初始化，创建本次运行的输出目录
    pub async fn new(config: Config, client: Arc<dyn ModelClient>) -> AppResult<Self> {
        let timestamp = chrono::Local::now().format("%Y%m%d-%H%M%S").to_string();
        let output_dir = config.experiment_dir(&timestamp);

        tokio::fs::create_dir_all(&output_dir).await.map_err(|source| {
            AppError::File(FileError::CreateDirFailed {
                path: output_dir.display().to_string(),
                source,
            })
        })?;
        info!("📁 输出目录: {}", output_dir.display());

        let rule_judge = match config.pipeline.kind {
            PipelineKind::Judgement => Some(Arc::new(RuleJudge::new()?)),
            PipelineKind::Generation => None,
        };

        if config.model.rate_limit == 0 {
            warn!("⚠️ 未设置请求限速 (rate_limit = 0)");
        }

        Ok(Self {
            rate_limiter: Arc::new(RateLimiter::new(config.model.rate_limit)),
            client,
            rule_judge,
            output_dir,
            config,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// 结果日志路径
    pub fn output_path(&self) -> PathBuf {
        self.output_dir.join(self.config.pipeline.kind.result_file_name())
    }

    /// 使用配置中的并发数运行
    pub async fn run_with_config(
        &self,
        tasks: Vec<Task>,
        extractor: Option<Arc<dyn ResponseExtractor>>,
        rules: RuleSet,
    ) -> AppResult<Vec<ResultRecord>> {
        self.run(tasks, self.config.pipeline.concurrency_limit, extractor, rules)
            .await
    }

    /// 并发处理所有任务
    ///
    /// 每个任务恰好产生一条记录；返回值和结果日志都按完成顺序排列。
    pub async fn run(
        &self,
        tasks: Vec<Task>,
        concurrency_limit: usize,
        extractor: Option<Arc<dyn ResponseExtractor>>,
        rules: RuleSet,
    ) -> AppResult<Vec<ResultRecord>> {
        // Semaphore 的许可数有上限，超大的并发数等价于不限并发
        let concurrency_limit = concurrency_limit.clamp(1, Semaphore::MAX_PERMITS);
        let total = tasks.len();
        log_startup(self.config.pipeline.kind.name(), concurrency_limit, total);

        let sink = Arc::new(ResultSink::create(self.output_path()).await?);

        if tasks.is_empty() {
            warn!("⚠️ 没有待处理的任务");
            return Ok(Vec::new());
        }

        let flow = Arc::new(
            TaskFlow::new(
                self.config.pipeline.kind,
                &self.config.prompts,
                Arc::clone(&self.client),
                Arc::clone(&self.rate_limiter),
                Duration::from_secs(self.config.model.timeout),
                Arc::clone(&sink),
            )
            .with_extractor(extractor)
            .with_rules(self.rule_judge.clone(), rules),
        );

        let semaphore = Arc::new(Semaphore::new(concurrency_limit));
        let completed = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::with_capacity(total);

        for task in tasks {
            let task = Arc::new(task);
            let permit = Arc::clone(&semaphore)
                .acquire_owned()
                .await
                .map_err(|_| TaskError::GateClosed)?;

            let flow = Arc::clone(&flow);
            let completed = Arc::clone(&completed);
            let task_clone = Arc::clone(&task);

            let handle = tokio::spawn(async move {
                let _permit = permit;
                let record = flow.execute(&task_clone).await;
                let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
                log_progress(done, total, task_clone.index, record.error.as_deref());
            });
            handles.push((task, handle));
        }

        // 按完成顺序等待所有任务，panic 的任务补写一条错误记录
        let mut pending: FuturesUnordered<_> = handles
            .into_iter()
            .map(|(task, handle)| async move { (task, handle.await) })
            .collect();

        while let Some((task, joined)) = pending.next().await {
            if let Err(e) = joined {
                let message = if e.is_panic() {
                    panic_message(e.into_panic())
                } else {
                    e.to_string()
                };
                error!("[任务 {}] 任务执行异常终止: {}", task.index + 1, message);

                let err: AppError = TaskError::Panicked { message }.into();
                let record = ResultRecord::failure(&task, err.to_record_message());
                let _ = sink.save(record).await;

                let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
                log_progress(done, total, task.index, Some(&err.to_string()));
            }
        }

        drop(flow);
        let records = match Arc::try_unwrap(sink) {
            Ok(sink) => sink.into_records(),
            Err(sink) => sink.records().await,
        };

        info!("✓ 全部任务完成: {}/{}", records.len(), total);
        Ok(records)
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "未知 panic".to_string()
    }
}
