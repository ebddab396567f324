use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use llm_pipeline::config::{Config, PipelineKind};
use llm_pipeline::models::load_tasks_from_jsonl;
use llm_pipeline::services::{JudgementExtractor, ResponseExtractor, RuleSet, TagExtractor};
use llm_pipeline::stats::{ResultStats, RESPONSE_LENGTH};
use llm_pipeline::utils::logging;
use llm_pipeline::Pipeline;

const JUDGEMENT_FIELDS: [&str; 5] = [
    "model_based_judgement.accuracy",
    "model_based_judgement.relevance",
    "model_based_judgement.clarity",
    "model_based_judgement.completeness",
    "model_based_judgement.overall",
];

#[tokio::main]
async fn main() -> Result<()> {
    // 初始化日志
    let log_file = PathBuf::from("logs").join(format!(
        "llm_pipeline_{}.log",
        chrono::Local::now().format("%Y%m%d-%H%M%S")
    ));
    logging::init(Some(&log_file))?;

    // 加载配置（命令行参数为 key=value 覆盖项）
    let overrides: Vec<String> = std::env::args().skip(1).collect();
    let config = Config::from_env(&overrides)?;

    // 加载任务
    let input_path = config
        .input_data
        .input_path
        .clone()
        .context("缺少必需的配置项: input_data.input_path")?;
    let tasks = load_tasks_from_jsonl(&input_path).await?;

    // 后处理策略
    let kind = config.pipeline.kind;
    let extractor: Option<Arc<dyn ResponseExtractor>> = match kind {
        PipelineKind::Generation => config
            .pipeline
            .extract_tag
            .as_ref()
            .map(|tag| Arc::new(TagExtractor::new(tag.clone(), config.pipeline.extract_to_list)) as Arc<dyn ResponseExtractor>),
        PipelineKind::Judgement => Some(Arc::new(JudgementExtractor)),
    };

    // 初始化并运行流水线
    let pipeline = Pipeline::initialize(config).await?;
    let records = pipeline.run_with_config(tasks, extractor, RuleSet::new()).await?;

    let failed = records.iter().filter(|r| r.is_error()).count();
    let timeout = records.iter().filter(|r| r.is_timeout()).count();
    logging::print_final_stats(
        records.len() - failed,
        failed,
        timeout,
        records.len(),
        &pipeline.output_path(),
    );

    // 结果统计
    let stats = match kind {
        PipelineKind::Generation => ResultStats::from_records(&records, &[RESPONSE_LENGTH], &[]),
        PipelineKind::Judgement => {
            ResultStats::from_records(&records, &JUDGEMENT_FIELDS, &["model_based_judgement.overall"])
        }
    };
    stats.log_report();

    Ok(())
}
