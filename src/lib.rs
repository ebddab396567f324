//! # LLM Pipeline
//!
//! 一个用于批量调用大模型并处理回复的 Rust 应用程序，支持数据生成和答案评判两种流水线
//!
//! ## 架构设计
//!
//! 本系统采用四层架构：
//!
//! ### ① 客户端层（Clients）
//! - `clients/` - 模型调用接口 `ModelClient`，`OpenAiClient` 为默认实现
//!
//! ### ② 业务能力层（Services）
//! - `services/` - 描述"我能做什么"，只处理单个任务
//! - `PromptLoader` - 提示词模板加载
//! - `RateLimiter` - 请求限速
//! - `extraction` - 标签提取与评判分数解析
//! - `RuleJudge` - token 统计与自定义规则
//! - `ResultSink` - 结果写入
//!
//! ### ③ 流程层（Workflow）
//! - `workflow/` - 定义"一个任务"的完整处理流程
//! - `TaskFlow` - 提示词 → 限速 → 模型 → 后处理 → 写入
//!
//! ### ④ 编排层（Orchestration）
//! - `orchestrator/pipeline` - 批量任务处理器，管理资源和并发
//!
//! ## 模块结构

pub mod clients;
pub mod config;
pub mod error;
pub mod models;
pub mod orchestrator;
pub mod services;
pub mod stats;
pub mod utils;
pub mod workflow;

// 重新导出常用类型
pub use clients::{ModelClient, OpenAiClient};
pub use config::{Config, PipelineKind};
pub use error::{AppError, AppResult};
pub use models::{ModelJudgement, ResultRecord, RuleScores, Task};
pub use orchestrator::Pipeline;
pub use services::{JudgementExtractor, ResponseExtractor, Rule, RuleSet, TagExtractor};
pub use stats::ResultStats;
