//! 程序配置
//!
//! 配置来源：TOML 配置文件 + 命令行覆盖参数（`key=value`）+ 环境变量兜底（密钥）。
//!
//! 覆盖参数规则：
//! - 完整路径（如 `model.temperature`）直接生效
//! - 短键（如 `temperature`）只有唯一匹配时才生效，多处匹配直接报错
//! - 未知键记录警告并忽略

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{AppResult, ConfigError};

/// 默认配置文件路径
pub const DEFAULT_CONFIG_PATH: &str = "config/pipeline.toml";

/// 所有可被覆盖的配置项（完整路径）
pub const KNOWN_KEYS: &[&str] = &[
    "pipeline.kind",
    "pipeline.concurrency_limit",
    "pipeline.extract_tag",
    "pipeline.extract_to_list",
    "model.api_key",
    "model.base_url",
    "model.model",
    "model.max_tokens",
    "model.temperature",
    "model.rate_limit",
    "model.timeout",
    "prompts.system_prompt_path",
    "prompts.user_prompt_path",
    "output_data.output_dir",
    "output_data.job_name",
    "output_data.experiment_name",
    "output_data.need_time_stamp",
    "input_data.input_path",
];

/// 流水线类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineKind {
    /// 数据生成：`response` + `extracted`
    #[default]
    Generation,
    /// 评判：`model_response` + `model_based_judgement` + `rule_based_judgement`
    Judgement,
}

impl PipelineKind {
    /// 结果日志文件名
    pub fn result_file_name(&self) -> &'static str {
        match self {
            PipelineKind::Generation => "result.jsonl",
            PipelineKind::Judgement => "judgement_result.jsonl",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            PipelineKind::Generation => "data_generation",
            PipelineKind::Judgement => "judgement",
        }
    }
}

/// 程序配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub prompts: PromptsConfig,
    #[serde(default)]
    pub output_data: OutputConfig,
    #[serde(default)]
    pub input_data: InputConfig,
}

/// 调度相关配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub kind: PipelineKind,
    /// 同时处理的任务数量
    #[serde(default = "default_concurrency_limit")]
    pub concurrency_limit: usize,
    /// 生成模式下要提取的标签名
    #[serde(default)]
    pub extract_tag: Option<String>,
    #[serde(default = "default_true")]
    pub extract_to_list: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            kind: PipelineKind::default(),
            concurrency_limit: default_concurrency_limit(),
            extract_tag: None,
            extract_to_list: true,
        }
    }
}

/// 模型配置
#[derive(Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_model_name")]
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// 每分钟最大请求数，0 表示不限速
    #[serde(default = "default_rate_limit")]
    pub rate_limit: u32,
    /// 单次调用超时（秒）
    #[serde(default = "default_timeout")]
    pub timeout: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: None,
            model: default_model_name(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            rate_limit: default_rate_limit(),
            timeout: default_timeout(),
        }
    }
}

// 手写 Debug，避免把密钥打进日志
impl std::fmt::Debug for ModelConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "***"))
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .field("temperature", &self.temperature)
            .field("rate_limit", &self.rate_limit)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// 提示词模板路径
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PromptsConfig {
    #[serde(default)]
    pub system_prompt_path: Option<PathBuf>,
    #[serde(default)]
    pub user_prompt_path: Option<PathBuf>,
}

/// 输出目录配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default)]
    pub job_name: Option<String>,
    #[serde(default = "default_experiment_name")]
    pub experiment_name: String,
    #[serde(default = "default_true")]
    pub need_time_stamp: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            job_name: None,
            experiment_name: default_experiment_name(),
            need_time_stamp: true,
        }
    }
}

/// 输入数据配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InputConfig {
    /// JSONL 任务文件
    #[serde(default)]
    pub input_path: Option<PathBuf>,
}

fn default_concurrency_limit() -> usize {
    5
}

fn default_true() -> bool {
    true
}

fn default_model_name() -> String {
    "gpt-4o-2024-11-20".to_string()
}

fn default_max_tokens() -> u32 {
    5042
}

fn default_temperature() -> f32 {
    1.0
}

fn default_rate_limit() -> u32 {
    200
}

fn default_timeout() -> u64 {
    3600
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("output")
}

fn default_experiment_name() -> String {
    "experiment".to_string()
}

impl Config {
    /// 从环境变量指定的配置文件加载（`PIPELINE_CONFIG`，默认 `config/pipeline.toml`）
    pub fn from_env(overrides: &[String]) -> AppResult<Self> {
        let path = std::env::var("PIPELINE_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load(Path::new(&path), overrides)
    }

    /// 加载配置文件并应用覆盖参数
    pub fn load(path: &Path, overrides: &[String]) -> AppResult<Self> {
        if !path.exists() {
            return Err(ConfigError::NotFound {
                path: path.display().to_string(),
            }
            .into());
        }

        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadFailed {
            path: path.display().to_string(),
            source,
        })?;

        info!("加载配置文件: {}", path.display());
        Self::from_toml_str(&content, overrides)
    }

    /// 从 TOML 文本构建配置
    pub fn from_toml_str(content: &str, overrides: &[String]) -> AppResult<Self> {
        let mut table: toml::Table =
            toml::from_str(content).map_err(|source| ConfigError::ParseFailed { source })?;

        for raw in overrides {
            let (key, value) = parse_override(raw)?;
            match resolve_override_key(&key, KNOWN_KEYS)? {
                Some(path) => {
                    info!("覆盖配置项: {} = {}", path, value);
                    set_path(&mut table, path, value);
                }
                None => warn!("配置项 '{}' 不存在，已忽略", key),
            }
        }

        let mut config: Config = toml::Value::Table(table)
            .try_into()
            .map_err(|source| ConfigError::ParseFailed { source })?;

        config.apply_env_fallbacks();
        config.validate()?;
        Ok(config)
    }

    /// 密钥和端点的环境变量兜底
    fn apply_env_fallbacks(&mut self) {
        if self.model.api_key.as_deref().map_or(true, str::is_empty) {
            self.model.api_key = std::env::var("OPENAI_API_KEY").ok();
        }
        if self.model.base_url.is_none() {
            self.model.base_url = std::env::var("OPENAI_API_BASE").ok();
        }
    }

    /// 启动阶段校验，失败即终止
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.model.api_key.as_deref().map_or(true, str::is_empty) {
            return Err(ConfigError::MissingCredential);
        }
        if self.pipeline.concurrency_limit == 0 {
            return Err(ConfigError::InvalidValue {
                key: "pipeline.concurrency_limit".to_string(),
                reason: "必须大于 0".to_string(),
            });
        }
        if self.model.timeout == 0 {
            return Err(ConfigError::InvalidValue {
                key: "model.timeout".to_string(),
                reason: "必须大于 0".to_string(),
            });
        }
        if self.pipeline.kind == PipelineKind::Generation && self.prompts.user_prompt_path.is_none() {
            return Err(ConfigError::MissingKey {
                key: "prompts.user_prompt_path".to_string(),
            });
        }
        Ok(())
    }

    /// 本次运行的实验目录：`output_dir[/job_name]/experiment_name[/timestamp]`
    pub fn experiment_dir(&self, timestamp: &str) -> PathBuf {
        let output = &self.output_data;
        let mut dir = output.output_dir.clone();
        if let Some(job) = &output.job_name {
            dir.push(job);
        }
        dir.push(&output.experiment_name);
        if output.need_time_stamp {
            dir.push(timestamp);
        }
        dir
    }
}

/// 拆分 `key=value`，值按 TOML 字面量解析，失败则视为字符串
fn parse_override(raw: &str) -> Result<(String, toml::Value), ConfigError> {
    let (key, value) = raw.split_once('=').ok_or_else(|| ConfigError::MalformedOverride {
        raw: raw.to_string(),
    })?;
    let key = key.trim();
    if key.is_empty() {
        return Err(ConfigError::MalformedOverride {
            raw: raw.to_string(),
        });
    }

    let value = value.trim();
    let parsed = toml::from_str::<toml::Table>(&format!("v = {}", value))
        .ok()
        .and_then(|mut t| t.remove("v"))
        .unwrap_or_else(|| toml::Value::String(value.to_string()));

    Ok((key.to_string(), parsed))
}

/// 把覆盖键解析为唯一的完整路径
///
/// 返回 `Ok(None)` 表示没有匹配项。
pub fn resolve_override_key<'a>(key: &str, known: &[&'a str]) -> Result<Option<&'a str>, ConfigError> {
    if let Some(exact) = known.iter().find(|k| **k == key) {
        return Ok(Some(*exact));
    }
    if key.contains('.') {
        return Ok(None);
    }

    let candidates: Vec<&'a str> = known
        .iter()
        .copied()
        .filter(|k| k.rsplit('.').next() == Some(key))
        .collect();

    match candidates.len() {
        0 => Ok(None),
        1 => Ok(Some(candidates[0])),
        _ => Err(ConfigError::AmbiguousOverride {
            key: key.to_string(),
            candidates: candidates.iter().map(|c| c.to_string()).collect(),
        }),
    }
}

fn set_path(table: &mut toml::Table, path: &str, value: toml::Value) {
    let mut parts: Vec<&str> = path.split('.').collect();
    let Some(leaf) = parts.pop() else {
        return;
    };

    let mut current = table;
    for part in parts {
        let entry = current
            .entry(part.to_string())
            .or_insert_with(|| toml::Value::Table(toml::Table::new()));
        if !entry.is_table() {
            *entry = toml::Value::Table(toml::Table::new());
        }
        current = match entry {
            toml::Value::Table(t) => t,
            _ => return,
        };
    }
    current.insert(leaf.to_string(), value);
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = r#"
[pipeline]
kind = "generation"

[model]
api_key = "sk-test"
temperature = 1.0

[prompts]
user_prompt_path = "prompts/user.prompt.txt"
"#;

    fn overrides(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_defaults_applied() {
        let config = Config::from_toml_str(BASE, &[]).unwrap();
        assert_eq!(config.pipeline.concurrency_limit, 5);
        assert_eq!(config.model.timeout, 3600);
        assert_eq!(config.model.rate_limit, 200);
        assert_eq!(config.output_data.experiment_name, "experiment");
    }

    #[test]
    fn test_qualified_override() {
        let config =
            Config::from_toml_str(BASE, &overrides(&["model.temperature=0.5", "pipeline.concurrency_limit=2"]))
                .unwrap();
        assert_eq!(config.model.temperature, 0.5);
        assert_eq!(config.pipeline.concurrency_limit, 2);
    }

    #[test]
    fn test_unique_short_override() {
        let config = Config::from_toml_str(BASE, &overrides(&["experiment_name=demo"])).unwrap();
        assert_eq!(config.output_data.experiment_name, "demo");
    }

    #[test]
    fn test_unknown_override_is_ignored() {
        let config = Config::from_toml_str(BASE, &overrides(&["no_such_key=1"])).unwrap();
        assert_eq!(config.pipeline.concurrency_limit, 5);
    }

    #[test]
    fn test_ambiguous_override_fails() {
        let known = ["a.timeout", "b.timeout", "b.other"];
        let err = resolve_override_key("timeout", &known).unwrap_err();
        match err {
            ConfigError::AmbiguousOverride { candidates, .. } => assert_eq!(candidates.len(), 2),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(resolve_override_key("b.timeout", &known).unwrap(), Some("b.timeout"));
        assert_eq!(resolve_override_key("other", &known).unwrap(), Some("b.other"));
    }

    #[test]
    fn test_malformed_override() {
        let err = Config::from_toml_str(BASE, &overrides(&["temperature"])).unwrap_err();
        assert!(err.to_string().contains("key=value"));
    }

    #[test]
    fn test_missing_credential_is_fatal() {
        // 显式置空，不受环境变量影响时才断言
        if std::env::var("OPENAI_API_KEY").is_ok() {
            return;
        }
        let content = BASE.replace("api_key = \"sk-test\"", "");
        let err = Config::from_toml_str(&content, &[]).unwrap_err();
        assert!(matches!(err, crate::AppError::Config(ConfigError::MissingCredential)));
    }

    #[test]
    fn test_generation_requires_user_prompt() {
        let content = BASE.replace("user_prompt_path = \"prompts/user.prompt.txt\"", "");
        let err = Config::from_toml_str(&content, &[]).unwrap_err();
        assert!(matches!(err, crate::AppError::Config(ConfigError::MissingKey { .. })));
    }

    #[test]
    fn test_experiment_dir_layout() {
        let mut config = Config::from_toml_str(BASE, &overrides(&["job_name=job"])).unwrap();
        assert_eq!(
            config.experiment_dir("20250101-000000"),
            PathBuf::from("output/job/experiment/20250101-000000")
        );
        config.output_data.need_time_stamp = false;
        assert_eq!(config.experiment_dir("x"), PathBuf::from("output/job/experiment"));
    }

    #[test]
    fn test_missing_file() {
        let err = Config::load(Path::new("definitely/not/here.toml"), &[]).unwrap_err();
        assert!(matches!(err, crate::AppError::Config(ConfigError::NotFound { .. })));
    }
}
