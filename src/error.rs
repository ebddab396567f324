use thiserror::Error;

/// 应用程序错误类型
#[derive(Debug, Error)]
pub enum AppError {
    /// 配置错误（只会在启动阶段出现）
    #[error("配置错误: {0}")]
    Config(#[from] ConfigError),
    /// LLM 服务错误
    #[error("LLM错误: {0}")]
    Llm(#[from] LlmError),
    /// 提示词错误
    #[error("提示词错误: {0}")]
    Prompt(#[from] PromptError),
    /// 单个任务的业务错误
    #[error("任务错误: {0}")]
    Task(#[from] TaskError),
    /// 提取函数错误
    #[error("提取错误: {0}")]
    Extraction(#[from] ExtractionError),
    /// 文件操作错误
    #[error("文件错误: {0}")]
    File(#[from] FileError),
}

impl AppError {
    /// 错误类别名，写入结果记录的 `error` 字段前缀
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::Config(_) => "ConfigError",
            AppError::Llm(_) => "LlmError",
            AppError::Prompt(_) => "PromptError",
            AppError::Task(_) => "TaskError",
            AppError::Extraction(_) => "ExtractionError",
            AppError::File(_) => "FileError",
        }
    }

    /// 转换为结果记录中的错误描述，形如 `LlmError: ...`
    pub fn to_record_message(&self) -> String {
        format!("{}: {}", self.kind(), self)
    }
}

/// 配置错误
#[derive(Debug, Error)]
pub enum ConfigError {
    /// 配置文件不存在
    #[error("配置文件不存在: {path}")]
    NotFound { path: String },
    /// 配置文件读取失败
    #[error("读取配置文件失败 ({path}): {source}")]
    ReadFailed {
        path: String,
        #[source]
        source: std::io::Error,
    },
    /// 配置内容无法解析
    #[error("配置解析失败: {source}")]
    ParseFailed {
        #[source]
        source: toml::de::Error,
    },
    /// 缺少 API 密钥
    #[error("缺少 API 密钥: 请设置 model.api_key 或环境变量 OPENAI_API_KEY")]
    MissingCredential,
    /// 缺少必需的配置项
    #[error("缺少必需的配置项: {key}")]
    MissingKey { key: String },
    /// 配置值非法
    #[error("配置项 {key} 非法: {reason}")]
    InvalidValue { key: String, reason: String },
    /// 覆盖参数格式错误
    #[error("覆盖参数格式错误 '{raw}'，应为 key=value")]
    MalformedOverride { raw: String },
    /// 分词器加载失败
    #[error("加载分词器 cl100k_base 失败: {source}")]
    TokenizerLoadFailed {
        #[source]
        source: anyhow::Error,
    },
    /// 覆盖参数匹配到多个配置项
    #[error("覆盖参数 '{key}' 有歧义，请使用完整路径: {candidates:?}")]
    AmbiguousOverride {
        key: String,
        candidates: Vec<String>,
    },
}

/// LLM 服务错误
#[derive(Debug, Error)]
pub enum LlmError {
    /// API 调用失败
    #[error("LLM API调用失败: {source}")]
    ApiCallFailed {
        #[source]
        source: anyhow::Error,
    },
}

/// 提示词错误
#[derive(Debug, Error)]
pub enum PromptError {
    /// 模板引用了 kwargs 中不存在的变量
    #[error("缺少格式化变量: {key}")]
    MissingKey { key: String },
    /// 模板括号不匹配
    #[error("模板格式错误 (位置 {position}): {reason}")]
    Malformed { position: usize, reason: String },
}

/// 单个任务的业务错误
#[derive(Debug, Error)]
pub enum TaskError {
    /// 评判任务缺少 answer 字段
    #[error("输入数据必须包含非空的 'answer' 字段")]
    MissingAnswer,
    /// 并发信号量已关闭
    #[error("并发控制信号量已关闭")]
    GateClosed,
    /// 任务在执行过程中 panic
    #[error("任务执行异常终止: {message}")]
    Panicked { message: String },
}

/// 提取函数错误
#[derive(Debug, Error)]
pub enum ExtractionError {
    /// 自定义提取函数失败
    #[error("提取函数执行失败: {source}")]
    Failed {
        #[source]
        source: anyhow::Error,
    },
}

/// 文件操作错误
#[derive(Debug, Error)]
pub enum FileError {
    /// 文件不存在
    #[error("文件不存在: {path}")]
    NotFound { path: String },
    /// 读取文件失败
    #[error("读取文件失败 ({path}): {source}")]
    ReadFailed {
        path: String,
        #[source]
        source: std::io::Error,
    },
    /// 写入文件失败
    #[error("写入文件失败 ({path}): {source}")]
    WriteFailed {
        path: String,
        #[source]
        source: std::io::Error,
    },
    /// 创建目录失败
    #[error("创建目录失败 ({path}): {source}")]
    CreateDirFailed {
        path: String,
        #[source]
        source: std::io::Error,
    },
    /// JSON 行解析失败
    #[error("JSON解析失败 ({path} 第 {line} 行): {source}")]
    JsonParseFailed {
        path: String,
        line: usize,
        #[source]
        source: serde_json::Error,
    },
    /// JSON 序列化失败
    #[error("JSON序列化失败: {source}")]
    JsonSerializeFailed {
        #[source]
        source: serde_json::Error,
    },
}

// ========== 便捷构造函数 ==========

impl AppError {
    /// 创建LLM API调用错误
    pub fn llm_call_failed(source: anyhow::Error) -> Self {
        AppError::Llm(LlmError::ApiCallFailed { source })
    }

    /// 创建文件读取错误
    pub fn file_read_failed(path: impl Into<String>, source: std::io::Error) -> Self {
        AppError::File(FileError::ReadFailed {
            path: path.into(),
            source,
        })
    }

    /// 创建文件写入错误
    pub fn file_write_failed(path: impl Into<String>, source: std::io::Error) -> Self {
        AppError::File(FileError::WriteFailed {
            path: path.into(),
            source,
        })
    }
}

// ========== Result 类型别名 ==========

/// 应用程序结果类型
pub type AppResult<T> = Result<T, AppError>;
