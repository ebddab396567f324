//! LLM API 客户端
//!
//! `ModelClient` 是编排层唯一依赖的模型调用接口；`OpenAiClient` 基于
//! `async-openai`，兼容任意 OpenAI 协议的服务端。

use std::time::Duration;

use anyhow::Result;
use async_openai::{
    config::OpenAIConfig,
    types::chat::{
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
        ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequestArgs,
    },
    Client,
};
use async_trait::async_trait;
use tracing::{debug, warn};

use crate::config::ModelConfig;
use crate::error::{AppResult, ConfigError};
use crate::utils::logging::truncate_text;

/// 模型调用接口
///
/// 实现必须可以被多个任务并发调用。
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// 发送一次对话请求，返回回复文本
    async fn complete(&self, user_prompt: &str, system_prompt: Option<&str>) -> Result<String>;

    /// 带超时的调用：超时返回 `Ok(None)`，其他错误原样返回
    async fn complete_within(
        &self,
        user_prompt: &str,
        system_prompt: Option<&str>,
        timeout: Duration,
    ) -> Result<Option<String>> {
        match tokio::time::timeout(timeout, self.complete(user_prompt, system_prompt)).await {
            Ok(result) => result.map(Some),
            Err(_) => {
                warn!("[TIMEOUT] 提示: {}", truncate_text(user_prompt, 50));
                Ok(None)
            }
        }
    }
}

/// OpenAI 兼容客户端
pub struct OpenAiClient {
    client: Client<OpenAIConfig>,
    model_name: String,
    max_tokens: u32,
    temperature: f32,
}

impl OpenAiClient {
    /// 根据模型配置创建客户端，缺少密钥视为启动错误
    pub fn new(config: &ModelConfig) -> AppResult<Self> {
        let api_key = config
            .api_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or(ConfigError::MissingCredential)?;

        let mut openai_config = OpenAIConfig::new().with_api_key(api_key);
        if let Some(base_url) = &config.base_url {
            openai_config = openai_config.with_api_base(base_url);
        }

        debug!("初始化 OpenAI 客户端，模型: {}", config.model);

        Ok(Self {
            client: Client::with_config(openai_config),
            model_name: config.model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        })
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    fn build_messages(
        user_prompt: &str,
        system_prompt: Option<&str>,
    ) -> Result<Vec<ChatCompletionRequestMessage>> {
        let mut messages = Vec::new();

        // 空的系统提示词不发送
        if let Some(sys_msg) = system_prompt.filter(|s| !s.is_empty()) {
            let system_msg = ChatCompletionRequestSystemMessageArgs::default()
                .content(sys_msg)
                .build()?;
            messages.push(ChatCompletionRequestMessage::System(system_msg));
        }

        let user_msg = ChatCompletionRequestUserMessageArgs::default()
            .content(user_prompt)
            .build()?;
        messages.push(ChatCompletionRequestMessage::User(user_msg));

        Ok(messages)
    }
}

#[async_trait]
impl ModelClient for OpenAiClient {
    async fn complete(&self, user_prompt: &str, system_prompt: Option<&str>) -> Result<String> {
        debug!("调用 LLM API，模型: {}", self.model_name);
        debug!("用户消息长度: {} 字符", user_prompt.len());

        let messages = Self::build_messages(user_prompt, system_prompt)?;

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model_name)
            .messages(messages)
            .temperature(self.temperature)
            .max_tokens(self.max_tokens)
            .build()?;

        let response = self.client.chat().create(request).await.map_err(|e| {
            warn!("LLM API 调用失败: {}", e);
            anyhow::anyhow!("LLM API 调用失败: {}", e)
        })?;

        debug!("LLM API 调用成功");

        let content = response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .ok_or_else(|| anyhow::anyhow!("LLM 返回内容为空"))?;

        Ok(content)
    }
}
