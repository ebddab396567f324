//! 提示词加载 - 业务能力层
//!
//! 读取提示词模板文件并用任务的 kwargs 填充 `{name}` 占位符。
//! 这一层不让任务失败：出问题时记录日志并退化为原始模板或空字符串。

use std::path::Path;

use serde_json::{Map, Value as JsonValue};
use tracing::{debug, error, warn};

use crate::error::PromptError;

/// 提示词加载服务
#[derive(Debug, Clone, Copy, Default)]
pub struct PromptLoader;

impl PromptLoader {
    pub fn new() -> Self {
        Self
    }

    /// 加载并格式化提示词
    ///
    /// - `path` 为 `None`：返回空字符串
    /// - 文件不存在或读取失败：记录错误，返回空字符串
    /// - 缺少变量或模板格式错误：记录日志，返回未格式化的模板
    pub async fn load(&self, path: Option<&Path>, kwargs: &Map<String, JsonValue>) -> String {
        let Some(path) = path else {
            return String::new();
        };

        let template = match tokio::fs::read_to_string(path).await {
            Ok(content) => content.trim().to_string(),
            Err(e) => {
                error!("读取提示词文件失败 ({}): {}", path.display(), e);
                return String::new();
            }
        };

        match format_template(&template, kwargs) {
            Ok(prompt) => {
                debug!("提示词 {} 加载完成，长度: {} 字符", path.display(), prompt.chars().count());
                prompt
            }
            Err(e @ PromptError::MissingKey { .. }) => {
                warn!("提示词 {} {}，使用未格式化的模板", path.display(), e);
                template
            }
            Err(e) => {
                error!("提示词 {} {}，使用未格式化的模板", path.display(), e);
                template
            }
        }
    }
}

/// 用 kwargs 填充模板中的 `{name}` 占位符
///
/// `{{` / `}}` 输出字面量括号；`{name:fmt}` 和 `{name!conv}` 的修饰部分被忽略。
/// 字符串值原样插入，其他值使用 JSON 表示。
pub fn format_template(template: &str, kwargs: &Map<String, JsonValue>) -> Result<String, PromptError> {
    let mut output = String::with_capacity(template.len());
    let mut chars = template.char_indices().peekable();

    while let Some((pos, ch)) = chars.next() {
        match ch {
            '{' if matches!(chars.peek(), Some((_, '{'))) => {
                chars.next();
                output.push('{');
            }
            '{' => {
                let mut field = String::new();
                let mut closed = false;
                for (_, c) in chars.by_ref() {
                    if c == '}' {
                        closed = true;
                        break;
                    }
                    if c == '{' {
                        return Err(PromptError::Malformed {
                            position: pos,
                            reason: "占位符中不允许嵌套 '{'".to_string(),
                        });
                    }
                    field.push(c);
                }
                if !closed {
                    return Err(PromptError::Malformed {
                        position: pos,
                        reason: "'{' 没有闭合".to_string(),
                    });
                }

                let name = field.split([':', '!']).next().unwrap_or_default().trim();
                if name.is_empty() {
                    return Err(PromptError::Malformed {
                        position: pos,
                        reason: "占位符缺少变量名".to_string(),
                    });
                }

                match kwargs.get(name) {
                    Some(JsonValue::String(s)) => output.push_str(s),
                    Some(other) => output.push_str(&other.to_string()),
                    None => {
                        return Err(PromptError::MissingKey {
                            key: name.to_string(),
                        })
                    }
                }
            }
            '}' if matches!(chars.peek(), Some((_, '}'))) => {
                chars.next();
                output.push('}');
            }
            '}' => {
                return Err(PromptError::Malformed {
                    position: pos,
                    reason: "单独的 '}' 必须写成 '}}'".to_string(),
                });
            }
            c => output.push(c),
        }
    }

    Ok(output)
}
