//! 日志工具模块
//!
//! 提供日志初始化和格式化输出的辅助函数
use std::fs;
use std::path::Path;
use std::sync::Mutex;

use tracing::{debug, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::error::{AppError, AppResult, FileError};

/// 初始化日志
///
/// 控制台始终输出；给出 `log_file` 时额外写一份无颜色的文件日志。
/// 日志级别由 `RUST_LOG` 控制，默认 `info`。重复初始化会被忽略。
///
/// # 参数
/// - `log_file`: 日志文件路径（父目录不存在时自动创建）
pub fn init(log_file: Option<&Path>) -> AppResult<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let file_layer = match log_file {
        Some(path) => {
            if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
                fs::create_dir_all(dir).map_err(|source| {
                    AppError::File(FileError::CreateDirFailed {
                        path: dir.display().to_string(),
                        source,
                    })
                })?;
            }
            let file = fs::File::create(path)
                .map_err(|e| AppError::file_write_failed(path.display().to_string(), e))?;
            Some(fmt::layer().with_writer(Mutex::new(file)).with_ansi(false))
        }
        None => None,
    };

    let result = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(file_layer)
        .try_init();

    match result {
        Ok(()) => {
            if let Some(path) = log_file {
                info!("日志文件: {}", path.display());
            }
        }
        Err(e) => debug!("日志已初始化，跳过: {}", e),
    }

    Ok(())
}

/// 记录程序启动信息
///
/// # 参数
/// - `pipeline`: 流水线名称
/// - `max_concurrent`: 最大并发数
/// - `total`: 任务总数
pub fn log_startup(pipeline: &str, max_concurrent: usize, total: usize) {
    info!("{}", "=".repeat(60));
    info!("🚀 流水线启动 - {}", pipeline);
    info!("📊 最大并发数: {}", max_concurrent);
    info!("📋 任务总数: {}", total);
    info!("{}", "=".repeat(60));
}

/// 记录单个任务完成
///
/// # 参数
/// - `completed`: 已完成数量
/// - `total`: 任务总数
/// - `index`: 任务序号（从 0 开始）
/// - `error`: 任务错误（成功为 `None`）
pub fn log_progress(completed: usize, total: usize, index: usize, error: Option<&str>) {
    match error {
        None => info!("✓ [{}/{}] 任务 {} 完成", completed, total, index + 1),
        Some(e) => info!(
            "✗ [{}/{}] 任务 {} 失败: {}",
            completed,
            total,
            index + 1,
            truncate_text(e, 120)
        ),
    }
}

/// 打印最终统计信息
///
/// # 参数
/// - `success`: 成功数量
/// - `failed`: 失败数量
/// - `timeout`: 超时数量（计入成功）
/// - `total`: 总数
/// - `output_path`: 结果文件路径
pub fn print_final_stats(success: usize, failed: usize, timeout: usize, total: usize, output_path: &Path) {
    info!("{}", "=".repeat(60));
    info!("📊 全部处理完成统计");
    info!(
        "完成时间: {}",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
    );
    info!("{}", "=".repeat(60));
    info!("✅ 成功: {}/{}", success, total);
    info!("⏱ 超时: {}", timeout);
    info!("❌ 失败: {}", failed);
    info!("{}", "=".repeat(60));
    info!("结果已保存至: {}", output_path.display());
}

/// 截断长文本用于日志显示
///
/// # 参数
/// - `text`: 原始文本
/// - `max_len`: 最大字符数
///
/// # 返回
/// 返回截断后的文本
pub fn truncate_text(text: &str, max_len: usize) -> String {
    if text.chars().count() > max_len {
        text.chars().take(max_len).collect::<String>() + "..."
    } else {
        text.to_string()
    }
}
