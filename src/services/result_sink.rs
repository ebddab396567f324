//! 结果写入服务 - 业务能力层
//!
//! 只负责"追加一条结果记录"能力：写入 JSONL 文件的一行，同时保存到内存列表。
//! 同一把锁保护文件和内存列表，两者的顺序始终一致。

use std::io;
use std::path::{Path, PathBuf};

use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::{debug, error};

use crate::error::{AppError, AppResult, FileError};
use crate::models::ResultRecord;

struct SinkState {
    file: File,
    records: Vec<ResultRecord>,
}

/// 结果写入服务
///
/// 职责：
/// - 每条记录恰好写一行并立即刷盘
/// - 多个任务并发写入时行不交错
/// - 内存中保留与文件同序的记录列表
pub struct ResultSink {
    path: PathBuf,
    state: Mutex<SinkState>,
}

impl ResultSink {
    /// 打开（必要时创建）结果文件，已有内容保留，新记录追加在末尾
    pub async fn create(path: impl Into<PathBuf>) -> AppResult<Self> {
        let path = path.into();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await.map_err(|source| {
                AppError::File(FileError::CreateDirFailed {
                    path: parent.display().to_string(),
                    source,
                })
            })?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| AppError::file_write_failed(path.display().to_string(), e))?;

        debug!("结果文件: {}", path.display());

        Ok(Self {
            path,
            state: Mutex::new(SinkState {
                file,
                records: Vec::new(),
            }),
        })
    }

    /// 保存一条记录
    ///
    /// 写盘失败时记录日志并返回错误，但记录仍会进入内存列表。
    pub async fn save(&self, record: ResultRecord) -> AppResult<()> {
        let line = record
            .to_json_line()
            .map_err(|source| AppError::File(FileError::JsonSerializeFailed { source }))?;

        let mut state = self.state.lock().await;

        let written = append_line(&mut state.file, line.as_bytes()).await;
        state.records.push(record);

        written.map_err(|e| {
            error!("写入结果文件失败 ({}): {}", self.path.display(), e);
            AppError::file_write_failed(self.path.display().to_string(), e)
        })
    }

    /// 已保存记录的快照（按写入顺序）
    pub async fn records(&self) -> Vec<ResultRecord> {
        self.state.lock().await.records.clone()
    }

    /// 已保存的记录数
    pub async fn len(&self) -> usize {
        self.state.lock().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 取出全部记录
    pub fn into_records(self) -> Vec<ResultRecord> {
        self.state.into_inner().records
    }
}

/// 写入一行并刷盘
///
/// 写入中途失败时补一个换行，已写出的残缺片段单独成行，后续记录仍从新行开始。
async fn append_line<W>(writer: &mut W, line: &[u8]) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    match writer.write_all(line).await {
        Ok(()) => writer.flush().await,
        Err(e) => {
            if writer.write_all(b"\n").await.is_ok() {
                let _ = writer.flush().await;
            }
            Err(e)
        }
    }
}
