//! 编排层（Orchestration Layer）
//!
//! ## 职责
//!
//! 本层负责批量处理和并发调度，是整个系统的"指挥中心"。
//!
//! ## 层次关系
//!
//! ```text
//! orchestrator::Pipeline (处理 Vec<Task>)
//!     ↓
//! workflow::TaskFlow (处理单个 Task)
//!     ↓
//! services (能力层：prompt / rate limit / extraction / rules / sink)
//!     ↓
//! clients (模型调用)
//! ```
//!
//! ## 设计原则
//!
//! 1. **资源隔离**：只有编排层持有模型客户端和限速器
//! 2. **向下依赖**：编排层 → workflow → services → clients
//! 3. **无业务逻辑**：只做调度和汇总，不做具体业务判断

pub mod pipeline;

pub use pipeline::Pipeline;
