//! 编排层（Orchestration Layer）
//!
//! ## 职责
//!
//! 本层负责批量调度与单个三元组的端到端处理，是整个系统的"指挥中心"。
//!
//! ## 模块划分
//!
//! ### `batch_processor` - 批量三元组处理器
//! - 扫描考古题目录，发现三元组
//! - 控制并发数量（Semaphore）
//! - 分批调度，输出全局统计信息
//!
//! ### `triple_processor` - 单个三元组处理器
//! - 调用 PDF 提取协作方（阻塞线程）
//! - 驱动结构化核心（分块 → 分段 → 元数据 → 配对 → 图片 → 校验）
//! - 落盘 JSON / 图片 / 问题清单，按需持久化
//!
//! ## 层次关系
//!
//! ```text
//! batch_processor (处理 Vec<TripleCtx>)
//!     ↓
//! triple_processor (处理一个三元组)
//!     ↓
//! workflow::CandidateFlow (处理单个候选题目)
//!     ↓
//! services (能力层：分块 / 分段 / 配对 / 归属 / AI 辅助)
//!     ↓
//! infrastructure (基础设施：PdfExtractor)
//! ```
//!
//! ## 设计原则
//!
//! 1. **单一职责**：batch_processor 管批量，triple_processor 管单个
//! 2. **资源隔离**：PDFium 实例只在三元组任务内部创建
//! 3. **向下依赖**：编排层 → workflow → services → infrastructure
//! 4. **无业务逻辑**：只做调度、落盘和统计，不做解析判断

pub mod batch_processor;
pub mod triple_processor;

pub use batch_processor::{App, RunStats};
pub use triple_processor::{process_triple, structure_documents, StructuredTriple, TripleStats};
