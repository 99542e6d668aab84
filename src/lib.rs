//! # Exam Ingest
//!
//! 把医检师考古题 PDF（题目卷、答案卷、更正备注）结构化为
//! 可入库检索的题目记录的 Rust 应用程序
//!
//! ## 架构设计
//!
//! 本系统采用严格的四层架构：
//!
//! ### ① 基础设施层（Infrastructure）
//! - `infrastructure/` - 持有稀缺资源（PDFium 绑定），只暴露能力
//! - `PdfExtractor` - 唯一的 PDFium owner，提供 extract_pages() 能力
//!
//! ### ② 业务能力层（Services）
//! - `services/` - 描述"我能做什么"，每个服务只管一件事
//! - `BlockExtractor` - 文本段 → 带类型块
//! - `Segmenter` - 块 → 候选题目
//! - `MetadataResolver` - 目录/卷头 → 元数据
//! - `AnswerMatcher` - 候选 × 答案条目 × 更正的两阶段连接
//! - `image_associator` - 图片按页面位置归属候选
//! - `AssistService` - 疑难题升级 LLM 判定
//! - `IssueWriter` - 写 issues.txt 能力
//!
//! ### ③ 流程层（Workflow）
//! - `workflow/` - 定义"一个候选"的完整校验流程
//! - `TripleCtx` - 上下文封装（科目 + 年份期次 + 三份 PDF）
//! - `CandidateFlow` - 状态机编排（校验 → AI 辅助 → 输出）
//!
//! ### ④ 编排层（Orchestration）
//! - `orchestrator/batch_processor` - 目录扫描、分批并发、全局统计
//! - `orchestrator/triple_processor` - 单个三元组端到端处理
//!
//! ## 模块结构

pub mod clients;
pub mod config;
pub mod error;
pub mod infrastructure;

pub mod models;
pub mod orchestrator;
pub mod services;
pub mod utils;
pub mod workflow;

// 重新导出常用类型
pub use config::Config;
pub use error::{AppError, AppResult};
pub use infrastructure::PdfExtractor;
pub use models::{
    Block, BlockKind, Confidence, ExamMetadata, IssueKind, IssueReport, PageContent,
    QuestionCandidate, StructuredQuestion,
};
pub use orchestrator::{structure_documents, App, StructuredTriple};
pub use workflow::{CandidateFlow, TripleCtx};
