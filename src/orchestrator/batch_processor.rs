//! 批量三元组处理器 - 编排层
//!
//! ## 职责
//!
//! 本模块是整个应用的入口，负责三元组的发现、批量调度与资源管理。
//!
//! ## 核心功能
//!
//! 1. **目录扫描**：按 `exams/<科目>/<年份>_<期次>/` 约定找出三元组
//! 2. **并发控制**：使用 Semaphore 限制同时处理的三元组数量
//! 3. **分批处理**：每批完成后再开始下一批
//! 4. **全局统计**：汇总 {处理三元组数, 已判定题数, 存疑题数, 失败三元组数}
//!
//! 单个三元组失败只记入统计，绝不让整次运行中止。
//! 批与批之间可以安全取消：已完成三元组的落盘/持久化结果保持有效。

use crate::config::Config;
use crate::orchestrator::triple_processor;
use crate::workflow::TripleCtx;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

/// 应用主结构
pub struct App {
    config: Config,
}

/// 整次运行的统计
#[derive(Debug, Default)]
pub struct RunStats {
    pub triples_processed: usize,
    pub triples_failed: usize,
    pub triples_skipped: usize,
    pub questions_resolved: usize,
    pub questions_flagged: usize,
}

impl App {
    /// 初始化应用
    pub fn initialize(config: Config) -> Self {
        log_startup(&config);
        Self { config }
    }

    /// 运行应用主逻辑
    pub async fn run(&self) -> Result<RunStats> {
        let (triples, skipped) = self.scan_triples()?;

        if triples.is_empty() {
            warn!("⚠️ 没有找到可处理的三元组，程序结束");
            return Ok(RunStats {
                triples_skipped: skipped,
                ..Default::default()
            });
        }

        let total = triples.len();
        info!("✓ 找到 {} 组待处理的试卷", total);
        info!("📋 将以每批 {} 组的方式处理\n", self.config.max_concurrent_triples);

        let mut stats = self.process_all_triples(triples).await;
        stats.triples_skipped = skipped;

        print_final_stats(&stats);
        Ok(stats)
    }

    /// 扫描考古题目录，找出三元组
    ///
    /// 题目卷/答案卷按文件名中的「題目」「答案」（或 question/answer）
    /// 辨认；更正备注文档来自同目录的其余 PDF 与 notes_dir 同构目录。
    fn scan_triples(&self) -> Result<(Vec<TripleCtx>, usize)> {
        let exams_dir = Path::new(&self.config.exams_dir);
        if !exams_dir.exists() {
            anyhow::bail!("考古题目录不存在: {}", self.config.exams_dir);
        }
        info!("📁 正在扫描考古题目录: {}", self.config.exams_dir);

        let mut triples = Vec::new();
        let mut skipped = 0usize;

        for subject_entry in sorted_dirs(exams_dir)? {
            let subject_name = dir_name(&subject_entry);
            for period_entry in sorted_dirs(&subject_entry)? {
                let period_name = dir_name(&period_entry);

                let mut question_pdf: Option<PathBuf> = None;
                let mut answer_pdf: Option<PathBuf> = None;
                let mut note_pdfs: Vec<PathBuf> = Vec::new();

                for pdf in sorted_pdfs(&period_entry)? {
                    let name = pdf
                        .file_name()
                        .map(|s| s.to_string_lossy().to_lowercase())
                        .unwrap_or_default();
                    if name.contains("題目") || name.contains("题目") || name.contains("question")
                    {
                        if let Some(existing) = &question_pdf {
                            warn!(
                                "{}/{} 找到多份题目卷，使用先找到的 {}（忽略 {}）",
                                subject_name,
                                period_name,
                                existing.display(),
                                pdf.display()
                            );
                        } else {
                            question_pdf = Some(pdf);
                        }
                    } else if name.contains("答案") || name.contains("answer") {
                        if let Some(existing) = &answer_pdf {
                            warn!(
                                "{}/{} 找到多份答案卷，使用先找到的 {}（忽略 {}）",
                                subject_name,
                                period_name,
                                existing.display(),
                                pdf.display()
                            );
                        } else {
                            answer_pdf = Some(pdf);
                        }
                    } else if name.contains("更正") || name.contains("備註") || name.contains("备注")
                        || name.contains("note")
                    {
                        note_pdfs.push(pdf);
                    }
                }

                // notes_dir 下同科目同期次的全部 PDF 都算更正备注
                let external_notes = Path::new(&self.config.notes_dir)
                    .join(&subject_name)
                    .join(&period_name);
                if external_notes.is_dir() {
                    note_pdfs.extend(sorted_pdfs(&external_notes)?);
                }

                match (question_pdf, answer_pdf) {
                    (Some(question), Some(answer)) => {
                        triples.push(TripleCtx {
                            triple_index: triples.len() + 1,
                            subject_folder: subject_name.clone(),
                            year_period_folder: period_name.clone(),
                            question_pdf: question,
                            answer_pdf: answer,
                            note_pdfs,
                        });
                    }
                    (question, answer) => {
                        warn!(
                            "{}/{} 缺少{}{}，跳过",
                            subject_name,
                            period_name,
                            if question.is_none() { "题目卷" } else { "" },
                            if answer.is_none() { "答案卷" } else { "" },
                        );
                        skipped += 1;
                    }
                }
            }
        }

        Ok((triples, skipped))
    }

    /// 分批处理所有三元组
    async fn process_all_triples(&self, triples: Vec<TripleCtx>) -> RunStats {
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_triples));
        let total = triples.len();
        let mut stats = RunStats::default();
        let batch_size = self.config.max_concurrent_triples;
        let total_batches = (total + batch_size - 1) / batch_size;

        for (batch_num, batch) in triples.chunks(batch_size).enumerate() {
            log_batch_start(batch_num + 1, total_batches, batch.len());

            let mut handles = Vec::new();
            for ctx in batch {
                let permit = match semaphore.clone().acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => break,
                };
                let ctx = ctx.clone();
                let config = self.config.clone();
                handles.push(tokio::spawn(async move {
                    let _permit = permit;
                    let label = ctx.to_string();
                    match triple_processor::process_triple(&ctx, &config).await {
                        Ok(triple_stats) => Ok(triple_stats),
                        Err(e) => {
                            error!("{} ❌ 处理过程中发生错误: {:#}", label, e);
                            Err(e)
                        }
                    }
                }));
            }

            // 等待本批所有任务完成
            let mut batch_success = 0usize;
            for result in futures::future::join_all(handles).await {
                match result {
                    Ok(Ok(triple_stats)) => {
                        batch_success += 1;
                        stats.triples_processed += 1;
                        stats.questions_resolved += triple_stats.questions_resolved;
                        stats.questions_flagged += triple_stats.questions_flagged;
                    }
                    Ok(Err(_)) => {
                        stats.triples_failed += 1;
                    }
                    Err(e) => {
                        error!("任务执行失败: {}", e);
                        stats.triples_failed += 1;
                    }
                }
            }
            log_batch_complete(batch_num + 1, batch_success, batch.len());
        }

        stats
    }
}

fn sorted_dirs(parent: &Path) -> Result<Vec<PathBuf>> {
    let mut dirs: Vec<PathBuf> = std::fs::read_dir(parent)
        .with_context(|| format!("无法读取目录: {}", parent.display()))?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .collect();
    dirs.sort();
    Ok(dirs)
}

fn sorted_pdfs(parent: &Path) -> Result<Vec<PathBuf>> {
    let mut pdfs: Vec<PathBuf> = std::fs::read_dir(parent)
        .with_context(|| format!("无法读取目录: {}", parent.display()))?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.extension()
                .map(|ext| ext.to_string_lossy().eq_ignore_ascii_case("pdf"))
                .unwrap_or(false)
        })
        .collect();
    pdfs.sort();
    Ok(pdfs)
}

fn dir_name(path: &Path) -> String {
    path.file_name()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default()
}

// ========== 日志辅助函数 ==========

fn log_startup(config: &Config) {
    info!("{}", "=".repeat(60));
    info!("🚀 程序启动 - 考古题结构化流水线");
    info!("📊 最大并发三元组数: {}", config.max_concurrent_triples);
    info!(
        "🤖 AI 辅助: {} | 🗄️ 持久化: {}",
        if config.assist_enabled { "开" } else { "关" },
        if config.store_enabled { "开" } else { "关" }
    );
    info!("{}", "=".repeat(60));
}

fn log_batch_start(batch_num: usize, total_batches: usize, size: usize) {
    info!("\n{}", "=".repeat(60));
    info!("📦 开始处理第 {}/{} 批（{} 组）", batch_num, total_batches, size);
    info!("{}", "=".repeat(60));
}

fn log_batch_complete(batch_num: usize, success: usize, total: usize) {
    info!("\n{}", "─".repeat(60));
    info!("✓ 第 {} 批完成: 成功 {}/{}", batch_num, success, total);
    info!("{}", "─".repeat(60));
}

fn print_final_stats(stats: &RunStats) {
    info!("\n{}", "=".repeat(60));
    info!("📊 全部处理完成统计");
    info!(
        "完成时间: {}",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
    );
    info!("{}", "=".repeat(60));
    info!("✅ 三元组成功: {}", stats.triples_processed);
    info!("❌ 三元组失败: {} | 跳过: {}", stats.triples_failed, stats.triples_skipped);
    info!(
        "📝 题目: 已判定 {}, 存疑 {}",
        stats.questions_resolved, stats.questions_flagged
    );
    info!("{}", "=".repeat(60));
}
