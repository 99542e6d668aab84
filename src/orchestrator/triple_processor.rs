//! 单个三元组处理器 - 编排层
//!
//! ## 职责
//!
//! 把一组（题目卷、答案卷、更正备注）从逐页原始数据走完
//! 整条流水线：分块 → 分段 → 元数据 → 答案配对 → 图片归属 →
//! 逐题校验，再把结构化结果写到输出目录并（可选地）持久化。
//!
//! 纯粹的结构化核心 `structure_documents` 不碰文件系统与网络，
//! 方便在测试里直接驱动。

use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::Path;

use anyhow::{Context, Result};
use serde_json::json;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::infrastructure::PdfExtractor;
use crate::models::{
    ExamMetadata, ImageAsset, IssueKind, IssueReport, PageContent, StructuredQuestion,
};
use crate::services::answer_matcher::{AnswerMatcher, MatchOutcome};
use crate::services::assist_service::{AssistResolver, AssistService};
use crate::services::{image_associator, BlockExtractor, IssueWriter, MetadataResolver, Segmenter};
use crate::workflow::{CandidateFlow, TripleCtx};

/// 一个三元组的结构化产物
#[derive(Debug)]
pub struct StructuredTriple {
    pub metadata: ExamMetadata,
    pub questions: Vec<StructuredQuestion>,
    pub assets: Vec<ImageAsset>,
    pub report: IssueReport,
}

/// 单个三元组的处理统计
#[derive(Debug, Default)]
pub struct TripleStats {
    pub questions_total: usize,
    pub questions_resolved: usize,
    pub questions_flagged: usize,
    pub issues: usize,
}

/// 结构化核心：逐页原始数据 → 结构化题目
///
/// 各文档的块序列彼此独立；问题清单按流水线阶段顺序合并。
pub async fn structure_documents<R: AssistResolver>(
    subject_folder: &str,
    year_period_folder: &str,
    question_doc_id: &str,
    question_pages: &[PageContent],
    answer_doc_id: &str,
    answer_pages: &[PageContent],
    note_texts: &[String],
    fuzzy_threshold: f64,
    assist: Option<&R>,
) -> StructuredTriple {
    let extractor = BlockExtractor::new();
    let matcher = AnswerMatcher::new(fuzzy_threshold);

    // ========== 分块 ==========
    let (question_blocks, mut report) = extractor.extract(question_doc_id, question_pages);
    let (answer_blocks, answer_report) = extractor.extract(answer_doc_id, answer_pages);
    report.merge(answer_report);

    // ========== 分段 ==========
    let (candidates, seg_report) = Segmenter::segment_all(question_doc_id, &question_blocks);
    report.merge(seg_report);

    // ========== 元数据 ==========
    let resolver = MetadataResolver::new();
    let (metadata, meta_report) =
        resolver.resolve(subject_folder, year_period_folder, &question_blocks);
    report.merge(meta_report);
    if let Some(expected) = metadata.question_count {
        if expected != candidates.len() {
            report.push(
                metadata.prefix(),
                IssueKind::QuestionCountMismatch,
                format!("卷头标注 {} 题，实际解析出 {} 题", expected, candidates.len()),
            );
        }
    }

    // ========== 答案收集与配对 ==========
    let (entries, entry_report) = matcher.collect_entries(answer_doc_id, &answer_blocks);
    report.merge(entry_report);

    // 更正来源：答案卷的备注块 + 独立的更正/备注文档
    let mut corrections = matcher.collect_corrections(&answer_blocks);
    for text in note_texts {
        corrections.extend(matcher.parse_correction_text(text));
    }

    let match_result = matcher.match_answers(&candidates, entries, &corrections);
    report.merge(match_result.report);

    // ========== 图片归属 ==========
    let assets = image_associator::collect_assets(question_doc_id, question_pages);
    let assignment = image_associator::associate(&question_blocks, &candidates);
    report.merge(assignment.report);
    let mut images_by_number: HashMap<u32, BTreeSet<String>> = HashMap::new();
    for (asset_id, number) in &assignment.by_asset {
        images_by_number
            .entry(*number)
            .or_default()
            .insert(asset_id.clone());
    }

    // ========== 逐题校验 ==========
    let mut counts: HashMap<u32, usize> = HashMap::new();
    for candidate in &candidates {
        *counts.entry(candidate.number).or_insert(0) += 1;
    }
    let duplicates: HashSet<u32> = counts
        .into_iter()
        .filter(|(_, c)| *c > 1)
        .map(|(n, _)| n)
        .collect();

    let flow = CandidateFlow::new(assist);
    let empty_outcome = MatchOutcome::default();
    let empty_images = BTreeSet::new();
    let mut questions = Vec::with_capacity(candidates.len());
    for candidate in &candidates {
        let outcome = match_result
            .outcomes
            .get(&candidate.number)
            .unwrap_or(&empty_outcome);
        let image_ids = images_by_number
            .get(&candidate.number)
            .unwrap_or(&empty_images);
        let (question, candidate_report) = flow
            .run(candidate, outcome, &metadata, image_ids, &duplicates)
            .await;
        questions.push(question);
        report.merge(candidate_report);
    }

    StructuredTriple {
        metadata,
        questions,
        assets,
        report,
    }
}

/// 处理单个三元组：提取、结构化、落盘、持久化
///
/// # 返回
/// 成功时返回统计；题目卷/答案卷提取失败时返回错误（中止本三元组，
/// 不影响其他三元组）。
pub async fn process_triple(ctx: &TripleCtx, config: &Config) -> Result<TripleStats> {
    log_triple_start(ctx);

    // ========== PDF 提取（阻塞线程，单次尝试） ==========
    let question_pages = extract_on_worker(ctx.question_pdf.clone()).await?;
    let answer_pages = extract_on_worker(ctx.answer_pdf.clone()).await?;

    // 备注文档可选：提取失败降级为问题记录，不中止三元组
    let mut note_texts = Vec::new();
    let mut note_report = IssueReport::new();
    for note_pdf in &ctx.note_pdfs {
        match extract_on_worker(note_pdf.clone()).await {
            Ok(pages) => {
                let text = pages
                    .iter()
                    .map(PageContent::plain_text)
                    .collect::<Vec<_>>()
                    .join("\n");
                note_texts.push(text);
            }
            Err(e) => {
                warn!("{} 备注文档提取失败: {}", ctx, e);
                note_report.push(
                    note_pdf.display().to_string(),
                    IssueKind::NoteExtractionFailed,
                    e.to_string(),
                );
            }
        }
    }

    // ========== 结构化 ==========
    let assist_service;
    let assist: Option<&AssistService> = if config.assist_enabled {
        assist_service = AssistService::new(config);
        Some(&assist_service)
    } else {
        None
    };

    let mut triple = structure_documents(
        &ctx.subject_folder,
        &ctx.year_period_folder,
        &ctx.question_doc_id(),
        &question_pages,
        &ctx.answer_doc_id(),
        &answer_pages,
        &note_texts,
        config.fuzzy_match_threshold,
        assist,
    )
    .await;
    triple.report.merge(note_report);

    // ========== 落盘 ==========
    write_outputs(ctx, config, &triple, &question_pages, &answer_pages)?;

    // ========== 持久化（可选） ==========
    if config.store_enabled {
        persist_triple(ctx, config, &triple).await?;
    }

    // 详细日志（如果启用）：逐条打印问题清单
    if config.verbose_logging {
        for issue in triple.report.iter() {
            info!("{} {}", ctx, issue);
        }
    }

    let stats = TripleStats {
        questions_total: triple.questions.len(),
        questions_resolved: triple
            .questions
            .iter()
            .filter(|q| q.correct_answer.is_some())
            .count(),
        questions_flagged: triple
            .questions
            .iter()
            .filter(|q| q.confidence == crate::models::Confidence::Flagged)
            .count(),
        issues: triple.report.len(),
    };
    log_triple_complete(ctx, &stats);
    Ok(stats)
}

/// 在阻塞线程上跑 PDFium
async fn extract_on_worker(path: std::path::PathBuf) -> Result<Vec<PageContent>> {
    let display = path.display().to_string();
    tokio::task::spawn_blocking(move || {
        let extractor = PdfExtractor::new()?;
        extractor.extract_pages(&path)
    })
    .await
    .with_context(|| format!("提取任务被中断: {}", display))?
    .with_context(|| format!("提取失败: {}", display))
}

/// 写出结构化 JSON、原始文本侧写与图片文件
fn write_outputs(
    ctx: &TripleCtx,
    config: &Config,
    triple: &StructuredTriple,
    question_pages: &[PageContent],
    answer_pages: &[PageContent],
) -> Result<()> {
    let prefix = triple.metadata.prefix();
    std::fs::create_dir_all(&config.output_dir)
        .with_context(|| format!("无法创建输出目录: {}", config.output_dir))?;

    // 结构化结果
    let parsed_path = format!("{}/{}_parsed.json", config.output_dir, prefix);
    let parsed = json!({
        "meta": triple.metadata,
        "questions": triple.questions,
        "issues": triple.report.iter().collect::<Vec<_>>(),
    });
    std::fs::write(&parsed_path, serde_json::to_string_pretty(&parsed)?)
        .with_context(|| format!("无法写入: {}", parsed_path))?;

    // 原始文本侧写
    let rawtext_path = format!("{}/{}_rawtext.json", config.output_dir, prefix);
    let rawtext = json!({
        "question_text_pages": question_pages.iter().map(PageContent::plain_text).collect::<Vec<_>>(),
        "answer_text_pages": answer_pages.iter().map(PageContent::plain_text).collect::<Vec<_>>(),
    });
    std::fs::write(&rawtext_path, serde_json::to_string_pretty(&rawtext)?)
        .with_context(|| format!("无法写入: {}", rawtext_path))?;

    // 图片文件（以 asset_id 命名）
    if !triple.assets.is_empty() {
        let images_dir = config.images_dir();
        std::fs::create_dir_all(&images_dir)
            .with_context(|| format!("无法创建图片目录: {}", images_dir))?;
        for asset in &triple.assets {
            let image_path = format!("{}/{}.png", images_dir, asset.asset_id);
            std::fs::write(&image_path, &asset.png_bytes)
                .with_context(|| format!("无法写入图片: {}", image_path))?;
        }
    }

    // 问题清单追加
    let issue_writer = IssueWriter::new(config.issue_file());
    issue_writer.append(&ctx.label(), &triple.report)?;

    info!(
        "{} 输出完成: {} ({} 题, {} 张图)",
        ctx,
        Path::new(&parsed_path)
            .file_name()
            .unwrap_or_default()
            .to_string_lossy(),
        triple.questions.len(),
        triple.assets.len()
    );
    Ok(())
}

/// 写入关系存储：父记录 → 题目 upsert → 问题清单
async fn persist_triple(ctx: &TripleCtx, config: &Config, triple: &StructuredTriple) -> Result<()> {
    let store = crate::clients::StoreClient::new(config);

    let subject_id = store
        .get_or_create_subject(&triple.metadata.subject_name)
        .await
        .with_context(|| format!("{} 获取/创建科目失败", ctx))?;
    let test_id = store
        .get_or_create_test(&triple.metadata, &subject_id)
        .await
        .with_context(|| format!("{} 获取/创建考卷失败", ctx))?;
    let chapter_id = match &triple.metadata.chapter {
        Some(title) => Some(
            store
                .get_or_create_chapter(title, &subject_id)
                .await
                .with_context(|| format!("{} 获取/创建章节失败", ctx))?,
        ),
        None => None,
    };

    let written = store
        .upsert_questions(&test_id, chapter_id.as_deref(), &triple.questions)
        .await
        .with_context(|| format!("{} 题目批量写入失败", ctx))?;
    info!("{} 已持久化 {} 题 (考卷 {})", ctx, written, test_id);

    if let Err(e) = store.insert_issues(&ctx.label(), &triple.report).await {
        // 问题清单已落盘，存储侧失败只告警
        error!("{} 问题清单写入存储失败: {}", ctx, e);
    }
    Ok(())
}

// ========== 日志辅助函数 ==========

fn log_triple_start(ctx: &TripleCtx) {
    info!("{} 开始处理", ctx);
    info!(
        "{} 题目卷: {} | 答案卷: {}",
        ctx,
        ctx.question_pdf.display(),
        ctx.answer_pdf.display()
    );
}

fn log_triple_complete(ctx: &TripleCtx, stats: &TripleStats) {
    info!(
        "{} ✅ 处理完成: 共 {} 题, 已判定 {}, 存疑 {}, 问题 {} 条",
        ctx, stats.questions_total, stats.questions_resolved, stats.questions_flagged, stats.issues
    );
}
