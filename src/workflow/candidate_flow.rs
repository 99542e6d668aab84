//! 候选校验流程 - 流程层
//!
//! 核心职责：定义"一个候选题目"从 Pending 走到 Resolved 或 Flagged
//! 的完整流程。
//!
//! 流程顺序：
//! 1. 完整性校验（题干、唯一答案、题号唯一、选项数）
//! 2. 通过 → Resolved（confidence High）
//! 3. 不通过 → 可选地升级 AI 辅助，采纳则 Resolved（confidence
//!    Resolved，永远不是 High），辅助失败或无法判断 → Flagged
//! 4. Flagged 的候选照常输出（宁可不完整，不可丢题）

use std::collections::{BTreeSet, HashSet};

use crate::models::{
    question_fingerprint, BlockKind, Confidence, ExamMetadata, IssueKind, IssueReport,
    QuestionCandidate, QuestionOption, StructuredQuestion,
};
use crate::services::answer_matcher::MatchOutcome;
use crate::services::assist_service::{AssistRequest, AssistResolver};
use tracing::{info, warn};

/// 校验状态机
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CandidateState {
    Pending,
    Resolved,
    Flagged,
}

/// 候选校验流程
///
/// - 不持有任何稀缺资源
/// - 只依赖业务能力（AI 辅助经由 `AssistResolver` 注入）
pub struct CandidateFlow<'a, R: AssistResolver> {
    assist: Option<&'a R>,
}

impl<'a, R: AssistResolver> CandidateFlow<'a, R> {
    pub fn new(assist: Option<&'a R>) -> Self {
        Self { assist }
    }

    /// 执行单个候选的校验流程
    ///
    /// # 参数
    /// - `candidate`: 分段器产出的候选
    /// - `outcome`: 答案配对结果
    /// - `metadata`: 试卷元数据
    /// - `image_ids`: 图片归属器分配给本题的资源 ID
    /// - `duplicate_numbers`: 本批次内重复出现的题号集合
    pub async fn run(
        &self,
        candidate: &QuestionCandidate,
        outcome: &MatchOutcome,
        metadata: &ExamMetadata,
        image_ids: &BTreeSet<String>,
        duplicate_numbers: &HashSet<u32>,
    ) -> (StructuredQuestion, IssueReport) {
        let mut report = IssueReport::new();
        let question_id = question_fingerprint(
            &metadata.subject_name,
            metadata.year,
            metadata.period,
            candidate.number,
        );
        let stem_text = candidate.stem_text();
        let options = build_options(candidate, image_ids);

        let mut state = CandidateState::Pending;

        // ========== 完整性校验 ==========
        if stem_text.is_empty() {
            report.push(&question_id, IssueKind::EmptyStem, "题干为空");
            state = CandidateState::Flagged;
        }
        if options.len() == 1 {
            report.push(
                &question_id,
                IssueKind::MalformedOptions,
                "只解析出 1 个选项（应为 0 或 ≥2）",
            );
            state = CandidateState::Flagged;
        }
        if duplicate_numbers.contains(&candidate.number) {
            report.push(
                &question_id,
                IssueKind::DuplicateNumber,
                format!(
                    "题号 {} 在 {} 年第 {} 次批次内重复",
                    candidate.number, metadata.year, metadata.period
                ),
            );
            state = CandidateState::Flagged;
        }
        let answer = match &outcome.answer {
            None => {
                report.push(
                    &question_id,
                    IssueKind::MatchAmbiguity,
                    "没有任何答案候选",
                );
                state = CandidateState::Flagged;
                None
            }
            // `#`：答案表格对位失败，等同于没有确定答案
            Some(key) if key == "#" => {
                report.push(
                    &question_id,
                    IssueKind::MatchAmbiguity,
                    "答案表格对位失败（#）",
                );
                state = CandidateState::Flagged;
                None
            }
            // 单字母答案必须落在已有选项标签内
            Some(key)
                if key.len() == 1
                    && !options.is_empty()
                    && !options.iter().any(|o| &o.label == key) =>
            {
                report.push(
                    &question_id,
                    IssueKind::MatchAmbiguity,
                    format!("答案「{}」不在选项标签之中", key),
                );
                state = CandidateState::Flagged;
                None
            }
            Some(key) => Some(key.clone()),
        };

        if state == CandidateState::Pending {
            state = CandidateState::Resolved;
        }

        // ========== 通过：机器确定 ==========
        if state == CandidateState::Resolved {
            let question = StructuredQuestion {
                question_id,
                subject: metadata.subject_name.clone(),
                year: metadata.year,
                period: metadata.period,
                chapter: metadata.chapter.clone(),
                number: candidate.number,
                stem_text,
                options,
                correct_answer: answer,
                explanation_text: None,
                correction_text: outcome.correction_text.clone(),
                image_ids: image_ids.clone(),
                confidence: Confidence::High,
                page_index: candidate.page_index(),
            };
            return (question, report);
        }

        // ========== 不通过：尝试升级 AI 辅助 ==========
        let mut confidence = Confidence::Flagged;
        let mut final_answer = None;
        let mut explanation = None;

        if let Some(assist) = self.assist {
            let request = AssistRequest {
                fingerprint: question_id.clone(),
                stem_text: stem_text.clone(),
                option_texts: options
                    .iter()
                    .map(|o| format!("({}) {}", o.label, o.text))
                    .collect(),
                candidate_answers: candidate_answers(outcome),
                raw_context: outcome
                    .correction_text
                    .clone()
                    .unwrap_or_else(|| "（无备注）".to_string()),
            };
            match assist.resolve(&request).await {
                Ok(suggestion) => match suggestion.suggested_answer {
                    Some(letter) => {
                        info!(
                            "题 {} 由 AI 辅助判定为 {}（依据: {}）",
                            candidate.number, letter, suggestion.confidence_note
                        );
                        // 辅助判定永远记录在案，可审计
                        report.push(
                            &question_id,
                            IssueKind::AssistResolved,
                            format!(
                                "AI 辅助判定答案为「{}」，依据: {}",
                                letter, suggestion.confidence_note
                            ),
                        );
                        final_answer = Some(letter);
                        explanation = Some(suggestion.confidence_note);
                        confidence = Confidence::Resolved;
                    }
                    None => {
                        report.push(
                            &question_id,
                            IssueKind::MatchAmbiguity,
                            format!("AI 辅助也无法判断: {}", suggestion.confidence_note),
                        );
                    }
                },
                Err(e) => {
                    warn!("题 {} AI 辅助不可用: {}", candidate.number, e);
                    report.push(
                        &question_id,
                        IssueKind::AssistUnavailable,
                        format!("AI 辅助超时或出错: {}", e),
                    );
                }
            }
        }

        let question = StructuredQuestion {
            question_id,
            subject: metadata.subject_name.clone(),
            year: metadata.year,
            period: metadata.period,
            chapter: metadata.chapter.clone(),
            number: candidate.number,
            stem_text,
            options,
            correct_answer: final_answer,
            explanation_text: explanation,
            correction_text: outcome.correction_text.clone(),
            image_ids: image_ids.clone(),
            confidence,
            page_index: candidate.page_index(),
        };
        (question, report)
    }
}

/// 从选项块构建选项列表；选项之间的图片引用归入其前的选项
fn build_options(
    candidate: &QuestionCandidate,
    assigned: &BTreeSet<String>,
) -> Vec<QuestionOption> {
    let mut options: Vec<QuestionOption> = Vec::new();
    for block in &candidate.option_blocks {
        match block.kind {
            BlockKind::Option => {
                options.push(QuestionOption {
                    label: block.label.clone().unwrap_or_default(),
                    text: block.raw_text.trim().to_string(),
                    image_ids: Vec::new(),
                });
            }
            BlockKind::ImageRef => {
                if let (Some(asset_id), Some(last)) = (&block.asset_id, options.last_mut()) {
                    if assigned.contains(asset_id) {
                        last.image_ids.push(asset_id.clone());
                    }
                }
            }
            _ => {}
        }
    }
    options
}

/// 把配对结果整理成互相矛盾的答案候选列表
fn candidate_answers(outcome: &MatchOutcome) -> Vec<String> {
    let mut answers = Vec::new();
    if let Some(a) = &outcome.answer {
        answers.push(a.clone());
    }
    answers.extend(outcome.alternates.iter().cloned());
    answers
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{AppError, AppResult, AssistError};
    use crate::models::Block;
    use crate::services::assist_service::AssistSuggestion;

    /// 永远超时的桩
    struct TimeoutStub;
    impl AssistResolver for TimeoutStub {
        async fn resolve(&self, _request: &AssistRequest) -> AppResult<AssistSuggestion> {
            Err(AppError::Assist(AssistError::Timeout {
                model: "stub".to_string(),
                timeout_secs: 30,
            }))
        }
    }

    /// 永远回答 B 的桩
    struct AnswerBStub;
    impl AssistResolver for AnswerBStub {
        async fn resolve(&self, _request: &AssistRequest) -> AppResult<AssistSuggestion> {
            Ok(AssistSuggestion {
                suggested_answer: Some("B".to_string()),
                confidence_note: "依据选项判断".to_string(),
            })
        }
    }

    fn meta() -> ExamMetadata {
        ExamMetadata {
            exam_name: None,
            subject_name: "生物化學與臨床生化學".to_string(),
            subject_code: Some("1105".to_string()),
            subject_type: None,
            year: 111,
            period: 2,
            question_count: None,
            chapter: None,
        }
    }

    fn candidate(number: u32, labels: &[&str]) -> QuestionCandidate {
        let stem = Block::new(BlockKind::Stem, 0, 0, "題幹文字").with_number(number);
        let option_blocks = labels
            .iter()
            .enumerate()
            .map(|(i, l)| Block::new(BlockKind::Option, 0, i + 1, "選項文字").with_label(*l))
            .collect();
        QuestionCandidate {
            number,
            stem_blocks: vec![stem],
            option_blocks,
            source_document_id: "題目卷".to_string(),
        }
    }

    fn matched(answer: &str) -> MatchOutcome {
        MatchOutcome {
            answer: Some(answer.to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn determinate_answer_resolves_high() {
        let flow: CandidateFlow<'_, TimeoutStub> = CandidateFlow::new(None);
        let (question, report) = flow
            .run(
                &candidate(12, &["A", "B", "C"]),
                &matched("B"),
                &meta(),
                &BTreeSet::new(),
                &HashSet::new(),
            )
            .await;

        assert_eq!(question.confidence, Confidence::High);
        assert_eq!(question.correct_answer.as_deref(), Some("B"));
        assert!(question.correction_text.is_none());
        assert!(report.is_empty());
    }

    #[tokio::test]
    async fn missing_answer_without_assist_stays_flagged() {
        let flow: CandidateFlow<'_, TimeoutStub> = CandidateFlow::new(None);
        let (question, report) = flow
            .run(
                &candidate(3, &["A", "B"]),
                &MatchOutcome::default(),
                &meta(),
                &BTreeSet::new(),
                &HashSet::new(),
            )
            .await;

        assert_eq!(question.confidence, Confidence::Flagged);
        assert!(question.correct_answer.is_none());
        assert_eq!(report.count_of(IssueKind::MatchAmbiguity), 1);
    }

    #[tokio::test]
    async fn assist_timeout_keeps_flagged_with_issue() {
        let stub = TimeoutStub;
        let flow = CandidateFlow::new(Some(&stub));
        let (question, report) = flow
            .run(
                &candidate(3, &["A", "B"]),
                &MatchOutcome::default(),
                &meta(),
                &BTreeSet::new(),
                &HashSet::new(),
            )
            .await;

        assert_eq!(question.confidence, Confidence::Flagged);
        assert!(question.correct_answer.is_none());
        assert_eq!(report.count_of(IssueKind::AssistUnavailable), 1);
    }

    #[tokio::test]
    async fn assist_resolution_is_never_high_and_always_audited() {
        let stub = AnswerBStub;
        let flow = CandidateFlow::new(Some(&stub));
        let (question, report) = flow
            .run(
                &candidate(3, &["A", "B"]),
                &MatchOutcome::default(),
                &meta(),
                &BTreeSet::new(),
                &HashSet::new(),
            )
            .await;

        assert_eq!(question.confidence, Confidence::Resolved);
        assert_eq!(question.correct_answer.as_deref(), Some("B"));
        // 原始缺答案的问题与辅助判定都留痕
        assert_eq!(report.count_of(IssueKind::MatchAmbiguity), 1);
        assert_eq!(report.count_of(IssueKind::AssistResolved), 1);
    }

    #[tokio::test]
    async fn answer_outside_option_labels_is_flagged() {
        let flow: CandidateFlow<'_, TimeoutStub> = CandidateFlow::new(None);
        let (question, report) = flow
            .run(
                &candidate(8, &["A", "B"]),
                &matched("E"),
                &meta(),
                &BTreeSet::new(),
                &HashSet::new(),
            )
            .await;

        assert_eq!(question.confidence, Confidence::Flagged);
        assert_eq!(report.count_of(IssueKind::MatchAmbiguity), 1);
    }

    #[tokio::test]
    async fn duplicate_number_is_flagged() {
        let flow: CandidateFlow<'_, TimeoutStub> = CandidateFlow::new(None);
        let duplicates: HashSet<u32> = [5].into_iter().collect();
        let (question, report) = flow
            .run(
                &candidate(5, &["A", "B"]),
                &matched("A"),
                &meta(),
                &BTreeSet::new(),
                &duplicates,
            )
            .await;

        assert_eq!(question.confidence, Confidence::Flagged);
        assert_eq!(report.count_of(IssueKind::DuplicateNumber), 1);
    }

    #[tokio::test]
    async fn full_credit_answer_is_accepted() {
        let flow: CandidateFlow<'_, TimeoutStub> = CandidateFlow::new(None);
        let (question, _) = flow
            .run(
                &candidate(7, &["A", "B"]),
                &matched("送分"),
                &meta(),
                &BTreeSet::new(),
                &HashSet::new(),
            )
            .await;

        // 「送分」是文字答案，不受选项标签约束
        assert_eq!(question.confidence, Confidence::High);
        assert_eq!(question.correct_answer.as_deref(), Some("送分"));
    }
}
