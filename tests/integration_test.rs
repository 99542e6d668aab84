//! 结构化核心的端到端测试
//!
//! 直接用合成的逐页数据驱动 `structure_documents`，
//! 不依赖 PDFium、网络与文件系统。

use exam_ingest::error::{AppError, AppResult, AssistError};
use exam_ingest::models::{BoundingBox, Confidence, IssueKind, PageContent, TextRun};
use exam_ingest::orchestrator::structure_documents;
use exam_ingest::services::assist_service::{AssistRequest, AssistResolver, AssistSuggestion};

/// 永不调用 AI 辅助的占位类型
struct NoAssist;
impl AssistResolver for NoAssist {
    async fn resolve(&self, _request: &AssistRequest) -> AppResult<AssistSuggestion> {
        unreachable!("测试中不应触发 AI 辅助");
    }
}

/// 模拟 AI 辅助超时的桩
struct TimeoutAssist;
impl AssistResolver for TimeoutAssist {
    async fn resolve(&self, _request: &AssistRequest) -> AppResult<AssistSuggestion> {
        Err(AppError::Assist(AssistError::Timeout {
            model: "stub".to_string(),
            timeout_secs: 30,
        }))
    }
}

/// 一行一段文本的合成页面，行距 20pt
fn page_of_lines(page_index: usize, lines: &[&str]) -> PageContent {
    let runs = lines
        .iter()
        .enumerate()
        .map(|(i, text)| {
            TextRun::new(
                *text,
                BoundingBox::new(50.0, 800.0 - i as f32 * 20.0, 300.0, 810.0 - i as f32 * 20.0),
            )
        })
        .collect();
    PageContent {
        page_index,
        width: 595.0,
        height: 842.0,
        runs,
        images: Vec::new(),
    }
}

#[tokio::test]
async fn heart_rate_scenario_resolves_high() {
    let question_pages = vec![page_of_lines(
        0,
        &[
            "12) What is the normal resting heart rate?",
            "a) 40-60",
            "b) 60-100",
            "c) 100-140",
        ],
    )];
    let answer_pages = vec![page_of_lines(0, &["12. B"])];

    let triple = structure_documents::<NoAssist>(
        "生物化學與臨床生化學",
        "111年_第二次",
        "題目卷",
        &question_pages,
        "答案卷",
        &answer_pages,
        &[],
        0.85,
        None,
    )
    .await;

    assert_eq!(triple.questions.len(), 1);
    let q = &triple.questions[0];
    assert_eq!(q.number, 12);
    assert_eq!(q.correct_answer.as_deref(), Some("B"));
    assert_eq!(q.confidence, Confidence::High);
    assert!(q.correction_text.is_none());
    assert_eq!(q.options.len(), 3);
    assert_eq!((triple.metadata.year, triple.metadata.period), (111, 2));
}

#[tokio::test]
async fn duplicate_answer_key_keeps_last_with_alternate_issue() {
    let question_pages = vec![page_of_lines(
        0,
        &["5. 下列何者正確？", "(A) 甲", "(B) 乙", "(C) 丙"],
    )];
    // 答案卷同一题号两行：「5. A」之后「5. C」（更正重印）
    let answer_pages = vec![page_of_lines(0, &["5. A", "5. C"])];

    let triple = structure_documents::<NoAssist>(
        "生化",
        "111年_第一次",
        "題目卷",
        &question_pages,
        "答案卷",
        &answer_pages,
        &[],
        0.85,
        None,
    )
    .await;

    let q = &triple.questions[0];
    assert_eq!(q.correct_answer.as_deref(), Some("C"));
    assert_eq!(triple.report.count_of(IssueKind::AlternateAnswerKey), 1);
}

#[tokio::test]
async fn exact_match_resolves_all_without_fuzzy() {
    let question_pages = vec![page_of_lines(
        0,
        &[
            "1. 第一題", "(A) 甲", "(B) 乙",
            "2. 第二題", "(A) 甲", "(B) 乙",
            "3. 第三題", "(A) 甲", "(B) 乙",
        ],
    )];
    let answer_pages = vec![page_of_lines(0, &["1. A", "2. B", "3. A"])];

    let triple = structure_documents::<NoAssist>(
        "生化",
        "111年_第一次",
        "題目卷",
        &question_pages,
        "答案卷",
        &answer_pages,
        &[],
        0.85,
        None,
    )
    .await;

    assert_eq!(triple.questions.len(), 3);
    assert!(triple
        .questions
        .iter()
        .all(|q| q.confidence == Confidence::High));
    assert_eq!(triple.report.count_of(IssueKind::FuzzyMatched), 0);
    assert_eq!(triple.report.count_of(IssueKind::OrphanCandidate), 0);
}

#[tokio::test]
async fn pipeline_is_idempotent_across_runs() {
    let question_pages = vec![page_of_lines(
        0,
        &["1. 第一題", "(A) 甲", "(B) 乙", "2. 第二題", "(A) 丙", "(B) 丁"],
    )];
    let answer_pages = vec![page_of_lines(0, &["1. A", "2. B"])];

    let mut ids_and_answers = Vec::new();
    for _ in 0..2 {
        let triple = structure_documents::<NoAssist>(
            "生化",
            "111年_第一次",
            "題目卷",
            &question_pages,
            "答案卷",
            &answer_pages,
            &[],
            0.85,
            None,
        )
        .await;
        ids_and_answers.push(
            triple
                .questions
                .iter()
                .map(|q| (q.question_id.clone(), q.correct_answer.clone()))
                .collect::<Vec<_>>(),
        );
    }
    assert_eq!(ids_and_answers[0], ids_and_answers[1]);
}

#[tokio::test]
async fn numbering_regression_emits_all_candidates_and_one_issue() {
    // 1,2,3,7,8 之后出现 4,5,6
    let lines: Vec<String> = [1u32, 2, 3, 7, 8, 4, 5, 6]
        .iter()
        .flat_map(|n| {
            vec![
                format!("{}. 第{}題", n, n),
                "(A) 甲".to_string(),
                "(B) 乙".to_string(),
            ]
        })
        .collect();
    let line_refs: Vec<&str> = lines.iter().map(String::as_str).collect();
    let question_pages = vec![page_of_lines(0, &line_refs)];
    let answer_lines: Vec<String> = (1..=8).map(|n| format!("{}. A", n)).collect();
    let answer_refs: Vec<&str> = answer_lines.iter().map(String::as_str).collect();
    let answer_pages = vec![page_of_lines(0, &answer_refs)];

    let triple = structure_documents::<NoAssist>(
        "生化",
        "111年_第一次",
        "題目卷",
        &question_pages,
        "答案卷",
        &answer_pages,
        &[],
        0.85,
        None,
    )
    .await;

    // 全部候选仍被产出
    assert_eq!(triple.questions.len(), 8);
    // 回退恰好记录一次
    assert_eq!(triple.report.count_of(IssueKind::NumberingRegression), 1);
}

#[tokio::test]
async fn assist_timeout_keeps_flagged_and_run_continues() {
    // 题目有两题，其中第 2 题没有答案
    let question_pages = vec![page_of_lines(
        0,
        &["1. 第一題", "(A) 甲", "(B) 乙", "2. 第二題", "(A) 丙", "(B) 丁"],
    )];
    let answer_pages = vec![page_of_lines(0, &["1. A"])];

    let stub = TimeoutAssist;
    let triple = structure_documents(
        "生化",
        "111年_第一次",
        "題目卷",
        &question_pages,
        "答案卷",
        &answer_pages,
        &[],
        0.85,
        Some(&stub),
    )
    .await;

    // 运行不中止：两题都输出
    assert_eq!(triple.questions.len(), 2);
    let flagged = triple.questions.iter().find(|q| q.number == 2).unwrap();
    assert_eq!(flagged.confidence, Confidence::Flagged);
    assert!(flagged.correct_answer.is_none());
    assert_eq!(triple.report.count_of(IssueKind::AssistUnavailable), 1);
    // 第 1 题不受影响
    let ok = triple.questions.iter().find(|q| q.number == 1).unwrap();
    assert_eq!(ok.confidence, Confidence::High);
}

#[tokio::test]
async fn correction_note_document_overrides_answer() {
    let question_pages = vec![page_of_lines(
        0,
        &["12. 下列何者正確？", "(A) 甲", "(B) 乙", "(C) 丙"],
    )];
    let answer_pages = vec![page_of_lines(0, &["12. A"])];
    let note_texts = vec!["備註：第12題答案更正為Ｂ，原公布答案有誤。".to_string()];

    let triple = structure_documents::<NoAssist>(
        "生化",
        "111年_第一次",
        "題目卷",
        &question_pages,
        "答案卷",
        &answer_pages,
        &note_texts,
        0.85,
        None,
    )
    .await;

    let q = &triple.questions[0];
    assert_eq!(q.correct_answer.as_deref(), Some("B"));
    assert!(q.correction_text.is_some());
    assert_eq!(triple.report.count_of(IssueKind::AnswerOverridden), 1);
}
