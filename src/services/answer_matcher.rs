//! 答案配对服务 - 业务能力层
//!
//! 三个职责：
//! 1. 从答案卷块序列收集 `AnswerEntry`（同号多键保留最后一个并留痕）；
//! 2. 从备注/更正块解析更正语法（更正為Ｘ、送分、多题合并写法）；
//! 3. 两阶段配对：先按题号精确连接，再对双方残集做相似度配对。
//!
//! 明确的两遍式连接，而不是在一堆旗标上做嵌套分支。

use crate::models::{
    AnswerEntry, Block, BlockKind, IssueKind, IssueReport, QuestionCandidate,
};
use regex::Regex;
use std::collections::HashMap;
use tracing::{debug, info};

/// 一条更正说明
#[derive(Debug, Clone)]
pub struct Correction {
    pub number: u32,
    /// 明确给出的新答案（「更正為Ｂ」「應為Ｃ」），无则仅附注文字
    pub new_answer: Option<String>,
    pub note: String,
}

/// 单个候选题目的配对结果
#[derive(Debug, Clone, Default)]
pub struct MatchOutcome {
    /// 主答案（同号多键时为最后出现者）
    pub answer: Option<String>,
    /// 其余被顶掉的答案键
    pub alternates: Vec<String>,
    /// 更正附注
    pub correction_text: Option<String>,
    /// 是否经由模糊配对得到
    pub fuzzy: bool,
}

/// 配对总结果
#[derive(Debug, Default)]
pub struct MatchResult {
    /// 题号 → 配对结果
    pub outcomes: HashMap<u32, MatchOutcome>,
    /// 始终保留的孤儿答案条目
    pub orphan_entries: Vec<AnswerEntry>,
    pub report: IssueReport,
}

/// 答案配对服务
pub struct AnswerMatcher {
    correction_re: Regex,
    full_credit_re: Regex,
    multi_number_re: Regex,
    free_note_re: Regex,
    digits_re: Regex,
    fuzzy_threshold: f64,
}

impl AnswerMatcher {
    pub fn new(fuzzy_threshold: f64) -> Self {
        Self {
            // 「第12題答案更正為Ｂ」「第12題應為Ｂ」「Q12 corrected to B」
            correction_re: Regex::new(
                r"(?:第|(?i:Q))\s*(\d{1,3})\s*題?[^。；;]*?(?:更正為|更正为|應為|应为|(?i:corrected to|updated to))\s*([A-EＡ-Ｅ#＃])",
            )
            .expect("correction_re"),
            // 「第7題送分」「第7題均給分」
            full_credit_re: Regex::new(r"第\s*(\d{1,3})\s*題[^。；;]*?(送分|均給分|皆給分|一律給分)")
                .expect("full_credit_re"),
            // 多题合并：「第3、5題」「第3及5題」
            multi_number_re: Regex::new(
                r"第\s*(\d{1,3}(?:\s*[、,，及和與]\s*\d{1,3})+)\s*題[^。；;]*?(送分|均給分|皆給分|(?:更正為|應為)\s*([A-EＡ-Ｅ#＃]))",
            )
            .expect("multi_number_re"),
            // 其余针对单题的自由备注：「第9題題目敘述不全…」
            free_note_re: Regex::new(r"第\s*(\d{1,3})\s*題([^。；;]+)").expect("free_note_re"),
            digits_re: Regex::new(r"\d+").expect("digits_re"),
            fuzzy_threshold,
        }
    }

    // ========== 答案条目收集 ==========

    /// 从答案卷块序列收集答案条目
    ///
    /// 同一题号出现多个答案键（重印更正卷很常见）保留最后一个，
    /// 其余记入问题清单。
    pub fn collect_entries(
        &self,
        source_document_id: &str,
        blocks: &[Block],
    ) -> (Vec<AnswerEntry>, IssueReport) {
        let mut report = IssueReport::new();
        let mut by_number: HashMap<u32, AnswerEntry> = HashMap::new();
        let mut order: Vec<u32> = Vec::new();

        for block in blocks {
            if block.kind != BlockKind::AnswerKey {
                continue;
            }
            let (Some(number), Some(key)) = (block.number, block.label.as_ref()) else {
                continue;
            };
            // 条目周边文字留作模糊配对的上下文
            let context = context_around(blocks, block.order_index);
            let entry = AnswerEntry {
                number,
                correct_option_or_text: key.clone(),
                correction_text: None,
                context_text: context,
                source_document_id: source_document_id.to_string(),
            };
            match by_number.insert(number, entry) {
                Some(previous) => {
                    report.push(
                        format!("#{}", number),
                        IssueKind::AlternateAnswerKey,
                        format!(
                            "题号 {} 出现多个答案键，保留最后的「{}」，弃用「{}」",
                            number, key, previous.correct_option_or_text
                        ),
                    );
                }
                None => order.push(number),
            }
        }

        let entries = order
            .into_iter()
            .filter_map(|n| by_number.remove(&n))
            .collect();
        (entries, report)
    }

    // ========== 更正语法解析 ==========

    /// 从备注/更正块解析更正说明
    pub fn collect_corrections(&self, blocks: &[Block]) -> Vec<Correction> {
        let note_text = blocks
            .iter()
            .filter(|b| b.kind == BlockKind::NoteText)
            .map(|b| b.raw_text.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        if note_text.trim().is_empty() {
            return Vec::new();
        }
        self.parse_correction_text(&note_text)
    }

    /// 解析一段备注文字中的全部更正说明
    pub fn parse_correction_text(&self, note_text: &str) -> Vec<Correction> {
        let mut corrections: Vec<Correction> = Vec::new();
        let mut push = |c: Correction| {
            // 同一题号以先出现的明确更正为准，自由备注不覆盖
            match corrections.iter_mut().find(|e| e.number == c.number) {
                Some(existing) => {
                    if existing.new_answer.is_none() && c.new_answer.is_some() {
                        *existing = c;
                    }
                }
                None => corrections.push(c),
            }
        };

        // 多题合并写法优先解析，避免被单题模式拆散
        for caps in self.multi_number_re.captures_iter(note_text) {
            let numbers: Vec<u32> = self
                .digits_re
                .find_iter(&caps[1])
                .filter_map(|m| m.as_str().parse().ok())
                .collect();
            let new_answer = caps.get(3).map(|m| normalize_key(m.as_str()));
            let note = if let Some(ans) = &new_answer {
                format!("答案更正為 {}", ans)
            } else {
                caps[2].to_string()
            };
            let text_answer = if new_answer.is_none() {
                Some(caps[2].to_string())
            } else {
                new_answer.clone()
            };
            for number in numbers {
                push(Correction {
                    number,
                    new_answer: text_answer.clone(),
                    note: note.clone(),
                });
            }
        }

        for caps in self.correction_re.captures_iter(note_text) {
            if let Ok(number) = caps[1].parse() {
                let key = normalize_key(&caps[2]);
                push(Correction {
                    number,
                    new_answer: Some(key.clone()),
                    note: format!("答案更正為 {}", key),
                });
            }
        }

        for caps in self.full_credit_re.captures_iter(note_text) {
            if let Ok(number) = caps[1].parse() {
                push(Correction {
                    number,
                    new_answer: Some("送分".to_string()),
                    note: "送分".to_string(),
                });
            }
        }

        for caps in self.free_note_re.captures_iter(note_text) {
            if let Ok(number) = caps[1].parse() {
                push(Correction {
                    number,
                    new_answer: None,
                    note: caps[2].trim().to_string(),
                });
            }
        }

        corrections
    }

    // ========== 两阶段配对 ==========

    /// 候选题目 × 答案条目 × 更正说明 的连接
    pub fn match_answers(
        &self,
        candidates: &[QuestionCandidate],
        entries: Vec<AnswerEntry>,
        corrections: &[Correction],
    ) -> MatchResult {
        let mut result = MatchResult::default();

        // 第一遍：按题号精确连接，绝大多数条目在这里完成
        let mut by_number: HashMap<u32, AnswerEntry> = HashMap::new();
        for entry in entries {
            by_number.insert(entry.number, entry);
        }
        let mut unmatched_candidates: Vec<&QuestionCandidate> = Vec::new();
        for candidate in candidates {
            match by_number.remove(&candidate.number) {
                Some(entry) => {
                    result.outcomes.insert(
                        candidate.number,
                        MatchOutcome {
                            answer: Some(entry.correct_option_or_text),
                            ..Default::default()
                        },
                    );
                }
                None => unmatched_candidates.push(candidate),
            }
        }
        let mut residual_entries: Vec<AnswerEntry> = by_number.into_values().collect();
        residual_entries.sort_by_key(|e| e.number);

        debug!(
            "精确配对完成: {} 题命中, {} 题待模糊配对, {} 条残余答案",
            result.outcomes.len(),
            unmatched_candidates.len(),
            residual_entries.len()
        );

        // 第二遍：对双方残集做相似度配对
        for candidate in unmatched_candidates {
            let stem = candidate.stem_text();
            let mut best: Option<(usize, f64)> = None;
            for (idx, entry) in residual_entries.iter().enumerate() {
                let Some(context) = &entry.context_text else {
                    continue;
                };
                let score = strsim::normalized_levenshtein(&stem, context);
                if score >= self.fuzzy_threshold
                    && best.map(|(_, s)| score > s).unwrap_or(true)
                {
                    best = Some((idx, score));
                }
            }
            match best {
                Some((idx, score)) => {
                    let entry = residual_entries.remove(idx);
                    info!(
                        "题 {} 与答案条目 {} 通过相似度 {:.2} 配对",
                        candidate.number, entry.number, score
                    );
                    result.report.push(
                        format!("#{}", candidate.number),
                        IssueKind::FuzzyMatched,
                        format!(
                            "与答案条目 {} 按题干相似度 {:.2} 配对",
                            entry.number, score
                        ),
                    );
                    result.outcomes.insert(
                        candidate.number,
                        MatchOutcome {
                            answer: Some(entry.correct_option_or_text),
                            fuzzy: true,
                            ..Default::default()
                        },
                    );
                }
                None => {
                    result.report.push(
                        format!("#{}", candidate.number),
                        IssueKind::OrphanCandidate,
                        "答案卷中没有对应条目",
                    );
                    result
                        .outcomes
                        .insert(candidate.number, MatchOutcome::default());
                }
            }
        }

        // 残余答案保留为孤儿，绝不丢弃
        for entry in residual_entries {
            result.report.push(
                format!("#{}", entry.number),
                IssueKind::OrphanAnswer,
                format!(
                    "答案「{}」找不到对应题目",
                    entry.correct_option_or_text
                ),
            );
            result.orphan_entries.push(entry);
        }

        // 更正说明就地修补已配对结果
        for correction in corrections {
            let Some(outcome) = result.outcomes.get_mut(&correction.number) else {
                result.report.push(
                    format!("#{}", correction.number),
                    IssueKind::OrphanAnswer,
                    format!("更正说明指向不存在的题目: {}", correction.note),
                );
                continue;
            };
            if let Some(new_answer) = &correction.new_answer {
                let old = outcome.answer.take();
                if old.as_deref() != Some(new_answer.as_str()) {
                    result.report.push(
                        format!("#{}", correction.number),
                        IssueKind::AnswerOverridden,
                        format!(
                            "答案由「{}」更正为「{}」",
                            old.as_deref().unwrap_or("無"),
                            new_answer
                        ),
                    );
                    if let Some(old) = old {
                        outcome.alternates.push(old);
                    }
                }
                outcome.answer = Some(new_answer.clone());
            }
            let appended = match outcome.correction_text.take() {
                Some(existing) => format!("{}；{}", existing, correction.note),
                None => correction.note.clone(),
            };
            outcome.correction_text = Some(appended);
        }

        result
    }
}

impl Default for AnswerMatcher {
    fn default() -> Self {
        Self::new(0.85)
    }
}

/// 答案键块前后的文字（供模糊配对）
fn context_around(blocks: &[Block], order_index: usize) -> Option<String> {
    let mut parts = Vec::new();
    for block in blocks {
        if block.kind == BlockKind::AnswerKey {
            continue;
        }
        if block.order_index + 1 == order_index || block.order_index == order_index + 1 {
            let trimmed = block.raw_text.trim();
            if !trimmed.is_empty() {
                parts.push(trimmed.to_string());
            }
        }
    }
    if parts.is_empty() {
        None
    } else {
        Some(parts.join(" "))
    }
}

fn normalize_key(s: &str) -> String {
    s.trim()
        .chars()
        .map(|c| match c {
            'Ａ'..='Ｚ' => char::from_u32(c as u32 - 'Ａ' as u32 + 'A' as u32).unwrap_or(c),
            '＃' => '#',
            other => other,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Block;

    fn key_block(order: usize, number: u32, key: &str) -> Block {
        Block::new(BlockKind::AnswerKey, 0, order, format!("{}. {}", number, key))
            .with_number(number)
            .with_label(key)
    }

    fn candidate(number: u32, stem: &str) -> QuestionCandidate {
        QuestionCandidate {
            number,
            stem_blocks: vec![Block::new(BlockKind::Stem, 0, number as usize, stem)
                .with_number(number)],
            option_blocks: Vec::new(),
            source_document_id: "題目卷".to_string(),
        }
    }

    #[test]
    fn exact_match_resolves_everything_without_fuzzy() {
        let matcher = AnswerMatcher::default();
        let candidates: Vec<_> = (1..=5).map(|n| candidate(n, "題幹")).collect();
        let blocks: Vec<_> = (1..=5)
            .enumerate()
            .map(|(i, n)| key_block(i, n, "A"))
            .collect();
        let (entries, report) = matcher.collect_entries("答案卷", &blocks);
        assert!(report.is_empty());

        let result = matcher.match_answers(&candidates, entries, &[]);
        assert_eq!(result.outcomes.len(), 5);
        assert!(result.outcomes.values().all(|o| !o.fuzzy));
        assert!(result.outcomes.values().all(|o| o.answer.as_deref() == Some("A")));
        assert!(result.orphan_entries.is_empty());
        assert!(result.report.is_empty());
    }

    #[test]
    fn duplicate_key_keeps_last_and_records_alternate() {
        let matcher = AnswerMatcher::default();
        // "5. A" 之后又出现 "5. C"（更正重印）
        let blocks = vec![key_block(0, 5, "A"), key_block(1, 5, "C")];
        let (entries, report) = matcher.collect_entries("答案卷", &blocks);

        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].correct_option_or_text, "C");
        assert_eq!(report.count_of(IssueKind::AlternateAnswerKey), 1);
    }

    #[test]
    fn orphans_are_retained_and_reported() {
        let matcher = AnswerMatcher::default();
        let candidates = vec![candidate(1, "有答案"), candidate(2, "沒答案")];
        let blocks = vec![key_block(0, 1, "B"), key_block(1, 9, "D")];
        let (entries, _) = matcher.collect_entries("答案卷", &blocks);

        let result = matcher.match_answers(&candidates, entries, &[]);
        assert_eq!(result.outcomes[&1].answer.as_deref(), Some("B"));
        assert!(result.outcomes[&2].answer.is_none());
        assert_eq!(result.orphan_entries.len(), 1);
        assert_eq!(result.orphan_entries[0].number, 9);
        assert_eq!(result.report.count_of(IssueKind::OrphanCandidate), 1);
        assert_eq!(result.report.count_of(IssueKind::OrphanAnswer), 1);
    }

    #[test]
    fn correction_overrides_answer_with_trace() {
        let matcher = AnswerMatcher::default();
        let candidates = vec![candidate(12, "題幹")];
        let (entries, _) =
            matcher.collect_entries("答案卷", &[key_block(0, 12, "A")]);
        let corrections =
            matcher.parse_correction_text("備註：第12題答案更正為Ｂ，原公布答案有誤。");

        let result = matcher.match_answers(&candidates, entries, &corrections);
        let outcome = &result.outcomes[&12];
        assert_eq!(outcome.answer.as_deref(), Some("B"));
        assert_eq!(outcome.alternates, vec!["A".to_string()]);
        assert!(outcome.correction_text.is_some());
        assert_eq!(result.report.count_of(IssueKind::AnswerOverridden), 1);
    }

    #[test]
    fn full_credit_and_multi_number_corrections() {
        let matcher = AnswerMatcher::default();
        let corrections =
            matcher.parse_correction_text("第7題送分。第3、5題均給分。第9題題目敘述不全。");

        let seven = corrections.iter().find(|c| c.number == 7).unwrap();
        assert_eq!(seven.new_answer.as_deref(), Some("送分"));
        for n in [3, 5] {
            let c = corrections.iter().find(|c| c.number == n).unwrap();
            assert_eq!(c.new_answer.as_deref(), Some("均給分"));
        }
        let nine = corrections.iter().find(|c| c.number == 9).unwrap();
        assert!(nine.new_answer.is_none());
        assert!(nine.note.contains("敘述不全"));
    }

    #[test]
    fn fuzzy_pass_only_touches_residual_sets() {
        let matcher = AnswerMatcher::new(0.5);
        // 题号错位：题目卷是 3，答案卷写成 30，但上下文含题干
        let candidates = vec![candidate(3, "下列何者為肝醣合成的限速酶")];
        let blocks = vec![
            Block::new(BlockKind::NoteText, 0, 0, "下列何者為肝醣合成的限速酶"),
            key_block(1, 30, "D"),
        ];
        let (entries, _) = matcher.collect_entries("答案卷", &blocks);

        let result = matcher.match_answers(&candidates, entries, &[]);
        let outcome = &result.outcomes[&3];
        assert_eq!(outcome.answer.as_deref(), Some("D"));
        assert!(outcome.fuzzy);
        assert_eq!(result.report.count_of(IssueKind::FuzzyMatched), 1);
    }

    #[test]
    fn correction_for_unknown_question_is_reported() {
        let matcher = AnswerMatcher::default();
        let corrections = matcher.parse_correction_text("第99題答案更正為Ａ。");
        let result = matcher.match_answers(&[], Vec::new(), &corrections);
        assert_eq!(result.report.count_of(IssueKind::OrphanAnswer), 1);
    }
}
