//! 处理过程中的问题记录
//!
//! 可恢复的异常（编号回退、孤儿答案、AI 辅助失败等）全部进入
//! `IssueReport`，随结构化结果一起输出，绝不静默丢弃。

use serde::{Deserialize, Serialize};
use std::fmt;

/// 问题类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IssueKind {
    /// 无法归类的文本块
    UnclassifiedBlock,
    /// 题号回退（如 12 之后出现 7）
    NumberingRegression,
    /// 目录元数据与卷头元数据不一致
    MetadataMismatch,
    /// 卷头题数与实际解析题数不符
    QuestionCountMismatch,
    /// 同一题号出现多个答案键（保留最后一个）
    AlternateAnswerKey,
    /// 更正说明覆盖了原答案
    AnswerOverridden,
    /// 答案条目找不到对应题目
    OrphanAnswer,
    /// 题目找不到对应答案
    OrphanCandidate,
    /// 图片找不到归属题目
    OrphanImage,
    /// 通过模糊相似度完成的配对
    FuzzyMatched,
    /// 题干为空
    EmptyStem,
    /// 选项数量异常（1 个）
    MalformedOptions,
    /// 同一批次内题号重复
    DuplicateNumber,
    /// 答案候选为零个或多个，无法唯一判定
    MatchAmbiguity,
    /// AI 辅助给出的判定（可审计）
    AssistResolved,
    /// AI 辅助超时或出错
    AssistUnavailable,
    /// 备注文档解析失败（不中止三元组）
    NoteExtractionFailed,
    /// 持久化失败（单题粒度）
    PersistenceConflict,
}

impl fmt::Display for IssueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            IssueKind::UnclassifiedBlock => "无法归类",
            IssueKind::NumberingRegression => "题号回退",
            IssueKind::MetadataMismatch => "元数据不一致",
            IssueKind::QuestionCountMismatch => "题数不符",
            IssueKind::AlternateAnswerKey => "重复答案键",
            IssueKind::AnswerOverridden => "答案被更正",
            IssueKind::OrphanAnswer => "孤儿答案",
            IssueKind::OrphanCandidate => "孤儿题目",
            IssueKind::OrphanImage => "孤儿图片",
            IssueKind::FuzzyMatched => "模糊配对",
            IssueKind::EmptyStem => "题干为空",
            IssueKind::MalformedOptions => "选项异常",
            IssueKind::DuplicateNumber => "题号重复",
            IssueKind::MatchAmbiguity => "答案不确定",
            IssueKind::AssistResolved => "AI辅助判定",
            IssueKind::AssistUnavailable => "AI辅助不可用",
            IssueKind::NoteExtractionFailed => "备注提取失败",
            IssueKind::PersistenceConflict => "持久化冲突",
        };
        write!(f, "{}", s)
    }
}

/// 单条问题记录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Issue {
    /// 关联对象：question_id、题号（"#12"）或块序号（"block@37"）
    pub reference: String,
    pub kind: IssueKind,
    pub detail: String,
}

impl Issue {
    pub fn new(reference: impl Into<String>, kind: IssueKind, detail: impl Into<String>) -> Self {
        Self {
            reference: reference.into(),
            kind,
            detail: detail.into(),
        }
    }
}

impl fmt::Display for Issue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {} | {}", self.kind, self.reference, self.detail)
    }
}

/// 有序的问题清单
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IssueReport {
    issues: Vec<Issue>,
}

impl IssueReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, reference: impl Into<String>, kind: IssueKind, detail: impl Into<String>) {
        self.issues.push(Issue::new(reference, kind, detail));
    }

    pub fn push_issue(&mut self, issue: Issue) {
        self.issues.push(issue);
    }

    /// 合并另一份报告（保持顺序）
    pub fn merge(&mut self, other: IssueReport) {
        self.issues.extend(other.issues);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Issue> {
        self.issues.iter()
    }

    pub fn len(&self) -> usize {
        self.issues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.issues.is_empty()
    }

    /// 某一类型问题的数量
    pub fn count_of(&self, kind: IssueKind) -> usize {
        self.issues.iter().filter(|i| i.kind == kind).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_keeps_order() {
        let mut a = IssueReport::new();
        a.push("#1", IssueKind::EmptyStem, "题干为空");
        let mut b = IssueReport::new();
        b.push("#2", IssueKind::OrphanAnswer, "没有第 2 题");
        a.merge(b);
        assert_eq!(a.len(), 2);
        let refs: Vec<_> = a.iter().map(|i| i.reference.as_str()).collect();
        assert_eq!(refs, vec!["#1", "#2"]);
    }

    #[test]
    fn count_of_filters_by_kind() {
        let mut report = IssueReport::new();
        report.push("#3", IssueKind::NumberingRegression, "7 出现在 12 之后");
        report.push("#4", IssueKind::OrphanAnswer, "无对应题目");
        assert_eq!(report.count_of(IssueKind::NumberingRegression), 1);
        assert_eq!(report.count_of(IssueKind::AssistUnavailable), 0);
    }
}
