//! 题目数据模型
//!
//! `QuestionCandidate` / `AnswerEntry` 是单次运行内的中间产物，
//! 只有 `StructuredQuestion` 与问题清单会跨越边界进入存储。

use crate::models::block::{Block, BoundingBox};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;

/// 分段器产出的候选题目
///
/// 不变式：`number` 为正且在单份文档内唯一（重复会被校验层标记）；
/// 选项数为 0（问答题）或 ≥2。
#[derive(Debug, Clone)]
pub struct QuestionCandidate {
    pub number: u32,
    pub stem_blocks: Vec<Block>,
    pub option_blocks: Vec<Block>,
    pub source_document_id: String,
}

impl QuestionCandidate {
    /// 题干全文（按块顺序拼接）
    pub fn stem_text(&self) -> String {
        self.stem_blocks
            .iter()
            .map(|b| b.raw_text.trim())
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// 候选题目首个块所在页
    pub fn page_index(&self) -> usize {
        self.stem_blocks
            .first()
            .map(|b| b.page_index)
            .unwrap_or(0)
    }
}

/// 答案卷中的一条答案
#[derive(Debug, Clone)]
pub struct AnswerEntry {
    pub number: u32,
    /// 答案字母（A-E）、`#`（对位失败）或「送分」等文字
    pub correct_option_or_text: String,
    /// 备注/更正文字
    pub correction_text: Option<String>,
    /// 条目周边的上下文文字，供模糊配对使用
    pub context_text: Option<String>,
    pub source_document_id: String,
}

/// 提取出的图片资源
///
/// 在归属完成之前由图片归属器独占持有，归属后字节随
/// `asset_id` 写入文件，题目仅引用 ID。
#[derive(Debug, Clone)]
pub struct ImageAsset {
    pub asset_id: String,
    pub page_index: usize,
    pub bounding_box: BoundingBox,
    pub png_bytes: Vec<u8>,
}

/// 最终答案的来源强度
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Confidence {
    /// 机器确定（唯一精确匹配）
    High,
    /// AI 辅助判定（可审计）
    Resolved,
    /// 未能判定（仍然输出，宁缺勿丢）
    Flagged,
}

/// 结构化题目的一个选项
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionOption {
    pub label: String,
    pub text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub image_ids: Vec<String>,
}

/// 最终输出的结构化题目
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuredQuestion {
    /// 确定性 ID：同一科目/年份/期次/题号重跑必然碰撞（幂等 upsert 键）
    pub question_id: String,
    pub subject: String,
    pub year: u16,
    pub period: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chapter: Option<String>,
    pub number: u32,
    pub stem_text: String,
    pub options: Vec<QuestionOption>,
    /// 唯一答案；仅在 `confidence == Flagged` 时允许为空
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correct_answer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub explanation_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correction_text: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub image_ids: BTreeSet<String>,
    pub confidence: Confidence,
    /// 题目所在页（原始卷面页码，0 起）
    pub page_index: usize,
}

/// 题目指纹：科目+年份+期次+题号 的 SHA-256 前 16 字节十六进制
///
/// 重跑同一批 PDF 产出的 ID 必定与上一轮一致（upsert 而非重复插入）。
pub fn question_fingerprint(subject: &str, year: u16, period: u8, number: u32) -> String {
    let mut hasher = Sha256::new();
    hasher.update(subject.as_bytes());
    hasher.update(b"|");
    hasher.update(year.to_string().as_bytes());
    hasher.update(b"|");
    hasher.update(period.to_string().as_bytes());
    hasher.update(b"|");
    hasher.update(number.to_string().as_bytes());
    let digest = hasher.finalize();
    digest[..16].iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::block::BlockKind;

    #[test]
    fn fingerprint_is_deterministic() {
        let a = question_fingerprint("生物化學與臨床生化學", 111, 2, 12);
        let b = question_fingerprint("生物化學與臨床生化學", 111, 2, 12);
        assert_eq!(a, b);
        assert_eq!(a.len(), 32);
    }

    #[test]
    fn fingerprint_differs_per_key_component() {
        let base = question_fingerprint("生化", 111, 2, 12);
        assert_ne!(base, question_fingerprint("血液", 111, 2, 12));
        assert_ne!(base, question_fingerprint("生化", 112, 2, 12));
        assert_ne!(base, question_fingerprint("生化", 111, 1, 12));
        assert_ne!(base, question_fingerprint("生化", 111, 2, 13));
    }

    #[test]
    fn stem_text_joins_blocks_in_order() {
        let mut first = Block::new(BlockKind::Stem, 0, 0, "下列何者");
        first.number = Some(1);
        let second = Block::new(BlockKind::Stem, 0, 1, "屬於醣類？");
        let candidate = QuestionCandidate {
            number: 1,
            stem_blocks: vec![first, second],
            option_blocks: vec![],
            source_document_id: "doc".to_string(),
        };
        assert_eq!(candidate.stem_text(), "下列何者 屬於醣類？");
    }
}
