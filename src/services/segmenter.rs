//! 分段服务 - 业务能力层
//!
//! 把块序列切分为候选题目：题干块开启一个候选，
//! 后续的选项块与图片引用依附其上，直到下一个题干或文档结束。
//! 纯函数：同一块序列永远切出同样的候选（可重启的惰性序列）。

use crate::models::{Block, BlockKind, IssueKind, IssueReport, QuestionCandidate};

/// 候选题目的惰性迭代器
///
/// 题号应当单调不减；出现回退（如 12 之后的 7）只做标记不做纠正，
/// 候选仍按原始题号产出。
pub struct Segmenter<'a> {
    blocks: &'a [Block],
    pos: usize,
    source_document_id: String,
    last_number: Option<u32>,
    report: IssueReport,
}

impl<'a> Segmenter<'a> {
    pub fn new(source_document_id: impl Into<String>, blocks: &'a [Block]) -> Self {
        Self {
            blocks,
            pos: 0,
            source_document_id: source_document_id.into(),
            last_number: None,
            report: IssueReport::new(),
        }
    }

    /// 迭代结束后取走积累的问题记录
    pub fn into_report(self) -> IssueReport {
        self.report
    }

    /// 一次性切完整份文档
    pub fn segment_all(
        source_document_id: &str,
        blocks: &'a [Block],
    ) -> (Vec<QuestionCandidate>, IssueReport) {
        let mut segmenter = Segmenter::new(source_document_id, blocks);
        let mut candidates = Vec::new();
        while let Some(candidate) = segmenter.next() {
            candidates.push(candidate);
        }
        (candidates, segmenter.into_report())
    }

    /// 找到下一个题干块的位置
    fn next_stem_at(&self, from: usize) -> Option<usize> {
        self.blocks[from..]
            .iter()
            .position(|b| b.kind == BlockKind::Stem && b.number.is_some())
            .map(|offset| from + offset)
    }
}

impl<'a> Iterator for Segmenter<'a> {
    type Item = QuestionCandidate;

    fn next(&mut self) -> Option<Self::Item> {
        let stem_at = self.next_stem_at(self.pos)?;
        let stem = &self.blocks[stem_at];
        let number = stem.number?;

        // 题号回退只标记一次（每次发生各记一条）
        if let Some(last) = self.last_number {
            if number < last {
                self.report.push(
                    format!("#{}", number),
                    IssueKind::NumberingRegression,
                    format!("题号 {} 出现在 {} 之后", number, last),
                );
            }
        }
        self.last_number = Some(number);

        let body_end = self
            .next_stem_at(stem_at + 1)
            .unwrap_or(self.blocks.len());

        let mut stem_blocks = vec![stem.clone()];
        let mut option_blocks = Vec::new();
        for block in &self.blocks[stem_at + 1..body_end] {
            match block.kind {
                BlockKind::Option => option_blocks.push(block.clone()),
                // 图片引用随位置依附，归属细化交给图片归属器
                BlockKind::ImageRef => {
                    if option_blocks.is_empty() {
                        stem_blocks.push(block.clone());
                    } else {
                        option_blocks.push(block.clone());
                    }
                }
                _ => {}
            }
        }

        self.pos = body_end;
        Some(QuestionCandidate {
            number,
            stem_blocks,
            option_blocks,
            source_document_id: self.source_document_id.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Block;

    fn stem(order: usize, number: u32, text: &str) -> Block {
        Block::new(BlockKind::Stem, 0, order, text).with_number(number)
    }

    fn option(order: usize, label: &str, text: &str) -> Block {
        Block::new(BlockKind::Option, 0, order, text).with_label(label)
    }

    #[test]
    fn one_candidate_per_number_no_bleed() {
        let blocks = vec![
            stem(0, 1, "第一題"),
            option(1, "A", "甲"),
            option(2, "B", "乙"),
            stem(3, 2, "第二題"),
            option(4, "A", "丙"),
            option(5, "B", "丁"),
            option(6, "C", "戊"),
        ];
        let (candidates, report) = Segmenter::segment_all("doc", &blocks);

        assert!(report.is_empty());
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].number, 1);
        assert_eq!(candidates[0].option_blocks.len(), 2);
        assert_eq!(candidates[1].number, 2);
        assert_eq!(candidates[1].option_blocks.len(), 3);
        // 选项不越界
        assert!(candidates[0]
            .option_blocks
            .iter()
            .all(|b| b.raw_text != "丙"));
    }

    #[test]
    fn numbering_regression_is_flagged_once_and_still_emitted() {
        let numbers = [1u32, 2, 3, 7, 8, 4, 5, 6];
        let blocks: Vec<Block> = numbers
            .iter()
            .enumerate()
            .map(|(i, n)| stem(i, *n, "題"))
            .collect();
        let (candidates, report) = Segmenter::segment_all("doc", &blocks);

        // 全部候选仍被产出
        assert_eq!(candidates.len(), numbers.len());
        let emitted: Vec<u32> = candidates.iter().map(|c| c.number).collect();
        assert_eq!(emitted, numbers.to_vec());
        // 回退（8 → 4）恰好记录一次
        assert_eq!(report.count_of(IssueKind::NumberingRegression), 1);
    }

    #[test]
    fn segmentation_is_restartable_and_pure() {
        let blocks = vec![stem(0, 1, "甲"), option(1, "A", "a"), stem(2, 2, "乙")];
        let (first, _) = Segmenter::segment_all("doc", &blocks);
        let (second, _) = Segmenter::segment_all("doc", &blocks);
        assert_eq!(first.len(), second.len());
        for (a, b) in first.iter().zip(second.iter()) {
            assert_eq!(a.number, b.number);
            assert_eq!(a.stem_text(), b.stem_text());
        }
    }

    #[test]
    fn free_response_question_has_no_options() {
        let blocks = vec![stem(0, 1, "申論題：請說明…"), stem(1, 2, "下一題")];
        let (candidates, _) = Segmenter::segment_all("doc", &blocks);
        assert_eq!(candidates[0].option_blocks.len(), 0);
    }

    #[test]
    fn heading_and_note_blocks_are_ignored() {
        let blocks = vec![
            Block::new(BlockKind::Heading, 0, 0, "卷頭"),
            stem(1, 1, "題幹"),
            option(2, "A", "甲"),
            Block::new(BlockKind::NoteText, 0, 3, "備註"),
            option(4, "B", "乙"),
        ];
        let (candidates, _) = Segmenter::segment_all("doc", &blocks);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].option_blocks.len(), 2);
    }
}
