//! 元数据解析服务 - 业务能力层
//!
//! 从目录约定（`exams/<科目>/<年份>_<期次>/`）与卷头文字两个来源
//! 推导科目、年份、期次。目录来源优先；两者不一致时记录问题，
//! 绝不无声覆盖。

use crate::models::{Block, BlockKind, ExamMetadata, IssueKind, IssueReport, Subject};
use regex::Regex;
use tracing::debug;

/// 元数据解析服务
pub struct MetadataResolver {
    year_period_re: Regex,
    year_period_loose_re: Regex,
    code_re: Regex,
    subject_type_re: Regex,
    subject_name_re: Regex,
    header_year_period_re: Regex,
    question_count_re: Regex,
}

impl MetadataResolver {
    pub fn new() -> Self {
        Self {
            // 目录名："111年_第一次" / "111年第2次" / "111_2"
            year_period_re: Regex::new(r"(\d{3,4})\s*年?\s*[_\-]?\s*第?\s*([一二三四\d])\s*次?")
                .expect("year_period_re"),
            // 兜底："111-2" / "1112"
            year_period_loose_re: Regex::new(r"(\d{3,4})[\s_\-]?([1-4])").expect("year_period_loose_re"),
            // 卷头「代號：1105」
            code_re: Regex::new(r"代[　\s]*號[：:\s]*([0-9]+)").expect("code_re"),
            // 卷头「類科名稱：醫事檢驗師」
            subject_type_re: Regex::new(r"類科名稱[：:\s]*([^\s　]+)").expect("subject_type_re"),
            // 卷头「科目名稱：生物化學與臨床生化學」
            subject_name_re: Regex::new(r"科目名稱[：:\s]*([^\s　]+)").expect("subject_name_re"),
            // 卷头「111年第二次…」（中文数字期次）
            header_year_period_re: Regex::new(r"(\d{3,4})\s*年\s*第?\s*([一二三四\d])\s*次")
                .expect("header_year_period_re"),
            // 卷头「題數：80」
            question_count_re: Regex::new(r"題[\s　]*數[：:\s]*(\d+)").expect("question_count_re"),
        }
    }

    /// 解析一份试卷的元数据
    ///
    /// - `subject_folder` / `year_period_folder`：目录层级名（文档级来源）
    /// - `blocks`：题目卷的块序列，取首页卷头块做辅助来源与交叉校验
    pub fn resolve(
        &self,
        subject_folder: &str,
        year_period_folder: &str,
        blocks: &[Block],
    ) -> (ExamMetadata, IssueReport) {
        let mut report = IssueReport::new();

        let folder_year_period = self.parse_year_period(year_period_folder);
        let header = self.parse_header(blocks);

        // 文档级来源优先；缺失时回退卷头
        let (year, period) = match (folder_year_period, header.year_period) {
            (Some(folder), Some(in_doc)) => {
                if folder != in_doc {
                    report.push(
                        subject_folder,
                        IssueKind::MetadataMismatch,
                        format!(
                            "目录为 {}年第{}次，卷头为 {}年第{}次，以目录为准",
                            folder.0, folder.1, in_doc.0, in_doc.1
                        ),
                    );
                }
                folder
            }
            (Some(folder), None) => folder,
            (None, Some(in_doc)) => in_doc,
            (None, None) => {
                report.push(
                    year_period_folder,
                    IssueKind::MetadataMismatch,
                    "目录与卷头都无法解析年份期次，记为 0 年第 0 次",
                );
                (0, 0)
            }
        };

        let subject_name = subject_folder.trim().to_string();
        if let Some(header_subject) = &header.subject_name {
            // 科目以目录为准；只有归一后仍不同才算不一致
            let folder_subject = Subject::find(&subject_name);
            let doc_subject = Subject::find(header_subject);
            let same = match (folder_subject, doc_subject) {
                (Some(a), Some(b)) => a == b,
                _ => subject_name == *header_subject,
            };
            if !same {
                report.push(
                    subject_folder,
                    IssueKind::MetadataMismatch,
                    format!(
                        "目录科目「{}」与卷头科目「{}」不一致，以目录为准",
                        subject_name, header_subject
                    ),
                );
            }
        }

        // 代号缺失时用科目表兜底
        let subject_code = header.subject_code.or_else(|| {
            Subject::find(&subject_name).map(|s| s.code().to_string())
        });

        let metadata = ExamMetadata {
            exam_name: header.exam_name,
            subject_name,
            subject_code,
            subject_type: header.subject_type,
            year,
            period,
            question_count: header.question_count,
            chapter: None,
        };
        debug!("元数据解析完成: {:?}", metadata);
        (metadata, report)
    }

    /// 从目录名解析（年份, 期次）
    pub fn parse_year_period(&self, folder: &str) -> Option<(u16, u8)> {
        if let Some(caps) = self.year_period_re.captures(folder) {
            let year = caps[1].parse().ok()?;
            let period = parse_period_char(&caps[2])?;
            return Some((year, period));
        }
        let caps = self.year_period_loose_re.captures(folder)?;
        Some((caps[1].parse().ok()?, caps[2].parse().ok()?))
    }

    /// 从首页卷头块解析辅助元数据
    fn parse_header(&self, blocks: &[Block]) -> HeaderMetadata {
        let heading_text = blocks
            .iter()
            .take_while(|b| b.page_index == 0)
            .filter(|b| b.kind == BlockKind::Heading)
            .map(|b| b.raw_text.as_str())
            .collect::<Vec<_>>()
            .join("\n");

        let exam_name = heading_text
            .lines()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .map(str::to_string);

        let year_period = self
            .header_year_period_re
            .captures(&heading_text)
            .and_then(|caps| {
                Some((caps[1].parse().ok()?, parse_period_char(&caps[2])?))
            });

        HeaderMetadata {
            exam_name,
            subject_name: self
                .subject_name_re
                .captures(&heading_text)
                .map(|c| c[1].trim().to_string()),
            subject_code: self
                .code_re
                .captures(&heading_text)
                .map(|c| c[1].to_string()),
            subject_type: self
                .subject_type_re
                .captures(&heading_text)
                .map(|c| c[1].trim().to_string()),
            year_period,
            question_count: self
                .question_count_re
                .captures(&heading_text)
                .and_then(|c| c[1].parse().ok()),
        }
    }
}

impl Default for MetadataResolver {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Default)]
struct HeaderMetadata {
    exam_name: Option<String>,
    subject_name: Option<String>,
    subject_code: Option<String>,
    subject_type: Option<String>,
    year_period: Option<(u16, u8)>,
    question_count: Option<usize>,
}

/// 期次字符：阿拉伯数字或中文数字（一至四）
fn parse_period_char(s: &str) -> Option<u8> {
    match s {
        "一" => Some(1),
        "二" => Some(2),
        "三" => Some(3),
        "四" => Some(4),
        other => other.parse().ok(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Block;

    fn heading(order: usize, text: &str) -> Block {
        Block::new(BlockKind::Heading, 0, order, text)
    }

    #[test]
    fn parses_folder_variants() {
        let resolver = MetadataResolver::new();
        assert_eq!(resolver.parse_year_period("111年_第一次"), Some((111, 1)));
        assert_eq!(resolver.parse_year_period("111年第2次"), Some((111, 2)));
        assert_eq!(resolver.parse_year_period("111_2"), Some((111, 2)));
        assert_eq!(resolver.parse_year_period("110-1"), Some((110, 1)));
        assert_eq!(resolver.parse_year_period("無年份"), None);
    }

    #[test]
    fn header_fills_supplementary_fields() {
        let resolver = MetadataResolver::new();
        let blocks = vec![
            heading(0, "111年第二次專門職業及技術人員高等考試"),
            heading(1, "代號：1105 類科名稱：醫事檢驗師"),
            heading(2, "科目名稱：生物化學與臨床生化學 題數：80"),
        ];
        let (meta, report) =
            resolver.resolve("生物化學與臨床生化學", "111年_第二次", &blocks);

        assert!(report.is_empty());
        assert_eq!(meta.year, 111);
        assert_eq!(meta.period, 2);
        assert_eq!(meta.subject_code.as_deref(), Some("1105"));
        assert_eq!(meta.subject_type.as_deref(), Some("醫事檢驗師"));
        assert_eq!(meta.question_count, Some(80));
        assert!(meta.exam_name.unwrap().contains("專門職業"));
    }

    #[test]
    fn folder_wins_on_disagreement_with_trace() {
        let resolver = MetadataResolver::new();
        let blocks = vec![heading(0, "110年第一次高等考試")];
        let (meta, report) = resolver.resolve("生化", "111年_第二次", &blocks);

        assert_eq!((meta.year, meta.period), (111, 2));
        assert_eq!(report.count_of(IssueKind::MetadataMismatch), 1);
    }

    #[test]
    fn subject_aliases_do_not_false_alarm() {
        let resolver = MetadataResolver::new();
        let blocks = vec![heading(0, "科目名稱：生物化學與臨床生化學")];
        // 目录用简称，卷头用全名，归一后相同，不应报不一致
        let (_, report) = resolver.resolve("生化", "111年_第一次", &blocks);
        assert_eq!(report.count_of(IssueKind::MetadataMismatch), 0);
    }

    #[test]
    fn missing_both_sources_is_reported() {
        let resolver = MetadataResolver::new();
        let (meta, report) = resolver.resolve("生化", "某個目錄", &[]);
        assert_eq!((meta.year, meta.period), (0, 0));
        assert_eq!(report.count_of(IssueKind::MetadataMismatch), 1);
    }
}
