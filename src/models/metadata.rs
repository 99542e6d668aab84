//! 试卷元数据

use serde::{Deserialize, Serialize};

/// 一份试卷的元数据
///
/// 目录约定（`exams/<科目>/<年份>_<期次>/`）为主来源，
/// 卷头文字为辅助来源；两者不一致时以目录为准并记录问题。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExamMetadata {
    /// 考试全名（卷头首行，如「112年第一次專門職業及技術人員高等考試」）
    pub exam_name: Option<String>,
    /// 科目名称
    pub subject_name: String,
    /// 科目代号（卷头「代號」栏）
    pub subject_code: Option<String>,
    /// 类科名称（卷头「類科名稱」栏）
    pub subject_type: Option<String>,
    /// 年份（民国纪年，如 111）
    pub year: u16,
    /// 期次（第几次考试，1-4）
    pub period: u8,
    /// 卷头标注的题数
    pub question_count: Option<usize>,
    /// 章节（目录层级中可选的第三级）
    pub chapter: Option<String>,
}

impl ExamMetadata {
    /// 输出文件与日志用的前缀，如「生物化學與臨床生化學_111_2」
    pub fn prefix(&self) -> String {
        format!("{}_{}_{}", self.subject_name, self.year, self.period)
    }
}
