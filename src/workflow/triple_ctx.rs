//! 三元组处理上下文
//!
//! 封装"我正在处理哪个科目哪一期的哪几份 PDF"这一信息

use std::fmt::Display;
use std::path::PathBuf;

/// 三元组处理上下文
///
/// 一个三元组 = 题目卷 + 答案卷 + 可选的更正/备注文档，
/// 对应 `exams/<科目>/<年份>_<期次>/` 下的一组文件。
#[derive(Debug, Clone)]
pub struct TripleCtx {
    /// 三元组序号（仅用于日志显示）
    pub triple_index: usize,

    /// 科目目录名
    pub subject_folder: String,

    /// 年份期次目录名（如「111年_第一次」）
    pub year_period_folder: String,

    /// 题目卷路径
    pub question_pdf: PathBuf,

    /// 答案卷路径
    pub answer_pdf: PathBuf,

    /// 更正/备注文档路径（可为空）
    pub note_pdfs: Vec<PathBuf>,
}

impl TripleCtx {
    /// 日志与问题清单用的标签，如「生物化學與臨床生化學/111年_第一次」
    pub fn label(&self) -> String {
        format!("{}/{}", self.subject_folder, self.year_period_folder)
    }

    /// 题目卷文档 ID（文件主名）
    pub fn question_doc_id(&self) -> String {
        doc_id(&self.question_pdf)
    }

    /// 答案卷文档 ID
    pub fn answer_doc_id(&self) -> String {
        doc_id(&self.answer_pdf)
    }
}

fn doc_id(path: &PathBuf) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

impl Display for TripleCtx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[三元组#{} {} 备注×{}]",
            self.triple_index,
            self.label(),
            self.note_pdfs.len()
        )
    }
}
