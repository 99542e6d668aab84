//! 问题清单写入服务 - 业务能力层
//!
//! 只负责"把问题记录追加到 issues.txt"能力，不关心流程。

use crate::models::{Issue, IssueReport};
use anyhow::Result;
use std::fs::OpenOptions;
use std::io::Write;
use tracing::debug;

/// 问题清单写入服务
pub struct IssueWriter {
    issue_file_path: String,
}

impl IssueWriter {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            issue_file_path: path.into(),
        }
    }

    /// 追加一份三元组的问题清单
    ///
    /// 每行一条，前缀带三元组标识，方便事后按卷检索。
    pub fn append(&self, triple_label: &str, report: &IssueReport) -> Result<()> {
        if report.is_empty() {
            return Ok(());
        }
        debug!(
            "写入问题清单: {} | {} 条",
            triple_label,
            report.len()
        );

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.issue_file_path)?;

        for issue in report.iter() {
            writeln!(file, "{} | {}", triple_label, issue)?;
        }

        Ok(())
    }

    /// 追加单条问题
    pub fn append_one(&self, triple_label: &str, issue: &Issue) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.issue_file_path)?;
        writeln!(file, "{} | {}", triple_label, issue)?;
        Ok(())
    }
}
