//! 持久化客户端
//!
//! 封装所有与关系存储（PostgREST 风格 API）的交互：
//! 科目/考卷父记录的查询或创建、题目的批量 upsert、
//! 问题清单的追加写入。
//!
//! 题目以 `question_id` 为冲突键做合并 upsert，重跑同一批
//! PDF 是幂等的；瞬时失败做有界退避重试，重试耗尽才把
//! 所在三元组标记为失败。

use crate::config::Config;
use crate::error::{AppError, AppResult, StoreError};
use crate::models::{Confidence, ExamMetadata, IssueReport, StructuredQuestion};
use reqwest::StatusCode;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info, warn};

/// 持久化客户端
pub struct StoreClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    max_retries: usize,
    retry_backoff: Duration,
    batch_size: usize,
}

impl StoreClient {
    /// 创建新的持久化客户端
    pub fn new(config: &Config) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: config.store_api_url.trim_end_matches('/').to_string(),
            api_key: config.store_api_key.clone(),
            max_retries: config.store_max_retries.max(1),
            retry_backoff: Duration::from_millis(config.store_retry_backoff_ms),
            batch_size: config.store_batch_size.max(1),
        }
    }

    fn endpoint(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    // ========== 父记录 ==========

    /// 按名称获取或创建科目，返回科目 ID
    pub async fn get_or_create_subject(&self, subject_name: &str) -> AppResult<String> {
        let endpoint = self.endpoint("subjects");
        let found: Vec<Value> = self
            .client
            .get(&endpoint)
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
            .query(&[("name", format!("eq.{}", subject_name)), ("select", "id".to_string())])
            .send()
            .await?
            .json()
            .await?;

        if let Some(id) = found.first().and_then(|v| v["id"].as_str()) {
            debug!("科目「{}」已存在: {}", subject_name, id);
            return Ok(id.to_string());
        }

        info!("科目「{}」不存在，创建中...", subject_name);
        let payload = json!({
            "name": subject_name,
            "slug": generate_slug(subject_name),
        });
        let created: Vec<Value> = self
            .client
            .post(&endpoint)
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
            .header("Prefer", "return=representation")
            .json(&payload)
            .send()
            .await?
            .json()
            .await?;

        created
            .first()
            .and_then(|v| v["id"].as_str())
            .map(str::to_string)
            .ok_or_else(|| {
                AppError::Store(StoreError::BadResponse {
                    endpoint,
                    status: 0,
                    message: format!("创建科目「{}」未返回 ID", subject_name),
                })
            })
    }

    /// 按（标题, 科目）获取或创建章节，返回章节 ID
    ///
    /// 章节是题目的可选父记录；目前只有显式标注了章节的试卷才会用到。
    pub async fn get_or_create_chapter(
        &self,
        chapter_title: &str,
        subject_id: &str,
    ) -> AppResult<String> {
        let endpoint = self.endpoint("chapters");
        let found: Vec<Value> = self
            .client
            .get(&endpoint)
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
            .query(&[
                ("title", format!("eq.{}", chapter_title)),
                ("subject_id", format!("eq.{}", subject_id)),
                ("select", "id".to_string()),
            ])
            .send()
            .await?
            .json()
            .await?;

        if let Some(id) = found.first().and_then(|v| v["id"].as_str()) {
            debug!("章节「{}」已存在: {}", chapter_title, id);
            return Ok(id.to_string());
        }

        info!("章节「{}」不存在，创建中...", chapter_title);
        let payload = json!({
            "title": chapter_title,
            "subject_id": subject_id,
        });
        let created: Vec<Value> = self
            .client
            .post(&endpoint)
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
            .header("Prefer", "return=representation")
            .json(&payload)
            .send()
            .await?
            .json()
            .await?;

        created
            .first()
            .and_then(|v| v["id"].as_str())
            .map(str::to_string)
            .ok_or_else(|| {
                AppError::Store(StoreError::BadResponse {
                    endpoint,
                    status: 0,
                    message: format!("创建章节「{}」未返回 ID", chapter_title),
                })
            })
    }

    /// 按（科目, 年份, 期次）获取或创建考卷，返回考卷 ID
    pub async fn get_or_create_test(
        &self,
        metadata: &ExamMetadata,
        subject_id: &str,
    ) -> AppResult<String> {
        let endpoint = self.endpoint("tests");
        let found: Vec<Value> = self
            .client
            .get(&endpoint)
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
            .query(&[
                ("subject_id", format!("eq.{}", subject_id)),
                ("year", format!("eq.{}", metadata.year)),
                ("period", format!("eq.{}", metadata.period)),
                ("select", "id,name".to_string()),
            ])
            .send()
            .await?
            .json()
            .await?;

        if found.len() > 1 {
            warn!(
                "科目 {} 的 {} 年第 {} 次找到多份考卷记录，取第一份",
                subject_id, metadata.year, metadata.period
            );
        }
        let test_name = metadata
            .exam_name
            .clone()
            .unwrap_or_else(|| metadata.prefix());

        if let Some(record) = found.first() {
            let id = record["id"].as_str().unwrap_or_default().to_string();
            // 名称漂移时就地更新，保持与最新卷头一致
            if record["name"].as_str() != Some(test_name.as_str()) {
                warn!(
                    "考卷 {} 名称与卷头不一致，更新为「{}」",
                    id, test_name
                );
                self.client
                    .patch(&endpoint)
                    .header("apikey", &self.api_key)
                    .bearer_auth(&self.api_key)
                    .query(&[("id", format!("eq.{}", id))])
                    .json(&json!({ "name": test_name }))
                    .send()
                    .await?;
            }
            return Ok(id);
        }

        info!("考卷「{}」不存在，创建中...", test_name);
        let payload = json!({
            "name": test_name,
            "year": metadata.year,
            "period": metadata.period,
            "subject_id": subject_id,
            "subject_code": metadata.subject_code,
            "question_count": metadata.question_count,
        });
        let created: Vec<Value> = self
            .client
            .post(&endpoint)
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
            .header("Prefer", "return=representation")
            .json(&payload)
            .send()
            .await?
            .json()
            .await?;

        created
            .first()
            .and_then(|v| v["id"].as_str())
            .map(str::to_string)
            .ok_or_else(|| {
                AppError::Store(StoreError::BadResponse {
                    endpoint,
                    status: 0,
                    message: format!("创建考卷「{}」未返回 ID", test_name),
                })
            })
    }

    // ========== 题目批量 upsert ==========

    /// 以 `question_id` 为冲突键分批合并写入
    ///
    /// 返回成功写入的条数；瞬时失败按批重试。
    pub async fn upsert_questions(
        &self,
        test_id: &str,
        chapter_id: Option<&str>,
        questions: &[StructuredQuestion],
    ) -> AppResult<usize> {
        let endpoint = format!("{}?on_conflict=question_id", self.endpoint("questions"));
        let mut written = 0usize;

        for chunk in questions.chunks(self.batch_size) {
            let rows: Vec<Value> = chunk
                .iter()
                .map(|q| question_row(test_id, chapter_id, q))
                .collect();
            self.post_with_retry(&endpoint, &Value::Array(rows), "resolution=merge-duplicates")
                .await?;
            written += chunk.len();
            debug!("已写入 {}/{} 题", written, questions.len());
        }

        Ok(written)
    }

    /// 追加问题清单（只插入，不更新）
    pub async fn insert_issues(&self, triple_label: &str, report: &IssueReport) -> AppResult<()> {
        if report.is_empty() {
            return Ok(());
        }
        let endpoint = self.endpoint("issue_reports");
        let rows: Vec<Value> = report
            .iter()
            .map(|issue| {
                json!({
                    "triple": triple_label,
                    "reference": issue.reference,
                    "kind": issue.kind,
                    "detail": issue.detail,
                })
            })
            .collect();
        self.post_with_retry(&endpoint, &Value::Array(rows), "return=minimal")
            .await
    }

    /// 带有界退避重试的 POST；只有 5xx 与网络错误才重试
    async fn post_with_retry(
        &self,
        endpoint: &str,
        payload: &Value,
        prefer: &str,
    ) -> AppResult<()> {
        for attempt in 1..=self.max_retries {
            let sent = self
                .client
                .post(endpoint)
                .header("apikey", &self.api_key)
                .bearer_auth(&self.api_key)
                .header("Prefer", prefer)
                .json(payload)
                .send()
                .await;

            match sent {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return Ok(());
                    }
                    let message = response.text().await.unwrap_or_default();
                    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
                        warn!(
                            "存储请求第 {}/{} 次失败 ({}): {}",
                            attempt, self.max_retries, status, message
                        );
                    } else {
                        // 4xx 是确定性错误，重试无意义
                        return Err(AppError::Store(StoreError::BadResponse {
                            endpoint: endpoint.to_string(),
                            status: status.as_u16(),
                            message,
                        }));
                    }
                }
                Err(e) => {
                    warn!(
                        "存储请求第 {}/{} 次网络失败: {}",
                        attempt, self.max_retries, e
                    );
                }
            }

            if attempt < self.max_retries {
                tokio::time::sleep(self.retry_backoff * attempt as u32).await;
            }
        }

        Err(AppError::Store(StoreError::RetriesExhausted {
            endpoint: endpoint.to_string(),
            attempts: self.max_retries,
        }))
    }
}

/// 题目行：映射到 questions 表的列
fn question_row(test_id: &str, chapter_id: Option<&str>, q: &StructuredQuestion) -> Value {
    let options: Value = q
        .options
        .iter()
        .map(|o| (o.label.clone(), Value::String(o.text.clone())))
        .collect::<serde_json::Map<String, Value>>()
        .into();
    json!({
        "question_id": q.question_id,
        "test_id": test_id,
        "chapter_id": chapter_id,
        "question_number": q.number,
        "content": q.stem_text,
        "options": options,
        "correct_answer_key": q.correct_answer.as_ref().map(|a| vec![a.clone()]),
        "notes": q.correction_text,
        "explanation": q.explanation_text,
        "image_ids": q.image_ids,
        "confidence": confidence_label(q.confidence),
        "page_number": q.page_index + 1,
    })
}

fn confidence_label(confidence: Confidence) -> &'static str {
    match confidence {
        Confidence::High => "high",
        Confidence::Resolved => "resolved",
        Confidence::Flagged => "flagged",
    }
}

/// 为科目名生成 URL 友好的 slug（保留中文字符）
fn generate_slug(name: &str) -> String {
    let mut slug = String::new();
    let mut last_dash = true;
    for c in name.trim().to_lowercase().chars() {
        if c.is_ascii_alphanumeric() || ('一'..='\u{9fff}').contains(&c) {
            slug.push(c);
            last_dash = false;
        } else if !last_dash {
            slug.push('-');
            last_dash = true;
        }
    }
    let slug = slug.trim_matches('-').to_string();
    if slug.is_empty() {
        "default-slug".to_string()
    } else {
        slug
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    #[test]
    fn slug_keeps_cjk_and_collapses_separators() {
        assert_eq!(generate_slug("生物化學與臨床生化學"), "生物化學與臨床生化學");
        assert_eq!(generate_slug("Clinical Chemistry 101"), "clinical-chemistry-101");
        assert_eq!(generate_slug("...") , "default-slug");
    }

    #[test]
    fn question_row_maps_all_columns() {
        let q = StructuredQuestion {
            question_id: "abc".to_string(),
            subject: "生化".to_string(),
            year: 111,
            period: 2,
            chapter: None,
            number: 12,
            stem_text: "題幹".to_string(),
            options: vec![crate::models::QuestionOption {
                label: "A".to_string(),
                text: "甲".to_string(),
                image_ids: Vec::new(),
            }],
            correct_answer: Some("A".to_string()),
            explanation_text: None,
            correction_text: Some("更正".to_string()),
            image_ids: BTreeSet::new(),
            confidence: Confidence::High,
            page_index: 0,
        };
        let row = question_row("test-1", None, &q);
        assert_eq!(row["question_id"], "abc");
        assert_eq!(row["chapter_id"], Value::Null);
        assert_eq!(row["question_number"], 12);
        assert_eq!(row["options"]["A"], "甲");
        assert_eq!(row["correct_answer_key"][0], "A");
        assert_eq!(row["confidence"], "high");
        assert_eq!(row["page_number"], 1);
    }
}
