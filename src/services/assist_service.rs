//! AI 辅助服务 - 业务能力层
//!
//! 只负责"请 LLM 对疑难题给出最佳答案"这一件事，不关心流程。
//! 每次调用都有超时上限；同一题目指纹的结果会被缓存，
//! 重复升级不会重复计费。
//!
//! ## 技术栈
//! - 使用 `async-openai` crate 进行 API 调用
//! - 兼容 OpenAI API 的服务（OpenRouter、DeepSeek 等）

use async_openai::{
    config::OpenAIConfig,
    types::chat::{
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
        ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequestArgs,
    },
    Client,
};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::{AppError, AppResult, AssistError};

/// 升级请求：疑难候选的全部上下文
#[derive(Debug, Clone)]
pub struct AssistRequest {
    /// 缓存键（题目指纹）
    pub fingerprint: String,
    pub stem_text: String,
    pub option_texts: Vec<String>,
    /// 互相矛盾或缺失的答案候选
    pub candidate_answers: Vec<String>,
    /// 原始上下文（备注、孤儿条目等）
    pub raw_context: String,
}

/// 升级结果
#[derive(Debug, Clone)]
pub struct AssistSuggestion {
    /// 建议答案（A-E）；LLM 也无法判断时为空
    pub suggested_answer: Option<String>,
    pub confidence_note: String,
}

/// AI 辅助判定能力
///
/// 校验流程对具体实现无感，测试里用桩实现替换。
pub trait AssistResolver {
    fn resolve(
        &self,
        request: &AssistRequest,
    ) -> impl std::future::Future<Output = AppResult<AssistSuggestion>> + Send;
}

/// AI 辅助服务（生产实现）
pub struct AssistService {
    client: Client<OpenAIConfig>,
    model_name: String,
    timeout: Duration,
    cache: Mutex<HashMap<String, AssistSuggestion>>,
}

impl AssistService {
    /// 创建新的 AI 辅助服务
    pub fn new(config: &Config) -> Self {
        let openai_config = OpenAIConfig::new()
            .with_api_key(&config.assist_api_key)
            .with_api_base(&config.assist_api_base_url);
        let client = Client::with_config(openai_config);

        Self {
            client,
            model_name: config.assist_model_name.clone(),
            timeout: Duration::from_secs(config.assist_timeout_secs),
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// 调用 LLM，带超时
    async fn send_to_llm(&self, user_message: &str, system_message: &str) -> AppResult<String> {
        debug!("调用 AI 辅助，模型: {}", self.model_name);

        let system_msg = ChatCompletionRequestSystemMessageArgs::default()
            .content(system_message)
            .build()
            .map_err(|e| AppError::assist_failed(&self.model_name, e))?;
        let user_msg = ChatCompletionRequestUserMessageArgs::default()
            .content(user_message)
            .build()
            .map_err(|e| AppError::assist_failed(&self.model_name, e))?;

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model_name)
            .messages(vec![
                ChatCompletionRequestMessage::System(system_msg),
                ChatCompletionRequestMessage::User(user_msg),
            ])
            .temperature(0.2)
            .max_tokens(256u32)
            .build()
            .map_err(|e| AppError::assist_failed(&self.model_name, e))?;

        let call = self.client.chat().create(request);
        let response = match tokio::time::timeout(self.timeout, call).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                warn!("AI 辅助调用失败: {}", e);
                return Err(AppError::assist_failed(&self.model_name, e));
            }
            Err(_) => {
                warn!(
                    "AI 辅助调用超时 ({}s)，模型: {}",
                    self.timeout.as_secs(),
                    self.model_name
                );
                return Err(AppError::Assist(AssistError::Timeout {
                    model: self.model_name.clone(),
                    timeout_secs: self.timeout.as_secs(),
                }));
            }
        };

        let content = response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .ok_or_else(|| {
                AppError::Assist(AssistError::EmptyContent {
                    model: self.model_name.clone(),
                })
            })?;

        Ok(content.trim().to_string())
    }

    /// 构建判题提示词
    fn build_prompt(&self, request: &AssistRequest) -> String {
        let options = if request.option_texts.is_empty() {
            "（问答题，无选项）".to_string()
        } else {
            request.option_texts.join("\n")
        };
        let candidates = if request.candidate_answers.is_empty() {
            "（没有任何答案候选）".to_string()
        } else {
            request.candidate_answers.join("、")
        };
        format!(
            r#"下面是一道考古题，机器配对未能确定唯一答案，请你判断。

题干：
{}

选项：
{}

互相矛盾或缺失的答案候选：{}

原始上下文（备注、更正说明等）：
{}

请只回答一个选项字母（A-E）。如果确实无法判断，回答「无法判断」。
第二行可以补充一句判断依据。"#,
            request.stem_text, options, candidates, request.raw_context
        )
    }

    /// 解析 LLM 响应：首个答案字母 + 其余文字作为依据
    fn parse_response(&self, response: &str) -> AssistSuggestion {
        let mut lines = response.lines();
        let first = lines.next().unwrap_or("").trim();
        let suggested = first
            .chars()
            .find(|c| ('A'..='E').contains(c))
            .map(|c| c.to_string());
        let note = if suggested.is_some() {
            lines.collect::<Vec<_>>().join(" ").trim().to_string()
        } else {
            response.trim().to_string()
        };
        AssistSuggestion {
            suggested_answer: suggested,
            confidence_note: if note.is_empty() {
                "模型未给出依据".to_string()
            } else {
                note
            },
        }
    }
}

impl AssistResolver for AssistService {
    /// 对一个疑难候选请求最佳判定（指纹命中缓存时直接返回）
    async fn resolve(&self, request: &AssistRequest) -> AppResult<AssistSuggestion> {
        {
            let cache = self.cache.lock().await;
            if let Some(hit) = cache.get(&request.fingerprint) {
                debug!("AI 辅助缓存命中: {}", request.fingerprint);
                return Ok(hit.clone());
            }
        }

        let system_message = "你是一个医事检验国考的资深阅卷老师，擅长在答案资料互相矛盾时\
                              根据题干与选项判断正确答案。回答务必简洁。";
        let prompt = self.build_prompt(request);
        let response = self.send_to_llm(&prompt, system_message).await?;
        let suggestion = self.parse_response(&response);

        let mut cache = self.cache.lock().await;
        cache.insert(request.fingerprint.clone(), suggestion.clone());
        Ok(suggestion)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> AssistService {
        AssistService::new(&Config::default())
    }

    #[test]
    fn parse_response_extracts_letter_and_note() {
        let s = service();
        let suggestion = s.parse_response("B\n依据备注，更正后的答案应为 B。");
        assert_eq!(suggestion.suggested_answer.as_deref(), Some("B"));
        assert!(suggestion.confidence_note.contains("更正"));
    }

    #[test]
    fn parse_response_handles_unresolvable() {
        let s = service();
        let suggestion = s.parse_response("无法判断");
        assert!(suggestion.suggested_answer.is_none());
        assert!(suggestion.confidence_note.contains("无法判断"));
    }

    #[test]
    fn prompt_mentions_all_context_pieces() {
        let s = service();
        let prompt = s.build_prompt(&AssistRequest {
            fingerprint: "fp".to_string(),
            stem_text: "下列何者正確？".to_string(),
            option_texts: vec!["(A) 甲".to_string(), "(B) 乙".to_string()],
            candidate_answers: vec!["A".to_string(), "C".to_string()],
            raw_context: "備註：第5題答案更正為Ｃ".to_string(),
        });
        assert!(prompt.contains("下列何者正確"));
        assert!(prompt.contains("(B) 乙"));
        assert!(prompt.contains("A、C"));
        assert!(prompt.contains("更正為Ｃ"));
    }
}
