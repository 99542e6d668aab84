use crate::error::{AppError, AppResult, ConfigError};
use serde::Deserialize;
use std::path::Path;

/// 程序配置
///
/// 三元组工作任务各自持有一份克隆，流水线内不读任何全局状态。
#[derive(Clone, Debug)]
pub struct Config {
    /// 考古题根目录（`<科目>/<年份>_<期次>/` 两级结构）
    pub exams_dir: String,
    /// 更正/备注文档根目录（与 exams_dir 同构，可选）
    pub notes_dir: String,
    /// 结构化结果输出目录
    pub output_dir: String,
    /// 同时处理的三元组数量
    pub max_concurrent_triples: usize,
    /// 模糊配对的相似度阈值（normalized Levenshtein）
    pub fuzzy_match_threshold: f64,
    /// 是否显示详细日志
    pub verbose_logging: bool,
    // --- AI 辅助配置 ---
    pub assist_enabled: bool,
    pub assist_api_key: String,
    pub assist_api_base_url: String,
    pub assist_model_name: String,
    pub assist_timeout_secs: u64,
    // --- 持久化配置 ---
    pub store_enabled: bool,
    pub store_api_url: String,
    pub store_api_key: String,
    pub store_max_retries: usize,
    pub store_retry_backoff_ms: u64,
    pub store_batch_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            exams_dir: "raw_data/exams".to_string(),
            notes_dir: "raw_data/notes".to_string(),
            output_dir: "processed_data".to_string(),
            max_concurrent_triples: 4,
            fuzzy_match_threshold: 0.85,
            verbose_logging: false,
            assist_enabled: false,
            assist_api_key: String::new(),
            assist_api_base_url: "https://openrouter.ai/api/v1".to_string(),
            assist_model_name: "deepseek/deepseek-r1:free".to_string(),
            assist_timeout_secs: 30,
            store_enabled: false,
            store_api_url: String::new(),
            store_api_key: String::new(),
            store_max_retries: 3,
            store_retry_backoff_ms: 500,
            store_batch_size: 50,
        }
    }
}

/// `exam_ingest.toml` 中允许覆盖的字段（全部可选）
#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    exams_dir: Option<String>,
    notes_dir: Option<String>,
    output_dir: Option<String>,
    max_concurrent_triples: Option<usize>,
    fuzzy_match_threshold: Option<f64>,
    verbose_logging: Option<bool>,
    assist_enabled: Option<bool>,
    assist_api_key: Option<String>,
    assist_api_base_url: Option<String>,
    assist_model_name: Option<String>,
    assist_timeout_secs: Option<u64>,
    store_enabled: Option<bool>,
    store_api_url: Option<String>,
    store_api_key: Option<String>,
    store_max_retries: Option<usize>,
    store_retry_backoff_ms: Option<u64>,
    store_batch_size: Option<usize>,
}

impl Config {
    /// 加载配置：默认值 ← exam_ingest.toml ← 环境变量，右侧优先
    pub fn load() -> AppResult<Self> {
        let mut config = Self::default();
        let toml_path = Path::new("exam_ingest.toml");
        if toml_path.exists() {
            config = config.merge_file(toml_path)?;
        }
        Ok(config.merge_env())
    }

    fn merge_file(mut self, path: &Path) -> AppResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            AppError::File(crate::error::FileError::ReadFailed {
                path: path.display().to_string(),
                source: Box::new(e),
            })
        })?;
        let file: ConfigFile = toml::from_str(&content).map_err(|e| {
            AppError::Config(ConfigError::TomlParseFailed {
                path: path.display().to_string(),
                source: Box::new(e),
            })
        })?;

        if let Some(v) = file.exams_dir {
            self.exams_dir = v;
        }
        if let Some(v) = file.notes_dir {
            self.notes_dir = v;
        }
        if let Some(v) = file.output_dir {
            self.output_dir = v;
        }
        if let Some(v) = file.max_concurrent_triples {
            self.max_concurrent_triples = v.max(1);
        }
        if let Some(v) = file.fuzzy_match_threshold {
            self.fuzzy_match_threshold = v;
        }
        if let Some(v) = file.verbose_logging {
            self.verbose_logging = v;
        }
        if let Some(v) = file.assist_enabled {
            self.assist_enabled = v;
        }
        if let Some(v) = file.assist_api_key {
            self.assist_api_key = v;
        }
        if let Some(v) = file.assist_api_base_url {
            self.assist_api_base_url = v;
        }
        if let Some(v) = file.assist_model_name {
            self.assist_model_name = v;
        }
        if let Some(v) = file.assist_timeout_secs {
            self.assist_timeout_secs = v;
        }
        if let Some(v) = file.store_enabled {
            self.store_enabled = v;
        }
        if let Some(v) = file.store_api_url {
            self.store_api_url = v;
        }
        if let Some(v) = file.store_api_key {
            self.store_api_key = v;
        }
        if let Some(v) = file.store_max_retries {
            self.store_max_retries = v;
        }
        if let Some(v) = file.store_retry_backoff_ms {
            self.store_retry_backoff_ms = v;
        }
        if let Some(v) = file.store_batch_size {
            self.store_batch_size = v.max(1);
        }
        Ok(self)
    }

    fn merge_env(self) -> Self {
        Self {
            exams_dir: std::env::var("EXAMS_DIR").unwrap_or(self.exams_dir),
            notes_dir: std::env::var("NOTES_DIR").unwrap_or(self.notes_dir),
            output_dir: std::env::var("OUTPUT_DIR").unwrap_or(self.output_dir),
            max_concurrent_triples: std::env::var("MAX_CONCURRENT_TRIPLES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(self.max_concurrent_triples),
            fuzzy_match_threshold: std::env::var("FUZZY_MATCH_THRESHOLD")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(self.fuzzy_match_threshold),
            verbose_logging: std::env::var("VERBOSE_LOGGING")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(self.verbose_logging),
            assist_enabled: std::env::var("ASSIST_ENABLED")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(self.assist_enabled),
            assist_api_key: std::env::var("AI_API_KEY").unwrap_or(self.assist_api_key),
            assist_api_base_url: std::env::var("AI_API_ENDPOINT").unwrap_or(self.assist_api_base_url),
            assist_model_name: std::env::var("AI_MODEL_NAME").unwrap_or(self.assist_model_name),
            assist_timeout_secs: std::env::var("ASSIST_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(self.assist_timeout_secs),
            store_enabled: std::env::var("STORE_ENABLED")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(self.store_enabled),
            store_api_url: std::env::var("SUPABASE_URL").unwrap_or(self.store_api_url),
            store_api_key: std::env::var("SUPABASE_KEY").unwrap_or(self.store_api_key),
            store_max_retries: std::env::var("STORE_MAX_RETRIES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(self.store_max_retries),
            store_retry_backoff_ms: std::env::var("STORE_RETRY_BACKOFF_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(self.store_retry_backoff_ms),
            store_batch_size: std::env::var("STORE_BATCH_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(self.store_batch_size),
        }
    }

    /// 图片输出目录（output_dir 下的 images/）
    pub fn images_dir(&self) -> String {
        format!("{}/images", self.output_dir)
    }

    /// 问题清单文件路径
    pub fn issue_file(&self) -> String {
        format!("{}/issues.txt", self.output_dir)
    }
}
