use std::fmt;

/// 应用程序错误类型
///
/// 只有会让一个三元组（或整次运行）失败的错误才走这里；
/// 可恢复的解析异常一律进入 `IssueReport`。
#[derive(Debug)]
pub enum AppError {
    /// PDF 提取错误（中止所在三元组）
    Extraction(ExtractionError),
    /// AI 辅助错误（降级为 Flagged，不中止）
    Assist(AssistError),
    /// 持久化错误（重试耗尽后中止所在三元组）
    Store(StoreError),
    /// 文件操作错误
    File(FileError),
    /// 配置错误
    Config(ConfigError),
    /// 其他错误（用于包装第三方库错误）
    Other(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Extraction(e) => write!(f, "PDF提取错误: {}", e),
            AppError::Assist(e) => write!(f, "AI辅助错误: {}", e),
            AppError::Store(e) => write!(f, "持久化错误: {}", e),
            AppError::File(e) => write!(f, "文件错误: {}", e),
            AppError::Config(e) => write!(f, "配置错误: {}", e),
            AppError::Other(msg) => write!(f, "错误: {}", msg),
        }
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AppError::Extraction(e) => Some(e),
            AppError::Assist(e) => Some(e),
            AppError::Store(e) => Some(e),
            AppError::File(e) => Some(e),
            AppError::Config(e) => Some(e),
            AppError::Other(_) => None,
        }
    }
}

/// PDF 提取相关错误
#[derive(Debug)]
pub enum ExtractionError {
    /// PDFium 库初始化失败
    LibraryInitFailed {
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    /// 打开文档失败（损坏、加密、非 PDF）
    OpenFailed {
        path: String,
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    /// 读取页面失败
    PageReadFailed {
        path: String,
        page_index: usize,
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl fmt::Display for ExtractionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExtractionError::LibraryInitFailed { source } => {
                write!(f, "PDFium 初始化失败: {}", source)
            }
            ExtractionError::OpenFailed { path, source } => {
                write!(f, "无法打开 PDF ({}): {}", path, source)
            }
            ExtractionError::PageReadFailed {
                path,
                page_index,
                source,
            } => {
                write!(f, "读取第 {} 页失败 ({}): {}", page_index + 1, path, source)
            }
        }
    }
}

impl std::error::Error for ExtractionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ExtractionError::LibraryInitFailed { source }
            | ExtractionError::OpenFailed { source, .. }
            | ExtractionError::PageReadFailed { source, .. } => {
                Some(source.as_ref() as &(dyn std::error::Error + 'static))
            }
        }
    }
}

/// AI 辅助相关错误
#[derive(Debug)]
pub enum AssistError {
    /// API 调用失败
    ApiCallFailed {
        model: String,
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    /// 调用超时
    Timeout {
        model: String,
        timeout_secs: u64,
    },
    /// 返回内容为空
    EmptyContent {
        model: String,
    },
}

impl fmt::Display for AssistError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssistError::ApiCallFailed { model, source } => {
                write!(f, "AI辅助调用失败 (模型: {}): {}", model, source)
            }
            AssistError::Timeout {
                model,
                timeout_secs,
            } => {
                write!(f, "AI辅助调用超时 (模型: {}, {}s)", model, timeout_secs)
            }
            AssistError::EmptyContent { model } => {
                write!(f, "AI辅助返回内容为空 (模型: {})", model)
            }
        }
    }
}

impl std::error::Error for AssistError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AssistError::ApiCallFailed { source, .. } => {
                Some(source.as_ref() as &(dyn std::error::Error + 'static))
            }
            _ => None,
        }
    }
}

/// 持久化相关错误
#[derive(Debug)]
pub enum StoreError {
    /// 网络请求失败
    RequestFailed {
        endpoint: String,
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    /// 存储端返回错误响应
    BadResponse {
        endpoint: String,
        status: u16,
        message: String,
    },
    /// 重试耗尽
    RetriesExhausted {
        endpoint: String,
        attempts: usize,
    },
    /// 响应解析失败
    JsonParseFailed {
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::RequestFailed { endpoint, source } => {
                write!(f, "存储请求失败 ({}): {}", endpoint, source)
            }
            StoreError::BadResponse {
                endpoint,
                status,
                message,
            } => {
                write!(
                    f,
                    "存储端返回错误 ({}): status={}, message={}",
                    endpoint, status, message
                )
            }
            StoreError::RetriesExhausted { endpoint, attempts } => {
                write!(f, "存储重试 {} 次后仍失败 ({})", attempts, endpoint)
            }
            StoreError::JsonParseFailed { source } => {
                write!(f, "存储响应解析失败: {}", source)
            }
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StoreError::RequestFailed { source, .. } | StoreError::JsonParseFailed { source } => {
                Some(source.as_ref() as &(dyn std::error::Error + 'static))
            }
            _ => None,
        }
    }
}

/// 文件操作错误
#[derive(Debug)]
pub enum FileError {
    /// 读取文件失败
    ReadFailed {
        path: String,
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    /// 写入文件失败
    WriteFailed {
        path: String,
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    /// 目录不存在
    DirectoryNotFound {
        path: String,
    },
}

impl fmt::Display for FileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileError::ReadFailed { path, source } => {
                write!(f, "读取文件失败 ({}): {}", path, source)
            }
            FileError::WriteFailed { path, source } => {
                write!(f, "写入文件失败 ({}): {}", path, source)
            }
            FileError::DirectoryNotFound { path } => write!(f, "目录不存在: {}", path),
        }
    }
}

impl std::error::Error for FileError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            FileError::ReadFailed { source, .. } | FileError::WriteFailed { source, .. } => {
                Some(source.as_ref() as &(dyn std::error::Error + 'static))
            }
            _ => None,
        }
    }
}

/// 配置错误
#[derive(Debug)]
pub enum ConfigError {
    /// 配置文件解析失败
    TomlParseFailed {
        path: String,
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    /// 缺少必需配置项
    MissingValue {
        key: String,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::TomlParseFailed { path, source } => {
                write!(f, "配置文件解析失败 ({}): {}", path, source)
            }
            ConfigError::MissingValue { key } => {
                write!(f, "缺少必需配置项: {}", key)
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::TomlParseFailed { source, .. } => {
                Some(source.as_ref() as &(dyn std::error::Error + 'static))
            }
            _ => None,
        }
    }
}

// ========== 从常见错误类型转换 ==========

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::File(FileError::ReadFailed {
            path: String::new(),
            source: Box::new(err),
        })
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Store(StoreError::JsonParseFailed {
            source: Box::new(err),
        })
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        let endpoint = err
            .url()
            .map(|u| u.to_string())
            .unwrap_or_default();
        AppError::Store(StoreError::RequestFailed {
            endpoint,
            source: Box::new(err),
        })
    }
}

// ========== 便捷构造函数 ==========

impl AppError {
    /// 创建打开 PDF 失败错误
    pub fn pdf_open_failed(
        path: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        AppError::Extraction(ExtractionError::OpenFailed {
            path: path.into(),
            source: Box::new(source),
        })
    }

    /// 创建读取页面失败错误
    pub fn pdf_page_failed(
        path: impl Into<String>,
        page_index: usize,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        AppError::Extraction(ExtractionError::PageReadFailed {
            path: path.into(),
            page_index,
            source: Box::new(source),
        })
    }

    /// 创建 AI 辅助调用失败错误
    pub fn assist_failed(
        model: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        AppError::Assist(AssistError::ApiCallFailed {
            model: model.into(),
            source: Box::new(source),
        })
    }

    /// 创建文件写入失败错误
    pub fn file_write_failed(
        path: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        AppError::File(FileError::WriteFailed {
            path: path.into(),
            source: Box::new(source),
        })
    }

    /// 判断是否属于会中止三元组的提取失败
    pub fn is_extraction_failure(&self) -> bool {
        matches!(self, AppError::Extraction(_))
    }
}

// ========== Result 类型别名 ==========

/// 应用程序结果类型
pub type AppResult<T> = Result<T, AppError>;
