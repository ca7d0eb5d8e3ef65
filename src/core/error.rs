//! 错误处理体系 (Error Handling System)
//!
//! 定义引擎领域错误、错误分类 (Taxonomy) 以及全局 Result 别名。

use thiserror::Error;

/// 错误分类
///
/// 与引擎对外承诺的处理策略一一对应：
/// `Config` 启动期致命；`Source`/`Timeout` 在单个站点内降级为 failed；
/// `Cancelled` 静默丢弃。
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum ErrorKind {
    Config,
    Source,
    Timeout,
    Cancelled,
}

/// 全局错误定义 (Engine Domain Errors)
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Settings error: {0}")]
    Settings(#[from] config::ConfigError),

    #[error("Source [{source_id}] failed: {message}")]
    Source { source_id: String, message: String },

    #[error("Unknown source: {0}")]
    UnknownSource(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Middleware error: {0}")]
    Middleware(#[from] reqwest_middleware::Error),

    #[error("Browser error: {0}")]
    Browser(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Task cancelled")]
    Cancelled,

    #[error("Dispatcher is shutting down")]
    Shutdown,

    #[error("Parsing error: {0}")]
    Parse(String),

    #[error("Episode sort {sort} is outside 1..={len}")]
    EpisodeOutOfRange { sort: f64, len: usize },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// 远端响应体无法解码；适配文档的解析错误一律归入 `Config`
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// 全局 Result 别名
pub type Result<T> = std::result::Result<T, EngineError>;

impl EngineError {
    pub fn source_failed(source_id: impl Into<String>, message: impl std::fmt::Display) -> Self {
        EngineError::Source {
            source_id: source_id.into(),
            message: message.to_string(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        EngineError::Config(message.into())
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, EngineError::Cancelled)
    }

    /// 探测超时，支持 reqwest 与中间件嵌套错误的解包
    pub fn is_timeout(&self) -> bool {
        match self {
            EngineError::Timeout(_) => true,
            EngineError::Network(e) => e.is_timeout(),
            EngineError::Middleware(reqwest_middleware::Error::Reqwest(e)) => e.is_timeout(),
            _ => false,
        }
    }

    /// 归入对外的错误分类
    pub fn kind(&self) -> ErrorKind {
        if self.is_cancelled() {
            return ErrorKind::Cancelled;
        }
        if self.is_timeout() {
            return ErrorKind::Timeout;
        }
        match self {
            EngineError::Config(_) | EngineError::Settings(_) => ErrorKind::Config,
            _ => ErrorKind::Source,
        }
    }
}
