//! 错误定义模块

use thiserror::Error;

/// EMAP系统统一错误类型
#[derive(Error, Debug)]
pub enum EmapError {
    #[error("配置错误: {0}")]
    Config(String),

    #[error("数据库错误: {0}")]
    Database(String),

    #[error("消息传输错误: {0}")]
    Transport(String),

    #[error("网络错误: {0}")]
    Network(#[from] std::io::Error),

    #[error("序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("消息被忽略: {0}")]
    MessageIgnored(String),

    #[error("缺少必需数据: {0}")]
    RequiredDataMissing(String),

    #[error("数据库状态不兼容: {0}")]
    IncompatibleDatabaseState(String),

    #[error("资源未找到: {0}")]
    NotFound(String),

    #[error("系统内部错误: {0}")]
    Internal(String),
}

impl EmapError {
    /// 是否为可丢弃的对账失败（记录日志后丢弃消息，不重试）
    pub fn is_reconciliation_failure(&self) -> bool {
        matches!(
            self,
            EmapError::MessageIgnored(_)
                | EmapError::RequiredDataMissing(_)
                | EmapError::IncompatibleDatabaseState(_)
        )
    }
}

#[cfg(feature = "database")]
impl From<sqlx::Error> for EmapError {
    fn from(e: sqlx::Error) -> Self {
        EmapError::Database(e.to_string())
    }
}

/// EMAP系统统一结果类型
pub type Result<T> = std::result::Result<T, EmapError>;
