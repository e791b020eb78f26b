//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了离线数据层的错误类型和处理机制。

use thiserror::Error;

/// 离线数据层错误类型枚举
///
/// 覆盖持久化存储、网络传输、序列化和配置等各类错误
#[derive(Error, Debug)]
pub enum SyncError {
    /// 存储错误（配额超限、权限受限、Schema损坏等）
    #[error("Storage error: {0}")]
    Storage(String),

    /// 序列化错误
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// 网络不可用（未收到任何响应）
    #[error("Network unavailable: {0}")]
    NetworkUnavailable(String),

    /// 收到非成功的HTTP响应
    #[error("HTTP {status} for {url}")]
    Http { status: u16, url: String },

    /// 响应状态码不在 100..=599 范围内
    #[error("Malformed response status {status} for {url}")]
    MalformedResponse { status: u16, url: String },

    /// 记录格式不合法（缺少主键等）
    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    /// 配置错误
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// 操作不支持
    #[error("Operation not supported: {0}")]
    NotSupported(String),

    /// IO错误
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for SyncError {
    fn from(e: serde_json::Error) -> Self {
        SyncError::Serialization(e.to_string())
    }
}

impl SyncError {
    /// 是否为存储层错误
    pub fn is_storage(&self) -> bool {
        matches!(self, SyncError::Storage(_))
    }

    /// 是否可重试
    ///
    /// 网络不可用、畸形响应和 4xx 以外的非成功状态视为可恢复，
    /// 客户端错误（4xx）和无效记录不可恢复
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::NetworkUnavailable(_) | SyncError::MalformedResponse { .. } => true,
            SyncError::Http { status, .. } => !(400..500).contains(status),
            _ => false,
        }
    }
}

/// 操作结果类型别名
pub type Result<T> = std::result::Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_classification() {
        assert!(SyncError::NetworkUnavailable("down".into()).is_retryable());
        assert!(SyncError::Http {
            status: 503,
            url: "/api/x".into()
        }
        .is_retryable());
        assert!(!SyncError::Http {
            status: 404,
            url: "/api/x".into()
        }
        .is_retryable());
        assert!(SyncError::MalformedResponse {
            status: 600,
            url: "/api/x".into()
        }
        .is_retryable());
        assert!(!SyncError::InvalidRecord("bad method".into()).is_retryable());
        assert!(!SyncError::Storage("quota".into()).is_retryable());
        assert!(SyncError::Storage("quota".into()).is_storage());
    }
}
