//! 错误定义模块

use crate::models::EntityKind;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// PACS系统统一错误类型
#[derive(Error, Debug)]
pub enum PacsError {
    #[error("配置错误: {0}")]
    Config(String),

    #[error("验证错误: {0}")]
    Validation(String),

    #[error("依赖错误: 无法解析上级{kind}: {message}")]
    Dependency { kind: EntityKind, message: String },

    #[error("持久化错误: {0}")]
    Persistence(String),

    #[error("序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO错误: {0}")]
    Io(#[from] std::io::Error),
}

/// 对外暴露的错误类别
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ErrorKind {
    #[serde(rename = "ValidationError")]
    Validation,
    #[serde(rename = "DependencyError")]
    Dependency,
    #[serde(rename = "PersistenceError")]
    Persistence,
    #[serde(rename = "InternalError")]
    Internal,
}

impl PacsError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PacsError::Validation(_) | PacsError::Serialization(_) => ErrorKind::Validation,
            PacsError::Dependency { .. } => ErrorKind::Dependency,
            PacsError::Persistence(_) | PacsError::Io(_) => ErrorKind::Persistence,
            PacsError::Config(_) => ErrorKind::Internal,
        }
    }

    /// 调用方是否值得重试
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Persistence
    }
}

/// 存储层错误
///
/// 唯一约束冲突单独成类，入库流程把它视为“已存在”。
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("唯一约束冲突: {kind} {key}")]
    UniqueViolation { kind: EntityKind, key: String },

    #[error("外键约束冲突: {kind}: {message}")]
    ForeignKeyViolation { kind: EntityKind, message: String },

    #[error("不支持的操作: {0}")]
    Unsupported(String),

    #[error("存储后端错误: {0}")]
    Backend(String),
}

impl From<StoreError> for PacsError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::ForeignKeyViolation { kind, message } => PacsError::Dependency {
                kind: kind.parent().unwrap_or(kind),
                message,
            },
            other => PacsError::Persistence(other.to_string()),
        }
    }
}

/// PACS系统统一结果类型
pub type Result<T> = std::result::Result<T, PacsError>;

/// 存储层结果类型
pub type StoreResult<T> = std::result::Result<T, StoreError>;
