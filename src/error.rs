//! 错误处理模块
//!
//! 定义聚类引擎的错误类型。所有错误都携带足够的上下文（操作名、ID、数量），
//! 由调用方记录日志并决定重试策略，引擎内部不做自动重试。

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 聚类引擎错误类型
#[derive(Error, Debug)]
pub enum ClusterError {
    /// 输入验证失败（空语料、维度不一致），在任何状态修改之前抛出
    #[error("参数验证失败 [{operation}]: {message}")]
    Validation { operation: String, message: String },

    /// 向量维度不匹配
    #[error("向量维度不匹配: 期望 {expected}, 实际 {found}")]
    DimensionMismatch { expected: usize, found: usize },

    /// 单条分类规则求值失败
    #[error("分类规则求值失败 [{rule}]: {message}")]
    CategorizationRule { rule: String, message: String },

    /// 已有聚类任务在运行
    #[error("聚类任务正在运行，请稍后再试")]
    RunInProgress,

    /// 聚类任务被取消
    #[error("聚类任务已取消: {0}")]
    Cancelled(String),

    /// 配置错误
    #[error("配置错误: {0}")]
    Config(String),

    /// 序列化错误
    #[error("序列化错误: {0}")]
    Serialization(String),

    /// IO 错误
    #[error("IO 错误: {0}")]
    Io(String),

    /// 内部错误
    #[error("内部错误: {0}")]
    Internal(String),
}

impl ClusterError {
    /// 创建验证错误
    pub fn validation(operation: &str, message: impl Into<String>) -> Self {
        ClusterError::Validation {
            operation: operation.to_string(),
            message: message.into(),
        }
    }

    /// 稳定的错误代码，供调用方分类处理
    pub fn code(&self) -> &'static str {
        match self {
            ClusterError::Validation { .. } => "VALIDATION_ERROR",
            ClusterError::DimensionMismatch { .. } => "DIMENSION_MISMATCH",
            ClusterError::CategorizationRule { .. } => "CATEGORIZATION_RULE_ERROR",
            ClusterError::RunInProgress => "RUN_IN_PROGRESS",
            ClusterError::Cancelled(_) => "CANCELLED",
            ClusterError::Config(_) => "CONFIG_ERROR",
            ClusterError::Serialization(_) => "SERIALIZATION_ERROR",
            ClusterError::Io(_) => "IO_ERROR",
            ClusterError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl From<std::io::Error> for ClusterError {
    fn from(e: std::io::Error) -> Self {
        ClusterError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for ClusterError {
    fn from(e: serde_json::Error) -> Self {
        ClusterError::Serialization(e.to_string())
    }
}

impl From<figment::Error> for ClusterError {
    fn from(e: figment::Error) -> Self {
        ClusterError::Config(e.to_string())
    }
}

impl From<regex::Error> for ClusterError {
    fn from(e: regex::Error) -> Self {
        ClusterError::CategorizationRule {
            rule: "pattern".to_string(),
            message: e.to_string(),
        }
    }
}

/// 错误报告（用于事件通知和 CLI 输出）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorReport {
    /// 错误代码
    pub code: String,
    /// 错误消息
    pub message: String,
    /// 出错的操作
    pub operation: Option<String>,
}

impl ErrorReport {
    /// 创建新错误报告
    pub fn new(code: &str, message: &str) -> Self {
        Self {
            code: code.to_string(),
            message: message.to_string(),
            operation: None,
        }
    }

    /// 添加操作名
    pub fn with_operation(mut self, operation: &str) -> Self {
        self.operation = Some(operation.to_string());
        self
    }
}

impl From<&ClusterError> for ErrorReport {
    fn from(err: &ClusterError) -> Self {
        ErrorReport::new(err.code(), &err.to_string())
    }
}

/// 结果类型别名
pub type Result<T> = std::result::Result<T, ClusterError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let err = ClusterError::validation("preprocess", "empty corpus");
        assert_eq!(err.code(), "VALIDATION_ERROR");
        assert!(err.to_string().contains("preprocess"));

        let err = ClusterError::DimensionMismatch { expected: 3, found: 2 };
        assert_eq!(err.code(), "DIMENSION_MISMATCH");
        assert!(err.to_string().contains('3'));
    }

    #[test]
    fn test_error_report_from_error() {
        let err = ClusterError::RunInProgress;
        let report = ErrorReport::from(&err).with_operation("run");
        assert_eq!(report.code, "RUN_IN_PROGRESS");
        assert_eq!(report.operation.as_deref(), Some("run"));
    }

    #[test]
    fn test_regex_error_conversion() {
        let err: ClusterError = regex::Regex::new("(").unwrap_err().into();
        assert_eq!(err.code(), "CATEGORIZATION_RULE_ERROR");
    }
}
