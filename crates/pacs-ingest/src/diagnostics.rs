//! 结构化诊断事件
//!
//! 流程中的默认值填充、跳过和冲突都记录为诊断事件，随 `Outcome` 一起返回，
//! 由入口统一输出到日志。

use serde::{Deserialize, Serialize};

/// 诊断级别
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticLevel {
    Info,
    Warning,
}

/// 诊断代码
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticCode {
    StudyIdSynthesized,
    SeriesIdDerived,
    SopIdDerived,
    StudyDateDefaulted,
    StudyTimeIgnored,
    ModalityDefaulted,
    PatientNameDefaulted,
    StorageLocatorDerived,
    MetadataIgnored,
    InvalidField,
    PatientUnresolved,
    PatientBackfilled,
    PatientMismatch,
    HierarchyConflict,
    ResolvedAfterConflict,
}

/// 诊断事件
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Diagnostic {
    pub level: DiagnosticLevel,
    pub code: DiagnosticCode,
    pub message: String,
}

impl Diagnostic {
    pub fn info(code: DiagnosticCode, message: impl Into<String>) -> Self {
        Self {
            level: DiagnosticLevel::Info,
            code,
            message: message.into(),
        }
    }

    pub fn warning(code: DiagnosticCode, message: impl Into<String>) -> Self {
        Self {
            level: DiagnosticLevel::Warning,
            code,
            message: message.into(),
        }
    }

    /// 输出到tracing
    pub fn log(&self) {
        match self.level {
            DiagnosticLevel::Info => tracing::info!(code = ?self.code, "{}", self.message),
            DiagnosticLevel::Warning => tracing::warn!(code = ?self.code, "{}", self.message),
        }
    }
}

/// 在诊断列表中查找指定代码
pub fn has_code(diagnostics: &[Diagnostic], code: DiagnosticCode) -> bool {
    diagnostics.iter().any(|d| d.code == code)
}
