//! # PACS入库模块
//!
//! 把设备或RIS发来的异步采集通知对齐到 患者 → 检查 → 系列 → 图像 层级，
//! 并为每个检查准备一份待写的占位报告。重复投递、重试投递和并发投递
//! 都会得到相同的最终存储状态。

pub mod aggregate;
pub mod config;
pub mod diagnostics;
pub mod outcome;
pub mod payload;
pub mod pipeline;
pub mod report;
pub mod resolver;

pub use config::IngestConfig;
pub use diagnostics::{Diagnostic, DiagnosticCode, DiagnosticLevel};
pub use outcome::{Outcome, OutcomeError, PayloadIdentifiers, Resolution};
pub use payload::{NormalizedPayload, PayloadNormalizer};
pub use pipeline::Ingestor;
pub use resolver::{resolve_or_create, Resolved};
