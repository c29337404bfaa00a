//! # PACS Core
//!
//! PACS系统的核心模块，提供基础数据结构、错误定义、存储与通知接口和通用工具。

pub mod error;
pub mod models;
pub mod store;
pub mod utils;

pub use error::{ErrorKind, PacsError, Result, StoreError, StoreResult};
pub use models::*;
pub use store::{MetadataStore, NoopNotifier, StudyContentNotifier};
