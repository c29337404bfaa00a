//! # PACS数据库模块
//!
//! 负责医学影像元数据的存储，提供PostgreSQL存储实现和同等约束的进程内存储实现。

pub mod connection;
pub mod memory;
pub mod models;
pub mod queries;

// 重新导出主要类型
pub use connection::DatabasePool;
pub use memory::MemoryStore;
pub use queries::PgStore;
