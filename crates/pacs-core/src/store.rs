//! 持久化与通知协作者接口
//!
//! 入库核心只通过这里的窄接口访问存储，不发起任何其他查询。

use crate::error::StoreResult;
use crate::models::{EntityKind, ExistingRecord, FieldUpdate, NewRecord};
use async_trait::async_trait;
use uuid::Uuid;

/// 元数据存储特征
///
/// `insert` 在唯一键冲突时必须返回 [`StoreError::UniqueViolation`]，
/// 而不是覆盖或重复插入。
///
/// [`StoreError::UniqueViolation`]: crate::error::StoreError::UniqueViolation
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// 按唯一键查找记录
    async fn find_by_key(&self, kind: EntityKind, key: &str) -> StoreResult<Option<ExistingRecord>>;

    /// 插入新记录，返回内部ID
    async fn insert(&self, record: &NewRecord) -> StoreResult<Uuid>;

    /// 更新指定记录的字段
    async fn update(&self, kind: EntityKind, id: Uuid, fields: &[FieldUpdate]) -> StoreResult<()>;

    /// 统计上级记录下某类后代记录的数量
    ///
    /// 检查下的图像按其所有系列累计。
    async fn count_children(&self, parent_id: Uuid, child_kind: EntityKind) -> StoreResult<i64>;
}

/// 检查内容变更通知特征
///
/// 实现方不得在此阻塞等待投递结果。
#[async_trait]
pub trait StudyContentNotifier: Send + Sync {
    async fn on_study_content_added(&self, study_id: Uuid, is_new_study: bool);
}

/// 不做任何事的通知器
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifier;

#[async_trait]
impl StudyContentNotifier for NoopNotifier {
    async fn on_study_content_added(&self, _study_id: Uuid, _is_new_study: bool) {}
}
