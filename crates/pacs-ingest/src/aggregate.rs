//! 派生计数维护
//!
//! 图像挂接后重新统计并写回检查和系列的图像数。始终是先读后写的重算，
//! 不做增量，重复投递或丢失的增量都不会让计数漂移。
//!
//! 并发工作者的“统计→写入”可能交错，较旧的统计结果会覆盖较新的。
//! 因此写入后再统计一次，直到写入值与实际行数一致。

use pacs_core::{EntityKind, FieldUpdate, MetadataStore, PacsError, Result};
use serde::Serialize;
use uuid::Uuid;

/// 单个计数的最大收敛轮数
const MAX_RECOUNT_ROUNDS: usize = 16;

/// 重算后的计数
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ImageCounts {
    pub study_images: i64,
    pub series_images: i64,
}

pub struct AggregateMaintainer<'a> {
    store: &'a dyn MetadataStore,
}

impl<'a> AggregateMaintainer<'a> {
    pub fn new(store: &'a dyn MetadataStore) -> Self {
        Self { store }
    }

    pub async fn recompute(&self, study_id: Uuid, series_id: Uuid) -> Result<ImageCounts> {
        let series_images = self.settle(EntityKind::Series, series_id).await?;
        let study_images = self.settle(EntityKind::Study, study_id).await?;

        tracing::debug!(
            "Recomputed image counts: study {} = {}, series {} = {}",
            study_id,
            study_images,
            series_id,
            series_images
        );

        Ok(ImageCounts {
            study_images,
            series_images,
        })
    }

    /// 统计并写回，直到写入后的再次统计与写入值相同
    async fn settle(&self, kind: EntityKind, id: Uuid) -> Result<i64> {
        let mut count = self.store.count_children(id, EntityKind::Image).await?;
        for _ in 0..MAX_RECOUNT_ROUNDS {
            self.store.update(kind, id, &[FieldUpdate::ImageCount(count)]).await?;

            let recount = self.store.count_children(id, EntityKind::Image).await?;
            if recount == count {
                return Ok(count);
            }
            tracing::debug!(
                "Image count of {} {} moved from {} to {}; rewriting",
                kind,
                id,
                count,
                recount
            );
            count = recount;
        }

        Err(PacsError::Persistence(format!(
            "image count of {} {} did not settle after {} rounds",
            kind, id, MAX_RECOUNT_ROUNDS
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use async_trait::async_trait;
    use pacs_core::{ExistingRecord, NewImage, NewRecord, NewSeries, NewStudy, StoreResult, StudyStatus};
    use pacs_database::MemoryStore;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use tokio::sync::Notify;

    fn study(uid: &str) -> NewRecord {
        NewRecord::Study(NewStudy {
            study_uid: uid.to_string(),
            patient_id: None,
            accession_number: None,
            study_datetime: Utc::now(),
            modality: "CT".to_string(),
            description: None,
            body_part: None,
            status: StudyStatus::InProgress,
        })
    }

    fn series(uid: &str, study_id: Uuid) -> NewRecord {
        NewRecord::Series(NewSeries {
            series_uid: uid.to_string(),
            study_id,
            modality: "CT".to_string(),
            series_number: 1,
            description: None,
        })
    }

    /// 扣住第一次把检查计数写成 1 的调用，直到放行
    struct HeldWriteStore {
        inner: MemoryStore,
        held: AtomicBool,
        release: Notify,
    }

    #[async_trait]
    impl MetadataStore for HeldWriteStore {
        async fn find_by_key(&self, kind: EntityKind, key: &str) -> StoreResult<Option<ExistingRecord>> {
            self.inner.find_by_key(kind, key).await
        }

        async fn insert(&self, record: &NewRecord) -> StoreResult<Uuid> {
            self.inner.insert(record).await
        }

        async fn update(&self, kind: EntityKind, id: Uuid, fields: &[FieldUpdate]) -> StoreResult<()> {
            if kind == EntityKind::Study
                && fields == [FieldUpdate::ImageCount(1)]
                && !self.held.swap(true, Ordering::SeqCst)
            {
                self.release.notified().await;
            }
            self.inner.update(kind, id, fields).await
        }

        async fn count_children(&self, parent_id: Uuid, child_kind: EntityKind) -> StoreResult<i64> {
            self.inner.count_children(parent_id, child_kind).await
        }
    }

    fn image(uid: &str, series_id: Uuid) -> NewRecord {
        NewRecord::Image(NewImage {
            sop_instance_uid: uid.to_string(),
            series_id,
            instance_number: 1,
            storage_locator: format!("/{}", uid),
            byte_size: None,
            transfer_syntax_uid: "1.2.840.10008.1.2.1".to_string(),
        })
    }

    #[tokio::test]
    async fn test_stale_write_from_slower_worker_is_corrected() {
        let store = Arc::new(HeldWriteStore {
            inner: MemoryStore::new(),
            held: AtomicBool::new(false),
            release: Notify::new(),
        });
        let study_id = store.insert(&study("1")).await.unwrap();
        let series_id = store.insert(&series("1.1", study_id)).await.unwrap();
        store.insert(&image("1.1.1", series_id)).await.unwrap();

        // 工作者 A 统计到 1，写入被扣住
        let slow = {
            let store = store.clone();
            tokio::spawn(async move {
                AggregateMaintainer::new(store.as_ref()).recompute(study_id, series_id).await
            })
        };
        while !store.held.load(Ordering::SeqCst) {
            tokio::task::yield_now().await;
        }

        // 工作者 B 挂接第二张图像并完成重算
        store.insert(&image("1.1.2", series_id)).await.unwrap();
        let fast = AggregateMaintainer::new(store.as_ref()).recompute(study_id, series_id).await.unwrap();
        assert_eq!(fast.study_images, 2);

        // A 的旧值写入后必须被纠正
        store.release.notify_one();
        let slow = slow.await.unwrap().unwrap();
        assert_eq!(slow.study_images, 2);

        let actual = store.count_children(study_id, EntityKind::Image).await.unwrap();
        assert_eq!(actual, 2);
        assert_eq!(store.inner.study(study_id).await.unwrap().image_count, actual);
        assert_eq!(store.inner.series(series_id).await.unwrap().image_count, 2);
    }

    #[tokio::test]
    async fn test_recompute_overwrites_drifted_count() {
        let store = MemoryStore::new();
        let study_id = store.insert(&study("1")).await.unwrap();
        let series_id = store.insert(&series("1.1", study_id)).await.unwrap();
        store.insert(&image("1.1.1", series_id)).await.unwrap();

        // 模拟一次被重复应用的增量
        store
            .update(EntityKind::Study, study_id, &[FieldUpdate::ImageCount(2)])
            .await
            .unwrap();

        let counts = AggregateMaintainer::new(&store).recompute(study_id, series_id).await.unwrap();
        assert_eq!(counts, ImageCounts { study_images: 1, series_images: 1 });
        assert_eq!(store.study(study_id).await.unwrap().image_count, 1);
        assert_eq!(store.series(series_id).await.unwrap().image_count, 1);

        // 重算本身是幂等的
        let again = AggregateMaintainer::new(&store).recompute(study_id, series_id).await.unwrap();
        assert_eq!(again, counts);
    }
}
