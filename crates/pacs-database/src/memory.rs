//! 进程内元数据存储
//!
//! 与PostgreSQL存储执行相同的唯一约束和外键约束，唯一性检查与插入在同一把锁内完成。
//! 用于测试和不接数据库的单机部署。

use async_trait::async_trait;
use chrono::Utc;
use pacs_core::{
    EntityKind, ExistingRecord, FieldUpdate, Image, MetadataStore, NewRecord, Patient, Report,
    Series, Study, StoreError, StoreResult,
};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Default)]
struct Tables {
    patients: HashMap<Uuid, Patient>,
    studies: HashMap<Uuid, Study>,
    series: HashMap<Uuid, Series>,
    images: HashMap<Uuid, Image>,
    reports: HashMap<Uuid, Report>,
    /// 每类实体的唯一键索引
    keys: HashMap<EntityKind, HashMap<String, Uuid>>,
}

impl Tables {
    fn lookup(&self, kind: EntityKind, key: &str) -> Option<Uuid> {
        self.keys.get(&kind).and_then(|index| index.get(key)).copied()
    }

    fn parent_of(&self, kind: EntityKind, id: Uuid) -> Option<Uuid> {
        match kind {
            EntityKind::Patient => None,
            EntityKind::Study => self.studies.get(&id).and_then(|s| s.patient_id),
            EntityKind::Series => self.series.get(&id).map(|s| s.study_id),
            EntityKind::Image => self.images.get(&id).map(|i| i.series_id),
            EntityKind::Report => self.reports.get(&id).map(|r| r.study_id),
        }
    }

    fn parent_exists(&self, kind: EntityKind, parent_id: Uuid) -> bool {
        match kind {
            EntityKind::Patient => true,
            EntityKind::Study => self.patients.contains_key(&parent_id),
            EntityKind::Series | EntityKind::Report => self.studies.contains_key(&parent_id),
            EntityKind::Image => self.series.contains_key(&parent_id),
        }
    }
}

/// 进程内存储
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
    failures: RwLock<FailurePlan>,
}

/// 故障注入配置
#[derive(Debug, Default, Clone)]
struct FailurePlan {
    unavailable: bool,
    failing_inserts: Vec<EntityKind>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 模拟存储不可达
    pub async fn set_unavailable(&self, unavailable: bool) {
        self.failures.write().await.unavailable = unavailable;
    }

    /// 让指定类型的插入返回后端错误
    pub async fn fail_inserts_of(&self, kind: EntityKind) {
        self.failures.write().await.failing_inserts.push(kind);
    }

    /// 清除所有故障注入
    pub async fn clear_failures(&self) {
        *self.failures.write().await = FailurePlan::default();
    }

    async fn check_available(&self) -> StoreResult<()> {
        if self.failures.read().await.unavailable {
            return Err(StoreError::Backend("memory store unavailable".to_string()));
        }
        Ok(())
    }

    pub async fn count(&self, kind: EntityKind) -> usize {
        let tables = self.tables.read().await;
        match kind {
            EntityKind::Patient => tables.patients.len(),
            EntityKind::Study => tables.studies.len(),
            EntityKind::Series => tables.series.len(),
            EntityKind::Image => tables.images.len(),
            EntityKind::Report => tables.reports.len(),
        }
    }

    pub async fn patient(&self, id: Uuid) -> Option<Patient> {
        self.tables.read().await.patients.get(&id).cloned()
    }

    pub async fn patient_by_mrn(&self, mrn: &str) -> Option<Patient> {
        let tables = self.tables.read().await;
        tables
            .lookup(EntityKind::Patient, mrn)
            .and_then(|id| tables.patients.get(&id).cloned())
    }

    pub async fn study(&self, id: Uuid) -> Option<Study> {
        self.tables.read().await.studies.get(&id).cloned()
    }

    pub async fn study_by_uid(&self, study_uid: &str) -> Option<Study> {
        let tables = self.tables.read().await;
        tables
            .lookup(EntityKind::Study, study_uid)
            .and_then(|id| tables.studies.get(&id).cloned())
    }

    pub async fn series(&self, id: Uuid) -> Option<Series> {
        self.tables.read().await.series.get(&id).cloned()
    }

    pub async fn image(&self, id: Uuid) -> Option<Image> {
        self.tables.read().await.images.get(&id).cloned()
    }

    pub async fn reports_for_study(&self, study_id: Uuid) -> Vec<Report> {
        self.tables
            .read()
            .await
            .reports
            .values()
            .filter(|r| r.study_id == study_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl MetadataStore for MemoryStore {
    async fn find_by_key(&self, kind: EntityKind, key: &str) -> StoreResult<Option<ExistingRecord>> {
        self.check_available().await?;

        let tables = self.tables.read().await;
        Ok(tables.lookup(kind, key).map(|id| ExistingRecord {
            id,
            parent_id: tables.parent_of(kind, id),
        }))
    }

    async fn insert(&self, record: &NewRecord) -> StoreResult<Uuid> {
        self.check_available().await?;

        let kind = record.kind();
        if self.failures.read().await.failing_inserts.contains(&kind) {
            return Err(StoreError::Backend(format!("injected {} insert failure", kind)));
        }

        let key = record.key();
        let mut tables = self.tables.write().await;

        if tables.lookup(kind, &key).is_some() {
            return Err(StoreError::UniqueViolation { kind, key });
        }
        if let Some(parent_id) = record.parent_id() {
            if !tables.parent_exists(kind, parent_id) {
                return Err(StoreError::ForeignKeyViolation {
                    kind,
                    message: format!("parent {} does not exist", parent_id),
                });
            }
        }

        let id = Uuid::new_v4();
        let now = Utc::now();
        match record {
            NewRecord::Patient(p) => {
                tables.patients.insert(id, Patient {
                    id,
                    mrn: p.mrn.clone(),
                    last_name: p.last_name.clone(),
                    first_name: p.first_name.clone(),
                    sex: p.sex,
                    birth_date: p.birth_date,
                    phone: p.phone.clone(),
                    created_at: now,
                    updated_at: now,
                });
            }
            NewRecord::Study(s) => {
                tables.studies.insert(id, Study {
                    id,
                    study_uid: s.study_uid.clone(),
                    patient_id: s.patient_id,
                    accession_number: s.accession_number.clone(),
                    study_datetime: s.study_datetime,
                    modality: s.modality.clone(),
                    description: s.description.clone(),
                    body_part: s.body_part.clone(),
                    status: s.status,
                    image_count: 0,
                    created_at: now,
                    updated_at: now,
                });
            }
            NewRecord::Series(s) => {
                tables.series.insert(id, Series {
                    id,
                    series_uid: s.series_uid.clone(),
                    study_id: s.study_id,
                    modality: s.modality.clone(),
                    series_number: s.series_number,
                    description: s.description.clone(),
                    image_count: 0,
                    created_at: now,
                });
            }
            NewRecord::Image(i) => {
                tables.images.insert(id, Image {
                    id,
                    sop_instance_uid: i.sop_instance_uid.clone(),
                    series_id: i.series_id,
                    instance_number: i.instance_number,
                    storage_locator: i.storage_locator.clone(),
                    byte_size: i.byte_size,
                    transfer_syntax_uid: i.transfer_syntax_uid.clone(),
                    created_at: now,
                });
            }
            NewRecord::Report(r) => {
                tables.reports.insert(id, Report {
                    id,
                    study_id: r.study_id,
                    findings: r.findings.clone(),
                    impression: r.impression.clone(),
                    technique: r.technique.clone(),
                    status: r.status,
                    created_at: now,
                });
            }
        }
        tables.keys.entry(kind).or_default().insert(key, id);

        Ok(id)
    }

    async fn update(&self, kind: EntityKind, id: Uuid, fields: &[FieldUpdate]) -> StoreResult<()> {
        self.check_available().await?;

        let mut tables = self.tables.write().await;
        for field in fields {
            match (kind, field) {
                (EntityKind::Study, FieldUpdate::PatientRef(patient_id)) => {
                    if !tables.patients.contains_key(patient_id) {
                        return Err(StoreError::ForeignKeyViolation {
                            kind,
                            message: format!("patient {} does not exist", patient_id),
                        });
                    }
                    let study = tables
                        .studies
                        .get_mut(&id)
                        .ok_or_else(|| StoreError::Backend(format!("study {} not found", id)))?;
                    if study.patient_id.is_none() {
                        study.patient_id = Some(*patient_id);
                        study.updated_at = Utc::now();
                    }
                }
                (EntityKind::Study, FieldUpdate::ImageCount(count)) => {
                    let study = tables
                        .studies
                        .get_mut(&id)
                        .ok_or_else(|| StoreError::Backend(format!("study {} not found", id)))?;
                    study.image_count = *count;
                    study.updated_at = Utc::now();
                }
                (EntityKind::Series, FieldUpdate::ImageCount(count)) => {
                    let series = tables
                        .series
                        .get_mut(&id)
                        .ok_or_else(|| StoreError::Backend(format!("series {} not found", id)))?;
                    series.image_count = *count;
                }
                (kind, field) => {
                    return Err(StoreError::Unsupported(format!("{:?} on {}", field, kind)));
                }
            }
        }

        Ok(())
    }

    async fn count_children(&self, parent_id: Uuid, child_kind: EntityKind) -> StoreResult<i64> {
        self.check_available().await?;

        let tables = self.tables.read().await;
        let count = match child_kind {
            EntityKind::Study => tables
                .studies
                .values()
                .filter(|s| s.patient_id == Some(parent_id))
                .count(),
            EntityKind::Series => tables.series.values().filter(|s| s.study_id == parent_id).count(),
            EntityKind::Image => tables
                .images
                .values()
                .filter(|i| {
                    i.series_id == parent_id
                        || tables
                            .series
                            .get(&i.series_id)
                            .map_or(false, |s| s.study_id == parent_id)
                })
                .count(),
            EntityKind::Report => tables.reports.values().filter(|r| r.study_id == parent_id).count(),
            EntityKind::Patient => {
                return Err(StoreError::Unsupported("patients have no parent".to_string()));
            }
        };

        Ok(count as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use pacs_core::{NewImage, NewPatient, NewSeries, NewStudy, StudyStatus};

    fn new_study(uid: &str) -> NewRecord {
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

    fn new_series(uid: &str, study_id: Uuid) -> NewRecord {
        NewRecord::Series(NewSeries {
            series_uid: uid.to_string(),
            study_id,
            modality: "CT".to_string(),
            series_number: 1,
            description: None,
        })
    }

    fn new_image(uid: &str, series_id: Uuid) -> NewRecord {
        NewRecord::Image(NewImage {
            sop_instance_uid: uid.to_string(),
            series_id,
            instance_number: 1,
            storage_locator: format!("/data/{}.dcm", uid),
            byte_size: None,
            transfer_syntax_uid: "1.2.840.10008.1.2.1".to_string(),
        })
    }

    #[tokio::test]
    async fn test_duplicate_key_is_unique_violation() {
        let store = MemoryStore::new();
        store.insert(&new_study("1.2.3")).await.unwrap();

        let err = store.insert(&new_study("1.2.3")).await.unwrap_err();
        assert!(matches!(err, StoreError::UniqueViolation { kind: EntityKind::Study, .. }));
        assert_eq!(store.count(EntityKind::Study).await, 1);
    }

    #[tokio::test]
    async fn test_missing_parent_is_foreign_key_violation() {
        let store = MemoryStore::new();
        let err = store.insert(&new_series("1.2.3.1", Uuid::new_v4())).await.unwrap_err();
        assert!(matches!(err, StoreError::ForeignKeyViolation { kind: EntityKind::Series, .. }));
    }

    #[tokio::test]
    async fn test_find_by_key_reports_parent() {
        let store = MemoryStore::new();
        let study_id = store.insert(&new_study("1.2.3")).await.unwrap();
        let series_id = store.insert(&new_series("1.2.3.1", study_id)).await.unwrap();

        let found = store.find_by_key(EntityKind::Series, "1.2.3.1").await.unwrap();
        assert_eq!(found, Some(ExistingRecord { id: series_id, parent_id: Some(study_id) }));
        assert!(store.find_by_key(EntityKind::Series, "9.9").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_count_images_across_series() {
        let store = MemoryStore::new();
        let study_id = store.insert(&new_study("1.2.3")).await.unwrap();
        let s1 = store.insert(&new_series("1.2.3.1", study_id)).await.unwrap();
        let s2 = store.insert(&new_series("1.2.3.2", study_id)).await.unwrap();
        store.insert(&new_image("1.2.3.1.1", s1)).await.unwrap();
        store.insert(&new_image("1.2.3.2.1", s2)).await.unwrap();
        store.insert(&new_image("1.2.3.2.2", s2)).await.unwrap();

        assert_eq!(store.count_children(study_id, EntityKind::Image).await.unwrap(), 3);
        assert_eq!(store.count_children(s2, EntityKind::Image).await.unwrap(), 2);
        assert_eq!(store.count_children(study_id, EntityKind::Series).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_update_rejects_unsupported_field() {
        let store = MemoryStore::new();
        let study_id = store.insert(&new_study("1.2.3")).await.unwrap();

        store
            .update(EntityKind::Study, study_id, &[FieldUpdate::ImageCount(4)])
            .await
            .unwrap();
        assert_eq!(store.study(study_id).await.unwrap().image_count, 4);

        let err = store
            .update(EntityKind::Image, study_id, &[FieldUpdate::ImageCount(1)])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Unsupported(_)));
    }

    #[tokio::test]
    async fn test_patient_ref_is_only_backfilled_once() {
        let store = MemoryStore::new();
        let study_id = store.insert(&new_study("1.2.3")).await.unwrap();
        let mut patients = Vec::new();
        for mrn in ["MRN-A", "MRN-B"] {
            let id = store
                .insert(&NewRecord::Patient(NewPatient {
                    mrn: mrn.to_string(),
                    last_name: "Doe".to_string(),
                    first_name: "Jane".to_string(),
                    sex: None,
                    birth_date: None,
                    phone: None,
                }))
                .await
                .unwrap();
            patients.push(id);
        }

        for patient_id in &patients {
            store
                .update(EntityKind::Study, study_id, &[FieldUpdate::PatientRef(*patient_id)])
                .await
                .unwrap();
        }

        assert_eq!(store.study(study_id).await.unwrap().patient_id, Some(patients[0]));
    }

    #[tokio::test]
    async fn test_unavailable_store_fails_every_call() {
        let store = MemoryStore::new();
        store.set_unavailable(true).await;
        assert!(matches!(
            store.find_by_key(EntityKind::Study, "1").await,
            Err(StoreError::Backend(_))
        ));

        store.clear_failures().await;
        assert!(store.find_by_key(EntityKind::Study, "1").await.unwrap().is_none());
    }
}
