//! 占位报告初始化
//!
//! 每个检查恰好一份报告，首张图像到达时以 `PENDING` 状态创建。

use crate::config::IngestConfig;
use crate::resolver::{resolve_or_create, Resolved};
use pacs_core::{EntityKind, MetadataStore, NewRecord, NewReport, ReportStatus, Result};
use uuid::Uuid;

pub struct ReportInitializer<'a> {
    store: &'a dyn MetadataStore,
    config: &'a IngestConfig,
}

impl<'a> ReportInitializer<'a> {
    pub fn new(store: &'a dyn MetadataStore, config: &'a IngestConfig) -> Self {
        Self { store, config }
    }

    /// 占位报告内容
    pub fn placeholder(&self, study_id: Uuid) -> NewReport {
        NewReport {
            study_id,
            findings: self.config.placeholder_findings.clone(),
            impression: self.config.placeholder_impression.clone(),
            technique: self.config.placeholder_technique.clone(),
            status: ReportStatus::Pending,
        }
    }

    /// 确保检查存在报告，已存在时原样返回
    pub async fn ensure_placeholder(&self, study_id: Uuid) -> Result<Resolved> {
        let key = study_id.to_string();
        let report = resolve_or_create(self.store, EntityKind::Report, &key, || {
            NewRecord::Report(self.placeholder(study_id))
        })
        .await?;

        if report.created {
            tracing::info!("Created pending report {} for study {}", report.id, study_id);
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use pacs_core::{NewStudy, StudyStatus};
    use pacs_database::MemoryStore;

    async fn seed_study(store: &MemoryStore) -> Uuid {
        store
            .insert(&NewRecord::Study(NewStudy {
                study_uid: "1.2.3".to_string(),
                patient_id: None,
                accession_number: None,
                study_datetime: Utc::now(),
                modality: "MR".to_string(),
                description: None,
                body_part: None,
                status: StudyStatus::InProgress,
            }))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_report_created_once() {
        let store = MemoryStore::new();
        let config = IngestConfig::default();
        let study_id = seed_study(&store).await;
        let initializer = ReportInitializer::new(&store, &config);

        let first = initializer.ensure_placeholder(study_id).await.unwrap();
        let second = initializer.ensure_placeholder(study_id).await.unwrap();

        assert!(first.created);
        assert!(!second.created);
        assert_eq!(first.id, second.id);

        let reports = store.reports_for_study(study_id).await;
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].status, ReportStatus::Pending);
        assert_eq!(reports[0].findings, config.placeholder_findings);
    }
}
