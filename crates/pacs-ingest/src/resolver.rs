//! 层级身份解析
//!
//! 患者、检查、系列、图像依次查找或创建。四级共用同一个
//! [`resolve_or_create`]：按唯一键查找，未找到则条件插入，
//! 插入遇到唯一约束冲突时视为“已存在”并重新读取。

use crate::diagnostics::{Diagnostic, DiagnosticCode};
use crate::payload::NormalizedPayload;
use pacs_core::{
    EntityKind, ExistingRecord, FieldUpdate, MetadataStore, NewImage, NewPatient, NewRecord,
    NewSeries, NewStudy, PacsError, Result, StoreError, StudyStatus,
};
use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

/// 单个实体的解析结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Resolved {
    pub id: Uuid,
    /// 本次调用是否新建了记录
    pub created: bool,
    /// 记录实际引用的上级ID
    #[serde(skip)]
    pub parent_id: Option<Uuid>,
    /// 插入因并发冲突失败后通过重新读取得到
    #[serde(skip)]
    pub after_conflict: bool,
}

impl Resolved {
    fn existing(record: ExistingRecord, after_conflict: bool) -> Self {
        Self {
            id: record.id,
            created: false,
            parent_id: record.parent_id,
            after_conflict,
        }
    }
}

/// 通用的查找或创建
///
/// 对同一唯一键至多插入一次：并发调用中输掉竞争的一方会收到唯一约束冲突，
/// 随后重新读取胜出方写入的记录。`build` 只在需要插入时调用。
pub async fn resolve_or_create<F>(
    store: &dyn MetadataStore,
    kind: EntityKind,
    key: &str,
    build: F,
) -> Result<Resolved>
where
    F: FnOnce() -> NewRecord,
{
    if let Some(existing) = store.find_by_key(kind, key).await? {
        return Ok(Resolved::existing(existing, false));
    }

    let record = build();
    match store.insert(&record).await {
        Ok(id) => {
            debug!("Created {} {} ({})", kind, key, id);
            Ok(Resolved {
                id,
                created: true,
                parent_id: record.parent_id(),
                after_conflict: false,
            })
        }
        Err(StoreError::UniqueViolation { .. }) => {
            debug!("Concurrent insert of {} {}; re-reading", kind, key);
            match store.find_by_key(kind, key).await? {
                Some(existing) => Ok(Resolved::existing(existing, true)),
                None => Err(PacsError::Persistence(format!(
                    "{} {} conflicted on insert but could not be re-read",
                    kind, key
                ))),
            }
        }
        Err(e) => Err(e.into()),
    }
}

/// 已解析的层级
#[derive(Debug, Clone, Default)]
pub struct ResolvedHierarchy {
    pub patient: Option<Resolved>,
    pub study: Option<Resolved>,
    pub series: Option<Resolved>,
    pub image: Option<Resolved>,
}

impl ResolvedHierarchy {
    /// 取得创建子级所需的上级ID
    pub fn require(&self, kind: EntityKind) -> Result<Uuid> {
        let resolved = match kind {
            EntityKind::Patient => self.patient,
            EntityKind::Study => self.study,
            EntityKind::Series => self.series,
            EntityKind::Image => self.image,
            EntityKind::Report => None,
        };
        resolved.map(|r| r.id).ok_or_else(|| PacsError::Dependency {
            kind,
            message: format!("{} was not resolved", kind),
        })
    }

    /// 图像实际归属的检查
    ///
    /// 系列已挂在其他检查下时以系列的上级为准，计数、报告和通知都落在这个检查上。
    pub fn attached_study(&self) -> Result<Uuid> {
        match self.series.and_then(|series| series.parent_id) {
            Some(study_id) => Ok(study_id),
            None => self.require(EntityKind::Study),
        }
    }
}

/// 身份解析器
pub struct IdentityResolver<'a> {
    store: &'a dyn MetadataStore,
}

impl<'a> IdentityResolver<'a> {
    pub fn new(store: &'a dyn MetadataStore) -> Self {
        Self { store }
    }

    /// 依次解析四级实体
    ///
    /// 结果逐级写入 `hierarchy`，出错时已提交的上级仍保留在其中，不做回滚。
    pub async fn resolve(
        &self,
        payload: &NormalizedPayload,
        hierarchy: &mut ResolvedHierarchy,
        diagnostics: &mut Vec<Diagnostic>,
    ) -> Result<()> {
        hierarchy.patient = self.resolve_patient(payload, diagnostics).await?;

        let study = self.resolve_study(payload, hierarchy.patient, diagnostics).await?;
        hierarchy.study = Some(study);

        let study_id = hierarchy.require(EntityKind::Study)?;
        let series = resolve_or_create(self.store, EntityKind::Series, &payload.series_instance_id, || {
            NewRecord::Series(NewSeries {
                series_uid: payload.series_instance_id.clone(),
                study_id,
                modality: payload.modality.clone(),
                series_number: payload.series_number,
                description: payload.series_description.clone(),
            })
        })
        .await?;
        note_conflict(EntityKind::Series, &payload.series_instance_id, &series, diagnostics);
        check_parent(EntityKind::Series, &payload.series_instance_id, &series, study_id, diagnostics);
        hierarchy.series = Some(series);

        let series_id = hierarchy.require(EntityKind::Series)?;
        let image = resolve_or_create(self.store, EntityKind::Image, &payload.sop_instance_id, || {
            NewRecord::Image(NewImage {
                sop_instance_uid: payload.sop_instance_id.clone(),
                series_id,
                instance_number: payload.instance_number,
                storage_locator: payload.storage_locator.clone(),
                byte_size: payload.byte_size,
                transfer_syntax_uid: payload.transfer_syntax_uid.clone(),
            })
        })
        .await?;
        note_conflict(EntityKind::Image, &payload.sop_instance_id, &image, diagnostics);
        check_parent(EntityKind::Image, &payload.sop_instance_id, &image, series_id, diagnostics);
        hierarchy.image = Some(image);

        Ok(())
    }

    async fn resolve_patient(
        &self,
        payload: &NormalizedPayload,
        diagnostics: &mut Vec<Diagnostic>,
    ) -> Result<Option<Resolved>> {
        let Some(mrn) = payload.patient_id.as_deref() else {
            diagnostics.push(Diagnostic::warning(
                DiagnosticCode::PatientUnresolved,
                format!(
                    "no MRN in payload; study {} left without patient for later reconciliation",
                    payload.study_instance_id
                ),
            ));
            return Ok(None);
        };

        let patient = resolve_or_create(self.store, EntityKind::Patient, mrn, || {
            NewRecord::Patient(NewPatient {
                mrn: mrn.to_string(),
                last_name: payload.patient_name.last_name.clone(),
                first_name: payload.patient_name.first_name.clone(),
                sex: payload.patient_sex,
                birth_date: payload.patient_birth_date,
                phone: None,
            })
        })
        .await?;
        note_conflict(EntityKind::Patient, mrn, &patient, diagnostics);

        Ok(Some(patient))
    }

    async fn resolve_study(
        &self,
        payload: &NormalizedPayload,
        patient: Option<Resolved>,
        diagnostics: &mut Vec<Diagnostic>,
    ) -> Result<Resolved> {
        let patient_id = patient.map(|p| p.id);
        let uid = &payload.study_instance_id;

        let mut study = resolve_or_create(self.store, EntityKind::Study, uid, || {
            NewRecord::Study(NewStudy {
                study_uid: uid.clone(),
                patient_id,
                accession_number: payload.accession_number.clone(),
                study_datetime: payload.study_date,
                modality: payload.modality.clone(),
                description: payload.study_description.clone(),
                body_part: payload.body_part.clone(),
                status: StudyStatus::InProgress,
            })
        })
        .await?;
        note_conflict(EntityKind::Study, uid, &study, diagnostics);

        if study.created {
            return Ok(study);
        }

        let Some(patient_id) = patient_id else {
            return Ok(study);
        };

        // 已有检查：必要时回填患者引用。回填是条件写入，并发回填时以先写入者为准
        if study.parent_id.is_none() {
            self.store
                .update(EntityKind::Study, study.id, &[FieldUpdate::PatientRef(patient_id)])
                .await?;
            study.parent_id = self
                .store
                .find_by_key(EntityKind::Study, uid)
                .await?
                .and_then(|record| record.parent_id);

            if study.parent_id == Some(patient_id) {
                diagnostics.push(Diagnostic::info(
                    DiagnosticCode::PatientBackfilled,
                    format!("study {} linked to patient {}", uid, patient_id),
                ));
                return Ok(study);
            }
        }

        if let Some(existing) = study.parent_id.filter(|existing| *existing != patient_id) {
            diagnostics.push(Diagnostic::warning(
                DiagnosticCode::PatientMismatch,
                format!(
                    "study {} belongs to patient {} but payload resolved patient {}; kept existing",
                    uid, existing, patient_id
                ),
            ));
        }

        Ok(study)
    }
}

fn note_conflict(kind: EntityKind, key: &str, resolved: &Resolved, diagnostics: &mut Vec<Diagnostic>) {
    if resolved.after_conflict {
        diagnostics.push(Diagnostic::info(
            DiagnosticCode::ResolvedAfterConflict,
            format!("{} {} was created concurrently; reused {}", kind, key, resolved.id),
        ));
    }
}

/// 已有记录挂在别的上级下时只记录诊断，不改挂
fn check_parent(
    kind: EntityKind,
    key: &str,
    resolved: &Resolved,
    expected_parent: Uuid,
    diagnostics: &mut Vec<Diagnostic>,
) {
    if !resolved.created && resolved.parent_id != Some(expected_parent) {
        diagnostics.push(Diagnostic::warning(
            DiagnosticCode::HierarchyConflict,
            format!(
                "{} {} already belongs to {:?}, not {}; kept existing",
                kind, key, resolved.parent_id, expected_parent
            ),
        ));
    }
}
