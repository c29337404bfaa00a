//! 入库结果
//!
//! 汇总每级实体的解析结果、最终计数、诊断事件和错误。这里也是唯一触发
//! “检查有新内容”通知的地方。

use crate::diagnostics::Diagnostic;
use crate::payload::NormalizedPayload;
use crate::resolver::{Resolved, ResolvedHierarchy};
use pacs_core::{EntityKind, ErrorKind, PacsError, StudyContentNotifier};
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

/// 单个实体的对外结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Resolution {
    pub id: Uuid,
    pub created: bool,
}

impl From<Resolved> for Resolution {
    fn from(resolved: Resolved) -> Self {
        Self {
            id: resolved.id,
            created: resolved.created,
        }
    }
}

/// 载荷中的标识字段，用于诊断重放
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PayloadIdentifiers {
    pub patient_id: Option<String>,
    pub study_instance_id: Option<String>,
    pub series_instance_id: Option<String>,
    pub sop_instance_id: Option<String>,
}

impl PayloadIdentifiers {
    /// 从未规范化的载荷中尽力提取标识字段
    pub fn from_raw(raw: &Value) -> Self {
        Self {
            patient_id: raw_text(raw, &["patientId", "patient_id", "PatientID", "mrn"]),
            study_instance_id: raw_text(raw, &["studyInstanceId", "study_instance_id", "StudyInstanceUID"]),
            series_instance_id: raw_text(raw, &["seriesInstanceId", "series_instance_id", "SeriesInstanceUID"]),
            sop_instance_id: raw_text(raw, &["sopInstanceId", "sop_instance_id", "SOPInstanceUID"]),
        }
    }
}

fn raw_text(raw: &Value, keys: &[&str]) -> Option<String> {
    [raw.get("metadata"), Some(raw)]
        .into_iter()
        .flatten()
        .find_map(|scope| {
            keys.iter()
                .find_map(|key| scope.get(*key))
                .and_then(|v| match v {
                    Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
                    Value::Number(n) => Some(n.to_string()),
                    _ => None,
                })
        })
}

impl From<&NormalizedPayload> for PayloadIdentifiers {
    fn from(payload: &NormalizedPayload) -> Self {
        Self {
            patient_id: payload.patient_id.clone(),
            study_instance_id: Some(payload.study_instance_id.clone()),
            series_instance_id: Some(payload.series_instance_id.clone()),
            sop_instance_id: Some(payload.sop_instance_id.clone()),
        }
    }
}

/// 失败信息
#[derive(Debug, Clone, Serialize)]
pub struct OutcomeError {
    pub kind: ErrorKind,
    pub message: String,
    pub retryable: bool,
    pub identifiers: PayloadIdentifiers,
}

/// 一次入库的完整结果
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Outcome {
    pub success: bool,
    pub patient: Option<Resolution>,
    pub study: Option<Resolution>,
    pub series: Option<Resolution>,
    pub image: Option<Resolution>,
    pub report: Option<Resolution>,
    /// 图像实际归属的检查，系列挂在其他检查下时与 `study` 不同
    pub attached_study: Option<Uuid>,
    pub image_count: Option<i64>,
    pub error: Option<OutcomeError>,
    pub diagnostics: Vec<Diagnostic>,
    /// 是否触发了下游通知
    pub notified: bool,
}

impl Outcome {
    pub fn is_new_study(&self) -> bool {
        self.study.map_or(false, |s| s.created)
    }

    pub fn is_new_image(&self) -> bool {
        self.image.map_or(false, |i| i.created)
    }

    /// 本次新建的实体类型
    pub fn created_entities(&self) -> Vec<EntityKind> {
        [
            (EntityKind::Patient, self.patient),
            (EntityKind::Study, self.study),
            (EntityKind::Series, self.series),
            (EntityKind::Image, self.image),
            (EntityKind::Report, self.report),
        ]
        .into_iter()
        .filter(|(_, resolution)| resolution.map_or(false, |r| r.created))
        .map(|(kind, _)| kind)
        .collect()
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error.as_ref().map(|e| e.kind)
    }
}

/// 流程执行过程中累积的状态
#[derive(Debug, Default)]
pub struct PipelineState {
    pub hierarchy: ResolvedHierarchy,
    pub report: Option<Resolved>,
    pub image_count: Option<i64>,
    pub diagnostics: Vec<Diagnostic>,
    pub identifiers: PayloadIdentifiers,
}

/// 结果汇报器
pub struct OutcomeReporter<'a> {
    notifier: &'a dyn StudyContentNotifier,
}

impl<'a> OutcomeReporter<'a> {
    pub fn new(notifier: &'a dyn StudyContentNotifier) -> Self {
        Self { notifier }
    }

    /// 组装结果，必要时触发下游通知
    ///
    /// 本次调用新建了检查或图像就通知，即使后续阶段失败；重试时这些记录已存在，
    /// 不会再次通知。重复投递已见过的实例不会通知。
    pub async fn report(&self, state: PipelineState, result: pacs_core::Result<()>) -> Outcome {
        let PipelineState {
            hierarchy,
            report,
            image_count,
            diagnostics,
            identifiers,
        } = state;

        let error = result.err().map(|err| failure(err, identifiers));
        let attached_study = hierarchy.attached_study().ok();

        let mut outcome = Outcome {
            success: error.is_none(),
            patient: hierarchy.patient.map(Resolution::from),
            study: hierarchy.study.map(Resolution::from),
            series: hierarchy.series.map(Resolution::from),
            image: hierarchy.image.map(Resolution::from),
            report: report.map(Resolution::from),
            attached_study,
            image_count,
            error,
            diagnostics,
            notified: false,
        };

        if let Some(study_id) = attached_study {
            // 新建的检查若没有接收本次图像，对它而言没有新增内容
            let is_new_study = outcome.study.map_or(false, |s| s.created && s.id == study_id);
            if is_new_study || outcome.is_new_image() {
                self.notifier.on_study_content_added(study_id, is_new_study).await;
                outcome.notified = true;
            }
        }

        outcome
    }
}

/// 把错误转换为对外的失败信息
pub fn failure(err: PacsError, identifiers: PayloadIdentifiers) -> OutcomeError {
    OutcomeError {
        kind: err.kind(),
        message: err.to_string(),
        retryable: err.is_retryable(),
        identifiers,
    }
}
