//! 核心数据模型定义

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 层级实体类型
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Patient,
    Study,
    Series,
    Image,
    Report,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Patient => "patient",
            Self::Study => "study",
            Self::Series => "series",
            Self::Image => "image",
            Self::Report => "report",
        }
    }

    /// 上级实体类型（患者没有上级）
    pub fn parent(&self) -> Option<EntityKind> {
        match self {
            Self::Patient => None,
            Self::Study => Some(Self::Patient),
            Self::Series => Some(Self::Study),
            Self::Image => Some(Self::Series),
            Self::Report => Some(Self::Study),
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 患者基本信息
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Patient {
    pub id: Uuid,
    pub mrn: String,                           // 外部病历号
    pub last_name: String,
    pub first_name: String,
    pub sex: Option<Sex>,
    pub birth_date: Option<NaiveDate>,
    pub phone: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 性别枚举
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Sex {
    Male,
    Female,
    Other,
}

impl Sex {
    pub fn code(&self) -> &'static str {
        match self {
            Sex::Male => "M",
            Sex::Female => "F",
            Sex::Other => "O",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code.trim().to_ascii_uppercase().as_str() {
            "M" | "MALE" => Some(Sex::Male),
            "F" | "FEMALE" => Some(Sex::Female),
            "O" | "OTHER" => Some(Sex::Other),
            _ => None,
        }
    }
}

/// 检查信息
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Study {
    pub id: Uuid,
    pub study_uid: String, // DICOM Study Instance UID
    pub patient_id: Option<Uuid>,
    pub accession_number: Option<String>,
    pub study_datetime: DateTime<Utc>,
    pub modality: String,
    pub description: Option<String>,
    pub body_part: Option<String>,
    pub status: StudyStatus,
    pub image_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 检查状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum StudyStatus {
    Scheduled,   // 已预约
    InProgress,  // 检查中
    Completed,   // 已完成
    Preliminary, // 初步报告
    Final,       // 最终报告
    Canceled,    // 已取消
}

impl StudyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StudyStatus::Scheduled => "SCHEDULED",
            StudyStatus::InProgress => "IN_PROGRESS",
            StudyStatus::Completed => "COMPLETED",
            StudyStatus::Preliminary => "PRELIMINARY",
            StudyStatus::Final => "FINAL",
            StudyStatus::Canceled => "CANCELED",
        }
    }
}

/// 系列信息
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Series {
    pub id: Uuid,
    pub series_uid: String, // DICOM Series Instance UID
    pub study_id: Uuid,
    pub modality: String,
    pub series_number: i32,
    pub description: Option<String>,
    pub image_count: i64,
    pub created_at: DateTime<Utc>,
}

/// 影像实例信息
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Image {
    pub id: Uuid,
    pub sop_instance_uid: String, // DICOM SOP Instance UID
    pub series_id: Uuid,
    pub instance_number: i32,
    pub storage_locator: String,
    pub byte_size: Option<i64>,
    pub transfer_syntax_uid: String,
    pub created_at: DateTime<Utc>,
}

/// 报告状态
///
/// 入库流程只会写入 `Pending`，后续状态由阅片流程推进。
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ReportStatus {
    Pending,
    InReview,
    Final,
    Amended,
}

impl ReportStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportStatus::Pending => "PENDING",
            ReportStatus::InReview => "IN_REVIEW",
            ReportStatus::Final => "FINAL",
            ReportStatus::Amended => "AMENDED",
        }
    }
}

/// 诊断报告
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub id: Uuid,
    pub study_id: Uuid,
    pub findings: String,
    pub impression: String,
    pub technique: String,
    pub status: ReportStatus,
    pub created_at: DateTime<Utc>,
}

// 插入模型 - 用于创建新记录

/// 新患者插入模型
#[derive(Debug, Clone)]
pub struct NewPatient {
    pub mrn: String,
    pub last_name: String,
    pub first_name: String,
    pub sex: Option<Sex>,
    pub birth_date: Option<NaiveDate>,
    pub phone: Option<String>,
}

/// 新检查插入模型
#[derive(Debug, Clone)]
pub struct NewStudy {
    pub study_uid: String,
    pub patient_id: Option<Uuid>,
    pub accession_number: Option<String>,
    pub study_datetime: DateTime<Utc>,
    pub modality: String,
    pub description: Option<String>,
    pub body_part: Option<String>,
    pub status: StudyStatus,
}

/// 新系列插入模型
#[derive(Debug, Clone)]
pub struct NewSeries {
    pub series_uid: String,
    pub study_id: Uuid,
    pub modality: String,
    pub series_number: i32,
    pub description: Option<String>,
}

/// 新实例插入模型
#[derive(Debug, Clone)]
pub struct NewImage {
    pub sop_instance_uid: String,
    pub series_id: Uuid,
    pub instance_number: i32,
    pub storage_locator: String,
    pub byte_size: Option<i64>,
    pub transfer_syntax_uid: String,
}

/// 新报告插入模型
#[derive(Debug, Clone)]
pub struct NewReport {
    pub study_id: Uuid,
    pub findings: String,
    pub impression: String,
    pub technique: String,
    pub status: ReportStatus,
}

/// 待插入的记录
#[derive(Debug, Clone)]
pub enum NewRecord {
    Patient(NewPatient),
    Study(NewStudy),
    Series(NewSeries),
    Image(NewImage),
    Report(NewReport),
}

impl NewRecord {
    pub fn kind(&self) -> EntityKind {
        match self {
            NewRecord::Patient(_) => EntityKind::Patient,
            NewRecord::Study(_) => EntityKind::Study,
            NewRecord::Series(_) => EntityKind::Series,
            NewRecord::Image(_) => EntityKind::Image,
            NewRecord::Report(_) => EntityKind::Report,
        }
    }

    /// 记录在其作用域内的唯一键
    ///
    /// 报告以所属检查的内部ID作为唯一键。
    pub fn key(&self) -> String {
        match self {
            NewRecord::Patient(p) => p.mrn.clone(),
            NewRecord::Study(s) => s.study_uid.clone(),
            NewRecord::Series(s) => s.series_uid.clone(),
            NewRecord::Image(i) => i.sop_instance_uid.clone(),
            NewRecord::Report(r) => r.study_id.to_string(),
        }
    }

    /// 记录引用的上级实体ID
    pub fn parent_id(&self) -> Option<Uuid> {
        match self {
            NewRecord::Patient(_) => None,
            NewRecord::Study(s) => s.patient_id,
            NewRecord::Series(s) => Some(s.study_id),
            NewRecord::Image(i) => Some(i.series_id),
            NewRecord::Report(r) => Some(r.study_id),
        }
    }
}

/// 按唯一键查到的已有记录
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExistingRecord {
    pub id: Uuid,
    pub parent_id: Option<Uuid>,
}

/// 字段更新
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldUpdate {
    /// 回填检查的患者引用，仅在引用为空时生效
    PatientRef(Uuid),
    /// 检查或系列的图像计数
    ImageCount(i64),
}
