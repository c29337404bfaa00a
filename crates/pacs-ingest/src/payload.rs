//! 通知载荷规范化
//!
//! 把异构的采集通知载荷转换为严格的内部结构。除了载荷本身无法解析之外，
//! 任何缺失或格式错误的字段都以默认值填充并记录诊断事件，不会拒收。

use crate::config::IngestConfig;
use crate::diagnostics::{Diagnostic, DiagnosticCode};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use pacs_core::utils::generate_dicom_uid;
use pacs_core::{PacsError, Result, Sex};
use serde::Serialize;
use serde_json::{Map, Value};

/// 嵌套元数据块的键名
const METADATA_BLOCK: &str = "metadata";

const UNKNOWN_LAST_NAME: &str = "Unknown";
const UNKNOWN_FIRST_NAME: &str = "Patient";

/// 各字段接受的键名：camelCase、snake_case 与 DICOM 关键字
mod field {
    pub const PATIENT_ID: &[&str] = &["patientId", "patient_id", "PatientID", "mrn"];
    pub const PATIENT_NAME: &[&str] = &["patientName", "patient_name", "PatientName"];
    pub const PATIENT_LAST_NAME: &[&str] = &["patientLastName", "patient_last_name", "lastName"];
    pub const PATIENT_FIRST_NAME: &[&str] = &["patientFirstName", "patient_first_name", "firstName"];
    pub const PATIENT_SEX: &[&str] = &["patientSex", "patient_sex", "PatientSex"];
    pub const PATIENT_BIRTH_DATE: &[&str] = &["patientBirthDate", "patient_birth_date", "PatientBirthDate"];
    pub const STUDY_INSTANCE_ID: &[&str] = &["studyInstanceId", "study_instance_id", "StudyInstanceUID", "studyInstanceUid"];
    pub const SERIES_INSTANCE_ID: &[&str] = &["seriesInstanceId", "series_instance_id", "SeriesInstanceUID", "seriesInstanceUid"];
    pub const SOP_INSTANCE_ID: &[&str] = &["sopInstanceId", "sop_instance_id", "SOPInstanceUID", "sopInstanceUid"];
    pub const MODALITY: &[&str] = &["modality", "Modality"];
    pub const STUDY_DATE: &[&str] = &["studyDate", "study_date", "StudyDate"];
    pub const STUDY_TIME: &[&str] = &["studyTime", "study_time", "StudyTime"];
    pub const ACCESSION_NUMBER: &[&str] = &["accessionNumber", "accession_number", "AccessionNumber"];
    pub const BODY_PART: &[&str] = &["bodyPart", "body_part", "BodyPartExamined"];
    pub const STUDY_DESCRIPTION: &[&str] = &["studyDescription", "study_description", "StudyDescription"];
    pub const SERIES_DESCRIPTION: &[&str] = &["seriesDescription", "series_description", "SeriesDescription"];
    pub const SERIES_NUMBER: &[&str] = &["seriesNumber", "series_number", "SeriesNumber"];
    pub const INSTANCE_NUMBER: &[&str] = &["instanceNumber", "instance_number", "InstanceNumber"];
    pub const STORAGE_LOCATOR: &[&str] = &["storageLocator", "storage_locator", "filePath", "file_path"];
    pub const BYTE_SIZE: &[&str] = &["byteSize", "byte_size", "fileSize", "file_size"];
    pub const TRANSFER_SYNTAX: &[&str] = &["transferSyntaxUid", "transfer_syntax_uid", "TransferSyntaxUID"];
}

/// 患者姓名
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PersonName {
    pub last_name: String,
    pub first_name: String,
}

/// 规范化后的载荷
#[derive(Debug, Clone, Serialize)]
pub struct NormalizedPayload {
    pub patient_id: Option<String>,
    pub patient_name: PersonName,
    pub patient_sex: Option<Sex>,
    pub patient_birth_date: Option<NaiveDate>,
    pub study_instance_id: String,
    pub series_instance_id: String,
    pub sop_instance_id: String,
    pub modality: String,
    pub study_date: DateTime<Utc>,
    pub accession_number: Option<String>,
    pub body_part: Option<String>,
    pub study_description: Option<String>,
    pub series_description: Option<String>,
    pub series_number: i32,
    pub instance_number: i32,
    pub storage_locator: String,
    pub byte_size: Option<i64>,
    pub transfer_syntax_uid: String,
}

/// 规范化结果
#[derive(Debug, Clone)]
pub struct Normalization {
    pub payload: NormalizedPayload,
    pub diagnostics: Vec<Diagnostic>,
}

/// 解析传输层载荷
///
/// 这是唯一会拒收通知的地方。
pub fn parse_payload(bytes: &[u8]) -> Result<Value> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Err(PacsError::Validation("payload is empty".to_string()));
    }
    serde_json::from_slice(bytes)
        .map_err(|e| PacsError::Validation(format!("payload is not valid JSON: {}", e)))
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// 按作用域顺序查找字段：先元数据块，后顶层
struct Fields<'a> {
    scopes: Vec<&'a Map<String, Value>>,
}

impl<'a> Fields<'a> {
    fn value(&self, aliases: &[&str]) -> Option<&'a Value> {
        self.scopes.iter().copied().find_map(|scope| {
            aliases
                .iter()
                .find_map(|alias| scope.get(*alias))
                .filter(|value| !is_blank(value))
        })
    }

    fn text(&self, aliases: &[&str], diagnostics: &mut Vec<Diagnostic>) -> Option<String> {
        match self.value(aliases)? {
            Value::String(s) => Some(s.trim()).filter(|s| !s.is_empty()).map(str::to_string),
            Value::Number(n) => Some(n.to_string()),
            // DICOM JSON 的人名值形如 {"Alphabetic": "Doe^John"}
            Value::Object(obj) => obj
                .get("Alphabetic")
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string),
            other => {
                diagnostics.push(Diagnostic::warning(
                    DiagnosticCode::InvalidField,
                    format!("{} is {}, expected text; ignored", aliases[0], json_type(other)),
                ));
                None
            }
        }
    }

    fn integer(&self, aliases: &[&str], diagnostics: &mut Vec<Diagnostic>) -> Option<i64> {
        let value = self.value(aliases)?;
        let parsed = match value {
            Value::Number(n) => n
                .as_i64()
                .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
            Value::String(s) => s.trim().parse::<i64>().ok(),
            _ => None,
        };

        if parsed.is_none() {
            diagnostics.push(Diagnostic::warning(
                DiagnosticCode::InvalidField,
                format!("{} = {} is not an integer; ignored", aliases[0], value),
            ));
        }
        parsed
    }

    /// 取 `i32` 范围内的整数，越界时记录诊断
    fn int32(&self, aliases: &[&str], diagnostics: &mut Vec<Diagnostic>) -> Option<i32> {
        let value = self.integer(aliases, diagnostics)?;
        match i32::try_from(value) {
            Ok(value) => Some(value),
            Err(_) => {
                diagnostics.push(Diagnostic::warning(
                    DiagnosticCode::InvalidField,
                    format!("{} = {} is out of range; ignored", aliases[0], value),
                ));
                None
            }
        }
    }
}

/// 空值和空白字符串都视为缺失，让下一个作用域的值生效
fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

/// 解析检查日期
///
/// 接受8位紧凑日期 `YYYYMMDD`（按位置截取年、月、日），
/// 或预格式化的时间戳（RFC 3339、`YYYY-MM-DD HH:MM:SS`、`YYYY-MM-DD`）。
/// 只含日期的格式可以与检查时间组合。
pub fn parse_study_date(date: &str, time: Option<NaiveTime>) -> Option<DateTime<Utc>> {
    let date = date.trim();
    let at_time = |day: NaiveDate| Utc.from_utc_datetime(&day.and_time(time.unwrap_or_default()));

    if date.len() == 8 && date.bytes().all(|b| b.is_ascii_digit()) {
        let year: i32 = date[0..4].parse().ok()?;
        let month: u32 = date[4..6].parse().ok()?;
        let day: u32 = date[6..8].parse().ok()?;
        return NaiveDate::from_ymd_opt(year, month, day).map(at_time);
    }

    if let Ok(ts) = DateTime::parse_from_rfc3339(date) {
        return Some(ts.with_timezone(&Utc));
    }

    const FORMATS: [&str; 4] = [
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S%.f",
    ];
    for format in FORMATS {
        if let Ok(ts) = NaiveDateTime::parse_from_str(date, format) {
            return Some(Utc.from_utc_datetime(&ts));
        }
    }

    NaiveDate::parse_from_str(date, "%Y-%m-%d").ok().map(at_time)
}

/// 解析DICOM检查时间 `HHMMSS[.ffffff]`，也接受 `HHMM`、`HH` 与带冒号的写法
pub fn parse_study_time(time: &str) -> Option<NaiveTime> {
    let time = time.trim();
    let (main, fraction) = match time.split_once('.') {
        Some((main, fraction)) => (main, Some(fraction)),
        None => (time, None),
    };
    let main: String = main.chars().filter(|c| *c != ':').collect();

    if main.is_empty() || main.len() > 6 || main.len() % 2 != 0 || !main.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    let hour: u32 = main[0..2].parse().ok()?;
    let minute: u32 = if main.len() >= 4 { main[2..4].parse().ok()? } else { 0 };
    let second: u32 = if main.len() == 6 { main[4..6].parse().ok()? } else { 0 };
    let micros: u32 = match fraction {
        Some(f) => {
            if f.is_empty() || f.len() > 6 || !f.bytes().all(|b| b.is_ascii_digit()) {
                return None;
            }
            format!("{:0<6}", f).parse().ok()?
        }
        None => 0,
    };

    NaiveTime::from_hms_micro_opt(hour, minute, second, micros)
}

/// 解析出生日期，接受 `YYYYMMDD` 和 `YYYY-MM-DD`
fn parse_birth_date(value: &str) -> Option<NaiveDate> {
    parse_study_date(value, None)
        .filter(|_| value.len() == 8 || value.len() == 10)
        .map(|ts| ts.date_naive())
}

/// 按分隔符拆分复合姓名为 (姓, 名)
pub fn split_person_name(composite: &str, delimiter: char) -> (Option<String>, Option<String>) {
    let mut parts = composite.split(delimiter).map(str::trim);
    let last = parts.next().filter(|s| !s.is_empty()).map(str::to_string);
    let first = parts.next().filter(|s| !s.is_empty()).map(str::to_string);
    (last, first)
}

/// 载荷规范化器
pub struct PayloadNormalizer<'a> {
    config: &'a IngestConfig,
}

impl<'a> PayloadNormalizer<'a> {
    pub fn new(config: &'a IngestConfig) -> Self {
        Self { config }
    }

    /// 规范化载荷
    ///
    /// `now` 是本次处理时间，缺失或无法解析的检查日期取此值。
    pub fn normalize(&self, raw: &Value, now: DateTime<Utc>) -> Result<Normalization> {
        let top = raw.as_object().ok_or_else(|| {
            PacsError::Validation(format!("payload must be a JSON object, got {}", json_type(raw)))
        })?;

        let mut diagnostics = Vec::new();
        let mut scopes = Vec::with_capacity(2);
        match top.get(METADATA_BLOCK) {
            Some(Value::Object(metadata)) => scopes.push(metadata),
            Some(Value::Null) | None => {}
            Some(other) => diagnostics.push(Diagnostic::warning(
                DiagnosticCode::MetadataIgnored,
                format!("metadata block is {}, expected an object; ignored", json_type(other)),
            )),
        }
        scopes.push(top);
        let fields = Fields { scopes };

        // 标识符
        let study_instance_id = match fields.text(field::STUDY_INSTANCE_ID, &mut diagnostics) {
            Some(uid) => uid,
            None => {
                let uid = generate_dicom_uid(&self.config.uid_root);
                diagnostics.push(Diagnostic::warning(
                    DiagnosticCode::StudyIdSynthesized,
                    format!("studyInstanceId missing; synthesized {}", uid),
                ));
                uid
            }
        };

        let instance_number = fields
            .int32(field::INSTANCE_NUMBER, &mut diagnostics)
            .unwrap_or(1);

        let series_instance_id = match fields.text(field::SERIES_INSTANCE_ID, &mut diagnostics) {
            Some(uid) => uid,
            None => {
                let uid = format!("{}.{}", study_instance_id, self.config.derived_series_suffix);
                diagnostics.push(Diagnostic::info(
                    DiagnosticCode::SeriesIdDerived,
                    format!("seriesInstanceId missing; derived {}", uid),
                ));
                uid
            }
        };

        let sop_instance_id = match fields.text(field::SOP_INSTANCE_ID, &mut diagnostics) {
            Some(uid) => uid,
            None => {
                let uid = format!("{}.{}", series_instance_id, instance_number);
                diagnostics.push(Diagnostic::info(
                    DiagnosticCode::SopIdDerived,
                    format!("sopInstanceId missing; derived {}", uid),
                ));
                uid
            }
        };

        let modality = match fields.text(field::MODALITY, &mut diagnostics) {
            Some(modality) => modality.to_ascii_uppercase(),
            None => {
                diagnostics.push(Diagnostic::info(
                    DiagnosticCode::ModalityDefaulted,
                    format!("modality missing; using {}", self.config.default_modality),
                ));
                self.config.default_modality.clone()
            }
        };

        let study_date = self.study_date(&fields, now, &mut diagnostics);
        let patient_name = self.patient_name(&fields, &mut diagnostics);

        let patient_sex = fields.text(field::PATIENT_SEX, &mut diagnostics).and_then(|code| {
            let sex = Sex::from_code(&code);
            if sex.is_none() {
                diagnostics.push(Diagnostic::warning(
                    DiagnosticCode::InvalidField,
                    format!("patientSex {:?} not recognised; left unknown", code),
                ));
            }
            sex
        });

        let patient_birth_date = fields
            .text(field::PATIENT_BIRTH_DATE, &mut diagnostics)
            .and_then(|value| {
                let date = parse_birth_date(&value);
                if date.is_none() {
                    diagnostics.push(Diagnostic::warning(
                        DiagnosticCode::InvalidField,
                        format!("patientBirthDate {:?} not parseable; left unknown", value),
                    ));
                }
                date
            });

        let storage_locator = match fields.text(field::STORAGE_LOCATOR, &mut diagnostics) {
            Some(locator) => locator,
            None => {
                let locator = format!("{}/{}/{}.dcm", study_instance_id, series_instance_id, sop_instance_id);
                diagnostics.push(Diagnostic::warning(
                    DiagnosticCode::StorageLocatorDerived,
                    format!("storageLocator missing; derived {}", locator),
                ));
                locator
            }
        };

        let byte_size = fields.integer(field::BYTE_SIZE, &mut diagnostics).filter(|size| {
            if *size < 0 {
                diagnostics.push(Diagnostic::warning(
                    DiagnosticCode::InvalidField,
                    format!("byteSize {} is negative; ignored", size),
                ));
            }
            *size >= 0
        });

        let series_number = fields
            .int32(field::SERIES_NUMBER, &mut diagnostics)
            .unwrap_or(1);

        let payload = NormalizedPayload {
            patient_id: fields.text(field::PATIENT_ID, &mut diagnostics),
            patient_name,
            patient_sex,
            patient_birth_date,
            study_instance_id,
            series_instance_id,
            sop_instance_id,
            modality,
            study_date,
            accession_number: fields.text(field::ACCESSION_NUMBER, &mut diagnostics),
            body_part: fields.text(field::BODY_PART, &mut diagnostics),
            study_description: fields.text(field::STUDY_DESCRIPTION, &mut diagnostics),
            series_description: fields.text(field::SERIES_DESCRIPTION, &mut diagnostics),
            series_number,
            instance_number,
            storage_locator,
            byte_size,
            transfer_syntax_uid: fields
                .text(field::TRANSFER_SYNTAX, &mut diagnostics)
                .unwrap_or_else(|| self.config.default_transfer_syntax.clone()),
        };

        Ok(Normalization { payload, diagnostics })
    }

    fn study_date(&self, fields: &Fields<'_>, now: DateTime<Utc>, diagnostics: &mut Vec<Diagnostic>) -> DateTime<Utc> {
        let time = fields.text(field::STUDY_TIME, diagnostics).and_then(|value| {
            let time = parse_study_time(&value);
            if time.is_none() {
                diagnostics.push(Diagnostic::warning(
                    DiagnosticCode::StudyTimeIgnored,
                    format!("studyTime {:?} not parseable; ignored", value),
                ));
            }
            time
        });

        match fields.text(field::STUDY_DATE, diagnostics) {
            Some(value) => match parse_study_date(&value, time) {
                Some(date) => date,
                None => {
                    diagnostics.push(Diagnostic::warning(
                        DiagnosticCode::StudyDateDefaulted,
                        format!("studyDate {:?} not parseable; using processing time {}", value, now.to_rfc3339()),
                    ));
                    now
                }
            },
            None => {
                diagnostics.push(Diagnostic::warning(
                    DiagnosticCode::StudyDateDefaulted,
                    format!("studyDate missing; using processing time {}", now.to_rfc3339()),
                ));
                now
            }
        }
    }

    fn patient_name(&self, fields: &Fields<'_>, diagnostics: &mut Vec<Diagnostic>) -> PersonName {
        let (last, first) = match fields.text(field::PATIENT_NAME, diagnostics) {
            Some(composite) => split_person_name(&composite, self.config.name_delimiter),
            None => (
                fields.text(field::PATIENT_LAST_NAME, diagnostics),
                fields.text(field::PATIENT_FIRST_NAME, diagnostics),
            ),
        };

        if last.is_none() || first.is_none() {
            diagnostics.push(Diagnostic::info(
                DiagnosticCode::PatientNameDefaulted,
                "patient name incomplete; missing parts defaulted",
            ));
        }

        PersonName {
            last_name: last.unwrap_or_else(|| UNKNOWN_LAST_NAME.to_string()),
            first_name: first.unwrap_or_else(|| UNKNOWN_FIRST_NAME.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::has_code;
    use chrono::{Datelike, Timelike};
    use serde_json::json;

    fn normalize(raw: Value) -> Normalization {
        let config = IngestConfig::default();
        PayloadNormalizer::new(&config).normalize(&raw, Utc::now()).unwrap()
    }

    #[test]
    fn test_full_payload() {
        let result = normalize(json!({
            "patientId": "MRN-001",
            "patientName": "Doe^John",
            "studyInstanceId": "1.2.3",
            "seriesInstanceId": "1.2.3.4",
            "sopInstanceId": "1.2.3.4.5",
            "modality": "ct",
            "studyDate": "20240115",
            "studyTime": "093015",
            "instanceNumber": "7",
            "storageLocator": "/x/1.dcm",
            "byteSize": 524288
        }));
        let p = result.payload;

        assert_eq!(p.patient_id.as_deref(), Some("MRN-001"));
        assert_eq!(p.patient_name.last_name, "Doe");
        assert_eq!(p.patient_name.first_name, "John");
        assert_eq!(p.modality, "CT");
        assert_eq!(p.instance_number, 7);
        assert_eq!(p.byte_size, Some(524288));
        assert_eq!((p.study_date.year(), p.study_date.month(), p.study_date.day()), (2024, 1, 15));
        assert_eq!((p.study_date.hour(), p.study_date.minute(), p.study_date.second()), (9, 30, 15));
        assert!(!has_code(&result.diagnostics, DiagnosticCode::StudyDateDefaulted));
    }

    #[test]
    fn test_metadata_block_takes_precedence() {
        let result = normalize(json!({
            "studyInstanceId": "top",
            "metadata": { "StudyInstanceUID": "nested", "Modality": "MR" }
        }));

        assert_eq!(result.payload.study_instance_id, "nested");
        assert_eq!(result.payload.modality, "MR");
    }

    #[test]
    fn test_blank_metadata_value_falls_back_to_top_level() {
        let result = normalize(json!({
            "studyInstanceId": "top",
            "modality": "CT",
            "metadata": { "StudyInstanceUID": "  ", "Modality": "" }
        }));

        assert_eq!(result.payload.study_instance_id, "top");
        assert_eq!(result.payload.modality, "CT");
        assert!(!has_code(&result.diagnostics, DiagnosticCode::StudyIdSynthesized));
    }

    #[test]
    fn test_out_of_range_numbers_are_reported() {
        let result = normalize(json!({
            "studyInstanceId": "1",
            "instanceNumber": 4_294_967_296_i64,
            "seriesNumber": "-3000000000"
        }));

        assert_eq!(result.payload.instance_number, 1);
        assert_eq!(result.payload.series_number, 1);
        let invalid = result
            .diagnostics
            .iter()
            .filter(|d| d.code == DiagnosticCode::InvalidField)
            .count();
        assert_eq!(invalid, 2);
    }

    #[test]
    fn test_missing_identifiers_are_derived() {
        let result = normalize(json!({ "studyInstanceId": "1.2.3", "instanceNumber": 4 }));
        let p = result.payload;

        assert_eq!(p.series_instance_id, "1.2.3.1");
        assert_eq!(p.sop_instance_id, "1.2.3.1.4");
        assert!(has_code(&result.diagnostics, DiagnosticCode::SeriesIdDerived));
        assert!(has_code(&result.diagnostics, DiagnosticCode::SopIdDerived));
    }

    #[test]
    fn test_missing_study_id_is_synthesized_uniquely() {
        let a = normalize(json!({ "modality": "CT" }));
        let b = normalize(json!({ "modality": "CT" }));

        assert!(!a.payload.study_instance_id.is_empty());
        assert_ne!(a.payload.study_instance_id, b.payload.study_instance_id);
        assert!(pacs_core::utils::is_valid_dicom_uid(&a.payload.study_instance_id));
        assert!(has_code(&a.diagnostics, DiagnosticCode::StudyIdSynthesized));
    }

    #[test]
    fn test_bad_date_defaults_to_processing_time() {
        let config = IngestConfig::default();
        let now = Utc::now();
        let result = PayloadNormalizer::new(&config)
            .normalize(&json!({ "studyInstanceId": "1", "studyDate": "bad-date" }), now)
            .unwrap();

        assert_eq!(result.payload.study_date, now);
        assert!(has_code(&result.diagnostics, DiagnosticCode::StudyDateDefaulted));
    }

    #[test]
    fn test_impossible_compact_date_defaults() {
        let config = IngestConfig::default();
        let now = Utc::now();
        let result = PayloadNormalizer::new(&config)
            .normalize(&json!({ "studyInstanceId": "1", "studyDate": "20241345" }), now)
            .unwrap();
        assert_eq!(result.payload.study_date, now);
    }

    #[test]
    fn test_preformatted_timestamps() {
        let rfc = parse_study_date("2024-01-15T08:00:00+02:00", None).unwrap();
        assert_eq!(rfc.hour(), 6);

        let plain = parse_study_date("2024-01-15 10:20:30", None).unwrap();
        assert_eq!((plain.hour(), plain.minute()), (10, 20));

        let date_only = parse_study_date("2024-01-15", parse_study_time("1430")).unwrap();
        assert_eq!((date_only.day(), date_only.hour(), date_only.minute()), (15, 14, 30));
    }

    #[test]
    fn test_study_time_formats() {
        assert_eq!(parse_study_time("10"), NaiveTime::from_hms_opt(10, 0, 0));
        assert_eq!(parse_study_time("10:15:20"), NaiveTime::from_hms_opt(10, 15, 20));
        assert_eq!(parse_study_time("101520.5"), NaiveTime::from_hms_micro_opt(10, 15, 20, 500_000));
        assert_eq!(parse_study_time("1015201"), None);
        assert_eq!(parse_study_time("256000"), None);
    }

    #[test]
    fn test_modality_defaults_to_other() {
        let result = normalize(json!({ "studyInstanceId": "1" }));
        assert_eq!(result.payload.modality, "OT");
        assert!(has_code(&result.diagnostics, DiagnosticCode::ModalityDefaulted));
    }

    #[test]
    fn test_name_defaults() {
        assert_eq!(normalize(json!({})).payload.patient_name, PersonName {
            last_name: "Unknown".to_string(),
            first_name: "Patient".to_string(),
        });

        let single = normalize(json!({ "patientName": "Smith" })).payload.patient_name;
        assert_eq!(single.last_name, "Smith");
        assert_eq!(single.first_name, "Patient");

        let split = normalize(json!({ "patientLastName": "Li", "patientFirstName": "Wei" })).payload.patient_name;
        assert_eq!((split.last_name.as_str(), split.first_name.as_str()), ("Li", "Wei"));

        let dicom_json = normalize(json!({ "PatientName": { "Alphabetic": "Roe^Jane" } })).payload.patient_name;
        assert_eq!(dicom_json.first_name, "Jane");
    }

    #[test]
    fn test_contact_fields_stay_unknown() {
        let p = normalize(json!({ "patientId": "MRN-9" })).payload;
        assert!(p.patient_sex.is_none());
        assert!(p.patient_birth_date.is_none());

        let p = normalize(json!({ "patientSex": "F", "patientBirthDate": "19800229" })).payload;
        assert_eq!(p.patient_sex, Some(Sex::Female));
        assert_eq!(p.patient_birth_date, NaiveDate::from_ymd_opt(1980, 2, 29));
    }

    #[test]
    fn test_invalid_fields_are_ignored_not_rejected() {
        let result = normalize(json!({
            "studyInstanceId": "1",
            "instanceNumber": "abc",
            "byteSize": -5,
            "modality": ["CT"],
            "metadata": "oops"
        }));

        assert_eq!(result.payload.instance_number, 1);
        assert_eq!(result.payload.byte_size, None);
        assert_eq!(result.payload.modality, "OT");
        assert!(has_code(&result.diagnostics, DiagnosticCode::InvalidField));
        assert!(has_code(&result.diagnostics, DiagnosticCode::MetadataIgnored));
    }

    #[test]
    fn test_storage_locator_derived() {
        let result = normalize(json!({ "studyInstanceId": "1", "seriesInstanceId": "2", "sopInstanceId": "3" }));
        assert_eq!(result.payload.storage_locator, "1/2/3.dcm");
    }

    #[test]
    fn test_unparseable_payload_is_validation_error() {
        assert!(matches!(parse_payload(b"{not json"), Err(PacsError::Validation(_))));
        assert!(matches!(parse_payload(b"   "), Err(PacsError::Validation(_))));

        let config = IngestConfig::default();
        let err = PayloadNormalizer::new(&config)
            .normalize(&json!([1, 2, 3]), Utc::now())
            .unwrap_err();
        assert!(matches!(err, PacsError::Validation(_)));
    }
}
