//! 入库配置

use pacs_core::utils::UID_ROOT;
use serde::{Deserialize, Serialize};

/// 入库流程配置
///
/// 所有字段都有默认值，配置文件中可只覆盖部分字段。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// 合成检查UID时使用的根标识符
    pub uid_root: String,
    /// 缺省检查设备类型
    pub default_modality: String,
    /// 复合姓名分隔符
    pub name_delimiter: char,
    /// 缺省系列UID的固定后缀
    pub derived_series_suffix: String,
    /// 缺省传输语法
    pub default_transfer_syntax: String,
    /// 占位报告文本
    pub placeholder_findings: String,
    pub placeholder_impression: String,
    pub placeholder_technique: String,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            uid_root: UID_ROOT.to_string(),
            default_modality: "OT".to_string(),
            name_delimiter: '^',
            derived_series_suffix: "1".to_string(),
            default_transfer_syntax: "1.2.840.10008.1.2.1".to_string(), // Explicit VR Little Endian
            placeholder_findings: "Pending radiologist review.".to_string(),
            placeholder_impression: "Pending radiologist review.".to_string(),
            placeholder_technique: "Not yet documented.".to_string(),
        }
    }
}

impl IngestConfig {
    /// 校验配置
    pub fn validate(&self) -> Result<(), String> {
        if self.uid_root.is_empty() || !pacs_core::utils::is_valid_dicom_uid(&self.uid_root) {
            return Err(format!("invalid uid_root: {:?}", self.uid_root));
        }
        if self.default_modality.trim().is_empty() {
            return Err("default_modality cannot be empty".to_string());
        }
        if self.derived_series_suffix.is_empty() {
            return Err("derived_series_suffix cannot be empty".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(IngestConfig::default().validate().is_ok());
    }

    #[test]
    fn test_partial_override_keeps_defaults() {
        let config: IngestConfig = serde_json::from_str(r#"{"default_modality": "CR"}"#).unwrap();
        assert_eq!(config.default_modality, "CR");
        assert_eq!(config.name_delimiter, '^');
    }

    #[test]
    fn test_rejects_bad_uid_root() {
        let config = IngestConfig {
            uid_root: "1.2.abc".to_string(),
            ..IngestConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
