//! 通用工具函数

use chrono::Utc;
use uuid::Uuid;

/// 企业根标识符
pub const UID_ROOT: &str = "1.2.826.0.1.3680043.9.7382";

/// 生成唯一的DICOM标识符
///
/// 由根标识符、毫秒时间戳和随机分量组成，只含数字和点，长度不超过64。
pub fn generate_dicom_uid(root: &str) -> String {
    let random = Uuid::new_v4().as_u128() % 1_000_000_000_000;
    format!("{}.{}.{}", root, Utc::now().timestamp_millis(), random)
}

/// 验证DICOM UID格式
pub fn is_valid_dicom_uid(uid: &str) -> bool {
    !uid.is_empty()
        && uid.len() <= 64
        && uid.chars().all(|c| c.is_ascii_digit() || c == '.')
        && !uid.starts_with('.')
        && !uid.ends_with('.')
        && !uid.contains("..")
}
