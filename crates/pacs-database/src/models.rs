//! 数据库模型

use pacs_core::{EntityKind, ExistingRecord};
use sqlx::FromRow;
use uuid::Uuid;

/// 按唯一键查找时返回的行
#[derive(Debug, FromRow)]
pub struct DbKeyRow {
    pub id: Uuid,
    pub parent_id: Option<Uuid>,
}

impl From<DbKeyRow> for ExistingRecord {
    fn from(row: DbKeyRow) -> Self {
        ExistingRecord {
            id: row.id,
            parent_id: row.parent_id,
        }
    }
}

/// 实体对应的表、唯一键列和上级列
#[derive(Debug, Clone, Copy)]
pub struct TableSpec {
    pub table: &'static str,
    pub key_column: &'static str,
    pub parent_column: Option<&'static str>,
}

impl TableSpec {
    pub fn for_kind(kind: EntityKind) -> Self {
        match kind {
            EntityKind::Patient => TableSpec {
                table: "patients",
                key_column: "mrn",
                parent_column: None,
            },
            EntityKind::Study => TableSpec {
                table: "studies",
                key_column: "study_uid",
                parent_column: Some("patient_id"),
            },
            EntityKind::Series => TableSpec {
                table: "series",
                key_column: "series_uid",
                parent_column: Some("study_id"),
            },
            EntityKind::Image => TableSpec {
                table: "images",
                key_column: "sop_instance_uid",
                parent_column: Some("series_id"),
            },
            EntityKind::Report => TableSpec {
                table: "reports",
                key_column: "study_id",
                parent_column: Some("study_id"),
            },
        }
    }

    /// 按唯一键查找的SQL
    ///
    /// 报告的唯一键是UUID列，需要把绑定的文本参数转换类型。
    pub fn find_sql(&self) -> String {
        let parent = self.parent_column.unwrap_or("NULL::uuid");
        let cast = if self.key_column == "study_id" { "::uuid" } else { "" };
        format!(
            "SELECT id, {} AS parent_id FROM {} WHERE {} = $1{}",
            parent, self.table, self.key_column, cast
        )
    }
}
