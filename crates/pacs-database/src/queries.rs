//! 数据库查询操作

use crate::connection::DatabasePool;
use crate::models::{DbKeyRow, TableSpec};
use async_trait::async_trait;
use pacs_core::{
    EntityKind, ExistingRecord, FieldUpdate, MetadataStore, NewRecord, PacsError, Result,
    StoreError, StoreResult,
};
use uuid::Uuid;

/// PostgreSQL 唯一约束冲突
const UNIQUE_VIOLATION: &str = "23505";
/// PostgreSQL 外键约束冲突
const FOREIGN_KEY_VIOLATION: &str = "23503";

/// 基于PostgreSQL的元数据存储
///
/// 所有插入都是 `INSERT ... ON CONFLICT DO NOTHING RETURNING id`，
/// 没有返回行即视为唯一约束冲突。
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: DatabasePool,
}

impl PgStore {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }

    /// 创建数据库表
    pub async fn create_tables(&self) -> Result<()> {
        let pool = self.pool.pool();

        let statements = [
            // 患者表
            r#"
            CREATE TABLE IF NOT EXISTS patients (
                id UUID PRIMARY KEY,
                mrn VARCHAR(64) UNIQUE NOT NULL,
                last_name VARCHAR(128) NOT NULL,
                first_name VARCHAR(128) NOT NULL,
                sex CHAR(1),
                birth_date DATE,
                phone VARCHAR(32),
                created_at TIMESTAMP WITH TIME ZONE DEFAULT NOW(),
                updated_at TIMESTAMP WITH TIME ZONE DEFAULT NOW()
            )
            "#,
            // 检查表，患者引用允许为空
            r#"
            CREATE TABLE IF NOT EXISTS studies (
                id UUID PRIMARY KEY,
                study_uid VARCHAR(64) UNIQUE NOT NULL,
                patient_id UUID REFERENCES patients(id),
                accession_number VARCHAR(64),
                study_datetime TIMESTAMP WITH TIME ZONE NOT NULL,
                modality VARCHAR(16) NOT NULL,
                description TEXT,
                body_part VARCHAR(64),
                status VARCHAR(20) NOT NULL DEFAULT 'IN_PROGRESS',
                image_count BIGINT NOT NULL DEFAULT 0,
                created_at TIMESTAMP WITH TIME ZONE DEFAULT NOW(),
                updated_at TIMESTAMP WITH TIME ZONE DEFAULT NOW()
            )
            "#,
            // 系列表
            r#"
            CREATE TABLE IF NOT EXISTS series (
                id UUID PRIMARY KEY,
                series_uid VARCHAR(64) UNIQUE NOT NULL,
                study_id UUID NOT NULL REFERENCES studies(id),
                modality VARCHAR(16) NOT NULL,
                series_number INTEGER NOT NULL,
                description TEXT,
                image_count BIGINT NOT NULL DEFAULT 0,
                created_at TIMESTAMP WITH TIME ZONE DEFAULT NOW()
            )
            "#,
            // 图像表
            r#"
            CREATE TABLE IF NOT EXISTS images (
                id UUID PRIMARY KEY,
                sop_instance_uid VARCHAR(64) UNIQUE NOT NULL,
                series_id UUID NOT NULL REFERENCES series(id),
                instance_number INTEGER NOT NULL,
                storage_locator VARCHAR(512) NOT NULL,
                byte_size BIGINT,
                transfer_syntax_uid VARCHAR(64) NOT NULL,
                created_at TIMESTAMP WITH TIME ZONE DEFAULT NOW()
            )
            "#,
            // 报告表，每个检查恰好一份
            r#"
            CREATE TABLE IF NOT EXISTS reports (
                id UUID PRIMARY KEY,
                study_id UUID UNIQUE NOT NULL REFERENCES studies(id),
                findings TEXT NOT NULL,
                impression TEXT NOT NULL,
                technique TEXT NOT NULL,
                status VARCHAR(20) NOT NULL DEFAULT 'PENDING',
                created_at TIMESTAMP WITH TIME ZONE DEFAULT NOW()
            )
            "#,
        ];

        for sql in statements {
            sqlx::query(sql)
                .execute(pool)
                .await
                .map_err(|e| PacsError::Persistence(e.to_string()))?;
        }

        self.create_indexes().await?;

        tracing::info!("Database tables created successfully");
        Ok(())
    }

    /// 创建数据库索引
    async fn create_indexes(&self) -> Result<()> {
        let pool = self.pool.pool();

        let indexes = [
            "CREATE INDEX IF NOT EXISTS idx_studies_patient_id ON studies(patient_id)",
            "CREATE INDEX IF NOT EXISTS idx_studies_accession_number ON studies(accession_number)",
            "CREATE INDEX IF NOT EXISTS idx_studies_study_datetime ON studies(study_datetime)",
            "CREATE INDEX IF NOT EXISTS idx_series_study_id ON series(study_id)",
            "CREATE INDEX IF NOT EXISTS idx_images_series_id ON images(series_id)",
        ];

        for index_sql in indexes {
            sqlx::query(index_sql)
                .execute(pool)
                .await
                .map_err(|e| PacsError::Persistence(e.to_string()))?;
        }

        tracing::info!("Database indexes created successfully");
        Ok(())
    }

    async fn insert_returning(&self, record: &NewRecord) -> std::result::Result<Option<Uuid>, sqlx::Error> {
        let pool = self.pool.pool();
        let id = Uuid::new_v4();

        match record {
            NewRecord::Patient(p) => {
                sqlx::query_scalar::<_, Uuid>(r#"
                    INSERT INTO patients (id, mrn, last_name, first_name, sex, birth_date, phone)
                    VALUES ($1, $2, $3, $4, $5, $6, $7)
                    ON CONFLICT (mrn) DO NOTHING
                    RETURNING id
                "#)
                .bind(id)
                .bind(&p.mrn)
                .bind(&p.last_name)
                .bind(&p.first_name)
                .bind(p.sex.map(|s| s.code()))
                .bind(p.birth_date)
                .bind(&p.phone)
                .fetch_optional(pool)
                .await
            }
            NewRecord::Study(s) => {
                sqlx::query_scalar::<_, Uuid>(r#"
                    INSERT INTO studies (id, study_uid, patient_id, accession_number, study_datetime, modality, description, body_part, status)
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                    ON CONFLICT (study_uid) DO NOTHING
                    RETURNING id
                "#)
                .bind(id)
                .bind(&s.study_uid)
                .bind(s.patient_id)
                .bind(&s.accession_number)
                .bind(s.study_datetime)
                .bind(&s.modality)
                .bind(&s.description)
                .bind(&s.body_part)
                .bind(s.status.as_str())
                .fetch_optional(pool)
                .await
            }
            NewRecord::Series(s) => {
                sqlx::query_scalar::<_, Uuid>(r#"
                    INSERT INTO series (id, series_uid, study_id, modality, series_number, description)
                    VALUES ($1, $2, $3, $4, $5, $6)
                    ON CONFLICT (series_uid) DO NOTHING
                    RETURNING id
                "#)
                .bind(id)
                .bind(&s.series_uid)
                .bind(s.study_id)
                .bind(&s.modality)
                .bind(s.series_number)
                .bind(&s.description)
                .fetch_optional(pool)
                .await
            }
            NewRecord::Image(i) => {
                sqlx::query_scalar::<_, Uuid>(r#"
                    INSERT INTO images (id, sop_instance_uid, series_id, instance_number, storage_locator, byte_size, transfer_syntax_uid)
                    VALUES ($1, $2, $3, $4, $5, $6, $7)
                    ON CONFLICT (sop_instance_uid) DO NOTHING
                    RETURNING id
                "#)
                .bind(id)
                .bind(&i.sop_instance_uid)
                .bind(i.series_id)
                .bind(i.instance_number)
                .bind(&i.storage_locator)
                .bind(i.byte_size)
                .bind(&i.transfer_syntax_uid)
                .fetch_optional(pool)
                .await
            }
            NewRecord::Report(r) => {
                sqlx::query_scalar::<_, Uuid>(r#"
                    INSERT INTO reports (id, study_id, findings, impression, technique, status)
                    VALUES ($1, $2, $3, $4, $5, $6)
                    ON CONFLICT (study_id) DO NOTHING
                    RETURNING id
                "#)
                .bind(id)
                .bind(r.study_id)
                .bind(&r.findings)
                .bind(&r.impression)
                .bind(&r.technique)
                .bind(r.status.as_str())
                .fetch_optional(pool)
                .await
            }
        }
    }
}

/// 把sqlx错误映射为存储层错误
fn map_sqlx_error(kind: EntityKind, key: &str, err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(ref db_err) = err {
        match db_err.code().as_deref() {
            Some(UNIQUE_VIOLATION) => {
                return StoreError::UniqueViolation {
                    kind,
                    key: key.to_string(),
                };
            }
            Some(FOREIGN_KEY_VIOLATION) => {
                return StoreError::ForeignKeyViolation {
                    kind,
                    message: db_err.message().to_string(),
                };
            }
            _ => {}
        }
    }
    StoreError::Backend(err.to_string())
}

#[async_trait]
impl MetadataStore for PgStore {
    async fn find_by_key(&self, kind: EntityKind, key: &str) -> StoreResult<Option<ExistingRecord>> {
        let sql = TableSpec::for_kind(kind).find_sql();

        let row = sqlx::query_as::<_, DbKeyRow>(&sql)
            .bind(key)
            .fetch_optional(self.pool.pool())
            .await
            .map_err(|e| map_sqlx_error(kind, key, e))?;

        Ok(row.map(ExistingRecord::from))
    }

    async fn insert(&self, record: &NewRecord) -> StoreResult<Uuid> {
        let kind = record.kind();
        let key = record.key();

        match self.insert_returning(record).await {
            Ok(Some(id)) => {
                tracing::debug!("Inserted {} {} as {}", kind, key, id);
                Ok(id)
            }
            Ok(None) => Err(StoreError::UniqueViolation { kind, key }),
            Err(e) => Err(map_sqlx_error(kind, &key, e)),
        }
    }

    async fn update(&self, kind: EntityKind, id: Uuid, fields: &[FieldUpdate]) -> StoreResult<()> {
        let pool = self.pool.pool();

        for field in fields {
            // 患者引用只在为空时写入，已有引用时不更新任何行
            let conditional = matches!(field, FieldUpdate::PatientRef(_));
            let query = match (kind, field) {
                (EntityKind::Study, FieldUpdate::PatientRef(patient_id)) => sqlx::query(
                    "UPDATE studies SET patient_id = $1, updated_at = NOW() WHERE id = $2 AND patient_id IS NULL",
                )
                .bind(*patient_id)
                .bind(id),
                (EntityKind::Study, FieldUpdate::ImageCount(count)) => {
                    sqlx::query("UPDATE studies SET image_count = $1, updated_at = NOW() WHERE id = $2")
                        .bind(*count)
                        .bind(id)
                }
                (EntityKind::Series, FieldUpdate::ImageCount(count)) => {
                    sqlx::query("UPDATE series SET image_count = $1 WHERE id = $2")
                        .bind(*count)
                        .bind(id)
                }
                (kind, field) => {
                    return Err(StoreError::Unsupported(format!("{:?} on {}", field, kind)));
                }
            };

            let result = query
                .execute(pool)
                .await
                .map_err(|e| map_sqlx_error(kind, &id.to_string(), e))?;

            if result.rows_affected() == 0 && !conditional {
                return Err(StoreError::Backend(format!("{} {} not found", kind, id)));
            }
        }

        Ok(())
    }

    async fn count_children(&self, parent_id: Uuid, child_kind: EntityKind) -> StoreResult<i64> {
        let sql = match child_kind {
            EntityKind::Study => "SELECT COUNT(*) FROM studies WHERE patient_id = $1",
            EntityKind::Series => "SELECT COUNT(*) FROM series WHERE study_id = $1",
            EntityKind::Image => r#"
                SELECT COUNT(*) FROM images i
                JOIN series s ON s.id = i.series_id
                WHERE i.series_id = $1 OR s.study_id = $1
            "#,
            EntityKind::Report => "SELECT COUNT(*) FROM reports WHERE study_id = $1",
            EntityKind::Patient => {
                return Err(StoreError::Unsupported("patients have no parent".to_string()));
            }
        };

        sqlx::query_scalar::<_, i64>(sql)
            .bind(parent_id)
            .fetch_one(self.pool.pool())
            .await
            .map_err(|e| map_sqlx_error(child_kind, &parent_id.to_string(), e))
    }
}
