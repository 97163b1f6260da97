//! SQLite implementation of the MemoryRepository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{Fact, MemoryRecord};
use crate::domain::ports::MemoryRepository;

#[derive(Clone)]
pub struct SqliteMemoryRepository {
    pool: SqlitePool,
}

impl SqliteMemoryRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MemoryRepository for SqliteMemoryRepository {
    async fn load_all(&self) -> DomainResult<Vec<MemoryRecord>> {
        let rows: Vec<MemoryRecordRow> = sqlx::query_as(
            r#"SELECT record_id, fact, valid_from, valid_to, run_id, node_id, supersedes
               FROM memory_records ORDER BY seq"#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn append(&self, record: &MemoryRecord) -> DomainResult<()> {
        let fact_json = serde_json::to_string(&record.fact)?;

        sqlx::query(
            r#"INSERT INTO memory_records (record_id, fact, kind, confidence, valid_from, valid_to,
               run_id, node_id, supersedes)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(record.record_id.to_string())
        .bind(&fact_json)
        .bind(record.fact.kind.as_str())
        .bind(record.fact.confidence)
        .bind(record.valid_from.to_rfc3339())
        .bind(record.valid_to.map(|t| t.to_rfc3339()))
        .bind(record.run_id.map(|id| id.to_string()))
        .bind(&record.node_id)
        .bind(record.supersedes.map(|id| id.to_string()))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn close_validity(&self, record_id: Uuid, valid_to: DateTime<Utc>) -> DomainResult<()> {
        let result = sqlx::query("UPDATE memory_records SET valid_to = ? WHERE record_id = ?")
            .bind(valid_to.to_rfc3339())
            .bind(record_id.to_string())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DomainError::RecordNotFound(record_id));
        }
        Ok(())
    }
}

#[derive(sqlx::FromRow)]
struct MemoryRecordRow {
    record_id: String,
    fact: String,
    valid_from: String,
    valid_to: Option<String>,
    run_id: Option<String>,
    node_id: Option<String>,
    supersedes: Option<String>,
}

impl TryFrom<MemoryRecordRow> for MemoryRecord {
    type Error = DomainError;

    fn try_from(row: MemoryRecordRow) -> Result<Self, Self::Error> {
        let fact: Fact = serde_json::from_str(&row.fact)?;

        Ok(MemoryRecord {
            record_id: super::parse_uuid(&row.record_id)?,
            fact,
            valid_from: super::parse_datetime(&row.valid_from)?,
            valid_to: super::parse_optional_datetime(row.valid_to)?,
            run_id: super::parse_optional_uuid(row.run_id)?,
            node_id: row.node_id,
            supersedes: super::parse_optional_uuid(row.supersedes)?,
        })
    }
}
