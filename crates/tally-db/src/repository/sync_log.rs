//! # Sync Log Repository
//!
//! Append-only audit trail of sync attempts.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  push / batch / test_connection                                        │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  append(NewSyncLogEntry) ──► INSERT INTO sync_log                      │
//! │                                                                         │
//! │  UPDATE / DELETE ──► trigger RAISE(ABORT) ──► ConstraintViolation      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::debug;
use uuid::Uuid;

use crate::error::{DbError, DbResult};
use tally_core::{
    NewSyncLogEntry, SyncDetails, SyncLogEntry, SyncLogStatus, SyncOperation, TriggerSource,
};

const LOG_COLUMNS: &str = "id, tenant_id, operation, status, items_processed, items_failed, \
                           error_message, details, duration_ms, triggered_by, created_at";

#[derive(Debug, sqlx::FromRow)]
struct SyncLogRow {
    id: String,
    tenant_id: String,
    operation: SyncOperation,
    status: SyncLogStatus,
    items_processed: i64,
    items_failed: i64,
    error_message: Option<String>,
    details: String,
    duration_ms: i64,
    triggered_by: TriggerSource,
    created_at: DateTime<Utc>,
}

impl TryFrom<SyncLogRow> for SyncLogEntry {
    type Error = DbError;

    fn try_from(row: SyncLogRow) -> DbResult<Self> {
        let details: SyncDetails = serde_json::from_str(&row.details)?;
        Ok(SyncLogEntry {
            id: row.id,
            tenant_id: row.tenant_id,
            operation: row.operation,
            status: row.status,
            items_processed: to_u32("items_processed", row.items_processed)?,
            items_failed: to_u32("items_failed", row.items_failed)?,
            error_message: row.error_message,
            details,
            duration_ms: to_u32("duration_ms", row.duration_ms)?,
            triggered_by: row.triggered_by,
            created_at: row.created_at,
        })
    }
}

fn to_u32(column: &str, value: i64) -> DbResult<u32> {
    u32::try_from(value)
        .map_err(|_| DbError::InvalidData(format!("{} out of range: {}", column, value)))
}

/// Repository for the sync log.
#[derive(Debug, Clone)]
pub struct SyncLogRepository {
    pool: SqlitePool,
}

impl SyncLogRepository {
    /// Creates a new SyncLogRepository.
    pub fn new(pool: SqlitePool) -> Self {
        SyncLogRepository { pool }
    }

    /// Appends one entry and returns it with its id and timestamp.
    pub async fn append(&self, entry: NewSyncLogEntry) -> DbResult<SyncLogEntry> {
        let stored = SyncLogEntry {
            id: Uuid::new_v4().to_string(),
            tenant_id: entry.tenant_id,
            operation: entry.operation,
            status: entry.status,
            items_processed: entry.items_processed,
            items_failed: entry.items_failed,
            error_message: entry.error_message,
            details: entry.details,
            duration_ms: entry.duration_ms,
            triggered_by: entry.triggered_by,
            created_at: Utc::now(),
        };
        let details = serde_json::to_string(&stored.details)?;

        debug!(
            tenant_id = %stored.tenant_id,
            operation = ?stored.operation,
            status = %stored.status,
            processed = stored.items_processed,
            failed = stored.items_failed,
            "Appending sync log entry"
        );

        sqlx::query(
            r#"
            INSERT INTO sync_log (
                id, tenant_id, operation, status, items_processed, items_failed,
                error_message, details, duration_ms, triggered_by, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            "#,
        )
        .bind(&stored.id)
        .bind(&stored.tenant_id)
        .bind(stored.operation)
        .bind(stored.status)
        .bind(i64::from(stored.items_processed))
        .bind(i64::from(stored.items_failed))
        .bind(&stored.error_message)
        .bind(details)
        .bind(i64::from(stored.duration_ms))
        .bind(stored.triggered_by)
        .bind(stored.created_at)
        .execute(&self.pool)
        .await?;

        Ok(stored)
    }

    /// Most recent entries of a tenant, newest first.
    pub async fn recent(&self, tenant_id: &str, limit: u32) -> DbResult<Vec<SyncLogEntry>> {
        let sql = format!(
            "SELECT {} FROM sync_log WHERE tenant_id = ?1 ORDER BY created_at DESC, rowid DESC LIMIT ?2",
            LOG_COLUMNS
        );

        let rows = sqlx::query_as::<_, SyncLogRow>(&sql)
            .bind(tenant_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(SyncLogEntry::try_from).collect()
    }

    /// Newest entry of one operation, if any.
    pub async fn latest(
        &self,
        tenant_id: &str,
        operation: SyncOperation,
    ) -> DbResult<Option<SyncLogEntry>> {
        let sql = format!(
            "SELECT {} FROM sync_log WHERE tenant_id = ?1 AND operation = ?2 \
             ORDER BY created_at DESC, rowid DESC LIMIT 1",
            LOG_COLUMNS
        );

        let row = sqlx::query_as::<_, SyncLogRow>(&sql)
            .bind(tenant_id)
            .bind(operation)
            .fetch_optional(&self.pool)
            .await?;

        row.map(SyncLogEntry::try_from).transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Database, DbConfig};
    use tally_core::ItemError;

    fn entry(tenant: &str, operation: SyncOperation) -> NewSyncLogEntry {
        NewSyncLogEntry {
            tenant_id: tenant.to_string(),
            operation,
            status: SyncLogStatus::Partial,
            items_processed: 1,
            items_failed: 1,
            error_message: None,
            details: SyncDetails::Customer {
                customer_ids: vec!["c1".into(), "c2".into()],
                errors: vec![ItemError {
                    local_id: "c2".into(),
                    message: "HTTP 422".into(),
                }],
            },
            duration_ms: 12,
            triggered_by: TriggerSource::Scheduled,
        }
    }

    #[tokio::test]
    async fn test_append_and_read_back() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.sync_log();

        let stored = repo.append(entry("t1", SyncOperation::CustomerSync)).await.unwrap();
        let recent = repo.recent("t1", 10).await.unwrap();

        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].id, stored.id);
        assert_eq!(recent[0].details.errors()[0].local_id, "c2");
        assert_eq!(recent[0].triggered_by, TriggerSource::Scheduled);
        assert!(repo.recent("t2", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_latest_by_operation() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.sync_log();

        repo.append(entry("t1", SyncOperation::CustomerSync)).await.unwrap();
        assert!(repo
            .latest("t1", SyncOperation::PaymentSync)
            .await
            .unwrap()
            .is_none());
        let latest = repo
            .latest("t1", SyncOperation::CustomerSync)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(latest.status, SyncLogStatus::Partial);
    }

    #[tokio::test]
    async fn test_log_is_append_only() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.sync_log();
        let stored = repo.append(entry("t1", SyncOperation::CustomerSync)).await.unwrap();

        let update = sqlx::query("UPDATE sync_log SET status = 'success' WHERE id = ?1")
            .bind(&stored.id)
            .execute(db.pool())
            .await
            .map_err(DbError::from);
        assert!(matches!(update, Err(DbError::ConstraintViolation(_))));

        let delete = sqlx::query("DELETE FROM sync_log WHERE id = ?1")
            .bind(&stored.id)
            .execute(db.pool())
            .await
            .map_err(DbError::from);
        assert!(matches!(delete, Err(DbError::ConstraintViolation(_))));

        assert_eq!(repo.recent("t1", 10).await.unwrap().len(), 1);
    }
}
