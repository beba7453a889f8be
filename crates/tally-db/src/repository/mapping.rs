//! # Entity Mapping Repository
//!
//! Correlates local records with their counterparts in the accounting system.
//!
//! ## One Table Per Kind
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  MappingKind::Customer ──► customer_mappings  (pending/synced/failed)  │
//! │  MappingKind::Product  ──► product_mappings   (pending/synced/failed)  │
//! │  MappingKind::Invoice  ──► invoice_mappings   (+ paid)                 │
//! │                                                                         │
//! │  PRIMARY KEY (tenant_id, local_id) → at most one remote per record     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Upsert Semantics
//! ```text
//!   existing row        update              result
//!   ───────────────     ────────────────    ─────────────────────────────
//!   (none)              synced(ref 42)      synced, remote_id 42
//!   (none)              failed("boom")      failed, remote_id NULL
//!   synced, 42          failed("boom")      failed, remote_id 42 (kept)
//!   failed, 42          synced(None)        synced, remote_id 42
//!   synced, 42          paid()              paid,   remote_id 42
//! ```

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::debug;

use crate::error::{DbError, DbResult};
use tally_core::{EntityMapping, MappingKind, MappingStatus, MappingUpdate};

const MAPPING_COLUMNS: &str = "tenant_id, local_id, remote_id, remote_number, status, \
                               error_message, synced_at, created_at, updated_at";

fn table_for(kind: MappingKind) -> &'static str {
    match kind {
        MappingKind::Customer => "customer_mappings",
        MappingKind::Product => "product_mappings",
        MappingKind::Invoice => "invoice_mappings",
    }
}

#[derive(Debug, sqlx::FromRow)]
struct MappingRow {
    tenant_id: String,
    local_id: String,
    remote_id: Option<i64>,
    remote_number: Option<String>,
    status: MappingStatus,
    error_message: Option<String>,
    synced_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl MappingRow {
    fn into_mapping(self, kind: MappingKind) -> EntityMapping {
        EntityMapping {
            tenant_id: self.tenant_id,
            kind,
            local_id: self.local_id,
            remote_id: self.remote_id,
            remote_number: self.remote_number,
            status: self.status,
            error_message: self.error_message,
            synced_at: self.synced_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Repository for entity mapping rows.
#[derive(Debug, Clone)]
pub struct MappingRepository {
    pool: SqlitePool,
}

impl MappingRepository {
    /// Creates a new MappingRepository.
    pub fn new(pool: SqlitePool) -> Self {
        MappingRepository { pool }
    }

    /// Gets the mapping of one local record, if any.
    pub async fn get(
        &self,
        tenant_id: &str,
        kind: MappingKind,
        local_id: &str,
    ) -> DbResult<Option<EntityMapping>> {
        let sql = format!(
            "SELECT {} FROM {} WHERE tenant_id = ?1 AND local_id = ?2",
            MAPPING_COLUMNS,
            table_for(kind)
        );

        let row = sqlx::query_as::<_, MappingRow>(&sql)
            .bind(tenant_id)
            .bind(local_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|r| r.into_mapping(kind)))
    }

    /// Writes the outcome of a push.
    ///
    /// ## Rules
    /// - `paid` is rejected for customer and product mappings
    /// - A stored remote id is never cleared by a later failure
    /// - `synced_at` moves only on synced/paid writes
    pub async fn upsert(
        &self,
        tenant_id: &str,
        kind: MappingKind,
        local_id: &str,
        update: &MappingUpdate,
    ) -> DbResult<EntityMapping> {
        let status = update.status();
        if !kind.allows(status) {
            return Err(DbError::ConstraintViolation(format!(
                "status '{}' is not valid for {} mappings",
                status, kind
            )));
        }

        let now = Utc::now();
        let synced_at = if status.is_settled() { Some(now) } else { None };
        let remote_id = update.remote().map(|r| r.id);
        let remote_number = update.remote().and_then(|r| r.number.clone());

        debug!(
            tenant_id = %tenant_id,
            kind = %kind,
            local_id = %local_id,
            status = %status,
            "Upserting mapping"
        );

        let table = table_for(kind);
        let sql = format!(
            r#"
            INSERT INTO {table} (
                tenant_id, local_id, remote_id, remote_number, status,
                error_message, synced_at, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)
            ON CONFLICT (tenant_id, local_id) DO UPDATE SET
                remote_id = COALESCE(excluded.remote_id, {table}.remote_id),
                remote_number = COALESCE(excluded.remote_number, {table}.remote_number),
                status = excluded.status,
                error_message = excluded.error_message,
                synced_at = COALESCE(excluded.synced_at, {table}.synced_at),
                updated_at = excluded.updated_at
            RETURNING {columns}
            "#,
            table = table,
            columns = MAPPING_COLUMNS
        );

        let row = sqlx::query_as::<_, MappingRow>(&sql)
            .bind(tenant_id)
            .bind(local_id)
            .bind(remote_id)
            .bind(remote_number)
            .bind(status)
            .bind(update.error_message())
            .bind(synced_at)
            .bind(now)
            .fetch_one(&self.pool)
            .await?;

        Ok(row.into_mapping(kind))
    }

    /// Lists a tenant's mappings in one status, most recently touched first.
    pub async fn list_by_status(
        &self,
        tenant_id: &str,
        kind: MappingKind,
        status: MappingStatus,
        limit: u32,
    ) -> DbResult<Vec<EntityMapping>> {
        let sql = format!(
            "SELECT {} FROM {} WHERE tenant_id = ?1 AND status = ?2 \
             ORDER BY updated_at DESC LIMIT ?3",
            MAPPING_COLUMNS,
            table_for(kind)
        );

        let rows = sqlx::query_as::<_, MappingRow>(&sql)
            .bind(tenant_id)
            .bind(status)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(|r| r.into_mapping(kind)).collect())
    }

    /// Counts a tenant's mappings per status.
    pub async fn count_by_status(
        &self,
        tenant_id: &str,
        kind: MappingKind,
    ) -> DbResult<Vec<(MappingStatus, i64)>> {
        let sql = format!(
            "SELECT status, COUNT(*) FROM {} WHERE tenant_id = ?1 GROUP BY status ORDER BY status",
            table_for(kind)
        );

        let counts = sqlx::query_as::<_, (MappingStatus, i64)>(&sql)
            .bind(tenant_id)
            .fetch_all(&self.pool)
            .await?;

        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Database, DbConfig};
    use tally_core::RemoteRef;

    async fn repo() -> MappingRepository {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        db.mappings()
    }

    #[tokio::test]
    async fn test_first_failure_has_no_remote_id() {
        let repo = repo().await;
        let m = repo
            .upsert("t1", MappingKind::Customer, "c1", &MappingUpdate::failed("timeout"))
            .await
            .unwrap();

        assert_eq!(m.status, MappingStatus::Failed);
        assert_eq!(m.remote_id, None);
        assert_eq!(m.error_message.as_deref(), Some("timeout"));
        assert!(m.synced_at.is_none());
    }

    #[tokio::test]
    async fn test_failure_keeps_remote_id() {
        let repo = repo().await;
        let remote = RemoteRef {
            id: 42,
            number: Some("10042".into()),
        };
        repo.upsert("t1", MappingKind::Customer, "c1", &MappingUpdate::synced(Some(remote)))
            .await
            .unwrap();

        let failed = repo
            .upsert("t1", MappingKind::Customer, "c1", &MappingUpdate::failed("HTTP 500"))
            .await
            .unwrap();
        assert_eq!(failed.status, MappingStatus::Failed);
        assert_eq!(failed.remote_id, Some(42));
        assert_eq!(failed.remote_number.as_deref(), Some("10042"));

        let recovered = repo
            .upsert("t1", MappingKind::Customer, "c1", &MappingUpdate::synced(None))
            .await
            .unwrap();
        assert_eq!(recovered.status, MappingStatus::Synced);
        assert_eq!(recovered.remote_id, Some(42));
        assert!(recovered.error_message.is_none());
    }

    #[tokio::test]
    async fn test_paid_rejected_for_customers() {
        let repo = repo().await;
        let err = repo
            .upsert("t1", MappingKind::Customer, "c1", &MappingUpdate::paid())
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::ConstraintViolation(_)));

        let ok = repo
            .upsert("t1", MappingKind::Invoice, "o1", &MappingUpdate::paid())
            .await
            .unwrap();
        assert_eq!(ok.status, MappingStatus::Paid);
    }

    #[tokio::test]
    async fn test_tenants_are_isolated() {
        let repo = repo().await;
        repo.upsert("t1", MappingKind::Product, "p1", &MappingUpdate::synced(Some(RemoteRef::new(1))))
            .await
            .unwrap();

        assert!(repo.get("t2", MappingKind::Product, "p1").await.unwrap().is_none());
        assert!(repo.get("t1", MappingKind::Customer, "p1").await.unwrap().is_none());
        assert!(repo.get("t1", MappingKind::Product, "p1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_counts_and_listing() {
        let repo = repo().await;
        repo.upsert("t1", MappingKind::Invoice, "o1", &MappingUpdate::synced(Some(RemoteRef::new(1))))
            .await
            .unwrap();
        repo.upsert("t1", MappingKind::Invoice, "o2", &MappingUpdate::failed("no customer"))
            .await
            .unwrap();
        repo.upsert("t1", MappingKind::Invoice, "o3", &MappingUpdate::failed("HTTP 422"))
            .await
            .unwrap();

        let counts = repo.count_by_status("t1", MappingKind::Invoice).await.unwrap();
        assert!(counts.contains(&(MappingStatus::Failed, 2)));
        assert!(counts.contains(&(MappingStatus::Synced, 1)));

        let failed = repo
            .list_by_status("t1", MappingKind::Invoice, MappingStatus::Failed, 10)
            .await
            .unwrap();
        assert_eq!(failed.len(), 2);
        assert!(failed.iter().all(|m| m.error_message.is_some()));
    }
}
