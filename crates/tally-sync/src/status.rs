//! # Sync Status
//!
//! Read model behind the admin view: last run, recent Sync Log entries,
//! mapping counts and the failing entities an admin can retry.

use chrono::{DateTime, Utc};
use serde::Serialize;

use tally_core::{EntityMapping, MappingKind, MappingStatus, SyncLogEntry, SyncLogStatus};
use tally_db::Database;

use crate::error::SyncResult;

/// Mapping kinds shown in the status view.
const MAPPING_KINDS: [MappingKind; 3] = [
    MappingKind::Customer,
    MappingKind::Product,
    MappingKind::Invoice,
];

/// Mapping rows per status for one kind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MappingCounts {
    pub pending: i64,
    pub synced: i64,
    pub failed: i64,
    pub paid: i64,
}

impl MappingCounts {
    fn from_rows(rows: &[(MappingStatus, i64)]) -> Self {
        let mut counts = MappingCounts::default();
        for (status, n) in rows {
            match status {
                MappingStatus::Pending => counts.pending += n,
                MappingStatus::Synced => counts.synced += n,
                MappingStatus::Failed => counts.failed += n,
                MappingStatus::Paid => counts.paid += n,
            }
        }
        counts
    }
}

/// Per-kind mapping overview.
#[derive(Debug, Clone, Serialize)]
pub struct KindStatus {
    pub kind: MappingKind,
    pub counts: MappingCounts,
    /// Failed mappings, most recent first.
    pub failures: Vec<EntityMapping>,
}

/// Everything the admin view shows for a tenant.
#[derive(Debug, Clone, Serialize)]
pub struct TenantSyncStatus {
    pub tenant_id: String,
    pub enabled: bool,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub last_sync_status: Option<SyncLogStatus>,
    pub last_sync_errors: Vec<String>,
    pub next_sync_at: Option<DateTime<Utc>>,
    /// Start of the run holding the tenant lock, if any.
    pub running_since: Option<DateTime<Utc>>,
    pub kinds: Vec<KindStatus>,
    pub recent: Vec<SyncLogEntry>,
}

impl TenantSyncStatus {
    /// Total failed mappings across kinds.
    pub fn failed_total(&self) -> i64 {
        self.kinds.iter().map(|k| k.counts.failed).sum()
    }
}

/// Loads the status view for one tenant.
///
/// `limit` bounds both the recent log entries and the failures per kind.
pub async fn tenant_status(
    db: &Database,
    tenant_id: &str,
    limit: u32,
) -> SyncResult<TenantSyncStatus> {
    let settings = db.settings().require(tenant_id).await?;
    let running_since = db.settings().active_run_since(tenant_id).await?;

    let mut kinds = Vec::with_capacity(MAPPING_KINDS.len());
    for kind in MAPPING_KINDS {
        let rows = db.mappings().count_by_status(tenant_id, kind).await?;
        let failures = db
            .mappings()
            .list_by_status(tenant_id, kind, MappingStatus::Failed, limit)
            .await?;
        kinds.push(KindStatus {
            kind,
            counts: MappingCounts::from_rows(&rows),
            failures,
        });
    }

    let recent = db.sync_log().recent(tenant_id, limit).await?;

    Ok(TenantSyncStatus {
        tenant_id: settings.tenant_id,
        enabled: settings.enabled,
        last_sync_at: settings.last_sync_at,
        last_sync_status: settings.last_sync_status,
        last_sync_errors: settings.last_sync_errors,
        next_sync_at: settings.next_sync_at,
        running_since,
        kinds,
        recent,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::TenantAccountingContext;
    use crate::error::SyncError;
    use crate::operations::SyncEngine;
    use crate::testing::*;
    use tally_core::{EntityKind, TriggerSource};

    #[tokio::test]
    async fn test_status_lists_failures() {
        let db = test_db().await;
        seed_tenant(&db, "t1").await;
        seed_customer(&db, "t1", "c1", "Kari", "Nordmann").await;
        seed_customer(&db, "t1", "c2", "Ola", "Nordmann").await;

        let api = FakeApi::new();
        api.fail_on("Ola Nordmann");
        let ctx = TenantAccountingContext::load(&db, &FakeFactory::new(api), "t1")
            .await
            .unwrap();
        SyncEngine::new(db.clone())
            .sync_many(
                &ctx,
                EntityKind::Customer,
                &["c1".to_string(), "c2".to_string()],
                TriggerSource::Manual,
            )
            .await
            .unwrap();

        let status = tenant_status(&db, "t1", 20).await.unwrap();
        let customers = &status.kinds[0];

        assert_eq!(customers.kind, MappingKind::Customer);
        assert_eq!(customers.counts.synced, 1);
        assert_eq!(customers.counts.failed, 1);
        assert_eq!(customers.failures[0].local_id, "c2");
        assert_eq!(status.failed_total(), 1);
        assert_eq!(status.recent.len(), 1);
        assert_eq!(status.running_since, None);
    }

    #[tokio::test]
    async fn test_status_for_unknown_tenant() {
        let db = test_db().await;
        let err = tenant_status(&db, "nobody", 10).await.unwrap_err();
        assert!(matches!(err, SyncError::NotFound { .. }));
    }
}
