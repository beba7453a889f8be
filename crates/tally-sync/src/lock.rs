//! Per-tenant run lock shared by scheduled runs and manual triggers.

use chrono::{DateTime, Utc};
use std::time::Duration;
use tracing::{debug, error, warn};

use tally_db::Database;

use crate::error::{SyncError, SyncResult};

/// Proof of holding a tenant's run lock.
///
/// `started_at` is the fencing token: release only clears the lock while it
/// still carries this value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunLease {
    pub tenant_id: String,
    pub started_at: DateTime<Utc>,
}

/// Compare-and-swap lock on the tenant's settings row.
///
/// A lock older than `stale_after` belongs to a crashed run and is taken over.
#[derive(Debug, Clone)]
pub struct TenantRunLock {
    db: Database,
    stale_after: Duration,
}

impl TenantRunLock {
    pub fn new(db: Database, stale_after: Duration) -> Self {
        TenantRunLock { db, stale_after }
    }

    /// Takes the lock or fails with `RunInProgress`.
    pub async fn acquire(&self, tenant_id: &str, now: DateTime<Utc>) -> SyncResult<RunLease> {
        match self
            .db
            .settings()
            .try_begin_run(tenant_id, now, self.stale_after)
            .await?
        {
            Some(started_at) => {
                debug!(tenant_id = %tenant_id, started_at = %started_at, "Tenant run lock acquired");
                Ok(RunLease {
                    tenant_id: tenant_id.to_string(),
                    started_at,
                })
            }
            None => {
                warn!(tenant_id = %tenant_id, "Sync run rejected, another run is active");
                Err(SyncError::RunInProgress {
                    tenant_id: tenant_id.to_string(),
                })
            }
        }
    }

    /// Releases the lock held by `lease`. Failures are logged; the lock then
    /// expires as stale.
    pub async fn release(&self, lease: RunLease) {
        match self
            .db
            .settings()
            .end_run(&lease.tenant_id, lease.started_at)
            .await
        {
            Ok(true) => {}
            Ok(false) => warn!(
                tenant_id = %lease.tenant_id,
                started_at = %lease.started_at,
                "Run lock was taken over as stale before release"
            ),
            Err(e) => {
                error!(tenant_id = %lease.tenant_id, error = %e, "Failed to release tenant run lock")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{at, seed_tenant, test_db};

    #[tokio::test]
    async fn test_second_acquire_is_rejected() {
        let db = test_db().await;
        seed_tenant(&db, "t1").await;
        let lock = TenantRunLock::new(db, Duration::from_secs(600));
        let now = Utc::now();

        let lease = lock.acquire("t1", now).await.unwrap();
        let err = lock.acquire("t1", now).await.unwrap_err();
        assert!(matches!(err, SyncError::RunInProgress { .. }));
        assert!(err.is_retryable());

        lock.release(lease).await;
        lock.acquire("t1", now).await.unwrap();
    }

    #[tokio::test]
    async fn test_late_release_keeps_takeover_lock() {
        let db = test_db().await;
        seed_tenant(&db, "t1").await;
        let lock = TenantRunLock::new(db.clone(), Duration::from_secs(3600));

        let slow = lock.acquire("t1", at(3, 1)).await.unwrap();
        let takeover = lock.acquire("t1", at(3, 3)).await.unwrap();

        // The stalled run finishes after losing its lock
        lock.release(slow).await;

        let err = lock.acquire("t1", at(3, 3)).await.unwrap_err();
        assert!(matches!(err, SyncError::RunInProgress { .. }));
        assert_eq!(
            db.settings().active_run_since("t1").await.unwrap(),
            Some(takeover.started_at)
        );

        lock.release(takeover).await;
        assert!(db.settings().active_run_since("t1").await.unwrap().is_none());
    }
}
