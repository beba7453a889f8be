//! # Manual Sync Trigger
//!
//! Administrative surface: push chosen entities of one tenant now.
//!
//! ```text
//! ManualSyncRequest { tenant_id, kind, ids[] }
//!        │
//!        ▼
//!   load context ──► take tenant lock ──► sync_many ──► release lock
//!        │                  │                  │
//!   NotFound /        RunInProgress      one Sync Log entry
//!   Disabled
//!        ▼
//! ManualSyncResponse { success, processed, failed, errors[] }
//! ```
//!
//! This is also the retry path: `failed` mappings are never picked up
//! automatically, an admin re-submits their ids here.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, Instrument};

use tally_core::{EntityKind, ItemError, TriggerSource};
use tally_db::Database;

use crate::client::ApiFactory;
use crate::context::TenantAccountingContext;
use crate::error::{SyncError, SyncResult};
use crate::lock::TenantRunLock;
use crate::operations::{BatchSummary, SyncEngine};

fn default_trigger() -> TriggerSource {
    TriggerSource::Manual
}

/// Request to push specific entities of one tenant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManualSyncRequest {
    pub tenant_id: String,
    pub kind: EntityKind,
    pub ids: Vec<String>,
    #[serde(default = "default_trigger")]
    pub triggered_by: TriggerSource,
}

impl ManualSyncRequest {
    pub fn new(tenant_id: impl Into<String>, kind: EntityKind, ids: Vec<String>) -> Self {
        ManualSyncRequest {
            tenant_id: tenant_id.into(),
            kind,
            ids,
            triggered_by: TriggerSource::Manual,
        }
    }

    /// Same request, recorded as coming from the API.
    pub fn via_api(mut self) -> Self {
        self.triggered_by = TriggerSource::Api;
        self
    }
}

/// Outcome of a manual trigger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManualSyncResponse {
    /// True when no entity failed.
    pub success: bool,
    pub processed: u32,
    pub failed: u32,
    pub errors: Vec<ItemError>,
}

impl From<BatchSummary> for ManualSyncResponse {
    fn from(summary: BatchSummary) -> Self {
        ManualSyncResponse {
            success: summary.failed == 0,
            processed: summary.processed,
            failed: summary.failed,
            errors: summary.errors,
        }
    }
}

/// Runs manual sync requests under the tenant lock.
#[derive(Clone)]
pub struct ManualTrigger {
    engine: SyncEngine,
    factory: Arc<dyn ApiFactory>,
    lock: TenantRunLock,
}

impl ManualTrigger {
    pub fn new(db: Database, factory: Arc<dyn ApiFactory>, lock: TenantRunLock) -> Self {
        ManualTrigger {
            engine: SyncEngine::new(db),
            factory,
            lock,
        }
    }

    /// Pushes the requested entities.
    ///
    /// ## Errors
    /// - `Validation` if no ids are given
    /// - `NotFound` / `IntegrationDisabled` / `InvalidConfig` for the tenant
    /// - `RunInProgress` if another run holds the tenant lock
    ///
    /// Entity failures are not errors here: they come back in the response.
    pub async fn trigger(&self, request: ManualSyncRequest) -> SyncResult<ManualSyncResponse> {
        let span = tracing::info_span!(
            "manual_sync",
            tenant_id = %request.tenant_id,
            kind = %request.kind
        );
        self.run(request).instrument(span).await
    }

    async fn run(&self, request: ManualSyncRequest) -> SyncResult<ManualSyncResponse> {
        let ids = dedup(request.ids);
        if ids.is_empty() {
            return Err(SyncError::Validation("at least one id is required".into()));
        }

        let ctx =
            TenantAccountingContext::load(self.engine.db(), self.factory.as_ref(), &request.tenant_id)
                .await?;

        let lease = self.lock.acquire(&ctx.tenant_id, Utc::now()).await?;
        let result = self
            .engine
            .sync_many(&ctx, request.kind, &ids, request.triggered_by)
            .await;
        self.lock.release(lease).await;

        let response = ManualSyncResponse::from(result?);
        info!(
            processed = response.processed,
            failed = response.failed,
            "Manual sync finished"
        );
        Ok(response)
    }
}

/// Drops blank and repeated ids, keeping first-seen order.
fn dedup(ids: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    ids.into_iter()
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty() && seen.insert(id.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::*;
    use std::time::Duration;
    use tally_core::{MappingKind, MappingStatus};

    fn trigger(db: &Database, api: Arc<FakeApi>) -> ManualTrigger {
        ManualTrigger::new(
            db.clone(),
            Arc::new(FakeFactory::new(api)),
            TenantRunLock::new(db.clone(), Duration::from_secs(600)),
        )
    }

    #[test]
    fn test_dedup_ids() {
        let ids = vec!["a".into(), " b ".into(), "a".into(), "".into()];
        assert_eq!(dedup(ids), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_request_defaults_to_manual() {
        let request: ManualSyncRequest =
            serde_json::from_str(r#"{"tenant_id":"t1","kind":"invoice","ids":["o1"]}"#).unwrap();
        assert_eq!(request.triggered_by, TriggerSource::Manual);
        assert_eq!(request.kind, EntityKind::Invoice);
    }

    #[tokio::test]
    async fn test_retry_after_failure() {
        let db = test_db().await;
        seed_tenant(&db, "t1").await;
        seed_customer(&db, "t1", "c1", "Kari", "Nordmann").await;
        let api = FakeApi::new();
        let trigger = trigger(&db, api.clone());

        api.fail_on("Kari Nordmann");
        let first = trigger
            .trigger(ManualSyncRequest::new("t1", EntityKind::Customer, vec!["c1".into()]))
            .await
            .unwrap();
        assert!(!first.success);
        assert_eq!(first.failed, 1);
        assert_eq!(first.errors[0].local_id, "c1");

        api.recover("Kari Nordmann");
        let retry = trigger
            .trigger(ManualSyncRequest::new("t1", EntityKind::Customer, vec!["c1".into()]).via_api())
            .await
            .unwrap();
        assert!(retry.success);
        assert_eq!(retry.processed, 1);

        let m = db.mappings().get("t1", MappingKind::Customer, "c1").await.unwrap().unwrap();
        assert_eq!(m.status, MappingStatus::Synced);
        assert_eq!(m.error_message, None);
        assert!(db.settings().active_run_since("t1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_rejected_while_run_active() {
        let db = test_db().await;
        seed_tenant(&db, "t1").await;
        seed_customer(&db, "t1", "c1", "Kari", "Nordmann").await;
        let api = FakeApi::new();
        let trigger = trigger(&db, api.clone());

        assert!(db
            .settings()
            .try_begin_run("t1", Utc::now(), Duration::from_secs(600))
            .await
            .unwrap()
            .is_some());

        let err = trigger
            .trigger(ManualSyncRequest::new("t1", EntityKind::Customer, vec!["c1".into()]))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::RunInProgress { .. }));
        assert!(api.calls().is_empty());
    }

    #[tokio::test]
    async fn test_rejects_empty_and_disabled() {
        let db = test_db().await;
        seed_tenant(&db, "t1").await;
        let trigger = trigger(&db, FakeApi::new());

        let err = trigger
            .trigger(ManualSyncRequest::new("t1", EntityKind::Customer, vec![" ".into()]))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Validation(_)));

        db.settings().set_enabled("t1", false).await.unwrap();
        let err = trigger
            .trigger(ManualSyncRequest::new("t1", EntityKind::Customer, vec!["c1".into()]))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::IntegrationDisabled { .. }));
    }
}
