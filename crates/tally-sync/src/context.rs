//! # Tenant Accounting Context
//!
//! Everything a push operation needs about one tenant, resolved once per
//! run and handed to every operation explicitly.
//!
//! ```text
//! ┌──────────────────────┐     ┌────────────────┐     ┌──────────────────────┐
//! │ accounting_settings  │────►│ resolve()      │────►│ TenantAccounting     │
//! │ enabled, credentials │     │ • enabled?     │     │ Context              │
//! │ timezone, currency   │     │ • credentials? │     │ tenant_id, currency, │
//! └──────────────────────┘     │ • timezone ok? │     │ timezone, schedule,  │
//!                              └───────┬────────┘     │ api                  │
//!                                      │ ApiFactory   └──────────────────────┘
//!                                      └──────────────────────►
//! ```

use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use std::fmt;
use std::sync::Arc;

use tally_core::schedule::parse_timezone;
use tally_core::{AccountingSettings, SyncSchedule};
use tally_db::Database;

use crate::client::{AccountingApi, ApiFactory};
use crate::error::{SyncError, SyncResult};

/// Resolved per-tenant state shared by the operations of one run.
#[derive(Clone)]
pub struct TenantAccountingContext {
    pub tenant_id: String,
    /// Operating currency (ISO 4217).
    pub currency: String,
    pub timezone: Tz,
    pub schedule: SyncSchedule,
    api: Arc<dyn AccountingApi>,
}

impl fmt::Debug for TenantAccountingContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TenantAccountingContext")
            .field("tenant_id", &self.tenant_id)
            .field("currency", &self.currency)
            .field("timezone", &self.timezone)
            .finish_non_exhaustive()
    }
}

impl TenantAccountingContext {
    pub fn new(
        tenant_id: impl Into<String>,
        currency: impl Into<String>,
        timezone: Tz,
        schedule: SyncSchedule,
        api: Arc<dyn AccountingApi>,
    ) -> Self {
        TenantAccountingContext {
            tenant_id: tenant_id.into(),
            currency: currency.into(),
            timezone,
            schedule,
            api,
        }
    }

    /// Builds a context from stored settings.
    ///
    /// ## Errors
    /// - `IntegrationDisabled` if the tenant has switched the integration off
    /// - `InvalidConfig` if credentials are missing or the timezone is unknown
    pub fn resolve(settings: &AccountingSettings, factory: &dyn ApiFactory) -> SyncResult<Self> {
        if !settings.enabled {
            return Err(SyncError::IntegrationDisabled {
                tenant_id: settings.tenant_id.clone(),
            });
        }

        let credentials = settings.credentials.as_ref().ok_or_else(|| {
            SyncError::InvalidConfig(format!(
                "tenant {} has no accounting credentials",
                settings.tenant_id
            ))
        })?;

        let timezone = parse_timezone(&settings.timezone)?;
        let api = factory.connect(&settings.tenant_id, credentials)?;

        Ok(Self::new(
            settings.tenant_id.clone(),
            settings.currency.clone(),
            timezone,
            settings.schedule,
            api,
        ))
    }

    /// Loads the tenant's settings and resolves them.
    pub async fn load(db: &Database, factory: &dyn ApiFactory, tenant_id: &str) -> SyncResult<Self> {
        let settings = db.settings().require(tenant_id).await?;
        Self::resolve(&settings, factory)
    }

    pub fn api(&self) -> &dyn AccountingApi {
        self.api.as_ref()
    }

    /// Calendar date of `at` in the tenant's timezone.
    pub fn local_date(&self, at: DateTime<Utc>) -> NaiveDate {
        at.with_timezone(&self.timezone).date_naive()
    }
}
