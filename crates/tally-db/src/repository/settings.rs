//! # Accounting Settings Repository
//!
//! Per-tenant integration settings, run bookkeeping and the tenant run lock.
//!
//! ## Tenant Run Lock
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  try_begin_run(tenant, now, stale_after)                               │
//! │                                                                         │
//! │    UPDATE accounting_settings SET run_started_at = now                  │
//! │     WHERE tenant_id = ?                                                 │
//! │       AND (run_started_at IS NULL OR run_started_at < now - stale)      │
//! │                                                                         │
//! │    1 row  → lock taken, token = now    0 rows → another run holds it   │
//! │                                                                         │
//! │  end_run(tenant, token) → run_started_at = NULL                         │
//! │     WHERE run_started_at = token   (a taken-over lock is left alone)    │
//! │                                                                         │
//! │  A crashed worker never calls end_run; its lock expires after          │
//! │  `stale_after` and the next run takes over.                            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{DbError, DbResult};
use tally_core::{
    AccountingCredentials, AccountingSettings, SyncFrequency, SyncLogStatus, SyncSchedule,
    DEFAULT_CURRENCY, DEFAULT_TIMEZONE,
};

const SETTINGS_COLUMNS: &str = "tenant_id, enabled, client_id, client_secret, company_id, \
    frequency, sync_hour, sync_minute, day_of_week, day_of_month, timezone, currency, \
    last_sync_at, next_sync_at, last_sync_status, last_sync_errors, created_at, updated_at";

#[derive(Debug, sqlx::FromRow)]
struct SettingsRow {
    tenant_id: String,
    enabled: bool,
    client_id: Option<String>,
    client_secret: Option<String>,
    company_id: Option<i64>,
    frequency: SyncFrequency,
    sync_hour: i64,
    sync_minute: i64,
    day_of_week: Option<i64>,
    day_of_month: Option<i64>,
    timezone: String,
    currency: String,
    last_sync_at: Option<DateTime<Utc>>,
    next_sync_at: Option<DateTime<Utc>>,
    last_sync_status: Option<SyncLogStatus>,
    last_sync_errors: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<SettingsRow> for AccountingSettings {
    type Error = DbError;

    fn try_from(row: SettingsRow) -> DbResult<Self> {
        let credentials = match (row.client_id, row.client_secret) {
            (Some(client_id), Some(client_secret)) => Some(AccountingCredentials {
                client_id,
                client_secret,
                company_id: row.company_id,
            }),
            _ => None,
        };

        let schedule = SyncSchedule {
            frequency: row.frequency,
            hour: narrow(row.sync_hour)?,
            minute: narrow(row.sync_minute)?,
            day_of_week: row.day_of_week.map(narrow).transpose()?,
            day_of_month: row
                .day_of_month
                .map(|d| {
                    i32::try_from(d)
                        .map_err(|_| DbError::InvalidData(format!("day_of_month {}", d)))
                })
                .transpose()?,
        };

        Ok(AccountingSettings {
            tenant_id: row.tenant_id,
            enabled: row.enabled,
            credentials,
            schedule,
            timezone: row.timezone,
            currency: row.currency,
            last_sync_at: row.last_sync_at,
            next_sync_at: row.next_sync_at,
            last_sync_status: row.last_sync_status,
            last_sync_errors: serde_json::from_str(&row.last_sync_errors)?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn narrow(value: i64) -> DbResult<u32> {
    u32::try_from(value).map_err(|_| DbError::InvalidData(format!("schedule field {}", value)))
}

/// Settings for a tenant that has never been configured.
pub fn default_settings(tenant_id: &str) -> AccountingSettings {
    let now = Utc::now();
    AccountingSettings {
        tenant_id: tenant_id.to_string(),
        enabled: false,
        credentials: None,
        schedule: SyncSchedule::default(),
        timezone: DEFAULT_TIMEZONE.to_string(),
        currency: DEFAULT_CURRENCY.to_string(),
        last_sync_at: None,
        next_sync_at: None,
        last_sync_status: None,
        last_sync_errors: Vec::new(),
        created_at: now,
        updated_at: now,
    }
}

/// Repository for `accounting_settings`.
#[derive(Debug, Clone)]
pub struct SettingsRepository {
    pool: SqlitePool,
}

impl SettingsRepository {
    /// Creates a new SettingsRepository.
    pub fn new(pool: SqlitePool) -> Self {
        SettingsRepository { pool }
    }

    /// Gets a tenant's settings, if configured.
    pub async fn get(&self, tenant_id: &str) -> DbResult<Option<AccountingSettings>> {
        let sql = format!(
            "SELECT {} FROM accounting_settings WHERE tenant_id = ?1",
            SETTINGS_COLUMNS
        );

        let row = sqlx::query_as::<_, SettingsRow>(&sql)
            .bind(tenant_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(AccountingSettings::try_from).transpose()
    }

    /// Gets a tenant's settings or fails with NotFound.
    pub async fn require(&self, tenant_id: &str) -> DbResult<AccountingSettings> {
        self.get(tenant_id)
            .await?
            .ok_or_else(|| DbError::not_found("AccountingSettings", tenant_id))
    }

    /// Inserts or replaces the configurable fields of a tenant's settings.
    ///
    /// Run bookkeeping (`last_sync_*`) is left untouched on update.
    pub async fn save(&self, settings: &AccountingSettings) -> DbResult<AccountingSettings> {
        let now = Utc::now();
        let (client_id, client_secret, company_id) = match &settings.credentials {
            Some(c) => (
                Some(c.client_id.as_str()),
                Some(c.client_secret.as_str()),
                c.company_id,
            ),
            None => (None, None, None),
        };
        let schedule = &settings.schedule;

        debug!(
            tenant_id = %settings.tenant_id,
            enabled = settings.enabled,
            frequency = ?schedule.frequency,
            "Saving accounting settings"
        );

        sqlx::query(
            r#"
            INSERT INTO accounting_settings (
                tenant_id, enabled, client_id, client_secret, company_id,
                frequency, sync_hour, sync_minute, day_of_week, day_of_month,
                timezone, currency, next_sync_at, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?14)
            ON CONFLICT (tenant_id) DO UPDATE SET
                enabled = excluded.enabled,
                client_id = excluded.client_id,
                client_secret = excluded.client_secret,
                company_id = excluded.company_id,
                frequency = excluded.frequency,
                sync_hour = excluded.sync_hour,
                sync_minute = excluded.sync_minute,
                day_of_week = excluded.day_of_week,
                day_of_month = excluded.day_of_month,
                timezone = excluded.timezone,
                currency = excluded.currency,
                next_sync_at = excluded.next_sync_at,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&settings.tenant_id)
        .bind(settings.enabled)
        .bind(client_id)
        .bind(client_secret)
        .bind(company_id)
        .bind(schedule.frequency)
        .bind(i64::from(schedule.hour))
        .bind(i64::from(schedule.minute))
        .bind(schedule.day_of_week.map(i64::from))
        .bind(schedule.day_of_month.map(i64::from))
        .bind(&settings.timezone)
        .bind(&settings.currency)
        .bind(settings.next_sync_at)
        .bind(now)
        .execute(&self.pool)
        .await?;

        self.require(&settings.tenant_id).await
    }

    /// Enables or disables the integration. Mappings and log are kept.
    pub async fn set_enabled(&self, tenant_id: &str, enabled: bool) -> DbResult<()> {
        let result = sqlx::query(
            "UPDATE accounting_settings SET enabled = ?2, updated_at = ?3 WHERE tenant_id = ?1",
        )
        .bind(tenant_id)
        .bind(enabled)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("AccountingSettings", tenant_id));
        }
        Ok(())
    }

    /// Tenants the scheduler should look at: enabled and not manual-only.
    pub async fn list_scheduled(&self) -> DbResult<Vec<AccountingSettings>> {
        let sql = format!(
            "SELECT {} FROM accounting_settings \
             WHERE enabled = 1 AND frequency != 'manual' ORDER BY tenant_id",
            SETTINGS_COLUMNS
        );

        let rows = sqlx::query_as::<_, SettingsRow>(&sql)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(AccountingSettings::try_from).collect()
    }

    /// Takes the tenant run lock.
    ///
    /// Returns the stored start time, which is the token `end_run` needs, or
    /// `None` if a live run holds the lock.
    pub async fn try_begin_run(
        &self,
        tenant_id: &str,
        now: DateTime<Utc>,
        stale_after: Duration,
    ) -> DbResult<Option<DateTime<Utc>>> {
        let started = now.timestamp();
        let stale = i64::try_from(stale_after.as_secs()).unwrap_or(i64::MAX);
        let cutoff = started.saturating_sub(stale);

        let result = sqlx::query(
            r#"
            UPDATE accounting_settings SET run_started_at = ?2
            WHERE tenant_id = ?1
              AND (run_started_at IS NULL OR run_started_at < ?3)
            "#,
        )
        .bind(tenant_id)
        .bind(started)
        .bind(cutoff)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() != 1 {
            debug!(tenant_id = %tenant_id, "Tenant run lock held elsewhere");
            return Ok(None);
        }

        DateTime::<Utc>::from_timestamp(started, 0)
            .map(Some)
            .ok_or_else(|| DbError::InvalidData(format!("run start {} out of range", started)))
    }

    /// Releases the tenant run lock if `started_at` still owns it.
    ///
    /// Returns false when the lock was taken over as stale in the meantime.
    pub async fn end_run(&self, tenant_id: &str, started_at: DateTime<Utc>) -> DbResult<bool> {
        let result = sqlx::query(
            "UPDATE accounting_settings SET run_started_at = NULL \
             WHERE tenant_id = ?1 AND run_started_at = ?2",
        )
        .bind(tenant_id)
        .bind(started_at.timestamp())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Start time of the run holding the lock, if any.
    pub async fn active_run_since(&self, tenant_id: &str) -> DbResult<Option<DateTime<Utc>>> {
        let started: Option<Option<i64>> = sqlx::query_scalar(
            "SELECT run_started_at FROM accounting_settings WHERE tenant_id = ?1",
        )
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(started
            .flatten()
            .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0)))
    }

    /// Stores the outcome of a full run.
    pub async fn record_run(
        &self,
        tenant_id: &str,
        status: SyncLogStatus,
        errors: &[String],
        last_sync_at: DateTime<Utc>,
        next_sync_at: Option<DateTime<Utc>>,
    ) -> DbResult<()> {
        let errors = serde_json::to_string(errors)?;

        let result = sqlx::query(
            r#"
            UPDATE accounting_settings SET
                last_sync_at = ?2,
                last_sync_status = ?3,
                last_sync_errors = ?4,
                next_sync_at = ?5,
                updated_at = ?6
            WHERE tenant_id = ?1
            "#,
        )
        .bind(tenant_id)
        .bind(last_sync_at)
        .bind(status)
        .bind(errors)
        .bind(next_sync_at)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            warn!(tenant_id = %tenant_id, "Run finished for tenant without settings");
            return Err(DbError::not_found("AccountingSettings", tenant_id));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Database, DbConfig};

    fn configured(tenant: &str) -> AccountingSettings {
        let mut settings = default_settings(tenant);
        settings.enabled = true;
        settings.credentials = Some(AccountingCredentials {
            client_id: "client".into(),
            client_secret: "secret".into(),
            company_id: Some(99),
        });
        settings.schedule = SyncSchedule::monthly(-1, 22, 30);
        settings
    }

    #[tokio::test]
    async fn test_save_and_get() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.settings();

        assert!(repo.get("t1").await.unwrap().is_none());
        let saved = repo.save(&configured("t1")).await.unwrap();

        assert!(saved.enabled);
        assert_eq!(saved.schedule.day_of_month, Some(-1));
        assert_eq!(saved.schedule.frequency, SyncFrequency::Monthly);
        assert_eq!(saved.credentials.as_ref().and_then(|c| c.company_id), Some(99));
        assert!(saved.last_sync_errors.is_empty());
    }

    #[tokio::test]
    async fn test_list_scheduled_skips_manual_and_disabled() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.settings();

        repo.save(&configured("monthly")).await.unwrap();

        let mut manual = configured("manual");
        manual.schedule = SyncSchedule::default();
        repo.save(&manual).await.unwrap();

        let mut disabled = configured("disabled");
        disabled.enabled = false;
        repo.save(&disabled).await.unwrap();

        let scheduled = repo.list_scheduled().await.unwrap();
        let ids: Vec<_> = scheduled.iter().map(|s| s.tenant_id.as_str()).collect();
        assert_eq!(ids, vec!["monthly"]);
    }

    #[tokio::test]
    async fn test_run_lock() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.settings();
        repo.save(&configured("t1")).await.unwrap();

        let now = Utc::now();
        let stale = Duration::from_secs(3600);

        let token = repo.try_begin_run("t1", now, stale).await.unwrap().unwrap();
        assert!(repo.try_begin_run("t1", now, stale).await.unwrap().is_none());
        assert_eq!(repo.active_run_since("t1").await.unwrap(), Some(token));

        assert!(repo.end_run("t1", token).await.unwrap());
        assert!(repo.try_begin_run("t1", now, stale).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_stale_lock_is_taken_over() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.settings();
        repo.save(&configured("t1")).await.unwrap();

        let stale = Duration::from_secs(3600);
        let crashed_at = Utc::now() - chrono::Duration::hours(2);
        let old = repo.try_begin_run("t1", crashed_at, stale).await.unwrap().unwrap();
        let new = repo.try_begin_run("t1", Utc::now(), stale).await.unwrap().unwrap();

        // The crashed run's token no longer releases anything
        assert!(!repo.end_run("t1", old).await.unwrap());
        assert_eq!(repo.active_run_since("t1").await.unwrap(), Some(new));
        assert!(repo.end_run("t1", new).await.unwrap());
    }

    #[tokio::test]
    async fn test_record_run() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.settings();
        repo.save(&configured("t1")).await.unwrap();

        let started = Utc::now();
        repo.record_run(
            "t1",
            SyncLogStatus::Partial,
            &["invoice o1: HTTP 500".to_string()],
            started,
            None,
        )
        .await
        .unwrap();

        let settings = repo.require("t1").await.unwrap();
        assert_eq!(settings.last_sync_status, Some(SyncLogStatus::Partial));
        assert_eq!(settings.last_sync_errors.len(), 1);
        assert!(settings.last_sync_at.is_some());

        let missing = repo
            .record_run("nope", SyncLogStatus::Success, &[], started, None)
            .await;
        assert!(matches!(missing, Err(DbError::NotFound { .. })));
    }
}
