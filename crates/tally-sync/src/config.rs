//! # Sync Configuration
//!
//! Process-wide configuration for the sync worker.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     TALLY_API_BASE_URL=https://api.example.no/v1                       │
//! │     TALLY_DATABASE_PATH=/var/lib/tally/tally.db                        │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/tally/sync.toml (Linux)                                  │
//! │     ~/Library/Application Support/no.tally.tally/sync.toml (macOS)     │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! │                                                                         │
//! │  Per-tenant settings (credentials, schedule, timezone) are NOT here:   │
//! │  they live in the accounting_settings table.                           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! # sync.toml
//! [api]
//! base_url = "https://api.accounting.example/v1"
//! auth_url = "https://login.accounting.example/connect/token"
//! scope = "accounting"
//! request_timeout_secs = 30
//!
//! [scheduler]
//! tick_interval_secs = 60
//! stale_run_after_secs = 7200
//! max_parallel_tenants = 8
//!
//! [database]
//! path = "/var/lib/tally/tally.db"
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{SyncError, SyncResult};

// =============================================================================
// API Settings
// =============================================================================

/// Where and how to reach the accounting API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiSettings {
    /// Base URL of the REST API; entity paths are appended.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// OAuth2 token endpoint (client_credentials grant).
    #[serde(default = "default_auth_url")]
    pub auth_url: String,

    /// OAuth2 scope requested with the token.
    #[serde(default)]
    pub scope: Option<String>,

    /// Per-request timeout (seconds).
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// TCP connect timeout (seconds).
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

fn default_base_url() -> String {
    "https://api.accounting.example/v1".to_string()
}

fn default_auth_url() -> String {
    "https://login.accounting.example/connect/token".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

fn default_connect_timeout() -> u64 {
    10
}

impl Default for ApiSettings {
    fn default() -> Self {
        ApiSettings {
            base_url: default_base_url(),
            auth_url: default_auth_url(),
            scope: None,
            request_timeout_secs: default_request_timeout(),
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

impl ApiSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

// =============================================================================
// Scheduler Settings
// =============================================================================

/// Scheduler loop settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerSettings {
    /// How often the loop checks which tenants are due (seconds).
    #[serde(default = "default_tick_interval")]
    pub tick_interval_secs: u64,

    /// Age after which a held tenant lock is treated as abandoned (seconds).
    #[serde(default = "default_stale_run_after")]
    pub stale_run_after_secs: u64,

    /// Maximum number of tenants synced at the same time.
    #[serde(default = "default_max_parallel_tenants")]
    pub max_parallel_tenants: usize,

    /// Upper bound on entities picked per kind in one run.
    #[serde(default = "default_batch_limit")]
    pub batch_limit: u32,
}

fn default_tick_interval() -> u64 {
    60
}

fn default_stale_run_after() -> u64 {
    7200
}

fn default_max_parallel_tenants() -> usize {
    8
}

fn default_batch_limit() -> u32 {
    500
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        SchedulerSettings {
            tick_interval_secs: default_tick_interval(),
            stale_run_after_secs: default_stale_run_after(),
            max_parallel_tenants: default_max_parallel_tenants(),
            batch_limit: default_batch_limit(),
        }
    }
}

impl SchedulerSettings {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs)
    }

    pub fn stale_run_after(&self) -> Duration {
        Duration::from_secs(self.stale_run_after_secs)
    }
}

// =============================================================================
// Database Settings
// =============================================================================

/// Database location and pool size.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSettings {
    /// SQLite file path. Defaults to the platform data directory.
    #[serde(default = "default_database_path")]
    pub path: PathBuf,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_database_path() -> PathBuf {
    directories::ProjectDirs::from("no", "tally", "tally")
        .map(|dirs| dirs.data_dir().join("tally.db"))
        .unwrap_or_else(|| PathBuf::from("tally.db"))
}

fn default_max_connections() -> u32 {
    8
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        DatabaseSettings {
            path: default_database_path(),
            max_connections: default_max_connections(),
        }
    }
}

// =============================================================================
// Main Sync Configuration
// =============================================================================

/// Complete worker configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default)]
    pub api: ApiSettings,

    #[serde(default)]
    pub scheduler: SchedulerSettings,

    #[serde(default)]
    pub database: DatabaseSettings,
}

impl SyncConfig {
    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (sync.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> SyncResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading sync config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = Self::from_toml(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Parses a TOML document; missing keys take their defaults.
    pub fn from_toml(contents: &str) -> SyncResult<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Validates the configuration.
    pub fn validate(&self) -> SyncResult<()> {
        for (name, raw) in [("api.base_url", &self.api.base_url), ("api.auth_url", &self.api.auth_url)] {
            let url = Url::parse(raw)
                .map_err(|e| SyncError::InvalidConfig(format!("{} '{}': {}", name, raw, e)))?;
            if url.scheme() != "http" && url.scheme() != "https" {
                return Err(SyncError::InvalidConfig(format!(
                    "{} must be http(s), got: {}",
                    name, raw
                )));
            }
        }

        if self.api.request_timeout_secs == 0 {
            return Err(SyncError::InvalidConfig(
                "api.request_timeout_secs must be greater than 0".into(),
            ));
        }

        if self.scheduler.tick_interval_secs == 0 {
            return Err(SyncError::InvalidConfig(
                "scheduler.tick_interval_secs must be greater than 0".into(),
            ));
        }

        if self.scheduler.max_parallel_tenants == 0 {
            return Err(SyncError::InvalidConfig(
                "scheduler.max_parallel_tenants must be greater than 0".into(),
            ));
        }

        if self.scheduler.batch_limit == 0 {
            return Err(SyncError::InvalidConfig(
                "scheduler.batch_limit must be greater than 0".into(),
            ));
        }

        if self.database.max_connections == 0 {
            return Err(SyncError::InvalidConfig(
                "database.max_connections must be greater than 0".into(),
            ));
        }

        Ok(())
    }

    /// Applies environment variable overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("TALLY_API_BASE_URL") {
            debug!(url = %url, "Overriding API base URL from environment");
            self.api.base_url = url;
        }

        if let Ok(url) = std::env::var("TALLY_AUTH_URL") {
            debug!(url = %url, "Overriding auth URL from environment");
            self.api.auth_url = url;
        }

        if let Ok(path) = std::env::var("TALLY_DATABASE_PATH") {
            debug!(path = %path, "Overriding database path from environment");
            self.database.path = PathBuf::from(path);
        }

        if let Ok(secs) = std::env::var("TALLY_TICK_INTERVAL_SECS") {
            match secs.parse::<u64>() {
                Ok(s) => self.scheduler.tick_interval_secs = s,
                Err(_) => warn!(value = %secs, "Ignoring invalid TALLY_TICK_INTERVAL_SECS"),
            }
        }

        if let Ok(secs) = std::env::var("TALLY_REQUEST_TIMEOUT_SECS") {
            match secs.parse::<u64>() {
                Ok(s) => self.api.request_timeout_secs = s,
                Err(_) => warn!(value = %secs, "Ignoring invalid TALLY_REQUEST_TIMEOUT_SECS"),
            }
        }
    }

    /// Returns the default config file path.
    fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("no", "tally", "tally")
            .map(|dirs| dirs.config_dir().join("sync.toml"))
    }
}
