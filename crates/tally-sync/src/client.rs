//! # Accounting API Client
//!
//! Authenticated HTTP access to the tenant's external accounting system.
//!
//! ## Authentication Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    OAuth2 client_credentials                            │
//! │                                                                         │
//! │  ┌────────────────┐        ┌──────────────────┐      ┌──────────────┐  │
//! │  │  tally-sync    │        │  Token endpoint  │      │  REST API    │  │
//! │  └───────┬────────┘        └────────┬─────────┘      └──────┬───────┘  │
//! │          │ 1. POST form             │                       │          │
//! │          │   grant_type,            │                       │          │
//! │          │   client_id/secret       │                       │          │
//! │          │─────────────────────────►│                       │          │
//! │          │ 2. access_token,         │                       │          │
//! │          │    expires_in            │                       │          │
//! │          │◄─────────────────────────│                       │          │
//! │          │                                                  │          │
//! │          │ 3. POST /customer  (Bearer token)                │          │
//! │          │─────────────────────────────────────────────────►│          │
//! │          │ 4. 401? drop token, exchange again, resend once  │          │
//! │          │◄─────────────────────────────────────────────────│          │
//! │                                                                         │
//! │  Token is cached and renewed 5 minutes before it expires.              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Outbound Endpoints
//! ```text
//! POST /customer            PUT /customer/{id}
//! POST /product             PUT /product/{id}
//! POST /invoice             PUT /invoice/{id}/status
//! POST /payment             POST /credit-note
//! GET  /companies           (connection test)
//! ```
//!
//! Mutating calls are never retried on transport errors: a POST that timed
//! out may still have created the remote record.

use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::config::ApiSettings;
use crate::error::{SyncError, SyncResult};
use tally_core::translator::{
    RemoteCreditNote, RemoteCustomer, RemoteInvoice, RemoteInvoiceStatus, RemotePayment,
    RemoteProduct,
};
use tally_core::{AccountingCredentials, RemoteRef};

/// Margin before token expiration to trigger refresh (5 minutes).
const REFRESH_MARGIN_SECS: u64 = 300;

/// Lifetime assumed when the token endpoint omits `expires_in`.
const DEFAULT_TOKEN_LIFETIME_SECS: u64 = 3600;

/// Longest remote error body kept in an error message.
const MAX_ERROR_BODY: usize = 500;

// =============================================================================
// API Trait
// =============================================================================

/// Operations the sync engine needs from an accounting system.
///
/// Implemented over HTTP by [`HttpAccountingClient`]; tests substitute an
/// in-memory fake.
#[async_trait]
pub trait AccountingApi: Send + Sync {
    async fn create_customer(&self, customer: &RemoteCustomer) -> SyncResult<RemoteRef>;

    async fn update_customer(&self, remote_id: i64, customer: &RemoteCustomer) -> SyncResult<()>;

    async fn create_product(&self, product: &RemoteProduct) -> SyncResult<RemoteRef>;

    async fn update_product(&self, remote_id: i64, product: &RemoteProduct) -> SyncResult<()>;

    async fn create_invoice(&self, invoice: &RemoteInvoice) -> SyncResult<RemoteRef>;

    async fn update_invoice_status(
        &self,
        remote_id: i64,
        status: &RemoteInvoiceStatus,
    ) -> SyncResult<()>;

    async fn register_payment(&self, payment: &RemotePayment) -> SyncResult<RemoteRef>;

    async fn create_credit_note(&self, credit_note: &RemoteCreditNote) -> SyncResult<RemoteRef>;

    /// Authenticated read that proves credentials and connectivity.
    async fn test_connection(&self) -> SyncResult<()>;
}

/// Builds an API handle for one tenant's credentials.
pub trait ApiFactory: Send + Sync {
    fn connect(
        &self,
        tenant_id: &str,
        credentials: &AccountingCredentials,
    ) -> SyncResult<Arc<dyn AccountingApi>>;
}

// =============================================================================
// Token Cache
// =============================================================================

/// Access token and its local expiry.
#[derive(Debug, Clone)]
pub struct TokenInfo {
    pub access_token: String,
    pub expires_at: Instant,
}

impl TokenInfo {
    /// Check if the token is expired or about to expire.
    pub fn needs_refresh(&self) -> bool {
        Instant::now() + Duration::from_secs(REFRESH_MARGIN_SECS) >= self.expires_at
    }

    /// Get remaining valid time.
    pub fn remaining_secs(&self) -> u64 {
        self.expires_at
            .saturating_duration_since(Instant::now())
            .as_secs()
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

// =============================================================================
// HTTP Client
// =============================================================================

/// reqwest-backed [`AccountingApi`] for one tenant.
pub struct HttpAccountingClient {
    http: reqwest::Client,
    base_url: String,
    auth_url: String,
    scope: Option<String>,
    credentials: AccountingCredentials,
    token: Arc<RwLock<Option<TokenInfo>>>,
}

impl HttpAccountingClient {
    /// Creates a client with its own connection pool.
    pub fn new(settings: &ApiSettings, credentials: AccountingCredentials) -> SyncResult<Self> {
        let http = build_http_client(settings)?;
        Ok(Self::with_http(http, settings, credentials))
    }

    /// Creates a client sharing an existing connection pool.
    pub fn with_http(
        http: reqwest::Client,
        settings: &ApiSettings,
        credentials: AccountingCredentials,
    ) -> Self {
        HttpAccountingClient {
            http,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            auth_url: settings.auth_url.clone(),
            scope: settings.scope.clone(),
            credentials,
            token: Arc::new(RwLock::new(None)),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    /// Returns a valid access token, exchanging credentials when needed.
    async fn access_token(&self) -> SyncResult<String> {
        {
            let guard = self.token.read().await;
            if let Some(token) = guard.as_ref() {
                if !token.needs_refresh() {
                    return Ok(token.access_token.clone());
                }
            }
        }

        let mut guard = self.token.write().await;

        // Double-check after acquiring write lock
        if let Some(token) = guard.as_ref() {
            if !token.needs_refresh() {
                return Ok(token.access_token.clone());
            }
        }

        let token = self.exchange_credentials().await?;
        info!(
            client_id = %self.credentials.client_id,
            expires_in_secs = token.remaining_secs(),
            "Authenticated with accounting API"
        );
        let access_token = token.access_token.clone();
        *guard = Some(token);
        Ok(access_token)
    }

    async fn invalidate_token(&self) {
        *self.token.write().await = None;
    }

    async fn exchange_credentials(&self) -> SyncResult<TokenInfo> {
        let mut params = vec![
            ("grant_type", "client_credentials".to_string()),
            ("client_id", self.credentials.client_id.clone()),
            ("client_secret", self.credentials.client_secret.clone()),
        ];
        if let Some(scope) = &self.scope {
            params.push(("scope", scope.clone()));
        }

        let response = self.http.post(&self.auth_url).form(&params).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SyncError::RemoteApi {
                status: Some(status.as_u16()),
                message: format!("token exchange failed: {}", error_message(&body)),
            });
        }

        let token: TokenResponse = response.json().await?;
        let lifetime = token.expires_in.unwrap_or(DEFAULT_TOKEN_LIFETIME_SECS);

        Ok(TokenInfo {
            access_token: token.access_token,
            expires_at: Instant::now() + Duration::from_secs(lifetime),
        })
    }

    /// Sends one request; re-authenticates once on 401.
    async fn send(&self, method: Method, path: &str, body: Option<Value>) -> SyncResult<Value> {
        let mut reauthenticated = false;

        loop {
            let token = self.access_token().await?;
            let mut request = self
                .http
                .request(method.clone(), self.url(path))
                .bearer_auth(&token);
            if let Some(company_id) = self.credentials.company_id {
                request = request.header("X-Company-Id", company_id.to_string());
            }
            if let Some(body) = &body {
                request = request.json(body);
            }

            debug!(method = %method, path = %path, "Calling accounting API");
            let response = request.send().await?;
            let status = response.status();

            if status == StatusCode::UNAUTHORIZED && !reauthenticated {
                warn!(path = %path, "Access token rejected, authenticating again");
                self.invalidate_token().await;
                reauthenticated = true;
                continue;
            }

            if !status.is_success() {
                let text = response.text().await.unwrap_or_default();
                return Err(SyncError::RemoteApi {
                    status: Some(status.as_u16()),
                    message: error_message(&text),
                });
            }

            let bytes = response.bytes().await?;
            if bytes.is_empty() {
                return Ok(Value::Null);
            }
            return serde_json::from_slice(&bytes).map_err(|e| SyncError::RemoteApi {
                status: Some(status.as_u16()),
                message: format!("unreadable response: {}", e),
            });
        }
    }

    async fn create(&self, path: &str, payload: Value) -> SyncResult<RemoteRef> {
        let response = self.send(Method::POST, path, Some(payload)).await?;
        parse_remote_ref(&response)
    }
}

#[async_trait]
impl AccountingApi for HttpAccountingClient {
    async fn create_customer(&self, customer: &RemoteCustomer) -> SyncResult<RemoteRef> {
        self.create("customer", serde_json::to_value(customer)?).await
    }

    async fn update_customer(&self, remote_id: i64, customer: &RemoteCustomer) -> SyncResult<()> {
        let path = format!("customer/{}", remote_id);
        self.send(Method::PUT, &path, Some(serde_json::to_value(customer)?))
            .await?;
        Ok(())
    }

    async fn create_product(&self, product: &RemoteProduct) -> SyncResult<RemoteRef> {
        self.create("product", serde_json::to_value(product)?).await
    }

    async fn update_product(&self, remote_id: i64, product: &RemoteProduct) -> SyncResult<()> {
        let path = format!("product/{}", remote_id);
        self.send(Method::PUT, &path, Some(serde_json::to_value(product)?))
            .await?;
        Ok(())
    }

    async fn create_invoice(&self, invoice: &RemoteInvoice) -> SyncResult<RemoteRef> {
        self.create("invoice", serde_json::to_value(invoice)?).await
    }

    async fn update_invoice_status(
        &self,
        remote_id: i64,
        status: &RemoteInvoiceStatus,
    ) -> SyncResult<()> {
        let path = format!("invoice/{}/status", remote_id);
        self.send(Method::PUT, &path, Some(serde_json::to_value(status)?))
            .await?;
        Ok(())
    }

    async fn register_payment(&self, payment: &RemotePayment) -> SyncResult<RemoteRef> {
        self.create("payment", serde_json::to_value(payment)?).await
    }

    async fn create_credit_note(&self, credit_note: &RemoteCreditNote) -> SyncResult<RemoteRef> {
        self.create("credit-note", serde_json::to_value(credit_note)?)
            .await
    }

    async fn test_connection(&self) -> SyncResult<()> {
        self.send(Method::GET, "companies", None).await?;
        Ok(())
    }
}

// =============================================================================
// Factory
// =============================================================================

/// Builds [`HttpAccountingClient`]s that share one connection pool.
#[derive(Clone)]
pub struct HttpApiFactory {
    http: reqwest::Client,
    settings: ApiSettings,
}

impl HttpApiFactory {
    pub fn new(settings: ApiSettings) -> SyncResult<Self> {
        let http = build_http_client(&settings)?;
        Ok(HttpApiFactory { http, settings })
    }
}

impl ApiFactory for HttpApiFactory {
    fn connect(
        &self,
        tenant_id: &str,
        credentials: &AccountingCredentials,
    ) -> SyncResult<Arc<dyn AccountingApi>> {
        debug!(tenant_id = %tenant_id, "Creating accounting API client");
        Ok(Arc::new(HttpAccountingClient::with_http(
            self.http.clone(),
            &self.settings,
            credentials.clone(),
        )))
    }
}

fn build_http_client(settings: &ApiSettings) -> SyncResult<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(settings.request_timeout())
        .connect_timeout(settings.connect_timeout())
        .build()
        .map_err(|e| SyncError::InvalidConfig(format!("cannot build HTTP client: {}", e)))
}

// =============================================================================
// Response Parsing
// =============================================================================

fn field<'a>(value: &'a Value, names: &[&str]) -> Option<&'a Value> {
    names.iter().find_map(|n| value.get(*n))
}

/// Reads `ID` plus `InvoiceNumber`/`CustomerNumber` from a create response.
fn parse_remote_ref(response: &Value) -> SyncResult<RemoteRef> {
    let id = field(response, &["ID", "Id", "id"])
        .and_then(|v| v.as_i64().or_else(|| v.as_str().and_then(|s| s.parse().ok())))
        .ok_or_else(|| SyncError::RemoteApi {
            status: None,
            message: "response did not contain a remote ID".to_string(),
        })?;

    let number = field(
        response,
        &["InvoiceNumber", "CustomerNumber", "PartNumber", "Number"],
    )
    .and_then(|v| match v {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    });

    Ok(RemoteRef { id, number })
}

/// Pulls a readable message out of an error body.
fn error_message(body: &str) -> String {
    if let Ok(json) = serde_json::from_str::<Value>(body) {
        if let Some(msg) = field(
            &json,
            &["Message", "message", "error_description", "error"],
        )
        .and_then(Value::as_str)
        {
            return msg.to_string();
        }
    }

    let trimmed = body.trim();
    if trimmed.is_empty() {
        return "empty response body".to_string();
    }
    trimmed.chars().take(MAX_ERROR_BODY).collect()
}

// =============================================================================
// Unit Tests
// =============================================================================
