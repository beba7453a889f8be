//! # Tally Worker
//!
//! Runs the accounting sync scheduler and exposes the admin operations on
//! the command line.
//!
//! ## Commands
//! ```text
//! tally-worker [--config PATH] run
//! tally-worker [--config PATH] run-once <tenant>
//! tally-worker [--config PATH] sync <tenant> <kind> <id>...
//! tally-worker [--config PATH] invoice-status <tenant> <order_id> <draft|invoiced|paid|cancelled>
//! tally-worker [--config PATH] test-connection <tenant>
//! tally-worker [--config PATH] status <tenant>
//! ```
//!
//! ## Log Levels
//! - `RUST_LOG=debug` - Show debug messages
//! - `RUST_LOG=tally_sync=trace` - Trace the sync engine only
//! - Default: `info,tally_sync=debug,sqlx=warn`

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use tally_core::{EntityKind, InvoiceStatus, TriggerSource};
use tally_db::{Database, DbConfig};
use tally_sync::{
    tenant_status, HttpApiFactory, ManualSyncRequest, ManualTrigger, Scheduler, SyncConfig,
    SyncEngine, TenantAccountingContext,
};

/// Log entries and failures shown by `status`.
const STATUS_LIMIT: u32 = 20;

/// Tally Sync worker - accounting sync scheduler and admin commands
#[derive(Parser, Debug)]
#[command(name = "tally-worker")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Config file (defaults to the platform config dir, then TALLY_* env)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the scheduler until SIGTERM or Ctrl+C
    Run,

    /// Run one full sync for a tenant now
    RunOnce {
        tenant_id: String,
    },

    /// Push specific records (also the retry path for failed ones)
    Sync {
        tenant_id: String,

        /// customer, product, order, payment or refund
        kind: EntityKind,

        #[arg(required = true)]
        ids: Vec<String>,
    },

    /// Move a synced invoice to a new remote status
    InvoiceStatus {
        tenant_id: String,
        order_id: String,

        /// draft, invoiced, paid or cancelled
        status: InvoiceStatus,
    },

    /// Check credentials against the accounting API
    TestConnection {
        tenant_id: String,
    },

    /// Print settings, recent log entries and failed mappings as JSON
    Status {
        tenant_id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();

    let config = SyncConfig::load(cli.config).context("loading sync config")?;
    info!(
        api = %config.api.base_url,
        database = %config.database.path.display(),
        "Configuration loaded"
    );

    let db = Database::new(
        DbConfig::new(&config.database.path).max_connections(config.database.max_connections),
    )
    .await
    .context("opening database")?;

    let factory = Arc::new(HttpApiFactory::new(config.api.clone())?);
    let scheduler = Scheduler::new(db.clone(), factory.clone(), config.scheduler.clone());

    match cli.command {
        Command::Run => {
            scheduler.run(shutdown_signal()).await;
            info!("Worker stopped");
        }

        Command::RunOnce { tenant_id } => {
            let report = scheduler.run_tenant(&tenant_id, Utc::now()).await?;
            println!("{}: {}", report.tenant_id, report.status);
            for batch in &report.batches {
                println!(
                    "  {:<8} {:<7} processed={} failed={}",
                    batch.kind.to_string(),
                    batch.status.to_string(),
                    batch.processed,
                    batch.failed
                );
            }
            for error in &report.errors {
                println!("  ! {}", error);
            }
        }

        Command::Sync { tenant_id, kind, ids } => {
            let trigger = ManualTrigger::new(db, factory, scheduler.lock().clone());
            let response = trigger
                .trigger(ManualSyncRequest::new(tenant_id, kind, ids))
                .await?;
            println!("{}", serde_json::to_string_pretty(&response)?);
        }

        Command::InvoiceStatus { tenant_id, order_id, status } => {
            let ctx = TenantAccountingContext::load(&db, factory.as_ref(), &tenant_id).await?;
            SyncEngine::new(db)
                .transition_invoice_status(&ctx, &order_id, status, TriggerSource::Manual)
                .await?;
            println!("{} -> {}", order_id, status);
        }

        Command::TestConnection { tenant_id } => {
            let ctx = TenantAccountingContext::load(&db, factory.as_ref(), &tenant_id).await?;
            SyncEngine::new(db)
                .test_connection(&ctx, TriggerSource::Manual)
                .await?;
            println!("{}: connection ok", tenant_id);
        }

        Command::Status { tenant_id } => {
            let status = tenant_status(&db, &tenant_id, STATUS_LIMIT).await?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
    }

    Ok(())
}

/// Initializes tracing with an env-driven filter.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tally_sync=debug,sqlx=warn"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}

/// Resolves on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, finishing current tick");
}
