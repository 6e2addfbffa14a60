//! qgated - escalation sweeper
//!
//! Periodically replays override state from the compliance ledger and
//! expires every escalation whose SLA deadline has passed. Runs until
//! Ctrl-C.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, Level};

use qgate_core::{
    init_tracing, CheckRegistry, Clock, EscalationScheduler, GateConfig, OverrideManager,
    PrincipalDirectory, SystemClock, METRICS,
};
use qgate_ledger::JsonlLedger;

#[derive(Parser)]
#[command(name = "qgated")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "QGate escalation daemon", long_about = None)]
struct Args {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long)]
    log_json: bool,

    /// Compliance ledger file
    #[arg(long, env = "QGATE_LEDGER")]
    ledger: Option<PathBuf>,

    /// Check registry (JSON); the standard checks when omitted
    #[arg(long, env = "QGATE_CHECKS")]
    checks: Option<PathBuf>,

    /// Seconds between sweeps
    #[arg(long, env = "QGATE_SWEEP_INTERVAL_SECS")]
    interval_secs: Option<u64>,

    /// Run a single sweep and exit
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let level = if args.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    init_tracing(args.log_json, level);

    let mut config = GateConfig::from_env()?;
    if let Some(path) = args.ledger {
        config.ledger_path = path;
    }
    if let Some(secs) = args.interval_secs {
        config.sweep_interval_secs = secs;
    }
    config.validate()?;

    let manager = open_manager(&config, args.checks).await?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    if args.once {
        let report = EscalationScheduler::new(manager).sweep(clock.now()).await;
        info!(
            examined = report.examined,
            expired = report.expired.len(),
            failed = report.failed.len(),
            "single sweep finished"
        );
        METRICS.flush();
        return Ok(());
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "cannot listen for Ctrl-C; stop the process externally");
            std::future::pending::<()>().await;
        }
        info!("shutdown requested");
        shutdown_tx.send_replace(true);
    });

    info!(
        ledger = %config.ledger_path.display(),
        interval_secs = config.sweep_interval_secs,
        "qgated started"
    );
    EscalationScheduler::new(manager)
        .with_resync(true)
        .run_periodic(config.sweep_interval(), clock, shutdown_rx)
        .await?;

    METRICS.flush();
    info!("qgated stopped");
    Ok(())
}

/// Open the ledger and replay override state into a fresh manager.
async fn open_manager(
    config: &GateConfig,
    checks: Option<PathBuf>,
) -> Result<Arc<OverrideManager>> {
    let registry = match checks {
        Some(path) => CheckRegistry::load(&path)?,
        None => CheckRegistry::standard(),
    };
    let principals = match &config.principals_path {
        Some(path) => PrincipalDirectory::load(path, config.default_tier)?,
        None => PrincipalDirectory::new(config.default_tier),
    };
    let ledger = JsonlLedger::open(&config.ledger_path)
        .await
        .with_context(|| format!("Failed to open ledger {:?}", config.ledger_path))?;

    let manager = OverrideManager::new(
        Arc::new(registry),
        Arc::new(ledger),
        config.override_settings(),
    )
    .with_principals(Arc::new(principals));
    let replayed = manager.restore().await?;
    info!(entries = replayed, "override state restored");
    Ok(Arc::new(manager))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use qgate_core::{ChangeSetId, ManualClock, OverrideRequest, RequestStatus, RequestTier};
    use qgate_ledger::{collect_entries, EntryType, LedgerFilter};
    use std::time::Duration as StdDuration;

    #[tokio::test]
    async fn periodic_sweep_expires_requests_written_after_start() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = GateConfig {
            ledger_path: dir.path().join("ledger.jsonl"),
            ..GateConfig::default()
        };
        let daemon = open_manager(&config, None).await.unwrap();

        // Another process files a tech-lead request five hours ago.
        let writer_ledger = Arc::new(JsonlLedger::open(&config.ledger_path).await.unwrap());
        let writer = OverrideManager::new(
            Arc::new(CheckRegistry::standard()),
            writer_ledger.clone(),
            config.override_settings(),
        )
        .with_clock(Arc::new(ManualClock::new(Utc::now() - Duration::hours(5))));
        let ticket = writer
            .request_override(OverrideRequest::new(
                "circular-dependency",
                ChangeSetId::new("pr-61", "r2"),
                "dev",
                RequestTier::TechLead,
                "The cycle is between two test helpers and is removed in the next sprint.",
            ))
            .await
            .unwrap();
        assert_eq!(ticket.status, RequestStatus::Pending);

        let (tx, rx) = watch::channel(false);
        let scheduler = EscalationScheduler::new(Arc::clone(&daemon)).with_resync(true);
        let handle = tokio::spawn(async move {
            scheduler
                .run_periodic(StdDuration::from_millis(20), Arc::new(SystemClock), rx)
                .await
        });

        let mut expired = false;
        for _ in 0..100 {
            let status = daemon.get(ticket.request_id).await.map(|r| r.status);
            if status == Some(RequestStatus::Expired) {
                expired = true;
                break;
            }
            tokio::time::sleep(StdDuration::from_millis(20)).await;
        }
        tx.send_replace(true);
        handle.await.unwrap().unwrap();
        assert!(expired);

        let entries = collect_entries(
            writer_ledger.as_ref(),
            LedgerFilter::of_types(&[EntryType::OverrideExpired]),
        )
        .await
        .unwrap();
        assert_eq!(entries.len(), 1);
        assert!(writer_ledger.verify().await.is_ok());
    }

    #[test]
    fn args_parse() {
        use clap::CommandFactory;
        Args::command().debug_assert();
    }
}
