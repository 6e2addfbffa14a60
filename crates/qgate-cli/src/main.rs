//! QGate - pre-merge quality gate CLI
//!
//! The `qgate` command runs checks against a change set and drives the
//! override lifecycle by hand. All state lives in the compliance ledger and
//! is replayed on every invocation.
//!
//! ## Commands
//!
//! - `run`: Evaluate a directory as a change-set revision
//! - `request-override`: File an override against a failing check
//! - `approve` / `deny`: Resolve a pending override
//! - `status`: Show the current verdict of a change set
//! - `tickets`: List open escalations
//! - `sweep`: Expire escalations past their SLA
//! - `report`: Compliance report over a time window
//! - `verify-ledger`: Check the ledger hash chain

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{debug, Level};
use uuid::Uuid;

use qgate_core::{
    builtin_plugins, compliance_report, init_tracing, Analysis, Category, ChangeSetId, Check,
    CheckPlugin, CheckRegistry, EmergencyPolicy, ErrorKind, FsChangeSet, GateConfig, GateError,
    OverrideError, OverrideRequest, OverrideTier, PrincipalDirectory, QualityGate, ReportQuery,
    RequestTier, ReviewVerdict, EXIT_VERDICT_BLOCKED, METRICS,
};
use qgate_ledger::{JsonlLedger, LedgerError};

#[derive(Parser)]
#[command(name = "qgate")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Pre-merge quality gate with override escalation", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(flatten)]
    settings: Settings,

    #[command(subcommand)]
    command: Commands,
}

/// Engine knobs; each falls back to its `QGATE_*` variable, then the
/// built-in default.
#[derive(Args)]
struct Settings {
    /// Compliance ledger file
    #[arg(long, global = true, env = "QGATE_LEDGER")]
    ledger: Option<PathBuf>,

    /// Principal directory (JSON)
    #[arg(long, global = true, env = "QGATE_PRINCIPALS")]
    principals: Option<PathBuf>,

    /// Check registry (JSON); the standard checks when omitted
    #[arg(long, global = true, env = "QGATE_CHECKS")]
    checks: Option<PathBuf>,

    /// Default per-check timeout in seconds
    #[arg(long, global = true, env = "QGATE_CHECK_TIMEOUT_SECS")]
    check_timeout_secs: Option<u64>,

    /// Maximum checks running at once
    #[arg(long, global = true, env = "QGATE_MAX_CONCURRENCY")]
    max_concurrency: Option<usize>,

    /// always-require-incident | require-incident-when-escalating
    #[arg(long, global = true, env = "QGATE_EMERGENCY_POLICY")]
    emergency_policy: Option<EmergencyPolicy>,
}

impl Settings {
    fn resolve(&self) -> Result<GateConfig> {
        let mut config = GateConfig::from_env()?;
        if let Some(path) = &self.ledger {
            config.ledger_path = path.clone();
        }
        if let Some(path) = &self.principals {
            config.principals_path = Some(path.clone());
        }
        if let Some(secs) = self.check_timeout_secs {
            config.check_timeout_secs = secs;
        }
        if let Some(n) = self.max_concurrency {
            config.max_concurrency = n;
        }
        if let Some(policy) = self.emergency_policy {
            config.emergency_policy = policy;
        }
        config.validate()?;
        Ok(config)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate a directory as one revision of a change set
    Run {
        /// Change-set id (e.g. a pull request number)
        change_set: String,

        /// Revision being evaluated (e.g. the head commit)
        #[arg(long)]
        revision: String,

        /// Directory holding the changed files
        #[arg(long, default_value = ".")]
        path: PathBuf,

        /// JSON object of externally computed results, `{check_id: analysis}`
        #[arg(long)]
        results: Option<PathBuf>,

        /// Print the verdict as JSON
        #[arg(long)]
        json: bool,
    },

    /// Request an override for a failing check
    RequestOverride {
        /// Check to override
        check_id: String,

        /// Change-set id; its latest evaluated revision is used
        #[arg(long)]
        change_set: String,

        /// Pin a specific revision instead of the latest
        #[arg(long)]
        revision: Option<String>,

        /// Why the failure is acceptable
        #[arg(long)]
        justification: String,

        /// Incident or ticket reference
        #[arg(long)]
        ticket: Option<String>,

        /// Requested tier; defaults to the check's own tier
        #[arg(long)]
        tier: Option<RequestTier>,

        /// Requesting principal
        #[arg(long = "as", env = "QGATE_PRINCIPAL")]
        principal: String,
    },

    /// Approve a pending override request
    Approve {
        request_id: Uuid,

        /// Approving principal
        #[arg(long = "as", env = "QGATE_PRINCIPAL")]
        principal: String,
    },

    /// Deny a pending override request
    Deny {
        request_id: Uuid,

        /// Reason recorded with the denial
        #[arg(long)]
        reason: String,

        /// Denying principal
        #[arg(long = "as", env = "QGATE_PRINCIPAL")]
        principal: String,
    },

    /// Show the current verdict of a change set
    Status {
        change_set: String,

        /// Print the verdict as JSON
        #[arg(long)]
        json: bool,

        /// Exit with code 2 when the verdict is blocked
        #[arg(long)]
        fail_on_block: bool,
    },

    /// List open escalation tickets, nearest deadline first
    Tickets {
        #[arg(long)]
        json: bool,
    },

    /// Expire every escalation past its SLA deadline
    Sweep,

    /// Compliance report; exits 0/1/2 for on_track/below_target/critical
    Report {
        /// Window length in days, ending now
        #[arg(long, default_value = "7")]
        days: i64,

        /// Restrict check statistics to one check
        #[arg(long)]
        check: Option<String>,

        /// Restrict check statistics to one category
        #[arg(long)]
        category: Option<Category>,

        /// Print the report as JSON instead of markdown
        #[arg(long)]
        json: bool,
    },

    /// Verify the ledger hash chain end to end
    VerifyLedger,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::WARN
    };
    init_tracing(cli.log_json, level);

    let code = match dispatch(cli).await {
        Ok(code) => code,
        Err(err) => {
            let kind = classify(&err);
            eprintln!("error[{}]: {err:#}", kind.code());
            kind.exit_code()
        }
    };
    METRICS.flush();
    ExitCode::from(u8::try_from(code).unwrap_or(1))
}

async fn dispatch(cli: Cli) -> Result<i32> {
    let config = cli.settings.resolve()?;

    // Integrity checks must not depend on a successful replay.
    let command = match cli.command {
        Commands::VerifyLedger => return cmd_verify_ledger(&config).await,
        other => other,
    };
    let gate = open_gate(&config, cli.settings.checks.as_deref()).await?;

    match command {
        Commands::Run {
            change_set,
            revision,
            path,
            results,
            json,
        } => cmd_run(&gate, &change_set, &revision, &path, results.as_deref(), json).await,
        Commands::RequestOverride {
            check_id,
            change_set,
            revision,
            justification,
            ticket,
            tier,
            principal,
        } => {
            cmd_request_override(
                &gate,
                &check_id,
                &change_set,
                revision.as_deref(),
                &justification,
                ticket,
                tier,
                &principal,
            )
            .await
        }
        Commands::Approve {
            request_id,
            principal,
        } => cmd_approve(&gate, request_id, &principal).await,
        Commands::Deny {
            request_id,
            reason,
            principal,
        } => cmd_deny(&gate, request_id, &reason, &principal).await,
        Commands::Status {
            change_set,
            json,
            fail_on_block,
        } => cmd_status(&gate, &change_set, json, fail_on_block).await,
        Commands::Tickets { json } => cmd_tickets(&gate, json).await,
        Commands::Sweep => cmd_sweep(&gate).await,
        Commands::Report {
            days,
            check,
            category,
            json,
        } => cmd_report(&gate, days, check, category, json).await,
        Commands::VerifyLedger => cmd_verify_ledger(&config).await,
    }
}

/// Map an error to its stable kind by walking the cause chain.
fn classify(err: &anyhow::Error) -> ErrorKind {
    for cause in err.chain() {
        if let Some(e) = cause.downcast_ref::<GateError>() {
            return e.kind();
        }
        if let Some(e) = cause.downcast_ref::<OverrideError>() {
            return e.kind();
        }
        if let Some(e) = cause.downcast_ref::<LedgerError>() {
            return if e.is_integrity_failure() {
                ErrorKind::LedgerCorrupted
            } else {
                ErrorKind::LedgerWriteFailure
            };
        }
    }
    ErrorKind::Internal
}

/// Open the ledger and replay it into a fresh gate.
async fn open_gate(config: &GateConfig, checks: Option<&Path>) -> Result<QualityGate> {
    let registry = match checks {
        Some(path) => CheckRegistry::load(path)?,
        None => CheckRegistry::standard(),
    };
    let principals = match &config.principals_path {
        Some(path) => PrincipalDirectory::load(path, config.default_tier)?,
        None => PrincipalDirectory::new(config.default_tier),
    };
    let ledger = JsonlLedger::open(&config.ledger_path)
        .await
        .with_context(|| format!("Failed to open ledger {:?}", config.ledger_path))?;

    let gate = QualityGate::builder(Arc::new(registry), Arc::new(ledger))
        .config(config.clone())
        .principals(Arc::new(principals))
        .build();
    let restored = gate.restore().await?;
    debug!(change_sets = restored, "ledger replayed");
    Ok(gate)
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

async fn cmd_run(
    gate: &QualityGate,
    change_set: &str,
    revision: &str,
    path: &Path,
    results: Option<&Path>,
    json: bool,
) -> Result<i32> {
    let id = ChangeSetId::new(change_set, revision);
    let source = FsChangeSet::scan(id, path)
        .await
        .context(format!("Failed to scan {:?}", path))?;

    let mut plugins = builtin_plugins(gate.registry());
    if let Some(file) = results {
        let external: BTreeMap<String, Analysis> = read_json_file(file)?;
        for (check_id, analysis) in external {
            let check = gate.registry().require(&check_id)?.clone();
            plugins.retain(|p| p.check.id != check_id);
            plugins.push(CheckPlugin::fixed(check, analysis));
        }
    }

    let verdict = gate.evaluate(Arc::new(source), &plugins).await?;
    print_verdict(&verdict, json)?;
    Ok(if verdict.merge_allowed() {
        0
    } else {
        EXIT_VERDICT_BLOCKED
    })
}

async fn cmd_status(
    gate: &QualityGate,
    change_set: &str,
    json: bool,
    fail_on_block: bool,
) -> Result<i32> {
    let verdict = gate.status(change_set).await?;
    print_verdict(&verdict, json)?;
    Ok(if fail_on_block && !verdict.merge_allowed() {
        EXIT_VERDICT_BLOCKED
    } else {
        0
    })
}

fn print_verdict(verdict: &ReviewVerdict, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(verdict)?);
        return Ok(());
    }

    println!("Change set: {}", verdict.change_set_id);
    println!("Status:     {}", verdict.overall_status);
    if !verdict.blocking_checks.is_empty() {
        println!("\nBlocking:");
        for id in &verdict.blocking_checks {
            println!("  {id}");
        }
    }
    let advisory: Vec<_> = verdict
        .failed_checks
        .difference(&verdict.blocking_checks)
        .collect();
    if !advisory.is_empty() {
        println!("\nFailing (warning):");
        for id in advisory {
            println!("  {id}");
        }
    }
    if !verdict.overridden_checks.is_empty() {
        println!("\nOverridden:");
        for (id, record) in &verdict.overridden_checks {
            println!(
                "  {id} ({}, approved by {})",
                record.tier, record.approved_by
            );
        }
    }
    for warning in &verdict.warnings {
        println!("\nwarning: {warning}");
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Overrides
// ---------------------------------------------------------------------------

/// Request tier matching the check's own override tier.
fn tier_for(check: &Check) -> RequestTier {
    match check.override_tier.effective() {
        OverrideTier::SecurityTeam => RequestTier::SecurityTeam,
        OverrideTier::TechLead => RequestTier::TechLead,
        _ => RequestTier::SelfService,
    }
}

#[allow(clippy::too_many_arguments)]
async fn cmd_request_override(
    gate: &QualityGate,
    check_id: &str,
    change_set: &str,
    revision: Option<&str>,
    justification: &str,
    ticket: Option<String>,
    tier: Option<RequestTier>,
    principal: &str,
) -> Result<i32> {
    let change_set_id = match revision {
        Some(rev) => ChangeSetId::new(change_set, rev),
        None => gate.status(change_set).await?.change_set_id,
    };
    let tier = match tier {
        Some(tier) => tier,
        None => tier_for(gate.registry().require(check_id)?),
    };

    let mut request = OverrideRequest::new(check_id, change_set_id, principal, tier, justification);
    if let Some(reference) = ticket {
        request = request.with_ticket(reference);
    }

    let ticket = gate.request_override(request).await?;
    println!("Override request: {}", ticket.request_id);
    println!("Status:           {}", ticket.status);
    if let Some(escalation) = &ticket.escalation {
        println!("Escalated to:     {}", escalation.notified_channels.join(", "));
        println!(
            "Decision due:     {}",
            escalation.sla_deadline.format("%Y-%m-%d %H:%M UTC")
        );
    }
    Ok(0)
}

async fn cmd_approve(gate: &QualityGate, request_id: Uuid, principal: &str) -> Result<i32> {
    let record = gate.approve(request_id, principal).await?;
    println!(
        "Approved override of {} ({}) by {}",
        record.check_id, record.tier, record.approved_by
    );
    if let Some(request) = gate.manager().get(request_id).await {
        let verdict = gate.status(&request.change_set_id.id).await?;
        println!("Verdict for {}: {}", verdict.change_set_id, verdict.overall_status);
    }
    Ok(0)
}

async fn cmd_deny(
    gate: &QualityGate,
    request_id: Uuid,
    reason: &str,
    principal: &str,
) -> Result<i32> {
    gate.deny(request_id, principal, reason).await?;
    println!("Denied override request {request_id}");
    Ok(0)
}

async fn cmd_tickets(gate: &QualityGate, json: bool) -> Result<i32> {
    let tickets = gate.manager().open_tickets().await;
    if json {
        println!("{}", serde_json::to_string_pretty(&tickets)?);
        return Ok(0);
    }
    if tickets.is_empty() {
        println!("No open escalations.");
        return Ok(0);
    }

    let now = Utc::now();
    for ticket in &tickets {
        let check = match gate.manager().get(ticket.request_id).await {
            Some(request) => format!("{} on {}", request.check_id, request.change_set_id),
            None => "?".to_string(),
        };
        let remaining = ticket.sla_deadline - now;
        let due = if remaining.num_seconds() <= 0 {
            "overdue".to_string()
        } else {
            format!("{}h{:02}m left", remaining.num_hours(), remaining.num_minutes() % 60)
        };
        println!(
            "{}  {:<14} {check}  ({due})",
            ticket.request_id,
            ticket.tier.as_str()
        );
    }
    Ok(0)
}

async fn cmd_sweep(gate: &QualityGate) -> Result<i32> {
    let report = gate.sweep_escalations(Utc::now()).await;
    println!(
        "Examined {} open escalation(s), expired {}",
        report.examined,
        report.expired.len()
    );
    for id in &report.expired {
        println!("  expired {id}");
    }
    if !report.failed.is_empty() {
        return Err(LedgerError::WriteRejected(format!(
            "{} expiry write(s) failed",
            report.failed.len()
        ))
        .into());
    }
    Ok(0)
}

// ---------------------------------------------------------------------------
// Reporting & integrity
// ---------------------------------------------------------------------------

async fn cmd_report(
    gate: &QualityGate,
    days: i64,
    check: Option<String>,
    category: Option<Category>,
    json: bool,
) -> Result<i32> {
    anyhow::ensure!(days > 0, "--days must be positive");
    let mut query = ReportQuery::last_days(Utc::now(), days);
    if let Some(check) = check {
        query = query.with_check(check);
    }
    if let Some(category) = category {
        query = query.with_category(category);
    }

    let report = compliance_report(gate.ledger().as_ref(), &query).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", report.render_markdown());
    }
    Ok(report.status.exit_code())
}

async fn cmd_verify_ledger(config: &GateConfig) -> Result<i32> {
    let ledger = JsonlLedger::open(&config.ledger_path)
        .await
        .with_context(|| format!("Failed to open ledger {:?}", config.ledger_path))?;
    let entries = ledger.verify().await?;
    println!(
        "Ledger {} verified: {entries} entries",
        ledger.path().display()
    );
    Ok(0)
}

fn read_json_file<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path).context(format!("Failed to read {:?}", path))?;
    serde_json::from_str(&content).context(format!("Failed to parse {:?} as JSON", path))
}
