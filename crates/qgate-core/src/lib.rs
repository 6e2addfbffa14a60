//! QGate Core Library
//!
//! Pre-merge quality gate engine: runs a registry of checks against a
//! change set, aggregates the results into a [`ReviewVerdict`], and governs
//! the override and escalation process that lets humans waive failing
//! checks with an auditable trail in the compliance ledger.
//!
//! ## Key Components
//!
//! - [`CheckRunner`]: concurrent, bounded, timeout-aware check execution
//! - [`aggregate`]: pure verdict computation
//! - [`OverrideManager`]: override state machine and authority checks
//! - [`EscalationScheduler`]: SLA expiry sweeps
//! - [`QualityGate`]: the facade tying it all to a [`ComplianceLedger`]
//!
//! [`ComplianceLedger`]: qgate_ledger::ComplianceLedger

pub mod aggregator;
pub mod analyzer;
pub mod builtin;
pub mod config;
pub mod domain;
pub mod error;
pub mod escalation;
pub mod gate;
pub mod metrics;
pub mod notify;
pub mod obs;
pub mod overrides;
pub mod registry;
pub mod replay;
pub mod reporting;
pub mod revision;
pub mod runner;
pub mod telemetry;

pub use aggregator::aggregate;
pub use analyzer::{
    Analysis, Analyzer, ChangeSetSource, CheckPlugin, FixedAnalyzer, FsChangeSet,
    InMemoryChangeSet,
};
pub use builtin::builtin_plugins;
pub use config::GateConfig;
pub use domain::{
    Category, ChangeSetId, Check, CheckResult, CheckStatus, EnforcementMode, EscalationTicket,
    Finding, Location, OverallStatus, OverrideRecord, OverrideRequest, OverrideTier,
    RequestStatus, RequestTier, ReviewVerdict, Severity,
};
pub use error::{ErrorKind, GateError, GateResult, EXIT_VERDICT_BLOCKED};
pub use escalation::{Clock, EscalationScheduler, ManualClock, SlaPolicy, SweepReport, SystemClock};
pub use gate::{QualityGate, QualityGateBuilder};
pub use metrics::METRICS;
pub use notify::{
    ChannelSink, MemorySink, NotificationEvent, NotificationKind, NotificationSink, TracingSink,
};
pub use overrides::{
    EmergencyPolicy, JustificationPolicy, OverrideError, OverrideManager, OverrideResult,
    OverrideSettings, OverrideTicket, PrincipalDirectory,
};
pub use registry::CheckRegistry;
pub use replay::{replay_evaluation, replay_verdict};
pub use reporting::{compliance_report, ComplianceReport, ComplianceStatus, ReportQuery};
pub use revision::RevisionTracker;
pub use runner::{CheckRunner, RunnerConfig};
pub use telemetry::init_tracing;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
