//! Log setup shared by `qgate` and `qgated`.
//!
//! Gate events (`check.completed`, `override.*`, `escalation.sweep`) are
//! emitted by [`crate::obs`]; this module only decides where they go and
//! how much of them is shown. Output always goes to stderr: `qgate status
//! --json` and `qgate report --json` print their payload on stdout.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Filter variable checked before `RUST_LOG`.
pub const LOG_ENV: &str = "QGATE_LOG";

const GATE_TARGETS: &[&str] = &["qgate_core", "qgate_ledger", "qgate", "qgated"];

/// `level` for the gate's own crates, `warn` for everything else.
fn default_directives(level: Level) -> String {
    let mut directives = vec!["warn".to_string()];
    directives.extend(GATE_TARGETS.iter().map(|t| format!("{t}={level}")));
    directives.join(",").to_lowercase()
}

fn filter(level: Level) -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(default_directives(level)))
}

/// Install the global subscriber. `json` switches to one JSON object per
/// line for log shippers. A second call is a no-op.
pub fn init_tracing(json: bool, level: Level) {
    let registry = tracing_subscriber::registry().with(filter(level));
    let layer = fmt::layer().with_target(false).with_writer(std::io::stderr);

    let installed = if json {
        registry.with(layer.json()).try_init()
    } else {
        registry.with(layer).try_init()
    };
    if installed.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}
