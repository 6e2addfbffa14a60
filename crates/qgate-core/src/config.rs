//! Engine configuration.
//!
//! Defaults match the documented policy; every knob can be overridden with a
//! `QGATE_*` environment variable.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::OverrideTier;
use crate::error::{GateError, GateResult};
use crate::escalation::SlaPolicy;
use crate::overrides::{
    EmergencyPolicy, JustificationPolicy, OverrideSettings, DEFAULT_MIN_DISTINCT_WORDS,
    DEFAULT_MIN_LENGTH,
};
use crate::runner::{default_concurrency, RunnerConfig, DEFAULT_CHECK_TIMEOUT};

pub const DEFAULT_LEDGER_PATH: &str = ".qgate/ledger.jsonl";
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateConfig {
    pub min_justification_length: usize,
    pub min_distinct_words: usize,
    pub max_concurrency: usize,
    pub check_timeout_secs: u64,
    pub sla: SlaPolicy,
    pub emergency_policy: EmergencyPolicy,
    pub ledger_path: PathBuf,
    /// JSON principal directory; `None` means everyone is `default_tier`.
    pub principals_path: Option<PathBuf>,
    pub default_tier: OverrideTier,
    /// Escalation sweep period used by the daemon.
    pub sweep_interval_secs: u64,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            min_justification_length: DEFAULT_MIN_LENGTH,
            min_distinct_words: DEFAULT_MIN_DISTINCT_WORDS,
            max_concurrency: default_concurrency(),
            check_timeout_secs: DEFAULT_CHECK_TIMEOUT.as_secs(),
            sla: SlaPolicy::default(),
            emergency_policy: EmergencyPolicy::default(),
            ledger_path: PathBuf::from(DEFAULT_LEDGER_PATH),
            principals_path: None,
            default_tier: OverrideTier::SelfService,
            sweep_interval_secs: DEFAULT_SWEEP_INTERVAL_SECS,
        }
    }
}

fn parse<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, current: T) -> GateResult<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|e| GateError::InvalidConfig(format!("{key}={raw}: {e}"))),
        _ => Ok(current),
    }
}

impl GateConfig {
    /// Build from the process environment.
    pub fn from_env() -> GateResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup, starting from the defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> GateResult<Self> {
        let d = Self::default();
        let config = Self {
            min_justification_length: parse(
                &lookup,
                "QGATE_MIN_JUSTIFICATION_LENGTH",
                d.min_justification_length,
            )?,
            min_distinct_words: parse(&lookup, "QGATE_MIN_DISTINCT_WORDS", d.min_distinct_words)?,
            max_concurrency: parse(&lookup, "QGATE_MAX_CONCURRENCY", d.max_concurrency)?,
            check_timeout_secs: parse(&lookup, "QGATE_CHECK_TIMEOUT_SECS", d.check_timeout_secs)?,
            sla: SlaPolicy {
                tech_lead_secs: parse(&lookup, "QGATE_SLA_TECH_LEAD_SECS", d.sla.tech_lead_secs)?,
                security_team_secs: parse(
                    &lookup,
                    "QGATE_SLA_SECURITY_TEAM_SECS",
                    d.sla.security_team_secs,
                )?,
                emergency_secs: parse(&lookup, "QGATE_SLA_EMERGENCY_SECS", d.sla.emergency_secs)?,
            },
            emergency_policy: parse(&lookup, "QGATE_EMERGENCY_POLICY", d.emergency_policy)?,
            ledger_path: parse(&lookup, "QGATE_LEDGER", d.ledger_path)?,
            principals_path: lookup("QGATE_PRINCIPALS")
                .filter(|p| !p.trim().is_empty())
                .map(PathBuf::from),
            default_tier: parse(&lookup, "QGATE_DEFAULT_TIER", d.default_tier)?,
            sweep_interval_secs: parse(
                &lookup,
                "QGATE_SWEEP_INTERVAL_SECS",
                d.sweep_interval_secs,
            )?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> GateResult<()> {
        let invalid = |msg: &str| Err(GateError::InvalidConfig(msg.to_string()));
        if self.max_concurrency == 0 {
            return invalid("max_concurrency must be at least 1");
        }
        if self.check_timeout_secs == 0 {
            return invalid("check_timeout_secs must be at least 1");
        }
        if self.sweep_interval_secs == 0 {
            return invalid("sweep_interval_secs must be at least 1");
        }
        if self.sla.tech_lead_secs <= 0
            || self.sla.security_team_secs <= 0
            || self.sla.emergency_secs <= 0
        {
            return invalid("SLA windows must be positive");
        }
        Ok(())
    }

    pub fn runner_config(&self) -> RunnerConfig {
        RunnerConfig {
            max_concurrency: self.max_concurrency,
            default_timeout: Duration::from_secs(self.check_timeout_secs),
        }
    }

    pub fn override_settings(&self) -> OverrideSettings {
        OverrideSettings {
            justification: JustificationPolicy {
                min_length: self.min_justification_length,
                min_distinct_words: self.min_distinct_words,
            },
            sla: self.sla,
            emergency: self.emergency_policy,
        }
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = GateConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.min_justification_length, 50);
        assert_eq!(config.check_timeout_secs, 300);
        assert_eq!(config.sla.emergency_secs, 900);
        assert_eq!(config.ledger_path, PathBuf::from(".qgate/ledger.jsonl"));
        assert_eq!(config.emergency_policy, EmergencyPolicy::AlwaysRequireIncident);
    }

    #[test]
    fn test_env_overrides() {
        let config = GateConfig::from_lookup(lookup(&[
            ("QGATE_MIN_JUSTIFICATION_LENGTH", "20"),
            ("QGATE_EMERGENCY_POLICY", "require-incident-when-escalating"),
            ("QGATE_DEFAULT_TIER", "tech-lead"),
            ("QGATE_PRINCIPALS", "/etc/qgate/principals.json"),
        ]))
        .unwrap();
        assert_eq!(config.override_settings().justification.min_length, 20);
        assert_eq!(
            config.emergency_policy,
            EmergencyPolicy::RequireIncidentWhenEscalating
        );
        assert_eq!(config.default_tier, OverrideTier::TechLead);
        assert!(config.principals_path.is_some());
    }

    #[test]
    fn test_invalid_values_rejected() {
        let err = GateConfig::from_lookup(lookup(&[("QGATE_MAX_CONCURRENCY", "lots")])).unwrap_err();
        assert!(matches!(err, GateError::InvalidConfig(_)));

        let err = GateConfig::from_lookup(lookup(&[("QGATE_MAX_CONCURRENCY", "0")])).unwrap_err();
        assert!(err.to_string().contains("max_concurrency"));

        assert!(GateConfig::from_lookup(lookup(&[("QGATE_EMERGENCY_POLICY", "never")])).is_err());
    }
}
