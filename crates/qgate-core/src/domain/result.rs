//! Per-check execution results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::change_set::ChangeSetId;

/// Finding recorded when a check exceeds its timeout.
pub const TIMEOUT_FINDING: &str = "check timed out";
/// Finding recorded for an applicable check that produced no result.
pub const NO_RESULT_FINDING: &str = "no result recorded";
/// Prefix of the finding recorded when a check's analysis errors.
pub const EXECUTION_ERROR_PREFIX: &str = "check execution error: ";

/// Outcome of one check. `Pass < Fail` so failures win ordering ties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    Pass,
    Fail,
}

impl std::fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pass => write!(f, "pass"),
            Self::Fail => write!(f, "fail"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Location {
    pub path: String,
    pub line: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Finding {
    pub location: Option<Location>,
    pub message: String,
}

impl Finding {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            location: None,
            message: message.into(),
        }
    }

    pub fn at(path: impl Into<String>, line: u32, message: impl Into<String>) -> Self {
        Self {
            location: Some(Location {
                path: path.into(),
                line: Some(line),
            }),
            message: message.into(),
        }
    }

    pub fn execution_error(cause: impl std::fmt::Display) -> Self {
        Self::new(format!("{EXECUTION_ERROR_PREFIX}{cause}"))
    }
}

impl std::fmt::Display for Finding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.location {
            Some(Location {
                path,
                line: Some(line),
            }) => write!(f, "{path}:{line}: {}", self.message),
            Some(Location { path, line: None }) => write!(f, "{path}: {}", self.message),
            None => f.write_str(&self.message),
        }
    }
}

/// Result of running one check against one change-set revision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckResult {
    pub check_id: String,
    pub change_set_id: ChangeSetId,
    pub status: CheckStatus,
    pub findings: Vec<Finding>,
    pub executed_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl CheckResult {
    pub fn pass(
        check_id: impl Into<String>,
        change_set_id: ChangeSetId,
        executed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            check_id: check_id.into(),
            change_set_id,
            status: CheckStatus::Pass,
            findings: Vec::new(),
            executed_at,
            duration_ms: 0,
        }
    }

    pub fn fail(
        check_id: impl Into<String>,
        change_set_id: ChangeSetId,
        findings: Vec<Finding>,
        executed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            check_id: check_id.into(),
            change_set_id,
            status: CheckStatus::Fail,
            findings,
            executed_at,
            duration_ms: 0,
        }
    }

    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }

    pub fn passed(&self) -> bool {
        self.status == CheckStatus::Pass
    }

    pub fn timed_out(&self) -> bool {
        self.findings.iter().any(|f| f.message == TIMEOUT_FINDING)
    }
}
