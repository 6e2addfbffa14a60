//! Declarative check definitions.

use serde::{Deserialize, Serialize};

/// Area of code quality a check belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Category {
    Security,
    Architecture,
    Performance,
    Testing,
    BreakingChange,
    Documentation,
}

impl Category {
    pub const ALL: [Category; 6] = [
        Self::Security,
        Self::Architecture,
        Self::Performance,
        Self::Testing,
        Self::BreakingChange,
        Self::Documentation,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Security => "security",
            Self::Architecture => "architecture",
            Self::Performance => "performance",
            Self::Testing => "testing",
            Self::BreakingChange => "breaking-change",
            Self::Documentation => "documentation",
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| format!("unknown category: {s}"))
    }
}

/// Severity of a check's findings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

/// Whether a failing check blocks the merge or only informs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnforcementMode {
    Warning,
    Error,
}

impl std::fmt::Display for EnforcementMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Warning => write!(f, "warning"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Minimum authorization level required to waive a check.
///
/// Ordered: `None < SelfService < TechLead < SecurityTeam`. `None` grants
/// nothing beyond self-service, see [`OverrideTier::effective`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OverrideTier {
    None,
    SelfService,
    TechLead,
    SecurityTeam,
}

impl OverrideTier {
    /// Tier used for comparisons; `None` collapses to `SelfService`.
    pub fn effective(self) -> Self {
        match self {
            Self::None => Self::SelfService,
            other => other,
        }
    }

    /// Whether a holder of `self` satisfies a `required` tier.
    pub fn satisfies(self, required: OverrideTier) -> bool {
        self.effective() >= required.effective()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::SelfService => "self-service",
            Self::TechLead => "tech-lead",
            Self::SecurityTeam => "security-team",
        }
    }
}

impl std::fmt::Display for OverrideTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for OverrideTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(Self::None),
            "self-service" => Ok(Self::SelfService),
            "tech-lead" => Ok(Self::TechLead),
            "security-team" => Ok(Self::SecurityTeam),
            other => Err(format!("unknown override tier: {other}")),
        }
    }
}

/// Immutable check definition, created at registry load time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Check {
    pub id: String,
    pub category: Category,
    pub severity: Severity,
    pub mode: EnforcementMode,
    pub override_tier: OverrideTier,
    #[serde(default)]
    pub cannot_override: bool,
    /// Per-check timeout; the runner default applies when unset.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub description: String,
}

impl Check {
    pub fn new(
        id: impl Into<String>,
        category: Category,
        severity: Severity,
        mode: EnforcementMode,
        override_tier: OverrideTier,
    ) -> Self {
        Self {
            id: id.into(),
            category,
            severity,
            mode,
            override_tier,
            cannot_override: false,
            timeout_secs: None,
            description: String::new(),
        }
    }

    /// Mark the check as never overridable.
    pub fn locked(mut self) -> Self {
        self.cannot_override = true;
        self
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn is_blocking(&self) -> bool {
        self.mode == EnforcementMode::Error
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_ordering() {
        assert!(OverrideTier::None < OverrideTier::SelfService);
        assert!(OverrideTier::SelfService < OverrideTier::TechLead);
        assert!(OverrideTier::TechLead < OverrideTier::SecurityTeam);
    }

    #[test]
    fn test_none_tier_is_self_service() {
        assert!(OverrideTier::SelfService.satisfies(OverrideTier::None));
        assert!(OverrideTier::None.satisfies(OverrideTier::SelfService));
        assert!(!OverrideTier::None.satisfies(OverrideTier::TechLead));
        assert!(OverrideTier::SecurityTeam.satisfies(OverrideTier::TechLead));
    }

    #[test]
    fn test_category_serde_is_kebab() {
        let json = serde_json::to_string(&Category::BreakingChange).unwrap();
        assert_eq!(json, "\"breaking-change\"");
        assert_eq!("breaking-change".parse::<Category>().unwrap(), Category::BreakingChange);
        assert!("style".parse::<Category>().is_err());
    }

    #[test]
    fn test_check_deserializes_with_defaults() {
        let check: Check = serde_json::from_str(
            r#"{"id":"memory-leak","category":"performance","severity":"medium",
                "mode":"warning","override_tier":"self-service"}"#,
        )
        .unwrap();
        assert!(!check.cannot_override);
        assert_eq!(check.timeout_secs, None);
        assert!(!check.is_blocking());
    }
}
