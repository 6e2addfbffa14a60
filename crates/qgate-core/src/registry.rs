//! Check registry.
//!
//! Holds the declarative [`Check`] definitions. Built once at startup and
//! read-only afterwards, so it is shared as `Arc<CheckRegistry>` without
//! locking.

use std::collections::BTreeMap;
use std::path::Path;

use crate::domain::{Category, Check, EnforcementMode, OverrideTier, Severity};
use crate::error::{GateError, GateResult};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CheckRegistry {
    checks: BTreeMap<String, Check>,
}

impl CheckRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The standard pre-merge check catalogue.
    pub fn standard() -> Self {
        use Category::*;
        use EnforcementMode::{Error, Warning};
        use OverrideTier::{SecurityTeam, SelfService, TechLead};
        use Severity::*;

        Self::new()
            // Security
            .with_check(
                Check::new("hardcoded-credentials", Security, Critical, Error, SecurityTeam)
                    .with_description("API keys, passwords, tokens or private keys committed in source"),
            )
            .with_check(
                Check::new("sql-injection", Security, Critical, Error, SecurityTeam)
                    .with_description("SQL built by string formatting or concatenation"),
            )
            .with_check(
                Check::new("unsafe-deserialization", Security, Critical, Error, SecurityTeam)
                    .with_description("Deserialization of untrusted input without a safe loader"),
            )
            .with_check(
                Check::new("sensitive-data-logging", Security, High, Error, TechLead)
                    .with_description("Credentials or PII written to logs"),
            )
            // Architecture
            .with_check(
                Check::new("layer-separation", Architecture, Medium, Warning, SelfService)
                    .with_description("Presentation code reaching into the data layer"),
            )
            .with_check(
                Check::new("dependency-injection", Architecture, Medium, Warning, SelfService)
                    .with_description("Services constructed inline instead of injected"),
            )
            .with_check(
                Check::new("async-patterns", Architecture, Medium, Warning, SelfService)
                    .with_description("Blocking calls inside async code paths"),
            )
            .with_check(
                Check::new("circular-dependency", Architecture, High, Error, TechLead)
                    .with_description("Import cycles between modules"),
            )
            // Performance
            .with_check(
                Check::new("n-plus-one-queries", Performance, High, Error, TechLead)
                    .with_description("Queries issued inside loops over query results"),
            )
            .with_check(
                Check::new("missing-database-indexes", Performance, Medium, Warning, SelfService)
                    .with_description("Filter columns without a supporting index"),
            )
            .with_check(
                Check::new("algorithm-complexity", Performance, Medium, Warning, SelfService)
                    .with_description("Nested iteration over unbounded collections"),
            )
            .with_check(
                Check::new("memory-leak", Performance, Medium, Warning, SelfService)
                    .with_description("Unbounded caches or listeners never released"),
            )
            // Testing
            .with_check(
                Check::new("new-functions-have-tests", Testing, High, Error, TechLead)
                    .with_description("New public functions without accompanying tests"),
            )
            .with_check(
                Check::new("bug-fix-regression-tests", Testing, Medium, Warning, SelfService)
                    .with_description("Bug fixes without a regression test"),
            )
            .with_check(
                Check::new("test-quality", Testing, Low, Warning, SelfService)
                    .with_description("Tests without assertions or with sleeps"),
            )
            // Breaking changes
            .with_check(
                Check::new("breaking-api-signature", BreakingChange, Critical, Error, OverrideTier::None)
                    .locked()
                    .with_description("Public function signature changed incompatibly"),
            )
            .with_check(
                Check::new("removed-public-method", BreakingChange, Critical, Error, OverrideTier::None)
                    .locked()
                    .with_description("Public method or class removed"),
            )
            .with_check(
                Check::new("changelog-required", BreakingChange, Critical, Error, TechLead)
                    .with_description("Breaking change without a CHANGELOG.md entry"),
            )
            .with_check(
                Check::new("database-schema-changes", BreakingChange, High, Error, TechLead)
                    .with_description("Schema migrations that drop or rename columns"),
            )
            // Documentation
            .with_check(
                Check::new("changelog-format", Documentation, Low, Warning, SelfService)
                    .with_description("CHANGELOG.md entries not in Keep a Changelog format"),
            )
    }

    /// Add or replace a check definition.
    pub fn with_check(mut self, check: Check) -> Self {
        self.checks.insert(check.id.clone(), check);
        self
    }

    /// Add a check definition, rejecting duplicate ids.
    pub fn register(&mut self, check: Check) -> GateResult<()> {
        if self.checks.contains_key(&check.id) {
            return Err(GateError::InvalidConfig(format!(
                "duplicate check id: {}",
                check.id
            )));
        }
        self.checks.insert(check.id.clone(), check);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&Check> {
        self.checks.get(id)
    }

    pub fn require(&self, id: &str) -> GateResult<&Check> {
        self.get(id)
            .ok_or_else(|| GateError::UnknownCheck(id.to_string()))
    }

    /// All checks in id order.
    pub fn checks(&self) -> impl Iterator<Item = &Check> {
        self.checks.values()
    }

    pub fn len(&self) -> usize {
        self.checks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.checks.is_empty()
    }

    /// Checks in the given categories (all checks when `categories` is empty).
    pub fn select(&self, categories: &[Category]) -> Vec<Check> {
        self.checks()
            .filter(|c| categories.is_empty() || categories.contains(&c.category))
            .cloned()
            .collect()
    }

    /// Parse a JSON array of check definitions.
    pub fn from_json(json: &str) -> GateResult<Self> {
        let checks: Vec<Check> = serde_json::from_str(json)
            .map_err(|e| GateError::InvalidConfig(format!("check definitions: {e}")))?;
        let mut registry = Self::new();
        for check in checks {
            registry.register(check)?;
        }
        Ok(registry)
    }

    /// Load check definitions from a JSON file.
    pub fn load(path: &Path) -> GateResult<Self> {
        let json = std::fs::read_to_string(path).map_err(|e| {
            GateError::InvalidConfig(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_json(&json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_catalogue() {
        let registry = CheckRegistry::standard();
        assert_eq!(registry.len(), 20);

        let sql = registry.get("sql-injection").unwrap();
        assert_eq!(sql.override_tier, OverrideTier::SecurityTeam);
        assert!(sql.is_blocking());

        let locked: Vec<_> = registry
            .checks()
            .filter(|c| c.cannot_override)
            .map(|c| c.id.as_str())
            .collect();
        assert_eq!(locked, vec!["breaking-api-signature", "removed-public-method"]);
    }

    #[test]
    fn test_select_by_category() {
        let registry = CheckRegistry::standard();
        let security = registry.select(&[Category::Security]);
        assert_eq!(security.len(), 4);
        assert!(security.iter().all(|c| c.category == Category::Security));
        assert_eq!(registry.select(&[]).len(), registry.len());
    }

    #[test]
    fn test_register_rejects_duplicates() {
        let mut registry = CheckRegistry::new();
        let check = Check::new(
            "memory-leak",
            Category::Performance,
            Severity::Medium,
            EnforcementMode::Warning,
            OverrideTier::SelfService,
        );
        registry.register(check.clone()).unwrap();
        let err = registry.register(check).unwrap_err();
        assert!(matches!(err, GateError::InvalidConfig(_)));
    }

    #[test]
    fn test_from_json() {
        let registry = CheckRegistry::from_json(
            r#"[{"id":"license-header","category":"documentation","severity":"low",
                 "mode":"warning","override_tier":"none","timeout_secs":30}]"#,
        )
        .unwrap();
        assert_eq!(registry.require("license-header").unwrap().timeout_secs, Some(30));
        assert!(registry.require("missing").is_err());
        assert!(CheckRegistry::from_json("{").is_err());
    }
}
