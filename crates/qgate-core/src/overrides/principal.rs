//! Principal directory: who holds which override tier.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::domain::OverrideTier;
use crate::error::{GateError, GateResult};

/// Authority held by one principal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grant {
    pub tier: OverrideTier,
    /// May approve emergency overrides.
    #[serde(default)]
    pub incident_responder: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub id: String,
    pub tier: OverrideTier,
    pub incident_responder: bool,
}

/// Maps principal ids to grants. Unknown principals get `default_tier`.
///
/// JSON form: `{"alice": {"tier": "security-team", "incident_responder": true}}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrincipalDirectory {
    grants: HashMap<String, Grant>,
    default_tier: OverrideTier,
}

impl Default for PrincipalDirectory {
    fn default() -> Self {
        Self::new(OverrideTier::SelfService)
    }
}

impl PrincipalDirectory {
    pub fn new(default_tier: OverrideTier) -> Self {
        Self {
            grants: HashMap::new(),
            default_tier,
        }
    }

    pub fn with_principal(
        mut self,
        id: impl Into<String>,
        tier: OverrideTier,
        incident_responder: bool,
    ) -> Self {
        self.grants.insert(
            id.into(),
            Grant {
                tier,
                incident_responder,
            },
        );
        self
    }

    pub fn resolve(&self, id: &str) -> Principal {
        let grant = self.grants.get(id).copied().unwrap_or(Grant {
            tier: self.default_tier,
            incident_responder: false,
        });
        Principal {
            id: id.to_string(),
            tier: grant.tier,
            incident_responder: grant.incident_responder,
        }
    }

    pub fn from_json(json: &str, default_tier: OverrideTier) -> GateResult<Self> {
        let grants: HashMap<String, Grant> = serde_json::from_str(json)
            .map_err(|e| GateError::InvalidConfig(format!("principals: {e}")))?;
        Ok(Self {
            grants,
            default_tier,
        })
    }

    /// Load the directory from `path`; a missing file yields an empty
    /// directory.
    pub fn load(path: &Path, default_tier: OverrideTier) -> GateResult<Self> {
        match std::fs::read_to_string(path) {
            Ok(json) => Self::from_json(&json, default_tier),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::new(default_tier)),
            Err(e) => Err(GateError::InvalidConfig(format!(
                "cannot read {}: {e}",
                path.display()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_principal_gets_default() {
        let dir = PrincipalDirectory::default().with_principal("sam", OverrideTier::TechLead, false);
        assert_eq!(dir.resolve("sam").tier, OverrideTier::TechLead);
        let anon = dir.resolve("newcomer");
        assert_eq!(anon.tier, OverrideTier::SelfService);
        assert!(!anon.incident_responder);
    }

    #[test]
    fn test_from_json() {
        let dir = PrincipalDirectory::from_json(
            r#"{"rio": {"tier": "security-team", "incident_responder": true},
                "kai": {"tier": "tech-lead"}}"#,
            OverrideTier::None,
        )
        .unwrap();
        assert!(dir.resolve("rio").incident_responder);
        assert!(!dir.resolve("kai").incident_responder);
        assert_eq!(dir.resolve("zed").tier, OverrideTier::None);
        assert!(PrincipalDirectory::from_json("[]", OverrideTier::None).is_err());
    }
}
