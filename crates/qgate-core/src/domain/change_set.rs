//! Change-set identity.

use serde::{Deserialize, Serialize};

/// One reviewable revision of a change set (e.g. a pull request at a
/// specific head commit). Displays and parses as `id@revision`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ChangeSetId {
    pub id: String,
    pub revision: String,
}

impl ChangeSetId {
    pub fn new(id: impl Into<String>, revision: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            revision: revision.into(),
        }
    }

    /// Same change set, different revision.
    pub fn at_revision(&self, revision: impl Into<String>) -> Self {
        Self::new(self.id.clone(), revision)
    }
}

impl std::fmt::Display for ChangeSetId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.id, self.revision)
    }
}

impl std::str::FromStr for ChangeSetId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.rsplit_once('@') {
            Some((id, rev)) if !id.is_empty() && !rev.is_empty() => Ok(Self::new(id, rev)),
            _ => Err(format!("expected <id>@<revision>, got {s:?}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_parse() {
        let cs = ChangeSetId::new("pr-17", "9f1c2e");
        assert_eq!(cs.to_string(), "pr-17@9f1c2e");
        assert_eq!("pr-17@9f1c2e".parse::<ChangeSetId>().unwrap(), cs);
    }

    #[test]
    fn test_parse_rejects_missing_revision() {
        assert!("pr-17".parse::<ChangeSetId>().is_err());
        assert!("pr-17@".parse::<ChangeSetId>().is_err());
        assert!("@abc".parse::<ChangeSetId>().is_err());
    }
}
