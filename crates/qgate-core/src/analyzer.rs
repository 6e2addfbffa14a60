//! Check plug-in seams.
//!
//! The engine never inspects how a check analyzes code. A check is a
//! [`CheckPlugin`]: a declarative [`Check`] paired with an [`Analyzer`] that
//! reads the change set through a [`ChangeSetSource`] and returns an
//! [`Analysis`].

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::{ChangeSetId, Check, CheckStatus, Finding};

// ---------------------------------------------------------------------------
// Change-set provider
// ---------------------------------------------------------------------------

/// Content accessor for one change-set revision.
#[async_trait]
pub trait ChangeSetSource: Send + Sync {
    fn id(&self) -> &ChangeSetId;

    /// Paths touched by the change set, `/`-separated and relative.
    async fn changed_files(&self) -> anyhow::Result<Vec<String>>;

    /// Contents of `path`, or `None` when the file is not UTF-8 text.
    async fn read_file(&self, path: &str) -> anyhow::Result<Option<String>>;
}

/// Change set held entirely in memory.
#[derive(Debug, Clone)]
pub struct InMemoryChangeSet {
    id: ChangeSetId,
    files: BTreeMap<String, String>,
}

impl InMemoryChangeSet {
    pub fn new(id: ChangeSetId) -> Self {
        Self {
            id,
            files: BTreeMap::new(),
        }
    }

    pub fn with_file(mut self, path: impl Into<String>, content: impl Into<String>) -> Self {
        self.files.insert(path.into(), content.into());
        self
    }
}

#[async_trait]
impl ChangeSetSource for InMemoryChangeSet {
    fn id(&self) -> &ChangeSetId {
        &self.id
    }

    async fn changed_files(&self) -> anyhow::Result<Vec<String>> {
        Ok(self.files.keys().cloned().collect())
    }

    async fn read_file(&self, path: &str) -> anyhow::Result<Option<String>> {
        self.files
            .get(path)
            .cloned()
            .map(Some)
            .with_context(|| format!("{path} is not part of {}", self.id))
    }
}

/// Change set backed by a directory on disk; every file under the root
/// counts as changed.
#[derive(Debug, Clone)]
pub struct FsChangeSet {
    id: ChangeSetId,
    root: PathBuf,
    files: Vec<String>,
}

const SKIPPED_DIRS: &[&str] = &["target", "node_modules"];

impl FsChangeSet {
    /// Walk `root` and snapshot its file list. Hidden entries and build
    /// output directories are skipped.
    pub async fn scan(id: ChangeSetId, root: impl AsRef<Path>) -> anyhow::Result<Self> {
        let root = root.as_ref().to_path_buf();
        let mut files = Vec::new();
        let mut pending = vec![root.clone()];

        while let Some(dir) = pending.pop() {
            let mut entries = tokio::fs::read_dir(&dir)
                .await
                .with_context(|| format!("failed to read directory {}", dir.display()))?;
            while let Some(entry) = entries.next_entry().await? {
                let name = entry.file_name().to_string_lossy().into_owned();
                if name.starts_with('.') || SKIPPED_DIRS.contains(&name.as_str()) {
                    continue;
                }
                let path = entry.path();
                if entry.file_type().await?.is_dir() {
                    pending.push(path);
                } else if let Ok(rel) = path.strip_prefix(&root) {
                    let rel: Vec<_> = rel
                        .components()
                        .map(|c| c.as_os_str().to_string_lossy().into_owned())
                        .collect();
                    files.push(rel.join("/"));
                }
            }
        }
        files.sort();

        Ok(Self { id, root, files })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl ChangeSetSource for FsChangeSet {
    fn id(&self) -> &ChangeSetId {
        &self.id
    }

    async fn changed_files(&self) -> anyhow::Result<Vec<String>> {
        Ok(self.files.clone())
    }

    async fn read_file(&self, path: &str) -> anyhow::Result<Option<String>> {
        let full = self.root.join(path);
        let bytes = tokio::fs::read(&full)
            .await
            .with_context(|| format!("failed to read {}", full.display()))?;
        match String::from_utf8(bytes) {
            Ok(text) => Ok(Some(text)),
            Err(_) => {
                debug!(path, "skipping non-text file");
                Ok(None)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Analyzer
// ---------------------------------------------------------------------------

/// What an analyzer reports back: a status and ordered findings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Analysis {
    pub status: CheckStatus,
    pub findings: Vec<Finding>,
}

impl Analysis {
    pub fn pass() -> Self {
        Self {
            status: CheckStatus::Pass,
            findings: Vec::new(),
        }
    }

    pub fn fail(findings: Vec<Finding>) -> Self {
        Self {
            status: CheckStatus::Fail,
            findings,
        }
    }

    /// Fail when there is at least one finding.
    pub fn from_findings(findings: Vec<Finding>) -> Self {
        if findings.is_empty() {
            Self::pass()
        } else {
            Self::fail(findings)
        }
    }
}

/// Analysis function of one check. Errors are recorded by the runner as
/// conservative failures.
#[async_trait]
pub trait Analyzer: Send + Sync {
    async fn analyze(&self, change_set: Arc<dyn ChangeSetSource>) -> anyhow::Result<Analysis>;
}

/// Analyzer that always reports the same outcome.
#[derive(Debug, Clone)]
pub struct FixedAnalyzer(pub Analysis);

#[async_trait]
impl Analyzer for FixedAnalyzer {
    async fn analyze(&self, _change_set: Arc<dyn ChangeSetSource>) -> anyhow::Result<Analysis> {
        Ok(self.0.clone())
    }
}

/// A registered check together with its analysis function.
#[derive(Clone)]
pub struct CheckPlugin {
    pub check: Check,
    pub analyzer: Arc<dyn Analyzer>,
}

impl CheckPlugin {
    pub fn new(check: Check, analyzer: Arc<dyn Analyzer>) -> Self {
        Self { check, analyzer }
    }

    /// Plug-in whose analysis always returns `analysis`.
    pub fn fixed(check: Check, analysis: Analysis) -> Self {
        Self::new(check, Arc::new(FixedAnalyzer(analysis)))
    }
}

impl std::fmt::Debug for CheckPlugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckPlugin")
            .field("check", &self.check.id)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fs_change_set_skips_hidden_and_build_dirs() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src/db")).unwrap();
        std::fs::create_dir_all(dir.path().join(".git")).unwrap();
        std::fs::create_dir_all(dir.path().join("target/debug")).unwrap();
        std::fs::write(dir.path().join("src/db/query.rs"), "fn q() {}").unwrap();
        std::fs::write(dir.path().join("CHANGELOG.md"), "# Changelog").unwrap();
        std::fs::write(dir.path().join(".git/HEAD"), "ref").unwrap();
        std::fs::write(dir.path().join("target/debug/out"), "bin").unwrap();

        let cs = FsChangeSet::scan(ChangeSetId::new("local", "wt"), dir.path())
            .await
            .unwrap();
        assert_eq!(
            cs.changed_files().await.unwrap(),
            vec!["CHANGELOG.md".to_string(), "src/db/query.rs".to_string()]
        );
        assert_eq!(
            cs.read_file("src/db/query.rs").await.unwrap().as_deref(),
            Some("fn q() {}")
        );
    }

    #[tokio::test]
    async fn test_in_memory_missing_file_errors() {
        let cs = InMemoryChangeSet::new(ChangeSetId::new("pr-1", "a")).with_file("a.py", "x = 1");
        assert!(cs.read_file("b.py").await.is_err());
    }

    #[test]
    fn test_analysis_from_findings() {
        assert_eq!(Analysis::from_findings(vec![]).status, CheckStatus::Pass);
        assert_eq!(
            Analysis::from_findings(vec![Finding::new("x")]).status,
            CheckStatus::Fail
        );
    }
}
