//! Built-in pattern analyzers.
//!
//! A small line-oriented regex set covering the checks that can be decided
//! from file contents alone, so `qgate run` can gate a working tree without
//! external plug-ins.

use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use regex::Regex;

use crate::analyzer::{Analysis, Analyzer, ChangeSetSource, CheckPlugin};
use crate::domain::Finding;
use crate::registry::CheckRegistry;

type PatternTable = Vec<(Regex, &'static str)>;

fn compile(patterns: &[(&str, &'static str)]) -> PatternTable {
    patterns
        .iter()
        .map(|(p, label)| (Regex::new(p).expect("Invalid regex pattern"), *label))
        .collect()
}

fn credential_patterns() -> &'static PatternTable {
    static TABLE: OnceLock<PatternTable> = OnceLock::new();
    TABLE.get_or_init(|| {
        compile(&[
            (r#"(?i)api[_-]?key\s*[=:]\s*["'][^"']+["']"#, "API key"),
            (r#"(?i)aws[_-]?access[_-]?key[_-]?id\s*[=:]\s*["'][^"']+["']"#, "AWS access key"),
            (r#"(?i)aws[_-]?secret[_-]?access[_-]?key\s*[=:]\s*["'][^"']+["']"#, "AWS secret key"),
            (r#"(?i)(password|passwd|pwd)\s*[=:]\s*["'][^"']+["']"#, "password"),
            (r#"(?i)(auth[_-]?)?token\s*[=:]\s*["'][^"']+["']"#, "token"),
            (r#"(?i)bearer\s*[=:]\s*["'][^"']+["']"#, "bearer token"),
            (r"-----BEGIN (RSA|DSA|EC|OPENSSH) PRIVATE KEY-----", "private key"),
            (r#"(?i)database[_-]?url\s*[=:]\s*["'].*:[^@]+@.*["']"#, "database connection string"),
            (r#"(?i)(client|jwt)[_-]?secret\s*[=:]\s*["'][^"']+["']"#, "client secret"),
        ])
    })
}

fn placeholder_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)(test[_-]?|example|sample|demo|fake|mock|placeholder|xxx+|<[^>]+>)")
            .expect("Invalid regex pattern")
    })
}

fn sql_patterns() -> &'static PatternTable {
    static TABLE: OnceLock<PatternTable> = OnceLock::new();
    TABLE.get_or_init(|| {
        compile(&[
            (r#"(?i)execute\s*\(\s*["'].*\{\}.*["'].*\.format"#, "string formatting in SQL query"),
            (r#"(?i)execute\s*\(\s*f["'].*\{.*\}.*["']"#, "f-string in SQL query"),
            (r#"(?i)execute\s*\(\s*["'].*%s.*["'].*%\s*[^(]"#, "old-style formatting in SQL query"),
            (r#"(?i)raw\s*\(\s*f["']"#, "f-string in raw SQL"),
            (r#"(?i)format!\s*\(\s*"\s*(SELECT|INSERT|UPDATE|DELETE)\b"#, "format! building SQL"),
            (r#"(?i)"\s*(SELECT|INSERT|UPDATE|DELETE)\b[^"]*"\s*\+\s*\w+"#, "string concatenation in SQL"),
        ])
    })
}

fn is_comment(line: &str) -> bool {
    let t = line.trim_start();
    t.starts_with('#') || t.starts_with("//")
}

async fn scan_lines<F>(
    change_set: &dyn ChangeSetSource,
    mut on_line: F,
) -> anyhow::Result<Vec<Finding>>
where
    F: FnMut(&str, u32, &str) -> Option<Finding>,
{
    let mut findings = Vec::new();
    for path in change_set.changed_files().await? {
        let Some(content) = change_set.read_file(&path).await? else {
            continue;
        };
        for (idx, line) in content.lines().enumerate() {
            if let Some(f) = on_line(&path, idx as u32 + 1, line) {
                findings.push(f);
            }
        }
    }
    Ok(findings)
}

/// Detects credentials committed in source. Placeholder-looking values
/// (`example`, `<token>`, `xxxx`) and comment lines are ignored.
#[derive(Debug, Default, Clone)]
pub struct CredentialAnalyzer;

#[async_trait]
impl Analyzer for CredentialAnalyzer {
    async fn analyze(&self, change_set: Arc<dyn ChangeSetSource>) -> anyhow::Result<Analysis> {
        let findings = scan_lines(change_set.as_ref(), |path, line_no, line| {
            if is_comment(line) {
                return None;
            }
            credential_patterns().iter().find_map(|(re, label)| {
                let m = re.find(line)?;
                if placeholder_pattern().is_match(m.as_str()) {
                    return None;
                }
                Some(Finding::at(
                    path,
                    line_no,
                    format!("hardcoded {label} detected; load it from the environment or a secret store"),
                ))
            })
        })
        .await?;
        Ok(Analysis::from_findings(findings))
    }
}

/// Detects SQL assembled by string formatting or concatenation.
#[derive(Debug, Default, Clone)]
pub struct SqlInterpolationAnalyzer;

#[async_trait]
impl Analyzer for SqlInterpolationAnalyzer {
    async fn analyze(&self, change_set: Arc<dyn ChangeSetSource>) -> anyhow::Result<Analysis> {
        let findings = scan_lines(change_set.as_ref(), |path, line_no, line| {
            sql_patterns()
                .iter()
                .find(|(re, _)| re.is_match(line))
                .map(|(_, label)| {
                    Finding::at(
                        path,
                        line_no,
                        format!("potential SQL injection: {label}; use parameterized queries"),
                    )
                })
        })
        .await?;
        Ok(Analysis::from_findings(findings))
    }
}

/// Requires a `CHANGELOG.md` among the changed files whenever source
/// files change.
#[derive(Debug, Default, Clone)]
pub struct ChangelogAnalyzer;

const DOC_EXTENSIONS: &[&str] = &[".md", ".txt", ".rst"];

#[async_trait]
impl Analyzer for ChangelogAnalyzer {
    async fn analyze(&self, change_set: Arc<dyn ChangeSetSource>) -> anyhow::Result<Analysis> {
        let files = change_set.changed_files().await?;
        let has_changelog = files
            .iter()
            .any(|p| p.rsplit('/').next() == Some("CHANGELOG.md"));
        let touches_source = files
            .iter()
            .any(|p| !DOC_EXTENSIONS.iter().any(|ext| p.ends_with(ext)));

        if touches_source && !has_changelog {
            return Ok(Analysis::fail(vec![Finding::new(
                "source changes without a CHANGELOG.md update",
            )]));
        }
        Ok(Analysis::pass())
    }
}

/// Plug-ins for every built-in analyzer whose check is in `registry`.
pub fn builtin_plugins(registry: &CheckRegistry) -> Vec<CheckPlugin> {
    let analyzers: [(&str, Arc<dyn Analyzer>); 3] = [
        ("hardcoded-credentials", Arc::new(CredentialAnalyzer)),
        ("sql-injection", Arc::new(SqlInterpolationAnalyzer)),
        ("changelog-required", Arc::new(ChangelogAnalyzer)),
    ];
    analyzers
        .into_iter()
        .filter_map(|(id, analyzer)| {
            registry
                .get(id)
                .map(|check| CheckPlugin::new(check.clone(), analyzer))
        })
        .collect()
}
