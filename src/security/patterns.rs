//! Compiled attack-signature sets shared by the validator and threat monitor.
//!
//! # Responsibilities
//! - Hold one case-insensitive `RegexSet` per threat category
//! - Answer "does this text match category X" and "which categories match"
//!
//! # Design Decisions
//! - Compiled once, shared via `Arc`, no interior state
//! - The `regex` engine is linear-time, but callers still bound input length
//!   before scanning
//! - Command signatures require shell syntax around the word (`bash -c`,
//!   `; rm`, `system(`) so prose mentioning "system" or "format" passes

use regex::{RegexSet, RegexSetBuilder};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Families of injection signatures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreatCategory {
    Xss,
    Sql,
    Path,
    Command,
}

impl ThreatCategory {
    /// Scan order; the first hit is the one reported by `first_match`.
    pub const ALL: [ThreatCategory; 4] = [
        ThreatCategory::Xss,
        ThreatCategory::Sql,
        ThreatCategory::Path,
        ThreatCategory::Command,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ThreatCategory::Xss => "xss",
            ThreatCategory::Sql => "sql",
            ThreatCategory::Path => "path",
            ThreatCategory::Command => "command",
        }
    }

    /// Human-facing rejection reason.
    pub fn rejection_reason(&self) -> &'static str {
        match self {
            ThreatCategory::Xss => "Potentially malicious content detected",
            ThreatCategory::Sql => "Potentially malicious SQL content detected",
            ThreatCategory::Path => "Path traversal attempt detected",
            ThreatCategory::Command => "Potential command injection detected",
        }
    }
}

impl fmt::Display for ThreatCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const XSS_PATTERNS: &[&str] = &[
    r"(?s)<script[^>]*>.*?</script>",
    r"<\s*script\b",
    r"javascript\s*:",
    r"\bon[a-z]+\s*=",
    r"<iframe[^>]*>",
    r"<object[^>]*>",
    r"<embed[^>]*>",
    r"<form[^>]*>",
    r"<input[^>]*>",
    r"<textarea[^>]*>",
    r"<select[^>]*>",
];

const SQL_KEYWORDS: &str = r"(union|select|insert|update|delete|drop|create|alter)";

const PATH_PATTERNS: &[&str] = &[
    r"\.\./",
    r"\.\.\\",
    r"%2e%2e%2f",
    r"%2e%2e%5c",
    r"%2e%2e/",
    r"\.\.%2f",
    r"\.\.%5c",
    r"%252e%252e%252f",
];

const COMMAND_PATTERNS: &[&str] = &[
    r"\b(bash|sh|zsh|ksh|powershell|pwsh)\b\s+-\w",
    r"\bcmd(\.exe)?\s+/[ck]\b",
    r"/bin/(ba|z|k)?sh\b",
    r"\b(eval|exec|system|passthru|popen|os\.system|subprocess\.\w+)\s*\(",
    r"(;|&&|\|\||\||`|\$\()\s*(rm|del|format|shutdown|reboot|mkfs|wget|curl|nc|cat|chmod)\b",
    r"\brm\s+-[a-z]*[rf]",
    r"\b(shutdown|reboot)\s+[-/][a-z]",
    r"\bformat\s+[a-z]:",
    r"\bdel\s+/[fqs]\b",
    r"\bmkfs(\.\w+)?\s",
];

fn sql_patterns() -> Vec<String> {
    vec![
        // keyword combined with a numeric tautology
        format!(r"\b{k}\b.*\b(or|and)\b\s+\d+\s*=\s*\d+", k = SQL_KEYWORDS),
        // quoted tautology: ' OR '1'='1
        r"'\s*\b(or|and)\b\s+'?\w+'?\s*=\s*'?\w+".to_string(),
        // keyword repeated across sub-clauses
        format!(r"\b{k}\b.*\b{k}\b", k = SQL_KEYWORDS),
        // stacked statement
        r";\s*\b(drop|delete|insert|update|alter|create|truncate|exec)\b".to_string(),
        // comment-terminated literal: admin'--
        r"'\s*(--|#|/\*)".to_string(),
    ]
}

fn build_set<I, S>(patterns: I) -> Result<RegexSet, regex::Error>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    RegexSetBuilder::new(patterns).case_insensitive(true).build()
}

/// Compiled signature sets, one per category.
#[derive(Debug, Clone)]
pub struct PatternMatcher {
    xss: RegexSet,
    sql: RegexSet,
    path: RegexSet,
    command: RegexSet,
}

impl PatternMatcher {
    /// Compile the built-in signature sets.
    pub fn new() -> Self {
        Self::try_new().expect("built-in signature patterns must compile")
    }

    pub fn try_new() -> Result<Self, regex::Error> {
        Ok(Self {
            xss: build_set(XSS_PATTERNS)?,
            sql: build_set(sql_patterns())?,
            path: build_set(PATH_PATTERNS)?,
            command: build_set(COMMAND_PATTERNS)?,
        })
    }

    fn set(&self, category: ThreatCategory) -> &RegexSet {
        match category {
            ThreatCategory::Xss => &self.xss,
            ThreatCategory::Sql => &self.sql,
            ThreatCategory::Path => &self.path,
            ThreatCategory::Command => &self.command,
        }
    }

    pub fn matches(&self, text: &str, category: ThreatCategory) -> bool {
        self.set(category).is_match(text)
    }

    /// Every category with at least one matching signature.
    pub fn matches_any(&self, text: &str) -> BTreeSet<ThreatCategory> {
        ThreatCategory::ALL
            .into_iter()
            .filter(|c| self.matches(text, *c))
            .collect()
    }

    /// First matching category in scan order.
    pub fn first_match(&self, text: &str) -> Option<ThreatCategory> {
        ThreatCategory::ALL
            .into_iter()
            .find(|c| self.matches(text, *c))
    }
}

impl Default for PatternMatcher {
    fn default() -> Self {
        Self::new()
    }
}
