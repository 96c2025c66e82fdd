//! Backup allow/ignore rules.
//!
//! Rules come from two optional files in the instance metadata directory:
//! `.backupallow` and `.backupignore`. One rule per line, `#` comments and
//! blank lines are skipped, a leading `!` negates the rule. Order matters, so
//! rule sets are kept as ordered sequences.

pub mod evaluate;
pub mod pattern;

pub use evaluate::{evaluate_allow, evaluate_ignore, AllowVerdict};
pub use pattern::PatternMatcher;

use crate::instance::METADATA_DIR;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Rule file names inside the metadata directory
pub const ALLOW_RULES_FILE: &str = ".backupallow";
pub const IGNORE_RULES_FILE: &str = ".backupignore";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleKind {
    Allow,
    Ignore,
}

impl RuleKind {
    pub fn file_name(self) -> &'static str {
        match self {
            RuleKind::Allow => ALLOW_RULES_FILE,
            RuleKind::Ignore => IGNORE_RULES_FILE,
        }
    }
}

/// One parsed rule line.
#[derive(Debug, Clone)]
pub struct Rule {
    negated: bool,
    matcher: PatternMatcher,
}

impl Rule {
    /// Parse a raw line. Returns `None` for blank lines, comments and a bare `!`.
    pub fn parse(line: &str) -> Option<Self> {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            return None;
        }

        let (negated, pattern) = match trimmed.strip_prefix('!') {
            Some(rest) => (true, rest),
            None => (false, trimmed),
        };
        if pattern.is_empty() {
            return None;
        }

        Some(Self {
            negated,
            matcher: PatternMatcher::new(pattern),
        })
    }

    pub fn pattern(&self) -> &str {
        self.matcher.pattern()
    }

    pub fn is_negated(&self) -> bool {
        self.negated
    }

    pub fn matches(&self, relative_path: &str) -> bool {
        self.matcher.matches(relative_path)
    }
}

/// Ordered rules from one file.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: Vec<Rule>,
}

impl RuleSet {
    pub fn parse(content: &str) -> Self {
        Self {
            rules: content.lines().filter_map(Rule::parse).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Rule> {
        self.rules.iter()
    }
}

impl<S: AsRef<str>> FromIterator<S> for RuleSet {
    fn from_iter<I: IntoIterator<Item = S>>(lines: I) -> Self {
        Self {
            rules: lines
                .into_iter()
                .filter_map(|line| Rule::parse(line.as_ref()))
                .collect(),
        }
    }
}

/// Both rule sets of an instance.
#[derive(Debug, Clone, Default)]
pub struct BackupRules {
    pub allow: RuleSet,
    pub ignore: RuleSet,
}

impl BackupRules {
    /// Load `.backupallow` and `.backupignore` for the instance rooted at `instance_root`.
    pub async fn load(instance_root: &Path) -> Self {
        let allow = load_rules(instance_root, RuleKind::Allow).await;
        let ignore = load_rules(instance_root, RuleKind::Ignore).await;
        debug!(
            allow = allow.len(),
            ignore = ignore.len(),
            "Loaded backup rules for {}",
            instance_root.display()
        );
        Self { allow, ignore }
    }
}

pub fn rules_path(instance_root: &Path, kind: RuleKind) -> PathBuf {
    instance_root.join(METADATA_DIR).join(kind.file_name())
}

/// Read one rules file. A missing or unreadable file yields an empty set.
pub async fn load_rules(instance_root: &Path, kind: RuleKind) -> RuleSet {
    let path = rules_path(instance_root, kind);
    match tokio::fs::read_to_string(&path).await {
        Ok(content) => RuleSet::parse(&content),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => RuleSet::default(),
        Err(e) => {
            warn!("Failed to read backup rules {}: {}", path.display(), e);
            RuleSet::default()
        }
    }
}
