//! Gitignore-style pattern matching against instance-relative paths.
//!
//! Paths handed to [`PatternMatcher::matches`] are relative to the instance
//! root and use `/` as separator. Glob rules: `*` stays within one segment,
//! `**` crosses segments, `?` and `[...]` classes behave as in a shell, matching
//! is case-sensitive and dot-prefixed names are matched by wildcards.

use globset::{GlobBuilder, GlobMatcher};
use tracing::warn;

/// A single compiled pattern.
#[derive(Debug, Clone)]
pub struct PatternMatcher {
    pattern: String,
    /// Leading `/`: compare against `/<path>`
    anchored: bool,
    /// Trailing `/`: the directory prefix the pattern names
    directory: Option<String>,
    candidates: Vec<GlobMatcher>,
    /// Set for bare patterns (no `/`), matched against the last path segment
    basename: Option<GlobMatcher>,
}

impl PatternMatcher {
    /// Compile `pattern`. Parts that fail to compile never match.
    pub fn new(pattern: &str) -> Self {
        let anchored = pattern.starts_with('/');
        let mut candidates = Vec::new();
        let mut directory = None;
        let mut basename = None;

        if pattern.is_empty() {
            return Self {
                pattern: String::new(),
                anchored,
                directory,
                candidates,
                basename,
            };
        }

        if let Some(dir) = pattern.strip_suffix('/') {
            candidates.extend(compile(dir));
            candidates.extend(compile(&format!("{}/**", dir)));
            directory = Some(dir.to_string());
        } else {
            candidates.extend(compile(pattern));
            if pattern.ends_with("/*") && !pattern.ends_with("/**") {
                let widened = format!("{}*", pattern);
                candidates.extend(compile(&widened));
            }
            if !pattern.contains('/') {
                basename = compile(pattern);
            }
        }

        Self {
            pattern: pattern.to_string(),
            anchored,
            directory,
            candidates,
            basename,
        }
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Does this pattern select `relative_path`?
    pub fn matches(&self, relative_path: &str) -> bool {
        if self.pattern.is_empty() {
            return false;
        }

        let anchored_path;
        let target = if self.anchored {
            anchored_path = format!("/{}", relative_path);
            anchored_path.as_str()
        } else {
            relative_path
        };

        if let Some(dir) = &self.directory {
            if target.len() > dir.len()
                && target.starts_with(dir.as_str())
                && target.as_bytes()[dir.len()] == b'/'
            {
                return true;
            }
        }

        if self.candidates.iter().any(|glob| glob.is_match(target)) {
            return true;
        }

        match &self.basename {
            Some(glob) => {
                let name = relative_path.rsplit('/').next().unwrap_or(relative_path);
                glob.is_match(name)
            }
            None => false,
        }
    }
}

/// One-shot form of [`PatternMatcher::matches`].
pub fn matches(pattern: &str, relative_path: &str) -> bool {
    PatternMatcher::new(pattern).matches(relative_path)
}

fn compile(glob: &str) -> Option<GlobMatcher> {
    match GlobBuilder::new(glob)
        .literal_separator(true)
        .case_insensitive(false)
        .backslash_escape(true)
        .build()
    {
        Ok(compiled) => Some(compiled.compile_matcher()),
        Err(e) => {
            warn!(pattern = %glob, error = %e, "Ignoring invalid backup rule pattern");
            None
        }
    }
}
