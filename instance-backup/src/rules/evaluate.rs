//! Rule set evaluation.
//!
//! Allow rules: scanned in file order, the first positive match allows and
//! stops the scan; a negated match denies unless a later positive rule matches.
//! Ignore rules: the first matching rule decides.

use super::RuleSet;

/// Outcome of evaluating the allow rules for one path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllowVerdict {
    Allow,
    Deny,
    NoMatch,
}

/// Evaluate allow rules. An empty set allows everything.
pub fn evaluate_allow(relative_path: &str, rules: &RuleSet) -> AllowVerdict {
    if rules.is_empty() {
        return AllowVerdict::Allow;
    }

    let mut verdict = AllowVerdict::NoMatch;
    for rule in rules.iter().filter(|rule| rule.matches(relative_path)) {
        if !rule.is_negated() {
            return AllowVerdict::Allow;
        }
        verdict = AllowVerdict::Deny;
    }
    verdict
}

/// Evaluate ignore rules. Returns `true` when the path is kept.
pub fn evaluate_ignore(relative_path: &str, rules: &RuleSet) -> bool {
    for rule in rules.iter() {
        if rule.matches(relative_path) {
            return rule.is_negated();
        }
    }
    true
}
