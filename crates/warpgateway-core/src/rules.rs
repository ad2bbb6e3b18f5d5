//! URL rule matching.
//!
//! A [`Rule`] pairs a pattern with a [`MatchKind`]. Regex and wildcard rules
//! are compiled once at construction, so an invalid pattern is reported as a
//! configuration error and matching itself can never fail.
//!
//! A [`RuleMatcher`] holds an ordered list of rules behind a read-write lock.
//! Matching takes the read lock; appending and clearing take the write lock,
//! which makes runtime rule changes safe while flows are being matched on
//! other worker threads.
//!
//! ## Match Semantics
//!
//! | Kind | Matches when |
//! |------|--------------|
//! | `exact` | text equals the pattern (case-sensitive) |
//! | `contains` | pattern is a substring of the text (case-sensitive) |
//! | `regex` | the regex is found anywhere in the text |
//! | `wildcard` | `*` = any sequence, `?` = any character, found anywhere in the text |

use parking_lot::RwLock;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::RuleError;

/// How a rule pattern is compared against text.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchKind {
    /// Whole-text equality.
    Exact,
    /// Substring search.
    #[default]
    Contains,
    /// Unanchored regular expression search.
    Regex,
    /// Glob-style pattern, unanchored.
    Wildcard,
}

impl MatchKind {
    /// Returns the kind name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchKind::Exact => "exact",
            MatchKind::Contains => "contains",
            MatchKind::Regex => "regex",
            MatchKind::Wildcard => "wildcard",
        }
    }

    /// Parses a kind from a string.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "exact" => Some(MatchKind::Exact),
            "contains" => Some(MatchKind::Contains),
            "regex" => Some(MatchKind::Regex),
            "wildcard" => Some(MatchKind::Wildcard),
            _ => None,
        }
    }
}

impl std::fmt::Display for MatchKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Per-kind matching state. Only the regex-backed kinds carry a compiled matcher.
#[derive(Debug, Clone)]
enum Compiled {
    Exact,
    Contains,
    Regex(Regex),
    Wildcard(Regex),
}

/// A single URL pattern with its match strategy.
#[derive(Debug, Clone)]
pub struct Rule {
    pattern: String,
    compiled: Compiled,
}

impl Rule {
    /// Creates a rule, compiling regex and wildcard patterns.
    pub fn new(pattern: impl Into<String>, kind: MatchKind) -> Result<Self, RuleError> {
        let pattern = pattern.into();
        let compiled = match kind {
            MatchKind::Exact => Compiled::Exact,
            MatchKind::Contains => Compiled::Contains,
            MatchKind::Regex => Compiled::Regex(compile(&pattern, &pattern, kind)?),
            MatchKind::Wildcard => {
                let translated = wildcard_to_regex(&pattern);
                Compiled::Wildcard(compile(&translated, &pattern, kind)?)
            }
        };

        Ok(Self { pattern, compiled })
    }

    /// Creates a substring rule. Never fails.
    pub fn contains(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            compiled: Compiled::Contains,
        }
    }

    /// Creates an exact-match rule. Never fails.
    pub fn exact(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            compiled: Compiled::Exact,
        }
    }

    /// Returns the pattern as written.
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Returns the match kind.
    pub fn kind(&self) -> MatchKind {
        match self.compiled {
            Compiled::Exact => MatchKind::Exact,
            Compiled::Contains => MatchKind::Contains,
            Compiled::Regex(_) => MatchKind::Regex,
            Compiled::Wildcard(_) => MatchKind::Wildcard,
        }
    }

    /// Returns true if the text matches this rule.
    pub fn matches(&self, text: &str) -> bool {
        match &self.compiled {
            Compiled::Exact => text == self.pattern,
            Compiled::Contains => text.contains(self.pattern.as_str()),
            Compiled::Regex(re) | Compiled::Wildcard(re) => re.is_match(text),
        }
    }
}

impl std::fmt::Display for Rule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.kind(), self.pattern)
    }
}

fn compile(source: &str, pattern: &str, kind: MatchKind) -> Result<Regex, RuleError> {
    Regex::new(source).map_err(|source| RuleError::InvalidPattern {
        pattern: pattern.to_string(),
        kind: kind.as_str(),
        source,
    })
}

/// Translates a wildcard pattern into an unanchored regex.
///
/// Only `.` is escaped; every other character is passed through.
fn wildcard_to_regex(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len() * 2);
    for c in pattern.chars() {
        match c {
            '.' => out.push_str(r"\."),
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            other => out.push(other),
        }
    }
    out
}

/// An ordered set of rules answering "does any rule match?".
#[derive(Debug, Default)]
pub struct RuleMatcher {
    rules: RwLock<Vec<Rule>>,
}

impl RuleMatcher {
    /// Creates an empty matcher.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a matcher from patterns sharing one match kind.
    pub fn from_patterns<I, S>(patterns: I, kind: MatchKind) -> Result<Self, RuleError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let matcher = Self::new();
        matcher.add_rules(patterns, kind)?;
        Ok(matcher)
    }

    /// Appends a single rule and returns a copy of it.
    pub fn add_rule(&self, pattern: impl Into<String>, kind: MatchKind) -> Result<Rule, RuleError> {
        let rule = Rule::new(pattern, kind)?;
        self.rules.write().push(rule.clone());
        Ok(rule)
    }

    /// Appends several rules of the same kind.
    ///
    /// All patterns are compiled before any is appended: on error the matcher
    /// is left unchanged. Returns the number of rules added.
    pub fn add_rules<I, S>(&self, patterns: I, kind: MatchKind) -> Result<usize, RuleError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let compiled = patterns
            .into_iter()
            .map(|p| Rule::new(p, kind))
            .collect::<Result<Vec<_>, _>>()?;

        let added = compiled.len();
        self.rules.write().extend(compiled);
        Ok(added)
    }

    /// Returns true if at least one rule matches. An empty matcher never matches.
    pub fn any_match(&self, text: &str) -> bool {
        self.rules.read().iter().any(|rule| rule.matches(text))
    }

    /// Returns the first matching rule in insertion order.
    pub fn first_match(&self, text: &str) -> Option<Rule> {
        self.rules
            .read()
            .iter()
            .find(|rule| rule.matches(text))
            .cloned()
    }

    /// Returns every matching rule in insertion order.
    pub fn all_matches(&self, text: &str) -> Vec<Rule> {
        self.rules
            .read()
            .iter()
            .filter(|rule| rule.matches(text))
            .cloned()
            .collect()
    }

    /// Removes all rules.
    pub fn clear(&self) {
        self.rules.write().clear();
    }

    /// Returns the number of rules.
    pub fn len(&self) -> usize {
        self.rules.read().len()
    }

    /// Returns true if there are no rules.
    pub fn is_empty(&self) -> bool {
        self.rules.read().is_empty()
    }

    /// Returns the patterns in insertion order.
    pub fn patterns(&self) -> Vec<String> {
        self.rules
            .read()
            .iter()
            .map(|rule| rule.pattern.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_is_case_sensitive_equality() {
        let rule = Rule::exact("https://a.test/x");
        assert!(rule.matches("https://a.test/x"));
        assert!(!rule.matches("https://a.test/x/"));
        assert!(!rule.matches("HTTPS://A.TEST/X"));
        assert!(!rule.matches(" https://a.test/x"));
    }

    #[test]
    fn contains_is_substring() {
        let rule = Rule::contains("blocked");
        assert!(rule.matches("https://api.blocked.test"));
        assert!(rule.matches("blocked"));
        assert!(!rule.matches("https://api.BLOCKED.test"));
        assert!(!rule.matches("block"));
    }

    #[test]
    fn empty_contains_matches_everything() {
        let rule = Rule::contains("");
        assert!(rule.matches(""));
        assert!(rule.matches("anything"));
    }

    #[test]
    fn regex_is_unanchored_search() {
        let rule = Rule::new(r"v\d+/chat", MatchKind::Regex).unwrap();
        assert!(rule.matches("https://api.test/v1/chat/completions"));
        assert!(!rule.matches("https://api.test/vX/chat"));
    }

    #[test]
    fn regex_anchors_still_respected() {
        let rule = Rule::new(r"^https://", MatchKind::Regex).unwrap();
        assert!(rule.matches("https://a.test"));
        assert!(!rule.matches("http://a.test/https://"));
    }

    #[test]
    fn invalid_regex_fails_at_construction() {
        let err = Rule::new("(unclosed", MatchKind::Regex).unwrap_err();
        match err {
            RuleError::InvalidPattern { pattern, kind, .. } => {
                assert_eq!(pattern, "(unclosed");
                assert_eq!(kind, "regex");
            }
        }
    }

    #[test]
    fn invalid_wildcard_fails_at_construction() {
        assert!(Rule::new("api[.test", MatchKind::Wildcard).is_err());
    }

    #[test]
    fn wildcard_translation() {
        assert_eq!(wildcard_to_regex("*.example.com"), r".*\.example\.com");
        assert_eq!(wildcard_to_regex("a?c"), "a.c");
        assert_eq!(wildcard_to_regex("plain"), "plain");
    }

    #[test]
    fn wildcard_is_unanchored() {
        let rule = Rule::new("a*b", MatchKind::Wildcard).unwrap();
        assert!(rule.matches("xaYYYbz"));
        assert!(rule.matches("ab"));
        assert!(!rule.matches("ba"));
    }

    #[test]
    fn wildcard_domain_matches_by_substring() {
        let rule = Rule::new("*.example.com", MatchKind::Wildcard).unwrap();
        assert!(rule.matches("https://api.example.com/x"));
        assert!(rule.matches("https://api.example.com.evil.net"));
        assert!(!rule.matches("https://exampleXcom"));
    }

    #[test]
    fn wildcard_question_mark_is_single_char() {
        let rule = Rule::new("v?/chat", MatchKind::Wildcard).unwrap();
        assert!(rule.matches("/v1/chat"));
        assert!(!rule.matches("/v/chat"));
    }

    #[test]
    fn rule_reports_kind_and_pattern() {
        let rule = Rule::new("*.test", MatchKind::Wildcard).unwrap();
        assert_eq!(rule.kind(), MatchKind::Wildcard);
        assert_eq!(rule.pattern(), "*.test");
        assert_eq!(rule.to_string(), "wildcard:*.test");
    }

    #[test]
    fn match_kind_parse_and_default() {
        assert_eq!(MatchKind::default(), MatchKind::Contains);
        assert_eq!(MatchKind::parse("REGEX"), Some(MatchKind::Regex));
        assert_eq!(MatchKind::parse("wildcard"), Some(MatchKind::Wildcard));
        assert_eq!(MatchKind::parse("glob"), None);
    }

    #[test]
    fn match_kind_serde_snake_case() {
        let json = serde_json::to_string(&MatchKind::Wildcard).unwrap();
        assert_eq!(json, "\"wildcard\"");
        let kind: MatchKind = serde_json::from_str("\"exact\"").unwrap();
        assert_eq!(kind, MatchKind::Exact);
    }

    #[test]
    fn empty_matcher_never_matches() {
        let matcher = RuleMatcher::new();
        assert!(!matcher.any_match(""));
        assert!(!matcher.any_match("https://anything.test"));
        assert!(matcher.all_matches("x").is_empty());
        assert!(matcher.is_empty());
    }

    #[test]
    fn any_match_over_mixed_kinds() {
        let matcher = RuleMatcher::new();
        matcher.add_rule("ads.", MatchKind::Contains).unwrap();
        matcher.add_rule(r"/track/\d+", MatchKind::Regex).unwrap();

        assert!(matcher.any_match("https://ads.test/"));
        assert!(matcher.any_match("https://x.test/track/42"));
        assert!(!matcher.any_match("https://x.test/track/abc"));
    }

    #[test]
    fn all_matches_preserves_insertion_order() {
        let matcher = RuleMatcher::new();
        matcher.add_rule("test", MatchKind::Contains).unwrap();
        matcher.add_rule("nomatch", MatchKind::Contains).unwrap();
        matcher.add_rule("*.test", MatchKind::Wildcard).unwrap();
        matcher.add_rule("api", MatchKind::Contains).unwrap();

        let patterns: Vec<_> = matcher
            .all_matches("https://api.test")
            .iter()
            .map(|r| r.pattern().to_string())
            .collect();
        assert_eq!(patterns, vec!["test", "*.test", "api"]);
    }

    #[test]
    fn first_match_returns_earliest_rule() {
        let matcher = RuleMatcher::from_patterns(["b", "a"], MatchKind::Contains).unwrap();
        assert_eq!(matcher.first_match("ab").unwrap().pattern(), "b");
        assert!(matcher.first_match("zzz").is_none());
    }

    #[test]
    fn add_rules_is_all_or_nothing() {
        let matcher = RuleMatcher::new();
        matcher.add_rule("keep", MatchKind::Regex).unwrap();

        let result = matcher.add_rules(["ok", "(bad", "also-ok"], MatchKind::Regex);
        assert!(result.is_err());
        assert_eq!(matcher.len(), 1);
        assert_eq!(matcher.patterns(), vec!["keep"]);
    }

    #[test]
    fn add_rules_returns_count() {
        let matcher = RuleMatcher::new();
        let added = matcher.add_rules(vec!["a", "b", "c"], MatchKind::Exact).unwrap();
        assert_eq!(added, 3);
        assert_eq!(matcher.len(), 3);
    }

    #[test]
    fn clear_removes_everything() {
        let matcher = RuleMatcher::from_patterns(["a", "b"], MatchKind::Contains).unwrap();
        assert!(matcher.any_match("a"));
        matcher.clear();
        assert!(matcher.is_empty());
        assert!(!matcher.any_match("a"));
    }

    #[test]
    fn concurrent_append_and_match() {
        use std::sync::Arc;

        let matcher = Arc::new(RuleMatcher::new());
        let writers: Vec<_> = (0..4)
            .map(|i| {
                let m = Arc::clone(&matcher);
                std::thread::spawn(move || {
                    for j in 0..50 {
                        m.add_rule(format!("host{}-{}", i, j), MatchKind::Contains)
                            .unwrap();
                    }
                })
            })
            .collect();
        let reader = {
            let m = Arc::clone(&matcher);
            std::thread::spawn(move || {
                for _ in 0..200 {
                    let _ = m.any_match("https://host0-0.test");
                }
            })
        };

        for w in writers {
            w.join().unwrap();
        }
        reader.join().unwrap();

        assert_eq!(matcher.len(), 200);
        assert!(matcher.any_match("https://host3-49.test"));
    }
}
