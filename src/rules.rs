// src/rules.rs

//! Ordered prefix-replacement rules for path strings
//!
//! A rule set is an ordered list of `(prefix, replacement)` pairs. A
//! candidate string matches a rule when its leading path components equal
//! the prefix's components; the first matching rule wins and more specific
//! prefixes must therefore be listed before shorter ones. Both `/` and `\`
//! delimit components on every host, since migrated data routinely carries
//! the other platform's separators. The rewritten string is rendered with
//! the rule set's configured separator.
//!
//! Rules mapping a prefix to itself are valid and useful: they mark
//! placeholder tokens such as `%MetadataPath%` as known, so the value is
//! separator-normalized instead of being reported as unresolved.

use serde::Deserialize;
use std::fmt;

/// Separator used when rendering rewritten paths
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub enum SlashStyle {
    /// Forward slash (`/`)
    #[default]
    #[serde(rename = "/")]
    Forward,
    /// Backslash (`\`)
    #[serde(rename = "\\")]
    Back,
}

impl SlashStyle {
    #[inline]
    pub const fn as_char(&self) -> char {
        match self {
            Self::Forward => '/',
            Self::Back => '\\',
        }
    }
}

impl fmt::Display for SlashStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_char())
    }
}

/// One ordered `(prefix, replacement)` pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplacementRule {
    /// Leading components a candidate must start with
    pub prefix: String,
    /// Components substituted for the matched prefix
    pub replacement: String,
}

impl ReplacementRule {
    pub fn new(prefix: impl Into<String>, replacement: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            replacement: replacement.into(),
        }
    }
}

/// An ordered, immutable set of replacement rules plus rendering flags
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    /// Rules in priority order; the first match wins
    pub rules: Vec<ReplacementRule>,
    /// Separator used for rewritten output
    pub slash: SlashStyle,
    /// Compare components ASCII-case-insensitively
    pub case_insensitive: bool,
    /// Do not report values this set fails to resolve
    pub suppress_unresolved: bool,
}

/// A path string split into leading separators and non-empty components
struct SplitPath<'a> {
    leading: usize,
    comps: Vec<&'a str>,
}

fn split_path(s: &str) -> SplitPath<'_> {
    let leading = s.chars().take_while(|c| *c == '/' || *c == '\\').count();
    let comps = s
        .split(['/', '\\'])
        .filter(|c| !c.is_empty())
        .collect::<Vec<_>>();
    SplitPath { leading, comps }
}

fn render(leading: usize, comps: &[&str], slash: char) -> String {
    let mut out = String::with_capacity(leading + comps.iter().map(|c| c.len() + 1).sum::<usize>());
    for _ in 0..leading {
        out.push(slash);
    }
    let mut first = true;
    for comp in comps {
        if !first {
            out.push(slash);
        }
        out.push_str(comp);
        first = false;
    }
    out
}

impl RuleSet {
    pub fn new(rules: Vec<ReplacementRule>) -> Self {
        Self {
            rules,
            ..Self::default()
        }
    }

    fn comps_eq(&self, a: &str, b: &str) -> bool {
        if self.case_insensitive {
            a.eq_ignore_ascii_case(b)
        } else {
            a == b
        }
    }

    /// Rewrite `candidate` through the first matching rule
    ///
    /// Returns `None` when no rule matches; the caller decides whether that
    /// is worth a diagnostic (see `PathDetector`) and keeps the original
    /// value either way.
    pub fn apply(&self, candidate: &str) -> Option<String> {
        if candidate.is_empty() {
            return None;
        }
        let cand = split_path(candidate);
        for rule in &self.rules {
            let prefix = split_path(&rule.prefix);
            if (prefix.leading > 0) != (cand.leading > 0) {
                continue;
            }
            if cand.comps.len() < prefix.comps.len() {
                continue;
            }
            let matches = prefix
                .comps
                .iter()
                .zip(&cand.comps)
                .all(|(p, c)| self.comps_eq(p, c));
            if !matches {
                continue;
            }
            let rep = split_path(&rule.replacement);
            let mut comps = rep.comps;
            comps.extend_from_slice(&cand.comps[prefix.comps.len()..]);
            return Some(render(rep.leading, &comps, self.slash.as_char()));
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(pairs: &[(&str, &str)]) -> RuleSet {
        RuleSet::new(
            pairs
                .iter()
                .map(|(p, r)| ReplacementRule::new(*p, *r))
                .collect(),
        )
    }

    #[test]
    fn test_first_match_wins() {
        let rules = set(&[("A/B", "X"), ("A", "Y")]);
        assert_eq!(rules.apply("A/B/c").unwrap(), "X/c");
        assert_eq!(rules.apply("A/d").unwrap(), "Y/d");
    }

    #[test]
    fn test_order_is_load_bearing() {
        let rules = set(&[("A", "Y"), ("A/B", "X")]);
        // The general rule shadows the specific one when listed first.
        assert_eq!(rules.apply("A/B/c").unwrap(), "Y/B/c");
    }

    #[test]
    fn test_mixed_separators_match() {
        let rules = set(&[("F:/Filme", "/data/movies")]);
        assert_eq!(
            rules.apply("F:\\Filme\\Abc (2010)\\movie.mkv").unwrap(),
            "/data/movies/Abc (2010)/movie.mkv"
        );
        assert_eq!(
            rules.apply("F:/Filme/Abc (2010)/movie.mkv").unwrap(),
            "/data/movies/Abc (2010)/movie.mkv"
        );
    }

    #[test]
    fn test_backslash_rendering() {
        let mut rules = set(&[("/data/movies", "Y:/Filme")]);
        rules.slash = SlashStyle::Back;
        assert_eq!(rules.apply("/data/movies/a/b.mkv").unwrap(), "Y:\\Filme\\a\\b.mkv");
    }

    #[test]
    fn test_exact_prefix_match() {
        let rules = set(&[("/etc/jellyfin", "/config")]);
        assert_eq!(rules.apply("/etc/jellyfin").unwrap(), "/config");
    }

    #[test]
    fn test_replacement_is_root() {
        let rules = set(&[("/config", "/")]);
        assert_eq!(rules.apply("/config/data/library.db").unwrap(), "/data/library.db");
        assert_eq!(rules.apply("/config").unwrap(), "/");
    }

    #[test]
    fn test_identity_rule_normalizes() {
        let rules = set(&[("%MetadataPath%", "%MetadataPath%")]);
        assert_eq!(
            rules.apply("%MetadataPath%\\library\\ab\\poster.jpg").unwrap(),
            "%MetadataPath%/library/ab/poster.jpg"
        );
    }

    #[test]
    fn test_rootedness_must_agree() {
        let rules = set(&[("/usr", "/opt")]);
        assert_eq!(rules.apply("usr/lib/ffmpeg"), None);
    }

    #[test]
    fn test_unmatched_returns_none() {
        let rules = set(&[("/data", "/srv")]);
        assert_eq!(rules.apply("C:\\Weird\\NoRuleHere\\file.dat"), None);
        assert_eq!(rules.apply(""), None);
    }

    #[test]
    fn test_already_migrated_is_untouched() {
        let rules = set(&[("/old", "/new")]);
        let once = rules.apply("/old/movies/a.mkv").unwrap();
        assert_eq!(once, "/new/movies/a.mkv");
        // A second pass has no rule to apply, so the value is kept as-is.
        assert_eq!(rules.apply(&once), None);
    }

    #[test]
    fn test_case_insensitive_mode() {
        let mut rules = set(&[("F:/Filme", "/data/movies")]);
        rules.case_insensitive = true;
        assert_eq!(rules.apply("f:/filme/x.mkv").unwrap(), "/data/movies/x.mkv");
    }

    #[test]
    fn test_partial_component_does_not_match() {
        let rules = set(&[("/data/movie", "/x")]);
        assert_eq!(rules.apply("/data/movies/a.mkv"), None);
    }
}
