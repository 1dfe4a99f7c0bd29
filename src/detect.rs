// src/detect.rs

//! Heuristic detection of path-like strings
//!
//! Containers hold arbitrary values and there is no schema that marks every
//! path field, so unresolved values are classified by shape before they are
//! reported. The heuristic is deliberately biased toward false positives: a
//! spurious warning costs an operator a glance at the log, a silently
//! missed path costs a broken migration. Classification only gates
//! diagnostics; it never decides whether a value gets rewritten.

use serde::Deserialize;

fn default_non_path_prefixes() -> Vec<String> {
    vec!["http:".to_string(), "https:".to_string()]
}

/// Classifier for "is this string probably a filesystem path?"
#[derive(Debug, Clone, Deserialize)]
pub struct PathDetector {
    /// Prefixes that disqualify a string outright (URLs by default)
    #[serde(default = "default_non_path_prefixes")]
    pub non_path_prefixes: Vec<String>,
}

impl Default for PathDetector {
    fn default() -> Self {
        Self {
            non_path_prefixes: default_non_path_prefixes(),
        }
    }
}

impl PathDetector {
    /// True when `value` looks like a multi-component path
    ///
    /// A value qualifies when it splits into at least two non-empty
    /// components on either separator and carries none of the known
    /// non-path prefixes.
    pub fn is_path_like(&self, value: &str) -> bool {
        if self
            .non_path_prefixes
            .iter()
            .any(|p| value.starts_with(p.as_str()))
        {
            return false;
        }
        value
            .split(['/', '\\'])
            .filter(|c| !c.is_empty())
            .take(2)
            .count()
            >= 2
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_multi_component_strings_are_path_like() {
        let d = PathDetector::default();
        assert!(d.is_path_like("/data/movies/a.mkv"));
        assert!(d.is_path_like("C:\\Weird\\NoRuleHere\\file.dat"));
        assert!(d.is_path_like("relative/still/a/path"));
        assert!(d.is_path_like("%MetadataPath%\\library\\x"));
    }

    #[test]
    fn test_single_component_strings_are_not() {
        let d = PathDetector::default();
        assert!(!d.is_path_like("Movie Title (2010)"));
        assert!(!d.is_path_like("/x"));
        assert!(!d.is_path_like(""));
        assert!(!d.is_path_like("833addde992893e93d0572907f8b4cad"));
    }

    #[test]
    fn test_urls_are_excluded() {
        let d = PathDetector::default();
        assert!(!d.is_path_like("https://example.org/poster.jpg"));
        assert!(!d.is_path_like("http://example.org/a/b/c"));
    }

    #[test]
    fn test_extra_prefixes_are_honored() {
        let mut d = PathDetector::default();
        d.non_path_prefixes.push("ftp:".to_string());
        assert!(!d.is_path_like("ftp://host/dir/file"));
    }

    #[test]
    fn test_bias_toward_false_positives() {
        // MIME-type-ish strings do get flagged; that is the accepted cost.
        let d = PathDetector::default();
        assert!(d.is_path_like("text/plain"));
    }
}
