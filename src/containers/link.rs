// src/containers/link.rs

//! Link-file adapter
//!
//! A link container's entire content is a single path (the migrated system
//! uses them to point library folders at media locations). The content is
//! offered to the rewriter as one value and written back only on change.

use std::fs;
use std::path::Path;
use tracing::debug;

use super::ValueRewriter;
use crate::diag::Coordinate;
use crate::error::Result;

/// Rewrite a link container in place; true when the file changed
pub fn process(path: &Path, rewriter: &mut dyn ValueRewriter) -> Result<bool> {
    let content = fs::read_to_string(path)?;
    match rewriter.rewrite(&content, &Coordinate::Whole) {
        Some(new) if new != content => {
            fs::write(path, &new)?;
            debug!(file = %path.display(), "rewrote link target");
            Ok(true)
        }
        _ => Ok(false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::containers::PrefixRewriter;
    use crate::detect::PathDetector;
    use crate::diag::Diagnostics;
    use crate::rules::{ReplacementRule, RuleSet};

    #[test]
    fn test_link_content_is_rewritten() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("Movies.mblink");
        fs::write(&file, "F:\\Filme").unwrap();

        let rules = RuleSet::new(vec![ReplacementRule::new("F:/Filme", "/data/movies")]);
        let detector = PathDetector::default();
        let mut diags = Diagnostics::default();
        let mut rw = PrefixRewriter {
            rules: &rules,
            detector: &detector,
            diags: &mut diags,
            container: file.display().to_string(),
            quiet: false,
        };
        assert!(process(&file, &mut rw).unwrap());
        assert_eq!(fs::read_to_string(&file).unwrap(), "/data/movies");
    }

    #[test]
    fn test_unresolved_link_is_kept_and_reported() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("Odd.mblink");
        fs::write(&file, "Q:\\Nowhere\\Else").unwrap();

        let rules = RuleSet::new(vec![ReplacementRule::new("F:/Filme", "/data/movies")]);
        let detector = PathDetector::default();
        let mut diags = Diagnostics::default();
        let mut rw = PrefixRewriter {
            rules: &rules,
            detector: &detector,
            diags: &mut diags,
            container: file.display().to_string(),
            quiet: false,
        };
        assert!(!process(&file, &mut rw).unwrap());
        assert_eq!(fs::read_to_string(&file).unwrap(), "Q:\\Nowhere\\Else");
        assert_eq!(diags.len(), 1);
    }
}
