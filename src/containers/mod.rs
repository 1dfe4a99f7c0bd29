// src/containers/mod.rs

//! Container format adapters
//!
//! Each adapter owns one container format and knows how to visit every
//! value that may hold a path: relational cells, hierarchical document
//! nodes and attributes, whole-file links, and serialized structures
//! nested inside cells. The traversal is shared between the prefix-rule
//! pass and the identifier-in-path pass through the [`ValueRewriter`]
//! seam, so each format is walked by exactly one piece of code.

pub mod embedded;
pub mod link;
pub mod sqlite;
pub mod xml;

use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

use crate::detect::PathDetector;
use crate::diag::{Coordinate, Diagnostic, DiagnosticKind, Diagnostics};
use crate::error::{Error, Result};
use crate::ids::IdKind;
use crate::rules::{RuleSet, SlashStyle};

/// Container format of a migration job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FormatKind {
    /// SQLite database
    Relational,
    /// XML or JSON document
    Hierarchical,
    /// Whole file is a single path
    Link,
}

impl FormatKind {
    /// Guess the format from a file extension, for wildcard jobs
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "db" | "sqlite" | "sqlite3" => Some(Self::Relational),
            "xml" | "nfo" | "collection" | "json" => Some(Self::Hierarchical),
            "mblink" => Some(Self::Link),
            _ => None,
        }
    }
}

/// What a schema location holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FieldRole {
    /// A path string
    Path,
    /// Identifier, 32 hex chars
    PlainId,
    /// Identifier, dashed hex
    DashedId,
    /// Identifier, byte-swapped hex
    AncestorPlainId,
    /// Identifier, byte-swapped dashed hex
    AncestorDashedId,
    /// Identifier, 16 raw bytes
    BinaryId,
    /// Serialized structure whose leaves may be paths
    EmbeddedStructure,
}

impl FieldRole {
    /// The identifier encoding, for id roles
    pub const fn id_kind(&self) -> Option<IdKind> {
        match self {
            Self::PlainId => Some(IdKind::Plain),
            Self::DashedId => Some(IdKind::Dashed),
            Self::AncestorPlainId => Some(IdKind::AncestorPlain),
            Self::AncestorDashedId => Some(IdKind::AncestorDashed),
            Self::BinaryId => Some(IdKind::Binary),
            _ => None,
        }
    }

    /// True for roles the path passes rewrite (id roles have their own pass)
    pub const fn is_value_role(&self) -> bool {
        matches!(self, Self::Path | Self::EmbeddedStructure)
    }
}

/// Strategy applied to each candidate value an adapter visits
pub trait ValueRewriter {
    /// `Some(new)` to replace the value, `None` to keep it
    fn rewrite(&mut self, value: &str, at: &Coordinate) -> Option<String>;
}

/// Prefix-rule rewriting with unresolved-path reporting
pub struct PrefixRewriter<'a> {
    pub rules: &'a RuleSet,
    pub detector: &'a PathDetector,
    pub diags: &'a mut Diagnostics,
    /// Container identity carried into diagnostics
    pub container: String,
    /// Job-level diagnostic suppression, on top of the rule set's own flag
    pub quiet: bool,
}

impl ValueRewriter for PrefixRewriter<'_> {
    fn rewrite(&mut self, value: &str, at: &Coordinate) -> Option<String> {
        match self.rules.apply(value) {
            Some(new) => Some(new),
            None => {
                if !self.quiet
                    && !self.rules.suppress_unresolved
                    && self.detector.is_path_like(value)
                {
                    self.diags.report(Diagnostic {
                        kind: DiagnosticKind::UnresolvedPathCandidate,
                        container: self.container.clone(),
                        location: at.clone(),
                        value: value.to_string(),
                    });
                }
                None
            }
        }
    }
}

/// Identifier-in-path rewriting; never emits diagnostics
pub struct IdPathRewriter<'a> {
    pub tokens: &'a HashMap<String, String>,
    pub slash: SlashStyle,
}

impl ValueRewriter for IdPathRewriter<'_> {
    fn rewrite(&mut self, value: &str, _at: &Coordinate) -> Option<String> {
        crate::ids::rewrite_id_path(value, self.tokens, self.slash)
    }
}

/// Rewrite a document container in place; returns whether it changed
///
/// JSON documents go through the layout-preserving tree codec as one
/// embedded value spanning the whole file; everything else is parsed as
/// XML.
pub fn process_hierarchical(
    path: &Path,
    rewriter: &mut dyn ValueRewriter,
    skip_elements: &[String],
) -> Result<bool> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    if ext.as_deref() != Some("json") {
        return xml::process(path, rewriter, skip_elements);
    }
    let text = std::fs::read_to_string(path).map_err(|source| Error::FileOp {
        op: "read",
        path: path.to_path_buf(),
        source,
    })?;
    let at = Coordinate::Whole;
    let rewritten =
        embedded::rewrite_tree(&text, &mut |v| rewriter.rewrite(v, &at)).map_err(|e| {
            Error::Embedded {
                container: path.display().to_string(),
                location: at.to_string(),
                reason: e.to_string(),
            }
        })?;
    match rewritten {
        Some(new) => {
            std::fs::write(path, new).map_err(|source| Error::FileOp {
                op: "write",
                path: path.to_path_buf(),
                source,
            })?;
            Ok(true)
        }
        None => Ok(false),
    }
}
