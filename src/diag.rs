// src/diag.rs

//! Structured diagnostics for recoverable anomalies
//!
//! Field-level anomalies never abort a run; they are collected here and
//! logged as they happen. Every entry is self-contained (container, field
//! coordinate, old value) so an operator can audit thousands of entries
//! after an hours-long run without replaying it.

use std::fmt;
use tracing::warn;

/// What went sideways
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiagnosticKind {
    /// A path-like value no rule resolved; it was left unchanged
    UnresolvedPathCandidate,
    /// Two or more items' new paths derive the same identifier
    IdentifierCollision,
    /// A row was deleted because its updated identifier already existed
    DuplicateRowDeleted,
    /// A file referenced during timestamp refresh does not exist
    MissingFileForMetadataUpdate,
}

impl DiagnosticKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::UnresolvedPathCandidate => "unresolved-path-candidate",
            Self::IdentifierCollision => "identifier-collision",
            Self::DuplicateRowDeleted => "duplicate-row-deleted",
            Self::MissingFileForMetadataUpdate => "missing-file-for-metadata-update",
        }
    }
}

impl fmt::Display for DiagnosticKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Where inside a container a value lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Coordinate {
    /// Relational cell
    Cell {
        table: String,
        column: String,
        rowid: i64,
    },
    /// Hierarchical document node, optionally an attribute of it
    Node {
        element: String,
        attribute: Option<String>,
    },
    /// The container's entire content, or the container itself
    Whole,
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cell {
                table,
                column,
                rowid,
            } => write!(f, "{table}.{column} rowid={rowid}"),
            Self::Node {
                element,
                attribute: Some(attr),
            } => write!(f, "<{element}> attribute {attr}"),
            Self::Node {
                element,
                attribute: None,
            } => write!(f, "<{element}>"),
            Self::Whole => write!(f, "whole file"),
        }
    }
}

/// One recoverable anomaly
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    /// Container the value was found in
    pub container: String,
    /// Field coordinate inside the container
    pub location: Coordinate,
    /// The old value, verbatim
    pub value: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} at {}: {}",
            self.kind, self.container, self.location, self.value
        )
    }
}

/// Collecting sink; every entry is also logged the moment it arrives
#[derive(Debug, Default)]
pub struct Diagnostics {
    entries: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn report(&mut self, diag: Diagnostic) {
        warn!("{diag}");
        self.entries.push(diag);
    }

    pub fn entries(&self) -> &[Diagnostic] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of entries of one kind, for the run summary
    pub fn count_of(&self, kind: DiagnosticKind) -> usize {
        self.entries.iter().filter(|d| d.kind == kind).count()
    }
}
