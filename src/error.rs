// src/error.rs
//! Crate-wide error type and result alias

use std::path::PathBuf;
use thiserror::Error;

/// Errors that abort a migration run
///
/// Anything that would leave a container partially rewritten is fatal;
/// per-value anomalies (unresolved paths, identifier collisions) are
/// reported as diagnostics instead and never reach this type.
#[derive(Error, Debug)]
pub enum Error {
    /// SQLite container error
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// XML container error
    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),

    /// I/O error while moving or rewriting files
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// I/O failure with the file it happened on
    #[error("Cannot {op} {}: {source}", path.display())]
    FileOp {
        op: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },

    /// Configuration file could not be parsed
    #[error("Invalid configuration: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// Configuration is well-formed but unusable
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Serialized cell content does not parse as its declared structure
    #[error("Malformed embedded value in '{container}' at {location}: {reason}")]
    Embedded {
        container: String,
        location: String,
        reason: String,
    },

    /// A stored date string does not parse
    #[error("Unreadable date '{value}': {reason}")]
    Date { value: String, reason: String },

    /// Identifier pass ran before the registry was built
    #[error("Identifier registry has not been built; the id-defining container must be processed first")]
    RegistryNotBuilt,

    /// Resolved target equals the source and in-place runs are not allowed
    #[error("Target resolves onto the source '{0}'; refusing to migrate in place (set allow_in_place to override)")]
    InPlaceTarget(PathBuf),

    /// Wildcard job source does not form a valid pattern
    #[error("Invalid source pattern '{pattern}': {reason}")]
    Pattern { pattern: String, reason: String },

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Crate-wide result alias
pub type Result<T> = std::result::Result<T, Error>;
