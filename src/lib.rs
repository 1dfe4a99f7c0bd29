// src/lib.rs

//! Rehome
//!
//! Offline migration tool for a media library whose item identifiers are
//! derived from file paths. Moving the library to another machine or disk
//! layout breaks every stored absolute path, and because identifiers hash
//! the path, every identifier too. Rehome copies the library's databases,
//! metadata documents, and link files to their new locations, rewrites the
//! paths stored inside them, re-derives all identifiers, and updates every
//! declared reference, in every encoding, to match.
//!
//! # Architecture
//!
//! - Plan-driven: one TOML file declares the roots, the path rule layers,
//!   and a job per file (or file pattern) with its container schema
//! - One rewrite seam: SQLite, XML, JSON, and link containers all funnel
//!   candidate values through the `ValueRewriter` trait
//! - Two rule layers: logical paths (as the library stores them) and
//!   filesystem paths (where files actually land) are mapped separately
//! - Fail-fast: a malformed container aborts the run; per-value anomalies
//!   become diagnostics collected into the run summary

pub mod config;
pub mod containers;
pub mod context;
pub mod dates;
pub mod detect;
pub mod diag;
mod error;
pub mod ids;
pub mod migrate;
pub mod mover;
pub mod rules;
pub mod scan;

pub use config::Config;
pub use context::MigrationContext;
pub use error::{Error, Result};
pub use migrate::{MigrationSummary, Migrator};
