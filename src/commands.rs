// src/commands.rs
//! Command handlers for the rehome CLI

use anyhow::{Context, Result};
use std::path::Path;
use tracing::info;

use rehome::config::{Config, Library};
use rehome::diag::DiagnosticKind;
use rehome::scan;
use rehome::Migrator;

/// Run a migration plan end to end
pub fn cmd_migrate(config_path: &Path) -> Result<()> {
    let config = Config::load(config_path)
        .with_context(|| format!("loading plan {}", config_path.display()))?;
    info!("plan loaded from {}", config_path.display());

    let summary = Migrator::new(config).run()?;

    println!("Migration finished");
    println!("  Files copied:           {}", summary.files_copied);
    println!("  Containers rewritten:   {}", summary.containers_rewritten);
    println!("  Identifiers changed:    {}", summary.ids_changed);
    println!("  Identifier cells fixed: {}", summary.id_cells_updated);
    println!("  Files renamed:          {}", summary.files_renamed);
    println!("  Dates refreshed:        {}", summary.dates_refreshed);
    if summary.empty_dirs_removed > 0 {
        println!("  Empty dirs removed:     {}", summary.empty_dirs_removed);
    }

    let diags = &summary.diagnostics;
    if diags.is_empty() {
        println!("No anomalies reported.");
        return Ok(());
    }
    println!("{} anomalies reported (see the log for each entry):", diags.len());
    for kind in [
        DiagnosticKind::UnresolvedPathCandidate,
        DiagnosticKind::IdentifierCollision,
        DiagnosticKind::DuplicateRowDeleted,
        DiagnosticKind::MissingFileForMetadataUpdate,
    ] {
        let n = diags.count_of(kind);
        if n > 0 {
            println!("  {}: {}", kind, n);
        }
    }
    Ok(())
}

/// Report which tables and columns of a database hold item identifiers
pub fn cmd_scan(library_db: &Path, scan_db: &Path) -> Result<()> {
    let known = scan::load_known_ids(library_db, &Library::default())
        .with_context(|| format!("loading identifiers from {}", library_db.display()))?;
    if known.is_empty() {
        return Err(anyhow::anyhow!(
            "no identifiers found in {}",
            library_db.display()
        ));
    }

    let findings = scan::scan_database(scan_db, &known)
        .with_context(|| format!("scanning {}", scan_db.display()))?;
    if findings.is_empty() {
        println!("No identifier occurrences found in {}", scan_db.display());
        return Ok(());
    }
    print!("{}", scan::render_report(&findings));
    Ok(())
}
