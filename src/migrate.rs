// src/migrate.rs

//! Migration orchestrator
//!
//! Runs the declared jobs through six strictly ordered phases:
//!
//! 1. copy every job's files to their resolved targets and rewrite stored
//!    path prefixes inside them;
//! 2. derive the identifier registry from the rewritten identity table;
//! 3. rewrite identifiers occurring inside path values, moving files whose
//!    own location carries one;
//! 4. rewrite identifier cells through the registry;
//! 5. give placeholder dates the migrated files' real timestamps;
//! 6. optionally sweep empty directories under the target root.
//!
//! Everything is sequential; one container is fully processed and committed
//! before the next is touched, and the first fatal error aborts the run.

use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags};
use rusqlite::params;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::config::{Config, Library, TargetSpec};
use crate::containers::{self, FormatKind, IdPathRewriter, PrefixRewriter, link, sqlite};
use crate::context::MigrationContext;
use crate::dates::{format_db_date, parse_db_date, system_time_ns};
use crate::diag::{Coordinate, Diagnostic, DiagnosticKind, Diagnostics};
use crate::error::{Error, Result};
use crate::ids::{Guid, IdRegistry, derive_id, plain_str, rewrite_id_path};
use crate::mover;
use crate::rules::SlashStyle;

/// What one finished run did
#[derive(Debug, Default)]
pub struct MigrationSummary {
    pub files_copied: usize,
    pub containers_rewritten: usize,
    pub ids_changed: usize,
    pub id_cells_updated: u64,
    pub duplicate_rows_deleted: u64,
    pub files_renamed: usize,
    pub dates_refreshed: u64,
    pub empty_dirs_removed: usize,
    pub diagnostics: Diagnostics,
}

/// One file the copy phase placed, remembered for the later passes
struct Placement {
    source: PathBuf,
    target: PathBuf,
    job: usize,
}

/// Drives one migration run to completion
pub struct Migrator {
    config: Config,
    ctx: MigrationContext,
    placements: Vec<Placement>,
    summary: MigrationSummary,
}

impl Migrator {
    pub fn new(config: Config) -> Self {
        let ctx = MigrationContext::new(&config);
        Self {
            config,
            ctx,
            placements: Vec::new(),
            summary: MigrationSummary::default(),
        }
    }

    /// Execute every phase in order, consuming the migrator
    pub fn run(mut self) -> Result<MigrationSummary> {
        info!(
            "migrating {} -> {}",
            self.ctx.source_root.display(),
            self.ctx.target_root.display()
        );
        self.copy_and_rewrite_paths()?;
        self.build_registry()?;
        self.rewrite_id_paths()?;
        self.rewrite_ids()?;
        self.refresh_dates()?;
        self.sweep_empty_dirs()?;
        self.summary.diagnostics = std::mem::take(&mut self.ctx.diags);
        info!(
            "migration complete: {} files copied, {} identifiers changed, {} diagnostics",
            self.summary.files_copied,
            self.summary.ids_changed,
            self.summary.diagnostics.len()
        );
        Ok(self.summary)
    }

    /// Phase 1: place every job's files and rewrite stored path prefixes
    ///
    /// The done-set makes later catch-all copy jobs skip files an earlier,
    /// more specific job already handled.
    fn copy_and_rewrite_paths(&mut self) -> Result<()> {
        info!("phase 1: copying containers and rewriting paths");
        let mut done: HashSet<PathBuf> = HashSet::new();
        for index in 0..self.config.jobs.len() {
            info!("job '{}'", self.config.jobs[index].source);
            for source in self.expand_job_sources(index)? {
                if !done.insert(source.clone()) {
                    continue;
                }
                self.place_and_rewrite(index, source)?;
            }
        }
        Ok(())
    }

    /// All files a job's source names, patterns expanded in sorted order
    fn expand_job_sources(&self, index: usize) -> Result<Vec<PathBuf>> {
        let job = &self.config.jobs[index];
        let full = self.ctx.source_root.join(&job.source);
        if !job.source.contains('*') {
            return Ok(vec![full]);
        }
        let pattern = full.to_string_lossy().into_owned();
        let mut out = Vec::new();
        for entry in glob::glob(&pattern).map_err(|e| Error::Pattern {
            pattern: pattern.clone(),
            reason: e.to_string(),
        })? {
            let path = entry.map_err(|e| {
                let path = e.path().to_path_buf();
                Error::FileOp {
                    op: "read",
                    path,
                    source: e.into_error(),
                }
            })?;
            if path.is_dir() {
                continue;
            }
            out.push(path);
        }
        Ok(out)
    }

    fn place_and_rewrite(&mut self, index: usize, source: PathBuf) -> Result<()> {
        let job = &self.config.jobs[index];
        let target = self.ctx.resolve_target(&source, &job.target)?;
        if job.target != TargetSpec::AutoExisting {
            debug!("copying {} -> {}", source.display(), target.display());
            mover::copy_file(&source, &target)?;
            self.summary.files_copied += 1;
        }
        self.placements.push(Placement {
            source,
            target: target.clone(),
            job: index,
        });
        if job.copy_only {
            return Ok(());
        }
        let Some(kind) = job.format.kind_for(&target) else {
            return Ok(());
        };
        let name = target.display().to_string();
        info!("processing {name}");
        let mut rewriter = PrefixRewriter {
            rules: &self.ctx.logical,
            detector: &self.ctx.detector,
            diags: &mut self.ctx.diags,
            container: name.clone(),
            quiet: job.quiet,
        };
        let changed = match kind {
            FormatKind::Relational => {
                let mut conn = Connection::open(&target)?;
                sqlite::process_paths(&mut conn, &name, &job.schema, &mut rewriter)? > 0
            }
            FormatKind::Hierarchical => containers::process_hierarchical(
                &target,
                &mut rewriter,
                &self.config.hierarchical.skip_elements,
            )?,
            FormatKind::Link => link::process(&target, &mut rewriter)?,
        };
        if changed {
            self.summary.containers_rewritten += 1;
        }
        Ok(())
    }

    /// Phase 2: derive the id registry from the rewritten identity table
    ///
    /// New identifiers are a pure function of each item's rewritten path,
    /// so the registry is read from the *target* database after phase 1;
    /// the untouched source database supplies the old paths for collision
    /// reporting.
    fn build_registry(&mut self) -> Result<()> {
        info!("phase 2: deriving new item identifiers");
        let Some((source_db, target_db)) = self.id_placement() else {
            return Err(Error::Config(
                "the defines_ids job matched no file".to_string(),
            ));
        };
        let lib = &self.config.library;
        let old_paths = load_item_paths(&source_db, lib)?;

        let conn = Connection::open(&target_db)?;
        let mut registry = IdRegistry::default();
        {
            let mut stmt = conn.prepare(&format!(
                "SELECT \"{}\", \"{}\", \"{}\" FROM \"{}\"",
                lib.id_column, lib.type_column, lib.path_column, lib.table
            ))?;
            let mut rows = stmt.query([])?;
            while let Some(row) = rows.next()? {
                let old = match row.get_ref(0)? {
                    ValueRef::Blob(b) => Guid::try_from(b).ok(),
                    _ => None,
                };
                let Some(old) = old else {
                    warn!(
                        "{}.{} holds a non-16-byte identifier, row skipped",
                        lib.table, lib.id_column
                    );
                    continue;
                };
                let entity_type: Option<String> = row.get(1)?;
                let path: Option<String> = row.get(2)?;
                let (Some(entity_type), Some(path)) = (entity_type, path) else {
                    continue;
                };
                // Placeholder paths like %MetadataPath% do not name items.
                if path.is_empty() || path.starts_with('%') {
                    continue;
                }
                let new = derive_id(&entity_type, &path);
                let old_path = old_paths.get(&old).cloned().unwrap_or_default();
                registry.insert(old, new, &old_path, &path);
            }
        }

        for group in registry.collision_groups() {
            let olds = group
                .members
                .iter()
                .map(|m| m.old_path.as_str())
                .collect::<Vec<_>>()
                .join("', '");
            self.ctx.diags.report(Diagnostic {
                kind: DiagnosticKind::IdentifierCollision,
                container: target_db.display().to_string(),
                location: Coordinate::Whole,
                value: format!(
                    "{} items merge onto '{}' (id {}): '{olds}'",
                    group.members.len(),
                    group.new_path,
                    plain_str(&group.new_id)
                ),
            });
        }
        info!("{} identifiers changed", registry.len());
        self.summary.ids_changed = registry.len();
        self.ctx.registry = Some(registry);
        Ok(())
    }

    /// Phase 3: rewrite identifiers inside stored paths and move files
    fn rewrite_id_paths(&mut self) -> Result<()> {
        let tokens = self.ctx.registry()?.path_tokens();
        if tokens.is_empty() {
            info!("phase 3: no identifiers changed, nothing to rewrite");
            return Ok(());
        }
        info!("phase 3: rewriting identifiers inside paths");
        let slash = self.ctx.logical.slash;
        for i in 0..self.placements.len() {
            let job = &self.config.jobs[self.placements[i].job];
            if !job.rewrite_id_paths || job.copy_only {
                continue;
            }
            let target = self.placements[i].target.clone();
            // Opaque files like artwork have no values to rewrite, but their
            // location may still carry an identifier.
            if let Some(kind) = job.format.kind_for(&target) {
                let name = target.display().to_string();
                let mut rewriter = IdPathRewriter {
                    tokens: &tokens,
                    slash,
                };
                match kind {
                    FormatKind::Relational => {
                        let mut conn = Connection::open(&target)?;
                        sqlite::process_paths(&mut conn, &name, &job.schema, &mut rewriter)?;
                    }
                    FormatKind::Hierarchical => {
                        containers::process_hierarchical(
                            &target,
                            &mut rewriter,
                            &self.config.hierarchical.skip_elements,
                        )?;
                    }
                    FormatKind::Link => {
                        link::process(&target, &mut rewriter)?;
                    }
                }
            }
            // The file's own location may carry the item's identifier.
            let rendered = target.to_string_lossy();
            if let Some(new) = rewrite_id_path(&rendered, &tokens, SlashStyle::Forward) {
                let new_target = PathBuf::from(new);
                info!(
                    "renaming {} -> {}",
                    target.display(),
                    new_target.display()
                );
                mover::rename_file(&target, &new_target)?;
                self.placements[i].target = new_target;
                self.summary.files_renamed += 1;
            }
        }
        Ok(())
    }

    /// Phase 4: rewrite identifier cells through the registry
    fn rewrite_ids(&mut self) -> Result<()> {
        info!("phase 4: rewriting identifier cells");
        for i in 0..self.placements.len() {
            let job = &self.config.jobs[self.placements[i].job];
            if job.copy_only {
                continue;
            }
            let has_id_roles = job
                .schema
                .values()
                .any(|cols| cols.values().any(|r| r.id_kind().is_some()));
            if !has_id_roles {
                continue;
            }
            let target = self.placements[i].target.clone();
            if job.format.kind_for(&target) != Some(FormatKind::Relational) {
                continue;
            }
            let name = target.display().to_string();
            let mut conn = Connection::open(&target)?;
            let registry = self.ctx.registry.as_ref().ok_or(Error::RegistryNotBuilt)?;
            let stats =
                sqlite::process_ids(&mut conn, &name, &job.schema, registry, &mut self.ctx.diags)?;
            self.summary.id_cells_updated += stats.updated;
            self.summary.duplicate_rows_deleted += stats.deleted;
        }
        Ok(())
    }

    /// Phase 5: give placeholder dates the migrated files' real timestamps
    ///
    /// Items imported before the upstream system tracked dates carry a
    /// year-one placeholder. Those rows get the creation and modification
    /// times of the file at the item's migrated location, written back in
    /// the database's own date format.
    fn refresh_dates(&mut self) -> Result<()> {
        info!("phase 5: refreshing placeholder dates from file times");
        let Some((_, target_db)) = self.id_placement() else {
            return Ok(());
        };
        let lib = &self.config.library;
        let container = target_db.display().to_string();
        let mut conn = Connection::open(&target_db)?;
        let tx = conn.transaction()?;

        let rows = {
            let mut stmt = tx.prepare(&format!(
                "SELECT rowid, \"{}\", \"{}\", \"{}\" FROM \"{}\"",
                lib.path_column, lib.date_created_column, lib.date_modified_column, lib.table
            ))?;
            let mut out: Vec<(i64, Option<String>, Option<String>, Option<String>)> = Vec::new();
            let mut q = stmt.query([])?;
            while let Some(row) = q.next()? {
                out.push((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?));
            }
            out
        };

        let total = rows.len();
        let mut refreshed = 0u64;
        let mut scanned = 0usize;
        let mut last_log = Instant::now();
        for (rowid, path, created, modified) in rows {
            scanned += 1;
            if last_log.elapsed() >= Duration::from_secs(1) {
                info!("{}: checked {scanned}/{total} rows", lib.table);
                last_log = Instant::now();
            }
            let Some(path) = path else { continue };
            if path.is_empty() {
                continue;
            }
            let needs_created = matches!(parse_stored_ns(&created), Some(ns) if ns < 0);
            let needs_modified = matches!(parse_stored_ns(&modified), Some(ns) if ns < 0);
            if !needs_created && !needs_modified {
                continue;
            }
            let location = self.ctx.fs_location(&path);
            if !location.exists() {
                self.ctx.diags.report(Diagnostic {
                    kind: DiagnosticKind::MissingFileForMetadataUpdate,
                    container: container.clone(),
                    location: Coordinate::Cell {
                        table: lib.table.clone(),
                        column: lib.path_column.clone(),
                        rowid,
                    },
                    value: location.display().to_string(),
                });
                continue;
            }
            let meta = fs::metadata(&location).map_err(|source| Error::FileOp {
                op: "stat",
                path: location.clone(),
                source,
            })?;
            if needs_created {
                let t = meta.created().or_else(|_| meta.modified())?;
                let value = format_db_date(system_time_ns(t))?;
                tx.execute(
                    &format!(
                        "UPDATE \"{}\" SET \"{}\" = ?1 WHERE rowid = ?2",
                        lib.table, lib.date_created_column
                    ),
                    params![value, rowid],
                )?;
                refreshed += 1;
            }
            if needs_modified {
                let t = meta.modified()?;
                let value = format_db_date(system_time_ns(t))?;
                tx.execute(
                    &format!(
                        "UPDATE \"{}\" SET \"{}\" = ?1 WHERE rowid = ?2",
                        lib.table, lib.date_modified_column
                    ),
                    params![value, rowid],
                )?;
                refreshed += 1;
            }
        }
        tx.commit()?;
        info!("{refreshed} dates refreshed");
        self.summary.dates_refreshed = refreshed;
        Ok(())
    }

    /// Phase 6: optional empty-directory sweep under the target root
    fn sweep_empty_dirs(&mut self) -> Result<()> {
        if !self.config.clean_empty_dirs {
            return Ok(());
        }
        info!(
            "phase 6: removing empty directories under {}",
            self.ctx.target_root.display()
        );
        let removed = mover::remove_empty_dirs(&self.ctx.target_root)?;
        info!("{removed} empty directories removed");
        self.summary.empty_dirs_removed = removed;
        Ok(())
    }

    /// Source and current target of the id-defining container
    fn id_placement(&self) -> Option<(PathBuf, PathBuf)> {
        let index = self.config.jobs.iter().position(|j| j.defines_ids)?;
        self.placements
            .iter()
            .find(|p| p.job == index)
            .map(|p| (p.source.clone(), p.target.clone()))
    }
}

/// Pre-rewrite logical paths by identifier, from the untouched source
fn load_item_paths(db: &Path, lib: &Library) -> Result<HashMap<Guid, String>> {
    let conn = Connection::open_with_flags(db, OpenFlags::SQLITE_OPEN_READ_ONLY)?;
    let mut stmt = conn.prepare(&format!(
        "SELECT \"{}\", \"{}\" FROM \"{}\"",
        lib.id_column, lib.path_column, lib.table
    ))?;
    let mut rows = stmt.query([])?;
    let mut map = HashMap::new();
    while let Some(row) = rows.next()? {
        let ValueRef::Blob(b) = row.get_ref(0)? else {
            continue;
        };
        let Ok(guid) = Guid::try_from(b) else {
            continue;
        };
        let path: Option<String> = row.get(1)?;
        map.insert(guid, path.unwrap_or_default());
    }
    Ok(map)
}

/// Stored date string to nanoseconds; unreadable dates are logged and skipped
fn parse_stored_ns(value: &Option<String>) -> Option<i128> {
    let value = value.as_deref()?;
    match parse_db_date(value) {
        Ok(ns) => Some(ns),
        Err(e) => {
            warn!("{e}, date left alone");
            None
        }
    }
}
