// src/context.rs

//! Run-wide migration state
//!
//! One `MigrationContext` is built from the loaded plan and threaded
//! through every phase. It owns the two rule sets, the path-likeness
//! detector, the directory roots, the diagnostic sink, and (once phase 2
//! has run) the identifier registry. Location lookups are cached, so each
//! distinct stored path is resolved once per run.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::config::{Config, TargetSpec};
use crate::detect::PathDetector;
use crate::error::{Error, Result};
use crate::ids::IdRegistry;
use crate::rules::RuleSet;

/// Both halves of one stored path's new identity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePath {
    /// Path as the application will store it
    pub logical: String,
    /// Where that file lives on disk after the run
    pub filesystem: PathBuf,
}

/// State shared by every phase of a run
pub struct MigrationContext {
    /// Rules for paths as the application stores them
    pub logical: RuleSet,
    /// Rules mapping logical paths to on-disk locations
    pub filesystem: RuleSet,
    pub detector: PathDetector,
    pub source_root: PathBuf,
    pub original_root: PathBuf,
    pub target_root: PathBuf,
    pub allow_in_place: bool,
    pub diags: crate::diag::Diagnostics,
    /// Populated by the registry phase; `None` before it
    pub registry: Option<IdRegistry>,
    file_paths: HashMap<String, FilePath>,
}

impl MigrationContext {
    pub fn new(config: &Config) -> Self {
        Self {
            logical: config.logical_paths.to_rule_set(),
            filesystem: config.filesystem_paths.to_rule_set(),
            detector: config.heuristics.clone(),
            source_root: config.roots.source.clone(),
            original_root: config.roots.original_root().to_path_buf(),
            target_root: config.roots.target.clone(),
            allow_in_place: config.allow_in_place,
            diags: crate::diag::Diagnostics::default(),
            registry: None,
            file_paths: HashMap::new(),
        }
    }

    /// The registry, or an error when a consumer phase runs too early
    pub fn registry(&self) -> Result<&IdRegistry> {
        self.registry.as_ref().ok_or(Error::RegistryNotBuilt)
    }

    /// New logical path and on-disk location for one stored path (cached)
    pub fn file_path(&mut self, stored: &str) -> FilePath {
        if let Some(hit) = self.file_paths.get(stored) {
            return hit.clone();
        }
        let logical = self
            .logical
            .apply(stored)
            .unwrap_or_else(|| stored.to_string());
        let filesystem = self.fs_location(&logical);
        let entry = FilePath {
            logical,
            filesystem,
        };
        self.file_paths
            .insert(stored.to_string(), entry.clone());
        entry
    }

    /// On-disk location of a logical path after the run
    pub fn fs_location(&self, logical: &str) -> PathBuf {
        let rendered = self
            .filesystem
            .apply(logical)
            .unwrap_or_else(|| logical.to_string());
        locate(&self.target_root, &rendered)
    }

    /// Where a source file's migrated copy belongs
    ///
    /// `auto` targets are rebased under the original root and pushed through
    /// both rule sets; drive- or UNC-prefixed results are used verbatim and
    /// everything else is anchored under the target root. A target equal to
    /// the source is refused unless the plan allows in-place runs.
    pub fn resolve_target(&self, source: &Path, spec: &TargetSpec) -> Result<PathBuf> {
        let target = match spec {
            TargetSpec::Literal(p) => {
                if p.is_absolute() {
                    p.clone()
                } else {
                    self.target_root.join(p)
                }
            }
            TargetSpec::Auto | TargetSpec::AutoExisting => {
                let relative = source.strip_prefix(&self.source_root).unwrap_or(source);
                let original = stored_form(&self.original_root, relative);
                let logical = match self.logical.apply(&original) {
                    Some(l) => l,
                    None => {
                        debug!("no logical rule for '{original}', kept as-is");
                        original
                    }
                };
                let rendered = self
                    .filesystem
                    .apply(&logical)
                    .unwrap_or(logical);
                locate(&self.target_root, &rendered)
            }
        };
        if target == source && !self.allow_in_place {
            return Err(Error::InPlaceTarget(target));
        }
        Ok(target)
    }
}

/// The path a file had in the application's own terms before migration
fn stored_form(original_root: &Path, relative: &Path) -> String {
    let root = original_root.to_string_lossy();
    let root = root.trim_end_matches(['/', '\\']);
    let rel = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/");
    if rel.is_empty() {
        root.to_string()
    } else {
        format!("{root}/{rel}")
    }
}

/// Turn a rewritten path string into a real location
fn locate(target_root: &Path, rendered: &str) -> PathBuf {
    if is_drive_or_unc(rendered) {
        return PathBuf::from(rendered);
    }
    let mut out = target_root.to_path_buf();
    for comp in rendered.split(['/', '\\']).filter(|c| !c.is_empty()) {
        out.push(comp);
    }
    out
}

fn is_drive_or_unc(s: &str) -> bool {
    if s.starts_with("\\\\") || s.starts_with("//") {
        return true;
    }
    let bytes = s.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}
