// src/config.rs

//! Migration plan parsing
//!
//! A run is described by one TOML file with the following sections:
//! - [roots] - Source, original and target directory roots
//! - [library] - Identity table and column names
//! - [logical_paths] - Rules for paths as the application stores them
//! - [filesystem_paths] - Rules mapping logical paths to on-disk locations
//! - [heuristics] - Path-likeness detector tuning
//! - [hierarchical] - Element skip list for document containers
//! - [[jobs]] - Ordered list of containers to migrate
//!
//! Plus the top-level `allow_in_place` and `clean_empty_dirs` switches.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::containers::{FieldRole, FormatKind};
use crate::detect::PathDetector;
use crate::error::{Error, Result};
use crate::rules::{ReplacementRule, RuleSet, SlashStyle};

/// Column name to field role, for one table
pub type TableSchema = BTreeMap<String, FieldRole>;

/// Table name to column roles, for one relational job
pub type Schema = BTreeMap<String, TableSchema>;

/// TOML migration plan structure
#[derive(Debug, Deserialize)]
pub struct Config {
    /// Permit a job whose resolved target equals its source
    #[serde(default)]
    pub allow_in_place: bool,

    /// Remove directories left empty under the target root after the run
    #[serde(default)]
    pub clean_empty_dirs: bool,

    /// Directory roots
    pub roots: Roots,

    /// Identity table description
    #[serde(default)]
    pub library: Library,

    /// Rules for paths as the application stores them
    #[serde(default)]
    pub logical_paths: RuleTable,

    /// Rules mapping logical paths to on-disk locations
    #[serde(default)]
    pub filesystem_paths: RuleTable,

    /// Path-likeness detector tuning
    #[serde(default)]
    pub heuristics: PathDetector,

    /// Document container settings
    #[serde(default)]
    pub hierarchical: Hierarchical,

    /// Containers to migrate, in order
    #[serde(default)]
    pub jobs: Vec<JobSpec>,
}

/// Directory roots a run works between
#[derive(Debug, Deserialize)]
pub struct Roots {
    /// Root of the source tree being migrated
    pub source: PathBuf,

    /// Root the stored paths were originally recorded under; defaults to
    /// `source` when the tree is read where it was written
    #[serde(default)]
    pub original: Option<PathBuf>,

    /// Root the migrated tree is written under
    pub target: PathBuf,
}

impl Roots {
    pub fn original_root(&self) -> &Path {
        self.original.as_deref().unwrap_or(&self.source)
    }
}

/// Where the canonical id-to-path mapping lives
#[derive(Debug, Deserialize)]
pub struct Library {
    /// Identity table name
    #[serde(default = "default_library_table")]
    pub table: String,

    /// Column holding the 16-byte item identifier
    #[serde(default = "default_id_column")]
    pub id_column: String,

    /// Column holding the entity type tag
    #[serde(default = "default_type_column")]
    pub type_column: String,

    /// Column holding the item's logical path
    #[serde(default = "default_path_column")]
    pub path_column: String,

    /// Column holding the item's creation date
    #[serde(default = "default_date_created_column")]
    pub date_created_column: String,

    /// Column holding the item's modification date
    #[serde(default = "default_date_modified_column")]
    pub date_modified_column: String,
}

impl Default for Library {
    fn default() -> Self {
        Self {
            table: default_library_table(),
            id_column: default_id_column(),
            type_column: default_type_column(),
            path_column: default_path_column(),
            date_created_column: default_date_created_column(),
            date_modified_column: default_date_modified_column(),
        }
    }
}

fn default_library_table() -> String {
    "TypedBaseItems".to_string()
}

fn default_id_column() -> String {
    "guid".to_string()
}

fn default_type_column() -> String {
    "type".to_string()
}

fn default_path_column() -> String {
    "Path".to_string()
}

fn default_date_created_column() -> String {
    "DateCreated".to_string()
}

fn default_date_modified_column() -> String {
    "DateModified".to_string()
}

/// One ordered rule list plus its rendering flags
#[derive(Debug, Default, Deserialize)]
pub struct RuleTable {
    /// `[prefix, replacement]` pairs, most specific first
    #[serde(default)]
    pub rules: Vec<(String, String)>,

    /// Separator for rewritten output ("/" or "\\")
    #[serde(default)]
    pub slash: SlashStyle,

    /// Compare components ASCII-case-insensitively
    #[serde(default)]
    pub case_insensitive: bool,

    /// Do not report values this set fails to resolve
    #[serde(default)]
    pub suppress_unresolved: bool,
}

impl RuleTable {
    /// Build the engine-facing rule set
    pub fn to_rule_set(&self) -> RuleSet {
        RuleSet {
            rules: self
                .rules
                .iter()
                .map(|(prefix, replacement)| {
                    ReplacementRule::new(prefix.clone(), replacement.clone())
                })
                .collect(),
            slash: self.slash,
            case_insensitive: self.case_insensitive,
            suppress_unresolved: self.suppress_unresolved,
        }
    }
}

/// Document container settings
#[derive(Debug, Deserialize)]
pub struct Hierarchical {
    /// Elements whose content is prose, not paths
    #[serde(default = "default_skip_elements")]
    pub skip_elements: Vec<String>,
}

impl Default for Hierarchical {
    fn default() -> Self {
        Self {
            skip_elements: default_skip_elements(),
        }
    }
}

fn default_skip_elements() -> Vec<String> {
    vec!["biography".to_string(), "outline".to_string()]
}

/// Where a job's output goes
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(from = "String")]
pub enum TargetSpec {
    /// Resolve through both rule sets and copy there
    #[default]
    Auto,
    /// Resolve like `Auto` but modify the already-copied file in place
    AutoExisting,
    /// Fixed path; a relative one is anchored under the target root
    Literal(PathBuf),
}

impl From<String> for TargetSpec {
    fn from(s: String) -> Self {
        match s.as_str() {
            "auto" => Self::Auto,
            "auto-existing" => Self::AutoExisting,
            _ => Self::Literal(PathBuf::from(s)),
        }
    }
}

/// Declared container format of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FormatSpec {
    /// Sniff from the file extension
    #[default]
    Auto,
    /// SQLite database
    Relational,
    /// XML or JSON document
    Hierarchical,
    /// Whole file is a single path
    Link,
}

impl FormatSpec {
    /// Concrete format for one resolved source file
    pub fn kind_for(&self, path: &Path) -> Option<FormatKind> {
        match self {
            Self::Relational => Some(FormatKind::Relational),
            Self::Hierarchical => Some(FormatKind::Hierarchical),
            Self::Link => Some(FormatKind::Link),
            Self::Auto => path
                .extension()
                .and_then(|e| e.to_str())
                .and_then(FormatKind::from_extension),
        }
    }
}

/// One container, or glob of containers, to migrate
#[derive(Debug, Deserialize)]
pub struct JobSpec {
    /// Path or glob pattern, relative to the source root
    pub source: String,

    /// Target disposition
    #[serde(default)]
    pub target: TargetSpec,

    /// Container format; sniffed from the extension when `auto`
    #[serde(default)]
    pub format: FormatSpec,

    /// Copy without rewriting anything
    #[serde(default)]
    pub copy_only: bool,

    /// Suppress unresolved-path diagnostics for this job
    #[serde(default)]
    pub quiet: bool,

    /// Visit this job again in the identifier-in-path pass
    #[serde(default)]
    pub rewrite_id_paths: bool,

    /// This job's container defines the canonical id mapping
    #[serde(default)]
    pub defines_ids: bool,

    /// Table to column to role layout, for relational jobs
    #[serde(default)]
    pub schema: Schema,
}

impl Config {
    /// Load a migration plan from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {e}", path.display())))?;
        let config: Config = toml::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Check the cross-field constraints a derive cannot express
    pub fn validate(&self) -> Result<()> {
        if self.jobs.is_empty() {
            return Err(Error::Config("no jobs declared".to_string()));
        }
        let id_jobs = self.jobs.iter().filter(|j| j.defines_ids).count();
        if id_jobs != 1 {
            return Err(Error::Config(format!(
                "exactly one job must set defines_ids, found {id_jobs}"
            )));
        }
        if let Some(job) = self.id_job() {
            if job.source.contains('*') {
                return Err(Error::Config(
                    "the defines_ids job must name a single container, not a pattern".to_string(),
                ));
            }
            if matches!(job.format, FormatSpec::Hierarchical | FormatSpec::Link) {
                return Err(Error::Config(
                    "the defines_ids job must be a relational container".to_string(),
                ));
            }
            if job.copy_only {
                return Err(Error::Config(
                    "the defines_ids job cannot be copy_only".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// The job whose container holds the identity table
    pub fn id_job(&self) -> Option<&JobSpec> {
        self.jobs.iter().find(|j| j.defines_ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_toml() {
        let toml_str = r#"
allow_in_place = false
clean_empty_dirs = true

[roots]
source = "/mnt/old-server/jellyfin"
original = "/var/lib/jellyfin"
target = "/srv/jellyfin"

[logical_paths]
slash = "/"
rules = [
    ["F:/Filme", "/data/movies"],
    ["F:", "/data"],
    ["%MetadataPath%", "%MetadataPath%"],
]

[filesystem_paths]
rules = [["/data", "/srv/jellyfin/media"]]
suppress_unresolved = true

[heuristics]
non_path_prefixes = ["http:", "https:", "ftp:"]

[hierarchical]
skip_elements = ["biography", "outline", "plot"]

[[jobs]]
source = "data/library.db"
defines_ids = true
rewrite_id_paths = true

[jobs.schema.TypedBaseItems]
Path = "path"
data = "embedded-structure"
guid = "binary-id"

[jobs.schema.AncestorIds]
AncestorIdText = "ancestor-plain-id"

[[jobs]]
source = "metadata/**/*.nfo"
format = "hierarchical"

[[jobs]]
source = "config/encoding.xml"
target = "config/encoding.xml"
quiet = true
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        config.validate().unwrap();

        assert_eq!(config.roots.original_root(), Path::new("/var/lib/jellyfin"));
        assert!(config.clean_empty_dirs);

        let logical = config.logical_paths.to_rule_set();
        assert_eq!(logical.rules.len(), 3);
        assert_eq!(logical.rules[0].prefix, "F:/Filme");
        assert_eq!(logical.apply("F:\\Filme\\a.mkv").unwrap(), "/data/movies/a.mkv");
        assert!(config.filesystem_paths.to_rule_set().suppress_unresolved);

        let id_job = config.id_job().unwrap();
        assert_eq!(id_job.source, "data/library.db");
        assert_eq!(id_job.target, TargetSpec::Auto);
        assert_eq!(
            id_job.schema["TypedBaseItems"]["guid"],
            FieldRole::BinaryId
        );
        assert_eq!(
            id_job.schema["AncestorIds"]["AncestorIdText"],
            FieldRole::AncestorPlainId
        );
        assert_eq!(config.jobs[1].format, FormatSpec::Hierarchical);
        assert_eq!(
            config.jobs[2].target,
            TargetSpec::Literal(PathBuf::from("config/encoding.xml"))
        );
    }

    #[test]
    fn test_defaults() {
        let toml_str = r#"
[roots]
source = "/old"
target = "/new"

[[jobs]]
source = "library.db"
defines_ids = true
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        config.validate().unwrap();

        assert_eq!(config.library.table, "TypedBaseItems");
        assert_eq!(config.library.id_column, "guid");
        assert_eq!(config.library.type_column, "type");
        assert_eq!(config.library.path_column, "Path");
        assert_eq!(config.library.date_created_column, "DateCreated");
        assert_eq!(config.library.date_modified_column, "DateModified");
        assert_eq!(config.roots.original_root(), Path::new("/old"));
        assert_eq!(
            config.hierarchical.skip_elements,
            vec!["biography", "outline"]
        );
        assert!(config.heuristics.non_path_prefixes.contains(&"https:".to_string()));
        assert!(!config.allow_in_place);
        let job = &config.jobs[0];
        assert_eq!(job.target, TargetSpec::Auto);
        assert_eq!(job.format, FormatSpec::Auto);
        assert!(!job.copy_only);
        assert!(!job.quiet);
    }

    #[test]
    fn test_backslash_slash_style() {
        let toml_str = r#"
[roots]
source = "/old"
target = "/new"

[logical_paths]
slash = "\\"
rules = [["/data", "Y:/Filme"]]

[[jobs]]
source = "library.db"
defines_ids = true
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        let rules = config.logical_paths.to_rule_set();
        assert_eq!(rules.apply("/data/a/b.mkv").unwrap(), "Y:\\Filme\\a\\b.mkv");
    }

    #[test]
    fn test_no_jobs_is_rejected() {
        let toml_str = r#"
[roots]
source = "/old"
target = "/new"
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_exactly_one_id_job_required() {
        let toml_str = r#"
[roots]
source = "/old"
target = "/new"

[[jobs]]
source = "a.db"
defines_ids = true

[[jobs]]
source = "b.db"
defines_ids = true
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_id_job_may_not_be_a_pattern() {
        let toml_str = r#"
[roots]
source = "/old"
target = "/new"

[[jobs]]
source = "data/*.db"
defines_ids = true
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_target_spec_parsing() {
        assert_eq!(TargetSpec::from("auto".to_string()), TargetSpec::Auto);
        assert_eq!(
            TargetSpec::from("auto-existing".to_string()),
            TargetSpec::AutoExisting
        );
        assert_eq!(
            TargetSpec::from("/fixed/spot.db".to_string()),
            TargetSpec::Literal(PathBuf::from("/fixed/spot.db"))
        );
    }

    #[test]
    fn test_format_sniffing() {
        assert_eq!(
            FormatSpec::Auto.kind_for(Path::new("data/library.db")),
            Some(FormatKind::Relational)
        );
        assert_eq!(
            FormatSpec::Auto.kind_for(Path::new("movie.nfo")),
            Some(FormatKind::Hierarchical)
        );
        assert_eq!(
            FormatSpec::Auto.kind_for(Path::new("shortcut.mblink")),
            Some(FormatKind::Link)
        );
        assert_eq!(FormatSpec::Auto.kind_for(Path::new("poster.jpg")), None);
        assert_eq!(
            FormatSpec::Link.kind_for(Path::new("poster.jpg")),
            Some(FormatKind::Link)
        );
    }
}
