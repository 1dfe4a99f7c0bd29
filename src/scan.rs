// src/scan.rs

//! Identifier occurrence scanner
//!
//! Before a migration plan declares identifier roles, it helps to know
//! which tables and columns of a database actually hold item identifiers,
//! and in which encoding. The scanner loads every identifier from the
//! identity table, expands each into its surface encodings, and walks every
//! column of the scanned database looking for occurrences, both as whole
//! cell values and embedded inside larger ones. The result is a plain-text
//! table meant to be pasted next to the plan while writing its `[schema]`
//! sections.

use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags};
use std::collections::{BTreeMap, HashSet};
use std::fmt::Write as _;
use std::path::Path;
use tracing::info;

use crate::config::Library;
use crate::containers::sqlite::{table_columns, user_tables};
use crate::error::Result;
use crate::ids::{Guid, IdKind, ancestor_swap, dashed_str, plain_str};

/// Every identifier of the identity table, rendered in all surface encodings
pub struct KnownIds {
    textual: Vec<(&'static str, HashSet<String>)>,
    binary: Vec<(&'static str, HashSet<Vec<u8>>)>,
    count: usize,
}

impl KnownIds {
    /// Number of identifiers loaded
    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    fn families(&self) -> usize {
        self.textual.len() + self.binary.len()
    }
}

/// How a found identifier relates to the cell holding it
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Occurrence {
    /// The cell is nothing but the identifier
    Pure,
    /// The identifier sits inside a larger value
    Embedded,
}

impl Occurrence {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Pure => "pure",
            Self::Embedded => "embedded",
        }
    }
}

/// One column in which known identifiers occur
#[derive(Debug)]
pub struct ScanFinding {
    pub table: String,
    pub column: String,
    /// Encoding names with how each occurs, e.g. `plain (embedded)`
    pub encodings: Vec<String>,
}

/// Load the identity table and expand every identifier into its encodings
pub fn load_known_ids(library_db: &Path, lib: &Library) -> Result<KnownIds> {
    let conn = Connection::open_with_flags(library_db, OpenFlags::SQLITE_OPEN_READ_ONLY)?;
    let mut stmt = conn.prepare(&format!(
        "SELECT \"{}\" FROM \"{}\"",
        lib.id_column, lib.table
    ))?;
    let mut rows = stmt.query([])?;
    let mut ids: Vec<Guid> = Vec::new();
    while let Some(row) = rows.next()? {
        if let ValueRef::Blob(b) = row.get_ref(0)? {
            if let Ok(id) = Guid::try_from(b) {
                ids.push(id);
            }
        }
    }
    info!(
        "{} identifiers loaded from {}",
        ids.len(),
        library_db.display()
    );

    let mut plain = HashSet::with_capacity(ids.len());
    let mut dashed = HashSet::with_capacity(ids.len());
    let mut ancestor_plain = HashSet::with_capacity(ids.len());
    let mut ancestor_dashed = HashSet::with_capacity(ids.len());
    let mut binary = HashSet::with_capacity(ids.len());
    let mut ancestor_binary = HashSet::with_capacity(ids.len());
    for id in &ids {
        let swapped = ancestor_swap(id);
        plain.insert(plain_str(id));
        dashed.insert(dashed_str(id));
        ancestor_plain.insert(plain_str(&swapped));
        ancestor_dashed.insert(dashed_str(&swapped));
        binary.insert(id.to_vec());
        ancestor_binary.insert(swapped.to_vec());
    }
    Ok(KnownIds {
        textual: vec![
            (IdKind::Plain.as_str(), plain),
            (IdKind::Dashed.as_str(), dashed),
            (IdKind::AncestorPlain.as_str(), ancestor_plain),
            (IdKind::AncestorDashed.as_str(), ancestor_dashed),
        ],
        binary: vec![
            (IdKind::Binary.as_str(), binary),
            ("ancestor-binary", ancestor_binary),
        ],
        count: ids.len(),
    })
}

/// Scan every column of a database for the known identifiers
pub fn scan_database(db: &Path, known: &KnownIds) -> Result<Vec<ScanFinding>> {
    let conn = Connection::open_with_flags(db, OpenFlags::SQLITE_OPEN_READ_ONLY)?;
    info!("scanning {}", db.display());
    let mut findings = Vec::new();
    for table in user_tables(&conn)? {
        for column in table_columns(&conn, &table)? {
            let encodings = scan_column(&conn, &table, &column, known)?;
            if !encodings.is_empty() {
                findings.push(ScanFinding {
                    table: table.clone(),
                    column,
                    encodings,
                });
            }
        }
    }
    findings.sort_by(|a, b| (&a.table, &a.column).cmp(&(&b.table, &b.column)));
    Ok(findings)
}

/// Check one column's distinct values against every encoding family
///
/// A family is reported at most once per column, with the occurrence kind
/// of the first value it was seen in. Once every family has been seen the
/// remaining rows are skipped.
fn scan_column(
    conn: &Connection,
    table: &str,
    column: &str,
    known: &KnownIds,
) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(&format!("SELECT DISTINCT \"{column}\" FROM \"{table}\""))?;
    let mut rows = stmt.query([])?;
    let mut found: BTreeMap<&'static str, Occurrence> = BTreeMap::new();
    while let Some(row) = rows.next()? {
        if found.len() == known.families() {
            break;
        }
        match row.get_ref(0)? {
            ValueRef::Text(t) => {
                let Ok(text) = std::str::from_utf8(t) else {
                    continue;
                };
                let (occurrence, candidates) = id_candidates(text);
                record_textual(&mut found, known, occurrence, &candidates);
            }
            ValueRef::Blob(b) => {
                for (name, values) in &known.binary {
                    if !found.contains_key(name) && values.contains(b) {
                        found.insert(name, Occurrence::Pure);
                    }
                }
                // Text encodings may hide inside serialized blob content.
                let candidates = blob_candidates(b);
                record_textual(&mut found, known, Occurrence::Embedded, &candidates);
            }
            _ => {}
        }
    }
    Ok(found
        .iter()
        .map(|(name, occurrence)| format!("{name} ({})", occurrence.as_str()))
        .collect())
}

fn record_textual(
    found: &mut BTreeMap<&'static str, Occurrence>,
    known: &KnownIds,
    occurrence: Occurrence,
    candidates: &HashSet<String>,
) {
    if candidates.is_empty() {
        return;
    }
    for (name, values) in &known.textual {
        if !found.contains_key(name) && candidates.iter().any(|c| values.contains(c)) {
            found.insert(name, occurrence);
        }
    }
}

/// Runs of at least 32 chars from `[0-9a-f-]`, plus whether the whole
/// value is such a run
fn id_candidates(value: &str) -> (Occurrence, HashSet<String>) {
    let cleaned: String = value
        .chars()
        .map(|c| {
            if matches!(c, '0'..='9' | 'a'..='f' | '-') {
                c
            } else {
                ' '
            }
        })
        .collect();
    let occurrence = if cleaned == value {
        Occurrence::Pure
    } else {
        Occurrence::Embedded
    };
    let candidates = cleaned
        .split(' ')
        .filter(|piece| piece.len() >= 32)
        .map(str::to_string)
        .collect();
    (occurrence, candidates)
}

fn blob_candidates(bytes: &[u8]) -> HashSet<String> {
    let cleaned: String = bytes
        .iter()
        .map(|&b| {
            if matches!(b, b'0'..=b'9' | b'a'..=b'f' | b'-') {
                b as char
            } else {
                ' '
            }
        })
        .collect();
    cleaned
        .split(' ')
        .filter(|piece| piece.len() >= 32)
        .map(str::to_string)
        .collect()
}

/// Render findings as an aligned text table with a header row
pub fn render_report(findings: &[ScanFinding]) -> String {
    let mut rows = vec![[
        "Table".to_string(),
        "Column".to_string(),
        "Identifier encodings found".to_string(),
    ]];
    for f in findings {
        rows.push([f.table.clone(), f.column.clone(), f.encodings.join(", ")]);
    }
    let mut widths = [0usize; 2];
    for row in &rows {
        widths[0] = widths[0].max(row[0].len());
        widths[1] = widths[1].max(row[1].len());
    }
    let mut out = String::new();
    for row in &rows {
        let _ = writeln!(
            out,
            "{:<w0$}  {:<w1$}  {}",
            row[0],
            row[1],
            row[2],
            w0 = widths[0],
            w1 = widths[1]
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::params;
    use std::path::PathBuf;

    // 833addde992893e93d0572907f8b4cad; its ancestor form regroups the
    // first eight bytes to dedd3a832899e993...
    const ID: Guid = [
        0x83, 0x3a, 0xdd, 0xde, 0x99, 0x28, 0x93, 0xe9, 0x3d, 0x05, 0x72, 0x90, 0x7f, 0x8b, 0x4c,
        0xad,
    ];

    fn library_db(dir: &Path) -> PathBuf {
        let path = dir.join("library.db");
        let conn = Connection::open(&path).unwrap();
        conn.execute("CREATE TABLE TypedBaseItems (guid BLOB PRIMARY KEY)", [])
            .unwrap();
        conn.execute(
            "INSERT INTO TypedBaseItems (guid) VALUES (?1)",
            params![ID.to_vec()],
        )
        .unwrap();
        path
    }

    #[test]
    fn test_scan_reports_encodings_and_occurrence() {
        let dir = tempfile::tempdir().unwrap();
        let known = load_known_ids(&library_db(dir.path()), &Library::default()).unwrap();
        assert_eq!(known.len(), 1);

        let scan_path = dir.path().join("plugin.db");
        let conn = Connection::open(&scan_path).unwrap();
        conn.execute(
            "CREATE TABLE refs (
                pure_dashed TEXT,
                embedded_plain TEXT,
                raw BLOB,
                noise TEXT
            )",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO refs VALUES (?1, ?2, ?3, ?4)",
            params![
                "833addde-9928-93e9-3d05-72907f8b4cad",
                r#"{"id":"833addde992893e93d0572907f8b4cad"}"#,
                ID.to_vec(),
                "/media/movies/file.mkv",
            ],
        )
        .unwrap();
        drop(conn);

        let findings = scan_database(&scan_path, &known).unwrap();
        assert_eq!(findings.len(), 3);
        assert_eq!(findings[0].column, "embedded_plain");
        assert_eq!(findings[0].encodings, vec!["plain (embedded)"]);
        assert_eq!(findings[1].column, "pure_dashed");
        assert_eq!(findings[1].encodings, vec!["dashed (pure)"]);
        assert_eq!(findings[2].column, "raw");
        assert_eq!(findings[2].encodings, vec!["binary (pure)"]);
    }

    #[test]
    fn test_ancestor_encodings_are_recognized() {
        let dir = tempfile::tempdir().unwrap();
        let known = load_known_ids(&library_db(dir.path()), &Library::default()).unwrap();

        let scan_path = dir.path().join("other.db");
        let conn = Connection::open(&scan_path).unwrap();
        conn.execute("CREATE TABLE a (ancestor TEXT, ancestor_raw BLOB)", [])
            .unwrap();
        conn.execute(
            "INSERT INTO a VALUES (?1, ?2)",
            params![
                "dedd3a832899e9933d0572907f8b4cad",
                ancestor_swap(&ID).to_vec(),
            ],
        )
        .unwrap();
        drop(conn);

        let findings = scan_database(&scan_path, &known).unwrap();
        assert_eq!(findings.len(), 2);
        assert_eq!(findings[0].encodings, vec!["ancestor-plain (pure)"]);
        assert_eq!(findings[1].encodings, vec!["ancestor-binary (pure)"]);
    }

    #[test]
    fn test_candidate_extraction() {
        let (occurrence, candidates) =
            id_candidates(r#"{"id":"833addde992893e93d0572907f8b4cad"}"#);
        assert_eq!(occurrence, Occurrence::Embedded);
        assert!(candidates.contains("833addde992893e93d0572907f8b4cad"));

        let (occurrence, candidates) = id_candidates("833addde-9928-93e9-3d05-72907f8b4cad");
        assert_eq!(occurrence, Occurrence::Pure);
        assert_eq!(candidates.len(), 1);

        let (_, candidates) = id_candidates("deadbeef");
        assert!(candidates.is_empty());
    }

    #[test]
    fn test_render_report_aligns_columns() {
        let findings = vec![
            ScanFinding {
                table: "items".to_string(),
                column: "guid".to_string(),
                encodings: vec!["binary (pure)".to_string()],
            },
            ScanFinding {
                table: "chapters".to_string(),
                column: "ItemId".to_string(),
                encodings: vec!["plain (embedded)".to_string(), "dashed (pure)".to_string()],
            },
        ];
        let report = render_report(&findings);
        let lines: Vec<&str> = report.lines().collect();
        assert_eq!(lines[0], "Table     Column  Identifier encodings found");
        assert_eq!(lines[1], "items     guid    binary (pure)");
        assert_eq!(lines[2], "chapters  ItemId  plain (embedded), dashed (pure)");
    }
}
