// src/containers/sqlite.rs

//! Relational container adapter
//!
//! Visits the cells a job's schema declares, in two passes run at
//! different phases of a migration:
//!
//! - the path pass rewrites `path` cells through the rule engine and
//!   `embedded-structure` cells through the embedded codec. Cells keep
//!   their storage class (a BLOB stays a BLOB) and only changed cells are
//!   written.
//! - the identifier pass rewrites id cells through the registry. Distinct
//!   old values are updated in first-seen row order; when an update trips
//!   a uniqueness constraint the rows carrying the late value are deleted,
//!   each logged with its full field list first.
//!
//! Each pass wraps its container in one transaction, so a failed run
//! leaves the container as it was.

use rusqlite::types::{Value, ValueRef};
use rusqlite::{Connection, ErrorCode, Transaction, params};
use std::collections::HashSet;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::{FieldRole, ValueRewriter, embedded};
use crate::config::{Schema, TableSchema};
use crate::diag::{Coordinate, Diagnostic, DiagnosticKind, Diagnostics};
use crate::error::{Error, Result};
use crate::ids::{IdKind, IdRegistry};

/// Outcome counters for one container's identifier pass
#[derive(Debug, Default, Clone, Copy)]
pub struct IdPassStats {
    /// Cells updated to a new identifier
    pub updated: u64,
    /// Rows deleted by the keep-first collision policy
    pub deleted: u64,
}

/// Rewrite path and embedded cells in place; returns changed-cell count
pub fn process_paths(
    conn: &mut Connection,
    container: &str,
    schema: &Schema,
    rewriter: &mut dyn ValueRewriter,
) -> Result<u64> {
    let tx = conn.transaction()?;
    let mut changed = 0u64;
    for (table, columns) in schema {
        changed += process_table_paths(&tx, container, table, columns, rewriter)?;
    }
    tx.commit()?;
    Ok(changed)
}

fn process_table_paths(
    tx: &Transaction<'_>,
    container: &str,
    table: &str,
    columns: &TableSchema,
    rewriter: &mut dyn ValueRewriter,
) -> Result<u64> {
    let value_cols = columns
        .iter()
        .filter(|(_, role)| role.is_value_role())
        .map(|(col, role)| (col.as_str(), *role))
        .collect::<Vec<_>>();
    if value_cols.is_empty() {
        return Ok(0);
    }
    if !table_exists(tx, table)? {
        warn!("table '{table}' not present in '{container}', skipping");
        return Ok(0);
    }

    let total: i64 = tx.query_row(&format!("SELECT COUNT(*) FROM \"{table}\""), [], |r| {
        r.get(0)
    })?;
    let select = format!(
        "SELECT rowid, {} FROM \"{table}\"",
        value_cols
            .iter()
            .map(|(col, _)| format!("\"{col}\""))
            .collect::<Vec<_>>()
            .join(", ")
    );

    let mut updates: Vec<(String, i64, Value)> = Vec::new();
    {
        let mut stmt = tx.prepare(&select)?;
        let mut rows = stmt.query([])?;
        let mut scanned = 0i64;
        let mut last_log = Instant::now();
        while let Some(row) = rows.next()? {
            scanned += 1;
            let rowid: i64 = row.get(0)?;
            for (i, (col, role)) in value_cols.iter().enumerate() {
                let value_ref = row.get_ref(i + 1)?;
                let (text, is_blob) = match value_ref {
                    ValueRef::Text(b) => match std::str::from_utf8(b) {
                        Ok(s) => (s, false),
                        Err(_) => continue,
                    },
                    ValueRef::Blob(b) => match std::str::from_utf8(b) {
                        Ok(s) => (s, true),
                        Err(_) => continue,
                    },
                    _ => continue,
                };
                let at = Coordinate::Cell {
                    table: table.to_string(),
                    column: col.to_string(),
                    rowid,
                };
                let new = match role {
                    FieldRole::Path => rewriter.rewrite(text, &at).filter(|n| n != text),
                    FieldRole::EmbeddedStructure => {
                        embedded::rewrite_cell(text, &mut |v| rewriter.rewrite(v, &at)).map_err(
                            |e| Error::Embedded {
                                container: container.to_string(),
                                location: at.to_string(),
                                reason: e.to_string(),
                            },
                        )?
                    }
                    _ => None,
                };
                if let Some(new) = new {
                    let value = if is_blob {
                        Value::Blob(new.into_bytes())
                    } else {
                        Value::Text(new)
                    };
                    updates.push((col.to_string(), rowid, value));
                }
            }
            if last_log.elapsed() >= Duration::from_secs(1) {
                info!("{table}: scanned {scanned}/{total} rows");
                last_log = Instant::now();
            }
        }
    }

    let changed = updates.len() as u64;
    for (col, rowid, value) in updates {
        tx.execute(
            &format!("UPDATE \"{table}\" SET \"{col}\" = ?1 WHERE rowid = ?2"),
            params![value, rowid],
        )?;
    }
    if changed > 0 {
        debug!("{table}: rewrote {changed} cells");
    }
    Ok(changed)
}

/// Rewrite identifier cells through the registry
pub fn process_ids(
    conn: &mut Connection,
    container: &str,
    schema: &Schema,
    registry: &IdRegistry,
    diags: &mut Diagnostics,
) -> Result<IdPassStats> {
    let tx = conn.transaction()?;
    let mut stats = IdPassStats::default();
    for (table, columns) in schema {
        let id_cols = columns
            .iter()
            .filter_map(|(col, role)| role.id_kind().map(|kind| (col.as_str(), kind)))
            .collect::<Vec<_>>();
        if id_cols.is_empty() {
            continue;
        }
        if !table_exists(&tx, table)? {
            warn!("table '{table}' not present in '{container}', skipping");
            continue;
        }
        for (col, kind) in id_cols {
            let (updated, deleted) = match kind {
                IdKind::Binary => {
                    let mut counts = (0, 0);
                    for old in distinct_blobs(&tx, table, col)? {
                        let Some(new) = registry.resolve_binary(&old) else {
                            continue;
                        };
                        let (u, d) = update_id_value(
                            &tx,
                            container,
                            table,
                            col,
                            Value::Blob(new),
                            Value::Blob(old),
                            diags,
                        )?;
                        counts = (counts.0 + u, counts.1 + d);
                    }
                    counts
                }
                _ => {
                    let mut counts = (0, 0);
                    for old in distinct_texts(&tx, table, col)? {
                        let Some(new) = registry.resolve_text(kind, &old) else {
                            continue;
                        };
                        let (u, d) = update_id_value(
                            &tx,
                            container,
                            table,
                            col,
                            Value::Text(new),
                            Value::Text(old),
                            diags,
                        )?;
                        counts = (counts.0 + u, counts.1 + d);
                    }
                    counts
                }
            };
            stats.updated += updated;
            stats.deleted += deleted;
            if updated + deleted > 0 {
                debug!("{table}.{col}: {updated} cells updated, {deleted} rows deleted");
            }
        }
    }
    tx.commit()?;
    Ok(stats)
}

/// Update every row holding `old`, falling back to the keep-first policy
fn update_id_value(
    tx: &Transaction<'_>,
    container: &str,
    table: &str,
    col: &str,
    new: Value,
    old: Value,
    diags: &mut Diagnostics,
) -> Result<(u64, u64)> {
    let sql = format!("UPDATE \"{table}\" SET \"{col}\" = ?1 WHERE \"{col}\" = ?2");
    match tx.execute(&sql, params![new, old]) {
        Ok(n) => Ok((n as u64, 0)),
        Err(e) if e.sqlite_error_code() == Some(ErrorCode::ConstraintViolation) => {
            // Another row already owns the new identifier; this row's item
            // merged into it. Log what the doomed rows held, then drop them.
            let doomed = rows_matching(tx, table, col, &old)?;
            for (rowid, fields) in &doomed {
                diags.report(Diagnostic {
                    kind: DiagnosticKind::DuplicateRowDeleted,
                    container: container.to_string(),
                    location: Coordinate::Cell {
                        table: table.to_string(),
                        column: col.to_string(),
                        rowid: *rowid,
                    },
                    value: fields.clone(),
                });
            }
            let deleted = tx.execute(
                &format!("DELETE FROM \"{table}\" WHERE \"{col}\" = ?1"),
                params![old],
            )?;
            Ok((0, deleted as u64))
        }
        Err(e) => Err(e.into()),
    }
}

/// Distinct text values of a column, in first-seen row order
fn distinct_texts(tx: &Transaction<'_>, table: &str, col: &str) -> Result<Vec<String>> {
    let mut stmt = tx.prepare(&format!("SELECT \"{col}\" FROM \"{table}\" ORDER BY rowid"))?;
    let mut rows = stmt.query([])?;
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        if let ValueRef::Text(b) = row.get_ref(0)? {
            if let Ok(s) = std::str::from_utf8(b) {
                if seen.insert(s.to_string()) {
                    out.push(s.to_string());
                }
            }
        }
    }
    Ok(out)
}

/// Distinct BLOB values of a column, in first-seen row order
fn distinct_blobs(tx: &Transaction<'_>, table: &str, col: &str) -> Result<Vec<Vec<u8>>> {
    let mut stmt = tx.prepare(&format!("SELECT \"{col}\" FROM \"{table}\" ORDER BY rowid"))?;
    let mut rows = stmt.query([])?;
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        if let ValueRef::Blob(b) = row.get_ref(0)? {
            if seen.insert(b.to_vec()) {
                out.push(b.to_vec());
            }
        }
    }
    Ok(out)
}

/// Rows whose `col` equals `value`, each rendered as `name=value` pairs
fn rows_matching(
    tx: &Transaction<'_>,
    table: &str,
    col: &str,
    value: &Value,
) -> Result<Vec<(i64, String)>> {
    let sql = format!("SELECT rowid, * FROM \"{table}\" WHERE \"{col}\" = ?1");
    let mut stmt = tx.prepare(&sql)?;
    let names = stmt
        .column_names()
        .iter()
        .map(|n| n.to_string())
        .collect::<Vec<_>>();
    let mut rows = stmt.query(params![value])?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        let rowid: i64 = row.get(0)?;
        let mut fields = Vec::with_capacity(names.len().saturating_sub(1));
        for (i, name) in names.iter().enumerate().skip(1) {
            fields.push(format!("{}={}", name, display_value(row.get_ref(i)?)));
        }
        out.push((rowid, fields.join(", ")));
    }
    Ok(out)
}

fn display_value(v: ValueRef<'_>) -> String {
    match v {
        ValueRef::Null => "NULL".to_string(),
        ValueRef::Integer(i) => i.to_string(),
        ValueRef::Real(f) => f.to_string(),
        ValueRef::Text(b) => format!("'{}'", String::from_utf8_lossy(b)),
        ValueRef::Blob(b) => format!("x'{}'", hex::encode(b)),
    }
}

pub fn table_exists(conn: &Connection, table: &str) -> Result<bool> {
    let n: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
        params![table],
        |r| r.get(0),
    )?;
    Ok(n > 0)
}

/// Application tables of a database, sorted by name
pub fn user_tables(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
    )?;
    let tables = stmt
        .query_map([], |r| r.get(0))?
        .collect::<std::result::Result<Vec<String>, _>>()?;
    Ok(tables)
}

/// Column names of a table, in declaration order
pub fn table_columns(conn: &Connection, table: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT name FROM pragma_table_info(?1)")?;
    let columns = stmt
        .query_map(params![table], |r| r.get(0))?
        .collect::<std::result::Result<Vec<String>, _>>()?;
    Ok(columns)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::containers::PrefixRewriter;
    use crate::detect::PathDetector;
    use crate::ids::{derive_id, parse_plain, plain_str};
    use crate::rules::{ReplacementRule, RuleSet};
    use std::collections::BTreeMap;

    fn schema(table: &str, cols: &[(&str, FieldRole)]) -> Schema {
        let mut columns = BTreeMap::new();
        for (c, r) in cols {
            columns.insert(c.to_string(), *r);
        }
        let mut s = Schema::new();
        s.insert(table.to_string(), columns);
        s
    }

    fn items_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE items (path TEXT, data BLOB, images TEXT);
             CREATE TABLE streams (item_id TEXT, path TEXT);",
        )
        .unwrap();
        conn
    }

    #[test]
    fn test_path_pass_rewrites_declared_cells() {
        let mut conn = items_db();
        conn.execute(
            "INSERT INTO items VALUES (?1, ?2, ?3)",
            params![
                "F:\\Filme\\Abc (2010)\\movie.mkv",
                Value::Blob(br#"{"Path": "F:\\Filme\\Abc (2010)\\movie.mkv"}"#.to_vec()),
                "F:\\Filme\\Abc (2010)\\poster.jpg*123*Primary",
            ],
        )
        .unwrap();
        conn.execute("INSERT INTO items VALUES (NULL, NULL, NULL)", [])
            .unwrap();

        let rules = RuleSet::new(vec![ReplacementRule::new("F:/Filme", "/data/movies")]);
        let detector = PathDetector::default();
        let mut diags = Diagnostics::default();
        let mut rw = PrefixRewriter {
            rules: &rules,
            detector: &detector,
            diags: &mut diags,
            container: "library.db".to_string(),
            quiet: false,
        };
        let schema = schema(
            "items",
            &[
                ("path", FieldRole::Path),
                ("data", FieldRole::EmbeddedStructure),
                ("images", FieldRole::EmbeddedStructure),
            ],
        );
        let changed = process_paths(&mut conn, "library.db", &schema, &mut rw).unwrap();
        assert_eq!(changed, 3);

        let path: String = conn
            .query_row("SELECT path FROM items WHERE rowid = 1", [], |r| r.get(0))
            .unwrap();
        assert_eq!(path, "/data/movies/Abc (2010)/movie.mkv");
        // Embedded JSON stayed a BLOB and still parses.
        let data: Vec<u8> = conn
            .query_row("SELECT data FROM items WHERE rowid = 1", [], |r| r.get(0))
            .unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&data).unwrap();
        assert_eq!(parsed["Path"], "/data/movies/Abc (2010)/movie.mkv");
        let images: String = conn
            .query_row("SELECT images FROM items WHERE rowid = 1", [], |r| r.get(0))
            .unwrap();
        assert_eq!(images, "/data/movies/Abc (2010)/poster.jpg*123*Primary");
        assert!(diags.is_empty());
    }

    #[test]
    fn test_path_pass_reports_unresolved_and_keeps_value() {
        let mut conn = items_db();
        conn.execute(
            "INSERT INTO items (path) VALUES ('C:\\Weird\\NoRuleHere\\file.dat')",
            [],
        )
        .unwrap();
        let rules = RuleSet::new(vec![ReplacementRule::new("F:/Filme", "/data/movies")]);
        let detector = PathDetector::default();
        let mut diags = Diagnostics::default();
        let mut rw = PrefixRewriter {
            rules: &rules,
            detector: &detector,
            diags: &mut diags,
            container: "library.db".to_string(),
            quiet: false,
        };
        let schema = schema("items", &[("path", FieldRole::Path)]);
        let changed = process_paths(&mut conn, "library.db", &schema, &mut rw).unwrap();
        assert_eq!(changed, 0);
        assert_eq!(diags.len(), 1);
        let kept: String = conn
            .query_row("SELECT path FROM items", [], |r| r.get(0))
            .unwrap();
        assert_eq!(kept, "C:\\Weird\\NoRuleHere\\file.dat");
    }

    #[test]
    fn test_malformed_embedded_cell_is_fatal() {
        let mut conn = items_db();
        conn.execute("INSERT INTO items (data) VALUES ('{\"broken\": ')", [])
            .unwrap();
        let rules = RuleSet::new(vec![]);
        let detector = PathDetector::default();
        let mut diags = Diagnostics::default();
        let mut rw = PrefixRewriter {
            rules: &rules,
            detector: &detector,
            diags: &mut diags,
            container: "library.db".to_string(),
            quiet: false,
        };
        let schema = schema("items", &[("data", FieldRole::EmbeddedStructure)]);
        let err = process_paths(&mut conn, "library.db", &schema, &mut rw).unwrap_err();
        assert!(matches!(err, Error::Embedded { .. }));
    }

    #[test]
    fn test_id_pass_updates_all_referencing_rows() {
        let mut conn = items_db();
        let old = derive_id("T", "/old/a");
        let new = derive_id("T", "/new/a");
        conn.execute(
            "INSERT INTO streams VALUES (?1, '/x'), (?1, '/y'), ('ffffffffffffffffffffffffffffffff', '/z')",
            params![plain_str(&old)],
        )
        .unwrap();

        let mut registry = IdRegistry::default();
        registry.insert(old, new, "/old/a", "/new/a");
        let schema = schema("streams", &[("item_id", FieldRole::PlainId)]);
        let mut diags = Diagnostics::default();
        let stats = process_ids(&mut conn, "library.db", &schema, &registry, &mut diags).unwrap();
        assert_eq!(stats.updated, 2);
        assert_eq!(stats.deleted, 0);

        let n: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM streams WHERE item_id = ?1",
                params![plain_str(&new)],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(n, 2);
        // The unknown identifier was left alone.
        let unknown: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM streams WHERE item_id = 'ffffffffffffffffffffffffffffffff'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(unknown, 1);
    }

    #[test]
    fn test_id_pass_keeps_first_row_on_collision() {
        let mut conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE things (guid BLOB UNIQUE, name TEXT)")
            .unwrap();
        let old_a = parse_plain("aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa").unwrap();
        let old_b = parse_plain("bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb").unwrap();
        let merged = derive_id("T", "/merged/path");
        conn.execute(
            "INSERT INTO things VALUES (?1, 'first'), (?2, 'second')",
            params![Value::Blob(old_a.to_vec()), Value::Blob(old_b.to_vec())],
        )
        .unwrap();

        let mut registry = IdRegistry::default();
        registry.insert(old_a, merged, "/old/a", "/merged/path");
        registry.insert(old_b, merged, "/old/b", "/merged/path");

        let schema = schema("things", &[("guid", FieldRole::BinaryId)]);
        let mut diags = Diagnostics::default();
        let stats = process_ids(&mut conn, "library.db", &schema, &registry, &mut diags).unwrap();
        assert_eq!(stats.updated, 1);
        assert_eq!(stats.deleted, 1);

        // The row seen first kept the merged identifier; the other is gone
        // and its fields were reported.
        let survivor: String = conn
            .query_row("SELECT name FROM things", [], |r| r.get(0))
            .unwrap();
        assert_eq!(survivor, "first");
        assert_eq!(diags.len(), 1);
        assert_eq!(diags.entries()[0].kind, DiagnosticKind::DuplicateRowDeleted);
        assert!(diags.entries()[0].value.contains("name='second'"));
    }

    #[test]
    fn test_missing_table_is_skipped() {
        let mut conn = items_db();
        let rules = RuleSet::new(vec![]);
        let detector = PathDetector::default();
        let mut diags = Diagnostics::default();
        let mut rw = PrefixRewriter {
            rules: &rules,
            detector: &detector,
            diags: &mut diags,
            container: "other.db".to_string(),
            quiet: false,
        };
        let schema = schema("not_there", &[("path", FieldRole::Path)]);
        assert_eq!(
            process_paths(&mut conn, "other.db", &schema, &mut rw).unwrap(),
            0
        );
    }

    #[test]
    fn test_table_and_column_listing() {
        let conn = items_db();
        assert_eq!(user_tables(&conn).unwrap(), vec!["items", "streams"]);
        assert_eq!(
            table_columns(&conn, "items").unwrap(),
            vec!["path", "data", "images"]
        );
    }
}
