// src/containers/embedded.rs

//! Codecs for serialized values nested inside table cells
//!
//! Two cell layouts carry paths:
//!
//! - a nested key/value tree (JSON): item metadata blobs whose leaf string
//!   values may be paths. Cells are application-written and must survive a
//!   rewrite byte-for-byte except for the substrings that actually change,
//!   so the scanner below copies the raw text through and re-encodes only
//!   string values the rewriter modified. Keys are never offered for
//!   rewriting.
//! - an image-metadata record: `|`-separated entries of `*`-separated
//!   fields, `path*modified*kind*width*height*blurhash`. Only the leading
//!   path field is rewritten; the remaining fields (including blurhashes,
//!   which may contain any separator-ish character) are reassembled
//!   verbatim.
//!
//! The layout is sniffed from the first non-space byte: `{` or `[` means
//! tree, anything else is treated as an image record.

use std::fmt;

/// A cell declared as an embedded structure that does not parse as one
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MalformedValue {
    /// Byte offset into the cell
    pub offset: usize,
    pub reason: &'static str,
}

impl fmt::Display for MalformedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "byte {}: {}", self.offset, self.reason)
    }
}

impl std::error::Error for MalformedValue {}

type ScanResult<T> = std::result::Result<T, MalformedValue>;

/// Rewrite an embedded cell, dispatching on its layout
///
/// Returns `Ok(None)` when nothing changed, so the caller keeps the
/// original bytes.
pub fn rewrite_cell(
    input: &str,
    rewrite: &mut dyn FnMut(&str) -> Option<String>,
) -> ScanResult<Option<String>> {
    match input.trim_start().as_bytes().first() {
        Some(b'{') | Some(b'[') => rewrite_tree(input, rewrite),
        _ => Ok(rewrite_image_records(input, rewrite)),
    }
}

enum Ctx {
    Obj { next_is_key: bool },
    Arr,
}

/// Rewrite string values inside a JSON tree, preserving layout exactly
///
/// Everything that is not a changed string value (keys, numbers, literals,
/// whitespace, punctuation, unchanged strings with their original escaping)
/// is copied through verbatim. Malformed input is an error; a corrupted
/// cell must stop the run before the container is half-written.
pub fn rewrite_tree(
    input: &str,
    rewrite: &mut dyn FnMut(&str) -> Option<String>,
) -> ScanResult<Option<String>> {
    let bytes = input.as_bytes();
    let mut out = String::with_capacity(input.len());
    let mut stack: Vec<Ctx> = Vec::new();
    let mut changed = false;
    let mut seg_start = 0usize;
    let mut i = 0usize;

    while i < bytes.len() {
        match bytes[i] {
            b'"' => {
                let end = scan_string(bytes, i)?;
                let is_key = matches!(stack.last(), Some(Ctx::Obj { next_is_key: true }));
                if is_key {
                    i = end;
                    continue;
                }
                let raw = &input[i..end];
                let decoded = decode_string(raw, i)?;
                match rewrite(&decoded) {
                    Some(new) if new != decoded => {
                        out.push_str(&input[seg_start..i]);
                        encode_string(&new, &mut out);
                        seg_start = end;
                        changed = true;
                    }
                    _ => {}
                }
                i = end;
            }
            b'{' => {
                stack.push(Ctx::Obj { next_is_key: true });
                i += 1;
            }
            b'[' => {
                stack.push(Ctx::Arr);
                i += 1;
            }
            b'}' => {
                match stack.pop() {
                    Some(Ctx::Obj { .. }) => {}
                    _ => {
                        return Err(MalformedValue {
                            offset: i,
                            reason: "unbalanced '}'",
                        });
                    }
                }
                i += 1;
            }
            b']' => {
                match stack.pop() {
                    Some(Ctx::Arr) => {}
                    _ => {
                        return Err(MalformedValue {
                            offset: i,
                            reason: "unbalanced ']'",
                        });
                    }
                }
                i += 1;
            }
            b':' => {
                if let Some(Ctx::Obj { next_is_key }) = stack.last_mut() {
                    *next_is_key = false;
                }
                i += 1;
            }
            b',' => {
                if let Some(Ctx::Obj { next_is_key }) = stack.last_mut() {
                    *next_is_key = true;
                }
                i += 1;
            }
            _ => i += 1,
        }
    }
    if !stack.is_empty() {
        return Err(MalformedValue {
            offset: input.len(),
            reason: "unterminated value",
        });
    }
    if !changed {
        return Ok(None);
    }
    out.push_str(&input[seg_start..]);
    Ok(Some(out))
}

/// Rewrite the path field of each image-record entry
pub fn rewrite_image_records(
    input: &str,
    rewrite: &mut dyn FnMut(&str) -> Option<String>,
) -> Option<String> {
    let mut changed = false;
    let entries = input
        .split('|')
        .map(|entry| {
            if entry.is_empty() {
                return String::new();
            }
            let fields = entry.split('*').collect::<Vec<_>>();
            match rewrite(fields[0]) {
                Some(path) if path != fields[0] => {
                    changed = true;
                    let mut rebuilt = path;
                    for field in &fields[1..] {
                        rebuilt.push('*');
                        rebuilt.push_str(field);
                    }
                    rebuilt
                }
                _ => entry.to_string(),
            }
        })
        .collect::<Vec<_>>()
        .join("|");
    changed.then_some(entries)
}

/// Index just past the closing quote of the string starting at `start`
fn scan_string(bytes: &[u8], start: usize) -> ScanResult<usize> {
    let mut i = start + 1;
    while i < bytes.len() {
        match bytes[i] {
            b'"' => return Ok(i + 1),
            b'\\' => i += 2,
            _ => i += 1,
        }
    }
    Err(MalformedValue {
        offset: start,
        reason: "unterminated string",
    })
}

fn read_hex4(it: &mut std::str::Chars<'_>, offset: usize) -> ScanResult<u32> {
    let mut v = 0u32;
    for _ in 0..4 {
        let d = it
            .next()
            .and_then(|c| c.to_digit(16))
            .ok_or(MalformedValue {
                offset,
                reason: "invalid \\u escape",
            })?;
        v = v * 16 + d;
    }
    Ok(v)
}

/// Decode a raw string token (quotes included) into its value
fn decode_string(raw: &str, offset: usize) -> ScanResult<String> {
    let inner = &raw[1..raw.len() - 1];
    if !inner.contains('\\') {
        return Ok(inner.to_string());
    }
    let mut out = String::with_capacity(inner.len());
    let mut it = inner.chars();
    while let Some(c) = it.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match it.next() {
            Some('"') => out.push('"'),
            Some('\\') => out.push('\\'),
            Some('/') => out.push('/'),
            Some('b') => out.push('\u{0008}'),
            Some('f') => out.push('\u{000C}'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('t') => out.push('\t'),
            Some('u') => {
                let hi = read_hex4(&mut it, offset)?;
                let ch = if (0xD800..0xDC00).contains(&hi) {
                    if it.next() != Some('\\') || it.next() != Some('u') {
                        return Err(MalformedValue {
                            offset,
                            reason: "lone high surrogate",
                        });
                    }
                    let lo = read_hex4(&mut it, offset)?;
                    if !(0xDC00..0xE000).contains(&lo) {
                        return Err(MalformedValue {
                            offset,
                            reason: "invalid surrogate pair",
                        });
                    }
                    char::from_u32(0x10000 + ((hi - 0xD800) << 10) + (lo - 0xDC00))
                } else if (0xDC00..0xE000).contains(&hi) {
                    return Err(MalformedValue {
                        offset,
                        reason: "lone low surrogate",
                    });
                } else {
                    char::from_u32(hi)
                };
                match ch {
                    Some(ch) => out.push(ch),
                    None => {
                        return Err(MalformedValue {
                            offset,
                            reason: "invalid \\u escape",
                        });
                    }
                }
            }
            _ => {
                return Err(MalformedValue {
                    offset,
                    reason: "invalid escape",
                });
            }
        }
    }
    Ok(out)
}

/// Encode a string value as a JSON token, minimal escaping
fn encode_string(value: &str, out: &mut String) {
    use fmt::Write;
    out.push('"');
    for c in value.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\u{0008}' => out.push_str("\\b"),
            '\u{000C}' => out.push_str("\\f"),
            c if (c as u32) < 0x20 => {
                // write! to a String cannot fail
                let _ = write!(out, "\\u{:04x}", c as u32);
            }
            c => out.push(c),
        }
    }
    out.push('"');
}
