// src/ids.rs

//! Identifier derivation, surface encodings, and the rename registry
//!
//! The migrated system derives an item's 16-byte identifier from its
//! logical path: MD5 over the UTF-16-LE encoding of `entity_type +
//! logical_path` (the semantics of .NET's `Encoding.Unicode`). Moving a
//! file therefore changes its identifier, and every container that stores
//! the identifier, in any encoding, must be updated to match.
//!
//! One canonical value appears under five surface encodings:
//!
//! | kind             | example                                |
//! |------------------|----------------------------------------|
//! | `plain`          | `833addde992893e93d0572907f8b4cad`     |
//! | `dashed`         | `833addde-9928-93e9-3d05-72907f8b4cad` |
//! | `ancestor-plain` | `dedd3a832899e9933d0572907f8b4cad`     |
//! | `ancestor-dashed`| `dedd3a83-2899-e993-3d05-72907f8b4cad` |
//! | `binary`         | the 16 raw bytes (BLOB cells)          |
//!
//! Ancestor encodings regroup the first eight bytes in the order
//! `3,2,1,0,5,4,7,6`, the little-endian field layout of a .NET GUID. The
//! regrouping is an involution, so the same swap decodes and encodes.
//!
//! The registry tracks only identifiers that actually changed. Because the
//! new identifier is a function of the new path, two items whose paths
//! become equal receive the same identifier; such groups are reported and
//! later deduplicated by the relational identifier pass.

use md5::{Digest, Md5};
use std::collections::HashMap;
use std::fmt;

use crate::rules::SlashStyle;

/// Canonical identifier value
pub type Guid = [u8; 16];

/// Surface encoding of an identifier at a container location
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IdKind {
    /// 32 lowercase hex chars
    Plain,
    /// Hex grouped 8-4-4-4-12
    Dashed,
    /// Hex of the byte-swapped value
    AncestorPlain,
    /// Dashed hex of the byte-swapped value
    AncestorDashed,
    /// 16 raw bytes
    Binary,
}

impl IdKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Plain => "plain",
            Self::Dashed => "dashed",
            Self::AncestorPlain => "ancestor-plain",
            Self::AncestorDashed => "ancestor-dashed",
            Self::Binary => "binary",
        }
    }

    /// True for the encodings that can occur inside textual path values
    pub const fn is_textual(&self) -> bool {
        !matches!(self, Self::Binary)
    }
}

impl fmt::Display for IdKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Derive the identifier an item gets for a given type tag and logical path
pub fn derive_id(entity_type: &str, logical_path: &str) -> Guid {
    let mut bytes = Vec::with_capacity((entity_type.len() + logical_path.len()) * 2);
    for unit in entity_type
        .encode_utf16()
        .chain(logical_path.encode_utf16())
    {
        bytes.extend_from_slice(&unit.to_le_bytes());
    }
    Md5::digest(&bytes).into()
}

/// Regroup the first eight bytes into .NET GUID order (involution)
pub fn ancestor_swap(id: &Guid) -> Guid {
    let mut out = *id;
    out[0] = id[3];
    out[1] = id[2];
    out[2] = id[1];
    out[3] = id[0];
    out[4] = id[5];
    out[5] = id[4];
    out[6] = id[7];
    out[7] = id[6];
    out
}

/// Encode as 32 lowercase hex chars
pub fn plain_str(id: &Guid) -> String {
    hex::encode(id)
}

/// Encode as dashed hex (8-4-4-4-12)
pub fn dashed_str(id: &Guid) -> String {
    let h = hex::encode(id);
    format!(
        "{}-{}-{}-{}-{}",
        &h[..8],
        &h[8..12],
        &h[12..16],
        &h[16..20],
        &h[20..]
    )
}

/// Parse 32 hex chars into a canonical value
pub fn parse_plain(value: &str) -> Option<Guid> {
    if value.len() != 32 {
        return None;
    }
    let bytes = hex::decode(value).ok()?;
    bytes.try_into().ok()
}

/// Parse dashed hex, validating the 8-4-4-4-12 grouping
pub fn parse_dashed(value: &str) -> Option<Guid> {
    if value.len() != 36 {
        return None;
    }
    let parts = value.split('-').collect::<Vec<_>>();
    if parts.len() != 5 {
        return None;
    }
    let lens = [8, 4, 4, 4, 12];
    if parts.iter().zip(lens).any(|(p, l)| p.len() != l) {
        return None;
    }
    parse_plain(&parts.concat())
}

/// One source item that was renamed onto a new identifier
#[derive(Debug, Clone)]
pub struct CollisionMember {
    pub old_id: Guid,
    pub old_path: String,
}

/// All source items whose new paths collapsed onto one identifier
#[derive(Debug, Clone)]
pub struct CollisionGroup {
    pub new_id: Guid,
    pub new_path: String,
    pub members: Vec<CollisionMember>,
}

/// Canonical old → new identifier mapping for one migration run
///
/// Populated once from the id-defining container, read-only afterwards.
/// Identifiers that did not change are absent, so a failed lookup means
/// "leave the value alone".
#[derive(Debug, Default)]
pub struct IdRegistry {
    forward: HashMap<Guid, Guid>,
    by_new: HashMap<Guid, CollisionGroup>,
}

impl IdRegistry {
    /// Record one renamed item
    pub fn insert(&mut self, old: Guid, new: Guid, old_path: &str, new_path: &str) {
        if old == new {
            return;
        }
        self.forward.insert(old, new);
        self.by_new
            .entry(new)
            .or_insert_with(|| CollisionGroup {
                new_id: new,
                new_path: new_path.to_string(),
                members: Vec::new(),
            })
            .members
            .push(CollisionMember {
                old_id: old,
                old_path: old_path.to_string(),
            });
    }

    pub fn len(&self) -> usize {
        self.forward.len()
    }

    pub fn is_empty(&self) -> bool {
        self.forward.is_empty()
    }

    /// Map a BLOB cell holding an old identifier to its new value
    pub fn resolve_binary(&self, value: &[u8]) -> Option<Vec<u8>> {
        let old: Guid = value.try_into().ok()?;
        self.forward.get(&old).map(|n| n.to_vec())
    }

    /// Map a textual cell holding an old identifier to its new value
    ///
    /// The value is decoded according to `kind`, looked up canonically, and
    /// re-encoded in the same kind, so ancestor-encoded foreign keys resolve
    /// through the referenced item's rename transparently. Values that do
    /// not parse as `kind`, or identifiers that did not change, yield `None`.
    pub fn resolve_text(&self, kind: IdKind, value: &str) -> Option<String> {
        let old = match kind {
            IdKind::Plain => parse_plain(value)?,
            IdKind::Dashed => parse_dashed(value)?,
            IdKind::AncestorPlain => ancestor_swap(&parse_plain(value)?),
            IdKind::AncestorDashed => ancestor_swap(&parse_dashed(value)?),
            IdKind::Binary => return None,
        };
        let new = self.forward.get(&old)?;
        Some(match kind {
            IdKind::Plain => plain_str(new),
            IdKind::Dashed => dashed_str(new),
            IdKind::AncestorPlain => plain_str(&ancestor_swap(new)),
            IdKind::AncestorDashed => dashed_str(&ancestor_swap(new)),
            IdKind::Binary => unreachable!(),
        })
    }

    /// Groups of two or more old identifiers that merged onto one new one
    pub fn collision_groups(&self) -> Vec<&CollisionGroup> {
        let mut groups = self
            .by_new
            .values()
            .filter(|g| g.members.len() > 1)
            .collect::<Vec<_>>();
        groups.sort_by_key(|g| g.new_id);
        groups
    }

    /// Old → new map across every textual encoding, for id-in-path rewriting
    pub fn path_tokens(&self) -> HashMap<String, String> {
        let mut tokens = HashMap::with_capacity(self.forward.len() * 4);
        for (old, new) in &self.forward {
            tokens.insert(plain_str(old), plain_str(new));
            tokens.insert(dashed_str(old), dashed_str(new));
            let (old_a, new_a) = (ancestor_swap(old), ancestor_swap(new));
            tokens.insert(plain_str(&old_a), plain_str(&new_a));
            tokens.insert(dashed_str(&old_a), dashed_str(&new_a));
        }
        tokens
    }
}

fn is_id_component(s: &str) -> bool {
    !s.is_empty()
        && s.chars()
            .all(|c| matches!(c, '0'..='9' | 'a'..='f' | '-'))
}

/// Rewrite an identifier occurring as a component of a path string
///
/// Items store their artwork and metadata under directories named after
/// their identifier, typically nested below a short prefix directory:
/// `.../83/833addde…cad/poster.jpg`. When the identifier changed, the
/// component is replaced, and a preceding component that is a prefix of the
/// old identifier is replaced by the same-length prefix of the new one. A
/// file whose stem is an identifier (`…/833addde…cad.xml`) is renamed the
/// same way. At most one occurrence is rewritten; paths hold one item's id.
pub fn rewrite_id_path(
    value: &str,
    tokens: &HashMap<String, String>,
    slash: SlashStyle,
) -> Option<String> {
    let leading = value
        .chars()
        .take_while(|c| *c == '/' || *c == '\\')
        .count();
    let mut comps = value
        .split(['/', '\\'])
        .filter(|c| !c.is_empty())
        .map(str::to_string)
        .collect::<Vec<_>>();
    if comps.is_empty() {
        return None;
    }

    let mut changed = false;
    let last = comps.len() - 1;
    let (stem, suffix) = match comps[last].rfind('.') {
        Some(i) => (comps[last][..i].to_string(), comps[last][i..].to_string()),
        None => (comps[last].clone(), String::new()),
    };
    if is_id_component(&stem) {
        if let Some(new) = tokens.get(&stem) {
            comps[last] = format!("{new}{suffix}");
            changed = true;
        }
    }
    if !changed {
        for i in 0..last {
            if !is_id_component(&comps[i]) {
                continue;
            }
            let Some(new) = tokens.get(&comps[i]) else {
                continue;
            };
            let new = new.clone();
            let old = std::mem::replace(&mut comps[i], new.clone());
            if i > 0 && !comps[i - 1].is_empty() && old.starts_with(comps[i - 1].as_str()) {
                let parent_len = comps[i - 1].len();
                comps[i - 1] = new[..parent_len].to_string();
            }
            changed = true;
            break;
        }
    }
    if !changed {
        return None;
    }

    let slash = slash.as_char();
    let mut out = String::with_capacity(value.len() + 8);
    for _ in 0..leading {
        out.push(slash);
    }
    out.push_str(&comps.join(&slash.to_string()));
    Some(out)
}
