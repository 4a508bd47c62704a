//! Per-import texture naming.
//!
//! Names are handed out by an [`ImportNamespace`] owned by the caller. Two imports
//! only see each other's names when they are given the same namespace.

use std::collections::HashMap;
use std::fmt;

use serde::Serialize;

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Stable identity of an imported file, derived from its normalised path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct SourceId(u64);

impl SourceId {
    pub fn from_path(path: &str) -> SourceId {
        let normalized = normalize_source_path(path);
        let mut hash = FNV_OFFSET;
        for byte in normalized.bytes() {
            hash ^= byte as u64;
            hash = hash.wrapping_mul(FNV_PRIME);
        }
        SourceId(hash)
    }

    /// Ten hex digit token used in texture names.
    pub fn token(&self) -> String {
        format!("{:016x}", self.0)[..10].to_string()
    }

    pub fn short_token(&self) -> String {
        self.token()[..6].to_string()
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.token())
    }
}

fn normalize_source_path(path: &str) -> String {
    let unified = path.replace('\\', "/");
    let mut parts: Vec<&str> = Vec::new();
    for part in unified.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }
    let mut out = parts.join("/").to_lowercase();
    if unified.starts_with('/') {
        out.insert(0, '/');
    }
    out
}

/// Last path component, accepting either separator.
fn file_name(path: &str) -> &str {
    path.rsplit(['/', '\\']).next().unwrap_or(path)
}

/// File stem of a container path with the palette and slot suffixes removed.
pub fn emb_stem_from_path(path: &str) -> String {
    let base = file_name(path).to_string();
    let mut stem = match base.rfind('.') {
        Some(dot) if dot > 0 => base[..dot].to_string(),
        _ => base,
    };
    for suffix in [".dyt", "_dyt", "_000"] {
        if stem.to_lowercase().ends_with(suffix) {
            stem.truncate(stem.len() - suffix.len());
        }
    }
    stem
}

/// True for palette containers (`*.dyt.emb`, `*_dyt.emb`).
pub fn is_dyt_path(path: &str) -> bool {
    let base = file_name(path).to_lowercase();
    let stem = base.strip_suffix(".emb").unwrap_or(&base);
    stem.ends_with(".dyt") || stem.ends_with("_dyt")
}

/// `{source}_{texture}`, unless the texture name already carries the source prefix.
pub fn build_image_name(source_stem: &str, entry_name: &str, entry_index: usize) -> String {
    let base = Some(file_name(entry_name))
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| format!("EMB_{:03}.dds", entry_index));
    let tex = match base.rfind('.') {
        Some(dot) if dot > 0 => &base[..dot],
        _ => base.as_str(),
    };
    if source_stem.is_empty() {
        return tex.to_string();
    }
    let prefix = format!("{}_", source_stem.to_lowercase());
    if tex.to_lowercase().starts_with(&prefix) {
        tex.to_string()
    } else {
        format!("{}_{}", source_stem, tex)
    }
}

/// Who claimed a name: the source file, the slot inside it and, for palette
/// variants, the row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NameOwner {
    pub source: SourceId,
    pub slot: usize,
    pub row: Option<u32>,
}

impl NameOwner {
    pub fn entry(source: SourceId, slot: usize) -> Self {
        Self {
            source,
            slot,
            row: None,
        }
    }

    pub fn variant(source: SourceId, slot: usize, row: u32) -> Self {
        Self {
            source,
            slot,
            row: Some(row),
        }
    }
}

#[derive(Debug, Default)]
pub struct ImportNamespace {
    names: HashMap<String, NameOwner>,
}

impl ImportNamespace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn owner(&self, name: &str) -> Option<NameOwner> {
        self.names.get(name).copied()
    }

    /// Claim `clean_name` for `owner`, or the first free `_{token}` / `_{token}_{n}`
    /// variant when another source already holds it. Claiming again for the same
    /// owner returns the same name.
    pub fn claim(&mut self, clean_name: &str, owner: NameOwner) -> String {
        let token = owner.source.short_token();
        let mut candidate = clean_name.to_string();
        let mut attempt = 0usize;
        loop {
            match self.names.get(&candidate) {
                None => {
                    self.names.insert(candidate.clone(), owner);
                    return candidate;
                }
                Some(existing) if *existing == owner => return candidate,
                Some(_) => {
                    attempt += 1;
                    candidate = if attempt == 1 {
                        format!("{}_{}", clean_name, token)
                    } else {
                        format!("{}_{}_{}", clean_name, token, attempt)
                    };
                }
            }
        }
    }
}
