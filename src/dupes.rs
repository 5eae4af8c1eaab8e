use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::names;
use crate::store::{LibraryRow, Store};
use crate::types::MatchType;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DuplicateKind {
    /// Same non-empty SHA-1.
    Exact,
    /// Matched to releases sharing a base title.
    Variant,
    /// Several files matched to one rom entry.
    Package,
}

impl DuplicateKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DuplicateKind::Exact => "exact",
            DuplicateKind::Variant => "variant",
            DuplicateKind::Package => "package",
        }
    }
}

/// One member of a duplicate group, with the keep decision already made.
#[derive(Debug, Clone, Serialize)]
pub struct DuplicateFile {
    pub file_id: i64,
    pub path: String,
    pub archive_path: String,
    pub size: i64,
    pub match_type: Option<MatchType>,
    pub flags: Option<String>,
    pub release_name: Option<String>,
    pub is_preferred: bool,
}

/// A group of at least two files considered copies of each other.
#[derive(Debug, Clone, Serialize)]
pub struct Duplicate {
    pub kind: DuplicateKind,
    pub key: String,
    pub files: Vec<DuplicateFile>,
}

/// All duplicate groups for a library: exact, then variant, then package.
/// Within each kind groups are ordered by key, files by id, so output is
/// deterministic for identical inputs.
pub fn find_duplicates(store: &Store, library: &LibraryRow) -> Result<Vec<Duplicate>> {
    let files = store.scanned_files(library.id)?;
    let matches = store.matches_for_library(library.id)?;

    let mut rom_release: HashMap<i64, i64> = HashMap::new();
    let mut rom_names: HashMap<i64, String> = HashMap::new();
    for entry in store.rom_entries_for_system(library.system_id)? {
        rom_release.insert(entry.id, entry.release_id);
        rom_names.insert(entry.id, entry.name);
    }
    let mut release_names: HashMap<i64, String> = HashMap::new();
    for release in store.releases_for_system(library.system_id)? {
        release_names.insert(release.id, release.name);
    }

    let mut match_by_file: HashMap<i64, (i64, MatchType, Option<String>)> = HashMap::new();
    for m in &matches {
        match_by_file
            .entry(m.scanned_file_id)
            .or_insert((m.rom_entry_id, m.match_type, m.flags.clone()));
    }

    let describe = |file: &crate::store::ScannedFileRow| -> DuplicateFile {
        let matched = match_by_file.get(&file.id);
        let release_name = matched
            .and_then(|(rom_id, _, _)| rom_release.get(rom_id))
            .and_then(|release_id| release_names.get(release_id))
            .cloned();
        DuplicateFile {
            file_id: file.id,
            path: file.path.clone(),
            archive_path: file.archive_path.clone(),
            size: file.size,
            match_type: matched.map(|(_, t, _)| *t),
            flags: matched.and_then(|(_, _, f)| f.clone()),
            release_name,
            is_preferred: false,
        }
    };

    let mut groups = Vec::new();

    // Exact: shared non-empty SHA-1.
    let mut by_sha1: BTreeMap<String, Vec<DuplicateFile>> = BTreeMap::new();
    for file in &files {
        if file.sha1.is_empty() {
            continue;
        }
        by_sha1
            .entry(file.sha1.clone())
            .or_default()
            .push(describe(file));
    }
    collect_groups(&mut groups, DuplicateKind::Exact, by_sha1);

    // Variant: matched releases with the same normalized base title.
    let mut by_title: BTreeMap<String, Vec<DuplicateFile>> = BTreeMap::new();
    for file in &files {
        let described = describe(file);
        let Some(release_name) = described.release_name.as_deref() else {
            continue;
        };
        let key = names::normalize(&names::base_title(release_name));
        if key.is_empty() {
            continue;
        }
        by_title.entry(key).or_default().push(described);
    }
    collect_groups(&mut groups, DuplicateKind::Variant, by_title);

    // Package: several files bound to one rom entry.
    let mut by_entry: BTreeMap<String, Vec<DuplicateFile>> = BTreeMap::new();
    for file in &files {
        let Some((rom_id, _, _)) = match_by_file.get(&file.id) else {
            continue;
        };
        let key = rom_names
            .get(rom_id)
            .cloned()
            .unwrap_or_else(|| rom_id.to_string());
        by_entry
            .entry(format!("{rom_id}:{key}"))
            .or_default()
            .push(describe(file));
    }
    collect_groups(&mut groups, DuplicateKind::Package, by_entry);

    Ok(groups)
}

fn collect_groups(
    out: &mut Vec<Duplicate>,
    kind: DuplicateKind,
    grouped: BTreeMap<String, Vec<DuplicateFile>>,
) {
    for (key, mut files) in grouped {
        if files.len() < 2 {
            continue;
        }
        files.sort_by_key(|f| f.file_id);
        mark_keep(&mut files);
        out.push(Duplicate { kind, key, files });
    }
}

/// Highest keep score wins; the earliest file wins ties.
fn mark_keep(files: &mut [DuplicateFile]) {
    let mut best = 0usize;
    let mut best_score = keep_score(&files[0]);
    for (i, file) in files.iter().enumerate().skip(1) {
        let score = keep_score(file);
        if score > best_score {
            best = i;
            best_score = score;
        }
    }
    files[best].is_preferred = true;
}

/// Match confidence, penalized for status flags and deep directory nesting.
fn keep_score(file: &DuplicateFile) -> i64 {
    let mut score = match file.match_type {
        Some(MatchType::Sha1) => 100,
        Some(MatchType::Crc32) => 80,
        Some(MatchType::Name) => 50,
        Some(MatchType::NameModified) => 20,
        None => 0,
    };
    if file.flags.as_deref().is_some_and(|f| !f.is_empty()) {
        score -= 10;
    }
    let dirname = Path::new(&file.path)
        .parent()
        .map(|p| p.to_string_lossy().len())
        .unwrap_or(0);
    score -= (dirname / 10) as i64;
    score
}
