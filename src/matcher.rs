use std::collections::HashMap;
use std::path::Path;

use crate::error::Result;
use crate::names::{self, NameInfo};
use crate::store::{LibraryRow, NewMatch, Store};
use crate::types::MatchType;

/// Hash-keyed candidate index over a system's rom entries. Candidate lists
/// stay sorted by rom-entry id so tier collisions resolve deterministically
/// to the lowest id.
struct EntryIndex {
    sha1: HashMap<String, Vec<i64>>,
    crc32: HashMap<String, Vec<i64>>,
    name: HashMap<String, Vec<i64>>,
}

impl EntryIndex {
    fn build(store: &Store, system_id: i64) -> Result<EntryIndex> {
        let mut index = EntryIndex {
            sha1: HashMap::new(),
            crc32: HashMap::new(),
            name: HashMap::new(),
        };
        // Entries arrive ordered by id, so each candidate list is ordered.
        for entry in store.rom_entries_for_system(system_id)? {
            if let Some(sha1) = entry.sha1.as_deref() {
                if !sha1.is_empty() {
                    index
                        .sha1
                        .entry(sha1.to_ascii_lowercase())
                        .or_default()
                        .push(entry.id);
                }
            }
            if let Some(crc) = entry.crc32.as_deref() {
                if !crc.is_empty() {
                    index
                        .crc32
                        .entry(crc.to_ascii_lowercase())
                        .or_default()
                        .push(entry.id);
                }
            }
            let normalized = names::normalize(&entry.name);
            if !normalized.is_empty() {
                index.name.entry(normalized).or_default().push(entry.id);
            }
        }
        Ok(index)
    }

    fn first(map: &HashMap<String, Vec<i64>>, key: &str) -> Option<i64> {
        map.get(key).and_then(|ids| ids.first()).copied()
    }
}

/// Rebuild the library's matches from scratch. The delete and the inserts
/// share one transaction, so a failure leaves no partial match set.
/// Returns `(matches_found, unmatched_files)`.
pub fn rebuild_matches(store: &mut Store, library: &LibraryRow) -> Result<(u64, u64)> {
    let files = store.scanned_files(library.id)?;
    let index = EntryIndex::build(store, library.system_id)?;

    let mut matches = Vec::new();
    let mut unmatched = 0u64;
    for file in &files {
        let found = match_file(&index, &file.sha1, &file.crc32, &file.path, &file.archive_path);
        match found {
            Some((rom_entry_id, match_type, flags)) => matches.push(NewMatch {
                scanned_file_id: file.id,
                rom_entry_id,
                match_type,
                flags,
            }),
            None => unmatched += 1,
        }
    }

    store.replace_matches(library.id, &matches)?;
    Ok((matches.len() as u64, unmatched))
}

/// Tiered match: SHA-1, then CRC-32, then normalized file name. First hit
/// wins.
fn match_file(
    index: &EntryIndex,
    sha1: &str,
    crc32: &str,
    path: &str,
    archive_path: &str,
) -> Option<(i64, MatchType, Option<String>)> {
    if !sha1.is_empty() {
        if let Some(id) = EntryIndex::first(&index.sha1, &sha1.to_ascii_lowercase()) {
            return Some((id, MatchType::Sha1, None));
        }
    }
    if !crc32.is_empty() {
        if let Some(id) = EntryIndex::first(&index.crc32, &crc32.to_ascii_lowercase()) {
            return Some((id, MatchType::Crc32, None));
        }
    }

    let basename = file_basename(path, archive_path);
    let normalized = names::normalize(basename);
    if normalized.is_empty() {
        return None;
    }
    let id = EntryIndex::first(&index.name, &normalized)?;

    let info = NameInfo::parse(basename);
    let flags = info.status_flags();
    let flags = (!flags.is_empty()).then_some(flags);
    let match_type = if info.is_modified() || info.is_problematic() {
        MatchType::NameModified
    } else {
        MatchType::Name
    };
    Some((id, match_type, flags))
}

/// Zip entries match on their in-archive name, plain files on their
/// filesystem basename.
fn file_basename<'a>(path: &'a str, archive_path: &'a str) -> &'a str {
    let effective = if archive_path.is_empty() {
        path
    } else {
        archive_path
    };
    Path::new(effective)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(effective)
}
