use std::fmt;

use serde::{Deserialize, Serialize};

/// Catalogue source families, classified from the DAT header.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum SourceKind {
    NoIntro,
    Redump,
    Tosec,
    Mame,
    Other,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::NoIntro => "no-intro",
            SourceKind::Redump => "redump",
            SourceKind::Tosec => "tosec",
            SourceKind::Mame => "mame",
            SourceKind::Other => "other",
        }
    }

    pub fn from_str(s: &str) -> SourceKind {
        match s {
            "no-intro" => SourceKind::NoIntro,
            "redump" => SourceKind::Redump,
            "tosec" => SourceKind::Tosec,
            "mame" => SourceKind::Mame,
            _ => SourceKind::Other,
        }
    }

    /// Default priority per source family; lower wins when several catalogues
    /// cover the same system.
    pub fn default_priority(&self) -> i64 {
        match self {
            SourceKind::NoIntro => 10,
            SourceKind::Redump => 20,
            SourceKind::Mame => 30,
            SourceKind::Tosec => 40,
            SourceKind::Other => 100,
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a scanned file was bound to a rom entry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MatchType {
    Sha1,
    Crc32,
    Name,
    NameModified,
}

impl MatchType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchType::Sha1 => "sha1",
            MatchType::Crc32 => "crc32",
            MatchType::Name => "name",
            MatchType::NameModified => "name_modified",
        }
    }

    pub fn parse(s: &str) -> Option<MatchType> {
        match s {
            "sha1" => Some(MatchType::Sha1),
            "crc32" => Some(MatchType::Crc32),
            "name" => Some(MatchType::Name),
            "name_modified" => Some(MatchType::NameModified),
            _ => None,
        }
    }
}

impl fmt::Display for MatchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of importing one DAT file.
#[derive(Debug, Clone, Serialize)]
pub struct ImportResult {
    pub system_id: i64,
    pub system: String,
    pub source_kind: SourceKind,
    pub games_imported: u64,
    pub games_skipped: u64,
    pub roms_imported: u64,
    pub parents_resolved: u64,
    pub is_new_system: bool,
    pub is_new_source: bool,
    pub skipped: bool,
}

/// Outcome of scanning one library.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScanResult {
    pub files_scanned: u64,
    pub files_hashed: u64,
    pub files_skipped: u64,
    pub matches_found: u64,
    pub unmatched_files: u64,
}

/// One registered library with aggregate counts, for listings.
#[derive(Debug, Clone, Serialize)]
pub struct LibrarySummary {
    pub name: String,
    pub root_path: String,
    pub system: String,
    pub file_count: u64,
    pub matched_count: u64,
    pub last_scan_at: Option<i64>,
}

/// Per-release report row: what the catalogue expects and whether the
/// library has it.
#[derive(Debug, Clone, Serialize)]
pub struct ReleaseStatus {
    pub release_id: i64,
    pub name: String,
    pub is_preferred: bool,
    pub ignore_reason: Option<String>,
    pub matched: bool,
    pub match_type: Option<MatchType>,
}
