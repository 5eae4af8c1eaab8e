//! Read-only reporting queries consumed by front-ends.

use rusqlite::{OptionalExtension, params};

use crate::error::{Error, Result};
use crate::types::{LibrarySummary, MatchType, ReleaseStatus};

use super::Store;

impl Store {
    pub fn library_summaries(&self) -> Result<Vec<LibrarySummary>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT l.name, l.root_path, s.short_name, l.last_scan_at,
                    (SELECT COUNT(*) FROM scanned_files sf WHERE sf.library_id = l.id),
                    (SELECT COUNT(DISTINCT m.scanned_file_id)
                     FROM matches m
                     JOIN scanned_files sf ON sf.id = m.scanned_file_id
                     WHERE sf.library_id = l.id)
             FROM libraries l
             JOIN systems s ON s.id = l.system_id
             ORDER BY l.name",
        )?;
        let rows = stmt.query_map([], |r| {
            Ok(LibrarySummary {
                name: r.get(0)?,
                root_path: r.get(1)?,
                system: r.get(2)?,
                last_scan_at: r.get(3)?,
                file_count: r.get::<_, i64>(4)? as u64,
                matched_count: r.get::<_, i64>(5)? as u64,
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// One row per release in the system, with its match state in the given
    /// library.
    pub fn release_statuses(&self, system_id: i64, library_id: i64) -> Result<Vec<ReleaseStatus>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT r.id, r.name, r.is_preferred, r.ignore_reason,
                    (SELECT m.match_type FROM matches m
                     JOIN rom_entries re ON re.id = m.rom_entry_id
                     JOIN scanned_files sf ON sf.id = m.scanned_file_id
                     WHERE re.release_id = r.id AND sf.library_id = ?2
                     ORDER BY m.id LIMIT 1)
             FROM releases r
             WHERE r.system_id = ?1
             ORDER BY r.name",
        )?;
        let rows = stmt.query_map(params![system_id, library_id], release_status_from_row)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// The 1G1R view: preferred releases that are also matched in the
    /// library, ordered by name.
    pub fn preferred_matched(&self, library_id: i64) -> Result<Vec<ReleaseStatus>> {
        let library_system: i64 = self
            .conn
            .prepare_cached("SELECT system_id FROM libraries WHERE id = ?1")?
            .query_row(params![library_id], |r| r.get(0))
            .optional()?
            .ok_or_else(|| Error::not_found("library", library_id.to_string()))?;

        let statuses = self.release_statuses(library_system, library_id)?;
        Ok(statuses
            .into_iter()
            .filter(|s| s.is_preferred && s.matched)
            .collect())
    }
}

fn release_status_from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<ReleaseStatus> {
    let match_type: Option<String> = r.get(4)?;
    let match_type = match_type.as_deref().and_then(MatchType::parse);
    Ok(ReleaseStatus {
        release_id: r.get(0)?,
        name: r.get(1)?,
        is_preferred: r.get::<_, i64>(2)? != 0,
        ignore_reason: r.get(3)?,
        matched: match_type.is_some(),
        match_type,
    })
}
