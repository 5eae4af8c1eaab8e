pub mod queries;
pub mod schema;

use std::path::Path;

use rusqlite::{Connection, OpenFlags, OptionalExtension, Transaction, params};

use crate::dat::DatGame;
use crate::error::{Error, Result};
use crate::types::{MatchType, SourceKind};

const BUSY_TIMEOUT_MS: u64 = 30_000;

/// Owner of all persistent state. Everything else in the crate works with
/// ephemeral views of these rows.
#[derive(Debug)]
pub struct Store {
    conn: Connection,
}

#[derive(Debug, Clone)]
pub struct SystemRow {
    pub id: i64,
    pub short_name: String,
    pub display_name: String,
    pub dat_name: Option<String>,
    pub dat_version: Option<String>,
    pub dat_date: Option<String>,
}

#[derive(Debug, Clone)]
pub struct DatSourceRow {
    pub id: i64,
    pub system_id: i64,
    pub kind: SourceKind,
    pub path: String,
    pub sha256: String,
    pub priority: i64,
}

#[derive(Debug, Clone)]
pub struct ReleaseRow {
    pub id: i64,
    pub system_id: i64,
    pub name: String,
    pub description: Option<String>,
    pub clone_of: Option<String>,
    pub parent_id: Option<i64>,
    pub year: Option<String>,
    pub manufacturer: Option<String>,
    pub is_bios: bool,
    pub is_device: bool,
    pub is_mechanical: bool,
    pub is_preferred: bool,
    pub ignore_reason: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RomEntryRow {
    pub id: i64,
    pub release_id: i64,
    pub name: String,
    pub size: Option<i64>,
    pub sha1: Option<String>,
    pub crc32: Option<String>,
    pub md5: Option<String>,
}

#[derive(Debug, Clone)]
pub struct LibraryRow {
    pub id: i64,
    pub name: String,
    pub root_path: String,
    pub system_id: i64,
    pub last_scan_at: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct ScannedFileRow {
    pub id: i64,
    pub library_id: i64,
    pub path: String,
    pub archive_path: String,
    pub size: i64,
    pub mtime: i64,
    pub sha1: String,
    pub crc32: String,
    pub scanned_at: i64,
}

#[derive(Debug, Clone)]
pub struct MatchRow {
    pub id: i64,
    pub scanned_file_id: i64,
    pub rom_entry_id: i64,
    pub match_type: MatchType,
    pub flags: Option<String>,
}

/// Row payload for the scanner's batched upserts.
#[derive(Debug, Clone)]
pub struct ScannedFileUpsert {
    pub path: String,
    pub archive_path: String,
    pub size: i64,
    pub mtime: i64,
    pub sha1: String,
    pub crc32: String,
}

/// Row payload for the matcher's rewrite.
#[derive(Debug, Clone)]
pub struct NewMatch {
    pub scanned_file_id: i64,
    pub rom_entry_id: i64,
    pub match_type: MatchType,
    pub flags: Option<String>,
}

impl Store {
    /// Open or create the database, configure the connection, and run any
    /// pending migrations. Opening an already-current store is a no-op.
    pub fn open(path: &Path) -> Result<Store> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.is_dir() {
                return Err(Error::Config(format!(
                    "store directory does not exist: {}",
                    parent.display()
                )));
            }
        }
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE,
        )
        .map_err(|e| Error::Config(format!("cannot open store at {}: {e}", path.display())))?;
        Store::from_connection(conn)
    }

    /// In-memory store for tests.
    pub fn open_in_memory() -> Result<Store> {
        Store::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(mut conn: Connection) -> Result<Store> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        // In-memory stores report "memory" here; on-disk stores switch to WAL.
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.busy_timeout(std::time::Duration::from_millis(BUSY_TIMEOUT_MS))?;
        schema::apply_migrations(&mut conn)?;
        Ok(Store { conn })
    }

    /// Transactional scope with guaranteed release: the transaction rolls
    /// back on drop unless the closure completes and the commit succeeds.
    pub fn with_tx<T>(&mut self, f: impl FnOnce(&Transaction<'_>) -> Result<T>) -> Result<T> {
        let tx = self.conn.transaction()?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }

    // ------------------------------------------------------------------
    // Systems

    pub fn find_system(&self, short_name: &str) -> Result<Option<SystemRow>> {
        self.conn
            .prepare_cached(
                "SELECT id, short_name, display_name, dat_name, dat_version, dat_date
                 FROM systems WHERE short_name = ?1",
            )?
            .query_row(params![short_name], system_from_row)
            .optional()
            .map_err(Error::from)
    }

    pub fn get_system(&self, id: i64) -> Result<SystemRow> {
        self.conn
            .prepare_cached(
                "SELECT id, short_name, display_name, dat_name, dat_version, dat_date
                 FROM systems WHERE id = ?1",
            )?
            .query_row(params![id], system_from_row)
            .optional()?
            .ok_or_else(|| Error::not_found("system", id.to_string()))
    }

    pub fn list_systems(&self) -> Result<Vec<SystemRow>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT id, short_name, display_name, dat_name, dat_version, dat_date
             FROM systems ORDER BY short_name",
        )?;
        let rows = stmt.query_map([], system_from_row)?;
        collect(rows)
    }

    /// Stub system for registering a library before its DAT exists.
    pub fn create_system(&mut self, short_name: &str) -> Result<SystemRow> {
        self.conn
            .execute(
                "INSERT INTO systems (short_name, display_name) VALUES (?1, ?1)",
                params![short_name],
            )
            .map_err(|e| Error::from_sqlite("system", short_name, e))?;
        self.find_system(short_name)?
            .ok_or_else(|| Error::not_found("system", short_name))
    }

    /// Imported catalogues for a system, best priority first.
    pub fn sources_for_system(&self, system_id: i64) -> Result<Vec<DatSourceRow>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT id, system_id, kind, path, sha256, priority
             FROM dat_sources WHERE system_id = ?1 ORDER BY priority, kind",
        )?;
        let rows = stmt.query_map(params![system_id], |r| {
            let kind: String = r.get(2)?;
            Ok(DatSourceRow {
                id: r.get(0)?,
                system_id: r.get(1)?,
                kind: SourceKind::from_str(&kind),
                path: r.get(3)?,
                sha256: r.get(4)?,
                priority: r.get(5)?,
            })
        })?;
        collect(rows)
    }

    // ------------------------------------------------------------------
    // Libraries

    pub fn create_library(&mut self, name: &str, root: &Path, system_id: i64) -> Result<LibraryRow> {
        self.conn
            .execute(
                "INSERT INTO libraries (name, root_path, system_id) VALUES (?1, ?2, ?3)",
                params![name, root.to_string_lossy(), system_id],
            )
            .map_err(|e| Error::from_sqlite("library", name, e))?;
        self.find_library(name)?
            .ok_or_else(|| Error::not_found("library", name))
    }

    pub fn find_library(&self, name: &str) -> Result<Option<LibraryRow>> {
        self.conn
            .prepare_cached(
                "SELECT id, name, root_path, system_id, last_scan_at
                 FROM libraries WHERE name = ?1",
            )?
            .query_row(params![name], library_from_row)
            .optional()
            .map_err(Error::from)
    }

    pub fn get_library(&self, name: &str) -> Result<LibraryRow> {
        self.find_library(name)?
            .ok_or_else(|| Error::not_found("library", name))
    }

    /// Cascades the library's scanned files (and their matches).
    pub fn remove_library(&mut self, name: &str) -> Result<()> {
        let changed = self
            .conn
            .execute("DELETE FROM libraries WHERE name = ?1", params![name])?;
        if changed == 0 {
            return Err(Error::not_found("library", name));
        }
        Ok(())
    }

    pub fn set_last_scan(&mut self, library_id: i64, timestamp: i64) -> Result<()> {
        self.conn.execute(
            "UPDATE libraries SET last_scan_at = ?2 WHERE id = ?1",
            params![library_id, timestamp],
        )?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Scanned files

    pub fn scanned_files(&self, library_id: i64) -> Result<Vec<ScannedFileRow>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT id, library_id, path, archive_path, size, mtime, sha1, crc32, scanned_at
             FROM scanned_files WHERE library_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![library_id], scanned_file_from_row)?;
        collect(rows)
    }

    /// One transaction per batch; conflicts on the unique key refresh the
    /// stored hashes and stamps.
    pub fn upsert_scanned_batch(
        &mut self,
        library_id: i64,
        batch: &[ScannedFileUpsert],
    ) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let scanned_at = chrono::Utc::now().timestamp();
        self.with_tx(|tx| {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO scanned_files
                    (library_id, path, archive_path, size, mtime, sha1, crc32, scanned_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT (library_id, path, archive_path) DO UPDATE SET
                    size = excluded.size,
                    mtime = excluded.mtime,
                    sha1 = excluded.sha1,
                    crc32 = excluded.crc32,
                    scanned_at = excluded.scanned_at",
            )?;
            for row in batch {
                stmt.execute(params![
                    library_id,
                    row.path,
                    row.archive_path,
                    row.size,
                    row.mtime,
                    row.sha1,
                    row.crc32,
                    scanned_at,
                ])?;
            }
            Ok(())
        })
    }

    /// Plain-file rows eligible for the post-scan prune check.
    pub fn plain_scanned_paths(&self, library_id: i64) -> Result<Vec<(i64, String)>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT id, path FROM scanned_files
             WHERE library_id = ?1 AND archive_path = '' ORDER BY id",
        )?;
        let rows = stmt.query_map(params![library_id], |r| Ok((r.get(0)?, r.get(1)?)))?;
        collect(rows)
    }

    pub fn delete_scanned_files(&mut self, ids: &[i64]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        self.with_tx(|tx| {
            let mut stmt = tx.prepare_cached("DELETE FROM scanned_files WHERE id = ?1")?;
            for id in ids {
                stmt.execute(params![id])?;
            }
            Ok(())
        })
    }

    // ------------------------------------------------------------------
    // Catalogue reads

    pub fn releases_for_system(&self, system_id: i64) -> Result<Vec<ReleaseRow>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT id, system_id, name, description, clone_of, parent_id, year, manufacturer,
                    is_bios, is_device, is_mechanical, is_preferred, ignore_reason
             FROM releases WHERE system_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![system_id], release_from_row)?;
        collect(rows)
    }

    pub fn find_release(&self, system_id: i64, name: &str) -> Result<Option<ReleaseRow>> {
        self.conn
            .prepare_cached(
                "SELECT id, system_id, name, description, clone_of, parent_id, year, manufacturer,
                        is_bios, is_device, is_mechanical, is_preferred, ignore_reason
                 FROM releases WHERE system_id = ?1 AND name = ?2",
            )?
            .query_row(params![system_id, name], release_from_row)
            .optional()
            .map_err(Error::from)
    }

    pub fn rom_entries_for_system(&self, system_id: i64) -> Result<Vec<RomEntryRow>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT re.id, re.release_id, re.name, re.size, re.sha1, re.crc32, re.md5
             FROM rom_entries re
             JOIN releases r ON r.id = re.release_id
             WHERE r.system_id = ?1
             ORDER BY re.id",
        )?;
        let rows = stmt.query_map(params![system_id], rom_entry_from_row)?;
        collect(rows)
    }

    // ------------------------------------------------------------------
    // Matches

    /// Atomic rewrite: a library's matches are deleted and reinserted in one
    /// transaction, so a failure leaves no partial set.
    pub fn replace_matches(&mut self, library_id: i64, matches: &[NewMatch]) -> Result<()> {
        self.with_tx(|tx| {
            tx.execute(
                "DELETE FROM matches WHERE scanned_file_id IN
                   (SELECT id FROM scanned_files WHERE library_id = ?1)",
                params![library_id],
            )?;
            let mut stmt = tx.prepare_cached(
                "INSERT INTO matches (scanned_file_id, rom_entry_id, match_type, flags)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT (scanned_file_id, rom_entry_id) DO UPDATE SET
                    match_type = excluded.match_type,
                    flags = excluded.flags",
            )?;
            for m in matches {
                stmt.execute(params![
                    m.scanned_file_id,
                    m.rom_entry_id,
                    m.match_type.as_str(),
                    m.flags,
                ])?;
            }
            Ok(())
        })
    }

    pub fn matches_for_library(&self, library_id: i64) -> Result<Vec<MatchRow>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT m.id, m.scanned_file_id, m.rom_entry_id, m.match_type, m.flags
             FROM matches m
             JOIN scanned_files sf ON sf.id = m.scanned_file_id
             WHERE sf.library_id = ?1
             ORDER BY m.id",
        )?;
        let rows = stmt.query_map(params![library_id], match_from_row)?;
        collect(rows)
    }

    // ------------------------------------------------------------------
    // Preferred selection

    /// `(release_id, is_preferred, ignore_reason)` updates in one transaction.
    pub fn apply_preferred(&mut self, updates: &[(i64, bool, Option<String>)]) -> Result<()> {
        self.with_tx(|tx| {
            let mut stmt = tx.prepare_cached(
                "UPDATE releases SET is_preferred = ?2, ignore_reason = ?3 WHERE id = ?1",
            )?;
            for (id, preferred, reason) in updates {
                stmt.execute(params![id, *preferred as i64, reason])?;
            }
            Ok(())
        })
    }

    pub fn preferred_releases(&self, system_id: i64) -> Result<Vec<ReleaseRow>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT id, system_id, name, description, clone_of, parent_id, year, manufacturer,
                    is_bios, is_device, is_mechanical, is_preferred, ignore_reason
             FROM releases WHERE system_id = ?1 AND is_preferred = 1 ORDER BY name",
        )?;
        let rows = stmt.query_map(params![system_id], release_from_row)?;
        collect(rows)
    }
}

// ----------------------------------------------------------------------
// Import-side operations, all running on the caller's transaction so a DAT
// imports atomically.

pub fn upsert_system(
    tx: &Transaction<'_>,
    short_name: &str,
    display_name: &str,
    dat_name: &str,
    dat_version: Option<&str>,
    dat_date: Option<&str>,
) -> Result<(i64, bool)> {
    let existing: Option<i64> = tx
        .prepare_cached("SELECT id FROM systems WHERE short_name = ?1")?
        .query_row(params![short_name], |r| r.get(0))
        .optional()?;
    match existing {
        Some(id) => {
            tx.execute(
                "UPDATE systems SET display_name = ?2, dat_name = ?3, dat_version = ?4,
                        dat_date = ?5 WHERE id = ?1",
                params![id, display_name, dat_name, dat_version, dat_date],
            )?;
            Ok((id, false))
        }
        None => {
            tx.execute(
                "INSERT INTO systems (short_name, display_name, dat_name, dat_version, dat_date)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![short_name, display_name, dat_name, dat_version, dat_date],
            )?;
            Ok((tx.last_insert_rowid(), true))
        }
    }
}

pub fn source_sha256(tx: &Transaction<'_>, system_id: i64, kind: SourceKind) -> Result<Option<String>> {
    tx.prepare_cached("SELECT sha256 FROM dat_sources WHERE system_id = ?1 AND kind = ?2")?
        .query_row(params![system_id, kind.as_str()], |r| r.get(0))
        .optional()
        .map_err(Error::from)
}

#[allow(clippy::too_many_arguments)]
pub fn upsert_source(
    tx: &Transaction<'_>,
    system_id: i64,
    kind: SourceKind,
    header_name: &str,
    header_version: Option<&str>,
    header_date: Option<&str>,
    path: &str,
    sha256: &str,
) -> Result<(i64, bool)> {
    let existing: Option<i64> = tx
        .prepare_cached("SELECT id FROM dat_sources WHERE system_id = ?1 AND kind = ?2")?
        .query_row(params![system_id, kind.as_str()], |r| r.get(0))
        .optional()?;
    let imported_at = chrono::Utc::now().timestamp();
    match existing {
        Some(id) => {
            tx.execute(
                "UPDATE dat_sources SET header_name = ?2, header_version = ?3, header_date = ?4,
                        path = ?5, sha256 = ?6, imported_at = ?7 WHERE id = ?1",
                params![id, header_name, header_version, header_date, path, sha256, imported_at],
            )?;
            Ok((id, false))
        }
        None => {
            tx.execute(
                "INSERT INTO dat_sources
                    (system_id, kind, header_name, header_version, header_date, path, sha256,
                     priority, imported_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    system_id,
                    kind.as_str(),
                    header_name,
                    header_version,
                    header_date,
                    path,
                    sha256,
                    kind.default_priority(),
                    imported_at,
                ],
            )?;
            Ok((tx.last_insert_rowid(), true))
        }
    }
}

/// Upsert one game's release row and replace its rom entries. Returns the
/// number of rom rows inserted.
pub fn upsert_release_with_roms(
    tx: &Transaction<'_>,
    system_id: i64,
    source_id: Option<i64>,
    game: &DatGame,
) -> Result<u64> {
    tx.prepare_cached(
        "INSERT INTO releases
            (system_id, source_id, name, description, clone_of, year, manufacturer,
             is_bios, is_device, is_mechanical)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
         ON CONFLICT (system_id, name) DO UPDATE SET
            source_id = excluded.source_id,
            description = excluded.description,
            clone_of = excluded.clone_of,
            year = excluded.year,
            manufacturer = excluded.manufacturer,
            is_bios = excluded.is_bios,
            is_device = excluded.is_device,
            is_mechanical = excluded.is_mechanical",
    )?
    .execute(params![
        system_id,
        source_id,
        game.name,
        game.description,
        game.clone_of,
        game.year,
        game.manufacturer,
        game.is_bios as i64,
        game.is_device as i64,
        game.is_mechanical as i64,
    ])?;

    let release_id: i64 = tx
        .prepare_cached("SELECT id FROM releases WHERE system_id = ?1 AND name = ?2")?
        .query_row(params![system_id, game.name], |r| r.get(0))?;

    tx.prepare_cached("DELETE FROM rom_entries WHERE release_id = ?1")?
        .execute(params![release_id])?;

    let mut insert = tx.prepare_cached(
        "INSERT INTO rom_entries (release_id, name, size, sha1, crc32, md5)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
    )?;
    for rom in &game.roms {
        insert.execute(params![
            release_id,
            rom.name,
            rom.size.map(|s| s as i64),
            rom.sha1,
            rom.crc,
            rom.md5,
        ])?;
    }
    Ok(game.roms.len() as u64)
}

/// Two-pass clone linking: point every resolvable `clone_of` at its parent
/// row, clear the rest. Returns the resolved count.
pub fn resolve_parents(tx: &Transaction<'_>, system_id: i64) -> Result<u64> {
    let resolved = tx.execute(
        "UPDATE releases SET parent_id =
            (SELECT p.id FROM releases p
             WHERE p.system_id = releases.system_id AND p.name = releases.clone_of)
         WHERE system_id = ?1 AND clone_of IS NOT NULL
           AND EXISTS (SELECT 1 FROM releases p
                       WHERE p.system_id = releases.system_id
                         AND p.name = releases.clone_of)",
        params![system_id],
    )?;
    tx.execute(
        "UPDATE releases SET parent_id = NULL
         WHERE system_id = ?1
           AND (clone_of IS NULL
                OR NOT EXISTS (SELECT 1 FROM releases p
                               WHERE p.system_id = releases.system_id
                                 AND p.name = releases.clone_of))",
        params![system_id],
    )?;
    Ok(resolved as u64)
}

// ----------------------------------------------------------------------
// Row mappers

fn system_from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<SystemRow> {
    Ok(SystemRow {
        id: r.get(0)?,
        short_name: r.get(1)?,
        display_name: r.get(2)?,
        dat_name: r.get(3)?,
        dat_version: r.get(4)?,
        dat_date: r.get(5)?,
    })
}

fn library_from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<LibraryRow> {
    Ok(LibraryRow {
        id: r.get(0)?,
        name: r.get(1)?,
        root_path: r.get(2)?,
        system_id: r.get(3)?,
        last_scan_at: r.get(4)?,
    })
}

fn release_from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<ReleaseRow> {
    Ok(ReleaseRow {
        id: r.get(0)?,
        system_id: r.get(1)?,
        name: r.get(2)?,
        description: r.get(3)?,
        clone_of: r.get(4)?,
        parent_id: r.get(5)?,
        year: r.get(6)?,
        manufacturer: r.get(7)?,
        is_bios: r.get::<_, i64>(8)? != 0,
        is_device: r.get::<_, i64>(9)? != 0,
        is_mechanical: r.get::<_, i64>(10)? != 0,
        is_preferred: r.get::<_, i64>(11)? != 0,
        ignore_reason: r.get(12)?,
    })
}

fn rom_entry_from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<RomEntryRow> {
    Ok(RomEntryRow {
        id: r.get(0)?,
        release_id: r.get(1)?,
        name: r.get(2)?,
        size: r.get(3)?,
        sha1: r.get(4)?,
        crc32: r.get(5)?,
        md5: r.get(6)?,
    })
}

fn scanned_file_from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<ScannedFileRow> {
    Ok(ScannedFileRow {
        id: r.get(0)?,
        library_id: r.get(1)?,
        path: r.get(2)?,
        archive_path: r.get(3)?,
        size: r.get(4)?,
        mtime: r.get(5)?,
        sha1: r.get(6)?,
        crc32: r.get(7)?,
        scanned_at: r.get(8)?,
    })
}

fn match_from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<MatchRow> {
    let type_str: String = r.get(3)?;
    Ok(MatchRow {
        id: r.get(0)?,
        scanned_file_id: r.get(1)?,
        rom_entry_id: r.get(2)?,
        match_type: MatchType::parse(&type_str).unwrap_or(MatchType::Name),
        flags: r.get(4)?,
    })
}

fn collect<T>(rows: impl Iterator<Item = rusqlite::Result<T>>) -> Result<Vec<T>> {
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}
