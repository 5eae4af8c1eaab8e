use rusqlite::Connection;

use crate::error::Result;

/// Ordered migration ladder. Versions are applied monotonically; each DDL
/// batch commits together with its row in `schema_migrations`.
pub const MIGRATIONS: &[(i64, &str)] = &[
    (
        1,
        "CREATE TABLE systems (
            id INTEGER PRIMARY KEY,
            short_name TEXT NOT NULL UNIQUE,
            display_name TEXT NOT NULL DEFAULT '',
            dat_name TEXT,
            dat_version TEXT,
            dat_date TEXT
        );
        CREATE TABLE dat_sources (
            id INTEGER PRIMARY KEY,
            system_id INTEGER NOT NULL REFERENCES systems(id) ON DELETE CASCADE,
            kind TEXT NOT NULL,
            header_name TEXT,
            header_version TEXT,
            header_date TEXT,
            path TEXT NOT NULL,
            sha256 TEXT NOT NULL,
            priority INTEGER NOT NULL DEFAULT 100,
            imported_at INTEGER NOT NULL,
            UNIQUE (system_id, kind)
        );
        CREATE TABLE releases (
            id INTEGER PRIMARY KEY,
            system_id INTEGER NOT NULL REFERENCES systems(id) ON DELETE CASCADE,
            source_id INTEGER REFERENCES dat_sources(id) ON DELETE SET NULL,
            name TEXT NOT NULL,
            description TEXT,
            clone_of TEXT,
            parent_id INTEGER REFERENCES releases(id) ON DELETE SET NULL,
            year TEXT,
            manufacturer TEXT,
            is_bios INTEGER NOT NULL DEFAULT 0,
            is_device INTEGER NOT NULL DEFAULT 0,
            is_mechanical INTEGER NOT NULL DEFAULT 0,
            UNIQUE (system_id, name)
        );
        CREATE TABLE rom_entries (
            id INTEGER PRIMARY KEY,
            release_id INTEGER NOT NULL REFERENCES releases(id) ON DELETE CASCADE,
            name TEXT NOT NULL,
            size INTEGER,
            sha1 TEXT,
            crc32 TEXT,
            md5 TEXT
        );
        CREATE INDEX idx_rom_entries_release ON rom_entries (release_id);
        CREATE INDEX idx_rom_entries_sha1 ON rom_entries (sha1);
        CREATE INDEX idx_rom_entries_crc32 ON rom_entries (crc32);
        CREATE INDEX idx_rom_entries_name ON rom_entries (name);",
    ),
    (
        2,
        "CREATE TABLE libraries (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            root_path TEXT NOT NULL,
            system_id INTEGER NOT NULL REFERENCES systems(id),
            last_scan_at INTEGER
        );
        CREATE TABLE scanned_files (
            id INTEGER PRIMARY KEY,
            library_id INTEGER NOT NULL REFERENCES libraries(id) ON DELETE CASCADE,
            path TEXT NOT NULL,
            archive_path TEXT NOT NULL DEFAULT '',
            size INTEGER NOT NULL,
            mtime INTEGER NOT NULL,
            sha1 TEXT NOT NULL,
            crc32 TEXT NOT NULL,
            scanned_at INTEGER NOT NULL,
            UNIQUE (library_id, path, archive_path)
        );
        CREATE INDEX idx_scanned_files_sha1 ON scanned_files (library_id, sha1);",
    ),
    (
        3,
        "CREATE TABLE matches (
            id INTEGER PRIMARY KEY,
            scanned_file_id INTEGER NOT NULL REFERENCES scanned_files(id) ON DELETE CASCADE,
            rom_entry_id INTEGER NOT NULL REFERENCES rom_entries(id) ON DELETE CASCADE,
            match_type TEXT NOT NULL,
            flags TEXT,
            UNIQUE (scanned_file_id, rom_entry_id)
        );
        CREATE INDEX idx_matches_rom_entry ON matches (rom_entry_id);",
    ),
    (
        4,
        "ALTER TABLE releases ADD COLUMN is_preferred INTEGER NOT NULL DEFAULT 0;
        ALTER TABLE releases ADD COLUMN ignore_reason TEXT;",
    ),
];

pub fn current_version(conn: &Connection) -> Result<i64> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL
        )",
        [],
    )?;
    let version = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
        [],
        |r| r.get::<_, i64>(0),
    )?;
    Ok(version)
}

/// Bring the database up to the latest schema version. A no-op when the
/// store is already current; safe across repeated opens.
pub fn apply_migrations(conn: &mut Connection) -> Result<()> {
    let mut version = current_version(conn)?;
    for (migration_version, ddl) in MIGRATIONS {
        if *migration_version <= version {
            continue;
        }
        let tx = conn.transaction()?;
        tx.execute_batch(ddl)?;
        tx.execute(
            "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
            rusqlite::params![migration_version, chrono::Utc::now().timestamp()],
        )?;
        tx.commit()?;
        version = *migration_version;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrations_are_ordered_and_dense() {
        for (i, (version, _)) in MIGRATIONS.iter().enumerate() {
            assert_eq!(*version, i as i64 + 1);
        }
    }

    #[test]
    fn apply_is_idempotent() {
        let mut conn = Connection::open_in_memory().unwrap();
        apply_migrations(&mut conn).unwrap();
        let first = current_version(&conn).unwrap();
        apply_migrations(&mut conn).unwrap();
        assert_eq!(current_version(&conn).unwrap(), first);
        assert_eq!(first, MIGRATIONS.last().unwrap().0);
    }
}
