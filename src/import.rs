use std::fs::File;
use std::io::Read;
use std::path::Path;

use sha2::{Digest, Sha256};

use crate::cancel::CancelToken;
use crate::dat::DatReader;
use crate::error::{Error, Result};
use crate::mappings::{Mappings, classify_source};
use crate::store::{self, Store};
use crate::types::ImportResult;

/// Import one DAT file. The whole file lands in a single transaction: any
/// parse or store failure rolls the import back entirely.
pub fn import(
    store: &mut Store,
    mappings: &Mappings,
    path: &Path,
    cancel: &CancelToken,
) -> Result<ImportResult> {
    cancel.check()?;
    let mut dat = DatReader::open(path)?;
    let sha256 = sha256_file(path)?;

    let header = dat.header().clone();
    let file_stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("dat")
        .to_string();
    // MAME-style files have no <header>; the filename stands in.
    let dat_name = if header.name.is_empty() {
        file_stem.clone()
    } else {
        header.name.clone()
    };

    let short_name = mappings.system_for_dat(&dat_name, path);
    let display_name = mappings.display_name(&short_name, &dat_name).to_string();
    let kind = classify_source(&header, path);
    let path_text = path.to_string_lossy().into_owned();

    store.with_tx(|tx| {
        let (system_id, is_new_system) = store::upsert_system(
            tx,
            &short_name,
            &display_name,
            &dat_name,
            header.version.as_deref(),
            header.date.as_deref(),
        )?;

        let mut result = ImportResult {
            system_id,
            system: short_name.clone(),
            source_kind: kind,
            games_imported: 0,
            games_skipped: 0,
            roms_imported: 0,
            parents_resolved: 0,
            is_new_system,
            is_new_source: false,
            skipped: false,
        };

        // Identical bytes already imported for this (system, kind): nothing
        // to do.
        if store::source_sha256(tx, system_id, kind)?.as_deref() == Some(sha256.as_str()) {
            result.skipped = true;
            return Ok(result);
        }

        let (source_id, is_new_source) = store::upsert_source(
            tx,
            system_id,
            kind,
            &dat_name,
            header.version.as_deref(),
            header.date.as_deref(),
            &path_text,
            &sha256,
        )?;
        result.is_new_source = is_new_source;

        while let Some(game) = dat.next_game()? {
            cancel.check()?;
            if game.is_bios || game.is_device {
                result.games_skipped += 1;
                continue;
            }
            result.roms_imported +=
                store::upsert_release_with_roms(tx, system_id, Some(source_id), &game)?;
            result.games_imported += 1;
        }

        result.parents_resolved = store::resolve_parents(tx, system_id)?;
        Ok(result)
    })
}

fn sha256_file(path: &Path) -> Result<String> {
    let mut file = File::open(path).map_err(|e| Error::io(path, e))?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf).map_err(|e| Error::io(path, e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}
