use std::fs;
use std::io::Write;

use romman::cancel::CancelToken;
use romman::import;
use romman::mappings::{MappingOverrides, Mappings};
use romman::scanner::{self, ScanOptions};
use romman::store::Store;
use romman::types::MatchType;
use tempfile::TempDir;

const NES_DAT: &str = r#"<?xml version="1.0"?>
<datafile>
  <header>
    <name>Nintendo - Nintendo Entertainment System</name>
    <version>20240101</version>
    <homepage>No-Intro</homepage>
  </header>
  <game name="Test Game (USA)">
    <description>Test Game</description>
    <rom name="Test Game (USA).nes" size="16" crc="d3764b6a" sha1="331407b2bd72286d458f26c426d78f459d7116d3"/>
  </game>
  <game name="Other Game (Japan)">
    <description>Other Game</description>
    <rom name="Other Game (Japan).nes" size="8" crc="00112233"/>
  </game>
</datafile>
"#;

struct Fixture {
    _dir: TempDir,
    store: Store,
    library_root: std::path::PathBuf,
}

fn fixture() -> Fixture {
    let dir = TempDir::new().unwrap();
    let store = Store::open(&dir.path().join("romman.sqlite")).unwrap();
    let library_root = dir.path().join("library");
    fs::create_dir(&library_root).unwrap();
    Fixture {
        _dir: dir,
        store,
        library_root,
    }
}

fn import_nes(fixture: &mut Fixture) -> romman::types::ImportResult {
    let dat_path = fixture.library_root.parent().unwrap().join("nes.dat");
    fs::write(&dat_path, NES_DAT).unwrap();
    import::import(
        &mut fixture.store,
        &Mappings::with_overrides(MappingOverrides::default()),
        &dat_path,
        &CancelToken::new(),
    )
    .unwrap()
}

fn register_library(fixture: &mut Fixture) -> romman::store::LibraryRow {
    let system = fixture.store.find_system("nes").unwrap().unwrap();
    fixture
        .store
        .create_library("shelf", &fixture.library_root, system.id)
        .unwrap()
}

fn scan(fixture: &mut Fixture) -> romman::types::ScanResult {
    scanner::scan(
        &mut fixture.store,
        "shelf",
        &ScanOptions::default(),
        None,
        &CancelToken::new(),
    )
    .unwrap()
}

#[test]
fn import_is_idempotent() {
    let mut fx = fixture();

    let first = import_nes(&mut fx);
    assert!(first.is_new_system);
    assert_eq!(first.games_imported, 2);
    assert_eq!(first.roms_imported, 2);

    let second = import_nes(&mut fx);
    assert!(second.skipped);

    let system = fx.store.find_system("nes").unwrap().unwrap();
    assert_eq!(fx.store.list_systems().unwrap().len(), 1);
    assert_eq!(fx.store.releases_for_system(system.id).unwrap().len(), 2);
    assert_eq!(fx.store.rom_entries_for_system(system.id).unwrap().len(), 2);
}

#[test]
fn scan_matches_by_sha1() {
    let mut fx = fixture();
    import_nes(&mut fx);
    let library = register_library(&mut fx);

    fs::write(fx.library_root.join("mystery.nes"), b"test rom content").unwrap();

    let result = scan(&mut fx);
    assert_eq!(result.files_scanned, 1);
    assert_eq!(result.files_hashed, 1);
    assert_eq!(result.matches_found, 1);
    assert_eq!(result.unmatched_files, 0);

    let matches = fx.store.matches_for_library(library.id).unwrap();
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0].match_type, MatchType::Sha1);

    // Last-scan stamp lands on success.
    assert!(fx.store.get_library("shelf").unwrap().last_scan_at.is_some());
}

#[test]
fn second_scan_hits_the_cache() {
    let mut fx = fixture();
    import_nes(&mut fx);
    register_library(&mut fx);

    fs::write(fx.library_root.join("mystery.nes"), b"test rom content").unwrap();

    scan(&mut fx);
    let second = scan(&mut fx);
    assert_eq!(second.files_hashed, 0);
    assert_eq!(second.files_skipped, 1);
    assert_eq!(second.matches_found, 1);
}

#[test]
fn scan_converges_to_identical_match_rows() {
    let mut fx = fixture();
    import_nes(&mut fx);
    let library = register_library(&mut fx);

    fs::write(fx.library_root.join("a.nes"), b"test rom content").unwrap();
    fs::write(fx.library_root.join("b.nes"), b"unrelated bytes!").unwrap();

    scan(&mut fx);
    let first: Vec<_> = fx
        .store
        .matches_for_library(library.id)
        .unwrap()
        .into_iter()
        .map(|m| (m.scanned_file_id, m.rom_entry_id, m.match_type))
        .collect();

    scan(&mut fx);
    let second: Vec<_> = fx
        .store
        .matches_for_library(library.id)
        .unwrap()
        .into_iter()
        .map(|m| (m.scanned_file_id, m.rom_entry_id, m.match_type))
        .collect();

    assert_eq!(first, second);
}

#[test]
fn zip_entries_are_scanned_and_matched() {
    let mut fx = fixture();
    import_nes(&mut fx);
    let library = register_library(&mut fx);

    let zip_path = fx.library_root.join("pack.zip");
    let file = fs::File::create(&zip_path).unwrap();
    let mut writer = zip::ZipWriter::new(file);
    let options = zip::write::SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated);
    writer.start_file("Test Game (USA).nes", options).unwrap();
    writer.write_all(b"test rom content").unwrap();
    writer.start_file("notes/readme.bin", options).unwrap();
    writer.write_all(b"not a rom").unwrap();
    writer.finish().unwrap();

    let result = scan(&mut fx);
    assert_eq!(result.files_scanned, 2);
    assert_eq!(result.matches_found, 1);
    assert_eq!(result.unmatched_files, 1);

    let files = fx.store.scanned_files(library.id).unwrap();
    assert_eq!(files.len(), 2);
    assert!(files.iter().all(|f| !f.archive_path.is_empty()));
}

#[test]
fn ignored_extensions_are_never_enqueued() {
    let mut fx = fixture();
    import_nes(&mut fx);
    register_library(&mut fx);

    fs::write(fx.library_root.join("game.nes"), b"test rom content").unwrap();
    fs::write(fx.library_root.join("game.srm"), b"save data").unwrap();
    fs::write(fx.library_root.join("game.st0"), b"state").unwrap();
    fs::write(fx.library_root.join("cover.png"), b"image").unwrap();

    let result = scan(&mut fx);
    assert_eq!(result.files_scanned, 1);
}

#[test]
fn vanished_files_are_pruned() {
    let mut fx = fixture();
    import_nes(&mut fx);
    let library = register_library(&mut fx);

    let path = fx.library_root.join("gone.nes");
    fs::write(&path, b"test rom content").unwrap();
    scan(&mut fx);
    assert_eq!(fx.store.scanned_files(library.id).unwrap().len(), 1);

    fs::remove_file(&path).unwrap();
    scan(&mut fx);
    assert_eq!(fx.store.scanned_files(library.id).unwrap().len(), 0);
}

#[test]
fn cancelled_token_aborts_before_work() {
    let mut fx = fixture();
    import_nes(&mut fx);
    let library = register_library(&mut fx);

    fs::write(fx.library_root.join("a.nes"), b"test rom content").unwrap();

    let cancel = CancelToken::new();
    cancel.cancel();
    let err = scanner::scan(
        &mut fx.store,
        "shelf",
        &ScanOptions::default(),
        None,
        &cancel,
    )
    .unwrap_err();
    assert!(matches!(err, romman::Error::Cancelled));
    // No partial rows.
    assert!(fx.store.scanned_files(library.id).unwrap().is_empty());
}

#[test]
fn sequential_and_parallel_scans_agree() {
    let mut fx = fixture();
    import_nes(&mut fx);
    let library = register_library(&mut fx);

    for i in 0..12 {
        fs::write(
            fx.library_root.join(format!("file{i}.nes")),
            format!("payload number {i}"),
        )
        .unwrap();
    }

    let sequential = scanner::scan(
        &mut fx.store,
        "shelf",
        &ScanOptions {
            sequential: true,
            ..ScanOptions::default()
        },
        None,
        &CancelToken::new(),
    )
    .unwrap();
    let rows_sequential: Vec<_> = fx
        .store
        .scanned_files(library.id)
        .unwrap()
        .into_iter()
        .map(|f| (f.path, f.sha1, f.crc32))
        .collect();

    // Start over in parallel mode.
    fx.store.remove_library("shelf").unwrap();
    let system = fx.store.find_system("nes").unwrap().unwrap();
    fx.store
        .create_library("shelf", &fx.library_root, system.id)
        .unwrap();
    let library = fx.store.get_library("shelf").unwrap();

    let parallel = scanner::scan(
        &mut fx.store,
        "shelf",
        &ScanOptions {
            workers: 4,
            sequential: false,
            ..ScanOptions::default()
        },
        None,
        &CancelToken::new(),
    )
    .unwrap();
    let mut rows_parallel: Vec<_> = fx
        .store
        .scanned_files(library.id)
        .unwrap()
        .into_iter()
        .map(|f| (f.path, f.sha1, f.crc32))
        .collect();

    assert_eq!(sequential.files_scanned, parallel.files_scanned);
    assert_eq!(sequential.files_hashed, parallel.files_hashed);
    rows_parallel.sort();
    let mut rows_sequential = rows_sequential;
    rows_sequential.sort();
    assert_eq!(rows_sequential, rows_parallel);
}

#[test]
fn progress_reports_reach_the_sink() {
    use std::sync::{Arc, Mutex};

    let mut fx = fixture();
    import_nes(&mut fx);
    register_library(&mut fx);
    fs::write(fx.library_root.join("a.nes"), b"test rom content").unwrap();
    fs::write(fx.library_root.join("b.nes"), b"other content!!!").unwrap();

    let seen: Arc<Mutex<Vec<(u64, u64)>>> = Arc::new(Mutex::new(Vec::new()));
    let seen_clone = seen.clone();
    let sink = move |p: romman::progress::ScanProgress| {
        seen_clone.lock().unwrap().push((p.files_scanned, p.total_files));
    };
    scanner::scan(
        &mut fx.store,
        "shelf",
        &ScanOptions::default(),
        Some(&sink),
        &CancelToken::new(),
    )
    .unwrap();

    drop(sink);
    let seen = Arc::try_unwrap(seen).unwrap().into_inner().unwrap();
    assert!(seen.iter().any(|(done, total)| *done == 2 && *total == 2));
}

#[test]
fn chd_headers_are_hashed_without_crc() {
    let mut fx = fixture();
    import_nes(&mut fx);
    let library = register_library(&mut fx);

    // Minimal v5 header: magic, length, version, then zeros with a known
    // raw-data SHA-1 at offset 84.
    let mut header = vec![0u8; 124];
    header[..8].copy_from_slice(b"MComprHD");
    header[8..12].copy_from_slice(&124u32.to_be_bytes());
    header[12..16].copy_from_slice(&5u32.to_be_bytes());
    for (i, b) in header.iter_mut().enumerate().take(104).skip(84) {
        *b = (i - 84) as u8;
    }
    fs::write(fx.library_root.join("disc.chd"), &header).unwrap();

    let result = scan(&mut fx);
    assert_eq!(result.files_hashed, 1);

    let files = fx.store.scanned_files(library.id).unwrap();
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].crc32, "");
    assert_eq!(files[0].sha1.len(), 40);
    assert_eq!(&files[0].sha1[..8], "00010203");
}

#[test]
fn library_summaries_count_files_and_matches() {
    let mut fx = fixture();
    import_nes(&mut fx);
    register_library(&mut fx);

    fs::write(fx.library_root.join("a.nes"), b"test rom content").unwrap();
    fs::write(fx.library_root.join("b.nes"), b"unknown payload!").unwrap();
    scan(&mut fx);

    let summaries = fx.store.library_summaries().unwrap();
    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].name, "shelf");
    assert_eq!(summaries[0].system, "nes");
    assert_eq!(summaries[0].file_count, 2);
    assert_eq!(summaries[0].matched_count, 1);
}
