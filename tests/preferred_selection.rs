use std::fs;

use romman::cancel::CancelToken;
use romman::import;
use romman::mappings::{MappingOverrides, Mappings};
use romman::prefer;
use romman::scanner::{self, ScanOptions};
use romman::store::Store;
use tempfile::TempDir;

const SNES_DAT: &str = r#"<?xml version="1.0"?>
<datafile>
  <header>
    <name>Nintendo - Super Nintendo Entertainment System</name>
    <homepage>No-Intro</homepage>
  </header>
  <game name="Game (USA)">
    <rom name="Game (USA).sfc" size="16" crc="d3764b6a" sha1="331407b2bd72286d458f26c426d78f459d7116d3"/>
  </game>
  <game name="Game (Europe)">
    <rom name="Game (Europe).sfc" size="12" crc="aabbccdd" sha1="1111111111111111111111111111111111111111"/>
  </game>
  <game name="Game (Japan)">
    <rom name="Game (Japan).sfc" size="12" crc="eeff0011" sha1="2222222222222222222222222222222222222222"/>
  </game>
  <game name="Solo Quest (Japan)">
    <rom name="Solo Quest (Japan).sfc" size="12" crc="33445566" sha1="3333333333333333333333333333333333333333"/>
  </game>
</datafile>
"#;

fn default_regions() -> Vec<String> {
    romman::config::DEFAULT_REGION_PRIORITY
        .iter()
        .map(|r| r.to_string())
        .collect()
}

#[test]
fn europe_wins_the_default_region_order() {
    let dir = TempDir::new().unwrap();
    let mut store = Store::open(&dir.path().join("romman.sqlite")).unwrap();
    let dat = dir.path().join("snes.dat");
    fs::write(&dat, SNES_DAT).unwrap();
    import::import(
        &mut store,
        &Mappings::with_overrides(MappingOverrides::default()),
        &dat,
        &CancelToken::new(),
    )
    .unwrap();
    let system = store.find_system("snes").unwrap().unwrap();

    let outcome = prefer::select_preferred(&mut store, system.id, &default_regions()).unwrap();
    assert_eq!(outcome.groups, 2);
    assert_eq!(outcome.preferred, 2);
    assert_eq!(outcome.ignored, 2);

    let europe = store.find_release(system.id, "Game (Europe)").unwrap().unwrap();
    assert!(europe.is_preferred);
    assert!(europe.ignore_reason.is_none());

    let usa = store.find_release(system.id, "Game (USA)").unwrap().unwrap();
    assert!(!usa.is_preferred);
    assert!(
        usa.ignore_reason
            .as_deref()
            .unwrap()
            .contains("lower-region-priority")
    );

    // Exactly one preferred member per group.
    let preferred = store.preferred_releases(system.id).unwrap();
    let names: Vec<_> = preferred.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(names, vec!["Game (Europe)", "Solo Quest (Japan)"]);
}

#[test]
fn one_game_one_rom_view_needs_both_preference_and_presence() {
    let dir = TempDir::new().unwrap();
    let mut store = Store::open(&dir.path().join("romman.sqlite")).unwrap();
    let dat = dir.path().join("snes.dat");
    fs::write(&dat, SNES_DAT).unwrap();
    import::import(
        &mut store,
        &Mappings::with_overrides(MappingOverrides::default()),
        &dat,
        &CancelToken::new(),
    )
    .unwrap();
    let system = store.find_system("snes").unwrap().unwrap();

    // The library only holds the USA copy, whose bytes match the catalogue.
    let root = dir.path().join("library");
    fs::create_dir(&root).unwrap();
    fs::write(root.join("Game (USA).sfc"), b"test rom content").unwrap();
    store.create_library("shelf", &root, system.id).unwrap();
    scanner::scan(
        &mut store,
        "shelf",
        &ScanOptions::default(),
        None,
        &CancelToken::new(),
    )
    .unwrap();

    prefer::select_preferred(&mut store, system.id, &default_regions()).unwrap();
    let library = store.get_library("shelf").unwrap();

    // Europe is preferred but absent; USA is present but not preferred.
    assert!(store.preferred_matched(library.id).unwrap().is_empty());

    // Re-rank with the USA first: now the 1G1R set has one entry.
    let usa_first: Vec<String> = ["USA", "Europe", "World", "Japan"]
        .iter()
        .map(|r| r.to_string())
        .collect();
    prefer::select_preferred(&mut store, system.id, &usa_first).unwrap();
    let one_g_one_r = store.preferred_matched(library.id).unwrap();
    assert_eq!(one_g_one_r.len(), 1);
    assert_eq!(one_g_one_r[0].name, "Game (USA)");
    assert!(one_g_one_r[0].matched);

    // The full status view still reports every release.
    let statuses = store.release_statuses(system.id, library.id).unwrap();
    assert_eq!(statuses.len(), 4);
    assert_eq!(statuses.iter().filter(|s| s.matched).count(), 1);
}
