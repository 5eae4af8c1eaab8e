use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::dat::DatHeader;
use crate::error::{Error, Result};
use crate::types::SourceKind;

pub const MAPPINGS_ENV: &str = "ROMMAN_MAPPINGS";
const MAPPINGS_FILE: &str = "romman-mappings.yaml";

/// Built-in DAT-header-name to system-short-name table. Ordered: more
/// specific names sit above their prefixes ("PlayStation 2" above
/// "PlayStation") so the prefix stage picks the right one.
static BUILTIN_DAT_MAPPINGS: &[(&str, &str)] = &[
    ("Nintendo - Game Boy Advance", "gba"),
    ("Nintendo - Game Boy Color", "gbc"),
    ("Nintendo - Game Boy", "gb"),
    ("Nintendo - Nintendo Entertainment System", "nes"),
    ("Nintendo - Family Computer Disk System", "fds"),
    ("Nintendo - Super Nintendo Entertainment System", "snes"),
    ("Nintendo - Nintendo 64", "n64"),
    ("Nintendo - GameCube", "gamecube"),
    ("Nintendo - Nintendo DS", "nds"),
    ("Nintendo - Virtual Boy", "virtualboy"),
    ("Sega - Master System - Mark III", "mastersystem"),
    ("Sega - Mega Drive - Genesis", "megadrive"),
    ("Sega - Mega-CD - Sega CD", "segacd"),
    ("Sega - Game Gear", "gamegear"),
    ("Sega - 32X", "sega32x"),
    ("Sega - Saturn", "saturn"),
    ("Sega - Dreamcast", "dreamcast"),
    ("Sony - PlayStation 2", "ps2"),
    ("Sony - PlayStation Portable", "psp"),
    ("Sony - PlayStation", "psx"),
    ("NEC - PC Engine - TurboGrafx-16", "pcengine"),
    ("NEC - PC Engine CD - TurboGrafx-CD", "pcenginecd"),
    ("SNK - Neo Geo Pocket Color", "ngpc"),
    ("SNK - Neo Geo Pocket", "ngp"),
    ("Atari - 2600", "atari2600"),
    ("Atari - 5200", "atari5200"),
    ("Atari - 7800", "atari7800"),
    ("Atari - Jaguar", "jaguar"),
    ("Atari - Lynx", "lynx"),
    ("Bandai - WonderSwan Color", "wsc"),
    ("Bandai - WonderSwan", "ws"),
    ("Coleco - ColecoVision", "colecovision"),
    ("GCE - Vectrex", "vectrex"),
    ("MAME", "mame"),
];

/// Optional user override file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MappingOverrides {
    #[serde(default)]
    pub directory_mappings: HashMap<String, String>,
    #[serde(default)]
    pub dat_mappings: HashMap<String, String>,
    #[serde(default)]
    pub display_names: HashMap<String, String>,
}

/// Resolved mapping table: user entries layered over the built-ins.
#[derive(Debug, Clone, Default)]
pub struct Mappings {
    /// Ordered (header name, short name); user entries first.
    dat_mappings: Vec<(String, String)>,
    directory_mappings: HashMap<String, String>,
    display_names: HashMap<String, String>,
}

impl Mappings {
    /// Built-ins plus the first override file found, searched in order:
    /// `ROMMAN_MAPPINGS` env, current directory, user config dir, system
    /// config dir. A missing file is not an error; an unreadable one is.
    pub fn load() -> Result<Mappings> {
        for candidate in override_candidates() {
            if candidate.is_file() {
                let overrides = read_overrides(&candidate)?;
                return Ok(Mappings::with_overrides(overrides));
            }
        }
        Ok(Mappings::with_overrides(MappingOverrides::default()))
    }

    pub fn with_overrides(overrides: MappingOverrides) -> Mappings {
        let mut dat_mappings: Vec<(String, String)> = overrides
            .dat_mappings
            .into_iter()
            .collect();
        // Deterministic order for user entries: longest name first, then
        // lexicographic, mirroring the built-in table's specific-first rule.
        dat_mappings.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then(a.0.cmp(&b.0)));
        dat_mappings.extend(
            BUILTIN_DAT_MAPPINGS
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string())),
        );
        Mappings {
            dat_mappings,
            directory_mappings: overrides.directory_mappings,
            display_names: overrides.display_names,
        }
    }

    /// Canonical short name for a DAT: exact header-name match, then header
    /// prefix, then filename tokens tried longest-short-name-first (so a
    /// `gba` token can never be claimed by `gb`).
    pub fn system_for_dat(&self, header_name: &str, dat_path: &Path) -> String {
        let header = header_name.trim();
        for (name, short) in &self.dat_mappings {
            if header.eq_ignore_ascii_case(name) {
                return short.clone();
            }
        }
        for (name, short) in &self.dat_mappings {
            if header.len() > name.len()
                && header[..name.len()].eq_ignore_ascii_case(name)
            {
                return short.clone();
            }
        }

        let stem = dat_path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("");
        let tokens = name_tokens(stem);
        let mut shorts: Vec<&str> = self.dat_mappings.iter().map(|(_, s)| s.as_str()).collect();
        shorts.sort_by(|a, b| b.len().cmp(&a.len()).then(a.cmp(b)));
        shorts.dedup();
        for short in shorts {
            if tokens.iter().any(|t| t == short) {
                return short.to_string();
            }
        }

        // No mapping: fall back to a slug of whichever name we have.
        let fallback = if header.is_empty() { stem } else { header };
        slug(fallback)
    }

    /// System inference for `library add` when no system is given: user
    /// directory mappings first, then the short names themselves.
    pub fn system_for_directory(&self, dir: &Path) -> Option<String> {
        let name = dir.file_name().and_then(|s| s.to_str())?;
        if let Some(short) = self.directory_mappings.get(name) {
            return Some(short.clone());
        }
        let tokens = name_tokens(name);
        let mut shorts: Vec<&str> = self.dat_mappings.iter().map(|(_, s)| s.as_str()).collect();
        shorts.sort_by(|a, b| b.len().cmp(&a.len()).then(a.cmp(b)));
        shorts.dedup();
        shorts
            .into_iter()
            .find(|short| tokens.iter().any(|t| t == short))
            .map(str::to_string)
    }

    pub fn display_name<'a>(&'a self, short: &str, header_name: &'a str) -> &'a str {
        match self.display_names.get(short) {
            Some(name) => name.as_str(),
            None => header_name,
        }
    }
}

/// Source family by substring over every header field plus the filename;
/// No-Intro tags itself in `<homepage>`, not `<name>`.
pub fn classify_source(header: &DatHeader, dat_path: &Path) -> SourceKind {
    let mut haystack = String::new();
    haystack.push_str(&header.name);
    for part in [
        header.description.as_deref(),
        header.homepage.as_deref(),
        header.url.as_deref(),
    ]
    .into_iter()
    .flatten()
    {
        haystack.push(' ');
        haystack.push_str(part);
    }
    if let Some(name) = dat_path.file_name().and_then(|s| s.to_str()) {
        haystack.push(' ');
        haystack.push_str(name);
    }
    let haystack = haystack.to_lowercase();

    if haystack.contains("no-intro") || haystack.contains("nointro") {
        SourceKind::NoIntro
    } else if haystack.contains("redump") {
        SourceKind::Redump
    } else if haystack.contains("tosec") {
        SourceKind::Tosec
    } else if haystack.contains("mame") || haystack.contains("software list") {
        SourceKind::Mame
    } else {
        SourceKind::Other
    }
}

fn override_candidates() -> Vec<PathBuf> {
    let mut candidates = Vec::new();
    if let Ok(path) = std::env::var(MAPPINGS_ENV) {
        candidates.push(PathBuf::from(path));
    }
    candidates.push(PathBuf::from(MAPPINGS_FILE));
    if let Some(config) = dirs::config_dir() {
        candidates.push(config.join("romman").join("mappings.yaml"));
    }
    candidates.push(PathBuf::from("/etc/romman/mappings.yaml"));
    candidates
}

fn read_overrides(path: &Path) -> Result<MappingOverrides> {
    let text = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
    serde_yml::from_str(&text)
        .map_err(|e| Error::Config(format!("bad mapping file {}: {e}", path.display())))
}

fn name_tokens(name: &str) -> Vec<String> {
    name.to_lowercase()
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

fn slug(name: &str) -> String {
    let tokens = name_tokens(name);
    if tokens.is_empty() {
        "unknown".to_string()
    } else {
        tokens.join("-")
    }
}
