use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;

/// Region tokens recognized inside parenthesized groups.
static REGION_TOKENS: &[&str] = &[
    "USA",
    "Europe",
    "Japan",
    "World",
    "Asia",
    "Australia",
    "Brazil",
    "Canada",
    "China",
    "France",
    "Germany",
    "Hong Kong",
    "Italy",
    "Korea",
    "Netherlands",
    "Russia",
    "Spain",
    "Sweden",
    "Taiwan",
    "UK",
];

/// Two-letter language codes recognized inside parenthesized groups.
static LANGUAGE_CODES: &[&str] = &[
    "En", "Ja", "Fr", "De", "Es", "It", "Nl", "Pt", "Sv", "No", "Da", "Fi", "Pl", "Ru", "Zh", "Ko",
];

static REV_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[Rr]ev\s+(.+)$").unwrap());
static VERSION_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^v(\d+)(?:\.\d+)?$").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stability {
    Demo,
    Sample,
    Proto,
    Beta,
    Stable,
}

impl fmt::Display for Stability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stability::Stable => "stable",
            Stability::Beta => "beta",
            Stability::Proto => "proto",
            Stability::Sample => "sample",
            Stability::Demo => "demo",
        };
        f.write_str(s)
    }
}

/// Everything the analyzer derives from one release or file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameInfo {
    pub base_title: String,
    pub regions: Vec<String>,
    pub languages: Vec<String>,
    pub revision: u32,
    pub stability: Stability,
    pub verified: bool,
    pub bad_dump: bool,
    pub cracked: bool,
    pub fixed: bool,
    pub hack: bool,
    pub overdump: bool,
    pub pirate: bool,
    pub trainer: bool,
    pub translated: bool,
    pub alternate: bool,
}

impl NameInfo {
    pub fn parse(name: &str) -> NameInfo {
        let mut info = NameInfo {
            base_title: base_title(name),
            regions: Vec::new(),
            languages: Vec::new(),
            revision: 0,
            stability: Stability::Stable,
            verified: false,
            bad_dump: false,
            cracked: false,
            fixed: false,
            hack: false,
            overdump: false,
            pirate: false,
            trainer: false,
            translated: false,
            alternate: false,
        };

        for group in delimited_groups(name, '(', ')') {
            info.classify_paren(group.trim());
        }
        for group in delimited_groups(name, '[', ']') {
            info.classify_bracket(group.trim());
        }

        info
    }

    fn classify_paren(&mut self, content: &str) {
        if let Some(region) = canonical_region(content) {
            self.regions.push(region.to_string());
            return;
        }

        let parts: Vec<&str> = content.split(',').map(str::trim).collect();
        if parts.len() > 1 {
            if let Some(regions) = all_regions(&parts) {
                self.regions.extend(regions.iter().map(|r| r.to_string()));
                return;
            }
        }
        if let Some(langs) = all_languages(&parts) {
            self.languages.extend(langs.iter().map(|l| l.to_string()));
            return;
        }

        if let Some(caps) = REV_RE.captures(content) {
            let token = caps.get(1).map(|m| m.as_str().trim()).unwrap_or("");
            self.revision = revision_value(token);
            return;
        }
        if let Some(caps) = VERSION_RE.captures(content) {
            if let Some(num) = caps.get(1) {
                self.revision = num.as_str().parse().unwrap_or(0);
            }
            return;
        }

        let lower = content.to_lowercase();
        if lower.contains("beta") {
            self.stability = Stability::Beta;
        } else if lower.contains("proto") {
            self.stability = Stability::Proto;
        } else if lower.contains("sample") {
            self.stability = Stability::Sample;
        } else if lower.contains("demo") {
            self.stability = Stability::Demo;
        }
    }

    fn classify_bracket(&mut self, content: &str) {
        if content == "!" {
            self.verified = true;
            return;
        }
        if content.starts_with("T+") || content.starts_with("T-") {
            self.translated = true;
            return;
        }
        let mut chars = content.chars();
        let Some(tag) = chars.next() else {
            return;
        };
        // Flags carry an optional trailing number ([b], [b1], [a2], ...).
        if !chars.as_str().chars().all(|c| c.is_ascii_digit()) {
            return;
        }
        match tag {
            'b' => self.bad_dump = true,
            'c' => self.cracked = true,
            'f' => self.fixed = true,
            'h' => self.hack = true,
            'o' => self.overdump = true,
            'p' => self.pirate = true,
            't' => self.trainer = true,
            'a' => self.alternate = true,
            _ => {}
        }
    }

    /// Comma-joined list of set status flags, in a fixed order.
    pub fn status_flags(&self) -> String {
        let mut flags = Vec::new();
        if self.verified {
            flags.push("verified");
        }
        if self.bad_dump {
            flags.push("bad-dump");
        }
        if self.cracked {
            flags.push("cracked");
        }
        if self.fixed {
            flags.push("fixed");
        }
        if self.hack {
            flags.push("hack");
        }
        if self.overdump {
            flags.push("overdump");
        }
        if self.pirate {
            flags.push("pirate");
        }
        if self.trainer {
            flags.push("trainer");
        }
        if self.translated {
            flags.push("translated");
        }
        if self.alternate {
            flags.push("alternate");
        }
        flags.join(",")
    }

    /// True when the dump's content was altered from the original.
    pub fn is_modified(&self) -> bool {
        self.cracked || self.fixed || self.hack || self.trainer || self.translated || self.pirate
    }

    /// True when the dump itself is known to be wrong.
    pub fn is_problematic(&self) -> bool {
        self.bad_dump || self.overdump
    }
}

/// The part of a name before the first annotation group, or the whole name
/// less its extension when no group is present.
pub fn base_title(name: &str) -> String {
    let cut = name
        .find('(')
        .into_iter()
        .chain(name.find('['))
        .min();
    match cut {
        Some(idx) => name[..idx].trim().to_string(),
        None => strip_extension(name).trim().to_string(),
    }
}

/// Matching key for a name: extension stripped, annotation groups removed,
/// lowercased, restricted to ascii alphanumerics. Idempotent.
pub fn normalize(name: &str) -> String {
    let mut stripped = strip_extension(name).to_string();
    stripped = remove_groups(&stripped, '(', ')');
    stripped = remove_groups(&stripped, '[', ']');
    stripped
        .chars()
        .filter_map(|c| {
            let c = c.to_ascii_lowercase();
            c.is_ascii_alphanumeric().then_some(c)
        })
        .collect()
}

fn strip_extension(name: &str) -> &str {
    if let Some(pos) = name.rfind('.') {
        let ext_len = name.len() - pos - 1;
        // Only treat a short trailing token as an extension; "Dr. Mario"
        // must survive intact.
        if (1..=8).contains(&ext_len)
            && name[pos + 1..].chars().all(|c| c.is_ascii_alphanumeric())
        {
            return &name[..pos];
        }
    }
    name
}

fn delimited_groups(name: &str, open: char, close: char) -> Vec<&str> {
    let mut groups = Vec::new();
    let mut rest = name;
    while let Some(start) = rest.find(open) {
        let after = &rest[start + open.len_utf8()..];
        match after.find(close) {
            Some(end) => {
                groups.push(&after[..end]);
                rest = &after[end + close.len_utf8()..];
            }
            None => break,
        }
    }
    groups
}

fn remove_groups(name: &str, open: char, close: char) -> String {
    let mut out = name.to_string();
    loop {
        let Some(start) = out.find(open) else {
            break;
        };
        let Some(rel_end) = out[start..].find(close) else {
            break;
        };
        out.replace_range(start..start + rel_end + close.len_utf8(), "");
    }
    out
}

fn canonical_region(token: &str) -> Option<&'static str> {
    REGION_TOKENS
        .iter()
        .find(|r| r.eq_ignore_ascii_case(token))
        .copied()
}

fn all_regions(parts: &[&str]) -> Option<Vec<&'static str>> {
    parts.iter().map(|p| canonical_region(p)).collect()
}

fn all_languages(parts: &[&str]) -> Option<Vec<&'static str>> {
    if parts.is_empty() {
        return None;
    }
    parts
        .iter()
        .map(|p| {
            LANGUAGE_CODES
                .iter()
                .find(|l| l.eq_ignore_ascii_case(p))
                .copied()
        })
        .collect()
}

fn revision_value(token: &str) -> u32 {
    let mut chars = token.chars();
    if let (Some(c), None) = (chars.next(), chars.next()) {
        if c.is_ascii_uppercase() {
            return (c as u32) - ('A' as u32) + 1;
        }
    }
    let digits: String = token.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_title_stops_at_first_group() {
        assert_eq!(base_title("Super Game (USA) [!]"), "Super Game");
        assert_eq!(base_title("Puzzle [b1] (Japan)"), "Puzzle");
        assert_eq!(base_title("Plain Game.sfc"), "Plain Game");
        assert_eq!(base_title("Dr. Mario"), "Dr. Mario");
    }

    #[test]
    fn regions_single_and_comma_separated() {
        let info = NameInfo::parse("Game (USA, Europe)");
        assert_eq!(info.regions, vec!["USA", "Europe"]);
        let info = NameInfo::parse("Game (Japan)");
        assert_eq!(info.regions, vec!["Japan"]);
    }

    #[test]
    fn languages_require_every_part_known() {
        let info = NameInfo::parse("Game (Europe) (En,Fr,De)");
        assert_eq!(info.languages, vec!["En", "Fr", "De"]);
        // Mixed junk is neither regions nor languages.
        let info = NameInfo::parse("Game (En,Xx)");
        assert!(info.languages.is_empty());
    }

    #[test]
    fn revision_letter_and_number() {
        assert_eq!(NameInfo::parse("Game (Rev A)").revision, 1);
        assert_eq!(NameInfo::parse("Game (Rev B)").revision, 2);
        assert_eq!(NameInfo::parse("Game (Rev 3)").revision, 3);
        assert_eq!(NameInfo::parse("Game (v1.02)").revision, 1);
        assert_eq!(NameInfo::parse("Game (v12)").revision, 12);
        assert_eq!(NameInfo::parse("Game (USA)").revision, 0);
    }

    #[test]
    fn stability_from_paren_tokens() {
        assert_eq!(NameInfo::parse("Game (Beta 2)").stability, Stability::Beta);
        assert_eq!(NameInfo::parse("Game (Proto)").stability, Stability::Proto);
        assert_eq!(
            NameInfo::parse("Game (Sample)").stability,
            Stability::Sample
        );
        assert_eq!(NameInfo::parse("Game (Demo)").stability, Stability::Demo);
        assert_eq!(NameInfo::parse("Game (USA)").stability, Stability::Stable);
    }

    #[test]
    fn bracket_flags() {
        let info = NameInfo::parse("Game (USA) [!]");
        assert!(info.verified);
        assert_eq!(info.status_flags(), "verified");

        let info = NameInfo::parse("Game [b2]");
        assert!(info.bad_dump);
        assert!(info.is_problematic());
        assert!(!info.is_modified());

        let info = NameInfo::parse("Game [T+Eng1.0]");
        assert!(info.translated);
        assert!(info.is_modified());

        let info = NameInfo::parse("Game [h1][t]");
        assert!(info.hack);
        assert!(info.trainer);
        assert_eq!(info.status_flags(), "hack,trainer");
    }

    #[test]
    fn unknown_bracket_content_ignored() {
        let info = NameInfo::parse("Game [x9] [hack of sorts]");
        assert_eq!(info.status_flags(), "");
    }

    #[test]
    fn normalize_strips_groups_and_punctuation() {
        assert_eq!(normalize("Super Game (USA) [!].sfc"), "supergame");
        assert_eq!(normalize("Mario's Picross (Japan).gb"), "mariospicross");
        assert_eq!(normalize("007 - GoldenEye (U)"), "007goldeneye");
    }

    #[test]
    fn normalize_is_idempotent() {
        for name in [
            "Super Game (USA) [!].sfc",
            "Already-normal123",
            "Tricky (One (Nested)",
            "",
        ] {
            let once = normalize(name);
            assert_eq!(normalize(&once), once);
        }
    }
}
