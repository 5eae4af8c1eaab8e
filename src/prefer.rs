use std::collections::HashMap;

use serde::Serialize;

use crate::error::Result;
use crate::names::{NameInfo, Stability};
use crate::store::Store;

/// Totals reported after a selection pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PreferredOutcome {
    pub groups: u64,
    pub preferred: u64,
    pub ignored: u64,
}

struct Candidate {
    release_id: i64,
    info: NameInfo,
    score: i64,
}

/// Pick one release per base title. Deterministic: scoring is pure, ties
/// fall back to database order, and the whole outcome persists in one
/// transaction.
pub fn select_preferred(
    store: &mut Store,
    system_id: i64,
    region_priority: &[String],
) -> Result<PreferredOutcome> {
    let releases = store.releases_for_system(system_id)?;

    // Group by base title, preserving first-seen order.
    let mut group_order: Vec<String> = Vec::new();
    let mut groups: HashMap<String, Vec<Candidate>> = HashMap::new();
    for release in &releases {
        let info = NameInfo::parse(&release.name);
        let score = score(&info, region_priority);
        let key = info.base_title.clone();
        let entry = groups.entry(key.clone()).or_default();
        if entry.is_empty() {
            group_order.push(key);
        }
        entry.push(Candidate {
            release_id: release.id,
            info,
            score,
        });
    }

    let mut outcome = PreferredOutcome {
        groups: group_order.len() as u64,
        ..PreferredOutcome::default()
    };
    let mut updates: Vec<(i64, bool, Option<String>)> = Vec::new();

    for key in &group_order {
        let candidates = groups.get_mut(key).expect("group exists");
        // Stable sort keeps database order among equal scores.
        candidates.sort_by(|a, b| b.score.cmp(&a.score));

        let (winner, losers) = candidates.split_first().expect("non-empty group");
        updates.push((winner.release_id, true, None));
        outcome.preferred += 1;

        for loser in losers {
            let reason = ignore_reason(winner, loser, region_priority);
            updates.push((loser.release_id, false, Some(reason.to_string())));
            outcome.ignored += 1;
        }
    }

    store.apply_preferred(&updates)?;
    Ok(outcome)
}

fn score(info: &NameInfo, region_priority: &[String]) -> i64 {
    let mut score = 0i64;
    if has_english(info) {
        score += 1000;
    }
    score += stability_score(info.stability);
    score += i64::from(info.revision) * 10;
    score += region_score(info, region_priority);
    score
}

fn has_english(info: &NameInfo) -> bool {
    info.languages
        .iter()
        .any(|l| l == "En" || l.eq_ignore_ascii_case("english"))
}

fn stability_score(stability: Stability) -> i64 {
    match stability {
        Stability::Stable => 500,
        Stability::Beta => 100,
        Stability::Proto => 50,
        Stability::Sample => 25,
        Stability::Demo => 10,
    }
}

/// First region from the priority list present in the candidate wins
/// `(N - index) * 50`; later regions contribute nothing.
fn region_score(info: &NameInfo, region_priority: &[String]) -> i64 {
    let n = region_priority.len() as i64;
    for (index, region) in region_priority.iter().enumerate() {
        if info.regions.iter().any(|r| r.eq_ignore_ascii_case(region)) {
            return (n - index as i64) * 50;
        }
    }
    0
}

/// Why a losing candidate was passed over, checked in fixed precedence.
fn ignore_reason(winner: &Candidate, loser: &Candidate, region_priority: &[String]) -> &'static str {
    if has_english(&winner.info) && !has_english(&loser.info) {
        return "no-english";
    }
    if loser.info.stability < winner.info.stability {
        return "less-stable";
    }
    if loser.info.revision < winner.info.revision {
        return "older-revision";
    }
    if region_score(&loser.info, region_priority) < region_score(&winner.info, region_priority) {
        return "lower-region-priority";
    }
    "duplicate"
}
