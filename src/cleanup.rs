use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::dupes::{self, DuplicateKind};
use crate::error::{Error, Result};
use crate::store::Store;
use crate::types::MatchType;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    Delete,
    Move,
    Ignore,
}

/// One planned filesystem action. `dest_path` is present for moves only.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlanAction {
    pub action: ActionKind,
    pub source_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dest_path: Option<String>,
    pub reason: String,
    pub file_id: i64,
    pub duplicate_type: DuplicateKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub match_type: Option<MatchType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flags: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PlanSummary {
    pub total_actions: u64,
    pub delete_count: u64,
    pub move_count: u64,
    pub ignore_count: u64,
    pub space_reclaimed_bytes: u64,
}

/// The reversible cleanup document: everything needed to review, execute,
/// or undo a deduplication by hand.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CleanupPlan {
    pub library_name: String,
    pub library_path: String,
    pub system_name: String,
    pub created_at: String,
    pub quarantine_dir: String,
    pub actions: Vec<PlanAction>,
    pub summary: PlanSummary,
}

#[derive(Debug, Clone, Serialize)]
pub struct ActionFailure {
    pub action: PlanAction,
    pub error: String,
}

#[derive(Debug, Default, Serialize)]
pub struct ExecutionResult {
    pub dry_run: bool,
    pub succeeded: u64,
    pub failed: u64,
    pub errors: Vec<ActionFailure>,
}

/// Plan a library's duplicate cleanup. Every involved path gets at most one
/// action: `ignore` for the copy to keep, `move` into the quarantine tree
/// for the rest. A later group may only upgrade a `move` to an `ignore`.
pub fn generate_plan(
    store: &Store,
    library_name: &str,
    quarantine_base: &Path,
) -> Result<CleanupPlan> {
    let library = store.get_library(library_name)?;
    let system = store.get_system(library.system_id)?;
    let root = PathBuf::from(&library.root_path);
    let duplicates = dupes::find_duplicates(store, &library)?;

    let mut order: Vec<String> = Vec::new();
    let mut planned: HashMap<String, PlanAction> = HashMap::new();

    for group in &duplicates {
        for file in &group.files {
            let reason = format!("{} duplicate", group.kind.as_str());
            match planned.get_mut(&file.path) {
                None => {
                    let action = if file.is_preferred {
                        PlanAction {
                            action: ActionKind::Ignore,
                            source_path: file.path.clone(),
                            dest_path: None,
                            reason,
                            file_id: file.file_id,
                            duplicate_type: group.kind,
                            match_type: file.match_type,
                            flags: file.flags.clone(),
                        }
                    } else {
                        PlanAction {
                            action: ActionKind::Move,
                            source_path: file.path.clone(),
                            dest_path: Some(
                                quarantine_dest(
                                    quarantine_base,
                                    &system.short_name,
                                    &root,
                                    &file.path,
                                )
                                .to_string_lossy()
                                .into_owned(),
                            ),
                            reason,
                            file_id: file.file_id,
                            duplicate_type: group.kind,
                            match_type: file.match_type,
                            flags: file.flags.clone(),
                        }
                    };
                    order.push(file.path.clone());
                    planned.insert(file.path.clone(), action);
                }
                Some(existing) => {
                    // Only ever promote towards keeping the file.
                    if file.is_preferred && existing.action == ActionKind::Move {
                        existing.action = ActionKind::Ignore;
                        existing.dest_path = None;
                        existing.reason = reason;
                        existing.duplicate_type = group.kind;
                    }
                }
            }
        }
    }

    let mut size_by_path: HashMap<&str, u64> = HashMap::new();
    for group in &duplicates {
        for file in &group.files {
            size_by_path.entry(file.path.as_str()).or_insert(file.size as u64);
        }
    }

    let actions: Vec<PlanAction> = order
        .iter()
        .map(|path| planned.remove(path).expect("planned action"))
        .collect();

    let mut summary = PlanSummary {
        total_actions: actions.len() as u64,
        ..PlanSummary::default()
    };
    for action in &actions {
        match action.action {
            ActionKind::Delete => summary.delete_count += 1,
            ActionKind::Ignore => summary.ignore_count += 1,
            ActionKind::Move => {
                summary.move_count += 1;
                summary.space_reclaimed_bytes += size_by_path
                    .get(action.source_path.as_str())
                    .copied()
                    .unwrap_or(0);
            }
        }
    }

    Ok(CleanupPlan {
        library_name: library.name,
        library_path: library.root_path,
        system_name: system.short_name,
        created_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        quarantine_dir: quarantine_base.to_string_lossy().into_owned(),
        actions,
        summary,
    })
}

/// `{quarantine}/{system}/{path relative to the library root}`.
fn quarantine_dest(quarantine: &Path, system: &str, root: &Path, source: &str) -> PathBuf {
    let source = Path::new(source);
    let relative = pathdiff::diff_paths(source, root)
        .filter(|p| !p.as_os_str().is_empty() && !p.starts_with(".."))
        .unwrap_or_else(|| {
            source
                .file_name()
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("unknown"))
        });
    quarantine.join(system).join(relative)
}

/// Execute (or simulate) a plan. One action's failure never aborts the
/// rest; failures accumulate with their original payloads.
pub fn execute_plan(plan: &CleanupPlan, dry_run: bool) -> ExecutionResult {
    let mut result = ExecutionResult {
        dry_run,
        ..ExecutionResult::default()
    };
    for action in &plan.actions {
        let outcome = if dry_run {
            Ok(())
        } else {
            apply_action(action)
        };
        match outcome {
            Ok(()) => result.succeeded += 1,
            Err(e) => {
                result.failed += 1;
                result.errors.push(ActionFailure {
                    action: action.clone(),
                    error: e.to_string(),
                });
            }
        }
    }
    result
}

fn apply_action(action: &PlanAction) -> Result<()> {
    match action.action {
        ActionKind::Ignore => Ok(()),
        ActionKind::Delete => {
            let source = Path::new(&action.source_path);
            fs::remove_file(source).map_err(|e| Error::io(source, e))
        }
        ActionKind::Move => {
            let source = Path::new(&action.source_path);
            let dest = action
                .dest_path
                .as_deref()
                .map(Path::new)
                .ok_or_else(|| Error::Config("move action without dest_path".into()))?;
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
            }
            move_file(source, dest)
        }
    }
}

/// Rename when possible; across filesystems fall back to copy, fsync the
/// copy, then delete the source.
fn move_file(source: &Path, dest: &Path) -> Result<()> {
    if fs::rename(source, dest).is_ok() {
        return Ok(());
    }
    fs::copy(source, dest).map_err(|e| Error::io(source, e))?;
    let copied = fs::File::open(dest).map_err(|e| Error::io(dest, e))?;
    copied.sync_all().map_err(|e| Error::io(dest, e))?;
    fs::remove_file(source).map_err(|e| Error::io(source, e))
}

/// Canonical JSON persistence; `load(save(p)) == p`.
pub fn save_plan(plan: &CleanupPlan, path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(plan)
        .map_err(|e| Error::parse(path, e.to_string()))?;
    fs::write(path, json).map_err(|e| Error::io(path, e))
}

pub fn load_plan(path: &Path) -> Result<CleanupPlan> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(Error::not_found("plan", path.to_string_lossy()));
        }
        Err(e) => return Err(Error::io(path, e)),
    };
    serde_json::from_str(&text).map_err(|e| Error::parse(path, e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_plan() -> CleanupPlan {
        CleanupPlan {
            library_name: "shelf".into(),
            library_path: "/roms/nes".into(),
            system_name: "nes".into(),
            created_at: "2024-06-01T10:00:00Z".into(),
            quarantine_dir: "/quar".into(),
            actions: vec![
                PlanAction {
                    action: ActionKind::Ignore,
                    source_path: "/roms/nes/a.nes".into(),
                    dest_path: None,
                    reason: "exact duplicate".into(),
                    file_id: 1,
                    duplicate_type: DuplicateKind::Exact,
                    match_type: Some(MatchType::Sha1),
                    flags: None,
                },
                PlanAction {
                    action: ActionKind::Move,
                    source_path: "/roms/nes/copy/a.nes".into(),
                    dest_path: Some("/quar/nes/copy/a.nes".into()),
                    reason: "exact duplicate".into(),
                    file_id: 2,
                    duplicate_type: DuplicateKind::Exact,
                    match_type: Some(MatchType::Sha1),
                    flags: Some("hack".into()),
                },
            ],
            summary: PlanSummary {
                total_actions: 2,
                delete_count: 0,
                move_count: 1,
                ignore_count: 1,
                space_reclaimed_bytes: 16,
            },
        }
    }

    #[test]
    fn plan_round_trips_through_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plan.json");
        let plan = sample_plan();
        save_plan(&plan, &path).unwrap();
        let loaded = load_plan(&path).unwrap();
        assert_eq!(loaded, plan);
    }

    #[test]
    fn missing_plan_is_not_found() {
        assert!(matches!(
            load_plan(Path::new("/no/such/plan.json")),
            Err(Error::NotFound { .. })
        ));
    }

    #[test]
    fn malformed_plan_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plan.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(load_plan(&path), Err(Error::Parse { .. })));
    }

    #[test]
    fn dry_run_touches_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("a.nes");
        fs::write(&source, b"payload").unwrap();

        let mut plan = sample_plan();
        plan.actions[1].source_path = source.to_string_lossy().into_owned();
        plan.actions[1].dest_path =
            Some(dir.path().join("quar/a.nes").to_string_lossy().into_owned());

        let result = execute_plan(&plan, true);
        assert_eq!(result.succeeded, 2);
        assert_eq!(result.failed, 0);
        assert!(source.exists());
        assert!(!dir.path().join("quar").exists());
    }

    #[test]
    fn move_action_relocates_file() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("a.nes");
        fs::write(&source, b"payload").unwrap();
        let dest = dir.path().join("quar/deep/a.nes");

        let mut plan = sample_plan();
        plan.actions = vec![PlanAction {
            action: ActionKind::Move,
            source_path: source.to_string_lossy().into_owned(),
            dest_path: Some(dest.to_string_lossy().into_owned()),
            reason: "exact duplicate".into(),
            file_id: 1,
            duplicate_type: DuplicateKind::Exact,
            match_type: None,
            flags: None,
        }];

        let result = execute_plan(&plan, false);
        assert_eq!(result.succeeded, 1);
        assert!(!source.exists());
        assert_eq!(fs::read(&dest).unwrap(), b"payload");
    }

    #[test]
    fn failures_accumulate_without_aborting() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("good.nes");
        fs::write(&good, b"ok").unwrap();

        let mut plan = sample_plan();
        plan.actions = vec![
            PlanAction {
                action: ActionKind::Delete,
                source_path: dir
                    .path()
                    .join("missing.nes")
                    .to_string_lossy()
                    .into_owned(),
                dest_path: None,
                reason: "exact duplicate".into(),
                file_id: 1,
                duplicate_type: DuplicateKind::Exact,
                match_type: None,
                flags: None,
            },
            PlanAction {
                action: ActionKind::Delete,
                source_path: good.to_string_lossy().into_owned(),
                dest_path: None,
                reason: "exact duplicate".into(),
                file_id: 2,
                duplicate_type: DuplicateKind::Exact,
                match_type: None,
                flags: None,
            },
        ];

        let result = execute_plan(&plan, false);
        assert_eq!(result.succeeded, 1);
        assert_eq!(result.failed, 1);
        assert_eq!(result.errors.len(), 1);
        assert!(!good.exists());
    }

    #[test]
    fn quarantine_dest_is_relative_to_root() {
        let dest = quarantine_dest(
            Path::new("/quar"),
            "nes",
            Path::new("/roms/nes"),
            "/roms/nes/sub/a.nes",
        );
        assert_eq!(dest, PathBuf::from("/quar/nes/sub/a.nes"));

        // Outside the root: fall back to the basename.
        let dest = quarantine_dest(
            Path::new("/quar"),
            "nes",
            Path::new("/roms/nes"),
            "/elsewhere/b.nes",
        );
        assert_eq!(dest, PathBuf::from("/quar/nes/b.nes"));
    }
}
