use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::mpsc;
use std::time::UNIX_EPOCH;

use log::warn;
use rayon::prelude::*;
use walkdir::WalkDir;

use crate::cancel::CancelToken;
use crate::checksum;
use crate::chd;
use crate::error::{Error, Result};
use crate::matcher;
use crate::progress::{self, ProgressFn};
use crate::store::{LibraryRow, ScannedFileUpsert, Store};
use crate::types::ScanResult;

/// Extensions that are never ROM content: save/state files, images,
/// metadata, emulator configuration.
const IGNORED_EXTENSIONS: &[&str] = &[
    "srm", "sav", "eep", "fla", "rtc", "state", "oops", "png", "jpg", "jpeg", "txt", "nfo", "xml",
    "json", "cfg", "lpl", "opt",
];

pub fn is_ignored_extension(ext: &str) -> bool {
    if IGNORED_EXTENSIONS.contains(&ext) {
        return true;
    }
    // Numbered save states: .st0 through .st9.
    ext.len() == 3
        && ext.starts_with("st")
        && ext.as_bytes()[2].is_ascii_digit()
}

#[derive(Debug, Clone)]
pub struct ScanOptions {
    pub workers: usize,
    pub batch_size: usize,
    pub sequential: bool,
}

impl Default for ScanOptions {
    fn default() -> Self {
        ScanOptions {
            workers: num_cpus::get(),
            batch_size: crate::config::DEFAULT_BATCH_SIZE,
            sequential: false,
        }
    }
}

impl From<&crate::config::Config> for ScanOptions {
    fn from(config: &crate::config::Config) -> Self {
        ScanOptions {
            workers: config.workers,
            batch_size: config.batch_size,
            sequential: config.sequential,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JobKind {
    Plain,
    ZipEntry,
    Chd,
}

/// One unit of hashing work produced by the walker.
#[derive(Debug, Clone)]
struct HashJob {
    path: PathBuf,
    archive_path: String,
    size: i64,
    mtime: i64,
    kind: JobKind,
}

enum Outcome {
    Hashed(HashJob, String, String),
    Cached(HashJob, String, String),
    /// Read failure on one object; logged, skipped, never fatal.
    Failed,
}

/// Cache snapshot keyed like the unique index. Loaded once per scan and
/// read-only for the workers.
type CacheMap = HashMap<(String, String), (i64, i64, String, String)>;

/// Walk, hash, persist, prune, match, stamp. Persisted state after a scan
/// is a pure function of the files found, their sizes/mtimes, and bytes.
pub fn scan(
    store: &mut Store,
    library_name: &str,
    options: &ScanOptions,
    sink: Option<&ProgressFn>,
    cancel: &CancelToken,
) -> Result<ScanResult> {
    let library = store.get_library(library_name)?;
    let root = PathBuf::from(&library.root_path);
    if !root.is_dir() {
        return Err(Error::Config(format!(
            "library root is not a directory: {}",
            root.display()
        )));
    }

    progress::emit(sink, 0, 0);
    let jobs = discover_jobs(&root, cancel)?;
    let total = jobs.len() as u64;
    progress::emit(sink, 0, total);

    let cache = Arc::new(load_cache(store, library.id)?);

    let mut result = ScanResult::default();
    let mut collector = Collector::new(store, library.id, options.batch_size);

    if options.sequential || options.workers <= 1 {
        for job in jobs {
            if cancel.is_cancelled() {
                break;
            }
            let outcome = process_job(job, &cache);
            collector.accept(outcome, &mut result)?;
            progress::emit(sink, result.files_scanned, total);
        }
    } else {
        let (tx, rx) = mpsc::channel::<Outcome>();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(options.workers)
            .build()
            .map_err(|e| Error::Config(format!("cannot build worker pool: {e}")))?;
        let worker_cache = Arc::clone(&cache);
        let worker_cancel = cancel.clone();
        let handle = std::thread::spawn(move || {
            pool.install(|| {
                jobs.into_par_iter().for_each_with(tx, |tx, job| {
                    // A raised token lets in-flight jobs finish and drops
                    // the rest on the floor.
                    if worker_cancel.is_cancelled() {
                        return;
                    }
                    let _ = tx.send(process_job(job, &worker_cache));
                });
            });
        });

        for outcome in rx {
            collector.accept(outcome, &mut result)?;
            progress::emit(sink, result.files_scanned, total);
        }
        let _ = handle.join();
    }

    // The already-computed batch still lands, then cancellation surfaces.
    collector.flush()?;
    cancel.check()?;

    prune_stale(store, &library)?;

    let (matched, unmatched) = matcher::rebuild_matches(store, &library)?;
    result.matches_found = matched;
    result.unmatched_files = unmatched;

    store.set_last_scan(library.id, chrono::Utc::now().timestamp())?;
    Ok(result)
}

/// Depth-first discovery: classify every regular file and expand zip
/// archives into one job per entry. Unreadable objects are logged and
/// skipped.
fn discover_jobs(root: &Path, cancel: &CancelToken) -> Result<Vec<HashJob>> {
    let mut jobs = Vec::new();
    for entry in WalkDir::new(root) {
        cancel.check()?;
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                warn!("skipping unreadable entry under {}: {e}", root.display());
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let ext = extension_of(path);
        if is_ignored_extension(&ext) {
            continue;
        }

        let meta = match entry.metadata() {
            Ok(m) => m,
            Err(e) => {
                warn!("skipping {}: {e}", path.display());
                continue;
            }
        };
        let mtime = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);

        match ext.as_str() {
            "zip" => match checksum::zip_entries(path) {
                Ok(entries) => {
                    for (name, size) in entries {
                        jobs.push(HashJob {
                            path: path.to_path_buf(),
                            archive_path: name,
                            size: size as i64,
                            mtime,
                            kind: JobKind::ZipEntry,
                        });
                    }
                }
                Err(e) => warn!("skipping unreadable archive {}: {e}", path.display()),
            },
            "chd" => jobs.push(HashJob {
                path: path.to_path_buf(),
                archive_path: String::new(),
                size: meta.len() as i64,
                mtime,
                kind: JobKind::Chd,
            }),
            _ => jobs.push(HashJob {
                path: path.to_path_buf(),
                archive_path: String::new(),
                size: meta.len() as i64,
                mtime,
                kind: JobKind::Plain,
            }),
        }
    }
    Ok(jobs)
}

fn load_cache(store: &Store, library_id: i64) -> Result<CacheMap> {
    let mut cache = CacheMap::new();
    for row in store.scanned_files(library_id)? {
        cache.insert(
            (row.path, row.archive_path),
            (row.size, row.mtime, row.sha1, row.crc32),
        );
    }
    Ok(cache)
}

/// Hash one job, consulting the mtime+size cache first. Hashes are computed
/// whole or not at all; a failed read produces no row.
fn process_job(job: HashJob, cache: &CacheMap) -> Outcome {
    let key = (
        job.path.to_string_lossy().into_owned(),
        job.archive_path.clone(),
    );
    if let Some((size, mtime, sha1, crc32)) = cache.get(&key) {
        if *size == job.size && *mtime == job.mtime {
            return Outcome::Cached(job, sha1.clone(), crc32.clone());
        }
    }

    let computed = match job.kind {
        JobKind::Plain => checksum::hash_file(&job.path),
        JobKind::ZipEntry => checksum::hash_zip_entry(&job.path, &job.archive_path),
        JobKind::Chd => chd::hash_chd_header(&job.path),
    };
    match computed {
        Ok((sha1, crc32)) => Outcome::Hashed(job, sha1, crc32),
        Err(e) => {
            warn!("failed to hash {}: {e}", job.path.display());
            Outcome::Failed
        }
    }
}

/// Single-threaded drain of worker results into batched transactions.
struct Collector<'a> {
    store: &'a mut Store,
    library_id: i64,
    batch_size: usize,
    batch: Vec<ScannedFileUpsert>,
}

impl<'a> Collector<'a> {
    fn new(store: &'a mut Store, library_id: i64, batch_size: usize) -> Collector<'a> {
        Collector {
            store,
            library_id,
            batch_size: batch_size.max(1),
            batch: Vec::new(),
        }
    }

    fn accept(&mut self, outcome: Outcome, result: &mut ScanResult) -> Result<()> {
        result.files_scanned += 1;
        let (job, sha1, crc32) = match outcome {
            Outcome::Hashed(job, sha1, crc32) => {
                result.files_hashed += 1;
                (job, sha1, crc32)
            }
            Outcome::Cached(job, sha1, crc32) => {
                result.files_skipped += 1;
                (job, sha1, crc32)
            }
            Outcome::Failed => {
                result.files_skipped += 1;
                return Ok(());
            }
        };
        self.batch.push(ScannedFileUpsert {
            path: job.path.to_string_lossy().into_owned(),
            archive_path: job.archive_path,
            size: job.size,
            mtime: job.mtime,
            sha1,
            crc32,
        });
        if self.batch.len() >= self.batch_size {
            self.flush()?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        if self.batch.is_empty() {
            return Ok(());
        }
        let batch = std::mem::take(&mut self.batch);
        self.store.upsert_scanned_batch(self.library_id, &batch)
    }
}

/// Delete plain-file rows whose path vanished or whose extension joined the
/// ignore set since the last scan.
fn prune_stale(store: &mut Store, library: &LibraryRow) -> Result<()> {
    let mut stale = Vec::new();
    for (id, path) in store.plain_scanned_paths(library.id)? {
        let p = Path::new(&path);
        if !p.exists() || is_ignored_extension(&extension_of(p)) {
            stale.push(id);
        }
    }
    store.delete_scanned_files(&stale)
}

fn extension_of(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ignore_set_covers_save_states() {
        for ext in ["srm", "sav", "state", "st0", "st5", "st9", "oops", "png", "cfg"] {
            assert!(is_ignored_extension(ext), "{ext} should be ignored");
        }
        for ext in ["nes", "sfc", "zip", "chd", "bin", "st", "sta", "stx"] {
            assert!(!is_ignored_extension(ext), "{ext} should be scanned");
        }
    }

    #[test]
    fn cache_hit_requires_size_and_mtime() {
        let mut cache = CacheMap::new();
        cache.insert(
            ("/r/a.nes".into(), String::new()),
            (16, 100, "aa".into(), "bb".into()),
        );
        let job = HashJob {
            path: PathBuf::from("/r/a.nes"),
            archive_path: String::new(),
            size: 16,
            mtime: 100,
            kind: JobKind::Plain,
        };
        assert!(matches!(
            process_job(job.clone(), &cache),
            Outcome::Cached(_, _, _)
        ));

        // Touched file: falls through to hashing, which fails on the
        // nonexistent path and is reported as a skip.
        let touched = HashJob { mtime: 101, ..job };
        assert!(matches!(process_job(touched, &cache), Outcome::Failed));
    }
}
