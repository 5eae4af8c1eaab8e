use std::env;
use std::path::PathBuf;

use serde::Serialize;

use crate::error::{Error, Result};

pub const DB_ENV: &str = "ROMMAN_DB";
const DB_FILE: &str = "romman.sqlite";

pub const DEFAULT_BATCH_SIZE: usize = 100;
pub const DEFAULT_REGION_PRIORITY: &[&str] = &["Europe", "World", "USA", "Japan"];

/// Runtime settings threaded into the core operations. Constructed once by
/// the front-end; no process-wide state.
#[derive(Debug, Clone, Serialize)]
pub struct Config {
    pub db_path: PathBuf,
    pub region_priority: Vec<String>,
    pub workers: usize,
    pub batch_size: usize,
    pub sequential: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            db_path: default_db_path(),
            region_priority: DEFAULT_REGION_PRIORITY
                .iter()
                .map(|r| r.to_string())
                .collect(),
            workers: num_cpus::get(),
            batch_size: DEFAULT_BATCH_SIZE,
            sequential: false,
        }
    }
}

impl Config {
    /// Apply front-end overrides over the defaults. `workers == 0` or
    /// `batch_size == 0` are configuration errors rather than silent
    /// fallbacks.
    pub fn resolve(
        db_path: Option<PathBuf>,
        region_priority: Option<Vec<String>>,
        workers: Option<usize>,
        batch_size: Option<usize>,
        sequential: bool,
    ) -> Result<Config> {
        let mut config = Config::default();
        if let Some(path) = db_path {
            config.db_path = path;
        }
        if let Some(regions) = region_priority {
            if regions.is_empty() {
                return Err(Error::Config("region priority list is empty".into()));
            }
            config.region_priority = regions;
        }
        if let Some(workers) = workers {
            if workers == 0 {
                return Err(Error::Config("worker count must be at least 1".into()));
            }
            config.workers = workers;
        }
        if let Some(batch) = batch_size {
            if batch == 0 {
                return Err(Error::Config("batch size must be at least 1".into()));
            }
            config.batch_size = batch;
        }
        config.sequential = sequential;
        Ok(config)
    }
}

/// `ROMMAN_DB` wins over the per-directory default.
fn default_db_path() -> PathBuf {
    if let Ok(path) = env::var(DB_ENV) {
        if !path.is_empty() {
            return PathBuf::from(path);
        }
    }
    let mut p = env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    p.push(DB_FILE);
    p
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_flags_override_defaults() {
        let config = Config::resolve(
            Some(PathBuf::from("/tmp/x.sqlite")),
            Some(vec!["USA".into(), "Japan".into()]),
            Some(2),
            Some(50),
            true,
        )
        .unwrap();
        assert_eq!(config.db_path, PathBuf::from("/tmp/x.sqlite"));
        assert_eq!(config.region_priority, vec!["USA", "Japan"]);
        assert_eq!(config.workers, 2);
        assert_eq!(config.batch_size, 50);
        assert!(config.sequential);
    }

    #[test]
    fn zero_workers_rejected() {
        let err = Config::resolve(None, None, Some(0), None, false).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn zero_batch_rejected() {
        assert!(Config::resolve(None, None, None, Some(0), false).is_err());
    }
}
