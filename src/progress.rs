use serde::Serialize;

/// Progress snapshot delivered to an optional caller-owned sink during
/// scans. The core performs no terminal I/O of its own.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct ScanProgress {
    pub files_scanned: u64,
    pub total_files: u64,
}

/// Callback type front-ends may subscribe with.
pub type ProgressFn = dyn Fn(ScanProgress) + Send + Sync;

pub(crate) fn emit(sink: Option<&ProgressFn>, files_scanned: u64, total_files: u64) {
    if let Some(callback) = sink {
        callback(ScanProgress {
            files_scanned,
            total_files,
        });
    }
}
