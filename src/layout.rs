//! On-disk layout of the queue directory.

use std::path::{Path, PathBuf};

pub const LOCK_FILE: &str = "lock";
pub const VERSION_FILE: &str = "version";
pub const SERIAL_FILE: &str = "serial";
pub const ARCHIVE_DIR: &str = "archive";
pub const DRAIN_FILE: &str = "drain";

/// Archived records are grouped in buckets of this many job IDs so whole
/// chunks of old jobs can be removed at once.
pub const ARCHIVE_CHUNK: u64 = 10_000;

pub fn lock_file(root: &Path) -> PathBuf {
    root.join(LOCK_FILE)
}

pub fn version_file(root: &Path) -> PathBuf {
    root.join(VERSION_FILE)
}

pub fn serial_file(root: &Path) -> PathBuf {
    root.join(SERIAL_FILE)
}

pub fn drain_file(root: &Path) -> PathBuf {
    root.join(DRAIN_FILE)
}

pub fn archive_dir(root: &Path) -> PathBuf {
    root.join(ARCHIVE_DIR)
}

/// Live record file for a job.
pub fn job_file(root: &Path, id: u64) -> PathBuf {
    root.join(format!("job-{id}"))
}

/// Archived record file for a job, inside its ID-range chunk.
pub fn archived_job_file(root: &Path, id: u64) -> PathBuf {
    archive_dir(root)
        .join((id / ARCHIVE_CHUNK).to_string())
        .join(format!("job-{id}"))
}

/// Parse a live record file name back into a job ID.
pub fn parse_job_file_name(name: &str) -> Option<u64> {
    name.strip_prefix("job-")?.parse().ok()
}
