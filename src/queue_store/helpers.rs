//! Helpers shared across queue store submodules.

use std::fs::{self, File};
use std::io::Write;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::job::JobRecord;
use crate::layout;
use crate::queue_store::QueueError;

/// Get current epoch time in milliseconds.
pub fn now_epoch_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

/// Replace a file atomically: write the full contents to a sibling temp
/// file, fsync, then rename over the target. Readers either see the old
/// contents or the new, never a partial write.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let tmp = path.with_extension("new");
    {
        let mut file = File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)
}

pub(crate) fn read_serial(root: &Path) -> Result<u64, QueueError> {
    let path = layout::serial_file(root);
    let raw = fs::read_to_string(&path)?;
    raw.trim().parse().map_err(|_| QueueError::Corrupt {
        path,
        reason: format!("serial file does not contain an integer: {raw:?}"),
    })
}

pub(crate) fn write_serial(root: &Path, serial: u64) -> std::io::Result<()> {
    write_atomic(&layout::serial_file(root), serial.to_string().as_bytes())
}

/// Load a job record, treating unparseable contents as fatal corruption.
pub(crate) fn load_record(path: &Path) -> Result<JobRecord, QueueError> {
    let raw = fs::read(path)?;
    serde_json::from_slice(&raw).map_err(|err| QueueError::Corrupt {
        path: path.to_path_buf(),
        reason: err.to_string(),
    })
}

/// Load a job record if its file exists.
pub(crate) fn load_record_opt(path: &Path) -> Result<Option<JobRecord>, QueueError> {
    match load_record(path) {
        Ok(record) => Ok(Some(record)),
        Err(QueueError::Io(err)) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err),
    }
}

pub(crate) fn store_record(path: &Path, record: &JobRecord) -> Result<(), QueueError> {
    let bytes = serde_json::to_vec(record)?;
    write_atomic(path, &bytes)?;
    Ok(())
}
