//! Durable, directory-backed job queue.
//!
//! This module contains the core `QueueStore` type and its implementation,
//! split across submodules by operation:
//!
//! - `submit`: serial allocation and job creation
//! - `fetch`: reads, listings and queue statistics
//! - `update`: per-job-locked record mutation
//! - `cancel`: job cancellation
//! - `archive`: moving terminal jobs into the archive
//! - `recover`: crash recovery on open
//! - `helpers`: timestamps and atomic file replacement

mod archive;
mod cancel;
mod fetch;
mod helpers;
mod recover;
mod submit;
mod update;

pub use cancel::CancelOutcome;
pub use fetch::QueueStats;
pub use helpers::now_epoch_ms;

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex};

use thiserror::Error;
use tokio::sync::{Mutex as AsyncMutex, Notify};
use tracing::info;

use crate::job::Status;
use crate::layout;
use crate::params::ParamError;
use crate::settings::QueueConfig;
use crate::version;

/// Shard count for the per-job lock tier.
const JOB_LOCK_SHARDS: usize = 64;

/// The durable queue: one directory owning every live and archived job
/// record, a serial allocator, a drain flag and the structural lock.
#[derive(Debug)]
pub struct QueueStore {
    cfg: QueueConfig,
    root: PathBuf,
    /// Advisory lock on the queue directory, held for the store's lifetime.
    _dir_lock: QueueDirLock,
    /// Live jobs and their last persisted status. The mutex doubles as the
    /// in-process structural tier: serial allocation and membership changes
    /// happen inside its critical sections, never op execution.
    live: StdMutex<BTreeMap<u64, Status>>,
    /// Sharded per-job locks, keyed by `id % JOB_LOCK_SHARDS`.
    job_locks: Vec<AsyncMutex<()>>,
    /// Wakes the scheduler when new work arrives.
    pub(crate) notify: Notify,
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("json serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error(transparent)]
    Params(#[from] ParamError),
    #[error("a job must contain at least one operation")]
    EmptyJob,
    #[error("job {0} not found")]
    JobNotFound(u64),
    #[error("queue is drained, not accepting new jobs")]
    QueueDrained,
    #[error("queue is full: {live} live jobs at a hard limit of {limit}")]
    QueueFull { live: usize, limit: usize },
    #[error("job {id} cannot be canceled in terminal status {status}")]
    CannotCancel { id: u64, status: Status },
    #[error("job {id} cannot be archived in non-terminal status {status}")]
    NotArchivable { id: u64, status: Status },
    #[error("queue directory lock at {0:?} is held by another process")]
    LockUnavailable(PathBuf),
    #[error(
        "queue format version mismatch: found {found_major}.{found_minor}.{found_revision}, \
         expected {}.{}.{} - upgrade required",
        version::FORMAT_MAJOR,
        version::FORMAT_MINOR,
        version::FORMAT_REVISION
    )]
    VersionMismatch {
        found_major: u64,
        found_minor: u64,
        found_revision: u64,
    },
    #[error("corrupt queue state at {path:?}: {reason}")]
    Corrupt { path: PathBuf, reason: String },
}

/// Exclusive advisory lock on the queue directory's lock file. One process
/// owns a queue directory at a time; the lock is released on drop.
#[derive(Debug)]
struct QueueDirLock {
    #[allow(dead_code)]
    file: File,
}

impl QueueDirLock {
    fn acquire(path: &Path) -> Result<Self, QueueError> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(path)?;

        #[cfg(unix)]
        {
            use std::os::unix::io::AsRawFd;
            let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
            if rc != 0 {
                return Err(QueueError::LockUnavailable(path.to_path_buf()));
            }
        }

        Ok(Self { file })
    }
}

#[cfg(unix)]
impl Drop for QueueDirLock {
    fn drop(&mut self) {
        use std::os::unix::io::AsRawFd;
        unsafe {
            libc::flock(self.file.as_raw_fd(), libc::LOCK_UN);
        }
    }
}

impl QueueStore {
    /// Open (or initialize) the queue directory and recover any jobs left
    /// behind by an unclean shutdown.
    ///
    /// Fatal conditions: the directory lock is held elsewhere, the version
    /// file does not match the current format, or a record cannot be read.
    pub async fn open(cfg: QueueConfig) -> Result<Arc<Self>, QueueError> {
        let root = cfg.dir.clone();
        fs::create_dir_all(&root)?;
        fs::create_dir_all(layout::archive_dir(&root))?;

        let dir_lock = QueueDirLock::acquire(&layout::lock_file(&root))?;
        Self::check_version(&root)?;

        let serial_path = layout::serial_file(&root);
        if !serial_path.exists() {
            helpers::write_atomic(&serial_path, b"0")?;
        }

        let live = Self::load_index(&root)?;
        let serial = helpers::read_serial(&root)?;
        if let Some((&max_id, _)) = live.iter().next_back() {
            if serial < max_id {
                return Err(QueueError::Corrupt {
                    path: serial_path,
                    reason: format!("serial {serial} is behind live job {max_id}"),
                });
            }
        }

        let store = Arc::new(Self {
            cfg,
            root,
            _dir_lock: dir_lock,
            live: StdMutex::new(live),
            job_locks: (0..JOB_LOCK_SHARDS).map(|_| AsyncMutex::new(())).collect(),
            notify: Notify::new(),
        });
        store.recover()?;

        info!(
            dir = %store.root.display(),
            live = store.live_count(),
            serial,
            "job queue opened"
        );
        Ok(store)
    }

    /// Stamp a fresh directory with the current format version, or verify
    /// the stamp an existing directory carries.
    fn check_version(root: &Path) -> Result<(), QueueError> {
        let path = layout::version_file(root);
        if !path.exists() {
            helpers::write_atomic(&path, version::FORMAT_VERSION.to_string().as_bytes())?;
            return Ok(());
        }
        let raw = fs::read_to_string(&path)?;
        let found: u64 = raw
            .trim()
            .parse()
            .map_err(|_| QueueError::Corrupt {
                path: path.clone(),
                reason: format!("version file does not contain an integer: {raw:?}"),
            })?;
        if found != version::FORMAT_VERSION {
            let (found_major, found_minor, found_revision) = version::decode(found);
            return Err(QueueError::VersionMismatch {
                found_major,
                found_minor,
                found_revision,
            });
        }
        Ok(())
    }

    /// Scan the queue root for live records and build the status index.
    fn load_index(root: &Path) -> Result<BTreeMap<u64, Status>, QueueError> {
        let mut live = BTreeMap::new();
        for entry in fs::read_dir(root)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            let Some(id) = layout::parse_job_file_name(name) else {
                continue;
            };
            let record = helpers::load_record(&entry.path())?;
            if record.id != id {
                return Err(QueueError::Corrupt {
                    path: entry.path(),
                    reason: format!("record claims job id {}, file name says {id}", record.id),
                });
            }
            live.insert(id, record.status);
        }
        Ok(live)
    }

    pub fn config(&self) -> &QueueConfig {
        &self.cfg
    }

    pub(crate) fn root(&self) -> &Path {
        &self.root
    }

    pub(crate) fn job_lock(&self, id: u64) -> &AsyncMutex<()> {
        &self.job_locks[(id % JOB_LOCK_SHARDS as u64) as usize]
    }

    /// Number of live (non-archived) jobs.
    pub fn live_count(&self) -> usize {
        self.live.lock().unwrap().len()
    }

    /// True while the drain flag file is present.
    pub fn is_drained(&self) -> bool {
        layout::drain_file(&self.root).exists()
    }

    /// Toggle the drain flag. Draining only gates new submissions; queued
    /// jobs keep running.
    pub fn set_drain(&self, drain: bool) -> Result<(), QueueError> {
        let _structural = self.live.lock().unwrap();
        let path = layout::drain_file(&self.root);
        if drain {
            File::create(&path)?;
        } else if let Err(err) = fs::remove_file(&path) {
            if err.kind() != std::io::ErrorKind::NotFound {
                return Err(err.into());
            }
        }
        info!(drain, "queue drain flag updated");
        Ok(())
    }
}
