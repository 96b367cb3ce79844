//! Reads, listings and queue statistics.

use std::fs;

use crate::job::{JobRecord, LogEntry, Status};
use crate::layout;
use crate::queue_store::helpers::load_record_opt;
use crate::queue_store::{QueueError, QueueStore};

/// A point-in-time summary of the queue's contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueStats {
    pub live: usize,
    pub queued: usize,
    pub waiting: usize,
    pub running: usize,
    pub canceling: usize,
    pub terminal: usize,
    pub archived: usize,
}

impl QueueStore {
    /// Fetch a job record by ID, looking in the live set first and falling
    /// back to the archive.
    pub async fn fetch(&self, id: u64) -> Result<JobRecord, QueueError> {
        if let Some(record) = load_record_opt(&layout::job_file(self.root(), id))? {
            return Ok(record);
        }
        if let Some(record) = load_record_opt(&layout::archived_job_file(self.root(), id))? {
            return Ok(record);
        }
        Err(QueueError::JobNotFound(id))
    }

    /// IDs of all live jobs, ascending.
    pub fn live_jobs(&self) -> Vec<u64> {
        self.live.lock().unwrap().keys().copied().collect()
    }

    /// IDs of live jobs whose last persisted status matches, ascending.
    pub fn jobs_by_status(&self, status: Status) -> Vec<u64> {
        self.live
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, s)| **s == status)
            .map(|(id, _)| *id)
            .collect()
    }

    /// Execution-log entries of a job with serials greater than `after`,
    /// for clients polling incrementally.
    pub async fn log_since(&self, id: u64, after: u64) -> Result<Vec<LogEntry>, QueueError> {
        let record = self.fetch(id).await?;
        Ok(record
            .log
            .into_iter()
            .filter(|entry| entry.serial > after)
            .collect())
    }

    /// Current queue statistics: live counts per status plus the archived
    /// record count.
    pub fn stats(&self) -> Result<QueueStats, QueueError> {
        let mut stats = {
            let live = self.live.lock().unwrap();
            let mut stats = QueueStats {
                live: live.len(),
                queued: 0,
                waiting: 0,
                running: 0,
                canceling: 0,
                terminal: 0,
                archived: 0,
            };
            for status in live.values() {
                match status {
                    Status::Queued => stats.queued += 1,
                    Status::Waiting => stats.waiting += 1,
                    Status::Running => stats.running += 1,
                    Status::Canceling => stats.canceling += 1,
                    _ => stats.terminal += 1,
                }
            }
            stats
        };

        for chunk in fs::read_dir(layout::archive_dir(self.root()))? {
            let chunk = chunk?;
            if !chunk.file_type()?.is_dir() {
                continue;
            }
            for entry in fs::read_dir(chunk.path())? {
                let entry = entry?;
                let name = entry.file_name();
                if name
                    .to_str()
                    .and_then(layout::parse_job_file_name)
                    .is_some()
                {
                    stats.archived += 1;
                }
            }
        }
        Ok(stats)
    }
}
