//! Moving terminal jobs into the archive.

use std::fs;

use tracing::{debug, info};

use crate::layout;
use crate::queue_store::helpers::{load_record_opt, now_epoch_ms};
use crate::queue_store::{QueueError, QueueStore};

impl QueueStore {
    /// Move a terminal job from the live set into the archive. Returns
    /// `true` if the record was moved; archiving an already-archived job is
    /// a no-op returning `false`.
    ///
    /// The record file is renamed into its ID-range chunk directory, so the
    /// move is atomic and `fetch` keeps finding the job through its archive
    /// fallback.
    pub async fn archive(&self, id: u64) -> Result<bool, QueueError> {
        let _guard = self.job_lock(id).lock().await;

        let live_path = layout::job_file(self.root(), id);
        let Some(job) = load_record_opt(&live_path)? else {
            if layout::archived_job_file(self.root(), id).exists() {
                return Ok(false);
            }
            return Err(QueueError::JobNotFound(id));
        };

        if !job.status.is_terminal() {
            return Err(QueueError::NotArchivable {
                id,
                status: job.status,
            });
        }

        let archived_path = layout::archived_job_file(self.root(), id);
        if let Some(chunk_dir) = archived_path.parent() {
            fs::create_dir_all(chunk_dir)?;
        }
        fs::rename(&live_path, &archived_path)?;
        self.live.lock().unwrap().remove(&id);

        info!(job_id = id, status = %job.status, "job archived");
        Ok(true)
    }

    /// Archive every terminal live job whose last activity is older than
    /// `max_age_ms`. Returns the number of jobs moved.
    pub async fn auto_archive(&self, max_age_ms: i64) -> Result<usize, QueueError> {
        let cutoff = now_epoch_ms() - max_age_ms;
        let candidates: Vec<u64> = {
            let live = self.live.lock().unwrap();
            live.iter()
                .filter(|(_, status)| status.is_terminal())
                .map(|(id, _)| *id)
                .collect()
        };

        let mut moved = 0;
        for id in candidates {
            let record = match self.fetch(id).await {
                Ok(record) => record,
                // Raced with an explicit archive; the fallback read can
                // still lose to a concurrent rename mid-move.
                Err(QueueError::JobNotFound(_)) => continue,
                Err(err) => return Err(err),
            };
            if !record.status.is_terminal() || record.last_activity_ms() > cutoff {
                continue;
            }
            if self.archive(id).await? {
                moved += 1;
            }
        }

        if moved > 0 {
            debug!(moved, max_age_ms, "auto-archived expired jobs");
        }
        Ok(moved)
    }
}
